// Driving the backend through the C function table

use std::ffi::{c_char, CString};
use std::rc::Rc;

use vellum::backend::{
    AccessFlags, BlendFactor, BlendOp, BufferUsage, ClearFlags, ColorMask, Comparison, CullMode, FillMode, PipelineFlags,
    PipelineMembers, PixelFormat, Primitive, ShaderStage, ShaderType, StencilOp, TextureUsage,
};
use vellum::driver::SoftwareDriver;
use vellum::ffi::{
    self, BackendVtable, BlendC, ColorC, ExtentC, Handle, PipelineDescC, RectC, ShaderParameterC, ShaderValueC,
    TextureDescC,
};
use vellum::ErrorKind;

const VERTEX: &str = "#version 460\n\
    layout(location = 0) in vec2 position;\n\
    void main() { gl_Position = vec4(position, 0.0, 1.0); }\n";

const PIXEL: &str = "#version 460\n\
    uniform vec4 tint;\n\
    layout(location = 0) out vec4 color;\n\
    void main() { color = tint; }\n";

struct Host {
    vt: *mut BackendVtable,
    ctx: Handle,
}

impl Host {
    fn new() -> (Rc<SoftwareDriver>, Self) {
        let _ = env_logger::builder().is_test(true).try_init();
        let driver = Rc::new(SoftwareDriver::new());
        let vt = ffi::software_backend(driver.clone(), std::ptr::null_mut(), None);
        // SAFETY: the table was just created
        let ctx = unsafe { ((*vt).create_context)(vt, 64, 64, PixelFormat::R8G8B8A8Unorm as u8) };
        assert_ne!(ctx, 0);
        (driver, Self { vt, ctx })
    }

    fn table(&self) -> &BackendVtable {
        // SAFETY: the table lives until `Host` drops
        unsafe { &*self.vt }
    }

    fn shader(&self, stage: ShaderStage, source: &str) -> Handle {
        let source = CString::new(source).unwrap();
        // SAFETY: live context, NUL-terminated source
        unsafe { (self.table().compile_shader)(self.vt, self.ctx, stage as u8, source.as_ptr()) }
    }

    fn texture(&self, format: PixelFormat) -> Handle {
        let desc = TextureDescC {
            width: 32,
            height: 32,
            depth: 1,
            usage: TextureUsage::Texture2D as u8,
            format: format as u8,
            mip_levels: 1,
            samples: 1,
            sampler: std::ptr::null(),
        };
        // SAFETY: live context, valid description, no initial data
        let texture = unsafe { (self.table().create_texture)(self.vt, self.ctx, &desc, std::ptr::null()) };
        assert_ne!(texture, 0);
        texture
    }

    fn render_target(&self, colors: &[Handle], depth: Handle, attachments: ClearFlags) -> Handle {
        // SAFETY: live context and texture handles
        unsafe {
            (self.table().create_render_target)(
                self.vt,
                self.ctx,
                depth,
                colors.as_ptr(),
                colors.len() as u32,
                attachments.bits(),
            )
        }
    }

    fn destroy(&self, resources: &[Handle]) {
        for &resource in resources {
            // SAFETY: each handle is live and released once
            assert_eq!(unsafe { (self.table().destroy_resource)(self.vt, self.ctx, resource) }, 0);
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        // SAFETY: both handles are live
        unsafe {
            (self.table().destroy_context)(self.vt, self.ctx);
            (self.table().destroy)(self.vt);
        }
    }
}

fn pipeline_desc(shaders: [Handle; ShaderStage::COUNT]) -> PipelineDescC {
    PipelineDescC {
        members: (PipelineMembers::CULL | PipelineMembers::PRIMITIVE).bits(),
        shaders,
        blend_factor: ColorC::default(),
        flags: PipelineFlags::empty().bits(),
        sample_mask: u32::MAX,
        stencil_ref: 0,
        stencil_read_mask: 0xff,
        stencil_write_mask: 0xff,
        stencil_fail: StencilOp::Keep as u8,
        stencil_depth_fail: StencilOp::Keep as u8,
        stencil_pass: StencilOp::Keep as u8,
        stencil_func: Comparison::Disabled as u8,
        depth_func: Comparison::Disabled as u8,
        fill: FillMode::Fill as u8,
        cull: CullMode::None as u8,
        primitive: Primitive::Triangle as u8,
        depth_bias: 0,
        slope_scaled_depth_bias: 0.0,
    }
}

fn attribute(name: &CString, ty: ShaderType, length: u32) -> ShaderParameterC {
    ShaderParameterC { name: name.as_ptr() as *const c_char, ty: ty as u8, length, width: 1, index: 0, offset: 0, step: 0 }
}

#[test]
fn triangle_through_the_table() {
    let (driver, host) = Host::new();
    let t = host.table();
    let vt = host.vt;

    let vertex = host.shader(ShaderStage::Vertex, VERTEX);
    let pixel = host.shader(ShaderStage::Pixel, PIXEL);
    assert!(vertex != 0 && pixel != 0);
    let color = host.texture(PixelFormat::R8G8B8A8Unorm);
    let target = host.render_target(&[color], 0, ClearFlags::empty());
    assert_ne!(target, 0);

    let positions: [f32; 6] = [-1.0, -1.0, 3.0, -1.0, -1.0, 3.0];
    // SAFETY: every pointer below outlives the call it is passed to
    unsafe {
        let vertices = (t.create_buffer)(vt, host.ctx, positions.as_ptr().cast(), 24, BufferUsage::Vertex as u8);
        assert_ne!(vertices, 0);

        let mut shaders = [0; ShaderStage::COUNT];
        shaders[ShaderStage::Vertex as usize] = vertex;
        shaders[ShaderStage::Pixel as usize] = pixel;
        let desc = pipeline_desc(shaders);
        let blend = BlendC {
            src: BlendFactor::SrcAlpha as u8,
            dest: BlendFactor::InvSrcAlpha as u8,
            op: BlendOp::Add as u8,
            src_alpha: BlendFactor::One as u8,
            dest_alpha: BlendFactor::Zero as u8,
            op_alpha: BlendOp::Add as u8,
            write_mask: ColorMask::all().bits(),
        };
        let position = CString::new("position").unwrap();
        let attributes = [attribute(&position, ShaderType::Float, 2)];
        let stride = 8u32;
        let pipeline = (t.create_pipeline_state)(
            vt,
            host.ctx,
            &desc,
            &target,
            1,
            &blend,
            &vertices,
            &stride,
            1,
            attributes.as_ptr(),
            1,
            0,
            0,
        );
        assert_ne!(pipeline, 0);

        let tint_name = CString::new("tint").unwrap();
        let tint = [1.0f32, 0.0, 0.0, 1.0];
        let list = (t.create_command_list)(vt, host.ctx);
        assert_eq!((t.set_pipeline_state)(vt, list, pipeline), 0);
        let params = [attribute(&tint_name, ShaderType::Float, 4)];
        let values = [ShaderValueC { floats: tint.as_ptr() }];
        assert_eq!((t.set_shader_constants)(vt, list, params.as_ptr(), values.as_ptr(), 1), 0);
        assert_eq!((t.draw)(vt, list, 3, 1, 0, 0), 0);
        assert_eq!((t.execute)(vt, host.ctx, list), 0);

        let draws = driver.draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].count, 3);
        assert_eq!(draws[0].targets.len(), 1);

        (t.destroy_command_list)(vt, list);
        (t.destroy_pipeline)(vt, host.ctx, pipeline);
        host.destroy(&[vertices, target, color]);
        (t.destroy_shader)(vt, host.ctx, vertex);
        (t.destroy_shader)(vt, host.ctx, pixel);
    }
}

#[test]
fn bad_inputs_come_back_as_codes() {
    let (_driver, host) = Host::new();
    let t = host.table();
    let vt = host.vt;

    assert_eq!(host.shader(ShaderStage::Pixel, "#version 460\nvoid helper() {}\n"), 0);
    let pixel = host.shader(ShaderStage::Pixel, PIXEL);

    // A pixel shader in the vertex slot
    let mut shaders = [0; ShaderStage::COUNT];
    shaders[ShaderStage::Vertex as usize] = pixel;
    let desc = pipeline_desc(shaders);
    // SAFETY: live handles, null optional pointers
    unsafe {
        let pipeline = (t.create_pipeline_state)(
            vt,
            host.ctx,
            &desc,
            std::ptr::null(),
            0,
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            0,
            std::ptr::null(),
            0,
            0,
            0,
        );
        assert_eq!(pipeline, 0);

        let buffer = (t.create_buffer)(vt, host.ctx, std::ptr::null(), 16, 42);
        assert_eq!(buffer, 0);

        let list = (t.create_command_list)(vt, host.ctx);
        let name = CString::new("weights").unwrap();
        let params = [attribute(&name, ShaderType::Double, 1)];
        let values = [ShaderValueC { u32: 0 }];
        let code = (t.set_shader_constants)(vt, list, params.as_ptr(), values.as_ptr(), 1);
        assert_eq!(code, ffi::error_code(ErrorKind::InvalidParameter));
        (t.destroy_command_list)(vt, list);
        (t.destroy_shader)(vt, host.ctx, pixel);
    }
}

#[test]
fn render_targets_attach_colours_and_depth() {
    let (driver, host) = Host::new();
    let t = host.table();
    let vt = host.vt;
    let albedo = host.texture(PixelFormat::R8G8B8A8Unorm);
    let normal = host.texture(PixelFormat::R8G8B8A8Unorm);
    let depth = host.texture(PixelFormat::D24UnormS8Uint);
    let depth_stencil = ClearFlags::DEPTH | ClearFlags::STENCIL;

    let gbuffer = host.render_target(&[albedo, normal], depth, depth_stencil);
    assert_ne!(gbuffer, 0);
    assert_eq!(host.render_target(&[albedo], 0, ClearFlags::DEPTH), 0);
    assert_eq!(host.render_target(&[albedo], normal, depth_stencil), 0);
    assert_eq!(host.render_target(&[depth], 0, ClearFlags::empty()), 0);
    // Without depth bits the depth handle is not looked at
    let colour_only = host.render_target(&[albedo], 0xdead_beef, ClearFlags::COLOR);
    assert_ne!(colour_only, 0);

    let mut shaders = [0; ShaderStage::COUNT];
    shaders[ShaderStage::Vertex as usize] = host.shader(ShaderStage::Vertex, VERTEX);
    let desc = pipeline_desc(shaders);
    // SAFETY: live handles, null optional pointers
    unsafe {
        let pipeline = (t.create_pipeline_state)(
            vt,
            host.ctx,
            &desc,
            &gbuffer,
            1,
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            0,
            std::ptr::null(),
            0,
            0,
            0,
        );
        assert_ne!(pipeline, 0);

        let list = (t.create_command_list)(vt, host.ctx);
        assert_eq!((t.set_pipeline_state)(vt, list, pipeline), 0);
        assert_eq!((t.draw)(vt, list, 3, 1, 0, 0), 0);
        assert_eq!((t.execute)(vt, host.ctx, list), 0);
        assert_eq!(driver.draws().pop().unwrap().targets.len(), 2);

        (t.destroy_command_list)(vt, list);
        (t.destroy_pipeline)(vt, host.ctx, pipeline);
        (t.destroy_shader)(vt, host.ctx, shaders[ShaderStage::Vertex as usize]);
    }
    host.destroy(&[gbuffer, colour_only, albedo, normal, depth]);
}

#[test]
fn copies_and_rectangle_clears_through_the_table() {
    let (driver, host) = Host::new();
    let t = host.table();
    let vt = host.vt;
    let words: [u32; 4] = [1, 2, 3, 4];
    let clears_before = driver.clears().len();

    // SAFETY: every pointer below outlives the call it is passed to
    unsafe {
        let src = (t.create_buffer)(vt, host.ctx, words.as_ptr().cast(), 16, BufferUsage::Storage as u8);
        let dest = (t.create_buffer)(vt, host.ctx, std::ptr::null(), 16, BufferUsage::Storage as u8);
        let first = host.texture(PixelFormat::R8G8B8A8Unorm);
        let second = host.texture(PixelFormat::R8G8B8A8Unorm);
        let whole = ExtentC { x: 8, y: 1, z: 1 };

        let list = (t.create_command_list)(vt, host.ctx);
        let mismatched = (t.copy_resource)(vt, list, src, first, whole, 0);
        assert_eq!(mismatched, ffi::error_code(ErrorKind::InvalidParameter));
        assert_eq!((t.copy_resource)(vt, list, src, dest, whole, 0), 0);
        assert_eq!((t.copy_resource)(vt, list, first, second, ExtentC { x: 32, y: 32, z: 1 }, 0), 0);
        let corner = ExtentC { x: 16, y: 16, z: 0 };
        let quad = ExtentC { x: 16, y: 16, z: 1 };
        assert_eq!((t.copy_resource_region)(vt, list, first, second, 0, corner, ExtentC::default(), quad), 0);
        assert_ne!((t.copy_resource_region)(vt, list, src, second, 0, corner, ExtentC::default(), quad), 0);

        let rects = [RectC { left: 0, top: 0, right: 4, bottom: 4 }, RectC { left: 8, top: 8, right: 10, bottom: 12 }];
        let color = ColorC { r: 1.0, g: 0.0, b: 0.0, a: 1.0 };
        let flags = ClearFlags::COLOR.bits();
        assert_eq!((t.clear)(vt, list, flags, color, 1.0, 0, rects.len() as u32, rects.as_ptr()), 0);
        let inverted = [RectC { left: 4, top: 0, right: 2, bottom: 4 }];
        assert_ne!((t.clear)(vt, list, flags, color, 1.0, 0, 1, inverted.as_ptr()), 0);
        assert_eq!((t.execute)(vt, host.ctx, list), 0);
        (t.destroy_command_list)(vt, list);

        let scissors: Vec<_> = driver.clears()[clears_before..].iter().map(|c| c.scissor).collect();
        assert_eq!(scissors, vec![Some([0, 0, 4, 4]), Some([8, 8, 2, 4])]);
        let mapped = (t.map_resource)(vt, host.ctx, dest, 0, 16, AccessFlags::READ.bits());
        assert!(!mapped.is_null());
        assert_eq!(std::slice::from_raw_parts(mapped.cast::<u32>(), 2), &words[..2]);
        assert_eq!((t.unmap_resource)(vt, host.ctx, dest), 0);
        host.destroy(&[src, dest, first, second]);
    }
}
