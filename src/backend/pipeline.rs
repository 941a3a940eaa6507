// Pipeline states
//
// A graphics pipeline owns its program and vertex layout and carries a fixed
// function description that `apply` pushes to the driver as a whole. Render
// targets are referenced, not owned; they are attached to the context's
// render framebuffer on every apply.

use glam::{UVec2, UVec3, Vec4};

use super::device::Context;
use super::framebuffer::{draw_buffers, AttachmentPoint};
use super::shader::{ProgramObject, ShaderObject};
use super::texture::Texture;
use super::types::{
    Blend, ColorMask, Comparison, CullMode, FillMode, PipelineFlags, PipelineMembers, PixelFormat, Primitive,
    ShaderParameter, ShaderStage, StencilOp,
};
use super::vertex_layout::{IndexBuffer, VertexBuffer, VertexLayout};
use crate::driver::{gl, Driver, NativeEnum, ObjectId};
use crate::error::{check, status, BackendError, BackendResult, ErrorKind};

/// Per-stage compile results gathered before a pipeline is created.
///
/// Results are accepted as they come back from [`ShaderObject::compile`]; the
/// first failure is kept and reported when the pipeline is created.
#[derive(Debug, Default)]
pub struct ShaderStages {
    slots: [Option<ShaderObject>; ShaderStage::COUNT],
    error: Option<BackendError>,
}

impl ShaderStages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, result: BackendResult<ShaderObject>) -> Self {
        self.add(result);
        self
    }

    pub fn add(&mut self, result: BackendResult<ShaderObject>) {
        let shader = match result {
            Ok(shader) => shader,
            Err(err) => {
                self.error.get_or_insert(err);
                return;
            }
        };
        let slot = &mut self.slots[shader.stage() as usize];
        if slot.is_some() {
            let err = BackendError::invalid("ShaderStages::add", format!("{:?} stage given twice", shader.stage()));
            self.error.get_or_insert(err);
        } else {
            *slot = Some(shader);
        }
    }

    pub fn has(&self, stage: ShaderStage) -> bool {
        self.slots[stage as usize].is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    fn into_shaders(self) -> BackendResult<Vec<ShaderObject>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.slots.into_iter().flatten().collect()),
        }
    }
}

/// Description of a graphics pipeline.
///
/// Only fields whose bit is set in `members` are honoured; the rest fall back
/// to their defaults when the pipeline is created.
#[derive(Debug)]
pub struct PipelineDesc {
    pub shaders: ShaderStages,
    pub members: PipelineMembers,
    pub primitive: Primitive,
    pub blend_factor: Vec4,
    pub flags: PipelineFlags,
    pub sample_mask: u32,
    pub stencil_ref: u8,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub stencil_fail: StencilOp,
    pub stencil_depth_fail: StencilOp,
    pub stencil_pass: StencilOp,
    pub stencil_func: Comparison,
    pub depth_func: Comparison,
    pub fill: FillMode,
    pub cull: CullMode,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
}

impl Default for PipelineDesc {
    fn default() -> Self {
        let d = FixedFunction::DEFAULT;
        Self {
            shaders: ShaderStages::default(),
            members: PipelineMembers::empty(),
            primitive: d.primitive,
            blend_factor: d.blend_factor,
            flags: d.flags,
            sample_mask: d.sample_mask,
            stencil_ref: d.stencil_ref,
            stencil_read_mask: d.stencil_read_mask,
            stencil_write_mask: d.stencil_write_mask,
            stencil_fail: d.stencil_ops[0],
            stencil_depth_fail: d.stencil_ops[1],
            stencil_pass: d.stencil_ops[2],
            stencil_func: d.stencil_func,
            depth_func: d.depth_func,
            fill: d.fill,
            cull: d.cull,
            depth_bias: d.depth_bias,
            slope_scaled_depth_bias: d.slope_scaled_depth_bias,
        }
    }
}

impl PipelineDesc {
    pub fn new(shaders: ShaderStages) -> Self {
        Self { shaders, ..Self::default() }
    }
}

/// Fixed-function state after member resolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedFunction {
    pub primitive: Primitive,
    pub blend_factor: Vec4,
    pub flags: PipelineFlags,
    pub sample_mask: u32,
    pub stencil_ref: u8,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    /// Stencil-fail, depth-fail and pass operations
    pub stencil_ops: [StencilOp; 3],
    pub stencil_func: Comparison,
    pub depth_func: Comparison,
    pub fill: FillMode,
    pub cull: CullMode,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
}

impl FixedFunction {
    pub const DEFAULT: FixedFunction = FixedFunction {
        primitive: Primitive::Triangle,
        blend_factor: Vec4::ZERO,
        flags: PipelineFlags::DEPTH_WRITE.union(PipelineFlags::DEPTH_CLIP),
        sample_mask: u32::MAX,
        stencil_ref: 0,
        stencil_read_mask: 0xFF,
        stencil_write_mask: 0xFF,
        stencil_ops: [StencilOp::Keep; 3],
        stencil_func: Comparison::Disabled,
        depth_func: Comparison::Disabled,
        fill: FillMode::Fill,
        cull: CullMode::None,
        depth_bias: 0,
        slope_scaled_depth_bias: 0.0,
    };

    fn resolve(desc: &PipelineDesc) -> Self {
        let d = Self::DEFAULT;
        let m = desc.members;
        Self {
            primitive: pick(m, PipelineMembers::PRIMITIVE, desc.primitive, d.primitive),
            blend_factor: pick(m, PipelineMembers::BLEND_FACTOR, desc.blend_factor, d.blend_factor),
            flags: pick(m, PipelineMembers::FLAGS, desc.flags, d.flags),
            sample_mask: pick(m, PipelineMembers::SAMPLE_MASK, desc.sample_mask, d.sample_mask),
            stencil_ref: pick(m, PipelineMembers::STENCIL_REF, desc.stencil_ref, d.stencil_ref),
            stencil_read_mask: pick(m, PipelineMembers::STENCIL_READ_MASK, desc.stencil_read_mask, d.stencil_read_mask),
            stencil_write_mask: pick(
                m,
                PipelineMembers::STENCIL_WRITE_MASK,
                desc.stencil_write_mask,
                d.stencil_write_mask,
            ),
            stencil_ops: pick(
                m,
                PipelineMembers::STENCIL,
                [desc.stencil_fail, desc.stencil_depth_fail, desc.stencil_pass],
                d.stencil_ops,
            ),
            stencil_func: pick(m, PipelineMembers::STENCIL, desc.stencil_func, d.stencil_func),
            depth_func: pick(m, PipelineMembers::DEPTH_FUNC, desc.depth_func, d.depth_func),
            fill: pick(m, PipelineMembers::FILL, desc.fill, d.fill),
            cull: pick(m, PipelineMembers::CULL, desc.cull, d.cull),
            depth_bias: pick(m, PipelineMembers::DEPTH_BIAS, desc.depth_bias, d.depth_bias),
            slope_scaled_depth_bias: pick(
                m,
                PipelineMembers::SLOPE_SCALED_BIAS,
                desc.slope_scaled_depth_bias,
                d.slope_scaled_depth_bias,
            ),
        }
    }
}

fn pick<T>(members: PipelineMembers, member: PipelineMembers, value: T, default: T) -> T {
    if members.contains(member) {
        value
    } else {
        default
    }
}

/// Non-owning reference to a texture used as a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    pub id: ObjectId,
    pub format: PixelFormat,
    pub size: UVec2,
}

impl From<&Texture> for RenderTarget {
    fn from(texture: &Texture) -> Self {
        Self { id: texture.id(), format: texture.format(), size: texture.size().truncate() }
    }
}

impl RenderTarget {
    /// Where this target lands in the render framebuffer, given the colour
    /// slot it would take
    fn attachment_point(&self, color_slot: u8) -> AttachmentPoint {
        match (self.format.has_depth(), self.format.has_stencil()) {
            (true, true) => AttachmentPoint::DepthStencil,
            (true, false) => AttachmentPoint::Depth,
            (false, true) => AttachmentPoint::Stencil,
            (false, false) => AttachmentPoint::Color(color_slot),
        }
    }
}

/// Graphics pipeline: program, vertex layout, fixed-function state and the
/// render targets it draws into
#[derive(Debug)]
pub struct PipelineState {
    program: ProgramObject,
    layout: VertexLayout,
    fixed: FixedFunction,
    blend: Blend,
    render_targets: Box<[RenderTarget]>,
}

impl PipelineState {
    /// Build a graphics pipeline.
    ///
    /// A vertex or mesh stage is required and a compute stage is refused.
    /// Colour targets take colour slots in the order given; at most one
    /// depth and/or stencil target may be present.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        ctx: &Context,
        desc: PipelineDesc,
        render_targets: &[RenderTarget],
        blend: &Blend,
        vertex_buffers: &[VertexBuffer<'_>],
        attributes: &[ShaderParameter<'_>],
        index_buffer: Option<IndexBuffer<'_>>,
    ) -> BackendResult<Self> {
        const OP: &str = "PipelineState::create";
        log::debug!("Creating pipeline state with {} render targets", render_targets.len());

        // Step 1: Validate stages and targets
        let fixed = FixedFunction::resolve(&desc);
        let stages = desc.shaders;
        if stages.has(ShaderStage::Compute) {
            return Err(BackendError::invalid(OP, "compute stage in a graphics pipeline"));
        }
        let shaders = stages.into_shaders()?;
        if !shaders.iter().any(|s| matches!(s.stage(), ShaderStage::Vertex | ShaderStage::Mesh)) {
            return Err(BackendError::invalid(OP, "graphics pipeline needs a vertex or mesh stage"));
        }
        let colors = render_targets.iter().filter(|t| t.format.is_color()).count();
        if colors as u32 > ctx.caps().max_render_targets {
            return Err(BackendError::invalid(
                OP,
                format!("{colors} colour targets, limit {}", ctx.caps().max_render_targets),
            ));
        }
        if render_targets.len() - colors > 1 {
            return Err(BackendError::invalid(OP, "more than one depth/stencil target"));
        }

        // Step 2: Link
        let program = ProgramObject::link(ctx, shaders)?;

        // Step 3: Vertex layout
        let layout = VertexLayout::create(ctx, &program, vertex_buffers, attributes, index_buffer)?;

        log::info!(program = program.id(), vertex_array = layout.id(); "Pipeline state created");
        Ok(Self { program, layout, fixed, blend: *blend, render_targets: render_targets.into() })
    }

    /// Make this pipeline current: program, vertex layout, every piece of
    /// fixed-function state, then the render targets in order.
    pub fn apply(&self, ctx: &Context) -> BackendResult<()> {
        let driver = &**ctx.driver();
        let f = &self.fixed;

        // Step 1: Program and vertex layout
        driver.use_program(self.program.id());
        check(driver, ErrorKind::Configuration, "glUseProgram")?;
        driver.bind_vertex_array(self.layout.id());
        check(driver, ErrorKind::Configuration, "glBindVertexArray")?;

        // Step 2: Blend
        let b = &self.blend;
        toggle(driver, gl::BLEND, b.is_enabled());
        driver.blend_func_separate(b.src.native(), b.dest.native(), b.src_alpha.native(), b.dest_alpha.native());
        driver.blend_equation_separate(b.op.native(), b.op_alpha.native());
        driver.blend_color(f.blend_factor);
        let mask = b.write_mask;
        driver.color_mask(
            mask.contains(ColorMask::RED),
            mask.contains(ColorMask::GREEN),
            mask.contains(ColorMask::BLUE),
            mask.contains(ColorMask::ALPHA),
        );
        check(driver, ErrorKind::Configuration, "blend state")?;

        // Step 3: Rasterizer
        driver.polygon_mode(gl::FRONT_AND_BACK, f.fill.native());
        match f.cull.native() {
            Some(face) => {
                driver.enable(gl::CULL_FACE);
                driver.cull_face(face);
            }
            None => driver.disable(gl::CULL_FACE),
        }
        let ccw = f.flags.contains(PipelineFlags::FRONT_COUNTER_CLOCKWISE);
        driver.front_face(if ccw { gl::CCW } else { gl::CW });
        let biased = f.depth_bias != 0 || f.slope_scaled_depth_bias != 0.0;
        toggle(driver, gl::POLYGON_OFFSET_FILL, biased);
        driver.polygon_offset(f.slope_scaled_depth_bias, f.depth_bias as f32);
        toggle(driver, gl::DEPTH_CLAMP, !f.flags.contains(PipelineFlags::DEPTH_CLIP));
        toggle(driver, gl::MULTISAMPLE, f.flags.contains(PipelineFlags::MULTISAMPLE));
        toggle(driver, gl::SAMPLE_ALPHA_TO_COVERAGE, f.flags.contains(PipelineFlags::ALPHA_TO_COVERAGE));
        toggle(driver, gl::LINE_SMOOTH, f.flags.contains(PipelineFlags::ANTIALIASED_LINE));
        toggle(driver, gl::SAMPLE_MASK, f.sample_mask != u32::MAX);
        driver.sample_mask(f.sample_mask);
        check(driver, ErrorKind::Configuration, "rasterizer state")?;

        // Step 4: Depth and stencil
        match f.depth_func.native() {
            Some(func) => {
                driver.enable(gl::DEPTH_TEST);
                driver.depth_func(func);
            }
            None => driver.disable(gl::DEPTH_TEST),
        }
        driver.depth_mask(f.flags.contains(PipelineFlags::DEPTH_WRITE));
        match f.stencil_func.native() {
            Some(func) => {
                driver.enable(gl::STENCIL_TEST);
                driver.stencil_func(func, i32::from(f.stencil_ref), u32::from(f.stencil_read_mask));
                let [fail, depth_fail, pass] = f.stencil_ops;
                driver.stencil_op(fail.native(), depth_fail.native(), pass.native());
            }
            None => driver.disable(gl::STENCIL_TEST),
        }
        driver.stencil_mask(u32::from(f.stencil_write_mask));
        check(driver, ErrorKind::Configuration, "depth-stencil state")?;

        // Step 5: Render targets
        self.attach_targets(ctx)
    }

    fn attach_targets(&self, ctx: &Context) -> BackendResult<()> {
        let driver = &**ctx.driver();

        let Some(first) = self.render_targets.first() else {
            driver.bind_framebuffer(gl::FRAMEBUFFER, 0);
            check(driver, ErrorKind::Configuration, "glBindFramebuffer")?;
            driver.draw_buffers(&[gl::BACK]);
            check(driver, ErrorKind::Configuration, "glDrawBuffers")?;
            return set_viewport(driver, ctx.size());
        };

        driver.bind_framebuffer(gl::FRAMEBUFFER, ctx.render_target().id());
        check(driver, ErrorKind::Configuration, "glBindFramebuffer")?;

        let mut points = Vec::with_capacity(self.render_targets.len());
        let mut color_slots: Vec<u8> = Vec::new();
        for target in self.render_targets.iter() {
            let point = target.attachment_point(color_slots.len() as u8);
            if let AttachmentPoint::Color(slot) = point {
                color_slots.push(slot);
            }
            points.push(point);
        }

        // Detach whatever a previous pipeline left beyond this one's targets
        let stale_colors = (color_slots.len() as u32..ctx.caps().max_render_targets)
            .map(|slot| AttachmentPoint::Color(slot as u8));
        let stale_depth = [AttachmentPoint::Depth, AttachmentPoint::Stencil, AttachmentPoint::DepthStencil]
            .into_iter()
            .filter(|p| !points.contains(p));
        for point in stale_colors.chain(stale_depth) {
            driver.framebuffer_texture(gl::FRAMEBUFFER, point.native(), 0, 0);
        }
        check(driver, ErrorKind::Configuration, "glFramebufferTexture")?;

        for (target, point) in self.render_targets.iter().zip(&points) {
            driver.framebuffer_texture(gl::FRAMEBUFFER, point.native(), target.id, 0);
            check(driver, ErrorKind::Configuration, "glFramebufferTexture")?;
        }

        driver.draw_buffers(&draw_buffers(&color_slots));
        check(driver, ErrorKind::Configuration, "glDrawBuffers")?;
        let result = driver.check_framebuffer_status(gl::FRAMEBUFFER);
        check(driver, ErrorKind::Configuration, "glCheckFramebufferStatus")?;
        if result != gl::FRAMEBUFFER_COMPLETE {
            return Err(status(ErrorKind::Incomplete, "glCheckFramebufferStatus", result));
        }
        set_viewport(driver, first.size)
    }

    pub fn primitive(&self) -> Primitive {
        self.fixed.primitive
    }

    pub fn fixed_function(&self) -> &FixedFunction {
        &self.fixed
    }

    pub fn render_targets(&self) -> &[RenderTarget] {
        &self.render_targets
    }

    pub fn program(&self) -> &ProgramObject {
        &self.program
    }

    pub fn layout(&self) -> &VertexLayout {
        &self.layout
    }

    pub fn is_valid(&self) -> bool {
        self.program.is_valid() && self.layout.is_valid()
    }

    pub fn log(&self) -> String {
        self.program.log()
    }
}

fn toggle(driver: &dyn Driver, cap: NativeEnum, on: bool) {
    if on {
        driver.enable(cap);
    } else {
        driver.disable(cap);
    }
}

fn set_viewport(driver: &dyn Driver, size: UVec2) -> BackendResult<()> {
    driver.viewport_indexed(0, Vec4::new(0.0, 0.0, size.x as f32, size.y as f32));
    check(driver, ErrorKind::Configuration, "glViewportIndexedf")
}

/// Compute pipeline: one compute stage and the workgroup count every dispatch
/// through it uses
#[derive(Debug)]
pub struct ComputePipeline {
    program: ProgramObject,
    workgroups: UVec3,
}

impl ComputePipeline {
    pub fn create(ctx: &Context, shader: BackendResult<ShaderObject>, workgroups: UVec3) -> BackendResult<Self> {
        const OP: &str = "ComputePipeline::create";
        let shader = shader?;
        if shader.stage() != ShaderStage::Compute {
            return Err(BackendError::invalid(OP, format!("{:?} stage in a compute pipeline", shader.stage())));
        }
        if workgroups.cmpeq(UVec3::ZERO).any() {
            return Err(BackendError::invalid(OP, "workgroup counts must be non-zero"));
        }
        let limit = ctx.caps().max_work_groups;
        if workgroups.cmpgt(limit).any() {
            return Err(BackendError::invalid(OP, format!("workgroups {workgroups} exceed the limit {limit}")));
        }

        let program = ProgramObject::link(ctx, vec![shader])?;
        log::info!(program = program.id(); "Compute pipeline created");
        Ok(Self { program, workgroups })
    }

    pub fn apply(&self, ctx: &Context) -> BackendResult<()> {
        let driver = &**ctx.driver();
        driver.use_program(self.program.id());
        check(driver, ErrorKind::Configuration, "glUseProgram")
    }

    pub fn workgroups(&self) -> UVec3 {
        self.workgroups
    }

    pub fn program(&self) -> &ProgramObject {
        &self.program
    }

    pub fn is_valid(&self) -> bool {
        self.program.is_valid()
    }

    pub fn log(&self) -> String {
        self.program.log()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::device::ContextDesc;
    use crate::backend::texture::TextureDesc;
    use crate::backend::buffer::Buffer;
    use crate::backend::types::{BlendFactor, BufferUsage, ShaderType};
    use crate::driver::SoftwareDriver;
    use std::rc::Rc;

    const VERTEX: &str = "#version 460\n\
        layout(location = 0) in vec2 position;\n\
        void main() { gl_Position = vec4(position, 0.0, 1.0); }\n";
    const PIXEL: &str = "#version 460\n\
        layout(location = 0) out vec4 albedo;\n\
        layout(location = 1) out vec4 normal;\n\
        void main() { albedo = vec4(1.0); normal = vec4(0.0); }\n";

    fn setup() -> (Rc<SoftwareDriver>, Context) {
        let software = Rc::new(SoftwareDriver::new());
        let ctx = Context::new(software.clone(), &ContextDesc::default()).unwrap();
        (software, ctx)
    }

    fn stages(ctx: &Context) -> ShaderStages {
        ShaderStages::new()
            .with(ShaderObject::compile(ctx, ShaderStage::Vertex, VERTEX))
            .with(ShaderObject::compile(ctx, ShaderStage::Pixel, PIXEL))
    }

    fn target(ctx: &Context, format: PixelFormat) -> Texture {
        Texture::create(ctx, &TextureDesc::new_2d(format, UVec2::new(32, 16)), None).unwrap()
    }

    #[test]
    fn unset_members_fall_back_to_defaults() {
        let desc = PipelineDesc {
            members: PipelineMembers::DEPTH_FUNC,
            depth_func: Comparison::Less,
            cull: CullMode::Back,
            ..PipelineDesc::default()
        };
        let fixed = FixedFunction::resolve(&desc);
        assert_eq!(fixed.depth_func, Comparison::Less);
        assert_eq!(fixed.cull, CullMode::None);
    }

    #[test]
    fn first_stage_error_wins() {
        let (_software, ctx) = setup();
        let stages = ShaderStages::new()
            .with(ShaderObject::compile(&ctx, ShaderStage::Vertex, "void broken("))
            .with(ShaderObject::compile(&ctx, ShaderStage::Pixel, "void main() {}"))
            .with(ShaderObject::compile(&ctx, ShaderStage::Pixel, "void main() {}"));
        let err = stages.into_shaders().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compile);
    }

    #[test]
    fn pipeline_needs_a_vertex_stage() {
        let (_software, ctx) = setup();
        let stages = ShaderStages::new().with(ShaderObject::compile(&ctx, ShaderStage::Pixel, PIXEL));
        let err = PipelineState::create(&ctx, PipelineDesc::new(stages), &[], &Blend::REPLACE, &[], &[], None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn apply_pushes_fixed_function_state() {
        let (software, ctx) = setup();
        let desc = PipelineDesc {
            members: PipelineMembers::DEPTH_FUNC | PipelineMembers::CULL | PipelineMembers::BLEND_FACTOR,
            depth_func: Comparison::LessEqual,
            cull: CullMode::Front,
            blend_factor: Vec4::splat(0.5),
            ..PipelineDesc::new(stages(&ctx))
        };
        let blend = Blend { dest: BlendFactor::InvSrcAlpha, ..Blend::REPLACE };
        let pipeline = PipelineState::create(&ctx, desc, &[], &blend, &[], &[], None).unwrap();
        pipeline.apply(&ctx).unwrap();

        let raster = software.raster();
        assert!(raster.enabled.contains(&gl::DEPTH_TEST));
        assert!(raster.enabled.contains(&gl::CULL_FACE));
        assert!(raster.enabled.contains(&gl::BLEND));
        assert!(!raster.enabled.contains(&gl::STENCIL_TEST));
        assert_eq!(raster.depth_func, gl::LEQUAL);
        assert_eq!(raster.cull_face, gl::FRONT);
        assert_eq!(raster.blend_color, Vec4::splat(0.5));
        assert_eq!(software.get_binding(gl::CURRENT_PROGRAM), pipeline.program().id());
        assert_eq!(software.get_binding(gl::FRAMEBUFFER), 0);
    }

    #[test]
    fn targets_attach_in_order_and_stale_slots_detach() {
        let (software, ctx) = setup();
        let albedo = target(&ctx, PixelFormat::R8G8B8A8Unorm);
        let normal = target(&ctx, PixelFormat::R16G16B16A16Float);
        let depth = target(&ctx, PixelFormat::D32Float);

        let wide = PipelineState::create(
            &ctx,
            PipelineDesc::new(stages(&ctx)),
            &[(&albedo).into(), (&depth).into(), (&normal).into()],
            &Blend::REPLACE,
            &[],
            &[],
            None,
        )
        .unwrap();
        let narrow = PipelineState::create(
            &ctx,
            PipelineDesc::new(stages(&ctx)),
            &[(&normal).into()],
            &Blend::REPLACE,
            &[],
            &[],
            None,
        )
        .unwrap();

        let fb = ctx.render_target().id();
        wide.apply(&ctx).unwrap();
        let mut attached = software.framebuffer_attachments(fb);
        attached.sort();
        assert_eq!(
            attached,
            vec![
                (gl::COLOR_ATTACHMENT0, albedo.id(), 0),
                (gl::COLOR_ATTACHMENT0 + 1, normal.id(), 0),
                (gl::DEPTH_ATTACHMENT, depth.id(), 0),
            ]
        );
        assert_eq!(software.framebuffer_draw_buffers(fb), vec![gl::COLOR_ATTACHMENT0, gl::COLOR_ATTACHMENT0 + 1]);

        narrow.apply(&ctx).unwrap();
        assert_eq!(software.framebuffer_attachments(fb), vec![(gl::COLOR_ATTACHMENT0, normal.id(), 0)]);
        assert_eq!(software.raster().viewports[&0], Vec4::new(0.0, 0.0, 32.0, 16.0));
    }

    #[test]
    fn destroyed_target_surfaces_on_apply() {
        let (_software, ctx) = setup();
        let color = target(&ctx, PixelFormat::R8G8B8A8Unorm);
        let pipeline = PipelineState::create(
            &ctx,
            PipelineDesc::new(stages(&ctx)),
            &[(&color).into()],
            &Blend::REPLACE,
            &[],
            &[],
            None,
        )
        .unwrap();

        color.destroy().unwrap();
        let err = pipeline.apply(&ctx).unwrap_err();
        assert_eq!(err.code(), gl::INVALID_VALUE);
        assert_eq!(err.operation(), "glFramebufferTexture");
    }

    #[test]
    fn vertex_layout_is_built_from_attributes() {
        let (software, ctx) = setup();
        let vertices = Buffer::with_contents(&ctx, BufferUsage::Vertex, &[0.0f32; 6]).unwrap();
        let pipeline = PipelineState::create(
            &ctx,
            PipelineDesc::new(stages(&ctx)),
            &[],
            &Blend::REPLACE,
            &[VertexBuffer { buffer: &vertices, stride: 8 }],
            &[ShaderParameter::new("position", ShaderType::Float, 2)],
            None,
        )
        .unwrap();
        let attrib = software.vertex_attrib(pipeline.layout().id(), 0).unwrap();
        assert_eq!((attrib.buffer, attrib.size, attrib.stride), (vertices.id(), 2, 8));
    }

    #[test]
    fn compute_workgroups_are_validated() {
        let (software, ctx) = setup();
        let source = "#version 460\nlayout(local_size_x = 64) in;\nvoid main() {}\n";
        software.register_kernel(source, |_, _| {});

        let compile = || ShaderObject::compile(&ctx, ShaderStage::Compute, source);

        let zero = ComputePipeline::create(&ctx, compile(), UVec3::new(0, 1, 1));
        assert_eq!(zero.unwrap_err().kind(), ErrorKind::InvalidParameter);
        let too_many = ComputePipeline::create(&ctx, compile(), UVec3::new(1 << 20, 1, 1));
        assert_eq!(too_many.unwrap_err().kind(), ErrorKind::InvalidParameter);

        let pipeline = ComputePipeline::create(&ctx, compile(), UVec3::new(16, 1, 1)).unwrap();
        assert_eq!(pipeline.workgroups(), UVec3::new(16, 1, 1));
    }
}
