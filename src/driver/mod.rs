// Native driver seam
//
// `Driver` is the outbound graphics API the resource layer talks to. It is
// deliberately shaped like GL: integer object names, bind-to-target state,
// and a sticky error flag read back with `get_error` after every call.
// `SoftwareDriver` is the in-memory implementation used by tests and the demo binary.

pub mod gl;
pub mod software;

use glam::{UVec2, UVec3, Vec4};
use raw_window_handle::RawWindowHandle;

pub use software::{Invocation, KernelIo, Limits, SoftwareDriver};

/// Driver-assigned object name; 0 is the null sentinel
pub type ObjectId = u32;

/// Native enumerant (target, format, status, error code)
pub type NativeEnum = u32;

/// Payload of a uniform upload, grouped in `components`-wide elements
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformData<'a> {
    Int { components: u8, values: &'a [i32] },
    UInt { components: u8, values: &'a [u32] },
    Float { components: u8, values: &'a [f32] },
    Matrix { columns: u8, rows: u8, values: &'a [f32] },
}

impl UniformData<'_> {
    /// Scalar width of one element
    pub fn element_width(&self) -> usize {
        match *self {
            UniformData::Int { components, .. }
            | UniformData::UInt { components, .. }
            | UniformData::Float { components, .. } => components as usize,
            UniformData::Matrix { columns, rows, .. } => columns as usize * rows as usize,
        }
    }

    pub fn scalar_count(&self) -> usize {
        match self {
            UniformData::Int { values, .. } => values.len(),
            UniformData::UInt { values, .. } => values.len(),
            UniformData::Float { values, .. } | UniformData::Matrix { values, .. } => values.len(),
        }
    }
}

/// Native graphics API consumed by the resource layer.
///
/// Every method records failures in the driver's error flag instead of
/// returning them; callers read the flag back through `get_error`, which
/// returns the first error raised since the previous query and clears it.
/// Generation calls return 0 when no object could be created.
pub trait Driver {
    fn get_error(&self) -> NativeEnum;

    // Context
    fn create_context(&self, size: UVec2, window: Option<RawWindowHandle>);
    fn destroy_context(&self);
    fn resize_context(&self, size: UVec2);
    fn get_integer(&self, pname: NativeEnum) -> i32;
    fn get_integer_indexed(&self, pname: NativeEnum, index: u32) -> i32;
    /// Object currently bound to a bind target, 0 when nothing is bound
    fn get_binding(&self, target: NativeEnum) -> ObjectId;

    // Buffers
    fn gen_buffer(&self) -> ObjectId;
    fn is_buffer(&self, id: ObjectId) -> bool;
    fn delete_buffer(&self, id: ObjectId);
    fn bind_buffer(&self, target: NativeEnum, id: ObjectId);
    fn bind_buffer_base(&self, target: NativeEnum, index: u32, id: ObjectId);
    fn buffer_data(&self, target: NativeEnum, size: usize, data: Option<&[u8]>, usage: NativeEnum);
    fn buffer_sub_data(&self, target: NativeEnum, offset: usize, data: &[u8]);
    fn copy_buffer_sub_data(
        &self,
        read_target: NativeEnum,
        write_target: NativeEnum,
        read_offset: usize,
        write_offset: usize,
        size: usize,
    );
    /// Map a range of the buffer bound to `target`; null on failure
    fn map_buffer_range(&self, target: NativeEnum, offset: usize, len: usize, access: u32) -> *mut u8;
    fn unmap_buffer(&self, target: NativeEnum) -> bool;

    // Textures
    fn gen_texture(&self) -> ObjectId;
    fn is_texture(&self, id: ObjectId) -> bool;
    fn delete_texture(&self, id: ObjectId);
    fn active_texture(&self, unit: NativeEnum);
    fn bind_texture(&self, target: NativeEnum, id: ObjectId);
    #[allow(clippy::too_many_arguments)]
    fn tex_image(
        &self,
        target: NativeEnum,
        level: i32,
        internal_format: NativeEnum,
        size: UVec3,
        format: NativeEnum,
        ty: NativeEnum,
        data: Option<&[u8]>,
    );
    fn tex_image_multisample(&self, target: NativeEnum, samples: u32, internal_format: NativeEnum, size: UVec2);
    fn tex_parameter_i(&self, target: NativeEnum, pname: NativeEnum, value: i32);
    fn tex_parameter_f(&self, target: NativeEnum, pname: NativeEnum, value: f32);
    fn tex_parameter_fv(&self, target: NativeEnum, pname: NativeEnum, value: &[f32]);
    /// Copy a `size` texel box between two textures at one mip level
    #[allow(clippy::too_many_arguments)]
    fn copy_image_sub_data(
        &self,
        src: ObjectId,
        src_target: NativeEnum,
        src_offset: UVec3,
        dest: ObjectId,
        dest_target: NativeEnum,
        dest_offset: UVec3,
        level: i32,
        size: UVec3,
    );

    // Framebuffers
    fn gen_framebuffer(&self) -> ObjectId;
    fn is_framebuffer(&self, id: ObjectId) -> bool;
    fn delete_framebuffer(&self, id: ObjectId);
    fn bind_framebuffer(&self, target: NativeEnum, id: ObjectId);
    fn framebuffer_texture(&self, target: NativeEnum, attachment: NativeEnum, texture: ObjectId, level: i32);
    fn check_framebuffer_status(&self, target: NativeEnum) -> NativeEnum;
    fn draw_buffers(&self, buffers: &[NativeEnum]);

    // Shaders
    fn create_shader(&self, stage: NativeEnum) -> ObjectId;
    fn is_shader(&self, id: ObjectId) -> bool;
    fn delete_shader(&self, id: ObjectId);
    fn shader_source(&self, id: ObjectId, source: &str);
    fn compile_shader(&self, id: ObjectId);
    fn get_shader_iv(&self, id: ObjectId, pname: NativeEnum) -> i32;
    fn shader_info_log(&self, id: ObjectId) -> String;

    // Programs
    fn create_program(&self) -> ObjectId;
    fn is_program(&self, id: ObjectId) -> bool;
    fn delete_program(&self, id: ObjectId);
    fn attach_shader(&self, program: ObjectId, shader: ObjectId);
    fn link_program(&self, program: ObjectId);
    fn get_program_iv(&self, program: ObjectId, pname: NativeEnum) -> i32;
    fn program_info_log(&self, program: ObjectId) -> String;
    fn use_program(&self, program: ObjectId);
    fn get_uniform_location(&self, program: ObjectId, name: &str) -> i32;
    fn get_attrib_location(&self, program: ObjectId, name: &str) -> i32;
    /// Upload to a uniform of the program in use; location -1 is ignored
    fn uniform(&self, location: i32, data: UniformData<'_>);

    // Vertex arrays
    fn gen_vertex_array(&self) -> ObjectId;
    fn is_vertex_array(&self, id: ObjectId) -> bool;
    fn delete_vertex_array(&self, id: ObjectId);
    fn bind_vertex_array(&self, id: ObjectId);
    fn enable_vertex_attrib_array(&self, index: u32);
    fn vertex_attrib_pointer(&self, index: u32, size: i32, ty: NativeEnum, normalized: bool, stride: i32, offset: usize);
    fn vertex_attrib_divisor(&self, index: u32, divisor: u32);

    // Fixed-function state
    fn enable(&self, cap: NativeEnum);
    fn disable(&self, cap: NativeEnum);
    fn blend_func_separate(&self, src_rgb: NativeEnum, dst_rgb: NativeEnum, src_alpha: NativeEnum, dst_alpha: NativeEnum);
    fn blend_equation_separate(&self, rgb: NativeEnum, alpha: NativeEnum);
    fn blend_color(&self, color: Vec4);
    fn color_mask(&self, red: bool, green: bool, blue: bool, alpha: bool);
    fn cull_face(&self, face: NativeEnum);
    fn front_face(&self, winding: NativeEnum);
    fn polygon_mode(&self, face: NativeEnum, mode: NativeEnum);
    fn polygon_offset(&self, factor: f32, units: f32);
    fn depth_func(&self, func: NativeEnum);
    fn depth_mask(&self, write: bool);
    fn stencil_func(&self, func: NativeEnum, reference: i32, mask: u32);
    fn stencil_op(&self, stencil_fail: NativeEnum, depth_fail: NativeEnum, pass: NativeEnum);
    fn stencil_mask(&self, mask: u32);
    fn sample_mask(&self, mask: u32);
    fn viewport_indexed(&self, index: u32, rect: Vec4);
    fn depth_range_indexed(&self, index: u32, near: f32, far: f32);
    fn scissor_indexed(&self, index: u32, x: i32, y: i32, width: i32, height: i32);
    fn clear_color(&self, color: Vec4);
    fn clear_depth(&self, depth: f32);
    fn clear_stencil(&self, stencil: i32);
    fn clear(&self, mask: u32);

    // Work submission
    fn draw_arrays_instanced(&self, mode: NativeEnum, first: i32, count: i32, instances: i32, base_instance: u32);
    #[allow(clippy::too_many_arguments)]
    fn draw_elements_instanced(
        &self,
        mode: NativeEnum,
        count: i32,
        index_type: NativeEnum,
        offset: usize,
        instances: i32,
        base_vertex: i32,
        base_instance: u32,
    );
    fn dispatch_compute(&self, groups: UVec3);
    fn memory_barrier(&self, bits: u32);
    fn flush(&self);
    fn finish(&self);
}
