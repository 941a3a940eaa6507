// Software driver
//
// An in-memory implementation of `Driver`. It keeps the object model, binding
// points, error flag and validation rules of the native API without touching a
// GPU: draws are validated and recorded, compute dispatches run host kernels,
// and storage writes stay invisible until a memory barrier.

mod glsl;
mod kernel;
mod objects;

use std::cell::{RefCell, RefMut};
use std::collections::{BTreeMap, HashMap};

use glam::{UVec2, UVec3, Vec4};
use raw_window_handle::RawWindowHandle;

use super::{gl, Driver, NativeEnum, ObjectId, UniformData};
use objects::{
    format_info, words_for, BufferObject, ComputeProgram, ContextState, FramebufferObject, LinkedProgram,
    LinkedUniform, ProgramObject, ShaderObject, State, TextureObject, VertexArrayObject,
};

pub use glsl::{BlockDecl, InputDecl, Reflection, UniformDecl};
pub use kernel::{Invocation, Kernel, KernelIo, UniformValue};
pub use objects::{ClearRecord, DrawRecord, RasterState, VertexAttrib};

use kernel::StorageSlot;

/// Implementation limits reported through `get_integer`
#[derive(Debug, Clone, PartialEq)]
pub struct Limits {
    pub max_color_attachments: u32,
    pub max_draw_buffers: u32,
    pub max_texture_size: u32,
    pub max_samples: u32,
    pub max_texture_units: u32,
    pub max_storage_bindings: u32,
    pub max_uniform_bindings: u32,
    pub max_vertex_attribs: u32,
    pub max_viewports: u32,
    pub max_work_group_count: [u32; 3],
    pub max_work_group_size: [u32; 3],
    pub max_buffer_size: usize,
    /// Live objects of all kinds before generation fails with out-of-memory
    pub max_objects: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_color_attachments: 8,
            max_draw_buffers: 8,
            max_texture_size: 16384,
            max_samples: 8,
            max_texture_units: 32,
            max_storage_bindings: 16,
            max_uniform_bindings: 36,
            max_vertex_attribs: 16,
            max_viewports: 16,
            max_work_group_count: [65535; 3],
            max_work_group_size: [1024, 1024, 64],
            max_buffer_size: 1 << 28,
            max_objects: 1 << 16,
        }
    }
}

const BUFFER_TARGETS: &[NativeEnum] = &[
    gl::ARRAY_BUFFER,
    gl::ELEMENT_ARRAY_BUFFER,
    gl::UNIFORM_BUFFER,
    gl::SHADER_STORAGE_BUFFER,
    gl::COPY_READ_BUFFER,
    gl::COPY_WRITE_BUFFER,
    gl::DRAW_INDIRECT_BUFFER,
];

const TEXTURE_TARGETS: &[NativeEnum] = &[
    gl::TEXTURE_1D,
    gl::TEXTURE_2D,
    gl::TEXTURE_3D,
    gl::TEXTURE_2D_ARRAY,
    gl::TEXTURE_CUBE_MAP,
    gl::TEXTURE_2D_MULTISAMPLE,
];

const COMPARISONS: &[NativeEnum] =
    &[gl::NEVER, gl::LESS, gl::EQUAL, gl::LEQUAL, gl::GREATER, gl::NOTEQUAL, gl::GEQUAL, gl::ALWAYS];

const BLEND_FACTORS: &[NativeEnum] = &[
    gl::ZERO,
    gl::ONE,
    gl::SRC_COLOR,
    gl::ONE_MINUS_SRC_COLOR,
    gl::SRC_ALPHA,
    gl::ONE_MINUS_SRC_ALPHA,
    gl::DST_ALPHA,
    gl::ONE_MINUS_DST_ALPHA,
    gl::DST_COLOR,
    gl::ONE_MINUS_DST_COLOR,
    gl::SRC_ALPHA_SATURATE,
    gl::CONSTANT_COLOR,
    gl::ONE_MINUS_CONSTANT_COLOR,
    gl::SRC1_COLOR,
    gl::ONE_MINUS_SRC1_COLOR,
    gl::SRC1_ALPHA,
    gl::ONE_MINUS_SRC1_ALPHA,
];

const BLEND_EQUATIONS: &[NativeEnum] =
    &[gl::FUNC_ADD, gl::FUNC_SUBTRACT, gl::FUNC_REVERSE_SUBTRACT, gl::MIN, gl::MAX];

const STENCIL_OPS: &[NativeEnum] =
    &[gl::KEEP, gl::ZERO, gl::REPLACE, gl::INCR, gl::INCR_WRAP, gl::DECR, gl::DECR_WRAP, gl::INVERT];

const CAPABILITIES: &[NativeEnum] = &[
    gl::BLEND,
    gl::CULL_FACE,
    gl::DEPTH_TEST,
    gl::STENCIL_TEST,
    gl::SCISSOR_TEST,
    gl::MULTISAMPLE,
    gl::SAMPLE_ALPHA_TO_COVERAGE,
    gl::SAMPLE_MASK,
    gl::LINE_SMOOTH,
    gl::DEPTH_CLAMP,
    gl::POLYGON_OFFSET_FILL,
    gl::PRIMITIVE_RESTART_FIXED_INDEX,
];

const PRIMITIVES: &[NativeEnum] =
    &[gl::POINTS, gl::LINES, gl::LINE_STRIP, gl::TRIANGLES, gl::TRIANGLE_STRIP, gl::TRIANGLE_FAN, gl::PATCHES];

const SHADER_STAGES: &[NativeEnum] = &[
    gl::VERTEX_SHADER,
    gl::FRAGMENT_SHADER,
    gl::GEOMETRY_SHADER,
    gl::TESS_CONTROL_SHADER,
    gl::TESS_EVALUATION_SHADER,
    gl::COMPUTE_SHADER,
    gl::MESH_SHADER,
    gl::TASK_SHADER,
];

/// In-memory native driver.
///
/// Single-threaded like the contexts it stands in for. Indexed buffer binds
/// leave the generic binding point of their target untouched.
#[derive(Default)]
pub struct SoftwareDriver {
    state: RefCell<State>,
    kernels: RefCell<HashMap<String, Kernel>>,
}

impl SoftwareDriver {
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    pub fn with_limits(limits: Limits) -> Self {
        let driver = Self::default();
        driver.state.borrow_mut().limits = limits;
        driver
    }

    /// Pair a compute shader source with the host closure that runs one invocation
    pub fn register_kernel<F>(&self, source: &str, kernel: F)
    where
        F: Fn(&Invocation, &mut KernelIo<'_>) + 'static,
    {
        log::debug!(source_len = source.len(); "Registering compute kernel");
        self.kernels.borrow_mut().insert(source.trim().to_string(), std::rc::Rc::new(kernel));
    }

    /// Make the next call to `call` (a native entry point name) fail with `code`
    pub fn fail_next(&self, call: &'static str, code: NativeEnum) {
        self.state.borrow_mut().faults.insert(call, code);
    }

    /// Number of times a native entry point was invoked
    pub fn call_count(&self, call: &str) -> usize {
        self.state.borrow().calls.get(call).copied().unwrap_or(0)
    }

    pub fn limits(&self) -> Limits {
        self.state.borrow().limits.clone()
    }

    pub fn context_size(&self) -> Option<UVec2> {
        self.state.borrow().context.as_ref().map(|c| c.size)
    }

    pub fn live_objects(&self) -> usize {
        let st = self.state.borrow();
        st.buffers.len()
            + st.textures.len()
            + st.framebuffers.len()
            + st.shaders.len()
            + st.programs.len()
            + st.vertex_arrays.len()
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.state.borrow().draws.clone()
    }

    pub fn clears(&self) -> Vec<ClearRecord> {
        self.state.borrow().clears.clone()
    }

    pub fn dispatch_count(&self) -> usize {
        self.state.borrow().dispatches
    }

    pub fn raster(&self) -> RasterState {
        self.state.borrow().raster.clone()
    }

    /// Attachment point, texture and level of every attachment of a framebuffer
    pub fn framebuffer_attachments(&self, framebuffer: ObjectId) -> Vec<(NativeEnum, ObjectId, i32)> {
        self.state
            .borrow()
            .framebuffers
            .get(&framebuffer)
            .map(|fb| fb.attachments.iter().map(|(&a, &(t, l))| (a, t, l)).collect())
            .unwrap_or_default()
    }

    pub fn framebuffer_draw_buffers(&self, framebuffer: ObjectId) -> Vec<NativeEnum> {
        let st = self.state.borrow();
        if framebuffer == 0 {
            return st.default_draw_buffers.clone();
        }
        st.framebuffers.get(&framebuffer).map(|fb| fb.draw_buffers.clone()).unwrap_or_default()
    }

    pub fn texture_parameter(&self, texture: ObjectId, pname: NativeEnum) -> Option<i32> {
        self.state.borrow().textures.get(&texture)?.params_i.get(&pname).copied()
    }

    pub fn texture_parameter_f(&self, texture: ObjectId, pname: NativeEnum) -> Option<Vec<f32>> {
        self.state.borrow().textures.get(&texture)?.params_f.get(&pname).cloned()
    }

    pub fn texture_level_size(&self, texture: ObjectId, level: i32) -> Option<UVec3> {
        self.state.borrow().textures.get(&texture)?.levels.get(&level).copied()
    }

    /// Texel data of one mip level, tightly packed
    pub fn texture_contents(&self, texture: ObjectId, level: i32) -> Option<Vec<u8>> {
        self.state.borrow().textures.get(&texture)?.data.get(&level).cloned()
    }

    pub fn texture_samples(&self, texture: ObjectId) -> Option<u32> {
        self.state.borrow().textures.get(&texture).map(|t| t.samples)
    }

    /// Visible contents of a buffer; pending storage writes are excluded
    pub fn buffer_contents(&self, buffer: ObjectId) -> Option<Vec<u8>> {
        self.state.borrow().buffers.get(&buffer).map(|b| b.bytes().to_vec())
    }

    pub fn buffer_usage(&self, buffer: ObjectId) -> Option<NativeEnum> {
        self.state.borrow().buffers.get(&buffer).map(|b| b.usage)
    }

    pub fn indexed_binding(&self, target: NativeEnum, index: u32) -> ObjectId {
        self.state.borrow().indexed_buffers.get(&(target, index)).copied().unwrap_or(0)
    }

    pub fn texture_unit_binding(&self, unit: u32, target: NativeEnum) -> ObjectId {
        self.state.borrow().texture_units.get(&(unit, target)).copied().unwrap_or(0)
    }

    pub fn uniform_value(&self, program: ObjectId, location: i32) -> Option<UniformValue> {
        let st = self.state.borrow();
        st.programs.get(&program)?.linked.as_ref()?.values.get(&location).cloned()
    }

    pub fn vertex_attrib(&self, vertex_array: ObjectId, index: u32) -> Option<VertexAttrib> {
        self.state.borrow().vertex_arrays.get(&vertex_array)?.attribs.get(&index).copied()
    }

    pub fn element_buffer(&self, vertex_array: ObjectId) -> ObjectId {
        self.state.borrow().vertex_arrays.get(&vertex_array).map_or(0, |v| v.element_buffer)
    }

    /// Count the call, then hand out the state unless a fault is armed or no
    /// context exists.
    fn enter(&self, call: &'static str) -> Option<RefMut<'_, State>> {
        let mut st = self.state.borrow_mut();
        *st.calls.entry(call).or_default() += 1;
        if let Some(code) = st.faults.remove(call) {
            st.raise(code);
            return None;
        }
        if st.context.is_none() {
            st.raise(gl::INVALID_OPERATION);
            return None;
        }
        Some(st)
    }

    /// Predicates: no context means no live objects, and no error is raised
    fn query(&self, call: &'static str) -> Option<RefMut<'_, State>> {
        let mut st = self.state.borrow_mut();
        *st.calls.entry(call).or_default() += 1;
        st.context.as_ref()?;
        Some(st)
    }

    fn gen<F>(&self, call: &'static str, insert: F) -> ObjectId
    where
        F: FnOnce(&mut State, ObjectId),
    {
        let Some(mut st) = self.enter(call) else { return 0 };
        let Some(id) = st.allocate_id() else { return 0 };
        insert(&mut *st, id);
        log::trace!("{call} -> {id}");
        id
    }

    fn tex_parameter(&self, call: &'static str, target: NativeEnum, pname: NativeEnum, value: TexParam<'_>) {
        let Some(mut st) = self.enter(call) else { return };
        if !TEXTURE_TARGETS.contains(&target) || target == gl::TEXTURE_2D_MULTISAMPLE {
            return st.raise(gl::INVALID_ENUM);
        }
        let id = st.bound_texture(target);
        if id == 0 {
            return st.raise(gl::INVALID_OPERATION);
        }

        let int_value = match value {
            TexParam::Int(v) => Some(v),
            TexParam::Float([v]) if is_int_tex_param(pname) => Some(*v as i32),
            TexParam::Float(_) => None,
        };
        if is_int_tex_param(pname) {
            let Some(v) = int_value else { return st.raise(gl::INVALID_ENUM) };
            let v_enum = v as NativeEnum;
            let valid = match pname {
                gl::TEXTURE_MIN_FILTER => [
                    gl::NEAREST,
                    gl::LINEAR,
                    gl::NEAREST_MIPMAP_NEAREST,
                    gl::LINEAR_MIPMAP_NEAREST,
                    gl::NEAREST_MIPMAP_LINEAR,
                    gl::LINEAR_MIPMAP_LINEAR,
                ]
                .contains(&v_enum),
                gl::TEXTURE_MAG_FILTER => [gl::NEAREST, gl::LINEAR].contains(&v_enum),
                gl::TEXTURE_WRAP_S | gl::TEXTURE_WRAP_T | gl::TEXTURE_WRAP_R => [
                    gl::REPEAT,
                    gl::CLAMP_TO_BORDER,
                    gl::CLAMP_TO_EDGE,
                    gl::MIRRORED_REPEAT,
                    gl::MIRROR_CLAMP_TO_EDGE,
                ]
                .contains(&v_enum),
                gl::TEXTURE_COMPARE_MODE => [gl::NONE, gl::COMPARE_REF_TO_TEXTURE].contains(&v_enum),
                gl::TEXTURE_COMPARE_FUNC => COMPARISONS.contains(&v_enum),
                _ => false,
            };
            if !valid {
                return st.raise(gl::INVALID_ENUM);
            }
            if let Some(tex) = st.textures.get_mut(&id) {
                tex.params_i.insert(pname, v);
            }
            return;
        }

        let values: Vec<f32> = match value {
            TexParam::Int(v) => vec![v as f32],
            TexParam::Float(v) => v.to_vec(),
        };
        match pname {
            gl::TEXTURE_BORDER_COLOR if values.len() != 4 => return st.raise(gl::INVALID_VALUE),
            gl::TEXTURE_BORDER_COLOR => {}
            gl::TEXTURE_MIN_LOD | gl::TEXTURE_MAX_LOD | gl::TEXTURE_LOD_BIAS | gl::TEXTURE_MAX_ANISOTROPY
                if values.len() != 1 =>
            {
                return st.raise(gl::INVALID_VALUE)
            }
            gl::TEXTURE_MAX_ANISOTROPY if values[0] < 1.0 => return st.raise(gl::INVALID_VALUE),
            gl::TEXTURE_MIN_LOD | gl::TEXTURE_MAX_LOD | gl::TEXTURE_LOD_BIAS | gl::TEXTURE_MAX_ANISOTROPY => {}
            _ => return st.raise(gl::INVALID_ENUM),
        }
        if let Some(tex) = st.textures.get_mut(&id) {
            tex.params_f.insert(pname, values);
        }
    }

    fn draw(&self, call: &'static str, mut record: DrawRecord) {
        let Some(mut st) = self.enter(call) else { return };
        if !PRIMITIVES.contains(&record.mode) {
            return st.raise(gl::INVALID_ENUM);
        }
        if record.count < 0 || record.instances < 0 {
            return st.raise(gl::INVALID_VALUE);
        }
        let graphics = st
            .programs
            .get(&st.program)
            .and_then(|p| p.linked.as_ref())
            .is_some_and(|l| l.compute.is_none());
        if !graphics {
            return st.raise(gl::INVALID_OPERATION);
        }
        let Some(vao) = st.vertex_arrays.get(&st.vertex_array) else {
            return st.raise(gl::INVALID_OPERATION);
        };
        let mut sources: Vec<ObjectId> =
            vao.attribs.values().filter(|a| a.enabled).map(|a| a.buffer).collect();
        if let Some((index_type, _, _)) = record.indexed {
            if ![gl::UNSIGNED_BYTE, gl::UNSIGNED_SHORT, gl::UNSIGNED_INT].contains(&index_type) {
                return st.raise(gl::INVALID_ENUM);
            }
            if vao.element_buffer == 0 {
                return st.raise(gl::INVALID_OPERATION);
            }
            sources.push(vao.element_buffer);
        }
        let unusable = sources
            .iter()
            .any(|id| st.buffers.get(id).map_or(true, |b| b.mapped.is_some()));
        if unusable {
            return st.raise(gl::INVALID_OPERATION);
        }
        if st.framebuffer_status(st.draw_framebuffer) != gl::FRAMEBUFFER_COMPLETE {
            return st.raise(gl::INVALID_FRAMEBUFFER_OPERATION);
        }

        record.program = st.program;
        record.vertex_array = st.vertex_array;
        record.framebuffer = st.draw_framebuffer;
        record.targets = match st.framebuffers.get(&st.draw_framebuffer) {
            Some(fb) => fb
                .draw_buffers
                .iter()
                .map(|b| fb.attachments.get(b).map_or(0, |&(t, _)| t))
                .collect(),
            None => Vec::new(),
        };
        st.draws.push(record);
    }
}

enum TexParam<'a> {
    Int(i32),
    Float(&'a [f32]),
}

/// Byte offset of texel `at` in a tightly packed level of `extent`
fn texel_offset(extent: UVec3, at: UVec3, texel: usize) -> usize {
    let (x, y, z) = (at.x as usize, at.y as usize, at.z as usize);
    ((z * extent.y as usize + y) * extent.x as usize + x) * texel
}

fn is_int_tex_param(pname: NativeEnum) -> bool {
    matches!(
        pname,
        gl::TEXTURE_MIN_FILTER
            | gl::TEXTURE_MAG_FILTER
            | gl::TEXTURE_WRAP_S
            | gl::TEXTURE_WRAP_T
            | gl::TEXTURE_WRAP_R
            | gl::TEXTURE_COMPARE_MODE
            | gl::TEXTURE_COMPARE_FUNC
    )
}

impl Driver for SoftwareDriver {
    fn get_error(&self) -> NativeEnum {
        std::mem::replace(&mut self.state.borrow_mut().error, gl::NO_ERROR)
    }

    fn create_context(&self, size: UVec2, window: Option<RawWindowHandle>) {
        let mut st = self.state.borrow_mut();
        *st.calls.entry("createContext").or_default() += 1;
        if st.context.is_some() {
            return st.raise(gl::INVALID_OPERATION);
        }
        if size.x == 0 || size.y == 0 || size.max_element() > st.limits.max_texture_size {
            return st.raise(gl::INVALID_VALUE);
        }
        st.reset_objects();
        st.context = Some(ContextState { size, windowed: window.is_some() });
        st.default_draw_buffers = vec![gl::BACK];
        st.raster.viewports.insert(0, Vec4::new(0.0, 0.0, size.x as f32, size.y as f32));
        log::debug!(width = size.x, height = size.y, windowed = window.is_some(); "Software context created");
    }

    fn destroy_context(&self) {
        let Some(mut st) = self.enter("destroyContext") else { return };
        let windowed = st.context.as_ref().is_some_and(|c| c.windowed);
        st.reset_objects();
        log::debug!(windowed = windowed; "Software context destroyed");
    }

    fn resize_context(&self, size: UVec2) {
        let Some(mut st) = self.enter("resizeContext") else { return };
        if size.x == 0 || size.y == 0 || size.max_element() > st.limits.max_texture_size {
            return st.raise(gl::INVALID_VALUE);
        }
        if let Some(ctx) = st.context.as_mut() {
            ctx.size = size;
        }
    }

    fn get_integer(&self, pname: NativeEnum) -> i32 {
        let Some(mut st) = self.enter("glGetIntegerv") else { return 0 };
        let l = &st.limits;
        let value = match pname {
            gl::MAX_TEXTURE_SIZE => l.max_texture_size,
            gl::MAX_COLOR_ATTACHMENTS => l.max_color_attachments,
            gl::MAX_DRAW_BUFFERS => l.max_draw_buffers,
            gl::MAX_SAMPLES => l.max_samples,
            gl::MAX_COMBINED_TEXTURE_IMAGE_UNITS => l.max_texture_units,
            gl::MAX_SHADER_STORAGE_BUFFER_BINDINGS => l.max_storage_bindings,
            gl::MAX_UNIFORM_BUFFER_BINDINGS => l.max_uniform_bindings,
            gl::MAX_VERTEX_ATTRIBS => l.max_vertex_attribs,
            gl::MAX_VIEWPORTS => l.max_viewports,
            gl::MAJOR_VERSION => 4,
            gl::MINOR_VERSION => 6,
            _ => return st.fail(gl::INVALID_ENUM, 0),
        };
        value as i32
    }

    fn get_integer_indexed(&self, pname: NativeEnum, index: u32) -> i32 {
        let Some(mut st) = self.enter("glGetIntegeri_v") else { return 0 };
        let values = match pname {
            gl::MAX_COMPUTE_WORK_GROUP_COUNT => st.limits.max_work_group_count,
            gl::MAX_COMPUTE_WORK_GROUP_SIZE => st.limits.max_work_group_size,
            _ => return st.fail(gl::INVALID_ENUM, 0),
        };
        match values.get(index as usize) {
            Some(&v) => v.min(i32::MAX as u32) as i32,
            None => st.fail(gl::INVALID_VALUE, 0),
        }
    }

    fn get_binding(&self, target: NativeEnum) -> ObjectId {
        let Some(mut st) = self.enter("glGetIntegerv") else { return 0 };
        match target {
            t if BUFFER_TARGETS.contains(&t) => st.bound_buffer(t),
            t if TEXTURE_TARGETS.contains(&t) => st.bound_texture(t),
            gl::FRAMEBUFFER | gl::DRAW_FRAMEBUFFER => st.draw_framebuffer,
            gl::READ_FRAMEBUFFER => st.read_framebuffer,
            gl::CURRENT_PROGRAM => st.program,
            gl::VERTEX_ARRAY_BINDING => st.vertex_array,
            _ => st.fail(gl::INVALID_ENUM, 0),
        }
    }

    // Buffers

    fn gen_buffer(&self) -> ObjectId {
        self.gen("glGenBuffers", |st, id| {
            st.buffers.insert(id, BufferObject::new());
        })
    }

    fn is_buffer(&self, id: ObjectId) -> bool {
        self.query("glIsBuffer").is_some_and(|st| st.buffers.contains_key(&id))
    }

    fn delete_buffer(&self, id: ObjectId) {
        let Some(mut st) = self.enter("glDeleteBuffers") else { return };
        if st.buffers.remove(&id).is_none() {
            return;
        }
        st.buffer_bindings.retain(|_, bound| *bound != id);
        st.indexed_buffers.retain(|_, bound| *bound != id);
        for vao in st.vertex_arrays.values_mut() {
            if vao.element_buffer == id {
                vao.element_buffer = 0;
            }
        }
        log::trace!("glDeleteBuffers {id}");
    }

    fn bind_buffer(&self, target: NativeEnum, id: ObjectId) {
        let Some(mut st) = self.enter("glBindBuffer") else { return };
        if !BUFFER_TARGETS.contains(&target) {
            return st.raise(gl::INVALID_ENUM);
        }
        if id != 0 && !st.buffers.contains_key(&id) {
            return st.raise(gl::INVALID_OPERATION);
        }
        let vao = st.vertex_array;
        if target == gl::ELEMENT_ARRAY_BUFFER && vao != 0 {
            if let Some(v) = st.vertex_arrays.get_mut(&vao) {
                v.element_buffer = id;
            }
        } else {
            st.buffer_bindings.insert(target, id);
        }
    }

    fn bind_buffer_base(&self, target: NativeEnum, index: u32, id: ObjectId) {
        let Some(mut st) = self.enter("glBindBufferBase") else { return };
        let limit = match target {
            gl::SHADER_STORAGE_BUFFER => st.limits.max_storage_bindings,
            gl::UNIFORM_BUFFER => st.limits.max_uniform_bindings,
            _ => return st.raise(gl::INVALID_ENUM),
        };
        if index >= limit {
            return st.raise(gl::INVALID_VALUE);
        }
        if id != 0 && !st.buffers.contains_key(&id) {
            return st.raise(gl::INVALID_OPERATION);
        }
        if id == 0 {
            st.indexed_buffers.remove(&(target, index));
        } else {
            st.indexed_buffers.insert((target, index), id);
        }
    }

    fn buffer_data(&self, target: NativeEnum, size: usize, data: Option<&[u8]>, usage: NativeEnum) {
        let Some(mut st) = self.enter("glBufferData") else { return };
        if !BUFFER_TARGETS.contains(&target) || ![gl::STATIC_DRAW, gl::DYNAMIC_DRAW].contains(&usage) {
            return st.raise(gl::INVALID_ENUM);
        }
        let id = st.bound_buffer(target);
        if id == 0 {
            return st.raise(gl::INVALID_OPERATION);
        }
        if size > st.limits.max_buffer_size {
            return st.raise(gl::OUT_OF_MEMORY);
        }
        if data.is_some_and(|d| d.len() < size) {
            return st.raise(gl::INVALID_VALUE);
        }
        let Some(buffer) = st.buffers.get_mut(&id) else { return };
        if buffer.mapped.is_some() {
            return st.raise(gl::INVALID_OPERATION);
        }
        buffer.words = words_for(size);
        buffer.len = size;
        buffer.usage = usage;
        buffer.pending = None;
        if let Some(data) = data {
            buffer.bytes_mut().copy_from_slice(&data[..size]);
        }
    }

    fn buffer_sub_data(&self, target: NativeEnum, offset: usize, data: &[u8]) {
        let Some(mut st) = self.enter("glBufferSubData") else { return };
        if !BUFFER_TARGETS.contains(&target) {
            return st.raise(gl::INVALID_ENUM);
        }
        let id = st.bound_buffer(target);
        let Some(buffer) = st.buffers.get_mut(&id) else {
            return st.raise(gl::INVALID_OPERATION);
        };
        if buffer.mapped.is_some() {
            return st.raise(gl::INVALID_OPERATION);
        }
        let Some(end) = offset.checked_add(data.len()).filter(|&end| end <= buffer.len) else {
            return st.raise(gl::INVALID_VALUE);
        };
        buffer.bytes_mut()[offset..end].copy_from_slice(data);
        if let Some(pending) = buffer.pending.as_mut() {
            bytemuck::cast_slice_mut::<u64, u8>(pending)[offset..end].copy_from_slice(data);
        }
    }

    fn copy_buffer_sub_data(
        &self,
        read_target: NativeEnum,
        write_target: NativeEnum,
        read_offset: usize,
        write_offset: usize,
        size: usize,
    ) {
        let Some(mut st) = self.enter("glCopyBufferSubData") else { return };
        if !BUFFER_TARGETS.contains(&read_target) || !BUFFER_TARGETS.contains(&write_target) {
            return st.raise(gl::INVALID_ENUM);
        }
        let (src, dst) = (st.bound_buffer(read_target), st.bound_buffer(write_target));
        let (Some(src_buf), Some(dst_buf)) = (st.buffers.get(&src), st.buffers.get(&dst)) else {
            return st.raise(gl::INVALID_OPERATION);
        };
        if src_buf.mapped.is_some() || dst_buf.mapped.is_some() {
            return st.raise(gl::INVALID_OPERATION);
        }
        let in_range = |offset: usize, len: usize| offset.checked_add(size).is_some_and(|end| end <= len);
        if !in_range(read_offset, src_buf.len) || !in_range(write_offset, dst_buf.len) {
            return st.raise(gl::INVALID_VALUE);
        }
        if src == dst && read_offset.abs_diff(write_offset) < size {
            return st.raise(gl::INVALID_VALUE);
        }

        let bytes = src_buf.bytes()[read_offset..read_offset + size].to_vec();
        if let Some(buffer) = st.buffers.get_mut(&dst) {
            buffer.bytes_mut()[write_offset..write_offset + size].copy_from_slice(&bytes);
            if let Some(pending) = buffer.pending.as_mut() {
                bytemuck::cast_slice_mut::<u64, u8>(pending)[write_offset..write_offset + size]
                    .copy_from_slice(&bytes);
            }
        }
    }

    fn map_buffer_range(&self, target: NativeEnum, offset: usize, len: usize, access: u32) -> *mut u8 {
        let null = std::ptr::null_mut();
        let Some(mut st) = self.enter("glMapBufferRange") else { return null };
        if !BUFFER_TARGETS.contains(&target) {
            return st.fail(gl::INVALID_ENUM, null);
        }
        let id = st.bound_buffer(target);
        let Some(buffer) = st.buffers.get_mut(&id) else {
            return st.fail(gl::INVALID_OPERATION, null);
        };
        if len == 0 || offset.checked_add(len).map_or(true, |end| end > buffer.len) {
            return st.fail(gl::INVALID_VALUE, null);
        }
        if buffer.mapped.is_some() || access & (gl::MAP_READ_BIT | gl::MAP_WRITE_BIT) == 0 {
            return st.fail(gl::INVALID_OPERATION, null);
        }
        if access & gl::MAP_INVALIDATE_BUFFER_BIT != 0 {
            buffer.words.iter_mut().for_each(|w| *w = 0);
        } else if access & gl::MAP_INVALIDATE_RANGE_BIT != 0 {
            buffer.bytes_mut()[offset..offset + len].fill(0);
        }
        buffer.mapped = Some((offset, len, access));
        // The words vector isn't reallocated while mapped: every resizing call
        // rejects mapped buffers.
        buffer.bytes_mut()[offset..].as_mut_ptr()
    }

    fn unmap_buffer(&self, target: NativeEnum) -> bool {
        let Some(mut st) = self.enter("glUnmapBuffer") else { return false };
        if !BUFFER_TARGETS.contains(&target) {
            return st.fail(gl::INVALID_ENUM, false);
        }
        let id = st.bound_buffer(target);
        match st.buffers.get_mut(&id).and_then(|b| b.mapped.take()) {
            Some(_) => true,
            None => st.fail(gl::INVALID_OPERATION, false),
        }
    }

    // Textures

    fn gen_texture(&self) -> ObjectId {
        self.gen("glGenTextures", |st, id| {
            st.textures.insert(id, TextureObject::default());
        })
    }

    fn is_texture(&self, id: ObjectId) -> bool {
        self.query("glIsTexture").is_some_and(|st| st.textures.contains_key(&id))
    }

    fn delete_texture(&self, id: ObjectId) {
        let Some(mut st) = self.enter("glDeleteTextures") else { return };
        if st.textures.remove(&id).is_some() {
            st.texture_units.retain(|_, bound| *bound != id);
            log::trace!("glDeleteTextures {id}");
        }
    }

    fn active_texture(&self, unit: NativeEnum) {
        let Some(mut st) = self.enter("glActiveTexture") else { return };
        let index = unit.wrapping_sub(gl::TEXTURE0);
        if unit < gl::TEXTURE0 || index >= st.limits.max_texture_units {
            return st.raise(gl::INVALID_ENUM);
        }
        st.active_unit = index;
    }

    fn bind_texture(&self, target: NativeEnum, id: ObjectId) {
        let Some(mut st) = self.enter("glBindTexture") else { return };
        if !TEXTURE_TARGETS.contains(&target) {
            return st.raise(gl::INVALID_ENUM);
        }
        if id != 0 {
            let Some(tex) = st.textures.get_mut(&id) else {
                return st.raise(gl::INVALID_OPERATION);
            };
            match tex.target {
                Some(existing) if existing != target => return st.raise(gl::INVALID_OPERATION),
                _ => tex.target = Some(target),
            }
        }
        let unit = st.active_unit;
        st.texture_units.insert((unit, target), id);
    }

    fn tex_image(
        &self,
        target: NativeEnum,
        level: i32,
        internal_format: NativeEnum,
        size: UVec3,
        format: NativeEnum,
        ty: NativeEnum,
        data: Option<&[u8]>,
    ) {
        let Some(mut st) = self.enter("glTexImage") else { return };
        if ![gl::TEXTURE_1D, gl::TEXTURE_2D, gl::TEXTURE_3D, gl::TEXTURE_2D_ARRAY].contains(&target) {
            return st.raise(gl::INVALID_ENUM);
        }
        let layouts = [
            gl::RED,
            gl::RG,
            gl::RGBA,
            gl::BGRA,
            gl::RED_INTEGER,
            gl::DEPTH_COMPONENT,
            gl::DEPTH_STENCIL,
            gl::STENCIL_INDEX,
        ];
        let types = [
            gl::UNSIGNED_BYTE,
            gl::BYTE,
            gl::UNSIGNED_SHORT,
            gl::SHORT,
            gl::UNSIGNED_INT,
            gl::INT,
            gl::HALF_FLOAT,
            gl::FLOAT,
            gl::UNSIGNED_INT_2_10_10_10_REV,
            gl::UNSIGNED_INT_24_8,
            gl::FLOAT_32_UNSIGNED_INT_24_8_REV,
        ];
        if !layouts.contains(&format) || !types.contains(&ty) {
            return st.raise(gl::INVALID_ENUM);
        }
        let id = st.bound_texture(target);
        if id == 0 {
            return st.raise(gl::INVALID_OPERATION);
        }
        let Some((_, texel_bytes)) = format_info(internal_format) else {
            return st.raise(gl::INVALID_VALUE);
        };
        let flat = match target {
            gl::TEXTURE_1D => size.y == 1 && size.z == 1,
            gl::TEXTURE_2D => size.z == 1,
            _ => true,
        };
        if level < 0 || !flat || size.max_element() > st.limits.max_texture_size {
            return st.raise(gl::INVALID_VALUE);
        }
        let bytes = texel_bytes as usize * size.x as usize * size.y as usize * size.z as usize;
        if data.is_some_and(|d| d.len() < bytes) {
            return st.raise(gl::INVALID_OPERATION);
        }

        let Some(tex) = st.textures.get_mut(&id) else { return };
        tex.levels.insert(level, size);
        if level == 0 {
            tex.internal_format = internal_format;
            tex.samples = 0;
        }
        let texels = match data {
            Some(d) => d[..bytes].to_vec(),
            None => vec![0; bytes],
        };
        tex.data.insert(level, texels);
    }

    fn tex_image_multisample(&self, target: NativeEnum, samples: u32, internal_format: NativeEnum, size: UVec2) {
        let Some(mut st) = self.enter("glTexImage2DMultisample") else { return };
        if target != gl::TEXTURE_2D_MULTISAMPLE {
            return st.raise(gl::INVALID_ENUM);
        }
        let id = st.bound_texture(target);
        if id == 0 {
            return st.raise(gl::INVALID_OPERATION);
        }
        if format_info(internal_format).is_none() {
            return st.raise(gl::INVALID_ENUM);
        }
        if samples == 0 || samples > st.limits.max_samples || size.max_element() > st.limits.max_texture_size {
            return st.raise(gl::INVALID_VALUE);
        }
        let Some(tex) = st.textures.get_mut(&id) else { return };
        tex.levels = BTreeMap::from([(0, size.extend(1))]);
        tex.internal_format = internal_format;
        tex.samples = samples;
        tex.data.clear();
    }

    fn tex_parameter_i(&self, target: NativeEnum, pname: NativeEnum, value: i32) {
        self.tex_parameter("glTexParameteri", target, pname, TexParam::Int(value));
    }

    fn tex_parameter_f(&self, target: NativeEnum, pname: NativeEnum, value: f32) {
        self.tex_parameter("glTexParameterf", target, pname, TexParam::Float(&[value]));
    }

    fn tex_parameter_fv(&self, target: NativeEnum, pname: NativeEnum, value: &[f32]) {
        self.tex_parameter("glTexParameterfv", target, pname, TexParam::Float(value));
    }

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
    ) {
        let Some(mut st) = self.enter("glCopyImageSubData") else { return };
        if !TEXTURE_TARGETS.contains(&src_target) || !TEXTURE_TARGETS.contains(&dest_target) {
            return st.raise(gl::INVALID_ENUM);
        }
        let (Some(from), Some(to)) = (st.textures.get(&src), st.textures.get(&dest)) else {
            return st.raise(gl::INVALID_VALUE);
        };
        if from.target != Some(src_target) || to.target != Some(dest_target) {
            return st.raise(gl::INVALID_ENUM);
        }
        let (Some(&src_size), Some(&dest_size)) = (from.levels.get(&level), to.levels.get(&level)) else {
            return st.raise(gl::INVALID_VALUE);
        };
        let texel = match (format_info(from.internal_format), format_info(to.internal_format)) {
            (Some((_, a)), Some((_, b))) if a == b && from.samples == to.samples => a as usize,
            _ => return st.raise(gl::INVALID_OPERATION),
        };
        let fits = |offset: UVec3, extent: UVec3| {
            (0..3).all(|axis| offset[axis].checked_add(size[axis]).is_some_and(|end| end <= extent[axis]))
        };
        if !fits(src_offset, src_size) || !fits(dest_offset, dest_size) {
            return st.raise(gl::INVALID_VALUE);
        }
        let overlaps = (0..3).all(|axis| {
            src_offset[axis] < dest_offset[axis] + size[axis] && dest_offset[axis] < src_offset[axis] + size[axis]
        });
        if src == dest && overlaps {
            return st.raise(gl::INVALID_VALUE);
        }

        // Gather the source box row by row, then scatter it
        let Some(texels) = from.data.get(&level) else { return };
        let row = size.x as usize * texel;
        let mut rows = Vec::with_capacity(row * size.y as usize * size.z as usize);
        for z in 0..size.z {
            for y in 0..size.y {
                let start = texel_offset(src_size, src_offset + UVec3::new(0, y, z), texel);
                rows.extend_from_slice(&texels[start..start + row]);
            }
        }
        let Some(texels) = st.textures.get_mut(&dest).and_then(|t| t.data.get_mut(&level)) else { return };
        for (i, chunk) in rows.chunks_exact(row.max(1)).enumerate() {
            let (y, z) = (i as u32 % size.y.max(1), i as u32 / size.y.max(1));
            let start = texel_offset(dest_size, dest_offset + UVec3::new(0, y, z), texel);
            texels[start..start + chunk.len()].copy_from_slice(chunk);
        }
    }

    // Framebuffers

    fn gen_framebuffer(&self) -> ObjectId {
        self.gen("glGenFramebuffers", |st, id| {
            let fb = FramebufferObject { draw_buffers: vec![gl::COLOR_ATTACHMENT0], ..Default::default() };
            st.framebuffers.insert(id, fb);
        })
    }

    fn is_framebuffer(&self, id: ObjectId) -> bool {
        self.query("glIsFramebuffer").is_some_and(|st| st.framebuffers.contains_key(&id))
    }

    fn delete_framebuffer(&self, id: ObjectId) {
        let Some(mut st) = self.enter("glDeleteFramebuffers") else { return };
        if st.framebuffers.remove(&id).is_none() {
            return;
        }
        if st.draw_framebuffer == id {
            st.draw_framebuffer = 0;
        }
        if st.read_framebuffer == id {
            st.read_framebuffer = 0;
        }
        log::trace!("glDeleteFramebuffers {id}");
    }

    fn bind_framebuffer(&self, target: NativeEnum, id: ObjectId) {
        let Some(mut st) = self.enter("glBindFramebuffer") else { return };
        if id != 0 && !st.framebuffers.contains_key(&id) {
            return st.raise(gl::INVALID_OPERATION);
        }
        match target {
            gl::FRAMEBUFFER => {
                st.draw_framebuffer = id;
                st.read_framebuffer = id;
            }
            gl::DRAW_FRAMEBUFFER => st.draw_framebuffer = id,
            gl::READ_FRAMEBUFFER => st.read_framebuffer = id,
            _ => st.raise(gl::INVALID_ENUM),
        }
    }

    fn framebuffer_texture(&self, target: NativeEnum, attachment: NativeEnum, texture: ObjectId, level: i32) {
        let Some(mut st) = self.enter("glFramebufferTexture") else { return };
        let Some(fb) = st.framebuffer_for(target) else {
            return st.raise(gl::INVALID_ENUM);
        };
        if fb == 0 {
            return st.raise(gl::INVALID_OPERATION);
        }
        let color_limit = gl::COLOR_ATTACHMENT0 + st.limits.max_color_attachments;
        let valid_point = (gl::COLOR_ATTACHMENT0..color_limit).contains(&attachment)
            || [gl::DEPTH_ATTACHMENT, gl::STENCIL_ATTACHMENT, gl::DEPTH_STENCIL_ATTACHMENT].contains(&attachment);
        if !valid_point {
            return st.raise(gl::INVALID_OPERATION);
        }
        if level < 0 || (texture != 0 && !st.textures.contains_key(&texture)) {
            return st.raise(gl::INVALID_VALUE);
        }
        let Some(fb) = st.framebuffers.get_mut(&fb) else { return };
        if texture == 0 {
            fb.attachments.remove(&attachment);
        } else {
            fb.attachments.insert(attachment, (texture, level));
        }
    }

    fn check_framebuffer_status(&self, target: NativeEnum) -> NativeEnum {
        let Some(mut st) = self.enter("glCheckFramebufferStatus") else { return 0 };
        match st.framebuffer_for(target) {
            Some(fb) => st.framebuffer_status(fb),
            None => st.fail(gl::INVALID_ENUM, 0),
        }
    }

    fn draw_buffers(&self, buffers: &[NativeEnum]) {
        let Some(mut st) = self.enter("glDrawBuffers") else { return };
        if buffers.len() > st.limits.max_draw_buffers as usize {
            return st.raise(gl::INVALID_VALUE);
        }
        let fb = st.draw_framebuffer;
        if fb == 0 {
            if buffers.iter().any(|&b| b != gl::NONE && b != gl::BACK) {
                return st.raise(gl::INVALID_OPERATION);
            }
            st.default_draw_buffers = buffers.to_vec();
            return;
        }
        let color_limit = gl::COLOR_ATTACHMENT0 + st.limits.max_color_attachments;
        for (i, &b) in buffers.iter().enumerate() {
            if b == gl::NONE {
                continue;
            }
            if !(gl::COLOR_ATTACHMENT0..color_limit).contains(&b) {
                return st.raise(gl::INVALID_ENUM);
            }
            if buffers[..i].contains(&b) {
                return st.raise(gl::INVALID_OPERATION);
            }
        }
        if let Some(fb) = st.framebuffers.get_mut(&fb) {
            fb.draw_buffers = buffers.to_vec();
        }
    }

    // Shaders

    fn create_shader(&self, stage: NativeEnum) -> ObjectId {
        if !SHADER_STAGES.contains(&stage) {
            if let Some(mut st) = self.enter("glCreateShader") {
                st.raise(gl::INVALID_ENUM);
            }
            return 0;
        }
        self.gen("glCreateShader", |st, id| {
            st.shaders.insert(
                id,
                ShaderObject {
                    stage,
                    source: String::new(),
                    compiled: false,
                    log: String::new(),
                    reflection: None,
                    kernel: None,
                },
            );
        })
    }

    fn is_shader(&self, id: ObjectId) -> bool {
        self.query("glIsShader").is_some_and(|st| st.shaders.contains_key(&id))
    }

    fn delete_shader(&self, id: ObjectId) {
        let Some(mut st) = self.enter("glDeleteShader") else { return };
        if st.shaders.remove(&id).is_some() {
            for program in st.programs.values_mut() {
                program.attached.retain(|&s| s != id);
            }
            log::trace!("glDeleteShader {id}");
        }
    }

    fn shader_source(&self, id: ObjectId, source: &str) {
        let Some(mut st) = self.enter("glShaderSource") else { return };
        match st.shaders.get_mut(&id) {
            Some(shader) => shader.source = source.to_string(),
            None => st.raise(gl::INVALID_VALUE),
        }
    }

    fn compile_shader(&self, id: ObjectId) {
        let Some(mut st) = self.enter("glCompileShader") else { return };
        let Some(shader) = st.shaders.get_mut(&id) else {
            return st.raise(gl::INVALID_VALUE);
        };
        let result = glsl::scan(&shader.source, shader.stage).and_then(|reflection| {
            if shader.stage != gl::COMPUTE_SHADER {
                return Ok((reflection, None));
            }
            match self.kernels.borrow().get(shader.source.trim()) {
                Some(kernel) => Ok((reflection, Some(kernel.clone()))),
                None => Err("ERROR: 0:0: no host kernel registered for this compute source".to_string()),
            }
        });
        match result {
            Ok((reflection, kernel)) => {
                shader.compiled = true;
                shader.log.clear();
                shader.reflection = Some(reflection);
                shader.kernel = kernel;
            }
            Err(log) => {
                shader.compiled = false;
                shader.log = log;
                shader.reflection = None;
                shader.kernel = None;
            }
        }
    }

    fn get_shader_iv(&self, id: ObjectId, pname: NativeEnum) -> i32 {
        let Some(mut st) = self.enter("glGetShaderiv") else { return 0 };
        let Some(shader) = st.shaders.get(&id) else {
            return st.fail(gl::INVALID_VALUE, 0);
        };
        match pname {
            gl::COMPILE_STATUS => i32::from(shader.compiled),
            gl::INFO_LOG_LENGTH if shader.log.is_empty() => 0,
            gl::INFO_LOG_LENGTH => shader.log.len() as i32 + 1,
            gl::SHADER_TYPE => shader.stage as i32,
            _ => st.fail(gl::INVALID_ENUM, 0),
        }
    }

    fn shader_info_log(&self, id: ObjectId) -> String {
        let Some(mut st) = self.enter("glGetShaderInfoLog") else { return String::new() };
        match st.shaders.get(&id) {
            Some(shader) => shader.log.clone(),
            None => st.fail(gl::INVALID_VALUE, String::new()),
        }
    }

    // Programs

    fn create_program(&self) -> ObjectId {
        self.gen("glCreateProgram", |st, id| {
            st.programs.insert(id, ProgramObject::default());
        })
    }

    fn is_program(&self, id: ObjectId) -> bool {
        self.query("glIsProgram").is_some_and(|st| st.programs.contains_key(&id))
    }

    fn delete_program(&self, id: ObjectId) {
        let Some(mut st) = self.enter("glDeleteProgram") else { return };
        if st.programs.remove(&id).is_some() {
            if st.program == id {
                st.program = 0;
            }
            log::trace!("glDeleteProgram {id}");
        }
    }

    fn attach_shader(&self, program: ObjectId, shader: ObjectId) {
        let Some(mut st) = self.enter("glAttachShader") else { return };
        if !st.shaders.contains_key(&shader) {
            return st.raise(gl::INVALID_VALUE);
        }
        let Some(p) = st.programs.get_mut(&program) else {
            return st.raise(gl::INVALID_VALUE);
        };
        if p.attached.contains(&shader) {
            return st.raise(gl::INVALID_OPERATION);
        }
        p.attached.push(shader);
    }

    fn link_program(&self, program: ObjectId) {
        let Some(mut st) = self.enter("glLinkProgram") else { return };
        let Some(attached) = st.programs.get(&program).map(|p| p.attached.clone()) else {
            return st.raise(gl::INVALID_VALUE);
        };
        let shaders: Vec<&ShaderObject> = attached.iter().filter_map(|id| st.shaders.get(id)).collect();
        let result = link(&shaders, &st.limits);
        if let Some(p) = st.programs.get_mut(&program) {
            match result {
                Ok(linked) => {
                    p.linked = Some(linked);
                    p.log.clear();
                }
                Err(log) => {
                    p.linked = None;
                    p.log = log;
                }
            }
        }
    }

    fn get_program_iv(&self, program: ObjectId, pname: NativeEnum) -> i32 {
        let Some(mut st) = self.enter("glGetProgramiv") else { return 0 };
        let Some(p) = st.programs.get(&program) else {
            return st.fail(gl::INVALID_VALUE, 0);
        };
        match pname {
            gl::LINK_STATUS => i32::from(p.linked.is_some()),
            gl::INFO_LOG_LENGTH if p.log.is_empty() => 0,
            gl::INFO_LOG_LENGTH => p.log.len() as i32 + 1,
            gl::ATTACHED_SHADERS => p.attached.len() as i32,
            _ => st.fail(gl::INVALID_ENUM, 0),
        }
    }

    fn program_info_log(&self, program: ObjectId) -> String {
        let Some(mut st) = self.enter("glGetProgramInfoLog") else { return String::new() };
        match st.programs.get(&program) {
            Some(p) => p.log.clone(),
            None => st.fail(gl::INVALID_VALUE, String::new()),
        }
    }

    fn use_program(&self, program: ObjectId) {
        let Some(mut st) = self.enter("glUseProgram") else { return };
        if program != 0 {
            match st.programs.get(&program) {
                None => return st.raise(gl::INVALID_VALUE),
                Some(p) if p.linked.is_none() => return st.raise(gl::INVALID_OPERATION),
                Some(_) => {}
            }
        }
        st.program = program;
    }

    fn get_uniform_location(&self, program: ObjectId, name: &str) -> i32 {
        let Some(mut st) = self.enter("glGetUniformLocation") else { return -1 };
        match st.programs.get(&program).map(|p| p.linked.as_ref()) {
            None => st.fail(gl::INVALID_VALUE, -1),
            Some(None) => st.fail(gl::INVALID_OPERATION, -1),
            Some(Some(linked)) => linked.location_of(name).unwrap_or(-1),
        }
    }

    fn get_attrib_location(&self, program: ObjectId, name: &str) -> i32 {
        let Some(mut st) = self.enter("glGetAttribLocation") else { return -1 };
        match st.programs.get(&program).map(|p| p.linked.as_ref()) {
            None => st.fail(gl::INVALID_VALUE, -1),
            Some(None) => st.fail(gl::INVALID_OPERATION, -1),
            Some(Some(linked)) => linked.attributes.get(name).map_or(-1, |&l| l as i32),
        }
    }

    fn uniform(&self, location: i32, data: UniformData<'_>) {
        let Some(mut st) = self.enter("glUniform") else { return };
        let max_units = st.limits.max_texture_units;
        let program = st.program;
        let Some(linked) = st.programs.get_mut(&program).and_then(|p| p.linked.as_mut()) else {
            return st.raise(gl::INVALID_OPERATION);
        };
        if location == -1 {
            return;
        }
        let Some((base, uniform)) = linked.uniform_at(location) else {
            return st.raise(gl::INVALID_OPERATION);
        };

        let width = data.element_width();
        if width == 0 || data.scalar_count() == 0 || data.scalar_count() % width != 0 {
            return st.raise(gl::INVALID_VALUE);
        }
        let elements = (data.scalar_count() / width) as i32;
        if location - base + elements > uniform.array_len as i32 {
            return st.raise(gl::INVALID_OPERATION);
        }
        let Some(shape) = uniform_shape(&uniform.ty) else {
            return st.raise(gl::INVALID_OPERATION);
        };
        let value = match (shape, data) {
            (Shape::Float(n), UniformData::Float { components, values }) if n == components => {
                UniformValue::Float(values.to_vec())
            }
            (Shape::Int(n), UniformData::Int { components, values }) if n == components => {
                UniformValue::Int(values.to_vec())
            }
            (Shape::UInt(n), UniformData::UInt { components, values }) if n == components => {
                UniformValue::UInt(values.to_vec())
            }
            (Shape::Bool(n), UniformData::Int { components, values }) if n == components => {
                UniformValue::Int(values.to_vec())
            }
            (Shape::Bool(n), UniformData::UInt { components, values }) if n == components => {
                UniformValue::UInt(values.to_vec())
            }
            (Shape::Bool(n), UniformData::Float { components, values }) if n == components => {
                UniformValue::Float(values.to_vec())
            }
            (Shape::Sampler, UniformData::Int { components: 1, values }) => {
                if values.iter().any(|&u| u < 0 || u as u32 >= max_units) {
                    return st.raise(gl::INVALID_VALUE);
                }
                UniformValue::Int(values.to_vec())
            }
            (Shape::Matrix(c, r), UniformData::Matrix { columns, rows, values }) if c == columns && r == rows => {
                UniformValue::Float(values.to_vec())
            }
            _ => return st.raise(gl::INVALID_OPERATION),
        };
        linked.values.insert(location, value);
    }

    // Vertex arrays

    fn gen_vertex_array(&self) -> ObjectId {
        self.gen("glGenVertexArrays", |st, id| {
            st.vertex_arrays.insert(id, VertexArrayObject::default());
        })
    }

    fn is_vertex_array(&self, id: ObjectId) -> bool {
        self.query("glIsVertexArray").is_some_and(|st| st.vertex_arrays.contains_key(&id))
    }

    fn delete_vertex_array(&self, id: ObjectId) {
        let Some(mut st) = self.enter("glDeleteVertexArrays") else { return };
        if st.vertex_arrays.remove(&id).is_some() {
            if st.vertex_array == id {
                st.vertex_array = 0;
            }
            log::trace!("glDeleteVertexArrays {id}");
        }
    }

    fn bind_vertex_array(&self, id: ObjectId) {
        let Some(mut st) = self.enter("glBindVertexArray") else { return };
        if id != 0 && !st.vertex_arrays.contains_key(&id) {
            return st.raise(gl::INVALID_OPERATION);
        }
        st.vertex_array = id;
    }

    fn enable_vertex_attrib_array(&self, index: u32) {
        let Some(mut st) = self.enter("glEnableVertexAttribArray") else { return };
        if index >= st.limits.max_vertex_attribs {
            return st.raise(gl::INVALID_VALUE);
        }
        let vao = st.vertex_array;
        match st.vertex_arrays.get_mut(&vao) {
            Some(v) => v.attribs.entry(index).or_default().enabled = true,
            None => st.raise(gl::INVALID_OPERATION),
        }
    }

    fn vertex_attrib_pointer(&self, index: u32, size: i32, ty: NativeEnum, normalized: bool, stride: i32, offset: usize) {
        let Some(mut st) = self.enter("glVertexAttribPointer") else { return };
        let types = [
            gl::BYTE,
            gl::UNSIGNED_BYTE,
            gl::SHORT,
            gl::UNSIGNED_SHORT,
            gl::INT,
            gl::UNSIGNED_INT,
            gl::HALF_FLOAT,
            gl::FLOAT,
            gl::DOUBLE,
            gl::UNSIGNED_INT_2_10_10_10_REV,
        ];
        if !types.contains(&ty) {
            return st.raise(gl::INVALID_ENUM);
        }
        if index >= st.limits.max_vertex_attribs || !(1..=4).contains(&size) || stride < 0 {
            return st.raise(gl::INVALID_VALUE);
        }
        let buffer = st.bound_buffer(gl::ARRAY_BUFFER);
        let vao = st.vertex_array;
        let Some(v) = st.vertex_arrays.get_mut(&vao).filter(|_| buffer != 0) else {
            return st.raise(gl::INVALID_OPERATION);
        };
        let attrib = v.attribs.entry(index).or_default();
        attrib.buffer = buffer;
        attrib.size = size;
        attrib.ty = ty;
        attrib.normalized = normalized;
        attrib.stride = stride;
        attrib.offset = offset;
    }

    fn vertex_attrib_divisor(&self, index: u32, divisor: u32) {
        let Some(mut st) = self.enter("glVertexAttribDivisor") else { return };
        if index >= st.limits.max_vertex_attribs {
            return st.raise(gl::INVALID_VALUE);
        }
        let vao = st.vertex_array;
        match st.vertex_arrays.get_mut(&vao) {
            Some(v) => v.attribs.entry(index).or_default().divisor = divisor,
            None => st.raise(gl::INVALID_OPERATION),
        }
    }

    // Fixed-function state

    fn enable(&self, cap: NativeEnum) {
        let Some(mut st) = self.enter("glEnable") else { return };
        if !CAPABILITIES.contains(&cap) {
            return st.raise(gl::INVALID_ENUM);
        }
        st.raster.enabled.insert(cap);
    }

    fn disable(&self, cap: NativeEnum) {
        let Some(mut st) = self.enter("glDisable") else { return };
        if !CAPABILITIES.contains(&cap) {
            return st.raise(gl::INVALID_ENUM);
        }
        st.raster.enabled.remove(&cap);
    }

    fn blend_func_separate(&self, src_rgb: NativeEnum, dst_rgb: NativeEnum, src_alpha: NativeEnum, dst_alpha: NativeEnum) {
        let Some(mut st) = self.enter("glBlendFuncSeparate") else { return };
        let factors = [src_rgb, dst_rgb, src_alpha, dst_alpha];
        if factors.iter().any(|f| !BLEND_FACTORS.contains(f)) {
            return st.raise(gl::INVALID_ENUM);
        }
        st.raster.blend_func = factors;
    }

    fn blend_equation_separate(&self, rgb: NativeEnum, alpha: NativeEnum) {
        let Some(mut st) = self.enter("glBlendEquationSeparate") else { return };
        if !BLEND_EQUATIONS.contains(&rgb) || !BLEND_EQUATIONS.contains(&alpha) {
            return st.raise(gl::INVALID_ENUM);
        }
        st.raster.blend_equation = [rgb, alpha];
    }

    fn blend_color(&self, color: Vec4) {
        if let Some(mut st) = self.enter("glBlendColor") {
            st.raster.blend_color = color;
        }
    }

    fn color_mask(&self, red: bool, green: bool, blue: bool, alpha: bool) {
        if let Some(mut st) = self.enter("glColorMask") {
            st.raster.color_mask = [red, green, blue, alpha];
        }
    }

    fn cull_face(&self, face: NativeEnum) {
        let Some(mut st) = self.enter("glCullFace") else { return };
        if ![gl::FRONT, gl::BACK, gl::FRONT_AND_BACK].contains(&face) {
            return st.raise(gl::INVALID_ENUM);
        }
        st.raster.cull_face = face;
    }

    fn front_face(&self, winding: NativeEnum) {
        let Some(mut st) = self.enter("glFrontFace") else { return };
        if winding != gl::CW && winding != gl::CCW {
            return st.raise(gl::INVALID_ENUM);
        }
        st.raster.front_face = winding;
    }

    fn polygon_mode(&self, face: NativeEnum, mode: NativeEnum) {
        let Some(mut st) = self.enter("glPolygonMode") else { return };
        if face != gl::FRONT_AND_BACK || ![gl::POINT, gl::LINE, gl::FILL].contains(&mode) {
            return st.raise(gl::INVALID_ENUM);
        }
        st.raster.polygon_mode = mode;
    }

    fn polygon_offset(&self, factor: f32, units: f32) {
        if let Some(mut st) = self.enter("glPolygonOffset") {
            st.raster.polygon_offset = (factor, units);
        }
    }

    fn depth_func(&self, func: NativeEnum) {
        let Some(mut st) = self.enter("glDepthFunc") else { return };
        if !COMPARISONS.contains(&func) {
            return st.raise(gl::INVALID_ENUM);
        }
        st.raster.depth_func = func;
    }

    fn depth_mask(&self, write: bool) {
        if let Some(mut st) = self.enter("glDepthMask") {
            st.raster.depth_mask = write;
        }
    }

    fn stencil_func(&self, func: NativeEnum, reference: i32, mask: u32) {
        let Some(mut st) = self.enter("glStencilFunc") else { return };
        if !COMPARISONS.contains(&func) {
            return st.raise(gl::INVALID_ENUM);
        }
        st.raster.stencil_func = (func, reference, mask);
    }

    fn stencil_op(&self, stencil_fail: NativeEnum, depth_fail: NativeEnum, pass: NativeEnum) {
        let Some(mut st) = self.enter("glStencilOp") else { return };
        let ops = [stencil_fail, depth_fail, pass];
        if ops.iter().any(|op| !STENCIL_OPS.contains(op)) {
            return st.raise(gl::INVALID_ENUM);
        }
        st.raster.stencil_op = ops;
    }

    fn stencil_mask(&self, mask: u32) {
        if let Some(mut st) = self.enter("glStencilMask") {
            st.raster.stencil_mask = mask;
        }
    }

    fn sample_mask(&self, mask: u32) {
        if let Some(mut st) = self.enter("glSampleMaski") {
            st.raster.sample_mask = mask;
        }
    }

    fn viewport_indexed(&self, index: u32, rect: Vec4) {
        let Some(mut st) = self.enter("glViewportIndexedf") else { return };
        if index >= st.limits.max_viewports || rect.z < 0.0 || rect.w < 0.0 {
            return st.raise(gl::INVALID_VALUE);
        }
        st.raster.viewports.insert(index, rect);
    }

    fn depth_range_indexed(&self, index: u32, near: f32, far: f32) {
        let Some(mut st) = self.enter("glDepthRangeIndexed") else { return };
        if index >= st.limits.max_viewports {
            return st.raise(gl::INVALID_VALUE);
        }
        st.raster.depth_ranges.insert(index, (near.clamp(0.0, 1.0), far.clamp(0.0, 1.0)));
    }

    fn scissor_indexed(&self, index: u32, x: i32, y: i32, width: i32, height: i32) {
        let Some(mut st) = self.enter("glScissorIndexed") else { return };
        if index >= st.limits.max_viewports || width < 0 || height < 0 {
            return st.raise(gl::INVALID_VALUE);
        }
        st.raster.scissors.insert(index, [x, y, width, height]);
    }

    fn clear_color(&self, color: Vec4) {
        if let Some(mut st) = self.enter("glClearColor") {
            st.raster.clear_color = color;
        }
    }

    fn clear_depth(&self, depth: f32) {
        if let Some(mut st) = self.enter("glClearDepthf") {
            st.raster.clear_depth = depth.clamp(0.0, 1.0);
        }
    }

    fn clear_stencil(&self, stencil: i32) {
        if let Some(mut st) = self.enter("glClearStencil") {
            st.raster.clear_stencil = stencil;
        }
    }

    fn clear(&self, mask: u32) {
        let Some(mut st) = self.enter("glClear") else { return };
        let all = gl::COLOR_BUFFER_BIT | gl::DEPTH_BUFFER_BIT | gl::STENCIL_BUFFER_BIT;
        if mask & !all != 0 {
            return st.raise(gl::INVALID_VALUE);
        }
        let framebuffer = st.draw_framebuffer;
        if st.framebuffer_status(framebuffer) != gl::FRAMEBUFFER_COMPLETE {
            return st.raise(gl::INVALID_FRAMEBUFFER_OPERATION);
        }
        let scissor = if st.raster.enabled.contains(&gl::SCISSOR_TEST) {
            st.raster.scissors.get(&0).copied()
        } else {
            None
        };
        let record = ClearRecord {
            mask,
            color: st.raster.clear_color,
            depth: st.raster.clear_depth,
            stencil: st.raster.clear_stencil,
            framebuffer,
            scissor,
        };
        st.clears.push(record);
    }

    // Work submission

    fn draw_arrays_instanced(&self, mode: NativeEnum, first: i32, count: i32, instances: i32, base_instance: u32) {
        if first < 0 {
            if let Some(mut st) = self.enter("glDrawArraysInstanced") {
                st.raise(gl::INVALID_VALUE);
            }
            return;
        }
        self.draw(
            "glDrawArraysInstanced",
            DrawRecord {
                mode,
                first,
                count,
                instances,
                base_instance,
                indexed: None,
                program: 0,
                vertex_array: 0,
                framebuffer: 0,
                targets: Vec::new(),
            },
        );
    }

    fn draw_elements_instanced(
        &self,
        mode: NativeEnum,
        count: i32,
        index_type: NativeEnum,
        offset: usize,
        instances: i32,
        base_vertex: i32,
        base_instance: u32,
    ) {
        self.draw(
            "glDrawElementsInstanced",
            DrawRecord {
                mode,
                first: 0,
                count,
                instances,
                base_instance,
                indexed: Some((index_type, offset, base_vertex)),
                program: 0,
                vertex_array: 0,
                framebuffer: 0,
                targets: Vec::new(),
            },
        );
    }

    fn dispatch_compute(&self, groups: UVec3) {
        let Some(mut st) = self.enter("glDispatchCompute") else { return };
        let program = st.program;
        let Some((compute, uniforms)) = st
            .programs
            .get(&program)
            .and_then(|p| p.linked.as_ref())
            .and_then(|l| Some((l.compute.clone()?, uniforms_by_name(l))))
        else {
            return st.raise(gl::INVALID_OPERATION);
        };
        let limit = UVec3::from_array(st.limits.max_work_group_count);
        if groups.cmpgt(limit).any() {
            return st.raise(gl::INVALID_VALUE);
        }
        if groups.cmpeq(UVec3::ZERO).any() {
            return;
        }

        // Gather the storage buffers, each distinct buffer once
        let mut bound: Vec<(u32, ObjectId)> = st
            .indexed_buffers
            .iter()
            .filter(|((target, _), _)| *target == gl::SHADER_STORAGE_BUFFER)
            .map(|(&(_, index), &id)| (index, id))
            .collect();
        bound.sort_unstable();
        let mut ids: Vec<ObjectId> = Vec::new();
        let mut slots: Vec<StorageSlot> = Vec::new();
        let mut bindings = BTreeMap::new();
        for (index, id) in bound {
            let Some(buffer) = st.buffers.get(&id) else { continue };
            if buffer.mapped.is_some() {
                return st.raise(gl::INVALID_OPERATION);
            }
            let slot = match ids.iter().position(|&known| known == id) {
                Some(slot) => slot,
                None => {
                    let words = buffer.pending.clone().unwrap_or_else(|| buffer.words.clone());
                    slots.push(StorageSlot { words, len: buffer.len });
                    ids.push(id);
                    ids.len() - 1
                }
            };
            bindings.insert(index, slot);
        }
        st.dispatches += 1;
        drop(st);

        let ComputeProgram { local_size, kernel } = compute;
        let mut io = KernelIo { uniforms: &uniforms, slots: &mut slots, bindings: &bindings };
        for gz in 0..groups.z {
            for gy in 0..groups.y {
                for gx in 0..groups.x {
                    let group_id = UVec3::new(gx, gy, gz);
                    for lz in 0..local_size.z {
                        for ly in 0..local_size.y {
                            for lx in 0..local_size.x {
                                let local_id = UVec3::new(lx, ly, lz);
                                let invocation = Invocation {
                                    global_id: group_id * local_size + local_id,
                                    local_id,
                                    group_id,
                                    group_size: local_size,
                                    local_index: (lz * local_size.y + ly) * local_size.x + lx,
                                };
                                kernel(&invocation, &mut io);
                            }
                        }
                    }
                }
            }
        }

        let mut st = self.state.borrow_mut();
        for (id, slot) in ids.into_iter().zip(slots) {
            if let Some(buffer) = st.buffers.get_mut(&id) {
                if buffer.len == slot.len {
                    buffer.pending = Some(slot.words);
                }
            }
        }
    }

    fn memory_barrier(&self, bits: u32) {
        let Some(mut st) = self.enter("glMemoryBarrier") else { return };
        let visible = gl::SHADER_STORAGE_BARRIER_BIT | gl::BUFFER_UPDATE_BARRIER_BIT | gl::CLIENT_MAPPED_BUFFER_BARRIER_BIT;
        if bits & visible == 0 {
            return;
        }
        for buffer in st.buffers.values_mut() {
            let Some(pending) = buffer.pending.take() else { continue };
            // Commit in place; a live mapping points into `words`
            if pending.len() == buffer.words.len() {
                buffer.words.copy_from_slice(&pending);
            } else if buffer.mapped.is_none() {
                buffer.words = pending;
            }
        }
    }

    fn flush(&self) {
        let _ = self.enter("glFlush");
    }

    fn finish(&self) {
        let _ = self.enter("glFinish");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Float(u8),
    Int(u8),
    UInt(u8),
    Bool(u8),
    Matrix(u8, u8),
    Sampler,
}

fn uniform_shape(ty: &str) -> Option<Shape> {
    let vec_len = |prefix: &str| -> Option<u8> {
        let n: u8 = ty.strip_prefix(prefix)?.parse().ok()?;
        (2..=4).contains(&n).then_some(n)
    };
    Some(match ty {
        "float" => Shape::Float(1),
        "int" => Shape::Int(1),
        "uint" => Shape::UInt(1),
        "bool" => Shape::Bool(1),
        t if t.contains("sampler") || t.contains("image") => Shape::Sampler,
        t if t.starts_with("vec") => Shape::Float(vec_len("vec")?),
        t if t.starts_with("ivec") => Shape::Int(vec_len("ivec")?),
        t if t.starts_with("uvec") => Shape::UInt(vec_len("uvec")?),
        t if t.starts_with("bvec") => Shape::Bool(vec_len("bvec")?),
        t if t.starts_with("mat") => {
            let dims = &t[3..];
            match dims.split_once('x') {
                Some((c, r)) => Shape::Matrix(c.parse().ok()?, r.parse().ok()?),
                None => {
                    let n: u8 = dims.parse().ok()?;
                    Shape::Matrix(n, n)
                }
            }
        }
        _ => return None,
    })
}

fn uniforms_by_name(linked: &LinkedProgram) -> HashMap<String, UniformValue> {
    linked
        .uniforms
        .iter()
        .filter_map(|(location, u)| Some((u.name.clone(), linked.values.get(location)?.clone())))
        .collect()
}

/// Merge the interfaces of compiled stages into a linked program
fn link(shaders: &[&ShaderObject], limits: &Limits) -> Result<LinkedProgram, String> {
    if shaders.is_empty() {
        return Err("error: no shaders attached to the program".to_string());
    }
    let mut stages = Vec::new();
    for shader in shaders {
        if !shader.compiled {
            return Err("error: an attached shader has not been compiled successfully".to_string());
        }
        if stages.contains(&shader.stage) {
            return Err(format!("error: more than one shader of type {:#06x} attached", shader.stage));
        }
        stages.push(shader.stage);
    }
    let compute = stages.contains(&gl::COMPUTE_SHADER);
    if compute && stages.len() > 1 {
        return Err("error: a compute shader can't be linked with other stages".to_string());
    }

    let mut linked = LinkedProgram::default();
    let mut implicit: Vec<&UniformDecl> = Vec::new();
    let mut seen: BTreeMap<&str, &UniformDecl> = BTreeMap::new();
    for shader in shaders {
        let Some(reflection) = shader.reflection.as_ref() else { continue };
        for u in &reflection.uniforms {
            if let Some(previous) = seen.get(u.name.as_str()) {
                if previous.ty != u.ty || previous.array_len != u.array_len {
                    return Err(format!("error: uniform '{}' declared with different types", u.name));
                }
                continue;
            }
            seen.insert(&u.name, u);
            match u.location {
                Some(location) => {
                    let range = location..location + u.array_len as i32;
                    let overlaps = range.clone().any(|l| linked.uniform_at(l).is_some());
                    if location < 0 || overlaps {
                        return Err(format!("error: explicit location {location} of '{}' is already in use", u.name));
                    }
                    linked.uniforms.insert(location, linked_uniform(u));
                }
                None => implicit.push(u),
            }
        }
        for block in &reflection.blocks {
            if block.storage {
                let binding = block.binding.unwrap_or(0);
                if binding >= limits.max_storage_bindings {
                    return Err(format!("error: binding {binding} of block '{}' exceeds the limit", block.name));
                }
                linked.storage_blocks.insert(block.name.clone(), binding);
            }
        }
        if shader.stage == gl::VERTEX_SHADER {
            let mut next = 0;
            for input in &reflection.inputs {
                let location = input.location.unwrap_or_else(|| {
                    while linked.attributes.values().any(|&l| l == next) {
                        next += 1;
                    }
                    next
                });
                if location >= limits.max_vertex_attribs {
                    return Err(format!("error: too many vertex attributes for '{}'", input.name));
                }
                linked.attributes.insert(input.name.clone(), location);
            }
        }
        if let (Some(size), Some(kernel)) = (reflection.local_size, shader.kernel.as_ref()) {
            let [x, y, z] = size;
            let limit = limits.max_work_group_size;
            if x > limit[0] || y > limit[1] || z > limit[2] {
                return Err("error: local work group size exceeds the limit".to_string());
            }
            linked.compute = Some(ComputeProgram { local_size: UVec3::new(x, y, z), kernel: kernel.clone() });
        }
    }

    let mut next = 0;
    for u in implicit {
        while (next..next + u.array_len as i32).any(|l| linked.uniform_at(l).is_some()) {
            next += 1;
        }
        linked.uniforms.insert(next, linked_uniform(u));
        next += u.array_len as i32;
    }
    if compute && linked.compute.is_none() {
        return Err("error: compute program has no executable kernel".to_string());
    }
    Ok(linked)
}

fn linked_uniform(decl: &UniformDecl) -> LinkedUniform {
    LinkedUniform { name: decl.name.clone(), ty: decl.ty.clone(), array_len: decl.array_len }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCALE: &str = "#version 430\n\
        layout(local_size_x=4) in;\n\
        layout(location = 0) uniform int k;\n\
        layout(std430, binding=0) buffer src { int a[]; };\n\
        layout(std430, binding=1) buffer dst { int b[]; };\n\
        void main() { b[gl_GlobalInvocationID.x] = a[gl_GlobalInvocationID.x] * k; }\n";

    fn driver() -> SoftwareDriver {
        let d = SoftwareDriver::new();
        d.create_context(UVec2::new(64, 64), None);
        d
    }

    fn program(d: &SoftwareDriver, stage: NativeEnum, src: &str) -> ObjectId {
        let s = d.create_shader(stage);
        d.shader_source(s, src);
        d.compile_shader(s);
        let p = d.create_program();
        d.attach_shader(p, s);
        d.link_program(p);
        p
    }

    fn storage(d: &SoftwareDriver, index: u32, data: &[i32]) -> ObjectId {
        let b = d.gen_buffer();
        d.bind_buffer(gl::SHADER_STORAGE_BUFFER, b);
        d.buffer_data(gl::SHADER_STORAGE_BUFFER, data.len() * 4, Some(bytemuck::cast_slice(data)), gl::STATIC_DRAW);
        d.bind_buffer(gl::SHADER_STORAGE_BUFFER, 0);
        d.bind_buffer_base(gl::SHADER_STORAGE_BUFFER, index, b);
        b
    }

    #[test]
    fn calls_without_context_raise_invalid_operation() {
        let d = SoftwareDriver::new();
        assert_eq!(d.gen_buffer(), 0);
        assert_eq!(d.get_error(), gl::INVALID_OPERATION);
        assert_eq!(d.get_error(), gl::NO_ERROR);
        assert!(!d.is_buffer(1));
        assert_eq!(d.get_error(), gl::NO_ERROR);
    }

    #[test]
    fn first_error_is_sticky_until_queried() {
        let d = driver();
        d.bind_buffer(0xdead, 0);
        d.bind_buffer(gl::ARRAY_BUFFER, 999);
        assert_eq!(d.get_error(), gl::INVALID_ENUM);
        assert_eq!(d.get_error(), gl::NO_ERROR);
    }

    #[test]
    fn object_limit_reports_out_of_memory() {
        let d = SoftwareDriver::with_limits(Limits { max_objects: 1, ..Limits::default() });
        d.create_context(UVec2::new(8, 8), None);
        assert_ne!(d.gen_buffer(), 0);
        assert_eq!(d.gen_texture(), 0);
        assert_eq!(d.get_error(), gl::OUT_OF_MEMORY);
    }

    #[test]
    fn storage_writes_need_a_barrier() {
        let d = driver();
        d.register_kernel(SCALE, |inv, io| {
            let i = inv.global_id.x as usize;
            let k = io.uniform_i32("k").unwrap_or(0);
            let v = io.load::<i32>(0, i);
            io.store(1, i, v * k);
        });
        let p = program(&d, gl::COMPUTE_SHADER, SCALE);
        assert_eq!(d.get_program_iv(p, gl::LINK_STATUS), gl::TRUE, "{}", d.program_info_log(p));

        storage(&d, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let out = storage(&d, 1, &[0; 8]);
        d.use_program(p);
        d.uniform(0, UniformData::Int { components: 1, values: &[5] });
        d.dispatch_compute(UVec3::new(2, 1, 1));
        assert_eq!(d.get_error(), gl::NO_ERROR);

        let before: Vec<i32> = bytemuck::cast_slice(&d.buffer_contents(out).unwrap()).to_vec();
        assert_eq!(before, vec![0; 8]);

        d.memory_barrier(gl::SHADER_STORAGE_BARRIER_BIT);
        let after: Vec<i32> = bytemuck::cast_slice(&d.buffer_contents(out).unwrap()).to_vec();
        assert_eq!(after, vec![5, 10, 15, 20, 25, 30, 35, 40]);
    }

    #[test]
    fn barrier_commits_into_a_live_mapping() {
        let d = driver();
        d.register_kernel(SCALE, |inv, io| {
            let i = inv.global_id.x as usize;
            let v = io.load::<i32>(0, i);
            io.store(1, i, v * 2);
        });
        let p = program(&d, gl::COMPUTE_SHADER, SCALE);
        storage(&d, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let out = storage(&d, 1, &[0; 8]);
        d.use_program(p);
        d.dispatch_compute(UVec3::new(2, 1, 1));

        d.bind_buffer(gl::SHADER_STORAGE_BUFFER, out);
        let ptr = d.map_buffer_range(gl::SHADER_STORAGE_BUFFER, 0, 32, gl::MAP_READ_BIT);
        assert!(!ptr.is_null());
        d.memory_barrier(gl::SHADER_STORAGE_BARRIER_BIT);
        assert_eq!(d.get_error(), gl::NO_ERROR);

        // SAFETY: the range stays mapped until the unmap below
        let mapped: Vec<i32> = bytemuck::pod_collect_to_vec(unsafe { std::slice::from_raw_parts(ptr, 32) });
        assert_eq!(mapped, vec![2, 4, 6, 8, 10, 12, 14, 16]);
        assert!(d.unmap_buffer(gl::SHADER_STORAGE_BUFFER));
    }

    #[test]
    fn image_copies_move_texel_boxes() {
        let d = driver();
        let texture = |data: &[u8]| {
            let t = d.gen_texture();
            d.bind_texture(gl::TEXTURE_2D, t);
            d.tex_image(gl::TEXTURE_2D, 0, gl::R8, UVec3::new(4, 4, 1), gl::RED, gl::UNSIGNED_BYTE, Some(data));
            t
        };
        let src = texture(&(0..16).collect::<Vec<u8>>());
        let dest = texture(&[0; 16]);

        let copy = |src_offset: UVec3, dest_offset: UVec3, size: UVec3| {
            d.copy_image_sub_data(src, gl::TEXTURE_2D, src_offset, dest, gl::TEXTURE_2D, dest_offset, 0, size)
        };
        copy(UVec3::new(1, 1, 0), UVec3::new(2, 0, 0), UVec3::new(2, 2, 1));
        assert_eq!(d.get_error(), gl::NO_ERROR);
        let texels = d.texture_contents(dest, 0).unwrap();
        assert_eq!(&texels[..8], &[0, 0, 5, 6, 0, 0, 9, 10]);
        assert!(texels[8..].iter().all(|&t| t == 0));

        copy(UVec3::new(3, 0, 0), UVec3::ZERO, UVec3::new(2, 1, 1));
        assert_eq!(d.get_error(), gl::INVALID_VALUE);
        d.copy_image_sub_data(src, gl::TEXTURE_2D, UVec3::ZERO, dest, gl::TEXTURE_2D, UVec3::ZERO, 1, UVec3::ONE);
        assert_eq!(d.get_error(), gl::INVALID_VALUE);
    }

    #[test]
    fn unregistered_compute_source_fails_to_compile() {
        let d = driver();
        let s = d.create_shader(gl::COMPUTE_SHADER);
        d.shader_source(s, SCALE);
        d.compile_shader(s);
        assert_eq!(d.get_shader_iv(s, gl::COMPILE_STATUS), gl::FALSE);
        assert!(d.shader_info_log(s).contains("no host kernel"));
    }

    #[test]
    fn implicit_uniform_locations_skip_explicit_ones() {
        let d = driver();
        let src = "layout(location = 0) uniform vec4 a;\nuniform float b;\nuniform mat4 c[2];\n\
                   layout(location = 0) in vec3 pos;\nvoid main() {}\n";
        let p = program(&d, gl::VERTEX_SHADER, src);
        assert_eq!(d.get_uniform_location(p, "a"), 0);
        assert_eq!(d.get_uniform_location(p, "b"), 1);
        assert_eq!(d.get_uniform_location(p, "c"), 2);
        assert_eq!(d.get_uniform_location(p, "c[1]"), 3);
        assert_eq!(d.get_uniform_location(p, "missing"), -1);
        assert_eq!(d.get_attrib_location(p, "pos"), 0);
    }

    #[test]
    fn uniform_type_mismatch_is_rejected() {
        let d = driver();
        let p = program(&d, gl::VERTEX_SHADER, "uniform vec2 offset;\nvoid main() {}\n");
        d.use_program(p);
        d.uniform(0, UniformData::Int { components: 2, values: &[1, 2] });
        assert_eq!(d.get_error(), gl::INVALID_OPERATION);
        d.uniform(0, UniformData::Float { components: 2, values: &[1.0, 2.0] });
        assert_eq!(d.get_error(), gl::NO_ERROR);
        assert_eq!(d.uniform_value(p, 0), Some(UniformValue::Float(vec![1.0, 2.0])));
    }

    #[test]
    fn mapping_rejects_reallocation() {
        let d = driver();
        let b = d.gen_buffer();
        d.bind_buffer(gl::ARRAY_BUFFER, b);
        d.buffer_data(gl::ARRAY_BUFFER, 16, None, gl::DYNAMIC_DRAW);
        let ptr = d.map_buffer_range(gl::ARRAY_BUFFER, 0, 16, gl::MAP_WRITE_BIT);
        assert!(!ptr.is_null());
        d.buffer_data(gl::ARRAY_BUFFER, 32, None, gl::DYNAMIC_DRAW);
        assert_eq!(d.get_error(), gl::INVALID_OPERATION);
        assert!(d.unmap_buffer(gl::ARRAY_BUFFER));
        assert!(!d.unmap_buffer(gl::ARRAY_BUFFER));
        assert_eq!(d.get_error(), gl::INVALID_OPERATION);
    }

    #[test]
    fn destroying_the_context_drops_objects() {
        let d = driver();
        let b = d.gen_buffer();
        assert!(d.is_buffer(b));
        d.destroy_context();
        assert!(!d.is_buffer(b));
        assert_eq!(d.live_objects(), 0);
        assert_eq!(d.get_error(), gl::NO_ERROR);
    }

    #[test]
    fn armed_fault_fires_once() {
        let d = driver();
        d.fail_next("glGenBuffers", gl::OUT_OF_MEMORY);
        assert_eq!(d.gen_buffer(), 0);
        assert_eq!(d.get_error(), gl::OUT_OF_MEMORY);
        assert_ne!(d.gen_buffer(), 0);
        assert_eq!(d.call_count("glGenBuffers"), 2);
    }
}
