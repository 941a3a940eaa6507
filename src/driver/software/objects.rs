// Software driver object tables

use std::collections::{BTreeMap, BTreeSet, HashMap};

use glam::{UVec2, UVec3, Vec4};

use super::glsl::Reflection;
use super::kernel::{Kernel, UniformValue};
use super::Limits;
use crate::driver::{gl, NativeEnum, ObjectId};

pub(crate) struct BufferObject {
    /// Committed contents, u64 words so mapped pointers are 8-byte aligned
    pub(crate) words: Vec<u64>,
    pub(crate) len: usize,
    pub(crate) usage: NativeEnum,
    /// Storage writes not yet made visible by a memory barrier
    pub(crate) pending: Option<Vec<u64>>,
    pub(crate) mapped: Option<(usize, usize, u32)>,
}

impl BufferObject {
    pub(crate) fn new() -> Self {
        Self { words: Vec::new(), len: 0, usage: gl::STATIC_DRAW, pending: None, mapped: None }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }
}

pub(crate) fn words_for(len: usize) -> Vec<u64> {
    vec![0u64; len.div_ceil(8)]
}

#[derive(Default)]
pub(crate) struct TextureObject {
    pub(crate) target: Option<NativeEnum>,
    pub(crate) internal_format: NativeEnum,
    pub(crate) levels: BTreeMap<i32, UVec3>,
    pub(crate) samples: u32,
    /// Texel data per mip level; multisample storage keeps none
    pub(crate) data: BTreeMap<i32, Vec<u8>>,
    pub(crate) params_i: HashMap<NativeEnum, i32>,
    pub(crate) params_f: HashMap<NativeEnum, Vec<f32>>,
}

#[derive(Default)]
pub(crate) struct FramebufferObject {
    pub(crate) attachments: BTreeMap<NativeEnum, (ObjectId, i32)>,
    pub(crate) draw_buffers: Vec<NativeEnum>,
}

pub(crate) struct ShaderObject {
    pub(crate) stage: NativeEnum,
    pub(crate) source: String,
    pub(crate) compiled: bool,
    pub(crate) log: String,
    pub(crate) reflection: Option<Reflection>,
    pub(crate) kernel: Option<Kernel>,
}

#[derive(Clone)]
pub(crate) struct LinkedUniform {
    pub(crate) name: String,
    pub(crate) ty: String,
    pub(crate) array_len: u32,
}

#[derive(Clone)]
pub(crate) struct ComputeProgram {
    pub(crate) local_size: UVec3,
    pub(crate) kernel: Kernel,
}

#[derive(Clone, Default)]
pub(crate) struct LinkedProgram {
    /// Base location of every active uniform
    pub(crate) uniforms: BTreeMap<i32, LinkedUniform>,
    pub(crate) attributes: BTreeMap<String, u32>,
    pub(crate) storage_blocks: BTreeMap<String, u32>,
    pub(crate) compute: Option<ComputeProgram>,
    pub(crate) values: HashMap<i32, UniformValue>,
}

impl LinkedProgram {
    pub(crate) fn uniform_at(&self, location: i32) -> Option<(i32, &LinkedUniform)> {
        self.uniforms
            .range(..=location)
            .next_back()
            .filter(|(base, u)| location < **base + u.array_len as i32)
            .map(|(base, u)| (*base, u))
    }

    pub(crate) fn location_of(&self, name: &str) -> Option<i32> {
        let (base_name, element) = match name.strip_suffix(']').and_then(|n| n.split_once('[')) {
            Some((base, index)) => (base, index.parse::<i32>().ok()?),
            None => (name, 0),
        };
        self.uniforms
            .iter()
            .find(|(_, u)| u.name == base_name && element < u.array_len as i32)
            .map(|(base, _)| base + element)
    }
}

#[derive(Default)]
pub(crate) struct ProgramObject {
    pub(crate) attached: Vec<ObjectId>,
    pub(crate) log: String,
    pub(crate) linked: Option<LinkedProgram>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexAttrib {
    pub enabled: bool,
    pub buffer: ObjectId,
    pub size: i32,
    pub ty: NativeEnum,
    pub normalized: bool,
    pub stride: i32,
    pub offset: usize,
    pub divisor: u32,
}

#[derive(Default)]
pub(crate) struct VertexArrayObject {
    pub(crate) attribs: BTreeMap<u32, VertexAttrib>,
    pub(crate) element_buffer: ObjectId,
}

/// Fixed-function state, readable for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct RasterState {
    pub enabled: BTreeSet<NativeEnum>,
    pub blend_func: [NativeEnum; 4],
    pub blend_equation: [NativeEnum; 2],
    pub blend_color: Vec4,
    pub color_mask: [bool; 4],
    pub cull_face: NativeEnum,
    pub front_face: NativeEnum,
    pub polygon_mode: NativeEnum,
    pub polygon_offset: (f32, f32),
    pub depth_func: NativeEnum,
    pub depth_mask: bool,
    pub stencil_func: (NativeEnum, i32, u32),
    pub stencil_op: [NativeEnum; 3],
    pub stencil_mask: u32,
    pub sample_mask: u32,
    pub viewports: BTreeMap<u32, Vec4>,
    pub depth_ranges: BTreeMap<u32, (f32, f32)>,
    pub scissors: BTreeMap<u32, [i32; 4]>,
    pub clear_color: Vec4,
    pub clear_depth: f32,
    pub clear_stencil: i32,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            enabled: BTreeSet::from([gl::MULTISAMPLE]),
            blend_func: [gl::ONE, gl::ZERO, gl::ONE, gl::ZERO],
            blend_equation: [gl::FUNC_ADD, gl::FUNC_ADD],
            blend_color: Vec4::ZERO,
            color_mask: [true; 4],
            cull_face: gl::BACK,
            front_face: gl::CCW,
            polygon_mode: gl::FILL,
            polygon_offset: (0.0, 0.0),
            depth_func: gl::LESS,
            depth_mask: true,
            stencil_func: (gl::ALWAYS, 0, u32::MAX),
            stencil_op: [gl::KEEP; 3],
            stencil_mask: u32::MAX,
            sample_mask: u32::MAX,
            viewports: BTreeMap::new(),
            depth_ranges: BTreeMap::new(),
            scissors: BTreeMap::new(),
            clear_color: Vec4::ZERO,
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }
}

/// One accepted draw call
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub mode: NativeEnum,
    pub first: i32,
    pub count: i32,
    pub instances: i32,
    pub base_instance: u32,
    /// Index type, byte offset and base vertex of an indexed draw
    pub indexed: Option<(NativeEnum, usize, i32)>,
    pub program: ObjectId,
    pub vertex_array: ObjectId,
    pub framebuffer: ObjectId,
    /// Textures receiving output, in draw-buffer order
    pub targets: Vec<ObjectId>,
}

/// One accepted clear
#[derive(Debug, Clone, PartialEq)]
pub struct ClearRecord {
    pub mask: u32,
    pub color: Vec4,
    pub depth: f32,
    pub stencil: i32,
    pub framebuffer: ObjectId,
    pub scissor: Option<[i32; 4]>,
}

pub(crate) struct ContextState {
    pub(crate) size: UVec2,
    pub(crate) windowed: bool,
}

#[derive(Default)]
pub(crate) struct State {
    pub(crate) context: Option<ContextState>,
    pub(crate) error: NativeEnum,
    pub(crate) next_id: ObjectId,
    pub(crate) limits: Limits,

    pub(crate) buffers: HashMap<ObjectId, BufferObject>,
    pub(crate) textures: HashMap<ObjectId, TextureObject>,
    pub(crate) framebuffers: HashMap<ObjectId, FramebufferObject>,
    pub(crate) shaders: HashMap<ObjectId, ShaderObject>,
    pub(crate) programs: HashMap<ObjectId, ProgramObject>,
    pub(crate) vertex_arrays: HashMap<ObjectId, VertexArrayObject>,

    pub(crate) buffer_bindings: HashMap<NativeEnum, ObjectId>,
    pub(crate) indexed_buffers: HashMap<(NativeEnum, u32), ObjectId>,
    pub(crate) texture_units: HashMap<(u32, NativeEnum), ObjectId>,
    pub(crate) active_unit: u32,
    pub(crate) draw_framebuffer: ObjectId,
    pub(crate) read_framebuffer: ObjectId,
    pub(crate) default_draw_buffers: Vec<NativeEnum>,
    pub(crate) program: ObjectId,
    pub(crate) vertex_array: ObjectId,
    pub(crate) raster: RasterState,

    pub(crate) draws: Vec<DrawRecord>,
    pub(crate) clears: Vec<ClearRecord>,
    pub(crate) dispatches: usize,
    pub(crate) calls: HashMap<&'static str, usize>,
    pub(crate) faults: HashMap<&'static str, NativeEnum>,
}

impl State {
    /// Record an error; the first one raised since the last query wins
    pub(crate) fn raise(&mut self, code: NativeEnum) {
        if self.error == gl::NO_ERROR {
            self.error = code;
        }
    }

    pub(crate) fn fail<T>(&mut self, code: NativeEnum, value: T) -> T {
        self.raise(code);
        value
    }

    pub(crate) fn allocate_id(&mut self) -> Option<ObjectId> {
        let live = self.buffers.len()
            + self.textures.len()
            + self.framebuffers.len()
            + self.shaders.len()
            + self.programs.len()
            + self.vertex_arrays.len();
        if live >= self.limits.max_objects {
            self.raise(gl::OUT_OF_MEMORY);
            return None;
        }
        self.next_id += 1;
        Some(self.next_id)
    }

    /// Drop every object and binding, keeping limits, counters and armed faults
    pub(crate) fn reset_objects(&mut self) {
        let limits = self.limits.clone();
        let calls = std::mem::take(&mut self.calls);
        let faults = std::mem::take(&mut self.faults);
        let next_id = self.next_id;
        *self = State { limits, calls, faults, next_id, ..State::default() };
    }

    pub(crate) fn bound_buffer(&self, target: NativeEnum) -> ObjectId {
        if target == gl::ELEMENT_ARRAY_BUFFER && self.vertex_array != 0 {
            return self.vertex_arrays.get(&self.vertex_array).map_or(0, |v| v.element_buffer);
        }
        self.buffer_bindings.get(&target).copied().unwrap_or(0)
    }

    pub(crate) fn bound_texture(&self, target: NativeEnum) -> ObjectId {
        self.texture_units.get(&(self.active_unit, target)).copied().unwrap_or(0)
    }

    pub(crate) fn framebuffer_for(&self, target: NativeEnum) -> Option<ObjectId> {
        match target {
            gl::FRAMEBUFFER | gl::DRAW_FRAMEBUFFER => Some(self.draw_framebuffer),
            gl::READ_FRAMEBUFFER => Some(self.read_framebuffer),
            _ => None,
        }
    }

    pub(crate) fn framebuffer_status(&self, id: ObjectId) -> NativeEnum {
        if id == 0 {
            return gl::FRAMEBUFFER_COMPLETE;
        }
        let Some(fb) = self.framebuffers.get(&id) else {
            return gl::FRAMEBUFFER_UNSUPPORTED;
        };
        if fb.attachments.is_empty() {
            return gl::FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT;
        }

        let mut samples = None;
        for (&attachment, &(texture, level)) in &fb.attachments {
            let Some(tex) = self.textures.get(&texture) else {
                return gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT;
            };
            if !tex.levels.contains_key(&level) {
                return gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT;
            }
            let Some(class) = format_class(tex.internal_format) else {
                return gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT;
            };
            let compatible = match attachment {
                gl::DEPTH_ATTACHMENT => matches!(class, FormatClass::Depth | FormatClass::DepthStencil),
                gl::STENCIL_ATTACHMENT => matches!(class, FormatClass::Stencil | FormatClass::DepthStencil),
                gl::DEPTH_STENCIL_ATTACHMENT => class == FormatClass::DepthStencil,
                _ => class == FormatClass::Color,
            };
            if !compatible {
                return gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT;
            }
            match samples {
                None => samples = Some(tex.samples),
                Some(s) if s != tex.samples => return gl::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE,
                Some(_) => {}
            }
        }
        gl::FRAMEBUFFER_COMPLETE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FormatClass {
    Color,
    Depth,
    Stencil,
    DepthStencil,
}

pub(crate) fn format_class(internal_format: NativeEnum) -> Option<FormatClass> {
    format_info(internal_format).map(|(class, _)| class)
}

/// Renderability class and bytes per texel of an internal format
pub(crate) fn format_info(internal_format: NativeEnum) -> Option<(FormatClass, u32)> {
    use FormatClass::*;
    Some(match internal_format {
        gl::R8 => (Color, 1),
        gl::RG8 => (Color, 2),
        gl::RGBA8 | gl::SRGB8_ALPHA8 | gl::RGB10_A2 => (Color, 4),
        gl::R16F => (Color, 2),
        gl::RG16F => (Color, 4),
        gl::RGBA16F => (Color, 8),
        gl::R32F | gl::R32I | gl::R32UI => (Color, 4),
        gl::RGBA32F => (Color, 16),
        gl::DEPTH_COMPONENT16 => (Depth, 2),
        gl::DEPTH_COMPONENT32F => (Depth, 4),
        gl::DEPTH24_STENCIL8 => (DepthStencil, 4),
        gl::DEPTH32F_STENCIL8 => (DepthStencil, 8),
        gl::STENCIL_INDEX8 => (Stencil, 1),
        _ => return None,
    })
}
