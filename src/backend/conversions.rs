// Abstract-to-native lookup tables
//
// Each table is indexed by the ordinal of the abstract enum.

use super::types::{
    AccessFlags, AddressMode, BarrierFlags, BlendFactor, BlendOp, BufferUsage, ClearFlags, Comparison, CullMode,
    FillMode, Filter, IndexFormat, PixelFormat, Primitive, ShaderStage, ShaderType, StencilOp, TextureUsage,
};
use crate::driver::{gl, NativeEnum};

const SHADER_STAGES: [NativeEnum; ShaderStage::COUNT] = [
    gl::FRAGMENT_SHADER,
    gl::VERTEX_SHADER,
    gl::GEOMETRY_SHADER,
    gl::TESS_CONTROL_SHADER,
    gl::TESS_EVALUATION_SHADER,
    gl::COMPUTE_SHADER,
    gl::MESH_SHADER,
    gl::TASK_SHADER,
];

const BUFFER_TARGETS: [NativeEnum; 5] = [
    gl::ARRAY_BUFFER,
    gl::ELEMENT_ARRAY_BUFFER,
    gl::UNIFORM_BUFFER,
    gl::SHADER_STORAGE_BUFFER,
    gl::DRAW_INDIRECT_BUFFER,
];

const TEXTURE_TARGETS: [NativeEnum; 5] = [
    gl::TEXTURE_1D,
    gl::TEXTURE_2D,
    gl::TEXTURE_3D,
    gl::TEXTURE_2D_ARRAY,
    gl::TEXTURE_2D_MULTISAMPLE,
];

/// Native description of a pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub internal: NativeEnum,
    pub layout: NativeEnum,
    pub component: NativeEnum,
    pub bytes_per_pixel: u32,
}

const fn fmt(internal: NativeEnum, layout: NativeEnum, component: NativeEnum, bytes_per_pixel: u32) -> FormatInfo {
    FormatInfo { internal, layout, component, bytes_per_pixel }
}

const FORMATS: [FormatInfo; 18] = [
    fmt(gl::R8, gl::RED, gl::UNSIGNED_BYTE, 1),
    fmt(gl::RG8, gl::RG, gl::UNSIGNED_BYTE, 2),
    fmt(gl::RGBA8, gl::RGBA, gl::UNSIGNED_BYTE, 4),
    fmt(gl::SRGB8_ALPHA8, gl::RGBA, gl::UNSIGNED_BYTE, 4),
    fmt(gl::RGBA8, gl::BGRA, gl::UNSIGNED_BYTE, 4),
    fmt(gl::RGB10_A2, gl::RGBA, gl::UNSIGNED_INT_2_10_10_10_REV, 4),
    fmt(gl::R16F, gl::RED, gl::HALF_FLOAT, 2),
    fmt(gl::RG16F, gl::RG, gl::HALF_FLOAT, 4),
    fmt(gl::RGBA16F, gl::RGBA, gl::HALF_FLOAT, 8),
    fmt(gl::R32F, gl::RED, gl::FLOAT, 4),
    fmt(gl::RGBA32F, gl::RGBA, gl::FLOAT, 16),
    fmt(gl::R32I, gl::RED_INTEGER, gl::INT, 4),
    fmt(gl::R32UI, gl::RED_INTEGER, gl::UNSIGNED_INT, 4),
    fmt(gl::DEPTH_COMPONENT16, gl::DEPTH_COMPONENT, gl::UNSIGNED_SHORT, 2),
    fmt(gl::DEPTH24_STENCIL8, gl::DEPTH_STENCIL, gl::UNSIGNED_INT_24_8, 4),
    fmt(gl::DEPTH_COMPONENT32F, gl::DEPTH_COMPONENT, gl::FLOAT, 4),
    fmt(gl::DEPTH32F_STENCIL8, gl::DEPTH_STENCIL, gl::FLOAT_32_UNSIGNED_INT_24_8_REV, 8),
    fmt(gl::STENCIL_INDEX8, gl::STENCIL_INDEX, gl::UNSIGNED_BYTE, 1),
];

// Index 0 is `Disabled`, which callers handle before looking up
const COMPARISONS: [NativeEnum; 9] = [
    gl::ALWAYS,
    gl::NEVER,
    gl::LESS,
    gl::EQUAL,
    gl::LEQUAL,
    gl::GREATER,
    gl::NOTEQUAL,
    gl::GEQUAL,
    gl::ALWAYS,
];

const BLEND_FACTORS: [NativeEnum; 17] = [
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

const BLEND_OPS: [NativeEnum; 5] =
    [gl::FUNC_ADD, gl::FUNC_SUBTRACT, gl::FUNC_REVERSE_SUBTRACT, gl::MIN, gl::MAX];

const STENCIL_OPS: [NativeEnum; 8] =
    [gl::KEEP, gl::ZERO, gl::REPLACE, gl::INCR, gl::DECR, gl::INVERT, gl::INCR_WRAP, gl::DECR_WRAP];

const FILL_MODES: [NativeEnum; 3] = [gl::FILL, gl::LINE, gl::POINT];

const PRIMITIVES: [NativeEnum; 5] = [gl::POINTS, gl::LINES, gl::TRIANGLES, gl::LINE_STRIP, gl::TRIANGLE_STRIP];

const ADDRESS_MODES: [NativeEnum; 5] =
    [gl::REPEAT, gl::MIRRORED_REPEAT, gl::CLAMP_TO_EDGE, gl::CLAMP_TO_BORDER, gl::MIRROR_CLAMP_TO_EDGE];

const INDEX_TYPES: [NativeEnum; 3] = [gl::UNSIGNED_BYTE, gl::UNSIGNED_SHORT, gl::UNSIGNED_INT];

impl ShaderStage {
    pub fn native(self) -> NativeEnum {
        SHADER_STAGES[self as usize]
    }
}

impl BufferUsage {
    pub fn target(self) -> NativeEnum {
        BUFFER_TARGETS[self as usize]
    }

    /// Target used to upload or map the buffer.
    ///
    /// The element binding is vertex array state, so index buffers go through
    /// the copy-write slot instead of disturbing whichever array is bound.
    pub fn bind_target(self) -> NativeEnum {
        match self {
            BufferUsage::Index => gl::COPY_WRITE_BUFFER,
            _ => self.target(),
        }
    }
}

impl TextureUsage {
    pub fn target(self) -> NativeEnum {
        TEXTURE_TARGETS[self as usize]
    }
}

impl PixelFormat {
    pub fn info(self) -> FormatInfo {
        FORMATS[self as usize]
    }
}

impl Comparison {
    /// `None` when the test is disabled
    pub fn native(self) -> Option<NativeEnum> {
        match self {
            Comparison::Disabled => None,
            other => Some(COMPARISONS[other as usize]),
        }
    }
}

impl BlendFactor {
    pub fn native(self) -> NativeEnum {
        BLEND_FACTORS[self as usize]
    }
}

impl BlendOp {
    pub fn native(self) -> NativeEnum {
        BLEND_OPS[self as usize]
    }
}

impl StencilOp {
    pub fn native(self) -> NativeEnum {
        STENCIL_OPS[self as usize]
    }
}

impl FillMode {
    pub fn native(self) -> NativeEnum {
        FILL_MODES[self as usize]
    }
}

impl CullMode {
    /// `None` when culling is off
    pub fn native(self) -> Option<NativeEnum> {
        match self {
            CullMode::None => None,
            CullMode::Front => Some(gl::FRONT),
            CullMode::Back => Some(gl::BACK),
        }
    }
}

impl Primitive {
    pub fn native(self) -> NativeEnum {
        PRIMITIVES[self as usize]
    }
}

impl AddressMode {
    pub fn native(self) -> NativeEnum {
        ADDRESS_MODES[self as usize]
    }
}

impl IndexFormat {
    pub fn native(self) -> NativeEnum {
        INDEX_TYPES[self as usize]
    }
}

impl ShaderType {
    /// Component type and normalization of a vertex attribute of this type
    pub fn vertex_native(self) -> Option<(NativeEnum, bool)> {
        match self {
            ShaderType::Half => Some((gl::HALF_FLOAT, false)),
            ShaderType::Float => Some((gl::FLOAT, false)),
            ShaderType::Double => Some((gl::DOUBLE, false)),
            ShaderType::Int => Some((gl::INT, false)),
            ShaderType::UInt => Some((gl::UNSIGNED_INT, false)),
            ShaderType::Color32 => Some((gl::UNSIGNED_BYTE, true)),
            ShaderType::Texture | ShaderType::TexCube => None,
        }
    }
}

impl Filter {
    pub fn native_min(self) -> NativeEnum {
        match (self.contains(Filter::MIN_LINEAR), self.contains(Filter::MIP_LINEAR)) {
            (false, false) => gl::NEAREST,
            (true, false) => gl::LINEAR,
            (false, true) => gl::NEAREST_MIPMAP_LINEAR,
            (true, true) => gl::LINEAR_MIPMAP_LINEAR,
        }
    }

    pub fn native_mag(self) -> NativeEnum {
        if self.contains(Filter::MAG_LINEAR) {
            gl::LINEAR
        } else {
            gl::NEAREST
        }
    }
}

impl BarrierFlags {
    pub fn native(self) -> u32 {
        const BITS: [(BarrierFlags, u32); 11] = [
            (BarrierFlags::VERTEX_ATTRIB, gl::VERTEX_ATTRIB_ARRAY_BARRIER_BIT),
            (BarrierFlags::INDEX, gl::ELEMENT_ARRAY_BARRIER_BIT),
            (BarrierFlags::UNIFORM, gl::UNIFORM_BARRIER_BIT),
            (BarrierFlags::TEXTURE_FETCH, gl::TEXTURE_FETCH_BARRIER_BIT),
            (BarrierFlags::SHADER_IMAGE, gl::SHADER_IMAGE_ACCESS_BARRIER_BIT),
            (BarrierFlags::COMMAND, gl::COMMAND_BARRIER_BIT),
            (BarrierFlags::TEXTURE_UPDATE, gl::TEXTURE_UPDATE_BARRIER_BIT),
            (BarrierFlags::BUFFER_UPDATE, gl::BUFFER_UPDATE_BARRIER_BIT),
            (BarrierFlags::FRAMEBUFFER, gl::FRAMEBUFFER_BARRIER_BIT),
            (BarrierFlags::MAPPED_BUFFER, gl::CLIENT_MAPPED_BUFFER_BARRIER_BIT),
            (BarrierFlags::STORAGE_BUFFER, gl::SHADER_STORAGE_BARRIER_BIT),
        ];
        if self.is_all() {
            return gl::ALL_BARRIER_BITS;
        }
        BITS.iter().filter(|(flag, _)| self.contains(*flag)).fold(0, |acc, (_, bit)| acc | bit)
    }
}

impl AccessFlags {
    pub fn native(self) -> u32 {
        let mut bits = 0;
        if self.contains(AccessFlags::READ) {
            bits |= gl::MAP_READ_BIT;
        }
        if self.contains(AccessFlags::WRITE) {
            bits |= gl::MAP_WRITE_BIT;
        }
        if self.contains(AccessFlags::PERSISTENT) {
            bits |= gl::MAP_PERSISTENT_BIT;
        }
        if self.contains(AccessFlags::INVALIDATE_RANGE) {
            bits |= gl::MAP_INVALIDATE_RANGE_BIT;
        }
        if self.contains(AccessFlags::INVALIDATE_BUFFER) {
            bits |= gl::MAP_INVALIDATE_BUFFER_BIT;
        }
        if self.contains(AccessFlags::UNSYNCHRONIZED) {
            bits |= gl::MAP_UNSYNCHRONIZED_BIT;
        }
        bits
    }
}

impl ClearFlags {
    pub fn native(self) -> u32 {
        let mut bits = 0;
        if self.contains(ClearFlags::COLOR) {
            bits |= gl::COLOR_BUFFER_BIT;
        }
        if self.contains(ClearFlags::DEPTH) {
            bits |= gl::DEPTH_BUFFER_BIT;
        }
        if self.contains(ClearFlags::STENCIL) {
            bits |= gl::STENCIL_BUFFER_BIT;
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_format_is_known_to_the_driver_tables() {
        for format in PixelFormat::ALL {
            let info = format.info();
            assert!(info.bytes_per_pixel > 0, "{format:?}");
            assert_ne!(info.internal, 0, "{format:?}");
        }
        assert_eq!(PixelFormat::B8G8R8A8Unorm.info().layout, gl::BGRA);
    }

    #[test]
    fn storage_barrier_maps_to_shader_storage_bit() {
        assert_eq!(BarrierFlags::STORAGE_BUFFER.native(), gl::SHADER_STORAGE_BARRIER_BIT);
        assert_eq!(BarrierFlags::all().native(), gl::ALL_BARRIER_BITS);
        assert_eq!(
            (BarrierFlags::UNIFORM | BarrierFlags::BUFFER_UPDATE).native(),
            gl::UNIFORM_BARRIER_BIT | gl::BUFFER_UPDATE_BARRIER_BIT
        );
    }

    #[test]
    fn filter_selects_mip_variants() {
        assert_eq!(Filter::POINT.native_min(), gl::NEAREST);
        assert_eq!(Filter::LINEAR.native_min(), gl::LINEAR_MIPMAP_LINEAR);
        assert_eq!(Filter::MIN_LINEAR.native_min(), gl::LINEAR);
        assert_eq!(Filter::LINEAR.native_mag(), gl::LINEAR);
    }

    #[test]
    fn disabled_comparison_has_no_native_value() {
        assert_eq!(Comparison::Disabled.native(), None);
        assert_eq!(Comparison::LessEqual.native(), Some(gl::LEQUAL));
        assert_eq!(CullMode::None.native(), None);
    }
}
