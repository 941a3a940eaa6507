// Backend description types
//
// Abstract enums the host passes in. Every enum is contiguous from zero so the
// native lookup in `conversions` is a direct index.

use bitflags::bitflags;
use glam::Vec4;

/// Checked decode of the `u8` code a C host passes for an enum
macro_rules! decode_codes {
    ($($ty:ident: [$($variant:ident),+ $(,)?];)+) => {$(
        impl $ty {
            pub fn from_code(code: u8) -> Option<Self> {
                [$($ty::$variant),+].get(code as usize).copied()
            }
        }
    )+};
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Pixel = 0,
    Vertex,
    Geometry,
    Hull,
    Domain,
    Compute,
    Mesh,
    Task,
}

impl ShaderStage {
    pub const COUNT: usize = 8;
    pub const ALL: [ShaderStage; Self::COUNT] = [
        ShaderStage::Pixel,
        ShaderStage::Vertex,
        ShaderStage::Geometry,
        ShaderStage::Hull,
        ShaderStage::Domain,
        ShaderStage::Compute,
        ShaderStage::Mesh,
        ShaderStage::Task,
    ];

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

/// What a buffer is bound as when it is created and mapped
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex = 0,
    Index,
    Uniform,
    Storage,
    Indirect,
}

impl BufferUsage {
    pub const ALL: [BufferUsage; 5] =
        [BufferUsage::Vertex, BufferUsage::Index, BufferUsage::Uniform, BufferUsage::Storage, BufferUsage::Indirect];
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    Texture1D = 0,
    Texture2D,
    Texture3D,
    Texture2DArray,
    /// Multisampled 2D render target; no initial data and no sampler
    Multisample,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8Unorm = 0,
    R8G8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8UnormSrgb,
    B8G8R8A8Unorm,
    R10G10B10A2Unorm,
    R16Float,
    R16G16Float,
    R16G16B16A16Float,
    R32Float,
    R32G32B32A32Float,
    R32Int,
    R32Uint,
    D16Unorm,
    D24UnormS8Uint,
    D32Float,
    D32FloatS8X24Uint,
    S8Uint,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 18] = [
        PixelFormat::R8Unorm,
        PixelFormat::R8G8Unorm,
        PixelFormat::R8G8B8A8Unorm,
        PixelFormat::R8G8B8A8UnormSrgb,
        PixelFormat::B8G8R8A8Unorm,
        PixelFormat::R10G10B10A2Unorm,
        PixelFormat::R16Float,
        PixelFormat::R16G16Float,
        PixelFormat::R16G16B16A16Float,
        PixelFormat::R32Float,
        PixelFormat::R32G32B32A32Float,
        PixelFormat::R32Int,
        PixelFormat::R32Uint,
        PixelFormat::D16Unorm,
        PixelFormat::D24UnormS8Uint,
        PixelFormat::D32Float,
        PixelFormat::D32FloatS8X24Uint,
        PixelFormat::S8Uint,
    ];

    pub fn has_depth(self) -> bool {
        matches!(
            self,
            PixelFormat::D16Unorm | PixelFormat::D24UnormS8Uint | PixelFormat::D32Float | PixelFormat::D32FloatS8X24Uint
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, PixelFormat::D24UnormS8Uint | PixelFormat::D32FloatS8X24Uint | PixelFormat::S8Uint)
    }

    pub fn is_color(self) -> bool {
        !self.has_depth() && !self.has_stencil()
    }

    /// Parse the config-file spelling, e.g. `"rgba8"` or `"d24s8"`
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "r8" => PixelFormat::R8Unorm,
            "rg8" => PixelFormat::R8G8Unorm,
            "rgba8" => PixelFormat::R8G8B8A8Unorm,
            "rgba8_srgb" | "srgb8_alpha8" => PixelFormat::R8G8B8A8UnormSrgb,
            "bgra8" => PixelFormat::B8G8R8A8Unorm,
            "rgb10a2" => PixelFormat::R10G10B10A2Unorm,
            "r16f" => PixelFormat::R16Float,
            "rg16f" => PixelFormat::R16G16Float,
            "rgba16f" => PixelFormat::R16G16B16A16Float,
            "r32f" => PixelFormat::R32Float,
            "rgba32f" => PixelFormat::R32G32B32A32Float,
            "r32i" => PixelFormat::R32Int,
            "r32ui" => PixelFormat::R32Uint,
            "d16" => PixelFormat::D16Unorm,
            "d24s8" => PixelFormat::D24UnormS8Uint,
            "d32f" => PixelFormat::D32Float,
            "d32fs8" => PixelFormat::D32FloatS8X24Uint,
            "s8" => PixelFormat::S8Uint,
            _ => return None,
        })
    }
}

/// Comparison function; `Disabled` turns the corresponding test off
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Comparison {
    #[default]
    Disabled = 0,
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero = 0,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DestAlpha,
    InvDestAlpha,
    DestColor,
    InvDestColor,
    SrcAlphaSat,
    BlendFactor,
    InvBlendFactor,
    Src1Color,
    InvSrc1Color,
    Src1Alpha,
    InvSrc1Alpha,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add = 0,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilOp {
    #[default]
    Keep = 0,
    Zero,
    Replace,
    IncrSat,
    DecrSat,
    Invert,
    Incr,
    Decr,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Fill = 0,
    Line,
    Point,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None = 0,
    Front,
    Back,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Primitive {
    Point = 0,
    Line,
    #[default]
    Triangle,
    LineStrip,
    TriangleStrip,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    Wrap = 0,
    Mirror,
    Clamp,
    Border,
    MirrorOnce,
}

/// Element type of a shader parameter or vertex attribute
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderType {
    Half = 0,
    Float,
    Double,
    Int,
    UInt,
    /// Packed 8-bit RGBA, normalized when read as a vertex attribute
    Color32,
    Texture,
    TexCube,
}

impl ShaderType {
    /// Bytes per component in vertex data
    pub fn component_size(self) -> Option<u32> {
        match self {
            ShaderType::Half => Some(2),
            ShaderType::Float | ShaderType::Int | ShaderType::UInt => Some(4),
            ShaderType::Double => Some(8),
            ShaderType::Color32 => Some(1),
            ShaderType::Texture | ShaderType::TexCube => None,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    U8 = 0,
    U16,
    U32,
}

impl IndexFormat {
    pub fn size(self) -> usize {
        match self {
            IndexFormat::U8 => 1,
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

bitflags! {
    /// Which fields of a pipeline description are meaningful
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineMembers: u64 {
        const PRIMITIVE = 1 << 0;
        const STENCIL_REF = 1 << 1;
        const INDEX_BUFFER = 1 << 2;
        const BLEND_FACTOR = 1 << 3;
        const FLAGS = 1 << 11;
        const SAMPLE_MASK = 1 << 12;
        const STENCIL_READ_MASK = 1 << 13;
        const STENCIL_WRITE_MASK = 1 << 14;
        const DEPTH_FUNC = 1 << 15;
        const FILL = 1 << 19;
        const CULL = 1 << 20;
        const DEPTH_BIAS = 1 << 21;
        const SLOPE_SCALED_BIAS = 1 << 23;
        const STENCIL = 1 << 25;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineFlags: u16 {
        const ALPHA_TO_COVERAGE = 1 << 0;
        const INDEPENDENT_BLEND = 1 << 1;
        const DEPTH_WRITE = 1 << 4;
        const CONSERVATIVE_RASTER = 1 << 5;
        const FRONT_COUNTER_CLOCKWISE = 1 << 6;
        const DEPTH_CLIP = 1 << 7;
        const MULTISAMPLE = 1 << 8;
        const ANTIALIASED_LINE = 1 << 9;
        const TOOL_DEBUG = 1 << 10;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const ALL = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

bitflags! {
    /// Resource classes a barrier makes prior writes visible to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BarrierFlags: u32 {
        const VERTEX_ATTRIB = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const TEXTURE_FETCH = 1 << 3;
        const SHADER_IMAGE = 1 << 4;
        const COMMAND = 1 << 5;
        const TEXTURE_UPDATE = 1 << 6;
        const BUFFER_UPDATE = 1 << 7;
        const FRAMEBUFFER = 1 << 8;
        const MAPPED_BUFFER = 1 << 9;
        const STORAGE_BUFFER = 1 << 10;
    }
}

bitflags! {
    /// CPU access requested when mapping a buffer
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const PERSISTENT = 1 << 2;
        const INVALIDATE_RANGE = 1 << 3;
        const INVALIDATE_BUFFER = 1 << 4;
        const UNSYNCHRONIZED = 1 << 5;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u8 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

bitflags! {
    /// Packed sampler filter code: one bit per linear stage plus the
    /// anisotropic and comparison modifiers
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Filter: u8 {
        const MIP_LINEAR = 0x01;
        const MAG_LINEAR = 0x04;
        const MIN_LINEAR = 0x10;
        const ANISOTROPIC = 0x40;
        const COMPARISON = 0x80;
    }
}

impl Filter {
    pub const POINT: Filter = Filter::empty();
    pub const LINEAR: Filter = Filter::MIN_LINEAR.union(Filter::MAG_LINEAR).union(Filter::MIP_LINEAR);

    /// Decode the 8-bit code hosts pass over the C boundary
    pub fn from_code(code: u8) -> Self {
        Filter::from_bits_truncate(code)
    }

    pub fn code(self) -> u8 {
        self.bits()
    }

    pub fn is_anisotropic(self) -> bool {
        self.contains(Filter::ANISOTROPIC)
    }

    pub fn is_comparison(self) -> bool {
        self.contains(Filter::COMPARISON)
    }
}

/// Sampling state applied to a texture right after its image upload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampler {
    pub filter: Filter,
    pub addressing: [AddressMode; 3],
    pub max_anisotropy: u8,
    pub comparison: Comparison,
    pub mip_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: Vec4,
}

impl Default for Sampler {
    fn default() -> Self {
        Self {
            filter: Filter::LINEAR,
            addressing: [AddressMode::Wrap; 3],
            max_anisotropy: 1,
            comparison: Comparison::Disabled,
            mip_bias: 0.0,
            min_lod: -1000.0,
            max_lod: 1000.0,
            border_color: Vec4::ZERO,
        }
    }
}

/// Blend equation of the render targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Blend {
    pub src: BlendFactor,
    pub dest: BlendFactor,
    pub op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dest_alpha: BlendFactor,
    pub op_alpha: BlendOp,
    pub write_mask: ColorMask,
}

impl Blend {
    /// Source replaces destination
    pub const REPLACE: Blend = Blend {
        src: BlendFactor::One,
        dest: BlendFactor::Zero,
        op: BlendOp::Add,
        src_alpha: BlendFactor::One,
        dest_alpha: BlendFactor::Zero,
        op_alpha: BlendOp::Add,
        write_mask: ColorMask::ALL,
    };

    pub const PREMULTIPLIED: Blend = Blend {
        src: BlendFactor::One,
        dest: BlendFactor::InvSrcAlpha,
        op: BlendOp::Add,
        src_alpha: BlendFactor::One,
        dest_alpha: BlendFactor::InvSrcAlpha,
        op_alpha: BlendOp::Add,
        write_mask: ColorMask::ALL,
    };

    /// Whether blending has to be switched on to express this equation
    pub fn is_enabled(&self) -> bool {
        let replace = Blend { write_mask: self.write_mask, ..Blend::REPLACE };
        *self != replace
    }
}

impl Default for Blend {
    fn default() -> Self {
        Blend::REPLACE
    }
}

/// Named shader input: a vertex attribute or a shader constant.
///
/// An element is `width` columns of `length` components each, so a `vec3` is
/// length 3 width 1 and a `mat4` is length 4 width 4. `index` is the vertex
/// buffer slot for attributes, the texture unit for textures and the binding
/// point for buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderParameter<'a> {
    pub name: &'a str,
    pub ty: ShaderType,
    pub length: u32,
    pub width: u32,
    pub index: u32,
    /// Byte offset of the first element inside a vertex
    pub offset: u32,
    /// Instance step rate; 0 advances per vertex
    pub step: u32,
}

impl<'a> ShaderParameter<'a> {
    pub fn new(name: &'a str, ty: ShaderType, length: u32) -> Self {
        Self { name, ty, length, width: 1, index: 0, offset: 0, step: 0 }
    }

    pub fn matrix(name: &'a str, rows: u32, columns: u32) -> Self {
        Self { width: columns, ..Self::new(name, ShaderType::Float, rows) }
    }

    pub fn texture(name: &'a str, unit: u32) -> Self {
        Self { index: unit, ..Self::new(name, ShaderType::Texture, 1) }
    }

    /// Source vertex buffer slot and byte offset of an attribute
    pub fn at(self, index: u32, offset: u32) -> Self {
        Self { index, offset, ..self }
    }

    pub fn per_instance(self, step: u32) -> Self {
        Self { step, ..self }
    }

    /// Scalars in one element
    pub fn components(&self) -> u32 {
        self.length * self.width
    }
}

decode_codes! {
    TextureUsage: [Texture1D, Texture2D, Texture3D, Texture2DArray, Multisample];
    Comparison: [Disabled, Never, Less, Equal, LessEqual, Greater, NotEqual, GreaterEqual, Always];
    BlendFactor: [
        Zero, One, SrcColor, InvSrcColor, SrcAlpha, InvSrcAlpha, DestAlpha, InvDestAlpha, DestColor,
        InvDestColor, SrcAlphaSat, BlendFactor, InvBlendFactor, Src1Color, InvSrc1Color, Src1Alpha, InvSrc1Alpha,
    ];
    BlendOp: [Add, Subtract, RevSubtract, Min, Max];
    StencilOp: [Keep, Zero, Replace, IncrSat, DecrSat, Invert, Incr, Decr];
    FillMode: [Fill, Line, Point];
    CullMode: [None, Front, Back];
    Primitive: [Point, Line, Triangle, LineStrip, TriangleStrip];
    AddressMode: [Wrap, Mirror, Clamp, Border, MirrorOnce];
    ShaderType: [Half, Float, Double, Int, UInt, Color32, Texture, TexCube];
    IndexFormat: [U8, U16, U32];
}

impl BufferUsage {
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

impl PixelFormat {
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_codes_decode() {
        assert_eq!(Filter::from_code(0x15), Filter::LINEAR);
        let aniso = Filter::from_code(0xd5);
        assert!(aniso.is_anisotropic());
        assert!(aniso.is_comparison());
        assert_eq!(Filter::from_code(0x04), Filter::MAG_LINEAR);
    }

    #[test]
    fn enum_codes_match_discriminants() {
        assert_eq!(Comparison::from_code(Comparison::Always as u8), Some(Comparison::Always));
        assert_eq!(BlendFactor::from_code(BlendFactor::InvSrc1Alpha as u8), Some(BlendFactor::InvSrc1Alpha));
        assert_eq!(ShaderType::from_code(ShaderType::TexCube as u8), Some(ShaderType::TexCube));
        assert_eq!(PixelFormat::from_code(PixelFormat::S8Uint as u8), Some(PixelFormat::S8Uint));
        assert_eq!(CullMode::from_code(3), None);
        assert_eq!(BufferUsage::from_code(200), None);
    }

    #[test]
    fn replace_blend_needs_no_blending() {
        assert!(!Blend::REPLACE.is_enabled());
        assert!(!Blend { write_mask: ColorMask::RED, ..Blend::REPLACE }.is_enabled());
        assert!(Blend::PREMULTIPLIED.is_enabled());
    }

    #[test]
    fn pixel_format_names() {
        assert_eq!(PixelFormat::from_name("RGBA8"), Some(PixelFormat::R8G8B8A8Unorm));
        assert_eq!(PixelFormat::from_name("d24s8"), Some(PixelFormat::D24UnormS8Uint));
        assert_eq!(PixelFormat::from_name("yuv"), None);
        assert!(PixelFormat::D24UnormS8Uint.has_stencil());
        assert!(!PixelFormat::R32Float.has_depth());
    }
}
