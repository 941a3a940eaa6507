// Native enum values
//
// The driver seam speaks the GL numbering so a real GL binding can be dropped in
// behind `Driver` without a translation table of its own.

use super::NativeEnum;

// Errors
pub const NO_ERROR: NativeEnum = 0;
pub const INVALID_ENUM: NativeEnum = 0x0500;
pub const INVALID_VALUE: NativeEnum = 0x0501;
pub const INVALID_OPERATION: NativeEnum = 0x0502;
pub const OUT_OF_MEMORY: NativeEnum = 0x0505;
pub const INVALID_FRAMEBUFFER_OPERATION: NativeEnum = 0x0506;

pub const FALSE: i32 = 0;
pub const TRUE: i32 = 1;
pub const NONE: NativeEnum = 0;

// Buffer targets
pub const ARRAY_BUFFER: NativeEnum = 0x8892;
pub const ELEMENT_ARRAY_BUFFER: NativeEnum = 0x8893;
pub const UNIFORM_BUFFER: NativeEnum = 0x8A11;
pub const SHADER_STORAGE_BUFFER: NativeEnum = 0x90D2;
pub const COPY_READ_BUFFER: NativeEnum = 0x8F36;
pub const COPY_WRITE_BUFFER: NativeEnum = 0x8F37;
pub const DRAW_INDIRECT_BUFFER: NativeEnum = 0x8F3F;

// Buffer usage hints
pub const STATIC_DRAW: NativeEnum = 0x88E4;
pub const DYNAMIC_DRAW: NativeEnum = 0x88E8;

// Map access bits
pub const MAP_READ_BIT: u32 = 0x0001;
pub const MAP_WRITE_BIT: u32 = 0x0002;
pub const MAP_INVALIDATE_RANGE_BIT: u32 = 0x0004;
pub const MAP_INVALIDATE_BUFFER_BIT: u32 = 0x0008;
pub const MAP_UNSYNCHRONIZED_BIT: u32 = 0x0020;
pub const MAP_PERSISTENT_BIT: u32 = 0x0040;

// Texture targets
pub const TEXTURE_1D: NativeEnum = 0x0DE0;
pub const TEXTURE_2D: NativeEnum = 0x0DE1;
pub const TEXTURE_3D: NativeEnum = 0x806F;
pub const TEXTURE_2D_ARRAY: NativeEnum = 0x8C1A;
pub const TEXTURE_CUBE_MAP: NativeEnum = 0x8513;
pub const TEXTURE_2D_MULTISAMPLE: NativeEnum = 0x9100;
pub const TEXTURE0: NativeEnum = 0x84C0;

// Texture parameters
pub const TEXTURE_MAG_FILTER: NativeEnum = 0x2800;
pub const TEXTURE_MIN_FILTER: NativeEnum = 0x2801;
pub const TEXTURE_WRAP_S: NativeEnum = 0x2802;
pub const TEXTURE_WRAP_T: NativeEnum = 0x2803;
pub const TEXTURE_WRAP_R: NativeEnum = 0x8072;
pub const TEXTURE_BORDER_COLOR: NativeEnum = 0x1004;
pub const TEXTURE_MIN_LOD: NativeEnum = 0x813A;
pub const TEXTURE_MAX_LOD: NativeEnum = 0x813B;
pub const TEXTURE_LOD_BIAS: NativeEnum = 0x8501;
pub const TEXTURE_MAX_ANISOTROPY: NativeEnum = 0x84FE;
pub const TEXTURE_COMPARE_MODE: NativeEnum = 0x884C;
pub const TEXTURE_COMPARE_FUNC: NativeEnum = 0x884D;
pub const COMPARE_REF_TO_TEXTURE: NativeEnum = 0x884E;

pub const NEAREST: NativeEnum = 0x2600;
pub const LINEAR: NativeEnum = 0x2601;
pub const NEAREST_MIPMAP_NEAREST: NativeEnum = 0x2700;
pub const LINEAR_MIPMAP_NEAREST: NativeEnum = 0x2701;
pub const NEAREST_MIPMAP_LINEAR: NativeEnum = 0x2702;
pub const LINEAR_MIPMAP_LINEAR: NativeEnum = 0x2703;

pub const REPEAT: NativeEnum = 0x2901;
pub const CLAMP_TO_BORDER: NativeEnum = 0x812D;
pub const CLAMP_TO_EDGE: NativeEnum = 0x812F;
pub const MIRRORED_REPEAT: NativeEnum = 0x8370;
pub const MIRROR_CLAMP_TO_EDGE: NativeEnum = 0x8743;

// Internal formats
pub const R8: NativeEnum = 0x8229;
pub const RG8: NativeEnum = 0x822B;
pub const RGBA8: NativeEnum = 0x8058;
pub const SRGB8_ALPHA8: NativeEnum = 0x8C43;
pub const RGB10_A2: NativeEnum = 0x8059;
pub const R16F: NativeEnum = 0x822D;
pub const RG16F: NativeEnum = 0x822F;
pub const RGBA16F: NativeEnum = 0x881A;
pub const R32F: NativeEnum = 0x822E;
pub const RGBA32F: NativeEnum = 0x8814;
pub const R32I: NativeEnum = 0x8235;
pub const R32UI: NativeEnum = 0x8236;
pub const DEPTH_COMPONENT16: NativeEnum = 0x81A5;
pub const DEPTH_COMPONENT32F: NativeEnum = 0x8CAC;
pub const DEPTH24_STENCIL8: NativeEnum = 0x88F0;
pub const DEPTH32F_STENCIL8: NativeEnum = 0x8CAD;
pub const STENCIL_INDEX8: NativeEnum = 0x8D48;

// Pixel layouts
pub const RED: NativeEnum = 0x1903;
pub const RG: NativeEnum = 0x8227;
pub const RGBA: NativeEnum = 0x1908;
pub const BGRA: NativeEnum = 0x80E1;
pub const RED_INTEGER: NativeEnum = 0x8D94;
pub const DEPTH_COMPONENT: NativeEnum = 0x1902;
pub const DEPTH_STENCIL: NativeEnum = 0x84F9;
pub const STENCIL_INDEX: NativeEnum = 0x1901;

// Component types
pub const BYTE: NativeEnum = 0x1400;
pub const UNSIGNED_BYTE: NativeEnum = 0x1401;
pub const SHORT: NativeEnum = 0x1402;
pub const UNSIGNED_SHORT: NativeEnum = 0x1403;
pub const INT: NativeEnum = 0x1404;
pub const UNSIGNED_INT: NativeEnum = 0x1405;
pub const FLOAT: NativeEnum = 0x1406;
pub const DOUBLE: NativeEnum = 0x140A;
pub const HALF_FLOAT: NativeEnum = 0x140B;
pub const UNSIGNED_INT_2_10_10_10_REV: NativeEnum = 0x8368;
pub const UNSIGNED_INT_24_8: NativeEnum = 0x84FA;
pub const FLOAT_32_UNSIGNED_INT_24_8_REV: NativeEnum = 0x8DAD;

// Framebuffers
pub const FRAMEBUFFER: NativeEnum = 0x8D40;
pub const READ_FRAMEBUFFER: NativeEnum = 0x8CA8;
pub const DRAW_FRAMEBUFFER: NativeEnum = 0x8CA9;
pub const COLOR_ATTACHMENT0: NativeEnum = 0x8CE0;
pub const DEPTH_ATTACHMENT: NativeEnum = 0x8D00;
pub const STENCIL_ATTACHMENT: NativeEnum = 0x8D20;
pub const DEPTH_STENCIL_ATTACHMENT: NativeEnum = 0x821A;

pub const FRAMEBUFFER_COMPLETE: NativeEnum = 0x8CD5;
pub const FRAMEBUFFER_INCOMPLETE_ATTACHMENT: NativeEnum = 0x8CD6;
pub const FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT: NativeEnum = 0x8CD7;
pub const FRAMEBUFFER_UNSUPPORTED: NativeEnum = 0x8CDD;
pub const FRAMEBUFFER_INCOMPLETE_MULTISAMPLE: NativeEnum = 0x8D56;

// Shaders and programs
pub const FRAGMENT_SHADER: NativeEnum = 0x8B30;
pub const VERTEX_SHADER: NativeEnum = 0x8B31;
pub const GEOMETRY_SHADER: NativeEnum = 0x8DD9;
pub const TESS_EVALUATION_SHADER: NativeEnum = 0x8E87;
pub const TESS_CONTROL_SHADER: NativeEnum = 0x8E88;
pub const COMPUTE_SHADER: NativeEnum = 0x91B9;
pub const MESH_SHADER: NativeEnum = 0x9559;
pub const TASK_SHADER: NativeEnum = 0x955A;

pub const COMPILE_STATUS: NativeEnum = 0x8B81;
pub const LINK_STATUS: NativeEnum = 0x8B82;
pub const INFO_LOG_LENGTH: NativeEnum = 0x8B84;
pub const ATTACHED_SHADERS: NativeEnum = 0x8B85;
pub const SHADER_TYPE: NativeEnum = 0x8B4F;

// Capabilities
pub const BLEND: NativeEnum = 0x0BE2;
pub const CULL_FACE: NativeEnum = 0x0B44;
pub const DEPTH_TEST: NativeEnum = 0x0B71;
pub const STENCIL_TEST: NativeEnum = 0x0B90;
pub const SCISSOR_TEST: NativeEnum = 0x0C11;
pub const MULTISAMPLE: NativeEnum = 0x809D;
pub const SAMPLE_ALPHA_TO_COVERAGE: NativeEnum = 0x809E;
pub const SAMPLE_MASK: NativeEnum = 0x8E51;
pub const LINE_SMOOTH: NativeEnum = 0x0B20;
pub const DEPTH_CLAMP: NativeEnum = 0x864F;
pub const POLYGON_OFFSET_FILL: NativeEnum = 0x8037;
pub const PRIMITIVE_RESTART_FIXED_INDEX: NativeEnum = 0x8D69;

// Blend factors
pub const ZERO: NativeEnum = 0;
pub const ONE: NativeEnum = 1;
pub const SRC_COLOR: NativeEnum = 0x0300;
pub const ONE_MINUS_SRC_COLOR: NativeEnum = 0x0301;
pub const SRC_ALPHA: NativeEnum = 0x0302;
pub const ONE_MINUS_SRC_ALPHA: NativeEnum = 0x0303;
pub const DST_ALPHA: NativeEnum = 0x0304;
pub const ONE_MINUS_DST_ALPHA: NativeEnum = 0x0305;
pub const DST_COLOR: NativeEnum = 0x0306;
pub const ONE_MINUS_DST_COLOR: NativeEnum = 0x0307;
pub const SRC_ALPHA_SATURATE: NativeEnum = 0x0308;
pub const CONSTANT_COLOR: NativeEnum = 0x8001;
pub const ONE_MINUS_CONSTANT_COLOR: NativeEnum = 0x8002;
pub const SRC1_COLOR: NativeEnum = 0x88F9;
pub const ONE_MINUS_SRC1_COLOR: NativeEnum = 0x88FA;
pub const SRC1_ALPHA: NativeEnum = 0x8589;
pub const ONE_MINUS_SRC1_ALPHA: NativeEnum = 0x88FB;

// Blend equations
pub const FUNC_ADD: NativeEnum = 0x8006;
pub const MIN: NativeEnum = 0x8007;
pub const MAX: NativeEnum = 0x8008;
pub const FUNC_SUBTRACT: NativeEnum = 0x800A;
pub const FUNC_REVERSE_SUBTRACT: NativeEnum = 0x800B;

// Comparison functions
pub const NEVER: NativeEnum = 0x0200;
pub const LESS: NativeEnum = 0x0201;
pub const EQUAL: NativeEnum = 0x0202;
pub const LEQUAL: NativeEnum = 0x0203;
pub const GREATER: NativeEnum = 0x0204;
pub const NOTEQUAL: NativeEnum = 0x0205;
pub const GEQUAL: NativeEnum = 0x0206;
pub const ALWAYS: NativeEnum = 0x0207;

// Stencil operations
pub const KEEP: NativeEnum = 0x1E00;
pub const REPLACE: NativeEnum = 0x1E01;
pub const INCR: NativeEnum = 0x1E02;
pub const DECR: NativeEnum = 0x1E03;
pub const INVERT: NativeEnum = 0x150A;
pub const INCR_WRAP: NativeEnum = 0x8507;
pub const DECR_WRAP: NativeEnum = 0x8508;

// Rasteriser
pub const FRONT: NativeEnum = 0x0404;
pub const BACK: NativeEnum = 0x0405;
pub const FRONT_AND_BACK: NativeEnum = 0x0408;
pub const CW: NativeEnum = 0x0900;
pub const CCW: NativeEnum = 0x0901;
pub const POINT: NativeEnum = 0x1B00;
pub const LINE: NativeEnum = 0x1B01;
pub const FILL: NativeEnum = 0x1B02;

// Primitives
pub const POINTS: NativeEnum = 0x0000;
pub const LINES: NativeEnum = 0x0001;
pub const LINE_STRIP: NativeEnum = 0x0003;
pub const TRIANGLES: NativeEnum = 0x0004;
pub const TRIANGLE_STRIP: NativeEnum = 0x0005;
pub const TRIANGLE_FAN: NativeEnum = 0x0006;
pub const PATCHES: NativeEnum = 0x000E;

// Clear bits
pub const DEPTH_BUFFER_BIT: u32 = 0x0000_0100;
pub const STENCIL_BUFFER_BIT: u32 = 0x0000_0400;
pub const COLOR_BUFFER_BIT: u32 = 0x0000_4000;

// Memory barrier bits
pub const VERTEX_ATTRIB_ARRAY_BARRIER_BIT: u32 = 0x0000_0001;
pub const ELEMENT_ARRAY_BARRIER_BIT: u32 = 0x0000_0002;
pub const UNIFORM_BARRIER_BIT: u32 = 0x0000_0004;
pub const TEXTURE_FETCH_BARRIER_BIT: u32 = 0x0000_0008;
pub const SHADER_IMAGE_ACCESS_BARRIER_BIT: u32 = 0x0000_0020;
pub const COMMAND_BARRIER_BIT: u32 = 0x0000_0040;
pub const PIXEL_BUFFER_BARRIER_BIT: u32 = 0x0000_0080;
pub const TEXTURE_UPDATE_BARRIER_BIT: u32 = 0x0000_0100;
pub const BUFFER_UPDATE_BARRIER_BIT: u32 = 0x0000_0200;
pub const FRAMEBUFFER_BARRIER_BIT: u32 = 0x0000_0400;
pub const TRANSFORM_FEEDBACK_BARRIER_BIT: u32 = 0x0000_0800;
pub const ATOMIC_COUNTER_BARRIER_BIT: u32 = 0x0000_1000;
pub const SHADER_STORAGE_BARRIER_BIT: u32 = 0x0000_2000;
pub const CLIENT_MAPPED_BUFFER_BARRIER_BIT: u32 = 0x0000_4000;
pub const QUERY_BUFFER_BARRIER_BIT: u32 = 0x0000_8000;
pub const ALL_BARRIER_BITS: u32 = 0xFFFF_FFFF;

// Binding queries that aren't bind targets
pub const CURRENT_PROGRAM: NativeEnum = 0x8B8D;
pub const VERTEX_ARRAY_BINDING: NativeEnum = 0x85B5;

// Queries for get_integer
pub const MAX_TEXTURE_SIZE: NativeEnum = 0x0D33;
pub const MAX_COLOR_ATTACHMENTS: NativeEnum = 0x8CDF;
pub const MAX_DRAW_BUFFERS: NativeEnum = 0x8824;
pub const MAX_SAMPLES: NativeEnum = 0x8D57;
pub const MAX_COMBINED_TEXTURE_IMAGE_UNITS: NativeEnum = 0x8B4D;
pub const MAX_SHADER_STORAGE_BUFFER_BINDINGS: NativeEnum = 0x90DD;
pub const MAX_UNIFORM_BUFFER_BINDINGS: NativeEnum = 0x8A2F;
pub const MAX_VERTEX_ATTRIBS: NativeEnum = 0x8869;
pub const MAX_VIEWPORTS: NativeEnum = 0x825B;
pub const MAX_COMPUTE_WORK_GROUP_COUNT: NativeEnum = 0x91BE;
pub const MAX_COMPUTE_WORK_GROUP_SIZE: NativeEnum = 0x91BF;
pub const MAJOR_VERSION: NativeEnum = 0x821B;
pub const MINOR_VERSION: NativeEnum = 0x821C;

/// Readable name for an error code
pub fn error_name(code: NativeEnum) -> &'static str {
    match code {
        NO_ERROR => "GL_NO_ERROR",
        INVALID_ENUM => "GL_INVALID_ENUM",
        INVALID_VALUE => "GL_INVALID_VALUE",
        INVALID_OPERATION => "GL_INVALID_OPERATION",
        OUT_OF_MEMORY => "GL_OUT_OF_MEMORY",
        INVALID_FRAMEBUFFER_OPERATION => "GL_INVALID_FRAMEBUFFER_OPERATION",
        _ => "unknown error",
    }
}

/// Readable name for a framebuffer status
pub fn status_name(status: NativeEnum) -> &'static str {
    match status {
        FRAMEBUFFER_COMPLETE => "GL_FRAMEBUFFER_COMPLETE",
        FRAMEBUFFER_INCOMPLETE_ATTACHMENT => "GL_FRAMEBUFFER_INCOMPLETE_ATTACHMENT",
        FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT => "GL_FRAMEBUFFER_INCOMPLETE_MISSING_ATTACHMENT",
        FRAMEBUFFER_UNSUPPORTED => "GL_FRAMEBUFFER_UNSUPPORTED",
        FRAMEBUFFER_INCOMPLETE_MULTISAMPLE => "GL_FRAMEBUFFER_INCOMPLETE_MULTISAMPLE",
        _ => "unknown framebuffer status",
    }
}
