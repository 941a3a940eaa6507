// Backend module - resource and command layer over a native driver
//
// Design: every native object is owned by exactly one handle, every bind is
// scoped, every native call is followed by an error check

pub mod bind;
pub mod buffer;
pub mod command;
pub mod conversions;
pub mod device;
pub mod framebuffer;
pub mod handle;
pub mod pipeline;
pub mod shader;
pub mod sync;
pub mod texture;
pub mod types;
pub mod vertex_layout;

pub use bind::BindGuard;
pub use buffer::Buffer;
pub use command::{CommandList, PipelineRef, ShaderValue};
pub use device::{Caps, Context, ContextDesc, Features};
pub use framebuffer::{Attachment, AttachmentPoint, FrameBuffer};
pub use handle::Owned;
pub use pipeline::{ComputePipeline, FixedFunction, PipelineDesc, PipelineState, RenderTarget, ShaderStages};
pub use shader::{ProgramObject, ShaderObject};
pub use sync::MappedBuffer;
pub use texture::{Texture, TextureDesc};
pub use types::*;
pub use vertex_layout::{IndexBuffer, VertexBuffer, VertexLayout};
