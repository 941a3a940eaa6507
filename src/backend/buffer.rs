// Buffer resource

use bytemuck::Pod;

use super::device::Context;
use super::handle::{allocate, BufferKind, Owned};
use super::types::BufferUsage;
use crate::driver::{gl, NativeEnum, ObjectId};
use crate::error::{check, BackendError, BackendResult, ErrorKind};

/// GPU buffer with a fixed usage and length
#[derive(Debug)]
pub struct Buffer {
    handle: Owned<BufferKind>,
    usage: BufferUsage,
    len: usize,
}

impl Buffer {
    /// Create a buffer of `len` bytes.
    ///
    /// With `data` the contents are uploaded immediately and the buffer is
    /// hinted static; without it the contents are undefined and the buffer is
    /// hinted dynamic.
    pub fn create(ctx: &Context, usage: BufferUsage, len: usize, data: Option<&[u8]>) -> BackendResult<Self> {
        if let Some(data) = data {
            if data.len() != len {
                return Err(BackendError::invalid(
                    "Buffer::create",
                    format!("initial data is {} bytes, buffer is {len}", data.len()),
                ));
            }
        }

        // Step 1: Allocate
        let handle = allocate::<BufferKind>(ctx.driver(), "glGenBuffers", |d| d.gen_buffer())?;

        // Step 2: Size and upload through a scoped binding
        {
            let bound = handle.bind(usage.bind_target())?;
            let hint = if data.is_some() { gl::STATIC_DRAW } else { gl::DYNAMIC_DRAW };
            bound.driver().buffer_data(bound.target(), len, data, hint);
            check(bound.driver(), ErrorKind::Configuration, "glBufferData")?;
        }

        log::debug!(id = handle.id(), len = len; "Created {:?} buffer", usage);
        Ok(Self { handle, usage, len })
    }

    /// Create a buffer holding a copy of `contents`
    pub fn with_contents<T: Pod>(ctx: &Context, usage: BufferUsage, contents: &[T]) -> BackendResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(contents);
        Self::create(ctx, usage, bytes.len(), Some(bytes))
    }

    /// Overwrite `data.len()` bytes starting at `offset`
    pub fn update(&self, offset: usize, data: &[u8]) -> BackendResult<()> {
        if offset.checked_add(data.len()).map_or(true, |end| end > self.len) {
            return Err(BackendError::invalid(
                "Buffer::update",
                format!("{} bytes at {offset} overrun a {}-byte buffer", data.len(), self.len),
            ));
        }
        let bound = self.handle.bind(self.bind_target())?;
        bound.driver().buffer_sub_data(bound.target(), offset, data);
        check(bound.driver(), ErrorKind::Configuration, "glBufferSubData")
    }

    pub fn id(&self) -> ObjectId {
        self.handle.id()
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub(crate) fn bind_target(&self) -> NativeEnum {
        self.usage.bind_target()
    }

    pub(crate) fn handle(&self) -> &Owned<BufferKind> {
        &self.handle
    }

    /// Destroy the buffer now, reporting a failed deletion
    pub fn destroy(mut self) -> BackendResult<()> {
        self.handle.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::device::ContextDesc;
    use crate::driver::{Driver, SoftwareDriver};
    use std::rc::Rc;

    fn context() -> (Rc<SoftwareDriver>, Context) {
        let software = Rc::new(SoftwareDriver::new());
        let ctx = Context::new(software.clone(), &ContextDesc::default()).unwrap();
        (software, ctx)
    }

    #[test]
    fn usage_hint_follows_initial_data() {
        let (software, ctx) = context();
        let empty = Buffer::create(&ctx, BufferUsage::Storage, 64, None).unwrap();
        let filled = Buffer::with_contents(&ctx, BufferUsage::Vertex, &[1.0f32, 2.0, 3.0]).unwrap();

        assert_eq!(software.buffer_usage(empty.id()), Some(gl::DYNAMIC_DRAW));
        assert_eq!(software.buffer_usage(filled.id()), Some(gl::STATIC_DRAW));
        assert_eq!(filled.len(), 12);
        assert_eq!(software.buffer_contents(filled.id()).unwrap(), bytemuck::cast_slice::<f32, u8>(&[1.0, 2.0, 3.0]));
    }

    #[test]
    fn creation_leaves_binding_empty() {
        let (software, ctx) = context();
        let _buffer = Buffer::create(&ctx, BufferUsage::Uniform, 16, None).unwrap();
        assert_eq!(software.get_binding(gl::UNIFORM_BUFFER), 0);
    }

    #[test]
    fn mismatched_initial_data_is_rejected() {
        let (software, ctx) = context();
        let err = Buffer::create(&ctx, BufferUsage::Vertex, 8, Some(&[0u8; 4][..])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(software.call_count("glGenBuffers"), 0);
    }

    #[test]
    fn oversized_buffer_is_an_allocation_failure() {
        let (_software, ctx) = context();
        let err = Buffer::create(&ctx, BufferUsage::Storage, usize::MAX / 2, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);
        assert_eq!(err.operation(), "glBufferData");
    }

    #[test]
    fn update_writes_in_place() {
        let (software, ctx) = context();
        let buffer = Buffer::with_contents(&ctx, BufferUsage::Index, &[0u16; 4]).unwrap();
        buffer.update(2, &[7, 0]).unwrap();
        assert_eq!(software.buffer_contents(buffer.id()).unwrap(), vec![0, 0, 7, 0, 0, 0, 0, 0]);
        assert!(buffer.update(6, &[0; 4]).is_err());
    }

    #[test]
    fn destroy_deletes_once() {
        let (software, ctx) = context();
        let buffer = Buffer::create(&ctx, BufferUsage::Vertex, 4, None).unwrap();
        let id = buffer.id();
        buffer.destroy().unwrap();
        assert!(!software.is_buffer(id));
        assert_eq!(software.call_count("glDeleteBuffers"), 1);
    }
}
