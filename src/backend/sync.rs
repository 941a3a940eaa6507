// Buffer mapping
//
// CPU access to buffer memory. A mapping keeps its buffer bound to the
// buffer's upload target until it is unmapped, so only one buffer per target
// can be mapped at a time.

use bytemuck::Pod;

use super::bind::BindGuard;
use super::buffer::Buffer;
use super::device::Context;
use super::handle::BufferKind;
use super::types::AccessFlags;
use crate::error::{check, BackendError, BackendResult, ErrorKind};

/// A mapped byte range of a [`Buffer`].
///
/// Dropping the mapping unmaps it and discards any unmap failure; call
/// [`MappedBuffer::unmap`] to observe it. The mapping cannot outlive the
/// [`Context`] it came from.
pub struct MappedBuffer<'a> {
    guard: BindGuard<'a, BufferKind>,
    ptr: *mut u8,
    len: usize,
    access: AccessFlags,
    mapped: bool,
}

impl Context {
    /// Map `len` bytes of `buffer` starting at `offset`.
    ///
    /// Fails with [`ErrorKind::Misuse`] when another buffer is already bound
    /// to the upload target, which includes another live mapping.
    ///
    /// The mapping borrows the context as well as the buffer, since
    /// destroying the context frees the mapped storage:
    ///
    /// ```compile_fail
    /// use std::rc::Rc;
    /// use vellum::backend::{AccessFlags, Buffer, BufferUsage, Context, ContextDesc};
    /// use vellum::driver::SoftwareDriver;
    ///
    /// let ctx = Context::new(Rc::new(SoftwareDriver::new()), &ContextDesc::default()).unwrap();
    /// let buffer = Buffer::create(&ctx, BufferUsage::Storage, 16, None).unwrap();
    /// let mapping = ctx.map_buffer(&buffer, 0, 16, AccessFlags::READ).unwrap();
    /// drop(ctx);
    /// let _ = mapping.read();
    /// ```
    pub fn map_buffer<'b>(
        &'b self,
        buffer: &'b Buffer,
        offset: usize,
        len: usize,
        access: AccessFlags,
    ) -> BackendResult<MappedBuffer<'b>> {
        const OP: &str = "Context::map_buffer";
        let driver = &**self.driver();
        let target = buffer.bind_target();

        if driver.get_binding(target) != 0 {
            return Err(BackendError::misuse(OP, "target is already bound; unmap the other buffer first"));
        }
        check(driver, ErrorKind::Configuration, "glGetIntegerv")?;
        if !access.intersects(AccessFlags::READ | AccessFlags::WRITE) {
            return Err(BackendError::invalid(OP, "access must include READ or WRITE"));
        }
        if len == 0 || offset.checked_add(len).map_or(true, |end| end > buffer.len()) {
            return Err(BackendError::invalid(
                OP,
                format!("range {offset}+{len} is outside a {}-byte buffer", buffer.len()),
            ));
        }

        let guard = buffer.handle().bind(target)?;
        let ptr = driver.map_buffer_range(target, offset, len, access.native());
        check(driver, ErrorKind::Configuration, "glMapBufferRange")?;
        if ptr.is_null() {
            return Err(BackendError::new(ErrorKind::Allocation, 0, "glMapBufferRange", "driver returned no mapping"));
        }

        log::trace!(id = buffer.id(), offset = offset, len = len; "Mapped buffer");
        Ok(MappedBuffer { guard, ptr, len, access, mapped: true })
    }
}

impl MappedBuffer<'_> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn access(&self) -> AccessFlags {
        self.access
    }

    /// Start of the mapped range, for hosts that write through the pointer
    pub(crate) fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn read(&self) -> BackendResult<&[u8]> {
        if !self.access.contains(AccessFlags::READ) {
            return Err(BackendError::misuse("MappedBuffer::read", "mapping was not created with READ access"));
        }
        // SAFETY: the driver keeps `ptr..ptr + len` valid and unmoved until the
        // range is unmapped, which only happens through `self`. Barriers commit
        // in place, and the borrowed context cannot be destroyed meanwhile.
        Ok(unsafe { std::slice::from_raw_parts(self.ptr, self.len) })
    }

    /// Copy `data` into the mapping at `offset`
    pub fn write(&mut self, offset: usize, data: &[u8]) -> BackendResult<()> {
        const OP: &str = "MappedBuffer::write";
        if !self.access.contains(AccessFlags::WRITE) {
            return Err(BackendError::misuse(OP, "mapping was not created with WRITE access"));
        }
        if offset.checked_add(data.len()).map_or(true, |end| end > self.len) {
            return Err(BackendError::invalid(OP, format!("{} bytes at {offset} overflow the mapping", data.len())));
        }
        // SAFETY: bounds checked above; the mapping is exclusively borrowed.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len()) };
        Ok(())
    }

    /// Read the mapping as a sequence of `T`; the length must be a multiple of
    /// `size_of::<T>()`
    pub fn read_as<T: Pod>(&self) -> BackendResult<Vec<T>> {
        let size = std::mem::size_of::<T>();
        let bytes = self.read()?;
        if size == 0 || bytes.len() % size != 0 {
            return Err(BackendError::invalid(
                "MappedBuffer::read_as",
                format!("{} bytes is not a whole number of {size}-byte elements", bytes.len()),
            ));
        }
        Ok(bytes.chunks_exact(size).map(bytemuck::pod_read_unaligned).collect())
    }

    pub fn unmap(mut self) -> BackendResult<()> {
        self.release()
    }

    fn release(&mut self) -> BackendResult<()> {
        if !self.mapped {
            return Ok(());
        }
        self.mapped = false;
        let driver = self.guard.driver();
        // Rebind in case a nested bind of the same target zeroed the slot
        driver.bind_buffer(self.guard.target(), self.guard.id());
        let intact = driver.unmap_buffer(self.guard.target());
        check(driver, ErrorKind::Configuration, "glUnmapBuffer")?;
        if !intact {
            return Err(BackendError::new(
                ErrorKind::Configuration,
                0,
                "glUnmapBuffer",
                "buffer contents were lost while mapped",
            ));
        }
        log::trace!(id = self.guard.id(); "Unmapped buffer");
        Ok(())
    }
}

impl Drop for MappedBuffer<'_> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::device::ContextDesc;
    use crate::backend::types::BufferUsage;
    use crate::driver::{Driver, SoftwareDriver};
    use std::rc::Rc;

    fn context() -> (Rc<SoftwareDriver>, Context) {
        let software = Rc::new(SoftwareDriver::new());
        let ctx = Context::new(software.clone(), &ContextDesc::default()).unwrap();
        (software, ctx)
    }

    #[test]
    fn write_then_read_back() {
        let (software, ctx) = context();
        let buffer = Buffer::create(&ctx, BufferUsage::Storage, 16, None).unwrap();

        let mut mapping = ctx.map_buffer(&buffer, 4, 8, AccessFlags::READ | AccessFlags::WRITE).unwrap();
        mapping.write(0, bytemuck::cast_slice(&[7u32, 9])).unwrap();
        assert_eq!(mapping.read_as::<u32>().unwrap(), vec![7, 9]);
        mapping.unmap().unwrap();

        assert_eq!(software.get_binding(buffer.bind_target()), 0);
        let contents = software.buffer_contents(buffer.id()).unwrap();
        assert_eq!(bytemuck::pod_collect_to_vec::<u8, u32>(&contents), vec![0, 7, 9, 0]);
    }

    #[test]
    fn second_mapping_on_the_same_target_is_misuse() {
        let (_software, ctx) = context();
        let a = Buffer::create(&ctx, BufferUsage::Storage, 16, None).unwrap();
        let b = Buffer::create(&ctx, BufferUsage::Storage, 16, None).unwrap();

        let _first = ctx.map_buffer(&a, 0, 16, AccessFlags::READ).unwrap();
        let err = ctx.map_buffer(&b, 0, 16, AccessFlags::READ).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Misuse);
    }

    #[test]
    fn access_flags_are_enforced() {
        let (_software, ctx) = context();
        let buffer = Buffer::create(&ctx, BufferUsage::Vertex, 8, None).unwrap();

        let mut mapping = ctx.map_buffer(&buffer, 0, 8, AccessFlags::READ).unwrap();
        assert_eq!(mapping.write(0, &[1]).unwrap_err().kind(), ErrorKind::Misuse);
        drop(mapping);

        let mapping = ctx.map_buffer(&buffer, 0, 8, AccessFlags::WRITE).unwrap();
        assert_eq!(mapping.read().unwrap_err().kind(), ErrorKind::Misuse);
    }

    #[test]
    fn out_of_range_mapping_is_rejected() {
        let (software, ctx) = context();
        let buffer = Buffer::create(&ctx, BufferUsage::Uniform, 8, None).unwrap();
        let err = ctx.map_buffer(&buffer, 4, 8, AccessFlags::READ).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(software.call_count("glMapBufferRange"), 0);
    }

    #[test]
    fn index_buffers_map_through_the_copy_target() {
        let (software, ctx) = context();
        let indices = Buffer::with_contents(&ctx, BufferUsage::Index, &[0u16, 1, 2, 3]).unwrap();
        let mapping = ctx.map_buffer(&indices, 0, 8, AccessFlags::READ).unwrap();
        assert_eq!(mapping.read_as::<u16>().unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(software.get_binding(crate::driver::gl::ELEMENT_ARRAY_BUFFER), 0);
    }
}
