// Owning handle
//
// One generic owner for every native object kind. The per-kind behavior
// (liveness predicate, destructor, bind call) lives in a `NativeKind` marker,
// so move/reset/drop logic is written once.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use super::bind::BindGuard;
use crate::driver::{Driver, NativeEnum, ObjectId};
use crate::error::{check, BackendResult, ErrorKind};

/// Capabilities of one native object kind
pub trait NativeKind {
    /// Human-readable kind name, used in logs
    const NAME: &'static str;
    /// Native call that deletes an object of this kind
    const DELETE: &'static str;

    fn is_live(driver: &dyn Driver, id: ObjectId) -> bool;
    fn destroy(driver: &dyn Driver, id: ObjectId);
}

/// Kinds that can be bound to a target slot
pub trait Bindable: NativeKind {
    const BIND: &'static str;

    fn bind(driver: &dyn Driver, target: NativeEnum, id: ObjectId);
}

pub enum BufferKind {}
pub enum TextureKind {}
pub enum FrameBufferKind {}
pub enum ShaderKind {}
pub enum ProgramKind {}
pub enum VertexArrayKind {}

impl NativeKind for BufferKind {
    const NAME: &'static str = "buffer";
    const DELETE: &'static str = "glDeleteBuffers";

    fn is_live(driver: &dyn Driver, id: ObjectId) -> bool {
        driver.is_buffer(id)
    }

    fn destroy(driver: &dyn Driver, id: ObjectId) {
        driver.delete_buffer(id)
    }
}

impl Bindable for BufferKind {
    const BIND: &'static str = "glBindBuffer";

    fn bind(driver: &dyn Driver, target: NativeEnum, id: ObjectId) {
        driver.bind_buffer(target, id)
    }
}

impl NativeKind for TextureKind {
    const NAME: &'static str = "texture";
    const DELETE: &'static str = "glDeleteTextures";

    fn is_live(driver: &dyn Driver, id: ObjectId) -> bool {
        driver.is_texture(id)
    }

    fn destroy(driver: &dyn Driver, id: ObjectId) {
        driver.delete_texture(id)
    }
}

impl Bindable for TextureKind {
    const BIND: &'static str = "glBindTexture";

    fn bind(driver: &dyn Driver, target: NativeEnum, id: ObjectId) {
        driver.bind_texture(target, id)
    }
}

impl NativeKind for FrameBufferKind {
    const NAME: &'static str = "framebuffer";
    const DELETE: &'static str = "glDeleteFramebuffers";

    fn is_live(driver: &dyn Driver, id: ObjectId) -> bool {
        driver.is_framebuffer(id)
    }

    fn destroy(driver: &dyn Driver, id: ObjectId) {
        driver.delete_framebuffer(id)
    }
}

impl Bindable for FrameBufferKind {
    const BIND: &'static str = "glBindFramebuffer";

    fn bind(driver: &dyn Driver, target: NativeEnum, id: ObjectId) {
        driver.bind_framebuffer(target, id)
    }
}

impl NativeKind for ShaderKind {
    const NAME: &'static str = "shader";
    const DELETE: &'static str = "glDeleteShader";

    fn is_live(driver: &dyn Driver, id: ObjectId) -> bool {
        driver.is_shader(id)
    }

    fn destroy(driver: &dyn Driver, id: ObjectId) {
        driver.delete_shader(id)
    }
}

impl NativeKind for ProgramKind {
    const NAME: &'static str = "program";
    const DELETE: &'static str = "glDeleteProgram";

    fn is_live(driver: &dyn Driver, id: ObjectId) -> bool {
        driver.is_program(id)
    }

    fn destroy(driver: &dyn Driver, id: ObjectId) {
        driver.delete_program(id)
    }
}

/// Programs have a single binding point; the target is ignored
impl Bindable for ProgramKind {
    const BIND: &'static str = "glUseProgram";

    fn bind(driver: &dyn Driver, _target: NativeEnum, id: ObjectId) {
        driver.use_program(id)
    }
}

impl NativeKind for VertexArrayKind {
    const NAME: &'static str = "vertex array";
    const DELETE: &'static str = "glDeleteVertexArrays";

    fn is_live(driver: &dyn Driver, id: ObjectId) -> bool {
        driver.is_vertex_array(id)
    }

    fn destroy(driver: &dyn Driver, id: ObjectId) {
        driver.delete_vertex_array(id)
    }
}

/// Vertex arrays have a single binding point; the target is ignored
impl Bindable for VertexArrayKind {
    const BIND: &'static str = "glBindVertexArray";

    fn bind(driver: &dyn Driver, _target: NativeEnum, id: ObjectId) {
        driver.bind_vertex_array(id)
    }
}

/// Sole owner of one native object.
///
/// A null handle owns nothing and never calls the destructor. Ownership moves
/// with the value; `take` transfers it out of a place that must stay usable,
/// leaving the null sentinel behind.
pub struct Owned<K: NativeKind> {
    driver: Rc<dyn Driver>,
    id: ObjectId,
    _kind: PhantomData<K>,
}

impl<K: NativeKind> Owned<K> {
    /// A handle that owns no object
    pub fn null(driver: Rc<dyn Driver>) -> Self {
        Self { driver, id: 0, _kind: PhantomData }
    }

    /// Take ownership of a freshly allocated object.
    ///
    /// The id must name a live object; allocation failure has to be checked
    /// before wrapping.
    #[track_caller]
    pub fn adopt(driver: Rc<dyn Driver>, id: ObjectId) -> Self {
        debug_assert!(
            id != 0 && K::is_live(&*driver, id),
            "adopting {} {id} which is not a live object",
            K::NAME
        );
        log::trace!(kind = K::NAME, id = id; "Adopted native object");
        Self { driver, id, _kind: PhantomData }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn is_null(&self) -> bool {
        self.id == 0
    }

    /// Ask the driver whether the object is still live
    pub fn is_valid(&self) -> bool {
        self.id != 0 && K::is_live(&*self.driver, self.id)
    }

    pub fn driver(&self) -> &Rc<dyn Driver> {
        &self.driver
    }

    /// Destroy the owned object and clear to null.
    ///
    /// A null handle, or one whose object the driver no longer knows (its
    /// context was destroyed), resets without a native call.
    pub fn reset(&mut self) -> BackendResult<()> {
        if self.id == 0 {
            return Ok(());
        }
        let id = std::mem::replace(&mut self.id, 0);
        if !K::is_live(&*self.driver, id) {
            return Ok(());
        }
        K::destroy(&*self.driver, id);
        log::trace!(kind = K::NAME, id = id; "Destroyed native object");
        check(&*self.driver, ErrorKind::Configuration, K::DELETE)
    }

    /// Move ownership into a new handle, leaving this one null
    pub fn take(&mut self) -> Self {
        Self {
            driver: Rc::clone(&self.driver),
            id: std::mem::replace(&mut self.id, 0),
            _kind: PhantomData,
        }
    }

    /// Release ownership without destroying the object
    pub fn into_raw(mut self) -> ObjectId {
        std::mem::replace(&mut self.id, 0)
    }

    /// Bind the object to `target` until the returned guard drops
    pub fn bind(&self, target: NativeEnum) -> BackendResult<BindGuard<'_, K>>
    where
        K: Bindable,
    {
        BindGuard::new(self, target)
    }
}

impl<K: NativeKind> Drop for Owned<K> {
    fn drop(&mut self) {
        // Destructors don't propagate; a failed deletion is unobservable here
        let _ = self.reset();
    }
}

impl<K: NativeKind> fmt::Debug for Owned<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owned").field("kind", &K::NAME).field("id", &self.id).finish()
    }
}

/// Allocate an object through `gen` and wrap it, failing with an allocation
/// error when the driver hands back the null id.
#[track_caller]
pub(crate) fn allocate<K: NativeKind>(
    driver: &Rc<dyn Driver>,
    operation: &'static str,
    gen: impl FnOnce(&dyn Driver) -> ObjectId,
) -> BackendResult<Owned<K>> {
    let id = gen(&**driver);
    if let Err(err) = check(&**driver, ErrorKind::Allocation, operation) {
        if id != 0 {
            K::destroy(&**driver, id);
            let _ = driver.get_error();
        }
        return Err(err);
    }
    if id == 0 {
        return Err(crate::error::BackendError::new(
            ErrorKind::Allocation,
            0,
            operation,
            format!("driver returned no {} object", K::NAME),
        ));
    }
    Ok(Owned::adopt(Rc::clone(driver), id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SoftwareDriver;
    use glam::UVec2;

    fn driver() -> (Rc<SoftwareDriver>, Rc<dyn Driver>) {
        let software = Rc::new(SoftwareDriver::new());
        software.create_context(UVec2::new(16, 16), None);
        let driver: Rc<dyn Driver> = software.clone();
        (software, driver)
    }

    #[test]
    fn null_handle_never_deletes() {
        let (software, driver) = driver();
        let mut handle = Owned::<BufferKind>::null(driver);
        assert!(handle.is_null());
        assert!(!handle.is_valid());
        handle.reset().unwrap();
        drop(handle);
        assert_eq!(software.call_count("glDeleteBuffers"), 0);
    }

    #[test]
    fn reset_is_idempotent() {
        let (software, driver) = driver();
        let mut handle = allocate::<TextureKind>(&driver, "glGenTextures", |d| d.gen_texture()).unwrap();
        assert!(handle.is_valid());

        handle.reset().unwrap();
        assert!(handle.is_null());
        handle.reset().unwrap();
        assert_eq!(software.call_count("glDeleteTextures"), 1);
    }

    #[test]
    fn take_leaves_source_null() {
        let (software, driver) = driver();
        let mut source = allocate::<BufferKind>(&driver, "glGenBuffers", |d| d.gen_buffer()).unwrap();
        let id = source.id();

        let moved = source.take();
        assert_eq!(moved.id(), id);
        assert!(source.is_null());
        drop(source);
        assert_eq!(software.call_count("glDeleteBuffers"), 0);
        assert!(moved.is_valid());
        drop(moved);
        assert_eq!(software.call_count("glDeleteBuffers"), 1);
    }

    #[test]
    fn allocation_failure_is_reported_before_wrapping() {
        let (software, driver) = driver();
        software.fail_next("glGenBuffers", crate::driver::gl::OUT_OF_MEMORY);
        let err = allocate::<BufferKind>(&driver, "glGenBuffers", |d| d.gen_buffer()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);
        assert_eq!(software.live_objects(), 0);
    }

    #[test]
    fn error_after_gen_deletes_the_new_object() {
        let (software, driver) = driver();
        let mut generated = 0;
        let err = allocate::<BufferKind>(&driver, "glGenBuffers", |d| {
            generated = d.gen_buffer();
            // Leaves INVALID_ENUM behind for the check
            d.bind_buffer(0xdead, generated);
            generated
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);
        assert_ne!(generated, 0);
        assert!(!software.is_buffer(generated));
        assert_eq!(software.call_count("glDeleteBuffers"), 1);
        assert_eq!(software.live_objects(), 0);
    }

    #[test]
    fn into_raw_keeps_object_alive() {
        let (software, driver) = driver();
        let handle = allocate::<BufferKind>(&driver, "glGenBuffers", |d| d.gen_buffer()).unwrap();
        let id = handle.into_raw();
        assert!(software.is_buffer(id));
        assert_eq!(software.call_count("glDeleteBuffers"), 0);
    }
}
