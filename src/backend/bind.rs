// Scoped bind guard
//
// A guard exists exactly while an object is bound to a target slot. Dropping
// it binds the null object to that slot; the previous binding is not restored,
// so nested binds of one target are not stack-safe.

use super::handle::{Bindable, Owned, TextureKind};
use super::types::{AddressMode, Sampler};
use crate::driver::{gl, Driver, NativeEnum, ObjectId};
use crate::error::{check, BackendResult, ErrorKind};

/// Proof that `handle` is bound to `target`
#[must_use = "the object is unbound as soon as the guard drops"]
pub struct BindGuard<'a, K: Bindable> {
    handle: &'a Owned<K>,
    target: NativeEnum,
}

impl<K: Bindable> std::fmt::Debug for BindGuard<'_, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindGuard").field("handle", self.handle).field("target", &self.target).finish()
    }
}

impl<'a, K: Bindable> BindGuard<'a, K> {
    #[track_caller]
    pub(crate) fn new(handle: &'a Owned<K>, target: NativeEnum) -> BackendResult<Self> {
        let driver = &**handle.driver();
        K::bind(driver, target, handle.id());
        check(driver, ErrorKind::Configuration, K::BIND)?;
        Ok(Self { handle, target })
    }

    pub fn target(&self) -> NativeEnum {
        self.target
    }

    pub fn id(&self) -> ObjectId {
        self.handle.id()
    }

    pub fn driver(&self) -> &dyn Driver {
        &**self.handle.driver()
    }
}

impl<K: Bindable> Drop for BindGuard<'_, K> {
    fn drop(&mut self) {
        let driver = self.driver();
        K::bind(driver, self.target, 0);
        // An unbind failure has nowhere to go; clear it so the next check
        // doesn't pick it up
        let _ = driver.get_error();
    }
}

impl BindGuard<'_, TextureKind> {
    #[track_caller]
    pub fn set_int(&self, pname: NativeEnum, value: i32) -> BackendResult<()> {
        self.driver().tex_parameter_i(self.target, pname, value);
        check(self.driver(), ErrorKind::Configuration, "glTexParameteri")
    }

    #[track_caller]
    pub fn set_float(&self, pname: NativeEnum, value: f32) -> BackendResult<()> {
        self.driver().tex_parameter_f(self.target, pname, value);
        check(self.driver(), ErrorKind::Configuration, "glTexParameterf")
    }

    #[track_caller]
    pub fn set_floats(&self, pname: NativeEnum, values: &[f32]) -> BackendResult<()> {
        self.driver().tex_parameter_fv(self.target, pname, values);
        check(self.driver(), ErrorKind::Configuration, "glTexParameterfv")
    }

    /// Push every field of a sampler description to the bound texture
    pub fn apply_sampler(&self, sampler: &Sampler) -> BackendResult<()> {
        let filter = sampler.filter;
        self.set_int(gl::TEXTURE_MIN_FILTER, filter.native_min() as i32)?;
        self.set_int(gl::TEXTURE_MAG_FILTER, filter.native_mag() as i32)?;

        let wraps = [gl::TEXTURE_WRAP_S, gl::TEXTURE_WRAP_T, gl::TEXTURE_WRAP_R];
        for (pname, mode) in wraps.into_iter().zip(sampler.addressing) {
            self.set_int(pname, mode.native() as i32)?;
        }
        if sampler.addressing.contains(&AddressMode::Border) {
            self.set_floats(gl::TEXTURE_BORDER_COLOR, &sampler.border_color.to_array())?;
        }

        if filter.is_anisotropic() {
            self.set_float(gl::TEXTURE_MAX_ANISOTROPY, f32::from(sampler.max_anisotropy.max(1)))?;
        }
        if filter.is_comparison() {
            self.set_int(gl::TEXTURE_COMPARE_MODE, gl::COMPARE_REF_TO_TEXTURE as i32)?;
            let func = sampler.comparison.native().unwrap_or(gl::LEQUAL);
            self.set_int(gl::TEXTURE_COMPARE_FUNC, func as i32)?;
        } else {
            self.set_int(gl::TEXTURE_COMPARE_MODE, gl::NONE as i32)?;
        }

        self.set_float(gl::TEXTURE_LOD_BIAS, sampler.mip_bias)?;
        self.set_float(gl::TEXTURE_MIN_LOD, sampler.min_lod)?;
        self.set_float(gl::TEXTURE_MAX_LOD, sampler.max_lod)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::handle::{allocate, BufferKind};
    use crate::driver::SoftwareDriver;
    use glam::UVec2;
    use std::rc::Rc;

    #[test]
    fn guard_drop_leaves_target_empty() {
        let software = Rc::new(SoftwareDriver::new());
        software.create_context(UVec2::new(8, 8), None);
        let driver: Rc<dyn Driver> = software.clone();

        let a = allocate::<BufferKind>(&driver, "glGenBuffers", |d| d.gen_buffer()).unwrap();
        let b = allocate::<BufferKind>(&driver, "glGenBuffers", |d| d.gen_buffer()).unwrap();

        // Something else is bound before the guard
        software.bind_buffer(gl::UNIFORM_BUFFER, a.id());
        {
            let guard = b.bind(gl::UNIFORM_BUFFER).unwrap();
            assert_eq!(guard.id(), b.id());
            assert_eq!(software.get_binding(gl::UNIFORM_BUFFER), b.id());
        }
        assert_eq!(software.get_binding(gl::UNIFORM_BUFFER), 0);
    }

    #[test]
    fn failed_bind_yields_no_guard() {
        let software = Rc::new(SoftwareDriver::new());
        software.create_context(UVec2::new(8, 8), None);
        let driver: Rc<dyn Driver> = software.clone();

        let buffer = allocate::<BufferKind>(&driver, "glGenBuffers", |d| d.gen_buffer()).unwrap();
        let err = buffer.bind(0x1234).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(err.code(), gl::INVALID_ENUM);
        assert_eq!(err.operation(), "glBindBuffer");
    }
}
