// Context - native graphics state scope
//
// Responsibilities:
// - Native context creation and teardown
// - Capability queries (cached once)
// - The framebuffer that pipeline states attach their render targets to

use std::cell::Cell;
use std::rc::Rc;

use bitflags::bitflags;
use glam::{UVec2, UVec3, Vec4};
use raw_window_handle::RawWindowHandle;

use super::command::CommandList;
use super::handle::{allocate, FrameBufferKind, Owned};
use super::types::PixelFormat;
use crate::driver::{gl, Driver, NativeEnum};
use crate::error::{check, BackendResult, ErrorKind};

/// Parameters of a new context
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextDesc {
    pub size: UVec2,
    pub backbuffer: PixelFormat,
    /// Window to present into; `None` creates an offscreen context
    pub window: Option<RawWindowHandle>,
}

impl Default for ContextDesc {
    fn default() -> Self {
        Self { size: UVec2::new(800, 600), backbuffer: PixelFormat::R8G8B8A8Unorm, window: None }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u32 {
        const RENDER_TARGET = 1 << 5;
        const BLEND_EX = 1 << 6;
        const INSTANCING = 1 << 10;
        const INDEPENDENT_BLEND = 1 << 11;
        const COMPUTE_SHADER = 1 << 12;
    }
}

/// Capabilities reported by the driver, queried once per context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Caps {
    pub features: Features,
    /// 4.6 is 46
    pub version: u32,
    pub max_textures: u32,
    pub max_render_targets: u32,
    pub max_texture_size: u32,
    pub max_samples: u32,
    pub max_storage_bindings: u32,
    pub max_uniform_bindings: u32,
    pub max_vertex_attribs: u32,
    pub max_viewports: u32,
    pub max_work_groups: UVec3,
}

impl Caps {
    fn query(driver: &dyn Driver) -> BackendResult<Self> {
        let int = |pname: NativeEnum| -> BackendResult<u32> {
            let value = driver.get_integer(pname);
            check(driver, ErrorKind::Configuration, "glGetIntegerv")?;
            Ok(value.max(0) as u32)
        };
        let work_groups = |index: u32| -> BackendResult<u32> {
            let value = driver.get_integer_indexed(gl::MAX_COMPUTE_WORK_GROUP_COUNT, index);
            check(driver, ErrorKind::Configuration, "glGetIntegeri_v")?;
            Ok(value.max(0) as u32)
        };

        let version = int(gl::MAJOR_VERSION)? * 10 + int(gl::MINOR_VERSION)?;
        let mut features = Features::RENDER_TARGET | Features::BLEND_EX | Features::INSTANCING;
        if version >= 40 {
            features |= Features::INDEPENDENT_BLEND;
        }
        if version >= 43 {
            features |= Features::COMPUTE_SHADER;
        }
        let max_work_groups = if features.contains(Features::COMPUTE_SHADER) {
            UVec3::new(work_groups(0)?, work_groups(1)?, work_groups(2)?)
        } else {
            UVec3::ZERO
        };

        Ok(Self {
            features,
            version,
            max_textures: int(gl::MAX_COMBINED_TEXTURE_IMAGE_UNITS)?,
            max_render_targets: int(gl::MAX_COLOR_ATTACHMENTS)?.min(int(gl::MAX_DRAW_BUFFERS)?),
            max_texture_size: int(gl::MAX_TEXTURE_SIZE)?,
            max_samples: int(gl::MAX_SAMPLES)?,
            max_storage_bindings: int(gl::MAX_SHADER_STORAGE_BUFFER_BINDINGS)?,
            max_uniform_bindings: int(gl::MAX_UNIFORM_BUFFER_BINDINGS)?,
            max_vertex_attribs: int(gl::MAX_VERTEX_ATTRIBS)?,
            max_viewports: int(gl::MAX_VIEWPORTS)?,
            max_work_groups,
        })
    }
}

/// Native context shared by every resource and command list created in it.
///
/// Dropping the context destroys the native context; resources that outlive
/// it become invalid and their later resets do nothing.
pub struct Context {
    // Dropped explicitly before the native context goes away
    render_target: Owned<FrameBufferKind>,
    driver: Rc<dyn Driver>,
    caps: Caps,
    size: Cell<UVec2>,
    backbuffer: PixelFormat,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("render_target", &self.render_target)
            .field("caps", &self.caps)
            .field("size", &self.size.get())
            .field("backbuffer", &self.backbuffer)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create a native context
    ///
    /// # Arguments
    /// * `driver` - Native driver the context and all its resources talk to
    /// * `desc` - Initial size, backbuffer format and optional window
    pub fn new(driver: Rc<dyn Driver>, desc: &ContextDesc) -> BackendResult<Self> {
        log::info!("Creating context: {}x{} ({:?})", desc.size.x, desc.size.y, desc.backbuffer);

        // Step 1: Native context
        driver.create_context(desc.size, desc.window);
        check(&*driver, ErrorKind::Allocation, "createContext")?;

        // From here on, dropping `context` tears the native context down
        let mut context = Self {
            render_target: Owned::null(Rc::clone(&driver)),
            driver,
            caps: Caps::default(),
            size: Cell::new(desc.size),
            backbuffer: desc.backbuffer,
        };

        // Step 2: Capabilities
        context.caps = Caps::query(&*context.driver)?;
        log::debug!(
            version = context.caps.version,
            max_render_targets = context.caps.max_render_targets,
            max_textures = context.caps.max_textures;
            "Context capabilities"
        );

        // Step 3: Render framebuffer for pipeline render targets
        context.render_target = allocate(&context.driver, "glGenFramebuffers", |d| d.gen_framebuffer())?;

        log::info!("Context created");
        Ok(context)
    }

    pub fn driver(&self) -> &Rc<dyn Driver> {
        &self.driver
    }

    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    pub fn size(&self) -> UVec2 {
        self.size.get()
    }

    pub fn backbuffer_format(&self) -> PixelFormat {
        self.backbuffer
    }

    /// Resize the default framebuffer and reset the first viewport to cover it
    pub fn resize(&self, size: UVec2) -> BackendResult<()> {
        self.driver.resize_context(size);
        check(&*self.driver, ErrorKind::Configuration, "resizeContext")?;
        self.driver.viewport_indexed(0, Vec4::new(0.0, 0.0, size.x as f32, size.y as f32));
        check(&*self.driver, ErrorKind::Configuration, "glViewportIndexedf")?;
        self.size.set(size);
        log::debug!(width = size.x, height = size.y; "Context resized");
        Ok(())
    }

    /// Block until the driver has completed all submitted work
    pub fn finish(&self) -> BackendResult<()> {
        self.driver.finish();
        check(&*self.driver, ErrorKind::Configuration, "glFinish")
    }

    /// Open a command list recording against this context
    pub fn create_command_list(&self) -> CommandList<'_> {
        CommandList::new(self)
    }

    pub(crate) fn render_target(&self) -> &Owned<FrameBufferKind> {
        &self.render_target
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        log::info!("Destroying context");
        let _ = self.render_target.reset();
        self.driver.destroy_context();
        let _ = self.driver.get_error();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Limits, SoftwareDriver};

    #[test]
    fn caps_follow_driver_limits() {
        let limits = Limits { max_color_attachments: 4, max_draw_buffers: 6, ..Limits::default() };
        let software = Rc::new(SoftwareDriver::with_limits(limits));
        let ctx = Context::new(software.clone(), &ContextDesc::default()).unwrap();

        let caps = ctx.caps();
        assert_eq!(caps.version, 46);
        assert_eq!(caps.max_render_targets, 4);
        assert!(caps.features.contains(Features::COMPUTE_SHADER));
        assert_eq!(caps.max_work_groups, UVec3::splat(65535));
    }

    #[test]
    fn failed_setup_tears_down_native_context() {
        let software = Rc::new(SoftwareDriver::new());
        software.fail_next("glGenFramebuffers", gl::OUT_OF_MEMORY);
        let err = Context::new(software.clone(), &ContextDesc::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);
        assert_eq!(software.context_size(), None);
    }

    #[test]
    fn second_context_on_one_driver_is_refused() {
        let software = Rc::new(SoftwareDriver::new());
        let _first = Context::new(software.clone(), &ContextDesc::default()).unwrap();
        let err = Context::new(software.clone(), &ContextDesc::default()).unwrap_err();
        assert_eq!(err.code(), gl::INVALID_OPERATION);
        assert_eq!(err.operation(), "createContext");
    }

    #[test]
    fn resize_updates_size() {
        let software = Rc::new(SoftwareDriver::new());
        let ctx = Context::new(software.clone(), &ContextDesc::default()).unwrap();
        ctx.resize(UVec2::new(320, 200)).unwrap();
        assert_eq!(ctx.size(), UVec2::new(320, 200));
        assert_eq!(software.context_size(), Some(UVec2::new(320, 200)));
        assert!(ctx.resize(UVec2::ZERO).is_err());
    }
}
