// Shader stages and linked programs

use super::device::Context;
use super::handle::{allocate, Owned, ProgramKind, ShaderKind};
use super::types::ShaderStage;
use crate::driver::{gl, ObjectId};
use crate::error::{check, BackendError, BackendResult, ErrorKind};

/// One compiled shader stage
#[derive(Debug)]
pub struct ShaderObject {
    handle: Owned<ShaderKind>,
    stage: ShaderStage,
}

impl ShaderObject {
    /// Compile `source` for `stage`.
    ///
    /// A rejected source fails with [`ErrorKind::Compile`] whose message is
    /// the driver's info log.
    pub fn compile(ctx: &Context, stage: ShaderStage, source: &str) -> BackendResult<Self> {
        let handle = allocate::<ShaderKind>(ctx.driver(), "glCreateShader", |d| d.create_shader(stage.native()))?;
        let driver = &**handle.driver();

        driver.shader_source(handle.id(), source);
        check(driver, ErrorKind::Configuration, "glShaderSource")?;
        driver.compile_shader(handle.id());
        check(driver, ErrorKind::Configuration, "glCompileShader")?;

        let compiled = driver.get_shader_iv(handle.id(), gl::COMPILE_STATUS);
        check(driver, ErrorKind::Configuration, "glGetShaderiv")?;
        let shader = Self { handle, stage };
        if compiled == 0 {
            let log = shader.log();
            return Err(BackendError::new(ErrorKind::Compile, 0, "glCompileShader", log));
        }

        log::debug!(id = shader.id(); "Compiled {:?} shader", stage);
        Ok(shader)
    }

    /// Driver diagnostics from the last compile; empty when there are none
    pub fn log(&self) -> String {
        let driver = &**self.handle.driver();
        let log = driver.shader_info_log(self.handle.id());
        let _ = driver.get_error();
        log
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn id(&self) -> ObjectId {
        self.handle.id()
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }
}

/// Linked program owning the stages it was linked from
#[derive(Debug)]
pub struct ProgramObject {
    // Dropped after the program so stages are never deleted while attached
    handle: Owned<ProgramKind>,
    shaders: Vec<ShaderObject>,
}

impl ProgramObject {
    /// Attach and link `shaders`.
    ///
    /// Link failure is reported as [`ErrorKind::Compile`] with the program
    /// log as the message.
    pub fn link(ctx: &Context, shaders: Vec<ShaderObject>) -> BackendResult<Self> {
        let handle = allocate::<ProgramKind>(ctx.driver(), "glCreateProgram", |d| d.create_program())?;
        let driver = &**handle.driver();

        for shader in &shaders {
            driver.attach_shader(handle.id(), shader.id());
            check(driver, ErrorKind::Configuration, "glAttachShader")?;
        }
        driver.link_program(handle.id());
        check(driver, ErrorKind::Configuration, "glLinkProgram")?;

        let linked = driver.get_program_iv(handle.id(), gl::LINK_STATUS);
        check(driver, ErrorKind::Configuration, "glGetProgramiv")?;
        let program = Self { handle, shaders };
        if linked == 0 {
            let log = program.log();
            return Err(BackendError::new(ErrorKind::Compile, 0, "glLinkProgram", log));
        }

        log::debug!(id = program.id(), stages = program.shaders.len(); "Linked program");
        Ok(program)
    }

    /// Location of a uniform, `None` when the program has no active uniform
    /// by that name
    pub fn uniform_location(&self, name: &str) -> BackendResult<Option<i32>> {
        let driver = &**self.handle.driver();
        let location = driver.get_uniform_location(self.handle.id(), name);
        check(driver, ErrorKind::Configuration, "glGetUniformLocation")?;
        Ok((location >= 0).then_some(location))
    }

    pub fn attribute_location(&self, name: &str) -> BackendResult<Option<u32>> {
        let driver = &**self.handle.driver();
        let location = driver.get_attrib_location(self.handle.id(), name);
        check(driver, ErrorKind::Configuration, "glGetAttribLocation")?;
        Ok((location >= 0).then_some(location as u32))
    }

    pub fn log(&self) -> String {
        let driver = &**self.handle.driver();
        let log = driver.program_info_log(self.handle.id());
        let _ = driver.get_error();
        log
    }

    pub fn shaders(&self) -> &[ShaderObject] {
        &self.shaders
    }

    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.shaders.iter().any(|s| s.stage == stage)
    }

    pub fn id(&self) -> ObjectId {
        self.handle.id()
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }
}
