// Command list
//
// Commands are validated as they are recorded and replayed against the
// driver on `execute`. A list executes once; every call afterwards is a
// protocol error.

use glam::{UVec3, UVec4, Vec4};

use super::buffer::Buffer;
use super::device::Context;
use super::pipeline::{ComputePipeline, PipelineState};
use super::texture::Texture;
use super::types::{BarrierFlags, BufferUsage, ClearFlags, ShaderParameter, ShaderType};
use crate::driver::{gl, Driver, UniformData};
use crate::error::{check, BackendError, BackendResult, ErrorKind};

/// Value bound to a [`ShaderParameter`]
#[derive(Debug, Clone, Copy)]
pub enum ShaderValue<'a> {
    Float(f32),
    Int(i32),
    UInt(u32),
    Floats(&'a [f32]),
    Ints(&'a [i32]),
    UInts(&'a [u32]),
    Texture(&'a Texture),
    /// Bound to the storage or uniform binding point `index`, by the buffer's usage
    Buffer(&'a Buffer),
}

/// Pipeline a command list can make current
#[derive(Debug, Clone, Copy)]
pub enum PipelineRef<'a> {
    Graphics(&'a PipelineState),
    Compute(&'a ComputePipeline),
}

impl<'a> From<&'a PipelineState> for PipelineRef<'a> {
    fn from(pipeline: &'a PipelineState) -> Self {
        PipelineRef::Graphics(pipeline)
    }
}

impl<'a> From<&'a ComputePipeline> for PipelineRef<'a> {
    fn from(pipeline: &'a ComputePipeline) -> Self {
        PipelineRef::Compute(pipeline)
    }
}

#[derive(Debug)]
enum Command<'a> {
    SetPipeline(PipelineRef<'a>),
    Constants(Vec<(ShaderParameter<'a>, ShaderValue<'a>)>),
    Draw { vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32 },
    DrawIndexed { index_count: u32, instance_count: u32, start_index: u32, base_vertex: i32, start_instance: u32 },
    Dispatch,
    Barrier(BarrierFlags),
    Clear { flags: ClearFlags, color: Vec4, depth: f32, stencil: u8, rects: Vec<UVec4> },
    Copy { src: &'a Buffer, dest: &'a Buffer, src_offset: usize, dest_offset: usize, bytes: usize },
    CopyRegion { src: &'a Texture, dest: &'a Texture, level: u32, src_offset: UVec3, dest_offset: UVec3, size: UVec3 },
    Viewport { index: u32, rect: Vec4, depth: (f32, f32) },
    Scissor { index: u32, rect: UVec4 },
}

/// Recorded sequence of state changes and work
pub struct CommandList<'a> {
    ctx: &'a Context,
    commands: Vec<Command<'a>>,
    active: Option<PipelineRef<'a>>,
    executed: bool,
}

impl<'a> CommandList<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        log::trace!("Opened command list");
        Self { ctx, commands: Vec::new(), active: None, executed: false }
    }

    pub fn set_pipeline_state(&mut self, pipeline: impl Into<PipelineRef<'a>>) -> BackendResult<()> {
        self.recording("set_pipeline_state")?;
        let pipeline = pipeline.into();
        self.active = Some(pipeline);
        self.commands.push(Command::SetPipeline(pipeline));
        Ok(())
    }

    /// Bind constants to the active pipeline's program.
    ///
    /// `params` and `values` pair up by position.
    pub fn set_shader_constants(
        &mut self,
        params: &[ShaderParameter<'a>],
        values: &[ShaderValue<'a>],
    ) -> BackendResult<()> {
        const OP: &str = "set_shader_constants";
        self.recording(OP)?;
        if params.len() != values.len() {
            return Err(BackendError::misuse(
                OP,
                format!("{} parameters but {} values", params.len(), values.len()),
            ));
        }
        if self.active.is_none() {
            return Err(BackendError::misuse(OP, "no pipeline is set"));
        }
        for (param, value) in params.iter().zip(values) {
            validate_constant(param, value)?;
        }
        let pairs = params.iter().copied().zip(values.iter().copied()).collect();
        self.commands.push(Command::Constants(pairs));
        Ok(())
    }

    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    ) -> BackendResult<()> {
        self.recording("draw")?;
        self.graphics("draw")?;
        self.commands.push(Command::Draw { vertex_count, instance_count, start_vertex, start_instance });
        Ok(())
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) -> BackendResult<()> {
        self.recording("draw_indexed")?;
        let pipeline = self.graphics("draw_indexed")?;
        if pipeline.layout().index_format().is_none() {
            return Err(BackendError::misuse("draw_indexed", "pipeline has no index buffer"));
        }
        self.commands.push(Command::DrawIndexed { index_count, instance_count, start_index, base_vertex, start_instance });
        Ok(())
    }

    /// Run the active compute pipeline with its recorded workgroup count
    pub fn dispatch(&mut self) -> BackendResult<()> {
        self.recording("dispatch")?;
        if !matches!(self.active, Some(PipelineRef::Compute(_))) {
            return Err(BackendError::misuse("dispatch", "no compute pipeline is set"));
        }
        self.commands.push(Command::Dispatch);
        Ok(())
    }

    pub fn barrier(&mut self, flags: BarrierFlags) -> BackendResult<()> {
        self.recording("barrier")?;
        self.commands.push(Command::Barrier(flags));
        Ok(())
    }

    pub fn clear(&mut self, flags: ClearFlags, color: Vec4, depth: f32, stencil: u8) -> BackendResult<()> {
        self.clear_rects(flags, color, depth, stencil, &[])
    }

    /// Clear only inside `rects` (x, y, width, height), one scissored clear
    /// each; an empty list clears the whole target.
    ///
    /// The scissor state afterwards is whatever this list last set with
    /// [`CommandList::set_scissor`] for viewport 0, or disabled.
    pub fn clear_rects(
        &mut self,
        flags: ClearFlags,
        color: Vec4,
        depth: f32,
        stencil: u8,
        rects: &[UVec4],
    ) -> BackendResult<()> {
        const OP: &str = "clear";
        self.recording(OP)?;
        let limit = i32::MAX as u32;
        if let Some(rect) = rects.iter().find(|r| r.z == 0 || r.w == 0 || r.max_element() > limit) {
            return Err(BackendError::invalid(OP, format!("bad clear rectangle {rect}")));
        }
        self.commands.push(Command::Clear { flags, color, depth, stencil, rects: rects.to_vec() });
        Ok(())
    }

    /// Copy `bytes` from `src` at `src_offset` to `dest` at `dest_offset`
    pub fn copy_subresource(
        &mut self,
        src: &'a Buffer,
        dest: &'a Buffer,
        src_offset: usize,
        dest_offset: usize,
        bytes: usize,
    ) -> BackendResult<()> {
        const OP: &str = "copy_subresource";
        self.recording(OP)?;
        let fits = |offset: usize, len: usize| offset.checked_add(bytes).is_some_and(|end| end <= len);
        if !fits(src_offset, src.len()) || !fits(dest_offset, dest.len()) {
            return Err(BackendError::invalid(OP, format!("{bytes}-byte copy is out of range")));
        }
        self.commands.push(Command::Copy { src, dest, src_offset, dest_offset, bytes });
        Ok(())
    }

    /// Copy a `size` box of texels at mip `level` from `src` to `dest`.
    ///
    /// Both textures need the same texel size and sample count and the box
    /// must fit both levels.
    pub fn copy_resource_region(
        &mut self,
        src: &'a Texture,
        dest: &'a Texture,
        level: u32,
        src_offset: UVec3,
        dest_offset: UVec3,
        size: UVec3,
    ) -> BackendResult<()> {
        const OP: &str = "copy_resource_region";
        self.recording(OP)?;
        let (from, to) = (src.desc(), dest.desc());
        if level >= from.mip_levels || level >= to.mip_levels {
            return Err(BackendError::invalid(OP, format!("level {level} is missing from a texture")));
        }
        if from.format.info().bytes_per_pixel != to.format.info().bytes_per_pixel || from.samples != to.samples {
            return Err(BackendError::invalid(
                OP,
                format!("{:?} and {:?} textures are not copy-compatible", from.format, to.format),
            ));
        }
        let fits = |offset: UVec3, extent: UVec3| {
            (0..3).all(|axis| offset[axis].checked_add(size[axis]).is_some_and(|end| end <= extent[axis]))
        };
        if !fits(src_offset, from.level_size(level)) || !fits(dest_offset, to.level_size(level)) {
            return Err(BackendError::invalid(OP, format!("{size} box is out of range at level {level}")));
        }
        self.commands.push(Command::CopyRegion { src, dest, level, src_offset, dest_offset, size });
        Ok(())
    }

    pub fn set_viewport(&mut self, index: u32, rect: Vec4, depth: (f32, f32)) -> BackendResult<()> {
        self.recording("set_viewport")?;
        self.commands.push(Command::Viewport { index, rect, depth });
        Ok(())
    }

    /// Scissor rectangle as x, y, width, height
    pub fn set_scissor(&mut self, index: u32, rect: UVec4) -> BackendResult<()> {
        self.recording("set_scissor")?;
        self.commands.push(Command::Scissor { index, rect });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Replay every recorded command, then flush.
    ///
    /// The list is spent afterwards even if replay fails part way.
    pub fn execute(&mut self) -> BackendResult<()> {
        self.recording("execute")?;
        self.executed = true;
        log::debug!(commands = self.commands.len(); "Executing command list");

        let mut state = Replay::default();
        for command in &self.commands {
            self.replay(command, &mut state)?;
        }
        let driver = &**self.ctx.driver();
        driver.flush();
        check(driver, ErrorKind::Configuration, "glFlush")
    }

    pub fn destroy(self) {
        log::trace!(commands = self.commands.len(), executed = self.executed; "Destroyed command list");
    }

    fn recording(&self, operation: &'static str) -> BackendResult<()> {
        if self.executed {
            return Err(BackendError::misuse(operation, "command list was already executed"));
        }
        Ok(())
    }

    fn graphics(&self, operation: &'static str) -> BackendResult<&'a PipelineState> {
        match self.active {
            Some(PipelineRef::Graphics(pipeline)) => Ok(pipeline),
            _ => Err(BackendError::misuse(operation, "no graphics pipeline is set")),
        }
    }

    fn replay(&self, command: &Command<'a>, state: &mut Replay<'a>) -> BackendResult<()> {
        let ctx = self.ctx;
        let driver = &**ctx.driver();
        let current = &mut state.pipeline;
        match *command {
            Command::SetPipeline(pipeline) => {
                match pipeline {
                    PipelineRef::Graphics(p) => p.apply(ctx)?,
                    PipelineRef::Compute(p) => p.apply(ctx)?,
                }
                *current = Some(pipeline);
            }
            Command::Constants(ref pairs) => {
                let program = match *current {
                    Some(PipelineRef::Graphics(p)) => p.program(),
                    Some(PipelineRef::Compute(p)) => p.program(),
                    None => return Err(BackendError::misuse("set_shader_constants", "no pipeline is set")),
                };
                for (param, value) in pairs {
                    bind_constant(driver, program.uniform_location(param.name)?, param, value)?;
                }
            }
            Command::Draw { vertex_count, instance_count, start_vertex, start_instance } => {
                let Some(PipelineRef::Graphics(p)) = *current else {
                    return Err(BackendError::misuse("draw", "no graphics pipeline is set"));
                };
                driver.draw_arrays_instanced(
                    p.primitive().native(),
                    start_vertex as i32,
                    vertex_count as i32,
                    instance_count.max(1) as i32,
                    start_instance,
                );
                check(driver, ErrorKind::Configuration, "glDrawArraysInstanced")?;
            }
            Command::DrawIndexed { index_count, instance_count, start_index, base_vertex, start_instance } => {
                let Some(PipelineRef::Graphics(p)) = *current else {
                    return Err(BackendError::misuse("draw_indexed", "no graphics pipeline is set"));
                };
                let Some(format) = p.layout().index_format() else {
                    return Err(BackendError::misuse("draw_indexed", "pipeline has no index buffer"));
                };
                driver.draw_elements_instanced(
                    p.primitive().native(),
                    index_count as i32,
                    format.native(),
                    start_index as usize * format.size(),
                    instance_count.max(1) as i32,
                    base_vertex,
                    start_instance,
                );
                check(driver, ErrorKind::Configuration, "glDrawElementsInstanced")?;
            }
            Command::Dispatch => {
                let Some(PipelineRef::Compute(p)) = *current else {
                    return Err(BackendError::misuse("dispatch", "no compute pipeline is set"));
                };
                driver.dispatch_compute(p.workgroups());
                check(driver, ErrorKind::Configuration, "glDispatchCompute")?;
            }
            Command::Barrier(flags) => {
                driver.memory_barrier(flags.native());
                check(driver, ErrorKind::Configuration, "glMemoryBarrier")?;
            }
            Command::Clear { flags, color, depth, stencil, ref rects } => {
                if flags.contains(ClearFlags::COLOR) {
                    driver.clear_color(color);
                }
                if flags.contains(ClearFlags::DEPTH) {
                    driver.clear_depth(depth);
                }
                if flags.contains(ClearFlags::STENCIL) {
                    driver.clear_stencil(i32::from(stencil));
                }
                if rects.is_empty() {
                    driver.clear(flags.native());
                    return check(driver, ErrorKind::Configuration, "glClear");
                }

                driver.enable(gl::SCISSOR_TEST);
                for rect in rects {
                    let rect = rect.as_ivec4();
                    driver.scissor_indexed(0, rect.x, rect.y, rect.z, rect.w);
                    check(driver, ErrorKind::Configuration, "glScissorIndexed")?;
                    driver.clear(flags.native());
                    check(driver, ErrorKind::Configuration, "glClear")?;
                }
                // Put back the list's own scissor
                match state.scissor {
                    Some(rect) => {
                        let rect = rect.as_ivec4();
                        driver.scissor_indexed(0, rect.x, rect.y, rect.z, rect.w);
                    }
                    None => driver.disable(gl::SCISSOR_TEST),
                }
                check(driver, ErrorKind::Configuration, "glScissorIndexed")?;
            }
            Command::Copy { src, dest, src_offset, dest_offset, bytes } => {
                let _read = src.handle().bind(gl::COPY_READ_BUFFER)?;
                let _write = dest.handle().bind(gl::COPY_WRITE_BUFFER)?;
                driver.copy_buffer_sub_data(gl::COPY_READ_BUFFER, gl::COPY_WRITE_BUFFER, src_offset, dest_offset, bytes);
                check(driver, ErrorKind::Configuration, "glCopyBufferSubData")?;
            }
            Command::CopyRegion { src, dest, level, src_offset, dest_offset, size } => {
                driver.copy_image_sub_data(
                    src.id(),
                    src.target(),
                    src_offset,
                    dest.id(),
                    dest.target(),
                    dest_offset,
                    level as i32,
                    size,
                );
                check(driver, ErrorKind::Configuration, "glCopyImageSubData")?;
            }
            Command::Viewport { index, rect, depth } => {
                driver.viewport_indexed(index, rect);
                check(driver, ErrorKind::Configuration, "glViewportIndexedf")?;
                driver.depth_range_indexed(index, depth.0, depth.1);
                check(driver, ErrorKind::Configuration, "glDepthRangeIndexed")?;
            }
            Command::Scissor { index, rect } => {
                if index == 0 {
                    state.scissor = Some(rect);
                }
                driver.enable(gl::SCISSOR_TEST);
                let rect = rect.as_ivec4();
                driver.scissor_indexed(index, rect.x, rect.y, rect.z, rect.w);
                check(driver, ErrorKind::Configuration, "glScissorIndexed")?;
            }
        }
        Ok(())
    }
}

/// State carried between replayed commands
#[derive(Default)]
struct Replay<'a> {
    pipeline: Option<PipelineRef<'a>>,
    scissor: Option<UVec4>,
}

/// Record-time check that a value fits its parameter
fn validate_constant(param: &ShaderParameter<'_>, value: &ShaderValue<'_>) -> BackendResult<()> {
    const OP: &str = "set_shader_constants";
    let name = param.name;
    if param.ty == ShaderType::Double {
        return Err(BackendError::invalid(OP, format!("'{name}': double-precision constants are not supported")));
    }
    let scalars = match (param.ty, value) {
        (_, ShaderValue::Buffer(buffer)) => {
            return match buffer.usage() {
                BufferUsage::Storage | BufferUsage::Uniform => Ok(()),
                usage => Err(BackendError::invalid(OP, format!("'{name}': {usage:?} buffers can't be bound"))),
            };
        }
        (ShaderType::Texture | ShaderType::TexCube, ShaderValue::Texture(_)) => return Ok(()),
        (ShaderType::Float | ShaderType::Half, ShaderValue::Float(_)) => 1,
        (ShaderType::Float | ShaderType::Half, ShaderValue::Floats(v)) => v.len(),
        (ShaderType::Int, ShaderValue::Int(_)) => 1,
        (ShaderType::Int, ShaderValue::Ints(v)) => v.len(),
        (ShaderType::UInt | ShaderType::Color32, ShaderValue::UInt(_)) => 1,
        (ShaderType::UInt | ShaderType::Color32, ShaderValue::UInts(v)) => v.len(),
        (ty, value) => {
            return Err(BackendError::invalid(OP, format!("'{name}': {value:?} doesn't match type {ty:?}")));
        }
    };

    // Packed colours expand to one vec4 each
    let per_element = if param.ty == ShaderType::Color32 { 1 } else { param.components() as usize };
    let matrix = param.width > 1;
    if per_element == 0 || !(1..=4).contains(&param.length) || param.width > 4 {
        return Err(BackendError::invalid(OP, format!("'{name}': unsupported shape {}x{}", param.length, param.width)));
    }
    if matrix && !matches!(param.ty, ShaderType::Float | ShaderType::Half) {
        return Err(BackendError::invalid(OP, format!("'{name}': matrices must be floating point")));
    }
    if scalars == 0 || scalars % per_element != 0 {
        return Err(BackendError::invalid(
            OP,
            format!("'{name}': {scalars} values don't fill elements of {per_element}"),
        ));
    }
    Ok(())
}

/// Unpack BGRA8 colours to normalized RGBA floats
fn unpack_colors(packed: &[u32]) -> Vec<f32> {
    packed
        .iter()
        .flat_map(|&c| {
            let [b, g, r, a] = c.to_le_bytes();
            [r, g, b, a].map(|v| f32::from(v) / 255.0)
        })
        .collect()
}

fn bind_constant(
    driver: &dyn Driver,
    location: Option<i32>,
    param: &ShaderParameter<'_>,
    value: &ShaderValue<'_>,
) -> BackendResult<()> {
    match *value {
        ShaderValue::Texture(texture) => {
            driver.active_texture(gl::TEXTURE0 + param.index);
            check(driver, ErrorKind::Configuration, "glActiveTexture")?;
            driver.bind_texture(texture.target(), texture.id());
            check(driver, ErrorKind::Configuration, "glBindTexture")?;
            driver.active_texture(gl::TEXTURE0);
            if let Some(location) = location {
                driver.uniform(location, UniformData::Int { components: 1, values: &[param.index as i32] });
                check(driver, ErrorKind::Configuration, "glUniform")?;
            }
            return Ok(());
        }
        ShaderValue::Buffer(buffer) => {
            let target = match buffer.usage() {
                BufferUsage::Uniform => gl::UNIFORM_BUFFER,
                _ => gl::SHADER_STORAGE_BUFFER,
            };
            driver.bind_buffer_base(target, param.index, buffer.id());
            return check(driver, ErrorKind::Configuration, "glBindBufferBase");
        }
        _ => {}
    }

    // Inactive uniforms are silently skipped, as the driver would
    let Some(location) = location else { return Ok(()) };
    let rows = param.length as u8;
    let columns = param.width as u8;
    let colors;
    let data = match *value {
        ShaderValue::Float(ref v) => float_data(std::slice::from_ref(v), rows, columns),
        ShaderValue::Floats(v) => float_data(v, rows, columns),
        ShaderValue::Int(ref v) => UniformData::Int { components: rows, values: std::slice::from_ref(v) },
        ShaderValue::Ints(v) => UniformData::Int { components: rows, values: v },
        ShaderValue::UInt(v) if param.ty == ShaderType::Color32 => {
            colors = unpack_colors(&[v]);
            UniformData::Float { components: 4, values: &colors }
        }
        ShaderValue::UInts(v) if param.ty == ShaderType::Color32 => {
            colors = unpack_colors(v);
            UniformData::Float { components: 4, values: &colors }
        }
        ShaderValue::UInt(ref v) => UniformData::UInt { components: rows, values: std::slice::from_ref(v) },
        ShaderValue::UInts(v) => UniformData::UInt { components: rows, values: v },
        ShaderValue::Texture(_) | ShaderValue::Buffer(_) => return Ok(()),
    };
    driver.uniform(location, data);
    check(driver, ErrorKind::Configuration, "glUniform")
}

fn float_data(values: &[f32], rows: u8, columns: u8) -> UniformData<'_> {
    if columns > 1 {
        UniformData::Matrix { columns, rows, values }
    } else {
        UniformData::Float { components: rows, values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::device::ContextDesc;
    use crate::backend::pipeline::{PipelineDesc, ShaderStages};
    use crate::backend::shader::ShaderObject;
    use crate::backend::types::{Blend, ShaderStage};
    use crate::driver::software::UniformValue;
    use crate::driver::SoftwareDriver;
    use glam::UVec3;
    use std::rc::Rc;

    const VERTEX: &str = "#version 460\n\
        uniform mat4 transform;\n\
        uniform vec4 tint;\n\
        uniform sampler2D albedo;\n\
        void main() { gl_Position = transform * tint; }\n";

    fn setup() -> (Rc<SoftwareDriver>, Context) {
        let software = Rc::new(SoftwareDriver::new());
        let ctx = Context::new(software.clone(), &ContextDesc::default()).unwrap();
        (software, ctx)
    }

    fn pipeline(ctx: &Context) -> PipelineState {
        let stages = ShaderStages::new().with(ShaderObject::compile(ctx, ShaderStage::Vertex, VERTEX));
        PipelineState::create(ctx, PipelineDesc::new(stages), &[], &Blend::REPLACE, &[], &[], None).unwrap()
    }

    #[test]
    fn constants_need_a_pipeline_and_matching_counts() {
        let (_software, ctx) = setup();
        let pipeline = pipeline(&ctx);
        let mut list = ctx.create_command_list();
        let tint = ShaderParameter::new("tint", ShaderType::Float, 4);

        let err = list.set_shader_constants(&[tint], &[ShaderValue::Floats(&[1.0; 4])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Misuse);

        list.set_pipeline_state(&pipeline).unwrap();
        let err = list.set_shader_constants(&[tint], &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Misuse);
        let err = list.set_shader_constants(&[tint], &[ShaderValue::Floats(&[1.0; 3])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        let double = ShaderParameter::new("tint", ShaderType::Double, 4);
        let err = list.set_shader_constants(&[double], &[ShaderValue::Floats(&[1.0; 4])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn constants_reach_the_program() {
        let (software, ctx) = setup();
        let pipeline = pipeline(&ctx);
        let texture = Texture::create(
            &ctx,
            &crate::backend::texture::TextureDesc::new_2d(
                crate::backend::types::PixelFormat::R8G8B8A8Unorm,
                glam::UVec2::new(2, 2),
            ),
            None,
        )
        .unwrap();
        let identity = glam::Mat4::IDENTITY.to_cols_array();

        let mut list = ctx.create_command_list();
        list.set_pipeline_state(&pipeline).unwrap();
        list.set_shader_constants(
            &[
                ShaderParameter::matrix("transform", 4, 4),
                ShaderParameter::new("tint", ShaderType::Color32, 4),
                ShaderParameter::texture("albedo", 3),
            ],
            &[ShaderValue::Floats(&identity), ShaderValue::UInt(0xFF00_00FF), ShaderValue::Texture(&texture)],
        )
        .unwrap();
        list.execute().unwrap();

        let program = pipeline.program();
        let tint = program.uniform_location("tint").unwrap().unwrap();
        assert_eq!(software.uniform_value(program.id(), tint), Some(UniformValue::Float(vec![0.0, 0.0, 1.0, 1.0])));
        let albedo = program.uniform_location("albedo").unwrap().unwrap();
        assert_eq!(software.uniform_value(program.id(), albedo), Some(UniformValue::Int(vec![3])));
        assert_eq!(software.texture_unit_binding(3, gl::TEXTURE_2D), texture.id());
    }

    #[test]
    fn draw_requires_a_graphics_pipeline() {
        let (_software, ctx) = setup();
        let mut list = ctx.create_command_list();
        assert_eq!(list.draw(3, 1, 0, 0).unwrap_err().kind(), ErrorKind::Misuse);
        assert_eq!(list.dispatch().unwrap_err().kind(), ErrorKind::Misuse);

        let pipeline = pipeline(&ctx);
        list.set_pipeline_state(&pipeline).unwrap();
        list.draw(3, 0, 0, 0).unwrap();
        let err = list.draw_indexed(3, 1, 0, 0, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Misuse);
    }

    #[test]
    fn executed_list_refuses_everything() {
        let (software, ctx) = setup();
        let pipeline = pipeline(&ctx);
        let mut list = ctx.create_command_list();
        list.set_pipeline_state(&pipeline).unwrap();
        list.clear(ClearFlags::COLOR | ClearFlags::DEPTH, Vec4::ONE, 1.0, 0).unwrap();
        list.draw(3, 1, 0, 0).unwrap();
        list.execute().unwrap();

        assert_eq!(software.draws().len(), 1);
        assert_eq!(software.clears().len(), 1);
        assert_eq!(list.draw(3, 1, 0, 0).unwrap_err().kind(), ErrorKind::Misuse);
        assert_eq!(list.execute().unwrap_err().kind(), ErrorKind::Misuse);
        assert_eq!(software.draws().len(), 1);
        list.destroy();
    }

    #[test]
    fn copy_is_range_checked_at_record_time() {
        let (software, ctx) = setup();
        let src = Buffer::with_contents(&ctx, BufferUsage::Storage, &[1u32, 2, 3, 4]).unwrap();
        let dest = Buffer::create(&ctx, BufferUsage::Storage, 8, None).unwrap();

        let mut list = ctx.create_command_list();
        assert!(list.copy_subresource(&src, &dest, 8, 4, 8).is_err());
        list.copy_subresource(&src, &dest, 8, 0, 8).unwrap();
        list.execute().unwrap();
        assert_eq!(software.buffer_contents(dest.id()).unwrap(), bytemuck::cast_slice::<u32, u8>(&[3, 4]));
    }

    #[test]
    fn region_copies_are_checked_then_replayed() {
        use crate::backend::texture::TextureDesc;
        use crate::backend::types::PixelFormat;
        use glam::UVec2;

        let (software, ctx) = setup();
        let desc = TextureDesc::new_2d(PixelFormat::R8G8B8A8Unorm, UVec2::new(4, 4));
        let texels: Vec<u8> = (0..64).collect();
        let src = Texture::create(&ctx, &desc, Some(texels.as_slice())).unwrap();
        let dest = Texture::create(&ctx, &desc, None).unwrap();
        let narrow = Texture::create(&ctx, &TextureDesc::new_2d(PixelFormat::R8Unorm, UVec2::new(4, 4)), None).unwrap();
        let quad = UVec3::new(2, 2, 1);

        let mut list = ctx.create_command_list();
        let err = list.copy_resource_region(&src, &dest, 0, UVec3::new(3, 0, 0), UVec3::ZERO, quad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        let err = list.copy_resource_region(&src, &dest, 1, UVec3::ZERO, UVec3::ZERO, UVec3::ONE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        let err = list.copy_resource_region(&src, &narrow, 0, UVec3::ZERO, UVec3::ZERO, quad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);

        list.copy_resource_region(&src, &dest, 0, UVec3::new(2, 2, 0), UVec3::ZERO, quad).unwrap();
        list.execute().unwrap();

        // The bottom-right quad of `src` lands in the top-left of `dest`
        let copied = software.texture_contents(dest.id(), 0).unwrap();
        assert_eq!(&copied[..8], &texels[40..48]);
        assert_eq!(&copied[16..24], &texels[56..64]);
        assert!(copied[8..16].iter().all(|&b| b == 0));
    }

    #[test]
    fn clear_rectangles_become_scissored_clears() {
        let (software, ctx) = setup();
        let rects = [UVec4::new(0, 0, 8, 8), UVec4::new(16, 4, 2, 2)];

        let mut list = ctx.create_command_list();
        let err = list.clear_rects(ClearFlags::COLOR, Vec4::ONE, 1.0, 0, &[UVec4::new(0, 0, 0, 4)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        list.clear_rects(ClearFlags::COLOR, Vec4::ONE, 1.0, 0, &rects).unwrap();
        list.clear(ClearFlags::COLOR, Vec4::ZERO, 1.0, 0).unwrap();
        list.execute().unwrap();

        let mut list = ctx.create_command_list();
        list.set_scissor(0, UVec4::new(1, 1, 4, 4)).unwrap();
        list.clear_rects(ClearFlags::DEPTH, Vec4::ZERO, 0.5, 0, &rects[..1]).unwrap();
        list.clear(ClearFlags::DEPTH, Vec4::ZERO, 1.0, 0).unwrap();
        list.execute().unwrap();

        let scissors: Vec<_> = software.clears().iter().map(|c| c.scissor).collect();
        assert_eq!(
            scissors,
            vec![Some([0, 0, 8, 8]), Some([16, 4, 2, 2]), None, Some([0, 0, 8, 8]), Some([1, 1, 4, 4])]
        );
    }

    #[test]
    fn dispatch_uses_the_recorded_workgroups() {
        let (software, ctx) = setup();
        let source = "#version 460\nlayout(local_size_x = 2) in;\nvoid main() {}\n";
        software.register_kernel(source, |_, _| {});
        let compute = ComputePipeline::create(
            &ctx,
            ShaderObject::compile(&ctx, ShaderStage::Compute, source),
            UVec3::new(4, 1, 1),
        )
        .unwrap();

        let mut list = ctx.create_command_list();
        list.set_pipeline_state(&compute).unwrap();
        list.dispatch().unwrap();
        list.barrier(BarrierFlags::STORAGE_BUFFER).unwrap();
        list.execute().unwrap();
        assert_eq!(software.dispatch_count(), 1);
    }
}
