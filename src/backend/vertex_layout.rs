// Vertex layout
//
// Binds vertex buffers to a program's attribute locations and records the
// index buffer, all captured in one vertex array object.

use super::buffer::Buffer;
use super::device::Context;
use super::handle::{allocate, Owned, VertexArrayKind};
use super::shader::ProgramObject;
use super::types::{BufferUsage, IndexFormat, ShaderParameter};
use crate::driver::{gl, ObjectId};
use crate::error::{check, BackendError, BackendResult, ErrorKind};

/// A vertex buffer slot
#[derive(Debug, Clone, Copy)]
pub struct VertexBuffer<'a> {
    pub buffer: &'a Buffer,
    /// Bytes between consecutive vertices
    pub stride: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct IndexBuffer<'a> {
    pub buffer: &'a Buffer,
    pub format: IndexFormat,
}

/// Attribute wiring of a graphics pipeline.
///
/// The referenced buffers are not owned; destroying one makes later draws
/// through this layout fail.
#[derive(Debug)]
pub struct VertexLayout {
    handle: Owned<VertexArrayKind>,
    index_format: Option<IndexFormat>,
    attributes: usize,
}

impl VertexLayout {
    pub fn create(
        ctx: &Context,
        program: &ProgramObject,
        vertex_buffers: &[VertexBuffer<'_>],
        attributes: &[ShaderParameter<'_>],
        index_buffer: Option<IndexBuffer<'_>>,
    ) -> BackendResult<Self> {
        const OP: &str = "VertexLayout::create";
        let handle = allocate::<VertexArrayKind>(ctx.driver(), "glGenVertexArrays", |d| d.gen_vertex_array())?;

        {
            let layout = handle.bind(0)?;
            let driver = layout.driver();

            // Element binding belongs to the vertex array, so it is left bound
            // rather than scoped
            if let Some(index) = index_buffer {
                if index.buffer.usage() != BufferUsage::Index {
                    return Err(BackendError::invalid(OP, "index buffer was not created with index usage"));
                }
                driver.bind_buffer(gl::ELEMENT_ARRAY_BUFFER, index.buffer.id());
                check(driver, ErrorKind::Configuration, "glBindBuffer")?;
            }

            for attribute in attributes {
                let Some(source) = vertex_buffers.get(attribute.index as usize) else {
                    return Err(BackendError::invalid(OP, "Parameter index exceeds buffer count"));
                };
                let Some(location) = program.attribute_location(attribute.name)? else {
                    return Err(BackendError::invalid(
                        OP,
                        format!("program has no vertex attribute '{}'", attribute.name),
                    ));
                };
                let (Some((ty, normalized)), Some(component_size)) =
                    (attribute.ty.vertex_native(), attribute.ty.component_size())
                else {
                    return Err(BackendError::invalid(
                        OP,
                        format!("'{}' has non-vertex type {:?}", attribute.name, attribute.ty),
                    ));
                };
                if !(1..=4).contains(&attribute.length) || attribute.width == 0 {
                    return Err(BackendError::invalid(
                        OP,
                        format!("'{}' has {} components per column", attribute.name, attribute.length),
                    ));
                }

                let bound = source.buffer.handle().bind(gl::ARRAY_BUFFER)?;
                // Matrix columns occupy consecutive locations
                for column in 0..attribute.width {
                    let slot = location + column;
                    let offset = attribute.offset + column * attribute.length * component_size;
                    driver.enable_vertex_attrib_array(slot);
                    check(driver, ErrorKind::Configuration, "glEnableVertexAttribArray")?;
                    driver.vertex_attrib_pointer(
                        slot,
                        attribute.length as i32,
                        ty,
                        normalized,
                        source.stride as i32,
                        offset as usize,
                    );
                    check(driver, ErrorKind::Configuration, "glVertexAttribPointer")?;
                    driver.vertex_attrib_divisor(slot, attribute.step);
                    check(driver, ErrorKind::Configuration, "glVertexAttribDivisor")?;
                }
                drop(bound);
            }
        }

        Ok(Self { handle, index_format: index_buffer.map(|i| i.format), attributes: attributes.len() })
    }

    pub fn id(&self) -> ObjectId {
        self.handle.id()
    }

    /// Format of the recorded index buffer, if any
    pub fn index_format(&self) -> Option<IndexFormat> {
        self.index_format
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::device::ContextDesc;
    use crate::backend::shader::ShaderObject;
    use crate::backend::types::{ShaderStage, ShaderType};
    use crate::driver::{Driver, SoftwareDriver};
    use std::rc::Rc;

    const VERTEX: &str = "#version 460\n\
        layout(location = 0) in vec3 position;\n\
        layout(location = 1) in mat4 instance_transform;\n\
        void main() { gl_Position = instance_transform * vec4(position, 1.0); }\n";

    fn setup() -> (Rc<SoftwareDriver>, Context) {
        let software = Rc::new(SoftwareDriver::new());
        let ctx = Context::new(software.clone(), &ContextDesc::default()).unwrap();
        (software, ctx)
    }

    fn program(ctx: &Context) -> ProgramObject {
        let vs = ShaderObject::compile(ctx, ShaderStage::Vertex, VERTEX).unwrap();
        ProgramObject::link(ctx, vec![vs]).unwrap()
    }

    #[test]
    fn attributes_and_index_buffer_are_recorded() {
        let (software, ctx) = setup();
        let program = program(&ctx);
        let vertices = Buffer::create(&ctx, BufferUsage::Vertex, 12 * 3, None).unwrap();
        let instances = Buffer::create(&ctx, BufferUsage::Vertex, 64 * 2, None).unwrap();
        let indices = Buffer::with_contents(&ctx, BufferUsage::Index, &[0u16, 1, 2]).unwrap();

        let layout = VertexLayout::create(
            &ctx,
            &program,
            &[VertexBuffer { buffer: &vertices, stride: 12 }, VertexBuffer { buffer: &instances, stride: 64 }],
            &[
                ShaderParameter::new("position", ShaderType::Float, 3),
                ShaderParameter::matrix("instance_transform", 4, 4).at(1, 0).per_instance(1),
            ],
            Some(IndexBuffer { buffer: &indices, format: IndexFormat::U16 }),
        )
        .unwrap();

        assert_eq!(layout.index_format(), Some(IndexFormat::U16));
        assert_eq!(software.element_buffer(layout.id()), indices.id());
        let position = software.vertex_attrib(layout.id(), 0).unwrap();
        assert_eq!((position.buffer, position.size, position.stride), (vertices.id(), 3, 12));
        let last_column = software.vertex_attrib(layout.id(), 4).unwrap();
        assert_eq!((last_column.buffer, last_column.offset, last_column.divisor), (instances.id(), 48, 1));
        assert_eq!(software.get_binding(gl::VERTEX_ARRAY_BINDING), 0);
        assert_eq!(software.get_binding(gl::ARRAY_BUFFER), 0);
    }

    #[test]
    fn attribute_slot_beyond_buffers_is_rejected() {
        let (_software, ctx) = setup();
        let program = program(&ctx);
        let vertices = Buffer::create(&ctx, BufferUsage::Vertex, 36, None).unwrap();

        let err = VertexLayout::create(
            &ctx,
            &program,
            &[VertexBuffer { buffer: &vertices, stride: 12 }],
            &[ShaderParameter::new("position", ShaderType::Float, 3).at(1, 0)],
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(err.message(), "Parameter index exceeds buffer count");
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let (_software, ctx) = setup();
        let program = program(&ctx);
        let vertices = Buffer::create(&ctx, BufferUsage::Vertex, 36, None).unwrap();

        let err = VertexLayout::create(
            &ctx,
            &program,
            &[VertexBuffer { buffer: &vertices, stride: 12 }],
            &[ShaderParameter::new("normal", ShaderType::Float, 3)],
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    }
}
