// Framebuffer resource
//
// Attaches existing textures without taking ownership of them. Destroying an
// attached texture leaves the framebuffer incomplete; the framebuffer itself
// stays valid.

use glam::UVec2;

use super::device::Context;
use super::handle::{allocate, FrameBufferKind, Owned};
use super::pipeline::RenderTarget;
use super::texture::Texture;
use crate::driver::{gl, NativeEnum, ObjectId};
use crate::error::{check, status, BackendError, BackendResult, ErrorKind};

/// Where a texture is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentPoint {
    Color(u8),
    Depth,
    Stencil,
    DepthStencil,
}

impl AttachmentPoint {
    pub fn native(self) -> NativeEnum {
        match self {
            AttachmentPoint::Color(slot) => gl::COLOR_ATTACHMENT0 + u32::from(slot),
            AttachmentPoint::Depth => gl::DEPTH_ATTACHMENT,
            AttachmentPoint::Stencil => gl::STENCIL_ATTACHMENT,
            AttachmentPoint::DepthStencil => gl::DEPTH_STENCIL_ATTACHMENT,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Attachment<'a> {
    pub point: AttachmentPoint,
    pub texture: &'a Texture,
}

impl<'a> Attachment<'a> {
    pub fn color(slot: u8, texture: &'a Texture) -> Self {
        Self { point: AttachmentPoint::Color(slot), texture }
    }

    pub fn depth(texture: &'a Texture) -> Self {
        Self { point: AttachmentPoint::Depth, texture }
    }

    pub fn stencil(texture: &'a Texture) -> Self {
        Self { point: AttachmentPoint::Stencil, texture }
    }

    pub fn depth_stencil(texture: &'a Texture) -> Self {
        Self { point: AttachmentPoint::DepthStencil, texture }
    }
}

/// Render target made of attached textures
#[derive(Debug)]
pub struct FrameBuffer {
    handle: Owned<FrameBufferKind>,
    attachments: Vec<(AttachmentPoint, ObjectId)>,
    targets: Vec<RenderTarget>,
    level: u32,
    size: UVec2,
}

impl FrameBuffer {
    /// Attach `attachments` at mip `level` and verify completeness.
    ///
    /// Colour slots must be below the context's render-target limit. Draw
    /// buffers are routed to exactly the attached colour slots. A driver
    /// status other than complete fails with [`ErrorKind::Incomplete`]
    /// carrying that status.
    pub fn create(ctx: &Context, attachments: &[Attachment<'_>], level: u32) -> BackendResult<Self> {
        const OP: &str = "FrameBuffer::create";
        let max_colors = ctx.caps().max_render_targets;

        // Step 1: Validate the attachment list
        let mut colors: Vec<u8> = Vec::new();
        for (i, attachment) in attachments.iter().enumerate() {
            if attachments[..i].iter().any(|a| a.point == attachment.point) {
                return Err(BackendError::invalid(OP, format!("{:?} attached twice", attachment.point)));
            }
            if let AttachmentPoint::Color(slot) = attachment.point {
                if u32::from(slot) >= max_colors {
                    return Err(BackendError::invalid(
                        OP,
                        format!("colour slot {slot} exceeds the limit of {max_colors}"),
                    ));
                }
                colors.push(slot);
            }
        }
        if colors.len() as u32 > max_colors {
            return Err(BackendError::invalid(OP, format!("{} colour attachments, limit {max_colors}", colors.len())));
        }

        // Step 2: Allocate and attach
        let handle = allocate::<FrameBufferKind>(ctx.driver(), "glGenFramebuffers", |d| d.gen_framebuffer())?;
        {
            let bound = handle.bind(gl::FRAMEBUFFER)?;
            let driver = bound.driver();
            for attachment in attachments {
                driver.framebuffer_texture(
                    bound.target(),
                    attachment.point.native(),
                    attachment.texture.id(),
                    level as i32,
                );
                check(driver, ErrorKind::Configuration, "glFramebufferTexture")?;
            }

            // Step 3: Route draw buffers to the attached colour slots
            driver.draw_buffers(&draw_buffers(&colors));
            check(driver, ErrorKind::Configuration, "glDrawBuffers")?;

            // Step 4: Completeness
            let result = driver.check_framebuffer_status(bound.target());
            check(driver, ErrorKind::Configuration, "glCheckFramebufferStatus")?;
            if result != gl::FRAMEBUFFER_COMPLETE {
                return Err(status(ErrorKind::Incomplete, "glCheckFramebufferStatus", result));
            }
        }

        let size = attachments
            .first()
            .map(|a| (a.texture.size().truncate() >> level).max(UVec2::ONE))
            .unwrap_or(UVec2::ZERO);
        // Colour slots in order, then depth and stencil
        let mut ordered: Vec<&Attachment<'_>> = attachments.iter().collect();
        ordered.sort_by_key(|a| match a.point {
            AttachmentPoint::Color(slot) => u16::from(slot),
            _ => u16::MAX,
        });
        let targets = ordered
            .into_iter()
            .map(|a| RenderTarget {
                size: (a.texture.size().truncate() >> level).max(UVec2::ONE),
                ..RenderTarget::from(a.texture)
            })
            .collect();

        log::debug!(id = handle.id(), attachments = attachments.len(); "Created framebuffer");
        Ok(Self {
            handle,
            attachments: attachments.iter().map(|a| (a.point, a.texture.id())).collect(),
            targets,
            level,
            size,
        })
    }

    pub fn id(&self) -> ObjectId {
        self.handle.id()
    }

    /// Attachment points and the texture ids attached there
    pub fn attachments(&self) -> &[(AttachmentPoint, ObjectId)] {
        &self.attachments
    }

    /// Attached textures as pipeline render targets, colour slots first
    pub fn render_targets(&self) -> &[RenderTarget] {
        &self.targets
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    pub fn destroy(mut self) -> BackendResult<()> {
        self.handle.reset()
    }
}

/// Draw-buffer list covering slots 0 through the highest attached slot, with
/// unattached slots disabled
pub(crate) fn draw_buffers(colors: &[u8]) -> Vec<NativeEnum> {
    let Some(&highest) = colors.iter().max() else {
        return vec![gl::NONE];
    };
    (0..=highest)
        .map(|slot| if colors.contains(&slot) { AttachmentPoint::Color(slot).native() } else { gl::NONE })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::device::ContextDesc;
    use crate::backend::texture::TextureDesc;
    use crate::backend::types::PixelFormat;
    use crate::driver::{Driver, SoftwareDriver};
    use std::rc::Rc;

    fn context() -> (Rc<SoftwareDriver>, Context) {
        let software = Rc::new(SoftwareDriver::new());
        let ctx = Context::new(software.clone(), &ContextDesc::default()).unwrap();
        (software, ctx)
    }

    fn target(ctx: &Context, format: PixelFormat) -> Texture {
        Texture::create(ctx, &TextureDesc::new_2d(format, UVec2::new(64, 32)), None).unwrap()
    }

    #[test]
    fn colour_and_depth_attachments_complete() {
        let (software, ctx) = context();
        let color = target(&ctx, PixelFormat::R8G8B8A8Unorm);
        let depth = target(&ctx, PixelFormat::D24UnormS8Uint);

        let fb = FrameBuffer::create(&ctx, &[Attachment::color(0, &color), Attachment::depth(&depth)], 0).unwrap();
        assert_eq!(fb.size(), UVec2::new(64, 32));
        assert_eq!(software.framebuffer_draw_buffers(fb.id()), vec![gl::COLOR_ATTACHMENT0]);
        assert_eq!(software.framebuffer_attachments(fb.id()).len(), 2);
        assert_eq!(software.get_binding(gl::FRAMEBUFFER), 0);
    }

    #[test]
    fn render_targets_list_colours_by_slot_then_depth() {
        let (_software, ctx) = context();
        let first = target(&ctx, PixelFormat::R8G8B8A8Unorm);
        let second = target(&ctx, PixelFormat::R16G16B16A16Float);
        let depth = target(&ctx, PixelFormat::D24UnormS8Uint);

        let fb = FrameBuffer::create(
            &ctx,
            &[Attachment::depth_stencil(&depth), Attachment::color(1, &second), Attachment::color(0, &first)],
            0,
        )
        .unwrap();
        let ids: Vec<ObjectId> = fb.render_targets().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![first.id(), second.id(), depth.id()]);
        assert_eq!(fb.render_targets()[2].format, PixelFormat::D24UnormS8Uint);
    }

    #[test]
    fn depth_format_in_colour_slot_is_incomplete() {
        let (_software, ctx) = context();
        let depth = target(&ctx, PixelFormat::D32Float);

        let err = FrameBuffer::create(&ctx, &[Attachment::color(0, &depth)], 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Incomplete);
        assert_eq!(err.code(), gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT);
    }

    #[test]
    fn colour_slot_beyond_limit_is_rejected() {
        let (software, ctx) = context();
        let color = target(&ctx, PixelFormat::R8G8B8A8Unorm);
        let slot = ctx.caps().max_render_targets as u8;

        let err = FrameBuffer::create(&ctx, &[Attachment::color(slot, &color)], 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(software.call_count("glGenFramebuffers"), 1);
    }

    #[test]
    fn sparse_slots_leave_gaps_in_draw_buffers() {
        assert_eq!(draw_buffers(&[2, 0]), vec![gl::COLOR_ATTACHMENT0, gl::NONE, gl::COLOR_ATTACHMENT0 + 2]);
        assert_eq!(draw_buffers(&[]), vec![gl::NONE]);
    }

    #[test]
    fn destroying_attached_texture_breaks_completeness_only() {
        let (software, ctx) = context();
        let color = target(&ctx, PixelFormat::R8G8B8A8Unorm);
        let fb = FrameBuffer::create(&ctx, &[Attachment::color(0, &color)], 0).unwrap();

        color.destroy().unwrap();
        assert!(fb.is_valid());
        software.bind_framebuffer(gl::FRAMEBUFFER, fb.id());
        assert_eq!(software.check_framebuffer_status(gl::FRAMEBUFFER), gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT);
    }
}
