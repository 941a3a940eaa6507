// Ownership and binding across the public API

use std::rc::Rc;

use glam::UVec2;
use vellum::backend::handle::{BufferKind, Owned, TextureKind};
use vellum::backend::{
    Attachment, Buffer, BufferUsage, Context, ContextDesc, FrameBuffer, PixelFormat, ShaderObject, ShaderStage,
    Texture, TextureDesc,
};
use vellum::driver::{gl, Driver, Limits, SoftwareDriver};
use vellum::ErrorKind;

fn setup() -> (Rc<SoftwareDriver>, Context) {
    let _ = env_logger::builder().is_test(true).try_init();
    let software = Rc::new(SoftwareDriver::new());
    let ctx = Context::new(software.clone(), &ContextDesc::default()).unwrap();
    (software, ctx)
}

fn color_target(ctx: &Context, size: u32) -> Texture {
    Texture::create(ctx, &TextureDesc::new_2d(PixelFormat::R8G8B8A8Unorm, UVec2::splat(size)), None).unwrap()
}

#[test]
fn owned_handles_delete_exactly_once() {
    let (software, ctx) = setup();
    let driver = ctx.driver().clone();

    let mut first = Owned::<BufferKind>::adopt(driver.clone(), driver.gen_buffer());
    let id = first.id();
    let second = first.take();
    assert!(first.is_null() && !first.is_valid());
    assert_eq!(second.id(), id);
    assert!(second.is_valid());

    first.reset().unwrap();
    drop(first);
    assert_eq!(software.call_count("glDeleteBuffers"), 0);
    drop(second);
    assert_eq!(software.call_count("glDeleteBuffers"), 1);
    assert!(!driver.is_buffer(id));
}

#[test]
fn resources_outliving_the_context_reset_quietly() {
    let (software, ctx) = setup();
    let buffer = Buffer::create(&ctx, BufferUsage::Vertex, 64, None).unwrap();
    let texture = color_target(&ctx, 8);

    drop(ctx);
    assert!(!buffer.is_valid());
    assert!(!texture.is_valid());
    buffer.destroy().unwrap();
    texture.destroy().unwrap();
    assert_eq!(software.call_count("glDeleteBuffers"), 0);
    assert_eq!(software.call_count("glDeleteTextures"), 0);
}

#[test]
fn nested_binds_of_one_target_leave_it_empty() {
    let (software, ctx) = setup();
    let driver = ctx.driver().clone();
    let outer = Owned::<TextureKind>::adopt(driver.clone(), driver.gen_texture());
    let inner = Owned::<TextureKind>::adopt(driver.clone(), driver.gen_texture());

    let outer_guard = outer.bind(gl::TEXTURE_2D).unwrap();
    {
        let inner_guard = inner.bind(gl::TEXTURE_2D).unwrap();
        assert_eq!(software.get_binding(gl::TEXTURE_2D), inner_guard.id());
    }
    // The outer binding is not restored
    assert_eq!(software.get_binding(gl::TEXTURE_2D), 0);
    drop(outer_guard);
    assert_eq!(software.get_binding(gl::TEXTURE_2D), 0);
}

#[test]
fn creation_chains_short_circuit_on_the_first_failure() {
    let (software, ctx) = setup();
    let mut linked = false;

    let result = ShaderObject::compile(&ctx, ShaderStage::Vertex, "#version 460\nvoid helper() {}\n")
        .and_then(|shader| {
            linked = true;
            Ok(shader.id())
        })
        .map(|id| id + 1);

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compile);
    assert!(!linked);
    assert_eq!(software.call_count("glCreateProgram"), 0);
}

#[test]
fn framebuffer_completeness_follows_the_attachments() {
    let (_software, ctx) = setup();
    let albedo = color_target(&ctx, 32);
    let normal = color_target(&ctx, 32);
    let depth =
        Texture::create(&ctx, &TextureDesc::new_2d(PixelFormat::D24UnormS8Uint, UVec2::splat(32)), None).unwrap();

    let gbuffer = FrameBuffer::create(
        &ctx,
        &[Attachment::color(0, &albedo), Attachment::color(1, &normal), Attachment::depth(&depth)],
        0,
    )
    .unwrap();
    assert_eq!(gbuffer.size(), UVec2::splat(32));
    assert_eq!(gbuffer.attachments().len(), 3);

    let err = FrameBuffer::create(&ctx, &[Attachment::color(0, &depth)], 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Incomplete);
    assert_eq!(err.code(), gl::FRAMEBUFFER_INCOMPLETE_ATTACHMENT);

    let multisampled =
        Texture::create(&ctx, &TextureDesc::multisample(PixelFormat::R8G8B8A8Unorm, UVec2::splat(32), 4), None)
            .unwrap();
    let err = FrameBuffer::create(&ctx, &[Attachment::color(0, &albedo), Attachment::color(1, &multisampled)], 0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Incomplete);
    assert_eq!(err.code(), gl::FRAMEBUFFER_INCOMPLETE_MULTISAMPLE);

    let err = FrameBuffer::create(&ctx, &[Attachment::color(0, &albedo), Attachment::color(0, &normal)], 0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
}

#[test]
fn configured_limits_reach_the_caps() {
    let _ = env_logger::builder().is_test(true).try_init();
    let limits = Limits { max_color_attachments: 4, max_draw_buffers: 4, ..Limits::default() };
    let software = Rc::new(SoftwareDriver::with_limits(limits));
    let ctx = Context::new(software, &ContextDesc::default()).unwrap();
    assert_eq!(ctx.caps().max_render_targets, 4);

    let targets: Vec<Texture> = (0..5).map(|_| color_target(&ctx, 4)).collect();
    let attachments: Vec<Attachment<'_>> =
        targets.iter().enumerate().map(|(slot, t)| Attachment::color(slot as u8, t)).collect();
    let err = FrameBuffer::create(&ctx, &attachments, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    FrameBuffer::create(&ctx, &attachments[..4], 0).unwrap();
}
