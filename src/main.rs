// =============================================================================
// VELLUM DEMO - Headless host for the software backend
// =============================================================================
//
// Drives the backend the way a host application would, without a window:
//
// 1. Load vellum.toml and start logging
// 2. Create the software driver with the configured limits
// 3. Compute round trip: scale 1024 ints on the "GPU" and read them back
// 4. Draw smoke test: one triangle into an offscreen colour target
// 5. Host ticks: a per-frame behavior callback recording through the C table
//
// Exits non-zero if any stage fails.
//
// =============================================================================

use std::rc::Rc;

use anyhow::{bail, ensure, Context as _, Result};
use glam::{UVec2, UVec3, Vec4};
use vellum::backend::{
    AccessFlags, BarrierFlags, Blend, Buffer, BufferUsage, ClearFlags, ComputePipeline, Context, PipelineDesc,
    PipelineState, PixelFormat, RenderTarget, ShaderObject, ShaderParameter, ShaderStage, ShaderStages, ShaderType,
    ShaderValue, Texture, TextureDesc, VertexBuffer,
};
use vellum::config::Config;
use vellum::driver::SoftwareDriver;
use vellum::ffi::{self, BackendVtable, ColorC, Handle, ViewportC};

const ELEMENTS: usize = 1024;
const GROUP_SIZE: usize = 64;
const SCALE: i32 = 3;
const TICKS: u32 = 4;

const SCALE_KERNEL: &str = "#version 460\n\
    layout(local_size_x = 64) in;\n\
    uniform int k;\n\
    layout(std430, binding = 0) buffer Input { int values[]; };\n\
    layout(std430, binding = 1) buffer Output { int results[]; };\n\
    void main() { results[gl_GlobalInvocationID.x] = values[gl_GlobalInvocationID.x] * k; }\n";

const VERTEX: &str = "#version 460\n\
    layout(location = 0) in vec2 position;\n\
    void main() { gl_Position = vec4(position, 0.0, 1.0); }\n";

const PIXEL: &str = "#version 460\n\
    uniform vec4 tint;\n\
    layout(location = 0) out vec4 color;\n\
    void main() { color = tint; }\n";

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();
    init_logging(&config);
    log::info!("Starting vellum demo");
    log::info!(
        "Context: {}x{} ({})",
        config.context.width,
        config.context.height,
        config.context.backbuffer
    );

    let driver = Rc::new(SoftwareDriver::with_limits(config.driver_limits()));
    driver.register_kernel(SCALE_KERNEL, |inv, io| {
        let i = inv.linear_index();
        let k = io.uniform_i32("k").unwrap_or(0);
        let value: i32 = io.load(0, i);
        io.store(1, i, value * k);
    });

    {
        let ctx = Context::new(driver.clone(), &config.context_desc()).context("Failed to create context")?;
        let caps = ctx.caps();
        log::info!(
            "Driver {}.{}: {} render targets, {} texture units, compute {}",
            caps.version / 10,
            caps.version % 10,
            caps.max_render_targets,
            caps.max_textures,
            caps.max_work_groups
        );

        if config.debug.compute_round_trip {
            compute_round_trip(&ctx).context("Compute round trip failed")?;
        }
        if config.debug.draw_smoke_test {
            draw_smoke_test(&ctx, &driver).context("Draw smoke test failed")?;
        }
    }

    host_ticks(driver.clone(), &config).context("Host ticks failed")?;

    log::info!(
        "Demo finished: {} dispatches, {} draws, {} clears",
        driver.dispatch_count(),
        driver.draws().len(),
        driver.clears().len()
    );
    Ok(())
}

/// Initialize logging; RUST_LOG overrides the configured level
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or(&config.debug.log_level)).init();
}

// =============================================================================
// COMPUTE ROUND TRIP
// =============================================================================

/// Scale `0..ELEMENTS` by `SCALE` in a storage buffer and check every result
fn compute_round_trip(ctx: &Context) -> Result<()> {
    // Step 1: Buffers
    let input: Vec<i32> = (0..ELEMENTS as i32).collect();
    let values = Buffer::with_contents(ctx, BufferUsage::Storage, &input)?;
    let results = Buffer::create(ctx, BufferUsage::Storage, ELEMENTS * 4, None)?;

    // Step 2: Pipeline
    let groups = UVec3::new((ELEMENTS / GROUP_SIZE) as u32, 1, 1);
    let pipeline = ComputePipeline::create(ctx, ShaderObject::compile(ctx, ShaderStage::Compute, SCALE_KERNEL), groups)?;

    // Step 3: Record and run
    let params = [
        ShaderParameter::new("k", ShaderType::Int, 1),
        ShaderParameter::new("Input", ShaderType::Texture, 1).at(0, 0),
        ShaderParameter::new("Output", ShaderType::Texture, 1).at(1, 0),
    ];
    let constants = [ShaderValue::Int(SCALE), ShaderValue::Buffer(&values), ShaderValue::Buffer(&results)];

    let mut list = ctx.create_command_list();
    list.set_pipeline_state(&pipeline)?;
    list.set_shader_constants(&params, &constants)?;
    list.dispatch()?;
    list.barrier(BarrierFlags::STORAGE_BUFFER)?;
    list.execute()?;

    // Step 4: Read back
    let mapping = ctx.map_buffer(&results, 0, results.len(), AccessFlags::READ)?;
    let output = mapping.read_as::<i32>()?;
    mapping.unmap()?;

    if let Some((i, &v)) = output.iter().enumerate().find(|&(i, &v)| v != i as i32 * SCALE) {
        bail!("element {i} is {v}, expected {}", i as i32 * SCALE);
    }
    log::info!("Compute round trip OK ({ELEMENTS} elements, k = {SCALE})");
    Ok(())
}

// =============================================================================
// DRAW SMOKE TEST
// =============================================================================

/// One triangle into an offscreen colour target
fn draw_smoke_test(ctx: &Context, driver: &SoftwareDriver) -> Result<()> {
    let target = Texture::create(ctx, &TextureDesc::new_2d(PixelFormat::R8G8B8A8Unorm, UVec2::new(64, 64)), None)?;
    let triangle: [f32; 6] = [-1.0, -1.0, 3.0, -1.0, -1.0, 3.0];
    let vertices = Buffer::with_contents(ctx, BufferUsage::Vertex, &triangle)?;

    let stages = ShaderStages::new()
        .with(ShaderObject::compile(ctx, ShaderStage::Vertex, VERTEX))
        .with(ShaderObject::compile(ctx, ShaderStage::Pixel, PIXEL));
    let pipeline = PipelineState::create(
        ctx,
        PipelineDesc::new(stages),
        &[RenderTarget::from(&target)],
        &Blend::REPLACE,
        &[VertexBuffer { buffer: &vertices, stride: 8 }],
        &[ShaderParameter::new("position", ShaderType::Float, 2)],
        None,
    )?;

    let draws_before = driver.draws().len();
    let mut list = ctx.create_command_list();
    list.set_pipeline_state(&pipeline)?;
    list.clear(ClearFlags::COLOR, Vec4::new(0.0, 0.0, 0.0, 1.0), 1.0, 0)?;
    let tint = ShaderParameter::new("tint", ShaderType::Float, 4);
    list.set_shader_constants(&[tint], &[ShaderValue::Floats(&[1.0, 0.5, 0.25, 1.0])])?;
    list.draw(3, 1, 0, 0)?;
    list.execute()?;

    let draws = driver.draws();
    ensure!(draws.len() == draws_before + 1, "expected one new draw, driver saw {}", draws.len() - draws_before);
    let draw = &draws[draws.len() - 1];
    ensure!(draw.targets == [target.id()], "draw wrote to {:?}, expected [{}]", draw.targets, target.id());
    log::info!("Draw smoke test OK (3 vertices into texture {})", target.id());
    Ok(())
}

// =============================================================================
// HOST TICKS
// =============================================================================

/// Host-side state updated by the per-tick behavior callback
struct Host {
    vt: *mut BackendVtable,
    ctx: Handle,
    size: UVec2,
}

impl Host {
    /// Per-tick behavior: record a clear whose colour cycles with the tick
    /// number, then execute it.
    ///
    /// # Safety
    /// `self.vt` and `self.ctx` must be live.
    unsafe fn behavior(&mut self, tick: u32) -> Result<()> {
        let t = &*self.vt;
        let list = (t.create_command_list)(self.vt, self.ctx);
        ensure!(list != 0, "create_command_list failed");

        let mask = (ClearFlags::COLOR | ClearFlags::DEPTH).bits();
        let phase = tick as f32 / TICKS as f32;
        let color = ColorC { r: phase, g: 1.0 - phase, b: 0.5, a: 1.0 };
        let viewport = ViewportC {
            x: 0.0,
            y: 0.0,
            width: self.size.x as f32,
            height: self.size.y as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let status = [
            (t.set_viewport)(self.vt, list, 0, &viewport),
            (t.clear)(self.vt, list, mask, color, 1.0, 0, 0, std::ptr::null()),
            (t.execute)(self.vt, self.ctx, list),
        ];
        (t.destroy_command_list)(self.vt, list);
        if let Some(code) = status.into_iter().find(|&code| code != 0) {
            bail!("tick {tick} failed with code {code}");
        }
        Ok(())
    }
}

/// Run `TICKS` host frames through the C function table
fn host_ticks(driver: Rc<SoftwareDriver>, config: &Config) -> Result<()> {
    let clears_before = driver.clears().len();
    let vt = ffi::software_backend(driver.clone(), std::ptr::null_mut(), None);

    // SAFETY: the table and context stay live until the end of this block
    let result = unsafe {
        let t = &*vt;
        let ctx = (t.create_context)(vt, config.context.width, config.context.height, config.backbuffer_format() as u8);
        if ctx == 0 {
            (t.destroy)(vt);
            bail!("create_context failed");
        }

        let mut host = Host { vt, ctx, size: UVec2::new(config.context.width, config.context.height) };
        let result = (0..TICKS).try_for_each(|tick| host.behavior(tick));

        (t.destroy_context)(vt, ctx);
        (t.destroy)(vt);
        result
    };
    result?;

    let cleared = driver.clears().len() - clears_before;
    ensure!(cleared == TICKS as usize, "expected {TICKS} clears, driver saw {cleared}");
    log::info!("Host ticks OK ({TICKS} frames)");
    Ok(())
}
