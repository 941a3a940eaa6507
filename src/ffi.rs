// C interface
//
// Hosts receive a `BackendVtable` from `vellum_software_backend` and drive the
// whole layer through it. Objects cross the boundary as opaque `usize`
// handles (0 is failure); integer returns are 0 on success and a negative
// `ErrorKind` code otherwise. Every failure is also reported through the
// host's log callback, since the integer code drops the message.
//
// Handles are boxed Rust objects. The host owns them and must keep a handle
// alive while anything created from it (a pipeline, a recorded command list)
// still refers to it.

use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use glam::{UVec2, UVec3, UVec4, Vec4};
use log::kv::{Key, Value, VisitSource};
use parking_lot::Mutex;

use crate::backend::{
    AccessFlags, AddressMode, BarrierFlags, Blend, BlendFactor, BlendOp, Buffer, BufferUsage, ClearFlags, ColorMask,
    Attachment, Comparison, ComputePipeline, Context, ContextDesc, CullMode, FillMode, Filter, FrameBuffer, IndexBuffer,
    IndexFormat, MappedBuffer, PipelineDesc, PipelineFlags, PipelineMembers, PipelineState, PixelFormat, Primitive,
    RenderTarget, Sampler, ShaderObject, ShaderParameter, ShaderStage, ShaderStages, ShaderType, ShaderValue,
    StencilOp, Texture, TextureDesc, TextureUsage, VertexBuffer,
};
use crate::driver::SoftwareDriver;
use crate::error::{BackendError, BackendResult, ErrorKind};

/// Opaque object handle; 0 is the failure value
pub type Handle = usize;

/// Returned when a call panicked or the backend pointer was null
pub const ERR_INTERNAL: i32 = -7;

pub fn error_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Allocation => -1,
        ErrorKind::Configuration => -2,
        ErrorKind::Incomplete => -3,
        ErrorKind::Compile => -4,
        ErrorKind::InvalidParameter => -5,
        ErrorKind::Misuse => -6,
    }
}

// =============================================================================
// Host logging
// =============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    None = -1,
    Fatal = 0,
    Error = 1,
    Warning = 2,
    Notice = 3,
    Debug = 4,
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => LogLevel::Error,
            log::Level::Warn => LogLevel::Warning,
            log::Level::Info => LogLevel::Notice,
            log::Level::Debug | log::Level::Trace => LogLevel::Debug,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Boolean,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
    /// Released by the host through the free function passed with the call
    OwnedString,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union LogPayload {
    pub bit: bool,
    pub i32: i32,
    pub u32: u32,
    pub i64: i64,
    pub u64: u64,
    pub f32: f32,
    pub f64: f64,
    pub string: *const c_char,
    pub owned: *mut c_char,
}

/// One typed argument of a log record
#[repr(C)]
#[derive(Clone, Copy)]
pub struct LogValue {
    pub ty: LogType,
    pub value: LogPayload,
}

pub type FreeStringFn = unsafe extern "C" fn(*mut c_char);

/// Host log callback: root, level, file, line, message, arguments, argument
/// count, and the function that releases owned-string arguments
pub type LogFn = unsafe extern "C" fn(
    *mut c_void,
    LogLevel,
    *const c_char,
    i32,
    *const c_char,
    *const LogValue,
    i32,
    FreeStringFn,
);

struct HostSink {
    root: usize,
    log: LogFn,
}

static HOST: Mutex<Option<HostSink>> = parking_lot::const_mutex(None);
static LOGGER: HostLogger = HostLogger;

/// `log` backend that forwards every record to the host callback.
///
/// Each key-value pair of a record becomes two arguments: the key as a
/// borrowed string, then the value typed as closely as `log` allows.
/// String values are passed as owned strings.
pub struct HostLogger;

impl HostLogger {
    /// Route `log` records to `log` with `root` as its first argument.
    ///
    /// Installing fails quietly when another logger is already registered;
    /// the sink is still replaced so a later `HostLogger` sees it.
    pub fn install(root: *mut c_void, log: LogFn) {
        *HOST.lock() = Some(HostSink { root: root as usize, log });
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(log::LevelFilter::Trace);
        }
    }

    pub fn uninstall() {
        HOST.lock().take();
    }
}

#[derive(Default)]
struct Arguments {
    keys: Vec<CString>,
    values: Vec<LogValue>,
}

impl<'kvs> VisitSource<'kvs> for Arguments {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), log::kv::Error> {
        let key = c_string(key.as_str());
        self.values.push(LogValue { ty: LogType::String, value: LogPayload { string: key.as_ptr() } });
        self.keys.push(key);
        self.values.push(typed(&value));
        Ok(())
    }
}

fn typed(value: &Value<'_>) -> LogValue {
    if let Some(bit) = value.to_bool() {
        return LogValue { ty: LogType::Boolean, value: LogPayload { bit } };
    }
    if let Some(v) = value.to_u64() {
        return match u32::try_from(v) {
            Ok(u32) => LogValue { ty: LogType::U32, value: LogPayload { u32 } },
            Err(_) => LogValue { ty: LogType::U64, value: LogPayload { u64: v } },
        };
    }
    if let Some(v) = value.to_i64() {
        return match i32::try_from(v) {
            Ok(i32) => LogValue { ty: LogType::I32, value: LogPayload { i32 } },
            Err(_) => LogValue { ty: LogType::I64, value: LogPayload { i64: v } },
        };
    }
    if let Some(f64) = value.to_f64() {
        return LogValue { ty: LogType::F64, value: LogPayload { f64 } };
    }
    let owned = c_string(&value.to_string()).into_raw();
    LogValue { ty: LogType::OwnedString, value: LogPayload { owned } }
}

/// Interior NULs would truncate the host's view; they are dropped
fn c_string(text: &str) -> CString {
    CString::new(text.replace('\0', "")).unwrap_or_default()
}

impl log::Log for HostLogger {
    fn enabled(&self, _: &log::Metadata<'_>) -> bool {
        HOST.lock().is_some()
    }

    fn log(&self, record: &log::Record<'_>) {
        let Some((root, callback)) = HOST.lock().as_ref().map(|sink| (sink.root, sink.log)) else {
            return;
        };
        let message = c_string(&record.args().to_string());
        let file = record.file().map(c_string);
        let mut arguments = Arguments::default();
        let _ = record.key_values().visit(&mut arguments);

        // SAFETY: every pointer passed stays valid for the duration of the
        // call; owned strings are handed over to the host.
        unsafe {
            callback(
                root as *mut c_void,
                record.level().into(),
                file.as_ref().map_or(std::ptr::null(), |f| f.as_ptr()),
                record.line().map_or(-1, |l| l as i32),
                message.as_ptr(),
                arguments.values.as_ptr(),
                arguments.values.len() as i32,
                vellum_free_string,
            );
        }
    }

    fn flush(&self) {}
}

/// Release an owned-string log argument.
///
/// # Safety
/// `string` must be null or a pointer received as an owned-string argument
/// that has not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn vellum_free_string(string: *mut c_char) {
    if !string.is_null() {
        drop(CString::from_raw(string));
    }
}

// =============================================================================
// Boundary types
// =============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapsC {
    pub features: u32,
    pub version: u32,
    pub max_textures: u32,
    pub max_render_targets: u32,
    pub max_texture_size: u32,
    pub max_samples: u32,
    pub max_storage_bindings: u32,
    pub max_uniform_bindings: u32,
    pub max_vertex_attribs: u32,
    pub max_viewports: u32,
    pub max_work_groups: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ColorC {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ViewportC {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// Rectangle as edges; `right` and `bottom` are exclusive
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RectC {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtentC {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SamplerC {
    /// Packed filter code, see [`Filter`]
    pub filter: u8,
    pub address: [u8; 3],
    pub max_anisotropy: u8,
    pub comparison: u8,
    pub mip_bias: f32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub border_color: ColorC,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TextureDescC {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub usage: u8,
    pub format: u8,
    pub mip_levels: u32,
    pub samples: u32,
    /// Null keeps the default sampler
    pub sampler: *const SamplerC,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlendC {
    pub src: u8,
    pub dest: u8,
    pub op: u8,
    pub src_alpha: u8,
    pub dest_alpha: u8,
    pub op_alpha: u8,
    pub write_mask: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PipelineDescC {
    pub members: u64,
    /// Shader handles indexed by stage code; 0 leaves a stage empty
    pub shaders: [Handle; ShaderStage::COUNT],
    pub blend_factor: ColorC,
    pub flags: u16,
    pub sample_mask: u32,
    pub stencil_ref: u8,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub stencil_fail: u8,
    pub stencil_depth_fail: u8,
    pub stencil_pass: u8,
    pub stencil_func: u8,
    pub depth_func: u8,
    pub fill: u8,
    pub cull: u8,
    pub primitive: u8,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ShaderParameterC {
    pub name: *const c_char,
    pub ty: u8,
    pub length: u32,
    pub width: u32,
    pub index: u32,
    pub offset: u32,
    pub step: u32,
}

/// Value of one shader constant.
///
/// Single scalars are passed inline; vectors and matrices point at
/// `length * width` scalars. Texture and texture-cube parameters carry a
/// resource handle, which binds a buffer instead when the handle is one.
#[repr(C)]
#[derive(Clone, Copy)]
pub union ShaderValueC {
    pub f32: f32,
    pub i32: i32,
    pub u32: u32,
    pub floats: *const f32,
    pub ints: *const i32,
    pub uints: *const u32,
    pub resource: Handle,
}

/// Function table handed to the host. The first argument of every entry is
/// the table itself.
#[repr(C)]
pub struct BackendVtable {
    pub get_caps: unsafe extern "C" fn(*mut BackendVtable, Handle, *mut CapsC) -> i32,
    pub create_context: unsafe extern "C" fn(*mut BackendVtable, u32, u32, u8) -> Handle,
    pub resize_context: unsafe extern "C" fn(*mut BackendVtable, Handle, u32, u32) -> i32,
    pub destroy_context: unsafe extern "C" fn(*mut BackendVtable, Handle) -> i32,
    pub compile_shader: unsafe extern "C" fn(*mut BackendVtable, Handle, u8, *const c_char) -> Handle,
    pub destroy_shader: unsafe extern "C" fn(*mut BackendVtable, Handle, Handle) -> i32,
    pub create_buffer: unsafe extern "C" fn(*mut BackendVtable, Handle, *const c_void, u32, u8) -> Handle,
    pub create_texture: unsafe extern "C" fn(*mut BackendVtable, Handle, *const TextureDescC, *const c_void) -> Handle,
    pub create_render_target: unsafe extern "C" fn(*mut BackendVtable, Handle, Handle, *const Handle, u32, u8) -> Handle,
    pub destroy_resource: unsafe extern "C" fn(*mut BackendVtable, Handle, Handle) -> i32,
    #[allow(clippy::type_complexity)]
    pub create_pipeline_state: unsafe extern "C" fn(
        *mut BackendVtable,
        Handle,
        *const PipelineDescC,
        *const Handle,
        u32,
        *const BlendC,
        *const Handle,
        *const u32,
        u32,
        *const ShaderParameterC,
        u32,
        Handle,
        u8,
    ) -> Handle,
    pub create_compute_pipeline: unsafe extern "C" fn(*mut BackendVtable, Handle, Handle, u32, u32, u32) -> Handle,
    pub destroy_pipeline: unsafe extern "C" fn(*mut BackendVtable, Handle, Handle) -> i32,
    pub create_command_list: unsafe extern "C" fn(*mut BackendVtable, Handle) -> Handle,
    pub destroy_command_list: unsafe extern "C" fn(*mut BackendVtable, Handle) -> i32,
    pub set_pipeline_state: unsafe extern "C" fn(*mut BackendVtable, Handle, Handle) -> i32,
    pub set_shader_constants:
        unsafe extern "C" fn(*mut BackendVtable, Handle, *const ShaderParameterC, *const ShaderValueC, u32) -> i32,
    pub draw: unsafe extern "C" fn(*mut BackendVtable, Handle, u32, u32, u32, u32) -> i32,
    pub draw_indexed: unsafe extern "C" fn(*mut BackendVtable, Handle, u32, u32, u32, i32, u32) -> i32,
    pub dispatch: unsafe extern "C" fn(*mut BackendVtable, Handle) -> i32,
    pub sync_point: unsafe extern "C" fn(*mut BackendVtable, Handle, u32) -> i32,
    pub clear: unsafe extern "C" fn(*mut BackendVtable, Handle, u8, ColorC, f32, u8, u32, *const RectC) -> i32,
    pub copy_resource: unsafe extern "C" fn(*mut BackendVtable, Handle, Handle, Handle, ExtentC, u32) -> i32,
    pub copy_subresource: unsafe extern "C" fn(*mut BackendVtable, Handle, Handle, Handle, usize, usize, usize) -> i32,
    pub copy_resource_region:
        unsafe extern "C" fn(*mut BackendVtable, Handle, Handle, Handle, u32, ExtentC, ExtentC, ExtentC) -> i32,
    pub set_viewport: unsafe extern "C" fn(*mut BackendVtable, Handle, u32, *const ViewportC) -> i32,
    pub set_scissor: unsafe extern "C" fn(*mut BackendVtable, Handle, u32, u32, u32, u32, u32) -> i32,
    pub execute: unsafe extern "C" fn(*mut BackendVtable, Handle, Handle) -> i32,
    pub map_resource: unsafe extern "C" fn(*mut BackendVtable, Handle, Handle, u32, u32, u32) -> *mut c_void,
    pub unmap_resource: unsafe extern "C" fn(*mut BackendVtable, Handle, Handle) -> i32,
    pub destroy: unsafe extern "C" fn(*mut BackendVtable) -> i32,
}

// =============================================================================
// Handle payloads
// =============================================================================

#[repr(C)]
struct Backend {
    // Must stay first: hosts hold a pointer to the table
    vtable: BackendVtable,
    driver: Rc<SoftwareDriver>,
    /// Whether this backend routed `log` to the host
    logs: bool,
}

/// Shaders keep their source so every pipeline links freshly compiled stages
struct HostShader {
    stage: ShaderStage,
    source: String,
    _object: ShaderObject,
}

enum Resource {
    Buffer {
        // Declared first so it unmaps before the buffer is deleted
        mapping: Option<MappedBuffer<'static>>,
        buffer: Box<Buffer>,
    },
    Texture(Texture),
    /// Framebuffer over textures the host still owns
    FrameBuffer(FrameBuffer),
}

enum HostPipeline {
    Graphics(PipelineState),
    Compute(ComputePipeline),
}

enum HostValue {
    Floats(Vec<f32>),
    Ints(Vec<i32>),
    UInts(Vec<u32>),
    Resource(Handle),
}

struct HostConstant {
    name: String,
    ty: ShaderType,
    length: u32,
    width: u32,
    index: u32,
    offset: u32,
    step: u32,
    value: HostValue,
}

enum Recorded {
    SetPipeline(Handle),
    Constants(Vec<HostConstant>),
    Draw([u32; 4]),
    DrawIndexed { index_count: u32, instance_count: u32, start_index: u32, base_vertex: i32, start_instance: u32 },
    Dispatch,
    Barrier(BarrierFlags),
    Clear(ClearFlags, Vec4, f32, u8, Vec<UVec4>),
    Copy { src: Handle, dest: Handle, src_offset: usize, dest_offset: usize, bytes: usize },
    CopyRegion { src: Handle, dest: Handle, level: u32, src_offset: UVec3, dest_offset: UVec3, size: UVec3 },
    Viewport(u32, Vec4, (f32, f32)),
    Scissor(u32, UVec4),
}

/// Commands recorded over the boundary, replayed through a
/// [`CommandList`](crate::backend::CommandList)
/// when executed
#[derive(Default)]
struct HostCommandList {
    commands: Vec<Recorded>,
    executed: bool,
}

impl HostCommandList {
    fn record(&mut self, operation: &'static str, command: Recorded) -> BackendResult<()> {
        if self.executed {
            return Err(BackendError::misuse(operation, "command list was already executed"));
        }
        self.commands.push(command);
        Ok(())
    }
}

// =============================================================================
// Boundary helpers
// =============================================================================

fn boundary<T>(operation: &'static str, body: impl FnOnce() -> BackendResult<T>) -> Result<T, i32> {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            log::error!(code = err.code(), line = err.location().line(); "{operation} failed: {err}");
            Err(error_code(err.kind()))
        }
        Err(_) => {
            log::error!("{operation} panicked");
            Err(ERR_INTERNAL)
        }
    }
}

fn to_status(result: Result<(), i32>) -> i32 {
    result.err().unwrap_or(0)
}

fn to_handle<T>(result: Result<T, i32>) -> Handle {
    result.map_or(0, |value| Box::into_raw(Box::new(value)) as Handle)
}

/// # Safety
/// `handle` must be 0 or a live handle of type `T` created by this module.
unsafe fn get<'a, T>(handle: Handle, what: &'static str) -> BackendResult<&'a T> {
    match (handle as *const T).as_ref() {
        Some(value) => Ok(value),
        None => Err(BackendError::invalid(what, "null handle")),
    }
}

/// # Safety
/// As [`get`], with no other reference to the object alive.
unsafe fn get_mut<'a, T>(handle: Handle, what: &'static str) -> BackendResult<&'a mut T> {
    match (handle as *mut T).as_mut() {
        Some(value) => Ok(value),
        None => Err(BackendError::invalid(what, "null handle")),
    }
}

/// # Safety
/// As [`get`]; the handle is invalid afterwards.
unsafe fn release<T>(handle: Handle, what: &'static str) -> BackendResult<()> {
    if handle == 0 {
        return Err(BackendError::invalid(what, "null handle"));
    }
    drop(Box::from_raw(handle as *mut T));
    Ok(())
}

fn decode<T>(value: Option<T>, operation: &'static str, what: &str, code: u8) -> BackendResult<T> {
    value.ok_or_else(|| BackendError::invalid(operation, format!("unknown {what} code {code}")))
}

/// # Safety
/// `ptr` must be null or point at `count` readable values.
unsafe fn slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, count as usize)
    }
}

/// # Safety
/// `name` must be null or a NUL-terminated string.
unsafe fn name<'a>(name: *const c_char, operation: &'static str) -> BackendResult<&'a str> {
    if name.is_null() {
        return Err(BackendError::invalid(operation, "null name"));
    }
    CStr::from_ptr(name)
        .to_str()
        .map_err(|_| BackendError::invalid(operation, "name is not UTF-8"))
}

fn color(c: ColorC) -> Vec4 {
    Vec4::new(c.r, c.g, c.b, c.a)
}

fn sampler(c: &SamplerC) -> BackendResult<Sampler> {
    const OP: &str = "create_texture";
    let mut addressing = [AddressMode::Wrap; 3];
    for (slot, &code) in addressing.iter_mut().zip(&c.address) {
        *slot = decode(AddressMode::from_code(code), OP, "address mode", code)?;
    }
    Ok(Sampler {
        filter: Filter::from_code(c.filter),
        addressing,
        max_anisotropy: c.max_anisotropy,
        comparison: decode(Comparison::from_code(c.comparison), OP, "comparison", c.comparison)?,
        mip_bias: c.mip_bias,
        min_lod: c.min_lod,
        max_lod: c.max_lod,
        border_color: color(c.border_color),
    })
}

fn blend(c: &BlendC) -> BackendResult<Blend> {
    const OP: &str = "create_pipeline_state";
    let factor = |code: u8| decode(BlendFactor::from_code(code), OP, "blend factor", code);
    let op = |code: u8| decode(BlendOp::from_code(code), OP, "blend op", code);
    Ok(Blend {
        src: factor(c.src)?,
        dest: factor(c.dest)?,
        op: op(c.op)?,
        src_alpha: factor(c.src_alpha)?,
        dest_alpha: factor(c.dest_alpha)?,
        op_alpha: op(c.op_alpha)?,
        write_mask: ColorMask::from_bits_truncate(c.write_mask),
    })
}

/// # Safety
/// `c.name` must be null or a NUL-terminated string outliving `'a`.
unsafe fn parameter<'a>(c: &ShaderParameterC, operation: &'static str) -> BackendResult<ShaderParameter<'a>> {
    Ok(ShaderParameter {
        name: name(c.name, operation)?,
        ty: decode(ShaderType::from_code(c.ty), operation, "shader type", c.ty)?,
        length: c.length,
        width: c.width,
        index: c.index,
        offset: c.offset,
        step: c.step,
    })
}

/// Copy a constant's value out of host memory
///
/// # Safety
/// Pointer members of `value` must cover the parameter's component count.
unsafe fn host_value(param: &ShaderParameter<'_>, value: &ShaderValueC) -> BackendResult<HostValue> {
    let count = param.components();
    Ok(match param.ty {
        ShaderType::Texture | ShaderType::TexCube => HostValue::Resource(value.resource),
        ShaderType::Double => {
            return Err(BackendError::invalid(
                "set_shader_constants",
                format!("'{}': double-precision constants are not supported", param.name),
            ))
        }
        ShaderType::Color32 => HostValue::UInts(vec![value.u32]),
        ShaderType::Float | ShaderType::Half if count == 1 => HostValue::Floats(vec![value.f32]),
        ShaderType::Float | ShaderType::Half => HostValue::Floats(slice(value.floats, count).to_vec()),
        ShaderType::Int if count == 1 => HostValue::Ints(vec![value.i32]),
        ShaderType::Int => HostValue::Ints(slice(value.ints, count).to_vec()),
        ShaderType::UInt if count == 1 => HostValue::UInts(vec![value.u32]),
        ShaderType::UInt => HostValue::UInts(slice(value.uints, count).to_vec()),
    })
}

/// # Safety
/// `handle` must be 0 or a live resource handle.
unsafe fn buffer<'a>(handle: Handle, operation: &'static str) -> BackendResult<&'a Buffer> {
    match get::<Resource>(handle, operation)? {
        Resource::Buffer { buffer, .. } => Ok(&**buffer),
        _ => Err(BackendError::invalid(operation, "resource is not a buffer")),
    }
}

/// # Safety
/// `handle` must be 0 or a live resource handle.
unsafe fn texture<'a>(handle: Handle, operation: &'static str) -> BackendResult<&'a Texture> {
    match get::<Resource>(handle, operation)? {
        Resource::Texture(texture) => Ok(texture),
        _ => Err(BackendError::invalid(operation, "resource is not a texture")),
    }
}

fn extent(e: ExtentC) -> UVec3 {
    UVec3::new(e.x, e.y, e.z)
}

/// Edges to x, y, width, height; inverted or negative edges are rejected
fn rect(r: &RectC) -> BackendResult<UVec4> {
    if r.left < 0 || r.top < 0 || r.right <= r.left || r.bottom <= r.top {
        return Err(BackendError::invalid("clear", format!("bad clear rectangle {r:?}")));
    }
    Ok(UVec4::new(r.left as u32, r.top as u32, (r.right - r.left) as u32, (r.bottom - r.top) as u32))
}

/// Feed recorded commands into a real command list and run it
///
/// # Safety
/// Every handle referenced by `commands` must still be live.
unsafe fn replay(ctx: &Context, commands: &[Recorded]) -> BackendResult<()> {
    let mut list = ctx.create_command_list();
    for command in commands {
        match command {
            Recorded::SetPipeline(pipeline) => match get::<HostPipeline>(*pipeline, "set_pipeline_state")? {
                HostPipeline::Graphics(p) => list.set_pipeline_state(p)?,
                HostPipeline::Compute(p) => list.set_pipeline_state(p)?,
            },
            Recorded::Constants(constants) => {
                let mut params = Vec::with_capacity(constants.len());
                let mut values = Vec::with_capacity(constants.len());
                for c in constants {
                    params.push(ShaderParameter {
                        name: &c.name,
                        ty: c.ty,
                        length: c.length,
                        width: c.width,
                        index: c.index,
                        offset: c.offset,
                        step: c.step,
                    });
                    values.push(match &c.value {
                        HostValue::Floats(v) if v.len() == 1 => ShaderValue::Float(v[0]),
                        HostValue::Floats(v) => ShaderValue::Floats(v),
                        HostValue::Ints(v) if v.len() == 1 => ShaderValue::Int(v[0]),
                        HostValue::Ints(v) => ShaderValue::Ints(v),
                        HostValue::UInts(v) if v.len() == 1 => ShaderValue::UInt(v[0]),
                        HostValue::UInts(v) => ShaderValue::UInts(v),
                        HostValue::Resource(handle) => match get::<Resource>(*handle, "set_shader_constants")? {
                            Resource::Buffer { buffer, .. } => ShaderValue::Buffer(&**buffer),
                            Resource::Texture(texture) => ShaderValue::Texture(texture),
                            Resource::FrameBuffer(_) => {
                                return Err(BackendError::invalid(
                                    "set_shader_constants",
                                    format!("'{}': render targets can't be sampled directly", c.name),
                                ))
                            }
                        },
                    });
                }
                list.set_shader_constants(&params, &values)?;
            }
            &Recorded::Draw([vertex_count, instance_count, start_vertex, start_instance]) => {
                list.draw(vertex_count, instance_count, start_vertex, start_instance)?
            }
            &Recorded::DrawIndexed { index_count, instance_count, start_index, base_vertex, start_instance } => {
                list.draw_indexed(index_count, instance_count, start_index, base_vertex, start_instance)?
            }
            Recorded::Dispatch => list.dispatch()?,
            &Recorded::Barrier(flags) => list.barrier(flags)?,
            Recorded::Clear(flags, color, depth, stencil, rects) => {
                list.clear_rects(*flags, *color, *depth, *stencil, rects)?
            }
            &Recorded::Copy { src, dest, src_offset, dest_offset, bytes } => list.copy_subresource(
                buffer(src, "copy_subresource")?,
                buffer(dest, "copy_subresource")?,
                src_offset,
                dest_offset,
                bytes,
            )?,
            &Recorded::CopyRegion { src, dest, level, src_offset, dest_offset, size } => list.copy_resource_region(
                texture(src, "copy_resource_region")?,
                texture(dest, "copy_resource_region")?,
                level,
                src_offset,
                dest_offset,
                size,
            )?,
            &Recorded::Viewport(index, rect, depth) => list.set_viewport(index, rect, depth)?,
            &Recorded::Scissor(index, rect) => list.set_scissor(index, rect)?,
        }
    }
    list.execute()
}

// =============================================================================
// Vtable entries
// =============================================================================

unsafe extern "C" fn get_caps(_: *mut BackendVtable, ctx: Handle, out: *mut CapsC) -> i32 {
    to_status(boundary("get_caps", || {
        let caps = get::<Context>(ctx, "get_caps")?.caps();
        let out = out.as_mut().ok_or_else(|| BackendError::invalid("get_caps", "null output"))?;
        *out = CapsC {
            features: caps.features.bits(),
            version: caps.version,
            max_textures: caps.max_textures,
            max_render_targets: caps.max_render_targets,
            max_texture_size: caps.max_texture_size,
            max_samples: caps.max_samples,
            max_storage_bindings: caps.max_storage_bindings,
            max_uniform_bindings: caps.max_uniform_bindings,
            max_vertex_attribs: caps.max_vertex_attribs,
            max_viewports: caps.max_viewports,
            max_work_groups: caps.max_work_groups.to_array(),
        };
        Ok(())
    }))
}

unsafe extern "C" fn create_context(this: *mut BackendVtable, width: u32, height: u32, backbuffer: u8) -> Handle {
    to_handle(boundary("create_context", || {
        let backend = get::<Backend>(this as Handle, "create_context")?;
        let desc = ContextDesc {
            size: UVec2::new(width, height),
            backbuffer: decode(PixelFormat::from_code(backbuffer), "create_context", "pixel format", backbuffer)?,
            window: None,
        };
        Context::new(backend.driver.clone(), &desc)
    }))
}

unsafe extern "C" fn resize_context(_: *mut BackendVtable, ctx: Handle, width: u32, height: u32) -> i32 {
    to_status(boundary("resize_context", || get::<Context>(ctx, "resize_context")?.resize(UVec2::new(width, height))))
}

unsafe extern "C" fn destroy_context(_: *mut BackendVtable, ctx: Handle) -> i32 {
    to_status(boundary("destroy_context", || release::<Context>(ctx, "destroy_context")))
}

unsafe extern "C" fn compile_shader(_: *mut BackendVtable, ctx: Handle, stage: u8, source: *const c_char) -> Handle {
    to_handle(boundary("compile_shader", || {
        let ctx = get::<Context>(ctx, "compile_shader")?;
        let stage = decode(ShaderStage::from_index(stage), "compile_shader", "shader stage", stage)?;
        let source = name(source, "compile_shader")?.to_string();
        let object = ShaderObject::compile(ctx, stage, &source)?;
        Ok(HostShader { stage, source, _object: object })
    }))
}

unsafe extern "C" fn destroy_shader(_: *mut BackendVtable, _: Handle, shader: Handle) -> i32 {
    to_status(boundary("destroy_shader", || release::<HostShader>(shader, "destroy_shader")))
}

unsafe extern "C" fn create_buffer(
    _: *mut BackendVtable,
    ctx: Handle,
    data: *const c_void,
    bytes: u32,
    usage: u8,
) -> Handle {
    to_handle(boundary("create_buffer", || {
        let ctx = get::<Context>(ctx, "create_buffer")?;
        let usage = decode(BufferUsage::from_code(usage), "create_buffer", "buffer usage", usage)?;
        let data = (!data.is_null()).then(|| slice(data.cast::<u8>(), bytes));
        let buffer = Buffer::create(ctx, usage, bytes as usize, data)?;
        Ok(Resource::Buffer { mapping: None, buffer: Box::new(buffer) })
    }))
}

unsafe extern "C" fn create_texture(
    _: *mut BackendVtable,
    ctx: Handle,
    desc: *const TextureDescC,
    data: *const c_void,
) -> Handle {
    const OP: &str = "create_texture";
    to_handle(boundary(OP, || {
        let ctx = get::<Context>(ctx, OP)?;
        let c = desc.as_ref().ok_or_else(|| BackendError::invalid(OP, "null description"))?;
        let desc = TextureDesc {
            usage: decode(TextureUsage::from_code(c.usage), OP, "texture usage", c.usage)?,
            format: decode(PixelFormat::from_code(c.format), OP, "pixel format", c.format)?,
            size: UVec3::new(c.width, c.height.max(1), c.depth.max(1)),
            mip_levels: c.mip_levels.max(1),
            samples: c.samples.max(1),
            sampler: match c.sampler.as_ref() {
                Some(s) => sampler(s)?,
                None => Sampler::default(),
            },
        };
        let data = (!data.is_null()).then(|| std::slice::from_raw_parts(data.cast::<u8>(), desc.byte_len()));
        Ok(Resource::Texture(Texture::create(ctx, &desc, data)?))
    }))
}

/// Framebuffer with `textures` in colour slots 0.. and `depthstencil`
/// attached where the DEPTH and STENCIL bits of `attachments` say. The
/// depth-stencil handle is ignored when neither bit is set.
unsafe extern "C" fn create_render_target(
    _: *mut BackendVtable,
    ctx: Handle,
    depthstencil: Handle,
    textures: *const Handle,
    n_textures: u32,
    attachments: u8,
) -> Handle {
    const OP: &str = "create_render_target";
    to_handle(boundary(OP, || {
        let ctx = get::<Context>(ctx, OP)?;
        let mut list = Vec::with_capacity(n_textures as usize + 1);
        for (slot, &handle) in slice(textures, n_textures).iter().enumerate() {
            let slot = u8::try_from(slot).map_err(|_| BackendError::invalid(OP, "too many textures"))?;
            list.push(Attachment::color(slot, texture(handle, OP)?));
        }

        let flags = ClearFlags::from_bits_truncate(attachments) & (ClearFlags::DEPTH | ClearFlags::STENCIL);
        if !flags.is_empty() {
            let depth = texture(depthstencil, OP)?;
            list.push(if flags == ClearFlags::DEPTH | ClearFlags::STENCIL {
                Attachment::depth_stencil(depth)
            } else if flags == ClearFlags::DEPTH {
                Attachment::depth(depth)
            } else {
                Attachment::stencil(depth)
            });
        }
        Ok(Resource::FrameBuffer(FrameBuffer::create(ctx, &list, 0)?))
    }))
}

unsafe extern "C" fn destroy_resource(_: *mut BackendVtable, _: Handle, resource: Handle) -> i32 {
    to_status(boundary("destroy_resource", || release::<Resource>(resource, "destroy_resource")))
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn create_pipeline_state(
    _: *mut BackendVtable,
    ctx: Handle,
    desc: *const PipelineDescC,
    targets: *const Handle,
    n_targets: u32,
    blend_desc: *const BlendC,
    vertex_buffers: *const Handle,
    strides: *const u32,
    n_buffers: u32,
    attributes: *const ShaderParameterC,
    n_attributes: u32,
    index_buffer: Handle,
    index_format: u8,
) -> Handle {
    const OP: &str = "create_pipeline_state";
    to_handle(boundary(OP, || {
        let ctx = get::<Context>(ctx, OP)?;
        let c = desc.as_ref().ok_or_else(|| BackendError::invalid(OP, "null description"))?;

        // Step 1: Stages, recompiled from their sources
        let mut shaders = ShaderStages::new();
        for (stage, &handle) in ShaderStage::ALL.iter().zip(&c.shaders) {
            if handle == 0 {
                continue;
            }
            let shader = get::<HostShader>(handle, OP)?;
            if shader.stage != *stage {
                return Err(BackendError::invalid(
                    OP,
                    format!("{:?} shader passed in the {stage:?} slot", shader.stage),
                ));
            }
            shaders.add(ShaderObject::compile(ctx, shader.stage, &shader.source));
        }

        // Step 2: Fixed function
        let desc = PipelineDesc {
            shaders,
            members: PipelineMembers::from_bits_truncate(c.members),
            primitive: decode(Primitive::from_code(c.primitive), OP, "primitive", c.primitive)?,
            blend_factor: color(c.blend_factor),
            flags: PipelineFlags::from_bits_truncate(c.flags),
            sample_mask: c.sample_mask,
            stencil_ref: c.stencil_ref,
            stencil_read_mask: c.stencil_read_mask,
            stencil_write_mask: c.stencil_write_mask,
            stencil_fail: decode(StencilOp::from_code(c.stencil_fail), OP, "stencil op", c.stencil_fail)?,
            stencil_depth_fail: decode(
                StencilOp::from_code(c.stencil_depth_fail),
                OP,
                "stencil op",
                c.stencil_depth_fail,
            )?,
            stencil_pass: decode(StencilOp::from_code(c.stencil_pass), OP, "stencil op", c.stencil_pass)?,
            stencil_func: decode(Comparison::from_code(c.stencil_func), OP, "comparison", c.stencil_func)?,
            depth_func: decode(Comparison::from_code(c.depth_func), OP, "comparison", c.depth_func)?,
            fill: decode(FillMode::from_code(c.fill), OP, "fill mode", c.fill)?,
            cull: decode(CullMode::from_code(c.cull), OP, "cull mode", c.cull)?,
            depth_bias: c.depth_bias,
            slope_scaled_depth_bias: c.slope_scaled_depth_bias,
        };

        // Step 3: Targets, vertex sources and attributes
        let mut render_targets = Vec::with_capacity(n_targets as usize);
        for &handle in slice(targets, n_targets) {
            match get::<Resource>(handle, OP)? {
                Resource::FrameBuffer(framebuffer) => render_targets.extend_from_slice(framebuffer.render_targets()),
                Resource::Texture(texture) => render_targets.push(RenderTarget::from(texture)),
                Resource::Buffer { .. } => return Err(BackendError::invalid(OP, "a buffer can't be a render target")),
            }
        }
        let blend = match blend_desc.as_ref() {
            Some(b) => blend(b)?,
            None => Blend::default(),
        };
        let strides = slice(strides, n_buffers);
        let mut buffers = Vec::with_capacity(n_buffers as usize);
        for (i, &handle) in slice(vertex_buffers, n_buffers).iter().enumerate() {
            let stride = strides.get(i).copied().unwrap_or(0);
            buffers.push(VertexBuffer { buffer: buffer(handle, OP)?, stride });
        }
        let attributes = slice(attributes, n_attributes)
            .iter()
            .map(|a| parameter(a, OP))
            .collect::<BackendResult<Vec<_>>>()?;
        let index = if index_buffer == 0 {
            None
        } else {
            let format = decode(IndexFormat::from_code(index_format), OP, "index format", index_format)?;
            Some(IndexBuffer { buffer: buffer(index_buffer, OP)?, format })
        };

        let pipeline = PipelineState::create(ctx, desc, &render_targets, &blend, &buffers, &attributes, index)?;
        Ok(HostPipeline::Graphics(pipeline))
    }))
}

unsafe extern "C" fn create_compute_pipeline(
    _: *mut BackendVtable,
    ctx: Handle,
    shader: Handle,
    x: u32,
    y: u32,
    z: u32,
) -> Handle {
    const OP: &str = "create_compute_pipeline";
    to_handle(boundary(OP, || {
        let ctx = get::<Context>(ctx, OP)?;
        let shader = get::<HostShader>(shader, OP)?;
        let compiled = ShaderObject::compile(ctx, shader.stage, &shader.source);
        Ok(HostPipeline::Compute(ComputePipeline::create(ctx, compiled, UVec3::new(x, y, z))?))
    }))
}

unsafe extern "C" fn destroy_pipeline(_: *mut BackendVtable, _: Handle, pipeline: Handle) -> i32 {
    to_status(boundary("destroy_pipeline", || release::<HostPipeline>(pipeline, "destroy_pipeline")))
}

unsafe extern "C" fn create_command_list(_: *mut BackendVtable, ctx: Handle) -> Handle {
    to_handle(boundary("create_command_list", || {
        get::<Context>(ctx, "create_command_list")?;
        Ok(HostCommandList::default())
    }))
}

unsafe extern "C" fn destroy_command_list(_: *mut BackendVtable, list: Handle) -> i32 {
    to_status(boundary("destroy_command_list", || release::<HostCommandList>(list, "destroy_command_list")))
}

unsafe extern "C" fn set_pipeline_state(_: *mut BackendVtable, list: Handle, pipeline: Handle) -> i32 {
    const OP: &str = "set_pipeline_state";
    to_status(boundary(OP, || {
        get::<HostPipeline>(pipeline, OP)?;
        get_mut::<HostCommandList>(list, OP)?.record(OP, Recorded::SetPipeline(pipeline))
    }))
}

unsafe extern "C" fn set_shader_constants(
    _: *mut BackendVtable,
    list: Handle,
    params: *const ShaderParameterC,
    values: *const ShaderValueC,
    count: u32,
) -> i32 {
    const OP: &str = "set_shader_constants";
    to_status(boundary(OP, || {
        let list = get_mut::<HostCommandList>(list, OP)?;
        let mut constants = Vec::with_capacity(count as usize);
        for (c, value) in slice(params, count).iter().zip(slice(values, count)) {
            let param = parameter(c, OP)?;
            constants.push(HostConstant {
                name: param.name.to_string(),
                ty: param.ty,
                length: param.length,
                width: param.width,
                index: param.index,
                offset: param.offset,
                step: param.step,
                value: host_value(&param, value)?,
            });
        }
        list.record(OP, Recorded::Constants(constants))
    }))
}

unsafe extern "C" fn draw(
    _: *mut BackendVtable,
    list: Handle,
    vertex_count: u32,
    instance_count: u32,
    start_vertex: u32,
    start_instance: u32,
) -> i32 {
    to_status(boundary("draw", || {
        let command = Recorded::Draw([vertex_count, instance_count, start_vertex, start_instance]);
        get_mut::<HostCommandList>(list, "draw")?.record("draw", command)
    }))
}

unsafe extern "C" fn draw_indexed(
    _: *mut BackendVtable,
    list: Handle,
    index_count: u32,
    instance_count: u32,
    start_index: u32,
    base_vertex: i32,
    start_instance: u32,
) -> i32 {
    to_status(boundary("draw_indexed", || {
        let command = Recorded::DrawIndexed { index_count, instance_count, start_index, base_vertex, start_instance };
        get_mut::<HostCommandList>(list, "draw_indexed")?.record("draw_indexed", command)
    }))
}

unsafe extern "C" fn dispatch(_: *mut BackendVtable, list: Handle) -> i32 {
    to_status(boundary("dispatch", || get_mut::<HostCommandList>(list, "dispatch")?.record("dispatch", Recorded::Dispatch)))
}

unsafe extern "C" fn sync_point(_: *mut BackendVtable, list: Handle, barrier: u32) -> i32 {
    const OP: &str = "sync_point";
    to_status(boundary(OP, || {
        let flags = BarrierFlags::from_bits(barrier)
            .ok_or_else(|| BackendError::invalid(OP, format!("unknown barrier bits {barrier:#x}")))?;
        get_mut::<HostCommandList>(list, OP)?.record(OP, Recorded::Barrier(flags))
    }))
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn clear(
    _: *mut BackendVtable,
    list: Handle,
    flags: u8,
    rgba: ColorC,
    depth: f32,
    stencil: u8,
    n_rects: u32,
    rects: *const RectC,
) -> i32 {
    to_status(boundary("clear", || {
        let flags = ClearFlags::from_bits(flags)
            .ok_or_else(|| BackendError::invalid("clear", format!("unknown clear bits {flags:#x}")))?;
        let rects = slice(rects, n_rects).iter().map(rect).collect::<BackendResult<Vec<_>>>()?;
        let command = Recorded::Clear(flags, color(rgba), depth, stencil, rects);
        get_mut::<HostCommandList>(list, "clear")?.record("clear", command)
    }))
}

/// Whole-resource copy: `size.x` bytes between buffers, or a `size` box at
/// mip `level` between textures
unsafe extern "C" fn copy_resource(
    _: *mut BackendVtable,
    list: Handle,
    src: Handle,
    dest: Handle,
    size: ExtentC,
    level: u32,
) -> i32 {
    const OP: &str = "copy_resource";
    to_status(boundary(OP, || {
        let command = match (get::<Resource>(src, OP)?, get::<Resource>(dest, OP)?) {
            (Resource::Buffer { .. }, Resource::Buffer { .. }) => {
                Recorded::Copy { src, dest, src_offset: 0, dest_offset: 0, bytes: size.x as usize }
            }
            (Resource::Texture(_), Resource::Texture(_)) => Recorded::CopyRegion {
                src,
                dest,
                level,
                src_offset: UVec3::ZERO,
                dest_offset: UVec3::ZERO,
                size: extent(size),
            },
            _ => return Err(BackendError::invalid(OP, "mismatched source and destination resources")),
        };
        get_mut::<HostCommandList>(list, OP)?.record(OP, command)
    }))
}

unsafe extern "C" fn copy_subresource(
    _: *mut BackendVtable,
    list: Handle,
    src: Handle,
    dest: Handle,
    src_offset: usize,
    dest_offset: usize,
    bytes: usize,
) -> i32 {
    const OP: &str = "copy_subresource";
    to_status(boundary(OP, || {
        buffer(src, OP)?;
        buffer(dest, OP)?;
        let command = Recorded::Copy { src, dest, src_offset, dest_offset, bytes };
        get_mut::<HostCommandList>(list, OP)?.record(OP, command)
    }))
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn copy_resource_region(
    _: *mut BackendVtable,
    list: Handle,
    src: Handle,
    dest: Handle,
    level: u32,
    src_offset: ExtentC,
    dest_offset: ExtentC,
    size: ExtentC,
) -> i32 {
    const OP: &str = "copy_resource_region";
    to_status(boundary(OP, || {
        texture(src, OP)?;
        texture(dest, OP)?;
        let command = Recorded::CopyRegion {
            src,
            dest,
            level,
            src_offset: extent(src_offset),
            dest_offset: extent(dest_offset),
            size: extent(size),
        };
        get_mut::<HostCommandList>(list, OP)?.record(OP, command)
    }))
}

unsafe extern "C" fn set_viewport(_: *mut BackendVtable, list: Handle, index: u32, viewport: *const ViewportC) -> i32 {
    const OP: &str = "set_viewport";
    to_status(boundary(OP, || {
        let v = viewport.as_ref().ok_or_else(|| BackendError::invalid(OP, "null viewport"))?;
        let command = Recorded::Viewport(index, Vec4::new(v.x, v.y, v.width, v.height), (v.min_depth, v.max_depth));
        get_mut::<HostCommandList>(list, OP)?.record(OP, command)
    }))
}

unsafe extern "C" fn set_scissor(
    _: *mut BackendVtable,
    list: Handle,
    index: u32,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> i32 {
    to_status(boundary("set_scissor", || {
        let command = Recorded::Scissor(index, UVec4::new(x, y, width, height));
        get_mut::<HostCommandList>(list, "set_scissor")?.record("set_scissor", command)
    }))
}

unsafe extern "C" fn execute(_: *mut BackendVtable, ctx: Handle, list: Handle) -> i32 {
    const OP: &str = "execute";
    to_status(boundary(OP, || {
        let ctx = get::<Context>(ctx, OP)?;
        let list = get_mut::<HostCommandList>(list, OP)?;
        if list.executed {
            return Err(BackendError::misuse(OP, "command list was already executed"));
        }
        list.executed = true;
        replay(ctx, &list.commands)
    }))
}

unsafe extern "C" fn map_resource(
    _: *mut BackendVtable,
    ctx: Handle,
    resource: Handle,
    offset: u32,
    len: u32,
    access: u32,
) -> *mut c_void {
    const OP: &str = "map_resource";
    boundary(OP, || {
        // Hosts unmap before destroying the context
        let ctx: &'static Context = get::<Context>(ctx, OP)?;
        let Resource::Buffer { mapping, buffer } = get_mut::<Resource>(resource, OP)? else {
            return Err(BackendError::invalid(OP, "only buffers can be mapped"));
        };
        if mapping.is_some() {
            return Err(BackendError::misuse(OP, "buffer is already mapped"));
        }
        let access = AccessFlags::from_bits(access)
            .ok_or_else(|| BackendError::invalid(OP, format!("unknown access bits {access:#x}")))?;
        // The box gives the buffer a stable address for as long as the
        // resource lives, and the mapping is dropped first
        let buffer: &'static Buffer = &*(&**buffer as *const Buffer);
        let mapped = ctx.map_buffer(buffer, offset as usize, len as usize, access)?;
        let ptr = mapped.as_mut_ptr().cast::<c_void>();
        *mapping = Some(mapped);
        Ok(ptr)
    })
    .unwrap_or(std::ptr::null_mut())
}

unsafe extern "C" fn unmap_resource(_: *mut BackendVtable, _: Handle, resource: Handle) -> i32 {
    const OP: &str = "unmap_resource";
    to_status(boundary(OP, || match get_mut::<Resource>(resource, OP)? {
        Resource::Buffer { mapping, .. } => match mapping.take() {
            Some(mapped) => mapped.unmap(),
            None => Err(BackendError::misuse(OP, "buffer is not mapped")),
        },
        _ => Err(BackendError::invalid(OP, "only buffers can be mapped")),
    }))
}

unsafe extern "C" fn destroy(this: *mut BackendVtable) -> i32 {
    let logs = (this as *const Backend).as_ref().is_some_and(|b| b.logs);
    let status = to_status(boundary("destroy", || release::<Backend>(this as Handle, "destroy")));
    if logs {
        HostLogger::uninstall();
    }
    status
}

const VTABLE: BackendVtable = BackendVtable {
    get_caps,
    create_context,
    resize_context,
    destroy_context,
    compile_shader,
    destroy_shader,
    create_buffer,
    create_texture,
    create_render_target,
    destroy_resource,
    create_pipeline_state,
    create_compute_pipeline,
    destroy_pipeline,
    create_command_list,
    destroy_command_list,
    set_pipeline_state,
    set_shader_constants,
    draw,
    draw_indexed,
    dispatch,
    sync_point,
    clear,
    copy_resource,
    copy_subresource,
    copy_resource_region,
    set_viewport,
    set_scissor,
    execute,
    map_resource,
    unmap_resource,
    destroy,
};

/// Build a vtable over an existing software driver.
///
/// Rust hosts use this to register compute kernels on the driver before
/// handing the table out.
pub fn software_backend(driver: Rc<SoftwareDriver>, root: *mut c_void, log: Option<LogFn>) -> *mut BackendVtable {
    if let Some(log) = log {
        HostLogger::install(root, log);
    }
    log::info!("Software backend ready");
    let backend = Backend { vtable: VTABLE, driver, logs: log.is_some() };
    Box::into_raw(Box::new(backend)).cast::<BackendVtable>()
}

/// Entry point for C hosts.
///
/// # Safety
/// `log`, when given, must stay callable until the backend is destroyed.
#[no_mangle]
pub unsafe extern "C" fn vellum_software_backend(root: *mut c_void, log: Option<LogFn>) -> *mut BackendVtable {
    software_backend(Rc::new(SoftwareDriver::new()), root, log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_distinct_and_negative() {
        let kinds = [
            ErrorKind::Allocation,
            ErrorKind::Configuration,
            ErrorKind::Incomplete,
            ErrorKind::Compile,
            ErrorKind::InvalidParameter,
            ErrorKind::Misuse,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|&k| error_code(k)).collect();
        codes.push(ERR_INTERNAL);
        assert!(codes.iter().all(|&c| c < 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len() + 1);
    }

    #[test]
    fn boundary_turns_panics_into_codes() {
        let result: Result<(), i32> = boundary("test", || panic!("boom"));
        assert_eq!(result, Err(ERR_INTERNAL));
        let result = boundary("test", || Err::<(), _>(BackendError::misuse("test", "late")));
        assert_eq!(result, Err(error_code(ErrorKind::Misuse)));
    }

    #[test]
    fn key_values_become_typed_arguments() {
        let mut arguments = Arguments::default();
        let source: [(&str, Value<'_>); 4] = [
            ("ok", Value::from(true)),
            ("count", Value::from(7u32)),
            ("delta", Value::from(-3i64)),
            ("name", Value::from("buffer")),
        ];
        for (key, value) in source {
            arguments.visit_pair(Key::from_str(key), value).unwrap();
        }

        let types: Vec<LogType> = arguments.values.iter().map(|v| v.ty).collect();
        assert_eq!(
            types,
            [
                LogType::String,
                LogType::Boolean,
                LogType::String,
                LogType::U32,
                LogType::String,
                LogType::I32,
                LogType::String,
                LogType::OwnedString,
            ]
        );
        // SAFETY: the test reads back the payloads it just wrote
        unsafe {
            assert_eq!(arguments.values[3].value.u32, 7);
            assert_eq!(arguments.values[5].value.i32, -3);
            let owned = arguments.values[7].value.owned;
            assert_eq!(CStr::from_ptr(owned).to_str().unwrap(), "buffer");
            vellum_free_string(owned);
        }
    }

    const SCALE: &str = "#version 460\nlayout(local_size_x = 64) in;\nuniform int k;\nvoid main() {}\n";

    fn backend() -> (Rc<SoftwareDriver>, *mut BackendVtable) {
        let driver = Rc::new(SoftwareDriver::new());
        driver.register_kernel(SCALE, |inv, io| {
            let i = inv.linear_index();
            let k = io.uniform_i32("k").unwrap_or(0);
            let value: i32 = io.load(0, i);
            io.store(1, i, value * k);
        });
        (driver.clone(), software_backend(driver, std::ptr::null_mut(), None))
    }

    fn resource(name: &CStr, index: u32) -> ShaderParameterC {
        ShaderParameterC { name: name.as_ptr(), ty: ShaderType::Texture as u8, length: 1, width: 1, index, offset: 0, step: 0 }
    }

    #[test]
    fn compute_round_trip_through_the_table() {
        let (driver, vt) = backend();
        // SAFETY: every handle is created through the table and used while live
        unsafe {
            let t = &*vt;
            let ctx = (t.create_context)(vt, 64, 64, PixelFormat::R8G8B8A8Unorm as u8);
            assert_ne!(ctx, 0);
            let mut caps = CapsC::default();
            assert_eq!((t.get_caps)(vt, ctx, &mut caps), 0);
            assert!(caps.max_work_groups[0] >= 16);

            let input: Vec<i32> = (0..1024).collect();
            let storage = BufferUsage::Storage as u8;
            let src = (t.create_buffer)(vt, ctx, input.as_ptr().cast(), 4096, storage);
            let dst = (t.create_buffer)(vt, ctx, std::ptr::null(), 4096, storage);
            assert!(src != 0 && dst != 0);

            let source = CString::new(SCALE).unwrap();
            let shader = (t.compile_shader)(vt, ctx, ShaderStage::Compute as u8, source.as_ptr());
            let pipeline = (t.create_compute_pipeline)(vt, ctx, shader, 16, 1, 1);
            assert_ne!(pipeline, 0);

            let list = (t.create_command_list)(vt, ctx);
            let names = ["k", "Input", "Output"].map(|n| CString::new(n).unwrap());
            let params = [
                ShaderParameterC { ty: ShaderType::Int as u8, ..resource(&names[0], 0) },
                resource(&names[1], 0),
                resource(&names[2], 1),
            ];
            let values = [ShaderValueC { i32: 3 }, ShaderValueC { resource: src }, ShaderValueC { resource: dst }];
            assert_eq!((t.set_pipeline_state)(vt, list, pipeline), 0);
            assert_eq!((t.set_shader_constants)(vt, list, params.as_ptr(), values.as_ptr(), 3), 0);
            assert_eq!((t.dispatch)(vt, list), 0);
            assert_eq!((t.sync_point)(vt, list, BarrierFlags::STORAGE_BUFFER.bits()), 0);
            assert_eq!((t.execute)(vt, ctx, list), 0);
            assert_eq!(driver.dispatch_count(), 1);

            let ptr = (t.map_resource)(vt, ctx, dst, 0, 4096, AccessFlags::READ.bits());
            assert!(!ptr.is_null());
            let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), 4096);
            let output = bytemuck::pod_collect_to_vec::<u8, i32>(bytes);
            assert!(output.iter().enumerate().all(|(i, &v)| v == i as i32 * 3));
            assert_eq!((t.unmap_resource)(vt, ctx, dst), 0);

            for handle in [src, dst] {
                assert_eq!((t.destroy_resource)(vt, ctx, handle), 0);
            }
            assert_eq!((t.destroy_command_list)(vt, list), 0);
            assert_eq!((t.destroy_pipeline)(vt, ctx, pipeline), 0);
            assert_eq!((t.destroy_shader)(vt, ctx, shader), 0);
            assert_eq!((t.destroy_context)(vt, ctx), 0);
            assert_eq!((t.destroy)(vt), 0);
        }
    }

    #[test]
    fn misuse_is_reported_as_codes() {
        let (_driver, vt) = backend();
        let misuse = error_code(ErrorKind::Misuse);
        // SAFETY: as above
        unsafe {
            let t = &*vt;
            let ctx = (t.create_context)(vt, 16, 16, PixelFormat::R8G8B8A8Unorm as u8);
            let buffer = (t.create_buffer)(vt, ctx, std::ptr::null(), 64, BufferUsage::Uniform as u8);

            // Dispatch without a compute pipeline fails when the list runs
            let list = (t.create_command_list)(vt, ctx);
            assert_eq!((t.dispatch)(vt, list), 0);
            assert_eq!((t.execute)(vt, ctx, list), misuse);
            assert_eq!((t.execute)(vt, ctx, list), misuse);
            assert_eq!((t.draw)(vt, list, 3, 1, 0, 0), misuse);

            assert!(!(t.map_resource)(vt, ctx, buffer, 0, 64, AccessFlags::WRITE.bits()).is_null());
            assert!((t.map_resource)(vt, ctx, buffer, 0, 64, AccessFlags::WRITE.bits()).is_null());
            assert_eq!((t.unmap_resource)(vt, ctx, buffer), 0);
            assert_eq!((t.unmap_resource)(vt, ctx, buffer), misuse);

            assert_eq!((t.create_context)(vt, 16, 16, 200), 0);
            assert_eq!((t.sync_point)(vt, list, 0), misuse);
            assert_eq!((t.destroy_resource)(vt, ctx, 0), error_code(ErrorKind::InvalidParameter));

            (t.destroy_resource)(vt, ctx, buffer);
            (t.destroy_command_list)(vt, list);
            (t.destroy_context)(vt, ctx);
            (t.destroy)(vt);
        }
    }

    static ERRORS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    unsafe extern "C" fn count_errors(
        _root: *mut c_void,
        level: LogLevel,
        _file: *const c_char,
        _line: i32,
        _message: *const c_char,
        args: *const LogValue,
        count: i32,
        free: FreeStringFn,
    ) {
        if level == LogLevel::Error {
            ERRORS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        for arg in slice(args, count as u32) {
            if arg.ty == LogType::OwnedString {
                free(arg.value.owned);
            }
        }
    }

    static SHADER_WARNINGS: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

    unsafe extern "C" fn count_shader_warnings(
        _root: *mut c_void,
        level: LogLevel,
        file: *const c_char,
        _line: i32,
        _message: *const c_char,
        args: *const LogValue,
        count: i32,
        free: FreeStringFn,
    ) {
        let from_shader = !file.is_null() && CStr::from_ptr(file).to_string_lossy().ends_with("shader.rs");
        if from_shader && matches!(level, LogLevel::Fatal | LogLevel::Error | LogLevel::Warning) {
            SHADER_WARNINGS.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        for arg in slice(args, count as u32) {
            if arg.ty == LogType::OwnedString {
                free(arg.value.owned);
            }
        }
    }

    #[test]
    fn compile_failures_are_reported_by_the_boundary_only() {
        let vt = software_backend(Rc::new(SoftwareDriver::new()), std::ptr::null_mut(), Some(count_shader_warnings));
        let source = CString::new("#version 460\nvoid helper() {}\n").unwrap();
        // SAFETY: live table, NUL-terminated source
        unsafe {
            let t = &*vt;
            let ctx = (t.create_context)(vt, 8, 8, PixelFormat::R8G8B8A8Unorm as u8);
            assert_eq!((t.compile_shader)(vt, ctx, ShaderStage::Pixel as u8, source.as_ptr()), 0);
            assert_eq!(SHADER_WARNINGS.load(std::sync::atomic::Ordering::SeqCst), 0);
            (t.destroy_context)(vt, ctx);
            (t.destroy)(vt);
        }
    }

    #[test]
    fn failures_reach_the_host_logger() {
        let vt = software_backend(Rc::new(SoftwareDriver::new()), std::ptr::null_mut(), Some(count_errors));
        // SAFETY: as above
        unsafe {
            let t = &*vt;
            let before = ERRORS.load(std::sync::atomic::Ordering::SeqCst);
            assert_eq!((t.resize_context)(vt, 0, 1, 1), error_code(ErrorKind::InvalidParameter));
            assert!(ERRORS.load(std::sync::atomic::Ordering::SeqCst) > before);
            (t.destroy)(vt);
        }
    }
}
