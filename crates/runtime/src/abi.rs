//! Stable C entry points.
//!
//! Trampolines emitted into the host module call these symbols. The
//! process-wide context initializes lazily on the first call and is
//! drained by `ostinato_shutdown`.

use std::ffi::{c_char, c_void, CStr};
use std::sync::{Arc, OnceLock};

use tracing::error;

use crate::backend::SpecializeBackend;
use crate::cache::CheckpointPtr;
use crate::config::Config;
use crate::jit::JitContext;

static CONTEXT: OnceLock<Arc<JitContext>> = OnceLock::new();

/// The process-wide context, created from the environment on first use.
pub fn global() -> &'static Arc<JitContext> {
    CONTEXT.get_or_init(|| JitContext::new(Config::from_env()))
}

/// Install the backend optimizer on the process-wide context. Until one
/// is installed every dispatch falls back.
pub fn install_global_backend(backend: Arc<dyn SpecializeBackend>) {
    global().install_backend(backend);
}

unsafe fn prototype_str<'a>(ir: *const c_char) -> Option<&'a str> {
    if ir.is_null() {
        error!("null prototype string in dispatch");
        return None;
    }
    match CStr::from_ptr(ir).to_str() {
        Ok(s) => Some(s),
        Err(_) => {
            error!("prototype string is not valid utf-8");
            None
        }
    }
}

/// `dispatch(proto_ir, &fn_ptr_slot, prototype_id, argc, params) -> ready`
///
/// Writes the specialized entry address into `*fn_ptr_slot` and returns
/// `true` on a cache hit; otherwise zeroes the slot, queues a build on
/// the first dispatch for the key, and returns `false` so the trampoline
/// takes the fallback. A null `fn_ptr_slot` clears the caller's stale
/// checkpoint registrations instead of dispatching.
///
/// # Safety
///
/// `proto_ir` must be a NUL-terminated serialized prototype; `params`
/// must follow the trampoline layout for `argc` slots; a non-null
/// `fn_ptr_slot` must stay valid until it is cleared or the pool drains.
#[no_mangle]
pub unsafe extern "C" fn ostinato_dispatch(
    proto_ir: *const c_char,
    fn_ptr_slot: *mut *const c_void,
    prototype_id: u64,
    argc: u32,
    params: *const *const u8,
) -> bool {
    let Some(ir) = prototype_str(proto_ir) else {
        return false;
    };
    let slot = if fn_ptr_slot.is_null() {
        None
    } else {
        Some(CheckpointPtr::new(fn_ptr_slot))
    };
    global().dispatch(ir, slot, prototype_id, argc, params)
}

/// Instrumentation-only mode: records telemetry for the region but never
/// specializes; always returns `fallback_ptr`.
///
/// # Safety
///
/// `proto_ir` must be a NUL-terminated serialized prototype.
#[no_mangle]
pub unsafe extern "C" fn ostinato_dispatch_no_recompile(
    proto_ir: *const c_char,
    fallback_ptr: *const c_void,
    prototype_id: u64,
    _argc: u32,
    _params: *const *const u8,
) -> *const c_void {
    if let Some(ir) = prototype_str(proto_ir) {
        global().dispatch_no_recompile(ir, prototype_id);
    }
    fallback_ptr
}

#[no_mangle]
pub extern "C" fn ostinato_trace_enter(region_id: u64) {
    global().trace_enter(region_id);
}

#[no_mangle]
pub extern "C" fn ostinato_trace_exit(region_id: u64) {
    global().trace_exit(region_id);
}

/// Drain the worker pool and flush telemetry. Safe to call more than
/// once.
#[no_mangle]
pub extern "C" fn ostinato_shutdown() {
    if let Some(ctx) = CONTEXT.get() {
        ctx.shutdown();
    }
}
