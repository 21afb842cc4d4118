use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use ostinato_extract::prototype_id;
use ostinato_ir::{
    FunctionBuilder, Linkage, ModuleBuilder, ModuleWriter, Param, Signature, Type,
};
use ostinato_runtime::{
    region, BackendError, CheckpointPtr, Config, JitContext, ModuleHandle, SpecializeBackend,
};

/// A prototype module shaped like the extractor's output: one
/// `jit_candidate` function `(i64 n, ptr a, i64 lb0)` with `bounds(1)`.
fn prototype_ir() -> (String, u64) {
    let mut mb = ModuleBuilder::new("app.kern_0.jit.region.prototype");
    let sig = Signature::new(
        "kern_0.jit.region",
        Linkage::Public,
        [
            Param::new(Type::I64, "n"),
            Param::new(Type::Ptr, "a"),
            Param::new(Type::I64, "lb0"),
        ],
        None,
    );
    let func_ref = mb.declare_function(sig.clone());

    let mut fb = FunctionBuilder::new(sig);
    let n = fb.args()[0];
    let a = fb.args()[1];
    let lb = fb.args()[2];

    let b0 = fb.append_block();
    let b1 = fb.append_block();
    let b2 = fb.append_block();

    fb.switch_to_block(b0);
    fb.jump(b1);

    fb.switch_to_block(b1);
    let iv = fb.phi(Type::I64, &[(lb, b0)]);
    let addr = fb.gep(a, iv, Type::I64);
    let elem = fb.load(addr, Type::I64);
    let one = fb.make_imm_value(1i64);
    let sum = fb.add(elem, one);
    fb.store(addr, sum);
    let next = fb.add(iv, one);
    fb.append_phi_arg(iv, next, b1);
    let cont = fb.slt(next, n);
    fb.br(cont, b1, b2);

    fb.switch_to_block(b2);
    fb.ret(None);

    let mut func = fb.finish();
    func.flags.jit_candidate = true;
    func.flags.lower_bound_count = 1;
    mb.define_function(func_ref, func);

    let ir = ModuleWriter::new(&mb.build()).write();
    let id = prototype_id(&ir);
    (ir, id)
}

#[derive(Default)]
struct FakeBackend {
    builds: AtomicUsize,
    fail: AtomicBool,
    variants: Mutex<Vec<String>>,
}

impl SpecializeBackend for FakeBackend {
    fn add_module(
        &self,
        module: &ostinato_ir::Module,
        _pipeline: &str,
    ) -> Result<ModuleHandle, BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Optimize("induced failure".to_string()));
        }
        let n = self.builds.fetch_add(1, Ordering::SeqCst);
        self.variants
            .lock()
            .push(ostinato_ir::ModuleWriter::new(module).write());
        Ok(ModuleHandle(n as u64))
    }

    fn find_symbol(&self, handle: ModuleHandle, _name: &str) -> Result<usize, BackendError> {
        Ok(0x1000 + handle.0 as usize * 0x10)
    }
}

struct Caller {
    n: i64,
    lb: i64,
    buf: Vec<i64>,
    slot: *const c_void,
}

impl Caller {
    fn new(n: i64) -> Self {
        Self {
            n,
            lb: 0,
            buf: vec![0; 16],
            slot: std::ptr::null(),
        }
    }

    /// One trampoline invocation against `ctx`.
    fn dispatch(&mut self, ctx: &Arc<JitContext>, ir: &str, id: u64) -> bool {
        let params: [*const u8; 3] = [
            &self.n as *const i64 as *const u8,
            self.buf.as_ptr() as *const u8,
            &self.lb as *const i64 as *const u8,
        ];
        unsafe {
            ctx.dispatch(
                ir,
                Some(CheckpointPtr::new(&mut self.slot)),
                id,
                3,
                params.as_ptr(),
            )
        }
    }

    fn clear_checkpoint(&mut self, ctx: &Arc<JitContext>, ir: &str, id: u64) {
        let params: [*const u8; 3] = [
            &self.n as *const i64 as *const u8,
            self.buf.as_ptr() as *const u8,
            &self.lb as *const i64 as *const u8,
        ];
        unsafe {
            ctx.dispatch(ir, None, id, 3, params.as_ptr());
        }
    }
}

fn context_with_backend() -> (Arc<JitContext>, Arc<FakeBackend>) {
    let ctx = JitContext::new(Config::default());
    let backend = Arc::new(FakeBackend::default());
    ctx.install_backend(backend.clone());
    (ctx, backend)
}

#[test]
fn first_call_builds_second_call_hits() {
    let (ctx, backend) = context_with_backend();
    let (ir, id) = prototype_ir();
    let mut caller = Caller::new(1000);

    // Miss: fallback path, build queued.
    assert!(!caller.dispatch(&ctx, &ir, id));
    assert!(caller.slot.is_null());
    ctx.wait_for_builds();
    assert_eq!(backend.builds.load(Ordering::SeqCst), 1);

    // The completion already published into the registered checkpoint.
    assert!(!caller.slot.is_null());

    // Hit: same key, no further build.
    assert!(caller.dispatch(&ctx, &ir, id));
    assert_eq!(caller.slot as usize, 0x1000);
    assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
}

#[test]
fn different_values_build_different_variants() {
    let (ctx, backend) = context_with_backend();
    let (ir, id) = prototype_ir();

    let mut caller_a = Caller::new(1000);
    assert!(!caller_a.dispatch(&ctx, &ir, id));
    ctx.wait_for_builds();
    assert!(caller_a.dispatch(&ctx, &ir, id));

    let mut caller_b = Caller::new(1000);
    caller_b.buf = std::mem::take(&mut caller_a.buf);
    // Same n, same array: same key even from a different caller.
    assert!(caller_b.dispatch(&ctx, &ir, id));
    assert_eq!(backend.builds.load(Ordering::SeqCst), 1);

    // A different bound is a different key and a second variant.
    let mut caller_c = Caller::new(1001);
    caller_c.buf = std::mem::take(&mut caller_b.buf);
    assert!(!caller_c.dispatch(&ctx, &ir, id));
    ctx.wait_for_builds();
    assert_eq!(backend.builds.load(Ordering::SeqCst), 2);
    assert!(caller_c.dispatch(&ctx, &ir, id));
    assert_ne!(caller_c.slot, caller_a.slot);
}

#[test]
fn variant_binds_the_lifted_suffix() {
    let (ctx, backend) = context_with_backend();
    let (ir, id) = prototype_ir();

    let mut caller = Caller::new(1000);
    caller.lb = 7;
    assert!(!caller.dispatch(&ctx, &ir, id));
    ctx.wait_for_builds();

    let variants = backend.variants.lock();
    assert_eq!(variants.len(), 1);
    // The lower bound was bound to its captured value; the original
    // arguments stayed parametric.
    assert!(variants[0].contains("(7.i64, block0)"));
    assert!(variants[0].contains("%n"));
    assert!(variants[0].contains("jit_candidate"));
}

#[test]
fn concurrent_dispatches_build_at_most_once() {
    let (ctx, backend) = context_with_backend();
    let (ir, id) = prototype_ir();
    let ir = Arc::new(ir);

    // Both threads must present identical argument bytes, including the
    // pointer slot.
    let shared: Arc<Vec<i64>> = Arc::new(vec![0; 16]);

    let mut handles = Vec::new();
    for _ in 0..2 {
        let ctx = ctx.clone();
        let ir = ir.clone();
        let shared = shared.clone();
        handles.push(std::thread::spawn(move || {
            let n: i64 = 1000;
            let lb: i64 = 0;
            let mut slot: *const c_void = std::ptr::null();
            let params: [*const u8; 3] = [
                &n as *const i64 as *const u8,
                shared.as_ptr() as *const u8,
                &lb as *const i64 as *const u8,
            ];
            let first = unsafe {
                ctx.dispatch(
                    &ir,
                    Some(CheckpointPtr::new(&mut slot)),
                    id,
                    3,
                    params.as_ptr(),
                )
            };

            // Spin until the build lands; each retry re-registers.
            let mut ready = first;
            while !ready {
                std::thread::yield_now();
                ready = unsafe {
                    ctx.dispatch(
                        &ir,
                        Some(CheckpointPtr::new(&mut slot)),
                        id,
                        3,
                        params.as_ptr(),
                    )
                };
            }
            slot as usize
        }));
    }

    let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ctx.wait_for_builds();

    assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
    assert_eq!(addresses[0], addresses[1]);
    assert_eq!(addresses[0], 0x1000);
}

#[test]
fn cleared_checkpoint_is_never_written() {
    let (ctx, backend) = context_with_backend();
    let (ir, id) = prototype_ir();
    let mut caller = Caller::new(1000);

    assert!(!caller.dispatch(&ctx, &ir, id));
    caller.clear_checkpoint(&ctx, &ir, id);
    ctx.wait_for_builds();

    // The build completed, but the cleared slot stayed untouched.
    assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
    assert!(caller.slot.is_null());

    // The published variant is still served.
    assert!(caller.dispatch(&ctx, &ir, id));
    assert_eq!(caller.slot as usize, 0x1000);
}

#[test]
fn backend_failure_falls_back_and_retries() {
    let (ctx, backend) = context_with_backend();
    let (ir, id) = prototype_ir();
    let mut caller = Caller::new(1000);

    backend.fail.store(true, Ordering::SeqCst);

    // First call: build fails, entry stays pending.
    assert!(!caller.dispatch(&ctx, &ir, id));
    ctx.wait_for_builds();
    assert_eq!(backend.builds.load(Ordering::SeqCst), 0);

    // Second call: still pending, still fallback, retry also fails.
    assert!(!caller.dispatch(&ctx, &ir, id));
    ctx.wait_for_builds();
    assert!(caller.slot.is_null());

    // Backend recovers: the next call's retry succeeds and publishes.
    backend.fail.store(false, Ordering::SeqCst);
    assert!(!caller.dispatch(&ctx, &ir, id));
    ctx.wait_for_builds();
    assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
    assert!(caller.dispatch(&ctx, &ir, id));
}

#[test]
fn ready_entries_are_immutable() {
    let (ctx, _backend) = context_with_backend();
    let (ir, id) = prototype_ir();
    let mut caller = Caller::new(1000);

    assert!(!caller.dispatch(&ctx, &ir, id));
    ctx.wait_for_builds();

    assert!(caller.dispatch(&ctx, &ir, id));
    let first = caller.slot;
    for _ in 0..8 {
        assert!(caller.dispatch(&ctx, &ir, id));
        assert_eq!(caller.slot, first);
    }
}

#[test]
fn prototype_id_collision_is_fatal() {
    let (ctx, _backend) = context_with_backend();
    let (ir, id) = prototype_ir();

    ctx.get_or_install_prototype(id, &ir).unwrap();

    let other_ir = ir.replace("kern_0", "other_0");
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = ctx.get_or_install_prototype(id, &other_ir);
    }));
    assert!(result.is_err());
}

#[test]
fn no_recompile_mode_records_telemetry_only() {
    let (ctx, backend) = context_with_backend();
    let (ir, id) = prototype_ir();

    ctx.dispatch_no_recompile(&ir, id);
    ctx.wait_for_builds();
    assert_eq!(backend.builds.load(Ordering::SeqCst), 0);

    let rows = ctx.telemetry().snapshot();
    let (_, stat) = rows.iter().find(|(rid, _)| *rid == id).unwrap();
    assert_eq!(stat.name, "kern_0.jit.region");
    let (_, codegen) = rows.iter().find(|(rid, _)| *rid == region::CODEGEN).unwrap();
    assert_eq!(codegen.events, 1);
}

#[test]
fn telemetry_balances_across_regions() {
    let (ctx, _backend) = context_with_backend();

    for _ in 0..5 {
        ctx.trace_enter(4);
        ctx.trace_exit(4);
    }
    ctx.trace_enter(5);
    ctx.trace_exit(5);

    let rows = ctx.telemetry().snapshot();
    let (_, four) = rows.iter().find(|(rid, _)| *rid == 4).unwrap();
    let (_, five) = rows.iter().find(|(rid, _)| *rid == 5).unwrap();
    assert_eq!(four.events, 5);
    assert_eq!(five.events, 1);
    // Balanced pairs leave small non-negative net durations.
    assert!(four.duration_us < 1_000_000);
    assert!(five.duration_us < 1_000_000);
}
