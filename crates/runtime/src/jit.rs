//! The process-wide specialization context and dispatcher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use smol_str::SmolStr;
use thiserror::Error;
use tracing::{debug, error, warn};

use ostinato_ir::{module::FuncRef, Function, Module};
use ostinato_parser::{parse_module, ParseError};

use crate::backend::SpecializeBackend;
use crate::cache::{CacheKey, CheckpointPtr, Found, SpecializationCache, WaiterOutcome};
use crate::config::Config;
use crate::dump::IrDumper;
use crate::run_values::{capture_run_values, RunValueList};
use crate::sqlite::SqliteSink;
use crate::tasks::TaskSystem;
use crate::telemetry::{flush_to_sink, region, MicrosClock, MonotonicClock, Telemetry};
use crate::variant::create_variant;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("prototype module contains no jit candidate")]
    NoCandidate,
}

/// A prototype registered with the runtime: the parsed module plus the
/// signature partition recovered from its serialized attributes.
#[derive(Debug)]
pub struct PrototypeEntry {
    pub id: u64,
    pub name: SmolStr,
    pub ir: String,
    pub module: Module,
    pub func: FuncRef,
    pub param_count: u32,
    pub lower_bound_count: u32,
    pub global_count: u32,
}

impl PrototypeEntry {
    pub fn parse(id: u64, ir: &str) -> Result<Self, InstallError> {
        let module = parse_module(ir)?;
        let func = module
            .iter_functions()
            .find(|&f| module.funcs[f].flags.jit_candidate && !module.funcs[f].is_declaration())
            .ok_or(InstallError::NoCandidate)?;

        let candidate = &module.funcs[func];
        let name: SmolStr = candidate.sig.name().into();
        let param_count = candidate.sig.params().len() as u32;
        let lower_bound_count = candidate.flags.lower_bound_count;
        let global_count = candidate.flags.global_count;

        Ok(Self {
            id,
            name,
            ir: ir.to_string(),
            module,
            func,
            param_count,
            lower_bound_count,
            global_count,
        })
    }

    pub fn candidate(&self) -> &Function {
        &self.module.funcs[self.func]
    }
}

/// One specialization job: a prototype and the captured value tuple.
#[derive(Debug)]
pub struct SpecializerRequest {
    pub prototype: Arc<PrototypeEntry>,
    pub values: RunValueList,
}

pub struct JitContext {
    /// Self-handle for handing jobs to the pool.
    me: Weak<JitContext>,
    config: Config,
    prototypes: DashMap<u64, Arc<PrototypeEntry>>,
    cache: SpecializationCache,
    pool: TaskSystem,
    telemetry: Telemetry,
    clock: Box<dyn MicrosClock>,
    backend: RwLock<Option<Arc<dyn SpecializeBackend>>>,
    dumper: IrDumper,
    shut_down: AtomicBool,
}

impl JitContext {
    pub fn new(config: Config) -> Arc<Self> {
        Self::with_clock(config, Box::new(MonotonicClock::new()))
    }

    pub fn with_clock(config: Config, clock: Box<dyn MicrosClock>) -> Arc<Self> {
        let ctx = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            pool: TaskSystem::new(config.worker_threads),
            dumper: IrDumper::new(config.ir_dump),
            config,
            prototypes: DashMap::new(),
            cache: SpecializationCache::new(),
            telemetry: Telemetry::new(),
            clock,
            backend: RwLock::new(None),
            shut_down: AtomicBool::new(false),
        });

        ctx.telemetry.add_region(region::START, "START");
        ctx.telemetry.add_region(region::CODEGEN, "CODEGEN");
        ctx.telemetry.add_region(region::VARIANTS, "VARIANTS");
        ctx.telemetry.add_region(region::CACHE_HIT, "CACHE_HIT");
        ctx.telemetry.enter(region::START, ctx.clock.now_us());
        ctx
    }

    pub fn install_backend(&self, backend: Arc<dyn SpecializeBackend>) {
        *self.backend.write() = Some(backend);
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn cache(&self) -> &SpecializationCache {
        &self.cache
    }

    /// Block until every queued specialization has run. Test and
    /// shutdown aid; callers never need it.
    pub fn wait_for_builds(&self) {
        self.pool.wait();
    }

    /// Look up the prototype, installing it on first sight. The insertion
    /// is visible to every later dispatcher before this returns.
    pub fn get_or_install_prototype(
        &self,
        id: u64,
        ir: &str,
    ) -> Result<(Arc<PrototypeEntry>, bool), InstallError> {
        match self.prototypes.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let entry = occupied.get().clone();
                // The id is a content hash; a mismatch here is a
                // programming bug, not input to recover from.
                assert!(
                    entry.ir == ir,
                    "prototype id collision on {id:#018x}: distinct serialized modules"
                );
                Ok((entry, false))
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let entry = Arc::new(PrototypeEntry::parse(id, ir)?);
                vacant.insert(entry.clone());
                self.dumper.dump("00-prototype", &entry.module);
                debug!(id, name = %entry.name, "installed prototype");
                Ok((entry, true))
            }
        }
    }

    /// The dispatcher behind the trampoline entry point.
    ///
    /// Returns `true` iff a specialized pointer was written to `slot`;
    /// the caller then jumps through it, otherwise it takes the fallback.
    /// A `None` slot clears every checkpoint registration under the key.
    ///
    /// # Safety
    ///
    /// `params` must satisfy the trampoline layout contract (see
    /// [`capture_run_values`]); a non-null slot must stay registered per
    /// the [`CheckpointPtr`] contract.
    pub unsafe fn dispatch(
        &self,
        ir: &str,
        slot: Option<CheckpointPtr>,
        prototype_id: u64,
        argc: u32,
        params: *const *const u8,
    ) -> bool {
        self.telemetry.enter(region::CODEGEN, self.clock.now_us());
        let ready = self.dispatch_inner(ir, slot, prototype_id, argc, params);
        self.telemetry.exit(region::CODEGEN, self.clock.now_us());
        ready
    }

    unsafe fn dispatch_inner(
        &self,
        ir: &str,
        slot: Option<CheckpointPtr>,
        prototype_id: u64,
        argc: u32,
        params: *const *const u8,
    ) -> bool {
        let (proto, first_seen) = match self.get_or_install_prototype(prototype_id, ir) {
            Ok(entry) => entry,
            Err(err) => {
                error!(error = %err, "prototype install failed; falling back");
                return false;
            }
        };
        if first_seen {
            self.telemetry.add_region(prototype_id, &proto.name);
        }
        if argc != proto.param_count {
            error!(
                argc,
                expected = proto.param_count,
                "argument count mismatch; falling back"
            );
            return false;
        }

        let values = capture_run_values(proto.candidate(), argc, params, prototype_id);
        let key = CacheKey {
            prototype: prototype_id,
            values: values.hash(),
        };

        let Some(slot) = slot else {
            // Clear-my-checkpoint call: the caller's frame is about to
            // die.
            self.cache.remove_waiters(key);
            return false;
        };

        if let Found::Ready(address) = self.cache.find(key) {
            slot.write(address);
            self.telemetry.increment(region::CACHE_HIT, 1);
            return true;
        }

        slot.write(0);
        let must_build = if self.cache.insert_if_absent(key, slot) {
            true
        } else {
            match self.cache.add_waiter(key, slot) {
                WaiterOutcome::Ready(address) => {
                    // The build finished between the lookup and the
                    // registration.
                    slot.write(address);
                    self.telemetry.increment(region::CACHE_HIT, 1);
                    return true;
                }
                WaiterOutcome::Added => self.cache.claim_build(key),
            }
        };

        if must_build {
            let request = SpecializerRequest {
                prototype: proto,
                values,
            };
            let ctx = self.me.upgrade().expect("context is alive while dispatching");
            self.pool
                .submit(move || ctx.specialize_and_publish(request, key));
        }

        false
    }

    /// Measurement mode: register the prototype and stamp the codegen
    /// region, but never specialize. The ABI wrapper returns the caller's
    /// fallback pointer untouched.
    pub fn dispatch_no_recompile(&self, ir: &str, prototype_id: u64) {
        self.telemetry.enter(region::CODEGEN, self.clock.now_us());
        match self.get_or_install_prototype(prototype_id, ir) {
            Ok((proto, first_seen)) => {
                if first_seen {
                    self.telemetry.add_region(prototype_id, &proto.name);
                }
            }
            Err(err) => error!(error = %err, "prototype install failed"),
        }
        self.telemetry.exit(region::CODEGEN, self.clock.now_us());
    }

    /// Build one variant and publish its address. Runs on a worker.
    pub fn specialize_and_publish(&self, request: SpecializerRequest, key: CacheKey) {
        if let Found::Ready(_) = self.cache.find(key) {
            self.telemetry.increment(region::CACHE_HIT, 1);
            return;
        }
        self.telemetry.increment(region::VARIANTS, 1);

        let (module, fn_name) = create_variant(&request.prototype, &request.values);
        self.dumper.dump("10-variant", &module);

        let backend = self.backend.read().as_ref().cloned();
        let Some(backend) = backend else {
            error!("no backend installed; entry stays pending");
            self.cache.mark_failed(key);
            return;
        };

        let handle = match backend.add_module(&module, &self.config.pipeline) {
            Ok(handle) => handle,
            Err(err) => {
                // Best effort: the entry stays pending, callers keep
                // taking the fallback, and a later dispatch retries.
                error!(error = %err, variant = %fn_name, "variant optimization failed");
                self.cache.mark_failed(key);
                return;
            }
        };

        let address = match backend.find_symbol(handle, &fn_name) {
            Ok(address) => address,
            Err(err) => {
                error!(error = %err, variant = %fn_name, "symbol resolution failed");
                self.cache.mark_failed(key);
                return;
            }
        };

        debug!(variant = %fn_name, address, "variant published");
        self.cache.complete(key, address);
    }

    pub fn trace_enter(&self, region_id: u64) {
        self.telemetry.enter(region_id, self.clock.now_us());
    }

    pub fn trace_exit(&self, region_id: u64) {
        self.telemetry.exit(region_id, self.clock.now_us());
    }

    /// Drain the worker pool, close the START region and flush telemetry.
    /// After this returns no worker writes to any checkpoint slot.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.pool.wait();
        self.telemetry.exit(region::START, self.clock.now_us());

        if self.config.db.enable {
            match SqliteSink::open(&self.config.db) {
                Ok(sink) => {
                    flush_to_sink(&sink, &self.telemetry.snapshot());
                    let prototypes: Vec<(String, String)> = self
                        .prototypes
                        .iter()
                        .map(|entry| (entry.name.to_string(), entry.ir.clone()))
                        .collect();
                    if let Err(err) = sink.store_prototypes(&prototypes) {
                        warn!(error = %err, "dropping prototype regression records");
                    }
                }
                Err(err) => warn!(error = %err, "telemetry store unreachable; dropping run data"),
            }
        }
    }
}
