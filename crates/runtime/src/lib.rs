//! The specialization runtime.
//!
//! Trampolines emitted at static-preparation time land in
//! [`abi::ostinato_dispatch`]. The dispatcher fingerprints the argument
//! tuple, serves cache hits lock-free, and otherwise reserves a pending
//! cache entry and hands a build task to the worker pool. The builder
//! clones the prototype, binds the lifted parameter suffix to the
//! captured run values, lowers the variant through the pluggable
//! [`backend::SpecializeBackend`], and publishes the resolved address to
//! every registered checkpoint pointer.
//!
//! A program using this runtime always has the fallback path available;
//! specialization is best-effort and never required for correctness.

pub mod abi;
pub mod backend;
pub mod cache;
pub mod config;
pub mod dump;
pub mod jit;
pub mod run_values;
pub mod sqlite;
pub mod tasks;
pub mod telemetry;
pub mod variant;

pub use backend::{BackendError, ModuleHandle, SpecializeBackend};
pub use cache::{CacheKey, CheckpointPtr, SpecializationCache};
pub use config::{Config, DbConfig};
pub use jit::{JitContext, PrototypeEntry, SpecializerRequest};
pub use run_values::{RunValue, RunValueList};
pub use sqlite::SqliteSink;
pub use tasks::TaskSystem;
pub use telemetry::{
    region, MicrosClock, MonotonicClock, NullSink, RegionStat, SinkError, Telemetry, TelemetrySink,
};
pub use variant::create_variant;
