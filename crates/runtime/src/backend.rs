//! The backend optimizer contract.
//!
//! The runtime treats lowering as opaque: hand over a bound variant
//! module, get back a handle, resolve the emitted symbol to a native
//! address. Real deployments plug in an actual code generator; tests use
//! fakes.

use ostinato_ir::Module;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u64);

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("optimization failed: {0}")]
    Optimize(String),

    #[error("symbol `{0}` could not be resolved")]
    SymbolNotFound(String),
}

pub trait SpecializeBackend: Send + Sync {
    /// Run the optimization pipeline over `module` and emit it.
    /// `pipeline` is the operator-configured pass description, passed
    /// through verbatim.
    fn add_module(&self, module: &Module, pipeline: &str) -> Result<ModuleHandle, BackendError>;

    /// Resolve a symbol emitted by a previously added module.
    fn find_symbol(&self, handle: ModuleHandle, name: &str) -> Result<usize, BackendError>;
}
