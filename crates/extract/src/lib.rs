//! Static preparation: turns qualified regions into runtime-specializable
//! prototypes.
//!
//! For each region the qualifier accepted, the pipeline
//!
//! 1. isolates the region into a standalone function inside the host
//!    module,
//! 2. clones that function into a fresh single-function prototype module,
//!    lifting loop lower bounds and referenced globals into extra
//!    parameters, and serializes it under a content-derived id,
//! 3. installs a trampoline at the original call site and turns the
//!    isolated function into the fallback body with a re-poll preamble.
//!
//! Regions that cannot be extracted are skipped, never fatal; the host
//! module keeps its original semantics for them.

mod isolate;
mod prototype;
mod trampoline;

use ostinato_analysis::QualifiedRegion;
use ostinato_ir::{module::FuncRef, Module};
use thiserror::Error;
use tracing::debug;

pub use isolate::{isolate_region, IsolatedRegion};
pub use prototype::{build_prototype, prototype_id, LowerBound, Prototype, PrototypePlan};
pub use trampoline::{install_trampoline, TrampolineArtifacts};

/// Region ids 0..4 are reserved for the runtime's own bookkeeping.
pub const FIRST_USER_REGION: u64 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("function is already a jit candidate")]
    AlreadyCandidate,

    #[error("region has no loop to specialize")]
    NoLoopHeader,

    #[error("value defined in the region is used outside it")]
    LiveOutValue,

    #[error("region contains a call")]
    CallInRegion,

    #[error("phi has an unsupported incoming-edge shape")]
    MalformedPhi,

    #[error("loop lower bound is not representable at the call site")]
    IneligibleLowerBound,
}

#[derive(Debug)]
pub struct ExtractedRegion {
    pub plan: PrototypePlan,
    pub region_id: u64,
    pub trampoline: FuncRef,
    pub fallback: FuncRef,
}

#[derive(Debug, Default)]
pub struct ExtractOutcome {
    pub extracted: Vec<ExtractedRegion>,
    pub skipped: Vec<ExtractError>,
}

/// Extract every qualified region of `func_ref`. `next_region_id` is the
/// id counter shared across the whole preparation run; user regions start
/// at [`FIRST_USER_REGION`].
pub fn extract_function_regions(
    module: &mut Module,
    func_ref: FuncRef,
    qualified: &[QualifiedRegion],
    next_region_id: &mut u64,
) -> ExtractOutcome {
    let mut outcome = ExtractOutcome::default();

    for (idx, qr) in qualified.iter().enumerate() {
        match extract_one(module, func_ref, qr, idx, *next_region_id) {
            Ok(extracted) => {
                *next_region_id += 1;
                outcome.extracted.push(extracted);
            }
            Err(err) => {
                debug!(error = %err, "skipping region");
                outcome.skipped.push(err);
            }
        }
    }

    outcome
}

fn extract_one(
    module: &mut Module,
    func_ref: FuncRef,
    qualified: &QualifiedRegion,
    region_index: usize,
    region_id: u64,
) -> Result<ExtractedRegion, ExtractError> {
    let isolated = isolate_region(module, func_ref, &qualified.region, region_index)?;
    let plan = build_prototype(module, isolated.func)?;
    let artifacts = install_trampoline(module, func_ref, &isolated, &plan, region_id)?;

    Ok(ExtractedRegion {
        plan,
        region_id,
        trampoline: artifacts.trampoline,
        fallback: artifacts.fallback,
    })
}
