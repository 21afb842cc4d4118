pub mod classifier;
pub mod domtree;
pub mod loop_analysis;
pub mod qualifier;
pub mod region;
pub mod scev;

pub use classifier::{Classifier, ScevKind, Verdict};
pub use domtree::DomTree;
pub use loop_analysis::{Loop, LoopTree};
pub use qualifier::{
    qualify_regions, QualifiedRegion, QualifyOutcome, RegionRejection, RejectReason,
    UnqualifiedRegion,
};
pub use region::RegionData;
pub use scev::{ScalarEvolution, ScevExpr, ScevId};
