//! Region qualification.
//!
//! The host's region analysis refuses a region with a log of rejection
//! reasons. Each reason carries the offending scalar-evolution
//! expressions; a region qualifies for specialization iff every reason's
//! expressions classify as liftable. The parameters a region needs are
//! the `Param` witnesses of all its reasons, in traversal order,
//! deduplicated by expression identity.

use indexmap::IndexSet;
use smallvec::SmallVec;
use tracing::debug;

use ostinato_ir::{Function, InstId, ValueId};

use crate::{Classifier, Loop, LoopTree, RegionData, ScalarEvolution, ScevId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// A memory access whose subscript is not affine.
    NonAffineAccess { access: ScevId, scope: Option<Loop> },

    /// A branch condition comparing two non-affine expressions.
    NonAffineBranch {
        lhs: ScevId,
        rhs: ScevId,
        scope: Option<Loop>,
    },

    /// A loop trip count that is not affine.
    LoopBound { bound: ScevId, scope: Option<Loop> },
}

impl RejectReason {
    pub fn exprs(&self) -> SmallVec<[ScevId; 2]> {
        match self {
            Self::NonAffineAccess { access, .. } => [*access].into_iter().collect(),
            Self::NonAffineBranch { lhs, rhs, .. } => [*lhs, *rhs].into_iter().collect(),
            Self::LoopBound { bound, .. } => [*bound].into_iter().collect(),
        }
    }

    pub fn scope(&self) -> Option<Loop> {
        match self {
            Self::NonAffineAccess { scope, .. }
            | Self::NonAffineBranch { scope, .. }
            | Self::LoopBound { scope, .. } => *scope,
        }
    }

    pub fn describe(&self, se: &ScalarEvolution) -> String {
        match self {
            Self::NonAffineAccess { access, .. } => {
                format!("non-affine access {}", se.display(*access))
            }
            Self::NonAffineBranch { lhs, rhs, .. } => format!(
                "non-affine branch {} ~ {}",
                se.display(*lhs),
                se.display(*rhs)
            ),
            Self::LoopBound { bound, .. } => format!("non-affine loop bound {}", se.display(*bound)),
        }
    }
}

/// One region's rejection log, as handed over by the host.
#[derive(Debug, Clone)]
pub struct RegionRejection {
    pub region: RegionData,
    pub reasons: Vec<RejectReason>,
    /// The array base address of the region, if the host identified one.
    /// Expressions leaking it disqualify the region.
    pub base_address: Option<ValueId>,
}

#[derive(Debug)]
pub struct QualifiedRegion {
    pub region: RegionData,
    /// Lifted parameters, stable traversal order.
    pub required_params: Vec<ScevId>,
    /// Region-internal loads the parameters depend on.
    pub invariant_loads: IndexSet<InstId>,
}

#[derive(Debug)]
pub struct UnqualifiedRegion {
    pub region: RegionData,
    /// The first reason that blocked qualification.
    pub blocking: Option<RejectReason>,
}

#[derive(Debug, Default)]
pub struct QualifyOutcome {
    pub qualified: Vec<QualifiedRegion>,
    pub unqualified: Vec<UnqualifiedRegion>,
}

/// Qualify every rejected region of one function.
///
/// Failure is not an error; an unqualified region simply stays on the
/// host's unoptimized path.
pub fn qualify_regions(
    func: &Function,
    se: &mut ScalarEvolution,
    lpt: &LoopTree,
    rejections: &[RegionRejection],
) -> QualifyOutcome {
    let mut outcome = QualifyOutcome::default();

    for rejection in rejections {
        match qualify_one(func, se, lpt, rejection) {
            Ok(qualified) => {
                // A qualifying parent subsumes previously qualified
                // children.
                outcome.qualified.retain(|prior| {
                    let keep = !qualified.region.strictly_contains(&prior.region);
                    if !keep {
                        debug!("dropping nested qualified region in favor of its parent");
                    }
                    keep
                });
                let subsumed = outcome
                    .qualified
                    .iter()
                    .any(|prior| prior.region.strictly_contains(&qualified.region));
                if subsumed {
                    debug!("dropping qualified region nested in an earlier parent");
                } else {
                    outcome.qualified.push(qualified);
                }
            }
            Err(blocking) => {
                if let Some(reason) = &blocking {
                    debug!(reason = %reason.describe(se), "region does not qualify");
                }
                outcome.unqualified.push(UnqualifiedRegion {
                    region: rejection.region.clone(),
                    blocking,
                });
            }
        }
    }

    outcome
}

fn qualify_one(
    func: &Function,
    se: &mut ScalarEvolution,
    lpt: &LoopTree,
    rejection: &RegionRejection,
) -> Result<QualifiedRegion, Option<RejectReason>> {
    if rejection.reasons.is_empty() {
        // Nothing to fix; the host would have taken the region as-is.
        return Err(None);
    }

    let mut required_params: IndexSet<ScevId> = IndexSet::new();
    let mut invariant_loads: IndexSet<InstId> = IndexSet::new();

    for reason in &rejection.reasons {
        let mut classifier = Classifier::new(
            se,
            func,
            &rejection.region,
            lpt,
            reason.scope(),
            rejection.base_address,
            true,
        );

        for expr in reason.exprs() {
            let verdict = classifier.classify(expr);
            if !verdict.is_valid() {
                return Err(Some(reason.clone()));
            }
            required_params.extend(verdict.params().iter().copied());
        }

        invariant_loads.extend(classifier.into_invariant_loads());
    }

    Ok(QualifiedRegion {
        region: rejection.region.clone(),
        required_params: required_params.into_iter().collect(),
        invariant_loads,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DomTree;
    use ostinato_ir::{ControlFlowGraph, FunctionBuilder, Linkage, Param, Signature, Type};

    struct Fixture {
        func: Function,
        lpt: LoopTree,
        lp: Loop,
        region: RegionData,
        n: ValueId,
        a: ValueId,
    }

    /// `for i in 0..n { a[i] += 1 }` with the loop body as the region.
    fn fixture() -> Fixture {
        let sig = Signature::new(
            "kern",
            Linkage::Public,
            [Param::new(Type::I64, "n"), Param::new(Type::Ptr, "a")],
            None,
        );
        let mut fb = FunctionBuilder::new(sig);
        let n = fb.args()[0];
        let a = fb.args()[1];

        let b0 = fb.append_block();
        let b1 = fb.append_block();
        let b2 = fb.append_block();

        fb.switch_to_block(b0);
        let zero = fb.make_imm_value(0i64);
        fb.jump(b1);

        fb.switch_to_block(b1);
        let iv = fb.phi(Type::I64, &[(zero, b0)]);
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

        let func = fb.finish();
        let mut cfg = ControlFlowGraph::new();
        cfg.compute(&func);
        let mut domtree = DomTree::new();
        domtree.compute(&cfg);
        let mut lpt = LoopTree::new();
        lpt.compute(&cfg, &domtree);
        let lp = lpt.loop_of_block(b1).unwrap();
        let region = RegionData::new(b1, b2, [b1]);

        Fixture {
            func,
            lpt,
            lp,
            region,
            n,
            a,
        }
    }

    #[test]
    fn affine_loop_with_unknown_bound_qualifies() {
        let fx = fixture();
        let mut se = ScalarEvolution::new();
        let n = se.unknown(fx.n, Type::I64);

        let rejections = [RegionRejection {
            region: fx.region.clone(),
            reasons: vec![RejectReason::LoopBound {
                bound: n,
                scope: Some(fx.lp),
            }],
            base_address: None,
        }];

        let outcome = qualify_regions(&fx.func, &mut se, &fx.lpt, &rejections);
        assert_eq!(outcome.qualified.len(), 1);
        assert!(outcome.unqualified.is_empty());
        assert_eq!(outcome.qualified[0].required_params, vec![n]);
    }

    #[test]
    fn params_concatenate_in_order_and_dedup() {
        let fx = fixture();
        let mut se = ScalarEvolution::new();
        let n = se.unknown(fx.n, Type::I64);
        let m = se.unknown(fx.a, Type::I64);
        let product = se.mul([n, m]);

        let rejections = [RegionRejection {
            region: fx.region.clone(),
            reasons: vec![
                RejectReason::LoopBound {
                    bound: product,
                    scope: Some(fx.lp),
                },
                RejectReason::NonAffineBranch {
                    lhs: n,
                    rhs: product,
                    scope: Some(fx.lp),
                },
            ],
            base_address: None,
        }];

        let outcome = qualify_regions(&fx.func, &mut se, &fx.lpt, &rejections);
        assert_eq!(outcome.qualified.len(), 1);
        // `product` from the first reason, `n` from the second; the
        // duplicate `product` witness collapses.
        assert_eq!(outcome.qualified[0].required_params, vec![product, n]);
    }

    #[test]
    fn one_blocking_reason_unqualifies_the_region() {
        let fx = fixture();
        let mut se = ScalarEvolution::new();
        let n = se.unknown(fx.n, Type::I64);
        let base = se.unknown(fx.a, Type::I64);

        let rejections = [RegionRejection {
            region: fx.region.clone(),
            reasons: vec![
                RejectReason::LoopBound {
                    bound: n,
                    scope: Some(fx.lp),
                },
                // Leaks the region base address.
                RejectReason::NonAffineAccess {
                    access: base,
                    scope: Some(fx.lp),
                },
            ],
            base_address: Some(fx.a),
        }];

        let outcome = qualify_regions(&fx.func, &mut se, &fx.lpt, &rejections);
        assert!(outcome.qualified.is_empty());
        assert_eq!(outcome.unqualified.len(), 1);
        assert!(matches!(
            outcome.unqualified[0].blocking,
            Some(RejectReason::NonAffineAccess { .. })
        ));
    }

    #[test]
    fn empty_rejection_log_does_not_qualify() {
        let fx = fixture();
        let mut se = ScalarEvolution::new();

        let rejections = [RegionRejection {
            region: fx.region.clone(),
            reasons: vec![],
            base_address: None,
        }];

        let outcome = qualify_regions(&fx.func, &mut se, &fx.lpt, &rejections);
        assert!(outcome.qualified.is_empty());
        assert_eq!(outcome.unqualified.len(), 1);
        assert!(outcome.unqualified[0].blocking.is_none());
    }

    #[test]
    fn nested_qualified_region_is_pruned() {
        let fx = fixture();
        let mut se = ScalarEvolution::new();
        let n = se.unknown(fx.n, Type::I64);

        // The inner region is the loop header alone; the outer one also
        // spans the preheader.
        let inner = fx.region.clone();
        let outer = RegionData::new(
            fx.func.layout.entry_block().unwrap(),
            inner.exit,
            [fx.func.layout.entry_block().unwrap(), inner.entry],
        );

        let reason = RejectReason::LoopBound {
            bound: n,
            scope: Some(fx.lp),
        };
        let rejections = [
            RegionRejection {
                region: inner,
                reasons: vec![reason.clone()],
                base_address: None,
            },
            RegionRejection {
                region: outer.clone(),
                reasons: vec![reason],
                base_address: None,
            },
        ];

        let outcome = qualify_regions(&fx.func, &mut se, &fx.lpt, &rejections);
        assert_eq!(outcome.qualified.len(), 1);
        assert_eq!(outcome.qualified[0].region, outer);
    }
}
