//! The SCEV classifier.
//!
//! Every scalar-evolution expression attached to a region is sorted into
//! one of four kinds. The ordering matters: merging two verdicts takes
//! the larger kind and unions the parameter witnesses.
//!
//! - `Int`: a compile-time constant.
//! - `Param`: constant while the region executes, but possibly unknown
//!   until run time. These are the expressions specialization lifts to
//!   parameters.
//! - `Iv`: varies with a region induction variable.
//! - `Invalid`: disqualifies the region.

use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use tracing::debug;

use ostinato_ir::{BinaryOp, Function, InstData, InstId, ValueId};

use crate::{Loop, LoopTree, RegionData, ScalarEvolution, ScevExpr, ScevId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScevKind {
    Int,
    Param,
    Iv,
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    kind: ScevKind,
    params: Vec<ScevId>,
}

impl Verdict {
    fn int() -> Self {
        Self {
            kind: ScevKind::Int,
            params: Vec::new(),
        }
    }

    fn param(expr: ScevId) -> Self {
        Self {
            kind: ScevKind::Param,
            params: vec![expr],
        }
    }

    fn iv() -> Self {
        Self {
            kind: ScevKind::Iv,
            params: Vec::new(),
        }
    }

    fn invalid() -> Self {
        Self {
            kind: ScevKind::Invalid,
            params: Vec::new(),
        }
    }

    pub fn kind(&self) -> ScevKind {
        self.kind
    }

    pub fn params(&self) -> &[ScevId] {
        &self.params
    }

    pub fn is_valid(&self) -> bool {
        self.kind != ScevKind::Invalid
    }

    /// Constant during region execution: `Int` or `Param`.
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ScevKind::Int | ScevKind::Param)
    }

    pub fn is_int(&self) -> bool {
        self.kind == ScevKind::Int
    }

    pub fn is_param(&self) -> bool {
        self.kind == ScevKind::Param
    }

    pub fn is_iv(&self) -> bool {
        self.kind == ScevKind::Iv
    }

    fn merge(&mut self, other: &Verdict) {
        self.kind = self.kind.max(other.kind);
        self.add_params_from(other);
    }

    fn add_params_from(&mut self, other: &Verdict) {
        self.params.extend_from_slice(&other.params);
    }
}

/// One classification run over a region.
///
/// Verdicts are memoized per expression handle: SCEV trees share
/// sub-expressions freely, and re-deriving a shared node's verdict on
/// every path would blow up on deep loop nests.
pub struct Classifier<'a> {
    se: &'a mut ScalarEvolution,
    func: &'a Function,
    region: &'a RegionData,
    lpt: &'a LoopTree,
    scope: Option<Loop>,
    base_address: Option<ValueId>,
    collect_loads: bool,
    invariant_loads: IndexSet<InstId>,
    memo: FxHashMap<ScevId, Verdict>,
}

impl<'a> Classifier<'a> {
    pub fn new(
        se: &'a mut ScalarEvolution,
        func: &'a Function,
        region: &'a RegionData,
        lpt: &'a LoopTree,
        scope: Option<Loop>,
        base_address: Option<ValueId>,
        collect_loads: bool,
    ) -> Self {
        Self {
            se,
            func,
            region,
            lpt,
            scope,
            base_address,
            collect_loads,
            invariant_loads: IndexSet::new(),
            memo: FxHashMap::default(),
        }
    }

    /// Region-internal loads recorded as `Param` witnesses so far.
    pub fn invariant_loads(&self) -> &IndexSet<InstId> {
        &self.invariant_loads
    }

    pub fn into_invariant_loads(self) -> IndexSet<InstId> {
        self.invariant_loads
    }

    pub fn classify(&mut self, expr: ScevId) -> Verdict {
        if let Some(hit) = self.memo.get(&expr) {
            return hit.clone();
        }

        let verdict = self.visit(expr);
        self.memo.insert(expr, verdict.clone());
        verdict
    }

    fn visit(&mut self, expr: ScevId) -> Verdict {
        let data = self.se.expr(expr).clone();
        match data {
            ScevExpr::Constant { .. } => Verdict::int(),

            ScevExpr::Truncate { op, .. } | ScevExpr::ZeroExtend { op, .. } => {
                let op_verdict = self.classify(op);
                match op_verdict.kind() {
                    // Not representable as an affine term; constant within
                    // the region, so lift the whole cast.
                    ScevKind::Int | ScevKind::Param => Verdict::param(expr),
                    ScevKind::Iv => {
                        debug!("invalid: width change of an induction variable");
                        Verdict::invalid()
                    }
                    ScevKind::Invalid => op_verdict,
                }
            }

            // Signed values only; a sign extension is a no-op.
            ScevExpr::SignExtend { op, .. } => self.classify(op),

            ScevExpr::Add { ops } => {
                let mut verdict = Verdict::int();
                for op in ops {
                    let op_verdict = self.classify(op);
                    verdict.merge(&op_verdict);
                    if !verdict.is_valid() {
                        break;
                    }
                }
                verdict
            }

            ScevExpr::Mul { ops } => self.visit_mul(expr, &ops),

            ScevExpr::UDiv { lhs, rhs } => {
                let lhs_verdict = self.classify(lhs);
                let rhs_verdict = self.classify(rhs);

                // Not affine either; a division whose operands hold still
                // for the whole region can be computed from the lifted
                // parameters at run time.
                if lhs_verdict.is_constant() && rhs_verdict.is_constant() {
                    Verdict::param(expr)
                } else {
                    debug!("invalid: unsigned division of non-constant expressions");
                    Verdict::invalid()
                }
            }

            ScevExpr::AddRec { start, step, lp } => self.visit_addrec(expr, start, step, lp),

            ScevExpr::SMax { ops } => {
                let mut verdict = Verdict::int();
                for op in ops {
                    let op_verdict = self.classify(op);
                    if !op_verdict.is_valid() {
                        return op_verdict;
                    }
                    verdict.merge(&op_verdict);
                }
                verdict
            }

            ScevExpr::UMax { ops } => {
                for op in ops {
                    if !self.classify(op).is_constant() {
                        debug!("invalid: unsigned max over a non-constant operand");
                        return Verdict::invalid();
                    }
                }
                Verdict::param(expr)
            }

            ScevExpr::Unknown { value, ty } => {
                if ty.is_pointer() {
                    debug!("invalid: unknown of pointer type");
                    return Verdict::invalid();
                }
                if !ty.is_integral() {
                    debug!("invalid: unknown of non-integer type");
                    return Verdict::invalid();
                }
                if self.base_address == Some(value) {
                    debug!("invalid: expression references the region base address");
                    return Verdict::invalid();
                }
                self.visit_unknown_value(expr, value)
            }

            ScevExpr::CouldNotCompute => Verdict::invalid(),
        }
    }

    /// At most one non-`Int` factor is representable. Several `Param`
    /// factors still hold still for the region, so the whole product is
    /// lifted as one parameter; an induction variable multiplied by
    /// anything but constants is out.
    fn visit_mul(&mut self, expr: ScevId, ops: &[ScevId]) -> Verdict {
        let mut verdict = Verdict::int();
        let mut multiple_params = false;

        for &op in ops {
            let op_verdict = self.classify(op);

            if op_verdict.is_int() {
                continue;
            }

            if op_verdict.is_param() && verdict.is_param() {
                multiple_params = true;
                continue;
            }

            if (op_verdict.is_iv() || op_verdict.is_param()) && !verdict.is_int() {
                debug!(
                    expr = %self.se.display(expr),
                    "invalid: more than one non-integer factor in a product"
                );
                return Verdict::invalid();
            }

            verdict.merge(&op_verdict);
        }

        if multiple_params && verdict.is_valid() {
            return Verdict::param(expr);
        }

        verdict
    }

    fn visit_addrec(&mut self, expr: ScevId, start: ScevId, step: ScevId, lp: Loop) -> Verdict {
        if !self.se.is_affine_step(step, lp) {
            debug!("invalid: add-recurrence with a non-affine step");
            return Verdict::invalid();
        }

        let start_verdict = self.classify(start);
        if !start_verdict.is_valid() {
            return start_verdict;
        }
        let step_verdict = self.classify(step);
        if !step_verdict.is_valid() {
            return step_verdict;
        }

        let loop_in_region = self.region.contains_loop(self.lpt, lp);

        // A recurrence of a region loop that does not enclose the
        // classification scope would need its exit value synthesized.
        if loop_in_region
            && !self
                .scope
                .is_some_and(|scope| self.lpt.loop_contains(lp, scope))
        {
            debug!("invalid: add-recurrence of a loop that does not enclose the scope");
            return Verdict::invalid();
        }

        if loop_in_region {
            if step_verdict.is_int() {
                let mut verdict = Verdict::iv();
                verdict.add_params_from(&start_verdict);
                return verdict;
            }

            // A step that is itself a recurrence would make the value
            // polynomial in the induction variables.
            if matches!(self.se.expr(step), ScevExpr::AddRec { .. }) {
                debug!("invalid: polynomial recurrence step");
                return Verdict::invalid();
            }

            if step_verdict.is_param() {
                let mut verdict = Verdict::param(step);
                verdict.add_params_from(&start_verdict);
                return verdict;
            }

            debug!("invalid: add-recurrence with a varying step");
            return Verdict::invalid();
        }

        debug_assert!(
            start_verdict.is_constant() && step_verdict.is_constant(),
            "a recurrence of an outer loop must have region-constant operands"
        );

        if self.se.is_zero(start) {
            return Verdict::param(expr);
        }

        // Rewrite `{start,+,step}` as `start + {0,+,step}` so the lifted
        // parameter is the zero-based recurrence.
        let ty = self.se.ty_of(start);
        let zero = self.se.constant(ty, 0);
        let zero_start = self.se.addrec(zero, step, lp);

        let mut verdict = Verdict::param(zero_start);
        verdict.add_params_from(&start_verdict);
        verdict
    }

    fn visit_unknown_value(&mut self, expr: ScevId, value: ValueId) -> Verdict {
        let Some(inst) = self.func.dfg.value_inst(value) else {
            // Arguments and other out-of-band values hold still for the
            // region.
            return Verdict::param(expr);
        };

        match self.func.dfg.inst(inst) {
            InstData::Load { .. } => {
                if self.region.contains_inst(self.func, inst) && self.collect_loads {
                    self.invariant_loads.insert(inst);
                    return Verdict::param(expr);
                }
                self.visit_generic_inst(expr)
            }

            InstData::Binary {
                code: BinaryOp::Sdiv | BinaryOp::Srem,
                args,
            } => {
                // `x / c` and `x % c` with a constant divisor follow the
                // evolution of the dividend.
                let [dividend, divisor] = *args;
                if self.func.dfg.value_imm(divisor).is_some() {
                    let ty = self.func.dfg.value_ty(dividend);
                    let dividend_scev = self.se.scev_of(dividend, ty);
                    return self.classify(dividend_scev);
                }
                self.visit_generic_inst(expr)
            }

            _ => self.visit_generic_inst(expr),
        }
    }

    fn visit_generic_inst(&mut self, expr: ScevId) -> Verdict {
        Verdict::param(expr)
    }
}
