//! Scalar-evolution expressions.
//!
//! Expressions are interned in an arena: structurally identical trees
//! share one [`ScevId`], so identity comparison doubles as structural
//! comparison and classifier verdicts can be memoized per handle.

use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use ostinato_ir::{Type, ValueId};

use crate::Loop;

/// An opaque reference to an interned [`ScevExpr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScevId(pub u32);
entity_impl!(ScevId);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScevExpr {
    Constant {
        value: i64,
        ty: Type,
    },

    /// A value the analysis cannot see through: an argument, a load, an
    /// arbitrary instruction.
    Unknown {
        value: ValueId,
        ty: Type,
    },

    Truncate {
        op: ScevId,
        ty: Type,
    },
    ZeroExtend {
        op: ScevId,
        ty: Type,
    },
    SignExtend {
        op: ScevId,
        ty: Type,
    },

    Add {
        ops: SmallVec<[ScevId; 4]>,
    },
    Mul {
        ops: SmallVec<[ScevId; 4]>,
    },
    UDiv {
        lhs: ScevId,
        rhs: ScevId,
    },

    /// `{start, +, step}_lp`.
    AddRec {
        start: ScevId,
        step: ScevId,
        lp: Loop,
    },

    SMax {
        ops: SmallVec<[ScevId; 4]>,
    },
    UMax {
        ops: SmallVec<[ScevId; 4]>,
    },

    CouldNotCompute,
}

#[derive(Debug, Default)]
pub struct ScalarEvolution {
    exprs: PrimaryMap<ScevId, ScevExpr>,
    interned: FxHashMap<ScevExpr, ScevId>,
    value_exprs: FxHashMap<ValueId, ScevId>,
}

impl ScalarEvolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, expr: ScevExpr) -> ScevId {
        if let Some(&id) = self.interned.get(&expr) {
            return id;
        }
        let id = self.exprs.push(expr.clone());
        self.interned.insert(expr, id);
        id
    }

    pub fn expr(&self, id: ScevId) -> &ScevExpr {
        &self.exprs[id]
    }

    pub fn constant(&mut self, ty: Type, value: i64) -> ScevId {
        self.intern(ScevExpr::Constant { value, ty })
    }

    pub fn unknown(&mut self, value: ValueId, ty: Type) -> ScevId {
        self.intern(ScevExpr::Unknown { value, ty })
    }

    pub fn trunc(&mut self, op: ScevId, ty: Type) -> ScevId {
        self.intern(ScevExpr::Truncate { op, ty })
    }

    pub fn zext(&mut self, op: ScevId, ty: Type) -> ScevId {
        self.intern(ScevExpr::ZeroExtend { op, ty })
    }

    pub fn sext(&mut self, op: ScevId, ty: Type) -> ScevId {
        self.intern(ScevExpr::SignExtend { op, ty })
    }

    pub fn add(&mut self, ops: impl IntoIterator<Item = ScevId>) -> ScevId {
        self.intern(ScevExpr::Add {
            ops: ops.into_iter().collect(),
        })
    }

    pub fn mul(&mut self, ops: impl IntoIterator<Item = ScevId>) -> ScevId {
        self.intern(ScevExpr::Mul {
            ops: ops.into_iter().collect(),
        })
    }

    pub fn udiv(&mut self, lhs: ScevId, rhs: ScevId) -> ScevId {
        self.intern(ScevExpr::UDiv { lhs, rhs })
    }

    pub fn addrec(&mut self, start: ScevId, step: ScevId, lp: Loop) -> ScevId {
        self.intern(ScevExpr::AddRec { start, step, lp })
    }

    pub fn smax(&mut self, ops: impl IntoIterator<Item = ScevId>) -> ScevId {
        self.intern(ScevExpr::SMax {
            ops: ops.into_iter().collect(),
        })
    }

    pub fn umax(&mut self, ops: impl IntoIterator<Item = ScevId>) -> ScevId {
        self.intern(ScevExpr::UMax {
            ops: ops.into_iter().collect(),
        })
    }

    pub fn could_not_compute(&mut self) -> ScevId {
        self.intern(ScevExpr::CouldNotCompute)
    }

    /// Record the host's `value → SCEV` binding.
    pub fn bind_value(&mut self, value: ValueId, expr: ScevId) {
        self.value_exprs.insert(value, expr);
    }

    /// The SCEV of `value`: the bound expression if the host registered
    /// one, a fresh `Unknown` otherwise.
    pub fn scev_of(&mut self, value: ValueId, ty: Type) -> ScevId {
        if let Some(&id) = self.value_exprs.get(&value) {
            return id;
        }
        self.unknown(value, ty)
    }

    pub fn is_zero(&self, id: ScevId) -> bool {
        matches!(self.exprs[id], ScevExpr::Constant { value: 0, .. })
    }

    pub fn ty_of(&self, id: ScevId) -> Type {
        match &self.exprs[id] {
            ScevExpr::Constant { ty, .. }
            | ScevExpr::Unknown { ty, .. }
            | ScevExpr::Truncate { ty, .. }
            | ScevExpr::ZeroExtend { ty, .. }
            | ScevExpr::SignExtend { ty, .. } => *ty,
            ScevExpr::Add { ops } | ScevExpr::Mul { ops } | ScevExpr::SMax { ops }
            | ScevExpr::UMax { ops } => ops.first().map(|&op| self.ty_of(op)).unwrap_or(Type::I64),
            ScevExpr::UDiv { lhs, .. } => self.ty_of(*lhs),
            ScevExpr::AddRec { start, .. } => self.ty_of(*start),
            ScevExpr::CouldNotCompute => Type::I64,
        }
    }

    /// `true` if `id` contains an add-recurrence bound to `lp` anywhere
    /// in its tree.
    pub fn references_loop(&self, id: ScevId, lp: Loop) -> bool {
        match &self.exprs[id] {
            ScevExpr::Constant { .. } | ScevExpr::Unknown { .. } | ScevExpr::CouldNotCompute => {
                false
            }
            ScevExpr::Truncate { op, .. }
            | ScevExpr::ZeroExtend { op, .. }
            | ScevExpr::SignExtend { op, .. } => self.references_loop(*op, lp),
            ScevExpr::Add { ops } | ScevExpr::Mul { ops } | ScevExpr::SMax { ops }
            | ScevExpr::UMax { ops } => ops.iter().any(|&op| self.references_loop(op, lp)),
            ScevExpr::UDiv { lhs, rhs } => {
                self.references_loop(*lhs, lp) || self.references_loop(*rhs, lp)
            }
            ScevExpr::AddRec { start, step, lp: rec_lp } => {
                *rec_lp == lp || self.references_loop(*start, lp) || self.references_loop(*step, lp)
            }
        }
    }

    /// An add-recurrence is affine when its step is invariant in its own
    /// loop.
    pub fn is_affine_step(&self, step: ScevId, lp: Loop) -> bool {
        !self.references_loop(step, lp)
    }

    /// Human-readable rendering for diagnostics.
    pub fn display(&self, id: ScevId) -> String {
        match &self.exprs[id] {
            ScevExpr::Constant { value, .. } => format!("{value}"),
            ScevExpr::Unknown { value, .. } => format!("%{}", value.0),
            ScevExpr::Truncate { op, ty } => format!("trunc.{ty}({})", self.display(*op)),
            ScevExpr::ZeroExtend { op, ty } => format!("zext.{ty}({})", self.display(*op)),
            ScevExpr::SignExtend { op, ty } => format!("sext.{ty}({})", self.display(*op)),
            ScevExpr::Add { ops } => self.display_nary("+", ops),
            ScevExpr::Mul { ops } => self.display_nary("*", ops),
            ScevExpr::UDiv { lhs, rhs } => {
                format!("({} /u {})", self.display(*lhs), self.display(*rhs))
            }
            ScevExpr::AddRec { start, step, lp } => format!(
                "{{{},+,{}}}_L{}",
                self.display(*start),
                self.display(*step),
                lp.0
            ),
            ScevExpr::SMax { ops } => self.display_nary("smax", ops),
            ScevExpr::UMax { ops } => self.display_nary("umax", ops),
            ScevExpr::CouldNotCompute => "<could-not-compute>".to_string(),
        }
    }

    fn display_nary(&self, op: &str, ops: &[ScevId]) -> String {
        let parts: Vec<String> = ops.iter().map(|&o| self.display(o)).collect();
        format!("({})", parts.join(&format!(" {op} ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups_structurally() {
        let mut se = ScalarEvolution::new();
        let a = se.constant(Type::I64, 4);
        let b = se.constant(Type::I64, 4);
        assert_eq!(a, b);

        let v = ValueId(0);
        let u1 = se.unknown(v, Type::I64);
        let u2 = se.unknown(v, Type::I64);
        assert_eq!(u1, u2);

        let sum1 = se.add([a, u1]);
        let sum2 = se.add([b, u2]);
        assert_eq!(sum1, sum2);

        let diff = se.add([u1, a]);
        assert_ne!(sum1, diff);
    }

    #[test]
    fn loop_references() {
        let mut se = ScalarEvolution::new();
        let lp = Loop(0);
        let other = Loop(1);
        let zero = se.constant(Type::I64, 0);
        let one = se.constant(Type::I64, 1);
        let rec = se.addrec(zero, one, lp);

        assert!(se.references_loop(rec, lp));
        assert!(!se.references_loop(rec, other));

        let sum = se.add([rec, one]);
        assert!(se.references_loop(sum, lp));
        assert!(se.is_affine_step(one, lp));
        assert!(!se.is_affine_step(rec, lp));
    }
}
