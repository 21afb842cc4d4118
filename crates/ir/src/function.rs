use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::{module::FuncRef, DataFlowGraph, InstId, Layout, Linkage, Type, Value, ValueId};

#[derive(Debug, Clone)]
pub struct Function {
    pub sig: Signature,
    pub arg_values: SmallVec<[ValueId; 8]>,

    pub dfg: DataFlowGraph,
    pub layout: Layout,
    pub flags: FunctionFlags,

    /// Signatures of every function this function calls.
    pub callees: FxHashMap<FuncRef, Signature>,

    /// Source locations. Function-local metadata; stripped before a
    /// prototype is serialized.
    pub srclocs: FxHashMap<InstId, SourceLoc>,
}

impl Function {
    pub fn new(sig: Signature) -> Self {
        let mut dfg = DataFlowGraph::new();
        let arg_values = sig
            .params()
            .iter()
            .enumerate()
            .map(|(idx, param)| dfg.make_value(Value::Arg { idx, ty: param.ty }))
            .collect();

        Self {
            sig,
            arg_values,
            dfg,
            layout: Layout::default(),
            flags: FunctionFlags::default(),
            callees: FxHashMap::default(),
            srclocs: FxHashMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.sig.name()
    }

    /// `true` if this is a declaration without a body.
    pub fn is_declaration(&self) -> bool {
        self.layout.entry_block().is_none()
    }

    /// Append a parameter to the signature and return its argument value.
    pub fn append_param(&mut self, param: Param) -> ValueId {
        let idx = self.sig.append_param(param);
        let ty = self.sig.params()[idx].ty;
        let value = self.dfg.make_value(Value::Arg { idx, ty });
        self.arg_values.push(value);
        value
    }

    /// Replace every use of `old` with `new` across the inserted body.
    pub fn replace_value_uses(&mut self, old: ValueId, new: ValueId) {
        let insts: Vec<InstId> = self
            .layout
            .iter_block()
            .flat_map(|block| self.layout.iter_inst(block))
            .collect();
        for inst in insts {
            self.dfg.inst_mut(inst).visit_values_mut(&mut |value| {
                if *value == old {
                    *value = new;
                }
            });
        }
    }

    /// Drop value names and source locations so the canonical rendering
    /// depends only on structure.
    pub fn strip_local_metadata(&mut self) {
        self.dfg.clear_value_names();
        self.srclocs.clear();
    }

    pub fn record_callee(&mut self, func: FuncRef, sig: Signature) {
        self.callees.insert(func, sig);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionFlags {
    /// Marks an extracted prototype; prevents re-entry by later
    /// preparation passes.
    pub jit_candidate: bool,
    pub no_inline: bool,
    /// Number of trailing parameters that are lifted globals.
    pub global_count: u32,
    /// Number of parameters (before the globals) that are lifted loop
    /// lower bounds.
    pub lower_bound_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLoc {
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub ty: Type,
    pub name: SmolStr,
    pub nonnull: bool,
}

impl Param {
    pub fn new(ty: Type, name: impl Into<SmolStr>) -> Self {
        Self {
            ty,
            name: name.into(),
            nonnull: false,
        }
    }

    pub fn nonnull(ty: Type, name: impl Into<SmolStr>) -> Self {
        Self {
            ty,
            name: name.into(),
            nonnull: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    name: SmolStr,
    linkage: Linkage,
    params: SmallVec<[Param; 8]>,
    ret_ty: Option<Type>,
}

impl Signature {
    pub fn new(
        name: impl Into<SmolStr>,
        linkage: Linkage,
        params: impl IntoIterator<Item = Param>,
        ret_ty: Option<Type>,
    ) -> Self {
        Self {
            name: name.into(),
            linkage,
            params: params.into_iter().collect(),
            ret_ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<SmolStr>) {
        self.name = name.into();
    }

    pub fn linkage(&self) -> Linkage {
        self.linkage
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn ret_ty(&self) -> Option<Type> {
        self.ret_ty
    }

    pub fn append_param(&mut self, param: Param) -> usize {
        self.params.push(param);
        self.params.len() - 1
    }
}
