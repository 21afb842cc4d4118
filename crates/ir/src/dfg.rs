//! Data flow graph: values, instructions, and blocks of one function.

use cranelift_entity::{entity_impl, packed_option::PackedOption, PrimaryMap, SecondaryMap};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::{GlobalVariable, Immediate, InstData, InstId, Type, Value, ValueId};

/// An opaque reference to a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);
entity_impl!(BlockId);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockData {}

#[derive(Debug, Clone, Default)]
pub struct DataFlowGraph {
    pub blocks: PrimaryMap<BlockId, BlockData>,
    pub values: PrimaryMap<ValueId, Value>,
    insts: PrimaryMap<InstId, InstData>,
    inst_results: SecondaryMap<InstId, PackedOption<ValueId>>,
    immediates: FxHashMap<Immediate, ValueId>,

    /// Source-level value names. Function-local metadata; stripped before
    /// a prototype is serialized.
    value_names: FxHashMap<ValueId, SmolStr>,
}

impl DataFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_block(&mut self) -> BlockId {
        self.blocks.push(BlockData::default())
    }

    pub fn make_value(&mut self, value: Value) -> ValueId {
        self.values.push(value)
    }

    pub fn make_inst(&mut self, data: InstData) -> InstId {
        self.insts.push(data)
    }

    pub fn make_imm_value(&mut self, imm: impl Into<Immediate>) -> ValueId {
        let imm: Immediate = imm.into();
        if let Some(&value) = self.immediates.get(&imm) {
            return value;
        }

        let ty = imm.ty();
        let value = self.make_value(Value::Immediate { imm, ty });
        self.immediates.insert(imm, value);
        value
    }

    pub fn make_global_value(&mut self, gv: GlobalVariable) -> ValueId {
        self.make_value(Value::Global { gv, ty: Type::Ptr })
    }

    pub fn make_const_gep_value(&mut self, gv: GlobalVariable, offset: i64) -> ValueId {
        self.make_value(Value::ConstGep {
            gv,
            offset,
            ty: Type::Ptr,
        })
    }

    pub fn make_result(&mut self, inst: InstId, ty: Type) -> ValueId {
        debug_assert!(self.inst_results[inst].is_none());
        let value = self.make_value(Value::Inst { inst, ty });
        self.inst_results[inst] = value.into();
        value
    }

    pub fn inst(&self, inst: InstId) -> &InstData {
        &self.insts[inst]
    }

    pub fn inst_mut(&mut self, inst: InstId) -> &mut InstData {
        &mut self.insts[inst]
    }

    /// Overwrite `inst` in place, keeping its result value intact.
    pub fn replace_inst(&mut self, inst: InstId, data: InstData) {
        self.insts[inst] = data;
    }

    pub fn inst_result(&self, inst: InstId) -> Option<ValueId> {
        self.inst_results[inst].expand()
    }

    pub fn value(&self, value: ValueId) -> &Value {
        &self.values[value]
    }

    pub fn value_ty(&self, value: ValueId) -> Type {
        self.values[value].ty()
    }

    pub fn value_inst(&self, value: ValueId) -> Option<InstId> {
        match self.values[value] {
            Value::Inst { inst, .. } => Some(inst),
            _ => None,
        }
    }

    pub fn value_imm(&self, value: ValueId) -> Option<Immediate> {
        match self.values[value] {
            Value::Immediate { imm, .. } => Some(imm),
            _ => None,
        }
    }

    pub fn set_value_name(&mut self, value: ValueId, name: impl Into<SmolStr>) {
        self.value_names.insert(value, name.into());
    }

    pub fn value_name(&self, value: ValueId) -> Option<&SmolStr> {
        self.value_names.get(&value)
    }

    pub fn clear_value_names(&mut self) {
        self.value_names.clear();
    }

    pub fn append_phi_arg(&mut self, phi: InstId, value: ValueId, from: BlockId) {
        let InstData::Phi { args, .. } = &mut self.insts[phi] else {
            panic!("appending phi arg to a non-phi instruction");
        };
        args.push((value, from));
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }
}
