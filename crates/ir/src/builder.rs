//! Programmatic IR construction.

use smallvec::SmallVec;

use crate::{
    dfg::BlockId, global_variable::GlobalVariableData, inst::InstData, module::FuncRef, BinaryOp,
    CastOp, CmpOp, Function, GlobalVariable, Immediate, InstId, Module, Signature, Type, ValueId,
};

#[derive(Debug)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            module: Module::new(name),
        }
    }

    pub fn make_global(&mut self, data: GlobalVariableData) -> GlobalVariable {
        self.module.gv_store.make_gv(data)
    }

    /// Declare a function (external or pending definition) and get its ref.
    pub fn declare_function(&mut self, sig: Signature) -> FuncRef {
        self.module.push_function(Function::new(sig))
    }

    /// Replace a declared function's body with a built one. The signature
    /// name must match the declaration.
    pub fn define_function(&mut self, func_ref: FuncRef, func: Function) {
        debug_assert_eq!(self.module.funcs[func_ref].sig.name(), func.sig.name());
        self.module.funcs[func_ref] = func;
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn build(self) -> Module {
        self.module
    }
}

/// Builds one function body block by block.
///
/// Phis are written explicitly; there is no SSA construction here. Loop
/// back edges are closed with [`FunctionBuilder::append_phi_arg`].
#[derive(Debug)]
pub struct FunctionBuilder {
    func: Function,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(sig: Signature) -> Self {
        Self {
            func: Function::new(sig),
            current: None,
        }
    }

    pub fn from_function(func: Function) -> Self {
        Self {
            func,
            current: None,
        }
    }

    pub fn args(&self) -> &[ValueId] {
        &self.func.arg_values
    }

    pub fn func(&self) -> &Function {
        &self.func
    }

    pub fn func_mut(&mut self) -> &mut Function {
        &mut self.func
    }

    pub fn finish(self) -> Function {
        self.func
    }

    pub fn append_block(&mut self) -> BlockId {
        let block = self.func.dfg.make_block();
        self.func.layout.append_block(block);
        block
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn make_imm_value(&mut self, imm: impl Into<Immediate>) -> ValueId {
        self.func.dfg.make_imm_value(imm)
    }

    pub fn make_global_value(&mut self, gv: GlobalVariable) -> ValueId {
        self.func.dfg.make_global_value(gv)
    }

    pub fn make_const_gep_value(&mut self, gv: GlobalVariable, offset: i64) -> ValueId {
        self.func.dfg.make_const_gep_value(gv, offset)
    }

    fn insert(&mut self, data: InstData) -> InstId {
        let block = self.current.expect("no current block");
        let inst = self.func.dfg.make_inst(data);
        self.func.layout.append_inst(inst, block);
        inst
    }

    fn insert_with_result(&mut self, data: InstData, ty: Type) -> ValueId {
        let inst = self.insert(data);
        self.func.dfg.make_result(inst, ty)
    }

    pub fn binary(&mut self, code: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.func.dfg.value_ty(lhs);
        self.insert_with_result(InstData::Binary { code, args: [lhs, rhs] }, ty)
    }

    pub fn add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn sdiv(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Sdiv, lhs, rhs)
    }

    pub fn udiv(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Udiv, lhs, rhs)
    }

    pub fn srem(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.binary(BinaryOp::Srem, lhs, rhs)
    }

    pub fn cmp(&mut self, code: CmpOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.insert_with_result(InstData::Cmp { code, args: [lhs, rhs] }, Type::I1)
    }

    pub fn eq(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.cmp(CmpOp::Eq, lhs, rhs)
    }

    pub fn slt(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.cmp(CmpOp::Slt, lhs, rhs)
    }

    pub fn cast(&mut self, code: CastOp, arg: ValueId, ty: Type) -> ValueId {
        self.insert_with_result(InstData::Cast { code, arg, ty }, ty)
    }

    pub fn sext(&mut self, arg: ValueId, ty: Type) -> ValueId {
        self.cast(CastOp::Sext, arg, ty)
    }

    pub fn zext(&mut self, arg: ValueId, ty: Type) -> ValueId {
        self.cast(CastOp::Zext, arg, ty)
    }

    pub fn trunc(&mut self, arg: ValueId, ty: Type) -> ValueId {
        self.cast(CastOp::Trunc, arg, ty)
    }

    pub fn load(&mut self, addr: ValueId, ty: Type) -> ValueId {
        self.insert_with_result(InstData::Load { addr, ty }, ty)
    }

    pub fn store(&mut self, addr: ValueId, value: ValueId) {
        self.insert(InstData::Store { addr, value });
    }

    pub fn gep(&mut self, base: ValueId, index: ValueId, elem_ty: Type) -> ValueId {
        self.insert_with_result(InstData::Gep { base, index, elem_ty }, Type::Ptr)
    }

    pub fn alloca(&mut self, ty: Type) -> ValueId {
        self.insert_with_result(InstData::Alloca { ty, count: 1 }, Type::Ptr)
    }

    pub fn array_alloca(&mut self, ty: Type, count: u32) -> ValueId {
        self.insert_with_result(InstData::Alloca { ty, count }, Type::Ptr)
    }

    pub fn phi(&mut self, ty: Type, args: &[(ValueId, BlockId)]) -> ValueId {
        self.insert_with_result(
            InstData::Phi {
                args: args.iter().copied().collect(),
                ty,
            },
            ty,
        )
    }

    pub fn append_phi_arg(&mut self, phi_value: ValueId, value: ValueId, from: BlockId) {
        let inst = self
            .func
            .dfg
            .value_inst(phi_value)
            .expect("phi value is not an instruction result");
        self.func.dfg.append_phi_arg(inst, value, from);
    }

    /// Call `callee`. Its signature is recorded in the callee table so the
    /// function stays printable without the module at hand.
    pub fn call(&mut self, callee: FuncRef, sig: &Signature, args: &[ValueId]) -> Option<ValueId> {
        self.func.record_callee(callee, sig.clone());
        let data = InstData::Call {
            callee,
            args: SmallVec::from_slice(args),
        };
        match sig.ret_ty() {
            Some(ty) => Some(self.insert_with_result(data, ty)),
            None => {
                self.insert(data);
                None
            }
        }
    }

    pub fn call_indirect(
        &mut self,
        callee: ValueId,
        args: &[ValueId],
        ret_ty: Option<Type>,
    ) -> Option<ValueId> {
        let data = InstData::CallIndirect {
            callee,
            args: SmallVec::from_slice(args),
            ret_ty,
        };
        match ret_ty {
            Some(ty) => Some(self.insert_with_result(data, ty)),
            None => {
                self.insert(data);
                None
            }
        }
    }

    pub fn jump(&mut self, dest: BlockId) {
        self.insert(InstData::Jump { dest });
    }

    pub fn br(&mut self, cond: ValueId, then_dest: BlockId, else_dest: BlockId) {
        self.insert(InstData::Branch {
            cond,
            then_dest,
            else_dest,
        });
    }

    pub fn ret(&mut self, arg: Option<ValueId>) {
        self.insert(InstData::Return { arg });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Linkage;
    use crate::Param;

    #[test]
    fn build_counting_loop() {
        let sig = Signature::new(
            "count",
            Linkage::Public,
            [Param::new(Type::I64, "n")],
            Some(Type::I64),
        );
        let mut builder = FunctionBuilder::new(sig);
        let n = builder.args()[0];

        let b0 = builder.append_block();
        let b1 = builder.append_block();
        let b2 = builder.append_block();

        builder.switch_to_block(b0);
        let zero = builder.make_imm_value(0i64);
        builder.jump(b1);

        builder.switch_to_block(b1);
        let iv = builder.phi(Type::I64, &[(zero, b0)]);
        let one = builder.make_imm_value(1i64);
        let next = builder.add(iv, one);
        builder.append_phi_arg(iv, next, b1);
        let done = builder.slt(next, n);
        builder.br(done, b1, b2);

        builder.switch_to_block(b2);
        builder.ret(Some(iv));

        let func = builder.finish();
        assert_eq!(func.layout.iter_block().count(), 3);
        assert_eq!(func.layout.entry_block(), Some(b0));
        assert_eq!(func.dfg.value_ty(iv), Type::I64);
    }
}
