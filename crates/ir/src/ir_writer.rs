//! Canonical textual rendering.
//!
//! The writer renumbers values and blocks in layout order, so the output
//! depends only on module structure, never on internal entity ids. A
//! stripped module therefore renders to the same bytes no matter how it
//! was built, which is what makes prototype ids reproducible.
//!
//! Grammar sketch:
//!
//! ```text
//! module %kernels
//!
//! global private const i64 $size = 1024
//!
//! declare func external %ostinato_dispatch(ptr %ir, ptr %slot, i64 %id, i32 %argc, ptr %params) -> i1
//!
//! func public %saxpy(i64 %n, ptr %a) -> i64 jit_candidate bounds(1) globals(2) {
//!     block0:
//!         v0.i64 = phi (0.i64, block0) (v1, block1)
//!         ...
//! }
//! ```
//!
//! Source locations and value names render as trailing `@loc(l,c)` /
//! `@name(x)` annotations; [`crate::Function::strip_local_metadata`]
//! removes them.

use std::fmt::Write;

use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashMap;

use crate::{
    dfg::BlockId, Function, FunctionFlags, InstData, InstId, Module, Signature, Value, ValueId,
};

pub struct ModuleWriter<'a> {
    module: &'a Module,
}

impl<'a> ModuleWriter<'a> {
    pub fn new(module: &'a Module) -> Self {
        Self { module }
    }

    pub fn write(&self) -> String {
        let mut out = String::new();
        writeln!(out, "module %{}", self.module.name).unwrap();

        for (_, data) in self.module.gv_store.iter() {
            write!(out, "\nglobal {} ", data.linkage).unwrap();
            if data.is_const {
                out.push_str("const ");
            }
            write!(out, "{} ${}", data.ty, data.symbol).unwrap();
            if let Some(init) = &data.init {
                write!(out, " = {init}").unwrap();
            }
            out.push('\n');
        }

        for func_ref in self.module.iter_functions() {
            let func = &self.module.funcs[func_ref];
            out.push('\n');
            if func.is_declaration() {
                out.push_str("declare ");
                write_signature(&mut out, &func.sig, &func.flags);
                out.push('\n');
            } else {
                write_function(&mut out, func, self.module);
            }
        }

        out
    }
}

fn write_signature(out: &mut String, sig: &Signature, flags: &FunctionFlags) {
    write!(out, "func {} %{}(", sig.linkage(), sig.name()).unwrap();
    for (i, param) in sig.params().iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "{}", param.ty).unwrap();
        if param.nonnull {
            out.push_str(" nonnull");
        }
        write!(out, " %{}", param.name).unwrap();
    }
    out.push(')');
    if let Some(ret_ty) = sig.ret_ty() {
        write!(out, " -> {ret_ty}").unwrap();
    }
    if flags.jit_candidate {
        out.push_str(" jit_candidate");
    }
    if flags.no_inline {
        out.push_str(" no_inline");
    }
    if flags.lower_bound_count > 0 {
        write!(out, " bounds({})", flags.lower_bound_count).unwrap();
    }
    if flags.global_count > 0 {
        write!(out, " globals({})", flags.global_count).unwrap();
    }
}

pub fn write_function(out: &mut String, func: &Function, module: &Module) {
    write_signature(out, &func.sig, &func.flags);
    out.push_str(" {\n");

    let mut w = FuncWriter::new(func, module);
    w.number_entities();
    for block in func.layout.iter_block() {
        writeln!(out, "    block{}:", w.block_num(block)).unwrap();
        for inst in func.layout.iter_inst(block) {
            out.push_str("        ");
            w.write_inst(out, inst);
            out.push('\n');
        }
    }
    out.push_str("}\n");
}

/// Render one function to a standalone string. Debug helper.
pub fn dump_function(func: &Function, module: &Module) -> String {
    let mut out = String::new();
    write_function(&mut out, func, module);
    out
}

struct FuncWriter<'a> {
    func: &'a Function,
    module: &'a Module,
    value_nums: FxHashMap<ValueId, u32>,
    block_nums: SecondaryMap<BlockId, u32>,
}

impl<'a> FuncWriter<'a> {
    fn new(func: &'a Function, module: &'a Module) -> Self {
        Self {
            func,
            module,
            value_nums: FxHashMap::default(),
            block_nums: SecondaryMap::default(),
        }
    }

    fn number_entities(&mut self) {
        let mut next_block = 0u32;
        let mut next_value = 0u32;
        for block in self.func.layout.iter_block() {
            self.block_nums[block] = next_block;
            next_block += 1;
            for inst in self.func.layout.iter_inst(block) {
                if let Some(result) = self.func.dfg.inst_result(inst) {
                    self.value_nums.insert(result, next_value);
                    next_value += 1;
                }
            }
        }
    }

    fn block_num(&self, block: BlockId) -> u32 {
        self.block_nums[block]
    }

    fn value_str(&self, value: ValueId) -> String {
        match self.func.dfg.value(value) {
            Value::Inst { .. } => {
                let num = self
                    .value_nums
                    .get(&value)
                    .expect("use of a result whose instruction is not inserted");
                format!("v{num}")
            }
            Value::Arg { idx, .. } => format!("%{}", self.func.sig.params()[*idx].name),
            Value::Immediate { imm, ty } => format!("{imm}.{ty}"),
            Value::Global { gv, .. } => format!("${}", self.module.gv_store.symbol(*gv)),
            Value::ConstGep { gv, offset, .. } => {
                format!("${}+{}", self.module.gv_store.symbol(*gv), offset)
            }
        }
    }

    fn write_inst(&self, out: &mut String, inst: InstId) {
        if let Some(result) = self.func.dfg.inst_result(inst) {
            let num = self.value_nums[&result];
            let ty = self.func.dfg.value_ty(result);
            write!(out, "v{num}.{ty} = ").unwrap();
        }

        match self.func.dfg.inst(inst) {
            InstData::Binary { code, args } => {
                write!(out, "{code} {}, {}", self.value_str(args[0]), self.value_str(args[1]))
                    .unwrap();
            }
            InstData::Cmp { code, args } => {
                write!(out, "{code} {}, {}", self.value_str(args[0]), self.value_str(args[1]))
                    .unwrap();
            }
            InstData::Cast { code, arg, .. } => {
                write!(out, "{code} {}", self.value_str(*arg)).unwrap();
            }
            InstData::Load { addr, .. } => {
                write!(out, "load {}", self.value_str(*addr)).unwrap();
            }
            InstData::Store { addr, value } => {
                write!(out, "store {}, {}", self.value_str(*addr), self.value_str(*value))
                    .unwrap();
            }
            InstData::Gep { base, index, elem_ty } => {
                write!(
                    out,
                    "gep.{elem_ty} {}, {}",
                    self.value_str(*base),
                    self.value_str(*index)
                )
                .unwrap();
            }
            InstData::Alloca { ty, count } => {
                write!(out, "alloca.{ty}").unwrap();
                if *count != 1 {
                    write!(out, " {count}").unwrap();
                }
            }
            InstData::Phi { args, .. } => {
                out.push_str("phi");
                for (value, block) in args {
                    write!(out, " ({}, block{})", self.value_str(*value), self.block_num(*block))
                        .unwrap();
                }
            }
            InstData::Call { callee, args } => {
                let name = self.callee_name(*callee);
                write!(out, "call %{name}(").unwrap();
                self.write_args(out, args);
                out.push(')');
            }
            InstData::CallIndirect { callee, args, .. } => {
                write!(out, "call_indirect {}(", self.value_str(*callee)).unwrap();
                self.write_args(out, args);
                out.push(')');
            }
            InstData::Jump { dest } => {
                write!(out, "jump block{}", self.block_num(*dest)).unwrap();
            }
            InstData::Branch {
                cond,
                then_dest,
                else_dest,
            } => {
                write!(
                    out,
                    "br {}, block{}, block{}",
                    self.value_str(*cond),
                    self.block_num(*then_dest),
                    self.block_num(*else_dest)
                )
                .unwrap();
            }
            InstData::Return { arg } => match arg {
                Some(arg) => write!(out, "return {}", self.value_str(*arg)).unwrap(),
                None => out.push_str("return"),
            },
        }

        if let Some(result) = self.func.dfg.inst_result(inst) {
            if let Some(name) = self.func.dfg.value_name(result) {
                write!(out, " @name({name})").unwrap();
            }
        }
        if let Some(loc) = self.func.srclocs.get(&inst) {
            write!(out, " @loc({},{})", loc.line, loc.col).unwrap();
        }
    }

    fn write_args(&self, out: &mut String, args: &[ValueId]) {
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&self.value_str(*arg));
        }
    }

    fn callee_name(&self, callee: crate::module::FuncRef) -> String {
        if let Some(sig) = self.func.callees.get(&callee) {
            return sig.name().to_string();
        }
        self.module.funcs[callee].sig.name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        FunctionBuilder, GlobalVariableData, GvInitializer, Linkage, ModuleBuilder, Param, Type,
    };

    #[test]
    fn render_module() {
        let mut mb = ModuleBuilder::new("m");
        mb.make_global(GlobalVariableData::constant(
            "size",
            Type::I64,
            GvInitializer::make_imm(1024i64),
        ));

        let sig = Signature::new(
            "addc",
            Linkage::Public,
            [Param::new(Type::I64, "x")],
            Some(Type::I64),
        );
        let func_ref = mb.declare_function(sig.clone());

        let mut fb = FunctionBuilder::new(sig);
        let x = fb.args()[0];
        let b0 = fb.append_block();
        fb.switch_to_block(b0);
        let one = fb.make_imm_value(1i64);
        let sum = fb.add(x, one);
        fb.ret(Some(sum));
        mb.define_function(func_ref, fb.finish());

        let module = mb.build();
        let text = ModuleWriter::new(&module).write();

        assert_eq!(
            text,
            "module %m\n\
             \n\
             global private const i64 $size = 1024\n\
             \n\
             func public %addc(i64 %x) -> i64 {\n\
             \x20   block0:\n\
             \x20       v0.i64 = add %x, 1.i64\n\
             \x20       return v0\n\
             }\n"
        );
    }

    #[test]
    fn stripped_render_is_structural() {
        let sig = Signature::new("f", Linkage::Public, [Param::new(Type::I64, "x")], None);

        let build = |name_result: bool| {
            let mut fb = FunctionBuilder::new(sig.clone());
            let x = fb.args()[0];
            let b0 = fb.append_block();
            fb.switch_to_block(b0);
            let one = fb.make_imm_value(1i64);
            let sum = fb.add(x, one);
            if name_result {
                fb.func_mut().dfg.set_value_name(sum, "sum");
            }
            fb.ret(None);
            fb.finish()
        };

        let module = Module::new("m");
        let plain = dump_function(&build(false), &module);
        let mut named = build(true);
        assert_ne!(dump_function(&named, &module), plain);

        named.strip_local_metadata();
        assert_eq!(dump_function(&named, &module), plain);
    }
}
