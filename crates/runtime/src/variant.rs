//! Variant materialization: a prototype bound to one run-value tuple.

use smol_str::SmolStr;

use ostinato_ir::{Immediate, Module};

use crate::jit::PrototypeEntry;
use crate::run_values::RunValueList;

/// Clone the prototype module and substitute constants for the lifted
/// parameter suffix: lower bounds become integer constants read from the
/// captured slots, globals become known addresses. Original arguments
/// stay parametric. The variant function is renamed so each (prototype,
/// values) pair resolves to a distinct symbol.
pub fn create_variant(proto: &PrototypeEntry, values: &RunValueList) -> (Module, SmolStr) {
    let mut module = proto.module.clone();
    let func_ref = proto.func;

    let variant_name: SmolStr = format!("{}._{:016x}", proto.name, values.hash()).into();
    module.rename_function(func_ref, variant_name.clone());

    let func = &mut module.funcs[func_ref];
    let argc = proto.param_count as usize;
    let global_start = argc - proto.global_count as usize;
    let bound_start = global_start - proto.lower_bound_count as usize;

    for idx in bound_start..argc {
        let Some(run_value) = values.get(idx as u32) else {
            continue;
        };
        let imm = if idx >= global_start {
            Immediate::Ptr(run_value.bits)
        } else {
            let ty = func.sig.params()[idx].ty;
            match Immediate::from_bits(ty, run_value.bits) {
                Some(imm) => imm,
                None => continue,
            }
        };

        let arg_value = func.arg_values[idx];
        let constant = func.dfg.make_imm_value(imm);
        func.replace_value_uses(arg_value, constant);
    }

    (module, variant_name)
}
