//! Prototype building: the serialized, deterministically-keyable form of
//! an isolated region.

use indexmap::IndexSet;
use smol_str::SmolStr;

use ostinato_analysis::{DomTree, LoopTree};
use ostinato_ir::{
    global_variable::GlobalVariableData, module::FuncRef, ControlFlowGraph, GlobalVariable,
    Immediate, InstData, InstId, Module, ModuleWriter, Param, Type, Value, ValueId,
};

use crate::ExtractError;

#[derive(Debug)]
pub struct Prototype {
    /// Stable content hash of the serialized module.
    pub id: u64,
    /// Symbol of the candidate function.
    pub name: SmolStr,
    /// Canonical serialized form; what the trampoline hands to the
    /// runtime.
    pub ir: String,
    pub param_count: u32,
    pub lower_bound_count: u32,
    pub global_count: u32,
    /// The in-memory prototype module the text was rendered from.
    pub module: Module,
}

/// Where a lifted lower-bound value comes from at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerBound {
    /// The n-th original input of the isolated function.
    Input(usize),
    Imm(Immediate),
}

/// Everything trampoline installation needs beyond the prototype itself.
#[derive(Debug)]
pub struct PrototypePlan {
    pub prototype: Prototype,
    /// One entry per lifted lower-bound parameter, in signature order.
    pub lower_bounds: Vec<LowerBound>,
    /// Lifted globals as handles into the *source* module, in signature
    /// order.
    pub globals: Vec<GlobalVariable>,
}

/// Clone the isolated function into a fresh module, lift lower bounds and
/// globals, and serialize.
///
/// The resulting signature is `original inputs ++ lower bounds ++
/// globals`; `bounds(N)`/`globals(M)` attributes in the serialized text
/// let the runtime recover the partition without out-of-band data.
pub fn build_prototype(
    source: &Module,
    isolated_ref: FuncRef,
) -> Result<PrototypePlan, ExtractError> {
    let src_func = &source.funcs[isolated_ref];
    let mut func = src_func.clone();

    let mut proto_module = Module::new(format!("{}.{}.prototype", source.name, func.name()));

    // Re-home global references: the prototype module declares every
    // referenced global as external.
    for value in func.dfg.values.values_mut() {
        let source_gv = match value {
            Value::Global { gv, .. } | Value::ConstGep { gv, .. } => *gv,
            _ => continue,
        };
        let symbol = source.gv_store.symbol(source_gv).clone();
        let proto_gv = match proto_module.gv_store.gv_by_symbol(&symbol) {
            Some(existing) => existing,
            None => proto_module.gv_store.make_gv(GlobalVariableData::external(
                symbol,
                source.gv_store.ty(source_gv),
            )),
        };
        match value {
            Value::Global { gv, .. } | Value::ConstGep { gv, .. } => *gv = proto_gv,
            _ => unreachable!(),
        }
    }

    let lower_bounds = lift_lower_bounds(&mut func)?;
    rewrite_const_geps(&mut func);
    let lifted_globals = lift_globals(&mut func, &proto_module);

    func.flags.lower_bound_count = lower_bounds.len() as u32;
    func.flags.global_count = lifted_globals.len() as u32;
    func.strip_local_metadata();

    let globals: Vec<GlobalVariable> = lifted_globals
        .iter()
        .map(|&gv| {
            let symbol = proto_module.gv_store.symbol(gv);
            source
                .gv_store
                .gv_by_symbol(symbol)
                .expect("lifted global exists in the source module")
        })
        .collect();

    let name: SmolStr = func.sig.name().into();
    let param_count = func.sig.params().len() as u32;
    let lower_bound_count = func.flags.lower_bound_count;
    let global_count = func.flags.global_count;
    proto_module.push_function(func);

    let ir = ModuleWriter::new(&proto_module).write();
    let id = prototype_id(&ir);

    Ok(PrototypePlan {
        prototype: Prototype {
            id,
            name,
            ir,
            param_count,
            lower_bound_count,
            global_count,
            module: proto_module,
        },
        lower_bounds,
        globals,
    })
}

/// The prototype id is a content hash; a collision means two different
/// serialized prototypes produced the same key, which is a bug, not a
/// recoverable condition.
pub fn prototype_id(ir: &str) -> u64 {
    let hash = blake3::hash(ir.as_bytes());
    u64::from_le_bytes(hash.as_bytes()[..8].try_into().unwrap())
}

/// Append one parameter per phi in the outermost loop header, replacing
/// the phi's outside incoming with the parameter.
fn lift_lower_bounds(
    func: &mut ostinato_ir::Function,
) -> Result<Vec<LowerBound>, ExtractError> {
    let mut cfg = ControlFlowGraph::new();
    cfg.compute(func);
    let mut domtree = DomTree::new();
    domtree.compute(&cfg);
    let mut lpt = LoopTree::new();
    lpt.compute(&cfg, &domtree);

    let Some(outermost) = lpt.loops().find(|&lp| lpt.parent_loop(lp).is_none()) else {
        return Err(ExtractError::NoLoopHeader);
    };
    let header = lpt.loop_header(outermost);

    let phis: Vec<InstId> = func
        .layout
        .iter_inst(header)
        .filter(|&inst| func.dfg.inst(inst).is_phi())
        .collect();

    let mut lower_bounds = Vec::with_capacity(phis.len());
    for (k, &phi) in phis.iter().enumerate() {
        let InstData::Phi { args, ty } = func.dfg.inst(phi).clone() else {
            unreachable!("filtered to phis");
        };

        let outside: Vec<usize> = args
            .iter()
            .enumerate()
            .filter(|(_, (_, from))| !lpt.is_in_loop(*from, outermost))
            .map(|(i, _)| i)
            .collect();
        let &[incoming_idx] = outside.as_slice() else {
            return Err(ExtractError::MalformedPhi);
        };

        let init_value = args[incoming_idx].0;
        let bound = match *func.dfg.value(init_value) {
            Value::Arg { idx, .. } => LowerBound::Input(idx),
            Value::Immediate { imm, .. } => LowerBound::Imm(imm),
            _ => return Err(ExtractError::IneligibleLowerBound),
        };
        lower_bounds.push(bound);

        let arg = func.append_param(Param::new(ty, format!("lb{k}")));
        let InstData::Phi { args, .. } = func.dfg.inst_mut(phi) else {
            unreachable!();
        };
        args[incoming_idx].0 = arg;
    }

    Ok(lower_bounds)
}

/// Turn folded global-plus-offset constants into explicit address
/// arithmetic so the global scan sees every reference.
fn rewrite_const_geps(func: &mut ostinato_ir::Function) {
    let mut sites: Vec<(InstId, ValueId)> = Vec::new();
    for block in func.layout.iter_block() {
        for inst in func.layout.iter_inst(block) {
            func.dfg.inst(inst).visit_values(&mut |value| {
                if matches!(func.dfg.value(value), Value::ConstGep { .. })
                    && !sites.iter().any(|&(i, v)| i == inst && v == value)
                {
                    sites.push((inst, value));
                }
            });
        }
    }

    for (inst, const_gep) in sites {
        let Value::ConstGep { gv, offset, .. } = *func.dfg.value(const_gep) else {
            unreachable!();
        };
        let base = func.dfg.make_global_value(gv);
        let index = func.dfg.make_imm_value(offset);
        let gep = func.dfg.make_inst(InstData::Gep {
            base,
            index,
            elem_ty: Type::I8,
        });
        let addr = func.dfg.make_result(gep, Type::Ptr);
        func.layout.insert_inst_before(gep, inst);
        func.dfg.inst_mut(inst).visit_values_mut(&mut |value| {
            if *value == const_gep {
                *value = addr;
            }
        });
    }
}

/// Append one `nonnull` pointer parameter per distinct referenced global,
/// in discovery order, named after the global's symbol.
fn lift_globals(
    func: &mut ostinato_ir::Function,
    proto_module: &Module,
) -> Vec<GlobalVariable> {
    let mut discovered: IndexSet<GlobalVariable> = IndexSet::new();
    for block in func.layout.iter_block() {
        for inst in func.layout.iter_inst(block) {
            func.dfg.inst(inst).visit_values(&mut |value| {
                if let Value::Global { gv, .. } = func.dfg.value(value) {
                    discovered.insert(*gv);
                }
            });
        }
    }

    for &gv in &discovered {
        let symbol = proto_module.gv_store.symbol(gv).clone();
        let arg = func.append_param(Param::nonnull(Type::Ptr, symbol));

        let global_values: Vec<ValueId> = func
            .dfg
            .values
            .iter()
            .filter(|(_, value)| matches!(value, Value::Global { gv: g, .. } if *g == gv))
            .map(|(id, _)| id)
            .collect();
        for old in global_values {
            func.replace_value_uses(old, arg);
        }
    }

    discovered.into_iter().collect()
}
