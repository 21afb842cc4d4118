//! Region isolation: materialize a region as a self-contained function
//! and replace it with a call.

use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use smol_str::SmolStr;

use ostinato_analysis::RegionData;
use ostinato_ir::{
    dfg::BlockId, Function, InstData, InstId, Linkage, Module, Param, Signature, Value, ValueId,
    module::FuncRef,
};

use crate::ExtractError;

#[derive(Debug)]
pub struct IsolatedRegion {
    /// The isolated function, marked `jit_candidate`.
    pub func: FuncRef,
    /// The block in the source function now holding the call.
    pub call_block: BlockId,
    pub call_inst: InstId,
    /// Source-function values passed at the call site, in parameter
    /// order.
    pub inputs: Vec<ValueId>,
}

/// Clone `region` out of `func_ref` into a new function and rewrite the
/// source so the region's blocks are replaced by one call.
pub fn isolate_region(
    module: &mut Module,
    func_ref: FuncRef,
    region: &RegionData,
    region_index: usize,
) -> Result<IsolatedRegion, ExtractError> {
    let func = &module.funcs[func_ref];
    if func.flags.jit_candidate {
        return Err(ExtractError::AlreadyCandidate);
    }

    let inputs = collect_inputs(func, region)?;
    check_region_shape(func, region)?;

    let name = format!("{}_{}.jit.region", func.name(), region_index);
    let isolated = clone_region_into_function(func, region, &inputs, &name);
    let isolated_ref = module.push_function(isolated);
    let isolated_sig = module.funcs[isolated_ref].sig.clone();

    // Rewrite the source: a fresh block carries the call and jumps to the
    // region's exit; every outside edge into the region is redirected to
    // it.
    let func = &mut module.funcs[func_ref];
    let call_block = func.dfg.make_block();
    func.layout.insert_block_before(call_block, region.exit);

    let call_inst = func.dfg.make_inst(InstData::Call {
        callee: isolated_ref,
        args: SmallVec::from_slice(&inputs),
    });
    func.layout.append_inst(call_inst, call_block);
    let jump_inst = func.dfg.make_inst(InstData::Jump { dest: region.exit });
    func.layout.append_inst(jump_inst, call_block);
    func.record_callee(isolated_ref, isolated_sig);

    let outside_blocks: Vec<BlockId> = func
        .layout
        .iter_block()
        .filter(|b| !region.contains_block(*b) && *b != call_block)
        .collect();
    for block in outside_blocks {
        let insts: Vec<InstId> = func.layout.iter_inst(block).collect();
        for inst in insts {
            let data = func.dfg.inst_mut(inst);
            if data.is_terminator() {
                data.rewrite_blocks(|dest| if dest == region.entry { call_block } else { dest });
            } else if data.is_phi() {
                // Exit-block phis now flow in from the call block.
                data.rewrite_blocks(|from| {
                    if region.contains_block(from) {
                        call_block
                    } else {
                        from
                    }
                });
            }
        }
    }

    for block in region.blocks() {
        func.layout.remove_block(block);
    }

    Ok(IsolatedRegion {
        func: isolated_ref,
        call_block,
        call_inst,
        inputs,
    })
}

/// Values defined outside the region but used inside it, in deterministic
/// traversal order. Immediates and globals are constants and clone
/// directly.
fn collect_inputs(func: &Function, region: &RegionData) -> Result<Vec<ValueId>, ExtractError> {
    let mut inputs: IndexSet<ValueId> = IndexSet::new();

    for block in func.layout.iter_block() {
        if !region.contains_block(block) {
            continue;
        }
        for inst in func.layout.iter_inst(block) {
            let data = func.dfg.inst(inst);
            if matches!(data, InstData::Call { .. } | InstData::CallIndirect { .. }) {
                return Err(ExtractError::CallInRegion);
            }
            data.visit_values(&mut |value| {
                if region.contains_value(func, value) {
                    return;
                }
                match func.dfg.value(value) {
                    Value::Arg { .. } | Value::Inst { .. } => {
                        inputs.insert(value);
                    }
                    Value::Immediate { .. } | Value::Global { .. } | Value::ConstGep { .. } => {}
                }
            });
        }
    }

    // No value computed inside the region may be consumed outside it.
    for block in func.layout.iter_block() {
        if region.contains_block(block) {
            continue;
        }
        for inst in func.layout.iter_inst(block) {
            let mut leaked = false;
            func.dfg.inst(inst).visit_values(&mut |value| {
                leaked |= region.contains_value(func, value);
            });
            if leaked {
                return Err(ExtractError::LiveOutValue);
            }
        }
    }

    Ok(inputs.into_iter().collect())
}

/// The isolation rewrite supports one outside incoming edge per
/// entry-block phi and at most one region edge into each exit-block phi.
fn check_region_shape(func: &Function, region: &RegionData) -> Result<(), ExtractError> {
    for inst in func.layout.iter_inst(region.entry) {
        let InstData::Phi { args, .. } = func.dfg.inst(inst) else {
            continue;
        };
        let outside = args
            .iter()
            .filter(|(_, from)| !region.contains_block(*from))
            .count();
        if outside != 1 {
            return Err(ExtractError::MalformedPhi);
        }
    }

    for inst in func.layout.iter_inst(region.exit) {
        let InstData::Phi { args, .. } = func.dfg.inst(inst) else {
            continue;
        };
        let from_region = args
            .iter()
            .filter(|(_, from)| region.contains_block(*from))
            .count();
        if from_region > 1 {
            return Err(ExtractError::MalformedPhi);
        }
    }

    Ok(())
}

fn clone_region_into_function(
    func: &Function,
    region: &RegionData,
    inputs: &[ValueId],
    name: &str,
) -> Function {
    let params: Vec<Param> = inputs
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let ty = func.dfg.value_ty(value);
            let name: SmolStr = match func.dfg.value(value) {
                Value::Arg { idx, .. } => func.sig.params()[*idx].name.clone(),
                _ => func
                    .dfg
                    .value_name(value)
                    .cloned()
                    .unwrap_or_else(|| SmolStr::new(format!("in{i}"))),
            };
            Param::new(ty, name)
        })
        .collect();

    let sig = Signature::new(name, Linkage::Public, params, None);
    let mut new_func = Function::new(sig);
    new_func.flags.jit_candidate = true;

    let mut value_map: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    for (i, &input) in inputs.iter().enumerate() {
        value_map.insert(input, new_func.arg_values[i]);
    }

    // Entry and return framing blocks, then the region body.
    let entry = new_func.dfg.make_block();
    new_func.layout.append_block(entry);

    let region_blocks: Vec<BlockId> = func
        .layout
        .iter_block()
        .filter(|b| region.contains_block(*b))
        .collect();

    let mut block_map: FxHashMap<BlockId, BlockId> = FxHashMap::default();
    for &block in &region_blocks {
        let new_block = new_func.dfg.make_block();
        new_func.layout.append_block(new_block);
        block_map.insert(block, new_block);
    }

    let ret_block = new_func.dfg.make_block();
    new_func.layout.append_block(ret_block);

    // Placeholders first so back-edge operands resolve.
    let mut inst_map: FxHashMap<InstId, InstId> = FxHashMap::default();
    for &block in &region_blocks {
        for inst in func.layout.iter_inst(block) {
            let new_inst = new_func.dfg.make_inst(InstData::Return { arg: None });
            new_func.layout.append_inst(new_inst, block_map[&block]);
            if let Some(result) = func.dfg.inst_result(inst) {
                let ty = func.dfg.value_ty(result);
                let new_result = new_func.dfg.make_result(new_inst, ty);
                value_map.insert(result, new_result);
            }
            inst_map.insert(inst, new_inst);
        }
    }

    for &block in &region_blocks {
        for inst in func.layout.iter_inst(block) {
            let mut data = func.dfg.inst(inst).clone();
            data.visit_values_mut(&mut |value| {
                if let Some(&mapped) = value_map.get(value) {
                    *value = mapped;
                    return;
                }
                *value = match *func.dfg.value(*value) {
                    Value::Immediate { imm, .. } => new_func.dfg.make_imm_value(imm),
                    Value::Global { gv, .. } => new_func.dfg.make_global_value(gv),
                    Value::ConstGep { gv, offset, .. } => {
                        new_func.dfg.make_const_gep_value(gv, offset)
                    }
                    _ => unreachable!("inputs and region results are pre-mapped"),
                };
            });
            data.rewrite_blocks(|dest| {
                if let Some(&mapped) = block_map.get(&dest) {
                    mapped
                } else if dest == region.exit {
                    ret_block
                } else {
                    // Phi incoming from outside the region.
                    entry
                }
            });
            new_func.dfg.replace_inst(inst_map[&inst], data);
        }
    }

    let jump = new_func.dfg.make_inst(InstData::Jump {
        dest: block_map[&region.entry],
    });
    new_func.layout.append_inst(jump, entry);
    let ret = new_func.dfg.make_inst(InstData::Return { arg: None });
    new_func.layout.append_inst(ret, ret_block);

    new_func
}
