//! Call-site instrumentation.
//!
//! The isolated function becomes the fallback body; a new function with
//! its original name assembles an argument vector, asks the runtime for a
//! specialized pointer, and either jumps through it or calls the
//! fallback. The fallback itself re-polls once before entering the
//! outermost loop and clears its checkpoint registrations on the
//! unoptimized exit path.

use smallvec::SmallVec;

use ostinato_analysis::{DomTree, LoopTree};
use ostinato_ir::{
    dfg::BlockId, global_variable::GlobalVariableData, module::FuncRef, ControlFlowGraph,
    Function, GlobalVariable, GvInitializer, Immediate, InstData, InstId, Linkage, Module, Param,
    Signature, Type, Value, ValueId,
};

use crate::{isolate::IsolatedRegion, prototype::LowerBound, ExtractError, PrototypePlan};

pub const DISPATCH_SYMBOL: &str = "ostinato_dispatch";
pub const TRACE_ENTER_SYMBOL: &str = "ostinato_trace_enter";
pub const TRACE_EXIT_SYMBOL: &str = "ostinato_trace_exit";

#[derive(Debug)]
pub struct TrampolineArtifacts {
    pub trampoline: FuncRef,
    pub fallback: FuncRef,
}

pub fn install_trampoline(
    module: &mut Module,
    source_func: FuncRef,
    isolated: &IsolatedRegion,
    plan: &PrototypePlan,
    region_id: u64,
) -> Result<TrampolineArtifacts, ExtractError> {
    // The prototype text travels with the host module as a byte blob; the
    // trampoline passes its address to the runtime, which reads it as a
    // NUL-terminated string.
    let mut ir_bytes = plan.prototype.ir.clone().into_bytes();
    ir_bytes.push(0);
    let ir_gv = module.gv_store.make_gv(GlobalVariableData::constant(
        format!("{}.ir", plan.prototype.name),
        Type::I8,
        GvInitializer::make_bytes(ir_bytes),
    ));

    let dispatch = declare_runtime_fn(
        module,
        DISPATCH_SYMBOL,
        vec![
            Param::new(Type::Ptr, "ir"),
            Param::new(Type::Ptr, "slot"),
            Param::new(Type::I64, "id"),
            Param::new(Type::I32, "argc"),
            Param::new(Type::Ptr, "params"),
        ],
        Some(Type::I1),
    );
    let trace_enter = declare_runtime_fn(
        module,
        TRACE_ENTER_SYMBOL,
        vec![Param::new(Type::I64, "region")],
        None,
    );
    let trace_exit = declare_runtime_fn(
        module,
        TRACE_EXIT_SYMBOL,
        vec![Param::new(Type::I64, "region")],
        None,
    );
    let dispatch_sig = module.funcs[dispatch].sig.clone();
    let trace_enter_sig = module.funcs[trace_enter].sig.clone();
    let trace_exit_sig = module.funcs[trace_exit].sig.clone();

    // The fallback keeps the body; the trampoline takes over the symbol.
    let fallback_sig_params: Vec<Param> = module.funcs[isolated.func].sig.params().to_vec();
    module.rename_function(isolated.func, format!("{}.fallback", plan.prototype.name));
    module.funcs[isolated.func].flags.no_inline = true;
    let fallback_sig = module.funcs[isolated.func].sig.clone();

    let tramp_sig = Signature::new(
        plan.prototype.name.clone(),
        Linkage::Public,
        fallback_sig_params,
        None,
    );
    let mut tramp = Function::new(tramp_sig.clone());
    tramp.flags.no_inline = true;
    build_trampoline_body(
        &mut tramp,
        plan,
        ir_gv,
        region_id,
        dispatch,
        &dispatch_sig,
        isolated.func,
        &fallback_sig,
        trace_enter,
        &trace_enter_sig,
        trace_exit,
        &trace_exit_sig,
    );
    let tramp_ref = module.push_function(tramp);

    // Point the original call site at the trampoline.
    {
        let func = &mut module.funcs[source_func];
        let InstData::Call { callee, .. } = func.dfg.inst_mut(isolated.call_inst) else {
            unreachable!("isolation left a call at the call site");
        };
        *callee = tramp_ref;
        func.record_callee(tramp_ref, tramp_sig);
    }

    // Rewrite the fallback in place.
    let placeholder = Function::new(fallback_sig);
    let mut fallback = std::mem::replace(&mut module.funcs[isolated.func], placeholder);
    let result = add_fallback_repoll(&mut fallback, plan, ir_gv, dispatch, &dispatch_sig);
    module.funcs[isolated.func] = fallback;
    result?;

    Ok(TrampolineArtifacts {
        trampoline: tramp_ref,
        fallback: isolated.func,
    })
}

fn declare_runtime_fn(
    module: &mut Module,
    symbol: &str,
    params: Vec<Param>,
    ret_ty: Option<Type>,
) -> FuncRef {
    match module.func_by_symbol(symbol) {
        Some(existing) => existing,
        None => module.declare_function(Signature::new(symbol, Linkage::External, params, ret_ty)),
    }
}

fn append(func: &mut Function, block: BlockId, data: InstData) -> InstId {
    let inst = func.dfg.make_inst(data);
    func.layout.append_inst(inst, block);
    inst
}

fn append_with_result(func: &mut Function, block: BlockId, data: InstData, ty: Type) -> ValueId {
    let inst = append(func, block, data);
    func.dfg.make_result(inst, ty)
}

/// Store `args ++ lower bounds ++ globals` into a fresh `argc`-slot
/// pointer array: pointer arguments and global addresses go in directly,
/// scalars through a stack slot.
fn emit_argument_vector(
    func: &mut Function,
    block: BlockId,
    args: &[ValueId],
    lb_values: &[ValueId],
    gv_values: &[ValueId],
    argc: u32,
) -> ValueId {
    let params_arr = append_with_result(
        func,
        block,
        InstData::Alloca {
            ty: Type::Ptr,
            count: argc,
        },
        Type::Ptr,
    );

    let mut slot_index = 0i64;
    let mut store_slot = |func: &mut Function, entry: ValueId| {
        let idx = func.dfg.make_imm_value(slot_index);
        let dst = append_with_result(
            func,
            block,
            InstData::Gep {
                base: params_arr,
                index: idx,
                elem_ty: Type::Ptr,
            },
            Type::Ptr,
        );
        append(func, block, InstData::Store { addr: dst, value: entry });
        slot_index += 1;
    };

    for &arg in args {
        let ty = func.dfg.value_ty(arg);
        let entry = if ty.is_pointer() {
            arg
        } else {
            spill_to_slot(func, block, arg, ty)
        };
        store_slot(func, entry);
    }

    for &value in lb_values {
        let ty = func.dfg.value_ty(value);
        let entry = spill_to_slot(func, block, value, ty);
        store_slot(func, entry);
    }

    for &value in gv_values {
        store_slot(func, value);
    }

    debug_assert_eq!(slot_index as u32, argc);
    params_arr
}

fn spill_to_slot(func: &mut Function, block: BlockId, value: ValueId, ty: Type) -> ValueId {
    let slot = append_with_result(func, block, InstData::Alloca { ty, count: 1 }, Type::Ptr);
    append(func, block, InstData::Store { addr: slot, value });
    slot
}

#[allow(clippy::too_many_arguments)]
fn build_trampoline_body(
    func: &mut Function,
    plan: &PrototypePlan,
    ir_gv: GlobalVariable,
    region_id: u64,
    dispatch: FuncRef,
    dispatch_sig: &Signature,
    fallback: FuncRef,
    fallback_sig: &Signature,
    trace_enter: FuncRef,
    trace_enter_sig: &Signature,
    trace_exit: FuncRef,
    trace_exit_sig: &Signature,
) {
    let entry = func.dfg.make_block();
    let optimized = func.dfg.make_block();
    let slow = func.dfg.make_block();
    let exit = func.dfg.make_block();
    func.layout.append_block(entry);
    func.layout.append_block(optimized);
    func.layout.append_block(slow);
    func.layout.append_block(exit);

    let args: Vec<ValueId> = func.arg_values.to_vec();
    let lb_values: Vec<ValueId> = plan
        .lower_bounds
        .iter()
        .map(|lb| match *lb {
            LowerBound::Input(idx) => args[idx],
            LowerBound::Imm(imm) => func.dfg.make_imm_value(imm),
        })
        .collect();
    let gv_values: Vec<ValueId> = plan
        .globals
        .iter()
        .map(|&gv| func.dfg.make_global_value(gv))
        .collect();

    let argc = plan.prototype.param_count;
    let params_arr = emit_argument_vector(func, entry, &args, &lb_values, &gv_values, argc);

    let ir_ptr = func.dfg.make_global_value(ir_gv);
    let slot = append_with_result(
        func,
        entry,
        InstData::Alloca {
            ty: Type::Ptr,
            count: 1,
        },
        Type::Ptr,
    );
    let id_imm = func.dfg.make_imm_value(plan.prototype.id as i64);
    let argc_imm = func.dfg.make_imm_value(argc as i32);

    func.record_callee(dispatch, dispatch_sig.clone());
    let ready = append_with_result(
        func,
        entry,
        InstData::Call {
            callee: dispatch,
            args: SmallVec::from_slice(&[ir_ptr, slot, id_imm, argc_imm, params_arr]),
        },
        Type::I1,
    );
    append(
        func,
        entry,
        InstData::Branch {
            cond: ready,
            then_dest: optimized,
            else_dest: slow,
        },
    );

    // Ready: jump through the published pointer with the full prototype
    // argument list.
    let fn_ptr = append_with_result(
        func,
        optimized,
        InstData::Load {
            addr: slot,
            ty: Type::Ptr,
        },
        Type::Ptr,
    );
    let mut full_args: Vec<ValueId> = args.clone();
    full_args.extend_from_slice(&lb_values);
    full_args.extend_from_slice(&gv_values);
    append(
        func,
        optimized,
        InstData::CallIndirect {
            callee: fn_ptr,
            args: SmallVec::from_slice(&full_args),
            ret_ty: None,
        },
    );
    append(func, optimized, InstData::Jump { dest: exit });

    // Not ready: run the unoptimized clone, timed.
    let region_imm = func.dfg.make_imm_value(region_id as i64);
    func.record_callee(trace_enter, trace_enter_sig.clone());
    func.record_callee(trace_exit, trace_exit_sig.clone());
    func.record_callee(fallback, fallback_sig.clone());
    append(
        func,
        slow,
        InstData::Call {
            callee: trace_enter,
            args: SmallVec::from_slice(&[region_imm]),
        },
    );
    append(
        func,
        slow,
        InstData::Call {
            callee: fallback,
            args: SmallVec::from_slice(&args),
        },
    );
    append(
        func,
        slow,
        InstData::Call {
            callee: trace_exit,
            args: SmallVec::from_slice(&[region_imm]),
        },
    );
    append(func, slow, InstData::Jump { dest: exit });

    append(func, exit, InstData::Return { arg: None });
}

/// Insert the re-poll preamble in front of the outermost loop header and
/// checkpoint-clearing dispatches on the unoptimized exit paths.
fn add_fallback_repoll(
    func: &mut Function,
    plan: &PrototypePlan,
    ir_gv: GlobalVariable,
    dispatch: FuncRef,
    dispatch_sig: &Signature,
) -> Result<(), ExtractError> {
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

    // One initial lower bound per header phi, trampoline order.
    let phis: Vec<InstId> = func
        .layout
        .iter_inst(header)
        .filter(|&inst| func.dfg.inst(inst).is_phi())
        .collect();
    let mut lb_values = Vec::with_capacity(phis.len());
    let mut outside_edges = Vec::with_capacity(phis.len());
    for &phi in &phis {
        let InstData::Phi { args, .. } = func.dfg.inst(phi) else {
            unreachable!("filtered to phis");
        };
        let outside: Vec<usize> = args
            .iter()
            .enumerate()
            .filter(|(_, (_, from))| !lpt.is_in_loop(*from, outermost))
            .map(|(i, _)| i)
            .collect();
        let &[idx] = outside.as_slice() else {
            return Err(ExtractError::MalformedPhi);
        };
        let (init_value, _) = args[idx];
        if !matches!(
            func.dfg.value(init_value),
            Value::Arg { .. } | Value::Immediate { .. }
        ) {
            return Err(ExtractError::IneligibleLowerBound);
        }
        lb_values.push(init_value);
        outside_edges.push((phi, idx));
    }

    let repoll = func.dfg.make_block();
    func.layout.insert_block_before(repoll, header);

    // Every edge into the header from outside the loop now enters through
    // the re-poll block.
    let blocks: Vec<BlockId> = func.layout.iter_block().collect();
    for block in blocks {
        if block == repoll || lpt.is_in_loop(block, outermost) {
            continue;
        }
        let Some(last) = func.layout.last_inst_of(block) else {
            continue;
        };
        let data = func.dfg.inst_mut(last);
        if data.is_terminator() {
            data.rewrite_blocks(|dest| if dest == header { repoll } else { dest });
        }
    }
    for (phi, idx) in outside_edges {
        let InstData::Phi { args, .. } = func.dfg.inst_mut(phi) else {
            unreachable!();
        };
        args[idx].1 = repoll;
    }

    let args: Vec<ValueId> = func.arg_values.to_vec();
    let gv_values: Vec<ValueId> = plan
        .globals
        .iter()
        .map(|&gv| func.dfg.make_global_value(gv))
        .collect();
    let argc = plan.prototype.param_count;
    let params_arr = emit_argument_vector(func, repoll, &args, &lb_values, &gv_values, argc);

    let ir_ptr = func.dfg.make_global_value(ir_gv);
    let slot = append_with_result(
        func,
        repoll,
        InstData::Alloca {
            ty: Type::Ptr,
            count: 1,
        },
        Type::Ptr,
    );
    let id_imm = func.dfg.make_imm_value(plan.prototype.id as i64);
    let argc_imm = func.dfg.make_imm_value(argc as i32);

    func.record_callee(dispatch, dispatch_sig.clone());
    let ready = append_with_result(
        func,
        repoll,
        InstData::Call {
            callee: dispatch,
            args: SmallVec::from_slice(&[ir_ptr, slot, id_imm, argc_imm, params_arr]),
        },
        Type::I1,
    );

    let jit_exec = func.dfg.make_block();
    func.layout.append_block(jit_exec);
    append(
        func,
        repoll,
        InstData::Branch {
            cond: ready,
            then_dest: jit_exec,
            else_dest: header,
        },
    );

    // The build finished while this caller was between dispatches: take
    // the optimized code instead of the unoptimized loop.
    let fn_ptr = append_with_result(
        func,
        jit_exec,
        InstData::Load {
            addr: slot,
            ty: Type::Ptr,
        },
        Type::Ptr,
    );
    let mut full_args = args;
    full_args.extend_from_slice(&lb_values);
    full_args.extend_from_slice(&gv_values);
    append(
        func,
        jit_exec,
        InstData::CallIndirect {
            callee: fn_ptr,
            args: SmallVec::from_slice(&full_args),
            ret_ty: None,
        },
    );
    append(func, jit_exec, InstData::Return { arg: None });

    // The unoptimized path leaves its checkpoint registrations behind on
    // stack slots that die with this frame; clear them before returning.
    let null_slot = func.dfg.make_imm_value(Immediate::Ptr(0));
    let returns: Vec<InstId> = func
        .layout
        .iter_block()
        .filter(|&b| b != jit_exec)
        .flat_map(|b| func.layout.iter_inst(b).collect::<Vec<_>>())
        .filter(|&inst| func.dfg.inst(inst).is_return())
        .collect();
    for ret in returns {
        let clear = func.dfg.make_inst(InstData::Call {
            callee: dispatch,
            args: SmallVec::from_slice(&[ir_ptr, null_slot, id_imm, argc_imm, params_arr]),
        });
        func.layout.insert_inst_before(clear, ret);
    }

    Ok(())
}
