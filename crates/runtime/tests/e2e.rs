//! End to end: extract a region statically, then drive the runtime with
//! the serialized prototype exactly as the emitted trampoline would.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use ostinato_analysis::{
    qualify_regions, DomTree, LoopTree, RegionData, RegionRejection, RejectReason,
    ScalarEvolution,
};
use ostinato_extract::{extract_function_regions, ExtractedRegion, FIRST_USER_REGION};
use ostinato_ir::{
    ControlFlowGraph, FunctionBuilder, GlobalVariableData, GvInitializer, Linkage, Module,
    ModuleBuilder, Param, Signature, Type,
};
use ostinato_runtime::{
    BackendError, CheckpointPtr, Config, JitContext, ModuleHandle, SpecializeBackend,
};

fn build_and_extract() -> (Module, ExtractedRegion) {
    let mut mb = ModuleBuilder::new("app");
    let scale = mb.make_global(GlobalVariableData::new(
        "scale",
        Type::I64,
        Linkage::Public,
        false,
        Some(GvInitializer::make_imm(3i64)),
    ));

    let sig = Signature::new(
        "kern",
        Linkage::Public,
        [Param::new(Type::I64, "n"), Param::new(Type::Ptr, "a")],
        None,
    );
    let func_ref = mb.declare_function(sig.clone());

    let mut fb = FunctionBuilder::new(sig);
    let n = fb.args()[0];
    let a = fb.args()[1];

    let b0 = fb.append_block();
    let b1 = fb.append_block();
    let b2 = fb.append_block();

    fb.switch_to_block(b0);
    let zero = fb.make_imm_value(0i64);
    fb.jump(b1);

    fb.switch_to_block(b1);
    let iv = fb.phi(Type::I64, &[(zero, b0)]);
    let addr = fb.gep(a, iv, Type::I64);
    let elem = fb.load(addr, Type::I64);
    let scale_addr = fb.make_global_value(scale);
    let factor = fb.load(scale_addr, Type::I64);
    let scaled = fb.mul(elem, factor);
    fb.store(addr, scaled);
    let one = fb.make_imm_value(1i64);
    let next = fb.add(iv, one);
    fb.append_phi_arg(iv, next, b1);
    let cont = fb.slt(next, n);
    fb.br(cont, b1, b2);

    fb.switch_to_block(b2);
    fb.ret(None);

    mb.define_function(func_ref, fb.finish());
    let mut module = mb.build();

    let func = &module.funcs[func_ref];
    let mut cfg = ControlFlowGraph::new();
    cfg.compute(func);
    let mut domtree = DomTree::new();
    domtree.compute(&cfg);
    let mut lpt = LoopTree::new();
    lpt.compute(&cfg, &domtree);

    let blocks: Vec<_> = func.layout.iter_block().collect();
    let region = RegionData::new(blocks[1], blocks[2], [blocks[1]]);
    let lp = lpt.loop_of_block(blocks[1]).unwrap();

    let mut se = ScalarEvolution::new();
    let bound = se.unknown(func.arg_values[0], Type::I64);
    let rejections = [RegionRejection {
        region,
        reasons: vec![RejectReason::LoopBound {
            bound,
            scope: Some(lp),
        }],
        base_address: Some(func.arg_values[1]),
    }];
    let outcome = qualify_regions(func, &mut se, &lpt, &rejections);

    let mut next_region_id = FIRST_USER_REGION;
    let mut extraction =
        extract_function_regions(&mut module, func_ref, &outcome.qualified, &mut next_region_id);
    assert_eq!(extraction.extracted.len(), 1);
    (module, extraction.extracted.remove(0))
}

#[derive(Default)]
struct RecordingBackend {
    builds: AtomicUsize,
    variants: Mutex<Vec<String>>,
}

impl SpecializeBackend for RecordingBackend {
    fn add_module(
        &self,
        module: &ostinato_ir::Module,
        _pipeline: &str,
    ) -> Result<ModuleHandle, BackendError> {
        let n = self.builds.fetch_add(1, Ordering::SeqCst);
        self.variants
            .lock()
            .push(ostinato_ir::ModuleWriter::new(module).write());
        Ok(ModuleHandle(n as u64))
    }

    fn find_symbol(&self, handle: ModuleHandle, _name: &str) -> Result<usize, BackendError> {
        Ok(0x7000 + handle.0 as usize)
    }
}

#[test]
fn extracted_prototype_drives_the_runtime() {
    let (_module, extracted) = build_and_extract();
    let proto = &extracted.plan.prototype;

    let ctx = JitContext::new(Config::default());
    let backend = Arc::new(RecordingBackend::default());
    ctx.install_backend(backend.clone());

    // Recover the slot layout from the serialized prototype the way the
    // runtime itself does.
    let (entry, first_seen) = ctx.get_or_install_prototype(proto.id, &proto.ir).unwrap();
    assert!(first_seen);
    assert_eq!(entry.param_count, proto.param_count);
    assert_eq!(entry.lower_bound_count, 1);
    assert_eq!(entry.global_count, 1);

    // Assemble the argument vector the trampoline would build: scalars
    // through stack slots, pointers and globals by address.
    let n: i64 = 1000;
    let lb: i64 = 0;
    let buf = vec![0i64; 16];
    let scale_storage: i64 = 3;

    let params: Vec<*const u8> = entry
        .candidate()
        .sig
        .params()
        .iter()
        .map(|param| match param.name.as_str() {
            "n" => &n as *const i64 as *const u8,
            "a" => buf.as_ptr() as *const u8,
            "lb0" => &lb as *const i64 as *const u8,
            "scale" => &scale_storage as *const i64 as *const u8,
            other => panic!("unexpected prototype parameter {other}"),
        })
        .collect();

    let mut slot: *const c_void = std::ptr::null();
    let ready = unsafe {
        ctx.dispatch(
            &proto.ir,
            Some(CheckpointPtr::new(&mut slot)),
            proto.id,
            entry.param_count,
            params.as_ptr(),
        )
    };
    assert!(!ready);

    ctx.wait_for_builds();
    assert_eq!(backend.builds.load(Ordering::SeqCst), 1);
    assert_eq!(slot as usize, 0x7000);

    let ready = unsafe {
        ctx.dispatch(
            &proto.ir,
            Some(CheckpointPtr::new(&mut slot)),
            proto.id,
            entry.param_count,
            params.as_ptr(),
        )
    };
    assert!(ready);

    // The variant bound the lifted suffix: the lower bound became an
    // integer constant and the global a known address.
    let variants = backend.variants.lock();
    assert!(variants[0].contains("(0.i64, block0)"));
    let scale_bits = &scale_storage as *const i64 as usize;
    assert!(variants[0].contains(&format!("{scale_bits:#x}.ptr")));
    ctx.shutdown();
}
