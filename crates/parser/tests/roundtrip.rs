use ostinato_ir::{
    FunctionBuilder, GlobalVariableData, GvInitializer, Linkage, ModuleBuilder, ModuleWriter,
    Param, Signature, SourceLoc, Type,
};
use ostinato_parser::{parse_module, ParseError};

/// Build a module shaped like an extracted prototype: one candidate
/// function with a loop, a global reference, and a runtime declaration.
fn build_prototype_module() -> ostinato_ir::Module {
    let mut mb = ModuleBuilder::new("kernels.saxpy.prototype");
    let scale = mb.make_global(GlobalVariableData::constant(
        "scale",
        Type::I64,
        GvInitializer::make_imm(3i64),
    ));

    let sig = Signature::new(
        "saxpy.jit.region",
        Linkage::Public,
        [
            Param::new(Type::I64, "n"),
            Param::new(Type::Ptr, "a"),
            Param::new(Type::I64, "iv.lb0"),
            Param::nonnull(Type::Ptr, "scale"),
        ],
        None,
    );
    let func_ref = mb.declare_function(sig.clone());

    let mut fb = FunctionBuilder::new(sig);
    let n = fb.args()[0];
    let a = fb.args()[1];
    let lb = fb.args()[2];

    let b0 = fb.append_block();
    let b1 = fb.append_block();
    let b2 = fb.append_block();

    fb.switch_to_block(b0);
    fb.jump(b1);

    fb.switch_to_block(b1);
    let iv = fb.phi(Type::I64, &[(lb, b0)]);
    let addr = fb.gep(a, iv, Type::I64);
    let elem = fb.load(addr, Type::I64);
    let gv_addr = fb.make_global_value(scale);
    let factor = fb.load(gv_addr, Type::I64);
    let scaled = fb.mul(elem, factor);
    fb.store(addr, scaled);
    let one = fb.make_imm_value(1i64);
    let next = fb.add(iv, one);
    fb.append_phi_arg(iv, next, b1);
    let cont = fb.slt(next, n);
    fb.br(cont, b1, b2);

    fb.switch_to_block(b2);
    fb.ret(None);

    let mut func = fb.finish();
    func.flags.jit_candidate = true;
    func.flags.lower_bound_count = 1;
    func.flags.global_count = 1;
    mb.define_function(func_ref, func);

    mb.build()
}

#[test]
fn writer_parser_roundtrip_is_byte_stable() {
    let module = build_prototype_module();
    let first = ModuleWriter::new(&module).write();

    let reparsed = parse_module(&first).unwrap();
    let second = ModuleWriter::new(&reparsed).write();
    assert_eq!(first, second);

    // And once more, through the parsed module.
    let reparsed_again = parse_module(&second).unwrap();
    let third = ModuleWriter::new(&reparsed_again).write();
    assert_eq!(second, third);
}

#[test]
fn function_flags_survive_roundtrip() {
    let module = build_prototype_module();
    let text = ModuleWriter::new(&module).write();
    let reparsed = parse_module(&text).unwrap();

    let func_ref = reparsed.func_by_symbol("saxpy.jit.region").unwrap();
    let flags = reparsed.funcs[func_ref].flags;
    assert!(flags.jit_candidate);
    assert_eq!(flags.lower_bound_count, 1);
    assert_eq!(flags.global_count, 1);
}

#[test]
fn declarations_and_annotations_roundtrip() {
    let mut mb = ModuleBuilder::new("m");
    let dispatch_sig = Signature::new(
        "ostinato_dispatch",
        Linkage::External,
        [
            Param::new(Type::Ptr, "ir"),
            Param::new(Type::Ptr, "slot"),
            Param::new(Type::I64, "id"),
            Param::new(Type::I32, "argc"),
            Param::new(Type::Ptr, "params"),
        ],
        Some(Type::I1),
    );
    let dispatch = mb.declare_function(dispatch_sig.clone());

    let sig = Signature::new("f", Linkage::Public, [Param::new(Type::Ptr, "p")], None);
    let func_ref = mb.declare_function(sig.clone());
    let mut fb = FunctionBuilder::new(sig);
    let p = fb.args()[0];
    let b0 = fb.append_block();
    fb.switch_to_block(b0);
    let id = fb.make_imm_value(7i64);
    let argc = fb.make_imm_value(0i32);
    let ready = fb
        .call(dispatch, &dispatch_sig, &[p, p, id, argc, p])
        .unwrap();
    fb.func_mut().dfg.set_value_name(ready, "ready");
    let inst = fb.func_mut().dfg.value_inst(ready).unwrap();
    fb.func_mut().srclocs.insert(inst, SourceLoc { line: 12, col: 3 });
    fb.ret(None);
    mb.define_function(func_ref, fb.finish());

    let module = mb.build();
    let text = ModuleWriter::new(&module).write();
    assert!(text.contains("declare func external %ostinato_dispatch"));
    assert!(text.contains("@name(ready)"));
    assert!(text.contains("@loc(12,3)"));

    let reparsed = parse_module(&text).unwrap();
    let text2 = ModuleWriter::new(&reparsed).write();
    assert_eq!(text, text2);
}

#[test]
fn malformed_input_is_rejected() {
    assert!(matches!(
        parse_module("module %m\nfunc bogus %f() {\n}\n"),
        Err(ParseError::Unexpected { .. })
    ));
    assert!(matches!(
        parse_module("module %m\nfunc public %f() {\n    block0:\n        frobnicate\n}\n"),
        Err(ParseError::UnknownInst { .. })
    ));
}
