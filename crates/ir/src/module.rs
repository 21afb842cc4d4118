use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::{global_variable::GlobalVariableStore, Function, Linkage, Signature};

/// An opaque reference to a [`Function`] in a [`Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FuncRef(pub u32);
entity_impl!(FuncRef);

#[derive(Debug, Clone)]
pub struct Module {
    /// Module identity. Prototype modules derive theirs from
    /// `<source>.<function>.prototype`, which keys the runtime's module
    /// index.
    pub name: SmolStr,

    pub funcs: PrimaryMap<FuncRef, Function>,
    symbols: FxHashMap<SmolStr, FuncRef>,

    pub gv_store: GlobalVariableStore,
}

impl Module {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            funcs: PrimaryMap::default(),
            symbols: FxHashMap::default(),
            gv_store: GlobalVariableStore::default(),
        }
    }

    /// Register a function. The symbol must be unique within the module.
    pub fn push_function(&mut self, func: Function) -> FuncRef {
        let name: SmolStr = func.sig.name().into();
        assert!(
            !self.symbols.contains_key(&name),
            "duplicate function symbol `{name}`"
        );
        let func_ref = self.funcs.push(func);
        self.symbols.insert(name, func_ref);
        func_ref
    }

    /// Declare an external function by signature.
    pub fn declare_function(&mut self, sig: Signature) -> FuncRef {
        debug_assert_eq!(sig.linkage(), Linkage::External);
        self.push_function(Function::new(sig))
    }

    pub fn func_by_symbol(&self, symbol: &str) -> Option<FuncRef> {
        self.symbols.get(symbol).copied()
    }

    pub fn iter_functions(&self) -> impl Iterator<Item = FuncRef> {
        self.funcs.keys()
    }

    pub fn is_external(&self, func_ref: FuncRef) -> bool {
        self.funcs[func_ref].sig.linkage() == Linkage::External
    }

    /// The first defined function, if any. Prototype modules contain
    /// exactly one.
    pub fn first_defined_function(&self) -> Option<FuncRef> {
        self.funcs
            .keys()
            .find(|&func_ref| !self.funcs[func_ref].is_declaration())
    }

    /// Rename a function, keeping the symbol table coherent.
    pub fn rename_function(&mut self, func_ref: FuncRef, new_name: impl Into<SmolStr>) {
        let new_name: SmolStr = new_name.into();
        let old_name: SmolStr = self.funcs[func_ref].sig.name().into();
        assert!(
            !self.symbols.contains_key(&new_name),
            "duplicate function symbol `{new_name}`"
        );
        self.symbols.remove(&old_name);
        self.symbols.insert(new_name.clone(), func_ref);
        self.funcs[func_ref].sig.set_name(new_name);
    }
}
