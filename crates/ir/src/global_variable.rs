use std::fmt;

use cranelift_entity::{entity_impl, PrimaryMap};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::{Immediate, Linkage, Type};

/// An opaque reference to [`GlobalVariableData`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GlobalVariable(pub u32);
entity_impl!(GlobalVariable);

#[derive(Debug, Clone, Default)]
pub struct GlobalVariableStore {
    gv_data: PrimaryMap<GlobalVariable, GlobalVariableData>,
    symbols: FxHashMap<SmolStr, GlobalVariable>,
}

impl GlobalVariableStore {
    pub fn make_gv(&mut self, gv_data: GlobalVariableData) -> GlobalVariable {
        match self.symbols.entry(gv_data.symbol.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => {
                panic!("duplicate global symbol `{}`", gv_data.symbol);
            }
            std::collections::hash_map::Entry::Vacant(v) => {
                let gv = self.gv_data.push(gv_data);
                v.insert(gv);
                gv
            }
        }
    }

    pub fn gv_data(&self, gv: GlobalVariable) -> &GlobalVariableData {
        &self.gv_data[gv]
    }

    pub fn gv_by_symbol(&self, symbol: &str) -> Option<GlobalVariable> {
        self.symbols.get(symbol).copied()
    }

    pub fn symbol(&self, gv: GlobalVariable) -> &SmolStr {
        &self.gv_data[gv].symbol
    }

    pub fn ty(&self, gv: GlobalVariable) -> Type {
        self.gv_data[gv].ty
    }

    pub fn iter(&self) -> impl Iterator<Item = (GlobalVariable, &GlobalVariableData)> {
        self.gv_data.iter()
    }

    pub fn len(&self) -> usize {
        self.gv_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gv_data.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVariableData {
    pub symbol: SmolStr,
    pub ty: Type,
    pub linkage: Linkage,
    pub is_const: bool,
    pub init: Option<GvInitializer>,
}

impl GlobalVariableData {
    pub fn new(
        symbol: impl Into<SmolStr>,
        ty: Type,
        linkage: Linkage,
        is_const: bool,
        init: Option<GvInitializer>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            ty,
            linkage,
            is_const,
            init,
        }
    }

    pub fn constant(symbol: impl Into<SmolStr>, ty: Type, init: GvInitializer) -> Self {
        Self::new(symbol, ty, Linkage::Private, true, Some(init))
    }

    /// A global owned by another module; only its address is known here.
    pub fn external(symbol: impl Into<SmolStr>, ty: Type) -> Self {
        Self::new(symbol, ty, Linkage::External, false, None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GvInitializer {
    Immediate(Immediate),
    Array(Vec<GvInitializer>),
    /// An opaque byte blob, e.g. an embedded serialized module.
    Bytes(Vec<u8>),
}

impl GvInitializer {
    pub fn make_imm(imm: impl Into<Immediate>) -> Self {
        Self::Immediate(imm.into())
    }

    pub fn make_array(data: Vec<GvInitializer>) -> Self {
        Self::Array(data)
    }

    pub fn make_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self::Bytes(data.into())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(data) => Some(data),
            _ => None,
        }
    }
}

impl fmt::Display for GvInitializer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Immediate(imm) => write!(f, "{imm}"),
            Self::Array(data) => {
                write!(f, "[")?;
                for (i, v) in data.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Self::Bytes(data) => {
                write!(f, "x\"")?;
                for byte in data {
                    write!(f, "{byte:02x}")?;
                }
                write!(f, "\"")
            }
        }
    }
}
