pub mod builder;
pub mod cfg;
pub mod dfg;
pub mod function;
pub mod global_variable;
pub mod inst;
pub mod ir_writer;
pub mod layout;
pub mod linkage;
pub mod module;
pub mod types;
pub mod value;

pub use builder::{FunctionBuilder, ModuleBuilder};
pub use cfg::ControlFlowGraph;
pub use dfg::{BlockId, DataFlowGraph};
pub use function::{Function, FunctionFlags, Param, Signature, SourceLoc};
pub use global_variable::{GlobalVariable, GlobalVariableData, GvInitializer};
pub use inst::{BinaryOp, CastOp, CmpOp, InstData, InstId};
pub use ir_writer::ModuleWriter;
pub use layout::Layout;
pub use linkage::Linkage;
pub use module::{FuncRef, Module};
pub use types::Type;
pub use value::{Immediate, Value, ValueId};
