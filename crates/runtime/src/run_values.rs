//! Run-value capture and fingerprinting.
//!
//! The trampoline hands over an array of `argc` pointers: pointer
//! arguments and lifted global addresses directly, scalars through stack
//! slots. Bytes are copied out eagerly — the specialization build runs on
//! a worker thread after the caller's frame may be gone.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use smallvec::SmallVec;

use ostinato_ir::{Function, Type};

/// One captured argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunValue {
    pub slot: u32,
    /// Pointer bits for pointer slots, stored integer bytes for scalar
    /// slots.
    pub bits: u64,
    pub pointer: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunValueList {
    values: SmallVec<[RunValue; 8]>,
    seed: u64,
}

impl RunValueList {
    pub fn new(seed: u64) -> Self {
        Self {
            values: SmallVec::new(),
            seed,
        }
    }

    pub fn push(&mut self, value: RunValue) {
        self.values.push(value);
    }

    pub fn get(&self, slot: u32) -> Option<&RunValue> {
        self.values.get(slot as usize)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RunValue> {
        self.values.iter()
    }

    /// Deterministic fingerprint over the slots in trampoline order.
    /// Identical argument bytes always produce identical hashes.
    pub fn hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.seed.hash(&mut hasher);
        for value in &self.values {
            value.bits.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// How the runtime reads each slot of the argument vector, derived from
/// the prototype signature and its `bounds`/`globals` partition.
fn slot_is_pointer(proto: &Function, index: usize) -> bool {
    let argc = proto.sig.params().len();
    let global_start = argc - proto.flags.global_count as usize;
    let bound_start = global_start - proto.flags.lower_bound_count as usize;

    if index >= global_start {
        // Lifted globals: the slot holds the global's address itself.
        return true;
    }
    if index >= bound_start {
        // Lifted lower bounds always travel through a stack slot.
        return false;
    }
    proto.sig.params()[index].ty.is_pointer()
}

/// Capture the argument vector of a dispatch.
///
/// # Safety
///
/// `params` must point to `argc` valid pointers; every scalar slot must
/// point to initialized storage at least as large as the parameter type.
pub unsafe fn capture_run_values(
    proto: &Function,
    argc: u32,
    params: *const *const u8,
    seed: u64,
) -> RunValueList {
    debug_assert_eq!(proto.sig.params().len(), argc as usize);

    let mut values = RunValueList::new(seed);
    for i in 0..argc as usize {
        let entry = *params.add(i);
        let run_value = if slot_is_pointer(proto, i) {
            RunValue {
                slot: i as u32,
                bits: entry as u64,
                pointer: true,
            }
        } else {
            let ty = proto.sig.params()[i].ty;
            RunValue {
                slot: i as u32,
                bits: read_scalar(entry, ty),
                pointer: false,
            }
        };
        values.push(run_value);
    }
    values
}

unsafe fn read_scalar(slot: *const u8, ty: Type) -> u64 {
    match ty.size_of() {
        1 => std::ptr::read_unaligned(slot) as u64,
        2 => std::ptr::read_unaligned(slot as *const u16) as u64,
        4 => std::ptr::read_unaligned(slot as *const u32) as u64,
        _ => std::ptr::read_unaligned(slot as *const u64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ostinato_ir::{Linkage, Param, Signature};

    fn proto_func() -> Function {
        let sig = Signature::new(
            "p",
            Linkage::Public,
            [
                Param::new(Type::I64, "n"),
                Param::new(Type::Ptr, "a"),
                Param::new(Type::I64, "lb0"),
                Param::nonnull(Type::Ptr, "g"),
            ],
            None,
        );
        let mut func = Function::new(sig);
        func.flags.lower_bound_count = 1;
        func.flags.global_count = 1;
        func
    }

    #[test]
    fn identical_bytes_hash_identically() {
        let proto = proto_func();

        let n: i64 = 1000;
        let lb: i64 = 0;
        let mut array = [0u8; 8];
        let params: [*const u8; 4] = [
            &n as *const i64 as *const u8,
            array.as_mut_ptr(),
            &lb as *const i64 as *const u8,
            0x1000 as *const u8,
        ];

        let a = unsafe { capture_run_values(&proto, 4, params.as_ptr(), 7) };
        let b = unsafe { capture_run_values(&proto, 4, params.as_ptr(), 7) };
        assert_eq!(a.hash(), b.hash());

        let n2: i64 = 1001;
        let params2: [*const u8; 4] = [
            &n2 as *const i64 as *const u8,
            array.as_mut_ptr(),
            &lb as *const i64 as *const u8,
            0x1000 as *const u8,
        ];
        let c = unsafe { capture_run_values(&proto, 4, params2.as_ptr(), 7) };
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn pointer_slots_contribute_pointer_bits() {
        let proto = proto_func();

        let n: i64 = 10;
        let lb: i64 = 0;
        let mut buf_a = [1u8; 8];
        let mut buf_b = [1u8; 8];

        let params_a: [*const u8; 4] = [
            &n as *const i64 as *const u8,
            buf_a.as_mut_ptr(),
            &lb as *const i64 as *const u8,
            0x1000 as *const u8,
        ];
        let params_b: [*const u8; 4] = [
            &n as *const i64 as *const u8,
            buf_b.as_mut_ptr(),
            &lb as *const i64 as *const u8,
            0x1000 as *const u8,
        ];

        let a = unsafe { capture_run_values(&proto, 4, params_a.as_ptr(), 0) };
        let b = unsafe { capture_run_values(&proto, 4, params_b.as_ptr(), 0) };
        // Same contents, different buffers: the pointer slot keys on the
        // address, so the fingerprints differ.
        assert_ne!(a.hash(), b.hash());
        assert!(a.get(1).unwrap().pointer);
        assert!(!a.get(2).unwrap().pointer);
        assert!(a.get(3).unwrap().pointer);
    }

    #[test]
    fn scalar_widths_read_correctly() {
        let sig = Signature::new(
            "q",
            Linkage::Public,
            [Param::new(Type::I8, "b"), Param::new(Type::I32, "w")],
            None,
        );
        let proto = Function::new(sig);

        let b: i8 = -1;
        let w: i32 = 0x1234_5678;
        let params: [*const u8; 2] = [
            &b as *const i8 as *const u8,
            &w as *const i32 as *const u8,
        ];
        let values = unsafe { capture_run_values(&proto, 2, params.as_ptr(), 0) };
        assert_eq!(values.get(0).unwrap().bits, 0xff);
        assert_eq!(values.get(1).unwrap().bits, 0x1234_5678);
    }
}
