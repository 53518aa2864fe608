//! ABI type definitions for native modules.

use std::ffi::c_char;

use crate::vm::{ValueRef, Vm, VmResult};

/// The interface of a native primitive.
///
/// A primitive receives the VM, which carries the current frame chain, and
/// returns either an exception value or the null reference on success.
/// Arguments come from the datastack of the current scope and results are
/// pushed onto the same.
///
/// The frame protocol is part of the ABI: before its first allocating call a
/// primitive links its own frame (`bowl_push_frame`, or
/// `bowl_push_empty_frame` for a fresh scope), pins every intermediate it
/// holds across further allocations in that frame's registers
/// (`bowl_frame_set_register` / `bowl_frame_register`), and unlinks the
/// frame (`bowl_pop_frame`) on every return path, including the one that
/// returns an exception.
pub type BowlFunction = extern "C" fn(vm: *mut Vm) -> ValueRef;

/// The interface of module hook functions.
///
/// `bowl_module_initialize` and `bowl_module_finalize` receive the VM and
/// the library value which represents the module. They return either an
/// exception value or the null reference. Initializers follow the same
/// frame discipline as primitives when they allocate.
///
/// Finalizers run while a collection is in progress and must not allocate;
/// the library cell they receive is readable but about to be reclaimed.
pub type BowlModuleFunction = extern "C" fn(vm: *mut Vm, library: ValueRef) -> ValueRef;

/// The tagged result of a fallible ABI operation: either a value or an
/// exception, discriminated by `failure`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BowlResult {
    /// Whether this result is a failure.
    pub failure: bool,
    /// The value on success, the exception on failure.
    pub value: ValueRef,
}

impl BowlResult {
    pub fn is_ok(self) -> bool {
        !self.failure
    }
}

impl From<VmResult> for BowlResult {
    fn from(result: VmResult) -> Self {
        match result {
            Ok(value) => BowlResult {
                failure: false,
                value,
            },
            Err(thrown) => BowlResult {
                failure: true,
                value: thrown.0,
            },
        }
    }
}

/// A function entry for bulk registration: a primitive and the name it is
/// bound to in the dictionary.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BowlFunctionEntry {
    /// Null-terminated name of the function.
    pub name: *const c_char,
    /// The function itself.
    pub function: BowlFunction,
}

/// Borrow the VM behind an ABI pointer, if it is non-null.
pub(crate) unsafe fn vm_mut<'a>(vm: *mut Vm) -> Option<&'a mut Vm> {
    if vm.is_null() {
        None
    } else {
        Some(unsafe { &mut *vm })
    }
}
