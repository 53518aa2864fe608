//! C-callable entry points for native modules.
//!
//! These functions mirror the VM's public operations with C-compatible
//! signatures. Fallible constructors return a [`BowlResult`]; operations
//! with no interesting value return an exception reference which is null on
//! success.
//!
//! # Safety
//!
//! All functions that take raw pointers require:
//! - A valid VM pointer (the one passed to the primitive or module hook)
//! - Valid, properly sized buffers for pointer/length pairs
//! - Null-terminated strings where `*const c_char` is taken

#![allow(unsafe_op_in_unsafe_fn)]
#![allow(clippy::missing_safety_doc)]

use std::ffi::{CStr, CString, c_char};

use super::types::{BowlFunction, BowlFunctionEntry, BowlResult, vm_mut};
use crate::vm::{REGISTER_COUNT, ValueRef, ValueType, Vm};

fn failure() -> BowlResult {
    BowlResult {
        failure: true,
        value: ValueRef::NULL,
    }
}

/// Convert a status result into the ABI convention: null on success, the
/// exception reference otherwise.
fn status(result: Result<(), crate::vm::Thrown>) -> ValueRef {
    match result {
        Ok(()) => ValueRef::NULL,
        Err(thrown) => thrown.0,
    }
}

/// Create a new VM instance.
///
/// The returned VM must be freed with `bowl_vm_free()`.
#[unsafe(no_mangle)]
pub extern "C" fn bowl_vm_new() -> *mut Vm {
    Box::into_raw(Box::new(Vm::new()))
}

/// Free a VM instance, finalizing any libraries that are still loaded.
///
/// After this call the VM pointer is invalid and must not be used.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_vm_free(vm: *mut Vm) {
    if vm.is_null() {
        return;
    }
    drop(Box::from_raw(vm));
}

// =============================================================================
// Allocation and constructors
// =============================================================================

/// Allocate memory for the provided value type including `additional` bytes.
///
/// Variant fields are not initialized; to keep the collector working, all
/// fields must be initialized before any other allocation.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_allocate(vm: *mut Vm, vtype: u64, additional: u64) -> BowlResult {
    let (Some(vm), Some(vtype)) = (vm_mut(vm), ValueType::from_word(vtype)) else {
        return failure();
    };
    vm.allocate(vtype, additional).into()
}

/// The constructor for symbol values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_symbol(vm: *mut Vm, bytes: *const u8, length: u64) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    let bytes = if length == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(bytes, length as usize)
    };
    vm.symbol(bytes).into()
}

/// The constructor for string values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_string(vm: *mut Vm, bytes: *const u8, length: u64) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    let bytes = if length == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(bytes, length as usize)
    };
    vm.string(bytes).into()
}

/// The constructor for number values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_number(vm: *mut Vm, value: f64) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    vm.number(value).into()
}

/// The constructor for boolean values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_boolean(vm: *mut Vm, value: bool) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    vm.boolean(value).into()
}

/// The constructor for list values. The tail may be null for the empty list.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_list(vm: *mut Vm, head: ValueRef, tail: ValueRef) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    vm.list(head, tail).into()
}

/// The constructor for map values with the given number of buckets.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_map(vm: *mut Vm, capacity: u64) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    vm.map(capacity).into()
}

/// The constructor for vector values, filled with the provided value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_vector(vm: *mut Vm, fill: ValueRef, length: u64) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    vm.vector(fill, length).into()
}

/// The constructor for exception values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_exception(
    vm: *mut Vm,
    cause: ValueRef,
    message: ValueRef,
) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    vm.exception(cause, message).into()
}

/// The constructor for native function values. The library may be null if
/// the function does not originate from a shared library.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_function(
    vm: *mut Vm,
    library: ValueRef,
    function: BowlFunction,
) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    vm.function(library, function).into()
}

/// The constructor for library values: loads the shared object at `path`
/// (or returns the existing cell if it is already loaded).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_library(vm: *mut Vm, path: *const c_char) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    if path.is_null() {
        return failure();
    }
    let Ok(path) = CStr::from_ptr(path).to_str() else {
        return failure();
    };
    vm.library(path).into()
}

/// Check whether the library at `path` is currently loaded.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_library_is_loaded(vm: *mut Vm, path: *const c_char) -> bool {
    let Some(vm) = vm_mut(vm) else {
        return false;
    };
    if path.is_null() {
        return false;
    }
    match CStr::from_ptr(path).to_str() {
        Ok(path) => vm.library_is_loaded(path),
        Err(_) => false,
    }
}

// =============================================================================
// Value operations
// =============================================================================

/// Create an exact copy of the provided value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_value_clone(vm: *mut Vm, value: ValueRef) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    vm.value_clone(value).into()
}

/// Reverse the provided list.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_list_reverse(vm: *mut Vm, list: ValueRef) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    vm.list_reverse(list).into()
}

/// Compute the hash of the provided value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_value_hash(vm: *mut Vm, value: ValueRef) -> u64 {
    match vm_mut(vm) {
        Some(vm) => vm.hash_value(value),
        None => 0,
    }
}

/// Test whether the two provided values are structurally equal.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_value_equals(vm: *mut Vm, a: ValueRef, b: ValueRef) -> bool {
    match vm_mut(vm) {
        Some(vm) => vm.equals(a, b),
        None => false,
    }
}

/// Compute the actual byte size of the provided value's cell.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_value_byte_size(vm: *mut Vm, value: ValueRef) -> u64 {
    match vm_mut(vm) {
        Some(vm) if !value.is_null() => vm.heap().byte_size(value),
        _ => 0,
    }
}

/// The length of a string, symbol, list, map or vector value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_value_length(vm: *mut Vm, value: ValueRef) -> u64 {
    match vm_mut(vm) {
        Some(vm) => vm.heap().value_length(value),
        None => 0,
    }
}

/// A string representation of the value's type.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_value_type(vm: *mut Vm, value: ValueRef) -> *const c_char {
    let name: &'static str = match vm_mut(vm) {
        Some(vm) => vm.heap().type_name_of(value),
        None => return std::ptr::null(),
    };
    type_name_cstr(name)
}

/// A string representation of the provided type discriminator.
#[unsafe(no_mangle)]
pub extern "C" fn bowl_type_name(vtype: u64) -> *const c_char {
    match ValueType::from_word(vtype) {
        Some(vtype) => type_name_cstr(vtype.name()),
        None => std::ptr::null(),
    }
}

fn type_name_cstr(name: &'static str) -> *const c_char {
    // Matching null-terminated constants for every type name.
    const NAMES: [(&str, &[u8]); 10] = [
        ("symbol", b"symbol\0"),
        ("list", b"list\0"),
        ("function", b"function\0"),
        ("map", b"map\0"),
        ("boolean", b"boolean\0"),
        ("number", b"number\0"),
        ("string", b"string\0"),
        ("library", b"library\0"),
        ("vector", b"vector\0"),
        ("exception", b"exception\0"),
    ];
    for (plain, terminated) in NAMES {
        if plain == name {
            return terminated.as_ptr().cast();
        }
    }
    std::ptr::null()
}

/// The numeric payload of a number value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_number_value(vm: *mut Vm, value: ValueRef) -> f64 {
    match vm_mut(vm) {
        Some(vm) if !value.is_null() => vm.heap().number_value(value),
        _ => f64::NAN,
    }
}

/// The bit of a boolean value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_boolean_value(vm: *mut Vm, value: ValueRef) -> bool {
    match vm_mut(vm) {
        Some(vm) if !value.is_null() => vm.heap().boolean_value(value),
        _ => false,
    }
}

/// Generate a null-terminated copy of a string or symbol value. The result
/// must be released with `bowl_string_free()`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_string_to_null_terminated(
    vm: *mut Vm,
    value: ValueRef,
) -> *mut c_char {
    let Some(vm) = vm_mut(vm) else {
        return std::ptr::null_mut();
    };
    let Some(text) = vm.string_contents(value) else {
        return std::ptr::null_mut();
    };
    match CString::new(text) {
        Ok(text) => text.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Compute the textual representation of a value. The result must be
/// released with `bowl_string_free()`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_value_show(vm: *mut Vm, value: ValueRef) -> *mut c_char {
    let Some(vm) = vm_mut(vm) else {
        return std::ptr::null_mut();
    };
    match CString::new(vm.show(value)) {
        Ok(text) => text.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Release a string obtained from this API.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_string_free(text: *mut c_char) {
    if !text.is_null() {
        drop(CString::from_raw(text));
    }
}

// =============================================================================
// Map operations
// =============================================================================

/// Insert the value at the specified key, returning a new map.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_map_put(
    vm: *mut Vm,
    map: ValueRef,
    key: ValueRef,
    value: ValueRef,
) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    vm.map_put(map, key, value).into()
}

/// Delete the specified key, returning a new map (or the input when the key
/// is absent).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_map_delete(vm: *mut Vm, map: ValueRef, key: ValueRef) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    vm.map_delete(map, key).into()
}

/// Merge the two provided maps into a new one; on key collisions the second
/// map wins.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_map_merge(vm: *mut Vm, a: ValueRef, b: ValueRef) -> BowlResult {
    let Some(vm) = vm_mut(vm) else {
        return failure();
    };
    vm.map_merge(a, b).into()
}

/// Retrieve the value associated with the key, or the provided default.
/// Pass `bowl_sentinel_value()` to detect absence.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_map_get_or_else(
    vm: *mut Vm,
    map: ValueRef,
    key: ValueRef,
    otherwise: ValueRef,
) -> ValueRef {
    match vm_mut(vm) {
        Some(vm) => vm.map_get_or_else(map, key, otherwise),
        None => otherwise,
    }
}

/// Test whether the second argument is a subset of the first one.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_map_subset_of(
    vm: *mut Vm,
    superset: ValueRef,
    subset: ValueRef,
) -> bool {
    match vm_mut(vm) {
        Some(vm) => vm.map_subset_of(superset, subset),
        None => false,
    }
}

// =============================================================================
// Frame protocol
// =============================================================================
//
// The frame chain is part of the ABI. A module links a frame before any
// allocation whose result must stay reachable, pins its intermediates in the
// frame's registers (re-reading them after every allocating call, because a
// collection may have moved them), and unlinks the frame on every return
// path, including the one that returns an exception.

/// Link a frame that inherits the dictionary, callstack and datastack of
/// the current scope. Registers start null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_push_frame(vm: *mut Vm) {
    if let Some(vm) = vm_mut(vm) {
        vm.push_frame();
    }
}

/// Link a frame that opens a fresh scope: the dictionary, callstack and
/// datastack slots are fresh and null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_push_empty_frame(vm: *mut Vm) {
    if let Some(vm) = vm_mut(vm) {
        vm.push_empty_frame();
    }
}

/// Unlink the current top frame. The VM's base frame cannot be unlinked;
/// popping it is a no-op.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_pop_frame(vm: *mut Vm) {
    if let Some(vm) = vm_mut(vm) {
        if vm.frame_depth() > 1 {
            vm.pop_frame();
        }
    }
}

/// Read a register of the current frame. Indexes past the register count
/// read as null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_frame_register(vm: *mut Vm, index: u64) -> ValueRef {
    match vm_mut(vm) {
        Some(vm) if (index as usize) < REGISTER_COUNT => vm.register(index as usize),
        _ => ValueRef::NULL,
    }
}

/// Pin a value in a register of the current frame, where the collector can
/// see and rewrite it. Indexes past the register count are ignored.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_frame_set_register(vm: *mut Vm, index: u64, value: ValueRef) {
    if let Some(vm) = vm_mut(vm) {
        if (index as usize) < REGISTER_COUNT {
            vm.set_register(index as usize, value);
        }
    }
}

/// The dictionary of the current scope.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_dictionary(vm: *mut Vm) -> ValueRef {
    match vm_mut(vm) {
        Some(vm) => vm.dictionary(),
        None => ValueRef::NULL,
    }
}

/// Replace the dictionary of the current scope.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_set_dictionary(vm: *mut Vm, value: ValueRef) {
    if let Some(vm) = vm_mut(vm) {
        vm.set_dictionary(value);
    }
}

/// The callstack of the current scope.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_callstack(vm: *mut Vm) -> ValueRef {
    match vm_mut(vm) {
        Some(vm) => vm.callstack(),
        None => ValueRef::NULL,
    }
}

/// Replace the callstack of the current scope.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_set_callstack(vm: *mut Vm, value: ValueRef) {
    if let Some(vm) = vm_mut(vm) {
        vm.set_callstack(value);
    }
}

/// The datastack of the current scope.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_datastack(vm: *mut Vm) -> ValueRef {
    match vm_mut(vm) {
        Some(vm) => vm.datastack(),
        None => ValueRef::NULL,
    }
}

/// Replace the datastack of the current scope.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_set_datastack(vm: *mut Vm, value: ValueRef) {
    if let Some(vm) = vm_mut(vm) {
        vm.set_datastack(value);
    }
}

// =============================================================================
// Datastack
// =============================================================================

/// Push a value onto the datastack of the current scope. Returns an
/// exception reference, or null on success.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_stack_push(vm: *mut Vm, value: ValueRef) -> ValueRef {
    let Some(vm) = vm_mut(vm) else {
        return ValueRef::NULL;
    };
    status(vm.push_data(value))
}

/// Pop a value from the datastack into `variable`. Returns an exception
/// reference naming `function` when the datastack is empty, or null on
/// success.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_stack_pop(
    vm: *mut Vm,
    function: *const c_char,
    variable: *mut ValueRef,
) -> ValueRef {
    let Some(vm) = vm_mut(vm) else {
        return ValueRef::NULL;
    };
    let name = if function.is_null() {
        "?"
    } else {
        CStr::from_ptr(function).to_str().unwrap_or("?")
    };
    match vm.pop_data(name) {
        Ok(value) => {
            if !variable.is_null() {
                *variable = value;
            }
            ValueRef::NULL
        }
        Err(thrown) => thrown.0,
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Enter the provided function in the dictionary of the current scope.
/// Returns an exception reference, or null on success.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_register_function(
    vm: *mut Vm,
    name: *const c_char,
    library: ValueRef,
    function: BowlFunction,
) -> ValueRef {
    let Some(vm) = vm_mut(vm) else {
        return ValueRef::NULL;
    };
    if name.is_null() {
        return vm.format_exception("function name must not be null").0;
    }
    let Ok(name) = CStr::from_ptr(name).to_str() else {
        return vm.format_exception("function name must be valid UTF-8").0;
    };
    status(vm.register_function(name, library, function))
}

/// Register the provided entry.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_register(
    vm: *mut Vm,
    library: ValueRef,
    entry: BowlFunctionEntry,
) -> ValueRef {
    bowl_register_function(vm, entry.name, library, entry.function)
}

/// Register all provided entries.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_register_all(
    vm: *mut Vm,
    library: ValueRef,
    entries: *const BowlFunctionEntry,
    length: u64,
) -> ValueRef {
    if entries.is_null() {
        return ValueRef::NULL;
    }
    let entries = std::slice::from_raw_parts(entries, length as usize);
    for entry in entries {
        let raised = bowl_register(vm, library, *entry);
        if !raised.is_null() {
            return raised;
        }
    }
    ValueRef::NULL
}

// =============================================================================
// Singletons and collection
// =============================================================================

/// The preallocated sentinel value of this VM.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_sentinel_value(vm: *mut Vm) -> ValueRef {
    match vm_mut(vm) {
        Some(vm) => vm.sentinel(),
        None => ValueRef::NULL,
    }
}

/// The preallocated out-of-heap exception of this VM.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_exception_out_of_heap(vm: *mut Vm) -> ValueRef {
    match vm_mut(vm) {
        Some(vm) => vm.out_of_heap(),
        None => ValueRef::NULL,
    }
}

/// The preallocated finalization-failure exception of this VM.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_exception_finalization_failure(vm: *mut Vm) -> ValueRef {
    match vm_mut(vm) {
        Some(vm) => vm.finalization_failure(),
        None => ValueRef::NULL,
    }
}

/// Trigger a run of the garbage collector. Returns an exception reference,
/// or null on success.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bowl_collect_garbage(vm: *mut Vm) -> ValueRef {
    let Some(vm) = vm_mut(vm) else {
        return ValueRef::NULL;
    };
    status(vm.collect_garbage())
}
