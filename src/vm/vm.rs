use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::Settings;
use crate::ffi::loader::LoadedLibrary;
use crate::ffi::types::BowlFunction;
use crate::vm::frame::FrameStack;
use crate::vm::heap::{Heap, INITIAL_SPACE_WORDS};
use crate::vm::value::*;

/// An exception value propagating out of a fallible operation.
///
/// The wrapped reference points to an exception cell (or, in the worst case,
/// to the preallocated out-of-heap singleton). Like every reference it is
/// only stable until the next allocation, so handlers must either report it
/// immediately or pin it in a frame register.
#[derive(Debug, Clone, Copy)]
pub struct Thrown(pub ValueRef);

/// The tagged result of every fallible VM operation.
pub type VmResult<T = ValueRef> = Result<T, Thrown>;

/// The bowl virtual machine.
///
/// Owns the heap, the frame chain, the library registry and the preallocated
/// singletons. The VM is single-threaded: one mutator at a time, and a
/// garbage collection can only happen inside an allocator call.
pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) frames: FrameStack,
    /// Native library handles, indexed by the handle id stored in library
    /// cells. Entries are cleared when the collector finalizes a library.
    pub(crate) libraries: Vec<Option<LoadedLibrary>>,
    /// Normalized path -> handle id of the loaded library.
    pub(crate) registry: HashMap<PathBuf, usize>,
    settings: Settings,
    /// Whether allocation failures trigger a collection.
    gc_enabled: bool,
    /// Number of completed collections.
    pub(crate) collections: u64,
    /// Set while the collector runs, to catch allocating finalizers.
    pub(crate) collecting: bool,
    pub(crate) sentinel: ValueRef,
    pub(crate) out_of_heap: ValueRef,
    pub(crate) finalization_failure: ValueRef,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Create a VM with the given settings and default heap configuration.
    pub fn with_settings(settings: Settings) -> Self {
        Self::with_heap_config(settings, INITIAL_SPACE_WORDS, None, true)
    }

    /// Create a VM with full heap configuration.
    ///
    /// # Arguments
    /// * `space_words` - Initial size of each semi-space in words
    /// * `limit_words` - Hard limit on the size of one space (None = unlimited)
    /// * `gc_enabled` - Whether allocation failures trigger a collection
    pub fn with_heap_config(
        settings: Settings,
        space_words: usize,
        limit_words: Option<usize>,
        gc_enabled: bool,
    ) -> Self {
        let mut vm = Self {
            heap: Heap::with_limit(space_words, limit_words),
            frames: FrameStack::new(),
            libraries: Vec::new(),
            registry: HashMap::new(),
            settings,
            gc_enabled,
            collections: 0,
            collecting: false,
            sentinel: ValueRef::NULL,
            out_of_heap: ValueRef::NULL,
            finalization_failure: ValueRef::NULL,
        };
        vm.frames.push_empty();
        vm.boot();
        vm
    }

    /// Allocate the preallocated singletons and the base dictionary. The
    /// fresh heap is guaranteed to hold them, so failures here are bugs.
    fn boot(&mut self) {
        let sentinel = self.symbol(b"sentinel").expect("boot allocation failed");
        self.sentinel = sentinel;
        self.out_of_heap = self.boot_exception("out of heap memory");
        self.finalization_failure = self.boot_exception("failed to finalize library");
        let dictionary = self.map(16).expect("boot allocation failed");
        self.frames.set_dictionary(dictionary);
    }

    fn boot_exception(&mut self, message: &str) -> ValueRef {
        let text = self
            .string(message.as_bytes())
            .expect("boot allocation failed");
        self.exception(ValueRef::NULL, text)
            .expect("boot allocation failed")
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get immutable access to the heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Get mutable access to the heap (hashing fills in hash caches).
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Number of collections performed so far.
    pub fn collections(&self) -> u64 {
        self.collections
    }

    /// Depth of the frame chain.
    pub fn frame_depth(&self) -> usize {
        self.frames.depth()
    }

    /// The preallocated sentinel value, used to detect absence without
    /// allocating.
    pub fn sentinel(&self) -> ValueRef {
        self.sentinel
    }

    /// The preallocated out-of-heap exception.
    pub fn out_of_heap(&self) -> ValueRef {
        self.out_of_heap
    }

    /// The preallocated finalization-failure exception.
    pub fn finalization_failure(&self) -> ValueRef {
        self.finalization_failure
    }

    /// Render a human-readable representation of a value.
    pub fn show(&self, value: ValueRef) -> String {
        self.heap.show(value)
    }

    /// Structural equality of two values.
    pub fn equals(&mut self, a: ValueRef, b: ValueRef) -> bool {
        self.heap.equals(a, b)
    }

    /// The cached content hash of a value.
    pub fn hash_value(&mut self, value: ValueRef) -> u64 {
        self.heap.hash(value)
    }

    /// Extract the text of a string or symbol value.
    pub fn string_contents(&self, value: ValueRef) -> Option<String> {
        if value.is_null() {
            return None;
        }
        match self.heap.type_of(value) {
            ValueType::Symbol | ValueType::String => {
                Some(String::from_utf8_lossy(self.heap.string_bytes(value)).into_owned())
            }
            _ => None,
        }
    }

    // -------------------------------------------------------------------------
    // Frame protocol
    // -------------------------------------------------------------------------

    /// Link a frame that inherits the dictionary, callstack and datastack of
    /// the current scope. Must be balanced with [`Vm::pop_frame`] on every
    /// return path.
    pub fn push_frame(&mut self) {
        self.frames.push_inheriting();
    }

    /// Link a frame that opens a fresh scope with null slots.
    pub fn push_empty_frame(&mut self) {
        self.frames.push_empty();
    }

    /// Unlink the current top frame.
    pub fn pop_frame(&mut self) {
        self.frames.pop();
    }

    /// Read a register of the current frame.
    pub fn register(&self, index: usize) -> ValueRef {
        self.frames.register(index)
    }

    /// Pin a value in a register of the current frame.
    pub fn set_register(&mut self, index: usize, value: ValueRef) {
        self.frames.set_register(index, value);
    }

    pub fn dictionary(&self) -> ValueRef {
        self.frames.dictionary()
    }

    pub fn set_dictionary(&mut self, value: ValueRef) {
        self.frames.set_dictionary(value);
    }

    pub fn callstack(&self) -> ValueRef {
        self.frames.callstack()
    }

    pub fn set_callstack(&mut self, value: ValueRef) {
        self.frames.set_callstack(value);
    }

    pub fn datastack(&self) -> ValueRef {
        self.frames.datastack()
    }

    pub fn set_datastack(&mut self, value: ValueRef) {
        self.frames.set_datastack(value);
    }

    /// Run `body` inside a fresh inheriting frame, unlinking it on every
    /// return path.
    pub(crate) fn with_frame<T>(&mut self, body: impl FnOnce(&mut Self) -> VmResult<T>) -> VmResult<T> {
        self.frames.push_inheriting();
        let result = body(self);
        self.frames.pop();
        result
    }

    // -------------------------------------------------------------------------
    // Allocator entry point
    // -------------------------------------------------------------------------

    /// Allocate a cell for the given value type plus `additional` trailing
    /// bytes.
    ///
    /// The header is zero-filled (hash not computed, location null); variant
    /// fields are the caller's responsibility and must be initialized before
    /// any subsequent allocation, because any allocation may relocate the
    /// cell. On overflow the collector runs once and the request is retried;
    /// a second failure yields the preallocated out-of-heap exception.
    pub fn allocate(&mut self, vtype: ValueType, additional: u64) -> VmResult {
        debug_assert!(!self.collecting, "allocation during collection");
        let words = HEADER_WORDS + vtype.fixed_payload_words() + words_for_bytes(additional);
        let offset = match self.heap.try_allocate(words) {
            Some(offset) => Some(offset),
            None if self.gc_enabled => {
                self.collect(words)?;
                self.heap.try_allocate(words)
            }
            None => None,
        };
        match offset {
            Some(offset) => {
                self.heap.set_word(offset + TYPE_WORD, vtype as u64);
                Ok(ValueRef(offset as u64))
            }
            None => Err(Thrown(self.out_of_heap)),
        }
    }

    // -------------------------------------------------------------------------
    // Value constructors
    // -------------------------------------------------------------------------
    //
    // Every constructor that receives references pins them in the registers
    // of its own frame before allocating, then re-reads them afterwards; the
    // caller only has to keep its *other* live references pinned.

    /// The constructor for symbol values.
    pub fn symbol(&mut self, bytes: &[u8]) -> VmResult {
        self.text_value(ValueType::Symbol, bytes)
    }

    /// The constructor for string values.
    pub fn string(&mut self, bytes: &[u8]) -> VmResult {
        self.text_value(ValueType::String, bytes)
    }

    fn text_value(&mut self, vtype: ValueType, bytes: &[u8]) -> VmResult {
        let cell = self.allocate(vtype, bytes.len() as u64)?;
        let at = cell.word();
        self.heap.set_word(at + STRING_LENGTH, bytes.len() as u64);
        self.heap.write_bytes(at + STRING_BYTES, bytes);
        Ok(cell)
    }

    /// The constructor for number values.
    pub fn number(&mut self, value: f64) -> VmResult {
        let cell = self.allocate(ValueType::Number, 0)?;
        self.heap.set_word(cell.word() + NUMBER_BITS, value.to_bits());
        Ok(cell)
    }

    /// The constructor for boolean values.
    pub fn boolean(&mut self, value: bool) -> VmResult {
        let cell = self.allocate(ValueType::Boolean, 0)?;
        self.heap.set_word(cell.word() + BOOLEAN_BIT, u64::from(value));
        Ok(cell)
    }

    /// The constructor for list cells. The empty list is the null reference;
    /// this builds a cell with the given head and tail.
    pub fn list(&mut self, head: ValueRef, tail: ValueRef) -> VmResult {
        self.with_frame(|vm| {
            vm.set_register(0, head);
            vm.set_register(1, tail);
            let cell = vm.allocate(ValueType::List, 0)?;
            let head = vm.register(0);
            let tail = vm.register(1);
            let at = cell.word();
            vm.heap
                .set_word(at + LIST_LENGTH, 1 + vm.heap.list_length(tail));
            vm.heap.set_word(at + LIST_HEAD, head.0);
            vm.heap.set_word(at + LIST_TAIL, tail.0);
            Ok(cell)
        })
    }

    /// The constructor for map values with the given bucket count.
    pub fn map(&mut self, capacity: u64) -> VmResult {
        let capacity = capacity.max(1);
        let cell = self.allocate(ValueType::Map, capacity * 8)?;
        let at = cell.word();
        self.heap.set_word(at + MAP_LENGTH, 0);
        self.heap.set_word(at + MAP_CAPACITY, capacity);
        // Buckets are zero-filled by the allocator: all empty lists.
        Ok(cell)
    }

    /// The constructor for native function values bound to a library (which
    /// may be null for functions of the host itself).
    pub fn function(&mut self, library: ValueRef, function: BowlFunction) -> VmResult {
        self.with_frame(|vm| {
            vm.set_register(0, library);
            let cell = vm.allocate(ValueType::Function, 0)?;
            let library = vm.register(0);
            let at = cell.word();
            vm.heap.set_word(at + FUNCTION_LIBRARY, library.0);
            vm.heap
                .set_word(at + FUNCTION_POINTER, function as usize as u64);
            Ok(cell)
        })
    }

    /// The constructor for vector values: `length` slots, all filled with
    /// the provided value.
    pub fn vector(&mut self, fill: ValueRef, length: u64) -> VmResult {
        self.with_frame(|vm| {
            vm.set_register(0, fill);
            let cell = vm.allocate(ValueType::Vector, length * 8)?;
            let fill = vm.register(0);
            let at = cell.word();
            vm.heap.set_word(at + VECTOR_LENGTH, length);
            for i in 0..length as usize {
                vm.heap.set_word(at + VECTOR_ELEMENTS + i, fill.0);
            }
            Ok(cell)
        })
    }

    /// The constructor for exception values.
    pub fn exception(&mut self, cause: ValueRef, message: ValueRef) -> VmResult {
        self.with_frame(|vm| {
            vm.set_register(0, cause);
            vm.set_register(1, message);
            let cell = vm.allocate(ValueType::Exception, 0)?;
            let cause = vm.register(0);
            let message = vm.register(1);
            let at = cell.word();
            vm.heap.set_word(at + EXCEPTION_CAUSE, cause.0);
            vm.heap.set_word(at + EXCEPTION_MESSAGE, message.0);
            Ok(cell)
        })
    }

    /// Allocate a library cell bound to a handle id. Only the loader creates
    /// these.
    pub(crate) fn library_cell(&mut self, handle_id: u64, name: &[u8]) -> VmResult {
        let cell = self.allocate(ValueType::Library, name.len() as u64)?;
        let at = cell.word();
        self.heap.set_word(at + LIBRARY_HANDLE, handle_id);
        self.heap.set_word(at + LIBRARY_LENGTH, name.len() as u64);
        self.heap.write_bytes(at + LIBRARY_BYTES, name);
        Ok(cell)
    }

    // -------------------------------------------------------------------------
    // List operations
    // -------------------------------------------------------------------------

    /// Reverse a list, allocating one cell per element.
    pub fn list_reverse(&mut self, list: ValueRef) -> VmResult {
        self.expect_type("list_reverse", list, ValueType::List)?;
        self.with_frame(|vm| {
            vm.set_register(0, list);
            vm.set_register(1, ValueRef::NULL);
            while !vm.register(0).is_null() {
                let cursor = vm.register(0);
                let head = vm.heap.list_head(cursor);
                let reversed = vm.list(head, vm.register(1))?;
                vm.set_register(1, reversed);
                let cursor = vm.register(0);
                vm.set_register(0, vm.heap.list_tail(cursor));
            }
            Ok(vm.register(1))
        })
    }

    // -------------------------------------------------------------------------
    // Cloning
    // -------------------------------------------------------------------------

    /// Produce a value logically equal to the input.
    ///
    /// Aggregates (lists, maps, vectors, exceptions) are cloned deeply into
    /// fresh cells. Leaves (symbols, strings, numbers, booleans) and identity
    /// values (functions, libraries) are shared. Cloning the empty list is
    /// the null reference itself; no zero-length list cell exists.
    pub fn value_clone(&mut self, value: ValueRef) -> VmResult {
        if value.is_null() {
            return Ok(ValueRef::NULL);
        }
        match self.heap.type_of(value) {
            ValueType::Symbol
            | ValueType::String
            | ValueType::Number
            | ValueType::Boolean
            | ValueType::Function
            | ValueType::Library => Ok(value),
            ValueType::List => self.clone_list(value),
            ValueType::Map => self.clone_map(value),
            ValueType::Vector => self.clone_vector(value),
            ValueType::Exception => self.clone_exception(value),
        }
    }

    fn clone_list(&mut self, list: ValueRef) -> VmResult {
        self.with_frame(|vm| {
            vm.set_register(0, list);
            vm.set_register(1, ValueRef::NULL);
            while !vm.register(0).is_null() {
                let cursor = vm.register(0);
                let head = vm.heap.list_head(cursor);
                let cloned = vm.value_clone(head)?;
                let cell = vm.list(cloned, vm.register(1))?;
                vm.set_register(1, cell);
                let cursor = vm.register(0);
                vm.set_register(0, vm.heap.list_tail(cursor));
            }
            let reversed = vm.register(1);
            vm.list_reverse(reversed)
        })
    }

    fn clone_map(&mut self, map: ValueRef) -> VmResult {
        self.with_frame(|vm| {
            vm.set_register(0, map);
            let capacity = vm.heap.map_capacity(map);
            let fresh = vm.map(capacity)?;
            vm.set_register(1, fresh);
            for i in 0..capacity {
                let bucket = vm.heap.map_bucket(vm.register(0), i);
                let cloned = vm.value_clone(bucket)?;
                let fresh = vm.register(1);
                vm.heap.set_map_bucket(fresh, i, cloned);
            }
            let fresh = vm.register(1);
            let length = vm.heap.map_length(vm.register(0));
            vm.heap.set_map_length(fresh, length);
            Ok(fresh)
        })
    }

    fn clone_vector(&mut self, vector: ValueRef) -> VmResult {
        self.with_frame(|vm| {
            vm.set_register(0, vector);
            let length = vm.heap.vector_length(vector);
            let fresh = vm.vector(ValueRef::NULL, length)?;
            vm.set_register(1, fresh);
            for i in 0..length {
                let element = vm.heap.vector_element(vm.register(0), i);
                let cloned = vm.value_clone(element)?;
                let fresh = vm.register(1);
                vm.heap.set_vector_element(fresh, i, cloned);
            }
            Ok(vm.register(1))
        })
    }

    fn clone_exception(&mut self, exception: ValueRef) -> VmResult {
        self.with_frame(|vm| {
            vm.set_register(0, exception);
            let cause = vm.heap.exception_cause(exception);
            let cloned_cause = vm.value_clone(cause)?;
            vm.set_register(1, cloned_cause);
            let message = vm.heap.exception_message(vm.register(0));
            let cloned_message = vm.value_clone(message)?;
            let cause = vm.register(1);
            vm.exception(cause, cloned_message)
        })
    }

    // -------------------------------------------------------------------------
    // Datastack
    // -------------------------------------------------------------------------

    /// Push a value onto the datastack of the current scope.
    pub fn push_data(&mut self, value: ValueRef) -> VmResult<()> {
        let tail = self.frames.datastack();
        let cell = self.list(value, tail)?;
        self.frames.set_datastack(cell);
        Ok(())
    }

    /// Pop a value from the datastack, raising a stack-underflow exception
    /// naming `function` when the stack is empty.
    pub fn pop_data(&mut self, function: &str) -> VmResult {
        let datastack = self.frames.datastack();
        if datastack.is_null() {
            return Err(self.format_exception(&format!(
                "stack underflow in function '{function}'"
            )));
        }
        let head = self.heap.list_head(datastack);
        let tail = self.heap.list_tail(datastack);
        self.frames.set_datastack(tail);
        Ok(head)
    }

    /// Number of values on the datastack of the current scope.
    pub fn datastack_length(&self) -> u64 {
        self.heap.list_length(self.frames.datastack())
    }

    // -------------------------------------------------------------------------
    // Exceptions
    // -------------------------------------------------------------------------

    /// Build an exception value from a formatted message.
    ///
    /// If building the exception itself fails (out of heap while formatting),
    /// the preallocated out-of-heap singleton is thrown instead.
    pub fn format_exception(&mut self, message: &str) -> Thrown {
        match self.exception_from(ValueRef::NULL, message) {
            Ok(exception) => Thrown(exception),
            Err(thrown) => thrown,
        }
    }

    /// Wrap an exception with an outer context message; the new exception's
    /// cause is the prior one.
    pub fn rethrow(&mut self, cause: Thrown, message: &str) -> Thrown {
        match self.exception_from(cause.0, message) {
            Ok(exception) => Thrown(exception),
            Err(thrown) => thrown,
        }
    }

    fn exception_from(&mut self, cause: ValueRef, message: &str) -> VmResult {
        self.with_frame(|vm| {
            vm.set_register(0, cause);
            let text = vm.string(message.as_bytes())?;
            let cause = vm.register(0);
            vm.exception(cause, text)
        })
    }

    /// Assert that a value has the expected type, raising a formatted
    /// exception naming the function otherwise. The null reference is the
    /// empty list and therefore of type list.
    pub fn expect_type(
        &mut self,
        function: &str,
        value: ValueRef,
        expected: ValueType,
    ) -> VmResult<()> {
        let matches = if value.is_null() {
            expected == ValueType::List
        } else {
            self.heap.type_of(value) == expected
        };
        if matches {
            Ok(())
        } else {
            let observed = self.heap.type_name_of(value);
            Err(self.format_exception(&format!(
                "argument of illegal type '{observed}' in function '{function}' (expected type '{}')",
                expected.name()
            )))
        }
    }

    // -------------------------------------------------------------------------
    // Dictionary and dispatch
    // -------------------------------------------------------------------------

    /// Enter a function in the dictionary of the current scope under `name`.
    /// Re-registration replaces the prior binding.
    pub fn register_function(
        &mut self,
        name: &str,
        library: ValueRef,
        function: BowlFunction,
    ) -> VmResult<()> {
        self.with_frame(|vm| {
            vm.set_register(2, library);
            let symbol = vm.symbol(name.as_bytes())?;
            vm.set_register(0, symbol);
            let library = vm.register(2);
            let cell = vm.function(library, function)?;
            vm.set_register(1, cell);
            let dictionary = if vm.dictionary().is_null() {
                vm.map(16)?
            } else {
                vm.dictionary()
            };
            let symbol = vm.register(0);
            let cell = vm.register(1);
            let updated = vm.map_put(dictionary, symbol, cell)?;
            vm.set_dictionary(updated);
            Ok(())
        })
    }

    /// Register all provided entries against the same library.
    pub fn register_all(
        &mut self,
        library: ValueRef,
        entries: &[(&str, BowlFunction)],
    ) -> VmResult<()> {
        self.with_frame(|vm| {
            vm.set_register(0, library);
            for (name, function) in entries {
                let library = vm.register(0);
                vm.register_function(name, library, *function)?;
            }
            Ok(())
        })
    }

    /// Look up a symbol in the dictionary of the current scope.
    pub fn lookup(&mut self, symbol: ValueRef) -> Option<ValueRef> {
        let dictionary = self.frames.dictionary();
        if dictionary.is_null() {
            return None;
        }
        self.heap.map_lookup(dictionary, symbol)
    }

    /// Invoke a function value: a single indirect call through the stored
    /// native pointer. A null return from the native side means success.
    pub fn invoke(&mut self, function: ValueRef) -> VmResult<()> {
        self.expect_type("invoke", function, ValueType::Function)?;
        let bits = self.heap.function_pointer_bits(function);
        let f: BowlFunction = unsafe { std::mem::transmute::<usize, BowlFunction>(bits as usize) };
        let raised = f(self as *mut Vm);
        if raised.is_null() {
            Ok(())
        } else {
            Err(Thrown(raised))
        }
    }

    /// Look up `name` in the dictionary and invoke the bound function,
    /// raising an undefined-name exception when no binding exists.
    pub fn invoke_named(&mut self, name: &str) -> VmResult<()> {
        let symbol = self.symbol(name.as_bytes())?;
        match self.lookup(symbol) {
            Some(function) => self.invoke(function),
            None => Err(self.format_exception(&format!("undefined name '{name}'"))),
        }
    }

    /// Load the configured kernel library, if any.
    pub fn load_configured_kernel(&mut self) -> VmResult<Option<ValueRef>> {
        let Some(path) = self.settings.kernel_library.clone() else {
            return Ok(None);
        };
        let path = path.to_string_lossy().into_owned();
        self.library(&path).map(Some)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        // Teardown finalizes every library that is still loaded, in load
        // order, before the native handles are closed.
        for id in 0..self.libraries.len() {
            if let Some(library) = self.libraries[id].take() {
                if let Some(finalize) = library.finalize {
                    let raised = finalize(self as *mut Vm, library.cell);
                    if !raised.is_null() {
                        log::warn!(
                            "library '{}' failed to finalize at teardown",
                            library.path.display()
                        );
                    }
                }
                drop(library.handle); // closes the native handle
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_constructors() {
        let mut vm = Vm::new();
        let n = vm.number(21.5).unwrap();
        assert_eq!(vm.heap().number_value(n), 21.5);
        let b = vm.boolean(true).unwrap();
        assert!(vm.heap().boolean_value(b));
        let s = vm.string(b"hello").unwrap();
        assert_eq!(vm.heap().string_bytes(s), b"hello");
        let sym = vm.symbol(b"name").unwrap();
        assert_eq!(vm.heap().type_of(sym), ValueType::Symbol);
    }

    #[test]
    fn test_list_construction_and_reverse() {
        // Build [1 2 3], reverse, check the spine.
        let mut vm = Vm::new();
        vm.push_frame();
        let mut list = ValueRef::NULL;
        for i in [3.0, 2.0, 1.0] {
            vm.set_register(0, list);
            let n = vm.number(i).unwrap();
            list = vm.list(n, vm.register(0)).unwrap();
        }
        vm.set_register(0, list);
        assert_eq!(vm.heap().list_length(list), 3);

        let reversed = vm.list_reverse(list).unwrap();
        let heap = vm.heap();
        assert_eq!(heap.number_value(heap.list_head(reversed)), 3.0);
        let t = heap.list_tail(reversed);
        assert_eq!(heap.number_value(heap.list_head(t)), 2.0);
        let tt = heap.list_tail(t);
        assert_eq!(heap.number_value(heap.list_head(tt)), 1.0);
        assert!(heap.list_tail(tt).is_null());
        vm.pop_frame();
    }

    #[test]
    fn test_reverse_round_trip() {
        // reverse(reverse(xs)) == xs.
        let mut vm = Vm::new();
        vm.push_frame();
        let mut list = ValueRef::NULL;
        for i in 0..10 {
            vm.set_register(0, list);
            let n = vm.number(f64::from(i)).unwrap();
            list = vm.list(n, vm.register(0)).unwrap();
        }
        vm.set_register(0, list);
        let once = vm.list_reverse(list).unwrap();
        vm.set_register(1, once);
        assert_eq!(vm.heap().list_length(once), 10);
        let twice = vm.list_reverse(once).unwrap();
        let original = vm.register(0);
        assert!(vm.equals(original, twice));
        vm.pop_frame();
    }

    #[test]
    fn test_datastack_push_pop() {
        // Push "hello", pop it, push 5.0.
        let mut vm = Vm::new();
        let s = vm.string(b"hello").unwrap();
        vm.push_data(s).unwrap();
        assert_eq!(vm.datastack_length(), 1);

        let popped = vm.pop_data("test").unwrap();
        assert_eq!(vm.heap().string_bytes(popped), b"hello");
        assert_eq!(vm.datastack_length(), 0);

        let n = vm.number(5.0).unwrap();
        vm.push_data(n).unwrap();
        assert_eq!(vm.datastack_length(), 1);
        let top = vm.heap().list_head(vm.datastack());
        assert_eq!(vm.heap().number_value(top), 5.0);
    }

    #[test]
    fn test_pop_empty_datastack_raises() {
        // The underflow exception names the function.
        let mut vm = Vm::new();
        let thrown = vm.pop_data("duplicate").unwrap_err();
        let message = vm.heap().exception_message(thrown.0);
        let text = vm.string_contents(message).unwrap();
        assert!(text.contains("stack underflow"));
        assert!(text.contains("duplicate"));
    }

    #[test]
    fn test_type_assertion_message() {
        let mut vm = Vm::new();
        let n = vm.number(1.0).unwrap();
        let thrown = vm.expect_type("swap", n, ValueType::String).unwrap_err();
        let message = vm.heap().exception_message(thrown.0);
        let text = vm.string_contents(message).unwrap();
        assert_eq!(
            text,
            "argument of illegal type 'number' in function 'swap' (expected type 'string')"
        );
    }

    #[test]
    fn test_null_is_a_list_for_type_checks() {
        let mut vm = Vm::new();
        assert!(vm.expect_type("car", ValueRef::NULL, ValueType::List).is_ok());
        assert!(
            vm.expect_type("car", ValueRef::NULL, ValueType::Number)
                .is_err()
        );
    }

    #[test]
    fn test_exception_chain() {
        let mut vm = Vm::new();
        let inner = vm.format_exception("inner failure");
        vm.push_frame();
        vm.set_register(0, inner.0);
        let outer = vm.rethrow(Thrown(vm.register(0)), "while testing");
        let cause = vm.heap().exception_cause(outer.0);
        assert!(!cause.is_null());
        let cause_message = vm.heap().exception_message(cause);
        let text = vm.string_contents(cause_message).unwrap();
        assert_eq!(text, "inner failure");
        vm.pop_frame();
    }

    #[test]
    fn test_vector_fill() {
        let mut vm = Vm::new();
        let fill = vm.boolean(false).unwrap();
        let v = vm.vector(fill, 4).unwrap();
        assert_eq!(vm.heap().vector_length(v), 4);
        for i in 0..4 {
            let element = vm.heap().vector_element(v, i);
            assert!(!vm.heap().boolean_value(element));
        }
    }

    #[test]
    fn test_clone_deep_for_aggregates() {
        let mut vm = Vm::new();
        vm.push_frame();
        let n = vm.number(1.0).unwrap();
        let inner = vm.list(n, ValueRef::NULL).unwrap();
        vm.set_register(0, inner);
        let outer = vm.list(inner, ValueRef::NULL).unwrap();
        vm.set_register(1, outer);

        let cloned = vm.value_clone(outer).unwrap();
        let outer = vm.register(1);
        assert_ne!(cloned, outer);
        assert!(vm.equals(cloned, outer));
        vm.pop_frame();
    }

    #[test]
    fn test_clone_shares_leaves_and_null() {
        let mut vm = Vm::new();
        let s = vm.string(b"shared").unwrap();
        assert_eq!(vm.value_clone(s).unwrap(), s);
        assert_eq!(vm.value_clone(ValueRef::NULL).unwrap(), ValueRef::NULL);
    }

    #[test]
    fn test_singletons_are_distinct() {
        let vm = Vm::new();
        assert!(!vm.sentinel().is_null());
        assert!(!vm.out_of_heap().is_null());
        assert!(!vm.finalization_failure().is_null());
        assert_ne!(vm.out_of_heap(), vm.finalization_failure());
    }

    extern "C" fn prim_double(vm: *mut Vm) -> ValueRef {
        let vm = unsafe { &mut *vm };
        let value = match vm.pop_data("double") {
            Ok(value) => value,
            Err(thrown) => return thrown.0,
        };
        if let Err(thrown) = vm.expect_type("double", value, ValueType::Number) {
            return thrown.0;
        }
        let doubled = vm.heap().number_value(value) * 2.0;
        let result = match vm.number(doubled) {
            Ok(result) => result,
            Err(thrown) => return thrown.0,
        };
        match vm.push_data(result) {
            Ok(()) => ValueRef::NULL,
            Err(thrown) => thrown.0,
        }
    }

    #[test]
    fn test_register_and_invoke() {
        let mut vm = Vm::new();
        vm.register_function("double", ValueRef::NULL, prim_double)
            .unwrap();

        let n = vm.number(21.0).unwrap();
        vm.push_data(n).unwrap();
        vm.invoke_named("double").unwrap();

        let result = vm.pop_data("test").unwrap();
        assert_eq!(vm.heap().number_value(result), 42.0);
    }

    #[test]
    fn test_reregistration_replaces() {
        extern "C" fn prim_nop(_vm: *mut Vm) -> ValueRef {
            ValueRef::NULL
        }
        let mut vm = Vm::new();
        vm.register_function("f", ValueRef::NULL, prim_nop).unwrap();
        let before = vm.heap().map_length(vm.dictionary());
        vm.register_function("f", ValueRef::NULL, prim_double)
            .unwrap();
        assert_eq!(vm.heap().map_length(vm.dictionary()), before);

        let n = vm.number(2.0).unwrap();
        vm.push_data(n).unwrap();
        vm.invoke_named("f").unwrap();
        let result = vm.pop_data("test").unwrap();
        assert_eq!(vm.heap().number_value(result), 4.0);
    }

    #[test]
    fn test_undefined_name() {
        let mut vm = Vm::new();
        let thrown = vm.invoke_named("no-such-word").unwrap_err();
        let message = vm.heap().exception_message(thrown.0);
        let text = vm.string_contents(message).unwrap();
        assert!(text.contains("no-such-word"));
    }
}
