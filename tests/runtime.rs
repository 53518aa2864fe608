//! End-to-end scenarios against the public VM API.

use bowl::{Settings, ValueRef, ValueType, Vm};

/// Build a list of numbers, keeping the spine pinned in `register`.
fn number_list(vm: &mut Vm, register: usize, values: &[f64]) -> ValueRef {
    let mut list = ValueRef::NULL;
    for &value in values.iter().rev() {
        vm.set_register(register, list);
        let n = vm.number(value).unwrap();
        list = vm.list(n, vm.register(register)).unwrap();
    }
    vm.set_register(register, list);
    list
}

#[test]
fn scenario_list_reversal() {
    // Build [1 2 3], reverse, inspect the spine.
    let mut vm = Vm::new();
    vm.push_frame();
    let list = number_list(&mut vm, 0, &[1.0, 2.0, 3.0]);
    assert_eq!(vm.heap().list_length(list), 3);

    let reversed = vm.list_reverse(list).unwrap();
    let heap = vm.heap();
    assert_eq!(heap.number_value(heap.list_head(reversed)), 3.0);
    let tail = heap.list_tail(reversed);
    assert_eq!(heap.number_value(heap.list_head(tail)), 2.0);
    let tail = heap.list_tail(tail);
    assert_eq!(heap.number_value(heap.list_head(tail)), 1.0);
    assert!(heap.list_tail(tail).is_null());
    vm.pop_frame();
}

#[test]
fn scenario_map_updates() {
    // Capacity 4; put a=1, b=2, a=3.
    let mut vm = Vm::new();
    vm.push_frame();
    let map = vm.map(4).unwrap();
    vm.set_register(0, map);

    for (name, value) in [("a", 1.0), ("b", 2.0), ("a", 3.0)] {
        let key = vm.symbol(name.as_bytes()).unwrap();
        vm.set_register(1, key);
        let number = vm.number(value).unwrap();
        let map = vm.map_put(vm.register(0), vm.register(1), number).unwrap();
        vm.set_register(0, map);
    }

    assert_eq!(vm.heap().map_length(vm.register(0)), 2);
    let sentinel = vm.sentinel();
    for (name, expected) in [("a", Some(3.0)), ("b", Some(2.0)), ("c", None)] {
        let key = vm.symbol(name.as_bytes()).unwrap();
        let got = vm.map_get_or_else(vm.register(0), key, sentinel);
        match expected {
            Some(value) => assert_eq!(vm.heap().number_value(got), value),
            None => assert_eq!(got, sentinel),
        }
    }
    vm.pop_frame();
}

extern "C" fn prim_swap_string_for_five(vm: *mut Vm) -> ValueRef {
    let vm = unsafe { &mut *vm };
    let value = match vm.pop_data("swap_string_for_five") {
        Ok(value) => value,
        Err(thrown) => return thrown.0,
    };
    if let Err(thrown) = vm.expect_type("swap_string_for_five", value, ValueType::String) {
        return thrown.0;
    }
    let five = match vm.number(5.0) {
        Ok(five) => five,
        Err(thrown) => return thrown.0,
    };
    match vm.push_data(five) {
        Ok(()) => ValueRef::NULL,
        Err(thrown) => thrown.0,
    }
}

#[test]
fn scenario_datastack_through_primitive() {
    // Push "hello", let a primitive pop it and push 5.0.
    let mut vm = Vm::new();
    vm.register_function("swap", ValueRef::NULL, prim_swap_string_for_five)
        .unwrap();

    let hello = vm.string(b"hello").unwrap();
    vm.push_data(hello).unwrap();

    vm.invoke_named("swap").unwrap();

    assert_eq!(vm.datastack_length(), 1);
    let top = vm.heap().list_head(vm.datastack());
    assert_eq!(vm.heap().number_value(top), 5.0);
}

#[test]
fn scenario_underflow_names_the_primitive() {
    // Invoking a popping primitive on an empty datastack raises an
    // exception whose message contains the primitive's name.
    let mut vm = Vm::new();
    vm.register_function("swap", ValueRef::NULL, prim_swap_string_for_five)
        .unwrap();

    let thrown = vm.invoke_named("swap").unwrap_err();
    let message = vm.heap().exception_message(thrown.0);
    let text = vm.string_contents(message).unwrap();
    assert!(text.contains("swap_string_for_five"), "got: {text}");
}

static MODULE_FINALIZED: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

extern "C" fn module_initialize(vm: *mut Vm, library: ValueRef) -> ValueRef {
    extern "C" fn prim_double(vm: *mut Vm) -> ValueRef {
        let vm = unsafe { &mut *vm };
        let value = match vm.pop_data("double") {
            Ok(value) => value,
            Err(thrown) => return thrown.0,
        };
        if let Err(thrown) = vm.expect_type("double", value, ValueType::Number) {
            return thrown.0;
        }
        let result = match vm.number(vm.heap().number_value(value) * 2.0) {
            Ok(result) => result,
            Err(thrown) => return thrown.0,
        };
        match vm.push_data(result) {
            Ok(()) => ValueRef::NULL,
            Err(thrown) => thrown.0,
        }
    }
    let vm = unsafe { &mut *vm };
    match vm.register_function("double", library, prim_double) {
        Ok(()) => ValueRef::NULL,
        Err(thrown) => thrown.0,
    }
}

extern "C" fn module_finalize(_vm: *mut Vm, _library: ValueRef) -> ValueRef {
    MODULE_FINALIZED.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    ValueRef::NULL
}

#[test]
fn scenario_module_lifecycle() {
    // A module registers 'double'; 21 doubles to 42; once the library
    // becomes unreachable, finalize runs exactly once.
    let mut vm = Vm::new();
    vm.static_library("scenario-module", module_initialize, module_finalize)
        .unwrap();

    let n = vm.number(21.0).unwrap();
    vm.push_data(n).unwrap();
    vm.invoke_named("double").unwrap();
    let result = vm.pop_data("test").unwrap();
    assert_eq!(vm.heap().number_value(result), 42.0);

    // Drop the dictionary binding, the only reference to the library.
    let symbol = vm.symbol(b"double").unwrap();
    let dictionary = vm.dictionary();
    let updated = vm.map_delete(dictionary, symbol).unwrap();
    vm.set_dictionary(updated);

    vm.collect_garbage().unwrap();
    assert_eq!(
        MODULE_FINALIZED.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    vm.collect_garbage().unwrap();
    assert_eq!(
        MODULE_FINALIZED.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[test]
fn property_hash_equals_law() {
    // equals(a, b) implies hash(a) == hash(b), over an assorted pool.
    let mut vm = Vm::new();
    let mut pool = Vec::new();

    for value in [0.0, -0.0, 1.0, 1.5, -1.5, f64::NAN, f64::INFINITY] {
        pool.push(vm.number(value).unwrap());
        pool.push(vm.number(value).unwrap());
    }
    for value in [true, false] {
        pool.push(vm.boolean(value).unwrap());
        pool.push(vm.boolean(value).unwrap());
    }
    for text in ["", "a", "ab", "hello world"] {
        pool.push(vm.string(text.as_bytes()).unwrap());
        pool.push(vm.string(text.as_bytes()).unwrap());
        pool.push(vm.symbol(text.as_bytes()).unwrap());
    }
    pool.push(ValueRef::NULL);
    for seed in 0..4 {
        let mut list = ValueRef::NULL;
        for i in 0..seed {
            let n = vm.number(f64::from(i)).unwrap();
            list = vm.list(n, list).unwrap();
        }
        pool.push(list);
    }

    for &a in &pool {
        for &b in &pool {
            if vm.equals(a, b) {
                assert_eq!(
                    vm.hash_value(a),
                    vm.hash_value(b),
                    "equal values must hash equally: {} / {}",
                    vm.show(a),
                    vm.show(b)
                );
            }
        }
    }
}

#[test]
fn property_map_laws() {
    // Put/get, idempotent put and delete laws over a few dozen numeric keys.
    let mut vm = Vm::new();
    vm.push_frame();
    let map = vm.map(4).unwrap();
    vm.set_register(0, map);

    for i in 0..24 {
        let key = vm.number(f64::from(i)).unwrap();
        vm.set_register(1, key);
        let value = vm.number(f64::from(i * i)).unwrap();
        vm.set_register(2, value);

        // get(put(m, k, v), k) == v
        let with = vm
            .map_put(vm.register(0), vm.register(1), vm.register(2))
            .unwrap();
        vm.set_register(0, with);
        let sentinel = vm.sentinel();
        let got = vm.map_get_or_else(vm.register(0), vm.register(1), sentinel);
        assert!(vm.equals(got, vm.register(2)));

        // A second identical put is structurally equal.
        let again = vm
            .map_put(vm.register(0), vm.register(1), vm.register(2))
            .unwrap();
        let with = vm.register(0);
        assert!(vm.equals(with, again));

        // Delete makes the key absent.
        let without = vm.map_delete(vm.register(0), vm.register(1)).unwrap();
        vm.set_register(2, without);
        let got = vm.map_get_or_else(vm.register(2), vm.register(1), sentinel);
        assert_eq!(got, sentinel);
    }
    vm.pop_frame();
}

#[test]
fn property_merge_disjoint_lengths() {
    // Merging maps with disjoint key sets adds the lengths.
    let mut vm = Vm::new();
    vm.push_frame();

    let a = vm.map(4).unwrap();
    vm.set_register(0, a);
    for i in 0..9 {
        let key = vm.symbol(format!("a{i}").as_bytes()).unwrap();
        vm.set_register(2, key);
        let value = vm.number(f64::from(i)).unwrap();
        let a = vm.map_put(vm.register(0), vm.register(2), value).unwrap();
        vm.set_register(0, a);
    }

    let b = vm.map(4).unwrap();
    vm.set_register(1, b);
    for i in 0..7 {
        let key = vm.symbol(format!("b{i}").as_bytes()).unwrap();
        vm.set_register(2, key);
        let value = vm.number(f64::from(i)).unwrap();
        let b = vm.map_put(vm.register(1), vm.register(2), value).unwrap();
        vm.set_register(1, b);
    }

    let merged = vm.map_merge(vm.register(0), vm.register(1)).unwrap();
    vm.set_register(2, merged);
    assert_eq!(vm.heap().map_length(merged), 16);
    assert!(vm.map_subset_of(vm.register(2), vm.register(0)));
    assert!(vm.map_subset_of(vm.register(2), vm.register(1)));
    vm.pop_frame();
}

#[test]
fn property_reverse_involution() {
    // reverse(reverse(xs)) == xs and the length is preserved.
    let mut vm = Vm::new();
    vm.push_frame();
    let values: Vec<f64> = (0..32).map(f64::from).collect();
    number_list(&mut vm, 0, &values);

    let once = vm.list_reverse(vm.register(0)).unwrap();
    vm.set_register(1, once);
    assert_eq!(vm.heap().list_length(once), 32);

    let twice = vm.list_reverse(vm.register(1)).unwrap();
    let original = vm.register(0);
    assert!(vm.equals(original, twice));
    vm.pop_frame();
}

#[test]
fn property_collection_preserves_and_reclaims() {
    // Reachable data survives a collection structurally intact,
    // abandoned data is reclaimed.
    let mut vm = Vm::new();
    vm.push_frame();
    let values: Vec<f64> = (0..16).map(f64::from).collect();
    number_list(&mut vm, 0, &values);
    let before = vm.show(vm.register(0));
    let live = vm.heap().used_words();

    // Garbage: an abandoned list per iteration.
    for _ in 0..64 {
        vm.set_register(1, ValueRef::NULL);
        number_list(&mut vm, 1, &values);
        vm.set_register(1, ValueRef::NULL);
    }
    assert!(vm.heap().used_words() > live);

    vm.collect_garbage().unwrap();
    assert!(vm.heap().used_words() <= live);
    assert_eq!(vm.show(vm.register(0)), before);
    vm.pop_frame();
}

#[test]
fn property_forwarding_idempotence() {
    // A second collection moves nothing.
    let mut vm = Vm::new();
    vm.push_frame();
    number_list(&mut vm, 0, &[1.0, 2.0, 3.0]);

    vm.collect_garbage().unwrap();
    let first = vm.register(0);
    vm.collect_garbage().unwrap();
    assert_eq!(vm.register(0), first);
    vm.pop_frame();
}

#[test]
fn out_of_heap_surfaces_the_singleton() {
    let mut vm = Vm::with_heap_config(Settings::default(), 512, Some(512), true);
    vm.push_frame();
    let mut raised = None;
    for i in 0..100_000 {
        let n = match vm.number(f64::from(i)) {
            Ok(n) => n,
            Err(thrown) => {
                raised = Some(thrown);
                break;
            }
        };
        match vm.list(n, vm.register(0)) {
            Ok(list) => vm.set_register(0, list),
            Err(thrown) => {
                raised = Some(thrown);
                break;
            }
        }
    }
    let thrown = raised.expect("limited heap never overflowed");
    assert_eq!(thrown.0, vm.out_of_heap());
    vm.pop_frame();
}

#[test]
fn exception_chains_render() {
    let mut vm = Vm::new();
    let inner = vm.format_exception("division by zero");
    vm.push_frame();
    vm.set_register(0, inner.0);
    let outer = vm.rethrow(bowl::Thrown(vm.register(0)), "while evaluating word 'div'");
    assert_eq!(
        vm.show(outer.0),
        "<exception \"while evaluating word 'div'\">"
    );
    let cause = vm.heap().exception_cause(outer.0);
    assert_eq!(vm.show(cause), "<exception \"division by zero\">");
    vm.pop_frame();
}

#[test]
fn rendering_of_composites() {
    let mut vm = Vm::new();
    vm.push_frame();
    number_list(&mut vm, 0, &[1.0, 2.5, 3.0]);
    assert_eq!(vm.show(vm.register(0)), "[1 2.5 3]");

    let t = vm.boolean(true).unwrap();
    let v = vm.vector(t, 3).unwrap();
    assert_eq!(vm.show(v), "#[true true true]");

    let map = vm.map(4).unwrap();
    vm.set_register(1, map);
    let key = vm.symbol(b"answer").unwrap();
    vm.set_register(2, key);
    let value = vm.number(42.0).unwrap();
    let map = vm.map_put(vm.register(1), vm.register(2), value).unwrap();
    assert_eq!(vm.show(map), "{answer 42}");
    vm.pop_frame();
}
