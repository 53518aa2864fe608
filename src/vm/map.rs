use super::value::*;
use super::vm::{Vm, VmResult};

// =============================================================================
// Persistent map operations
// =============================================================================
//
// Maps are immutable cells: every mutating operation produces a new map cell
// whose untouched buckets are shared by reference with the input. The only
// mutation ever performed is on buckets of a map cell that is still under
// construction and reachable solely through the building frame's registers.
//
// All operations keep their intermediates pinned in frame registers, because
// every list cell they build may trigger a collection.

/// Smallest power-of-two capacity that holds `entries` without exceeding the
/// 0.75 load factor.
fn fitting_capacity(entries: u64) -> u64 {
    let mut capacity = 1;
    while entries * 4 > capacity * 3 {
        capacity <<= 1;
    }
    capacity
}

impl Vm {
    /// Retrieve the value associated with `key`, or `otherwise` when the key
    /// is absent. Pass [`Vm::sentinel`] as the default to detect absence
    /// without ambiguity.
    pub fn map_get_or_else(&mut self, map: ValueRef, key: ValueRef, otherwise: ValueRef) -> ValueRef {
        debug_assert_eq!(self.heap.type_of(map), ValueType::Map);
        self.heap.map_lookup(map, key).unwrap_or(otherwise)
    }

    /// Whether `subset` is a subset of `superset`: every entry of `subset`
    /// is present in `superset` with an equal value.
    pub fn map_subset_of(&mut self, superset: ValueRef, subset: ValueRef) -> bool {
        self.heap.map_length(subset) <= self.heap.map_length(superset)
            && self.heap.map_entries_subset(superset, subset)
    }

    /// Insert `value` at `key`, returning a new map. An existing binding for
    /// an equal key is replaced. Null keys are forbidden.
    ///
    /// The new map's buckets are shared with the input except for the one
    /// holding the key. If the resulting load factor would exceed 0.75, the
    /// map is rebuilt with the next power-of-two capacity at or above twice
    /// the resulting length.
    pub fn map_put(&mut self, map: ValueRef, key: ValueRef, value: ValueRef) -> VmResult {
        debug_assert_eq!(self.heap.type_of(map), ValueType::Map);
        debug_assert!(!key.is_null(), "map keys must not be null");
        self.with_frame(|vm| {
            vm.set_register(0, map);
            vm.set_register(1, key);
            vm.set_register(2, value);
            let exists = vm.heap.map_lookup(map, key).is_some();
            let length = vm.heap.map_length(map);
            let capacity = vm.heap.map_capacity(map);
            let new_length = if exists { length } else { length + 1 };
            if new_length * 4 > capacity * 3 {
                let target = (new_length * 2).next_power_of_two();
                let grown = vm.map_rebuild(vm.register(0), target)?;
                vm.set_register(0, grown);
            }
            vm.map_put_into_pinned(exists)
        })
    }

    /// Remove `key` from the map. When the key is absent the input map is
    /// returned unchanged; otherwise a new map with the same capacity and
    /// one entry less.
    pub fn map_delete(&mut self, map: ValueRef, key: ValueRef) -> VmResult {
        debug_assert_eq!(self.heap.type_of(map), ValueType::Map);
        if self.heap.map_lookup(map, key).is_none() {
            return Ok(map);
        }
        self.with_frame(|vm| {
            vm.set_register(0, map);
            vm.set_register(1, key);
            let capacity = vm.heap.map_capacity(map);
            let length = vm.heap.map_length(map);
            let result = vm.allocate(ValueType::Map, capacity * 8)?;
            let source = vm.register(0);
            let at = result.word();
            vm.heap.set_word(at + MAP_LENGTH, length - 1);
            vm.heap.set_word(at + MAP_CAPACITY, capacity);
            for i in 0..capacity {
                let bucket = vm.heap.map_bucket(source, i);
                vm.heap.set_map_bucket(result, i, bucket);
            }
            vm.set_register(0, result);
            let key = vm.register(1);
            let index = vm.heap.hash(key) % capacity;
            let bucket = vm.heap.map_bucket(result, index);
            let rebuilt = vm.bucket_without_key(bucket, key)?;
            let result = vm.register(0);
            vm.heap.set_map_bucket(result, index, rebuilt);
            Ok(result)
        })
    }

    /// Merge two maps into a new one. Entries of `b` are put over those of
    /// `a`, so on key collisions `b` wins. The result's capacity fits the
    /// combined length without exceeding the load factor.
    pub fn map_merge(&mut self, a: ValueRef, b: ValueRef) -> VmResult {
        debug_assert_eq!(self.heap.type_of(a), ValueType::Map);
        debug_assert_eq!(self.heap.type_of(b), ValueType::Map);
        self.with_frame(|vm| {
            vm.set_register(0, b);
            let total = vm.heap.map_length(a) + vm.heap.map_length(b);
            let capacity = fitting_capacity(total);
            let result = vm.map_rebuild(a, capacity)?;
            vm.set_register(1, result);
            let b_capacity = vm.heap.map_capacity(vm.register(0));
            for i in 0..b_capacity {
                let cursor = vm.heap.map_bucket(vm.register(0), i);
                vm.set_register(2, cursor);
                while !vm.register(2).is_null() {
                    let cursor = vm.register(2);
                    let key = vm.heap.list_head(cursor);
                    let rest = vm.heap.list_tail(cursor);
                    let value = vm.heap.list_head(rest);
                    let updated = vm.map_put(vm.register(1), key, value)?;
                    vm.set_register(1, updated);
                    let cursor = vm.register(2);
                    let rest = vm.heap.list_tail(cursor);
                    vm.set_register(2, vm.heap.list_tail(rest));
                }
            }
            Ok(vm.register(1))
        })
    }

    /// Build a fresh map with the given capacity holding all entries of
    /// `source`. Buckets of the fresh map are filled in place while it is
    /// only reachable through the building frame.
    fn map_rebuild(&mut self, source: ValueRef, capacity: u64) -> VmResult {
        self.with_frame(|vm| {
            vm.set_register(0, source);
            let fresh = vm.map(capacity)?;
            vm.set_register(1, fresh);
            let source_capacity = vm.heap.map_capacity(vm.register(0));
            for i in 0..source_capacity {
                let cursor = vm.heap.map_bucket(vm.register(0), i);
                vm.set_register(2, cursor);
                while !vm.register(2).is_null() {
                    let cursor = vm.register(2);
                    let key = vm.heap.list_head(cursor);
                    let rest = vm.heap.list_tail(cursor);
                    let value = vm.heap.list_head(rest);
                    vm.map_insert_under_construction(key, value)?;
                    let cursor = vm.register(2);
                    let rest = vm.heap.list_tail(cursor);
                    vm.set_register(2, vm.heap.list_tail(rest));
                }
            }
            let fresh = vm.register(1);
            let length = vm.heap.map_length(vm.register(0));
            vm.heap.set_map_length(fresh, length);
            Ok(fresh)
        })
    }

    /// Prepend an entry onto the right bucket of the map under construction,
    /// which is pinned in register 1 of the enclosing frame. Keys are unique
    /// in the source, so no replacement scan is needed.
    fn map_insert_under_construction(&mut self, key: ValueRef, value: ValueRef) -> VmResult<()> {
        self.with_frame(|vm| {
            vm.set_register(0, key);
            vm.set_register(1, value);
            let fresh = vm.frames.register_at(1, 1);
            let capacity = vm.heap.map_capacity(fresh);
            let index = vm.heap.hash(vm.register(0)) % capacity;
            let bucket = vm.heap.map_bucket(fresh, index);
            let with_value = vm.list(vm.register(1), bucket)?;
            let with_key = vm.list(vm.register(0), with_value)?;
            let fresh = vm.frames.register_at(1, 1);
            vm.heap.set_map_bucket(fresh, index, with_key);
            Ok(())
        })
    }

    /// Copy the pinned map (register 0) into a fresh cell and splice the
    /// pinned key/value pair (registers 1 and 2) into its bucket.
    fn map_put_into_pinned(&mut self, exists: bool) -> VmResult {
        let source = self.register(0);
        let capacity = self.heap.map_capacity(source);
        let length = self.heap.map_length(source) + u64::from(!exists);
        let result = self.allocate(ValueType::Map, capacity * 8)?;
        let source = self.register(0);
        let at = result.word();
        self.heap.set_word(at + MAP_LENGTH, length);
        self.heap.set_word(at + MAP_CAPACITY, capacity);
        for i in 0..capacity {
            let bucket = self.heap.map_bucket(source, i);
            self.heap.set_map_bucket(result, i, bucket);
        }
        self.set_register(0, result);
        let key = self.register(1);
        let index = self.heap.hash(key) % capacity;
        if exists {
            let bucket = self.heap.map_bucket(result, index);
            let rebuilt = self.bucket_with_replacement(bucket, self.register(1), self.register(2))?;
            let result = self.register(0);
            self.heap.set_map_bucket(result, index, rebuilt);
        } else {
            let bucket = self.heap.map_bucket(result, index);
            let with_value = self.list(self.register(2), bucket)?;
            let with_key = self.list(self.register(1), with_value)?;
            let result = self.register(0);
            self.heap.set_map_bucket(result, index, with_key);
        }
        Ok(self.register(0))
    }

    /// Rebuild a bucket list with the pair for `key` replaced by
    /// (`key`, `value`). Entries past the replaced pair are shared.
    fn bucket_with_replacement(
        &mut self,
        bucket: ValueRef,
        key: ValueRef,
        value: ValueRef,
    ) -> VmResult {
        if bucket.is_null() {
            return Ok(ValueRef::NULL);
        }
        self.with_frame(|vm| {
            vm.set_register(0, bucket);
            vm.set_register(1, key);
            vm.set_register(2, value);
            let entry_key = vm.heap.list_head(bucket);
            let matched = vm.heap.equals(entry_key, key);
            let after_pair = {
                let rest = vm.heap.list_tail(bucket);
                vm.heap.list_tail(rest)
            };
            let new_rest = if matched {
                after_pair
            } else {
                vm.bucket_with_replacement(after_pair, vm.register(1), vm.register(2))?
            };
            let bucket = vm.register(0);
            let pair_value = if matched {
                vm.register(2)
            } else {
                let rest = vm.heap.list_tail(bucket);
                vm.heap.list_head(rest)
            };
            let with_value = vm.list(pair_value, new_rest)?;
            let bucket = vm.register(0);
            let pair_key = if matched {
                vm.register(1)
            } else {
                vm.heap.list_head(bucket)
            };
            vm.list(pair_key, with_value)
        })
    }

    /// Rebuild a bucket list without the pair for `key`. Entries past the
    /// removed pair are shared.
    fn bucket_without_key(&mut self, bucket: ValueRef, key: ValueRef) -> VmResult {
        if bucket.is_null() {
            return Ok(ValueRef::NULL);
        }
        self.with_frame(|vm| {
            vm.set_register(0, bucket);
            vm.set_register(1, key);
            let entry_key = vm.heap.list_head(bucket);
            let after_pair = {
                let rest = vm.heap.list_tail(bucket);
                vm.heap.list_tail(rest)
            };
            if vm.heap.equals(entry_key, key) {
                return Ok(after_pair);
            }
            let without = vm.bucket_without_key(after_pair, vm.register(1))?;
            let bucket = vm.register(0);
            let value = {
                let rest = vm.heap.list_tail(bucket);
                vm.heap.list_head(rest)
            };
            let with_value = vm.list(value, without)?;
            let bucket = vm.register(0);
            vm.list(vm.heap.list_head(bucket), with_value)
        })
    }
}
