use crate::vm::heap::cell_words_in;
use crate::vm::value::*;
use crate::vm::vm::{Thrown, Vm, VmResult};

// =============================================================================
// Relocating collector
// =============================================================================
//
// A Cheney two-space copying collector. Roots are the frame chain (registers
// and aliased slots) plus the preallocated singletons. Forwarding uses the
// `location` header word: null means "not yet copied", non-null is the cell's
// address in the destination space. Every copied cell gets its own `location`
// reset to null, so survivors always carry the "not relocated" encoding
// outside a collection.
//
// Library finalization happens between the evacuation and the space flip:
// at that point the dead library cells are still readable through the active
// space, but the surviving object graph is already safe in the destination.

impl Vm {
    /// Explicitly trigger a run of the garbage collector.
    pub fn collect_garbage(&mut self) -> VmResult<()> {
        self.collect(0)
    }

    /// Collect garbage and make room for a pending request of
    /// `required_words`, growing both spaces if the collection leaves
    /// occupancy above the high-water mark or the request still does not
    /// fit.
    pub(crate) fn collect(&mut self, required_words: usize) -> VmResult<()> {
        debug_assert!(!self.collecting, "re-entrant collection");
        self.collecting = true;
        let live_before = self.heap.used_words();

        let new_free = self.run_evacuation();
        let failed = self.finalize_dead_libraries();
        self.heap.flip(new_free);
        self.update_library_cells();

        let used = self.heap.used_words();
        let space = self.heap.space_words();
        let mut target = space;
        while used + required_words + 1 > target || used * 4 > target * 3 {
            target *= 2;
        }
        if let Some(limit) = self.heap.limit_words() {
            target = target.min(limit.max(space));
        }
        if target > space {
            log::debug!("growing heap spaces from {space} to {target} words");
            self.heap.replace_inactive(target);
            let new_free = self.run_evacuation();
            self.heap.flip(new_free);
            self.update_library_cells();
            self.heap.replace_inactive(target);
        }

        self.collections += 1;
        self.collecting = false;
        log::debug!(
            "collection #{}: {} of {} words live",
            self.collections,
            live_before,
            self.heap.used_words()
        );

        if failed {
            Err(Thrown(self.finalization_failure()))
        } else {
            Ok(())
        }
    }

    /// Evacuate all reachable cells into the inactive space. Returns the new
    /// free pointer of the destination; the spaces are not flipped yet.
    fn run_evacuation(&mut self) -> usize {
        let Vm {
            heap,
            frames,
            sentinel,
            out_of_heap,
            finalization_failure,
            ..
        } = self;
        let (src, dst) = heap.spaces_split();
        let mut free = 1usize;

        frames.for_each_root_mut(|slot| forward(src, dst, &mut free, slot));
        forward(src, dst, &mut free, sentinel);
        forward(src, dst, &mut free, out_of_heap);
        forward(src, dst, &mut free, finalization_failure);

        let mut scan = 1usize;
        while scan < free {
            let words = cell_words_in(dst, scan);
            let vtype = ValueType::from_word(dst[scan + TYPE_WORD])
                .expect("invalid type tag in heap cell");
            match vtype {
                ValueType::List => {
                    forward_field(src, dst, &mut free, scan + LIST_HEAD);
                    forward_field(src, dst, &mut free, scan + LIST_TAIL);
                }
                ValueType::Map => {
                    let capacity = dst[scan + MAP_CAPACITY] as usize;
                    for i in 0..capacity {
                        forward_field(src, dst, &mut free, scan + MAP_BUCKETS + i);
                    }
                }
                ValueType::Vector => {
                    let length = dst[scan + VECTOR_LENGTH] as usize;
                    for i in 0..length {
                        forward_field(src, dst, &mut free, scan + VECTOR_ELEMENTS + i);
                    }
                }
                ValueType::Function => {
                    forward_field(src, dst, &mut free, scan + FUNCTION_LIBRARY);
                }
                ValueType::Exception => {
                    forward_field(src, dst, &mut free, scan + EXCEPTION_CAUSE);
                    forward_field(src, dst, &mut free, scan + EXCEPTION_MESSAGE);
                }
                ValueType::Symbol
                | ValueType::String
                | ValueType::Number
                | ValueType::Boolean
                | ValueType::Library => {}
            }
            scan += words;
        }
        free
    }

    /// Invoke `bowl_module_finalize` for every library whose cell did not
    /// survive the evacuation, then close its native handle and drop it from
    /// the registry. Returns whether any finalizer raised.
    fn finalize_dead_libraries(&mut self) -> bool {
        let mut failed = false;
        for id in 0..self.libraries.len() {
            let Some(library) = &self.libraries[id] else {
                continue;
            };
            let old = library.cell.word();
            if self.heap.word(old + LOCATION_WORD) != 0 {
                continue; // forwarded: still reachable
            }
            let library = self.libraries[id].take().expect("library entry vanished");
            self.registry.remove(&library.path);
            log::debug!("finalizing unreachable library '{}'", library.path.display());
            if let Some(finalize) = library.finalize {
                let raised = finalize(self as *mut Vm, library.cell);
                if !raised.is_null() {
                    failed = true;
                }
            }
            drop(library.handle); // closes the native handle
        }
        failed
    }

    /// Point the registry entries of surviving libraries at the relocated
    /// cells. Runs right after a flip, while the old cells are still
    /// readable in the inactive space.
    fn update_library_cells(&mut self) {
        for entry in self.libraries.iter_mut().flatten() {
            let forwarded = self
                .heap
                .inactive_word(entry.cell.word() + LOCATION_WORD);
            debug_assert_ne!(forwarded, 0, "surviving library cell not forwarded");
            entry.cell = ValueRef(forwarded);
        }
    }
}

/// Forward one root slot: copy the referenced cell into the destination
/// space unless it already moved, then overwrite the slot with the new
/// address.
fn forward(src: &mut [u64], dst: &mut [u64], free: &mut usize, slot: &mut ValueRef) {
    if slot.is_null() {
        return;
    }
    let old = slot.word();
    let location = src[old + LOCATION_WORD];
    if location != 0 {
        *slot = ValueRef(location);
        return;
    }
    let words = cell_words_in(src, old);
    let new = *free;
    dst[new..new + words].copy_from_slice(&src[old..old + words]);
    dst[new + LOCATION_WORD] = 0; // the copy has not been relocated
    src[old + LOCATION_WORD] = new as u64;
    *slot = ValueRef(new as u64);
    *free += words;
}

/// Forward a reference field of an already copied cell.
fn forward_field(src: &mut [u64], dst: &mut [u64], free: &mut usize, index: usize) {
    let mut slot = ValueRef(dst[index]);
    forward(src, dst, free, &mut slot);
    dst[index] = slot.0;
}
