use std::io::{self, Write};

use super::value::*;

// =============================================================================
// Heap - Semi-space arena over linear memory
// =============================================================================
//
// Two equally sized spaces, each a linear buffer of 64-bit words. Allocation
// bumps a pointer in the active space; the collector evacuates live cells
// into the inactive space and the roles flip. Word 0 of every space is
// reserved so that offset 0 can serve as the null reference.

/// Initial size of each space in words (256 KiB per space).
pub const INITIAL_SPACE_WORDS: usize = 32 * 1024;

/// The garbage-collected heap: two semi-spaces of linear memory.
pub struct Heap {
    /// The two spaces; `active` indexes the one allocation happens in.
    spaces: [Vec<u64>; 2],
    /// Index of the active (from) space.
    active: usize,
    /// Next free word offset in the active space.
    free: usize,
    /// Hard limit on the size of one space in words (None = unlimited).
    limit_words: Option<usize>,
}

impl Heap {
    /// Create a heap with the given per-space size in words.
    pub fn new(space_words: usize) -> Self {
        Self::with_limit(space_words, None)
    }

    /// Create a heap with a per-space size and an optional growth limit.
    pub fn with_limit(space_words: usize, limit_words: Option<usize>) -> Self {
        let space_words = space_words.next_power_of_two().max(256);
        Self {
            spaces: [vec![0; space_words], vec![0; space_words]],
            active: 0,
            free: 1, // word 0 is the reserved null slot
            limit_words,
        }
    }

    /// Size of one space in words.
    pub fn space_words(&self) -> usize {
        self.spaces[self.active].len()
    }

    /// Number of words currently allocated in the active space.
    pub fn used_words(&self) -> usize {
        self.free - 1
    }

    /// Number of words still available in the active space.
    pub fn available_words(&self) -> usize {
        self.space_words() - self.free
    }

    /// The growth limit in words per space, if any.
    pub(crate) fn limit_words(&self) -> Option<usize> {
        self.limit_words
    }

    /// Bump-allocate a zero-filled cell of `words` words in the active space.
    ///
    /// Returns the cell's word offset, or `None` if the space is exhausted.
    /// The caller must initialize all variant fields before the next
    /// allocation, because the next allocation may move the cell.
    pub(crate) fn try_allocate(&mut self, words: usize) -> Option<usize> {
        debug_assert!(words >= HEADER_WORDS);
        if self.free + words > self.space_words() {
            return None;
        }
        let offset = self.free;
        self.free += words;
        // The space is recycled between collections, so wipe old garbage.
        self.spaces[self.active][offset..offset + words].fill(0);
        Some(offset)
    }

    // -------------------------------------------------------------------------
    // Collector plumbing
    // -------------------------------------------------------------------------

    /// Split borrow of (from, to) space for an evacuation pass.
    pub(crate) fn spaces_split(&mut self) -> (&mut [u64], &mut [u64]) {
        let [a, b] = &mut self.spaces;
        if self.active == 0 { (a, b) } else { (b, a) }
    }

    /// Flip the space roles after an evacuation pass.
    pub(crate) fn flip(&mut self, new_free: usize) {
        self.active ^= 1;
        self.free = new_free;
    }

    /// Read a word of the inactive space (old cells after a flip).
    pub(crate) fn inactive_word(&self, index: usize) -> u64 {
        self.spaces[self.active ^ 1][index]
    }

    /// Replace the inactive space with a fresh zeroed one of `words` words.
    pub(crate) fn replace_inactive(&mut self, words: usize) {
        self.spaces[self.active ^ 1] = vec![0; words];
    }

    // -------------------------------------------------------------------------
    // Raw cell access
    // -------------------------------------------------------------------------

    pub(crate) fn word(&self, index: usize) -> u64 {
        self.spaces[self.active][index]
    }

    pub(crate) fn set_word(&mut self, index: usize, value: u64) {
        self.spaces[self.active][index] = value;
    }

    fn byte_slice(&self, first_word: usize, len: u64) -> &[u8] {
        let words = &self.spaces[self.active][first_word..first_word + words_for_bytes(len)];
        // Trailing byte payloads are written through this same view, so reads
        // observe exactly the stored bytes regardless of word endianness.
        unsafe { std::slice::from_raw_parts(words.as_ptr().cast::<u8>(), len as usize) }
    }

    /// Copy a byte payload into a cell's trailing words.
    pub(crate) fn write_bytes(&mut self, first_word: usize, bytes: &[u8]) {
        let words =
            &mut self.spaces[self.active][first_word..first_word + words_for_bytes(bytes.len() as u64)];
        let view =
            unsafe { std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>(), bytes.len()) };
        view.copy_from_slice(bytes);
    }

    // -------------------------------------------------------------------------
    // Typed cell accessors
    // -------------------------------------------------------------------------

    /// The type of a non-null value.
    pub fn type_of(&self, r: ValueRef) -> ValueType {
        debug_assert!(!r.is_null());
        ValueType::from_word(self.word(r.word() + TYPE_WORD)).expect("invalid type tag in heap cell")
    }

    /// The textual type of a value; the null reference is the empty list.
    pub fn type_name_of(&self, r: ValueRef) -> &'static str {
        if r.is_null() {
            ValueType::List.name()
        } else {
            self.type_of(r).name()
        }
    }

    pub fn list_length(&self, r: ValueRef) -> u64 {
        if r.is_null() { 0 } else { self.word(r.word() + LIST_LENGTH) }
    }

    pub fn list_head(&self, r: ValueRef) -> ValueRef {
        ValueRef(self.word(r.word() + LIST_HEAD))
    }

    pub fn list_tail(&self, r: ValueRef) -> ValueRef {
        ValueRef(self.word(r.word() + LIST_TAIL))
    }

    pub fn string_length(&self, r: ValueRef) -> u64 {
        self.word(r.word() + STRING_LENGTH)
    }

    /// The byte payload of a symbol or string value.
    pub fn string_bytes(&self, r: ValueRef) -> &[u8] {
        debug_assert!(matches!(
            self.type_of(r),
            ValueType::Symbol | ValueType::String
        ));
        let len = self.string_length(r);
        self.byte_slice(r.word() + STRING_BYTES, len)
    }

    pub fn number_value(&self, r: ValueRef) -> f64 {
        f64::from_bits(self.word(r.word() + NUMBER_BITS))
    }

    pub fn boolean_value(&self, r: ValueRef) -> bool {
        self.word(r.word() + BOOLEAN_BIT) != 0
    }

    pub fn map_length(&self, r: ValueRef) -> u64 {
        self.word(r.word() + MAP_LENGTH)
    }

    pub fn map_capacity(&self, r: ValueRef) -> u64 {
        self.word(r.word() + MAP_CAPACITY)
    }

    pub fn map_bucket(&self, r: ValueRef, index: u64) -> ValueRef {
        debug_assert!(index < self.map_capacity(r));
        ValueRef(self.word(r.word() + MAP_BUCKETS + index as usize))
    }

    pub(crate) fn set_map_bucket(&mut self, r: ValueRef, index: u64, bucket: ValueRef) {
        debug_assert!(index < self.map_capacity(r));
        self.set_word(r.word() + MAP_BUCKETS + index as usize, bucket.0);
    }

    pub(crate) fn set_map_length(&mut self, r: ValueRef, length: u64) {
        self.set_word(r.word() + MAP_LENGTH, length);
    }

    pub fn function_library(&self, r: ValueRef) -> ValueRef {
        ValueRef(self.word(r.word() + FUNCTION_LIBRARY))
    }

    pub(crate) fn function_pointer_bits(&self, r: ValueRef) -> u64 {
        self.word(r.word() + FUNCTION_POINTER)
    }

    pub(crate) fn library_handle_id(&self, r: ValueRef) -> u64 {
        self.word(r.word() + LIBRARY_HANDLE)
    }

    /// The name bytes of a library value.
    pub fn library_name_bytes(&self, r: ValueRef) -> &[u8] {
        let len = self.word(r.word() + LIBRARY_LENGTH);
        self.byte_slice(r.word() + LIBRARY_BYTES, len)
    }

    pub fn vector_length(&self, r: ValueRef) -> u64 {
        self.word(r.word() + VECTOR_LENGTH)
    }

    pub fn vector_element(&self, r: ValueRef, index: u64) -> ValueRef {
        debug_assert!(index < self.vector_length(r));
        ValueRef(self.word(r.word() + VECTOR_ELEMENTS + index as usize))
    }

    pub(crate) fn set_vector_element(&mut self, r: ValueRef, index: u64, value: ValueRef) {
        debug_assert!(index < self.vector_length(r));
        self.set_word(r.word() + VECTOR_ELEMENTS + index as usize, value.0);
    }

    pub fn exception_cause(&self, r: ValueRef) -> ValueRef {
        ValueRef(self.word(r.word() + EXCEPTION_CAUSE))
    }

    pub fn exception_message(&self, r: ValueRef) -> ValueRef {
        ValueRef(self.word(r.word() + EXCEPTION_MESSAGE))
    }

    /// The length of a string, symbol, list, map or vector value.
    pub fn value_length(&self, r: ValueRef) -> u64 {
        if r.is_null() {
            return 0;
        }
        match self.type_of(r) {
            ValueType::Symbol | ValueType::String => self.string_length(r),
            ValueType::List => self.list_length(r),
            ValueType::Map => self.map_length(r),
            ValueType::Vector => self.vector_length(r),
            ValueType::Library => self.word(r.word() + LIBRARY_LENGTH),
            _ => 0,
        }
    }

    /// Total number of words occupied by a cell.
    pub(crate) fn cell_words(&self, r: ValueRef) -> usize {
        cell_words_in(&self.spaces[self.active], r.word())
    }

    /// The exact number of bytes a collection copy of this value moves.
    pub fn byte_size(&self, r: ValueRef) -> u64 {
        (self.cell_words(r) * 8) as u64
    }

    // -------------------------------------------------------------------------
    // Content hashing
    // -------------------------------------------------------------------------

    /// The lazily cached content hash of a value.
    ///
    /// Hashing never allocates; it only fills in each visited cell's cache.
    /// Equal values hash equally, and a computed hash of 0 is stored as 1 so
    /// the sentinel keeps meaning "not yet computed".
    pub fn hash(&mut self, r: ValueRef) -> u64 {
        if r.is_null() {
            return empty_list_hash();
        }
        let cached = self.word(r.word() + HASH_WORD);
        if cached != 0 {
            return cached;
        }
        let vtype = self.type_of(r);
        let mut h = match vtype {
            ValueType::Symbol | ValueType::String => fnv1a(type_seed(vtype), self.string_bytes(r)),
            ValueType::Number => mix(
                type_seed(vtype),
                canonical_number_bits(self.number_value(r)),
            ),
            ValueType::Boolean => boolean_hash(self.boolean_value(r)),
            ValueType::List => {
                let mut h = type_seed(vtype);
                let mut cursor = r;
                while !cursor.is_null() {
                    let head = self.list_head(cursor);
                    h = mix(h, self.hash(head));
                    cursor = self.list_tail(cursor);
                }
                h
            }
            ValueType::Vector => {
                let mut h = type_seed(vtype);
                for i in 0..self.vector_length(r) {
                    let element = self.vector_element(r, i);
                    h = mix(h, self.hash(element));
                }
                h
            }
            ValueType::Map => {
                // Order-insensitive fold so equal maps hash equally no matter
                // how their buckets are laid out.
                let mut total = 0u64;
                for i in 0..self.map_capacity(r) {
                    let mut cursor = self.map_bucket(r, i);
                    while !cursor.is_null() {
                        let key = self.list_head(cursor);
                        let rest = self.list_tail(cursor);
                        let value = self.list_head(rest);
                        let kh = self.hash(key);
                        let vh = self.hash(value);
                        total ^= mix(kh, vh);
                        cursor = self.list_tail(rest);
                    }
                }
                mix(type_seed(vtype), total)
            }
            ValueType::Function => {
                let bits = self.function_pointer_bits(r);
                let library = self.function_library(r);
                let lh = self.hash(library);
                mix(type_seed(vtype), mix(bits, lh))
            }
            ValueType::Library => mix(type_seed(vtype), self.library_handle_id(r)),
            ValueType::Exception => {
                let cause = self.exception_cause(r);
                let message = self.exception_message(r);
                let ch = self.hash(cause);
                let mh = self.hash(message);
                mix(type_seed(vtype), mix(ch, mh))
            }
        };
        if h == 0 {
            h = 1;
        }
        self.set_word(r.word() + HASH_WORD, h);
        h
    }

    // -------------------------------------------------------------------------
    // Structural equality
    // -------------------------------------------------------------------------

    /// Structural equality.
    ///
    /// Short-circuits on reference identity and type mismatch. NaN equals NaN
    /// and negative zero equals positive zero, so numbers stay usable as map
    /// keys. Maps compare as sets of entries.
    pub fn equals(&mut self, a: ValueRef, b: ValueRef) -> bool {
        if a == b {
            return true;
        }
        if a.is_null() || b.is_null() {
            return false;
        }
        let vtype = self.type_of(a);
        if vtype != self.type_of(b) {
            return false;
        }
        match vtype {
            ValueType::Symbol | ValueType::String => self.string_bytes(a) == self.string_bytes(b),
            ValueType::Number => {
                canonical_number_bits(self.number_value(a))
                    == canonical_number_bits(self.number_value(b))
            }
            ValueType::Boolean => self.boolean_value(a) == self.boolean_value(b),
            ValueType::List => {
                if self.list_length(a) != self.list_length(b) {
                    return false;
                }
                let (mut ca, mut cb) = (a, b);
                while !ca.is_null() {
                    let (ha, hb) = (self.list_head(ca), self.list_head(cb));
                    if !self.equals(ha, hb) {
                        return false;
                    }
                    ca = self.list_tail(ca);
                    cb = self.list_tail(cb);
                }
                true
            }
            ValueType::Vector => {
                let len = self.vector_length(a);
                if len != self.vector_length(b) {
                    return false;
                }
                for i in 0..len {
                    let (ea, eb) = (self.vector_element(a, i), self.vector_element(b, i));
                    if !self.equals(ea, eb) {
                        return false;
                    }
                }
                true
            }
            ValueType::Map => {
                self.map_length(a) == self.map_length(b) && self.map_entries_subset(a, b)
            }
            ValueType::Function => {
                if self.function_pointer_bits(a) != self.function_pointer_bits(b) {
                    return false;
                }
                let (la, lb) = (self.function_library(a), self.function_library(b));
                self.equals(la, lb)
            }
            ValueType::Library => self.library_handle_id(a) == self.library_handle_id(b),
            ValueType::Exception => {
                let (ca, cb) = (self.exception_cause(a), self.exception_cause(b));
                if !self.equals(ca, cb) {
                    return false;
                }
                let (ma, mb) = (self.exception_message(a), self.exception_message(b));
                self.equals(ma, mb)
            }
        }
    }

    /// Look up a key in a map, comparing keys with [`Heap::equals`].
    pub(crate) fn map_lookup(&mut self, map: ValueRef, key: ValueRef) -> Option<ValueRef> {
        let capacity = self.map_capacity(map);
        let index = self.hash(key) % capacity;
        let mut cursor = self.map_bucket(map, index);
        while !cursor.is_null() {
            let k = self.list_head(cursor);
            let rest = self.list_tail(cursor);
            if self.equals(k, key) {
                return Some(self.list_head(rest));
            }
            cursor = self.list_tail(rest);
        }
        None
    }

    /// Whether every entry of `subset` is present in `superset` with an
    /// equal value.
    pub(crate) fn map_entries_subset(&mut self, superset: ValueRef, subset: ValueRef) -> bool {
        for i in 0..self.map_capacity(subset) {
            let mut cursor = self.map_bucket(subset, i);
            while !cursor.is_null() {
                let key = self.list_head(cursor);
                let rest = self.list_tail(cursor);
                let value = self.list_head(rest);
                match self.map_lookup(superset, key) {
                    Some(found) if self.equals(found, value) => {}
                    _ => return false,
                }
                cursor = self.list_tail(rest);
            }
        }
        true
    }

    // -------------------------------------------------------------------------
    // Textual rendering
    // -------------------------------------------------------------------------

    /// Render a human-readable representation of a value.
    pub fn show(&self, r: ValueRef) -> String {
        let mut out = String::new();
        self.render(&mut out, r);
        out
    }

    /// Write the representation of a value into a stream.
    pub fn dump<W: Write>(&self, stream: &mut W, r: ValueRef) -> io::Result<()> {
        stream.write_all(self.show(r).as_bytes())
    }

    fn render(&self, out: &mut String, r: ValueRef) {
        use std::fmt::Write as _;
        if r.is_null() {
            out.push_str("[]");
            return;
        }
        match self.type_of(r) {
            ValueType::Symbol => {
                out.push_str(&String::from_utf8_lossy(self.string_bytes(r)));
            }
            ValueType::String => {
                out.push('"');
                escape_bytes_into(out, self.string_bytes(r));
                out.push('"');
            }
            ValueType::Number => {
                let _ = write!(out, "{}", self.number_value(r));
            }
            ValueType::Boolean => {
                out.push_str(if self.boolean_value(r) { "true" } else { "false" });
            }
            ValueType::List => {
                out.push('[');
                let mut cursor = r;
                while !cursor.is_null() {
                    self.render(out, self.list_head(cursor));
                    cursor = self.list_tail(cursor);
                    if !cursor.is_null() {
                        out.push(' ');
                    }
                }
                out.push(']');
            }
            ValueType::Map => {
                out.push('{');
                let mut first = true;
                for i in 0..self.map_capacity(r) {
                    let mut cursor = self.map_bucket(r, i);
                    while !cursor.is_null() {
                        if !first {
                            out.push(' ');
                        }
                        first = false;
                        self.render(out, self.list_head(cursor));
                        out.push(' ');
                        let rest = self.list_tail(cursor);
                        self.render(out, self.list_head(rest));
                        cursor = self.list_tail(rest);
                    }
                }
                out.push('}');
            }
            ValueType::Vector => {
                out.push_str("#[");
                for i in 0..self.vector_length(r) {
                    if i > 0 {
                        out.push(' ');
                    }
                    self.render(out, self.vector_element(r, i));
                }
                out.push(']');
            }
            ValueType::Function => out.push_str("<function>"),
            ValueType::Library => {
                out.push_str("<library \"");
                escape_bytes_into(out, self.library_name_bytes(r));
                out.push_str("\">");
            }
            ValueType::Exception => {
                out.push_str("<exception ");
                self.render(out, self.exception_message(r));
                out.push('>');
            }
        }
    }
}

/// Total cell size in words, computed from a raw space slice. Shared with the
/// collector, which reads cells out of both spaces.
pub(crate) fn cell_words_in(space: &[u64], at: usize) -> usize {
    let vtype =
        ValueType::from_word(space[at + TYPE_WORD]).expect("invalid type tag in heap cell");
    let variable = match vtype {
        ValueType::Symbol | ValueType::String => words_for_bytes(space[at + STRING_LENGTH]),
        ValueType::Map => space[at + MAP_CAPACITY] as usize,
        ValueType::Library => words_for_bytes(space[at + LIBRARY_LENGTH]),
        ValueType::Vector => space[at + VECTOR_LENGTH] as usize,
        _ => 0,
    };
    HEADER_WORDS + vtype.fixed_payload_words() + variable
}

fn escape_bytes_into(out: &mut String, mut bytes: &[u8]) {
    use std::fmt::Write as _;
    loop {
        match std::str::from_utf8(bytes) {
            Ok(text) => {
                escape_chars_into(out, text);
                return;
            }
            Err(error) => {
                let (valid, rest) = bytes.split_at(error.valid_up_to());
                // The split point is at a UTF-8 boundary by construction.
                escape_chars_into(out, unsafe { std::str::from_utf8_unchecked(valid) });
                match error.error_len() {
                    Some(invalid) => {
                        for &b in &rest[..invalid] {
                            let _ = write!(out, "\\x{b:02X}");
                        }
                        bytes = &rest[invalid..];
                    }
                    None => {
                        for &b in rest {
                            let _ = write!(out, "\\x{b:02X}");
                        }
                        return;
                    }
                }
            }
        }
    }
}

fn escape_chars_into(out: &mut String, text: &str) {
    use std::fmt::Write as _;
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c if (0x80..=0x9f).contains(&(c as u32)) => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_number(heap: &mut Heap, value: f64) -> ValueRef {
        let words = HEADER_WORDS + ValueType::Number.fixed_payload_words();
        let at = heap.try_allocate(words).unwrap();
        heap.set_word(at + TYPE_WORD, ValueType::Number as u64);
        heap.set_word(at + NUMBER_BITS, value.to_bits());
        ValueRef(at as u64)
    }

    fn raw_string(heap: &mut Heap, vtype: ValueType, bytes: &[u8]) -> ValueRef {
        let words = HEADER_WORDS
            + vtype.fixed_payload_words()
            + words_for_bytes(bytes.len() as u64);
        let at = heap.try_allocate(words).unwrap();
        heap.set_word(at + TYPE_WORD, vtype as u64);
        heap.set_word(at + STRING_LENGTH, bytes.len() as u64);
        heap.write_bytes(at + STRING_BYTES, bytes);
        ValueRef(at as u64)
    }

    #[test]
    fn test_allocation_is_zero_filled() {
        let mut heap = Heap::new(1024);
        let at = heap.try_allocate(8).unwrap();
        for i in 0..8 {
            assert_eq!(heap.word(at + i), 0);
        }
    }

    #[test]
    fn test_allocation_bumps() {
        let mut heap = Heap::new(1024);
        let a = heap.try_allocate(5).unwrap();
        let b = heap.try_allocate(3).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 6);
        assert_eq!(heap.used_words(), 8);
    }

    #[test]
    fn test_allocation_overflow() {
        let mut heap = Heap::new(256);
        assert_eq!(heap.space_words(), 256);
        assert!(heap.try_allocate(256).is_none());
        assert!(heap.try_allocate(255).is_some());
        assert!(heap.try_allocate(HEADER_WORDS).is_none());
    }

    #[test]
    fn test_string_byte_round_trip() {
        let mut heap = Heap::new(1024);
        let s = raw_string(&mut heap, ValueType::String, b"hello, bowl");
        assert_eq!(heap.string_bytes(s), b"hello, bowl");
        assert_eq!(heap.string_length(s), 11);
        assert_eq!(heap.value_length(s), 11);
    }

    #[test]
    fn test_byte_size_covers_padding() {
        let mut heap = Heap::new(1024);
        let s = raw_string(&mut heap, ValueType::String, b"abc");
        // 3 header words + length word + one padded payload word.
        assert_eq!(heap.byte_size(s), 5 * 8);
    }

    #[test]
    fn test_number_equality_canonical() {
        let mut heap = Heap::new(1024);
        let nan1 = raw_number(&mut heap, f64::NAN);
        let nan2 = raw_number(&mut heap, -f64::NAN);
        let zero = raw_number(&mut heap, 0.0);
        let negzero = raw_number(&mut heap, -0.0);
        assert!(heap.equals(nan1, nan2));
        assert!(heap.equals(zero, negzero));
        assert_eq!(heap.hash(nan1), heap.hash(nan2));
        assert_eq!(heap.hash(zero), heap.hash(negzero));
    }

    #[test]
    fn test_symbol_and_string_do_not_compare() {
        let mut heap = Heap::new(1024);
        let sym = raw_string(&mut heap, ValueType::Symbol, b"name");
        let s = raw_string(&mut heap, ValueType::String, b"name");
        assert!(!heap.equals(sym, s));
    }

    #[test]
    fn test_hash_is_cached() {
        let mut heap = Heap::new(1024);
        let s = raw_string(&mut heap, ValueType::String, b"cache me");
        assert_eq!(heap.word(s.word() + HASH_WORD), 0);
        let h = heap.hash(s);
        assert_ne!(h, 0);
        assert_eq!(heap.word(s.word() + HASH_WORD), h);
        assert_eq!(heap.hash(s), h);
    }

    #[test]
    fn test_show_escapes() {
        let mut heap = Heap::new(1024);
        let s = raw_string(&mut heap, ValueType::String, b"a\"b\\c\nd\te\x01");
        assert_eq!(heap.show(s), "\"a\\\"b\\\\c\\nd\\te\\x01\"");
        let invalid = raw_string(&mut heap, ValueType::String, b"ok\xffok");
        assert_eq!(heap.show(invalid), "\"ok\\xFFok\"");
    }

    #[test]
    fn test_show_scalars() {
        let mut heap = Heap::new(1024);
        let n = raw_number(&mut heap, 42.0);
        assert_eq!(heap.show(n), "42");
        let f = raw_number(&mut heap, 2.5);
        assert_eq!(heap.show(f), "2.5");
        assert_eq!(heap.show(ValueRef::NULL), "[]");
    }
}
