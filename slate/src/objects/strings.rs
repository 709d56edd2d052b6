use crate::{Address, Allocator, Heap, MachineError, Value, objects::STRING_HEADER_SIZE};

use super::resolve_index;

impl Heap {
    pub fn string_bytes(&self, string: Address) -> Result<&[u8], MachineError> {
        self.arena.read_cstr(string.add(STRING_HEADER_SIZE))
    }

    /// A fresh string holding one reference.
    pub fn new_string(&mut self, bytes: &[u8]) -> Result<Value, MachineError> {
        Ok(Value::String(self.allocate_string(bytes, 1)?))
    }

    pub fn string_len(&self, string: Address) -> Result<u32, MachineError> {
        Ok(self.string_bytes(string)?.len() as u32)
    }

    pub fn string_concat(&mut self, a: Address, b: Address) -> Result<Value, MachineError> {
        let mut bytes = self.string_bytes(a)?.to_vec();
        bytes.extend_from_slice(self.string_bytes(b)?);
        self.new_string(&bytes)
    }

    /// Substring of `count` bytes from `start`. A negative `start` counts from
    /// the end, a negative `count` stops that many bytes before the end.
    /// Anything out of range clamps, possibly to the empty string.
    pub fn string_slice(&mut self, string: Address, start: i64, count: i64) -> Result<Value, MachineError> {
        let bytes = self.string_bytes(string)?;
        let len = bytes.len() as i64;
        let start = if start < 0 { len + start } else { start }.clamp(0, len);
        let end = if count < 0 { len + count } else { start.saturating_add(count) }.clamp(start, len);
        let slice = bytes[start as usize..end as usize].to_vec();
        self.new_string(&slice)
    }

    pub fn string_byte_at(&self, string: Address, index: i64) -> Result<u8, MachineError> {
        let bytes = self.string_bytes(string)?;
        let index = resolve_index(index, bytes.len() as u32)?;
        Ok(bytes[index as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::tests::create_test_heap;

    fn text(heap: &Heap, value: Value) -> Vec<u8> {
        match value {
            Value::String(s) => heap.string_bytes(s).unwrap().to_vec(),
            other => panic!("expected a string, got {other:?}"),
        }
    }

    fn address(value: Value) -> Address {
        match value {
            Value::String(s) => s,
            other => panic!("expected a string, got {other:?}"),
        }
    }

    #[test]
    fn concat_allocates_a_new_string_and_keeps_inputs() {
        let mut heap = create_test_heap();
        let a = heap.new_string(b"foo").unwrap();
        let b = heap.new_string(b"bar").unwrap();
        let joined = heap.string_concat(address(a), address(b)).unwrap();

        assert_eq!(text(&heap, joined), b"foobar");
        assert_eq!(text(&heap, a), b"foo");
        assert_eq!(text(&heap, b), b"bar");
        assert_eq!(heap.refcount(address(joined)).unwrap(), 1);
    }

    #[test]
    fn slice_supports_negative_start_and_count() {
        let mut heap = create_test_heap();
        let s = address(heap.new_string(b"hello world").unwrap());

        let cases: [(i64, i64, &[u8]); 7] = [
            (0, 5, b"hello"),
            (6, 100, b"world"),
            (-5, 3, b"wor"),
            (0, -6, b"hello"),
            (-5, -1, b"worl"),
            (20, 3, b""),
            (8, -6, b""),
        ];
        for (start, count, expected) in cases {
            let slice = heap.string_slice(s, start, count).unwrap();
            assert_eq!(text(&heap, slice), expected, "slice({start}, {count})");
        }
    }

    #[test]
    fn byte_at_uses_negative_indexing() {
        let mut heap = create_test_heap();
        let s = address(heap.new_string(b"abc").unwrap());
        assert_eq!(heap.string_byte_at(s, -1).unwrap(), b'c');
        assert_eq!(heap.string_byte_at(s, -3).unwrap(), b'a');
        assert!(heap.string_byte_at(s, -4).is_err());
        assert!(heap.string_byte_at(s, 3).is_err());
        assert_eq!(heap.string_len(s).unwrap(), 3);
    }
}
