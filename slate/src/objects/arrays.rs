use crate::{Address, Allocator, Heap, MachineError, VALUE_SIZE, Value};

use super::resolve_index;

#[inline]
fn slot(data: Address, index: u32) -> Address {
    data.add(index * VALUE_SIZE)
}

/// Resolves a slice bound; unlike an element index, `len` itself is valid.
fn resolve_bound(bound: i64, len: u32) -> Result<u32, MachineError> {
    let length = i64::from(len);
    let resolved = if bound < 0 { length + bound } else { bound };
    if (0..=length).contains(&resolved) {
        Ok(resolved as u32)
    } else {
        Err(MachineError::range(format!(
            "slice bound {bound} out of range for length {len}"
        )))
    }
}

impl Heap {
    fn array_header(&self, array: Address) -> Result<(u32, Address), MachineError> {
        let len = self.arena.read_u32(array.add(4))?;
        let data = self.arena.read_address(array.add(8))?;
        Ok((len, data))
    }

    fn set_array_header(&mut self, array: Address, len: u32, data: Address) -> Result<(), MachineError> {
        self.arena.write_u32(array.add(4), len)?;
        self.arena.write_address(array.add(8), data)
    }

    /// An array taking ownership of `elements`.
    pub fn new_array(&mut self, elements: &[Value]) -> Result<Value, MachineError> {
        Ok(Value::Array(self.allocate_array(elements)?))
    }

    pub fn array_len(&self, array: Address) -> Result<u32, MachineError> {
        Ok(self.array_header(array)?.0)
    }

    /// The elements as stored, without taking references.
    pub fn array_elements(&self, array: Address) -> Result<Vec<Value>, MachineError> {
        let (len, data) = self.array_header(array)?;
        (0..len).map(|i| self.arena.read_value(slot(data, i))).collect()
    }

    fn retained_elements(&mut self, array: Address) -> Result<Vec<Value>, MachineError> {
        let elements = self.array_elements(array)?;
        for element in &elements {
            self.retain(*element)?;
        }
        Ok(elements)
    }

    /// Resizes the spine to `new_len` slots, filling new ones with `Empty`.
    fn array_resize(&mut self, array: Address, new_len: u32) -> Result<Address, MachineError> {
        let (len, data) = self.array_header(array)?;
        let data = self.realloc(data, new_len as usize * VALUE_SIZE as usize)?;
        for i in len..new_len {
            self.arena.write_value(slot(data, i), Value::Empty)?;
        }
        self.set_array_header(array, new_len, data)?;
        Ok(data)
    }

    /// The element at `index`, with a new reference.
    pub fn array_get(&mut self, array: Address, index: i64) -> Result<Value, MachineError> {
        let (len, data) = self.array_header(array)?;
        let value = self.arena.read_value(slot(data, resolve_index(index, len)?))?;
        self.retain(value)?;
        Ok(value)
    }

    /// Stores `value` (moving its reference) at `index`. Storing past the end
    /// grows the array and fills the gap with `Empty`.
    pub fn array_set(&mut self, array: Address, index: i64, value: Value) -> Result<(), MachineError> {
        let (len, data) = self.array_header(array)?;
        if index < 0 || index < i64::from(len) {
            let at = slot(data, resolve_index(index, len)?);
            let old = self.arena.read_value(at)?;
            self.arena.write_value(at, value)?;
            return self.release(old);
        }
        let grown = u32::try_from(index + 1)
            .map_err(|_| MachineError::range(format!("index {index} is too large")))?;
        let data = self.array_resize(array, grown)?;
        self.arena.write_value(slot(data, grown - 1), value)
    }

    /// Inserts before `index`, shifting later elements right. Inserting at or
    /// past the end behaves like [`Heap::array_set`].
    pub fn array_insert(&mut self, array: Address, index: i64, value: Value) -> Result<(), MachineError> {
        let len = self.array_len(array)?;
        let index = if index < 0 {
            i64::from(resolve_index(index, len)?)
        } else {
            index
        };
        if index >= i64::from(len) {
            return self.array_set(array, index, value);
        }
        let index = index as u32;
        let data = self.array_resize(array, len + 1)?;
        self.arena.copy_within(
            slot(data, index),
            slot(data, index + 1),
            ((len - index) * VALUE_SIZE) as usize,
        )?;
        self.arena.write_value(slot(data, index), value)
    }

    /// Removes the element at `index`, shifting later elements left.
    pub fn array_delete(&mut self, array: Address, index: i64) -> Result<(), MachineError> {
        let (len, data) = self.array_header(array)?;
        let index = resolve_index(index, len)?;
        let removed = self.arena.read_value(slot(data, index))?;
        self.arena.copy_within(
            slot(data, index + 1),
            slot(data, index),
            ((len - index - 1) * VALUE_SIZE) as usize,
        )?;
        let data = self.realloc(data, ((len - 1) * VALUE_SIZE) as usize)?;
        self.set_array_header(array, len - 1, data)?;
        self.release(removed)
    }

    /// Elements `start..end` as a new array.
    pub fn array_slice(&mut self, array: Address, start: i64, end: i64) -> Result<Value, MachineError> {
        let len = self.array_len(array)?;
        let (from, to) = (resolve_bound(start, len)?, resolve_bound(end, len)?);
        if from > to {
            return Err(MachineError::range(format!(
                "slice start {start} lies after its end {end}"
            )));
        }
        let elements = self.array_elements(array)?;
        let slice = &elements[from as usize..to as usize];
        for element in slice {
            self.retain(*element)?;
        }
        self.new_array(slice)
    }

    pub fn array_concat(&mut self, a: Address, b: Address) -> Result<Value, MachineError> {
        let mut elements = self.retained_elements(a)?;
        elements.extend(self.retained_elements(b)?);
        self.new_array(&elements)
    }

    /// A new spine referencing the same elements.
    pub fn array_copy(&mut self, array: Address) -> Result<Value, MachineError> {
        let elements = self.retained_elements(array)?;
        self.new_array(&elements)
    }

    /// Ints from `start` towards `end`, excluding `end`.
    pub fn array_range(&mut self, start: i32, end: i32) -> Result<Value, MachineError> {
        let len = start.abs_diff(end) as usize;
        let step = if start <= end { 1 } else { -1 };
        let array = self.allocate_array_with(len, |i| {
            Value::Int(start.wrapping_add((i as i32).wrapping_mul(step)))
        })?;
        Ok(Value::Array(array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, objects::tests::create_test_heap};

    fn array_of(heap: &mut Heap, values: &[i32]) -> Address {
        let elements: Vec<Value> = values.iter().copied().map(Value::Int).collect();
        match heap.new_array(&elements).unwrap() {
            Value::Array(a) => a,
            _ => unreachable!(),
        }
    }

    fn ints(heap: &Heap, array: Address) -> Vec<Value> {
        heap.array_elements(array).unwrap()
    }

    #[test]
    fn set_past_the_end_fills_with_empty() {
        let mut heap = create_test_heap();
        let array = array_of(&mut heap, &[1, 2]);

        heap.array_set(array, 5, Value::UInt(9)).unwrap();

        assert_eq!(heap.array_len(array).unwrap(), 6);
        let elements = ints(&heap, array);
        assert_eq!(&elements[..2], &[Value::Int(1), Value::Int(2)]);
        assert!(elements[2..5].iter().all(|v| *v == Value::Empty));
        assert_eq!(elements[5], Value::UInt(9));
    }

    #[test]
    fn set_overwrite_releases_the_old_element() {
        let mut heap = create_test_heap();
        let blocks_before = heap.live_blocks();
        let string = heap.new_string(b"old").unwrap();
        let array = match heap.new_array(&[string]).unwrap() {
            Value::Array(a) => a,
            _ => unreachable!(),
        };
        heap.array_set(array, -1, Value::Int(3)).unwrap();
        heap.release(Value::Array(array)).unwrap();
        assert_eq!(heap.live_blocks(), blocks_before);
    }

    #[test]
    fn negative_indexing_on_get() {
        let mut heap = create_test_heap();
        let array = array_of(&mut heap, &[10, 20, 30]);
        assert_eq!(heap.array_get(array, -1).unwrap(), Value::Int(30));
        assert_eq!(heap.array_get(array, -3).unwrap(), Value::Int(10));
        assert_eq!(heap.array_get(array, -4).unwrap_err().kind, ErrorKind::Range);
        assert_eq!(heap.array_get(array, 3).unwrap_err().kind, ErrorKind::Range);
        assert_eq!(heap.array_set(array, -4, Value::Empty).unwrap_err().kind, ErrorKind::Range);
    }

    #[test]
    fn insert_shifts_right() {
        let mut heap = create_test_heap();
        let array = array_of(&mut heap, &[1, 3]);
        heap.array_insert(array, 1, Value::Int(2)).unwrap();
        heap.array_insert(array, 0, Value::Int(0)).unwrap();
        heap.array_insert(array, 6, Value::Int(6)).unwrap();
        let expected = [0, 1, 2, 3]
            .into_iter()
            .map(Value::Int)
            .chain([Value::Empty, Value::Empty, Value::Int(6)])
            .collect::<Vec<_>>();
        assert_eq!(ints(&heap, array), expected);
    }

    #[test]
    fn delete_shifts_left_and_shrinks() {
        let mut heap = create_test_heap();
        let array = array_of(&mut heap, &[1, 2, 3, 4]);
        heap.array_delete(array, 1).unwrap();
        heap.array_delete(array, -1).unwrap();
        assert_eq!(ints(&heap, array), vec![Value::Int(1), Value::Int(3)]);
        assert!(heap.array_delete(array, 2).is_err());
    }

    #[test]
    fn slice_end_is_exclusive_and_accepts_negative_bounds() {
        let mut heap = create_test_heap();
        let array = array_of(&mut heap, &[1, 2, 3, 4, 5]);

        let Value::Array(middle) = heap.array_slice(array, 1, -1).unwrap() else {
            unreachable!()
        };
        assert_eq!(ints(&heap, middle), vec![Value::Int(2), Value::Int(3), Value::Int(4)]);

        let Value::Array(all) = heap.array_slice(array, 0, 5).unwrap() else {
            unreachable!()
        };
        assert_eq!(heap.array_len(all).unwrap(), 5);

        assert!(heap.array_slice(array, 3, 1).is_err());
        assert!(heap.array_slice(array, 0, 6).is_err());
    }

    #[test]
    fn concat_and_copy_retain_shared_elements() {
        let mut heap = create_test_heap();
        let string = heap.new_string(b"shared").unwrap();
        let Value::String(string_address) = string else { unreachable!() };
        let Value::Array(a) = heap.new_array(&[string]).unwrap() else { unreachable!() };
        let b = array_of(&mut heap, &[7]);

        let joined = heap.array_concat(a, b).unwrap();
        let copy = heap.array_copy(a).unwrap();
        assert_eq!(heap.refcount(string_address).unwrap(), 3);

        let Value::Array(joined_address) = joined else { unreachable!() };
        assert_eq!(ints(&heap, joined_address)[1], Value::Int(7));

        heap.release(joined).unwrap();
        heap.release(copy).unwrap();
        assert_eq!(heap.refcount(string_address).unwrap(), 1);
    }

    #[test]
    fn range_steps_towards_end() {
        let mut heap = create_test_heap();
        let Value::Array(up) = heap.array_range(1, 4).unwrap() else { unreachable!() };
        assert_eq!(ints(&heap, up), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let Value::Array(down) = heap.array_range(3, 0).unwrap() else { unreachable!() };
        assert_eq!(ints(&heap, down), vec![Value::Int(3), Value::Int(2), Value::Int(1)]);
        let Value::Array(empty) = heap.array_range(2, 2).unwrap() else { unreachable!() };
        assert_eq!(heap.array_len(empty).unwrap(), 0);
    }

    #[test]
    fn ranges_larger_than_the_arena_are_exhausted() {
        let mut heap = create_test_heap();
        let before = heap.live_blocks();
        let err = heap.array_range(0, i32::MAX).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Exhausted);
        assert_eq!(heap.live_blocks(), before);
    }

    #[test]
    fn failed_data_allocation_frees_the_header() {
        let mut heap = create_test_heap();
        let before = heap.live_blocks();
        // fits a u32 byte count but not the 64 page arena
        let err = heap
            .allocate_array_with(1 << 20, |_| Value::Empty)
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Exhausted);
        assert_eq!(heap.live_blocks(), before);

        let Value::Array(small) = heap.array_range(-2, 1).unwrap() else { unreachable!() };
        assert_eq!(ints(&heap, small), vec![Value::Int(-2), Value::Int(-1), Value::Int(0)]);
    }

    #[test]
    fn storing_at_the_last_u32_index_is_a_range_error() {
        let mut heap = create_test_heap();
        let Value::Array(array) = heap.new_array(&[Value::Int(1)]).unwrap() else { unreachable!() };
        let err = heap.array_set(array, i64::from(u32::MAX), Value::Int(2)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        assert_eq!(heap.array_len(array).unwrap(), 1);
    }
}
