mod arrays;
mod boxing;
mod maps;
mod strings;

pub use boxing::{BOX_VALUE_KEY, BoxingPrototypes};
pub use maps::MAP_ENTRY_SIZE;

use crate::{Address, Allocator, Heap, MachineError, STATIC_REFCOUNT, VALUE_SIZE, Value};

/// `[refcount]` in front of the NUL-terminated bytes.
pub const STRING_HEADER_SIZE: u32 = 4;
/// `[refcount][length][data]`
pub const ARRAY_OBJECT_SIZE: u32 = 12;
/// `[refcount][first entry][prototype]`
pub const MAP_OBJECT_SIZE: u32 = 12;

/// Resolves a possibly negative element index against `len`.
pub(crate) fn resolve_index(index: i64, len: u32) -> Result<u32, MachineError> {
    let length = i64::from(len);
    let resolved = if index < 0 { length + index } else { index };
    if (0..length).contains(&resolved) {
        Ok(resolved as u32)
    } else {
        Err(MachineError::range(format!(
            "index {index} out of bounds for length {len}"
        )))
    }
}

impl Heap {
    pub fn refcount(&self, object: Address) -> Result<u32, MachineError> {
        self.arena.read_u32(object)
    }

    /// Takes an additional reference to a string, array or map.
    pub fn retain(&mut self, value: Value) -> Result<(), MachineError> {
        let Some(object) = value.heap_object() else {
            return Ok(());
        };
        let count = self.arena.read_u32(object)?;
        if count != STATIC_REFCOUNT {
            self.arena.write_u32(object, count + 1)?;
        }
        Ok(())
    }

    /// Drops a reference. Objects reaching zero release everything they own
    /// and are freed.
    pub fn release(&mut self, value: Value) -> Result<(), MachineError> {
        if !self.drop_reference(value)? {
            return Ok(());
        }
        let mut dead = vec![value];
        while let Some(object) = dead.pop() {
            for child in self.destroy(object)? {
                if self.drop_reference(child)? {
                    dead.push(child);
                }
            }
        }
        Ok(())
    }

    pub fn release_all(&mut self, values: &[Value]) -> Result<(), MachineError> {
        for value in values {
            self.release(*value)?;
        }
        Ok(())
    }

    /// Returns `true` once the last reference is gone.
    fn drop_reference(&mut self, value: Value) -> Result<bool, MachineError> {
        let Some(object) = value.heap_object() else {
            return Ok(false);
        };
        match self.arena.read_u32(object)? {
            STATIC_REFCOUNT => Ok(false),
            0 => Err(MachineError::control(format!(
                "release of dead {} at {object}",
                value.kind()
            ))),
            count => {
                self.arena.write_u32(object, count - 1)?;
                Ok(count == 1)
            }
        }
    }

    /// Frees a dead object and hands back the references it held.
    fn destroy(&mut self, value: Value) -> Result<Vec<Value>, MachineError> {
        match value {
            Value::String(string) => {
                self.free(string)?;
                Ok(Vec::new())
            }
            Value::Array(array) => {
                let owned = self.array_elements(array)?;
                let data = self.arena.read_address(array.add(8))?;
                self.free(data)?;
                self.free(array)?;
                Ok(owned)
            }
            Value::Map(map) => {
                let mut owned = Vec::new();
                let mut entry = self.arena.read_address(map.add(4))?;
                while !entry.is_null() {
                    let name = self.arena.read_address(entry)?;
                    owned.push(self.arena.read_value(entry.add(4))?);
                    let next = self.arena.read_address(entry.add(4 + VALUE_SIZE))?;
                    self.free(name)?;
                    self.free(entry)?;
                    entry = next;
                }
                let prototype = self.arena.read_address(map.add(8))?;
                if !prototype.is_null() {
                    owned.push(Value::Map(prototype));
                }
                self.free(map)?;
                Ok(owned)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Text form used by string conversion and string comparison.
    pub fn display_bytes(&self, value: Value) -> Result<Vec<u8>, MachineError> {
        match value {
            Value::Int(i) => Ok(i.to_string().into_bytes()),
            Value::UInt(u) => Ok(u.to_string().into_bytes()),
            Value::Float(f) => Ok(format!("{f:.6}").into_bytes()),
            Value::String(s) => Ok(self.string_bytes(s)?.to_vec()),
            Value::Empty => Ok(Vec::new()),
            Value::Map(_) => Ok(b"(map)".to_vec()),
            other => Err(MachineError::type_error(format!(
                "can't convert {} to string",
                other.kind()
            ))),
        }
    }

    /// Equality as seen by `eq`/`ne`. Does not consume either operand.
    pub fn values_equal(&self, a: Value, b: Value) -> Result<bool, MachineError> {
        match (a, b) {
            (Value::String(x), Value::String(y)) => {
                Ok(x == y || self.string_bytes(x)? == self.string_bytes(y)?)
            }
            (Value::String(s), other) | (other, Value::String(s)) => {
                Ok(self.string_bytes(s)? == self.display_bytes(other)?.as_slice())
            }
            (Value::Array(x), Value::Array(y)) => {
                if x == y {
                    return Ok(true);
                }
                let left = self.array_elements(x)?;
                let right = self.array_elements(y)?;
                if left.len() != right.len() {
                    return Ok(false);
                }
                for (l, r) in left.into_iter().zip(right) {
                    if !self.values_equal(l, r)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (Value::Empty, other) | (other, Value::Empty) => Ok(other == Value::Empty),
            (Value::Map(x), Value::Map(y)) | (Value::Ref(x), Value::Ref(y)) => Ok(x == y),
            (x, y) if x.number().is_some() && y.number().is_some() => {
                Ok(x.compare_numeric(&y)? == Some(std::cmp::Ordering::Equal))
            }
            (x, y) => Err(MachineError::type_error(format!(
                "equality has not been defined for {} and {}",
                x.kind(),
                y.kind()
            ))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{ErrorKind, HeapSettings, PAGE_SIZE};

    pub(crate) fn create_test_heap() -> Heap {
        Heap::new(HeapSettings {
            arena_size: 64 * PAGE_SIZE,
        })
        .expect("create heap")
    }

    #[test]
    fn resolve_index_counts_negative_indices_from_the_end() {
        assert_eq!(resolve_index(-1, 4).unwrap(), 3);
        assert_eq!(resolve_index(-4, 4).unwrap(), 0);
        assert_eq!(resolve_index(3, 4).unwrap(), 3);
        assert_eq!(resolve_index(-5, 4).unwrap_err().kind, ErrorKind::Range);
        assert_eq!(resolve_index(4, 4).unwrap_err().kind, ErrorKind::Range);
        assert!(resolve_index(0, 0).is_err());
    }

    #[test]
    fn retain_then_release_leaves_refcount_unchanged() {
        let mut heap = create_test_heap();
        let string = heap.new_string(b"kept").unwrap();
        let Value::String(address) = string else {
            unreachable!()
        };

        heap.retain(string).unwrap();
        heap.release(string).unwrap();
        assert_eq!(heap.refcount(address).unwrap(), 1);
        assert_eq!(heap.string_bytes(address).unwrap(), b"kept");
    }

    #[test]
    fn n_retains_and_n_plus_one_releases_free_exactly_once() {
        let mut heap = create_test_heap();
        let blocks_before = heap.live_blocks();
        let array = heap.new_array(&[Value::Int(1), Value::Int(2)]).unwrap();

        for _ in 0..5 {
            heap.retain(array).unwrap();
        }
        for _ in 0..5 {
            heap.release(array).unwrap();
            assert!(heap.live_blocks() > blocks_before);
        }
        heap.release(array).unwrap();
        assert_eq!(heap.live_blocks(), blocks_before);

        // the object is gone now, another release is caught
        assert!(heap.release(array).is_err());
    }

    #[test]
    fn static_objects_are_never_freed() {
        let mut heap = create_test_heap();
        let address = heap.allocate_string(b"constant", STATIC_REFCOUNT).unwrap();
        let string = Value::String(address);
        for _ in 0..3 {
            heap.release(string).unwrap();
        }
        heap.retain(string).unwrap();
        assert_eq!(heap.refcount(address).unwrap(), STATIC_REFCOUNT);
    }

    #[test]
    fn releasing_a_container_releases_its_children() {
        let mut heap = create_test_heap();
        let blocks_before = heap.live_blocks();

        let inner = heap.new_string(b"child").unwrap();
        let shared = heap.new_string(b"shared").unwrap();
        heap.retain(shared).unwrap();
        let array = heap.new_array(&[inner, shared]).unwrap();
        let map = heap.new_map().unwrap();
        let Value::Map(map_address) = map else { unreachable!() };
        heap.map_set(map_address, b"items", array).unwrap();

        heap.release(map).unwrap();

        // only our own reference to `shared` survives
        let Value::String(shared_address) = shared else { unreachable!() };
        assert_eq!(heap.refcount(shared_address).unwrap(), 1);
        heap.release(shared).unwrap();
        assert_eq!(heap.live_blocks(), blocks_before);
    }

    #[test]
    fn deeply_nested_arrays_release_without_recursion() {
        let mut heap = create_test_heap();
        let blocks_before = heap.live_blocks();
        let mut value = Value::Empty;
        for _ in 0..2000 {
            value = heap.new_array(&[value]).unwrap();
        }
        heap.release(value).unwrap();
        assert_eq!(heap.live_blocks(), blocks_before);
    }

    #[test]
    fn display_bytes_formats_primitives() {
        let heap = create_test_heap();
        assert_eq!(heap.display_bytes(Value::Int(-12)).unwrap(), b"-12");
        assert_eq!(heap.display_bytes(Value::UInt(7)).unwrap(), b"7");
        assert_eq!(heap.display_bytes(Value::Float(1.5)).unwrap(), b"1.500000");
        assert_eq!(heap.display_bytes(Value::Empty).unwrap(), b"");
        assert!(heap.display_bytes(Value::Ref(Address::new(8))).is_err());
    }

    #[test]
    fn equality_rules() {
        let mut heap = create_test_heap();
        let seven = heap.new_string(b"7").unwrap();
        let a = heap.new_array(&[Value::Int(1), Value::UInt(2)]).unwrap();
        let b = heap.new_array(&[Value::UInt(1), Value::Float(2.0)]).unwrap();
        let c = heap.new_array(&[Value::Int(1)]).unwrap();

        assert!(heap.values_equal(Value::Int(1), Value::Float(1.0)).unwrap());
        assert!(heap.values_equal(seven, Value::UInt(7)).unwrap());
        assert!(heap.values_equal(a, b).unwrap());
        assert!(!heap.values_equal(a, c).unwrap());
        assert!(heap.values_equal(Value::Empty, Value::Empty).unwrap());
        assert!(!heap.values_equal(Value::Empty, Value::Int(0)).unwrap());
        assert!(heap.values_equal(Value::Map(Address::new(16)), Value::Int(0)).is_err());
    }
}
