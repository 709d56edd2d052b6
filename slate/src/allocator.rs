use crate::{
    Address, Arena, MachineError, VALUE_SIZE, Value,
    objects::{ARRAY_OBJECT_SIZE, MAP_OBJECT_SIZE, STRING_HEADER_SIZE},
};

/// Block allocation over the arena, plus constructors for the heap object
/// layouts built on top of it.
pub trait Allocator {
    fn malloc(&mut self, size: usize) -> Result<Address, MachineError>;

    /// Grows or shrinks a block, preserving its contents up to the smaller size.
    /// A null address behaves like [`Allocator::malloc`].
    fn realloc(&mut self, address: Address, size: usize) -> Result<Address, MachineError>;

    /// Freeing null is a no-op.
    fn free(&mut self, address: Address) -> Result<(), MachineError>;

    fn arena(&self) -> &Arena;

    fn arena_mut(&mut self) -> &mut Arena;

    fn calloc(&mut self, count: usize, size: usize) -> Result<Address, MachineError> {
        let total = count.checked_mul(size).ok_or_else(|| {
            MachineError::exhausted(format!("allocation of {count} x {size} bytes overflows"))
        })?;
        let address = self.malloc(total)?;
        self.arena_mut().fill(address, total, 0)?;
        Ok(address)
    }

    /// `[refcount][bytes][0]`
    fn allocate_string(&mut self, bytes: &[u8], refcount: u32) -> Result<Address, MachineError> {
        let address = self.malloc(STRING_HEADER_SIZE as usize + bytes.len() + 1)?;
        let arena = self.arena_mut();
        arena.write_u32(address, refcount)?;
        let text = address.add(STRING_HEADER_SIZE);
        arena.write_bytes(text, bytes)?;
        arena.write_bytes(text.add(bytes.len() as u32), &[0])?;
        Ok(address)
    }

    /// `[refcount][length][data]`. Ownership of `elements` moves into the array.
    fn allocate_array(&mut self, elements: &[Value]) -> Result<Address, MachineError> {
        self.allocate_array_with(elements.len(), |i| elements[i])
    }

    /// `[refcount][length][data]` holding `len` values produced by `element`.
    /// Both blocks are reserved before any value is produced.
    fn allocate_array_with(
        &mut self,
        len: usize,
        mut element: impl FnMut(usize) -> Value,
    ) -> Result<Address, MachineError> {
        let count = u32::try_from(len)
            .map_err(|_| MachineError::exhausted(format!("array of {len} elements")))?;
        let bytes = len.checked_mul(VALUE_SIZE as usize).ok_or_else(|| {
            MachineError::exhausted(format!("array of {len} elements overflows"))
        })?;

        let address = self.malloc(ARRAY_OBJECT_SIZE as usize)?;
        let data = match self.malloc(bytes) {
            Ok(data) => data,
            Err(err) => {
                self.free(address)?;
                return Err(err);
            }
        };

        let arena = self.arena_mut();
        arena.write_u32(address, 1)?;
        arena.write_u32(address.add(4), count)?;
        arena.write_address(address.add(8), data)?;
        let mut slot = data;
        for i in 0..len {
            arena.write_value(slot, element(i))?;
            slot = slot.add(VALUE_SIZE);
        }
        Ok(address)
    }

    /// `[refcount][first entry][prototype]`. The caller accounts for the
    /// reference to `prototype`.
    fn allocate_map(&mut self, prototype: Address, refcount: u32) -> Result<Address, MachineError> {
        let address = self.malloc(MAP_OBJECT_SIZE as usize)?;
        let arena = self.arena_mut();
        arena.write_u32(address, refcount)?;
        arena.write_address(address.add(4), Address::NULL)?;
        arena.write_address(address.add(8), prototype)?;
        Ok(address)
    }
}
