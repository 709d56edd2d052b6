use crate::{Address, Allocator, Machine, MachineError, VALUE_SIZE, Value};

/// Operand stack access. `sp` addresses the top value; an empty stack has
/// `sp` one slot below the base. Every slot access is bounds checked
/// against the stack region.
impl Machine {
    #[must_use]
    pub fn depth(&self) -> usize {
        let top = i64::from(self.registers.sp);
        let base = i64::from(self.stack_base.raw());
        ((top - base) / i64::from(VALUE_SIZE) + 1).max(0) as usize
    }

    pub(crate) fn check_slot(&self, slot: Address) -> Result<Address, MachineError> {
        let aligned = (slot.raw().wrapping_sub(self.stack_base.raw())) % VALUE_SIZE == 0;
        if slot >= self.stack_base && slot < self.stack_end && aligned {
            Ok(slot)
        } else {
            Err(MachineError::control(format!(
                "stack access at {slot} outside the operand stack"
            )))
        }
    }

    /// Address of the `n`th value below the top.
    pub fn slot(&self, n: usize) -> Result<Address, MachineError> {
        if n >= self.depth() {
            return Err(MachineError::control("stack underflow"));
        }
        self.check_slot(Address::new(self.registers.sp).sub(n as u32 * VALUE_SIZE))
    }

    /// The `n`th value below the top, without touching its refcount.
    pub fn peek(&self, n: usize) -> Result<Value, MachineError> {
        let slot = self.slot(n)?;
        self.heap.arena().read_value(slot)
    }

    /// Pushes `value`, moving its reference onto the stack.
    pub fn push(&mut self, value: Value) -> Result<(), MachineError> {
        let next = Address::new(self.registers.sp).add(VALUE_SIZE);
        if next >= self.stack_end {
            return Err(MachineError::control("stack overflow"));
        }
        let next = self.check_slot(next)?;
        self.heap.arena_mut().write_value(next, value)?;
        self.registers.sp = next.raw();
        Ok(())
    }

    /// Pushes another reference to `value`.
    pub fn push_copy(&mut self, value: Value) -> Result<(), MachineError> {
        self.heap.retain(value)?;
        self.push(value)
    }

    /// Pops the top value; the caller takes over its reference.
    pub fn pop(&mut self) -> Result<Value, MachineError> {
        let top = self.slot(0)?;
        let value = self.heap.arena().read_value(top)?;
        self.registers.sp = top.sub(VALUE_SIZE).raw();
        Ok(value)
    }

    pub fn pop_release(&mut self) -> Result<(), MachineError> {
        let value = self.pop()?;
        self.heap.release(value)
    }

    /// Overwrites the `n`th value below the top without releasing it.
    pub fn set_nth(&mut self, n: usize, value: Value) -> Result<(), MachineError> {
        let slot = self.slot(n)?;
        self.heap.arena_mut().write_value(slot, value)
    }

    /// Bottom to top.
    pub fn stack_values(&self) -> Result<Vec<Value>, MachineError> {
        (0..self.depth()).rev().map(|n| self.peek(n)).collect()
    }

    // ── frame addressing ──────────────────────────────────────────

    /// Local `index` of the frame opened by `locals_res`.
    pub(crate) fn local_slot(&self, index: i32) -> Result<Address, MachineError> {
        let mark = Address::new(self.registers.mp);
        self.check_slot(mark.offset(index.wrapping_add(1).wrapping_mul(VALUE_SIZE as i32)))
    }

    /// Argument `index` of the frame opened by `args_accept`.
    pub(crate) fn arg_slot(&self, index: i32) -> Result<Address, MachineError> {
        let first = Address::new(self.registers.ap);
        self.check_slot(first.offset(index.wrapping_mul(VALUE_SIZE as i32)))
    }

    /// A slot relative to the top of stack, in values.
    pub(crate) fn stack_relative(&self, offset: i32) -> Result<Address, MachineError> {
        let top = Address::new(self.registers.sp);
        self.check_slot(top.offset(offset.wrapping_mul(VALUE_SIZE as i32)))
    }

    pub(crate) fn read_slot(&self, address: Address) -> Result<Value, MachineError> {
        self.heap.arena().read_value(address)
    }

    /// Stores `value` at any arena address, dropping whatever was there.
    pub(crate) fn store_value(&mut self, address: Address, value: Value) -> Result<(), MachineError> {
        let old = self.heap.arena().read_value(address)?;
        self.heap.arena_mut().write_value(address, value)?;
        self.heap.release(old)
    }
}
