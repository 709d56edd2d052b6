use crate::{Address, Machine, MachineError, VALUE_SIZE, Value, ValueKind, machine::Register};

pub(super) fn ld_int(machine: &mut Machine) -> Result<(), MachineError> {
    let value = machine.fetch_i32()?;
    machine.push(Value::Int(value))
}

pub(super) fn ld_uint(machine: &mut Machine) -> Result<(), MachineError> {
    let value = machine.fetch_u32()?;
    machine.push(Value::UInt(value))
}

pub(super) fn ld_float(machine: &mut Machine) -> Result<(), MachineError> {
    let value = machine.fetch_f32()?;
    machine.push(Value::Float(value))
}

pub(super) fn ld_str(machine: &mut Machine) -> Result<(), MachineError> {
    let string = machine.fetch_code_address()?;
    machine.push(Value::String(string))
}

pub(super) fn ld_empty(machine: &mut Machine) -> Result<(), MachineError> {
    machine.push(Value::Empty)
}

pub(super) fn ld_local(machine: &mut Machine) -> Result<(), MachineError> {
    let index = machine.fetch_i32()?;
    let value = machine.read_slot(machine.local_slot(index)?)?;
    machine.push_copy(value)
}

pub(super) fn ld_lref(machine: &mut Machine) -> Result<(), MachineError> {
    let index = machine.fetch_i32()?;
    let slot = machine.local_slot(index)?;
    machine.push(Value::Ref(slot))
}

pub(super) fn st_local(machine: &mut Machine) -> Result<(), MachineError> {
    let index = machine.fetch_i32()?;
    let slot = machine.local_slot(index)?;
    let value = machine.pop()?;
    machine.store_value(slot, value)
}

pub(super) fn ld_arg(machine: &mut Machine) -> Result<(), MachineError> {
    let index = machine.fetch_i32()?;
    let value = machine.read_slot(machine.arg_slot(index)?)?;
    machine.push_copy(value)
}

pub(super) fn st_arg(machine: &mut Machine) -> Result<(), MachineError> {
    let index = machine.fetch_i32()?;
    let slot = machine.arg_slot(index)?;
    let value = machine.pop()?;
    machine.store_value(slot, value)
}

/// Like `st_arg` with the argument index taken from the stack.
pub(super) fn st_arg_pop(machine: &mut Machine) -> Result<(), MachineError> {
    let index = machine.pop()?.payload() as i32;
    let slot = machine.arg_slot(index)?;
    let value = machine.pop()?;
    machine.store_value(slot, value)
}

pub(super) fn ld_reg(machine: &mut Machine) -> Result<(), MachineError> {
    let register = Register::from_id(machine.fetch_u32()?)?;
    let value = machine.register(register);
    machine.push_copy(value)
}

pub(super) fn st_reg(machine: &mut Machine) -> Result<(), MachineError> {
    let register = Register::from_id(machine.fetch_u32()?)?;
    let value = machine.pop()?;
    machine.set_register(register, value)
}

pub(super) fn ld_stack(machine: &mut Machine) -> Result<(), MachineError> {
    let offset = machine.fetch_i32()?;
    let value = machine.read_slot(machine.stack_relative(offset)?)?;
    machine.push_copy(value)
}

pub(super) fn ld_sref(machine: &mut Machine) -> Result<(), MachineError> {
    let offset = machine.fetch_i32()?;
    let slot = machine.stack_relative(offset)?;
    machine.push(Value::Ref(slot))
}

/// Moves the top value `offset` slots relative to itself.
pub(super) fn st_stack(machine: &mut Machine) -> Result<(), MachineError> {
    let offset = machine.fetch_i32()?;
    if offset == 0 {
        return Ok(());
    }
    let slot = machine.stack_relative(offset)?;
    let value = machine.pop()?;
    machine.store_value(slot, value)
}

/// `st_stack` with the offset on the stack, relative to the value below it.
pub(super) fn st_stack_pop(machine: &mut Machine) -> Result<(), MachineError> {
    let offset = machine.pop()?.payload() as i32;
    if offset == 0 {
        return Ok(());
    }
    let slot = machine.stack_relative(offset)?;
    let value = machine.pop()?;
    machine.store_value(slot, value)
}

pub(super) fn ld_ref(machine: &mut Machine) -> Result<(), MachineError> {
    let address = machine.fetch_code_address()?;
    machine.push(Value::Ref(address))
}

pub(super) fn ld_addr(machine: &mut Machine) -> Result<(), MachineError> {
    let address = Address::new(machine.fetch_u32()?);
    machine.push(Value::Ref(address))
}

pub(super) fn ld_deref(machine: &mut Machine) -> Result<(), MachineError> {
    let address = machine.fetch_code_address()?;
    let value = machine.read_slot(address)?;
    machine.push_copy(value)
}

pub(super) fn deref(machine: &mut Machine) -> Result<(), MachineError> {
    let address = match machine.pop()? {
        Value::Ref(address) => address,
        other => {
            return Err(MachineError::type_error(format!(
                "can't dereference {}",
                other.kind()
            )));
        }
    };
    let value = machine.read_slot(address)?;
    machine.push_copy(value)
}

pub(super) fn st_ref(machine: &mut Machine) -> Result<(), MachineError> {
    let address = machine.fetch_code_address()?;
    let value = machine.pop()?;
    machine.store_value(address, value)
}

pub(super) fn st_addr(machine: &mut Machine) -> Result<(), MachineError> {
    let address = Address::new(machine.fetch_u32()?);
    let value = machine.pop()?;
    machine.store_value(address, value)
}

pub(super) fn pop(machine: &mut Machine) -> Result<(), MachineError> {
    machine.pop_release()
}

/// Drops `-count` values or pushes `count` empties.
pub(super) fn ajs(machine: &mut Machine) -> Result<(), MachineError> {
    let count = machine.fetch_i32()?;
    if count < 0 {
        for _ in 0..count.unsigned_abs() {
            machine.pop_release()?;
        }
    } else {
        for _ in 0..count {
            machine.push(Value::Empty)?;
        }
    }
    Ok(())
}

/// Opens a locals frame: saves `mp` on the stack, points `mp` at it and
/// reserves `count` locals initialised to 0.
pub(super) fn locals_res(machine: &mut Machine) -> Result<(), MachineError> {
    let count = machine.fetch_i32()?;
    if count < 0 {
        return Err(MachineError::control(format!(
            "can't reserve {count} locals"
        )));
    }
    let saved = Address::new(machine.registers.mp);
    machine.push(Value::Ref(saved))?;
    machine.registers.mp = machine.registers.sp;
    for _ in 0..count {
        machine.push(Value::Int(0))?;
    }
    Ok(())
}

/// Closes the frame opened by `locals_res`, dropping everything above the
/// mark and restoring the previous `mp`.
pub(super) fn locals_cleanup(machine: &mut Machine) -> Result<(), MachineError> {
    let mark = machine.check_slot(Address::new(machine.registers.mp))?;
    if machine.registers.sp < mark.raw() {
        return Err(MachineError::control("junk on stack, mark pointer lost"));
    }
    let Value::Ref(previous) = machine.read_slot(mark)? else {
        return Err(MachineError::control("junk on stack, mark pointer lost"));
    };

    let mut dropped = Vec::new();
    while machine.registers.sp > mark.raw() {
        dropped.push(machine.pop()?);
    }
    machine.registers.sp = mark.sub(VALUE_SIZE).raw();
    machine.registers.mp = previous.raw();
    machine.heap.release_all(&dropped)
}

pub(super) fn dup(machine: &mut Machine) -> Result<(), MachineError> {
    let top = machine.peek(0)?;
    machine.push_copy(top)
}

pub(super) fn swp(machine: &mut Machine) -> Result<(), MachineError> {
    let top = machine.peek(0)?;
    let below = machine.peek(1)?;
    machine.set_nth(0, below)?;
    machine.set_nth(1, top)
}

/// Skips the inline value that follows the opcode.
pub(super) fn var(machine: &mut Machine) -> Result<(), MachineError> {
    machine.registers.pc = Address::new(machine.registers.pc).add(VALUE_SIZE - 1).raw();
    Ok(())
}

fn is_kind(machine: &mut Machine, kind: ValueKind) -> Result<(), MachineError> {
    let top = machine.peek(0)?;
    machine.push(Value::from_bool(top.kind() == kind))
}

pub(super) fn is_int(machine: &mut Machine) -> Result<(), MachineError> {
    is_kind(machine, ValueKind::Int)
}

pub(super) fn is_uint(machine: &mut Machine) -> Result<(), MachineError> {
    is_kind(machine, ValueKind::UInt)
}

pub(super) fn is_float(machine: &mut Machine) -> Result<(), MachineError> {
    is_kind(machine, ValueKind::Float)
}

pub(super) fn is_str(machine: &mut Machine) -> Result<(), MachineError> {
    is_kind(machine, ValueKind::String)
}

pub(super) fn is_arr(machine: &mut Machine) -> Result<(), MachineError> {
    is_kind(machine, ValueKind::Array)
}

pub(super) fn is_map(machine: &mut Machine) -> Result<(), MachineError> {
    is_kind(machine, ValueKind::Map)
}

pub(super) fn is_ref(machine: &mut Machine) -> Result<(), MachineError> {
    is_kind(machine, ValueKind::Ref)
}

pub(super) fn is_empty(machine: &mut Machine) -> Result<(), MachineError> {
    is_kind(machine, ValueKind::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MachineCreateInfo, bytecode::Op, BytecodeWriter};

    fn run(code: BytecodeWriter) -> Machine {
        let mut vm = Machine::new(MachineCreateInfo::default()).unwrap();
        let index = vm.load_module("memory", &code.into_module()).unwrap();
        vm.set_entry(index).unwrap();
        while vm.is_running() {
            vm.step().unwrap();
        }
        vm
    }

    #[test]
    fn locals_are_initialised_and_cleaned_up() {
        let mut code = BytecodeWriter::new();
        code.ld_int(99)
            .op_i32(Op::LocalsRes, 2)
            .ld_int(5)
            .op_i32(Op::StLocal, 1)
            .op_i32(Op::LdLocal, 1)
            .op_i32(Op::LdLocal, 0)
            .op(Op::Add)
            .op_u32(Op::StReg, 5)
            .ld_int(123)
            .op(Op::LocalsCleanup)
            .op(Op::Halt);
        let vm = run(code);
        assert_eq!(vm.registers.general[0], Value::Int(5));
        assert_eq!(vm.return_value(), Value::Int(99));
        assert_eq!(vm.registers.mp, vm.stack_base().raw());
    }

    #[test]
    fn ajs_fills_with_empty_and_drops() {
        let mut code = BytecodeWriter::new();
        code.op_i32(Op::Ajs, 3).ld_int(1).op_i32(Op::Ajs, -2).op(Op::Nop);
        let mut vm = Machine::new(MachineCreateInfo::default()).unwrap();
        let index = vm.load_module("ajs", &code.into_module()).unwrap();
        vm.set_entry(index).unwrap();
        for _ in 0..3 {
            vm.step().unwrap();
        }
        assert_eq!(vm.stack_values().unwrap(), vec![Value::Empty, Value::Empty]);
    }

    #[test]
    fn swp_and_dup() {
        let mut code = BytecodeWriter::new();
        code.ld_int(1).ld_int(2).op(Op::Swp).op(Op::Dup).op(Op::Sub).op(Op::Sub).op(Op::Halt);
        // [2, 1] -> [2, 1, 1] -> [2, 0] -> [2]
        let vm = run(code);
        assert_eq!(vm.return_value(), Value::Int(2));
    }

    #[test]
    fn stack_relative_stores_move_the_top_value() {
        let mut code = BytecodeWriter::new();
        code.ld_int(1)
            .ld_int(2)
            .ld_int(3)
            .op_i32(Op::StStack, -2)
            .op_i32(Op::LdStack, -1)
            .op(Op::Halt);
        // [3, 2] then a copy of 3
        let vm = run(code);
        assert_eq!(vm.return_value(), Value::Int(3));
        assert_eq!(vm.depth(), 2);
    }

    #[test]
    fn references_load_and_store_through_deref() {
        let mut code = BytecodeWriter::new();
        let over = code.jump(Op::Jmp);
        let cell = code.offset();
        code.emit_bytes(&[0; 8]);
        code.bind(over);
        code.ld_int(41)
            .op_u32(Op::StRef, cell)
            .op_u32(Op::LdRef, cell)
            .op(Op::Deref)
            .ld_int(1)
            .op(Op::Add)
            .op(Op::Halt);
        let vm = run(code);
        assert_eq!(vm.return_value(), Value::Int(42));
    }

    #[test]
    fn kind_tests_leave_the_operand() {
        let mut code = BytecodeWriter::new();
        code.op(Op::LdEmpty).op(Op::IsEmpty).op(Op::Halt);
        let vm = run(code);
        assert_eq!(vm.return_value(), Value::UInt(1));
        assert_eq!(vm.stack_values().unwrap(), vec![Value::Empty]);
    }

    #[test]
    fn cleanup_without_a_mark_is_an_error() {
        let mut vm = Machine::new(MachineCreateInfo::default()).unwrap();
        vm.push(Value::Int(1)).unwrap();
        let err = locals_cleanup(&mut vm).unwrap_err();
        assert_eq!(err.message, "junk on stack, mark pointer lost");
    }
}
