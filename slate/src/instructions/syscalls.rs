use crate::{Machine, MachineError, Value};

/// Pushes the index bound to the operand name, or -1.
pub(super) fn syscall_getindex(machine: &mut Machine) -> Result<(), MachineError> {
    let name = machine.fetch_name()?;
    let index = machine
        .syscalls
        .index_of(&name)
        .map_or(-1, |index| index as i32);
    machine.push(Value::Int(index))
}

pub(super) fn syscall_byname(machine: &mut Machine) -> Result<(), MachineError> {
    let site = machine.instruction.raw();
    let name = machine.fetch_name()?;
    machine.invoke_syscall_by_name(site, &name)
}

pub(super) fn syscall(machine: &mut Machine) -> Result<(), MachineError> {
    let index = machine.fetch_u32()?;
    machine.invoke_syscall(index as usize)
}

/// Index taken from the stack.
pub(super) fn syscall_pop(machine: &mut Machine) -> Result<(), MachineError> {
    let index = match machine.pop()? {
        Value::Int(i) if i >= 0 => i as usize,
        Value::UInt(u) => u as usize,
        other => {
            return Err(MachineError::type_error(format!(
                "syscall index must be a non-negative number, found {}",
                other.kind()
            )));
        }
    };
    machine.invoke_syscall(index)
}
