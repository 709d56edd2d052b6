//! Jumps and the call protocol.
//!
//! `call` leaves `[.., args, ret, nargs]`. The callee's `args_accept` turns
//! that into `[.., args, ret, saved ap, declared]` with `ap` at the first
//! argument; `args_cleanup` drops the arguments again so that `ret` finds
//! `[.., ret, nargs]` on top.

use crate::{Address, Machine, MachineError, VALUE_SIZE, Value};

pub(super) fn jmp(machine: &mut Machine) -> Result<(), MachineError> {
    let target = machine.fetch_code_address()?;
    machine.registers.pc = target.raw();
    Ok(())
}

pub(super) fn jmp_pop(machine: &mut Machine) -> Result<(), MachineError> {
    let target = return_address(machine.pop()?)?;
    machine.registers.pc = target.raw();
    Ok(())
}

/// Pops a value and jumps if `taken` holds for its payload read as an int.
fn conditional(machine: &mut Machine, taken: fn(i32) -> bool) -> Result<(), MachineError> {
    let target = machine.fetch_code_address()?;
    let value = machine.pop()?;
    machine.heap.release(value)?;
    if taken(value.payload() as i32) {
        machine.registers.pc = target.raw();
    }
    Ok(())
}

pub(super) fn beq(machine: &mut Machine) -> Result<(), MachineError> {
    conditional(machine, |v| v == 0)
}

pub(super) fn bne(machine: &mut Machine) -> Result<(), MachineError> {
    conditional(machine, |v| v != 0)
}

pub(super) fn blt(machine: &mut Machine) -> Result<(), MachineError> {
    conditional(machine, |v| v < 0)
}

pub(super) fn bgt(machine: &mut Machine) -> Result<(), MachineError> {
    conditional(machine, |v| v > 0)
}

pub(super) fn ble(machine: &mut Machine) -> Result<(), MachineError> {
    conditional(machine, |v| v <= 0)
}

pub(super) fn bge(machine: &mut Machine) -> Result<(), MachineError> {
    conditional(machine, |v| v >= 0)
}

pub(super) fn brfalse(machine: &mut Machine) -> Result<(), MachineError> {
    conditional(machine, |v| v == 0)
}

pub(super) fn brtrue(machine: &mut Machine) -> Result<(), MachineError> {
    conditional(machine, |v| v != 0)
}

fn return_address(value: Value) -> Result<Address, MachineError> {
    match value {
        Value::Ref(address) => Ok(address),
        other => Err(MachineError::control(format!(
            "expected a code address, found {}",
            other.kind()
        ))),
    }
}

fn argument_count(value: Value) -> Result<u32, MachineError> {
    match value {
        Value::UInt(count) => Ok(count),
        other => Err(MachineError::control(format!(
            "expected an argument count, found {}",
            other.kind()
        ))),
    }
}

fn enter(machine: &mut Machine, target: Address, nargs: u32) -> Result<(), MachineError> {
    machine.push(Value::Ref(Address::new(machine.registers.pc)))?;
    machine.push(Value::UInt(nargs))?;
    machine.registers.pc = target.raw();
    Ok(())
}

pub(super) fn call(machine: &mut Machine) -> Result<(), MachineError> {
    let target = machine.fetch_code_address()?;
    let nargs = machine.fetch_u32()?;
    enter(machine, target, nargs)
}

/// Calls the code address on top of the stack.
pub(super) fn call_pop(machine: &mut Machine) -> Result<(), MachineError> {
    let nargs = machine.fetch_u32()?;
    let target = return_address(machine.pop()?)?;
    enter(machine, target, nargs)
}

/// Returns to the caller, or halts when no frame is left.
pub(super) fn ret(machine: &mut Machine) -> Result<(), MachineError> {
    if machine.registers.sp <= machine.stack_base().raw() {
        return machine.finish();
    }
    let nargs = machine.pop()?;
    machine.heap.release(nargs)?;
    let target = return_address(machine.pop()?)?;
    machine.registers.pc = target.raw();
    Ok(())
}

/// Adapts the passed arguments to `declared`: missing ones become empty,
/// surplus ones are dropped.
pub(super) fn args_accept(machine: &mut Machine) -> Result<(), MachineError> {
    let declared = machine.fetch_u32()?;
    let passed = argument_count(machine.pop()?)?;
    let target = return_address(machine.pop()?)?;

    for _ in passed..declared {
        machine.push(Value::Empty)?;
    }
    for _ in declared..passed {
        machine.pop_release()?;
    }

    let first = Address::new(machine.registers.sp)
        .add(VALUE_SIZE)
        .sub(declared * VALUE_SIZE);
    let saved = Address::new(machine.registers.ap);
    machine.push(Value::Ref(target))?;
    machine.push(Value::Ref(saved))?;
    machine.push(Value::UInt(declared))?;
    machine.registers.ap = first.raw();
    Ok(())
}

pub(super) fn args_cleanup(machine: &mut Machine) -> Result<(), MachineError> {
    let declared = argument_count(machine.pop()?)?;
    let saved = return_address(machine.pop()?)?;
    let target = return_address(machine.pop()?)?;
    machine.registers.ap = saved.raw();
    for _ in 0..declared {
        machine.pop_release()?;
    }
    machine.push(Value::Ref(target))?;
    machine.push(Value::UInt(declared))
}

#[cfg(test)]
mod tests {
    use crate::{BytecodeWriter, Machine, MachineCreateInfo, Value, bytecode::Op};

    fn run(code: BytecodeWriter) -> Machine {
        let mut vm = Machine::new(MachineCreateInfo::default()).unwrap();
        let index = vm.load_module("branching", &code.into_module()).unwrap();
        vm.set_entry(index).unwrap();
        vm.run().unwrap();
        vm
    }

    /// `sum(a, b)` called with `passed` arguments, returning through rr.
    fn call_sum(passed: u32) -> Machine {
        let mut code = BytecodeWriter::new();
        let over = code.jump(Op::Jmp);
        let sum = code.offset();
        code.op_u32(Op::ArgsAccept, 2)
            .op_i32(Op::LdArg, 0)
            .op_i32(Op::LdArg, 1)
            .op(Op::IsEmpty)
            .op(Op::Pop)
            .op(Op::Add)
            .op_u32(Op::StReg, 4)
            .op(Op::ArgsCleanup)
            .op(Op::Ret);
        code.bind(over);
        for i in 0..passed {
            code.ld_int(10 + i as i32);
        }
        code.call(sum, passed).op(Op::Ret);
        run(code)
    }

    #[test]
    fn calls_return_to_the_caller() {
        let vm = call_sum(2);
        assert_eq!(vm.return_value(), Value::Int(21));
        assert_eq!(vm.depth(), 0);
        assert_eq!(vm.registers.ap, vm.stack_base().raw());
    }

    #[test]
    fn surplus_arguments_are_dropped() {
        let vm = call_sum(3);
        assert_eq!(vm.return_value(), Value::Int(21));
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn conditional_branches_test_the_sign() {
        let mut code = BytecodeWriter::new();
        code.ld_int(2).ld_int(5).op(Op::Cmp);
        let taken = code.jump(Op::Blt);
        code.ld_int(0).op(Op::Halt);
        code.bind(taken);
        code.ld_int(1).op(Op::Halt);
        assert_eq!(run(code).return_value(), Value::Int(1));
    }

    #[test]
    fn loops_count_down() {
        let mut code = BytecodeWriter::new();
        code.ld_int(0).ld_int(5);
        let top = code.offset();
        // [acc, n] -> [acc + n, n - 1]
        code.op(Op::Dup)
            .op_i32(Op::LdStack, -2)
            .op(Op::Add)
            .op_i32(Op::StStack, -2)
            .ld_int(1)
            .op(Op::Sub)
            .op(Op::Dup);
        let done = code.jump(Op::BrFalse);
        code.op_u32(Op::Jmp, top);
        code.bind(done);
        code.op(Op::Pop).op(Op::Halt);
        assert_eq!(run(code).return_value(), Value::Int(15));
    }

    #[test]
    fn call_pop_takes_the_target_from_the_stack() {
        let mut code = BytecodeWriter::new();
        let over = code.jump(Op::Jmp);
        let callee = code.offset();
        code.op_u32(Op::ArgsAccept, 0)
            .ld_int(7)
            .op_u32(Op::StReg, 4)
            .op(Op::ArgsCleanup)
            .op(Op::Ret);
        code.bind(over);
        code.op_u32(Op::LdRef, callee).op_u32(Op::CallPop, 0).op(Op::Ret);
        assert_eq!(run(code).return_value(), Value::Int(7));
    }
}
