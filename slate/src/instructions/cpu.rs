use crate::{Machine, MachineError};

pub(super) fn nop(_machine: &mut Machine) -> Result<(), MachineError> {
    Ok(())
}

pub(super) fn halt(machine: &mut Machine) -> Result<(), MachineError> {
    machine.finish()
}

pub(super) fn trap(machine: &mut Machine) -> Result<(), MachineError> {
    let code = machine.fetch_u32()?;
    machine.trap(code)
}

pub(super) fn interrupt(machine: &mut Machine) -> Result<(), MachineError> {
    let code = machine.fetch_u32()?;
    machine.interrupt(code)
}

pub(super) fn debug_break(machine: &mut Machine) -> Result<(), MachineError> {
    log::info!("breakpoint at {}", machine.instruction);
    Ok(())
}

pub(super) fn debug_setcontext(machine: &mut Machine) -> Result<(), MachineError> {
    let filename = machine.fetch_name()?;
    let line = machine.fetch_i32()?;
    let col = machine.fetch_i32()?;
    machine.debug.set_position(filename, line, col);
    Ok(())
}

pub(super) fn debug_enterscope(machine: &mut Machine) -> Result<(), MachineError> {
    let name = machine.fetch_name()?;
    machine.debug.enter_scope(name);
    Ok(())
}

pub(super) fn debug_leavescope(machine: &mut Machine) -> Result<(), MachineError> {
    if machine.debug.leave_scope().is_none() {
        log::warn!("debug_leavescope without a matching scope at {}", machine.instruction);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{BytecodeWriter, ErrorKind, Machine, MachineCreateInfo, bytecode::Op};

    #[test]
    fn errors_carry_the_debug_trace() {
        let mut code = BytecodeWriter::new();
        let over = code.jump(Op::Jmp);
        let file = code.string(b"demo.fk");
        let scope = code.string(b"divide");
        code.bind(over);
        code.op_u32(Op::DebugSetContext, file);
        code.emit_i32(3);
        code.emit_i32(1);
        code.op_u32(Op::DebugEnterScope, scope);
        code.op_u32(Op::DebugSetContext, file);
        code.emit_i32(7);
        code.emit_i32(12);
        code.ld_int(1).ld_int(0).op(Op::Div).op(Op::Halt);

        let mut vm = Machine::new(MachineCreateInfo::default()).unwrap();
        let index = vm.load_module("demo", &code.into_module()).unwrap();
        vm.set_entry(index).unwrap();
        let err = vm.run().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Range);
        assert_eq!(
            err.trace,
            vec!["at divide (demo.fk:7:12)".to_owned(), "at demo.fk:3:1".to_owned()]
        );
    }
}
