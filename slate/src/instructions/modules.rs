use crate::{Machine, MachineError, Value};

/// Pushes the export map of the operand module, loading it if needed.
pub(super) fn link(machine: &mut Machine) -> Result<(), MachineError> {
    let name = machine.fetch_name()?;
    let exports = machine.link_module(&name)?;
    machine.push(Value::Map(exports))
}

pub(super) fn unlink(machine: &mut Machine) -> Result<(), MachineError> {
    let name = machine.fetch_name()?;
    machine.unlink_module(&name)
}

/// Pushes a reference to an export of an already loaded module.
pub(super) fn ld_extern(machine: &mut Machine) -> Result<(), MachineError> {
    let module = machine.fetch_name()?;
    let export = machine.fetch_string()?;
    let index = machine
        .module_index(&module)
        .ok_or_else(|| MachineError::lookup(format!("module '{module}' is not loaded")))?;
    let address = machine.export_address(index, &export)?.ok_or_else(|| {
        MachineError::lookup(format!(
            "module '{module}' does not export '{}'",
            String::from_utf8_lossy(&export)
        ))
    })?;
    machine.push(Value::Ref(address))
}
