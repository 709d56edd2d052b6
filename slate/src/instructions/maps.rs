use crate::{Address, Machine, MachineError, Value, ValueKind};

fn map_operand(value: Value, what: &str) -> Result<Address, MachineError> {
    match value {
        Value::Map(map) => Ok(map),
        other => Err(MachineError::type_error(format!(
            "{what} expects a map, found {}",
            other.kind()
        ))),
    }
}

/// Pops a key and returns its text.
fn pop_key(machine: &mut Machine) -> Result<Vec<u8>, MachineError> {
    let value = machine.pop()?;
    let key = machine.heap.display_bytes(value)?;
    machine.heap.release(value)?;
    Ok(key)
}

fn missing_key(key: &[u8]) -> MachineError {
    MachineError::lookup(format!("map has no key '{}'", String::from_utf8_lossy(key)))
}

pub(super) fn ld_map(machine: &mut Machine) -> Result<(), MachineError> {
    let map = machine.heap.new_map()?;
    machine.push(map)
}

fn load_item(machine: &mut Machine, key: &[u8]) -> Result<(), MachineError> {
    let container = machine.pop()?;
    let map = map_operand(container, "ld_mapitem")?;
    let value = machine.heap.map_get(map, key)?.ok_or_else(|| missing_key(key))?;
    machine.heap.release(container)?;
    machine.push(value)
}

/// `[map]` with the key as operand.
pub(super) fn ld_mapitem(machine: &mut Machine) -> Result<(), MachineError> {
    let key = machine.fetch_string()?;
    load_item(machine, &key)
}

/// `[map, key]`
pub(super) fn ld_mapitem_pop(machine: &mut Machine) -> Result<(), MachineError> {
    let key = pop_key(machine)?;
    load_item(machine, &key)
}

fn store_item(machine: &mut Machine, key: &[u8]) -> Result<(), MachineError> {
    let container = machine.pop()?;
    let value = machine.pop()?;
    let map = map_operand(container, "st_mapitem")?;
    machine.heap.map_set(map, key, value)?;
    machine.heap.release(container)
}

/// `[value, map]` with the key as operand.
pub(super) fn st_mapitem(machine: &mut Machine) -> Result<(), MachineError> {
    let key = machine.fetch_string()?;
    store_item(machine, &key)
}

/// `[value, map, key]`
pub(super) fn st_mapitem_pop(machine: &mut Machine) -> Result<(), MachineError> {
    let key = pop_key(machine)?;
    store_item(machine, &key)
}

fn delete_item(machine: &mut Machine, key: &[u8]) -> Result<(), MachineError> {
    let container = machine.pop()?;
    machine.heap.map_delete(map_operand(container, "del_mapitem")?, key)?;
    machine.heap.release(container)
}

pub(super) fn del_mapitem(machine: &mut Machine) -> Result<(), MachineError> {
    let key = machine.fetch_string()?;
    delete_item(machine, &key)
}

pub(super) fn del_mapitem_pop(machine: &mut Machine) -> Result<(), MachineError> {
    let key = pop_key(machine)?;
    delete_item(machine, &key)
}

fn has_item(machine: &mut Machine, key: &[u8]) -> Result<(), MachineError> {
    let container = machine.pop()?;
    let found = machine.heap.map_has(map_operand(container, "has_mapitem")?, key)?;
    machine.heap.release(container)?;
    machine.push(Value::from_bool(found))
}

pub(super) fn has_mapitem(machine: &mut Machine) -> Result<(), MachineError> {
    let key = machine.fetch_string()?;
    has_item(machine, &key)
}

pub(super) fn has_mapitem_pop(machine: &mut Machine) -> Result<(), MachineError> {
    let key = pop_key(machine)?;
    has_item(machine, &key)
}

pub(super) fn map_len(machine: &mut Machine) -> Result<(), MachineError> {
    let container = machine.pop()?;
    let len = machine.heap.map_len(map_operand(container, "map_len")?)?;
    machine.heap.release(container)?;
    machine.push(Value::UInt(len))
}

/// `[a, b]`
pub(super) fn map_merge(machine: &mut Machine) -> Result<(), MachineError> {
    let rhs = machine.pop()?;
    let lhs = machine.pop()?;
    let a = map_operand(lhs, "map_merge")?;
    let b = map_operand(rhs, "map_merge")?;
    let merged = machine.heap.map_merge(a, b)?;
    machine.heap.release_all(&[lhs, rhs])?;
    machine.push(merged)
}

pub(super) fn map_copy(machine: &mut Machine) -> Result<(), MachineError> {
    let container = machine.pop()?;
    let copy = machine.heap.map_copy(map_operand(container, "map_copy")?)?;
    machine.heap.release(container)?;
    machine.push(copy)
}

pub(super) fn map_getprototype(machine: &mut Machine) -> Result<(), MachineError> {
    let container = machine.pop()?;
    let prototype = machine
        .heap
        .map_get_prototype(map_operand(container, "map_getprototype")?)?;
    machine.heap.release(container)?;
    machine.push(prototype)
}

/// `[map, prototype]`, an empty prototype clears it.
pub(super) fn map_setprototype(machine: &mut Machine) -> Result<(), MachineError> {
    let prototype = machine.pop()?;
    let container = machine.pop()?;
    let map = map_operand(container, "map_setprototype")?;
    let link = match prototype {
        Value::Map(proto) => Some(proto),
        Value::Empty => None,
        other => {
            return Err(MachineError::type_error(format!(
                "a prototype must be a map, found {}",
                other.kind()
            )));
        }
    };
    machine.heap.map_set_prototype(map, link)?;
    machine.heap.release_all(&[prototype, container])
}

pub(super) fn box_value(machine: &mut Machine) -> Result<(), MachineError> {
    let value = machine.pop()?;
    let prototypes = machine.prototypes;
    let boxed = machine.heap.box_value(&prototypes, value)?;
    machine.push(boxed)
}

pub(super) fn unbox(machine: &mut Machine) -> Result<(), MachineError> {
    let boxed = machine.pop()?;
    let value = machine.heap.unbox_value(boxed)?;
    machine.push(value)
}

/// Operand: value kind tag.
pub(super) fn ld_boxingproto(machine: &mut Machine) -> Result<(), MachineError> {
    let kind = ValueKind::from_tag(machine.fetch_u32()?);
    let prototype = machine.prototypes.for_kind(kind).ok_or_else(|| {
        MachineError::type_error(format!("{kind} values have no boxing prototype"))
    })?;
    machine.push(Value::Map(prototype))
}

fn rename_key(machine: &mut Machine, old: &[u8], new: &[u8]) -> Result<(), MachineError> {
    let container = machine.pop()?;
    machine
        .heap
        .map_rename_key(map_operand(container, "map_renamekey")?, old, new)?;
    machine.heap.release(container)
}

pub(super) fn map_renamekey(machine: &mut Machine) -> Result<(), MachineError> {
    let old = machine.fetch_string()?;
    let new = machine.fetch_string()?;
    rename_key(machine, &old, &new)
}

/// `[map, old, new]`
pub(super) fn map_renamekey_pop(machine: &mut Machine) -> Result<(), MachineError> {
    let new = pop_key(machine)?;
    let old = pop_key(machine)?;
    rename_key(machine, &old, &new)
}

pub(super) fn map_getkeys(machine: &mut Machine) -> Result<(), MachineError> {
    let container = machine.pop()?;
    let keys = machine.heap.map_keys(map_operand(container, "map_getkeys")?)?;
    machine.heap.release(container)?;
    machine.push(keys)
}

#[cfg(test)]
mod tests {
    use crate::{BytecodeWriter, ErrorKind, Machine, MachineCreateInfo, Value, bytecode::Op};

    fn run(code: BytecodeWriter) -> Result<Machine, crate::MachineError> {
        let mut vm = Machine::new(MachineCreateInfo::default()).unwrap();
        let index = vm.load_module("maps", &code.into_module()).unwrap();
        vm.set_entry(index).unwrap();
        vm.run()?;
        Ok(vm)
    }

    #[test]
    fn items_round_trip_through_named_operands() {
        let mut code = BytecodeWriter::new();
        let over = code.jump(Op::Jmp);
        let name = code.string(b"answer");
        code.bind(over);
        code.op(Op::LdMap)
            .op_u32(Op::StReg, 5)
            .ld_int(42)
            .op_u32(Op::LdReg, 5)
            .op_u32(Op::StMapItem, name)
            .op_u32(Op::LdReg, 5)
            .op_u32(Op::LdMapItem, name)
            .op(Op::Halt);
        let vm = run(code).unwrap();
        assert_eq!(vm.return_value(), Value::Int(42));
    }

    #[test]
    fn missing_items_are_lookup_errors() {
        let mut code = BytecodeWriter::new();
        let over = code.jump(Op::Jmp);
        let name = code.string(b"nothing");
        code.bind(over);
        code.op(Op::LdMap).op_u32(Op::LdMapItem, name).op(Op::Halt);
        let err = run(code).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Lookup);
        assert_eq!(err.message, "map has no key 'nothing'");
    }

    #[test]
    fn prototypes_answer_missing_keys() {
        let mut code = BytecodeWriter::new();
        let over = code.jump(Op::Jmp);
        let name = code.string(b"greeting");
        code.bind(over);
        // r0 = proto { greeting: 7 }, r1 = child
        code.op(Op::LdMap)
            .op_u32(Op::StReg, 5)
            .ld_int(7)
            .op_u32(Op::LdReg, 5)
            .op_u32(Op::StMapItem, name)
            .op(Op::LdMap)
            .op_u32(Op::StReg, 6)
            .op_u32(Op::LdReg, 6)
            .op_u32(Op::LdReg, 5)
            .op(Op::MapSetPrototype)
            .op_u32(Op::LdReg, 6)
            .op_u32(Op::HasMapItem, name)
            .op_u32(Op::LdReg, 6)
            .op_u32(Op::LdMapItem, name)
            .op(Op::Add)
            .op(Op::Halt);
        let vm = run(code).unwrap();
        assert_eq!(vm.return_value(), Value::Int(8));
    }

    #[test]
    fn box_and_unbox_restore_the_value() {
        let mut code = BytecodeWriter::new();
        code.ld_float(2.5).op(Op::Box).op(Op::Unbox).op(Op::Halt);
        let vm = run(code).unwrap();
        assert_eq!(vm.return_value(), Value::Float(2.5));
    }

    #[test]
    fn boxing_prototypes_are_addressable() {
        let mut code = BytecodeWriter::new();
        code.ld_int(1)
            .op(Op::Box)
            .op(Op::MapGetPrototype)
            .op_u32(Op::LdBoxingProto, 0)
            .op(Op::EqId)
            .op(Op::Halt);
        let vm = run(code).unwrap();
        assert_eq!(vm.return_value(), Value::UInt(1));
    }

    #[test]
    fn keys_can_be_renamed_and_listed() {
        let mut code = BytecodeWriter::new();
        let over = code.jump(Op::Jmp);
        let old = code.string(b"a");
        let new = code.string(b"b");
        code.bind(over);
        code.op(Op::LdMap)
            .op_u32(Op::StReg, 5)
            .ld_int(1)
            .op_u32(Op::LdReg, 5)
            .op_u32(Op::StMapItem, old)
            .op_u32(Op::LdReg, 5)
            .op(Op::MapRenameKey);
        code.emit_u32(old);
        code.emit_u32(new);
        code.op_u32(Op::LdReg, 5).op(Op::MapGetKeys).op(Op::Halt);
        let vm = run(code).unwrap();
        let Value::Array(keys) = vm.return_value() else { panic!("expected an array") };
        let keys = vm.heap.array_elements(keys).unwrap();
        assert_eq!(keys.len(), 1);
        let Value::String(key) = keys[0] else { panic!("expected a string key") };
        assert_eq!(vm.heap.string_bytes(key).unwrap(), b"b");
    }
}
