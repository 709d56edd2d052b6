use super::convert::int_of;
use crate::{Address, Machine, MachineError, Value};

fn array_operand(value: Value, what: &str) -> Result<Address, MachineError> {
    match value {
        Value::Array(a) => Ok(a),
        other => Err(MachineError::type_error(format!(
            "{what} expects an array, found {}",
            other.kind()
        ))),
    }
}

fn pop_index(machine: &mut Machine) -> Result<i64, MachineError> {
    let value = machine.pop()?;
    int_of(&mut machine.heap, value).map(i64::from)
}

/// Map key from an arbitrary value, consuming it.
fn key_of(machine: &mut Machine, value: Value) -> Result<Vec<u8>, MachineError> {
    let key = machine.heap.display_bytes(value)?;
    machine.heap.release(value)?;
    Ok(key)
}

/// Collects the top `count` values, bottom first, into a new array.
pub(super) fn ld_arr(machine: &mut Machine) -> Result<(), MachineError> {
    let count = machine.fetch_u32()?;
    let mut elements = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        elements.push(machine.pop()?);
    }
    elements.reverse();
    let array = machine.heap.new_array(&elements)?;
    machine.push(array)
}

/// `[container, index]`: array element, string byte or map entry.
pub(super) fn ld_arrelem(machine: &mut Machine) -> Result<(), MachineError> {
    let index = machine.pop()?;
    let container = machine.pop()?;
    let result = match container {
        Value::Array(array) => {
            let index = int_of(&mut machine.heap, index)?;
            machine.heap.array_get(array, i64::from(index))?
        }
        Value::String(string) => {
            let index = int_of(&mut machine.heap, index)?;
            Value::UInt(u32::from(machine.heap.string_byte_at(string, i64::from(index))?))
        }
        Value::Map(map) => {
            let key = key_of(machine, index)?;
            machine.heap.map_get(map, &key)?.ok_or_else(|| {
                MachineError::lookup(format!(
                    "map has no key '{}'",
                    String::from_utf8_lossy(&key)
                ))
            })?
        }
        other => {
            return Err(MachineError::type_error(format!(
                "can't index into {}",
                other.kind()
            )));
        }
    };
    machine.heap.release(container)?;
    machine.push(result)
}

/// `[value, container, index]`. Strings are immutable.
pub(super) fn st_arrelem(machine: &mut Machine) -> Result<(), MachineError> {
    let index = machine.pop()?;
    let container = machine.pop()?;
    let value = machine.pop()?;
    match container {
        Value::Array(array) => {
            let index = int_of(&mut machine.heap, index)?;
            machine.heap.array_set(array, i64::from(index), value)?;
        }
        Value::Map(map) => {
            let key = key_of(machine, index)?;
            machine.heap.map_set(map, &key, value)?;
        }
        Value::String(_) => return Err(MachineError::type_error("strings are immutable")),
        other => {
            return Err(MachineError::type_error(format!(
                "can't store into {}",
                other.kind()
            )));
        }
    }
    machine.heap.release(container)
}

/// `[container, index]`
pub(super) fn del_arrelem(machine: &mut Machine) -> Result<(), MachineError> {
    let index = machine.pop()?;
    let container = machine.pop()?;
    match container {
        Value::Array(array) => {
            let index = int_of(&mut machine.heap, index)?;
            machine.heap.array_delete(array, i64::from(index))?;
        }
        Value::Map(map) => {
            let key = key_of(machine, index)?;
            machine.heap.map_delete(map, &key)?;
        }
        other => {
            return Err(MachineError::type_error(format!(
                "can't delete from {}",
                other.kind()
            )));
        }
    }
    machine.heap.release(container)
}

pub(super) fn arr_len(machine: &mut Machine) -> Result<(), MachineError> {
    let value = machine.pop()?;
    let len = machine.heap.array_len(array_operand(value, "arr_len")?)?;
    machine.heap.release(value)?;
    machine.push(Value::UInt(len))
}

/// `[value, array, index]`
pub(super) fn arr_insert(machine: &mut Machine) -> Result<(), MachineError> {
    let index = pop_index(machine)?;
    let container = machine.pop()?;
    let value = machine.pop()?;
    let array = array_operand(container, "arr_insert")?;
    machine.heap.array_insert(array, index, value)?;
    machine.heap.release(container)
}

/// `[container, start, end]` for arrays and strings.
pub(super) fn arr_slice(machine: &mut Machine) -> Result<(), MachineError> {
    let end = pop_index(machine)?;
    let start = pop_index(machine)?;
    let container = machine.pop()?;
    let result = match container {
        Value::Array(array) => machine.heap.array_slice(array, start, end)?,
        Value::String(string) => {
            let len = i64::from(machine.heap.string_len(string)?);
            let from = if start < 0 { len + start } else { start }.max(0);
            let to = if end < 0 { len + end } else { end };
            machine.heap.string_slice(string, from, (to - from).max(0))?
        }
        other => {
            return Err(MachineError::type_error(format!(
                "can't slice {}",
                other.kind()
            )));
        }
    };
    machine.heap.release(container)?;
    machine.push(result)
}

pub(super) fn arr_concat(machine: &mut Machine) -> Result<(), MachineError> {
    let rhs = machine.pop()?;
    let lhs = machine.pop()?;
    let a = array_operand(lhs, "arr_concat")?;
    let b = array_operand(rhs, "arr_concat")?;
    let result = machine.heap.array_concat(a, b)?;
    machine.heap.release_all(&[lhs, rhs])?;
    machine.push(result)
}

pub(super) fn arr_copy(machine: &mut Machine) -> Result<(), MachineError> {
    let value = machine.pop()?;
    let result = machine.heap.array_copy(array_operand(value, "arr_copy")?)?;
    machine.heap.release(value)?;
    machine.push(result)
}

/// `[start, end]`
pub(super) fn arr_range(machine: &mut Machine) -> Result<(), MachineError> {
    let end = pop_index(machine)?;
    let start = pop_index(machine)?;
    let result = machine.heap.array_range(start as i32, end as i32)?;
    machine.push(result)
}
