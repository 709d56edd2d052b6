use super::convert::int_of;
use crate::{Address, Machine, MachineError, Value};

fn string_operand(value: Value, what: &str) -> Result<Address, MachineError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(MachineError::type_error(format!(
            "{what} expects a string, found {}",
            other.kind()
        ))),
    }
}

pub(super) fn strcat(machine: &mut Machine) -> Result<(), MachineError> {
    let rhs = machine.pop()?;
    let lhs = machine.pop()?;
    let a = string_operand(lhs, "strcat")?;
    let b = string_operand(rhs, "strcat")?;
    let result = machine.heap.string_concat(a, b)?;
    machine.heap.release_all(&[lhs, rhs])?;
    machine.push(result)
}

/// `[string, start, count]`. Negative `start` counts from the end, a negative
/// `count` stops that many bytes before the end.
pub(super) fn substr(machine: &mut Machine) -> Result<(), MachineError> {
    let count = machine.pop()?;
    let count = int_of(&mut machine.heap, count)?;
    let start = machine.pop()?;
    let start = int_of(&mut machine.heap, start)?;
    let value = machine.pop()?;
    let string = string_operand(value, "substr")?;
    let result = machine
        .heap
        .string_slice(string, i64::from(start), i64::from(count))?;
    machine.heap.release(value)?;
    machine.push(result)
}

pub(super) fn strlen(machine: &mut Machine) -> Result<(), MachineError> {
    let value = machine.pop()?;
    let len = machine.heap.string_len(string_operand(value, "strlen")?)?;
    machine.heap.release(value)?;
    machine.push(Value::UInt(len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, MachineCreateInfo};

    fn text(vm: &Machine, value: Value) -> Vec<u8> {
        let Value::String(s) = value else { panic!("expected a string") };
        vm.heap.string_bytes(s).unwrap().to_vec()
    }

    #[test]
    fn substr_takes_start_and_count() {
        let mut vm = Machine::new(MachineCreateInfo::default()).unwrap();
        let s = vm.heap.new_string(b"hello world").unwrap();
        vm.push(s).unwrap();
        vm.push(Value::Int(-5)).unwrap();
        vm.push(Value::Int(3)).unwrap();
        substr(&mut vm).unwrap();
        let result = vm.pop().unwrap();
        assert_eq!(text(&vm, result), b"wor");
    }

    #[test]
    fn strcat_requires_strings() {
        let mut vm = Machine::new(MachineCreateInfo::default()).unwrap();
        let a = vm.heap.new_string(b"ab").unwrap();
        let b = vm.heap.new_string(b"cd").unwrap();
        vm.push(a).unwrap();
        vm.push(b).unwrap();
        strcat(&mut vm).unwrap();
        let result = vm.pop().unwrap();
        assert_eq!(text(&vm, result), b"abcd");

        vm.push(result).unwrap();
        vm.push(Value::Int(1)).unwrap();
        assert_eq!(strcat(&mut vm).unwrap_err().kind, ErrorKind::Type);
    }

    #[test]
    fn strlen_counts_bytes() {
        let mut vm = Machine::new(MachineCreateInfo::default()).unwrap();
        let blocks = vm.heap.live_blocks();
        let s = vm.heap.new_string("héllo".as_bytes()).unwrap();
        vm.push(s).unwrap();
        strlen(&mut vm).unwrap();
        assert_eq!(vm.pop().unwrap(), Value::UInt(6));
        assert_eq!(vm.heap.live_blocks(), blocks);
    }
}
