use crate::{Address, Heap, Machine, MachineError, Value, ValueKind};

/// Integer prefix of `bytes` with C `strtol` base detection: `0x` for hex,
/// a leading `0` for octal. Stops at the first invalid digit.
pub(super) fn parse_integer(bytes: &[u8]) -> i64 {
    let text = bytes.trim_ascii_start();
    let (negative, rest) = match text.first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let hex = rest.len() > 2
        && rest[0] == b'0'
        && (rest[1] | 0x20) == b'x'
        && rest[2].is_ascii_hexdigit();
    let (radix, digits) = if hex {
        (16, &rest[2..])
    } else if rest.first() == Some(&b'0') {
        (8, rest)
    } else {
        (10, rest)
    };

    let mut value: i64 = 0;
    for &c in digits {
        let Some(digit) = char::from(c).to_digit(radix) else {
            break;
        };
        value = value
            .saturating_mul(i64::from(radix))
            .saturating_add(i64::from(digit));
    }
    if negative { -value } else { value }
}

/// Longest prefix of `bytes` that reads as a float, or 0.
pub(super) fn parse_float(bytes: &[u8]) -> f32 {
    let text = bytes.trim_ascii_start();
    let len = text
        .iter()
        .take_while(|c| c.is_ascii_digit() || matches!(c, b'+' | b'-' | b'.' | b'e' | b'E'))
        .count();
    let Ok(candidate) = std::str::from_utf8(&text[..len]) else {
        return 0.0;
    };
    (1..=candidate.len())
        .rev()
        .find_map(|end| candidate[..end].parse::<f32>().ok())
        .unwrap_or(0.0)
}

/// Integer value of `value`, consuming its reference.
pub(super) fn int_of(heap: &mut Heap, value: Value) -> Result<i32, MachineError> {
    let int = match value {
        Value::Int(i) => i,
        Value::UInt(u) => u as i32,
        Value::Float(f) => f as i32,
        Value::String(s) => parse_integer(heap.string_bytes(s)?) as i32,
        Value::Empty => 0,
        other => {
            return Err(MachineError::type_error(format!(
                "can't convert {} to int",
                other.kind()
            )));
        }
    };
    heap.release(value)?;
    Ok(int)
}

fn uint_of(heap: &mut Heap, value: Value) -> Result<u32, MachineError> {
    let uint = match value {
        Value::Int(i) => i as u32,
        Value::UInt(u) => u,
        Value::Float(f) => f as u32,
        Value::String(s) => parse_integer(heap.string_bytes(s)?) as u32,
        Value::Empty => 0,
        other => {
            return Err(MachineError::type_error(format!(
                "can't convert {} to uint",
                other.kind()
            )));
        }
    };
    heap.release(value)?;
    Ok(uint)
}

fn float_of(heap: &mut Heap, value: Value) -> Result<f32, MachineError> {
    let float = match value {
        Value::Int(i) => i as f32,
        Value::UInt(u) => u as f32,
        Value::Float(f) => f,
        Value::String(s) => parse_float(heap.string_bytes(s)?),
        Value::Empty => 0.0,
        other => {
            return Err(MachineError::type_error(format!(
                "can't convert {} to float",
                other.kind()
            )));
        }
    };
    heap.release(value)?;
    Ok(float)
}

/// String form of `value`, consuming its reference.
pub(super) fn string_of(heap: &mut Heap, value: Value) -> Result<Address, MachineError> {
    if let Value::String(s) = value {
        return Ok(s);
    }
    let text = heap.display_bytes(value)?;
    let string = heap.new_string(&text)?;
    heap.release(value)?;
    match string {
        Value::String(s) => Ok(s),
        _ => Err(MachineError::control("string allocation returned a non-string")),
    }
}

/// Array form of `value`: arrays pass through, anything else is wrapped in a
/// one-element array. Consumes the reference.
pub(super) fn array_of(heap: &mut Heap, value: Value) -> Result<Address, MachineError> {
    match value {
        Value::Array(a) => Ok(a),
        other => match heap.new_array(&[other])? {
            Value::Array(a) => Ok(a),
            _ => Err(MachineError::control("array allocation returned a non-array")),
        },
    }
}

pub(super) fn conv_int(machine: &mut Machine) -> Result<(), MachineError> {
    let value = machine.pop()?;
    let int = int_of(&mut machine.heap, value)?;
    machine.push(Value::Int(int))
}

pub(super) fn conv_uint(machine: &mut Machine) -> Result<(), MachineError> {
    let value = machine.pop()?;
    let uint = uint_of(&mut machine.heap, value)?;
    machine.push(Value::UInt(uint))
}

pub(super) fn conv_float(machine: &mut Machine) -> Result<(), MachineError> {
    let value = machine.pop()?;
    let float = float_of(&mut machine.heap, value)?;
    machine.push(Value::Float(float))
}

pub(super) fn conv_str(machine: &mut Machine) -> Result<(), MachineError> {
    let value = machine.pop()?;
    let string = string_of(&mut machine.heap, value)?;
    machine.push(Value::String(string))
}

pub(super) fn conv_arr(machine: &mut Machine) -> Result<(), MachineError> {
    let value = machine.pop()?;
    let array = array_of(&mut machine.heap, value)?;
    machine.push(Value::Array(array))
}

// casts reinterpret the payload under a new tag
fn cast(machine: &mut Machine, kind: ValueKind) -> Result<(), MachineError> {
    let value = machine.pop()?;
    machine.push(Value::from_parts(kind, value.payload()))
}

pub(super) fn cast_int(machine: &mut Machine) -> Result<(), MachineError> {
    cast(machine, ValueKind::Int)
}

pub(super) fn cast_uint(machine: &mut Machine) -> Result<(), MachineError> {
    cast(machine, ValueKind::UInt)
}

pub(super) fn cast_float(machine: &mut Machine) -> Result<(), MachineError> {
    cast(machine, ValueKind::Float)
}

pub(super) fn cast_str(machine: &mut Machine) -> Result<(), MachineError> {
    cast(machine, ValueKind::String)
}

pub(super) fn cast_ref(machine: &mut Machine) -> Result<(), MachineError> {
    cast(machine, ValueKind::Ref)
}
