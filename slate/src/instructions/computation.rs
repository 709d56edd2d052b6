use std::cmp::Ordering;

use super::convert::{array_of, string_of};
use crate::{Machine, MachineError, Number, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl Arith {
    fn name(self) -> &'static str {
        match self {
            Arith::Add => "addition",
            Arith::Sub => "subtraction",
            Arith::Mul => "multiplication",
            Arith::Div => "division",
            Arith::Mod => "modulo",
        }
    }

    fn zero_divisor(self) -> MachineError {
        MachineError::range(format!("{} by zero", self.name()))
    }

    fn unsigned(self, a: u32, b: u32) -> Result<u32, MachineError> {
        Ok(match self {
            Arith::Add => a.wrapping_add(b),
            Arith::Sub => a.wrapping_sub(b),
            Arith::Mul => a.wrapping_mul(b),
            Arith::Div => a.checked_div(b).ok_or_else(|| self.zero_divisor())?,
            Arith::Mod => a.checked_rem(b).ok_or_else(|| self.zero_divisor())?,
        })
    }

    fn signed(self, a: i64, b: i64) -> Result<i64, MachineError> {
        if matches!(self, Arith::Div | Arith::Mod) && b == 0 {
            return Err(self.zero_divisor());
        }
        Ok(match self {
            Arith::Add => a.wrapping_add(b),
            Arith::Sub => a.wrapping_sub(b),
            Arith::Mul => a.wrapping_mul(b),
            Arith::Div => a.wrapping_div(b),
            Arith::Mod => a.wrapping_rem(b),
        })
    }

    fn float(self, a: f32, b: f32) -> f32 {
        match self {
            Arith::Add => a + b,
            Arith::Sub => a - b,
            Arith::Mul => a * b,
            Arith::Div => a / b,
            Arith::Mod => a % b,
        }
    }
}

/// Both unsigned stays unsigned, any float makes a float, anything else is
/// computed wide and truncated to a 32-bit int.
fn arithmetic(op: Arith, lhs: Value, rhs: Value) -> Result<Value, MachineError> {
    if let (Value::UInt(a), Value::UInt(b)) = (lhs, rhs) {
        return Ok(Value::UInt(op.unsigned(a, b)?));
    }
    match (lhs.number(), rhs.number()) {
        (Some(Number::Integer(a)), Some(Number::Integer(b))) => {
            Ok(Value::Int(op.signed(a, b)? as i32))
        }
        (Some(a), Some(b)) => Ok(Value::Float(op.float(a.as_f64() as f32, b.as_f64() as f32))),
        _ => Err(MachineError::type_error(format!(
            "{} has not been defined for {} and {}",
            op.name(),
            lhs.kind(),
            rhs.kind()
        ))),
    }
}

fn binary(machine: &mut Machine, op: Arith) -> Result<(), MachineError> {
    let rhs = machine.pop()?;
    let lhs = machine.pop()?;
    let result = arithmetic(op, lhs, rhs)?;
    machine.push(result)
}

/// Numeric addition, array concatenation if either side is an array,
/// string concatenation if either side is a string.
pub(super) fn add(machine: &mut Machine) -> Result<(), MachineError> {
    let rhs = machine.peek(0)?;
    let lhs = machine.peek(1)?;
    match (lhs, rhs) {
        (Value::Array(_), _) | (_, Value::Array(_)) => {
            machine.pop()?;
            machine.pop()?;
            let a = array_of(&mut machine.heap, lhs)?;
            let b = array_of(&mut machine.heap, rhs)?;
            let result = machine.heap.array_concat(a, b)?;
            machine.heap.release_all(&[Value::Array(a), Value::Array(b)])?;
            machine.push(result)
        }
        (Value::String(_), _) | (_, Value::String(_)) => {
            machine.pop()?;
            machine.pop()?;
            let a = string_of(&mut machine.heap, lhs)?;
            let b = string_of(&mut machine.heap, rhs)?;
            let result = machine.heap.string_concat(a, b)?;
            machine.heap.release_all(&[Value::String(a), Value::String(b)])?;
            machine.push(result)
        }
        _ => binary(machine, Arith::Add),
    }
}

pub(super) fn sub(machine: &mut Machine) -> Result<(), MachineError> {
    binary(machine, Arith::Sub)
}

pub(super) fn mul(machine: &mut Machine) -> Result<(), MachineError> {
    binary(machine, Arith::Mul)
}

pub(super) fn div(machine: &mut Machine) -> Result<(), MachineError> {
    binary(machine, Arith::Div)
}

pub(super) fn modulo(machine: &mut Machine) -> Result<(), MachineError> {
    binary(machine, Arith::Mod)
}

/// Same as `sub`; branches test the sign of the result.
pub(super) fn cmp(machine: &mut Machine) -> Result<(), MachineError> {
    binary(machine, Arith::Sub)
}

pub(super) fn pow(machine: &mut Machine) -> Result<(), MachineError> {
    let rhs = machine.pop()?;
    let lhs = machine.pop()?;
    let (Some(base), Some(exponent)) = (lhs.number(), rhs.number()) else {
        return Err(MachineError::type_error(format!(
            "exponentiation has not been defined for {} and {}",
            lhs.kind(),
            rhs.kind()
        )));
    };
    machine.push(Value::Float(base.as_f64().powf(exponent.as_f64()) as f32))
}

pub(super) fn neg(machine: &mut Machine) -> Result<(), MachineError> {
    let result = match machine.pop()? {
        Value::Int(i) => Value::Int(i.wrapping_neg()),
        Value::UInt(u) => Value::Int((u as i32).wrapping_neg()),
        Value::Float(f) => Value::Float(-f),
        other => {
            return Err(MachineError::type_error(format!(
                "negation has not been defined for {}",
                other.kind()
            )));
        }
    };
    machine.push(result)
}

pub(super) fn not(machine: &mut Machine) -> Result<(), MachineError> {
    let result = match machine.pop()? {
        Value::Int(i) => Value::Int(!i),
        Value::UInt(u) => Value::UInt(!u),
        other => {
            return Err(MachineError::type_error(format!(
                "bitwise not has not been defined for {}",
                other.kind()
            )));
        }
    };
    machine.push(result)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bitwise {
    And,
    Or,
    Xor,
    Lsh,
    Rsh,
}

impl Bitwise {
    fn unsigned(self, a: u32, b: u32) -> u32 {
        match self {
            Bitwise::And => a & b,
            Bitwise::Or => a | b,
            Bitwise::Xor => a ^ b,
            Bitwise::Lsh => a.wrapping_shl(b),
            Bitwise::Rsh => a.wrapping_shr(b),
        }
    }

    // right shifts of signed values keep the sign
    fn signed(self, a: i32, b: u32) -> i32 {
        match self {
            Bitwise::Lsh => a.wrapping_shl(b),
            Bitwise::Rsh => a.wrapping_shr(b),
            _ => self.unsigned(a as u32, b) as i32,
        }
    }
}

fn bitwise(machine: &mut Machine, op: Bitwise) -> Result<(), MachineError> {
    let rhs = machine.pop()?;
    let lhs = machine.pop()?;
    let result = match (lhs, rhs) {
        (Value::UInt(a), Value::UInt(b)) => Value::UInt(op.unsigned(a, b)),
        (Value::UInt(a), Value::Int(b)) => Value::Int(op.unsigned(a, b as u32) as i32),
        (Value::Int(a), Value::Int(b)) => Value::Int(op.signed(a, b as u32)),
        (Value::Int(a), Value::UInt(b)) => Value::Int(op.signed(a, b)),
        _ => {
            return Err(MachineError::type_error(format!(
                "{op:?} has not been defined for {} and {}",
                lhs.kind(),
                rhs.kind()
            )));
        }
    };
    machine.push(result)
}

pub(super) fn and(machine: &mut Machine) -> Result<(), MachineError> {
    bitwise(machine, Bitwise::And)
}

pub(super) fn or(machine: &mut Machine) -> Result<(), MachineError> {
    bitwise(machine, Bitwise::Or)
}

pub(super) fn xor(machine: &mut Machine) -> Result<(), MachineError> {
    bitwise(machine, Bitwise::Xor)
}

pub(super) fn lsh(machine: &mut Machine) -> Result<(), MachineError> {
    bitwise(machine, Bitwise::Lsh)
}

pub(super) fn rsh(machine: &mut Machine) -> Result<(), MachineError> {
    bitwise(machine, Bitwise::Rsh)
}

fn compare(machine: &mut Machine, accept: fn(Ordering) -> bool) -> Result<(), MachineError> {
    let rhs = machine.pop()?;
    let lhs = machine.pop()?;
    let ordering = lhs.compare_numeric(&rhs)?;
    machine.push(Value::from_bool(ordering.is_some_and(accept)))
}

pub(super) fn lt(machine: &mut Machine) -> Result<(), MachineError> {
    compare(machine, Ordering::is_lt)
}

pub(super) fn gt(machine: &mut Machine) -> Result<(), MachineError> {
    compare(machine, Ordering::is_gt)
}

pub(super) fn le(machine: &mut Machine) -> Result<(), MachineError> {
    compare(machine, Ordering::is_le)
}

pub(super) fn ge(machine: &mut Machine) -> Result<(), MachineError> {
    compare(machine, Ordering::is_ge)
}

fn equality(machine: &mut Machine, negate: bool) -> Result<(), MachineError> {
    let rhs = machine.pop()?;
    let lhs = machine.pop()?;
    let equal = machine.heap.values_equal(lhs, rhs)?;
    machine.heap.release_all(&[lhs, rhs])?;
    machine.push(Value::from_bool(equal != negate))
}

pub(super) fn eq(machine: &mut Machine) -> Result<(), MachineError> {
    equality(machine, false)
}

pub(super) fn ne(machine: &mut Machine) -> Result<(), MachineError> {
    equality(machine, true)
}

/// Identity variants: operands of different kinds never compare, they are
/// dropped and `mismatch` is pushed.
fn identity(
    machine: &mut Machine,
    mismatch: bool,
    same_kind: fn(&mut Machine) -> Result<(), MachineError>,
) -> Result<(), MachineError> {
    let rhs = machine.peek(0)?;
    let lhs = machine.peek(1)?;
    if lhs.kind() == rhs.kind() {
        return same_kind(machine);
    }
    machine.pop_release()?;
    machine.pop_release()?;
    machine.push(Value::from_bool(mismatch))
}

pub(super) fn cmp_id(machine: &mut Machine) -> Result<(), MachineError> {
    identity(machine, false, cmp)
}

pub(super) fn eq_id(machine: &mut Machine) -> Result<(), MachineError> {
    identity(machine, false, eq)
}

pub(super) fn ne_id(machine: &mut Machine) -> Result<(), MachineError> {
    identity(machine, true, ne)
}

pub(super) fn lt_id(machine: &mut Machine) -> Result<(), MachineError> {
    identity(machine, false, lt)
}

pub(super) fn gt_id(machine: &mut Machine) -> Result<(), MachineError> {
    identity(machine, false, gt)
}

pub(super) fn le_id(machine: &mut Machine) -> Result<(), MachineError> {
    identity(machine, false, le)
}

pub(super) fn ge_id(machine: &mut Machine) -> Result<(), MachineError> {
    identity(machine, false, ge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, MachineCreateInfo};

    fn machine() -> Machine {
        Machine::new(MachineCreateInfo::default()).unwrap()
    }

    fn apply(handler: fn(&mut Machine) -> Result<(), MachineError>, lhs: Value, rhs: Value) -> Value {
        let mut vm = machine();
        vm.push(lhs).unwrap();
        vm.push(rhs).unwrap();
        handler(&mut vm).unwrap();
        assert_eq!(vm.depth(), 1);
        vm.pop().unwrap()
    }

    #[test]
    fn result_kinds_follow_the_operands() {
        assert_eq!(apply(add, Value::UInt(3), Value::UInt(4)), Value::UInt(7));
        assert_eq!(apply(add, Value::Int(3), Value::UInt(4)), Value::Int(7));
        assert_eq!(apply(add, Value::Int(1), Value::Float(0.5)), Value::Float(1.5));
        assert_eq!(apply(sub, Value::UInt(0), Value::UInt(1)), Value::UInt(u32::MAX));
        assert_eq!(apply(mul, Value::Int(-3), Value::Int(5)), Value::Int(-15));
        assert_eq!(apply(div, Value::Int(7), Value::Int(-2)), Value::Int(-3));
        assert_eq!(apply(modulo, Value::Int(-7), Value::Int(2)), Value::Int(-1));
    }

    #[test]
    fn integer_division_by_zero_is_a_range_error() {
        for handler in [div, modulo] {
            let mut vm = machine();
            vm.push(Value::Int(1)).unwrap();
            vm.push(Value::UInt(0)).unwrap();
            assert_eq!(handler(&mut vm).unwrap_err().kind, ErrorKind::Range);
        }
        let result = apply(div, Value::Float(1.0), Value::Int(0));
        assert_eq!(result, Value::Float(f32::INFINITY));
    }

    #[test]
    fn adding_a_string_concatenates_display_text() {
        let mut vm = machine();
        let blocks = vm.heap.live_blocks();
        let s = vm.heap.new_string(b"n=").unwrap();
        vm.push(s).unwrap();
        vm.push(Value::Int(5)).unwrap();
        add(&mut vm).unwrap();
        let Value::String(result) = vm.pop().unwrap() else { panic!("expected a string") };
        assert_eq!(vm.heap.string_bytes(result).unwrap(), b"n=5");
        vm.heap.release(Value::String(result)).unwrap();
        assert_eq!(vm.heap.live_blocks(), blocks);
    }

    #[test]
    fn adding_to_an_array_concatenates() {
        let mut vm = machine();
        let array = vm.heap.new_array(&[Value::Int(1)]).unwrap();
        vm.push(array).unwrap();
        vm.push(Value::Int(2)).unwrap();
        add(&mut vm).unwrap();
        let Value::Array(result) = vm.pop().unwrap() else { panic!("expected an array") };
        assert_eq!(
            vm.heap.array_elements(result).unwrap(),
            vec![Value::Int(1), Value::Int(2)]
        );
    }

    #[test]
    fn pow_is_always_float() {
        assert_eq!(apply(pow, Value::Int(2), Value::Int(10)), Value::Float(1024.0));
    }

    #[test]
    fn unary_operators() {
        let mut vm = machine();
        vm.push(Value::UInt(5)).unwrap();
        neg(&mut vm).unwrap();
        assert_eq!(vm.pop().unwrap(), Value::Int(-5));
        vm.push(Value::Int(0)).unwrap();
        not(&mut vm).unwrap();
        assert_eq!(vm.pop().unwrap(), Value::Int(-1));
        vm.push(Value::Float(1.0)).unwrap();
        assert_eq!(not(&mut vm).unwrap_err().kind, ErrorKind::Type);
    }

    #[test]
    fn shifts_keep_the_sign_of_ints() {
        assert_eq!(apply(rsh, Value::Int(-8), Value::Int(1)), Value::Int(-4));
        assert_eq!(apply(rsh, Value::UInt(0x8000_0000), Value::Int(31)), Value::Int(1));
        assert_eq!(apply(lsh, Value::UInt(1), Value::UInt(4)), Value::UInt(16));
        assert_eq!(apply(and, Value::Int(6), Value::UInt(3)), Value::Int(2));
    }

    #[test]
    fn comparisons_push_flags() {
        assert_eq!(apply(lt, Value::Int(-1), Value::UInt(0)), Value::UInt(1));
        assert_eq!(apply(ge, Value::Float(2.0), Value::Int(3)), Value::UInt(0));
        assert_eq!(apply(le, Value::Float(f32::NAN), Value::Int(3)), Value::UInt(0));
        assert_eq!(apply(eq, Value::Int(3), Value::Float(3.0)), Value::UInt(1));
        assert_eq!(apply(ne, Value::Empty, Value::Empty), Value::UInt(0));
    }

    #[test]
    fn identity_comparisons_reject_mixed_kinds() {
        assert_eq!(apply(eq_id, Value::Int(3), Value::Float(3.0)), Value::UInt(0));
        assert_eq!(apply(ne_id, Value::Int(3), Value::Float(3.0)), Value::UInt(1));
        assert_eq!(apply(eq_id, Value::Int(3), Value::Int(3)), Value::UInt(1));
        assert_eq!(apply(lt_id, Value::Int(1), Value::Int(2)), Value::UInt(1));
    }

    #[test]
    fn string_equality_compares_contents() {
        let mut vm = machine();
        let a = vm.heap.new_string(b"same").unwrap();
        let b = vm.heap.new_string(b"same").unwrap();
        vm.push(a).unwrap();
        vm.push(b).unwrap();
        eq(&mut vm).unwrap();
        assert_eq!(vm.pop().unwrap(), Value::UInt(1));
    }
}
