use std::{cmp::Ordering, fmt};

use crate::{Address, Arena, MachineError};

/// Size of a machine word in bytes.
pub const WORD_SIZE: u32 = 4;

/// Size of an encoded value record: tag word followed by payload word.
pub const VALUE_SIZE: u32 = 8;

/// Refcount marking an object as static; it is never retained, released or freed.
pub const STATIC_REFCOUNT: u32 = u32::MAX;

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int = 0,
    UInt = 1,
    Float = 2,
    String = 3,
    Ref = 4,
    Map = 5,
    Array = 6,
    Empty = 7,
    Unknown = 8,
}

impl ValueKind {
    #[must_use]
    pub const fn from_tag(tag: u32) -> Self {
        match tag {
            0 => Self::Int,
            1 => Self::UInt,
            2 => Self::Float,
            3 => Self::String,
            4 => Self::Ref,
            5 => Self::Map,
            6 => Self::Array,
            7 => Self::Empty,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::String => "string",
            Self::Ref => "ref",
            Self::Map => "map",
            Self::Array => "array",
            Self::Empty => "empty",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub const fn is_refcounted(self) -> bool {
        matches!(self, Self::String | Self::Map | Self::Array)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The tagged value that lives in stack slots, registers, array elements
/// and map entries.
///
/// `String`, `Map` and `Array` point at refcounted heap objects; `Ref` is a
/// plain address (return addresses, frame marks, references to slots) and
/// owns nothing.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    UInt(u32),
    Float(f32),
    String(Address),
    Ref(Address),
    Map(Address),
    Array(Address),
    Empty,
    Unknown(u32),
}

impl Default for Value {
    fn default() -> Self {
        Value::Int(0)
    }
}

/// Numeric view of a value used by arithmetic and comparisons.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Number {
    Integer(i64),
    Float(f64),
}

impl Number {
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Integer(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    #[must_use]
    pub fn compare(self, other: Number) -> Option<Ordering> {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }
}

impl Value {
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::UInt(_) => ValueKind::UInt,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Ref(_) => ValueKind::Ref,
            Value::Map(_) => ValueKind::Map,
            Value::Array(_) => ValueKind::Array,
            Value::Empty => ValueKind::Empty,
            Value::Unknown(_) => ValueKind::Unknown,
        }
    }

    /// Raw payload bits.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> u32 {
        match *self {
            Value::Int(i) => i as u32,
            Value::UInt(u) | Value::Unknown(u) => u,
            Value::Float(f) => f.to_bits(),
            Value::String(a) | Value::Ref(a) | Value::Map(a) | Value::Array(a) => a.raw(),
            Value::Empty => 0,
        }
    }

    /// Reinterprets `payload` as a value of `kind`.
    #[must_use]
    pub fn from_parts(kind: ValueKind, payload: u32) -> Self {
        match kind {
            ValueKind::Int => Value::Int(payload as i32),
            ValueKind::UInt => Value::UInt(payload),
            ValueKind::Float => Value::Float(f32::from_bits(payload)),
            ValueKind::String => Value::String(Address::new(payload)),
            ValueKind::Ref => Value::Ref(Address::new(payload)),
            ValueKind::Map => Value::Map(Address::new(payload)),
            ValueKind::Array => Value::Array(Address::new(payload)),
            ValueKind::Empty => Value::Empty,
            ValueKind::Unknown => Value::Unknown(payload),
        }
    }

    #[inline]
    #[must_use]
    pub fn from_words(tag: u32, payload: u32) -> Self {
        Self::from_parts(ValueKind::from_tag(tag), payload)
    }

    #[inline]
    #[must_use]
    pub fn from_bool(value: bool) -> Self {
        Value::UInt(u32::from(value))
    }

    /// The heap object this value keeps alive, if any.
    #[inline]
    #[must_use]
    pub fn heap_object(&self) -> Option<Address> {
        match *self {
            Value::String(a) | Value::Map(a) | Value::Array(a) if !a.is_null() => Some(a),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn number(&self) -> Option<Number> {
        match *self {
            Value::Int(i) => Some(Number::Integer(i64::from(i))),
            Value::UInt(u) => Some(Number::Integer(i64::from(u))),
            Value::Float(f) => Some(Number::Float(f64::from(f))),
            _ => None,
        }
    }

    /// Orders two numeric values. `Ok(None)` means unordered (NaN).
    pub fn compare_numeric(&self, other: &Value) -> Result<Option<Ordering>, MachineError> {
        match (self.number(), other.number()) {
            (Some(a), Some(b)) => Ok(a.compare(b)),
            _ => Err(MachineError::type_error(format!(
                "comparison has not been defined for {} and {}",
                self.kind(),
                other.kind()
            ))),
        }
    }
}

impl Arena {
    pub fn read_value(&self, address: Address) -> Result<Value, MachineError> {
        let tag = self.read_u32(address)?;
        let payload = self.read_u32(address.add(WORD_SIZE))?;
        Ok(Value::from_words(tag, payload))
    }

    pub fn write_value(&mut self, address: Address, value: Value) -> Result<(), MachineError> {
        self.write_u32(address, value.kind() as u32)?;
        self.write_u32(address.add(WORD_SIZE), value.payload())
    }
}
