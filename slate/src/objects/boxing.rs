use crate::{Address, Allocator, Heap, MachineError, STATIC_REFCOUNT, Value, ValueKind};

/// Key under which a boxed primitive is stored.
pub const BOX_VALUE_KEY: &[u8] = b"value";

/// The static prototype maps given to boxed primitives, one per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxingPrototypes {
    pub int: Address,
    pub uint: Address,
    pub float: Address,
    pub string: Address,
    pub array: Address,
    pub map: Address,
}

impl BoxingPrototypes {
    pub fn create(heap: &mut Heap) -> Result<Self, MachineError> {
        let mut prototype = || heap.allocate_map(Address::NULL, STATIC_REFCOUNT);
        Ok(Self {
            int: prototype()?,
            uint: prototype()?,
            float: prototype()?,
            string: prototype()?,
            array: prototype()?,
            map: prototype()?,
        })
    }

    #[must_use]
    pub fn for_kind(&self, kind: ValueKind) -> Option<Address> {
        match kind {
            ValueKind::Int => Some(self.int),
            ValueKind::UInt => Some(self.uint),
            ValueKind::Float => Some(self.float),
            ValueKind::String => Some(self.string),
            ValueKind::Array => Some(self.array),
            ValueKind::Map => Some(self.map),
            ValueKind::Ref | ValueKind::Empty | ValueKind::Unknown => None,
        }
    }
}

impl Heap {
    /// Wraps `value` (moving its reference) in a fresh map whose prototype is
    /// the static prototype of its kind.
    pub fn box_value(&mut self, prototypes: &BoxingPrototypes, value: Value) -> Result<Value, MachineError> {
        let prototype = prototypes.for_kind(value.kind()).ok_or_else(|| {
            MachineError::type_error(format!("can't box a value of kind {}", value.kind()))
        })?;
        let boxed = self.allocate_map(prototype, 1)?;
        self.map_set(boxed, BOX_VALUE_KEY, value)?;
        Ok(Value::Map(boxed))
    }

    /// Extracts the boxed value, consuming the reference to `boxed`.
    pub fn unbox_value(&mut self, boxed: Value) -> Result<Value, MachineError> {
        let Value::Map(map) = boxed else {
            return Err(MachineError::type_error(format!(
                "can't unbox a value of kind {}",
                boxed.kind()
            )));
        };
        let value = self.map_get(map, BOX_VALUE_KEY)?.ok_or_else(|| {
            MachineError::lookup("can't unbox a map without a 'value' entry")
        })?;
        self.release(boxed)?;
        Ok(value)
    }
}
