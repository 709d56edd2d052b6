use crate::{Address, Allocator, Heap, MachineError, VALUE_SIZE, Value};

/// `[name][value: 8 bytes][next][prev]`
pub const MAP_ENTRY_SIZE: u32 = 20;

const ENTRY_VALUE: u32 = 4;
const ENTRY_NEXT: u32 = ENTRY_VALUE + VALUE_SIZE;
const ENTRY_PREV: u32 = ENTRY_NEXT + 4;

fn key_text(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

impl Heap {
    fn map_first(&self, map: Address) -> Result<Address, MachineError> {
        self.arena.read_address(map.add(4))
    }

    fn set_map_first(&mut self, map: Address, entry: Address) -> Result<(), MachineError> {
        self.arena.write_address(map.add(4), entry)
    }

    /// The prototype address, null when there is none.
    pub fn map_prototype(&self, map: Address) -> Result<Address, MachineError> {
        self.arena.read_address(map.add(8))
    }

    fn entry_name(&self, entry: Address) -> Result<&[u8], MachineError> {
        let name = self.arena.read_address(entry)?;
        self.arena.read_cstr(name)
    }

    fn entry_next(&self, entry: Address) -> Result<Address, MachineError> {
        self.arena.read_address(entry.add(ENTRY_NEXT))
    }

    fn find_entry(&self, map: Address, name: &[u8]) -> Result<Option<Address>, MachineError> {
        let mut entry = self.map_first(map)?;
        while !entry.is_null() {
            if self.entry_name(entry)? == name {
                return Ok(Some(entry));
            }
            entry = self.entry_next(entry)?;
        }
        Ok(None)
    }

    fn copy_name(&mut self, name: &[u8]) -> Result<Address, MachineError> {
        let address = self.malloc(name.len() + 1)?;
        self.arena.write_bytes(address, name)?;
        self.arena.write_bytes(address.add(name.len() as u32), &[0])?;
        Ok(address)
    }

    /// An empty map without prototype, holding one reference.
    pub fn new_map(&mut self) -> Result<Value, MachineError> {
        Ok(Value::Map(self.allocate_map(Address::NULL, 1)?))
    }

    /// Looks `name` up locally, then along the prototype chain. The value is
    /// returned as stored, without taking a reference.
    pub fn map_lookup(&self, map: Address, name: &[u8]) -> Result<Option<Value>, MachineError> {
        let mut current = map;
        loop {
            if let Some(entry) = self.find_entry(current, name)? {
                return self.arena.read_value(entry.add(ENTRY_VALUE)).map(Some);
            }
            current = self.map_prototype(current)?;
            if current.is_null() {
                return Ok(None);
            }
        }
    }

    /// Like [`Heap::map_lookup`], but the result carries a new reference.
    pub fn map_get(&mut self, map: Address, name: &[u8]) -> Result<Option<Value>, MachineError> {
        let value = self.map_lookup(map, name)?;
        if let Some(value) = value {
            self.retain(value)?;
        }
        Ok(value)
    }

    /// Prototype-aware, consistent with [`Heap::map_get`].
    pub fn map_has(&self, map: Address, name: &[u8]) -> Result<bool, MachineError> {
        Ok(self.map_lookup(map, name)?.is_some())
    }

    /// Stores `value`, moving its reference into the map. New keys are linked
    /// at the head of the entry list.
    pub fn map_set(&mut self, map: Address, name: &[u8], value: Value) -> Result<(), MachineError> {
        if let Some(entry) = self.find_entry(map, name)? {
            let old = self.arena.read_value(entry.add(ENTRY_VALUE))?;
            self.arena.write_value(entry.add(ENTRY_VALUE), value)?;
            return self.release(old);
        }

        let name = self.copy_name(name)?;
        let entry = self.malloc(MAP_ENTRY_SIZE as usize)?;
        let first = self.map_first(map)?;
        self.arena.write_address(entry, name)?;
        self.arena.write_value(entry.add(ENTRY_VALUE), value)?;
        self.arena.write_address(entry.add(ENTRY_NEXT), first)?;
        self.arena.write_address(entry.add(ENTRY_PREV), Address::NULL)?;
        if !first.is_null() {
            self.arena.write_address(first.add(ENTRY_PREV), entry)?;
        }
        self.set_map_first(map, entry)
    }

    fn unlink_entry(&mut self, map: Address, entry: Address) -> Result<(), MachineError> {
        let next = self.entry_next(entry)?;
        let prev = self.arena.read_address(entry.add(ENTRY_PREV))?;
        if prev.is_null() {
            self.set_map_first(map, next)?;
        } else {
            self.arena.write_address(prev.add(ENTRY_NEXT), next)?;
        }
        if !next.is_null() {
            self.arena.write_address(next.add(ENTRY_PREV), prev)?;
        }
        Ok(())
    }

    /// Removes a local key. The prototype chain is not consulted.
    pub fn map_delete(&mut self, map: Address, name: &[u8]) -> Result<(), MachineError> {
        let entry = self.find_entry(map, name)?.ok_or_else(|| {
            MachineError::lookup(format!("map has no key '{}'", key_text(name)))
        })?;
        self.unlink_entry(map, entry)?;
        let value = self.arena.read_value(entry.add(ENTRY_VALUE))?;
        let name = self.arena.read_address(entry)?;
        self.free(name)?;
        self.free(entry)?;
        self.release(value)
    }

    /// Number of local entries.
    pub fn map_len(&self, map: Address) -> Result<u32, MachineError> {
        let mut count = 0;
        let mut entry = self.map_first(map)?;
        while !entry.is_null() {
            count += 1;
            entry = self.entry_next(entry)?;
        }
        Ok(count)
    }

    /// Local entries in list order, values as stored.
    pub fn map_entries(&self, map: Address) -> Result<Vec<(Vec<u8>, Value)>, MachineError> {
        let mut entries = Vec::new();
        let mut entry = self.map_first(map)?;
        while !entry.is_null() {
            let name = self.entry_name(entry)?.to_vec();
            entries.push((name, self.arena.read_value(entry.add(ENTRY_VALUE))?));
            entry = self.entry_next(entry)?;
        }
        Ok(entries)
    }

    /// Copies the entries of `source` into `target`, keeping their order.
    fn map_extend(&mut self, target: Address, source: Address) -> Result<(), MachineError> {
        for (name, value) in self.map_entries(source)?.into_iter().rev() {
            self.retain(value)?;
            self.map_set(target, &name, value)?;
        }
        Ok(())
    }

    /// Shallow copy sharing values and prototype.
    pub fn map_copy(&mut self, map: Address) -> Result<Value, MachineError> {
        let prototype = self.map_prototype(map)?;
        if !prototype.is_null() {
            self.retain(Value::Map(prototype))?;
        }
        let copy = self.allocate_map(prototype, 1)?;
        self.map_extend(copy, map)?;
        Ok(Value::Map(copy))
    }

    /// A new map with the entries of `a`, overridden by those of `b`. It
    /// inherits the prototype of `a`.
    pub fn map_merge(&mut self, a: Address, b: Address) -> Result<Value, MachineError> {
        let merged = self.map_copy(a)?;
        if let Value::Map(address) = merged {
            self.map_extend(address, b)?;
        }
        Ok(merged)
    }

    /// The prototype with a new reference, or `Empty`.
    pub fn map_get_prototype(&mut self, map: Address) -> Result<Value, MachineError> {
        let prototype = self.map_prototype(map)?;
        if prototype.is_null() {
            return Ok(Value::Empty);
        }
        let value = Value::Map(prototype);
        self.retain(value)?;
        Ok(value)
    }

    /// Replaces the prototype. The map takes its own reference to the new
    /// prototype and drops the one to the old. Chains must stay acyclic.
    pub fn map_set_prototype(&mut self, map: Address, prototype: Option<Address>) -> Result<(), MachineError> {
        let prototype = prototype.unwrap_or(Address::NULL);
        let mut link = prototype;
        while !link.is_null() {
            if link == map {
                return Err(MachineError::type_error(format!(
                    "prototype {prototype} would make map {map} its own ancestor"
                )));
            }
            link = self.map_prototype(link)?;
        }

        let old = self.map_prototype(map)?;
        if !prototype.is_null() {
            self.retain(Value::Map(prototype))?;
        }
        self.arena.write_address(map.add(8), prototype)?;
        if !old.is_null() {
            self.release(Value::Map(old))?;
        }
        Ok(())
    }

    /// Renames a local key, replacing an existing entry called `new`.
    pub fn map_rename_key(&mut self, map: Address, old: &[u8], new: &[u8]) -> Result<(), MachineError> {
        let entry = self.find_entry(map, old)?.ok_or_else(|| {
            MachineError::lookup(format!("map has no key '{}'", key_text(old)))
        })?;
        if old == new {
            return Ok(());
        }
        if self.find_entry(map, new)?.is_some() {
            self.map_delete(map, new)?;
        }
        let name = self.copy_name(new)?;
        let previous = self.arena.read_address(entry)?;
        self.arena.write_address(entry, name)?;
        self.free(previous)
    }

    /// The local keys as a new array of strings.
    pub fn map_keys(&mut self, map: Address) -> Result<Value, MachineError> {
        let names: Vec<Vec<u8>> = self
            .map_entries(map)?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        let mut keys = Vec::with_capacity(names.len());
        for name in names {
            keys.push(self.new_string(&name)?);
        }
        self.new_array(&keys)
    }
}
