use std::collections::HashMap;

use crate::{Machine, MachineError};

/// A host function callable from bytecode. It works directly on the operand
/// stack: arguments are whatever the caller left there.
pub type SyscallFn = fn(&mut Machine) -> Result<(), MachineError>;

#[derive(Debug, Clone)]
pub struct Syscall {
    pub name: String,
    pub function: SyscallFn,
}

/// Host bindings by index, plus a resolution cache for `syscall_byname`
/// keyed by call-site address.
#[derive(Debug, Default)]
pub struct SyscallTable {
    entries: Vec<Option<Syscall>>,
    call_sites: HashMap<u32, usize, ahash::RandomState>,
}

impl SyscallTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name`, replacing an existing binding of the same name in place.
    pub fn register(&mut self, name: &str, function: SyscallFn) -> usize {
        let syscall = Syscall {
            name: name.to_owned(),
            function,
        };
        if let Some(index) = self.index_of(name) {
            self.entries[index] = Some(syscall);
            return index;
        }
        log::debug!("registered syscall '{name}' as {}", self.entries.len());
        self.entries.push(Some(syscall));
        self.entries.len() - 1
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let Some(index) = self.index_of(name) else {
            return false;
        };
        self.entries[index] = None;
        self.call_sites.retain(|_, cached| *cached != index);
        true
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.as_ref().is_some_and(|s| s.name == name))
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Syscall> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    /// Number of bound syscalls.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn cached(&self, site: u32) -> Option<usize> {
        self.call_sites.get(&site).copied()
    }

    pub(crate) fn cache(&mut self, site: u32, index: usize) {
        self.call_sites.insert(site, index);
    }

    /// Drops cached resolutions for call sites in `start..end`.
    pub(crate) fn forget_range(&mut self, start: u32, end: u32) {
        self.call_sites.retain(|site, _| !(start..end).contains(site));
    }
}

/// Prints the display text of the top value without popping it.
pub fn print(machine: &mut Machine) -> Result<(), MachineError> {
    let top = machine.peek(0)?;
    let text = machine.heap.display_bytes(top)?;
    println!("{}", String::from_utf8_lossy(&text));
    Ok(())
}

pub fn register_default_bindings(table: &mut SyscallTable) {
    table.register("print", print);
}

impl Machine {
    pub(crate) fn invoke_syscall(&mut self, index: usize) -> Result<(), MachineError> {
        let function = self
            .syscalls
            .get(index)
            .map(|syscall| syscall.function)
            .ok_or_else(|| MachineError::lookup(format!("syscall {index} is not bound")))?;
        function(self)
    }

    /// Resolves `name` once per call site and invokes it.
    pub(crate) fn invoke_syscall_by_name(&mut self, site: u32, name: &str) -> Result<(), MachineError> {
        let index = match self.syscalls.cached(site) {
            Some(index) => index,
            None => {
                let index = self.syscalls.index_of(name).ok_or_else(|| {
                    MachineError::lookup(format!("syscall '{name}' is not bound"))
                })?;
                self.syscalls.cache(site, index);
                index
            }
        };
        self.invoke_syscall(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorKind, MachineCreateInfo, Value};

    fn double(machine: &mut Machine) -> Result<(), MachineError> {
        let Value::Int(i) = machine.pop()? else {
            return Err(MachineError::type_error("double expects an int"));
        };
        machine.push(Value::Int(i * 2))
    }

    #[test]
    fn print_is_bound_by_default() {
        let table = {
            let mut table = SyscallTable::new();
            register_default_bindings(&mut table);
            table
        };
        assert_eq!(table.index_of("print"), Some(0));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn registering_a_name_twice_keeps_its_index() {
        let mut table = SyscallTable::new();
        let first = table.register("f", double);
        table.register("g", double);
        assert_eq!(table.register("f", print), first);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn unregistering_drops_cached_call_sites() {
        let mut table = SyscallTable::new();
        let index = table.register("f", double);
        table.cache(40, index);
        assert!(table.unregister("f"));
        assert_eq!(table.cached(40), None);
        assert!(table.get(index).is_none());
        assert!(!table.unregister("f"));
    }

    #[test]
    fn forgetting_a_range_keeps_sites_outside_it() {
        let mut table = SyscallTable::new();
        let index = table.register("f", double);
        for site in [8, 16, 24, 32] {
            table.cache(site, index);
        }
        table.forget_range(16, 32);
        assert_eq!(table.cached(8), Some(index));
        assert_eq!(table.cached(16), None);
        assert_eq!(table.cached(24), None);
        assert_eq!(table.cached(32), Some(index));
    }

    #[test]
    fn by_name_resolution_is_cached_per_site() {
        let mut vm = Machine::new(MachineCreateInfo::default()).unwrap();
        let index = vm.register_syscall("double", double);
        vm.push(Value::Int(21)).unwrap();
        vm.invoke_syscall_by_name(100, "double").unwrap();
        assert_eq!(vm.pop().unwrap(), Value::Int(42));
        assert_eq!(vm.syscalls().cached(100), Some(index));

        let err = vm.invoke_syscall_by_name(104, "missing").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Lookup);
    }
}
