use std::path::{Path, PathBuf};

use bitflags::bitflags;

use crate::{Address, Allocator, Machine, MachineError, STATIC_REFCOUNT, Value, bytecode::Op};

/// Leading bytes of every module image.
pub const MODULE_MAGIC: &[u8; 4] = b"funk";
/// File extension appended when resolving module names.
pub const MODULE_EXTENSION: &str = "funk";
/// magic, flags, word size, export count, start of code
pub const MODULE_HEADER_SIZE: usize = 4 + 1 + 1 + 4 + 4;
/// Word size in bytes a module must be compiled for.
pub const MODULE_WORD_SIZE: u8 = 4;
/// Export-map key pointing at the start of code.
pub const INIT_EXPORT: &[u8] = b"@init";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModuleFlags: u8 {
        const LITTLE_ENDIAN = 1 << 0;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("could not read module {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("module image of {0} bytes is too short for its header")]
    Truncated(usize),
    #[error("not a bytecode module")]
    BadMagic,
    #[error("module is compiled for big endian machines")]
    BigEndian,
    #[error("module is compiled for {0} byte words, this machine uses 4")]
    WordSize(u8),
    #[error("start of code {start} lies outside the {size} byte module")]
    BadEntry { start: u32, size: usize },
    #[error("module '{0}' was not found in any search path")]
    NotFound(String),
}

impl From<ModuleError> for MachineError {
    fn from(err: ModuleError) -> Self {
        MachineError::lookup(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleHeader {
    pub flags: ModuleFlags,
    pub word_size: u8,
    pub export_count: u32,
    pub start_of_code: u32,
}

impl ModuleHeader {
    #[must_use]
    pub fn new(export_count: u32, start_of_code: u32) -> Self {
        Self {
            flags: ModuleFlags::LITTLE_ENDIAN,
            word_size: MODULE_WORD_SIZE,
            export_count,
            start_of_code,
        }
    }

    fn word(bytes: &[u8], at: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[at..at + 4]);
        u32::from_le_bytes(word)
    }

    /// Splits a module image into its header and blob.
    pub fn parse(image: &[u8]) -> Result<(Self, &[u8]), ModuleError> {
        if image.len() < MODULE_HEADER_SIZE {
            return Err(ModuleError::Truncated(image.len()));
        }
        if &image[..4] != MODULE_MAGIC {
            return Err(ModuleError::BadMagic);
        }
        let flags = ModuleFlags::from_bits_truncate(image[4]);
        if !flags.contains(ModuleFlags::LITTLE_ENDIAN) {
            return Err(ModuleError::BigEndian);
        }
        if image[5] != MODULE_WORD_SIZE {
            return Err(ModuleError::WordSize(image[5]));
        }
        let header = Self {
            flags,
            word_size: image[5],
            export_count: Self::word(image, 6),
            start_of_code: Self::word(image, 10),
        };
        let blob = &image[MODULE_HEADER_SIZE..];
        if header.start_of_code as usize > blob.len() {
            return Err(ModuleError::BadEntry {
                start: header.start_of_code,
                size: blob.len(),
            });
        }
        Ok((header, blob))
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MODULE_HEADER_SIZE);
        bytes.extend_from_slice(MODULE_MAGIC);
        bytes.push(self.flags.bits());
        bytes.push(self.word_size);
        bytes.extend_from_slice(&self.export_count.to_le_bytes());
        bytes.extend_from_slice(&self.start_of_code.to_le_bytes());
        bytes
    }
}

/// A module resident in the arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: String,
    pub base: Address,
    /// Blob size including the trailing `ret`.
    pub size: u32,
    pub export_count: u32,
    pub start_of_code: u32,
    /// Static export map built on first link.
    pub ref_map: Address,
    pub links: u32,
}

impl Module {
    #[inline]
    #[must_use]
    pub fn contains(&self, address: Address) -> bool {
        address >= self.base && address.raw() < self.base.raw() + self.size
    }

    #[inline]
    #[must_use]
    pub fn entry(&self) -> Address {
        self.base.add(self.start_of_code)
    }
}

impl Machine {
    /// Copies a module image into the arena and registers it under `name`.
    pub fn load_module(&mut self, name: &str, image: &[u8]) -> Result<usize, MachineError> {
        let (header, blob) = ModuleHeader::parse(image)?;
        let size = blob.len() + 1;
        let base = self.heap.calloc(size, 1)?;
        let arena = self.heap.arena_mut();
        arena.write_bytes(base, blob)?;
        arena.write_bytes(base.add(blob.len() as u32), &[Op::Ret as u8])?;

        log::debug!(
            "loaded module '{name}' at {base} ({size} bytes, {} exports)",
            header.export_count
        );
        self.modules.push(Module {
            name: name.to_owned(),
            base,
            size: size as u32,
            export_count: header.export_count,
            start_of_code: header.start_of_code,
            ref_map: Address::NULL,
            links: 0,
        });
        Ok(self.modules.len() - 1)
    }

    /// Loads a module file, naming it after the file stem.
    pub fn load_module_file(&mut self, path: &Path) -> Result<usize, MachineError> {
        let image = std::fs::read(path).map_err(|source| ModuleError::Io {
            path: path.to_owned(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.load_module(&name, &image)
    }

    /// Finds `name.funk` in the configured search paths.
    pub fn resolve_module_path(&self, name: &str) -> Result<PathBuf, ModuleError> {
        self.module_paths
            .iter()
            .map(|dir| dir.join(name).with_extension(MODULE_EXTENSION))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| ModuleError::NotFound(name.to_owned()))
    }

    #[must_use]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    #[must_use]
    pub fn module_index(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.name == name)
    }

    fn module(&self, index: usize) -> Result<&Module, MachineError> {
        self.modules
            .get(index)
            .ok_or_else(|| MachineError::lookup(format!("module index {index} is not loaded")))
    }

    /// The module whose code contains `address`.
    pub fn module_at(&self, address: Address) -> Result<&Module, MachineError> {
        self.modules
            .iter()
            .find(|m| m.contains(address))
            .ok_or_else(|| MachineError::lookup(format!("no module contains address {address}")))
    }

    /// The export table at the start of a module blob.
    pub fn module_exports(&self, index: usize) -> Result<Vec<(Vec<u8>, u32)>, MachineError> {
        let module = self.module(index)?;
        let arena = self.heap.arena();
        let mut exports = Vec::with_capacity(module.export_count.min(256) as usize);
        let mut cursor = module.base;
        for _ in 0..module.export_count {
            let name = arena.read_cstr(cursor)?.to_vec();
            cursor = cursor.add(name.len() as u32 + 1);
            exports.push((name, arena.read_u32(cursor)?));
            cursor = cursor.add(4);
        }
        Ok(exports)
    }

    /// Address of an export, or `None` if the module does not export `name`.
    pub fn export_address(&self, index: usize, name: &[u8]) -> Result<Option<Address>, MachineError> {
        let base = self.module(index)?.base;
        Ok(self
            .module_exports(index)?
            .into_iter()
            .find(|(export, _)| export == name)
            .map(|(_, offset)| base.add(offset)))
    }

    /// Loads `name` if necessary, counts the link and returns its export map.
    pub fn link_module(&mut self, name: &str) -> Result<Address, MachineError> {
        let index = match self.module_index(name) {
            Some(index) => index,
            None => {
                let path = self.resolve_module_path(name)?;
                self.load_module_file(&path)?
            }
        };

        if self.modules[index].ref_map.is_null() {
            let base = self.modules[index].base;
            let entry = self.modules[index].entry();
            let exports = self.module_exports(index)?;
            let map = self.heap.allocate_map(Address::NULL, STATIC_REFCOUNT)?;
            for (export, offset) in exports {
                self.heap.map_set(map, &export, Value::Ref(base.add(offset)))?;
            }
            self.heap.map_set(map, INIT_EXPORT, Value::Ref(entry))?;
            self.modules[index].ref_map = map;
        }

        let module = &mut self.modules[index];
        module.links += 1;
        log::debug!("linked module '{name}' ({} link(s))", module.links);
        Ok(module.ref_map)
    }

    /// Drops a link; the last one frees the module.
    pub fn unlink_module(&mut self, name: &str) -> Result<(), MachineError> {
        let index = self
            .module_index(name)
            .ok_or_else(|| MachineError::lookup(format!("module '{name}' is not loaded")))?;
        let module = &mut self.modules[index];
        module.links = module.links.saturating_sub(1);
        if module.links > 0 {
            return Ok(());
        }

        let module = self.modules.remove(index);
        let base = module.base.raw();
        self.syscalls.forget_range(base, base.saturating_add(module.size));
        if !module.ref_map.is_null() {
            // the export map only holds refs, dropping it frees names and entries
            self.heap.arena_mut().write_u32(module.ref_map, 1)?;
            self.heap.release(Value::Map(module.ref_map))?;
        }
        self.heap.free(module.base)?;
        log::debug!("unloaded module '{name}'");
        Ok(())
    }
}
