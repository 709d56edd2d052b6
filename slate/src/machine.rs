use std::path::PathBuf;

use crate::{
    Address, Allocator, BoxingPrototypes, DebugContext, Heap, HeapCreateInfo, HeapSettings,
    MachineError, Module, SyscallFn, SyscallTable, VALUE_SIZE, Value, bytecode::Op,
    instructions::DISPATCH, syscall,
};

pub const GENERAL_REGISTERS: usize = 8;
pub const DEFAULT_STACK_SLOTS: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Registers {
    pub pc: u32,
    pub sp: u32,
    pub mp: u32,
    pub ap: u32,
    pub rr: Value,
    pub general: [Value; GENERAL_REGISTERS],
}

/// Register ids as encoded in `ld_reg` / `st_reg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Pc,
    Sp,
    Mp,
    Ap,
    Rr,
    General(usize),
}

impl Register {
    pub fn from_id(id: u32) -> Result<Self, MachineError> {
        match id {
            0 => Ok(Register::Pc),
            1 => Ok(Register::Sp),
            2 => Ok(Register::Mp),
            3 => Ok(Register::Ap),
            4 => Ok(Register::Rr),
            5..=12 => Ok(Register::General(id as usize - 5)),
            _ => Err(MachineError::lookup(format!("register id {id} is not defined"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MachineCreateInfo {
    pub heap: HeapCreateInfo,
    /// Operand stack capacity in values.
    pub stack_slots: Option<usize>,
    /// Directories searched when a module is linked by name.
    pub module_paths: Vec<PathBuf>,
}

impl Default for MachineCreateInfo {
    fn default() -> Self {
        Self {
            heap: HeapCreateInfo::default(),
            stack_slots: None,
            module_paths: vec![PathBuf::from(".")],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Halted,
    /// The instruction budget ran out; call again to resume.
    Yielded,
}

/// One interpreter instance: the arena-backed heap, the register file, the
/// operand stack and the loaded modules.
#[derive(Debug)]
pub struct Machine {
    pub heap: Heap,
    pub registers: Registers,
    pub debug: DebugContext,
    pub(crate) stack_base: Address,
    pub(crate) stack_end: Address,
    running: bool,
    /// Opcode and address of the instruction being executed.
    pub(crate) opcode: u8,
    pub(crate) instruction: Address,
    pub(crate) modules: Vec<Module>,
    pub(crate) module_paths: Vec<PathBuf>,
    pub(crate) syscalls: SyscallTable,
    pub(crate) prototypes: BoxingPrototypes,
}

impl Machine {
    pub fn new(info: MachineCreateInfo) -> Result<Self, MachineError> {
        let mut heap = Heap::new(HeapSettings::from(info.heap))?;
        let slots = info.stack_slots.unwrap_or(DEFAULT_STACK_SLOTS);
        if slots == 0 {
            return Err(MachineError::control("the operand stack needs at least one slot"));
        }
        let stack_base = heap.calloc(slots, VALUE_SIZE as usize)?;
        let stack_end = stack_base.add(slots as u32 * VALUE_SIZE);
        let prototypes = BoxingPrototypes::create(&mut heap)?;

        let mut syscalls = SyscallTable::new();
        syscall::register_default_bindings(&mut syscalls);

        log::debug!("created machine with {slots} stack slots at {stack_base}");
        Ok(Self {
            heap,
            registers: Registers {
                sp: stack_base.sub(VALUE_SIZE).raw(),
                mp: stack_base.raw(),
                ap: stack_base.raw(),
                ..Registers::default()
            },
            debug: DebugContext::default(),
            stack_base,
            stack_end,
            running: false,
            opcode: 0,
            instruction: Address::NULL,
            modules: Vec::new(),
            module_paths: info.module_paths,
            syscalls,
            prototypes,
        })
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Stops the dispatch loop after the current instruction.
    pub fn halt(&mut self) {
        self.running = false;
    }

    #[must_use]
    pub fn prototypes(&self) -> &BoxingPrototypes {
        &self.prototypes
    }

    #[must_use]
    pub fn stack_base(&self) -> Address {
        self.stack_base
    }

    #[must_use]
    pub fn return_value(&self) -> Value {
        self.registers.rr
    }

    /// Replaces the return register, dropping its previous value.
    pub fn set_return_value(&mut self, value: Value) -> Result<(), MachineError> {
        let old = std::mem::replace(&mut self.registers.rr, value);
        self.heap.release(old)
    }

    pub fn add_module_path(&mut self, path: impl Into<PathBuf>) {
        self.module_paths.push(path.into());
    }

    pub fn register_syscall(&mut self, name: &str, function: SyscallFn) -> usize {
        self.syscalls.register(name, function)
    }

    #[must_use]
    pub fn syscalls(&self) -> &SyscallTable {
        &self.syscalls
    }

    /// Prepares execution at the start of code of a loaded module.
    pub fn set_entry(&mut self, module: usize) -> Result<(), MachineError> {
        let entry = self
            .modules
            .get(module)
            .map(Module::entry)
            .ok_or_else(|| MachineError::lookup(format!("module index {module} is not loaded")))?;
        self.start_at(entry);
        Ok(())
    }

    pub fn start_at(&mut self, address: Address) {
        self.registers.pc = address.raw();
        self.running = true;
    }

    /// Runs until the machine halts and returns the return register.
    pub fn run(&mut self) -> Result<Value, MachineError> {
        while self.running {
            if let Err(err) = self.step() {
                return Err(self.fail(err));
            }
        }
        Ok(self.registers.rr)
    }

    /// Runs at most `budget` instructions.
    pub fn run_slice(&mut self, budget: usize) -> Result<RunState, MachineError> {
        for _ in 0..budget {
            if !self.running {
                return Ok(RunState::Halted);
            }
            if let Err(err) = self.step() {
                return Err(self.fail(err));
            }
        }
        Ok(if self.running {
            RunState::Yielded
        } else {
            RunState::Halted
        })
    }

    /// Fetches, decodes and executes one instruction.
    pub fn step(&mut self) -> Result<(), MachineError> {
        let at = Address::new(self.registers.pc);
        let opcode = self.heap.arena().read_u8(at)?;
        self.instruction = at;
        self.opcode = opcode;
        self.registers.pc = at.add(1).raw();
        if log::log_enabled!(log::Level::Trace) {
            let name = Op::from_byte(opcode).map_or("???", Op::mnemonic);
            log::trace!("{at}: {name} (depth {})", self.depth());
        }
        DISPATCH[opcode as usize](self)
    }

    fn fail(&mut self, err: MachineError) -> MachineError {
        self.running = false;
        let err = err.with_trace(self.debug.trace());
        log::error!("{err}");
        for line in &err.trace {
            log::error!("  {line}");
        }
        err
    }

    /// Normal termination. A value left on the stack becomes the result.
    pub(crate) fn finish(&mut self) -> Result<(), MachineError> {
        if self.depth() > 0 {
            let result = self.pop()?;
            self.set_return_value(result)?;
        }
        self.running = false;
        Ok(())
    }

    // ── registers ─────────────────────────────────────────────────

    #[must_use]
    pub fn register(&self, register: Register) -> Value {
        match register {
            Register::Pc => Value::Int(self.registers.pc as i32),
            Register::Sp => Value::Int(self.registers.sp as i32),
            Register::Mp => Value::Int(self.registers.mp as i32),
            Register::Ap => Value::Int(self.registers.ap as i32),
            Register::Rr => self.registers.rr,
            Register::General(i) => self.registers.general[i],
        }
    }

    /// Stores into a register. Pointer registers take the payload bits; value
    /// registers take ownership and drop what they held.
    pub fn set_register(&mut self, register: Register, value: Value) -> Result<(), MachineError> {
        match register {
            Register::Pc => self.registers.pc = value.payload(),
            Register::Sp => self.registers.sp = value.payload(),
            Register::Mp => self.registers.mp = value.payload(),
            Register::Ap => self.registers.ap = value.payload(),
            Register::Rr => return self.set_return_value(value),
            Register::General(i) => {
                let old = std::mem::replace(&mut self.registers.general[i], value);
                return self.heap.release(old);
            }
        }
        Ok(())
    }

    // ── operands ──────────────────────────────────────────────────

    pub(crate) fn fetch_u32(&mut self) -> Result<u32, MachineError> {
        let at = Address::new(self.registers.pc);
        let word = self.heap.arena().read_u32(at)?;
        self.registers.pc = at.add(4).raw();
        Ok(word)
    }

    pub(crate) fn fetch_i32(&mut self) -> Result<i32, MachineError> {
        self.fetch_u32().map(|word| word as i32)
    }

    pub(crate) fn fetch_f32(&mut self) -> Result<f32, MachineError> {
        self.fetch_u32().map(f32::from_bits)
    }

    /// Base address of the module holding the current instruction.
    pub(crate) fn module_base(&self) -> Result<Address, MachineError> {
        Ok(self.module_at(self.instruction)?.base)
    }

    /// A module-relative operand resolved to an arena address.
    pub(crate) fn fetch_code_address(&mut self) -> Result<Address, MachineError> {
        let base = self.module_base()?;
        Ok(base.add(self.fetch_u32()?))
    }

    /// Bytes of the static string named by a module-relative operand.
    pub(crate) fn fetch_string(&mut self) -> Result<Vec<u8>, MachineError> {
        let at = self.fetch_code_address()?;
        Ok(self.heap.string_bytes(at)?.to_vec())
    }

    pub(crate) fn fetch_name(&mut self) -> Result<String, MachineError> {
        self.fetch_string()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BytecodeWriter, ErrorKind, PAGE_SIZE};

    fn machine() -> Machine {
        Machine::new(MachineCreateInfo::default()).unwrap()
    }

    fn run(code: BytecodeWriter) -> Machine {
        let mut vm = machine();
        let index = vm.load_module("test", &code.into_module()).unwrap();
        vm.set_entry(index).unwrap();
        vm.run().unwrap();
        vm
    }

    #[test]
    fn initial_state_has_an_empty_stack() {
        let vm = machine();
        assert_eq!(vm.depth(), 0);
        assert!(!vm.is_running());
        assert_eq!(vm.registers.rr, Value::Int(0));
    }

    #[test]
    fn zero_stack_slots_are_rejected() {
        let info = MachineCreateInfo {
            stack_slots: Some(0),
            ..MachineCreateInfo::default()
        };
        assert!(Machine::new(info).is_err());
    }

    #[test]
    fn register_ids_map_to_registers() {
        assert_eq!(Register::from_id(0).unwrap(), Register::Pc);
        assert_eq!(Register::from_id(4).unwrap(), Register::Rr);
        assert_eq!(Register::from_id(5).unwrap(), Register::General(0));
        assert_eq!(Register::from_id(12).unwrap(), Register::General(7));
        assert_eq!(Register::from_id(13).unwrap_err().kind, ErrorKind::Lookup);
    }

    #[test]
    fn halt_moves_the_top_of_stack_into_rr() {
        let mut code = BytecodeWriter::new();
        code.ld_int(3).ld_int(4).op(Op::Add).op(Op::Halt);
        let vm = run(code);
        assert_eq!(vm.return_value(), Value::Int(7));
        assert!(!vm.is_running());
        assert_eq!(vm.depth(), 0);
    }

    #[test]
    fn ret_on_an_empty_stack_halts() {
        let mut code = BytecodeWriter::new();
        code.op(Op::Ret).ld_int(1);
        let vm = run(code);
        assert_eq!(vm.return_value(), Value::Int(0));
    }

    #[test]
    fn unimplemented_opcodes_fail_with_a_control_error() {
        let mut vm = machine();
        let mut writer = BytecodeWriter::new();
        writer.emit_bytes(&[0xFF]);
        let index = vm.load_module("bad", &writer.into_module()).unwrap();
        vm.set_entry(index).unwrap();
        let err = vm.run().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Control);
        assert!(err.message.contains("0xff"));
        assert!(!vm.is_running());
    }

    #[test]
    fn run_slice_yields_and_resumes() {
        let mut vm = machine();
        let mut writer = BytecodeWriter::new();
        writer.op(Op::Nop).op(Op::Nop).op(Op::Nop).ld_int(9).op(Op::Halt);
        let index = vm.load_module("slices", &writer.into_module()).unwrap();
        vm.set_entry(index).unwrap();

        assert_eq!(vm.run_slice(2).unwrap(), RunState::Yielded);
        assert!(vm.is_running());
        assert_eq!(vm.run_slice(10).unwrap(), RunState::Halted);
        assert_eq!(vm.return_value(), Value::Int(9));
        assert_eq!(vm.run_slice(10).unwrap(), RunState::Halted);
    }

    #[test]
    fn set_register_releases_the_previous_value() {
        let mut vm = machine();
        let blocks = vm.heap.live_blocks();
        let string = vm.heap.new_string(b"r0").unwrap();
        vm.set_register(Register::General(0), string).unwrap();
        vm.set_register(Register::General(0), Value::Empty).unwrap();
        assert_eq!(vm.heap.live_blocks(), blocks);
    }

    #[test]
    fn small_arenas_still_fit_the_stack() {
        let info = MachineCreateInfo {
            heap: HeapCreateInfo {
                arena_size: Some(8 * PAGE_SIZE),
            },
            stack_slots: Some(64),
            ..MachineCreateInfo::default()
        };
        assert!(Machine::new(info).is_ok());
    }
}
