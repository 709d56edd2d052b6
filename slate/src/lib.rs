//! An embeddable bytecode machine over a single paged arena.
//!
//! Values are tagged 8-byte records. Strings, arrays and maps live in the
//! arena and are reference counted; maps delegate missing keys to an optional
//! prototype. Code is loaded as modules and executed by a table-dispatched
//! interpreter.

pub mod allocator;
pub mod arena;
pub mod bytecode;
pub mod debug;
pub mod error;
pub mod heap;
mod instructions;
pub mod machine;
pub mod module;
pub mod objects;
mod stack;
pub mod syscall;
pub mod system;
pub mod value;

pub use allocator::Allocator;
pub use arena::{Address, Arena, DEFAULT_ARENA_SIZE, PAGE_SIZE};
pub use bytecode::{BytecodeWriter, Label, Op};
pub use debug::{DebugContext, StackFrame};
pub use error::{ErrorKind, MachineError};
pub use heap::{Heap, HeapCreateInfo, HeapSettings};
pub use machine::{Machine, MachineCreateInfo, Register, Registers, RunState};
pub use module::{Module, ModuleError, ModuleFlags, ModuleHeader};
pub use objects::{BOX_VALUE_KEY, BoxingPrototypes};
pub use syscall::{Syscall, SyscallFn, SyscallTable};
pub use value::{Number, STATIC_REFCOUNT, VALUE_SIZE, Value, ValueKind, WORD_SIZE};
