use crate::{Address, Allocator, Machine, MachineError, VALUE_SIZE, Value};

/// A scope entered with `debug_enterscope`, along with the source position
/// that was current when it was entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub name: String,
    pub filename: Option<String>,
    pub line: i32,
    pub col: i32,
}

/// Source position tracking driven by the `debug_*` instructions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugContext {
    pub filename: Option<String>,
    pub line: i32,
    pub col: i32,
    pub stacktrace: Vec<StackFrame>,
}

fn position(filename: Option<&str>, line: i32, col: i32) -> String {
    format!("{}:{line}:{col}", filename.unwrap_or("<unknown>"))
}

impl DebugContext {
    pub fn set_position(&mut self, filename: String, line: i32, col: i32) {
        self.filename = Some(filename);
        self.line = line;
        self.col = col;
    }

    pub fn enter_scope(&mut self, name: String) {
        self.stacktrace.push(StackFrame {
            name,
            filename: self.filename.clone(),
            line: self.line,
            col: self.col,
        });
    }

    pub fn leave_scope(&mut self) -> Option<StackFrame> {
        self.stacktrace.pop()
    }

    /// Innermost scope first. Each scope is reported at the position that was
    /// current inside it, the outermost line is the top level.
    #[must_use]
    pub fn trace(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.stacktrace.len() + 1);
        let mut current = (self.filename.as_deref(), self.line, self.col);
        for frame in self.stacktrace.iter().rev() {
            lines.push(format!(
                "at {} ({})",
                frame.name,
                position(current.0, current.1, current.2)
            ));
            current = (frame.filename.as_deref(), frame.line, frame.col);
        }
        lines.push(format!("at {}", position(current.0, current.1, current.2)));
        lines
    }
}

const STACK_DUMP_LIMIT: usize = 32;

impl Machine {
    /// One-line description of a value for dumps.
    #[must_use]
    pub fn describe_value(&self, value: Value) -> String {
        let rc = |object: Address| {
            self.heap
                .refcount(object)
                .map_or_else(|_| "?".to_owned(), |rc| rc.to_string())
        };
        match value {
            Value::Int(i) => format!("int {i}"),
            Value::UInt(u) => format!("uint {u}"),
            Value::Float(f) => format!("float {f}"),
            Value::String(s) => match self.heap.string_bytes(s) {
                Ok(bytes) => format!("string({}) {:?}", rc(s), String::from_utf8_lossy(bytes)),
                Err(_) => format!("string {s} (invalid)"),
            },
            Value::Array(a) => match self.heap.array_len(a) {
                Ok(len) => format!("array({}) [{len}]", rc(a)),
                Err(_) => format!("array {a} (invalid)"),
            },
            Value::Map(m) => match self.heap.map_len(m) {
                Ok(len) => format!("map({}) {{{len}}}", rc(m)),
                Err(_) => format!("map {m} (invalid)"),
            },
            Value::Ref(r) => format!("ref {r}"),
            Value::Empty => "empty".to_owned(),
            Value::Unknown(tag) => format!("unknown tag {tag:#x}"),
        }
    }

    /// Dumps machine state to stdout.
    ///
    /// 0 registers, 1 stack, 2 top of stack, 3 top array, 4 modules, 5 top map
    pub(crate) fn trap(&mut self, code: u32) -> Result<(), MachineError> {
        match code {
            0 => {
                let r = &self.registers;
                println!(
                    "pc {:#06x} sp {:#06x} mp {:#06x} ap {:#06x}",
                    r.pc, r.sp, r.mp, r.ap
                );
                println!("rr {}", self.describe_value(r.rr));
                for (i, value) in r.general.iter().enumerate() {
                    println!("r{i} {}", self.describe_value(*value));
                }
            }
            1 => {
                println!("stack ({} values)", self.depth());
                for n in 0..self.depth().min(STACK_DUMP_LIMIT) {
                    let slot = self.slot(n)?;
                    println!("  {slot} {}", self.describe_value(self.peek(n)?));
                }
            }
            2 => {
                let top = self.peek(0)?;
                match self.heap.display_bytes(top) {
                    Ok(bytes) => println!("{}", String::from_utf8_lossy(&bytes)),
                    Err(_) => println!("{}", self.describe_value(top)),
                }
            }
            3 => {
                let Value::Array(array) = self.peek(0)? else {
                    return Err(MachineError::type_error("trap 3 expects an array on the stack"));
                };
                for (i, value) in self.heap.array_elements(array)?.into_iter().enumerate() {
                    println!("  [{i}] {}", self.describe_value(value));
                }
            }
            4 => {
                for module in &self.modules {
                    println!(
                        "{} at {} ({} bytes, {} link(s))",
                        module.name, module.base, module.size, module.links
                    );
                }
            }
            5 => {
                let Value::Map(map) = self.peek(0)? else {
                    return Err(MachineError::type_error("trap 5 expects a map on the stack"));
                };
                for (name, value) in self.heap.map_entries(map)? {
                    println!(
                        "  {}: {}",
                        String::from_utf8_lossy(&name),
                        self.describe_value(value)
                    );
                }
            }
            _ => log::warn!("trap {code} is not defined"),
        }
        Ok(())
    }

    /// Low bytes of the values starting at `at`, up to a zero payload.
    fn character_run(&self, mut at: Address) -> Result<Vec<u8>, MachineError> {
        let mut text = Vec::new();
        loop {
            let value = self.heap.arena().read_value(at)?;
            if value.payload() == 0 {
                return Ok(text);
            }
            text.push(value.payload() as u8);
            at = at.add(VALUE_SIZE);
        }
    }

    /// Software interrupts. 10 prints the characters of a value sequence
    /// terminated by a zero payload.
    pub(crate) fn interrupt(&mut self, code: u32) -> Result<(), MachineError> {
        match code {
            10 => {
                let at = match self.pop()? {
                    Value::Ref(at) => at,
                    other => Address::new(other.payload()),
                };
                let text = self.character_run(at)?;
                print!("{}", String::from_utf8_lossy(&text));
            }
            _ => log::warn!("interrupt {code} is not defined"),
        }
        Ok(())
    }
}
