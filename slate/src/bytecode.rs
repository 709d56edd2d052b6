use crate::{STATIC_REFCOUNT, module::ModuleHeader};

macro_rules! opcodes {
    ($($(#[$doc:meta])* $name:ident = $byte:literal => $mnemonic:literal,)*) => {
        /// Instruction opcodes.
        ///
        /// Operands follow the opcode byte as little-endian 32-bit words. `str`
        /// operands are module-relative offsets of a static string object,
        /// `addr` operands are module-relative code offsets.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $($(#[$doc])* $name = $byte,)*
        }

        impl Op {
            pub const ALL: &'static [Op] = &[$(Op::$name,)*];

            #[must_use]
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $(Op::$name => $mnemonic,)*
                }
            }

            #[must_use]
            pub const fn from_byte(byte: u8) -> Option<Op> {
                match byte {
                    $($byte => Some(Op::$name),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00 => "nop",
    /// Stops the machine; a value left on the stack becomes the result.
    Halt = 0x01 => "halt",
    /// Debug dump. Operands: `code:u32`
    Trap = 0x02 => "trap",
    /// Software interrupt. Operands: `code:u32`
    Int = 0x03 => "int",
    /// Push the export map of a module, loading it on first use. Operands: `name:str`
    Link = 0x04 => "link",
    DebugBreak = 0x05 => "debug_break",
    /// Operands: `file:str`, `line:i32`, `col:i32`
    DebugSetContext = 0x06 => "debug_setcontext",
    /// Operands: `name:str`
    DebugEnterScope = 0x07 => "debug_enterscope",
    DebugLeaveScope = 0x08 => "debug_leavescope",
    /// Operands: `name:str`
    Unlink = 0x09 => "unlink",
    /// Push the index of a syscall or -1. Operands: `name:str`
    SyscallGetIndex = 0x0C => "syscall_getindex",
    /// Operands: `name:str`
    SyscallByName = 0x0D => "syscall_byname",
    /// Operands: `index:u32`
    Syscall = 0x0E => "syscall",
    SyscallPop = 0x0F => "syscall_pop",

    /// Operands: `value:i32`
    LdInt = 0x10 => "ld_int",
    /// Operands: `value:u32`
    LdUInt = 0x11 => "ld_uint",
    /// Operands: `value:f32`
    LdFloat = 0x12 => "ld_float",
    /// Operands: `string:str`
    LdStr = 0x13 => "ld_str",
    LdMap = 0x14 => "ld_map",
    /// Operands: `local:i32`
    LdLocal = 0x15 => "ld_local",
    /// Operands: `register:u32`
    LdReg = 0x16 => "ld_reg",
    /// Operands: `offset:i32`
    LdStack = 0x17 => "ld_stack",
    /// Operands: `offset:i32`
    LdSRef = 0x18 => "ld_sref",
    /// Operands: `offset:i32`
    StStack = 0x19 => "st_stack",
    /// Operands: `local:i32`
    LdLRef = 0x1A => "ld_lref",
    /// Operands: `offset:addr`
    LdRef = 0x1B => "ld_ref",
    Pop = 0x1C => "pop",
    /// Operands: `register:u32`
    StReg = 0x1D => "st_reg",
    /// Operands: `local:i32`
    StLocal = 0x1E => "st_local",
    /// Operands: `offset:addr`
    StRef = 0x1F => "st_ref",

    ConvInt = 0x20 => "conv_int",
    ConvUInt = 0x21 => "conv_uint",
    ConvFloat = 0x22 => "conv_float",
    ConvStr = 0x23 => "conv_str",
    CastInt = 0x24 => "cast_int",
    CastUInt = 0x25 => "cast_uint",
    CastFloat = 0x26 => "cast_float",
    CastStr = 0x27 => "cast_str",
    CastRef = 0x28 => "cast_ref",
    /// Adjust stack. Operands: `count:i32`
    Ajs = 0x29 => "ajs",
    /// Operands: `count:i32`
    LocalsRes = 0x2A => "locals_res",
    LocalsCleanup = 0x2B => "locals_cleanup",
    Dup = 0x2C => "dup",
    Deref = 0x2D => "deref",
    /// Reserves inline data up to the size of one value.
    Var = 0x2E => "var",
    /// Operands: `offset:addr`
    LdDeref = 0x2F => "ld_deref",

    Add = 0x30 => "add",
    Sub = 0x31 => "sub",
    Mul = 0x32 => "mul",
    Div = 0x33 => "div",
    Mod = 0x34 => "mod",
    Neg = 0x35 => "neg",
    And = 0x36 => "and",
    Or = 0x37 => "or",
    Xor = 0x38 => "xor",
    Not = 0x39 => "not",
    Cmp = 0x3A => "cmp",
    Eq = 0x3B => "eq",
    Ne = 0x3C => "ne",
    Lt = 0x3D => "lt",
    Gt = 0x3E => "gt",
    Le = 0x3F => "le",
    Ge = 0x40 => "ge",
    Pow = 0x41 => "pow",
    Lsh = 0x42 => "lsh",
    Rsh = 0x43 => "rsh",

    /// Operands: `target:addr`
    Beq = 0x50 => "beq",
    Bne = 0x51 => "bne",
    Blt = 0x52 => "blt",
    Bgt = 0x53 => "bgt",
    Ble = 0x54 => "ble",
    Bge = 0x55 => "bge",
    Jmp = 0x56 => "jmp",
    BrFalse = 0x57 => "brfalse",
    BrTrue = 0x58 => "brtrue",
    /// Operands: `target:addr`, `nargs:u32`
    Call = 0x59 => "call",
    /// Operands: `nargs:u32`
    CallPop = 0x5A => "call_pop",
    JmpPop = 0x5B => "jmp_pop",
    Ret = 0x5C => "ret",
    /// Operands: `declared:u32`
    ArgsAccept = 0x5D => "args_accept",
    ArgsCleanup = 0x5E => "args_cleanup",
    /// Operands: `arg:i32`
    LdArg = 0x5F => "ld_arg",

    StrCat = 0x60 => "strcat",
    SubStr = 0x61 => "substr",
    StrLen = 0x62 => "strlen",

    ArrCopy = 0x67 => "arr_copy",
    /// Operands: `count:u32`
    LdArr = 0x68 => "ld_arr",
    LdArrElem = 0x69 => "ld_arrelem",
    StArrElem = 0x6A => "st_arrelem",
    DelArrElem = 0x6B => "del_arrelem",
    ArrLen = 0x6C => "arr_len",
    ArrInsert = 0x6D => "arr_insert",
    ArrSlice = 0x6E => "arr_slice",
    ArrConcat = 0x6F => "arr_concat",

    CmpId = 0x70 => "cmp_id",
    EqId = 0x71 => "eq_id",
    NeId = 0x72 => "ne_id",
    LtId = 0x73 => "lt_id",
    GtId = 0x74 => "gt_id",
    LeId = 0x75 => "le_id",
    GeId = 0x76 => "ge_id",

    /// Operands: `address:u32`
    StAddr = 0x77 => "st_addr",
    Swp = 0x78 => "swp",
    /// Operands: `address:u32`
    LdAddr = 0x79 => "ld_addr",
    /// Operands: `arg:i32`
    StArg = 0x7A => "st_arg",

    ConvArr = 0x80 => "conv_arr",
    ArrRange = 0x81 => "arr_range",

    /// Operands: `module:str`, `export:str`
    LdExtern = 0x90 => "ld_extern",
    LdEmpty = 0x91 => "ld_empty",
    StStackPop = 0x92 => "st_stack_pop",
    StArgPop = 0x93 => "st_arg_pop",

    IsInt = 0xA0 => "is_int",
    IsUInt = 0xA1 => "is_uint",
    IsFloat = 0xA2 => "is_float",
    IsStr = 0xA3 => "is_str",
    IsArr = 0xA4 => "is_arr",
    IsMap = 0xA5 => "is_map",
    IsRef = 0xA6 => "is_ref",
    IsEmpty = 0xA7 => "is_empty",

    /// Operands: `name:str`
    LdMapItem = 0xB0 => "ld_mapitem",
    LdMapItemPop = 0xB1 => "ld_mapitem_pop",
    /// Operands: `name:str`
    StMapItem = 0xB2 => "st_mapitem",
    StMapItemPop = 0xB3 => "st_mapitem_pop",
    /// Operands: `name:str`
    DelMapItem = 0xB4 => "del_mapitem",
    DelMapItemPop = 0xB5 => "del_mapitem_pop",
    /// Operands: `name:str`
    HasMapItem = 0xB6 => "has_mapitem",
    HasMapItemPop = 0xB7 => "has_mapitem_pop",
    MapLen = 0xB8 => "map_len",
    MapMerge = 0xB9 => "map_merge",
    MapCopy = 0xBA => "map_copy",
    MapGetPrototype = 0xBB => "map_getprototype",
    MapSetPrototype = 0xBC => "map_setprototype",
    Box = 0xBD => "box",
    Unbox = 0xBE => "unbox",
    /// Operands: `kind:u32`
    LdBoxingProto = 0xBF => "ld_boxingproto",
    /// Operands: `old:str`, `new:str`
    MapRenameKey = 0xC0 => "map_renamekey",
    MapRenameKeyPop = 0xC1 => "map_renamekey_pop",
    MapGetKeys = 0xC2 => "map_getkeys",
}

/// A forward jump or call whose target has not been bound yet.
#[derive(Debug)]
pub struct Label {
    operand_pos: usize,
}

/// Builds module code. All offsets are relative to the start of the module
/// blob, which is what code-relative operands expect.
#[derive(Debug, Default)]
pub struct BytecodeWriter {
    buf: Vec<u8>,
    exports: Vec<(String, usize)>,
    start_of_code: u32,
}

impl BytecodeWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the blob with an export table for `names`; bind each one with
    /// [`BytecodeWriter::bind_export`]. Code starts right after the table
    /// unless [`BytecodeWriter::mark_entry`] moves it.
    #[must_use]
    pub fn with_exports(names: &[&str]) -> Self {
        let mut writer = Self::new();
        for name in names {
            writer.buf.extend_from_slice(name.as_bytes());
            writer.buf.push(0);
            writer.exports.push(((*name).to_owned(), writer.buf.len()));
            writer.emit_u32(0);
        }
        writer.start_of_code = writer.offset();
        writer
    }

    #[must_use]
    pub fn offset(&self) -> u32 {
        self.buf.len() as u32
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Execution begins at the current offset.
    pub fn mark_entry(&mut self) {
        self.start_of_code = self.offset();
    }

    /// Points the export `name` at the current offset.
    pub fn bind_export(&mut self, name: &str) {
        let at = self.offset();
        if let Some(&(_, pos)) = self.exports.iter().find(|(n, _)| n == name) {
            self.patch_u32(pos, at);
        }
    }

    /// A complete module image: header followed by the blob.
    #[must_use]
    pub fn into_module(self) -> Vec<u8> {
        let header = ModuleHeader::new(self.exports.len() as u32, self.start_of_code);
        let mut image = header.encode();
        image.extend_from_slice(&self.buf);
        image
    }

    // ── emit helpers ───────────────────────────────────────────────

    pub fn emit_op(&mut self, op: Op) {
        self.buf.push(op as u8);
    }

    pub fn emit_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn patch_u32(&mut self, pos: usize, v: u32) {
        self.buf[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
    }

    /// Embeds a static string object and returns its offset. Place strings
    /// where execution never reaches them.
    pub fn string(&mut self, bytes: &[u8]) -> u32 {
        let at = self.offset();
        self.emit_u32(STATIC_REFCOUNT);
        self.buf.extend_from_slice(bytes);
        self.buf.push(0);
        at
    }

    // ── instructions ───────────────────────────────────────────────

    pub fn op(&mut self, op: Op) -> &mut Self {
        self.emit_op(op);
        self
    }

    pub fn op_u32(&mut self, op: Op, operand: u32) -> &mut Self {
        self.emit_op(op);
        self.emit_u32(operand);
        self
    }

    pub fn op_i32(&mut self, op: Op, operand: i32) -> &mut Self {
        self.emit_op(op);
        self.emit_i32(operand);
        self
    }

    pub fn ld_int(&mut self, value: i32) -> &mut Self {
        self.op_i32(Op::LdInt, value)
    }

    pub fn ld_uint(&mut self, value: u32) -> &mut Self {
        self.op_u32(Op::LdUInt, value)
    }

    pub fn ld_float(&mut self, value: f32) -> &mut Self {
        self.emit_op(Op::LdFloat);
        self.emit_f32(value);
        self
    }

    pub fn ld_str(&mut self, string: u32) -> &mut Self {
        self.op_u32(Op::LdStr, string)
    }

    pub fn call(&mut self, target: u32, nargs: u32) -> &mut Self {
        self.emit_op(Op::Call);
        self.emit_u32(target);
        self.emit_u32(nargs);
        self
    }

    /// Emits a jump-like instruction with an unresolved target.
    pub fn jump(&mut self, op: Op) -> Label {
        self.emit_op(op);
        let label = Label {
            operand_pos: self.buf.len(),
        };
        self.emit_u32(0);
        label
    }

    /// Resolves `label` to the current offset.
    pub fn bind(&mut self, label: Label) {
        let target = self.offset();
        self.patch_u32(label.operand_pos, target);
    }
}
