//! Instruction handlers and the opcode dispatch table.
//!
//! Each handler runs with `pc` already past the opcode byte and reads its own
//! operands. Unassigned opcodes fail with a control error.

mod arrays;
mod branching;
mod computation;
mod convert;
mod cpu;
mod maps;
mod memory;
mod modules;
mod strings;
mod syscalls;

use crate::{Machine, MachineError, bytecode::Op};

pub(crate) type Handler = fn(&mut Machine) -> Result<(), MachineError>;

pub(crate) static DISPATCH: [Handler; 256] = dispatch_table();

fn not_implemented(machine: &mut Machine) -> Result<(), MachineError> {
    Err(MachineError::control(format!(
        "opcode {:#04x} at {} is not implemented",
        machine.opcode, machine.instruction
    )))
}

const fn dispatch_table() -> [Handler; 256] {
    let mut table = [not_implemented as Handler; 256];

    table[Op::Nop as usize] = cpu::nop;
    table[Op::Halt as usize] = cpu::halt;
    table[Op::Trap as usize] = cpu::trap;
    table[Op::Int as usize] = cpu::interrupt;
    table[Op::Link as usize] = modules::link;
    table[Op::DebugBreak as usize] = cpu::debug_break;
    table[Op::DebugSetContext as usize] = cpu::debug_setcontext;
    table[Op::DebugEnterScope as usize] = cpu::debug_enterscope;
    table[Op::DebugLeaveScope as usize] = cpu::debug_leavescope;
    table[Op::Unlink as usize] = modules::unlink;
    table[Op::SyscallGetIndex as usize] = syscalls::syscall_getindex;
    table[Op::SyscallByName as usize] = syscalls::syscall_byname;
    table[Op::Syscall as usize] = syscalls::syscall;
    table[Op::SyscallPop as usize] = syscalls::syscall_pop;

    table[Op::LdInt as usize] = memory::ld_int;
    table[Op::LdUInt as usize] = memory::ld_uint;
    table[Op::LdFloat as usize] = memory::ld_float;
    table[Op::LdStr as usize] = memory::ld_str;
    table[Op::LdMap as usize] = maps::ld_map;
    table[Op::LdLocal as usize] = memory::ld_local;
    table[Op::LdReg as usize] = memory::ld_reg;
    table[Op::LdStack as usize] = memory::ld_stack;
    table[Op::LdSRef as usize] = memory::ld_sref;
    table[Op::StStack as usize] = memory::st_stack;
    table[Op::LdLRef as usize] = memory::ld_lref;
    table[Op::LdRef as usize] = memory::ld_ref;
    table[Op::Pop as usize] = memory::pop;
    table[Op::StReg as usize] = memory::st_reg;
    table[Op::StLocal as usize] = memory::st_local;
    table[Op::StRef as usize] = memory::st_ref;

    table[Op::ConvInt as usize] = convert::conv_int;
    table[Op::ConvUInt as usize] = convert::conv_uint;
    table[Op::ConvFloat as usize] = convert::conv_float;
    table[Op::ConvStr as usize] = convert::conv_str;
    table[Op::CastInt as usize] = convert::cast_int;
    table[Op::CastUInt as usize] = convert::cast_uint;
    table[Op::CastFloat as usize] = convert::cast_float;
    table[Op::CastStr as usize] = convert::cast_str;
    table[Op::CastRef as usize] = convert::cast_ref;
    table[Op::Ajs as usize] = memory::ajs;
    table[Op::LocalsRes as usize] = memory::locals_res;
    table[Op::LocalsCleanup as usize] = memory::locals_cleanup;
    table[Op::Dup as usize] = memory::dup;
    table[Op::Deref as usize] = memory::deref;
    table[Op::Var as usize] = memory::var;
    table[Op::LdDeref as usize] = memory::ld_deref;

    table[Op::Add as usize] = computation::add;
    table[Op::Sub as usize] = computation::sub;
    table[Op::Mul as usize] = computation::mul;
    table[Op::Div as usize] = computation::div;
    table[Op::Mod as usize] = computation::modulo;
    table[Op::Neg as usize] = computation::neg;
    table[Op::And as usize] = computation::and;
    table[Op::Or as usize] = computation::or;
    table[Op::Xor as usize] = computation::xor;
    table[Op::Not as usize] = computation::not;
    table[Op::Cmp as usize] = computation::cmp;
    table[Op::Eq as usize] = computation::eq;
    table[Op::Ne as usize] = computation::ne;
    table[Op::Lt as usize] = computation::lt;
    table[Op::Gt as usize] = computation::gt;
    table[Op::Le as usize] = computation::le;
    table[Op::Ge as usize] = computation::ge;
    table[Op::Pow as usize] = computation::pow;
    table[Op::Lsh as usize] = computation::lsh;
    table[Op::Rsh as usize] = computation::rsh;

    table[Op::Beq as usize] = branching::beq;
    table[Op::Bne as usize] = branching::bne;
    table[Op::Blt as usize] = branching::blt;
    table[Op::Bgt as usize] = branching::bgt;
    table[Op::Ble as usize] = branching::ble;
    table[Op::Bge as usize] = branching::bge;
    table[Op::Jmp as usize] = branching::jmp;
    table[Op::BrFalse as usize] = branching::brfalse;
    table[Op::BrTrue as usize] = branching::brtrue;
    table[Op::Call as usize] = branching::call;
    table[Op::CallPop as usize] = branching::call_pop;
    table[Op::JmpPop as usize] = branching::jmp_pop;
    table[Op::Ret as usize] = branching::ret;
    table[Op::ArgsAccept as usize] = branching::args_accept;
    table[Op::ArgsCleanup as usize] = branching::args_cleanup;
    table[Op::LdArg as usize] = memory::ld_arg;

    table[Op::StrCat as usize] = strings::strcat;
    table[Op::SubStr as usize] = strings::substr;
    table[Op::StrLen as usize] = strings::strlen;

    table[Op::ArrCopy as usize] = arrays::arr_copy;
    table[Op::LdArr as usize] = arrays::ld_arr;
    table[Op::LdArrElem as usize] = arrays::ld_arrelem;
    table[Op::StArrElem as usize] = arrays::st_arrelem;
    table[Op::DelArrElem as usize] = arrays::del_arrelem;
    table[Op::ArrLen as usize] = arrays::arr_len;
    table[Op::ArrInsert as usize] = arrays::arr_insert;
    table[Op::ArrSlice as usize] = arrays::arr_slice;
    table[Op::ArrConcat as usize] = arrays::arr_concat;

    table[Op::CmpId as usize] = computation::cmp_id;
    table[Op::EqId as usize] = computation::eq_id;
    table[Op::NeId as usize] = computation::ne_id;
    table[Op::LtId as usize] = computation::lt_id;
    table[Op::GtId as usize] = computation::gt_id;
    table[Op::LeId as usize] = computation::le_id;
    table[Op::GeId as usize] = computation::ge_id;

    table[Op::StAddr as usize] = memory::st_addr;
    table[Op::Swp as usize] = memory::swp;
    table[Op::LdAddr as usize] = memory::ld_addr;
    table[Op::StArg as usize] = memory::st_arg;

    table[Op::ConvArr as usize] = convert::conv_arr;
    table[Op::ArrRange as usize] = arrays::arr_range;

    table[Op::LdExtern as usize] = modules::ld_extern;
    table[Op::LdEmpty as usize] = memory::ld_empty;
    table[Op::StStackPop as usize] = memory::st_stack_pop;
    table[Op::StArgPop as usize] = memory::st_arg_pop;

    table[Op::IsInt as usize] = memory::is_int;
    table[Op::IsUInt as usize] = memory::is_uint;
    table[Op::IsFloat as usize] = memory::is_float;
    table[Op::IsStr as usize] = memory::is_str;
    table[Op::IsArr as usize] = memory::is_arr;
    table[Op::IsMap as usize] = memory::is_map;
    table[Op::IsRef as usize] = memory::is_ref;
    table[Op::IsEmpty as usize] = memory::is_empty;

    table[Op::LdMapItem as usize] = maps::ld_mapitem;
    table[Op::LdMapItemPop as usize] = maps::ld_mapitem_pop;
    table[Op::StMapItem as usize] = maps::st_mapitem;
    table[Op::StMapItemPop as usize] = maps::st_mapitem_pop;
    table[Op::DelMapItem as usize] = maps::del_mapitem;
    table[Op::DelMapItemPop as usize] = maps::del_mapitem_pop;
    table[Op::HasMapItem as usize] = maps::has_mapitem;
    table[Op::HasMapItemPop as usize] = maps::has_mapitem_pop;
    table[Op::MapLen as usize] = maps::map_len;
    table[Op::MapMerge as usize] = maps::map_merge;
    table[Op::MapCopy as usize] = maps::map_copy;
    table[Op::MapGetPrototype as usize] = maps::map_getprototype;
    table[Op::MapSetPrototype as usize] = maps::map_setprototype;
    table[Op::Box as usize] = maps::box_value;
    table[Op::Unbox as usize] = maps::unbox;
    table[Op::LdBoxingProto as usize] = maps::ld_boxingproto;
    table[Op::MapRenameKey as usize] = maps::map_renamekey;
    table[Op::MapRenameKeyPop as usize] = maps::map_renamekey_pop;
    table[Op::MapGetKeys as usize] = maps::map_getkeys;

    table
}
