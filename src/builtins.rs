// builtins.rs - Built-in word catalogue and the code each word expands to
//
// Stack effects below use the usual Forth notation. Every sequence works
// directly on the data/return stack arrays through their index cells, the
// way the emitted program will at run time.

use crate::bytecode::{Instruction, StackId, Static};
use crate::emitter::ProcedureBuilder;
use crate::layout::MemoryLayout;

const D: StackId = StackId::Data;
const R: StackId = StackId::Return;

pub const TIB_UNREADABLE: &str = "RUNTIME ERROR: Could not interpret the TIB area.";

/// Built-in words, excluding the structural ones in `control.rs`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    // Arithmetic
    Add,       // ( a b -- a+b )
    Sub,       // ( a b -- a-b )
    Mul,       // ( a b -- a*b )
    Div,       // ( a b -- a/b )
    Mod,       // ( a b -- a%b )
    DivMod,    // ( a b -- rem quot )
    MulDiv,    // ( a b c -- a*b/c )
    MulDivMod, // ( a b c -- rem quot )
    Minus,     // ( a -- -a )
    Abs,       // ( a -- |a| )
    Min,       // ( a b -- min )
    Max,       // ( a b -- max )
    OnePlus,   // ( a -- a+1 )
    TwoPlus,   // ( a -- a+2 )

    // Comparison, all leave 1 or 0
    ZeroEq,   // ( a -- a=0 )
    ZeroLess, // ( a -- a<=0 )
    Eq,       // ( a b -- a=b )
    Less,     // ( a b -- a<b )
    Greater,  // ( a b -- a>b )
    NotEq,    // ( a b -- a<>b )

    // Bitwise
    BitAnd, // ~AND
    BitOr,  // ~OR
    BitXor, // ~XOR
    BitNot, // ~NOT

    // Logical, operands count as true when positive
    And,
    Or,
    Not, // ( a -- a=0 )

    // Stack
    Dup,     // ( a -- a a )
    DashDup, // ( a -- a a | 0 )
    Drop,    // ( a -- )
    Swap,    // ( a b -- b a )
    Over,    // ( a b -- a b a )
    Rot,     // ( a b c -- b c a )
    SpFetch, // ( -- index )
    RpFetch, // ( -- rindex )
    SpStore, // empty the data stack
    RpStore, // empty the return stack

    // Memory
    Fetch,     // ( addr -- value )
    Question,  // ( addr -- ) prints the cell
    Store,     // ( value addr -- )
    PlusStore, // ( value addr -- )

    // Console
    Emit,   // ( c -- )
    Dot,    // ( n -- )
    Cr,
    Space,
    Spaces, // ( n -- )
    Type,   // ( addr n -- )
    Key,    // ( -- c )
    Expect, // ( addr max -- )
    Query,  // read into TIB

    // Well-known addresses
    Pad,
    Tib,
    S0,
    R0,

    // Return stack
    ToR,   // ( a -- ) R: ( -- a )
    RFrom, // ( -- a ) R: ( a -- )
    I,     // ( -- index ) R: ( limit index -- limit index )

    // Memory blocks
    Fill,   // ( addr n c -- )
    Erase,  // ( addr n -- )
    Blanks, // ( addr n -- )
    Cmove,  // ( src dst n -- )

    // Text
    Count,   // ( addr -- n )
    Str2Int, // ( -- n ) parses the TIB
    Int2Str, // ( addr n -- )

    Exit,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Add => "+",
            Builtin::Sub => "-",
            Builtin::Mul => "*",
            Builtin::Div => "/",
            Builtin::Mod => "MOD",
            Builtin::DivMod => "/MOD",
            Builtin::MulDiv => "*/",
            Builtin::MulDivMod => "*/MOD",
            Builtin::Minus => "MINUS",
            Builtin::Abs => "ABS",
            Builtin::Min => "MIN",
            Builtin::Max => "MAX",
            Builtin::OnePlus => "1+",
            Builtin::TwoPlus => "2+",
            Builtin::ZeroEq => "0=",
            Builtin::ZeroLess => "0<",
            Builtin::Eq => "=",
            Builtin::Less => "<",
            Builtin::Greater => ">",
            Builtin::NotEq => "<>",
            Builtin::BitAnd => "~AND",
            Builtin::BitOr => "~OR",
            Builtin::BitXor => "~XOR",
            Builtin::BitNot => "~NOT",
            Builtin::And => "AND",
            Builtin::Or => "OR",
            Builtin::Not => "NOT",
            Builtin::Dup => "DUP",
            Builtin::DashDup => "-DUP",
            Builtin::Drop => "DROP",
            Builtin::Swap => "SWAP",
            Builtin::Over => "OVER",
            Builtin::Rot => "ROT",
            Builtin::SpFetch => "SP@",
            Builtin::RpFetch => "RP@",
            Builtin::SpStore => "SP!",
            Builtin::RpStore => "RP!",
            Builtin::Fetch => "@",
            Builtin::Question => "?",
            Builtin::Store => "!",
            Builtin::PlusStore => "+!",
            Builtin::Emit => "EMIT",
            Builtin::Dot => ".",
            Builtin::Cr => "CR",
            Builtin::Space => "SPACE",
            Builtin::Spaces => "SPACES",
            Builtin::Type => "TYPE",
            Builtin::Key => "KEY",
            Builtin::Expect => "EXPECT",
            Builtin::Query => "QUERY",
            Builtin::Pad => "PAD",
            Builtin::Tib => "TIB",
            Builtin::S0 => "S0",
            Builtin::R0 => "R0",
            Builtin::ToR => ">R",
            Builtin::RFrom => "R>",
            Builtin::I => "I",
            Builtin::Fill => "FILL",
            Builtin::Erase => "ERASE",
            Builtin::Blanks => "BLANKS",
            Builtin::Cmove => "CMOVE",
            Builtin::Count => "COUNT",
            Builtin::Str2Int => "STR2INT",
            Builtin::Int2Str => "INT2STR",
            Builtin::Exit => "EXIT",
        }
    }

    pub fn all() -> &'static [Builtin] {
        use Builtin::*;
        &[
            Add, Sub, Mul, Div, Mod, DivMod, MulDiv, MulDivMod, Minus, Abs, Min, Max, OnePlus,
            TwoPlus, ZeroEq, ZeroLess, Eq, Less, Greater, NotEq, BitAnd, BitOr, BitXor, BitNot,
            And, Or, Not, Dup, DashDup, Drop, Swap, Over, Rot, SpFetch, RpFetch, SpStore,
            RpStore, Fetch, Question, Store, PlusStore, Emit, Dot, Cr, Space, Spaces, Type, Key,
            Expect, Query, Pad, Tib, S0, R0, ToR, RFrom, I, Fill, Erase, Blanks, Cmove, Count,
            Str2Int, Int2Str, Exit,
        ]
    }

    /// Exact, case-sensitive match; atoms arrive upper-cased
    pub fn from_name(name: &str) -> Option<Builtin> {
        Self::all().iter().copied().find(|b| b.name() == name)
    }

    pub fn emit(self, b: &mut ProcedureBuilder, layout: &MemoryLayout) {
        use Instruction as I;

        match self {
            Builtin::Add => binary(b, &[I::Add]),
            Builtin::Sub => binary(b, &[I::Sub]),
            Builtin::Mul => binary(b, &[I::Mul]),
            Builtin::Div => binary(b, &[I::Div]),
            Builtin::Mod => binary(b, &[I::Rem]),
            Builtin::DivMod => {
                b.load_at(D, 2);
                b.emit(I::StoreStatic(Static::Scratch1));
                b.load_at(D, 1);
                b.emit(I::StoreStatic(Static::Scratch2));
                b.store_at(D, 2, |b| scratch_op(b, I::Rem));
                b.store_at(D, 1, |b| scratch_op(b, I::Div));
            }
            Builtin::MulDiv => {
                b.store_at(D, 3, |b| {
                    b.load_at(D, 3);
                    b.load_at(D, 2);
                    b.emit(I::Mul);
                    b.load_at(D, 1);
                    b.emit(I::Div);
                });
                b.bump(D, -2);
            }
            Builtin::MulDivMod => {
                b.load_at(D, 3);
                b.load_at(D, 2);
                b.emit(I::Mul);
                b.emit(I::StoreStatic(Static::Scratch1));
                b.load_at(D, 1);
                b.emit(I::StoreStatic(Static::Scratch2));
                b.store_at(D, 3, |b| scratch_op(b, I::Rem));
                b.store_at(D, 2, |b| scratch_op(b, I::Div));
                b.bump(D, -1);
            }
            Builtin::Minus => unary(b, &[I::Neg]),
            Builtin::Abs => unary(b, &[I::Abs]),
            Builtin::Min => binary(b, &[I::Min]),
            Builtin::Max => binary(b, &[I::Max]),
            Builtin::OnePlus => unary(b, &[I::PushInt(1), I::Add]),
            Builtin::TwoPlus => unary(b, &[I::PushInt(2), I::Add]),

            Builtin::ZeroEq => unary(b, &[I::PushInt(0), I::Ceq]),
            Builtin::ZeroLess => unary(b, &[I::PushInt(0), I::Cgt, I::PushInt(0), I::Ceq]),
            Builtin::Eq => binary(b, &[I::Ceq]),
            Builtin::Less => binary(b, &[I::Clt]),
            Builtin::Greater => binary(b, &[I::Cgt]),
            Builtin::NotEq => binary(b, &[I::Ceq, I::PushInt(0), I::Ceq]),

            Builtin::BitAnd => binary(b, &[I::And]),
            Builtin::BitOr => binary(b, &[I::Or]),
            Builtin::BitXor => binary(b, &[I::Xor]),
            Builtin::BitNot => unary(b, &[I::Not]),

            Builtin::And => logical(b, I::And),
            Builtin::Or => logical(b, I::Or),
            Builtin::Not => unary(b, &[I::PushInt(0), I::Ceq]),

            Builtin::Dup => b.push_with(D, |b| b.load_at(D, 1)),
            Builtin::DashDup => {
                let skip = b.define_label();
                b.load_at(D, 1);
                b.branch(I::JumpIfFalse, &skip);
                b.push_with(D, |b| b.load_at(D, 1));
                b.mark(skip);
            }
            Builtin::Drop => drop(b),
            Builtin::Swap => swap(b),
            Builtin::Over => b.push_with(D, |b| b.load_at(D, 2)),
            Builtin::Rot => {
                b.load_at(D, 3);
                b.emit(I::StoreStatic(Static::Scratch1));
                b.store_at(D, 3, |b| b.load_at(D, 2));
                b.store_at(D, 2, |b| b.load_at(D, 1));
                b.store_at(D, 1, |b| b.emit(I::LoadStatic(Static::Scratch1)));
            }
            Builtin::SpFetch => b.push_with(D, |b| b.emit(I::LoadIndex(D))),
            Builtin::RpFetch => b.push_with(D, |b| b.emit(I::LoadIndex(R))),
            Builtin::SpStore => {
                b.emit(I::PushInt(layout.data_origin));
                b.emit(I::StoreIndex(D));
            }
            Builtin::RpStore => {
                b.emit(I::PushInt(layout.return_origin));
                b.emit(I::StoreIndex(R));
            }

            Builtin::Fetch => b.store_at(D, 1, |b| {
                b.load_at(D, 1);
                b.emit(I::LoadCell(D));
            }),
            Builtin::Question => {
                b.pop_cell(D);
                b.emit(I::LoadCell(D));
                b.emit(I::WriteInt);
            }
            Builtin::Store => {
                b.load_at(D, 1);
                b.load_at(D, 2);
                b.emit(I::StoreCell(D));
                b.bump(D, -2);
            }
            Builtin::PlusStore => {
                b.load_at(D, 1);
                b.load_at(D, 1);
                b.emit(I::LoadCell(D));
                b.load_at(D, 2);
                b.emit(I::Add);
                b.emit(I::StoreCell(D));
                b.bump(D, -2);
            }

            Builtin::Emit => {
                b.pop_cell(D);
                b.emit(I::WriteChar);
            }
            Builtin::Dot => {
                b.pop_cell(D);
                b.emit(I::WriteInt);
            }
            Builtin::Cr => b.emit(I::WriteNewLine),
            Builtin::Space => {
                b.emit(I::PushInt(32));
                b.emit(I::WriteChar);
            }
            Builtin::Spaces => {
                b.pop_into(D, Static::Scratch1);
                counted(b, Static::Scratch1, |b| {
                    b.emit(I::PushInt(32));
                    b.emit(I::WriteChar);
                });
            }
            Builtin::Type => {
                b.pop_into(D, Static::Scratch2);
                b.pop_into(D, Static::Scratch1);
                counted(b, Static::Scratch2, |b| {
                    b.emit(I::LoadStatic(Static::Scratch1));
                    b.emit(I::LoadCell(D));
                    b.emit(I::WriteChar);
                    b.add_static(Static::Scratch1, 1);
                });
            }
            Builtin::Key => b.push_with(D, |b| b.emit(I::ReadChar)),
            Builtin::Expect => {
                b.pop_into(D, Static::Scratch2);
                b.pop_into(D, Static::Scratch1);
                read_line(b);
            }
            Builtin::Query => {
                b.set_static(Static::Scratch1, layout.tib);
                b.set_static(Static::Scratch2, crate::layout::TIB_CELLS as i32);
                read_line(b);
            }

            Builtin::Pad => b.push_with(D, |b| b.emit(I::PushInt(layout.pad))),
            Builtin::Tib => b.push_with(D, |b| b.emit(I::PushInt(layout.tib))),
            Builtin::S0 => b.push_with(D, |b| b.emit(I::PushInt(layout.data_origin))),
            Builtin::R0 => b.push_with(D, |b| b.emit(I::PushInt(layout.return_origin))),

            Builtin::ToR => to_r(b),
            Builtin::RFrom => b.push_with(D, |b| b.pop_cell(R)),
            Builtin::I => b.push_with(D, |b| b.load_at(R, 1)),

            Builtin::Fill => {
                b.pop_into(D, Static::Scratch3);
                fill(b);
            }
            Builtin::Erase => {
                b.set_static(Static::Scratch3, 0);
                fill(b);
            }
            Builtin::Blanks => {
                b.set_static(Static::Scratch3, 32);
                fill(b);
            }
            Builtin::Cmove => {
                b.pop_into(D, Static::Scratch3);
                b.pop_into(D, Static::Scratch2);
                b.pop_into(D, Static::Scratch1);
                counted(b, Static::Scratch3, |b| {
                    b.emit(I::LoadStatic(Static::Scratch2));
                    b.emit(I::LoadStatic(Static::Scratch1));
                    b.emit(I::LoadCell(D));
                    b.emit(I::StoreCell(D));
                    b.add_static(Static::Scratch1, 1);
                    b.add_static(Static::Scratch2, 1);
                });
            }

            Builtin::Count => {
                b.load_at(D, 1);
                b.emit(I::StoreStatic(Static::Scratch1));
                b.set_static(Static::Scratch2, 0);
                let top = b.mark_here();
                let done = b.define_label();
                b.emit(I::LoadStatic(Static::Scratch1));
                b.emit(I::LoadCell(D));
                b.branch(I::JumpIfFalse, &done);
                b.add_static(Static::Scratch1, 1);
                b.add_static(Static::Scratch2, 1);
                b.branch_back(I::Jump, top);
                b.mark(done);
                b.store_at(D, 1, |b| b.emit(I::LoadStatic(Static::Scratch2)));
            }
            Builtin::Str2Int => str2int(b, layout),
            Builtin::Int2Str => {
                b.pop_cell(D);
                b.emit(I::IntToStr);
                b.emit(I::StoreStatic(Static::Text));
                b.pop_into(D, Static::Scratch1);
                write_text(b);
            }

            Builtin::Exit => b.emit(I::Return),
        }
    }
}

// ============================================================================
// SHARED SEQUENCES
// ============================================================================

/// ( a b -- r ), `ops` combine the two operands
fn binary(b: &mut ProcedureBuilder, ops: &[Instruction]) {
    b.store_at(D, 2, |b| {
        b.load_at(D, 2);
        b.load_at(D, 1);
        for op in ops {
            b.emit(op.clone());
        }
    });
    b.bump(D, -1);
}

/// ( a -- r ), rewritten in place
fn unary(b: &mut ProcedureBuilder, ops: &[Instruction]) {
    b.store_at(D, 1, |b| {
        b.load_at(D, 1);
        for op in ops {
            b.emit(op.clone());
        }
    });
}

/// ( a b -- (a>0) op (b>0) )
fn logical(b: &mut ProcedureBuilder, op: Instruction) {
    b.store_at(D, 2, |b| {
        b.load_at(D, 2);
        b.emit(Instruction::PushInt(0));
        b.emit(Instruction::Cgt);
        b.load_at(D, 1);
        b.emit(Instruction::PushInt(0));
        b.emit(Instruction::Cgt);
        b.emit(op);
    });
    b.bump(D, -1);
}

fn scratch_op(b: &mut ProcedureBuilder, op: Instruction) {
    b.emit(Instruction::LoadStatic(Static::Scratch1));
    b.emit(Instruction::LoadStatic(Static::Scratch2));
    b.emit(op);
}

/// Runs `body` while `counter` is positive, decrementing it each pass
fn counted(b: &mut ProcedureBuilder, counter: Static, body: impl FnOnce(&mut ProcedureBuilder)) {
    let top = b.mark_here();
    let done = b.define_label();
    b.emit(Instruction::LoadStatic(counter));
    b.emit(Instruction::PushInt(0));
    b.branch(Instruction::JumpIfLessOrEqual, &done);
    body(b);
    b.add_static(counter, -1);
    b.branch_back(Instruction::Jump, top);
    b.mark(done);
}

/// ( addr n -- ) stores scratch3 into n cells starting at addr
fn fill(b: &mut ProcedureBuilder) {
    b.pop_into(D, Static::Scratch2);
    b.pop_into(D, Static::Scratch1);
    counted(b, Static::Scratch2, |b| {
        b.emit(Instruction::LoadStatic(Static::Scratch1));
        b.emit(Instruction::LoadStatic(Static::Scratch3));
        b.emit(Instruction::StoreCell(D));
        b.add_static(Static::Scratch1, 1);
    });
}

/// Reads up to scratch2 characters into memory at scratch1. A line
/// terminator or end of input stops the read and stores a zero cell;
/// reaching the limit stores nothing more.
fn read_line(b: &mut ProcedureBuilder) {
    let top = b.mark_here();
    let done = b.define_label();
    let terminate = b.define_label();

    b.emit(Instruction::LoadStatic(Static::Scratch2));
    b.emit(Instruction::PushInt(0));
    b.branch(Instruction::JumpIfLessOrEqual, &done);

    b.emit(Instruction::ReadChar);
    b.emit(Instruction::StoreStatic(Static::Scratch3));
    for stop in [13, 10] {
        b.emit(Instruction::LoadStatic(Static::Scratch3));
        b.emit(Instruction::PushInt(stop));
        b.branch(Instruction::JumpIfEqual, &terminate);
    }
    b.emit(Instruction::LoadStatic(Static::Scratch3));
    b.emit(Instruction::PushInt(0));
    b.branch(Instruction::JumpIfLess, &terminate);

    b.emit(Instruction::LoadStatic(Static::Scratch1));
    b.emit(Instruction::LoadStatic(Static::Scratch3));
    b.emit(Instruction::StoreCell(D));
    b.add_static(Static::Scratch1, 1);
    b.add_static(Static::Scratch2, -1);
    b.branch_back(Instruction::Jump, top);

    b.mark(terminate);
    b.emit(Instruction::LoadStatic(Static::Scratch1));
    b.emit(Instruction::PushInt(0));
    b.emit(Instruction::StoreCell(D));
    b.mark(done);
}

/// Copies the text static into memory at scratch1, one character per
/// cell, followed by a zero cell.
fn write_text(b: &mut ProcedureBuilder) {
    b.set_static(Static::Scratch3, 0);
    let top = b.mark_here();
    let done = b.define_label();
    b.emit(Instruction::LoadStatic(Static::Scratch3));
    b.emit(Instruction::LoadStatic(Static::Text));
    b.emit(Instruction::StrLen);
    b.branch(Instruction::JumpIfGreaterOrEqual, &done);

    b.emit(Instruction::LoadStatic(Static::Scratch1));
    b.emit(Instruction::LoadStatic(Static::Scratch3));
    b.emit(Instruction::Add);
    b.emit(Instruction::LoadStatic(Static::Text));
    b.emit(Instruction::LoadStatic(Static::Scratch3));
    b.emit(Instruction::StrCharAt);
    b.emit(Instruction::StoreCell(D));
    b.add_static(Static::Scratch3, 1);
    b.branch_back(Instruction::Jump, top);

    b.mark(done);
    b.emit(Instruction::LoadStatic(Static::Scratch1));
    b.emit(Instruction::LoadStatic(Static::Scratch3));
    b.emit(Instruction::Add);
    b.emit(Instruction::PushInt(0));
    b.emit(Instruction::StoreCell(D));
}

fn str2int(b: &mut ProcedureBuilder, layout: &MemoryLayout) {
    b.emit(Instruction::PushStr("".into()));
    b.emit(Instruction::StoreStatic(Static::Text));
    b.set_static(Static::Scratch1, layout.tib);

    let top = b.mark_here();
    let collected = b.define_label();
    b.emit(Instruction::LoadStatic(Static::Scratch1));
    b.emit(Instruction::LoadCell(D));
    b.emit(Instruction::Dup);
    b.emit(Instruction::StoreStatic(Static::Scratch2));
    b.branch(Instruction::JumpIfFalse, &collected);
    b.emit(Instruction::LoadStatic(Static::Text));
    b.emit(Instruction::LoadStatic(Static::Scratch2));
    b.emit(Instruction::CharToStr);
    b.emit(Instruction::Concat);
    b.emit(Instruction::StoreStatic(Static::Text));
    b.add_static(Static::Scratch1, 1);
    b.branch_back(Instruction::Jump, top);

    b.mark(collected);
    let parsed = b.define_label();
    b.emit(Instruction::LoadStatic(Static::Text));
    b.emit(Instruction::ParseInt);
    b.branch(Instruction::JumpIfTrue, &parsed);
    b.emit(Instruction::Pop);
    b.emit(Instruction::PushStr(TIB_UNREADABLE.into()));
    b.emit(Instruction::WriteLine);
    b.emit(Instruction::Return);

    b.mark(parsed);
    b.emit(Instruction::StoreStatic(Static::Scratch1));
    b.push_with(D, |b| b.emit(Instruction::LoadStatic(Static::Scratch1)));
}

// ============================================================================
// SEQUENCES SHARED WITH THE CONTROL-FLOW RESOLVER AND LITERALS
// ============================================================================

/// ( a -- )
pub fn drop(b: &mut ProcedureBuilder) {
    b.bump(D, -1);
}

/// ( a b -- b a )
pub fn swap(b: &mut ProcedureBuilder) {
    b.load_at(D, 1);
    b.emit(Instruction::StoreStatic(Static::Scratch1));
    b.store_at(D, 1, |b| b.load_at(D, 2));
    b.store_at(D, 2, |b| b.emit(Instruction::LoadStatic(Static::Scratch1)));
}

/// ( a -- ) R: ( -- a )
pub fn to_r(b: &mut ProcedureBuilder) {
    b.push_with(R, |b| b.pop_cell(D));
}

/// ( addr -- ) copies `text` into memory at addr, zero terminated
pub fn dump_text(b: &mut ProcedureBuilder, text: &str) {
    b.pop_into(D, Static::Scratch1);
    b.emit(Instruction::PushStr(text.into()));
    b.emit(Instruction::StoreStatic(Static::Text));
    write_text(b);
}

/// Prints `text` with no trailing newline
pub fn display_text(b: &mut ProcedureBuilder, text: &str) {
    b.emit(Instruction::PushStr(text.into()));
    b.emit(Instruction::WriteStr);
}
