// bytecode.rs - Instruction set and module format for the Forth stack machine

use crate::error::FaultKind;
use crate::layout::MemoryLayout;
use std::fmt;
use std::rc::Rc;

/// Index of a procedure inside its module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcId(pub usize);

/// The two cell arrays owned by the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackId {
    Data,
    Return,
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StackId::Data => write!(f, "data stack"),
            StackId::Return => write!(f, "return stack"),
        }
    }
}

/// Module-level scratch cells shared by all procedures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Static {
    Scratch1,
    Scratch2,
    Scratch3,
    Text,
    Module,
    Type,
    Method,
    Instance,
}

impl Static {
    pub const COUNT: usize = 8;

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Static::Scratch1 => "scratch1",
            Static::Scratch2 => "scratch2",
            Static::Scratch3 => "scratch3",
            Static::Text => "text",
            Static::Module => "module",
            Static::Type => "type",
            Static::Method => "method",
            Static::Instance => "instance",
        }
    }
}

/// Placeholder address for forward references (to be backpatched)
pub const PLACEHOLDER_ADDR: usize = usize::MAX;

/// One machine operation. Operands live on the per-call operand stack;
/// the effects below are written as ( before -- after ).
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // Operand stack
    PushInt(i32),
    PushStr(Rc<str>),
    PushNull,
    Dup,
    Pop,
    /// Push the n-th argument of the current procedure
    LoadArg(u8),

    // Machine registers
    /// ( -- index )
    LoadIndex(StackId),
    /// ( index -- )
    StoreIndex(StackId),
    /// ( addr -- value ), faults when addr is outside the array
    LoadCell(StackId),
    /// ( addr value -- ), faults when addr is outside the array
    StoreCell(StackId),
    LoadStatic(Static),
    StoreStatic(Static),
    /// ( size -- ) replace the array with `size` zeroed cells
    AllocStack(StackId),

    // Arithmetic, all ( a b -- r ) unless noted
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    /// ( a -- -a )
    Neg,
    /// ( a -- |a| )
    Abs,
    Min,
    Max,
    And,
    Or,
    Xor,
    /// ( a -- ~a )
    Not,
    /// Comparisons push 1 or 0
    Ceq,
    Clt,
    Cgt,

    // Branches
    Jump(usize),
    /// ( v -- ) taken when v is zero or null
    JumpIfFalse(usize),
    /// ( v -- ) taken when v is non-zero or non-null
    JumpIfTrue(usize),
    /// ( a b -- ) conditional jumps comparing a with b
    JumpIfEqual(usize),
    JumpIfNotEqual(usize),
    JumpIfLess(usize),
    JumpIfLessOrEqual(usize),
    JumpIfGreaterOrEqual(usize),
    Call(ProcId),
    Return,

    // Console runtime
    /// ( str -- )
    WriteStr,
    /// ( str -- ) followed by a newline
    WriteLine,
    WriteNewLine,
    /// ( n -- )
    WriteInt,
    /// ( c -- )
    WriteChar,
    /// ( -- c ), -1 at end of input
    ReadChar,

    // Text runtime
    /// ( str -- len )
    StrLen,
    /// ( str i -- c )
    StrCharAt,
    /// ( n -- str )
    IntToStr,
    /// ( c -- str )
    CharToStr,
    /// ( a b -- ab )
    Concat,
    /// ( str -- n ok )
    ParseInt,

    // External module runtime
    /// ( path -- module ), faults when the module cannot be loaded
    LoadModule,
    /// ( module name -- type|null )
    ResolveType,
    /// ( type name -- method|null )
    ResolveMethod,
    /// ( method -- flag )
    IsStatic,
    /// ( type -- object )
    CreateInstance,
    /// ( method object|null -- )
    Invoke,
}

impl Instruction {
    /// Branch destination, if this instruction has one
    pub fn target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Instruction::Jump(dest)
            | Instruction::JumpIfFalse(dest)
            | Instruction::JumpIfTrue(dest)
            | Instruction::JumpIfEqual(dest)
            | Instruction::JumpIfNotEqual(dest)
            | Instruction::JumpIfLess(dest)
            | Instruction::JumpIfLessOrEqual(dest)
            | Instruction::JumpIfGreaterOrEqual(dest) => Some(dest),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Instruction::*;
        match self {
            PushInt(n) => write!(f, "push.i {}", n),
            PushStr(s) => write!(f, "push.s {:?}", s),
            PushNull => write!(f, "push.null"),
            Dup => write!(f, "dup"),
            Pop => write!(f, "pop"),
            LoadArg(n) => write!(f, "ldarg {}", n),
            LoadIndex(s) => write!(f, "ldidx {}", stack_tag(*s)),
            StoreIndex(s) => write!(f, "stidx {}", stack_tag(*s)),
            LoadCell(s) => write!(f, "ldcell {}", stack_tag(*s)),
            StoreCell(s) => write!(f, "stcell {}", stack_tag(*s)),
            LoadStatic(s) => write!(f, "ldsfld {}", s.name()),
            StoreStatic(s) => write!(f, "stsfld {}", s.name()),
            AllocStack(s) => write!(f, "newarr {}", stack_tag(*s)),
            Add => write!(f, "add"),
            Sub => write!(f, "sub"),
            Mul => write!(f, "mul"),
            Div => write!(f, "div"),
            Rem => write!(f, "rem"),
            Neg => write!(f, "neg"),
            Abs => write!(f, "abs"),
            Min => write!(f, "min"),
            Max => write!(f, "max"),
            And => write!(f, "and"),
            Or => write!(f, "or"),
            Xor => write!(f, "xor"),
            Not => write!(f, "not"),
            Ceq => write!(f, "ceq"),
            Clt => write!(f, "clt"),
            Cgt => write!(f, "cgt"),
            Jump(a) => write!(f, "br {}", a),
            JumpIfFalse(a) => write!(f, "brfalse {}", a),
            JumpIfTrue(a) => write!(f, "brtrue {}", a),
            JumpIfEqual(a) => write!(f, "beq {}", a),
            JumpIfNotEqual(a) => write!(f, "bne {}", a),
            JumpIfLess(a) => write!(f, "blt {}", a),
            JumpIfLessOrEqual(a) => write!(f, "ble {}", a),
            JumpIfGreaterOrEqual(a) => write!(f, "bge {}", a),
            Call(p) => write!(f, "call #{}", p.0),
            Return => write!(f, "ret"),
            WriteStr => write!(f, "write.s"),
            WriteLine => write!(f, "writeline.s"),
            WriteNewLine => write!(f, "writeline"),
            WriteInt => write!(f, "write.i"),
            WriteChar => write!(f, "write.c"),
            ReadChar => write!(f, "read.c"),
            StrLen => write!(f, "str.len"),
            StrCharAt => write!(f, "str.char"),
            IntToStr => write!(f, "str.from.i"),
            CharToStr => write!(f, "str.from.c"),
            Concat => write!(f, "str.concat"),
            ParseInt => write!(f, "str.parse"),
            LoadModule => write!(f, "ext.load"),
            ResolveType => write!(f, "ext.type"),
            ResolveMethod => write!(f, "ext.method"),
            IsStatic => write!(f, "ext.isstatic"),
            CreateInstance => write!(f, "ext.new"),
            Invoke => write!(f, "ext.invoke"),
        }
    }
}

fn stack_tag(stack: StackId) -> &'static str {
    match stack {
        StackId::Data => "ds",
        StackId::Return => "rs",
    }
}

// ============================================================================
// PROCEDURES AND MODULES
// ============================================================================

/// What a guard does once it intercepts a fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerAction {
    /// Print the message and resume after the guarded region
    Report(String),
    /// Unwind to the caller with the same fault
    Rethrow,
}

/// A guarded instruction range `[start, end)` of a procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultHandler {
    pub start: usize,
    pub end: usize,
    pub kind: FaultKind,
    pub action: HandlerAction,
    /// Where execution continues after a reported fault
    pub resume: usize,
}

impl FaultHandler {
    pub fn covers(&self, pc: usize, kind: FaultKind) -> bool {
        self.kind == kind && (self.start..self.end).contains(&pc)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
    pub name: String,
    pub arity: u8,
    pub code: Vec<Instruction>,
    pub handlers: Vec<FaultHandler>,
}

impl Procedure {
    /// Number of call sites targeting `callee`
    pub fn calls_to(&self, callee: ProcId) -> usize {
        self.code
            .iter()
            .filter(|inst| matches!(inst, Instruction::Call(p) if *p == callee))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Executable,
    Library,
}

/// Output of the code generator
#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub kind: ModuleKind,
    pub procedures: Vec<Procedure>,
    pub startup: ProcId,
    pub entry: ProcId,
    /// The shared external-call routine, if any external word is referenced
    pub bridge: Option<ProcId>,
    pub layout: MemoryLayout,
}

impl Module {
    pub fn procedure(&self, name: &str) -> Option<ProcId> {
        self.procedures
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
            .map(ProcId)
    }

    pub fn get(&self, id: ProcId) -> Option<&Procedure> {
        self.procedures.get(id.0)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            ModuleKind::Executable => "executable",
            ModuleKind::Library => "library",
        };
        writeln!(f, ".module {} ({})", self.name, kind)?;
        writeln!(
            f,
            ".stacks data={} return={} origin={} pad={} tib={} locals={}",
            self.layout.data_stack_size,
            self.layout.return_stack_size,
            self.layout.data_origin,
            self.layout.pad,
            self.layout.tib,
            self.layout.local_area_base,
        )?;

        for (id, procedure) in self.procedures.iter().enumerate() {
            writeln!(f)?;
            let mut tags = Vec::new();
            if id == self.entry.0 {
                tags.push("entry");
            }
            if id == self.startup.0 {
                tags.push("startup");
            }
            write!(f, ".proc #{} {}/{}", id, procedure.name, procedure.arity)?;
            if !tags.is_empty() {
                write!(f, " [{}]", tags.join(", "))?;
            }
            writeln!(f)?;

            for (pc, inst) in procedure.code.iter().enumerate() {
                match inst {
                    Instruction::Call(callee) => {
                        let name = self.get(*callee).map(|p| p.name.as_str()).unwrap_or("?");
                        writeln!(f, "  {:04}  {} ; {}", pc, inst, name)?;
                    }
                    _ => writeln!(f, "  {:04}  {}", pc, inst)?,
                }
            }

            for handler in &procedure.handlers {
                let action = match &handler.action {
                    HandlerAction::Report(msg) => format!("report {:?}", msg),
                    HandlerAction::Rethrow => "rethrow".to_string(),
                };
                writeln!(
                    f,
                    "  .catch {:?} [{:04}, {:04}) -> {} resume {:04}",
                    handler.kind, handler.start, handler.end, action, handler.resume
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_slots_fill_the_table() {
        let all = [
            Static::Scratch1,
            Static::Scratch2,
            Static::Scratch3,
            Static::Text,
            Static::Module,
            Static::Type,
            Static::Method,
            Static::Instance,
        ];
        assert_eq!(all.len(), Static::COUNT);
        for (i, slot) in all.iter().enumerate() {
            assert_eq!(slot.index(), i);
        }
    }

    #[test]
    fn test_only_branches_have_targets() {
        assert_eq!(Instruction::JumpIfGreaterOrEqual(7).target_mut(), Some(&mut 7));
        assert_eq!(Instruction::Return.target_mut(), None);
    }
}
