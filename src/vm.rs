// vm.rs - Stack machine that executes generated modules
//
// Each procedure call gets its own operand stack. The data and return
// stacks are plain cell arrays owned by the machine, sized and indexed
// entirely by the generated startup code.

use crate::bytecode::{HandlerAction, Instruction, Module, ProcId, StackId, Static};
use crate::error::{Fault, RuntimeError};
use crate::runtime::{
    CallContext, Console, ExternalMethod, ExternalModule, ExternalType, ModuleLoader,
    ModuleRegistry,
};
use log::{debug, trace};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// An operand stack entry
#[derive(Clone)]
enum Value {
    Int(i32),
    Str(Rc<str>),
    Null,
    Module(Rc<ExternalModule>),
    Type(Rc<ExternalType>),
    Method(Rc<ExternalMethod>),
    Object(Rc<RefCell<Box<dyn Any>>>),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Null => false,
            _ => true,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::Null => "null",
            Value::Module(_) => "module",
            Value::Type(_) => "type",
            Value::Method(_) => "method",
            Value::Object(_) => "object",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{:?}", s),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

fn mismatch(expected: &str, found: &Value) -> Fault {
    Fault::InvalidProgram(format!("expected {}, found {}", expected, found.type_name()))
}

struct Frame {
    proc: ProcId,
    ip: usize,
    operands: Vec<Value>,
    args: Vec<Value>,
}

impl Frame {
    fn new(proc: ProcId, args: Vec<Value>) -> Self {
        Frame {
            proc,
            ip: 0,
            operands: Vec::new(),
            args,
        }
    }

    fn push(&mut self, value: Value) {
        self.operands.push(value);
    }

    fn pop(&mut self) -> Result<Value, Fault> {
        self.operands
            .pop()
            .ok_or_else(|| Fault::InvalidProgram("operand stack is empty".to_string()))
    }

    fn pop_int(&mut self) -> Result<i32, Fault> {
        match self.pop()? {
            Value::Int(n) => Ok(n),
            other => Err(mismatch("an integer", &other)),
        }
    }

    fn pop_str(&mut self) -> Result<Rc<str>, Fault> {
        match self.pop()? {
            Value::Str(s) => Ok(s),
            other => Err(mismatch("a string", &other)),
        }
    }

    /// ( a b -- ) as integers, returned in push order
    fn pop_pair(&mut self) -> Result<(i32, i32), Fault> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        Ok((a, b))
    }
}

/// What the dispatcher does after one instruction
enum Flow {
    Next,
    Call(ProcId, Vec<Value>),
    Return,
}

pub struct Machine<'m, C: Console> {
    module: &'m Module,
    console: C,
    loader: Box<dyn ModuleLoader>,
    data: Vec<i32>,
    data_index: i32,
    ret: Vec<i32>,
    ret_index: i32,
    statics: Vec<Value>,
    booted: bool,
}

impl<'m, C: Console> Machine<'m, C> {
    pub fn new(module: &'m Module, console: C) -> Self {
        let mut statics = vec![Value::Int(0); Static::COUNT];
        statics[Static::Text.index()] = Value::Str("".into());
        for slot in [Static::Module, Static::Type, Static::Method, Static::Instance] {
            statics[slot.index()] = Value::Null;
        }

        Machine {
            module,
            console,
            loader: Box::new(ModuleRegistry::new()),
            data: Vec::new(),
            data_index: 0,
            ret: Vec::new(),
            ret_index: 0,
            statics,
            booted: false,
        }
    }

    pub fn with_loader(mut self, loader: impl ModuleLoader + 'static) -> Self {
        self.loader = Box::new(loader);
        self
    }

    // ========================================================================
    // ENTRY POINTS
    // ========================================================================

    /// Run the startup procedure: allocate both stacks and reset indices
    pub fn boot(&mut self) -> Result<(), RuntimeError> {
        self.execute(self.module.startup, Vec::new())?;
        self.booted = true;
        Ok(())
    }

    /// Run the module's entry point
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        self.execute(self.module.entry, Vec::new())?;
        self.booted = true;
        Ok(())
    }

    /// Call one word by name, booting first if nothing has run yet.
    ///
    /// The entry word begins with a call to the startup procedure, so
    /// invoking it runs startup again and resets both stacks. Values pushed
    /// beforehand are lost. Use [`Machine::run`] to start a program.
    pub fn invoke(&mut self, word: &str) -> Result<(), RuntimeError> {
        let id = self
            .module
            .procedure(word)
            .ok_or_else(|| RuntimeError::UnknownProcedure(word.to_string()))?;
        if !self.booted {
            self.boot()?;
        }
        self.execute(id, Vec::new())
    }

    // ========================================================================
    // INSPECTION
    // ========================================================================

    /// Live data stack cells, bottom first
    pub fn data_stack(&self) -> &[i32] {
        let origin = self.module.layout.data_origin;
        if self.data_index <= origin {
            return &[];
        }
        self.data
            .get(origin as usize..self.data_index as usize)
            .unwrap_or(&[])
    }

    /// Live return stack cells, bottom first
    pub fn return_stack(&self) -> &[i32] {
        let origin = self.module.layout.return_origin;
        if self.ret_index <= origin {
            return &[];
        }
        self.ret
            .get(origin as usize..self.ret_index as usize)
            .unwrap_or(&[])
    }

    pub fn data_index(&self) -> i32 {
        self.data_index
    }

    /// Raw memory cell, if the address is inside the data stack array
    pub fn cell(&self, addr: i32) -> Option<i32> {
        usize::try_from(addr).ok().and_then(|i| self.data.get(i)).copied()
    }

    pub fn console(&self) -> &C {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    pub fn into_console(self) -> C {
        self.console
    }

    pub fn push(&mut self, value: i32) -> Result<(), RuntimeError> {
        if !self.booted {
            return Err(RuntimeError::NotBooted);
        }
        let index = self.data_index;
        self.store_cell(StackId::Data, index, value)
            .map_err(|fault| self.unhandled("push", fault))?;
        self.data_index += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<i32, RuntimeError> {
        if !self.booted {
            return Err(RuntimeError::NotBooted);
        }
        let index = self.data_index - 1;
        let value = self
            .load_cell(StackId::Data, index)
            .map_err(|fault| self.unhandled("pop", fault))?;
        self.data_index = index;
        Ok(value)
    }

    fn unhandled(&self, word: &str, fault: Fault) -> RuntimeError {
        RuntimeError::Unhandled {
            word: word.to_string(),
            fault,
        }
    }

    // ========================================================================
    // CELL ACCESS
    // ========================================================================

    fn cells(&self, stack: StackId) -> &[i32] {
        match stack {
            StackId::Data => &self.data,
            StackId::Return => &self.ret,
        }
    }

    fn cells_mut(&mut self, stack: StackId) -> &mut Vec<i32> {
        match stack {
            StackId::Data => &mut self.data,
            StackId::Return => &mut self.ret,
        }
    }

    fn index_of(&self, stack: StackId) -> i32 {
        match stack {
            StackId::Data => self.data_index,
            StackId::Return => self.ret_index,
        }
    }

    fn set_index(&mut self, stack: StackId, index: i32) {
        match stack {
            StackId::Data => self.data_index = index,
            StackId::Return => self.ret_index = index,
        }
    }

    fn load_cell(&self, stack: StackId, index: i32) -> Result<i32, Fault> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.cells(stack).get(i))
            .copied()
            .ok_or(Fault::StackRange { stack, index })
    }

    fn store_cell(&mut self, stack: StackId, index: i32, value: i32) -> Result<(), Fault> {
        let cell = usize::try_from(index)
            .ok()
            .and_then(|i| self.cells_mut(stack).get_mut(i))
            .ok_or(Fault::StackRange { stack, index })?;
        *cell = value;
        Ok(())
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    fn execute(&mut self, entry: ProcId, args: Vec<Value>) -> Result<(), RuntimeError> {
        let module = self.module;
        let mut frames = vec![Frame::new(entry, args)];

        while let Some(frame) = frames.last_mut() {
            let procedure = module
                .get(frame.proc)
                .ok_or_else(|| RuntimeError::UnknownProcedure(format!("#{}", frame.proc.0)))?;
            let pc = frame.ip;
            frame.ip += 1;

            let result = match procedure.code.get(pc) {
                Some(inst) => self.step(inst, frame),
                None => Err(Fault::InvalidProgram(format!(
                    "{} ran past its last instruction",
                    procedure.name
                ))),
            };

            match result {
                Ok(Flow::Next) => {}
                Ok(Flow::Call(callee, args)) => {
                    trace!("{} calls #{}", procedure.name, callee.0);
                    frames.push(Frame::new(callee, args));
                }
                Ok(Flow::Return) => {
                    frames.pop();
                }
                Err(fault) => self.unwind(&mut frames, fault)?,
            }
        }

        Ok(())
    }

    /// Walk outward until a handler covering the faulting instruction
    /// takes the fault. Frames it passes through are discarded.
    fn unwind(&mut self, frames: &mut Vec<Frame>, fault: Fault) -> Result<(), RuntimeError> {
        let module = self.module;
        let kind = fault.kind();

        while let Some(frame) = frames.last_mut() {
            let procedure = module
                .get(frame.proc)
                .ok_or_else(|| RuntimeError::UnknownProcedure(format!("#{}", frame.proc.0)))?;
            let pc = frame.ip.saturating_sub(1);

            if let Some(handler) = procedure.handlers.iter().find(|h| h.covers(pc, kind)) {
                match &handler.action {
                    HandlerAction::Report(message) => {
                        debug!("{} reports fault at {}: {}", procedure.name, pc, fault);
                        self.console.write_line(message);
                        frame.operands.clear();
                        frame.ip = handler.resume;
                        return Ok(());
                    }
                    HandlerAction::Rethrow => {
                        debug!("{} rethrows fault at {}: {}", procedure.name, pc, fault);
                    }
                }
            }

            frames.pop();
            if frames.is_empty() {
                return Err(RuntimeError::Unhandled {
                    word: procedure.name.clone(),
                    fault,
                });
            }
        }

        Ok(())
    }

    fn step(&mut self, inst: &Instruction, frame: &mut Frame) -> Result<Flow, Fault> {
        use Instruction as I;

        match inst {
            I::PushInt(n) => frame.push(Value::Int(*n)),
            I::PushStr(s) => frame.push(Value::Str(s.clone())),
            I::PushNull => frame.push(Value::Null),
            I::Dup => {
                let top = frame.pop()?;
                frame.push(top.clone());
                frame.push(top);
            }
            I::Pop => {
                frame.pop()?;
            }
            I::LoadArg(n) => {
                let arg = frame.args.get(*n as usize).cloned().ok_or_else(|| {
                    Fault::InvalidProgram(format!("argument {} was not passed", n))
                })?;
                frame.push(arg);
            }

            I::LoadIndex(stack) => frame.push(Value::Int(self.index_of(*stack))),
            I::StoreIndex(stack) => {
                let index = frame.pop_int()?;
                self.set_index(*stack, index);
            }
            I::LoadCell(stack) => {
                let addr = frame.pop_int()?;
                frame.push(Value::Int(self.load_cell(*stack, addr)?));
            }
            I::StoreCell(stack) => {
                let (addr, value) = frame.pop_pair()?;
                self.store_cell(*stack, addr, value)?;
            }
            I::LoadStatic(slot) => frame.push(self.statics[slot.index()].clone()),
            I::StoreStatic(slot) => self.statics[slot.index()] = frame.pop()?,
            I::AllocStack(stack) => {
                let size = frame.pop_int()?;
                let size = usize::try_from(size).map_err(|_| {
                    Fault::InvalidProgram(format!("cannot allocate {} cells", size))
                })?;
                *self.cells_mut(*stack) = vec![0; size];
            }

            I::Add => arith(frame, |a, b| Ok(a.wrapping_add(b)))?,
            I::Sub => arith(frame, |a, b| Ok(a.wrapping_sub(b)))?,
            I::Mul => arith(frame, |a, b| Ok(a.wrapping_mul(b)))?,
            I::Div => arith(frame, |a, b| {
                if b == 0 {
                    return Err(Fault::DivideByZero);
                }
                a.checked_div(b).ok_or(Fault::Overflow)
            })?,
            I::Rem => arith(frame, |a, b| {
                if b == 0 {
                    return Err(Fault::DivideByZero);
                }
                a.checked_rem(b).ok_or(Fault::Overflow)
            })?,
            I::Neg => {
                let a = frame.pop_int()?;
                frame.push(Value::Int(a.wrapping_neg()));
            }
            I::Abs => {
                let a = frame.pop_int()?;
                frame.push(Value::Int(a.checked_abs().ok_or(Fault::Overflow)?));
            }
            I::Min => arith(frame, |a, b| Ok(a.min(b)))?,
            I::Max => arith(frame, |a, b| Ok(a.max(b)))?,
            I::And => arith(frame, |a, b| Ok(a & b))?,
            I::Or => arith(frame, |a, b| Ok(a | b))?,
            I::Xor => arith(frame, |a, b| Ok(a ^ b))?,
            I::Not => {
                let a = frame.pop_int()?;
                frame.push(Value::Int(!a));
            }
            I::Ceq => arith(frame, |a, b| Ok((a == b) as i32))?,
            I::Clt => arith(frame, |a, b| Ok((a < b) as i32))?,
            I::Cgt => arith(frame, |a, b| Ok((a > b) as i32))?,

            I::Jump(dest) => frame.ip = *dest,
            I::JumpIfFalse(dest) => {
                if !frame.pop()?.truthy() {
                    frame.ip = *dest;
                }
            }
            I::JumpIfTrue(dest) => {
                if frame.pop()?.truthy() {
                    frame.ip = *dest;
                }
            }
            I::JumpIfEqual(dest) => compare_jump(frame, *dest, |a, b| a == b)?,
            I::JumpIfNotEqual(dest) => compare_jump(frame, *dest, |a, b| a != b)?,
            I::JumpIfLess(dest) => compare_jump(frame, *dest, |a, b| a < b)?,
            I::JumpIfLessOrEqual(dest) => compare_jump(frame, *dest, |a, b| a <= b)?,
            I::JumpIfGreaterOrEqual(dest) => compare_jump(frame, *dest, |a, b| a >= b)?,
            I::Call(callee) => {
                let arity = self
                    .module
                    .get(*callee)
                    .ok_or_else(|| Fault::InvalidProgram(format!("no procedure #{}", callee.0)))?
                    .arity as usize;
                if frame.operands.len() < arity {
                    return Err(Fault::InvalidProgram(format!(
                        "call to #{} needs {} arguments",
                        callee.0, arity
                    )));
                }
                let args = frame.operands.split_off(frame.operands.len() - arity);
                return Ok(Flow::Call(*callee, args));
            }
            I::Return => return Ok(Flow::Return),

            I::WriteStr => {
                let text = frame.pop_str()?;
                self.console.write(&text);
            }
            I::WriteLine => {
                let text = frame.pop_str()?;
                self.console.write_line(&text);
            }
            I::WriteNewLine => self.console.write_line(""),
            I::WriteInt => {
                let n = frame.pop_int()?;
                self.console.write(&n.to_string());
            }
            I::WriteChar => {
                let c = frame.pop_int()?;
                self.console.write(&char_of(c).to_string());
            }
            I::ReadChar => {
                let c = self.console.read_char();
                frame.push(Value::Int(c));
            }

            I::StrLen => {
                let s = frame.pop_str()?;
                frame.push(Value::Int(s.chars().count() as i32));
            }
            I::StrCharAt => {
                let i = frame.pop_int()?;
                let s = frame.pop_str()?;
                let c = usize::try_from(i)
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .ok_or_else(|| {
                        Fault::InvalidProgram(format!("index {} is outside {:?}", i, s))
                    })?;
                frame.push(Value::Int(c as i32));
            }
            I::IntToStr => {
                let n = frame.pop_int()?;
                frame.push(Value::Str(n.to_string().into()));
            }
            I::CharToStr => {
                let c = frame.pop_int()?;
                frame.push(Value::Str(char_of(c).to_string().into()));
            }
            I::Concat => {
                let b = frame.pop_str()?;
                let a = frame.pop_str()?;
                frame.push(Value::Str(format!("{}{}", a, b).into()));
            }
            I::ParseInt => {
                let s = frame.pop_str()?;
                match s.trim().parse::<i32>() {
                    Ok(n) => {
                        frame.push(Value::Int(n));
                        frame.push(Value::Int(1));
                    }
                    Err(_) => {
                        frame.push(Value::Int(0));
                        frame.push(Value::Int(0));
                    }
                }
            }

            I::LoadModule => {
                let path = frame.pop_str()?;
                let module = self
                    .loader
                    .load(&path)
                    .ok_or_else(|| Fault::ModuleLoad(path.to_string()))?;
                frame.push(Value::Module(module));
            }
            I::ResolveType => {
                let name = frame.pop_str()?;
                let found = match frame.pop()? {
                    Value::Module(module) => module.resolve_type(&name).map(Value::Type),
                    Value::Null => None,
                    other => return Err(mismatch("a module", &other)),
                };
                frame.push(found.unwrap_or(Value::Null));
            }
            I::ResolveMethod => {
                let name = frame.pop_str()?;
                let found = match frame.pop()? {
                    Value::Type(ty) => ty.resolve_method(&name).map(Value::Method),
                    Value::Null => None,
                    other => return Err(mismatch("a type", &other)),
                };
                frame.push(found.unwrap_or(Value::Null));
            }
            I::IsStatic => match frame.pop()? {
                Value::Method(method) => frame.push(Value::Int(method.is_static as i32)),
                other => return Err(mismatch("a method", &other)),
            },
            I::CreateInstance => match frame.pop()? {
                Value::Type(ty) => {
                    frame.push(Value::Object(Rc::new(RefCell::new(ty.construct()))))
                }
                other => return Err(mismatch("a type", &other)),
            },
            I::Invoke => {
                let instance = frame.pop()?;
                let method = match frame.pop()? {
                    Value::Method(method) => method,
                    other => return Err(mismatch("a method", &other)),
                };
                self.invoke_external(&method, instance)?;
            }
        }

        Ok(Flow::Next)
    }

    fn invoke_external(&mut self, method: &ExternalMethod, instance: Value) -> Result<(), Fault> {
        let object = match instance {
            Value::Object(object) => Some(object),
            Value::Null => None,
            other => return Err(mismatch("an object", &other)),
        };
        let mut borrowed = object.as_ref().map(|object| object.borrow_mut());
        let instance = borrowed.as_deref_mut().map(|b| &mut **b as &mut dyn Any);

        trace!("invoking external method {}", method.name);
        let mut ctx = CallContext::new(
            &mut self.console,
            &mut self.data,
            &mut self.data_index,
            instance,
        );
        method.call(&mut ctx)
    }
}

fn arith(frame: &mut Frame, op: impl FnOnce(i32, i32) -> Result<i32, Fault>) -> Result<(), Fault> {
    let (a, b) = frame.pop_pair()?;
    frame.push(Value::Int(op(a, b)?));
    Ok(())
}

fn compare_jump(frame: &mut Frame, dest: usize, taken: impl FnOnce(i32, i32) -> bool) -> Result<(), Fault> {
    let (a, b) = frame.pop_pair()?;
    if taken(a, b) {
        frame.ip = dest;
    }
    Ok(())
}

fn char_of(code: i32) -> char {
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::config::CompilerConfig;
    use crate::program::Program;
    use crate::runtime::BufferConsole;

    fn module(program: &Program) -> Module {
        compile(program, &CompilerConfig::default()).unwrap()
    }

    #[test]
    fn test_boot_allocates_stacks() {
        let module = module(&Program::new().global("X", 3).word("W", ["1"]));
        let mut machine = Machine::new(&module, BufferConsole::new());
        machine.boot().unwrap();

        assert_eq!(machine.data_index(), 3);
        assert!(machine.data_stack().is_empty());
        assert_eq!(machine.cell(4095), Some(0));
        assert_eq!(machine.cell(4096), None);
    }

    #[test]
    fn test_push_pop_through_api() {
        let module = module(&Program::new().word("W", ["1"]));
        let mut machine = Machine::new(&module, BufferConsole::new());
        machine.boot().unwrap();

        machine.push(11).unwrap();
        machine.push(22).unwrap();
        assert_eq!(machine.data_stack(), &[11, 22]);
        assert_eq!(machine.pop().unwrap(), 22);
        assert_eq!(machine.pop().unwrap(), 11);
        assert!(machine.pop().is_err());
    }

    #[test]
    fn test_push_before_boot() {
        let module = module(&Program::new().word("W", ["1"]));
        let mut machine = Machine::new(&module, BufferConsole::new());
        assert_eq!(machine.push(1), Err(RuntimeError::NotBooted));
    }

    #[test]
    fn test_division_by_zero_escapes() {
        let module = module(&Program::new().word("W", ["1", "0", "/"]));
        let mut machine = Machine::new(&module, BufferConsole::new());
        assert_eq!(
            machine.invoke("W"),
            Err(RuntimeError::Unhandled {
                word: "W".to_string(),
                fault: Fault::DivideByZero
            })
        );
    }

    #[test]
    fn test_unknown_word() {
        let module = module(&Program::new().word("W", ["1"]));
        let mut machine = Machine::new(&module, BufferConsole::new());
        assert!(matches!(
            machine.invoke("NOPE"),
            Err(RuntimeError::UnknownProcedure(_))
        ));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Int(0).truthy());
        assert!(Value::Int(-1).truthy());
        assert!(!Value::Null.truthy());
        assert!(Value::Str("".into()).truthy());
    }
}
