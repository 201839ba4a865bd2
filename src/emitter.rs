// emitter.rs - Procedure builder with labels, backpatching and guard regions

use crate::bytecode::{
    FaultHandler, HandlerAction, Instruction, ProcId, Procedure, StackId, Static,
    PLACEHOLDER_ADDR,
};
use crate::error::{CompileError, FaultKind};

/// A branch target that has not been placed yet.
///
/// `mark` consumes the label, so it is placed at most once. Forward
/// branches only borrow it.
#[derive(Debug)]
pub struct Label {
    id: usize,
}

/// A branch target already placed at a known address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

impl Mark {
    pub fn addr(self) -> usize {
        self.0
    }
}

pub struct ProcedureBuilder {
    name: String,
    arity: u8,
    code: Vec<Instruction>,
    /// Address of each label once marked
    labels: Vec<Option<usize>>,
    /// (instruction address, label id) pairs awaiting a target
    fixups: Vec<(usize, usize)>,
    handlers: Vec<FaultHandler>,
}

impl ProcedureBuilder {
    pub fn new(name: impl Into<String>, arity: u8) -> Self {
        ProcedureBuilder {
            name: name.into(),
            arity,
            code: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
        }
    }

    pub fn emit(&mut self, inst: Instruction) {
        self.code.push(inst);
    }

    /// Address of the next instruction
    pub fn here(&self) -> usize {
        self.code.len()
    }

    pub fn define_label(&mut self) -> Label {
        self.labels.push(None);
        Label {
            id: self.labels.len() - 1,
        }
    }

    pub fn mark(&mut self, label: Label) -> Mark {
        let addr = self.here();
        self.labels[label.id] = Some(addr);
        Mark(addr)
    }

    /// Place a target at the current position without a prior label
    pub fn mark_here(&mut self) -> Mark {
        Mark(self.here())
    }

    /// Emit a forward branch; the destination is patched in `finish`
    pub fn branch(&mut self, jump: fn(usize) -> Instruction, label: &Label) {
        self.fixups.push((self.here(), label.id));
        self.emit(jump(PLACEHOLDER_ADDR));
    }

    /// Emit a branch to an already placed target
    pub fn branch_back(&mut self, jump: fn(usize) -> Instruction, mark: Mark) {
        self.emit(jump(mark.addr()));
    }

    /// Attach a handler to the instructions emitted since `start`.
    /// Reported faults resume at the current position.
    pub fn guard(&mut self, start: usize, kind: FaultKind, action: HandlerAction) {
        let end = self.here();
        self.handlers.push(FaultHandler {
            start,
            end,
            kind,
            action,
            resume: end,
        });
    }

    /// Backpatch every forward branch and produce the procedure
    pub fn finish(mut self) -> Result<Procedure, CompileError> {
        for (addr, label) in std::mem::take(&mut self.fixups) {
            let target = self.labels[label].ok_or_else(|| CompileError::UnresolvedLabel {
                procedure: self.name.clone(),
            })?;
            if let Some(dest) = self.code[addr].target_mut() {
                *dest = target;
            }
        }

        Ok(Procedure {
            name: self.name,
            arity: self.arity,
            code: self.code,
            handlers: self.handlers,
        })
    }

    // ========================================================================
    // STACK ACCESS SEQUENCES
    // ========================================================================

    /// ( -- index-depth )
    pub fn index_at(&mut self, stack: StackId, depth: i32) {
        self.emit(Instruction::LoadIndex(stack));
        if depth != 0 {
            self.emit(Instruction::PushInt(depth));
            self.emit(Instruction::Sub);
        }
    }

    /// ( -- cell ) reads the cell `depth` below the index, 1 being the top
    pub fn load_at(&mut self, stack: StackId, depth: i32) {
        self.index_at(stack, depth);
        self.emit(Instruction::LoadCell(stack));
    }

    /// Move the index by `delta` cells
    pub fn bump(&mut self, stack: StackId, delta: i32) {
        self.emit(Instruction::LoadIndex(stack));
        self.emit(Instruction::PushInt(delta));
        self.emit(Instruction::Add);
        self.emit(Instruction::StoreIndex(stack));
    }

    /// ( -- cell ) decrements the index and reads the cell it now points at
    pub fn pop_cell(&mut self, stack: StackId) {
        self.index_at(stack, 1);
        self.emit(Instruction::Dup);
        self.emit(Instruction::StoreIndex(stack));
        self.emit(Instruction::LoadCell(stack));
    }

    /// Pops a cell straight into a scratch static
    pub fn pop_into(&mut self, stack: StackId, target: Static) {
        self.pop_cell(stack);
        self.emit(Instruction::StoreStatic(target));
    }

    /// Pushes whatever `value` leaves on the operand stack. `value` runs
    /// before the index moves, so depths inside it refer to the old top.
    pub fn push_with(&mut self, stack: StackId, value: impl FnOnce(&mut Self)) {
        self.index_at(stack, 0);
        value(self);
        self.emit(Instruction::StoreCell(stack));
        self.bump(stack, 1);
    }

    /// Overwrites the cell `depth` below the index with `value`
    pub fn store_at(&mut self, stack: StackId, depth: i32, value: impl FnOnce(&mut Self)) {
        self.index_at(stack, depth);
        value(self);
        self.emit(Instruction::StoreCell(stack));
    }

    /// static += delta
    pub fn add_static(&mut self, target: Static, delta: i32) {
        self.emit(Instruction::LoadStatic(target));
        self.emit(Instruction::PushInt(delta));
        self.emit(Instruction::Add);
        self.emit(Instruction::StoreStatic(target));
    }

    pub fn set_static(&mut self, target: Static, value: i32) {
        self.emit(Instruction::PushInt(value));
        self.emit(Instruction::StoreStatic(target));
    }
}

// ============================================================================
// PROCEDURE TABLE
// ============================================================================

/// Procedure slots of the module being built. Words are declared before
/// any body is compiled so calls can target them ahead of definition.
#[derive(Debug, Default)]
pub struct ProcedureTable {
    slots: Vec<(String, Option<Procedure>)>,
}

impl ProcedureTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<String>) -> ProcId {
        self.slots.push((name.into(), None));
        ProcId(self.slots.len() - 1)
    }

    pub fn define(&mut self, id: ProcId, procedure: Procedure) {
        self.slots[id.0].1 = Some(procedure);
    }

    /// Declare and define in one step
    pub fn add(&mut self, procedure: Procedure) -> ProcId {
        let id = self.declare(procedure.name.clone());
        self.define(id, procedure);
        id
    }

    pub fn finish(self) -> Result<Vec<Procedure>, CompileError> {
        self.slots
            .into_iter()
            .map(|(name, body)| body.ok_or(CompileError::MissingBody(name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_requires_every_body() {
        let mut table = ProcedureTable::new();
        let id = table.declare("LATER");
        table.add(ProcedureBuilder::new("NOW", 0).finish().unwrap());
        assert_eq!(id, ProcId(0));
        assert_eq!(
            table.finish(),
            Err(CompileError::MissingBody("LATER".to_string()))
        );
    }

    #[test]
    fn test_forward_branch_is_patched() {
        let mut b = ProcedureBuilder::new("T", 0);
        let skip = b.define_label();
        b.branch(Instruction::JumpIfFalse, &skip);
        b.emit(Instruction::PushInt(1));
        b.mark(skip);
        b.emit(Instruction::Return);

        let procedure = b.finish().unwrap();
        assert_eq!(procedure.code[0], Instruction::JumpIfFalse(2));
    }

    #[test]
    fn test_backward_branch_uses_mark() {
        let mut b = ProcedureBuilder::new("T", 0);
        b.emit(Instruction::PushInt(0));
        let top = b.mark_here();
        b.branch_back(Instruction::Jump, top);
        let procedure = b.finish().unwrap();
        assert_eq!(procedure.code[1], Instruction::Jump(1));
    }

    #[test]
    fn test_unplaced_label_fails() {
        let mut b = ProcedureBuilder::new("BROKEN", 0);
        let nowhere = b.define_label();
        b.branch(Instruction::Jump, &nowhere);
        assert_eq!(
            b.finish(),
            Err(CompileError::UnresolvedLabel {
                procedure: "BROKEN".to_string()
            })
        );
    }

    #[test]
    fn test_unused_label_is_fine() {
        let mut b = ProcedureBuilder::new("T", 0);
        let _unused = b.define_label();
        b.emit(Instruction::Return);
        assert!(b.finish().is_ok());
    }

    #[test]
    fn test_guard_covers_emitted_range() {
        let mut b = ProcedureBuilder::new("T", 0);
        b.emit(Instruction::PushInt(0));
        let start = b.here();
        b.pop_cell(StackId::Data);
        b.guard(start, FaultKind::StackRange, HandlerAction::Rethrow);
        b.emit(Instruction::Return);

        let procedure = b.finish().unwrap();
        let handler = &procedure.handlers[0];
        assert_eq!((handler.start, handler.end), (1, 7));
        assert!(handler.covers(6, FaultKind::StackRange));
        assert!(!handler.covers(7, FaultKind::StackRange));
        assert!(!handler.covers(3, FaultKind::ModuleLoad));
    }
}
