// bridge.rs - Shared routine for calling methods of external modules
//
// The routine takes (module path, type name, method name) as arguments and
// is generated the first time any external word is referenced. Every
// external word compiles to three string pushes and a call into it.

use crate::bytecode::{HandlerAction, Instruction, ProcId, Procedure, Static};
use crate::emitter::{ProcedureBuilder, ProcedureTable};
use crate::error::{CompileError, FaultKind};
use crate::program::ExternalWord;
use log::debug;
use std::cell::OnceCell;

pub const BRIDGE_NAME: &str = "ExternalCaller";
pub const LIBRARY_UNLOADABLE: &str = "\nRUNTIME ERROR: Could not load library.";
pub const METHOD_UNRESOLVED: &str = "\nRUNTIME ERROR: Could not call external method.";

#[derive(Debug, Default)]
pub struct ExternalBridge {
    routine: OnceCell<ProcId>,
}

impl ExternalBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// The routine's id, once some external word has needed it
    pub fn routine(&self) -> Option<ProcId> {
        self.routine.get().copied()
    }

    /// Emit a call to `external` through the shared routine
    pub fn call(
        &self,
        b: &mut ProcedureBuilder,
        external: &ExternalWord,
        table: &mut ProcedureTable,
    ) -> Result<(), CompileError> {
        let routine = match self.routine.get() {
            Some(id) => *id,
            None => {
                debug!("emitting {} on first use by {}", BRIDGE_NAME, external.name);
                let id = table.add(build_routine()?);
                *self.routine.get_or_init(|| id)
            }
        };

        b.emit(Instruction::PushStr(external.module_path.as_str().into()));
        b.emit(Instruction::PushStr(external.type_name.as_str().into()));
        b.emit(Instruction::PushStr(external.method_name.as_str().into()));
        b.emit(Instruction::Call(routine));
        Ok(())
    }
}

fn report_and_return(b: &mut ProcedureBuilder, message: &str) {
    b.emit(Instruction::PushStr(message.into()));
    b.emit(Instruction::WriteLine);
    b.emit(Instruction::Return);
}

fn build_routine() -> Result<Procedure, CompileError> {
    let mut b = ProcedureBuilder::new(BRIDGE_NAME, 3);
    let start = b.here();

    b.emit(Instruction::LoadArg(0));
    b.emit(Instruction::LoadModule);
    b.emit(Instruction::StoreStatic(Static::Module));

    let type_found = b.define_label();
    b.emit(Instruction::LoadStatic(Static::Module));
    b.emit(Instruction::LoadArg(1));
    b.emit(Instruction::ResolveType);
    b.emit(Instruction::Dup);
    b.emit(Instruction::StoreStatic(Static::Type));
    b.branch(Instruction::JumpIfTrue, &type_found);
    report_and_return(&mut b, LIBRARY_UNLOADABLE);
    b.mark(type_found);

    let method_found = b.define_label();
    b.emit(Instruction::LoadStatic(Static::Type));
    b.emit(Instruction::LoadArg(2));
    b.emit(Instruction::ResolveMethod);
    b.emit(Instruction::Dup);
    b.emit(Instruction::StoreStatic(Static::Method));
    b.branch(Instruction::JumpIfTrue, &method_found);
    report_and_return(&mut b, METHOD_UNRESOLVED);
    b.mark(method_found);

    let invoke = b.define_label();
    b.emit(Instruction::PushNull);
    b.emit(Instruction::StoreStatic(Static::Instance));
    b.emit(Instruction::LoadStatic(Static::Method));
    b.emit(Instruction::IsStatic);
    b.branch(Instruction::JumpIfTrue, &invoke);
    b.emit(Instruction::LoadStatic(Static::Type));
    b.emit(Instruction::CreateInstance);
    b.emit(Instruction::StoreStatic(Static::Instance));
    b.mark(invoke);

    b.emit(Instruction::LoadStatic(Static::Method));
    b.emit(Instruction::LoadStatic(Static::Instance));
    b.emit(Instruction::Invoke);

    // Load failures belong to the calling word's guard
    b.guard(start, FaultKind::ModuleLoad, HandlerAction::Rethrow);
    b.emit(Instruction::Return);
    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routine_built_once() {
        let bridge = ExternalBridge::new();
        let mut table = ProcedureTable::new();
        let mut b = ProcedureBuilder::new("W", 0);

        assert_eq!(bridge.routine(), None);
        for method in ["A", "B", "C"] {
            let external = ExternalWord::new(method, "lib.so", "Tools", method);
            bridge.call(&mut b, &external, &mut table).unwrap();
        }

        let routine = bridge.routine().unwrap();
        let procedures = table.finish().unwrap();
        assert_eq!(procedures.len(), 1);
        assert_eq!(procedures[0].name, BRIDGE_NAME);
        assert_eq!(procedures[0].arity, 3);

        let caller = b.finish().unwrap();
        assert_eq!(caller.calls_to(routine), 3);
    }
}
