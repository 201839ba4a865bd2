// compiler.rs - Word compiler, atom dispatch and program assembly

use crate::bridge::ExternalBridge;
use crate::builtins::{self, Builtin};
use crate::bytecode::{HandlerAction, Instruction, Module, ModuleKind, ProcId, Procedure, StackId};
use crate::config::CompilerConfig;
use crate::control::{ControlFlow, ControlWord};
use crate::emitter::{ProcedureBuilder, ProcedureTable};
use crate::error::{CompileError, FaultKind};
use crate::layout::MemoryLayout;
use crate::program::{ConstantValue, Program, Word};
use crate::symbols::{LocalScope, SymbolTables, WordRegistry};
use log::{debug, trace};

pub const STARTUP_NAME: &str = "InitEngine";
pub const STACK_FAULT: &str = "RUNTIME ERROR: Stack underflow or overflow.";
pub const LIBRARY_MISSING: &str = "RUNTIME ERROR: Library file not found.";

/// Compile a whole program into a module
pub fn compile(program: &Program, config: &CompilerConfig) -> Result<Module, CompileError> {
    CodeGenerator::new(program, config)?.generate()
}

/// State kept while one word is being compiled
struct WordContext<'w> {
    word: &'w Word,
    locals: LocalScope,
    flow: ControlFlow,
}

pub struct CodeGenerator<'p> {
    program: &'p Program,
    config: &'p CompilerConfig,
    layout: MemoryLayout,
    tables: SymbolTables<'p>,
    registry: WordRegistry,
    procedures: ProcedureTable,
    bridge: ExternalBridge,
    startup: ProcId,
}

impl<'p> CodeGenerator<'p> {
    /// Plans memory, fills the symbol tables and registers every word so
    /// bodies can call words defined later in the source.
    pub fn new(program: &'p Program, config: &'p CompilerConfig) -> Result<Self, CompileError> {
        let layout = MemoryLayout::plan(config, &program.globals)?;
        let tables = SymbolTables::build(program, &layout);

        let mut procedures = ProcedureTable::new();
        let startup = procedures.add(startup_procedure(&layout)?);

        let mut registry = WordRegistry::new();
        for word in &program.words {
            let id = procedures.declare(word.name.clone());
            registry.register(&word.name, id)?;
        }

        Ok(CodeGenerator {
            program,
            config,
            layout,
            tables,
            registry,
            procedures,
            bridge: ExternalBridge::new(),
            startup,
        })
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub fn generate(mut self) -> Result<Module, CompileError> {
        let program = self.program;
        let mut entry = self.startup;

        for word in &program.words {
            let id = self
                .registry
                .lookup(&word.name)
                .ok_or_else(|| CompileError::MissingBody(word.name.clone()))?;
            if self.is_entry(word) {
                entry = id;
            }
            let procedure = self.compile_word(word)?;
            debug!(
                "compiled {} into {} instructions",
                word.name,
                procedure.code.len()
            );
            self.procedures.define(id, procedure);
        }

        let kind = if self.config.generate_executable {
            ModuleKind::Executable
        } else {
            ModuleKind::Library
        };

        Ok(Module {
            name: self.config.module_name.clone(),
            kind,
            procedures: self.procedures.finish()?,
            startup: self.startup,
            entry,
            bridge: self.bridge.routine(),
            layout: self.layout,
        })
    }

    fn is_entry(&self, word: &Word) -> bool {
        word.name.eq_ignore_ascii_case(&self.config.entry_word)
    }

    // ========================================================================
    // WORD COMPILER
    // ========================================================================

    fn compile_word(&mut self, word: &Word) -> Result<Procedure, CompileError> {
        let mut b = ProcedureBuilder::new(word.name.clone(), 0);
        let mut ctx = WordContext {
            word,
            locals: LocalScope::for_word(&self.tables, &self.layout, &word.name),
            flow: ControlFlow::new(word.name.clone()),
        };

        let is_entry = self.is_entry(word);
        if is_entry {
            b.emit(Instruction::Call(self.startup));
        }

        let start = b.here();
        for atom in &word.body {
            self.compile_atom(atom, &mut b, &mut ctx)?;
        }
        ctx.flow.finish()?;

        if self.config.fault_guard {
            let on_range = if is_entry {
                HandlerAction::Report(STACK_FAULT.to_string())
            } else {
                HandlerAction::Rethrow
            };
            b.guard(start, FaultKind::StackRange, on_range);
            b.guard(
                start,
                FaultKind::ModuleLoad,
                HandlerAction::Report(LIBRARY_MISSING.to_string()),
            );
        }

        b.emit(Instruction::Return);
        b.finish()
    }

    // ========================================================================
    // ATOM COMPILER
    // ========================================================================

    /// Resolution order: display literal, dump literal, keyword, integer,
    /// constant, local, global, external word, user word.
    fn compile_atom(
        &mut self,
        atom: &str,
        b: &mut ProcedureBuilder,
        ctx: &mut WordContext,
    ) -> Result<(), CompileError> {
        if let Some(text) = atom.strip_prefix(".\"") {
            trace!("{}: display literal", atom);
            builtins::display_text(b, text.trim_end_matches('"'));
            return Ok(());
        }

        if atom.starts_with('"') {
            trace!("{}: dump literal", atom);
            builtins::dump_text(b, atom.trim_matches('"'));
            return Ok(());
        }

        if let Some(control) = ControlWord::from_name(atom) {
            trace!("{}: control word", atom);
            return ctx.flow.compile(control, b);
        }

        if let Some(builtin) = Builtin::from_name(atom) {
            trace!("{}: built-in", atom);
            builtin.emit(b, &self.layout);
            return Ok(());
        }

        if let Ok(value) = atom.parse::<i32>() {
            trace!("{}: integer literal", atom);
            push_literal(b, value);
            return Ok(());
        }

        if let Some(value) = self.tables.constant(atom) {
            trace!("{}: constant", atom);
            match value {
                ConstantValue::Int(n) => push_literal(b, *n),
                ConstantValue::Text(text) => builtins::dump_text(b, text),
            }
            return Ok(());
        }

        if let Some(address) = ctx.locals.address(atom) {
            trace!("{}: local at {}", atom, address);
            push_literal(b, address);
            return Ok(());
        }

        if let Some(address) = self.tables.global(atom) {
            trace!("{}: global at {}", atom, address);
            push_literal(b, address);
            return Ok(());
        }

        if let Some(external) = self.tables.external(atom) {
            trace!("{}: external {}::{}", atom, external.type_name, external.method_name);
            return self.bridge.call(b, external, &mut self.procedures);
        }

        if let Some(callee) = self.registry.lookup(atom) {
            trace!("{}: call", atom);
            b.emit(Instruction::Call(callee));
            return Ok(());
        }

        Err(CompileError::UnknownIdentifier {
            token: atom.to_string(),
            word: ctx.word.name.clone(),
        })
    }
}

fn push_literal(b: &mut ProcedureBuilder, value: i32) {
    b.push_with(StackId::Data, |b| b.emit(Instruction::PushInt(value)));
}

/// Allocates both stacks and moves their indices to the origins
fn startup_procedure(layout: &MemoryLayout) -> Result<Procedure, CompileError> {
    let mut b = ProcedureBuilder::new(STARTUP_NAME, 0);
    b.emit(Instruction::PushInt(layout.data_stack_size));
    b.emit(Instruction::AllocStack(StackId::Data));
    b.emit(Instruction::PushInt(layout.return_stack_size));
    b.emit(Instruction::AllocStack(StackId::Return));
    b.emit(Instruction::PushInt(layout.data_origin));
    b.emit(Instruction::StoreIndex(StackId::Data));
    b.emit(Instruction::PushInt(layout.return_origin));
    b.emit(Instruction::StoreIndex(StackId::Return));
    b.emit(Instruction::Return);
    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(program: &Program) -> Result<Module, CompileError> {
        compile(program, &CompilerConfig::default())
    }

    #[test]
    fn test_startup_is_entry_without_main() {
        let module = build(&Program::new().word("HELPER", ["1"])).unwrap();
        assert_eq!(module.entry, module.startup);
        assert_eq!(module.procedures[module.startup.0].name, STARTUP_NAME);
    }

    #[test]
    fn test_generator_plans_globals_first() {
        let program = Program::new().global("A", 1).global("B", 4);
        let config = CompilerConfig::default();
        let generator = CodeGenerator::new(&program, &config).unwrap();
        assert_eq!(generator.layout().global_addresses, vec![0, 1]);
        assert_eq!(generator.layout().data_origin, 5);
    }

    #[test]
    fn test_main_calls_startup_first() {
        let module = build(&Program::new().word("main", ["1", "DROP"])).unwrap();
        let main = module.get(module.entry).unwrap();
        assert_eq!(main.code[0], Instruction::Call(module.startup));
        assert_eq!(main.code.last(), Some(&Instruction::Return));
    }

    #[test]
    fn test_unknown_identifier_names_word() {
        let err = build(&Program::new().word("W", ["FROB"])).unwrap_err();
        assert_eq!(err.to_string(), "FROB in word W is not known.");
    }

    #[test]
    fn test_forward_and_recursive_calls_resolve() {
        let program = Program::new()
            .word("FIRST", ["SECOND"])
            .word("SECOND", ["0", "IF", "SECOND", "THEN"]);
        assert!(build(&program).is_ok());
    }

    #[test]
    fn test_duplicate_words_rejected() {
        let program = Program::new().word("W", ["1"]).word("w", ["2"]);
        assert!(matches!(build(&program), Err(CompileError::DuplicateWord(_))));
    }

    #[test]
    fn test_guard_handlers_follow_config() {
        let program = Program::new().word("MAIN", ["HELPER"]).word("HELPER", ["DROP"]);

        let guarded = build(&program).unwrap();
        let main = guarded.get(guarded.entry).unwrap();
        let helper = guarded.get(guarded.procedure("HELPER").unwrap()).unwrap();
        assert_eq!(
            main.handlers[0].action,
            HandlerAction::Report(STACK_FAULT.to_string())
        );
        assert_eq!(helper.handlers[0].action, HandlerAction::Rethrow);
        assert_eq!(helper.handlers[1].kind, FaultKind::ModuleLoad);

        let config = CompilerConfig::new().with_fault_guard(false);
        let bare = compile(&program, &config).unwrap();
        assert!(bare.procedures.iter().all(|p| p.handlers.is_empty()));
    }

    #[test]
    fn test_keywords_cannot_be_shadowed() {
        let program = Program::new().global("DUP", 1).word("W", ["1", "DUP"]);
        let module = build(&program).unwrap();
        let word = module.get(module.procedure("W").unwrap()).unwrap();
        // DUP reads the top cell rather than pushing the variable's address 0
        assert!(word.code.contains(&Instruction::LoadCell(StackId::Data)));
    }
}
