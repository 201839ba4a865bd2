// symbols.rs - Read-only symbol tables consulted during code generation
//
// All lookups are case-insensitive. Tables are filled once from the
// parsed program and never change while words are compiled.

use crate::bytecode::ProcId;
use crate::error::CompileError;
use crate::layout::MemoryLayout;
use crate::program::{ConstantValue, ExternalWord, Program};
use std::collections::HashMap;

fn key(name: &str) -> String {
    name.to_uppercase()
}

#[derive(Debug)]
pub struct SymbolTables<'p> {
    constants: HashMap<String, &'p ConstantValue>,
    globals: HashMap<String, i32>,
    /// Owning word -> local names in declaration order
    locals: HashMap<String, Vec<String>>,
    externals: HashMap<String, &'p ExternalWord>,
}

impl<'p> SymbolTables<'p> {
    /// Builds every table. When a name is declared twice in the same
    /// table, the first declaration wins.
    pub fn build(program: &'p Program, layout: &MemoryLayout) -> Self {
        let mut constants = HashMap::new();
        for constant in &program.constants {
            constants.entry(key(&constant.name)).or_insert(&constant.value);
        }

        let mut globals = HashMap::new();
        for (global, address) in program.globals.iter().zip(&layout.global_addresses) {
            globals.entry(key(&global.name)).or_insert(*address);
        }

        let mut locals: HashMap<String, Vec<String>> = HashMap::new();
        for local in &program.locals {
            locals
                .entry(key(&local.owning_word))
                .or_default()
                .push(key(&local.name));
        }

        let mut externals = HashMap::new();
        for external in &program.externals {
            externals.entry(key(&external.name)).or_insert(external);
        }

        SymbolTables {
            constants,
            globals,
            locals,
            externals,
        }
    }

    pub fn constant(&self, name: &str) -> Option<&'p ConstantValue> {
        self.constants.get(&key(name)).copied()
    }

    pub fn global(&self, name: &str) -> Option<i32> {
        self.globals.get(&key(name)).copied()
    }

    /// Local names declared by `word`, in declaration order
    pub fn locals_of(&self, word: &str) -> &[String] {
        self.locals.get(&key(word)).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn external(&self, name: &str) -> Option<&'p ExternalWord> {
        self.externals.get(&key(name)).copied()
    }
}

/// Addresses of one word's locals, assigned when that word starts compiling.
/// Every word counts from the start of the shared local window.
#[derive(Debug, Default)]
pub struct LocalScope {
    addresses: HashMap<String, i32>,
}

impl LocalScope {
    pub fn for_word(tables: &SymbolTables, layout: &MemoryLayout, word: &str) -> Self {
        let mut addresses = HashMap::new();
        for (index, name) in tables.locals_of(word).iter().enumerate() {
            addresses
                .entry(name.clone())
                .or_insert_with(|| layout.local_address(index));
        }
        LocalScope { addresses }
    }

    pub fn address(&self, name: &str) -> Option<i32> {
        self.addresses.get(&key(name)).copied()
    }
}

/// Procedure ids of every word, registered before any body is compiled
#[derive(Debug, Default)]
pub struct WordRegistry {
    words: HashMap<String, ProcId>,
}

impl WordRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, id: ProcId) -> Result<(), CompileError> {
        if self.words.insert(key(name), id).is_some() {
            return Err(CompileError::DuplicateWord(key(name)));
        }
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<ProcId> {
        self.words.get(&key(name)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::program::Constant;

    fn tables_for(program: &Program) -> (MemoryLayout, SymbolTables<'_>) {
        let layout = MemoryLayout::plan(&CompilerConfig::default(), &program.globals).unwrap();
        let tables = SymbolTables::build(program, &layout);
        (layout, tables)
    }

    #[test]
    fn test_lookup_ignores_case() {
        let program = Program::new()
            .constant(Constant::int("Answer", 42))
            .global("counter", 1);
        let (_, tables) = tables_for(&program);

        assert_eq!(tables.constant("ANSWER"), Some(&ConstantValue::Int(42)));
        assert_eq!(tables.global("COUNTER"), Some(0));
        assert_eq!(tables.global("missing"), None);
    }

    #[test]
    fn test_locals_are_word_scoped() {
        let program = Program::new()
            .local("X", "FIRST")
            .local("Y", "FIRST")
            .local("Y", "SECOND");
        let (layout, tables) = tables_for(&program);

        let first = LocalScope::for_word(&tables, &layout, "first");
        let second = LocalScope::for_word(&tables, &layout, "SECOND");

        assert_eq!(first.address("x"), Some(layout.local_area_base));
        assert_eq!(first.address("Y"), Some(layout.local_area_base + 1));
        // Same window, so the two words alias each other's cells
        assert_eq!(second.address("Y"), Some(layout.local_area_base));
        assert_eq!(second.address("X"), None);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = WordRegistry::new();
        registry.register("square", ProcId(1)).unwrap();
        assert_eq!(registry.lookup("SQUARE"), Some(ProcId(1)));
        assert_eq!(
            registry.register("SQUARE", ProcId(2)),
            Err(CompileError::DuplicateWord("SQUARE".to_string()))
        );
    }
}
