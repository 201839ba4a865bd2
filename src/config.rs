// config.rs - Code generator configuration

use crate::error::CompileError;
use crate::layout::RESERVED_CELLS;

pub const DEFAULT_ENTRY_WORD: &str = "MAIN";
pub const DEFAULT_DATA_STACK_SIZE: usize = 4096;
pub const DEFAULT_RETURN_STACK_SIZE: usize = 1024;
pub const DEFAULT_MODULE_NAME: &str = "ForthEngine";

/// Options recognized by the code generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Word that becomes the program entry point (case-insensitive)
    pub entry_word: String,
    /// Wrap every word body in a stack-range / module-load guard
    pub fault_guard: bool,
    pub data_stack_size: usize,
    pub return_stack_size: usize,
    /// Executable or library output. Only changes packaging.
    pub generate_executable: bool,
    pub module_name: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            entry_word: DEFAULT_ENTRY_WORD.to_string(),
            fault_guard: true,
            data_stack_size: DEFAULT_DATA_STACK_SIZE,
            return_stack_size: DEFAULT_RETURN_STACK_SIZE,
            generate_executable: true,
            module_name: DEFAULT_MODULE_NAME.to_string(),
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry_word(mut self, name: impl Into<String>) -> Self {
        self.entry_word = name.into();
        self
    }

    pub fn with_fault_guard(mut self, enabled: bool) -> Self {
        self.fault_guard = enabled;
        self
    }

    pub fn with_stack_sizes(mut self, data: usize, ret: usize) -> Self {
        self.data_stack_size = data;
        self.return_stack_size = ret;
        self
    }

    pub fn with_executable(mut self, executable: bool) -> Self {
        self.generate_executable = executable;
        self
    }

    pub fn with_module_name(mut self, name: impl Into<String>) -> Self {
        self.module_name = name.into();
        self
    }

    /// Checks the options that do not depend on the program being compiled.
    /// Global variable sizes are checked later by the layout planner.
    pub fn validate(&self) -> Result<(), CompileError> {
        if self.entry_word.trim().is_empty() {
            return Err(CompileError::InvalidConfig(
                "entry word name is empty".to_string(),
            ));
        }
        if self.data_stack_size <= RESERVED_CELLS {
            return Err(CompileError::InvalidConfig(format!(
                "data stack of {} cells cannot hold the {} reserved cells",
                self.data_stack_size, RESERVED_CELLS
            )));
        }
        if i32::try_from(self.data_stack_size).is_err() {
            return Err(CompileError::InvalidConfig(format!(
                "data stack of {} cells is not addressable",
                self.data_stack_size
            )));
        }
        if self.return_stack_size == 0 || i32::try_from(self.return_stack_size).is_err() {
            return Err(CompileError::InvalidConfig(format!(
                "return stack size {} is out of range",
                self.return_stack_size
            )));
        }
        Ok(())
    }
}
