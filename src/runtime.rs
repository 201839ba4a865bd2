// runtime.rs - Console and external-module surface used by running programs

use crate::bytecode::StackId;
use crate::error::Fault;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

// ============================================================================
// CONSOLE
// ============================================================================

/// Text I/O available to compiled programs
pub trait Console {
    fn write(&mut self, text: &str);

    fn write_line(&mut self, text: &str) {
        self.write(text);
        self.write("\n");
    }

    /// Next input character code, or -1 once input is exhausted
    fn read_char(&mut self) -> i32;
}

/// Process stdin/stdout
#[derive(Debug, Default)]
pub struct StdConsole {
    pending: VecDeque<char>,
}

impl StdConsole {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Console for StdConsole {
    fn write(&mut self, text: &str) {
        let mut out = io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn read_char(&mut self) -> i32 {
        if self.pending.is_empty() {
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => return -1,
                Ok(_) => self.pending.extend(line.chars()),
            }
        }
        self.pending.pop_front().map(|c| c as i32).unwrap_or(-1)
    }
}

/// In-memory console: scripted input, captured output
#[derive(Debug, Default, Clone)]
pub struct BufferConsole {
    input: VecDeque<char>,
    output: String,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(input: &str) -> Self {
        BufferConsole {
            input: input.chars().collect(),
            output: String::new(),
        }
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl Console for BufferConsole {
    fn write(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn read_char(&mut self) -> i32 {
        self.input.pop_front().map(|c| c as i32).unwrap_or(-1)
    }
}

// ============================================================================
// EXTERNAL MODULES
// ============================================================================

/// What an external method sees while it runs
pub struct CallContext<'a> {
    pub console: &'a mut dyn Console,
    data: &'a mut Vec<i32>,
    data_index: &'a mut i32,
    instance: Option<&'a mut (dyn Any + 'static)>,
}

impl<'a> CallContext<'a> {
    pub(crate) fn new(
        console: &'a mut dyn Console,
        data: &'a mut Vec<i32>,
        data_index: &'a mut i32,
        instance: Option<&'a mut (dyn Any + 'static)>,
    ) -> Self {
        CallContext {
            console,
            data,
            data_index,
            instance,
        }
    }

    pub fn push(&mut self, value: i32) -> Result<(), Fault> {
        let index = *self.data_index;
        let cell = usize::try_from(index)
            .ok()
            .and_then(|i| self.data.get_mut(i))
            .ok_or(Fault::StackRange {
                stack: StackId::Data,
                index,
            })?;
        *cell = value;
        *self.data_index += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<i32, Fault> {
        let index = *self.data_index - 1;
        let value = usize::try_from(index)
            .ok()
            .and_then(|i| self.data.get(i))
            .copied()
            .ok_or(Fault::StackRange {
                stack: StackId::Data,
                index,
            })?;
        *self.data_index = index;
        Ok(value)
    }

    /// The object the method was invoked on; `None` for static methods
    pub fn instance<T: Any>(&mut self) -> Option<&mut T> {
        self.instance.as_deref_mut()?.downcast_mut::<T>()
    }
}

pub type MethodBody = Rc<dyn Fn(&mut CallContext<'_>) -> Result<(), Fault>>;
pub type Constructor = Rc<dyn Fn() -> Box<dyn Any>>;

pub struct ExternalMethod {
    pub name: String,
    pub is_static: bool,
    body: MethodBody,
}

impl ExternalMethod {
    pub fn call(&self, ctx: &mut CallContext<'_>) -> Result<(), Fault> {
        (self.body)(ctx)
    }
}

impl fmt::Debug for ExternalMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExternalMethod")
            .field("name", &self.name)
            .field("is_static", &self.is_static)
            .finish()
    }
}

pub struct ExternalType {
    pub name: String,
    /// Only exported types can be resolved by name
    pub exported: bool,
    constructor: Constructor,
    methods: Vec<Rc<ExternalMethod>>,
}

impl ExternalType {
    pub fn new(name: impl Into<String>) -> Self {
        ExternalType {
            name: name.into(),
            exported: true,
            constructor: Rc::new(|| Box::new(())),
            methods: Vec::new(),
        }
    }

    pub fn private(mut self) -> Self {
        self.exported = false;
        self
    }

    pub fn with_constructor<T: Any>(mut self, make: impl Fn() -> T + 'static) -> Self {
        self.constructor = Rc::new(move || Box::new(make()));
        self
    }

    pub fn with_static(
        mut self,
        name: impl Into<String>,
        body: impl Fn(&mut CallContext<'_>) -> Result<(), Fault> + 'static,
    ) -> Self {
        self.methods.push(Rc::new(ExternalMethod {
            name: name.into(),
            is_static: true,
            body: Rc::new(body),
        }));
        self
    }

    pub fn with_method(
        mut self,
        name: impl Into<String>,
        body: impl Fn(&mut CallContext<'_>) -> Result<(), Fault> + 'static,
    ) -> Self {
        self.methods.push(Rc::new(ExternalMethod {
            name: name.into(),
            is_static: false,
            body: Rc::new(body),
        }));
        self
    }

    pub fn construct(&self) -> Box<dyn Any> {
        (self.constructor)()
    }

    /// Method names match exactly
    pub fn resolve_method(&self, name: &str) -> Option<Rc<ExternalMethod>> {
        self.methods.iter().find(|m| m.name == name).cloned()
    }
}

impl fmt::Debug for ExternalType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ExternalType")
            .field("name", &self.name)
            .field("exported", &self.exported)
            .field("methods", &self.methods)
            .finish()
    }
}

#[derive(Debug)]
pub struct ExternalModule {
    pub path: String,
    types: Vec<Rc<ExternalType>>,
}

impl ExternalModule {
    pub fn new(path: impl Into<String>) -> Self {
        ExternalModule {
            path: path.into(),
            types: Vec::new(),
        }
    }

    pub fn with_type(mut self, ty: ExternalType) -> Self {
        self.types.push(Rc::new(ty));
        self
    }

    /// Case-insensitive lookup among exported types
    pub fn resolve_type(&self, name: &str) -> Option<Rc<ExternalType>> {
        self.types
            .iter()
            .find(|t| t.exported && t.name.eq_ignore_ascii_case(name))
            .cloned()
    }
}

/// Source of external modules for the bridge routine
pub trait ModuleLoader {
    fn load(&self, path: &str) -> Option<Rc<ExternalModule>>;
}

/// Modules registered in memory, keyed by path
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Rc<ExternalModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: ExternalModule) {
        self.modules.insert(module.path.clone(), Rc::new(module));
    }

    pub fn with(mut self, module: ExternalModule) -> Self {
        self.register(module);
        self
    }
}

impl ModuleLoader for ModuleRegistry {
    fn load(&self, path: &str) -> Option<Rc<ExternalModule>> {
        self.modules.get(path).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_console_round_trip() {
        let mut console = BufferConsole::with_input("ab");
        console.write("x");
        console.write_line("y");
        assert_eq!(console.read_char(), 'a' as i32);
        assert_eq!(console.read_char(), 'b' as i32);
        assert_eq!(console.read_char(), -1);
        assert_eq!(console.output(), "xy\n");
    }

    #[test]
    fn test_type_lookup_is_case_insensitive_and_exported_only() {
        let module = ExternalModule::new("tools.dll")
            .with_type(ExternalType::new("Greeter"))
            .with_type(ExternalType::new("Hidden").private());

        assert!(module.resolve_type("GREETER").is_some());
        assert!(module.resolve_type("hidden").is_none());
    }

    #[test]
    fn test_method_lookup_is_exact() {
        let ty = ExternalType::new("T").with_static("Run", |_| Ok(()));
        assert!(ty.resolve_method("Run").is_some());
        assert!(ty.resolve_method("RUN").is_none());
    }

    #[test]
    fn test_context_push_pop() {
        let mut console = BufferConsole::new();
        let mut data = vec![0; 4];
        let mut index = 0;
        let mut ctx = CallContext::new(&mut console, &mut data, &mut index, None);

        ctx.push(9).unwrap();
        assert_eq!(ctx.pop(), Ok(9));
        assert!(matches!(ctx.pop(), Err(Fault::StackRange { index: -1, .. })));
        assert!(ctx.instance::<u32>().is_none());
    }
}
