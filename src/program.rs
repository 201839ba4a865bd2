// program.rs - Input model handed to the code generator

/// A colon definition: `: NAME atoms... ;`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub name: String,
    /// Raw tokens, classified one by one during code generation
    pub body: Vec<String>,
}

impl Word {
    pub fn new<I, S>(name: impl Into<String>, body: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Word {
            name: name.into(),
            body: body.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstantValue {
    Int(i32),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
    pub name: String,
    pub value: ConstantValue,
}

impl Constant {
    pub fn int(name: impl Into<String>, value: i32) -> Self {
        Constant {
            name: name.into(),
            value: ConstantValue::Int(value),
        }
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Constant {
            name: name.into(),
            value: ConstantValue::Text(value.into()),
        }
    }
}

/// `VARIABLE NAME [n ALLOT]`, `size` cells wide
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVariable {
    pub name: String,
    pub size: usize,
}

impl GlobalVariable {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        GlobalVariable {
            name: name.into(),
            size,
        }
    }
}

/// A variable visible only inside `owning_word`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub name: String,
    pub owning_word: String,
}

impl LocalVariable {
    pub fn new(name: impl Into<String>, owning_word: impl Into<String>) -> Self {
        LocalVariable {
            name: name.into(),
            owning_word: owning_word.into(),
        }
    }
}

/// A word implemented by a method of a dynamically loaded module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalWord {
    pub name: String,
    pub module_path: String,
    pub type_name: String,
    pub method_name: String,
}

impl ExternalWord {
    pub fn new(
        name: impl Into<String>,
        module_path: impl Into<String>,
        type_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        ExternalWord {
            name: name.into(),
            module_path: module_path.into(),
            type_name: type_name.into(),
            method_name: method_name.into(),
        }
    }
}

/// Everything the parsing stage produces for one compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub words: Vec<Word>,
    pub constants: Vec<Constant>,
    pub globals: Vec<GlobalVariable>,
    pub locals: Vec<LocalVariable>,
    pub externals: Vec<ExternalWord>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn word<I, S>(mut self, name: &str, body: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.words.push(Word::new(name, body));
        self
    }

    pub fn constant(mut self, constant: Constant) -> Self {
        self.constants.push(constant);
        self
    }

    pub fn global(mut self, name: &str, size: usize) -> Self {
        self.globals.push(GlobalVariable::new(name, size));
        self
    }

    pub fn local(mut self, name: &str, owning_word: &str) -> Self {
        self.locals.push(LocalVariable::new(name, owning_word));
        self
    }

    pub fn external(mut self, name: &str, module: &str, type_name: &str, method: &str) -> Self {
        self.externals
            .push(ExternalWord::new(name, module, type_name, method));
        self
    }
}
