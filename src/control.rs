// control.rs - Control-flow resolver: one frame stack per construct family

use crate::builtins;
use crate::bytecode::{Instruction, StackId};
use crate::emitter::{Label, Mark, ProcedureBuilder};
use crate::error::CompileError;

/// Structural keywords handled here rather than by the built-in catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlWord {
    If,
    Else,
    Then,
    Begin,
    Until,
    Again,
    While,
    Repeat,
    Case,
    Of,
    EndOf,
    EndCase,
    Do,
    Leave,
    Loop,
    PlusLoop,
}

impl ControlWord {
    pub fn name(&self) -> &'static str {
        match self {
            ControlWord::If => "IF",
            ControlWord::Else => "ELSE",
            ControlWord::Then => "THEN",
            ControlWord::Begin => "BEGIN",
            ControlWord::Until => "UNTIL",
            ControlWord::Again => "AGAIN",
            ControlWord::While => "WHILE",
            ControlWord::Repeat => "REPEAT",
            ControlWord::Case => "CASE",
            ControlWord::Of => "OF",
            ControlWord::EndOf => "ENDOF",
            ControlWord::EndCase => "ENDCASE",
            ControlWord::Do => "DO",
            ControlWord::Leave => "LEAVE",
            ControlWord::Loop => "LOOP",
            ControlWord::PlusLoop => "+LOOP",
        }
    }

    pub fn all() -> &'static [ControlWord] {
        &[
            ControlWord::If,
            ControlWord::Else,
            ControlWord::Then,
            ControlWord::Begin,
            ControlWord::Until,
            ControlWord::Again,
            ControlWord::While,
            ControlWord::Repeat,
            ControlWord::Case,
            ControlWord::Of,
            ControlWord::EndOf,
            ControlWord::EndCase,
            ControlWord::Do,
            ControlWord::Leave,
            ControlWord::Loop,
            ControlWord::PlusLoop,
        ]
    }

    pub fn from_name(name: &str) -> Option<ControlWord> {
        Self::all().iter().copied().find(|w| w.name() == name)
    }
}

// ============================================================================
// FRAMES
// ============================================================================

#[derive(Debug)]
struct IfFrame {
    /// Taken by ELSE; still present means no ELSE was seen
    else_target: Option<Label>,
    end: Label,
}

#[derive(Debug)]
struct LoopFrame {
    begin: Mark,
    end: Label,
    /// WHILE branched to `end`, so only REPEAT can close the loop
    while_seen: bool,
}

#[derive(Debug)]
enum CaseFrame {
    EndCase(Label),
    EndOf(Label),
}

#[derive(Debug)]
struct DoFrame {
    do_target: Mark,
    loop_target: Label,
}

/// Pending frames of the word currently being compiled
#[derive(Debug)]
pub struct ControlFlow {
    word: String,
    ifs: Vec<IfFrame>,
    loops: Vec<LoopFrame>,
    cases: Vec<CaseFrame>,
    dos: Vec<DoFrame>,
}

impl ControlFlow {
    pub fn new(word: impl Into<String>) -> Self {
        ControlFlow {
            word: word.into(),
            ifs: Vec::new(),
            loops: Vec::new(),
            cases: Vec::new(),
            dos: Vec::new(),
        }
    }

    fn nesting(&self, keyword: ControlWord, opener: &'static str) -> CompileError {
        CompileError::MalformedNesting {
            keyword: keyword.name().to_string(),
            opener,
            word: self.word.clone(),
        }
    }

    pub fn compile(&mut self, word: ControlWord, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        match word {
            ControlWord::If => self.compile_if(b),
            ControlWord::Else => self.compile_else(b),
            ControlWord::Then => self.compile_then(b),
            ControlWord::Begin => self.compile_begin(b),
            ControlWord::Until => self.compile_until(b),
            ControlWord::Again => self.compile_again(b),
            ControlWord::While => self.compile_while(b),
            ControlWord::Repeat => self.compile_repeat(b),
            ControlWord::Case => self.compile_case(b),
            ControlWord::Of => self.compile_of(b),
            ControlWord::EndOf => self.compile_endof(b),
            ControlWord::EndCase => self.compile_endcase(b),
            ControlWord::Do => self.compile_do(b),
            ControlWord::Leave => self.compile_leave(b),
            ControlWord::Loop => self.compile_loop(b, false),
            ControlWord::PlusLoop => self.compile_loop(b, true),
        }
    }

    /// Every construct opened in the word must be closed by its end
    pub fn finish(self) -> Result<(), CompileError> {
        let opener = if !self.ifs.is_empty() {
            "IF"
        } else if !self.loops.is_empty() {
            "BEGIN"
        } else if !self.cases.is_empty() {
            "CASE"
        } else if !self.dos.is_empty() {
            "DO"
        } else {
            return Ok(());
        };
        Err(CompileError::UnclosedConstruct {
            opener,
            word: self.word,
        })
    }

    // ========================================================================
    // IF / ELSE / THEN
    // ========================================================================

    fn compile_if(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        let else_target = b.define_label();
        let end = b.define_label();
        b.pop_cell(StackId::Data);
        b.branch(Instruction::JumpIfFalse, &else_target);
        self.ifs.push(IfFrame {
            else_target: Some(else_target),
            end,
        });
        Ok(())
    }

    fn compile_else(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        let else_target = self
            .ifs
            .last_mut()
            .and_then(|frame| frame.else_target.take())
            .ok_or_else(|| self.nesting(ControlWord::Else, "IF"))?;
        if let Some(frame) = self.ifs.last() {
            b.branch(Instruction::Jump, &frame.end);
        }
        b.mark(else_target);
        Ok(())
    }

    fn compile_then(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        let frame = self
            .ifs
            .pop()
            .ok_or_else(|| self.nesting(ControlWord::Then, "IF"))?;
        match frame.else_target {
            Some(else_target) => b.mark(else_target),
            None => b.mark(frame.end),
        };
        Ok(())
    }

    // ========================================================================
    // BEGIN / UNTIL / AGAIN / WHILE / REPEAT
    // ========================================================================

    fn compile_begin(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        let begin = b.mark_here();
        let end = b.define_label();
        self.loops.push(LoopFrame {
            begin,
            end,
            while_seen: false,
        });
        Ok(())
    }

    fn compile_until(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        let frame = self
            .loops
            .pop()
            .ok_or_else(|| self.nesting(ControlWord::Until, "BEGIN"))?;
        if frame.while_seen {
            return Err(self.nesting(ControlWord::Until, "REPEAT"));
        }
        b.pop_cell(StackId::Data);
        b.branch_back(Instruction::JumpIfFalse, frame.begin);
        Ok(())
    }

    fn compile_again(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        let frame = self
            .loops
            .pop()
            .ok_or_else(|| self.nesting(ControlWord::Again, "BEGIN"))?;
        if frame.while_seen {
            return Err(self.nesting(ControlWord::Again, "REPEAT"));
        }
        b.branch_back(Instruction::Jump, frame.begin);
        Ok(())
    }

    fn compile_while(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        let word = self.word.clone();
        let frame = self.loops.last_mut().ok_or(CompileError::MalformedNesting {
            keyword: ControlWord::While.name().to_string(),
            opener: "BEGIN",
            word,
        })?;
        frame.while_seen = true;
        b.pop_cell(StackId::Data);
        b.branch(Instruction::JumpIfFalse, &frame.end);
        Ok(())
    }

    fn compile_repeat(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        let frame = self
            .loops
            .pop()
            .ok_or_else(|| self.nesting(ControlWord::Repeat, "BEGIN"))?;
        b.branch_back(Instruction::Jump, frame.begin);
        b.mark(frame.end);
        Ok(())
    }

    // ========================================================================
    // CASE / OF / ENDOF / ENDCASE
    // ========================================================================

    fn compile_case(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        let end_case = b.define_label();
        self.cases.push(CaseFrame::EndCase(end_case));
        Ok(())
    }

    fn compile_of(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        if !matches!(self.cases.last(), Some(CaseFrame::EndCase(_))) {
            return Err(self.nesting(ControlWord::Of, "CASE"));
        }
        let end_of = b.define_label();
        // selector stays, test value is consumed
        b.load_at(StackId::Data, 2);
        b.pop_cell(StackId::Data);
        b.branch(Instruction::JumpIfNotEqual, &end_of);
        self.cases.push(CaseFrame::EndOf(end_of));
        Ok(())
    }

    fn compile_endof(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        let end_of = match self.cases.pop() {
            Some(CaseFrame::EndOf(label)) => label,
            Some(other) => {
                self.cases.push(other);
                return Err(self.nesting(ControlWord::EndOf, "OF"));
            }
            None => return Err(self.nesting(ControlWord::EndOf, "OF")),
        };
        match self.cases.last() {
            Some(CaseFrame::EndCase(end_case)) => b.branch(Instruction::Jump, end_case),
            _ => return Err(self.nesting(ControlWord::EndOf, "CASE")),
        }
        b.mark(end_of);
        Ok(())
    }

    fn compile_endcase(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        let end_case = match self.cases.pop() {
            Some(CaseFrame::EndCase(label)) => label,
            Some(other) => {
                self.cases.push(other);
                return Err(self.nesting(ControlWord::EndCase, "CASE"));
            }
            None => return Err(self.nesting(ControlWord::EndCase, "CASE")),
        };
        b.mark(end_case);
        builtins::drop(b);
        Ok(())
    }

    // ========================================================================
    // DO / LEAVE / LOOP / +LOOP
    // ========================================================================

    fn compile_do(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        // ( limit start -- ) R: ( -- limit index )
        builtins::swap(b);
        builtins::to_r(b);
        builtins::to_r(b);
        let do_target = b.mark_here();
        let loop_target = b.define_label();
        self.dos.push(DoFrame {
            do_target,
            loop_target,
        });
        Ok(())
    }

    fn compile_leave(&mut self, b: &mut ProcedureBuilder) -> Result<(), CompileError> {
        let frame = self
            .dos
            .last()
            .ok_or_else(|| self.nesting(ControlWord::Leave, "DO"))?;
        b.branch(Instruction::Jump, &frame.loop_target);
        Ok(())
    }

    fn compile_loop(&mut self, b: &mut ProcedureBuilder, by_step: bool) -> Result<(), CompileError> {
        let keyword = if by_step {
            ControlWord::PlusLoop
        } else {
            ControlWord::Loop
        };
        let frame = self.dos.pop().ok_or_else(|| self.nesting(keyword, "DO"))?;

        b.store_at(StackId::Return, 1, |b| {
            b.load_at(StackId::Return, 1);
            if by_step {
                b.pop_cell(StackId::Data);
            } else {
                b.emit(Instruction::PushInt(1));
            }
            b.emit(Instruction::Add);
        });
        b.load_at(StackId::Return, 1);
        b.load_at(StackId::Return, 2);
        b.branch_back(Instruction::JumpIfLess, frame.do_target);

        // LEAVE lands here too, so the loop cells are dropped on every exit
        b.mark(frame.loop_target);
        b.bump(StackId::Return, -2);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_all(words: &[ControlWord]) -> Result<(), CompileError> {
        let mut b = ProcedureBuilder::new("T", 0);
        let mut flow = ControlFlow::new("T");
        for word in words {
            flow.compile(*word, &mut b)?;
        }
        flow.finish()?;
        b.emit(Instruction::Return);
        b.finish().map(|_| ())
    }

    #[test]
    fn test_keyword_names_round_trip() {
        for word in ControlWord::all() {
            assert_eq!(ControlWord::from_name(word.name()), Some(*word));
        }
        assert_eq!(ControlWord::from_name("if"), None);
    }

    #[test]
    fn test_balanced_constructs() {
        use ControlWord::*;
        assert!(compile_all(&[If, Else, Then]).is_ok());
        assert!(compile_all(&[Begin, While, Repeat]).is_ok());
        assert!(compile_all(&[Case, Of, EndOf, Of, EndOf, EndCase]).is_ok());
        assert!(compile_all(&[Do, Leave, If, Leave, Then, Loop]).is_ok());
    }

    #[test]
    fn test_lone_else_fails() {
        assert!(matches!(
            compile_all(&[ControlWord::Else]),
            Err(CompileError::MalformedNesting { ref keyword, .. }) if keyword == "ELSE"
        ));
    }

    #[test]
    fn test_second_else_fails() {
        use ControlWord::*;
        assert!(compile_all(&[If, Else, Else, Then]).is_err());
    }

    #[test]
    fn test_unclosed_frame_fails() {
        assert_eq!(
            compile_all(&[ControlWord::Do]),
            Err(CompileError::UnclosedConstruct {
                opener: "DO",
                word: "T".to_string()
            })
        );
    }

    #[test]
    fn test_endof_needs_of() {
        use ControlWord::*;
        assert!(compile_all(&[Case, EndOf, EndCase]).is_err());
    }

    fn nesting_error(words: &[ControlWord]) -> Option<(String, &'static str)> {
        match compile_all(words) {
            Err(CompileError::MalformedNesting {
                keyword, opener, ..
            }) => Some((keyword, opener)),
            _ => None,
        }
    }

    #[test]
    fn test_begin_family_needs_begin() {
        use ControlWord::*;
        for word in [Until, Again, While, Repeat] {
            assert_eq!(
                nesting_error(&[word]),
                Some((word.name().to_string(), "BEGIN"))
            );
        }
    }

    #[test]
    fn test_do_family_needs_do() {
        use ControlWord::*;
        for word in [Loop, PlusLoop, Leave] {
            assert_eq!(nesting_error(&[word]), Some((word.name().to_string(), "DO")));
        }
    }

    #[test]
    fn test_lone_then_fails() {
        assert_eq!(
            nesting_error(&[ControlWord::Then]),
            Some(("THEN".to_string(), "IF"))
        );
    }

    #[test]
    fn test_case_family_nesting() {
        use ControlWord::*;
        assert_eq!(nesting_error(&[Of]), Some(("OF".to_string(), "CASE")));
        assert_eq!(nesting_error(&[EndCase]), Some(("ENDCASE".to_string(), "CASE")));
        // OF still open when ENDCASE arrives
        assert_eq!(
            nesting_error(&[Case, Of, EndCase]),
            Some(("ENDCASE".to_string(), "CASE"))
        );
    }

    #[test]
    fn test_while_loop_must_close_with_repeat() {
        use ControlWord::*;
        assert_eq!(
            nesting_error(&[Begin, While, Until]),
            Some(("UNTIL".to_string(), "REPEAT"))
        );
        assert_eq!(
            nesting_error(&[Begin, While, Again]),
            Some(("AGAIN".to_string(), "REPEAT"))
        );
    }
}
