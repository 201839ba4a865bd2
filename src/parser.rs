// parser.rs - Forth Parser (Tokens → Program)

use crate::lexer::Token;
use crate::program::{Constant, ExternalWord, GlobalVariable, LocalVariable, Program, Word};
use thiserror::Error;

// ============================================================================
// PARSER
// ============================================================================

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Unexpected end of input while reading {0}")]
    UnexpectedEof(&'static str),

    #[error("Expected {expected}, found {found}")]
    UnexpectedToken { expected: &'static str, found: Token },

    #[error("Missing word name after ':'")]
    MissingWordName,

    #[error("Definition of {0} is never terminated with ';'")]
    UnterminatedDefinition(String),

    #[error("':' inside the definition of {0}")]
    NestedDefinition(String),

    #[error("{keyword} is not allowed inside the definition of {word}")]
    DeclarationInDefinition { keyword: Token, word: String },

    #[error("{0} outside of a definition")]
    StrayToken(Token),
}

/// Result of parsing interactive input: declarations plus the loose atoms
/// that appeared outside any definition, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub program: Program,
    pub immediate: Vec<String>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    /// Parse a whole source file. Every top-level token must belong to a
    /// definition or declaration.
    pub fn parse(&mut self) -> Result<Program, ParseError> {
        let mut program = Program::new();
        while !self.is_at_end() {
            if let Some(stray) = self.parse_top_level(&mut program)? {
                return Err(ParseError::StrayToken(stray));
            }
        }
        Ok(program)
    }

    /// Parse REPL input, collecting loose tokens instead of rejecting them
    pub fn parse_session(&mut self) -> Result<Session, ParseError> {
        let mut session = Session::default();
        while !self.is_at_end() {
            if let Some(loose) = self.parse_top_level(&mut session.program)? {
                session.immediate.push(atom_text(&loose));
            }
        }
        Ok(session)
    }

    /// Consumes one definition or declaration into `program`, or hands
    /// back a token that starts neither.
    fn parse_top_level(&mut self, program: &mut Program) -> Result<Option<Token>, ParseError> {
        let token = self.next("a definition")?;

        match token {
            Token::Colon => self.parse_word_definition(program)?,
            Token::Variable => {
                let global = self.parse_variable()?;
                program.globals.push(global);
            }
            Token::Extern => {
                let external = self.parse_extern()?;
                program.externals.push(external);
            }
            Token::Number(n) if self.check(&Token::Constant) => {
                self.advance();
                let name = self.expect_name("constant name")?;
                program.constants.push(Constant::int(name, n));
            }
            Token::Text(ref text) if self.check(&Token::Constant) => {
                self.advance();
                let name = self.expect_name("constant name")?;
                program.constants.push(Constant::text(name, text.clone()));
            }
            other => return Ok(Some(other)),
        }

        Ok(None)
    }

    /// VARIABLE NAME [n ALLOT]
    fn parse_variable(&mut self) -> Result<GlobalVariable, ParseError> {
        let name = self.expect_name("variable name")?;

        let mut size = 1;
        if let (Some(Token::Number(n)), Some(Token::Allot)) = (self.peek(), self.peek_at(1)) {
            let extra = usize::try_from(*n).map_err(|_| ParseError::UnexpectedToken {
                expected: "a non-negative cell count",
                found: Token::Number(*n),
            })?;
            size += extra;
            self.advance();
            self.advance();
        }

        Ok(GlobalVariable::new(name, size))
    }

    /// EXTERN NAME "module" "type" "method"
    fn parse_extern(&mut self) -> Result<ExternalWord, ParseError> {
        let name = self.expect_name("external word name")?;
        let module = self.expect_text("module path")?;
        let type_name = self.expect_text("type name")?;
        let method = self.expect_text("method name")?;
        Ok(ExternalWord::new(name, module, type_name, method))
    }

    /// : NAME body ;
    fn parse_word_definition(&mut self, program: &mut Program) -> Result<(), ParseError> {
        let name = match self.peek() {
            Some(Token::Word(w)) => {
                let n = w.clone();
                self.advance();
                n
            }
            Some(token) => {
                return Err(ParseError::UnexpectedToken {
                    expected: "word name",
                    found: token.clone(),
                });
            }
            None => return Err(ParseError::MissingWordName),
        };

        let mut body = Vec::new();
        loop {
            let token = self
                .next("a definition body")
                .map_err(|_| ParseError::UnterminatedDefinition(name.clone()))?;

            match token {
                Token::Semicolon => break,
                Token::Colon => return Err(ParseError::NestedDefinition(name)),
                Token::Local => {
                    let local = self.expect_name("local name")?;
                    program.locals.push(LocalVariable::new(local, name.clone()));
                }
                keyword @ (Token::Variable | Token::Allot | Token::Constant | Token::Extern) => {
                    return Err(ParseError::DeclarationInDefinition {
                        keyword,
                        word: name,
                    });
                }
                other => body.push(atom_text(&other)),
            }
        }

        program.words.push(Word::new(name, body));
        Ok(())
    }

    // ========================================================================
    // TOKEN HELPERS
    // ========================================================================

    fn expect_name(&mut self, expected: &'static str) -> Result<String, ParseError> {
        match self.next(expected)? {
            Token::Word(w) => Ok(w),
            found => Err(ParseError::UnexpectedToken { expected, found }),
        }
    }

    fn expect_text(&mut self, expected: &'static str) -> Result<String, ParseError> {
        match self.next(expected)? {
            Token::Text(s) => Ok(s),
            found => Err(ParseError::UnexpectedToken { expected, found }),
        }
    }

    fn next(&mut self, reading: &'static str) -> Result<Token, ParseError> {
        let token = self
            .peek()
            .cloned()
            .ok_or(ParseError::UnexpectedEof(reading))?;
        self.advance();
        Ok(token)
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset)
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }
}

/// The body atom a token stands for. Literal strings keep their quotes so
/// the code generator can tell them apart from names.
fn atom_text(token: &Token) -> String {
    match token {
        Token::Word(w) => w.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> Result<Program, ParseError> {
        let tokens = Lexer::new(source).tokenize().unwrap();
        Parser::new(tokens).parse()
    }

    #[test]
    fn test_word_definition() {
        let program = parse(": square dup * ;").unwrap();
        assert_eq!(program.words, vec![Word::new("SQUARE", ["DUP", "*"])]);
    }

    #[test]
    fn test_literals_keep_quotes() {
        let program = parse(r#": greet ."Hi there" PAD "abc" 7 ;"#).unwrap();
        assert_eq!(
            program.words[0].body,
            vec![".\"Hi there\"", "PAD", "\"abc\"", "7"]
        );
    }

    #[test]
    fn test_declarations() {
        let program = parse(
            r#"VARIABLE X  VARIABLE BUF 9 ALLOT
               10 CONSTANT TEN  "hello" CONSTANT GREETING
               EXTERN BEEP "sound.dll" "Speaker" "Beep""#,
        )
        .unwrap();

        assert_eq!(
            program.globals,
            vec![GlobalVariable::new("X", 1), GlobalVariable::new("BUF", 10)]
        );
        assert_eq!(
            program.constants,
            vec![Constant::int("TEN", 10), Constant::text("GREETING", "hello")]
        );
        assert_eq!(
            program.externals,
            vec![ExternalWord::new("BEEP", "sound.dll", "Speaker", "Beep")]
        );
    }

    #[test]
    fn test_locals_belong_to_their_word() {
        let program = parse(": W LOCAL A LOCAL B A ! ;").unwrap();
        assert_eq!(
            program.locals,
            vec![LocalVariable::new("A", "W"), LocalVariable::new("B", "W")]
        );
        assert_eq!(program.words[0].body, vec!["A", "!"]);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            parse(": W 1 2"),
            Err(ParseError::UnterminatedDefinition("W".to_string()))
        );
        assert_eq!(parse(":"), Err(ParseError::MissingWordName));
        assert_eq!(
            parse(": A : B ; ;"),
            Err(ParseError::NestedDefinition("A".to_string()))
        );
        assert_eq!(
            parse("1 2 +"),
            Err(ParseError::StrayToken(Token::Number(1)))
        );
        assert!(matches!(
            parse(": W VARIABLE X ;"),
            Err(ParseError::DeclarationInDefinition { .. })
        ));
    }

    #[test]
    fn test_session_collects_loose_atoms() {
        let tokens = Lexer::new(r#": SQ DUP * ; 3 SQ ."done""#).tokenize().unwrap();
        let session = Parser::new(tokens).parse_session().unwrap();
        assert_eq!(session.program.words.len(), 1);
        assert_eq!(session.immediate, vec!["3", "SQ", ".\"done\""]);
    }
}
