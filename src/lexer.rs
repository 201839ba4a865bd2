// lexer.rs - Forth source tokenizer

use std::fmt;
use thiserror::Error;

// ============================================================================
// TOKEN TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Definitions
    Colon,     // :
    Semicolon, // ;

    // Declarations
    Variable, // VARIABLE
    Allot,    // ALLOT
    Constant, // CONSTANT
    Local,    // LOCAL
    Extern,   // EXTERN

    // Literals
    Number(i32),       // 42, -17, 0xFF
    Text(String),      // "hello world"
    DotQuote(String),  // ."hello world"

    // Everything else, upper-cased: DUP, IF, MYWORD, etc.
    Word(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Token::Colon => write!(f, ":"),
            Token::Semicolon => write!(f, ";"),
            Token::Variable => write!(f, "VARIABLE"),
            Token::Allot => write!(f, "ALLOT"),
            Token::Constant => write!(f, "CONSTANT"),
            Token::Local => write!(f, "LOCAL"),
            Token::Extern => write!(f, "EXTERN"),
            Token::Number(n) => write!(f, "{}", n),
            Token::Text(s) => write!(f, "\"{}\"", s),
            Token::DotQuote(s) => write!(f, ".\"{}\"", s),
            Token::Word(w) => write!(f, "{}", w),
        }
    }
}

// ============================================================================
// LEXER
// ============================================================================

pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexerError> {
        let mut tokens = Vec::new();

        while !self.is_at_end() {
            self.skip_whitespace();

            if self.is_at_end() {
                break;
            }

            if self.peek() == Some('(') {
                self.skip_paren_comment()?;
                continue;
            }

            if self.peek() == Some('\\') {
                self.skip_line_comment();
                continue;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, LexerError> {
        let ch = self.peek().ok_or(LexerError::UnexpectedEof)?;

        match ch {
            ':' => {
                self.advance();
                Ok(Token::Colon)
            }
            ';' => {
                self.advance();
                Ok(Token::Semicolon)
            }
            '"' => {
                self.advance();
                self.parse_string().map(Token::Text)
            }
            '.' if self.peek_at(1) == Some('"') => {
                self.advance();
                self.advance();
                self.parse_string().map(Token::DotQuote)
            }
            '-' | '0'..='9' => self.parse_number(),
            _ => self.parse_word(),
        }
    }

    fn parse_word(&mut self) -> Result<Token, LexerError> {
        let start = self.position;

        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || ch == ':' || ch == ';' || ch == '(' || ch == '"' {
                break;
            }
            self.advance();
        }

        let word: String = self.input[start..self.position].iter().collect();

        if word.is_empty() {
            return Err(LexerError::EmptyWord(self.position));
        }

        let upper_word = word.to_uppercase();
        let token = match upper_word.as_str() {
            "VARIABLE" => Token::Variable,
            "ALLOT" => Token::Allot,
            "CONSTANT" => Token::Constant,
            "LOCAL" => Token::Local,
            "EXTERN" => Token::Extern,
            _ => Token::Word(upper_word),
        };

        Ok(token)
    }

    /// Decimal or `0x` hex. Anything that merely starts like a number
    /// (`1+`, `-`, `2DUP`) is lexed as a word instead.
    fn parse_number(&mut self) -> Result<Token, LexerError> {
        let start = self.position;

        if self.peek() == Some('-') {
            self.advance();
        }
        let digits_start = self.position;

        let hex = self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X'));
        if hex {
            self.advance();
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || ch == ':' || ch == ';' || ch == '(' {
                break;
            }
            let is_digit = if hex {
                ch.is_ascii_hexdigit()
            } else {
                ch.is_ascii_digit()
            };
            if !is_digit {
                self.position = start;
                return self.parse_word();
            }
            self.advance();
        }

        let prefix = if hex { 2 } else { 0 };
        if self.position == digits_start + prefix {
            self.position = start;
            return self.parse_word();
        }

        let text: String = self.input[start..self.position].iter().collect();
        let digits: String = self.input[digits_start + prefix..self.position].iter().collect();
        let magnitude = if hex {
            i64::from_str_radix(&digits, 16)
        } else {
            digits.parse::<i64>()
        }
        .map_err(|_| LexerError::InvalidNumber(text.clone()))?;

        let value = if digits_start > start {
            -magnitude
        } else {
            magnitude
        };
        i32::try_from(value)
            .map(Token::Number)
            .map_err(|_| LexerError::InvalidNumber(text))
    }

    /// Reads up to the closing quote, which is consumed
    fn parse_string(&mut self) -> Result<String, LexerError> {
        let start = self.position;

        while let Some(ch) = self.peek() {
            if ch == '"' {
                let s: String = self.input[start..self.position].iter().collect();
                self.advance();
                return Ok(s);
            }
            self.advance();
        }

        Err(LexerError::UnterminatedString)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_paren_comment(&mut self) -> Result<(), LexerError> {
        self.advance(); // consume (

        let mut depth = 1;
        while depth > 0 {
            match self.peek() {
                Some('(') => depth += 1,
                Some(')') => depth -= 1,
                Some(_) => {}
                None => return Err(LexerError::UnterminatedComment),
            }
            self.advance();
        }

        Ok(())
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    fn peek(&self) -> Option<char> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        if self.position < self.input.len() {
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexerError {
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Number {0} does not fit in a cell")]
    InvalidNumber(String),
    #[error("Unterminated string literal")]
    UnterminatedString,
    #[error("Unterminated comment")]
    UnterminatedComment,
    #[error("Empty word at offset {0}")]
    EmptyWord(usize),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        Lexer::new(source).tokenize().unwrap()
    }

    #[test]
    fn test_simple_tokens() {
        assert_eq!(lex(": ;"), vec![Token::Colon, Token::Semicolon]);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            lex("42 -17 0 0x1F"),
            vec![
                Token::Number(42),
                Token::Number(-17),
                Token::Number(0),
                Token::Number(31),
            ]
        );
    }

    #[test]
    fn test_number_like_words() {
        assert_eq!(
            lex("1+ - 2+ 0<"),
            vec![
                Token::Word("1+".to_string()),
                Token::Word("-".to_string()),
                Token::Word("2+".to_string()),
                Token::Word("0<".to_string()),
            ]
        );
    }

    #[test]
    fn test_number_out_of_range() {
        assert_eq!(
            Lexer::new("99999999999").tokenize(),
            Err(LexerError::InvalidNumber("99999999999".to_string()))
        );
    }

    #[test]
    fn test_words_are_upper_cased() {
        assert_eq!(
            lex("dup Swap myWord"),
            vec![
                Token::Word("DUP".to_string()),
                Token::Word("SWAP".to_string()),
                Token::Word("MYWORD".to_string()),
            ]
        );
    }

    #[test]
    fn test_declaration_keywords() {
        assert_eq!(
            lex("variable allot constant local extern"),
            vec![
                Token::Variable,
                Token::Allot,
                Token::Constant,
                Token::Local,
                Token::Extern,
            ]
        );
    }

    #[test]
    fn test_strings_keep_case_and_spaces() {
        assert_eq!(
            lex(r#"."Hello, World" "a b" ."#),
            vec![
                Token::DotQuote("Hello, World".to_string()),
                Token::Text("a b".to_string()),
                Token::Word(".".to_string()),
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        assert_eq!(
            Lexer::new(r#"."oops"#).tokenize(),
            Err(LexerError::UnterminatedString)
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            lex("1 ( skip (nested) ) 2 \\ rest of line\n3"),
            vec![Token::Number(1), Token::Number(2), Token::Number(3)]
        );
        assert_eq!(
            Lexer::new("( open").tokenize(),
            Err(LexerError::UnterminatedComment)
        );
    }
}
