use forthgen::lexer::{Lexer, LexerError, Token};
use forthgen::parser::{ParseError, Parser};
use forthgen::program::{Constant, ExternalWord, GlobalVariable, LocalVariable, Word};
use forthgen::{parse_source, Error};

#[test]
fn test_full_program() {
    let source = r#"
        \ counters and greetings
        VARIABLE COUNT-CELL
        VARIABLE TABLE 15 ALLOT
        3 CONSTANT STEP
        "Hello" CONSTANT GREETING
        EXTERN BEEP "sound.dll" "Speaker" "Beep"

        : bump ( -- ) step count-cell +! ;
        : main LOCAL tmp
            bump count-cell @ tmp !
            ."Count: " tmp ? cr
            beep ;
    "#;
    let program = parse_source(source).unwrap();

    assert_eq!(
        program.globals,
        vec![
            GlobalVariable::new("COUNT-CELL", 1),
            GlobalVariable::new("TABLE", 16),
        ]
    );
    assert_eq!(
        program.constants,
        vec![Constant::int("STEP", 3), Constant::text("GREETING", "Hello")]
    );
    assert_eq!(
        program.externals,
        vec![ExternalWord::new("BEEP", "sound.dll", "Speaker", "Beep")]
    );
    assert_eq!(program.locals, vec![LocalVariable::new("TMP", "MAIN")]);
    assert_eq!(
        program.words,
        vec![
            Word::new("BUMP", ["STEP", "COUNT-CELL", "+!"]),
            Word::new(
                "MAIN",
                [
                    "BUMP",
                    "COUNT-CELL",
                    "@",
                    "TMP",
                    "!",
                    ".\"Count: \"",
                    "TMP",
                    "?",
                    "CR",
                    "BEEP",
                ]
            ),
        ]
    );
}

#[test]
fn test_negative_constant() {
    let program = parse_source("-5 CONSTANT LOW").unwrap();
    assert_eq!(program.constants, vec![Constant::int("LOW", -5)]);
}

#[test]
fn test_hex_literal_becomes_decimal_atom() {
    let program = parse_source(": W 0x10 ;").unwrap();
    assert_eq!(program.words[0].body, vec!["16"]);
}

#[test]
fn test_extern_needs_three_strings() {
    let err = parse_source(r#"EXTERN BEEP "sound.dll" Speaker "Beep""#).unwrap_err();
    assert!(matches!(
        err,
        Error::Parse(ParseError::UnexpectedToken {
            expected: "type name",
            ..
        })
    ));
}

#[test]
fn test_missing_name_after_variable() {
    let err = parse_source("VARIABLE").unwrap_err();
    assert!(matches!(err, Error::Parse(ParseError::UnexpectedEof(_))));
}

#[test]
fn test_lexer_errors_surface() {
    let err = parse_source(r#": W ."unterminated ;"#).unwrap_err();
    assert!(matches!(err, Error::Lexer(LexerError::UnterminatedString)));
}

#[test]
fn test_parse_error_messages() {
    let tokens = Lexer::new("1 2").tokenize().unwrap();
    let err = Parser::new(tokens).parse().unwrap_err();
    assert_eq!(err, ParseError::StrayToken(Token::Number(1)));
    assert_eq!(err.to_string(), "1 outside of a definition");

    let tokens = Lexer::new(": W").tokenize().unwrap();
    let err = Parser::new(tokens).parse().unwrap_err();
    assert_eq!(err.to_string(), "Definition of W is never terminated with ';'");
}
