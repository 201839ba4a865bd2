use forthgen::builtins::TIB_UNREADABLE;
use forthgen::{compile_source, BufferConsole, CompilerConfig, Fault, Machine, RuntimeError};

/// Compile `: T body ;`, seed the stack, run T against `input`
fn exec(body: &str, seed: &[i32], input: &str) -> (Result<Vec<i32>, RuntimeError>, String) {
    let source = format!(": T {} ;", body);
    let module = compile_source(&source, &CompilerConfig::default()).unwrap();
    let mut machine = Machine::new(&module, BufferConsole::with_input(input));
    machine.boot().unwrap();
    for value in seed {
        machine.push(*value).unwrap();
    }
    let result = machine.invoke("T").map(|_| machine.data_stack().to_vec());
    (result, machine.console().output().to_string())
}

fn stack(body: &str, seed: &[i32]) -> Vec<i32> {
    exec(body, seed, "").0.unwrap()
}

fn output(body: &str, seed: &[i32]) -> String {
    exec(body, seed, "").1
}

// ============================================================================
// ARITHMETIC
// ============================================================================

#[test]
fn test_arithmetic() {
    assert_eq!(stack("+", &[2, 3]), vec![5]);
    assert_eq!(stack("-", &[2, 3]), vec![-1]);
    assert_eq!(stack("*", &[4, 3]), vec![12]);
    assert_eq!(stack("/", &[7, 2]), vec![3]);
    assert_eq!(stack("MOD", &[7, 2]), vec![1]);
    assert_eq!(stack("/", &[-7, 2]), vec![-3]);
    assert_eq!(stack("MOD", &[-7, 2]), vec![-1]);
}

#[test]
fn test_divmod_family() {
    assert_eq!(stack("/MOD", &[7, 2]), vec![1, 3]);
    assert_eq!(stack("*/", &[2, 3, 4]), vec![1]);
    assert_eq!(stack("*/MOD", &[5, 3, 4]), vec![3, 3]);
}

#[test]
fn test_unary_arithmetic() {
    assert_eq!(stack("MINUS", &[5]), vec![-5]);
    assert_eq!(stack("ABS", &[-9]), vec![9]);
    assert_eq!(stack("1+", &[1]), vec![2]);
    assert_eq!(stack("2+", &[1]), vec![3]);
    assert_eq!(stack("MIN", &[3, 8]), vec![3]);
    assert_eq!(stack("MAX", &[3, 8]), vec![8]);
}

#[test]
fn test_addition_wraps() {
    assert_eq!(stack("1 +", &[i32::MAX]), vec![i32::MIN]);
}

#[test]
fn test_division_by_zero_faults() {
    let (result, _) = exec("/", &[1, 0], "");
    assert!(matches!(
        result,
        Err(RuntimeError::Unhandled {
            fault: Fault::DivideByZero,
            ..
        })
    ));
}

#[test]
fn test_abs_of_minimum_overflows() {
    let (result, _) = exec("ABS", &[i32::MIN], "");
    assert!(matches!(
        result,
        Err(RuntimeError::Unhandled {
            fault: Fault::Overflow,
            ..
        })
    ));
}

// ============================================================================
// COMPARISON AND LOGIC
// ============================================================================

#[test]
fn test_comparisons() {
    assert_eq!(stack("=", &[4, 4]), vec![1]);
    assert_eq!(stack("<>", &[4, 4]), vec![0]);
    assert_eq!(stack("<", &[1, 2]), vec![1]);
    assert_eq!(stack(">", &[1, 2]), vec![0]);
    assert_eq!(stack("0=", &[0]), vec![1]);
    assert_eq!(stack("0=", &[3]), vec![0]);
}

#[test]
fn test_zero_less_includes_zero() {
    assert_eq!(stack("0<", &[-3]), vec![1]);
    assert_eq!(stack("0<", &[0]), vec![1]);
    assert_eq!(stack("0<", &[5]), vec![0]);
}

#[test]
fn test_bitwise() {
    assert_eq!(stack("~AND", &[0b1100, 0b1010]), vec![0b1000]);
    assert_eq!(stack("~OR", &[0b1100, 0b1010]), vec![0b1110]);
    assert_eq!(stack("~XOR", &[0b1100, 0b1010]), vec![0b0110]);
    assert_eq!(stack("~NOT", &[0]), vec![-1]);
}

#[test]
fn test_logical_treats_positive_as_true() {
    assert_eq!(stack("AND", &[3, 7]), vec![1]);
    assert_eq!(stack("AND", &[3, -1]), vec![0]);
    assert_eq!(stack("OR", &[-3, 0]), vec![0]);
    assert_eq!(stack("OR", &[0, 2]), vec![1]);
    assert_eq!(stack("NOT", &[0]), vec![1]);
    assert_eq!(stack("NOT", &[9]), vec![0]);
}

// ============================================================================
// STACK
// ============================================================================

#[test]
fn test_stack_shuffles() {
    assert_eq!(stack("DUP", &[42]), vec![42, 42]);
    assert_eq!(stack("DROP", &[1, 2]), vec![1]);
    assert_eq!(stack("SWAP", &[1, 2]), vec![2, 1]);
    assert_eq!(stack("OVER", &[1, 2]), vec![1, 2, 1]);
    assert_eq!(stack("ROT", &[1, 2, 3]), vec![2, 3, 1]);
}

#[test]
fn test_dash_dup() {
    assert_eq!(stack("-DUP", &[0]), vec![0]);
    assert_eq!(stack("-DUP", &[4]), vec![4, 4]);
}

#[test]
fn test_stack_pointers() {
    assert_eq!(stack("SP@", &[7]), vec![7, 1]);
    assert_eq!(stack("SP!", &[1, 2, 3]), Vec::<i32>::new());
    assert_eq!(stack("RP@", &[]), vec![0]);
    assert_eq!(stack("5 >R RP@ R> DROP", &[]), vec![1]);
    assert_eq!(stack("S0 R0", &[]), vec![0, 0]);
}

#[test]
fn test_rp_store_resets_return_stack() {
    assert_eq!(stack("1 >R 2 >R RP! RP@", &[9]), vec![9, 0]);
}

#[test]
fn test_return_stack_transfer() {
    assert_eq!(stack("5 >R 6 R>", &[]), vec![6, 5]);
}

#[test]
fn test_underflow_is_a_stack_fault() {
    let (result, _) = exec("DUP", &[], "");
    assert!(matches!(
        result,
        Err(RuntimeError::Unhandled {
            fault: Fault::StackRange { index: -1, .. },
            ..
        })
    ));
}

// ============================================================================
// MEMORY
// ============================================================================

#[test]
fn test_fetch_and_store() {
    assert_eq!(stack("PAD ! PAD @", &[77]), vec![77]);
    assert_eq!(stack("PAD ! 3 PAD +! PAD @", &[10]), vec![13]);
}

#[test]
fn test_question_prints_cell() {
    assert_eq!(output("PAD ! PAD ?", &[31]), "31");
}

#[test]
fn test_fill_erase_blanks() {
    assert_eq!(stack("PAD 3 9 FILL PAD 2+ @", &[]), vec![9]);
    assert_eq!(stack("PAD 3 BLANKS PAD 1+ @", &[]), vec![32]);
    assert_eq!(stack("PAD 3 9 FILL PAD 3 ERASE PAD @", &[]), vec![0]);
}

#[test]
fn test_cmove() {
    let body = r#"PAD "abc" PAD PAD 10 + 4 CMOVE PAD 10 + COUNT"#;
    assert_eq!(stack(body, &[]), vec![3]);
}

// ============================================================================
// CONSOLE
// ============================================================================

#[test]
fn test_output_words() {
    assert_eq!(output("65 EMIT", &[]), "A");
    assert_eq!(output(".", &[-12]), "-12");
    assert_eq!(output("CR", &[]), "\n");
    assert_eq!(output("SPACE 3 SPACES", &[]), "    ");
}

#[test]
fn test_type_prints_cells() {
    assert_eq!(output(r#"PAD "hello" PAD 4 TYPE"#, &[]), "hell");
}

#[test]
fn test_key() {
    assert_eq!(exec("KEY KEY", &[], "A").0.unwrap(), vec![65, -1]);
}

#[test]
fn test_expect_stops_at_newline() {
    let (result, _) = exec("PAD 10 EXPECT PAD COUNT", &[], "hey\nrest");
    assert_eq!(result.unwrap(), vec![3]);
}

#[test]
fn test_expect_honours_limit() {
    let (result, _) = exec("TIB 2 EXPECT TIB @ TIB 1+ @", &[], "xyz");
    assert_eq!(result.unwrap(), vec!['x' as i32, 'y' as i32]);
}

#[test]
fn test_expect_terminator_writes_zero_cell() {
    let (result, _) = exec("PAD 4 9 FILL PAD 3 EXPECT PAD 1+ @", &[], "x\n");
    assert_eq!(result.unwrap(), vec![0]);
}

#[test]
fn test_expect_at_limit_leaves_next_cell() {
    let (result, _) = exec("PAD 4 9 FILL PAD 2 EXPECT PAD 2+ @", &[], "xyz");
    assert_eq!(result.unwrap(), vec![9]);
}

#[test]
fn test_query_then_str2int() {
    let (result, _) = exec("QUERY STR2INT", &[], " 42\n");
    assert_eq!(result.unwrap(), vec![42]);
}

#[test]
fn test_str2int_reports_bad_input() {
    let (result, out) = exec("QUERY STR2INT 1", &[], "abc\n");
    assert_eq!(result.unwrap(), Vec::<i32>::new());
    assert_eq!(out, format!("{}\n", TIB_UNREADABLE));
}

#[test]
fn test_int2str_and_count() {
    assert_eq!(stack("PAD -123 INT2STR PAD COUNT", &[]), vec![4]);
    assert_eq!(stack("PAD 5 INT2STR PAD @", &[]), vec!['5' as i32]);
}

#[test]
fn test_well_known_addresses() {
    let pad = 4096 - 64;
    assert_eq!(stack("PAD TIB", &[]), vec![pad, pad - 80]);
}
