// main.rs - forthgen command line: run, dump and an interactive REPL

use clap::{ArgAction, Args, Parser, Subcommand};
use forthgen::lexer::Lexer;
use forthgen::parser::Parser as SourceParser;
use forthgen::{compile, compile_source, CompilerConfig, Error, Machine, Program, StdConsole};
use log::{LevelFilter, Log, Metadata, Record};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::fs;
use std::io::{stderr, Write};
use std::path::PathBuf;
use std::process::ExitCode;

/// Forth code generator for the forthgen stack machine
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log verbosity: -v debug, -vv trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a source file and execute its entry point
    Run {
        file: PathBuf,
        #[command(flatten)]
        options: BuildOptions,
    },
    /// Compile a source file and print the disassembly
    Dump {
        file: PathBuf,
        #[command(flatten)]
        options: BuildOptions,
    },
    /// Interactive session; definitions accumulate between lines
    Repl {
        #[command(flatten)]
        options: BuildOptions,
    },
}

#[derive(Args)]
struct BuildOptions {
    #[arg(long, default_value_t = forthgen::config::DEFAULT_DATA_STACK_SIZE)]
    data_stack_size: usize,

    #[arg(long, default_value_t = forthgen::config::DEFAULT_RETURN_STACK_SIZE)]
    return_stack_size: usize,

    /// Let stack and module-load faults escape instead of reporting them
    #[arg(long, default_value_t = false)]
    no_fault_guard: bool,

    /// Word used as the program entry point
    #[arg(long, default_value_t = String::from(forthgen::config::DEFAULT_ENTRY_WORD))]
    entry: String,

    /// Produce a library module instead of an executable
    #[arg(long, default_value_t = false)]
    library: bool,
}

impl BuildOptions {
    fn config(&self) -> CompilerConfig {
        CompilerConfig::new()
            .with_entry_word(self.entry.as_str())
            .with_fault_guard(!self.no_fault_guard)
            .with_stack_sizes(self.data_stack_size, self.return_stack_size)
            .with_executable(!self.library)
    }
}

// ============================================================================
// LOGGING
// ============================================================================

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut stderr = stderr().lock();
        let _ = writeln!(stderr, "[{:5}] {}", record.level(), record.args());
    }

    fn flush(&self) {
        let _ = stderr().flush();
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Command::Run { file, options } => run_file(file, &options.config()),
        Command::Dump { file, options } => dump_file(file, &options.config()),
        Command::Repl { options } => repl(options.config()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_file(file: &PathBuf, config: &CompilerConfig) -> Result<(), Error> {
    let source = fs::read_to_string(file)?;
    let module = compile_source(&source, config)?;
    let mut machine = Machine::new(&module, StdConsole::new());
    machine.run()?;
    Ok(())
}

fn dump_file(file: &PathBuf, config: &CompilerConfig) -> Result<(), Error> {
    let source = fs::read_to_string(file)?;
    let module = compile_source(&source, config)?;
    print!("{}", module);
    Ok(())
}

// ============================================================================
// REPL
// ============================================================================

/// Name of the transient word holding a line's loose atoms. Source text
/// cannot produce it since `(` always opens a comment.
const LINE_WORD: &str = "(LINE)";

struct Session {
    config: CompilerConfig,
    program: Program,
    /// Data stack carried from one line to the next
    stack: Vec<i32>,
}

impl Session {
    fn new(config: CompilerConfig) -> Self {
        Session {
            config,
            program: Program::new(),
            stack: Vec::new(),
        }
    }

    fn eval(&mut self, input: &str) -> Result<(), Error> {
        let tokens = Lexer::new(input).tokenize()?;
        let session = SourceParser::new(tokens).parse_session()?;

        let mut program = self.program.clone();
        merge(&mut program, session.program);

        // Compile even without loose atoms so bad definitions are rejected
        let candidate = program
            .clone()
            .word(LINE_WORD, session.immediate.iter().cloned());
        let module = compile(&candidate, &self.config)?;
        self.program = program;

        if session.immediate.is_empty() {
            return Ok(());
        }

        let mut machine = Machine::new(&module, StdConsole::new());
        machine.boot()?;
        for value in &self.stack {
            machine.push(*value)?;
        }
        let outcome = machine.invoke(LINE_WORD);
        self.stack = machine.data_stack().to_vec();
        outcome?;
        Ok(())
    }

    fn words(&self) -> Vec<&str> {
        let mut words: Vec<_> = self.program.words.iter().map(|w| w.name.as_str()).collect();
        words.sort();
        words
    }
}

/// Later definitions of a word replace earlier ones, locals included
fn merge(program: &mut Program, update: Program) {
    for word in update.words {
        program
            .words
            .retain(|w| !w.name.eq_ignore_ascii_case(&word.name));
        program
            .locals
            .retain(|l| !l.owning_word.eq_ignore_ascii_case(&word.name));
        program.words.push(word);
    }
    program.locals.extend(update.locals);
    program.constants.extend(update.constants);
    program.globals.extend(update.globals);
    program.externals.extend(update.externals);
}

fn repl(config: CompilerConfig) -> Result<(), Error> {
    println!("forthgen {}", env!("CARGO_PKG_VERSION"));
    println!("Type .help for help, bye to exit");
    println!();

    let mut session = Session::new(config);
    let mut rl = DefaultEditor::new().map_err(|e| Error::Io(std::io::Error::other(e)))?;
    let history_file = dirs::home_dir().map(|mut p| {
        p.push(".forthgen_history");
        p
    });

    if let Some(ref path) = history_file {
        let _ = rl.load_history(path);
    }

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);

                if input.starts_with('.') && input != "." && !input.starts_with(".\"") {
                    match input.to_lowercase().as_str() {
                        ".quit" | ".exit" | ".q" => break,
                        ".help" | ".h" => print_help(),
                        ".words" | ".w" => println!("{}", session.words().join(" ")),
                        ".stack" | ".s" => print_stack(&session.stack),
                        ".clear" => {
                            session.stack.clear();
                            println!(" ok");
                        }
                        _ => {
                            println!("Unknown command: {}", input);
                            println!("Type .help for help");
                        }
                    }
                    continue;
                }

                if input.eq_ignore_ascii_case("BYE") {
                    break;
                }

                match session.eval(input) {
                    Ok(()) => println!(" ok"),
                    Err(e) => println!(" {}", e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(ref path) = history_file {
        let _ = rl.save_history(path);
    }

    Ok(())
}

fn print_help() {
    println!("forthgen REPL commands:");
    println!("  .help, .h      Show this help");
    println!("  .words, .w     List defined words");
    println!("  .stack, .s     Show the data stack");
    println!("  .clear         Clear the data stack");
    println!("  bye            Exit the REPL");
    println!();
    println!("Each line is compiled and run on a fresh machine. Definitions and");
    println!("the data stack carry over; variable contents do not.");
    println!();
    println!("Examples:");
    println!("  : SQUARE DUP * ;  ( define SQUARE )");
    println!("  7 SQUARE .        ( prints 49 )");
    println!("  VARIABLE X 5 X ! X ?");
}

fn print_stack(stack: &[i32]) {
    print!("<{}> ", stack.len());
    for value in stack {
        print!("{} ", value);
    }
    println!();
}
