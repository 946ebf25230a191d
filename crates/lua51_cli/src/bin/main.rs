//! The `lua` binary: a thin front-end over the `lua51` library crate
//! (spec §6.3 — out of the core's scope, specified only so the end-to-end
//! scenarios in §8.3 are runnable from a shell). Modeled on the teacher's
//! `luars_interpreter` CLI, trimmed to the five forms `spec.md` names plus
//! `-` for stdin.

use lua51::{LuaVM, VmConfig};
use mimalloc::MiMalloc;
use std::env;
use std::fs;
use std::io::{self, BufRead, Read, Write};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const VERSION: &str = "Lua 5.1.5 (lua51-rs)";

fn print_usage() {
    eprintln!("usage: lua [options] [script [args]]");
    eprintln!("Available options are:");
    eprintln!("  -e stat   execute string 'stat'");
    eprintln!("  -i        enter interactive mode after executing 'script'");
    eprintln!("  -v        show version information");
    eprintln!("  --        stop handling options");
    eprintln!("  -         stop handling options and execute stdin");
}

#[derive(Default)]
struct Options {
    execute_strings: Vec<String>,
    interactive: bool,
    script_file: Option<String>,
    script_args: Vec<String>,
    show_version: bool,
    read_stdin: bool,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut opts = Options::default();
    let mut i = 1;
    let mut stop_options = false;

    while i < args.len() {
        let arg = &args[i];

        if !stop_options && arg.starts_with('-') && arg != "-" {
            match arg.as_str() {
                "-e" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-e' needs argument".to_string());
                    }
                    opts.execute_strings.push(args[i].clone());
                }
                "-i" => opts.interactive = true,
                "-v" => opts.show_version = true,
                "--" => stop_options = true,
                _ => return Err(format!("unrecognized option '{arg}'")),
            }
        } else if !stop_options && arg == "-" {
            opts.read_stdin = true;
            stop_options = true;
        } else {
            opts.script_file = Some(arg.clone());
            i += 1;
            while i < args.len() {
                opts.script_args.push(args[i].clone());
                i += 1;
            }
            break;
        }
        i += 1;
    }

    Ok(opts)
}

/// `arg[0]` = script name (or nil), `arg[-1]` = interpreter path,
/// `arg[1..]` = trailing script arguments (spec §6.3).
fn setup_arg_table(vm: &mut LuaVM, exe_path: &str, script_name: Option<&str>, args: &[String]) {
    let thread = vm.main_thread;
    let mut state = lua51::LuaState::new(vm, thread);
    let arg_table = state.create_table(args.len(), 2);

    if let Some(name) = script_name {
        let s = state.create_string(name);
        state.raw_seti(&arg_table, 0, s);
    }
    let exe = state.create_string(exe_path);
    state.raw_seti(&arg_table, -1, exe);
    for (i, a) in args.iter().enumerate() {
        let s = state.create_string(a);
        state.raw_seti(&arg_table, (i + 1) as i64, s);
    }
    state.set_global("arg", arg_table);
}

enum CliError {
    Runtime(String),
    Syntax(String),
    Io(String),
}

fn execute_file(vm: &mut LuaVM, filename: &str) -> Result<(), CliError> {
    let source = fs::read_to_string(filename)
        .map_err(|e| CliError::Io(format!("cannot open {filename}: {e}")))?;
    run_source(vm, &source, filename)
}

fn execute_stdin(vm: &mut LuaVM) -> Result<(), CliError> {
    let mut source = String::new();
    io::stdin()
        .read_to_string(&mut source)
        .map_err(|e| CliError::Io(format!("cannot read stdin: {e}")))?;
    run_source(vm, &source, "stdin")
}

fn run_source(vm: &mut LuaVM, source: &str, chunk_name: &str) -> Result<(), CliError> {
    let proto = match vm.compile(source, chunk_name) {
        Ok(proto) => proto,
        Err(e) => return Err(CliError::Syntax(e.to_string())),
    };
    match vm.execute_proto(proto) {
        Ok(_) => Ok(()),
        Err(e) => Err(CliError::Runtime(e.to_string())),
    }
}

fn run_repl(vm: &mut LuaVM) {
    println!("{VERSION}");
    println!("Type Ctrl+D to exit");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut incomplete = String::new();

    loop {
        print!("{}", if incomplete.is_empty() { "> " } else { ">> " });
        io::stdout().flush().ok();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };

        if !incomplete.is_empty() {
            incomplete.push('\n');
        }
        incomplete.push_str(&line);

        // Try as an expression first, so `> 1 + 2` prints `3` the way the
        // reference REPL does.
        let expr_source = format!("return {incomplete}");
        let (source, is_expr) = match vm.compile(&expr_source, "=stdin") {
            Ok(_) => (expr_source, true),
            Err(_) => (incomplete.clone(), false),
        };

        match vm.compile(&source, "=stdin") {
            Ok(proto) => match vm.execute_proto(proto) {
                Ok(results) => {
                    if is_expr {
                        if let Some(first) = results.into_iter().next() {
                            println!("{}", vm.raw_tostring(first));
                        }
                    }
                    incomplete.clear();
                }
                Err(e) => {
                    eprintln!("{e}");
                    incomplete.clear();
                }
            },
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("eof") || msg.contains("expected") {
                    continue;
                }
                eprintln!("{msg}");
                incomplete.clear();
            }
        }
    }
}

fn main() {
    std::process::exit(lua_main());
}

fn lua_main() -> i32 {
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("lua: {e}");
            print_usage();
            return 1;
        }
    };

    if opts.show_version {
        println!("{VERSION}");
        if opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.read_stdin {
            return 0;
        }
    }

    let mut vm = LuaVM::new(VmConfig::default());

    let exe_path = env::args().next().unwrap_or_else(|| "lua".to_string());
    setup_arg_table(&mut vm, &exe_path, opts.script_file.as_deref(), &opts.script_args);

    for code in &opts.execute_strings {
        if let Err(e) = run_source(&mut vm, code, "=(command line)") {
            return report(e);
        }
    }

    if let Some(filename) = &opts.script_file {
        if let Err(e) = execute_file(&mut vm, filename) {
            return report(e);
        }
    } else if opts.read_stdin {
        if let Err(e) = execute_stdin(&mut vm) {
            return report(e);
        }
    }

    if opts.interactive
        || (opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.read_stdin)
    {
        run_repl(&mut vm);
    }

    0
}

fn report(e: CliError) -> i32 {
    match e {
        CliError::Runtime(msg) => {
            eprintln!("lua: {msg}");
            1
        }
        CliError::Syntax(msg) => {
            eprintln!("lua: {msg}");
            2
        }
        CliError::Io(msg) => {
            eprintln!("lua: {msg}");
            3
        }
    }
}
