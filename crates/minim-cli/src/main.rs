use std::{env, fs, process::ExitCode};

use minim::{Interp, StdPrint};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    match args.get(1) {
        Some(path) => run_file(path),
        None => repl(),
    }
}

/// Runs a program file; only `display` output reaches stdout.
fn run_file(path: &str) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read {path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut interp = Interp::new();
    match interp.run_source(&source, &mut StdPrint) {
        Ok(last) => {
            if let Some(v) = last {
                interp.drop_value(v);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Line-by-line prompt that echoes the value of each complete form.
fn repl() -> ExitCode {
    use std::io::{BufRead, Write};

    let mut interp = Interp::new();
    let stdin = std::io::stdin();
    let mut source = String::new();

    loop {
        let prompt = if source.is_empty() { ">>> " } else { "... " };
        print!("{prompt}");
        if std::io::stdout().flush().is_err() {
            return ExitCode::FAILURE;
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                println!();
                return ExitCode::SUCCESS;
            }
            Ok(_) => {}
        }
        source.push_str(&line);
        if !minim::source_is_complete(&source) {
            continue;
        }

        match interp.read(&source) {
            Ok(forms) => {
                for form in forms {
                    match interp.run_expr(form, &mut StdPrint) {
                        Ok(value) => {
                            match interp.repr(&value) {
                                Ok(text) => println!("{text}"),
                                Err(err) => eprintln!("error: {err}"),
                            }
                            interp.drop_value(value);
                        }
                        Err(err) => {
                            eprintln!("error: {err}");
                            break;
                        }
                    }
                }
            }
            Err(err) => eprintln!("error: {err}"),
        }
        source.clear();
    }
}
