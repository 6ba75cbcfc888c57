use std::io::{self, Write};
use std::process::ExitCode;

use minim::{Interp, StdPrint, source_is_complete};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        // File execution mode
        let path = &args[1];
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error reading {path}: {e}");
                return ExitCode::FAILURE;
            }
        };
        let mut interp = Interp::new();
        if let Err(err) = execute_snippet(&mut interp, &source, false) {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    // Interactive mode
    let mut interp = Interp::new();
    let mut source = String::new();

    loop {
        let prompt = if source.is_empty() { ">>> " } else { "... " };
        let Some(line) = read_line(prompt) else {
            println!();
            break;
        };

        if source.is_empty() && line.trim().is_empty() {
            continue;
        }

        if !source.is_empty() {
            source.push('\n');
        }
        source.push_str(&line);

        if !source_is_complete(&source) {
            continue;
        }

        if let Err(err) = execute_snippet(&mut interp, &source, true) {
            eprintln!("{err}");
        }
        source.clear();
    }

    ExitCode::SUCCESS
}

/// Evaluates every form in one snippet; in interactive mode each result is
/// echoed in its external representation.
fn execute_snippet(interp: &mut Interp, source: &str, echo: bool) -> Result<(), minim::RunError> {
    let forms = interp.read(source)?;
    for form in forms {
        let value = interp.run_expr(form, &mut StdPrint)?;
        if echo {
            println!("{}", interp.repr(&value)?);
        }
        interp.drop_value(value);
    }
    Ok(())
}

fn read_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    io::stdout().flush().ok()?;
    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\n', '\r']).to_owned()),
    }
}
