use std::io::{self, Write as _};

use crate::error::{RunError, RunResult};

/// Trait for handling output from the `display` and `newline` builtins.
///
/// Implement this trait to capture or redirect output from interpreted code.
/// The default implementation [`StdPrint`] writes to stdout.
pub trait PrintWriter {
    /// Called with each chunk of display output. Chunks carry no implicit
    /// separators or trailing newline; `newline` emits a bare `"\n"` chunk.
    fn write_str(&mut self, output: &str) -> RunResult<()>;
}

/// Default `PrintWriter` that writes to stdout.
#[derive(Debug)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write_str(&mut self, output: &str) -> RunResult<()> {
        let mut stdout = io::stdout();
        stdout
            .write_all(output.as_bytes())
            .and_then(|()| stdout.flush())
            .map_err(|e| RunError::internal(format!("stdout write failed: {e}")))
    }
}

/// `PrintWriter` that discards all output.
#[derive(Debug)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write_str(&mut self, _output: &str) -> RunResult<()> {
        Ok(())
    }
}

/// `PrintWriter` that collects all output into a string.
///
/// Useful in tests and in hosts that want to relay output themselves.
#[derive(Debug, Default)]
pub struct CollectStringPrint {
    output: String,
}

impl CollectStringPrint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the collected output, leaving the buffer empty.
    pub fn take_output(&mut self) -> String {
        std::mem::take(&mut self.output)
    }
}

impl PrintWriter for CollectStringPrint {
    fn write_str(&mut self, output: &str) -> RunResult<()> {
        self.output.push_str(output);
        Ok(())
    }
}
