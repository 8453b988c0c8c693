use std::io::{self, BufRead, Write};

use device::{Confirmer, DeviceError, RetryPrompt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Answer {
    Retry,
    Abort,
}

fn parse_answer(line: &str) -> Option<Answer> {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "r" | "retry" | "y" | "yes" => Some(Answer::Retry),
        "a" | "abort" | "n" | "no" => Some(Answer::Abort),
        _ => None,
    }
}

/// Asks on stderr, reads the answer from a line-oriented input.
///
/// End of input counts as abort, so a non-interactive run cannot spin.
pub struct TerminalConfirmer<R, W> {
    input: R,
    output: W,
}

impl TerminalConfirmer<io::StdinLock<'static>, io::Stderr> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> TerminalConfirmer<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, prompt: &RetryPrompt) -> io::Result<Answer> {
        writeln!(self.output, "{}", prompt.title)?;
        writeln!(self.output, "{}", prompt.description)?;
        loop {
            write!(
                self.output,
                "[{}/{}] (default {}): ",
                prompt.retry_label, prompt.abort_label, prompt.retry_label
            )?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                writeln!(self.output)?;
                return Ok(Answer::Abort);
            }
            match parse_answer(&line) {
                Some(answer) => return Ok(answer),
                None => writeln!(
                    self.output,
                    "Please answer {} or {}.",
                    prompt.retry_label, prompt.abort_label
                )?,
            }
        }
    }
}

impl<R: BufRead, W: Write> Confirmer for TerminalConfirmer<R, W> {
    fn confirm(&mut self, prompt: &RetryPrompt) -> device::Result<bool> {
        let answer = self
            .ask(prompt)
            .map_err(|err| DeviceError::Prompt(err.to_string()))?;
        log::debug!("operator answered {answer:?}");
        Ok(answer == Answer::Retry)
    }
}
