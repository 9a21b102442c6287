use std::io::{self, Write};
use std::sync::Mutex;

use super::styling::{bright_red, dim};
use super::ActionHost;

const REDACTED: &str = "***";

/// Local terminal host for runs outside GitHub Actions.
///
/// Registered secrets are replaced with `***` in everything it prints.
pub struct Terminal {
    secrets: Mutex<Vec<String>>,
    out: Mutex<Box<dyn Write + Send>>,
    err: Mutex<Box<dyn Write + Send>>,
}

impl Default for Terminal {
    fn default() -> Self {
        Self::new(io::stdout(), io::stderr())
    }
}

impl Terminal {
    pub fn new(out: impl Write + Send + 'static, err: impl Write + Send + 'static) -> Self {
        Self {
            secrets: Mutex::new(Vec::new()),
            out: Mutex::new(Box::new(out)),
            err: Mutex::new(Box::new(err)),
        }
    }

    fn redact(&self, text: &str) -> String {
        let secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }

    fn print(sink: &Mutex<Box<dyn Write + Send>>, line: &str) -> io::Result<()> {
        let mut sink = sink.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(sink, "{line}")?;
        sink.flush()
    }
}

impl ActionHost for Terminal {
    fn info(&self, message: &str) {
        let _ = Self::print(&self.out, &self.redact(message));
    }

    fn mask_secret(&self, secret: &str) {
        let mut secrets = self.secrets.lock().unwrap_or_else(|e| e.into_inner());
        let lines = secret.lines().map(str::trim).filter(|l| !l.is_empty());
        for candidate in std::iter::once(secret).chain(lines) {
            if !candidate.is_empty() && !secrets.iter().any(|s| s == candidate) {
                secrets.push(candidate.to_string());
            }
        }
        // Longest first, so a whole secret is replaced before its pieces.
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
    }

    fn set_output(&self, name: &str, value: &str) -> io::Result<()> {
        self.set_outputs(&[(name, value)])
    }

    fn set_outputs(&self, outputs: &[(&str, &str)]) -> io::Result<()> {
        let lines = outputs
            .iter()
            .map(|(name, value)| format!("{}={}", dim(name), self.redact(value)))
            .collect::<Vec<_>>()
            .join("\n");
        Self::print(&self.out, &lines)
    }

    fn set_failed(&self, message: &str) {
        let _ = Self::print(&self.err, &bright_red(self.redact(message)).to_string());
    }
}
