use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;

use super::ActionHost;

const DELIMITER_PREFIX: &str = "ghadelimiter_";

/// GitHub Actions runner, driven through workflow commands on stdout.
///
/// Outputs go to the file named by `GITHUB_OUTPUT` when the runner provides
/// one, otherwise through the legacy `set-output` command.
pub struct GitHubActions {
    out: Mutex<Box<dyn Write + Send>>,
    output_file: Option<PathBuf>,
}

impl GitHubActions {
    pub fn new(out: impl Write + Send + 'static, output_file: Option<PathBuf>) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
            output_file,
        }
    }

    pub fn from_env() -> Self {
        let output_file = std::env::var("GITHUB_OUTPUT")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        Self::new(io::stdout(), output_file)
    }

    fn write_line(&self, line: &str) {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }

    fn command(&self, command: &str, properties: &[(&str, &str)], message: &str) {
        let props = properties
            .iter()
            .map(|(k, v)| format!("{k}={}", escape_property(v)))
            .collect::<Vec<_>>()
            .join(",");
        let head = if props.is_empty() {
            command.to_string()
        } else {
            format!("{command} {props}")
        };
        self.write_line(&format!("::{head}::{}", escape_data(message)));
    }
}

impl ActionHost for GitHubActions {
    fn info(&self, message: &str) {
        self.write_line(message);
    }

    fn mask_secret(&self, secret: &str) {
        if !secret.is_empty() {
            self.command("add-mask", &[], secret);
        }
    }

    fn set_output(&self, name: &str, value: &str) -> io::Result<()> {
        self.set_outputs(&[(name, value)])
    }

    /// Appends every output to `GITHUB_OUTPUT` in a single write, after
    /// checking all of them, so a rejected value leaves the file untouched.
    fn set_outputs(&self, outputs: &[(&str, &str)]) -> io::Result<()> {
        let Some(path) = &self.output_file else {
            for &(name, value) in outputs {
                self.command("set-output", &[("name", name)], value);
            }
            return Ok(());
        };

        let delimiter = format!(
            "{DELIMITER_PREFIX}{}",
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let mut block = String::new();
        for &(name, value) in outputs {
            if name.contains(DELIMITER_PREFIX) || value.contains(DELIMITER_PREFIX) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("output '{name}' contains the delimiter marker {DELIMITER_PREFIX}"),
                ));
            }
            block.push_str(&format!("{name}<<{delimiter}\n{value}\n{delimiter}\n"));
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(block.as_bytes())
    }

    fn set_failed(&self, message: &str) {
        self.command("error", &[], message);
    }
}

fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn escape_property(value: &str) -> String {
    escape_data(value).replace(':', "%3A").replace(',', "%2C")
}
