mod github;
mod styling;
mod terminal;

use std::io;

pub use github::GitHubActions;
use styling::{dim, magenta_bold};
pub use terminal::Terminal;

/// The environment a trigger run reports to.
///
/// Mirrors what a CI runner offers a step: status lines, secret masking,
/// named outputs and a failure signal.
pub trait ActionHost: Send + Sync {
    fn info(&self, message: &str);

    /// Register `secret` so it never shows up in later output.
    fn mask_secret(&self, secret: &str);

    fn set_output(&self, name: &str, value: &str) -> io::Result<()>;

    /// Publish several outputs. Hosts that can fail part-way override this
    /// so that either every output is written or none is.
    fn set_outputs(&self, outputs: &[(&str, &str)]) -> io::Result<()> {
        outputs
            .iter()
            .try_for_each(|(name, value)| self.set_output(name, value))
    }

    fn set_failed(&self, message: &str);
}

/// Picks the GitHub Actions host when running inside a workflow.
pub fn detect_host() -> Box<dyn ActionHost> {
    if std::env::var("GITHUB_ACTIONS").is_ok_and(|v| v == "true") {
        Box::new(GitHubActions::from_env())
    } else {
        print_banner();
        Box::new(Terminal::default())
    }
}

impl<H: ActionHost + ?Sized> ActionHost for Box<H> {
    fn info(&self, message: &str) {
        (**self).info(message);
    }

    fn mask_secret(&self, secret: &str) {
        (**self).mask_secret(secret);
    }

    fn set_output(&self, name: &str, value: &str) -> io::Result<()> {
        (**self).set_output(name, value)
    }

    fn set_outputs(&self, outputs: &[(&str, &str)]) -> io::Result<()> {
        (**self).set_outputs(outputs)
    }

    fn set_failed(&self, message: &str) {
        (**self).set_failed(message);
    }
}

/// Prints the banner to stderr.
pub fn print_banner() {
    eprintln!(
        r"
{} {}
  {}
",
        magenta_bold("🚀 xcloud-trigger"),
        dim(env!("CARGO_PKG_VERSION")),
        dim("Xcode Cloud build trigger")
    );
}
