use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::auth::{CredentialSource, Credentials};
use crate::providers::{BASE_URL, DEFAULT_PAGE_LIMIT, DEFAULT_USER_AGENT};
use crate::retry::RetryPolicy;

/// Names of the inputs a trigger run reads.
pub mod inputs {
    pub const KEY_ID: &str = "keyId";
    pub const ISSUER_ID: &str = "issuerId";
    pub const KEY: &str = "key";
    pub const WORKFLOW_ID: &str = "xcodeCloudWorkflowId";
    pub const BRANCH_NAME: &str = "gitBranchName";
}

/// Source of named string inputs.
///
/// Blank values are reported as absent.
pub trait InputSource {
    fn input(&self, name: &str) -> Option<String>;

    /// The input's value, or an empty string when it is not set.
    fn input_or_empty(&self, name: &str) -> String {
        self.input(name).unwrap_or_default()
    }
}

impl<T: InputSource + ?Sized> InputSource for &T {
    fn input(&self, name: &str) -> Option<String> {
        (**self).input(name)
    }
}

impl InputSource for HashMap<String, String> {
    fn input(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Layered inputs: the first source wins, the second fills the gaps.
impl<A: InputSource, B: InputSource> InputSource for (A, B) {
    fn input(&self, name: &str) -> Option<String> {
        self.0.input(name).or_else(|| self.1.input(name))
    }
}

/// GitHub Actions inputs, exposed to the step as `INPUT_<NAME>` variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActionInputs;

impl ActionInputs {
    pub fn env_name(name: &str) -> String {
        format!("INPUT_{}", name.replace(' ', "_").to_uppercase())
    }
}

impl InputSource for ActionInputs {
    fn input(&self, name: &str) -> Option<String> {
        std::env::var(Self::env_name(name))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Reads `keyId`, `issuerId` and `key` from an [`InputSource`].
pub struct InputCredentials<I>(pub I);

impl<I: InputSource> CredentialSource for InputCredentials<I> {
    fn credentials(&self) -> Credentials {
        Credentials::new(
            self.0.input_or_empty(inputs::KEY_ID),
            self.0.input_or_empty(inputs::ISSUER_ID),
            self.0.input_or_empty(inputs::KEY),
        )
    }
}

/// Configuration file structure.
///
/// Everything is optional; a missing file means built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    /// Policy for resolving the branch's git reference
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiConfig {
    /// App Store Connect API root
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Page size when listing git references
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            page_limit: default_page_limit(),
        }
    }
}

fn default_base_url() -> String {
    BASE_URL.to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_page_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

const CANDIDATES: [&str; 4] = [
    "xcloud-trigger.toml",
    "xcloud-trigger.json",
    "xcloud-trigger.yaml",
    "xcloud-trigger.yml",
];

impl Config {
    /// Load configuration from a file.
    ///
    /// Uses `path` when given, otherwise the first of `xcloud-trigger.toml`,
    /// `.json`, `.yaml` or `.yml` found in the current directory. Returns the
    /// defaults if there is none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        Self::load_from_dir(&cwd)
    }

    fn load_from_dir(dir: &Path) -> Result<Self> {
        for candidate in &CANDIDATES {
            let path = dir.join(candidate);
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }
}
