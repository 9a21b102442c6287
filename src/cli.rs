use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;

use xcloud_trigger::config::{inputs, ActionInputs, Config, InputCredentials};
use xcloud_trigger::output::detect_host;
use xcloud_trigger::providers::AppStoreConnectClient;
use xcloud_trigger::trigger::{BuildOrchestrator, BuildResult, TriggerRequest};

/// Inputs left out on the command line are read from the GitHub Actions
/// `INPUT_*` environment variables.
#[derive(Parser)]
#[command(name = "xcloud-trigger")]
#[command(author, version, about = "Trigger an Xcode Cloud build", long_about = None)]
pub struct Cli {
    /// Xcode Cloud workflow to build
    #[arg(short, long)]
    workflow_id: Option<String>,

    /// Branch to build
    #[arg(short, long)]
    branch: Option<String>,

    /// App Store Connect API key id
    #[arg(long)]
    key_id: Option<String>,

    /// App Store Connect API issuer id
    #[arg(long)]
    issuer_id: Option<String>,

    /// PEM private key; literal "\n" sequences are accepted
    #[arg(long, env = "XCLOUD_TRIGGER_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Config file (defaults to ./xcloud-trigger.{toml,json,yaml,yml})
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the App Store Connect API base URL
    #[arg(long)]
    base_url: Option<String>,

    /// Write the build result as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long, default_value_t = false)]
    pretty: bool,
}

impl Cli {
    /// Command line values, keyed by input name.
    fn overrides(&self) -> HashMap<String, String> {
        [
            (inputs::WORKFLOW_ID, &self.workflow_id),
            (inputs::BRANCH_NAME, &self.branch),
            (inputs::KEY_ID, &self.key_id),
            (inputs::ISSUER_ID, &self.issuer_id),
            (inputs::KEY, &self.key),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.clone().map(|v| (name.to_string(), v)))
        .collect()
    }

    fn write_result(&self, result: &BuildResult) -> Result<()> {
        let Some(output_path) = &self.output else {
            return Ok(());
        };

        let json_output = if self.pretty {
            serde_json::to_string_pretty(result)?
        } else {
            serde_json::to_string(result)?
        };

        std::fs::write(output_path, json_output)
            .with_context(|| format!("Failed to write result: {}", output_path.display()))?;
        info!("Build result written to: {}", output_path.display());

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let base_url = self.base_url.as_deref().unwrap_or(&config.api.base_url);
        info!("Using App Store Connect API at {base_url}");

        let client = AppStoreConnectClient::new(base_url, &config.api.user_agent)
            .context("Failed to create App Store Connect client")?
            .with_page_limit(config.api.page_limit);

        let inputs = (self.overrides(), ActionInputs);
        let request = TriggerRequest::from_inputs(&inputs);
        let credentials = InputCredentials(&inputs);

        let orchestrator =
            BuildOrchestrator::new(client, detect_host()).with_retry_policy(config.retry);
        let result = orchestrator.trigger(&request, &credentials).await?;

        self.write_result(&result)
    }
}
