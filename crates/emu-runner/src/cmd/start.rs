use std::path::PathBuf;

use clap::Args;
use emu_device::ExtraValue;
use emu_device::lifecycle::configure;
use tracing::info;

use super::session::build_controller;
use crate::config::RunnerConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::lock;
use crate::paths::{self, HomePaths};

#[derive(Args)]
pub struct StartArgs {
    /// Path to runner config YAML
    #[arg(long, short)]
    pub config: PathBuf,
    /// Session name
    #[arg(long, short, default_value = "default")]
    pub name: String,
    /// Extra for the ready broadcast sent after boot (repeatable)
    #[arg(long = "extra", value_name = "KEY=VALUE")]
    pub extras: Vec<String>,
    /// Broadcast action, when not the bootstrap package's default
    #[arg(long)]
    pub action: Option<String>,
}

pub async fn run_start(args: StartArgs) -> RunnerResult<()> {
    let config = RunnerConfig::load(&args.config)?;
    let extras = parse_extras(&args.extras)?;

    let home = HomePaths::new()?;
    let _guard = lock::try_acquire(home.session_lock(&args.name)?).await?;
    let session = home.session(&args.name)?;
    if lock::is_held(session.lock()).await? {
        return Err(RunnerError::Config(format!(
            "session '{}' still has a running device, stop it first",
            args.name
        )));
    }
    session.remove().await?;

    let (metadata, handle) = configure(&session, &config.device_spec()?, &args.name).await?;
    tokio::fs::copy(&args.config, paths::session_config(&session)).await?;

    let mut controller = build_controller(&config, session, metadata, handle)?;
    let report = controller.start().await?;
    info!(
        attempts = report.total_attempts,
        serial = %controller.handle().serial,
        "device ready"
    );

    controller
        .broadcast_ready(&extras, args.action.as_deref())
        .await?;
    println!("{}", serde_json::to_string_pretty(controller.handle())?);
    Ok(())
}

/// `key=true|false` becomes a boolean extra; anything else is text.
fn parse_extras(raw: &[String]) -> RunnerResult<Vec<(String, ExtraValue)>> {
    raw.iter()
        .map(|item| {
            let (key, value) = item
                .split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .ok_or_else(|| RunnerError::Config(format!("extra '{item}' is not KEY=VALUE")))?;
            let value = match value {
                "true" => ExtraValue::Bool(true),
                "false" => ExtraValue::Bool(false),
                other => ExtraValue::Text(other.to_string()),
            };
            Ok((key.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extras_are_typed_by_value() {
        let raw = vec!["ready=true".to_string(), "user=a=b".to_string()];
        assert_eq!(
            parse_extras(&raw).unwrap(),
            [
                ("ready".to_string(), ExtraValue::Bool(true)),
                ("user".to_string(), ExtraValue::Text("a=b".into())),
            ]
        );
    }

    #[test]
    fn extras_need_a_key() {
        assert!(parse_extras(&["=x".to_string()]).is_err());
        assert!(parse_extras(&["flag".to_string()]).is_err());
    }
}
