use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tokio::process::Command;

use crate::{
    config::ValidateConfig,
    manifest::PROMETHEUS_CONFIG_ENTRY,
    process::{command_line, CommandFailed},
};

const CONFIG_MOUNT: &str = "/etc/prometheus/conf";
const RULES_MOUNT: &str = "/etc/prometheus/rules";

/// Runs `promtool` from a Prometheus image through `docker run`.
///
/// Files are staged in a temporary directory that is bind-mounted into the
/// container and removed once the check returns.
pub struct Promtool {
    docker: PathBuf,
    image: String,
}

impl Promtool {
    pub fn new(config: &ValidateConfig) -> Self {
        Self {
            docker: config.docker_bin.clone(),
            image: config.promtool_image.clone(),
        }
    }

    pub async fn check_config(&self, config_text: &str) -> Result<()> {
        let staging = TempDir::with_prefix("promtool-config")?;
        fs::write(staging.path().join(PROMETHEUS_CONFIG_ENTRY), config_text)
            .context("staging prometheus.yml")?;

        let target = format!("{CONFIG_MOUNT}/{PROMETHEUS_CONFIG_ENTRY}");
        self.run(staging.path(), CONFIG_MOUNT, &["check", "config", target.as_str()])
            .await
    }

    pub async fn check_rules(&self, rule_files: &BTreeMap<String, String>) -> Result<()> {
        let staging = TempDir::with_prefix("promtool-rules")?;
        let mut targets = vec![];

        for (name, contents) in rule_files {
            let file_name = Path::new(name)
                .file_name()
                .with_context(|| format!("rule entry '{name}' has no file name"))?;
            fs::write(staging.path().join(file_name), contents)
                .with_context(|| format!("staging rule file {name}"))?;
            targets.push(format!("{RULES_MOUNT}/{}", file_name.to_string_lossy()));
        }

        let mut promtool_args = vec!["check", "rules"];
        promtool_args.extend(targets.iter().map(String::as_str));
        self.run(staging.path(), RULES_MOUNT, &promtool_args).await
    }

    fn docker_args(
        &self,
        staging: &Path,
        mount: &str,
        promtool_args: &[&str],
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["run".into(), "--rm".into()];

        if let Some(user) = container_user() {
            args.push("-u".into());
            args.push(user.into());
        }

        args.push("--entrypoint=promtool".into());
        args.push("-v".into());
        args.push(format!("{}:{mount}", staging.display()).into());
        args.push(self.image.clone().into());
        args.extend(promtool_args.iter().map(OsString::from));

        args
    }

    async fn run(&self, staging: &Path, mount: &str, promtool_args: &[&str]) -> Result<()> {
        let args = self.docker_args(staging, mount, promtool_args);
        log::info!("Running `{}`", command_line(&self.docker, &args));

        let status = Command::new(&self.docker)
            .args(&args)
            .status()
            .await
            .with_context(|| format!("failed to run {}", self.docker.display()))?;

        if !status.success() {
            return Err(CommandFailed::new(&self.docker, &args, status).into());
        }

        Ok(())
    }
}

/// Our own `uid:gid`, so files the container writes stay ours.
#[cfg(unix)]
fn container_user() -> Option<String> {
    use nix::unistd::{getgid, getuid};

    Some(format!("{}:{}", getuid(), getgid()))
}

#[cfg(not(unix))]
fn container_user() -> Option<String> {
    None
}
