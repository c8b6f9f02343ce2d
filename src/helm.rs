use std::{
    ffi::OsString,
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use tokio::process::Command;

use crate::{
    config::{display_paths, ValidateConfig},
    process::{command_line, CommandFailed},
};

pub const CONFIG_TEMPLATE: &str = "templates/monitoring-prometheus-configmap.yaml";
pub const RULES_TEMPLATE: &str = "templates/monitoring-prometheus-rules-configmap.yaml";

/// Renders single chart templates with `helm template`.
pub struct Helm {
    binary: PathBuf,
    release_name: String,
    chart_dir: PathBuf,
    namespace: Option<String>,
    values_files: Vec<PathBuf>,
}

impl Helm {
    pub fn new(config: &ValidateConfig) -> Self {
        Self {
            binary: config.helm_bin.clone(),
            release_name: config.release_name.clone(),
            chart_dir: config.chart_dir.clone(),
            namespace: config.namespace.clone(),
            values_files: config.values_files.clone(),
        }
    }

    fn template_args(&self, template: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "template".into(),
            self.release_name.clone().into(),
            self.chart_dir.clone().into(),
            "--show-only".into(),
            template.into(),
        ];

        if let Some(namespace) = &self.namespace {
            args.push("--namespace".into());
            args.push(namespace.into());
        }

        for values_file in &self.values_files {
            args.push("-f".into());
            args.push(values_file.clone().into());
        }

        args
    }

    /// Renders `template` and returns the trimmed output.
    ///
    /// An empty render is an error unless `allow_empty` is set, in which case
    /// the empty string is returned.
    pub async fn template(&self, template: &str, allow_empty: bool) -> Result<String> {
        let args = self.template_args(template);
        log::info!("Running `{}`", command_line(&self.binary, &args));

        let output = Command::new(&self.binary)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary.display()))?;

        if !output.status.success() {
            // stdout is reserved for the tool's own report.
            io::stderr().write_all(&output.stderr)?;
            return Err(CommandFailed::new(&self.binary, &args, output.status).into());
        }

        let rendered = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if rendered.is_empty() {
            if allow_empty {
                return Ok(String::new());
            }
            bail!(
                "Helm rendered no output for template {} using values {}. \
                 Ensure monitoring.prometheus.enabled and monitoring.prometheus.rules.enabled are true.",
                template,
                display_paths(&self.values_files)
            );
        }

        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn helm(args: &[&str]) -> Helm {
        let argv = std::iter::once("validate-prometheus").chain(args.iter().copied());
        Helm::new(&ValidateConfig::try_parse_from(argv).unwrap())
    }

    fn rendered_args(helm: &Helm, template: &str) -> Vec<String> {
        helm.template_args(template)
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn template_args_follow_overlay_order() {
        let helm = helm(&["-f", "values.yaml", "-f", "values-prod.yaml"]);

        assert_eq!(
            rendered_args(&helm, CONFIG_TEMPLATE),
            [
                "template",
                "splattop",
                "helm/splattop",
                "--show-only",
                CONFIG_TEMPLATE,
                "-f",
                "values.yaml",
                "-f",
                "values-prod.yaml",
            ]
        );
    }

    #[test]
    fn template_args_include_namespace() {
        let helm = helm(&[
            "--release-name",
            "splat",
            "--chart-dir",
            "charts/app",
            "--namespace",
            "monitoring",
        ]);

        assert_eq!(
            rendered_args(&helm, RULES_TEMPLATE),
            [
                "template",
                "splat",
                "charts/app",
                "--show-only",
                RULES_TEMPLATE,
                "--namespace",
                "monitoring",
                "-f",
                "helm/splattop/values-prod.yaml",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_render_depends_on_allow_empty() {
        let mut helm = helm(&["-f", "values-dev.yaml"]);
        helm.binary = PathBuf::from("true");

        assert_eq!(helm.template(CONFIG_TEMPLATE, true).await.unwrap(), "");

        let err = helm.template(RULES_TEMPLATE, false).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "Helm rendered no output for template {RULES_TEMPLATE} using values values-dev.yaml. \
                 Ensure monitoring.prometheus.enabled and monitoring.prometheus.rules.enabled are true."
            )
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_render_carries_exit_code() {
        let mut helm = helm(&[]);
        helm.binary = PathBuf::from("false");

        let err = helm.template(CONFIG_TEMPLATE, false).await.unwrap_err();
        let failed = err.downcast_ref::<CommandFailed>().unwrap();
        assert_eq!(failed.code, 1);
        assert!(failed.command.starts_with("false template splattop"));
    }
}
