use anyhow::{Context, Result};

use crate::{
    config::ValidateConfig,
    helm::{Helm, CONFIG_TEMPLATE, RULES_TEMPLATE},
    manifest,
    promtool::Promtool,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The config template rendered nothing and that was allowed.
    Skipped,
    Validated,
}

pub async fn run(config: &ValidateConfig) -> Result<Outcome> {
    config.ensure_values_files_exist()?;

    let label = config.label();
    println!(
        "[{label}] Rendering Helm templates with values: {}",
        config.values_list()
    );

    let helm = Helm::new(config);
    let promtool = Promtool::new(config);

    let config_rendered = helm
        .template(CONFIG_TEMPLATE, config.allow_missing)
        .await?;
    if config_rendered.is_empty() {
        println!("[{label}] Monitoring is disabled; skipping promtool validation.");
        return Ok(Outcome::Skipped);
    }

    let config_text = manifest::prometheus_config(&config_rendered)?;
    promtool
        .check_config(&config_text)
        .await
        .context("validating prometheus.yml")?;

    let rules_rendered = helm.template(RULES_TEMPLATE, false).await?;
    let rule_files = manifest::rule_files(&rules_rendered)?;
    log::info!(
        "Checking {} rule file(s): {}",
        rule_files.len(),
        rule_files.keys().cloned().collect::<Vec<_>>().join(", ")
    );
    promtool
        .check_rules(&rule_files)
        .await
        .context("validating Prometheus rules")?;

    println!("[{label}] Prometheus config and rules validated successfully.");
    Ok(Outcome::Validated)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use clap::Parser;

    fn config(values: &std::path::Path, extra: &[&str]) -> ValidateConfig {
        let values = values.to_str().unwrap();
        let argv = [
            "validate-prometheus",
            "--helm-bin",
            "true",
            "--docker-bin",
            "false",
            "-f",
            values,
        ]
        .into_iter()
        .chain(extra.iter().copied());
        ValidateConfig::try_parse_from(argv).unwrap()
    }

    #[tokio::test]
    async fn empty_config_render_is_skipped_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let values = dir.path().join("values-dev.yaml");
        std::fs::write(&values, "monitoring: {}\n").unwrap();

        let outcome = run(&config(&values, &["--allow-missing"])).await.unwrap();
        assert_eq!(outcome, Outcome::Skipped);

        let err = run(&config(&values, &[])).await.unwrap_err();
        assert!(err.to_string().starts_with("Helm rendered no output"));
    }
}
