use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

pub const DEFAULT_CHART_DIR: &str = "helm/splattop";
pub const DEFAULT_RELEASE_NAME: &str = "splattop";
pub const DEFAULT_VALUES_FILE: &str = "helm/splattop/values-prod.yaml";
pub const DEFAULT_PROMTOOL_IMAGE: &str = "prom/prometheus:v2.52.0";

/// Update component image tags in a Helm values file.
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct UpdateConfig {
    /// Path to the values YAML file to update.
    #[arg(long)]
    pub values_file: PathBuf,

    /// Image tag to set for the selected components (e.g. v2.0.3).
    #[arg(long)]
    pub tag: String,

    /// Component key to update (repeat for multiple components).
    #[arg(long = "component", required = true)]
    pub components: Vec<String>,

    /// Also set global.appImageTag to the provided tag.
    #[arg(long)]
    pub set_global: bool,
}

/// Render Prometheus config/rules from Helm and validate them with promtool.
#[derive(Parser, Debug, Clone)]
#[command(version)]
pub struct ValidateConfig {
    /// Path to the Helm chart directory.
    #[arg(long, default_value = DEFAULT_CHART_DIR)]
    pub chart_dir: PathBuf,

    /// Helm release name used during templating.
    #[arg(long, default_value = DEFAULT_RELEASE_NAME)]
    pub release_name: String,

    /// Helm values files to pass with -f. Specify multiple times for overlays.
    #[arg(short = 'f', long = "values", default_value = DEFAULT_VALUES_FILE)]
    pub values_files: Vec<PathBuf>,

    /// Namespace to pass to helm template (overrides the default release namespace).
    #[arg(long)]
    pub namespace: Option<String>,

    /// Treat a missing Prometheus config render as a no-op (environments without monitoring).
    #[arg(long)]
    pub allow_missing: bool,

    /// Friendly label for log output (defaults to the last values file stem).
    #[arg(long)]
    pub label: Option<String>,

    /// helm executable.
    #[arg(long, env = "HELM_BIN", default_value = "helm")]
    pub helm_bin: PathBuf,

    /// docker executable used to run promtool.
    #[arg(long, env = "DOCKER_BIN", default_value = "docker")]
    pub docker_bin: PathBuf,

    /// Image providing the promtool binary.
    #[arg(long, env = "PROMTOOL_IMAGE", default_value = DEFAULT_PROMTOOL_IMAGE)]
    pub promtool_image: String,
}

impl ValidateConfig {
    pub fn ensure_values_files_exist(&self) -> Result<()> {
        let missing = self
            .values_files
            .iter()
            .filter(|path| !path.exists())
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>();

        if !missing.is_empty() {
            bail!("Values file(s) not found: {}", missing.join(", "));
        }

        Ok(())
    }

    pub fn label(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }

        self.values_files
            .last()
            .and_then(|path| path.file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Values files as shown in log lines and diagnostics.
    pub fn values_list(&self) -> String {
        display_paths(&self.values_files)
    }
}

pub(crate) fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
