//! Extraction of ConfigMap `data` entries from `helm template` output.
//!
//! The rendered manifest is scanned as text rather than parsed as YAML: the
//! literal block scalars have to come back exactly as written, blank lines
//! included.

use std::collections::BTreeMap;

use anyhow::{bail, ensure, Context, Result};

/// Indentation of block scalar content relative to its key.
const INDENT: usize = 2;

pub const PROMETHEUS_CONFIG_ENTRY: &str = "prometheus.yml";
const RULE_FILE_EXTENSION: &str = ".yaml";

/// Returns the literal `key: |` entries of the first `data:` section, keyed
/// by entry name. Each value ends with exactly one newline.
pub fn extract_entries(text: &str) -> Result<BTreeMap<String, String>> {
    let lines = text.lines().collect::<Vec<_>>();
    let mut entries = BTreeMap::new();
    let mut data_indent = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let stripped = line.trim();
        let indent = indent_of(line);

        let Some(reference) = data_indent else {
            if stripped == "data:" {
                data_indent = Some(indent);
            }
            i += 1;
            continue;
        };

        if indent <= reference {
            break;
        }

        if let Some(key) = stripped.strip_suffix(": |") {
            let value_indent = indent + INDENT;
            let mut value_lines = vec![];
            i += 1;

            while i < lines.len() {
                let value_line = lines[i];
                if value_line.trim().is_empty() {
                    value_lines.push("");
                    i += 1;
                    continue;
                }

                if indent_of(value_line) < value_indent {
                    break;
                }

                value_lines.push(dedent(value_line, value_indent));
                i += 1;
            }

            let value = value_lines.join("\n");
            log::debug!("Found ConfigMap entry {} ({} lines)", key, value_lines.len());
            entries.insert(key.to_string(), format!("{}\n", value.trim_end()));
            continue;
        }

        i += 1;
    }

    if entries.is_empty() {
        bail!("No ConfigMap data entries discovered in rendered template output");
    }

    Ok(entries)
}

/// The `prometheus.yml` entry of a rendered config ConfigMap.
pub fn prometheus_config(text: &str) -> Result<String> {
    let config = extract_entries(text)?
        .remove(PROMETHEUS_CONFIG_ENTRY)
        .context("prometheus.yml entry not found in rendered ConfigMap")?;

    ensure!(
        !config.trim().is_empty(),
        "Failed to extract prometheus.yml contents from rendered ConfigMap"
    );

    Ok(config)
}

/// The `*.yaml` rule file entries of a rendered rules ConfigMap.
pub fn rule_files(text: &str) -> Result<BTreeMap<String, String>> {
    let rule_files = extract_entries(text)?
        .into_iter()
        .filter(|(name, _)| name.ends_with(RULE_FILE_EXTENSION))
        .collect::<BTreeMap<_, _>>();

    ensure!(
        !rule_files.is_empty(),
        "No rule files discovered in rendered Prometheus rules ConfigMap"
    );

    Ok(rule_files)
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

fn dedent(line: &str, width: usize) -> &str {
    line.char_indices()
        .nth(width)
        .map_or("", |(offset, _)| &line[offset..])
}
