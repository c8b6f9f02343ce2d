use anyhow::Result;
use serde_yaml::Value;

use crate::{
    config::UpdateConfig,
    values::{KeyPath, ValuesFile},
};

/// Requested image tag changes for one values file.
#[derive(Debug, Clone)]
pub struct TagUpdate {
    pub tag: String,
    pub components: Vec<String>,
    pub set_global: bool,
}

impl From<&UpdateConfig> for TagUpdate {
    fn from(config: &UpdateConfig) -> Self {
        Self {
            tag: config.tag.clone(),
            components: config.components.clone(),
            set_global: config.set_global,
        }
    }
}

/// Sets `global.appImageTag` (when asked) and `<component>.image.tag` for
/// every component. Returns whether anything changed.
pub fn apply(values: &mut ValuesFile, update: &TagUpdate) -> Result<bool> {
    let mut has_changed = false;

    if update.set_global {
        let path = KeyPath::new(["global", "appImageTag"])?;
        has_changed |= set_tag(values, &path, &update.tag)?;
    }

    for component in &update.components {
        let component = component.trim();
        if component.is_empty() {
            continue;
        }

        let path = KeyPath::new([component, "image", "tag"])?;
        has_changed |= set_tag(values, &path, &update.tag)?;
    }

    Ok(has_changed)
}

fn set_tag(values: &mut ValuesFile, path: &KeyPath, tag: &str) -> Result<bool> {
    let previous = values.get(path)?;
    if !values.set_string(path, tag)? {
        return Ok(false);
    }

    match previous.as_ref().and_then(Value::as_str) {
        Some(previous) => log::info!("Updating {} from {} to {}", path, previous, tag),
        None => log::info!("Updating {} to {}", path, tag),
    }
    Ok(true)
}

pub fn run(config: &UpdateConfig) -> Result<()> {
    let mut values = ValuesFile::load(&config.values_file)?;

    if !apply(&mut values, &TagUpdate::from(config))? {
        println!("No changes required; values already up to date.");
        return Ok(());
    }

    values.save()?;

    println!(
        "Updated {} with tag {} for components: {}",
        values.path().display(),
        config.tag,
        config.components.join(", ")
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const VALUES: &str = "\
global:
  appImageTag: v1 # shared default
fastapi:
  image:
    tag: v1
react:
  image:
    tag: \"v1\"
";

    fn update(tag: &str, components: &[&str], set_global: bool) -> TagUpdate {
        TagUpdate {
            tag: tag.to_string(),
            components: components.iter().map(|c| c.to_string()).collect(),
            set_global,
        }
    }

    fn tag_at(values: &ValuesFile, dotted: &str) -> Option<Value> {
        values.get(&KeyPath::try_from(dotted).unwrap()).unwrap()
    }

    #[test]
    fn updates_components_and_global() {
        let mut values = ValuesFile::from_text("values.yaml", VALUES).unwrap();

        let changed = apply(&mut values, &update("v2", &["fastapi", "react"], true)).unwrap();

        assert!(changed);
        assert_eq!(
            values.text(),
            "\
global:
  appImageTag: v2 # shared default
fastapi:
  image:
    tag: v2
react:
  image:
    tag: \"v2\"
"
        );
    }

    #[test]
    fn global_is_left_alone_without_flag() {
        let mut values = ValuesFile::from_text("values.yaml", VALUES).unwrap();

        apply(&mut values, &update("v2", &["fastapi"], false)).unwrap();

        assert_eq!(tag_at(&values, ".global.appImageTag"), Some("v1".into()));
        assert_eq!(tag_at(&values, ".fastapi.image.tag"), Some("v2".into()));
        assert_eq!(tag_at(&values, ".react.image.tag"), Some("v1".into()));
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut values = ValuesFile::from_text("values.yaml", VALUES).unwrap();
        let request = update("v2", &["fastapi", "celery"], true);

        assert!(apply(&mut values, &request).unwrap());
        let once = values.text();

        let mut again = ValuesFile::from_text("values.yaml", &once).unwrap();
        assert!(!apply(&mut again, &request).unwrap());
        assert!(!again.is_modified());
        assert_eq!(again.text(), once);
    }

    #[test]
    fn blank_component_names_are_skipped() {
        let mut values = ValuesFile::from_text("values.yaml", VALUES).unwrap();

        let changed = apply(&mut values, &update("v2", &["  ", " fastapi "], false)).unwrap();

        assert!(changed);
        assert_eq!(tag_at(&values, ".fastapi.image.tag"), Some("v2".into()));
        assert_eq!(values.text().matches("v2").count(), 1);
    }

    #[test]
    fn creates_image_section_for_new_component() {
        let mut values = ValuesFile::from_text("values.yaml", VALUES).unwrap();

        apply(&mut values, &update("v2", &["celery"], false)).unwrap();

        assert_eq!(
            values.text(),
            format!("{VALUES}celery:\n  image:\n    tag: v2\n")
        );
    }
}
