use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::paint::PaintConfig;
use crate::errors::ConfigError;

pub const DEFAULT_CONFIG_NAME: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Named,
    Fallback,
}

/// Looks up `{name}.json` paint overrides in a directory, falling back to `default.json`.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    dir: PathBuf,
}

impl ConfigResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get_config(&self, name: &str) -> Result<PaintConfig, ConfigError> {
        self.lookup(name).map(|(config, _)| config)
    }

    /// Same as [`Self::get_config`] but also reports whether the default was used.
    pub fn lookup(&self, name: &str) -> Result<(PaintConfig, ConfigSource), ConfigError> {
        let named = self.dir.join(format!("{name}.json"));
        if named.is_file() {
            return Ok((read_config(&named)?, ConfigSource::Named));
        }
        let fallback = self.dir.join(format!("{DEFAULT_CONFIG_NAME}.json"));
        if fallback.is_file() {
            if name != DEFAULT_CONFIG_NAME {
                warn!(niche = name, "paint config not found; using default");
            }
            return Ok((read_config(&fallback)?, ConfigSource::Fallback));
        }
        Err(ConfigError::NotFound {
            name: name.to_string(),
            dir: self.dir.clone(),
        })
    }

    /// `base` overlaid with the niche's config.
    pub fn resolve(&self, name: &str, base: &PaintConfig) -> Result<PaintConfig, ConfigError> {
        let niche = self.get_config(name)?;
        Ok(base.merge(&niche))
    }
}

fn read_config(path: &Path) -> Result<PaintConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_json::from_str::<PaintConfig>(&raw).map_err(|source| ConfigError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded paint config");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::{ConfigResolver, ConfigSource};
    use crate::configs::PaintConfig;
    use crate::errors::ConfigError;

    #[test]
    fn named_config_wins_over_default() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("default.json"), r#"{"aspect_ratio": "16:9"}"#)?;
        fs::write(temp.path().join("cats.json"), r#"{"aspect_ratio": "1:1"}"#)?;

        let (config, source) = ConfigResolver::new(temp.path()).lookup("cats")?;
        assert_eq!(source, ConfigSource::Named);
        assert_eq!(config.aspect_ratio(), "1:1");
        Ok(())
    }

    #[test]
    fn unknown_niche_returns_default_verbatim() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(
            temp.path().join("default.json"),
            r#"{"aspect_ratio": "3:2", "N_images": 2, "negative_prompt": "text"}"#,
        )?;

        let resolver = ConfigResolver::new(temp.path());
        let (config, source) = resolver.lookup("unknown")?;
        assert_eq!(source, ConfigSource::Fallback);
        assert_eq!(
            config,
            PaintConfig {
                aspect_ratio: Some("3:2".to_string()),
                n_images: Some(2),
                negative_prompt: Some("text".to_string()),
                ..PaintConfig::default()
            }
        );
        assert_eq!(resolver.get_config("unknown")?, config);
        Ok(())
    }

    #[test]
    fn missing_both_is_not_found() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let err = ConfigResolver::new(temp.path())
            .get_config("cats")
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { ref name, .. } if name == "cats"));
        Ok(())
    }

    #[test]
    fn malformed_json_is_reported() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("cats.json"), "{ not json")?;
        let err = ConfigResolver::new(temp.path())
            .get_config("cats")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
        Ok(())
    }

    #[test]
    fn resolve_layers_niche_over_base() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::write(temp.path().join("cats.json"), r#"{"N_images": 3}"#)?;
        let base = PaintConfig {
            negative_prompt: Some("watermark".to_string()),
            n_images: Some(1),
            ..PaintConfig::default()
        };

        let merged = ConfigResolver::new(temp.path()).resolve("cats", &base)?;
        assert_eq!(merged.n_images(), 3);
        assert_eq!(merged.negative_prompt(), "watermark");
        Ok(())
    }
}
