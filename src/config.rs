use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::args::Residency;
use crate::driver::PixelFormat;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    /// Width and height of the traced image.
    pub resolution: [u32; 2],
    pub threads_per_group: [u32; 2],
    pub residency: Residency,
    /// Colour of the texture that stands in for unavailable ones.
    pub placeholder_color: [f32; 4],
    pub label_prefix: String,
    pub target_format: PixelFormat,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            resolution: [1280, 720],
            threads_per_group: [8, 8],
            residency: Residency::Staging,
            placeholder_color: [0.5, 0.5, 0.5, 1.0],
            label_prefix: "Args".to_string(),
            target_format: PixelFormat::Rgba16Float,
        }
    }
}

impl RendererConfig {
    pub fn from_str(value: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(value).context("invalid renderer config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_str(&content).with_context(|| format!("failed to load {}", path.display()))
    }

    /// Loads `path`, writing the default configuration there first if it does not exist.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("writing default renderer config to {}", path.display());
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }
        Self::load(path)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.threads_per_group.iter().all(|&n| n > 0),
            "threads_per_group must be positive, got {:?}",
            self.threads_per_group
        );
        anyhow::ensure!(
            self.resolution.iter().all(|&n| n > 0),
            "resolution must be positive, got {:?}",
            self.resolution
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = RendererConfig::from_str(r#"{ "residency": "heap", "resolution": [64, 32] }"#)
            .unwrap();
        assert_eq!(config.residency, Residency::Heap);
        assert_eq!(config.resolution, [64, 32]);
        assert_eq!(config.threads_per_group, [8, 8]);
        assert_eq!(config.label_prefix, "Args");
    }

    #[test]
    fn test_rejects_empty_thread_groups() {
        let err = RendererConfig::from_str(r#"{ "threads_per_group": [0, 8] }"#).unwrap_err();
        assert!(err.to_string().contains("threads_per_group"));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("raytrace-config-{}.json", std::process::id()));
        let config = RendererConfig {
            residency: Residency::Heap,
            placeholder_color: [1.0, 0.0, 1.0, 1.0],
            ..Default::default()
        };
        config.save(&path).unwrap();
        let loaded = RendererConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }
}
