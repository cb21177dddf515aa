use anyhow::{Context, Result};
use facefind_vision::ExtractorConfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::matcher::{MatchPolicy, Metric};

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEFIND_CONFIG_PATH").unwrap_or("/usr/local/etc/facefind/config.toml"))
});

pub static STORE_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEFIND_STORE_PREFIX").unwrap_or("/usr/local/var/facefind"))
});

pub static MODEL_PREFIX: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEFIND_MODEL_PREFIX").unwrap_or("/usr/local/share/facefind/models"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One metric per deployment; see [`Config::policy`].
    pub metric: Metric,
    /// Threshold for `metric`. Unset means the metric's default.
    pub threshold: Option<f32>,
    pub fetch_timeout_secs: u64,
    pub store_dir: PathBuf,
    pub extractor: ExtractorConfig,
    pub models: ModelConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metric: Metric::InnerProduct,
            threshold: None,
            fetch_timeout_secs: 30,
            store_dir: STORE_PREFIX.to_path_buf(),
            extractor: ExtractorConfig::default(),
            models: ModelConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            detector: MODEL_PREFIX.join("face_detection_yunet_2023mar.onnx"),
            recognizer: MODEL_PREFIX.join("face_recognition_sface_2021dec.onnx"),
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

impl Config {
    /// Resolve the match policy, applying command-line overrides.
    ///
    /// The configured threshold belongs to the configured metric: overriding
    /// only the metric falls back to that metric's default threshold.
    pub fn policy(&self, metric: Option<Metric>, threshold: Option<f32>) -> MatchPolicy {
        let metric_overridden = metric.is_some_and(|m| m != self.metric);
        let metric = metric.unwrap_or(self.metric);
        let threshold = match (threshold, metric_overridden) {
            (Some(t), _) => t,
            (None, false) => self.threshold.unwrap_or(metric.default_threshold()),
            (None, true) => metric.default_threshold(),
        };
        MatchPolicy::new(metric, threshold)
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let cfg = load_config(Some(Path::new("/nonexistent/facefind.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.extractor.min_input_bytes, 1024);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            metric = "euclidean"
            threshold = 0.5

            [extractor]
            min_face_size = 80
            "#,
        )
        .unwrap();
        assert_eq!(cfg.metric, Metric::Euclidean);
        assert_eq!(cfg.extractor.min_face_size, 80);
        assert_eq!(cfg.extractor.min_input_bytes, 1024);
        assert_eq!(cfg.fetch_timeout_secs, 30);
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir()
            .join(format!("facefind-{}", uuid::Uuid::new_v4()))
            .join("config.toml");
        let cfg = Config {
            metric: Metric::Euclidean,
            threshold: Some(0.45),
            ..Config::default()
        };
        save_config(&cfg, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), cfg);
        std::fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn policy_keeps_thresholds_with_their_metric() {
        let cfg = Config {
            metric: Metric::Euclidean,
            threshold: Some(0.45),
            ..Config::default()
        };
        assert_eq!(cfg.policy(None, None), MatchPolicy::new(Metric::Euclidean, 0.45));
        assert_eq!(
            cfg.policy(Some(Metric::Euclidean), None),
            MatchPolicy::new(Metric::Euclidean, 0.45)
        );
        // a distance threshold never carries over to a similarity metric
        assert_eq!(
            cfg.policy(Some(Metric::InnerProduct), None),
            MatchPolicy::new(Metric::InnerProduct, 0.7)
        );
        assert_eq!(
            cfg.policy(Some(Metric::InnerProduct), Some(0.8)),
            MatchPolicy::new(Metric::InnerProduct, 0.8)
        );
        assert_eq!(
            Config::default().policy(None, None),
            MatchPolicy::new(Metric::InnerProduct, 0.7)
        );
    }
}
