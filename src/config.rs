use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::geometry::Rotation;

const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_SOURCE_ROTATION: u32 = 0;
const DEFAULT_CLASSIFIER_BACKEND: &str = "stub";
const DEFAULT_TOP_K: usize = 3;
const DEFAULT_HEALTH_LOG_SECS: u64 = 5;

#[derive(Debug, Deserialize, Default)]
struct FramegateConfigFile {
    source: Option<SourceConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    health_log_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    rotation_degrees: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    top_k: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct FramegateConfig {
    pub source: SourceSettings,
    pub classifier: ClassifierSettings,
    pub health_log_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    pub rotation_degrees: u32,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// "stub" or "tract".
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub top_k: usize,
}

impl FramegateConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FRAMEGATE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: FramegateConfigFile) -> Self {
        let source = SourceSettings {
            width: file
                .source
                .as_ref()
                .and_then(|source| source.width)
                .unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: file
                .source
                .as_ref()
                .and_then(|source| source.height)
                .unwrap_or(DEFAULT_SOURCE_HEIGHT),
            target_fps: file
                .source
                .as_ref()
                .and_then(|source| source.target_fps)
                .unwrap_or(DEFAULT_SOURCE_FPS),
            rotation_degrees: file
                .source
                .as_ref()
                .and_then(|source| source.rotation_degrees)
                .unwrap_or(DEFAULT_SOURCE_ROTATION),
        };
        let classifier = ClassifierSettings {
            backend: file
                .classifier
                .as_ref()
                .and_then(|classifier| classifier.backend.clone())
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_BACKEND.to_string()),
            model_path: file
                .classifier
                .as_ref()
                .and_then(|classifier| classifier.model_path.clone()),
            labels_path: file
                .classifier
                .as_ref()
                .and_then(|classifier| classifier.labels_path.clone()),
            top_k: file
                .classifier
                .as_ref()
                .and_then(|classifier| classifier.top_k)
                .unwrap_or(DEFAULT_TOP_K),
        };
        Self {
            source,
            classifier,
            health_log_secs: file.health_log_secs.unwrap_or(DEFAULT_HEALTH_LOG_SECS),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(width) = env_u32("FRAMEGATE_SOURCE_WIDTH")? {
            self.source.width = width;
        }
        if let Some(height) = env_u32("FRAMEGATE_SOURCE_HEIGHT")? {
            self.source.height = height;
        }
        if let Some(fps) = env_u32("FRAMEGATE_SOURCE_FPS")? {
            self.source.target_fps = fps;
        }
        if let Some(rotation) = env_u32("FRAMEGATE_SOURCE_ROTATION")? {
            self.source.rotation_degrees = rotation;
        }
        if let Ok(backend) = std::env::var("FRAMEGATE_CLASSIFIER") {
            if !backend.trim().is_empty() {
                self.classifier.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("FRAMEGATE_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.classifier.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("FRAMEGATE_LABELS_PATH") {
            if !path.trim().is_empty() {
                self.classifier.labels_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(secs) = std::env::var("FRAMEGATE_HEALTH_LOG_SECS") {
            self.health_log_secs = secs
                .parse()
                .map_err(|_| anyhow!("FRAMEGATE_HEALTH_LOG_SECS must be an integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source dimensions must be non-zero"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        Rotation::from_degrees(self.source.rotation_degrees)?;

        match self.classifier.backend.as_str() {
            "stub" => {}
            "tract" => {
                if self.classifier.model_path.is_none() {
                    return Err(anyhow!("tract backend requires classifier.model_path"));
                }
                if self.classifier.labels_path.is_none() {
                    return Err(anyhow!("tract backend requires classifier.labels_path"));
                }
            }
            other => return Err(anyhow!("unknown classifier backend '{}'", other)),
        }
        if self.classifier.top_k == 0 {
            return Err(anyhow!("classifier top_k must be at least 1"));
        }
        if self.health_log_secs == 0 {
            return Err(anyhow!("health_log_secs must be greater than zero"));
        }
        Ok(())
    }
}

fn env_u32(key: &str) -> Result<Option<u32>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            let parsed: u32 = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be an unsigned integer", key))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<FramegateConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
