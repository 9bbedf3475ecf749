use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use veil_detect::{DetectorConfig, ThreadConfig, YoloParams};
use veil_render::BlurParams;

/// 覆盖模型路径的环境变量
pub const MODEL_PATH_ENV: &str = "VEIL_MODEL_PATH";

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "veil.json";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerConfig {
    // ============ 检测 ============
    pub detector: DetectorConfig,

    // ============ 模糊 ============
    pub blur: BlurParams,

    // ============ 调度 ============
    /// 工作线程数
    pub workers: usize,
    /// 终态任务结果保留时间（秒）
    pub result_ttl_secs: u64,
    /// 等待单个任务的最长时间（秒）
    pub job_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig {
                model_path: "models/face-plate-yolov8.onnx".to_string(),
                params: YoloParams::default(),
                threads: ThreadConfig::default(),
            },
            blur: BlurParams::default(),
            workers: 2,
            result_ttl_secs: 3600,
            job_timeout_secs: 30 * 60,
        }
    }
}

impl WorkerConfig {
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// 应用环境变量覆盖
    pub fn apply_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(MODEL_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            log::info!("[Config] 使用环境变量 {} 指定的模型: {}", MODEL_PATH_ENV, path);
            self.detector.model_path = path;
        }
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 读取配置，未指定路径时使用当前目录下的默认文件，文件不存在时返回默认配置
pub fn load_config(path: Option<&Path>) -> Result<WorkerConfig, ConfigError> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = if path.exists() {
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str(&raw)?
    } else {
        log::debug!("[Config] {} 不存在，使用默认配置", path.display());
        WorkerConfig::default()
    };
    Ok(config.apply_env(|key| std::env::var(key).ok()))
}

pub fn save_config(path: &Path, config: &WorkerConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let raw = serde_json::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: WorkerConfig =
            serde_json::from_str(r#"{"workers": 8, "blur": {"featherRatio": 0.2}}"#).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.blur.feather_ratio, 0.2);
        assert_eq!(config.blur.expansion_factor, 2.0);
        assert_eq!(config.result_ttl(), Duration::from_secs(3600));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("veil.json");
        let mut config = WorkerConfig::default();
        config.workers = 3;
        config.detector.params.conf_threshold = 0.4;
        config.detector.threads.intra = Some(2);
        save_config(&path, &config).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"modelPath\""));
        assert!(raw.contains("\"resultTtlSecs\""));

        let loaded: WorkerConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_env_overrides_model_path() {
        let config = WorkerConfig::default().apply_env(|key| {
            (key == MODEL_PATH_ENV).then(|| "/opt/models/custom.onnx".to_string())
        });
        assert_eq!(config.detector.model_path, "/opt/models/custom.onnx");

        let config = WorkerConfig::default().apply_env(|_| Some("  ".to_string()));
        assert_eq!(config.detector.model_path, WorkerConfig::default().detector.model_path);
    }

    #[test]
    fn test_invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Json(_))));
    }
}
