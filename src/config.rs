use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// 程序配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 单个任务内同时进行的翻译请求数
    pub max_concurrency: usize,
    /// 瞬时错误的最大重试次数
    pub max_retries: u32,
    /// 单次翻译请求超时（秒）
    pub request_timeout_secs: u64,
    /// 退避基准时长（毫秒）
    pub retry_base_delay_ms: u64,
    /// 退避上限（毫秒）
    pub retry_max_delay_ms: u64,
    /// 单个翻译单元的最大字符数
    pub max_unit_chars: usize,
    /// 允许失败单元占比，超过则任务失败
    pub max_failed_unit_ratio: f64,
    /// 上传文件大小上限（字节）
    pub max_input_size: usize,
    /// 产物存放目录
    pub temp_dir: PathBuf,
    /// 已结束任务的保留时长（小时）
    pub retention_hours: u64,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// PDF 输出嵌入的 TrueType 字体；未设置时按目标语言使用 CJK 预置字体
    pub pdf_font_path: Option<PathBuf>,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            max_retries: 3,
            request_timeout_secs: 60,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            max_unit_chars: 3000,
            max_failed_unit_ratio: 0.1,
            max_input_size: 100 * 1024 * 1024,
            temp_dir: PathBuf::from("./temp"),
            retention_hours: 24,
            verbose_logging: false,
            pdf_font_path: None,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrency: std::env::var("TRANS_MAX_CONCURRENCY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_concurrency),
            max_retries: std::env::var("TRANS_MAX_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_retries),
            request_timeout_secs: std::env::var("TRANS_REQUEST_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.request_timeout_secs),
            retry_base_delay_ms: std::env::var("TRANS_RETRY_BASE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.retry_base_delay_ms),
            retry_max_delay_ms: std::env::var("TRANS_RETRY_MAX_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.retry_max_delay_ms),
            max_unit_chars: std::env::var("TRANS_MAX_UNIT_CHARS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_unit_chars),
            max_failed_unit_ratio: std::env::var("TRANS_MAX_FAILED_RATIO").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_failed_unit_ratio),
            max_input_size: std::env::var("UPLOAD_MAX_SIZE").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_input_size),
            temp_dir: std::env::var("TEMP_DIR").map(PathBuf::from).unwrap_or(default.temp_dir),
            retention_hours: std::env::var("CLEANUP_TTL_HOURS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.retention_hours),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            pdf_font_path: std::env::var("CJK_FONT").ok().filter(|v| !v.is_empty()).map(PathBuf::from).or(default.pdf_font_path),
            llm_api_key: std::env::var("OPENAI_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("OPENAI_MODEL").unwrap_or(default.llm_model_name),
        }
    }

    /// 从 TOML 文件加载配置，缺省字段取默认值
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrency",
                reason: "至少为 1".to_string(),
            });
        }
        if self.max_unit_chars < 16 {
            return Err(ConfigError::Invalid {
                field: "max_unit_chars",
                reason: format!("{} 过小，至少为 16", self.max_unit_chars),
            });
        }
        if !(0.0..=1.0).contains(&self.max_failed_unit_ratio) {
            return Err(ConfigError::Invalid {
                field: "max_failed_unit_ratio",
                reason: format!("{} 不在 [0, 1] 区间内", self.max_failed_unit_ratio),
            });
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Invalid {
                field: "retry_base_delay_ms",
                reason: "不能大于 retry_max_delay_ms".to_string(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "至少为 1 秒".to_string(),
            });
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.pdf_font_path, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_override() {
        let config = Config::from_toml_str(
            r#"
            max_concurrency = 8
            max_failed_unit_ratio = 0.25
            temp_dir = "/tmp/jobs"
            pdf_font_path = "/fonts/NotoSansCJK.ttf"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.max_failed_unit_ratio, 0.25);
        assert_eq!(config.temp_dir, PathBuf::from("/tmp/jobs"));
        assert_eq!(config.pdf_font_path, Some(PathBuf::from("/fonts/NotoSansCJK.ttf")));
        // 未写的字段保持默认
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let config = Config {
            max_failed_unit_ratio: 1.5,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "max_failed_unit_ratio",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = Config {
            max_concurrency: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
