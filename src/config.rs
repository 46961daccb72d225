//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TUTOR__*` 覆盖（双下划线表示嵌套，如 `TUTOR__UPSTREAM__BASE_URL=http://...`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub upstream: UpstreamSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub retry: RetrySection,
}

/// [app] 段：服务名与监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "tutor".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// [upstream] 段：进度后端地址、请求超时、服务间认证 Key
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpstreamSection {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    /// 单次请求超时（秒）
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
    /// 服务间认证，随请求放入 X-API-Key 头；未设置则不发送
    pub api_key: Option<String>,
}

fn default_upstream_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

/// [llm] 段：后端端点与模型
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    /// OpenAI 兼容端点；未设置时用官方默认
    pub base_url: Option<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [session] 段：上下文窗口、完成标记、数据库路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// 发给 LLM 的历史消息上限（含 System 提示）
    pub max_context_turns: usize,
    /// AI 在掌握判定通过时输出的标记 Token，返回用户前剥离
    pub completion_marker: String,
    /// SQLite 数据库路径；未设置时用内存存储（仅用于本地试跑）
    pub db_path: Option<PathBuf>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_context_turns: 50,
            completion_marker: "{TOPIC_COMPLETED}".to_string(),
            db_path: Some(PathBuf::from("tutor.db")),
        }
    }
}

/// [retry] 段：上游调用的重试参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub growth: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 1,
            max_delay_secs: 60,
            growth: 2.0,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
            growth: self.growth,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            upstream: UpstreamSection::default(),
            llm: LlmSection::default(),
            session: SessionSection::default(),
            retry: RetrySection::default(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TUTOR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TUTOR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TUTOR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_section() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.growth, 2.0);
        assert_eq!(cfg.session.completion_marker, "{TOPIC_COMPLETED}");
        assert_eq!(cfg.session.max_context_turns, 50);
        assert_eq!(cfg.app.port, 8000);
    }
}
