//! 配置管理模块
//!
//! 支持多格式配置文件加载、环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// 事件总线配置
#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    /// 审计日志容量，超出后淘汰最旧记录
    pub audit_log_capacity: usize,
    /// 单个处理器的最长执行时间（秒），超时按失败记录但不影响其他处理器
    pub handler_timeout_seconds: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            audit_log_capacity: 1000,
            handler_timeout_seconds: 30,
        }
    }
}

/// 缓存配置
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// 默认条目 TTL（秒）
    pub default_ttl_seconds: u64,
    /// 后台清扫周期（秒），独立于任何条目自身的 TTL
    pub cleanup_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
            cleanup_interval_seconds: 60,
        }
    }
}

/// 规则引擎配置
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// 用户聚合状态的缓存 TTL（秒）
    ///
    /// 同一用户的多个事件短时间内到达时复用缓存状态，
    /// 避免每次评估都访问存储协作方。
    pub user_state_ttl_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_state_ttl_seconds: 30,
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub event_bus: EventBusConfig,
    pub cache: CacheConfig,
    pub engine: EngineConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. 环境变量（QUEST_ 前缀，如 QUEST_CACHE__DEFAULT_TTL_SECONDS）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("QUEST_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            // 加载默认配置文件
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            // 加载环境特定配置
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{env}.toml"))).required(false),
            )
            // 环境变量覆盖（QUEST_EVENT_BUS__AUDIT_LOG_CAPACITY -> event_bus.audit_log_capacity）
            .add_source(
                Environment::with_prefix("QUEST")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
