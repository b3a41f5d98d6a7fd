//! 可观测性初始化
//!
//! 提供 tracing 日志的初始化。核心是进程内组件，不做跨进程追踪导出，
//! 各组件的统计快照（总线、缓存、引擎）已覆盖运行时观测需求。

use anyhow::Result;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::ObservabilityConfig;

/// 初始化 tracing 日志
///
/// 环境变量 RUST_LOG 优先于配置文件中的 log_level。
/// 重复初始化返回错误由调用方忽略，便于测试中多次调用。
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if config.log_format == "json" {
        fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer().with_target(true).with_ansi(true).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_reentrant_safe() {
        let config = ObservabilityConfig::default();
        // 第一次初始化可能成功也可能因测试并行已被占用；
        // 第二次必然失败，但不应 panic
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
