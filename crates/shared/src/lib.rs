//! 共享库
//!
//! 包含奖励核心各组件共用的错误处理、配置、事件模型、
//! TTL 缓存和可观测性初始化代码。

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
