//! 进程内事件总线
//!
//! 将"发生了什么"（任务完成、升级）与"因此要做什么"（发徽章、更新统计）
//! 解耦。提供：
//! - 按事件类型的处理器订阅/退订
//! - 并发扇出投递，单个处理器失败或超时不影响其他处理器
//! - 有界内存审计日志
//! - 只读统计快照

pub mod bus;
pub mod handler;

pub use bus::{BusStats, EventBus, EventLogFilter};
pub use handler::EventHandler;
