//! 事件模拟器
//!
//! 奖励核心的演示与手工验证工具：扮演生产方工作流，在进程内
//! 搭起缓存 + 总线 + 内存存储 + 引擎的完整链路，按脚本化场景
//! 推进用户状态并广播事件，最后输出各组件的统计快照。

pub mod producer;
pub mod scenario;
