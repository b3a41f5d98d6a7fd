//! 徽章规则引擎
//!
//! 事件总线的一个订阅方：消费事件，对徽章目录中的声明式发放条件
//! 逐条评估，并对每个满足条件的徽章执行幂等发放。提供：
//! - 数据化的徽章目录（条件是数据不是代码）
//! - 条件评估器（字段 + 操作符 + 期望值）
//! - 面向存储协作方的窄仓库接口与内存实现
//! - 逐用户串行化的 check-then-act 发放原语

pub mod catalog;
pub mod engine;
pub mod evaluator;
pub mod repository;

pub use catalog::{default_catalog, Badge, Operator, Requirement};
pub use engine::{BadgeRuleEngine, EngineStats};
pub use evaluator::ConditionEvaluator;
pub use repository::{BadgeRepository, MemoryBadgeRepository, UserBadge, UserState};
