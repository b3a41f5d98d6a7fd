//! 事件模型
//!
//! 定义奖励系统中所有事件的统一信封格式与事件类型分类。
//! 事件一经创建即不可变，生产方（任务、问卷、学习路径工作流）
//! 构造事件后交给事件总线广播，由订阅方各自消费。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EventType — 事件类型枚举
// ---------------------------------------------------------------------------

/// 事件类型枚举
///
/// 按业务域划分为两大类：进度类（完成了某个学习单元）和里程碑类
/// （积分、等级变化）。分类信息用于路由和观测，不参与徽章条件判断。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // 进度类事件 — 用户完成了某个学习单元
    MissionCompleted,
    QuizCompleted,
    ModuleCompleted,
    LearningPathCompleted,

    // 里程碑类事件 — 用户的累计状态发生跃迁
    PointsEarned,
    LevelUp,
}

impl EventType {
    /// 进度类事件由单次学习行为触发，是徽章发放最常见的触发源
    pub fn is_progress(&self) -> bool {
        matches!(
            self,
            Self::MissionCompleted
                | Self::QuizCompleted
                | Self::ModuleCompleted
                | Self::LearningPathCompleted
        )
    }

    /// 里程碑类事件对应累计状态的跃迁，频率低但通常触发多个徽章
    pub fn is_milestone(&self) -> bool {
        matches!(self, Self::PointsEarned | Self::LevelUp)
    }

    /// 所有事件类型，供引擎注册处理器时遍历
    pub fn all() -> [EventType; 6] {
        [
            Self::MissionCompleted,
            Self::QuizCompleted,
            Self::ModuleCompleted,
            Self::LearningPathCompleted,
            Self::PointsEarned,
            Self::LevelUp,
        ]
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 与 serde 的 SCREAMING_SNAKE_CASE 保持一致，
        // 便于在日志和审计记录中统一引用
        let s = match self {
            Self::MissionCompleted => "MISSION_COMPLETED",
            Self::QuizCompleted => "QUIZ_COMPLETED",
            Self::ModuleCompleted => "MODULE_COMPLETED",
            Self::LearningPathCompleted => "LEARNING_PATH_COMPLETED",
            Self::PointsEarned => "POINTS_EARNED",
            Self::LevelUp => "LEVEL_UP",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// GameEvent — 通用事件信封
// ---------------------------------------------------------------------------

/// 通用事件信封
///
/// 所有进入奖励核心的事件都包装在此信封中：
/// - `event_id`（UUID v7）时间有序，便于审计记录排序与去重排查
/// - `data` 字段以 JSON 承载不同事件类型的业务数据（missionId、score、
///   pointsEarned、oldLevel、newLevel 等），避免为每种事件定义独立结构
/// - `timestamp` 在构造时写入一次，之后不再变更
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    /// 事件唯一标识（UUID v7）
    pub event_id: String,
    /// 事件类型
    pub event_type: EventType,
    /// 触发事件的用户 ID
    pub user_id: String,
    /// 事件发生时间
    pub timestamp: DateTime<Utc>,
    /// 事件业务数据（JSON 对象，不同事件类型携带不同字段）
    pub data: serde_json::Value,
    /// 事件来源（如 mission-workflow、quiz-workflow）
    pub source: String,
    /// 追踪 ID，用于串联一次请求内的多个事件
    pub trace_id: Option<String>,
}

impl GameEvent {
    /// 构建新事件，自动生成 UUID v7 作为 event_id 并记录当前时间
    pub fn new(
        event_type: EventType,
        user_id: impl Into<String>,
        data: serde_json::Value,
        source: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7().to_string(),
            event_type,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            data,
            source: source.into(),
            trace_id: None,
        }
    }

    /// 将事件转换为规则评估上下文 JSON
    ///
    /// 徽章条件需要一个扁平化的 JSON 对象。此方法将信封元数据
    /// （event_type、user_id、timestamp）与业务 data 合并到同一层级，
    /// 使条件表达式可以直接引用 `score` 或 `newLevel` 等字段。
    pub fn to_evaluation_context(&self) -> serde_json::Value {
        let mut context = serde_json::json!({
            "event_id": self.event_id,
            "event_type": self.event_type,
            "user_id": self.user_id,
            "timestamp": self.timestamp.to_rfc3339(),
            "source": self.source,
        });

        // 将 data 中的字段展开到顶层，便于条件直接访问
        if let serde_json::Value::Object(data_map) = &self.data {
            if let serde_json::Value::Object(ref mut ctx_map) = context {
                for (key, value) in data_map {
                    ctx_map.insert(key.clone(), value.clone());
                }
            }
        }

        context
    }

    /// 校验信封的基本形状
    ///
    /// `emit` 入口对格式错误同步报错（用户 ID 为空的事件无法路由到任何
    /// 用户聚合状态），而处理器内部的失败则由总线逐个捕获。
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(crate::error::QuestError::MalformedEvent(
                "user_id 不能为空".to_string(),
            ));
        }
        if !self.data.is_object() && !self.data.is_null() {
            return Err(crate::error::QuestError::MalformedEvent(format!(
                "data 必须是 JSON 对象，实际为 {}",
                self.data
            )));
        }
        Ok(())
    }
}
