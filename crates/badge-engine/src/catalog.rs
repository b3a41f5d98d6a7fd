//! 徽章目录
//!
//! 徽章的发放条件是声明式数据：每个徽章声明触发它的事件类型和
//! 一组 `字段 操作符 期望值` 条件，全部满足（AND）才发放。
//! 新增徽章只需扩充目录数据，不需要改动引擎代码。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use quest_shared::error::{QuestError, Result};
use quest_shared::events::EventType;

// ---------------------------------------------------------------------------
// Operator — 条件操作符
// ---------------------------------------------------------------------------

/// 条件操作符
///
/// 目录里实际用到的操作符子集。数值比较统一走 f64 避免整型/浮点
/// 比较失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Contains,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Contains => "contains",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Requirement / Badge
// ---------------------------------------------------------------------------

/// 单条发放条件
///
/// `field` 在合并后的评估上下文（用户聚合状态 + 事件字段）中查找，
/// 条件之间为 AND 关系。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Requirement {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// 徽章目录条目
///
/// 静态元数据 + 声明式发放条件。`triggers` 决定该徽章在哪些事件类型
/// 到达时参与评估——任务完成事件只会对引用任务完成的徽章做检查。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Badge {
    pub id: String,
    pub name: String,
    pub description: String,
    /// 触发评估的事件类型
    pub triggers: Vec<EventType>,
    /// 发放条件，全部满足才发放
    pub requirements: Vec<Requirement>,
}

impl Badge {
    /// 该徽章是否由指定事件类型触发
    pub fn triggered_by(&self, event_type: EventType) -> bool {
        self.triggers.contains(&event_type)
    }
}

/// 从 JSON 加载徽章目录
///
/// 未知操作符、缺字段等问题在加载时立刻失败，而不是评估时。
pub fn catalog_from_json(json: &str) -> Result<Vec<Badge>> {
    let badges: Vec<Badge> =
        serde_json::from_str(json).map_err(|e| QuestError::RequirementParse(e.to_string()))?;

    for badge in &badges {
        if badge.triggers.is_empty() {
            return Err(QuestError::RequirementParse(format!(
                "徽章 {} 没有声明触发事件类型",
                badge.id
            )));
        }
    }
    Ok(badges)
}

/// 内置默认目录
///
/// 覆盖学习平台的常见成就：首次任务、任务老手、测验高分、
/// 等级里程碑、积分收集、学习路径完成。
pub fn default_catalog() -> Vec<Badge> {
    vec![
        Badge {
            id: "first_steps".to_string(),
            name: "First Steps".to_string(),
            description: "完成第一个任务".to_string(),
            triggers: vec![EventType::MissionCompleted],
            requirements: vec![Requirement::new("missions_completed", Operator::Gte, 1)],
        },
        Badge {
            id: "mission_veteran".to_string(),
            name: "Mission Veteran".to_string(),
            description: "完成 10 个任务".to_string(),
            triggers: vec![EventType::MissionCompleted],
            requirements: vec![Requirement::new("missions_completed", Operator::Gte, 10)],
        },
        Badge {
            id: "quiz_ace".to_string(),
            name: "Quiz Ace".to_string(),
            description: "单次测验得分 90 以上".to_string(),
            triggers: vec![EventType::QuizCompleted],
            requirements: vec![Requirement::new("score", Operator::Gte, 90)],
        },
        Badge {
            id: "quiz_scholar".to_string(),
            name: "Quiz Scholar".to_string(),
            description: "完成 5 次测验".to_string(),
            triggers: vec![EventType::QuizCompleted],
            requirements: vec![Requirement::new("quizzes_completed", Operator::Gte, 5)],
        },
        Badge {
            id: "rising_star".to_string(),
            name: "Rising Star".to_string(),
            description: "达到 5 级".to_string(),
            triggers: vec![EventType::LevelUp],
            requirements: vec![Requirement::new("newLevel", Operator::Gte, 5)],
        },
        Badge {
            id: "achiever".to_string(),
            name: "Achiever".to_string(),
            description: "达到 10 级".to_string(),
            triggers: vec![EventType::LevelUp],
            requirements: vec![Requirement::new("newLevel", Operator::Gte, 10)],
        },
        Badge {
            id: "point_collector".to_string(),
            name: "Point Collector".to_string(),
            description: "累计获得 1000 积分".to_string(),
            triggers: vec![EventType::PointsEarned],
            requirements: vec![Requirement::new("points", Operator::Gte, 1000)],
        },
        Badge {
            id: "path_finisher".to_string(),
            name: "Path Finisher".to_string(),
            description: "完成第一条学习路径".to_string(),
            triggers: vec![EventType::LearningPathCompleted],
            requirements: vec![Requirement::new("paths_completed", Operator::Gte, 1)],
        },
        Badge {
            id: "module_marathon".to_string(),
            name: "Module Marathon".to_string(),
            description: "完成 20 个课程模块".to_string(),
            triggers: vec![EventType::ModuleCompleted],
            requirements: vec![Requirement::new("modules_completed", Operator::Gte, 20)],
        },
    ]
}
