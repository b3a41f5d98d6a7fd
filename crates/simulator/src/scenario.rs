//! 场景定义和执行器
//!
//! 场景是一组按顺序执行的步骤，用于模拟真实用户的学习流程。
//! 步骤是数据，支持 JSON 序列化，便于从文件加载自定义场景。

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::info;

use event_bus::EventBus;
use badge_engine::MemoryBadgeRepository;
use quest_shared::error::Result;
use quest_shared::events::{EventType, GameEvent};

use crate::producer::apply_event_to_state;

// ---------------------------------------------------------------------------
// 场景定义
// ---------------------------------------------------------------------------

/// 场景步骤
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// 推进用户状态并广播一个事件
    Emit {
        event_type: EventType,
        data: serde_json::Value,
    },
    /// 暂停指定毫秒，模拟事件之间的真实间隔
    Sleep { millis: u64 },
}

/// 场景定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// 场景名称，用于日志和结果报告中标识
    pub name: String,
    /// 场景描述，说明模拟的学习流程
    pub description: String,
    /// 场景作用的用户 ID
    pub user_id: String,
    /// 按顺序执行的步骤
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// 从 JSON 字符串解析场景
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// 执行场景
    ///
    /// 每个 Emit 步骤先推进内存存储里的用户状态（扮演生产方工作流），
    /// 再把事件交给总线广播。
    pub async fn play(&self, bus: &EventBus, repo: &MemoryBadgeRepository) -> Result<()> {
        info!(scenario = %self.name, user_id = %self.user_id, steps = self.steps.len(), "开始执行场景");

        for (i, step) in self.steps.iter().enumerate() {
            match step {
                ScenarioStep::Emit { event_type, data } => {
                    let event = GameEvent::new(
                        *event_type,
                        self.user_id.clone(),
                        data.clone(),
                        "simulator",
                    );
                    apply_event_to_state(repo, &event);
                    bus.emit(event).await?;
                }
                ScenarioStep::Sleep { millis } => {
                    sleep(Duration::from_millis(*millis)).await;
                }
            }
            info!(scenario = %self.name, step = i + 1, total = self.steps.len(), "步骤完成");
        }

        info!(scenario = %self.name, "场景执行完毕");
        Ok(())
    }
}

/// 预定义场景
///
/// `new-learner`：新用户完成第一个任务、考出高分测验、攒满积分、
/// 升到 5 级并完成一条学习路径，途中应触发多枚徽章。
pub fn predefined(name: &str) -> Option<Scenario> {
    match name {
        "new-learner" => Some(Scenario {
            name: "new-learner".to_string(),
            description: "新用户的完整学习首周流程".to_string(),
            user_id: "learner-001".to_string(),
            steps: vec![
                ScenarioStep::Emit {
                    event_type: EventType::MissionCompleted,
                    data: serde_json::json!({"missionId": "M1", "score": 85}),
                },
                ScenarioStep::Sleep { millis: 50 },
                ScenarioStep::Emit {
                    event_type: EventType::QuizCompleted,
                    data: serde_json::json!({"quizId": "Q1", "score": 92}),
                },
                // 里程碑事件随载荷携带最新累计值（与 LevelUp 携带 newLevel 同理），
                // 条件评估不依赖缓存状态的新鲜度
                ScenarioStep::Emit {
                    event_type: EventType::PointsEarned,
                    data: serde_json::json!({"pointsEarned": 500, "points": 500}),
                },
                ScenarioStep::Emit {
                    event_type: EventType::PointsEarned,
                    data: serde_json::json!({"pointsEarned": 600, "points": 1100}),
                },
                ScenarioStep::Sleep { millis: 50 },
                ScenarioStep::Emit {
                    event_type: EventType::LevelUp,
                    data: serde_json::json!({"oldLevel": 4, "newLevel": 5}),
                },
                ScenarioStep::Emit {
                    event_type: EventType::LearningPathCompleted,
                    data: serde_json::json!({"pathId": "rust-fundamentals"}),
                },
            ],
        }),
        _ => None,
    }
}
