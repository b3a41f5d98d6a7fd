//! 生产方工作流模拟
//!
//! 真实系统里，任务/问卷/学习路径的工作流会先把业务结果写入存储，
//! 再构造事件交给总线。这里复刻该顺序：每个事件广播前，
//! 按事件语义推进内存存储里的用户聚合状态。

use badge_engine::MemoryBadgeRepository;
use quest_shared::events::{EventType, GameEvent};
use tracing::debug;

/// 按事件语义推进用户状态
///
/// 与真实工作流一致：状态先落库，事件随后广播。
pub fn apply_event_to_state(repo: &MemoryBadgeRepository, event: &GameEvent) {
    let data = &event.data;
    repo.update_user_state(&event.user_id, |state| match event.event_type {
        EventType::MissionCompleted => {
            state.missions_completed += 1;
            if let Some(mission_id) = data.get("missionId").and_then(|v| v.as_str()) {
                state.completed_mission_ids.push(mission_id.to_string());
            }
        }
        EventType::QuizCompleted => {
            state.quizzes_completed += 1;
        }
        EventType::ModuleCompleted => {
            state.modules_completed += 1;
        }
        EventType::LearningPathCompleted => {
            state.paths_completed += 1;
        }
        EventType::PointsEarned => {
            if let Some(points) = data.get("pointsEarned").and_then(|v| v.as_i64()) {
                state.points += points;
            }
        }
        EventType::LevelUp => {
            if let Some(level) = data.get("newLevel").and_then(|v| v.as_i64()) {
                state.level = level;
            }
        }
    });

    debug!(
        user_id = %event.user_id,
        event_type = %event.event_type,
        "用户状态已按事件推进"
    );
}
