//! 存储协作方接口
//!
//! 徽章/用户存储对引擎而言是外部协作方，通过这里的窄接口访问。
//! 接口对不同用户的并发调用必须安全；同一用户同一徽章的并发
//! `award_badge` 不得重复发放——实现方要么提供原子的
//! insert-if-absent，要么由引擎逐用户串行化（引擎两者都做，
//! 见 engine 模块）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use quest_shared::error::Result;

// ---------------------------------------------------------------------------
// 领域模型
// ---------------------------------------------------------------------------

/// 用户聚合状态
///
/// 条件评估需要的最小用户侧数据：等级、积分、各类完成计数。
/// 由生产方工作流在发出事件前更新到存储。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserState {
    pub user_id: String,
    pub level: i64,
    pub points: i64,
    pub missions_completed: u32,
    pub quizzes_completed: u32,
    pub modules_completed: u32,
    pub paths_completed: u32,
    pub completed_mission_ids: Vec<String>,
}

impl UserState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// 展开为评估上下文的字段集合
    ///
    /// 字段名与徽章目录中的条件字段一一对应。
    pub fn to_context_fields(&self) -> Value {
        serde_json::json!({
            "level": self.level,
            "points": self.points,
            "missions_completed": self.missions_completed,
            "quizzes_completed": self.quizzes_completed,
            "modules_completed": self.modules_completed,
            "paths_completed": self.paths_completed,
            "completed_mission_ids": self.completed_mission_ids,
        })
    }
}

/// 用户持有徽章的事实
///
/// `(user_id, badge_id)` 唯一——这是引擎必须维护的幂等不变式。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBadge {
    pub user_id: String,
    pub badge_id: String,
    pub earned_at: DateTime<Utc>,
    /// 发放上下文（触发事件的 id、类型等），自由格式
    pub context: Value,
}

// ---------------------------------------------------------------------------
// BadgeRepository trait
// ---------------------------------------------------------------------------

/// 徽章/用户存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BadgeRepository: Send + Sync {
    /// 用户是否已持有徽章
    async fn has_badge(&self, user_id: &str, badge_id: &str) -> Result<bool>;

    /// 发放徽章（原子 insert-if-absent）
    ///
    /// 返回 true 当且仅当本次调用完成了发放；已持有时返回 false
    /// 且不产生副作用。重复发放返回 false 是预期的幂等行为，不是错误。
    async fn award_badge(&self, user_id: &str, badge_id: &str, context: Value) -> Result<bool>;

    /// 读取用户聚合状态
    async fn get_user_state(&self, user_id: &str) -> Result<UserState>;

    /// 列出用户持有的全部徽章
    async fn list_user_badges(&self, user_id: &str) -> Result<Vec<UserBadge>>;
}

// ---------------------------------------------------------------------------
// MemoryBadgeRepository — 内存实现
// ---------------------------------------------------------------------------

/// 内存存储实现
///
/// 基于 DashMap，供测试和模拟器使用。`award_badge` 借助 DashMap 的
/// entry API 在分片锁内完成 insert-if-absent，满足接口的原子性要求。
#[derive(Debug, Default)]
pub struct MemoryBadgeRepository {
    states: DashMap<String, UserState>,
    /// key 为 "user_id/badge_id"
    badges: DashMap<String, UserBadge>,
}

impl MemoryBadgeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn badge_key(user_id: &str, badge_id: &str) -> String {
        format!("{user_id}/{badge_id}")
    }

    /// 写入用户状态（测试与模拟器的准备步骤）
    pub fn put_user_state(&self, state: UserState) {
        self.states.insert(state.user_id.clone(), state);
    }

    /// 按闭包原地修改用户状态，不存在时先创建默认状态
    pub fn update_user_state<F>(&self, user_id: &str, f: F)
    where
        F: FnOnce(&mut UserState),
    {
        let mut entry = self
            .states
            .entry(user_id.to_string())
            .or_insert_with(|| UserState::new(user_id));
        f(entry.value_mut());
    }

    /// 用户当前持有的徽章数
    pub fn badge_count(&self, user_id: &str) -> usize {
        let prefix = format!("{user_id}/");
        self.badges
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .count()
    }
}

#[async_trait]
impl BadgeRepository for MemoryBadgeRepository {
    async fn has_badge(&self, user_id: &str, badge_id: &str) -> Result<bool> {
        Ok(self.badges.contains_key(&Self::badge_key(user_id, badge_id)))
    }

    async fn award_badge(&self, user_id: &str, badge_id: &str, context: Value) -> Result<bool> {
        let key = Self::badge_key(user_id, badge_id);
        let mut inserted = false;
        // entry 在分片写锁内执行，同一 key 的并发调用只有一个会插入
        self.badges.entry(key).or_insert_with(|| {
            inserted = true;
            UserBadge {
                user_id: user_id.to_string(),
                badge_id: badge_id.to_string(),
                earned_at: Utc::now(),
                context,
            }
        });
        Ok(inserted)
    }

    async fn get_user_state(&self, user_id: &str) -> Result<UserState> {
        Ok(self
            .states
            .get(user_id)
            .map(|s| s.clone())
            .unwrap_or_else(|| UserState::new(user_id)))
    }

    async fn list_user_badges(&self, user_id: &str) -> Result<Vec<UserBadge>> {
        let prefix = format!("{user_id}/");
        Ok(self
            .badges
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_award_is_insert_if_absent() {
        let repo = MemoryBadgeRepository::new();

        let first = repo
            .award_badge("u1", "first_steps", serde_json::json!({}))
            .await
            .unwrap();
        assert!(first);

        let second = repo
            .award_badge("u1", "first_steps", serde_json::json!({}))
            .await
            .unwrap();
        assert!(!second);

        assert!(repo.has_badge("u1", "first_steps").await.unwrap());
        assert_eq!(repo.badge_count("u1"), 1);
    }

    #[tokio::test]
    async fn test_badges_are_scoped_per_user() {
        let repo = MemoryBadgeRepository::new();
        repo.award_badge("u1", "first_steps", serde_json::json!({}))
            .await
            .unwrap();

        assert!(!repo.has_badge("u2", "first_steps").await.unwrap());
        assert_eq!(repo.badge_count("u2"), 0);
        assert_eq!(repo.list_user_badges("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_user_state_defaults_when_absent() {
        let repo = MemoryBadgeRepository::new();
        let state = repo.get_user_state("unknown").await.unwrap();
        assert_eq!(state.user_id, "unknown");
        assert_eq!(state.level, 0);
        assert_eq!(state.missions_completed, 0);
    }

    #[tokio::test]
    async fn test_update_user_state() {
        let repo = MemoryBadgeRepository::new();
        repo.update_user_state("u1", |s| {
            s.level = 5;
            s.missions_completed = 1;
            s.completed_mission_ids.push("M1".to_string());
        });

        let state = repo.get_user_state("u1").await.unwrap();
        assert_eq!(state.level, 5);
        assert_eq!(state.missions_completed, 1);
        assert_eq!(state.completed_mission_ids, vec!["M1".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_awards_grant_once() {
        let repo = std::sync::Arc::new(MemoryBadgeRepository::new());

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let repo = std::sync::Arc::clone(&repo);
            tasks.push(tokio::spawn(async move {
                repo.award_badge("u1", "first_steps", serde_json::json!({}))
                    .await
                    .unwrap()
            }));
        }

        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 1);
        assert_eq!(repo.badge_count("u1"), 1);
    }

    #[test]
    fn test_user_state_context_fields() {
        let mut state = UserState::new("u1");
        state.level = 7;
        state.points = 1200;
        state.quizzes_completed = 3;

        let fields = state.to_context_fields();
        assert_eq!(fields["level"], 7);
        assert_eq!(fields["points"], 1200);
        assert_eq!(fields["quizzes_completed"], 3);
    }
}
