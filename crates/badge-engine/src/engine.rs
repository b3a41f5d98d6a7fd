//! 徽章规则引擎
//!
//! 事件到达 -> 加载用户聚合状态（经缓存）-> 对目录中由该事件类型
//! 触发的每个徽章评估条件 -> 对满足条件的徽章执行幂等发放。
//!
//! 幂等边界在存储协作方：引擎自身不持久化任何状态，同一事件可能被
//! 重放（调用方重试）或两个等价事件被并发处理，判定"是否已发放"
//! 永远以存储为准。check-then-act 序列额外用逐用户互斥锁串行化，
//! 杜绝两个并发检查同时看到"未持有"的竞态。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use event_bus::{EventBus, EventHandler};
use quest_shared::cache::{CacheKey, TtlCache};
use quest_shared::config::EngineConfig;
use quest_shared::error::Result;
use quest_shared::events::{EventType, GameEvent};

use crate::catalog::Badge;
use crate::evaluator::ConditionEvaluator;
use crate::repository::{BadgeRepository, UserState};

// ---------------------------------------------------------------------------
// 统计
// ---------------------------------------------------------------------------

/// 引擎统计快照
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// 累计发放总数
    pub total_awards: u64,
    /// 按徽章 id 的发放计数
    pub awards_by_badge: HashMap<String, u64>,
    /// 评估失败计数（单徽章条件错误，不中断其余评估）
    pub evaluation_failures: u64,
}

// ---------------------------------------------------------------------------
// BadgeRuleEngine
// ---------------------------------------------------------------------------

/// 徽章规则引擎
pub struct BadgeRuleEngine {
    repository: Arc<dyn BadgeRepository>,
    cache: TtlCache<UserState>,
    catalog: Vec<Badge>,
    user_state_ttl: Duration,
    /// 逐用户发放锁，串行化 check-then-act
    user_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    total_awards: AtomicU64,
    awards_by_badge: DashMap<String, u64>,
    evaluation_failures: AtomicU64,
}

impl BadgeRuleEngine {
    pub fn new(
        repository: Arc<dyn BadgeRepository>,
        cache: TtlCache<UserState>,
        catalog: Vec<Badge>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            repository,
            cache,
            catalog,
            user_state_ttl: Duration::from_secs(config.user_state_ttl_seconds),
            user_locks: DashMap::new(),
            total_awards: AtomicU64::new(0),
            awards_by_badge: DashMap::new(),
            evaluation_failures: AtomicU64::new(0),
        }
    }

    /// 向事件总线注册处理器
    ///
    /// 对目录中出现过的每种触发事件类型各注册一个处理器，
    /// 处理器委托给 `evaluate_event`。
    pub fn register_handlers(engine: &Arc<Self>, bus: &EventBus) -> Result<()> {
        let mut trigger_types: Vec<EventType> = Vec::new();
        for badge in &engine.catalog {
            for event_type in &badge.triggers {
                if !trigger_types.contains(event_type) {
                    trigger_types.push(*event_type);
                }
            }
        }

        for event_type in trigger_types {
            bus.subscribe(
                event_type,
                Arc::new(EngineHandler {
                    engine: Arc::clone(engine),
                    name: format!("badge-engine:{event_type}"),
                }),
            )?;
        }

        info!(badges = engine.catalog.len(), "徽章引擎处理器已注册");
        Ok(())
    }

    /// 评估单个事件
    ///
    /// 单个徽章的条件错误只记日志和计数，继续评估其余徽章；
    /// 用户状态整体加载失败才让本次处理以 Err 结束（由总线容忍）。
    pub async fn evaluate_event(&self, event: &GameEvent) -> Result<()> {
        let state = self.load_user_state(&event.user_id).await?;
        let context = Self::build_context(&state, event);

        for badge in self
            .catalog
            .iter()
            .filter(|b| b.triggered_by(event.event_type))
        {
            match self.badge_satisfied(badge, &context) {
                Ok(false) => {}
                Ok(true) => {
                    // 满足条件，走幂等发放；发放失败同样不阻断其余徽章
                    if let Err(e) = self.try_award(&event.user_id, badge, event).await {
                        self.evaluation_failures.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            badge_id = %badge.id,
                            user_id = %event.user_id,
                            error = %e,
                            "徽章发放失败，继续评估其余徽章"
                        );
                    }
                }
                Err(e) => {
                    self.evaluation_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        badge_id = %badge.id,
                        event_id = %event.event_id,
                        error = %e,
                        "徽章条件评估失败，本轮按不满足处理"
                    );
                }
            }
        }

        Ok(())
    }

    /// 经缓存加载用户聚合状态
    async fn load_user_state(&self, user_id: &str) -> Result<UserState> {
        let key = CacheKey::user_state(user_id);
        let repository = Arc::clone(&self.repository);
        let user_id = user_id.to_string();
        self.cache
            .get_or_fetch(&key, self.user_state_ttl, || async move {
                repository.get_user_state(&user_id).await
            })
            .await
    }

    /// 合并用户状态与事件字段为评估上下文
    ///
    /// 事件字段覆盖同名状态字段——事件携带的是触发时刻的最新事实。
    fn build_context(state: &UserState, event: &GameEvent) -> Value {
        let mut context = state.to_context_fields();
        let event_fields = event.to_evaluation_context();

        if let (Value::Object(ctx_map), Value::Object(event_map)) =
            (&mut context, event_fields)
        {
            for (key, value) in event_map {
                ctx_map.insert(key, value);
            }
        }

        context
    }

    /// 全部条件是否满足（AND）
    fn badge_satisfied(&self, badge: &Badge, context: &Value) -> Result<bool> {
        for requirement in &badge.requirements {
            let field_value = context.get(&requirement.field);
            let matched = ConditionEvaluator::evaluate(
                field_value,
                requirement.operator,
                &requirement.value,
            )?;
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// 幂等发放原语
    ///
    /// 逐用户互斥锁内执行 has_badge -> award_badge，以存储为唯一
    /// 去重依据。返回 true 当且仅当本次调用完成了发放。
    async fn try_award(&self, user_id: &str, badge: &Badge, event: &GameEvent) -> Result<bool> {
        let lock = self
            .user_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if self.repository.has_badge(user_id, &badge.id).await? {
            debug!(user_id, badge_id = %badge.id, "徽章已持有，跳过");
            return Ok(false);
        }

        let context = serde_json::json!({
            "event_id": event.event_id,
            "event_type": event.event_type,
            "source": event.source,
        });

        let granted = self
            .repository
            .award_badge(user_id, &badge.id, context)
            .await?;

        if granted {
            self.total_awards.fetch_add(1, Ordering::Relaxed);
            *self
                .awards_by_badge
                .entry(badge.id.clone())
                .or_insert(0) += 1;
            // 用户相关缓存全部失效，下次评估读到发放后的新状态
            self.cache.invalidate_pattern(user_id);

            info!(
                user_id,
                badge_id = %badge.id,
                badge_name = %badge.name,
                event_id = %event.event_id,
                "徽章已发放"
            );
        }

        Ok(granted)
    }

    /// 统计快照
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            total_awards: self.total_awards.load(Ordering::Relaxed),
            awards_by_badge: self
                .awards_by_badge
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            evaluation_failures: self.evaluation_failures.load(Ordering::Relaxed),
        }
    }

    /// 引擎持有的徽章目录
    pub fn catalog(&self) -> &[Badge] {
        &self.catalog
    }
}

/// 引擎在总线上的订阅体，每种触发事件类型一个
struct EngineHandler {
    engine: Arc<BadgeRuleEngine>,
    name: String,
}

#[async_trait]
impl EventHandler for EngineHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &GameEvent) -> Result<()> {
        self.engine.evaluate_event(event).await
    }
}
