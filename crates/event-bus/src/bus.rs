//! 事件总线本体
//!
//! 注册表读多写少（订阅基本发生在启动期），用读写锁保护；
//! 审计日志是有界双端队列，满后淘汰最旧记录。
//! `emit` 对每个处理器派生一个独立任务并发投递，全部结束后才返回，
//! 单个处理器的失败、超时或 panic 只记日志和计数，不向调用方传播。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use quest_shared::config::EventBusConfig;
use quest_shared::error::{QuestError, Result};
use quest_shared::events::{EventType, GameEvent};

use crate::handler::EventHandler;

// ---------------------------------------------------------------------------
// 统计与查询类型
// ---------------------------------------------------------------------------

/// 总线统计快照（只读，供观测使用，不用于控制决策）
#[derive(Debug, Clone, Serialize)]
pub struct BusStats {
    /// 历史事件总数（含已被审计日志淘汰的）
    pub total_events: u64,
    /// 处理器失败总数（Err、超时、panic 合计）
    pub handler_failures: u64,
    /// 按事件类型的事件计数
    pub events_by_type: HashMap<String, u64>,
    /// 按事件类型的当前处理器数量
    pub handlers_by_type: HashMap<String, usize>,
}

/// 审计日志查询过滤条件
#[derive(Debug, Clone, Default)]
pub struct EventLogFilter {
    pub event_type: Option<EventType>,
    pub user_id: Option<String>,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

struct Inner {
    handlers: RwLock<HashMap<EventType, Vec<Arc<dyn EventHandler>>>>,
    audit_log: Mutex<VecDeque<GameEvent>>,
    audit_capacity: usize,
    handler_timeout: Duration,
    total_events: AtomicU64,
    handler_failures: AtomicU64,
    events_by_type: DashMap<EventType, u64>,
}

/// 进程内事件总线
///
/// Clone 得到共享同一注册表和审计日志的轻量句柄。
/// 每个进程只构造一个实例，通过引用注入给生产方和引擎，
/// 不使用全局单例。
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl EventBus {
    /// 按配置创建事件总线
    pub fn new(config: &EventBusConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                audit_log: Mutex::new(VecDeque::with_capacity(config.audit_log_capacity)),
                audit_capacity: config.audit_log_capacity,
                handler_timeout: Duration::from_secs(config.handler_timeout_seconds),
                total_events: AtomicU64::new(0),
                handler_failures: AtomicU64::new(0),
                events_by_type: DashMap::new(),
            }),
        }
    }

    /// 注册处理器
    ///
    /// 同一事件类型允许多个处理器，也允许重复注册同名处理器——
    /// 总线不做静默去重。处理器名为空是配置错误，在订阅时立即失败。
    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) -> Result<()> {
        let name = handler.name().to_string();
        if name.trim().is_empty() {
            return Err(QuestError::InvalidHandler { name });
        }

        self.inner
            .handlers
            .write()
            .entry(event_type)
            .or_default()
            .push(handler);

        info!(event_type = %event_type, handler = %name, "处理器已订阅");
        Ok(())
    }

    /// 按名称退订处理器
    ///
    /// 移除该事件类型下所有同名注册，返回移除数量。
    /// 不存在时为空操作，不算错误。
    pub fn unsubscribe(&self, event_type: EventType, handler_name: &str) -> usize {
        let mut handlers = self.inner.handlers.write();
        let Some(list) = handlers.get_mut(&event_type) else {
            return 0;
        };

        let before = list.len();
        list.retain(|h| h.name() != handler_name);
        let removed = before - list.len();
        if removed > 0 {
            info!(event_type = %event_type, handler = handler_name, removed, "处理器已退订");
        }
        removed
    }

    /// 广播事件
    ///
    /// 流程：校验 -> 追加审计日志 -> 并发扇出 -> 等待全部处理器结束。
    /// 没有订阅者不是错误，记一条 warn 后正常返回。
    /// 处理器的失败不会让 emit 返回 Err——只有事件本身格式错误才同步报错。
    pub async fn emit(&self, event: GameEvent) -> Result<()> {
        event.validate()?;

        self.record(&event);

        // 快照处理器列表，投递期间的订阅变更对本次 emit 不可见
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let registry = self.inner.handlers.read();
            registry
                .get(&event.event_type)
                .map(|list| list.to_vec())
                .unwrap_or_default()
        };

        if handlers.is_empty() {
            warn!(
                event_type = %event.event_type,
                event_id = %event.event_id,
                "事件没有订阅者"
            );
            return Ok(());
        }

        debug!(
            event_type = %event.event_type,
            event_id = %event.event_id,
            handler_count = handlers.len(),
            "开始扇出投递"
        );

        let event = Arc::new(event);
        let timeout = self.inner.handler_timeout;

        let tasks: Vec<_> = handlers
            .into_iter()
            .map(|handler| {
                let event = Arc::clone(&event);
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let name = handler.name().to_string();
                    let outcome =
                        tokio::time::timeout(timeout, handler.handle(event.as_ref())).await;

                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                            error!(
                                handler = %name,
                                event_type = %event.event_type,
                                event_id = %event.event_id,
                                error = %e,
                                "处理器执行失败"
                            );
                        }
                        Err(_) => {
                            inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                            error!(
                                handler = %name,
                                event_type = %event.event_type,
                                event_id = %event.event_id,
                                timeout_seconds = timeout.as_secs(),
                                "处理器执行超时"
                            );
                        }
                    }
                })
            })
            .collect();

        // 等待全部处理器结束；panic 的处理器以 JoinError 形式出现
        for (i, result) in futures::future::join_all(tasks).await.into_iter().enumerate() {
            if let Err(e) = result {
                self.inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    handler_index = i,
                    event_type = %event.event_type,
                    event_id = %event.event_id,
                    error = %e,
                    "处理器任务 panic"
                );
            }
        }

        Ok(())
    }

    /// 追加审计日志并更新计数
    fn record(&self, event: &GameEvent) {
        let mut log = self.inner.audit_log.lock();
        log.push_back(event.clone());
        // FIFO 淘汰，保持容量上界
        while log.len() > self.inner.audit_capacity {
            log.pop_front();
        }
        drop(log);

        self.inner.total_events.fetch_add(1, Ordering::Relaxed);
        *self
            .inner
            .events_by_type
            .entry(event.event_type)
            .or_insert(0) += 1;
    }

    /// 查询审计日志
    ///
    /// 返回匹配过滤条件的最近 `limit` 条记录，按广播顺序排列。
    pub fn event_log(&self, filter: &EventLogFilter, limit: usize) -> Vec<GameEvent> {
        let log = self.inner.audit_log.lock();
        let matched: Vec<&GameEvent> = log
            .iter()
            .filter(|e| {
                filter
                    .event_type
                    .map(|t| e.event_type == t)
                    .unwrap_or(true)
                    && filter
                        .user_id
                        .as_deref()
                        .map(|u| e.user_id == u)
                        .unwrap_or(true)
            })
            .collect();

        let skip = matched.len().saturating_sub(limit);
        matched.into_iter().skip(skip).cloned().collect()
    }

    /// 统计快照
    pub fn stats(&self) -> BusStats {
        let events_by_type = self
            .inner
            .events_by_type
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect();

        let handlers_by_type = self
            .inner
            .handlers
            .read()
            .iter()
            .map(|(event_type, list)| (event_type.to_string(), list.len()))
            .collect();

        BusStats {
            total_events: self.inner.total_events.load(Ordering::Relaxed),
            handler_failures: self.inner.handler_failures.load(Ordering::Relaxed),
            events_by_type,
            handlers_by_type,
        }
    }
}
