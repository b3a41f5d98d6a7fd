//! 事件总线集成测试
//!
//! 覆盖扇出独立性、无订阅者容忍、审计日志上界和处理器超时兜底。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use event_bus::{EventBus, EventHandler, EventLogFilter};
use quest_shared::config::EventBusConfig;
use quest_shared::error::{QuestError, Result};
use quest_shared::events::{EventType, GameEvent};

fn mission_event(user_id: &str) -> GameEvent {
    GameEvent::new(
        EventType::MissionCompleted,
        user_id,
        serde_json::json!({"missionId": "M1", "score": 85}),
        "test",
    )
}

struct SucceedingHandler {
    calls: Arc<AtomicU64>,
}

#[async_trait]
impl EventHandler for SucceedingHandler {
    fn name(&self) -> &str {
        "succeeding"
    }

    async fn handle(&self, _event: &GameEvent) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingHandler;

#[async_trait]
impl EventHandler for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _event: &GameEvent) -> Result<()> {
        Err(QuestError::Internal("注入的失败".to_string()))
    }
}

struct PanickingHandler;

#[async_trait]
impl EventHandler for PanickingHandler {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn handle(&self, _event: &GameEvent) -> Result<()> {
        panic!("注入的 panic");
    }
}

struct WedgedHandler;

#[async_trait]
impl EventHandler for WedgedHandler {
    fn name(&self) -> &str {
        "wedged"
    }

    async fn handle(&self, _event: &GameEvent) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// 扇出独立性：一个处理器抛错，emit 正常完成且另一个处理器的副作用可观察
#[tokio::test]
async fn failing_handler_does_not_block_siblings() {
    let bus = EventBus::new(&EventBusConfig::default());
    let calls = Arc::new(AtomicU64::new(0));

    bus.subscribe(EventType::MissionCompleted, Arc::new(FailingHandler))
        .unwrap();
    bus.subscribe(
        EventType::MissionCompleted,
        Arc::new(SucceedingHandler {
            calls: Arc::clone(&calls),
        }),
    )
    .unwrap();

    bus.emit(mission_event("user-001")).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(bus.stats().handler_failures, 1);
}

/// panic 的处理器同样只计入失败，不影响兄弟处理器
#[tokio::test]
async fn panicking_handler_does_not_block_siblings() {
    let bus = EventBus::new(&EventBusConfig::default());
    let calls = Arc::new(AtomicU64::new(0));

    bus.subscribe(EventType::MissionCompleted, Arc::new(PanickingHandler))
        .unwrap();
    bus.subscribe(
        EventType::MissionCompleted,
        Arc::new(SucceedingHandler {
            calls: Arc::clone(&calls),
        }),
    )
    .unwrap();

    bus.emit(mission_event("user-001")).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(bus.stats().handler_failures, 1);
}

/// 无订阅者容忍：emit 正常完成且恰好追加一条审计记录
#[tokio::test]
async fn emit_without_subscribers_records_audit_entry() {
    let bus = EventBus::new(&EventBusConfig::default());

    bus.emit(mission_event("user-001")).await.unwrap();

    let log = bus.event_log(&EventLogFilter::default(), 100);
    assert_eq!(log.len(), 1);
    assert_eq!(bus.stats().total_events, 1);
}

/// 审计日志上界：1500 条事件、容量 1000，只保留最近 1000 条
#[tokio::test]
async fn audit_log_is_bounded_fifo() {
    let bus = EventBus::new(&EventBusConfig {
        audit_log_capacity: 1000,
        handler_timeout_seconds: 5,
    });

    for i in 0..1500 {
        let event = GameEvent::new(
            EventType::PointsEarned,
            format!("user-{i}"),
            serde_json::json!({"pointsEarned": 10}),
            "test",
        );
        bus.emit(event).await.unwrap();
    }

    let log = bus.event_log(&EventLogFilter::default(), 2000);
    assert_eq!(log.len(), 1000);
    // 最旧的 500 条已淘汰，日志从 user-500 开始
    assert_eq!(log[0].user_id, "user-500");
    assert_eq!(log[999].user_id, "user-1499");
    // 总计数不受淘汰影响
    assert_eq!(bus.stats().total_events, 1500);
}

/// 超时兜底：卡死的处理器在超时后按失败记录，快速处理器不受影响
#[tokio::test]
async fn wedged_handler_is_bounded_by_timeout() {
    let bus = EventBus::new(&EventBusConfig {
        audit_log_capacity: 100,
        handler_timeout_seconds: 1,
    });
    let calls = Arc::new(AtomicU64::new(0));

    bus.subscribe(EventType::MissionCompleted, Arc::new(WedgedHandler))
        .unwrap();
    bus.subscribe(
        EventType::MissionCompleted,
        Arc::new(SucceedingHandler {
            calls: Arc::clone(&calls),
        }),
    )
    .unwrap();

    let start = std::time::Instant::now();
    bus.emit(mission_event("user-001")).await.unwrap();

    // emit 在超时界内返回，而不是等一小时
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(bus.stats().handler_failures, 1);
}

/// 并发 emit：多个调用方交错广播，总数与每类型计数一致
#[tokio::test]
async fn concurrent_emits_are_all_recorded() {
    let bus = EventBus::new(&EventBusConfig {
        audit_log_capacity: 500,
        handler_timeout_seconds: 5,
    });
    let calls = Arc::new(AtomicU64::new(0));
    bus.subscribe(
        EventType::MissionCompleted,
        Arc::new(SucceedingHandler {
            calls: Arc::clone(&calls),
        }),
    )
    .unwrap();

    let mut tasks = Vec::new();
    for i in 0..50 {
        let bus = bus.clone();
        tasks.push(tokio::spawn(async move {
            bus.emit(mission_event(&format!("user-{i}"))).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 50);
    let stats = bus.stats();
    assert_eq!(stats.total_events, 50);
    assert_eq!(stats.events_by_type["MISSION_COMPLETED"], 50);
}
