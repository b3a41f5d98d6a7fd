//! 事件处理器抽象

use async_trait::async_trait;
use quest_shared::error::Result;
use quest_shared::events::GameEvent;

/// 事件处理器
///
/// 订阅方实现此 trait 来响应某种类型的事件。处理器之间必须顺序无关：
/// 总线并发投递，不保证同一事件的多个处理器的执行先后。
///
/// `name` 用于退订和失败日志中的身份标识，同一事件类型下允许
/// 多个同名处理器（总线不做去重），但退订会移除所有同名注册。
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器标识，用于退订与日志
    fn name(&self) -> &str;

    /// 处理单个事件
    ///
    /// 返回 Err 不会影响同一事件的其他处理器，由总线记录日志并计数。
    async fn handle(&self, event: &GameEvent) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingHandler {
        calls: AtomicU64,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _event: &GameEvent) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handler_trait_object() {
        use quest_shared::events::EventType;

        let handler = CountingHandler {
            calls: AtomicU64::new(0),
        };
        let event = GameEvent::new(
            EventType::MissionCompleted,
            "user-001",
            serde_json::json!({"missionId": "M1"}),
            "test",
        );

        handler.handle(&event).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.name(), "counting");
    }
}
