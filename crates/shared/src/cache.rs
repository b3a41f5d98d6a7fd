//! 进程内 TTL 缓存
//!
//! 提供带逐条过期时间的内存键值缓存，供规则引擎和读密集查询
//! 避免每次评估都访问存储协作方。包含惰性过期（读到过期条目时
//! 顺手删除）和周期性后台清扫两种回收机制。
//!
//! 并发纪律：底层 map 的全部读写都经过同一把读写锁，任何处理器
//! 并发访问都不会看到撕裂的条目。统计计数用原子变量，读取统计
//! 不需要拿 map 锁。

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::Result;

// ---------------------------------------------------------------------------
// CacheEntry — 缓存条目
// ---------------------------------------------------------------------------

/// 缓存条目
///
/// 不变式：`now > created_at + ttl` 的条目逻辑上已不存在，
/// 即使物理上还留在 map 里等待下一次清扫。
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// 条目信息快照（只读，供观测接口使用）
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub key: String,
    pub age_seconds: f64,
    pub ttl_seconds: f64,
    pub expired: bool,
}

/// 缓存统计快照
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub entries: usize,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
}

// ---------------------------------------------------------------------------
// TtlCache — 缓存本体
// ---------------------------------------------------------------------------

/// 后台清扫协程的控制句柄
struct CleanupWorker {
    shutdown_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

struct Inner<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    counters: Counters,
    default_ttl: Duration,
    cleanup_interval: Duration,
    worker: tokio::sync::Mutex<Option<CleanupWorker>>,
}

/// 进程内 TTL 缓存
///
/// Clone 得到共享同一底层存储的轻量句柄，可以随意跨任务传递。
pub struct TtlCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    /// 按配置创建缓存
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                counters: Counters::default(),
                default_ttl: Duration::from_secs(config.default_ttl_seconds),
                cleanup_interval: Duration::from_secs(config.cleanup_interval_seconds),
                worker: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// 获取值
    ///
    /// 未设置过和已过期都返回 None。读到过期条目时立即删除
    /// （惰性过期），不等周期清扫。
    pub fn get(&self, key: &str) -> Option<V> {
        let expired = {
            let entries = self.inner.entries.read();
            match entries.get(key) {
                None => {
                    self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Some(entry) if entry.is_expired() => true,
                Some(entry) => {
                    self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
            }
        };

        // 过期条目需要升级为写锁删除；重新检查防止并发 set 刚刷新的条目被误删
        if expired {
            let mut entries = self.inner.entries.write();
            if let Some(entry) = entries.get(key) {
                if entry.is_expired() {
                    entries.remove(key);
                    self.inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// 设置值（使用默认 TTL）
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.inner.default_ttl);
    }

    /// 设置值并指定 TTL，无条件覆盖并重置条目年龄
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            ttl,
        };
        self.inner.entries.write().insert(key.into(), entry);
        self.inner.counters.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// 删除值，返回删除前是否存在
    pub fn delete(&self, key: &str) -> bool {
        self.inner.entries.write().remove(key).is_some()
    }

    /// 按子串批量失效
    ///
    /// 删除所有 key 包含 `substring` 的条目，返回删除数量。
    /// 用于一次性失效某用户关联的全部缓存键，调用方无需知道派生键名。
    pub fn invalidate_pattern(&self, substring: &str) -> usize {
        let mut entries = self.inner.entries.write();
        let before = entries.len();
        entries.retain(|key, _| !key.contains(substring));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(pattern = substring, removed, "缓存按模式失效");
        }
        removed
    }

    /// 获取或加载
    ///
    /// 命中则直接返回；未命中时调用 `fetch_fn` 加载，按给定 TTL 写入
    /// 后返回。同一 key 的并发未命中可能各自触发一次加载——这是有意的
    /// 简化，本缓存不提供击穿保护。
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, ttl: Duration, fetch_fn: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        // 加载期间不持有任何锁
        let value = fetch_fn().await?;
        self.set_with_ttl(key, value.clone(), ttl);
        Ok(value)
    }

    /// 统计快照
    pub fn stats(&self) -> CacheStats {
        let hits = self.inner.counters.hits.load(Ordering::Relaxed);
        let misses = self.inner.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            sets: self.inner.counters.sets.load(Ordering::Relaxed),
            evictions: self.inner.counters.evictions.load(Ordering::Relaxed),
            entries: self.inner.entries.read().len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// 单个条目的只读信息，供观测排查使用
    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        let entries = self.inner.entries.read();
        entries.get(key).map(|entry| EntryInfo {
            key: key.to_string(),
            age_seconds: entry.created_at.elapsed().as_secs_f64(),
            ttl_seconds: entry.ttl.as_secs_f64(),
            expired: entry.is_expired(),
        })
    }

    /// 立即清扫一轮过期条目，返回回收数量
    ///
    /// 周期清扫协程每个周期调用一次；测试中也可直接调用以免等待定时器。
    pub fn sweep_expired(&self) -> usize {
        let mut entries = self.inner.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let removed = before - entries.len();
        if removed > 0 {
            self.inner
                .counters
                .evictions
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// 启动后台清扫协程（幂等）
    ///
    /// 已在运行时重复调用不会产生第二个协程。清扫周期独立于任何
    /// 条目自身的 TTL，是粗粒度扫描而非逐条定时器。
    pub async fn start_cleanup_worker(&self) {
        let mut worker = self.inner.worker.lock().await;
        if worker.is_some() {
            warn!("清扫协程已在运行，忽略重复启动");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cache = self.clone();
        let interval = self.inner.cleanup_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一个 tick 立即到期，跳过以免启动即清扫
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired();
                        if removed > 0 {
                            debug!(removed, "周期清扫回收过期条目");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("清扫协程收到停止信号，退出");
                        break;
                    }
                }
            }
        });

        *worker = Some(CleanupWorker {
            shutdown_tx,
            handle,
        });
        info!(interval_seconds = interval.as_secs(), "清扫协程已启动");
    }

    /// 停止后台清扫协程（幂等），等待协程真正退出后返回
    pub async fn stop_cleanup_worker(&self) {
        let worker = self.inner.worker.lock().await.take();
        if let Some(CleanupWorker {
            shutdown_tx,
            handle,
        }) = worker
        {
            let _ = shutdown_tx.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "清扫协程异常退出");
            }
        }
    }
}

/// 缓存键生成器
///
/// 集中定义派生键的命名规则，保证 `invalidate_pattern(user_id)`
/// 能覆盖同一用户的全部键。
pub struct CacheKey;

impl CacheKey {
    pub fn user_state(user_id: &str) -> String {
        format!("user_state:{user_id}")
    }

    pub fn user_badges(user_id: &str) -> String {
        format!("user_badges:{user_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuestError;

    fn test_cache() -> TtlCache<String> {
        TtlCache::new(&CacheConfig {
            default_ttl_seconds: 300,
            cleanup_interval_seconds: 1,
        })
    }

    #[test]
    fn test_cache_key_generation() {
        assert_eq!(CacheKey::user_state("42"), "user_state:42");
        assert_eq!(CacheKey::user_badges("42"), "user_badges:42");
    }

    #[test]
    fn test_set_get_delete() {
        let cache = test_cache();
        cache.set("k1", "v1".to_string());
        assert_eq!(cache.get("k1"), Some("v1".to_string()));

        assert!(cache.delete("k1"));
        assert!(!cache.delete("k1"));
        assert_eq!(cache.get("k1"), None);
    }

    #[test]
    fn test_set_resets_entry_age() {
        let cache = test_cache();
        cache.set_with_ttl("k1", "v1".to_string(), Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(30));
        // 覆盖写重置年龄，再过 30ms 仍然存活
        cache.set_with_ttl("k1", "v2".to_string(), Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("k1"), Some("v2".to_string()));
    }

    #[test]
    fn test_expired_entry_is_lazily_evicted() {
        let cache = test_cache();
        cache.set_with_ttl("k1", "v1".to_string(), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.get("k1"), None);
        // 惰性回收应体现在 evictions 计数上，且条目已物理删除
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 0);
    }

    #[test]
    fn test_invalidate_pattern() {
        let cache = test_cache();
        cache.set(CacheKey::user_state("42"), "a".to_string());
        cache.set(CacheKey::user_badges("42"), "b".to_string());
        cache.set(CacheKey::user_state("7"), "c".to_string());

        let removed = cache.invalidate_pattern("42");
        assert_eq!(removed, 2);
        assert_eq!(cache.get(&CacheKey::user_state("42")), None);
        assert_eq!(cache.get(&CacheKey::user_badges("42")), None);
        // 无关键不受影响
        assert_eq!(cache.get(&CacheKey::user_state("7")), Some("c".to_string()));
    }

    #[test]
    fn test_sweep_expired() {
        let cache = test_cache();
        cache.set_with_ttl("dead1", "x".to_string(), Duration::from_millis(1));
        cache.set_with_ttl("dead2", "x".to_string(), Duration::from_millis(1));
        cache.set("alive", "x".to_string());
        std::thread::sleep(Duration::from_millis(20));

        let removed = cache.sweep_expired();
        assert_eq!(removed, 2);
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.stats().evictions, 2);
    }

    #[test]
    fn test_stats_hit_rate() {
        let cache = test_cache();
        cache.set("k", "v".to_string());
        cache.get("k");
        cache.get("k");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_entry_info() {
        let cache = test_cache();
        cache.set_with_ttl("k", "v".to_string(), Duration::from_secs(60));

        let info = cache.entry_info("k").unwrap();
        assert_eq!(info.key, "k");
        assert!(!info.expired);
        assert!((info.ttl_seconds - 60.0).abs() < 1e-9);

        assert!(cache.entry_info("missing").is_none());
    }

    #[tokio::test]
    async fn test_get_or_fetch_miss_then_hit() {
        let cache = test_cache();

        let value = cache
            .get_or_fetch("k", Duration::from_secs(60), || async {
                Ok("loaded".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "loaded");

        // 第二次命中缓存，加载闭包不应被调用
        let value = cache
            .get_or_fetch("k", Duration::from_secs(60), || async {
                panic!("不应触发加载");
            })
            .await
            .unwrap();
        assert_eq!(value, "loaded");
    }

    #[tokio::test]
    async fn test_get_or_fetch_propagates_error_without_caching() {
        let cache = test_cache();

        let result: Result<String> = cache
            .get_or_fetch("k", Duration::from_secs(60), || async {
                Err(QuestError::Repository("down".to_string()))
            })
            .await;
        assert!(result.is_err());
        // 失败的加载不应留下缓存条目
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test]
    async fn test_cleanup_worker_evicts_expired_entries() {
        let cache = test_cache();
        cache.set_with_ttl("dead", "x".to_string(), Duration::from_millis(10));

        cache.start_cleanup_worker().await;
        // 重复启动应为空操作
        cache.start_cleanup_worker().await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(cache.stats().entries, 0);
        assert!(cache.stats().evictions >= 1);

        cache.stop_cleanup_worker().await;
        // 重复停止应为空操作
        cache.stop_cleanup_worker().await;
    }

    #[tokio::test]
    async fn test_stop_then_restart_worker() {
        let cache = test_cache();
        cache.start_cleanup_worker().await;
        cache.stop_cleanup_worker().await;

        // 停止后可以再次启动
        cache.start_cleanup_worker().await;
        cache.stop_cleanup_worker().await;
    }
}
