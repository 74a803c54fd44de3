use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::debug;

use taskmaster_core::traits::{
    ClusterStatus, CoordinationConnector, CoordinationService, LeaseId, LockGuard, WatchEvent,
};
use taskmaster_core::{SchedulerError, SchedulerResult};

const REAPER_INTERVAL: Duration = Duration::from_millis(100);
const WATCH_CHANNEL_CAPACITY: usize = 64;

struct KvEntry {
    value: String,
    lease: Option<LeaseId>,
}

struct LeaseState {
    ttl: Duration,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    kv: HashMap<String, KvEntry>,
    leases: HashMap<LeaseId, LeaseState>,
    watchers: HashMap<String, Vec<mpsc::Sender<WatchEvent>>>,
    next_lease: LeaseId,
}

impl State {
    fn notify(&mut self, key: &str, event: WatchEvent) {
        if let Some(senders) = self.watchers.get_mut(key) {
            senders.retain(|tx| tx.try_send(event.clone()).is_ok());
        }
    }

    /// 回收过期lease并级联删除其绑定的键
    fn reap_expired(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for lease_id in expired {
            self.leases.remove(&lease_id);
            let keys: Vec<String> = self
                .kv
                .iter()
                .filter(|(_, entry)| entry.lease == Some(lease_id))
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys {
                debug!("lease {} 过期，删除键 {}", lease_id, key);
                self.kv.remove(&key);
                self.notify(&key, WatchEvent::Delete { key: key.clone() });
            }
        }
    }
}

/// 单进程协调服务实现
///
/// Clone共享同一份内部状态，两个克隆体相当于连到同一集群的两个客户端，
/// lease过期、watch事件与命名锁在克隆体之间全部可见。用于嵌入式部署
/// 与主备切换测试。
#[derive(Clone)]
pub struct MemoryCoordination {
    endpoint: String,
    state: Arc<Mutex<State>>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

struct MemoryLockGuard {
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard for MemoryLockGuard {}

impl MemoryCoordination {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let service = Self {
            endpoint: endpoint.into(),
            state: Arc::new(Mutex::new(State::default())),
            locks: Arc::new(Mutex::new(HashMap::new())),
        };
        service.spawn_reaper();
        service
    }

    fn spawn_reaper(&self) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAPER_INTERVAL);
            loop {
                ticker.tick().await;
                // 所有克隆体都drop后结束回收循环
                if Arc::strong_count(&state) == 1 {
                    break;
                }
                state.lock().await.reap_expired(Instant::now());
            }
        });
    }
}

#[async_trait]
impl CoordinationService for MemoryCoordination {
    async fn status(&self) -> SchedulerResult<ClusterStatus> {
        Ok(ClusterStatus {
            leader_endpoint: self.endpoint.clone(),
        })
    }

    async fn grant_lease(&self, ttl_seconds: i64) -> SchedulerResult<LeaseId> {
        if ttl_seconds <= 0 {
            return Err(SchedulerError::coordination_error("lease ttl必须为正数"));
        }
        let ttl = Duration::from_secs(ttl_seconds as u64);
        let mut state = self.state.lock().await;
        state.next_lease += 1;
        let lease_id = state.next_lease;
        state.leases.insert(
            lease_id,
            LeaseState {
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(lease_id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.reap_expired(now);
        match state.leases.get_mut(&lease) {
            Some(entry) => {
                entry.expires_at = now + entry.ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        if let Some(lease_id) = lease {
            if !state.leases.contains_key(&lease_id) {
                return Err(SchedulerError::coordination_error(format!(
                    "lease {lease_id} 不存在或已过期"
                )));
            }
        }
        state.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                lease,
            },
        );
        state.notify(
            key,
            WatchEvent::Put {
                key: key.to_string(),
                value: value.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> SchedulerResult<Option<String>> {
        let mut state = self.state.lock().await;
        state.reap_expired(Instant::now());
        Ok(state.kv.get(key).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        if state.kv.remove(key).is_some() {
            state.notify(key, WatchEvent::Delete { key: key.to_string() });
        }
        Ok(())
    }

    async fn lock(&self, name: &str) -> SchedulerResult<Box<dyn LockGuard>> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            // 无持有者也无等待者的名字顺手回收，锁表不随名字数膨胀
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            Arc::clone(
                locks
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        // 不持有locks表等待，避免阻塞其他名字的锁
        let guard = mutex.lock_owned().await;
        Ok(Box::new(MemoryLockGuard { _guard: guard }))
    }

    async fn watch(&self, key: &str) -> SchedulerResult<mpsc::Receiver<WatchEvent>> {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let mut state = self.state.lock().await;
        state.watchers.entry(key.to_string()).or_default().push(tx);
        Ok(rx)
    }
}

/// 内存协调服务的连接器
///
/// 所有端点都指向同一份共享状态，可标记故障端点模拟连接失败。
pub struct MemoryConnector {
    shared: MemoryCoordination,
    down_endpoints: std::sync::Mutex<HashSet<String>>,
}

impl MemoryConnector {
    pub fn new(shared: MemoryCoordination) -> Self {
        Self {
            shared,
            down_endpoints: std::sync::Mutex::new(HashSet::new()),
        }
    }

    pub fn mark_down(&self, endpoint: &str) {
        if let Ok(mut down) = self.down_endpoints.lock() {
            down.insert(endpoint.to_string());
        }
    }

    pub fn mark_up(&self, endpoint: &str) {
        if let Ok(mut down) = self.down_endpoints.lock() {
            down.remove(endpoint);
        }
    }
}

#[async_trait]
impl CoordinationConnector for MemoryConnector {
    async fn connect(&self, endpoint: &str) -> SchedulerResult<Arc<dyn CoordinationService>> {
        if !endpoint.starts_with("memory://") {
            return Err(SchedulerError::coordination_error(format!(
                "进程内协调服务只接受memory://端点，无法连接: {endpoint}"
            )));
        }
        let down = self
            .down_endpoints
            .lock()
            .map(|set| set.contains(endpoint))
            .unwrap_or(false);
        if down {
            return Err(SchedulerError::coordination_error(format!(
                "无法连接协调服务端点: {endpoint}"
            )));
        }
        Ok(Arc::new(self.shared.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    #[tokio::test]
    async fn test_lease_expiry_removes_bound_key() {
        let coord = MemoryCoordination::new("memory://a");
        let lease = coord.grant_lease(1).await.unwrap();
        coord.put("/ha/master", "node-a", Some(lease)).await.unwrap();
        assert_eq!(
            coord.get("/ha/master").await.unwrap(),
            Some("node-a".to_string())
        );

        sleep(Duration::from_millis(1200)).await;
        assert_eq!(coord.get("/ha/master").await.unwrap(), None);
        assert!(!coord.keep_alive(lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_keep_alive_extends_lease() {
        let coord = MemoryCoordination::new("memory://a");
        let lease = coord.grant_lease(1).await.unwrap();
        coord.put("/ha/master", "node-a", Some(lease)).await.unwrap();

        for _ in 0..4 {
            sleep(Duration::from_millis(400)).await;
            assert!(coord.keep_alive(lease).await.unwrap());
        }
        assert_eq!(
            coord.get("/ha/master").await.unwrap(),
            Some("node-a".to_string())
        );
    }

    #[tokio::test]
    async fn test_watch_sees_put_and_delete() {
        let coord = MemoryCoordination::new("memory://a");
        let mut rx = coord.watch("/ha/master").await.unwrap();

        coord.put("/ha/master", "node-a", None).await.unwrap();
        coord.delete("/ha/master").await.unwrap();

        let first = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(
            first,
            Some(WatchEvent::Put {
                key: "/ha/master".to_string(),
                value: "node-a".to_string(),
            })
        );
        let second = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert_eq!(
            second,
            Some(WatchEvent::Delete {
                key: "/ha/master".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let a = MemoryCoordination::new("memory://a");
        let b = a.clone();
        a.put("/key", "value", None).await.unwrap();
        assert_eq!(b.get("/key").await.unwrap(), Some("value".to_string()));
    }

    #[tokio::test]
    async fn test_named_lock_is_mutually_exclusive() {
        let coord = MemoryCoordination::new("memory://a");
        let guard = coord.lock("election").await.unwrap();

        let contender = coord.clone();
        let blocked = tokio::spawn(async move { contender.lock("election").await });
        sleep(Duration::from_millis(100)).await;
        assert!(!blocked.is_finished());

        drop(guard);
        let acquired = timeout(Duration::from_secs(1), blocked).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_lock_table_does_not_grow_unbounded() {
        let coord = MemoryCoordination::new("memory://a");
        for i in 0..100 {
            let guard = coord.lock(&format!("lock-{i}")).await.unwrap();
            drop(guard);
        }
        // 下一次加锁回收所有空闲名字
        let _guard = coord.lock("active").await.unwrap();
        assert_eq!(coord.locks.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_connector_rejects_foreign_scheme() {
        let coord = MemoryCoordination::new("memory://a");
        let connector = MemoryConnector::new(coord);
        assert!(connector.connect("http://127.0.0.1:2379").await.is_err());
        assert!(connector.connect("memory://a").await.is_ok());
    }

    #[tokio::test]
    async fn test_connector_skips_down_endpoint() {
        let coord = MemoryCoordination::new("memory://a");
        let connector = MemoryConnector::new(coord);
        connector.mark_down("memory://a");
        assert!(connector.connect("memory://a").await.is_err());
        assert!(connector.connect("memory://b").await.is_ok());

        connector.mark_up("memory://a");
        assert!(connector.connect("memory://a").await.is_ok());
    }
}
