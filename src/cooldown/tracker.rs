use crate::cooldown::clock::{Clock, SystemClock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct TrackerConfig {
    /// 距最近一次失败超过该时长后，失败记录作废。
    pub cooldown: Duration,
    /// 冷却窗口内失败次数达到该值即不可用。
    pub failure_threshold: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60),
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    count: u32,
    last_failure: Instant,
}

/// 管理接口展示用的快照。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSnapshot {
    pub credential_id: String,
    pub failure_count: u32,
    pub seconds_since_last_failure: u64,
    pub available: bool,
}

/// 按凭证记录失败次数。多个并发请求共享同一实例。
#[derive(Debug)]
pub struct AvailabilityTracker {
    cfg: TrackerConfig,
    clock: Arc<dyn Clock>,
    records: Mutex<HashMap<String, FailureRecord>>,
}

impl AvailabilityTracker {
    pub fn new(cfg: TrackerConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: TrackerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg: TrackerConfig {
                failure_threshold: cfg.failure_threshold.max(1),
                ..cfg
            },
            clock,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// 没有失败记录的凭证总是可用；记录过期时顺带删除。
    pub fn is_available(&self, credential_id: &str) -> bool {
        let now = self.clock.now();
        let mut records = self.lock();
        let Some(rec) = records.get(credential_id).copied() else {
            return true;
        };
        if self.expired(&rec, now) {
            records.remove(credential_id);
            return true;
        }
        rec.count < self.cfg.failure_threshold
    }

    /// 记录一次失败并返回窗口内的累计次数。
    ///
    /// `is_rate_limit` 只影响日志，限流与普通失败的计数方式相同。
    pub fn record_failure(&self, credential_id: &str, is_rate_limit: bool) -> u32 {
        let now = self.clock.now();
        let count = {
            let mut records = self.lock();
            let prev = records
                .get(credential_id)
                .copied()
                .filter(|rec| !self.expired(rec, now))
                .map(|rec| rec.count)
                .unwrap_or(0);
            let count = prev.saturating_add(1);
            records.insert(
                credential_id.to_string(),
                FailureRecord {
                    count,
                    last_failure: now,
                },
            );
            count
        };

        if is_rate_limit {
            tracing::warn!(
                credential_id,
                failures = count,
                cooldown_secs = self.cfg.cooldown.as_secs(),
                "凭证被限流，进入冷却"
            );
        } else {
            tracing::debug!(credential_id, failures = count, "记录凭证失败");
        }
        count
    }

    /// 窗口内的失败次数（过期记录视为 0，不修改状态）。
    pub fn failure_count(&self, credential_id: &str) -> u32 {
        let now = self.clock.now();
        let records = self.lock();
        records
            .get(credential_id)
            .filter(|rec| !self.expired(rec, now))
            .map(|rec| rec.count)
            .unwrap_or(0)
    }

    /// 当前处于冷却（不可用）状态的凭证数量。
    pub fn cooling_count(&self) -> usize {
        let now = self.clock.now();
        let records = self.lock();
        records
            .values()
            .filter(|rec| !self.expired(rec, now) && rec.count >= self.cfg.failure_threshold)
            .count()
    }

    pub fn snapshot(&self) -> Vec<FailureSnapshot> {
        let now = self.clock.now();
        let records = self.lock();
        let mut out: Vec<FailureSnapshot> = records
            .iter()
            .filter(|(_, rec)| !self.expired(rec, now))
            .map(|(id, rec)| FailureSnapshot {
                credential_id: id.clone(),
                failure_count: rec.count,
                seconds_since_last_failure: now.saturating_duration_since(rec.last_failure).as_secs(),
                available: rec.count < self.cfg.failure_threshold,
            })
            .collect();
        out.sort_by(|a, b| a.credential_id.cmp(&b.credential_id));
        out
    }

    fn expired(&self, rec: &FailureRecord, now: Instant) -> bool {
        now.saturating_duration_since(rec.last_failure) > self.cfg.cooldown
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, FailureRecord>> {
        // 持锁期间不会 panic；即便被污染，计数表本身仍然一致。
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for AvailabilityTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::clock::ManualClock;

    fn tracker() -> (AvailabilityTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let t = AvailabilityTracker::with_clock(TrackerConfig::default(), clock.clone());
        (t, clock)
    }

    #[test]
    fn unknown_credential_is_available() {
        let (t, _) = tracker();
        assert!(t.is_available("key1"));
        assert_eq!(t.failure_count("key1"), 0);
    }

    #[test]
    fn unavailable_at_threshold_and_back_after_window() {
        let (t, clock) = tracker();
        t.record_failure("key1", false);
        t.record_failure("key1", false);
        assert!(t.is_available("key1"));

        t.record_failure("key1", false);
        assert!(!t.is_available("key1"));

        // 恰好等于窗口仍在冷却
        clock.advance(Duration::from_secs(60));
        assert!(!t.is_available("key1"));

        clock.advance(Duration::from_millis(1));
        assert!(t.is_available("key1"));
        assert_eq!(t.failure_count("key1"), 0);
        assert!(t.snapshot().is_empty());
    }

    #[test]
    fn rate_limit_flag_counts_the_same() {
        let (t, _) = tracker();
        assert_eq!(t.record_failure("a", true), 1);
        assert_eq!(t.record_failure("b", false), 1);
        assert_eq!(t.failure_count("a"), t.failure_count("b"));
    }

    #[test]
    fn failure_after_expiry_restarts_count() {
        let (t, clock) = tracker();
        t.record_failure("key1", false);
        t.record_failure("key1", false);
        clock.advance(Duration::from_secs(61));
        assert_eq!(t.record_failure("key1", false), 1);
        assert!(t.is_available("key1"));
    }

    #[test]
    fn each_failure_extends_the_window() {
        let (t, clock) = tracker();
        for _ in 0..3 {
            t.record_failure("key1", false);
            clock.advance(Duration::from_secs(40));
        }
        // 最后一次失败在 40s 前
        assert!(!t.is_available("key1"));
        clock.advance(Duration::from_secs(21));
        assert!(t.is_available("key1"));
    }

    #[test]
    fn cooling_count_and_snapshot() {
        let (t, clock) = tracker();
        for _ in 0..3 {
            t.record_failure("hot", true);
        }
        t.record_failure("warm", false);
        clock.advance(Duration::from_secs(5));

        assert_eq!(t.cooling_count(), 1);
        let snap = t.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].credential_id, "hot");
        assert!(!snap[0].available);
        assert_eq!(snap[0].seconds_since_last_failure, 5);
        assert_eq!(snap[1].credential_id, "warm");
        assert!(snap[1].available);
    }

    #[test]
    fn concurrent_failures_are_all_counted() {
        let t = Arc::new(AvailabilityTracker::with_clock(
            TrackerConfig {
                cooldown: Duration::from_secs(60),
                failure_threshold: 1_000,
            },
            Arc::new(ManualClock::new()),
        ));
        std::thread::scope(|s| {
            for _ in 0..8 {
                let t = t.clone();
                s.spawn(move || {
                    for _ in 0..50 {
                        t.record_failure("shared", false);
                        let _ = t.is_available("shared");
                    }
                });
            }
        });
        assert_eq!(t.failure_count("shared"), 400);
    }
}
