//! InMemoryDeliveryQueue - 開発用の配送キュー
//!
//! - ready: すぐ配れる task_id
//! - scheduled: 遅延付き（リトライのバックオフ）。BinaryHeap で最早のものが先頭
//! - in_flight: lease 中。期限切れは次の pop / ack / nack で ready に戻す
//!
//! 時間は `tokio::time::Instant` を使うので、テストでは `tokio::time::pause()`
//! で進められる。

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::warn;

use crate::domain::{JobId, QueueError, TaskId};
use crate::ports::{DeliveryQueue, Lease, QueueDepth};

/// 遅延ヒープに入れる予定 task
///
/// BinaryHeap を min-heap（早い順）にするため順序を逆にする。
/// 同じ期限の間は `seq` で FIFO を保つ
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledTask {
    ready_at: Instant,
    seq: u64,
    task_id: TaskId,
    job_id: JobId,
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug)]
struct InFlight {
    job_id: JobId,
    token: u64,
    expires_at: Instant,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<(TaskId, JobId)>,
    scheduled: BinaryHeap<ScheduledTask>,
    /// ready + scheduled（重複 push を捨てるため）
    queued: HashSet<TaskId>,
    in_flight: HashMap<TaskId, InFlight>,
    deliveries: HashMap<TaskId, u32>,
    next_token: u64,
    next_seq: u64,
}

impl QueueState {
    fn enqueue(&mut self, task_id: TaskId, job_id: JobId, delay: Duration, now: Instant) {
        if !self.queued.insert(task_id) {
            return;
        }
        if delay.is_zero() {
            self.ready.push_back((task_id, job_id));
        } else {
            self.next_seq += 1;
            self.scheduled.push(ScheduledTask {
                ready_at: now + delay,
                seq: self.next_seq,
                task_id,
                job_id,
            });
        }
    }

    /// 期限の来た scheduled を ready へ移す
    fn promote_scheduled(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.ready_at > now {
                break;
            }
            if let Some(entry) = self.scheduled.pop() {
                self.ready.push_back((entry.task_id, entry.job_id));
            }
        }
    }

    /// 期限切れの lease を ready に戻す
    fn reap_expired(&mut self, now: Instant) {
        let expired: Vec<TaskId> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for task_id in expired {
            if let Some(flight) = self.in_flight.remove(&task_id) {
                warn!(task_id = %task_id, token = flight.token, "lease expired; redelivering");
                self.queued.insert(task_id);
                self.ready.push_back((task_id, flight.job_id));
            }
        }
    }

    fn next_wake(&self) -> Option<Instant> {
        let scheduled = self.scheduled.peek().map(|e| e.ready_at);
        let lease = self.in_flight.values().map(|f| f.expires_at).min();
        match (scheduled, lease) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// lease を検証して `in_flight` から外す
    fn settle(&mut self, lease: &Lease, now: Instant) -> Result<InFlight, QueueError> {
        self.reap_expired(now);
        match self.in_flight.get(&lease.task_id) {
            Some(flight) if flight.token == lease.token => self
                .in_flight
                .remove(&lease.task_id)
                .ok_or(QueueError::LeaseExpired(lease.task_id)),
            _ => Err(QueueError::LeaseExpired(lease.task_id)),
        }
    }
}

pub struct InMemoryDeliveryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    closed: AtomicBool,
    lease_timeout: Duration,
}

impl InMemoryDeliveryQueue {
    pub fn new(lease_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            lease_timeout,
        }
    }
}

#[async_trait]
impl DeliveryQueue for InMemoryDeliveryQueue {
    async fn push(
        &self,
        task_id: TaskId,
        job_id: JobId,
        delay: Duration,
    ) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        {
            let mut state = self.state.lock().await;
            if state.in_flight.contains_key(&task_id) {
                return Ok(());
            }
            state.enqueue(task_id, job_id, delay, Instant::now());
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<Lease>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(QueueError::Closed);
            }
            let next_wake = {
                let now = Instant::now();
                let mut state = self.state.lock().await;
                state.reap_expired(now);
                state.promote_scheduled(now);

                if let Some((task_id, job_id)) = state.ready.pop_front() {
                    state.queued.remove(&task_id);
                    state.next_token += 1;
                    let token = state.next_token;
                    let deliveries = {
                        let d = state.deliveries.entry(task_id).or_insert(0);
                        *d += 1;
                        *d
                    };
                    state.in_flight.insert(
                        task_id,
                        InFlight {
                            job_id,
                            token,
                            expires_at: now + self.lease_timeout,
                        },
                    );
                    return Ok(Some(Lease {
                        task_id,
                        job_id,
                        token,
                        deliveries,
                    }));
                }

                if now >= deadline {
                    return Ok(None);
                }
                state.next_wake().map_or(deadline, |w| w.min(deadline))
            };

            // push / nack の通知か、次の予定時刻まで待つ
            tokio::select! {
                _ = self.notify.notified() => {},
                _ = tokio::time::sleep_until(next_wake) => {},
            }
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.settle(lease, Instant::now())?;
        state.deliveries.remove(&lease.task_id);
        Ok(())
    }

    async fn nack(&self, lease: &Lease, delay: Duration) -> Result<(), QueueError> {
        {
            let now = Instant::now();
            let mut state = self.state.lock().await;
            let flight = state.settle(lease, now)?;
            state.enqueue(lease.task_id, flight.job_id, delay, now);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn depth(&self) -> QueueDepth {
        let state = self.state.lock().await;
        QueueDepth {
            ready: state.ready.len(),
            scheduled: state.scheduled.len(),
            in_flight: state.in_flight.len(),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ulid::Ulid;

    fn ids() -> (TaskId, JobId) {
        (TaskId::from_ulid(Ulid::new()), JobId::from_ulid(Ulid::new()))
    }

    fn queue() -> InMemoryDeliveryQueue {
        InMemoryDeliveryQueue::new(Duration::from_secs(300))
    }

    #[tokio::test]
    async fn test_push_pop_roundtrip() {
        let queue = queue();
        let (task_id, job_id) = ids();
        queue.push(task_id, job_id, Duration::ZERO).await.unwrap();
        let lease = queue.pop(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(lease.task_id, task_id);
        assert_eq!(lease.job_id, job_id);
        assert_eq!(lease.deliveries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_timeout() {
        let queue = queue();
        let start = Instant::now();
        let popped = queue.pop(Duration::from_millis(500)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
        assert_eq!(popped, None);
    }

    #[tokio::test(start_paused = true)]
    async fn leased_task_is_invisible_until_settled() {
        let queue = queue();
        let (task_id, job_id) = ids();
        queue.push(task_id, job_id, Duration::ZERO).await.unwrap();
        let lease = queue.pop(Duration::from_secs(1)).await.unwrap().unwrap();

        assert_eq!(queue.pop(Duration::from_millis(100)).await.unwrap(), None);

        queue.ack(&lease).await.unwrap();
        let depth = queue.depth().await;
        assert_eq!(depth, QueueDepth::default());
        assert!(matches!(
            queue.ack(&lease).await,
            Err(QueueError::LeaseExpired(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn nack_redelivers_after_the_delay() {
        let queue = queue();
        let (task_id, job_id) = ids();
        queue.push(task_id, job_id, Duration::ZERO).await.unwrap();
        let lease = queue.pop(Duration::from_secs(1)).await.unwrap().unwrap();
        queue.nack(&lease, Duration::from_secs(2)).await.unwrap();

        assert_eq!(queue.pop(Duration::from_millis(1900)).await.unwrap(), None);
        let again = queue.pop(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(again.task_id, task_id);
        assert_eq!(again.deliveries, 2);
        assert_ne!(again.token, lease.token);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_is_redelivered_and_old_lease_rejected() {
        let queue = InMemoryDeliveryQueue::new(Duration::from_secs(10));
        let (task_id, job_id) = ids();
        queue.push(task_id, job_id, Duration::ZERO).await.unwrap();
        let stale = queue.pop(Duration::from_secs(1)).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let fresh = queue.pop(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(fresh.task_id, task_id);
        assert_eq!(fresh.deliveries, 2);

        assert!(matches!(
            queue.ack(&stale).await,
            Err(QueueError::LeaseExpired(_))
        ));
        assert!(matches!(
            queue.nack(&stale, Duration::ZERO).await,
            Err(QueueError::LeaseExpired(_))
        ));
        queue.ack(&fresh).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_wakes_pop() {
        let queue = Arc::new(queue());
        let (task_id, job_id) = ids();

        let pop_future = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop(Duration::from_secs(5)).await.unwrap() }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        queue.push(task_id, job_id, Duration::ZERO).await.unwrap();

        let popped = pop_future.await.unwrap();
        assert_eq!(popped.map(|l| l.task_id), Some(task_id));
    }

    #[tokio::test]
    async fn duplicate_push_is_ignored() {
        let queue = queue();
        let (task_id, job_id) = ids();
        queue.push(task_id, job_id, Duration::ZERO).await.unwrap();
        queue.push(task_id, job_id, Duration::ZERO).await.unwrap();
        assert_eq!(queue.depth().await.ready, 1);
    }

    #[tokio::test]
    async fn closed_queue_refuses_work() {
        let queue = queue();
        queue.close();
        assert!(matches!(
            queue.pop(Duration::from_millis(10)).await,
            Err(QueueError::Closed)
        ));
        let (task_id, job_id) = ids();
        assert!(matches!(
            queue.push(task_id, job_id, Duration::ZERO).await,
            Err(QueueError::Closed)
        ));
    }
}
