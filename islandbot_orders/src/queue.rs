// The order queue: accepted orders waiting for the exclusive console session.
//
// `OrderQueue` is shared between many request-handling callers (enqueue,
// position lookups, withdrawals) and the single execution worker (dequeue).
// Every read and mutation of the ordered collection happens under one mutex,
// so a position is always computed against a fully applied enqueue or
// withdrawal.
//
// Withdrawal is resolved eagerly: `request_skip` removes the order from the
// queue under the lock, so users behind it see their position drop on the
// very next lookup and a withdrawn order can never be dequeued. The queue
// holds at most one order per user, which keeps "position of user X"
// well-defined.
//
// Positions are 1-based. An order that is currently executing has already
// been dequeued and therefore has no position.
//
// ETAs are advisory: `position × average order duration`, where the average
// comes from the last few observed executions (`record_duration`) or, before
// any have been observed, from the configured estimate. Durations are kept
// under their own small lock so the worker's bookkeeping never contends with
// queue reads.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use islandbot_protocol::types::{ChannelId, Item, OrderId, UserId, VillagerRequest};
use thiserror::Error;

use crate::config::OrderConfig;

/// An accepted order. Owned by the queue until dequeued, then by the worker.
#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub owner: UserId,
    pub owner_name: String,
    pub items: Vec<Item>,
    pub villager: Option<VillagerRequest>,
    pub submitted_at: DateTime<Utc>,
    /// Where replies about this order go.
    pub channel: ChannelId,
    /// The owner held the temporary access tier when ordering.
    pub temporary_access: bool,
    pub catalogue: bool,
}

/// Everything about an order except what the queue assigns.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingOrder {
    pub owner: UserId,
    pub owner_name: String,
    pub items: Vec<Item>,
    pub villager: Option<VillagerRequest>,
    pub channel: ChannelId,
    pub temporary_access: bool,
    pub catalogue: bool,
}

/// A successful enqueue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Enqueued {
    pub id: OrderId,
    pub position: usize,
}

/// One row of the operator queue listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueEntry {
    pub position: usize,
    pub id: OrderId,
    pub owner: UserId,
    pub owner_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("queue is at capacity ({occupancy} orders)")]
    CapacityExceeded { occupancy: usize },
    #[error("user already queued at position {position}")]
    AlreadyQueued { position: usize },
}

struct QueueInner {
    orders: VecDeque<Order>,
    next_id: u64,
}

impl QueueInner {
    fn position_of(&self, user: UserId) -> Option<usize> {
        self.orders
            .iter()
            .position(|order| order.owner == user)
            .map(|index| index + 1)
    }
}

pub struct OrderQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity: usize,
    estimated_order: Duration,
    history_len: usize,
    durations: Mutex<VecDeque<Duration>>,
}

impl OrderQueue {
    pub fn new(capacity: usize, estimated_order: Duration, history_len: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                orders: VecDeque::new(),
                next_id: 1,
            }),
            available: Condvar::new(),
            capacity,
            estimated_order,
            history_len,
            durations: Mutex::new(VecDeque::new()),
        }
    }

    pub fn from_config(config: &OrderConfig) -> Self {
        Self::new(
            config.max_queue_count,
            Duration::from_secs(config.estimated_order_secs),
            config.eta_history_len,
        )
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an order at the tail. Nothing changes on rejection.
    pub fn enqueue(&self, pending: PendingOrder) -> Result<Enqueued, EnqueueError> {
        let mut inner = self.lock();
        let occupancy = inner.orders.len();
        if occupancy >= self.capacity {
            return Err(EnqueueError::CapacityExceeded { occupancy });
        }
        if let Some(position) = inner.position_of(pending.owner) {
            return Err(EnqueueError::AlreadyQueued { position });
        }

        let id = OrderId(inner.next_id);
        inner.next_id += 1;
        inner.orders.push_back(Order {
            id,
            owner: pending.owner,
            owner_name: pending.owner_name,
            items: pending.items,
            villager: pending.villager,
            submitted_at: Utc::now(),
            channel: pending.channel,
            temporary_access: pending.temporary_access,
            catalogue: pending.catalogue,
        });
        let position = inner.orders.len();
        drop(inner);

        self.available.notify_one();
        Ok(Enqueued { id, position })
    }

    /// 1-based position of the user's queued order.
    pub fn position(&self, user: UserId) -> Option<usize> {
        self.lock().position_of(user)
    }

    /// Withdraw the user's queued order, returning it. `None` if the user
    /// has nothing queued (including when their order is executing), so a
    /// repeated request is a no-op.
    pub fn request_skip(&self, user: UserId) -> Option<Order> {
        let mut inner = self.lock();
        let index = inner.orders.iter().position(|order| order.owner == user)?;
        inner.orders.remove(index)
    }

    /// Withdraw a queued order by id.
    pub fn request_skip_id(&self, id: OrderId) -> Option<Order> {
        let mut inner = self.lock();
        let index = inner.orders.iter().position(|order| order.id == id)?;
        inner.orders.remove(index)
    }

    /// Take the head of the queue.
    pub fn dequeue(&self) -> Option<Order> {
        self.lock().orders.pop_front()
    }

    /// Take the head of the queue, waiting up to `timeout` for one to arrive.
    pub fn wait_dequeue(&self, timeout: Duration) -> Option<Order> {
        let inner = self.lock();
        let (mut inner, _) = self
            .available
            .wait_timeout_while(inner, timeout, |inner| inner.orders.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        inner.orders.pop_front()
    }

    /// Number of queued orders (the executing order is not counted).
    pub fn len(&self) -> usize {
        self.lock().orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().orders.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the queue in order.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.lock()
            .orders
            .iter()
            .enumerate()
            .map(|(index, order)| QueueEntry {
                position: index + 1,
                id: order.id,
                owner: order.owner,
                owner_name: order.owner_name.clone(),
            })
            .collect()
    }

    /// Feed an observed execution time into the ETA average.
    pub fn record_duration(&self, duration: Duration) {
        if self.history_len == 0 {
            return;
        }
        let mut durations = self
            .durations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if durations.len() == self.history_len {
            durations.pop_front();
        }
        durations.push_back(duration);
    }

    /// Average time one order takes.
    pub fn average_order_duration(&self) -> Duration {
        let durations = self
            .durations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if durations.is_empty() {
            return self.estimated_order;
        }
        let total: Duration = durations.iter().sum();
        total / durations.len() as u32
    }

    /// Advisory wait estimate for a position.
    pub fn eta(&self, position: usize) -> Duration {
        let position = u32::try_from(position).unwrap_or(u32::MAX);
        self.average_order_duration().saturating_mul(position)
    }
}

/// Render an ETA as `"4m 30s"` / `"1h 5m"`.
pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m {seconds}s")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn pending(user: u64) -> PendingOrder {
        PendingOrder {
            owner: UserId(user),
            owner_name: format!("user{user}"),
            items: vec![Item::new(0x1234)],
            villager: None,
            channel: ChannelId(1),
            temporary_access: false,
            catalogue: false,
        }
    }

    fn queue(capacity: usize) -> OrderQueue {
        OrderQueue::new(capacity, Duration::from_secs(60), 3)
    }

    #[test]
    fn positions_follow_arrival_order() {
        let q = queue(10);
        for user in 1..=6 {
            let enqueued = q.enqueue(pending(user)).unwrap();
            assert_eq!(enqueued.position, user as usize);
        }
        let positions: Vec<usize> = (1..=6).map(|u| q.position(UserId(u)).unwrap()).collect();
        assert_eq!(positions, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(q.len(), 6);
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let q = queue(10);
        let a = q.enqueue(pending(1)).unwrap().id;
        let b = q.enqueue(pending(2)).unwrap().id;
        q.request_skip(UserId(2));
        let c = q.enqueue(pending(3)).unwrap().id;
        assert!(a < b && b < c);
    }

    #[test]
    fn capacity_five_rejects_sixth() {
        let q = queue(5);
        for user in 1..=5 {
            assert_eq!(q.enqueue(pending(user)).unwrap().position, user as usize);
        }
        let err = q.enqueue(pending(6)).unwrap_err();
        assert_eq!(err, EnqueueError::CapacityExceeded { occupancy: 5 });
        assert_eq!(q.len(), 5);
        assert_eq!(q.position(UserId(6)), None);
    }

    #[test]
    fn second_order_from_same_user_rejected() {
        let q = queue(5);
        q.enqueue(pending(1)).unwrap();
        q.enqueue(pending(2)).unwrap();
        let err = q.enqueue(pending(2)).unwrap_err();
        assert_eq!(err, EnqueueError::AlreadyQueued { position: 2 });
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn withdrawn_order_has_no_position() {
        let q = queue(5);
        q.enqueue(pending(1)).unwrap();
        assert_eq!(q.position(UserId(1)), Some(1));
        let removed = q.request_skip(UserId(1)).unwrap();
        assert_eq!(removed.owner, UserId(1));
        assert_eq!(q.position(UserId(1)), None);
        // Repeating the request changes nothing.
        assert!(q.request_skip(UserId(1)).is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn withdrawal_moves_later_users_up() {
        let q = queue(10);
        for user in 1..=4 {
            q.enqueue(pending(user)).unwrap();
        }
        q.request_skip(UserId(1));
        assert_eq!(q.position(UserId(4)), Some(3));
        assert_eq!(q.position(UserId(2)), Some(1));
    }

    #[test]
    fn withdrawn_order_is_never_dequeued() {
        let q = queue(10);
        let first = q.enqueue(pending(1)).unwrap();
        q.enqueue(pending(2)).unwrap();
        assert!(q.request_skip_id(first.id).is_some());
        let next = q.dequeue().unwrap();
        assert_eq!(next.owner, UserId(2));
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn dequeued_order_loses_its_position() {
        let q = queue(10);
        q.enqueue(pending(1)).unwrap();
        q.enqueue(pending(2)).unwrap();
        let executing = q.dequeue().unwrap();
        assert_eq!(executing.owner, UserId(1));
        assert_eq!(q.position(UserId(1)), None);
        assert_eq!(q.position(UserId(2)), Some(1));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn entries_list_names_in_order() {
        let q = queue(10);
        q.enqueue(pending(7)).unwrap();
        q.enqueue(pending(3)).unwrap();
        let entries = q.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].position, 1);
        assert_eq!(entries[0].owner_name, "user7");
        assert_eq!(entries[1].owner, UserId(3));
    }

    #[test]
    fn eta_uses_estimate_then_history() {
        let q = queue(10);
        assert_eq!(q.eta(2), Duration::from_secs(120));

        q.record_duration(Duration::from_secs(10));
        q.record_duration(Duration::from_secs(20));
        assert_eq!(q.eta(3), Duration::from_secs(45));

        // History keeps only the last three.
        q.record_duration(Duration::from_secs(30));
        q.record_duration(Duration::from_secs(40));
        assert_eq!(q.average_order_duration(), Duration::from_secs(30));
    }

    #[test]
    fn format_eta_examples() {
        assert_eq!(format_eta(Duration::from_secs(270)), "4m 30s");
        assert_eq!(format_eta(Duration::from_secs(3900)), "1h 5m");
        assert_eq!(format_eta(Duration::ZERO), "0m 0s");
    }

    #[test]
    fn wait_dequeue_times_out_on_empty_queue() {
        let q = queue(10);
        assert!(q.wait_dequeue(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn wait_dequeue_wakes_on_enqueue() {
        let q = Arc::new(queue(10));
        let q2 = Arc::clone(&q);
        let waiter = thread::spawn(move || q2.wait_dequeue(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        q.enqueue(pending(9)).unwrap();
        let order = waiter.join().unwrap().unwrap();
        assert_eq!(order.owner, UserId(9));
    }

    #[test]
    fn concurrent_enqueues_produce_contiguous_positions() {
        let q = Arc::new(queue(100));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..10 {
                        q.enqueue(pending(t * 100 + i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut positions: Vec<usize> = q.entries().iter().map(|e| e.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, (1..=80).collect::<Vec<_>>());
    }
}
