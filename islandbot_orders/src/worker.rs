// The execution worker: the only caller of `ConsoleLink::execute`.
//
// One worker drains the queue in FIFO order, one order at a time. Each step:
//
//   - If the session is Dirty, restart it first. A failed restart leaves it
//     Dirty; the worker waits one poll interval and tries again before
//     touching the queue. If the link is dead the worker does not restart
//     at all: crash recovery belongs to the restore supervisor, and the
//     worker waits for it to mark the session clean.
//   - Wait up to one poll interval for an order.
//   - Execute it. On success: tell the owner, feed the ETA average, count
//     the order against a temporary-tier owner's allowance, and mark the
//     session Dirty if the order left residual state. On failure: tell the
//     owner, mark the session Dirty, and drop the order. Failed orders are
//     never requeued; resubmission is up to the user.
//
// The worker's restart does not regenerate map or terrain; that is the
// restore supervisor's job after a crash.
//
// Restarts and executions run under the session's console guard (see
// `console.rs`), so they never overlap a supervisor restore.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use islandbot_protocol::types::{ChannelId, OrderId};
use tracing::{debug, error, info, warn};

use crate::console::ConsoleSession;
use crate::external::{ConsoleLink, Notifier};
use crate::handle::LoopHandle;
use crate::queue::{Order, OrderQueue};
use crate::restore::announce_session_code;
use crate::temp_access::TemporaryAccessTracker;

pub type WorkerHandle = LoopHandle;

/// What one `run_step` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStep {
    /// No order arrived within the poll interval.
    Idle,
    /// The session was dirty and could not be restarted.
    RestartFailed,
    /// The session was dirty and the link is down; the supervisor restores
    /// it.
    AwaitingRestore,
    Completed(OrderId),
    Failed(OrderId),
}

pub struct ExecutionWorker {
    queue: Arc<OrderQueue>,
    session: Arc<ConsoleSession>,
    link: Arc<dyn ConsoleLink>,
    tracker: Arc<TemporaryAccessTracker>,
    notifier: Arc<dyn Notifier>,
    echo_channels: Vec<ChannelId>,
    poll: Duration,
}

impl ExecutionWorker {
    pub fn new(
        queue: Arc<OrderQueue>,
        session: Arc<ConsoleSession>,
        link: Arc<dyn ConsoleLink>,
        tracker: Arc<TemporaryAccessTracker>,
        notifier: Arc<dyn Notifier>,
        poll: Duration,
    ) -> Self {
        Self {
            queue,
            session,
            link,
            tracker,
            notifier,
            echo_channels: Vec::new(),
            poll,
        }
    }

    /// Channels that receive the session code after the worker restarts a
    /// dirty session.
    pub fn with_echo_channels(mut self, channels: Vec<ChannelId>) -> Self {
        self.echo_channels = channels;
        self
    }

    pub fn spawn(self) -> std::io::Result<WorkerHandle> {
        LoopHandle::spawn("execution-worker", move || {
            self.run_step();
        })
    }

    pub fn run_step(&self) -> WorkerStep {
        if let Some(step) = self.restart_if_dirty() {
            thread::sleep(self.poll);
            return step;
        }

        let Some(order) = self.queue.wait_dequeue(self.poll) else {
            return WorkerStep::Idle;
        };
        let _console = self.session.lock_console();
        self.execute(order)
    }

    /// Restart the session if it is dirty. Returns the step to report when
    /// the session is still unusable afterwards.
    fn restart_if_dirty(&self) -> Option<WorkerStep> {
        if !self.session.is_dirty() {
            return None;
        }
        let _console = self.session.lock_console();
        // The supervisor may have restored the session while we waited.
        if !self.session.is_dirty() {
            return None;
        }
        if !self.link.is_alive() {
            debug!("dirty session has no live link, waiting for restore");
            return Some(WorkerStep::AwaitingRestore);
        }
        info!("restarting dirty session before next order");
        match self.link.restart(false, false) {
            Ok(code) => {
                announce_session_code(self.notifier.as_ref(), &self.echo_channels, &code);
                self.session.mark_restarted(code);
                None
            }
            Err(e) => {
                warn!("restart of dirty session failed: {e}");
                Some(WorkerStep::RestartFailed)
            }
        }
    }

    fn execute(&self, order: Order) -> WorkerStep {
        info!(order_id = %order.id, user = %order.owner, items = order.items.len(), "executing order");
        self.notifier.reply(
            order.channel,
            order.owner,
            format!("Your order {} is now being prepared.", order.id),
        );

        let started = Instant::now();
        match self.link.execute(&order) {
            Ok(report) => {
                self.queue.record_duration(started.elapsed());
                self.notifier.reply(
                    order.channel,
                    order.owner,
                    format!("Your order {} is complete. Thanks for visiting!", order.id),
                );
                if order.temporary_access {
                    let outcome = self
                        .tracker
                        .record_order(order.owner, &order.owner_name, Utc::now());
                    self.notifier
                        .reply(order.channel, order.owner, outcome.notice());
                }
                if report.residual_state {
                    self.session.mark_dirty();
                }
                info!(order_id = %order.id, elapsed = ?started.elapsed(), "order complete");
                WorkerStep::Completed(order.id)
            }
            Err(e) => {
                error!(order_id = %order.id, user = %order.owner, "order failed: {e}");
                self.notifier.reply(
                    order.channel,
                    order.owner,
                    format!(
                        "Your order {} could not be completed ({e}). Please submit it again.",
                        order.id
                    ),
                );
                self.session.mark_dirty();
                WorkerStep::Failed(order.id)
            }
        }
    }
}
