// Admission control: decides whether an order request enters the queue.
//
// `AdmissionController::admit` runs its checks in a fixed order and stops at
// the first failure:
//
//   1. orders refused (maintenance switch or restore-only mode)
//   2. submitter banned, unless `allow_known_abusers` is set
//   3. per-user order cooldown
//   4. queue at capacity
//   5. villager substitution while villager injection is disabled
//   6. item sanity, delegated to the item catalog; one unsafe item rejects
//      the whole order
//   7. item count above the per-order maximum: truncated, not rejected
//
// and then enqueues. A rejection leaves no trace except the cooldown stamp,
// which is recorded as soon as the cooldown check passes (the same rule the
// position command uses).
//
// The cooldown table has its own lock, independent of the queue's, so
// rate-limit bookkeeping never contends with queue reads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use islandbot_protocol::types::{ChannelId, Item, OrderId, UserId, UserInfo, VillagerRequest};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::abuse::BanRegistry;
use crate::config::BotConfig;
use crate::external::{ItemCatalog, Sanity};
use crate::queue::{EnqueueError, OrderQueue, PendingOrder, format_eta};

/// A normalized order request from a user.
#[derive(Clone, Debug, PartialEq)]
pub struct OrderRequest {
    pub user: UserInfo,
    pub channel: ChannelId,
    pub items: Vec<Item>,
    pub villager: Option<VillagerRequest>,
    pub catalogue: bool,
}

/// Why an order was not accepted. `Display` is the text shown to the user.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Orders are not currently accepted.")]
    OrdersDisabled,
    #[error("You are not permitted to use this bot.")]
    Banned,
    #[error("This command has a cooldown. Please wait {remaining_secs} more second(s).")]
    CooldownActive { remaining_secs: u64 },
    #[error(
        "The queue limit has been reached, there are currently {occupancy} players in the queue. Please try again later."
    )]
    QueueFull { occupancy: usize },
    #[error("You are already in the queue. Position: {position}.")]
    AlreadyQueued { position: usize },
    #[error("Villager injection is currently disabled.")]
    VillagerInjectionDisabled,
    #[error("You are attempting to order items that will damage your save ({reason}). Order not accepted.")]
    UnsafeItems { reason: String },
}

/// An accepted order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Admitted {
    pub id: OrderId,
    pub position: usize,
    pub eta: Duration,
    /// Original item count when the order was cut down to the maximum.
    pub truncated_from: Option<usize>,
    pub max_items: usize,
}

impl Admitted {
    /// Text shown to the user.
    pub fn message(&self) -> String {
        let mut text = String::new();
        if let Some(requested) = self.truncated_from {
            text.push_str(&format!(
                "Users are limited to {} items per command, you've asked for {requested}. All items above the limit have been removed. ",
                self.max_items
            ));
        }
        text.push_str(&format!(
            "Your order {} has been added to the queue. Position: {}.",
            self.id, self.position
        ));
        if self.position > 1 {
            text.push_str(&format!(
                " Your predicted ETA is {}.",
                format_eta(self.eta)
            ));
        }
        text
    }
}

/// Which command a cooldown stamp belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Order,
    Position,
}

pub struct AdmissionController {
    config: Arc<BotConfig>,
    queue: Arc<OrderQueue>,
    bans: Arc<BanRegistry>,
    catalog: Arc<dyn ItemCatalog>,
    last_command: Mutex<HashMap<(UserId, CommandKind), Instant>>,
}

impl AdmissionController {
    pub fn new(
        config: Arc<BotConfig>,
        queue: Arc<OrderQueue>,
        bans: Arc<BanRegistry>,
        catalog: Arc<dyn ItemCatalog>,
    ) -> Self {
        Self {
            config,
            queue,
            bans,
            catalog,
            last_command: Mutex::new(HashMap::new()),
        }
    }

    pub fn admit(&self, request: OrderRequest) -> Result<Admitted, Rejection> {
        self.admit_at(request, Instant::now())
    }

    /// `admit` with an explicit clock reading.
    pub fn admit_at(&self, request: OrderRequest, now: Instant) -> Result<Admitted, Rejection> {
        let user = request.user.id;
        let result = self.check_and_enqueue(request, now);
        match &result {
            Ok(admitted) => info!(
                user = %user,
                order_id = %admitted.id,
                position = admitted.position,
                "order admitted"
            ),
            Err(rejection) => debug!(user = %user, ?rejection, "order rejected"),
        }
        result
    }

    fn check_and_enqueue(
        &self,
        mut request: OrderRequest,
        now: Instant,
    ) -> Result<Admitted, Rejection> {
        let user = request.user.id;

        if self.config.orders_refused() {
            return Err(Rejection::OrdersDisabled);
        }

        if !self.config.allow_known_abusers && self.bans.is_user_banned(user) {
            return Err(Rejection::Banned);
        }

        self.check_cooldown_at(
            user,
            CommandKind::Order,
            self.config.order.order_cooldown_secs,
            now,
        )?;

        let occupancy = self.queue.len();
        if occupancy >= self.queue.capacity() {
            return Err(Rejection::QueueFull { occupancy });
        }

        if request.villager.is_some() && !self.config.allow_villager_injection {
            return Err(Rejection::VillagerInjectionDisabled);
        }

        if let Sanity::Unsafe(reason) = self.catalog.validate(&request.items) {
            warn!(user = %user, %reason, "unsafe items refused");
            return Err(Rejection::UnsafeItems { reason });
        }

        let max_items = self.config.order.max_items_per_order;
        let requested = request.items.len();
        let truncated_from = if requested > max_items {
            warn!(user = %user, requested, max_items, "order truncated");
            request.items.truncate(max_items);
            Some(requested)
        } else {
            None
        };

        let enqueued = self
            .queue
            .enqueue(PendingOrder {
                owner: user,
                owner_name: request.user.name,
                items: request.items,
                villager: request.villager,
                channel: request.channel,
                temporary_access: request.user.temporary_access,
                catalogue: request.catalogue,
            })
            .map_err(|e| match e {
                EnqueueError::CapacityExceeded { occupancy } => Rejection::QueueFull { occupancy },
                EnqueueError::AlreadyQueued { position } => Rejection::AlreadyQueued { position },
            })?;

        Ok(Admitted {
            id: enqueued.id,
            position: enqueued.position,
            eta: self.queue.eta(enqueued.position),
            truncated_from,
            max_items,
        })
    }

    /// Per-user rate limit. A positive `cooldown_secs` rejects a command
    /// issued within that many seconds of the user's last one and otherwise
    /// records `now`; zero always allows and records; negative always allows
    /// and records nothing.
    pub fn check_cooldown_at(
        &self,
        user: UserId,
        kind: CommandKind,
        cooldown_secs: i64,
        now: Instant,
    ) -> Result<(), Rejection> {
        let Ok(window) = u64::try_from(cooldown_secs).map(Duration::from_secs) else {
            return Ok(());
        };
        let mut last_command = self
            .last_command
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(last) = last_command.get(&(user, kind)) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < window {
                let remaining = window - elapsed;
                return Err(Rejection::CooldownActive {
                    remaining_secs: remaining.as_secs().max(1),
                });
            }
        }
        last_command.insert((user, kind), now);
        Ok(())
    }

    pub fn check_cooldown(
        &self,
        user: UserId,
        kind: CommandKind,
        cooldown_secs: i64,
    ) -> Result<(), Rejection> {
        self.check_cooldown_at(user, kind, cooldown_secs, Instant::now())
    }
}
