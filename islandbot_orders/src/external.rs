// Narrow interfaces to the collaborators the coordinator does not implement.
//
// - `ItemCatalog`: turns raw order input into normalized items and flags
//   items that would corrupt the save. Both operations are pure.
// - `ConsoleLink`: the exclusive remote session. Only the execution worker
//   calls `execute`; only the worker (after a dirty order) and the restore
//   supervisor call `restart`.
// - `Notifier`: the chat front-end's outbound side. The server module
//   implements it by funnelling messages into its dispatch thread.
//
// All three are object-safe and `Send + Sync` so they can be shared as
// `Arc<dyn ...>` between the request path, the worker and the supervisor.

use islandbot_protocol::types::{ChannelId, Item, OrderInput, UserId, VillagerRequest};

use crate::error::LinkError;
use crate::queue::Order;

/// Output of `ItemCatalog::normalize`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedOrder {
    pub items: Vec<Item>,
    pub villager: Option<VillagerRequest>,
}

/// Why an order's input could not be parsed. The text is shown to the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError(pub String);

/// Verdict of `ItemCatalog::validate`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sanity {
    Sane,
    Unsafe(String),
}

pub trait ItemCatalog: Send + Sync {
    fn normalize(&self, input: &OrderInput) -> Result<NormalizedOrder, ParseError>;

    fn validate(&self, items: &[Item]) -> Sanity;
}

/// Result of a successfully executed order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderReport {
    /// The session was left in a state that needs a restart before the next
    /// order.
    pub residual_state: bool,
}

/// Credential visitors need to join the session.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionCode(pub String);

/// Who is currently in the session, read after a restore.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IslandSnapshot {
    pub visitors: Vec<String>,
    pub villagers: Vec<String>,
}

pub trait ConsoleLink: Send + Sync {
    fn execute(&self, order: &Order) -> Result<OrderReport, LinkError>;

    fn is_alive(&self) -> bool;

    /// Restart the session and return the fresh join code.
    fn restart(
        &self,
        regenerate_map: bool,
        regenerate_terrain: bool,
    ) -> Result<SessionCode, LinkError>;

    fn snapshot(&self) -> Result<IslandSnapshot, LinkError>;

    /// Filler action between restore cycles in restore-only mode.
    fn idle_action(&self) -> Result<(), LinkError> {
        Ok(())
    }
}

pub trait Notifier: Send + Sync {
    fn reply(&self, channel: ChannelId, user: UserId, text: String);

    fn broadcast(&self, channel: ChannelId, text: String);

    fn revoke_temporary_access(&self, user: UserId);
}
