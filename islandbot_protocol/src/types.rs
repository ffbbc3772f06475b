// Identifier and payload types shared by the front-end bridge and the order
// coordinator.
//
// `UserId` and `ChannelId` are the chat platform's snowflake ids, carried
// through opaquely: the coordinator never interprets a channel id, it only
// hands it back when replying. `OrderId` is assigned by the order queue and is
// unique for the lifetime of the process.
//
// `Item` is the normalized record produced by the external item catalog. The
// coordinator only counts, truncates, and forwards items; it never decodes
// their fields.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Chat-platform user id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing order id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque reply destination (a chat channel or DM handle).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

/// Identity of the user issuing a command, as reported by the front-end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub name: String,
    /// The user holds the usage-limited temporary access tier.
    #[serde(default)]
    pub temporary_access: bool,
}

/// A normalized item record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: u16,
    pub count: u16,
    #[serde(default)]
    pub flags: u32,
}

impl Item {
    /// The "no item" sentinel used for an empty order.
    pub const NONE_ID: u16 = 0xFFFE;

    pub fn new(id: u16) -> Self {
        Self {
            id,
            count: 0,
            flags: 0,
        }
    }
}

/// A request to substitute a villager into the session alongside the items.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillagerRequest {
    /// Internal villager identifier (e.g. `"cat07"`).
    pub internal_name: String,
    /// Human-readable villager name.
    pub display_name: String,
}

/// Raw order input as typed or uploaded by the user. Parsing is the item
/// catalog's job.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderInput {
    pub text: String,
    #[serde(default)]
    pub attachment: Option<Vec<u8>>,
    /// Catalogue orders never duplicate items.
    #[serde(default)]
    pub catalogue: bool,
}
