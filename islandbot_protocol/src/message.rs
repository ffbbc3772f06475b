// Messages exchanged between a chat front-end and the order coordinator.
//
// - `FrontendMessage`: commands relayed from chat users (and operators) to
//   the coordinator.
// - `BotMessage`: everything the coordinator pushes back. Most variants are
//   replies addressed to the channel the command came from; `Broadcast` and
//   `RevokeTemporaryRole` are unsolicited and originate from the execution
//   worker or the restore supervisor.
//
// Replies carry human-readable text. The front-end posts them verbatim and
// never has to understand queue semantics.

use serde::{Deserialize, Serialize};

use crate::types::{ChannelId, OrderInput, UserId, UserInfo};

/// Messages sent by a chat front-end to the coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FrontendMessage {
    /// Handshake; must be the first frame on a connection.
    Hello {
        protocol_version: u32,
        front_end: String,
    },
    /// Submit an item/villager order.
    Order {
        user: UserInfo,
        channel: ChannelId,
        input: OrderInput,
    },
    /// Ask for the user's queue position and ETA.
    QueuePosition { user: UserInfo, channel: ChannelId },
    /// Withdraw the user's own queued order.
    LeaveQueue { user: UserInfo, channel: ChannelId },
    /// Operator: withdraw someone else's queued order.
    RemoveUser {
        operator: UserInfo,
        channel: ChannelId,
        target: UserId,
    },
    /// Operator: add an identity to the ban list.
    Ban {
        operator: UserInfo,
        channel: ChannelId,
        identity: String,
    },
    /// Operator: remove an identity from the ban list.
    Unban {
        operator: UserInfo,
        channel: ChannelId,
        identity: String,
    },
    /// Operator: report whether the next order will restart the session.
    CheckState { operator: UserInfo, channel: ChannelId },
    /// Operator: list the names currently queued.
    QueueList { operator: UserInfo, channel: ChannelId },
    /// List the visitors on the island. Open to everyone in restore-only
    /// mode, operators only otherwise.
    VisitorList { user: UserInfo, channel: ChannelId },
    /// The front-end is disconnecting.
    Goodbye,
}

/// Messages sent by the coordinator to a front-end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BotMessage {
    /// Handshake accepted.
    Welcome {
        bot_name: String,
        queue_capacity: usize,
    },
    /// Handshake rejected; the connection is closed afterwards.
    Rejected { reason: String },
    /// Text addressed to one user in one channel.
    Reply {
        channel: ChannelId,
        user: UserId,
        text: String,
    },
    /// Text for a channel with no particular addressee (session codes).
    Broadcast { channel: ChannelId, text: String },
    /// The user's temporary access tier has been used up.
    RevokeTemporaryRole { user: UserId },
}

impl BotMessage {
    /// Text of a `Reply` or `Broadcast`, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            BotMessage::Reply { text, .. } | BotMessage::Broadcast { text, .. } => Some(text),
            _ => None,
        }
    }
}
