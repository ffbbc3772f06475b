// islandbot_protocol: wire vocabulary between chat front-ends and the order
// coordinator (`islandbot_orders`).
//
// A front-end (the chat bot process) keeps one TCP connection to the
// coordinator. It forwards user commands as `FrontendMessage`s and posts
// whatever `BotMessage`s come back. Neither side depends on the other's
// internals; this crate is the whole contract.
//
// Module overview:
// - `types.rs`:    Id newtypes (`UserId`, `OrderId`, `ChannelId`), `UserInfo`,
//                  the normalized `Item` record, `VillagerRequest`, `OrderInput`.
// - `message.rs`:  `FrontendMessage` and `BotMessage`.
// - `framing.rs`:  Length-prefixed frames over any `Read`/`Write`.
//
// Messages are JSON-encoded inside frames, matching the coordinator's
// serde_json usage for its own config.

pub mod framing;
pub mod message;
pub mod types;

/// Version carried in `FrontendMessage::Hello`. The coordinator refuses
/// front-ends speaking any other version.
pub const PROTOCOL_VERSION: u32 = 1;

pub use framing::{MAX_FRAME_SIZE, read_frame, write_frame};
pub use message::{BotMessage, FrontendMessage};
pub use types::{ChannelId, Item, OrderId, OrderInput, UserId, UserInfo, VillagerRequest};
