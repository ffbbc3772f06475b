// islandbot_orders: order coordinator for a shared island session.
//
// Many chat users ask for items (and optionally a villager) to be delivered
// into one remote game session that can only serve a single operation at a
// time. This crate decides which requests are accepted, queues them fairly,
// runs them one by one against the session, tracks banned users and
// temporary-tier usage, and restores the session after a crash.
//
// Module overview:
// - `config.rs`:       `BotConfig` and its groups, loaded from JSON.
// - `error.rs`:        Config, durable-store and console-link errors.
// - `external.rs`:     Collaborator traits: `ItemCatalog`, `ConsoleLink`,
//                      `Notifier`.
// - `abuse.rs`:        `BanRegistry`, the durable ban list.
// - `temp_access.rs`:  `TemporaryAccessTracker`, durable per-user trial
//                      counters with expiry.
// - `queue.rs`:        `OrderQueue`, FIFO of accepted orders with positions
//                      and ETAs.
// - `admission.rs`:    `AdmissionController`, the ordered accept/reject
//                      checks and per-user cooldowns.
// - `store.rs`:        Atomic whole-file rewrites for the durable stores
//                      and restore outputs.
// - `console.rs`:      `ConsoleSession`, shared Clean/Dirty state, the
//                      current session code, known visitors, and the
//                      guard that keeps console operations exclusive.
// - `worker.rs`:       `ExecutionWorker`, the single consumer of the queue.
// - `restore.rs`:      `RestoreSupervisor`, the crash recovery loop.
// - `handle.rs`:       Stop handles for the two background loops.
// - `server.rs`:       TCP bridge to chat front-ends, wiring everything
//                      above together (`start_bot`).
//
// Dependencies: `islandbot_protocol` (messages and framing). The chat
// platform, the item catalog and the console link live outside this crate
// and are passed in through `Services`.

pub mod abuse;
pub mod admission;
pub mod config;
pub mod console;
pub mod error;
pub mod external;
pub mod handle;
pub mod queue;
pub mod restore;
pub mod server;
pub mod store;
pub mod temp_access;
pub mod worker;

pub use config::BotConfig;
pub use server::{BotHandle, Services, start_bot};
