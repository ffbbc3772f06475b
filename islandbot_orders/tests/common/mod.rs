// In-memory stand-ins for the coordinator's collaborators.
//
// - `FakeCatalog` parses whitespace-separated item ids (hex with `0x`, or
//   decimal) plus an optional `villager:<name>` token, and flags item 0xDEAD
//   as unsafe.
// - `FakeLink` records every call, can be scripted to fail, to report
//   residual state, to hold `execute` until released, or to take a while
//   to restart (reporting itself dead meanwhile). It also tracks the most
//   console operations that were ever in progress at once.
// - `RecordingNotifier` keeps every notification in order.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use islandbot_orders::config::BotConfig;
use islandbot_orders::error::LinkError;
use islandbot_orders::external::{
    ConsoleLink, IslandSnapshot, ItemCatalog, NormalizedOrder, Notifier, OrderReport, ParseError,
    Sanity, SessionCode,
};
use islandbot_orders::queue::Order;
use islandbot_protocol::types::{ChannelId, Item, OrderId, OrderInput, UserId, VillagerRequest};

pub const UNSAFE_ITEM: u16 = 0xDEAD;

pub struct FakeCatalog;

impl ItemCatalog for FakeCatalog {
    fn normalize(&self, input: &OrderInput) -> Result<NormalizedOrder, ParseError> {
        let mut items = Vec::new();
        let mut villager = None;
        for token in input.text.split_whitespace() {
            if let Some(name) = token.strip_prefix("villager:") {
                villager = Some(VillagerRequest {
                    internal_name: name.to_lowercase(),
                    display_name: name.to_string(),
                });
                continue;
            }
            let parsed = match token.strip_prefix("0x") {
                Some(hex) => u16::from_str_radix(hex, 16),
                None => token.parse::<u16>(),
            };
            match parsed {
                Ok(id) => items.push(Item::new(id)),
                Err(_) => return Err(ParseError(format!("Unable to parse item: {token}"))),
            }
        }
        if items.is_empty() {
            items.push(Item::new(Item::NONE_ID));
        }
        Ok(NormalizedOrder { items, villager })
    }

    fn validate(&self, items: &[Item]) -> Sanity {
        if items.iter().any(|item| item.id == UNSAFE_ITEM) {
            Sanity::Unsafe(format!("item {UNSAFE_ITEM:#06x} is not allowed"))
        } else {
            Sanity::Sane
        }
    }
}

#[derive(Default)]
pub struct FakeLink {
    dead: AtomicBool,
    fail_restart: AtomicBool,
    scripted: Mutex<VecDeque<Result<OrderReport, LinkError>>>,
    executed: Mutex<Vec<OrderId>>,
    restarts: Mutex<Vec<(bool, bool)>>,
    idle_actions: AtomicUsize,
    codes_issued: AtomicU32,
    snapshot: Mutex<IslandSnapshot>,
    held: Mutex<bool>,
    released: Condvar,
    restart_delay: Mutex<Duration>,
    snapshots: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Counts one console operation as in progress while alive.
struct InProgress<'a>(&'a FakeLink);

impl<'a> InProgress<'a> {
    fn start(link: &'a FakeLink) -> Self {
        let now = link.active.fetch_add(1, Ordering::SeqCst) + 1;
        link.max_active.fetch_max(now, Ordering::SeqCst);
        Self(link)
    }
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    pub fn set_fail_restart(&self, fail: bool) {
        self.fail_restart.store(fail, Ordering::SeqCst);
    }

    /// Queue the result of a future `execute` call. Unscripted calls
    /// succeed without residual state.
    pub fn script(&self, result: Result<OrderReport, LinkError>) {
        self.scripted.lock().unwrap().push_back(result);
    }

    pub fn set_snapshot(&self, snapshot: IslandSnapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    /// Make `execute` block until `release`.
    pub fn hold(&self) {
        *self.held.lock().unwrap() = true;
    }

    pub fn release(&self) {
        *self.held.lock().unwrap() = false;
        self.released.notify_all();
    }

    pub fn executed(&self) -> Vec<OrderId> {
        self.executed.lock().unwrap().clone()
    }

    pub fn restarts(&self) -> Vec<(bool, bool)> {
        self.restarts.lock().unwrap().clone()
    }

    pub fn idle_actions(&self) -> usize {
        self.idle_actions.load(Ordering::SeqCst)
    }

    /// Make each `restart` take `delay`, with the link reporting dead until
    /// it finishes.
    pub fn set_restart_delay(&self, delay: Duration) {
        *self.restart_delay.lock().unwrap() = delay;
    }

    pub fn snapshots(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    /// Most console operations ever in progress at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl ConsoleLink for FakeLink {
    fn execute(&self, order: &Order) -> Result<OrderReport, LinkError> {
        let _busy = InProgress::start(self);
        let held = self.held.lock().unwrap();
        drop(self.released.wait_while(held, |held| *held).unwrap());
        self.executed.lock().unwrap().push(order.id);
        self.scripted
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(OrderReport::default()))
    }

    fn is_alive(&self) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }

    fn restart(
        &self,
        regenerate_map: bool,
        regenerate_terrain: bool,
    ) -> Result<SessionCode, LinkError> {
        let _busy = InProgress::start(self);
        let delay = *self.restart_delay.lock().unwrap();
        if !delay.is_zero() {
            self.dead.store(true, Ordering::SeqCst);
            std::thread::sleep(delay);
        }
        self.restarts
            .lock()
            .unwrap()
            .push((regenerate_map, regenerate_terrain));
        if self.fail_restart.load(Ordering::SeqCst) {
            return Err(LinkError::Disconnected);
        }
        self.dead.store(false, Ordering::SeqCst);
        let n = self.codes_issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SessionCode(format!("CODE{n}")))
    }

    fn snapshot(&self) -> Result<IslandSnapshot, LinkError> {
        let _busy = InProgress::start(self);
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.lock().unwrap().clone())
    }

    fn idle_action(&self) -> Result<(), LinkError> {
        let _busy = InProgress::start(self);
        self.idle_actions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    Reply(ChannelId, UserId, String),
    Broadcast(ChannelId, String),
    Revoke(UserId),
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    /// Texts of every reply addressed to `user`.
    pub fn replies_to(&self, user: UserId) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter_map(|notice| match notice {
                Notice::Reply(_, to, text) if to == user => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn broadcasts(&self) -> Vec<(ChannelId, String)> {
        self.notices()
            .into_iter()
            .filter_map(|notice| match notice {
                Notice::Broadcast(channel, text) => Some((channel, text)),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn reply(&self, channel: ChannelId, user: UserId, text: String) {
        self.notices
            .lock()
            .unwrap()
            .push(Notice::Reply(channel, user, text));
    }

    fn broadcast(&self, channel: ChannelId, text: String) {
        self.notices
            .lock()
            .unwrap()
            .push(Notice::Broadcast(channel, text));
    }

    fn revoke_temporary_access(&self, user: UserId) {
        self.notices.lock().unwrap().push(Notice::Revoke(user));
    }
}

/// A config whose durable files all live in `dir`, with fast loops.
pub fn test_config(dir: &tempfile::TempDir) -> BotConfig {
    let mut config = BotConfig {
        port: 0,
        ban_list_path: dir.path().join("globalban.txt"),
        temp_access_path: dir.path().join("tempuser.txt"),
        worker_poll_ms: 10,
        ..BotConfig::default()
    };
    config.restore.session_code_path = dir.path().join("Dodo.txt");
    config.restore.visitor_count_path = dir.path().join("Visitors.txt");
    config.restore.visitor_list_path = dir.path().join("VisitorsList.txt");
    config.restore.villager_path = dir.path().join("Villagers.txt");
    config.restore.check_interval_ms = 10;
    config
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
