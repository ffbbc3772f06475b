// Usage tracking for the temporary access tier.
//
// Users holding the temporary tier may complete a limited number of orders.
// Each completed order by such a user goes through `record_order`, which
// creates or advances that user's active record. The order that reaches the
// limit marks the record expired and asks the front-end to revoke the tier.
// Expired records are kept as an audit trail; a user who is later granted the
// tier again starts a fresh record alongside the old ones. There is never
// more than one non-expired record per user.
//
// On disk: one record per line, rewritten in full after every change,
//
//     <user id>,<travel count>,<first order>,<last order>,<username>
//
// with RFC 3339 timestamps and the username prefixed by `[expired]` once the
// record is expired. The username is the remainder of the line and may
// contain commas. Line breaks in a username are stored as spaces so every
// record stays on one line. Malformed lines are skipped with a warning at
// load time.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use islandbot_protocol::types::UserId;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::TempAccessConfig;
use crate::error::StoreError;
use crate::external::Notifier;
use crate::store::write_lines;

const EXPIRED_PREFIX: &str = "[expired]";

/// `name` with carriage returns and line feeds turned into spaces.
fn single_line(name: &str) -> String {
    name.replace(['\r', '\n'], " ")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemporaryAccessRecord {
    pub user: UserId,
    pub travel_count: u32,
    pub first_order: DateTime<Utc>,
    pub last_order: DateTime<Utc>,
    pub username: String,
    pub expired: bool,
}

impl fmt::Display for TemporaryAccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}{}",
            self.user.0,
            self.travel_count,
            self.first_order.to_rfc3339(),
            self.last_order.to_rfc3339(),
            if self.expired { EXPIRED_PREFIX } else { "" },
            single_line(&self.username)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed temporary access record: {0}")]
pub struct RecordParseError(String);

impl FromStr for TemporaryAccessRecord {
    type Err = RecordParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.splitn(5, ',');
        let mut next = |name: &str| {
            fields
                .next()
                .ok_or_else(|| RecordParseError(format!("missing {name}")))
        };
        let user = next("user id")?;
        let travel_count = next("travel count")?;
        let first_order = next("first order date")?;
        let last_order = next("last order date")?;
        let username = next("username")?;

        let user = user
            .trim()
            .parse::<u64>()
            .map(UserId)
            .map_err(|_| RecordParseError(format!("bad user id {user:?}")))?;
        let travel_count = travel_count
            .trim()
            .parse::<u32>()
            .map_err(|_| RecordParseError(format!("bad travel count {travel_count:?}")))?;
        let parse_date = |text: &str| {
            DateTime::parse_from_rfc3339(text.trim())
                .map(|date| date.with_timezone(&Utc))
                .map_err(|_| RecordParseError(format!("bad date {text:?}")))
        };
        let first_order = parse_date(first_order)?;
        let last_order = parse_date(last_order)?;
        let (username, expired) = match username.strip_prefix(EXPIRED_PREFIX) {
            Some(rest) => (rest, true),
            None => (username, false),
        };

        Ok(Self {
            user,
            travel_count,
            first_order,
            last_order,
            username: username.to_string(),
            expired,
        })
    }
}

/// What `record_order` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TempAccessOutcome {
    FirstUse { remaining: u32 },
    ContinuedUse { remaining: u32 },
    Expired,
}

impl TempAccessOutcome {
    /// Text shown to the user after the order.
    pub fn notice(&self) -> String {
        match self {
            TempAccessOutcome::FirstUse { remaining } => format!(
                "Your temporary access is now active. You have {remaining} order(s) left."
            ),
            TempAccessOutcome::ContinuedUse { remaining } => {
                format!("Your temporary access has {remaining} order(s) left.")
            }
            TempAccessOutcome::Expired => {
                "Your temporary access has now expired. Access will be removed after this order."
                    .to_string()
            }
        }
    }
}

/// Read every well-formed record from `path`. A missing file is empty.
pub fn read_records(path: &Path) -> Result<Vec<TemporaryAccessRecord>, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    let mut records = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse() {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), line = index + 1, "skipping record: {e}"),
        }
    }
    Ok(records)
}

pub struct TemporaryAccessTracker {
    path: PathBuf,
    config: TempAccessConfig,
    records: Mutex<Vec<TemporaryAccessRecord>>,
    notifier: Arc<dyn Notifier>,
}

impl TemporaryAccessTracker {
    pub fn load(
        path: impl Into<PathBuf>,
        config: TempAccessConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let records = read_records(&path)?;
        info!(path = %path.display(), count = records.len(), "temporary access records loaded");
        Ok(Self {
            path,
            config,
            records: Mutex::new(records),
            notifier,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TemporaryAccessRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one completed order by a temporary-tier user.
    pub fn record_order(
        &self,
        user: UserId,
        username: &str,
        now: DateTime<Utc>,
    ) -> TempAccessOutcome {
        let limit = self.config.max_orders;
        let username = single_line(username);
        let mut records = self.lock();
        let active = records.iter().position(|r| r.user == user && !r.expired);

        let outcome = match active {
            None => {
                let expired = limit <= 1;
                records.push(TemporaryAccessRecord {
                    user,
                    travel_count: 1,
                    first_order: now,
                    last_order: now,
                    username: username.clone(),
                    expired,
                });
                if expired {
                    TempAccessOutcome::Expired
                } else {
                    TempAccessOutcome::FirstUse {
                        remaining: limit - 1,
                    }
                }
            }
            Some(index) => {
                let record = &mut records[index];
                let count = record.travel_count + 1;
                let window_passed = self.config.expire_after_secs.is_some_and(|secs| {
                    i64::try_from(secs)
                        .ok()
                        .and_then(ChronoDuration::try_seconds)
                        .and_then(|window| record.first_order.checked_add_signed(window))
                        .is_some_and(|deadline| now >= deadline)
                });
                record.travel_count = count;
                record.last_order = now;
                record.username.clone_from(&username);
                if count >= limit || window_passed {
                    record.expired = true;
                    TempAccessOutcome::Expired
                } else {
                    TempAccessOutcome::ContinuedUse {
                        remaining: limit - count,
                    }
                }
            }
        };

        if let Err(e) = write_lines(&self.path, records.iter().map(ToString::to_string)) {
            warn!("temporary access records not persisted, memory and disk now differ: {e}");
        }
        drop(records);

        match outcome {
            TempAccessOutcome::Expired => {
                info!(user = %user, %username, "temporary access expired");
                self.notifier.revoke_temporary_access(user);
            }
            _ => info!(user = %user, %username, ?outcome, "temporary access order recorded"),
        }
        outcome
    }

    /// The user's non-expired record, if any.
    pub fn active_record(&self, user: UserId) -> Option<TemporaryAccessRecord> {
        self.lock()
            .iter()
            .find(|r| r.user == user && !r.expired)
            .cloned()
    }

    pub fn records(&self) -> Vec<TemporaryAccessRecord> {
        self.lock().clone()
    }
}
