// Durable ban list.
//
// The registry keeps the full set of banned identities in memory and mirrors
// it to a flat text file, one normalized identity per line. The file is read
// once at startup; every successful `add`/`remove` rewrites it in full while
// still holding the lock, so concurrent callers never interleave writes.
// Hundreds of entries is the expected scale, which keeps full rewrites cheap.
//
// Identities are normalized by trimming surrounding whitespace and
// lowercasing, so "  Alice#0001 " and "alice#0001" are the same entry. User
// ids are banned by their decimal string.
//
// Rewrites replace the file atomically (see `store.rs`). A failed rewrite
// is logged and the in-memory change stands: memory is authoritative until
// the next successful write, and the file keeps its previous contents.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use islandbot_protocol::types::UserId;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::store::write_lines;

/// Canonical form of an identity.
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

pub struct BanRegistry {
    path: PathBuf,
    banned: Mutex<BTreeSet<String>>,
}

impl BanRegistry {
    /// Load the ban list at `path`. A missing file is an empty list.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let banned = match fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .map(normalize_identity)
                .filter(|identity| !identity.is_empty())
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeSet::new(),
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        info!(path = %path.display(), count = banned.len(), "ban list loaded");
        Ok(Self {
            path,
            banned: Mutex::new(banned),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.banned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ban an identity. Returns false if it was already banned or is blank.
    pub fn add(&self, identity: &str) -> bool {
        let identity = normalize_identity(identity);
        if identity.is_empty() {
            return false;
        }
        let mut banned = self.lock();
        if !banned.insert(identity.clone()) {
            return false;
        }
        info!(identity = %identity, "identity banned");
        self.persist(&banned);
        true
    }

    /// Lift a ban. Returns false if the identity was not banned.
    pub fn remove(&self, identity: &str) -> bool {
        let identity = normalize_identity(identity);
        let mut banned = self.lock();
        if !banned.remove(&identity) {
            return false;
        }
        info!(identity = %identity, "identity unbanned");
        self.persist(&banned);
        true
    }

    pub fn is_banned(&self, identity: &str) -> bool {
        self.lock().contains(&normalize_identity(identity))
    }

    pub fn is_user_banned(&self, user: UserId) -> bool {
        self.is_banned(&user.to_string())
    }

    /// Sorted copy of every banned identity.
    pub fn identities(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn persist(&self, banned: &BTreeSet<String>) {
        if let Err(e) = write_lines(&self.path, banned.iter()) {
            warn!("ban list not persisted, memory and disk now differ: {e}");
        }
    }
}
