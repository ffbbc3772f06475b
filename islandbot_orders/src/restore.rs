// Session recovery loop.
//
// `RestoreSupervisor` polls the console link on its own thread, independent
// of the execution worker. While the link answers it only keeps watch: when
// visitor tracking is on (restore-only mode or arrival channels configured)
// it snapshots the island and posts each newly arrived visitor to the
// arrival channels, and in restore-only mode with the idle filler enabled it
// runs the link's idle action. When the link stops answering it:
//
//   1. restarts the session, regenerating the map (and terrain, which only
//      takes effect together with the map) when configured
//   2. reads the visitor and villager snapshot
//   3. overwrites the four restore output files
//   4. posts the new session code to every echo channel
//   5. marks the shared session clean under the new code
//
// A failed restart leaves everything untouched and is retried next cycle.
// A failed snapshot or file write is logged and the cycle still completes.
// Each cycle runs under the console guard, taken without waiting: while the
// worker is executing or restarting, the cycle reports `Busy` and does
// nothing, so a restore never overlaps another console operation.

use std::sync::Arc;
use std::thread;

use islandbot_protocol::types::ChannelId;
use tracing::{debug, error, info, warn};

use crate::config::RestoreConfig;
use crate::console::ConsoleSession;
use crate::error::{LinkError, StoreError};
use crate::external::{ConsoleLink, IslandSnapshot, Notifier, SessionCode};
use crate::handle::LoopHandle;
use crate::store::write_text;

/// Maximum number of visitors a session holds, shown in the verbose count.
pub const SESSION_CAPACITY: usize = 7;

pub type SupervisorHandle = LoopHandle;

/// What one `run_cycle` did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The link answered; nothing to do.
    Alive,
    /// The link answered and the idle filler ran.
    Idle,
    /// Another loop holds the console; try again next cycle.
    Busy,
    Restored(SessionCode),
    RestartFailed(LinkError),
}

pub struct RestoreSupervisor {
    config: RestoreConfig,
    link: Arc<dyn ConsoleLink>,
    session: Arc<ConsoleSession>,
    notifier: Arc<dyn Notifier>,
}

impl RestoreSupervisor {
    pub fn new(
        config: RestoreConfig,
        link: Arc<dyn ConsoleLink>,
        session: Arc<ConsoleSession>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            link,
            session,
            notifier,
        }
    }

    /// Run `run_cycle` every `check_interval_ms` until stopped.
    pub fn spawn(self) -> std::io::Result<SupervisorHandle> {
        let interval = self.config.check_interval();
        LoopHandle::spawn("restore-supervisor", move || {
            self.run_cycle();
            thread::sleep(interval);
        })
    }

    pub fn run_cycle(&self) -> RestoreOutcome {
        let Some(_console) = self.session.try_lock_console() else {
            debug!("console in use, skipping restore cycle");
            return RestoreOutcome::Busy;
        };

        if self.link.is_alive() {
            if self.config.tracks_visitors() {
                self.watch_arrivals();
            }
            if self.config.restore_only_mode && self.config.idle_filler {
                if let Err(e) = self.link.idle_action() {
                    debug!("idle action failed: {e}");
                }
                return RestoreOutcome::Idle;
            }
            return RestoreOutcome::Alive;
        }

        warn!("console link unresponsive, restoring session");
        let code = match self.link.restart(
            self.config.refresh_map,
            self.config.effective_refresh_terrain(),
        ) {
            Ok(code) => code,
            Err(e) => {
                error!("session restore failed: {e}");
                return RestoreOutcome::RestartFailed(e);
            }
        };

        let snapshot = self.link.snapshot().unwrap_or_else(|e| {
            warn!("snapshot after restore failed: {e}");
            IslandSnapshot::default()
        });

        if let Err(e) = write_restore_outputs(&self.config, &code, &snapshot) {
            warn!("restore outputs not written: {e}");
        }
        announce_session_code(self.notifier.as_ref(), &self.config.echo_channels, &code);
        // Whoever is on the fresh session is the baseline, not an arrival.
        self.session.record_visitors(snapshot.visitors.clone());
        self.session.mark_restarted(code.clone());
        info!(
            code = %code.0,
            visitors = snapshot.visitors.len(),
            "session restored"
        );
        RestoreOutcome::Restored(code)
    }

    /// Refresh the known visitor list and post each newcomer to the arrival
    /// channels.
    fn watch_arrivals(&self) {
        let snapshot = match self.link.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                debug!("visitor snapshot failed: {e}");
                return;
            }
        };
        let arrived = self.session.record_visitors(snapshot.visitors);
        if arrived.is_empty() {
            return;
        }
        let code = self
            .session
            .session_code()
            .filter(|_| self.config.post_code_with_arrivals);
        for name in &arrived {
            info!(visitor = %name, "visitor arrived");
            let text = match &code {
                Some(code) => format!("{name} has arrived on the island. Session code: {}", code.0),
                None => format!("{name} has arrived on the island."),
            };
            for &channel in &self.config.arrival_echo_channels {
                self.notifier.broadcast(channel, text.clone());
            }
        }
    }
}

/// Post a fresh session code to each channel.
pub fn announce_session_code(notifier: &dyn Notifier, channels: &[ChannelId], code: &SessionCode) {
    for &channel in channels {
        notifier.broadcast(channel, format!("New session code: {}", code.0));
    }
}

/// Overwrite the session code, visitor count, visitor list and villager
/// files. With `minimize_details` each file holds only the bare value.
pub fn write_restore_outputs(
    config: &RestoreConfig,
    code: &SessionCode,
    snapshot: &IslandSnapshot,
) -> Result<(), StoreError> {
    let visitor_count = snapshot.visitors.len();
    let (code_text, count_text, visitor_text, villager_text) = if config.minimize_details {
        (
            code.0.clone(),
            visitor_count.to_string(),
            snapshot.visitors.join(", "),
            snapshot.villagers.join(", "),
        )
    } else {
        (
            format!("Session code: {}", code.0),
            format!("Visitors: {visitor_count}/{SESSION_CAPACITY}"),
            titled_list("Visitors", "No visitors", &snapshot.visitors),
            titled_list("Villagers", "No villagers", &snapshot.villagers),
        )
    };

    write_text(&config.session_code_path, &code_text)?;
    write_text(&config.visitor_count_path, &count_text)?;
    write_text(&config.visitor_list_path, &visitor_text)?;
    write_text(&config.villager_path, &villager_text)
}

/// Reply text for the visitor list request.
pub fn format_visitor_list(visitors: &[String]) -> String {
    if visitors.is_empty() {
        return "There are no visitors on the island.".to_string();
    }
    format!(
        "Visitors ({}/{SESSION_CAPACITY}): {}",
        visitors.len(),
        visitors.join(", ")
    )
}

fn titled_list(title: &str, empty: &str, names: &[String]) -> String {
    if names.is_empty() {
        return empty.to_string();
    }
    let mut text = format!("{title}:");
    for name in names {
        text.push('\n');
        text.push_str(name);
    }
    text
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;

    fn config_in(dir: &tempfile::TempDir, minimize_details: bool) -> RestoreConfig {
        RestoreConfig {
            session_code_path: dir.path().join("Dodo.txt"),
            visitor_count_path: dir.path().join("Visitors.txt"),
            visitor_list_path: dir.path().join("VisitorsList.txt"),
            villager_path: dir.path().join("Villagers.txt"),
            minimize_details,
            ..RestoreConfig::default()
        }
    }

    fn snapshot() -> IslandSnapshot {
        IslandSnapshot {
            visitors: vec!["Ann".into(), "Bo".into()],
            villagers: vec!["Rosie".into()],
        }
    }

    #[test]
    fn verbose_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir, false);
        write_restore_outputs(&config, &SessionCode("J1K2L".into()), &snapshot()).unwrap();
        let read = |p: &Path| fs::read_to_string(p).unwrap();
        assert_eq!(read(&config.session_code_path), "Session code: J1K2L");
        assert_eq!(read(&config.visitor_count_path), "Visitors: 2/7");
        assert_eq!(read(&config.visitor_list_path), "Visitors:\nAnn\nBo");
        assert_eq!(read(&config.villager_path), "Villagers:\nRosie");
    }

    #[test]
    fn minimized_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir, true);
        write_restore_outputs(&config, &SessionCode("J1K2L".into()), &snapshot()).unwrap();
        let read = |p: &Path| fs::read_to_string(p).unwrap();
        assert_eq!(read(&config.session_code_path), "J1K2L");
        assert_eq!(read(&config.visitor_count_path), "2");
        assert_eq!(read(&config.visitor_list_path), "Ann, Bo");
    }

    #[test]
    fn empty_island_verbose() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir, false);
        write_restore_outputs(&config, &SessionCode("X".into()), &IslandSnapshot::default())
            .unwrap();
        assert_eq!(
            fs::read_to_string(&config.visitor_list_path).unwrap(),
            "No visitors"
        );
    }

    #[test]
    fn visitor_list_reply() {
        assert_eq!(
            format_visitor_list(&snapshot().visitors),
            "Visitors (2/7): Ann, Bo"
        );
        assert_eq!(format_visitor_list(&[]), "There are no visitors on the island.");
    }

    #[test]
    fn unwritable_output_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(&dir, true);
        config.session_code_path = dir.path().join("missing").join("Dodo.txt");
        let err = write_restore_outputs(&config, &SessionCode("X".into()), &snapshot())
            .unwrap_err();
        assert!(err.to_string().contains("Dodo.txt"));
    }
}
