// TCP bridge between chat front-ends and the order coordinator.
//
// Architecture: thread-per-reader with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts connections
//   and sends `InternalEvent::NewConnection` to the dispatch thread.
// - **Connection threads** (one per front-end, spawned by the dispatch
//   thread): read the `Hello` handshake under a timeout, reject a protocol
//   mismatch themselves, and hand the write half over with
//   `InternalEvent::Joined`. They then call `read_frame()` in a loop,
//   deserialize `FrontendMessage`, and send `InternalEvent::MessageFrom`.
//   On error/EOF/Goodbye they send `InternalEvent::Disconnected`. The
//   dispatch thread never reads from a socket, so a slow or silent client
//   cannot hold up anyone else.
// - **Dispatch thread**: owns every front-end's write half, runs commands
//   against the queue, admission controller and ban list, and writes the
//   replies. The execution worker and restore supervisor reach the
//   front-ends through `ChannelNotifier`, which turns each notification into
//   an `InternalEvent::Notify` on the same channel. Their messages therefore
//   interleave with command replies on the one thread that writes to
//   sockets.
//
// Command replies go back to the front-end that sent the command.
// Notifications (order progress, session codes, role revocations) go to
// every connected front-end, since the coordinator cannot tell which one
// serves a given channel.
//
// Operator commands (`RemoveUser`, `Ban`, `Unban`, `CheckState`,
// `QueueList`) are refused unless the issuing user is in `sudo_users`.
// `VisitorList` is open to everyone in restore-only mode and to operators
// otherwise.
//
// Shutdown: `BotHandle::stop` clears `keep_running`, joins the dispatch
// thread, then stops the worker and the supervisor.

use std::collections::HashMap;
use std::io::{self, BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use islandbot_protocol::framing::{read_frame, write_frame};
use islandbot_protocol::message::{BotMessage, FrontendMessage};
use islandbot_protocol::types::{ChannelId, OrderInput, UserId, UserInfo};
use islandbot_protocol::PROTOCOL_VERSION;
use tracing::{debug, error, info, warn};

use crate::abuse::BanRegistry;
use crate::admission::{AdmissionController, CommandKind, OrderRequest};
use crate::config::BotConfig;
use crate::console::ConsoleSession;
use crate::external::{ConsoleLink, ItemCatalog, Notifier};
use crate::handle::LoopHandle;
use crate::queue::{OrderQueue, format_eta};
use crate::restore::{RestoreSupervisor, format_visitor_list};
use crate::temp_access::TemporaryAccessTracker;
use crate::worker::ExecutionWorker;

/// Identifies one front-end connection for the lifetime of the process.
type ConnectionId = u64;

const DISPATCH_TICK: Duration = Duration::from_millis(100);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Events sent from listener/reader threads and notifiers to the dispatch
/// thread.
enum InternalEvent {
    NewConnection {
        stream: TcpStream,
    },
    /// A connection completed the handshake.
    Joined {
        connection: ConnectionId,
        front_end: String,
        writer: BufWriter<TcpStream>,
    },
    MessageFrom {
        connection: ConnectionId,
        message: FrontendMessage,
    },
    Disconnected {
        connection: ConnectionId,
    },
    Notify(BotMessage),
}

/// `Notifier` that hands messages to the dispatch thread.
struct ChannelNotifier {
    tx: Sender<InternalEvent>,
}

impl ChannelNotifier {
    fn send(&self, message: BotMessage) {
        if self.tx.send(InternalEvent::Notify(message)).is_err() {
            debug!("notification dropped, dispatch thread has stopped");
        }
    }
}

impl Notifier for ChannelNotifier {
    fn reply(&self, channel: ChannelId, user: UserId, text: String) {
        self.send(BotMessage::Reply {
            channel,
            user,
            text,
        });
    }

    fn broadcast(&self, channel: ChannelId, text: String) {
        self.send(BotMessage::Broadcast { channel, text });
    }

    fn revoke_temporary_access(&self, user: UserId) {
        self.send(BotMessage::RevokeTemporaryRole { user });
    }
}

/// Collaborators supplied by the embedding process.
#[derive(Clone)]
pub struct Services {
    pub catalog: Arc<dyn ItemCatalog>,
    pub link: Arc<dyn ConsoleLink>,
}

/// Handle returned by `start_bot` to control the running coordinator.
pub struct BotHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    worker: Option<LoopHandle>,
    supervisor: LoopHandle,
    queue: Arc<OrderQueue>,
    session: Arc<ConsoleSession>,
}

impl BotHandle {
    /// Whether the execution worker was started (false in restore-only
    /// mode).
    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    pub fn queue(&self) -> &Arc<OrderQueue> {
        &self.queue
    }

    pub fn session(&self) -> &Arc<ConsoleSession> {
        &self.session
    }

    /// Stop accepting commands, then stop the worker and the supervisor.
    /// An order already executing finishes first.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        self.supervisor.stop();
        info!("coordinator stopped");
    }
}

/// Load the durable stores, start the worker (unless in restore-only mode)
/// and the restore supervisor, and serve front-ends on `config.port`.
/// Returns the handle and the bound address (port 0 lets the OS pick).
pub fn start_bot(config: BotConfig, services: Services) -> io::Result<(BotHandle, SocketAddr)> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", config.port))?;
    let addr = listener.local_addr()?;
    let config = Arc::new(config);

    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();
    let notifier: Arc<dyn Notifier> = Arc::new(ChannelNotifier { tx: tx.clone() });

    let bans = Arc::new(BanRegistry::load(&config.ban_list_path).map_err(io::Error::other)?);
    let tracker = Arc::new(
        TemporaryAccessTracker::load(
            &config.temp_access_path,
            config.temp_access.clone(),
            notifier.clone(),
        )
        .map_err(io::Error::other)?,
    );
    let queue = Arc::new(OrderQueue::from_config(&config.order));
    let session = Arc::new(ConsoleSession::new());
    let admission = AdmissionController::new(
        config.clone(),
        queue.clone(),
        bans.clone(),
        services.catalog.clone(),
    );

    let supervisor = RestoreSupervisor::new(
        config.restore.clone(),
        services.link.clone(),
        session.clone(),
        notifier.clone(),
    )
    .spawn()?;

    let worker = if config.restore.restore_only_mode {
        info!("restore-only mode: orders are refused and no worker runs");
        None
    } else {
        let spawned = ExecutionWorker::new(
            queue.clone(),
            session.clone(),
            services.link.clone(),
            tracker,
            notifier,
            config.worker_poll(),
        )
        .with_echo_channels(config.restore.echo_channels.clone())
        .spawn();
        match spawned {
            Ok(worker) => Some(worker),
            Err(e) => {
                supervisor.stop();
                return Err(e);
            }
        }
    };

    let keep_running = Arc::new(AtomicBool::new(true));
    let dispatcher = Dispatcher {
        config,
        catalog: services.catalog,
        admission,
        queue: queue.clone(),
        bans,
        session: session.clone(),
        front_ends: HashMap::new(),
        next_connection: 0,
    };
    let keep_running_dispatch = keep_running.clone();
    let thread = thread::spawn(move || {
        run_dispatch(listener, dispatcher, tx, rx, keep_running_dispatch);
    });

    info!(%addr, "coordinator listening");
    Ok((
        BotHandle {
            keep_running,
            thread: Some(thread),
            worker,
            supervisor,
            queue,
            session,
        },
        addr,
    ))
}

/// Dispatch loop. Runs until `keep_running` is set to false.
fn run_dispatch(
    listener: TcpListener,
    mut dispatcher: Dispatcher,
    tx: Sender<InternalEvent>,
    rx: Receiver<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    // Non-blocking so the accept thread can check keep_running.
    listener.set_nonblocking(true).ok();

    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false).ok();
                    let _ = tx_listener.send(InternalEvent::NewConnection { stream });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    error!("accept failed: {e}");
                    break;
                }
            }
        }
    });

    while keep_running.load(Ordering::SeqCst) {
        match rx.recv_timeout(DISPATCH_TICK) {
            Ok(event) => dispatcher.handle_event(event, &tx, &keep_running),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Handshake, then the reader loop, for one front-end. Runs in its own
/// thread.
fn connection_thread(
    stream: TcpStream,
    connection: ConnectionId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).ok();
    let (Ok(read_half), Ok(write_half)) = (stream.try_clone(), stream.try_clone()) else {
        return;
    };
    let mut reader = BufReader::new(read_half);
    let mut writer = BufWriter::new(write_half);

    let hello = read_frame(&mut reader)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<FrontendMessage>(&bytes).ok());
    let Some(FrontendMessage::Hello {
        protocol_version,
        front_end,
    }) = hello
    else {
        debug!(connection, "connection dropped before handshake");
        return;
    };

    if protocol_version != PROTOCOL_VERSION {
        warn!(%front_end, protocol_version, "front-end refused: protocol mismatch");
        let _ = send_message(
            &mut writer,
            &BotMessage::Rejected {
                reason: format!(
                    "protocol version {protocol_version} not supported (expected {PROTOCOL_VERSION})"
                ),
            },
        );
        return;
    }

    stream.set_read_timeout(None).ok();
    let joined = InternalEvent::Joined {
        connection,
        front_end,
        writer,
    };
    if tx.send(joined).is_err() {
        return;
    }
    reader_loop(reader, connection, tx, keep_running);
}

/// Reader loop for one front-end.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    connection: ConnectionId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        let message = read_frame(&mut reader)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<FrontendMessage>(&bytes).ok());
        match message {
            Some(FrontendMessage::Goodbye) | None => {
                let _ = tx.send(InternalEvent::Disconnected { connection });
                break;
            }
            Some(message) => {
                let _ = tx.send(InternalEvent::MessageFrom {
                    connection,
                    message,
                });
            }
        }
    }
}

fn send_message(writer: &mut BufWriter<TcpStream>, message: &BotMessage) -> io::Result<()> {
    let json = serde_json::to_vec(message).map_err(io::Error::other)?;
    write_frame(writer, &json)
}

/// State owned by the dispatch thread.
struct Dispatcher {
    config: Arc<BotConfig>,
    catalog: Arc<dyn ItemCatalog>,
    admission: AdmissionController,
    queue: Arc<OrderQueue>,
    bans: Arc<BanRegistry>,
    session: Arc<ConsoleSession>,
    front_ends: HashMap<ConnectionId, BufWriter<TcpStream>>,
    next_connection: ConnectionId,
}

impl Dispatcher {
    fn handle_event(
        &mut self,
        event: InternalEvent,
        tx: &Sender<InternalEvent>,
        keep_running: &Arc<AtomicBool>,
    ) {
        match event {
            InternalEvent::NewConnection { stream } => {
                self.handle_new_connection(stream, tx, keep_running);
            }
            InternalEvent::Joined {
                connection,
                front_end,
                writer,
            } => self.handle_joined(connection, front_end, writer),
            InternalEvent::MessageFrom {
                connection,
                message,
            } => {
                if let Some(reply) = self.handle_message(message) {
                    self.send_to(connection, &reply);
                }
            }
            InternalEvent::Disconnected { connection } => {
                if self.front_ends.remove(&connection).is_some() {
                    info!(connection, "front-end disconnected");
                }
            }
            InternalEvent::Notify(message) => self.send_to_all(&message),
        }
    }

    /// Give the connection an id and hand it to its own thread.
    fn handle_new_connection(
        &mut self,
        stream: TcpStream,
        tx: &Sender<InternalEvent>,
        keep_running: &Arc<AtomicBool>,
    ) {
        let connection = self.next_connection;
        self.next_connection += 1;
        let tx_connection = tx.clone();
        let keep_running_connection = keep_running.clone();
        thread::spawn(move || {
            connection_thread(stream, connection, tx_connection, keep_running_connection);
        });
    }

    /// Welcome a front-end that passed the handshake and start routing to it.
    fn handle_joined(
        &mut self,
        connection: ConnectionId,
        front_end: String,
        mut writer: BufWriter<TcpStream>,
    ) {
        let welcome = BotMessage::Welcome {
            bot_name: self.config.bot_name.clone(),
            queue_capacity: self.queue.capacity(),
        };
        if let Err(e) = send_message(&mut writer, &welcome) {
            debug!(connection, "welcome not delivered: {e}");
            return;
        }
        self.front_ends.insert(connection, writer);
        info!(connection, %front_end, "front-end connected");
    }

    fn send_to(&mut self, connection: ConnectionId, message: &BotMessage) {
        let Some(writer) = self.front_ends.get_mut(&connection) else {
            return;
        };
        if let Err(e) = send_message(writer, message) {
            warn!(connection, "write to front-end failed: {e}");
            self.front_ends.remove(&connection);
        }
    }

    fn send_to_all(&mut self, message: &BotMessage) {
        self.front_ends
            .retain(|connection, writer| match send_message(writer, message) {
                Ok(()) => true,
                Err(e) => {
                    warn!(connection, "write to front-end failed: {e}");
                    false
                }
            });
    }

    /// Run one command and build its reply.
    fn handle_message(&self, message: FrontendMessage) -> Option<BotMessage> {
        let (channel, user, text) = match message {
            FrontendMessage::Order {
                user,
                channel,
                input,
            } => (channel, user.id, self.order(user, channel, &input)),
            FrontendMessage::QueuePosition { user, channel } => {
                (channel, user.id, self.queue_position(user.id))
            }
            FrontendMessage::LeaveQueue { user, channel } => {
                (channel, user.id, self.leave_queue(user.id))
            }
            FrontendMessage::RemoveUser {
                operator,
                channel,
                target,
            } => (
                channel,
                operator.id,
                self.sudo(&operator, || self.remove_user(target)),
            ),
            FrontendMessage::Ban {
                operator,
                channel,
                identity,
            } => (
                channel,
                operator.id,
                self.sudo(&operator, || self.ban(&identity)),
            ),
            FrontendMessage::Unban {
                operator,
                channel,
                identity,
            } => (
                channel,
                operator.id,
                self.sudo(&operator, || self.unban(&identity)),
            ),
            FrontendMessage::CheckState { operator, channel } => (
                channel,
                operator.id,
                self.sudo(&operator, || {
                    format!("Current state: {}", self.session.state())
                }),
            ),
            FrontendMessage::QueueList { operator, channel } => (
                channel,
                operator.id,
                self.sudo(&operator, || self.queue_list()),
            ),
            FrontendMessage::VisitorList { user, channel } => {
                (channel, user.id, self.visitor_list(user.id))
            }
            FrontendMessage::Hello { .. } | FrontendMessage::Goodbye => return None,
        };
        Some(BotMessage::Reply {
            channel,
            user,
            text,
        })
    }

    fn sudo(&self, operator: &UserInfo, command: impl FnOnce() -> String) -> String {
        if self.config.is_sudo(operator.id) {
            command()
        } else {
            warn!(user = %operator.id, "operator command refused");
            "You are not permitted to run this command.".to_string()
        }
    }

    fn order(&self, user: UserInfo, channel: ChannelId, input: &OrderInput) -> String {
        let normalized = match self.catalog.normalize(input) {
            Ok(normalized) => normalized,
            Err(e) => return e.0,
        };
        let request = OrderRequest {
            user,
            channel,
            items: normalized.items,
            villager: normalized.villager,
            catalogue: input.catalogue,
        };
        match self.admission.admit(request) {
            Ok(admitted) => admitted.message(),
            Err(rejection) => rejection.to_string(),
        }
    }

    fn queue_position(&self, user: UserId) -> String {
        if let Err(rejection) = self.admission.check_cooldown(
            user,
            CommandKind::Position,
            self.config.order.position_command_cooldown_secs,
        ) {
            return rejection.to_string();
        }
        match self.queue.position(user) {
            Some(1) => "You are next in the queue.".to_string(),
            Some(position) => format!(
                "You are in the queue at position {position}. Your predicted ETA is {}.",
                format_eta(self.queue.eta(position))
            ),
            None => "You are not in the queue.".to_string(),
        }
    }

    fn leave_queue(&self, user: UserId) -> String {
        match self.queue.request_skip(user) {
            Some(order) => {
                info!(user = %user, order_id = %order.id, "order withdrawn by owner");
                format!("Your order {} has been removed from the queue.", order.id)
            }
            None => "You are not in the queue.".to_string(),
        }
    }

    fn remove_user(&self, target: UserId) -> String {
        match self.queue.request_skip(target) {
            Some(order) => {
                info!(user = %target, order_id = %order.id, "order removed by operator");
                format!("Order {} by {} removed from the queue.", order.id, order.owner_name)
            }
            None => format!("User {target} is not in the queue."),
        }
    }

    fn ban(&self, identity: &str) -> String {
        if self.bans.add(identity) {
            format!("{} has been banned.", identity.trim())
        } else {
            format!("{} is already banned.", identity.trim())
        }
    }

    fn unban(&self, identity: &str) -> String {
        if self.bans.remove(identity) {
            format!("{} has been unbanned.", identity.trim())
        } else {
            format!("{} was not banned.", identity.trim())
        }
    }

    fn visitor_list(&self, user: UserId) -> String {
        if !self.config.restore.restore_only_mode && !self.config.is_sudo(user) {
            return "You may only view visitors in restore-only mode. \
                    Please respect the privacy of other visitors."
                .to_string();
        }
        format_visitor_list(&self.session.visitors())
    }

    fn queue_list(&self) -> String {
        let entries = self.queue.entries();
        if entries.is_empty() {
            return "The queue is empty.".to_string();
        }
        let mut text = format!("{} order(s) queued:", entries.len());
        for entry in entries {
            text.push_str(&format!(
                "\n{}. {} ({})",
                entry.position, entry.owner_name, entry.id
            ));
        }
        text
    }
}
