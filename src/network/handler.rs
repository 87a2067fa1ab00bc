//! Per-connection network handler.
//!
//! One handler owns one server connection for its whole life:
//!
//! ```text
//! Disconnected -> Connecting -> LoggingIn -> Active -> Closing -> Closed
//!                      \              \
//!                       `--------------`-> Closed (login failed)
//! ```
//!
//! After login the framed transport is split. The write half is owned by a
//! writer task fed through a bounded queue, so senders never hold the sink and
//! a stalled peer cannot block `close`. The read half is owned by a single
//! dispatch task that decodes every frame, hands responses to the
//! [`PendingTable`] and publishes events. A third task sends heartbeats.
//! A handler is never reused: reconnecting means building a new one.
//!
//! State moves forward only through compare-and-set transitions, so a `close`
//! racing a login always wins and the handler never comes back to `Active`.

use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::BotConfiguration;
use crate::core::codec::{DecodedFrame, RejectedFrame};
use crate::core::io::PacketReader;
use crate::core::packet::{Frame, KeyScope, KnownPacketId, OutgoingPacket, SequenceId};
use crate::error::{constants, ProtocolError, Result};
use crate::network::pending::{PendingGuard, PendingTable};
use crate::network::transport::{connect_any, Connector, Transport};
use crate::protocol::heartbeat::HeartbeatPacket;
use crate::protocol::login::{LoginPacket, LoginResponse, LoginResult};
use crate::protocol::{
    CodecTable, DecodeContext, HeartbeatAck, IncomingPacket, ResponsePacket, ServerEvent,
};
use crate::utils::crypto::{SessionCipher, SessionKey};
use crate::utils::metrics::{HandlerMetrics, MetricsSnapshot};
use crate::utils::timeout::with_timeout_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Disconnected,
    Connecting,
    LoggingIn,
    Active,
    Closing,
    Closed,
}

/// Frames queued for the writer task before senders start waiting
const WRITE_QUEUE_DEPTH: usize = 64;

type Writer = SplitSink<Transport, Frame>;

/// A frame for the writer task and the slot its write result goes to.
struct Outbound {
    frame: Frame,
    done: oneshot::Sender<Result<()>>,
}

struct WriterTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

struct Shared {
    bot: u32,
    state: Mutex<HandlerState>,
    session_key: RwLock<Option<SessionKey>>,
    outbound: Mutex<Option<mpsc::Sender<Outbound>>>,
    pending: PendingTable,
    codecs: CodecTable,
    events: broadcast::Sender<ServerEvent>,
    metrics: HandlerMetrics,
    next_sequence: AtomicU16,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, HandlerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: HandlerState) {
        let mut state = self.state();
        debug!(bot = self.bot, from = ?*state, to = ?next, "Handler state change");
        *state = next;
    }

    /// Move to `next` only if the handler is still in `expected`.
    fn transition(&self, expected: HandlerState, next: HandlerState) -> bool {
        let mut state = self.state();
        if *state != expected {
            debug!(bot = self.bot, state = ?*state, wanted = ?next, "Handler state change refused");
            return false;
        }
        debug!(bot = self.bot, from = ?*state, to = ?next, "Handler state change");
        *state = next;
        true
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::Sender<Outbound>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_key(&self) -> Option<SessionKey> {
        self.session_key
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_sequence_id(&self) -> SequenceId {
        // Skip ids that still have a waiter; give up after one full cycle.
        let mut candidate = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        for _ in 0..u16::MAX {
            if !self.pending.contains(candidate) {
                break;
            }
            candidate = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        }
        candidate
    }

    async fn send(&self, packet: &OutgoingPacket) -> Result<()> {
        let state = *self.state();
        match state {
            HandlerState::Active => {}
            HandlerState::Closing | HandlerState::Closed => return Err(ProtocolError::HandlerClosed),
            _ => return Err(ProtocolError::InvalidState(constants::ERR_NOT_ACTIVE.into())),
        }

        if let KeyScope::Session { generation } = packet.key_scope() {
            match self.current_key() {
                None => return Err(ProtocolError::NoSessionKey),
                Some(key) if key.generation() != generation => {
                    return Err(ProtocolError::StaleSessionKey)
                }
                Some(_) => {}
            }
        }

        let queue = self.outbound().clone().ok_or(ProtocolError::HandlerClosed)?;
        let frame = packet.to_frame();
        let size = frame.payload.len();

        let (done, written) = oneshot::channel();
        queue
            .send(Outbound { frame, done })
            .await
            .map_err(|_| ProtocolError::HandlerClosed)?;
        written.await.map_err(|_| ProtocolError::HandlerClosed)??;
        self.metrics.frame_sent(size);

        debug!(
            bot = self.bot,
            packet = packet.name(),
            sequence_id = packet.sequence_id(),
            "Packet sent"
        );
        Ok(())
    }

    async fn send_and_expect<T: ResponsePacket>(
        &self,
        packet: &OutgoingPacket,
        timeout: Duration,
    ) -> Result<T> {
        let sequence_id = packet.sequence_id();
        let rx = self.pending.register(sequence_id, packet.id())?;
        let _guard = PendingGuard::new(&self.pending, sequence_id);

        // One deadline covers queueing, writing and waiting for the answer.
        let exchange = async move {
            self.send(packet).await?;
            rx.await.map_err(|_| ProtocolError::HandlerClosed)?
        };
        let incoming = match with_timeout_error(exchange, timeout).await {
            Err(ProtocolError::Timeout) => {
                self.metrics.request_timeout();
                warn!(bot = self.bot, packet = packet.name(), sequence_id, "Request timed out");
                return Err(ProtocolError::Timeout);
            }
            other => other?,
        };

        T::from_incoming(incoming).map_err(|other| ProtocolError::UnexpectedMessage {
            expected: T::NAME,
            actual: other.name(),
        })
    }

    fn dispatch(&self, frame: Frame) {
        self.metrics.frame_received(frame.payload.len());

        let key = self.current_key();
        let ctx = DecodeContext {
            bot: self.bot,
            session_key: key.as_ref(),
        };

        match self.codecs.decode(&frame, &ctx) {
            Ok(IncomingPacket::Event(event)) => {
                self.metrics.event_published();
                // No subscribers is fine.
                let _ = self.events.send(event);
            }
            Ok(packet) => {
                if self.pending.fulfil(frame.sequence_id, frame.id, Ok(packet)) {
                    self.metrics.response_delivered();
                } else {
                    self.metrics.packet_discarded();
                }
            }
            Err(e) => {
                self.metrics.decode_error();
                warn!(
                    bot = self.bot,
                    packet = %frame.id,
                    sequence_id = frame.sequence_id,
                    error = %e,
                    "Failed to decode packet"
                );
                if self.pending.contains(frame.sequence_id) {
                    self.pending
                        .fulfil(frame.sequence_id, frame.id, Err(e.into()));
                }
            }
        }
    }

    /// A frame whose envelope was broken. The stream is still aligned, so
    /// only the exchange it belongs to fails.
    fn reject(&self, rejected: RejectedFrame) {
        self.metrics.decode_error();
        warn!(
            bot = self.bot,
            packet = %rejected.id,
            sequence_id = rejected.sequence_id,
            error = %rejected.error,
            "Skipped malformed frame"
        );
        if self.pending.contains(rejected.sequence_id) {
            self.pending
                .fulfil(rejected.sequence_id, rejected.id, Err(rejected.error.into()));
        }
    }

    /// The connection ended without `close` being called.
    fn connection_lost(&self, cause: &str) {
        {
            let mut state = self.state();
            if matches!(*state, HandlerState::Closing | HandlerState::Closed) {
                return;
            }
            *state = HandlerState::Closed;
        }

        warn!(bot = self.bot, cause, "Connection lost");
        let cancelled = self.pending.cancel_all(|| ProtocolError::ConnectionClosed);
        if cancelled > 0 {
            debug!(bot = self.bot, cancelled, "Cancelled pending requests");
        }
        self.outbound().take();
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    mut sink: Writer,
    mut queue: mpsc::Receiver<Outbound>,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<()> {
    loop {
        let outbound = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            next = queue.recv() => match next {
                Some(outbound) => outbound,
                None => break,
            },
        };

        // The sender already gave up on this frame.
        if outbound.done.is_closed() {
            continue;
        }

        if let Err(e) = sink.send(outbound.frame).await {
            let cause = e.to_string();
            let _ = outbound.done.send(Err(e));
            shared.connection_lost(&cause);
            return Err(ProtocolError::TransportError(cause));
        }
        let _ = outbound.done.send(Ok(()));
    }
    sink.close().await
}

async fn read_loop(shared: Arc<Shared>, mut stream: SplitStream<Transport>) {
    let cause = loop {
        let decoded: Option<Result<DecodedFrame>> = stream.next().await;
        match decoded {
            Some(Ok(Ok(frame))) => shared.dispatch(frame),
            Some(Ok(Err(rejected))) => shared.reject(rejected),
            Some(Err(e)) => break e.to_string(),
            None => break constants::ERR_CONNECTION_CLOSED.to_string(),
        }
    };
    shared.connection_lost(&cause);
}

async fn heartbeat_loop(shared: Arc<Shared>, interval: Duration, timeout: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        ticker.tick().await;
        let state = *shared.state();
        if state != HandlerState::Active {
            break;
        }

        let Some(key) = shared.current_key() else {
            break;
        };
        let result = match HeartbeatPacket::encode(shared.bot, shared.next_sequence_id(), &key) {
            Ok(packet) => shared
                .send_and_expect::<HeartbeatAck>(&packet, timeout)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => shared.metrics.heartbeat(true),
            Err(e) => {
                shared.metrics.heartbeat(false);
                warn!(bot = shared.bot, error = %e, "Heartbeat failed");
            }
        }
    }
}

/// Session layer of one bot over one connection.
pub struct NetworkHandler {
    shared: Arc<Shared>,
    config: Arc<BotConfiguration>,
    connector: Arc<dyn Connector>,
    cipher: Arc<dyn SessionCipher>,
    writer: Mutex<Option<WriterTask>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for NetworkHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkHandler")
            .field("bot", &self.shared.bot)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl NetworkHandler {
    /// A disconnected handler. Events decoded later go to `events`.
    pub fn new(
        bot: u32,
        config: Arc<BotConfiguration>,
        connector: Arc<dyn Connector>,
        cipher: Arc<dyn SessionCipher>,
        events: broadcast::Sender<ServerEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                bot,
                state: Mutex::new(HandlerState::Disconnected),
                session_key: RwLock::new(None),
                outbound: Mutex::new(None),
                pending: PendingTable::new(),
                codecs: CodecTable::for_variant(config.protocol),
                events,
                metrics: HandlerMetrics::new(),
                next_sequence: AtomicU16::new(rand::random()),
            }),
            config,
            connector,
            cipher,
            writer: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn bot(&self) -> u32 {
        self.shared.bot
    }

    pub fn state(&self) -> HandlerState {
        *self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == HandlerState::Active
    }

    /// Key of the current session. Only an active handler has one.
    pub fn session_key(&self) -> Result<SessionKey> {
        if !self.is_active() {
            return Err(ProtocolError::NoSessionKey);
        }
        self.shared.current_key().ok_or(ProtocolError::NoSessionKey)
    }

    pub fn next_sequence_id(&self) -> SequenceId {
        self.shared.next_sequence_id()
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn request_timeout(&self) -> Duration {
        self.config.request_timeout
    }

    /// Connect and run the login handshake.
    ///
    /// Authentication outcomes and transport failures come back as
    /// [`LoginResult`]; `Err` means the handler was not in a state to log in.
    #[instrument(skip(self, password), fields(bot = self.shared.bot))]
    pub async fn login(&self, password: &str) -> Result<LoginResult> {
        {
            let mut state = self.shared.state();
            if *state != HandlerState::Disconnected {
                return Err(ProtocolError::InvalidState(
                    constants::ERR_ALREADY_LOGGED_IN.into(),
                ));
            }
            *state = HandlerState::Connecting;
        }

        let servers = self.config.candidate_servers();
        let transport = match connect_any(
            self.connector.as_ref(),
            &servers,
            self.config.connect_timeout,
            self.config.protocol,
        )
        .await
        {
            Ok(transport) => transport,
            Err(e) => {
                self.shared.set_state(HandlerState::Closed);
                return Ok(LoginResult::NetworkError(e.to_string()));
            }
        };

        let mut transport = transport;
        if !self
            .shared
            .transition(HandlerState::Connecting, HandlerState::LoggingIn)
        {
            let _ = transport.close().await;
            info!("Handler closed while connecting");
            return Ok(LoginResult::NetworkError(
                constants::ERR_CLOSED_DURING_LOGIN.into(),
            ));
        }

        let outcome = match tokio::time::timeout(
            self.config.login_timeout,
            self.handshake(&mut transport, password),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Err(LoginResult::NetworkError(e.to_string())),
            Err(_) => Err(LoginResult::Timeout),
        };

        match outcome {
            Ok(key) => match self.activate(transport, key) {
                Ok(()) => {
                    info!("Login successful");
                    Ok(LoginResult::Success)
                }
                Err(mut transport) => {
                    let _ = transport.close().await;
                    info!("Handler closed while logging in");
                    Ok(LoginResult::NetworkError(
                        constants::ERR_CLOSED_DURING_LOGIN.into(),
                    ))
                }
            },
            Err(result) => {
                let _ = transport.close().await;
                self.shared
                    .transition(HandlerState::LoggingIn, HandlerState::Closed);
                info!(result = %result, "Login failed");
                Ok(result)
            }
        }
    }

    /// Exchange login packets. The inner `Err` is a non-success login result.
    async fn handshake(
        &self,
        transport: &mut Transport,
        password: &str,
    ) -> Result<std::result::Result<SessionKey, LoginResult>> {
        let sequence_id = self.shared.next_sequence_id();
        let (state, packet) = LoginPacket::encode(self.shared.bot, password, sequence_id)?;
        transport.send(packet.to_frame()).await?;
        self.shared.metrics.frame_sent(packet.payload().len());

        let frame = match transport.next().await {
            Some(decoded) => match decoded? {
                Ok(frame) => frame,
                Err(rejected) => {
                    return Ok(Err(LoginResult::InvalidResponse(rejected.error.to_string())))
                }
            },
            None => return Err(ProtocolError::ConnectionClosed),
        };
        self.shared.metrics.frame_received(frame.payload.len());

        if frame.id != KnownPacketId::Login.id() || frame.sequence_id != sequence_id {
            return Ok(Err(LoginResult::InvalidResponse(format!(
                "packet {} with sequence {}",
                frame.id, frame.sequence_id
            ))));
        }

        let mut reader = PacketReader::new(&frame.payload);
        let response = LoginPacket::decode(&mut reader, &state, &self.cipher)
            .and_then(|response| reader.finish().map(|()| response));

        Ok(match response {
            Ok(LoginResponse::Success(key)) => Ok(key),
            Ok(LoginResponse::WrongPassword) => Err(LoginResult::WrongPassword),
            Ok(LoginResponse::CaptchaRequired) => Err(LoginResult::CaptchaRequired),
            Ok(LoginResponse::Blocked) => Err(LoginResult::Blocked),
            Ok(LoginResponse::UnknownAccount) => Err(LoginResult::UnknownAccount),
            Ok(LoginResponse::TakenBack) => Err(LoginResult::TakenBack),
            Err(crate::error::DecodeError::UnknownVariant { value, .. }) => {
                Err(LoginResult::Unknown(value as u8))
            }
            Err(e) => Err(LoginResult::InvalidResponse(e.to_string())),
        })
    }

    /// Install the session and start the connection tasks. Hands the
    /// transport back if the handler left `LoggingIn` in the meantime.
    fn activate(
        &self,
        transport: Transport,
        key: SessionKey,
    ) -> std::result::Result<(), Box<Transport>> {
        // Held until the tasks are recorded so a concurrent close sees them.
        let mut state = self.shared.state();
        if *state != HandlerState::LoggingIn {
            debug!(state = ?*state, "Handler state change refused");
            return Err(Box::new(transport));
        }

        *self
            .shared
            .session_key
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(key);

        let (sink, stream) = transport.split();
        let (queue, queued) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let (shutdown, shutdown_rx) = oneshot::channel();
        *self.shared.outbound() = Some(queue);

        let writer = tokio::spawn(write_loop(self.shared.clone(), sink, queued, shutdown_rx));
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(WriterTask {
            shutdown,
            handle: writer,
        });

        let reader = tokio::spawn(read_loop(self.shared.clone(), stream));
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.shared.clone(),
            self.config.heartbeat_interval,
            self.config.heartbeat_timeout,
        ));

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(reader);
        tasks.push(heartbeat);

        debug!(from = ?*state, to = ?HandlerState::Active, "Handler state change");
        *state = HandlerState::Active;
        Ok(())
    }

    /// Send without waiting for an answer. Gives up after the request
    /// timeout if the peer stops reading.
    pub async fn send(&self, packet: &OutgoingPacket) -> Result<()> {
        with_timeout_error(self.shared.send(packet), self.config.request_timeout).await
    }

    /// Send and wait up to `timeout` for the response carrying the same
    /// sequence id. The waiter is removed on every exit path.
    pub async fn send_and_expect<T: ResponsePacket>(
        &self,
        packet: &OutgoingPacket,
        timeout: Duration,
    ) -> Result<T> {
        self.shared.send_and_expect(packet, timeout).await
    }

    /// Shut the connection down. Pending requests fail with `HandlerClosed`.
    ///
    /// Calling it again is a no-op. If the transport fails to close cleanly,
    /// or the writer is still stuck after the request timeout, the error is
    /// returned, but the handler still ends `Closed`.
    #[instrument(skip(self), fields(bot = self.shared.bot))]
    pub async fn close(&self, cause: &str) -> Result<()> {
        {
            let mut state = self.shared.state();
            if matches!(*state, HandlerState::Closing | HandlerState::Closed) {
                return Ok(());
            }
            *state = HandlerState::Closing;
        }
        info!(cause, "Closing network handler");

        let cancelled = self.shared.pending.cancel_all(|| ProtocolError::HandlerClosed);
        if cancelled > 0 {
            debug!(cancelled, "Cancelled pending requests");
        }

        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }

        self.shared.outbound().take();
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take();
        let result = match writer {
            Some(WriterTask { shutdown, mut handle }) => {
                let _ = shutdown.send(());
                match tokio::time::timeout(self.config.request_timeout, &mut handle).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => Err(ProtocolError::TransportError(e.to_string())),
                    Err(_) => {
                        handle.abort();
                        Err(ProtocolError::Timeout)
                    }
                }
            }
            None => Ok(()),
        };

        self.shared
            .session_key
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.shared.metrics.log_metrics(self.shared.bot);
        self.shared.set_state(HandlerState::Closed);

        result.inspect_err(|e| warn!(error = %e, "Transport did not close cleanly"))
    }
}

impl Drop for NetworkHandler {
    fn drop(&mut self) {
        if let Some(writer) = self
            .writer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            writer.handle.abort();
        }
        for task in self
            .tasks
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}
