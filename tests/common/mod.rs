//! In-memory TIM server for integration tests.
//!
//! Every connection is a `tokio::io::duplex` pair framed with the crate's own
//! `FrameCodec`. The server runs the login handshake for real (proof check,
//! sealed session key), records every session request it receives and answers
//! through a test-supplied responder.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::codec::{Encoder, Framed};

use tim_protocol::core::codec::FrameCodec;
use tim_protocol::core::io::PacketReader;
use tim_protocol::core::packet::{Frame, KnownPacketId, PacketId, SequenceId, FIX_VER2};
use tim_protocol::error::{ProtocolError, Result};
use tim_protocol::network::transport::{BoxedStream, Connector};
use tim_protocol::protocol::login::{LoginPacket, LoginResponse};
use tim_protocol::utils::crypto::{SessionKey, XChaChaCipher};
use tim_protocol::{Bot, BotAccount, BotConfiguration, ServerEvent};

pub const BOT_ID: u32 = 1994701021;
pub const PASSWORD: &str = "correct horse battery";

/// Configuration pointing at one placeholder address; the fake connector
/// ignores it.
pub fn test_config() -> BotConfiguration {
    BotConfiguration::default_with_overrides(|c| {
        c.servers = vec!["127.0.0.1:8000".to_string()];
        c.connect_timeout = Duration::from_millis(500);
        c.login_timeout = Duration::from_secs(2);
        c.request_timeout = Duration::from_secs(2);
    })
}

/// A session request as the server saw it, body already opened
#[derive(Debug, Clone)]
pub struct Request {
    pub id: PacketId,
    pub sequence_id: SequenceId,
    pub body: Vec<u8>,
}

impl Request {
    pub fn is(&self, packet: KnownPacketId) -> bool {
        self.id == packet.id()
    }
}

/// A frame the server will send
#[derive(Debug, Clone)]
pub struct Reply {
    pub id: PacketId,
    pub sequence_id: SequenceId,
    pub body: Bytes,
    pub seal: bool,
    pub corrupt_tail: bool,
}

impl Reply {
    /// Sealed answer to `request`
    pub fn to(request: &Request, body: impl Into<Bytes>) -> Self {
        Self {
            id: request.id,
            sequence_id: request.sequence_id,
            body: body.into(),
            seal: true,
            corrupt_tail: false,
        }
    }

    pub fn event(event: &ServerEvent) -> Self {
        Self {
            id: KnownPacketId::ServerEvent.id(),
            sequence_id: 0,
            body: event.encode_body().unwrap(),
            seal: true,
            corrupt_tail: false,
        }
    }

    pub fn with_id(mut self, id: PacketId) -> Self {
        self.id = id;
        self
    }

    pub fn with_sequence_id(mut self, sequence_id: SequenceId) -> Self {
        self.sequence_id = sequence_id;
        self
    }

    /// Send the frame with a wrong tail marker
    pub fn corrupted(mut self) -> Self {
        self.corrupt_tail = true;
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub enum LoginBehavior {
    /// Check the proof and issue a key
    Accept,
    /// Answer with this status byte
    Status(u8),
    /// Never answer
    Silent,
}

type Responder = dyn Fn(&Request) -> Vec<Reply> + Send + Sync;

pub struct FakeServer {
    password: String,
    login: Mutex<LoginBehavior>,
    responder: Box<Responder>,
    requests: Mutex<Vec<Request>>,
    pushers: Mutex<Vec<mpsc::UnboundedSender<Reply>>>,
    connections: AtomicUsize,
    pub refuse_connections: AtomicBool,
    pub fail_shutdown: AtomicBool,
    /// Stop reading from the connection once login succeeded
    pub stall_after_login: AtomicBool,
    pub connect_delay_ms: AtomicU64,
    /// Delay before answering a login request
    pub login_delay_ms: AtomicU64,
}

impl FakeServer {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&Request) -> Vec<Reply> + Send + Sync + 'static,
    {
        Arc::new(Self {
            password: PASSWORD.to_string(),
            login: Mutex::new(LoginBehavior::Accept),
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            pushers: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            refuse_connections: AtomicBool::new(false),
            fail_shutdown: AtomicBool::new(false),
            stall_after_login: AtomicBool::new(false),
            connect_delay_ms: AtomicU64::new(0),
            login_delay_ms: AtomicU64::new(0),
        })
    }

    /// Server that never answers session requests
    pub fn mute() -> Arc<Self> {
        Self::new(|_| Vec::new())
    }

    pub fn set_login(&self, behavior: LoginBehavior) {
        *self.login.lock().unwrap() = behavior;
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send `reply` on the most recent connection.
    pub fn push(&self, reply: Reply) {
        let pushers = self.pushers.lock().unwrap();
        pushers.last().expect("no connection").send(reply).unwrap();
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> {
        Arc::new(FakeConnector(self.clone()))
    }

    async fn serve(self: Arc<Self>, stream: DuplexStream, mut pushed: mpsc::UnboundedReceiver<Reply>) {
        let mut framed = Framed::new(stream, FrameCodec::default());

        let Some(Ok(Ok(login))) = framed.next().await else {
            return;
        };
        assert_eq!(login.id, KnownPacketId::Login.id());
        let mut reader = PacketReader::new(&login.payload);
        let request = LoginPacket::decode_request(&mut reader).unwrap();
        reader.finish().unwrap();

        let delay = self.login_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let behavior = *self.login.lock().unwrap();
        let status = match behavior {
            LoginBehavior::Silent => {
                while framed.next().await.is_some() {}
                return;
            }
            LoginBehavior::Status(status) => Some(status),
            LoginBehavior::Accept if !request.verify(&self.password) => Some(0x01),
            LoginBehavior::Accept => None,
        };

        if let Some(status) = status {
            let _ = framed
                .send(Frame::new(login.id, login.sequence_id, vec![status]))
                .await;
            while framed.next().await.is_some() {}
            return;
        }

        let key = SessionKey::generate(Arc::new(XChaChaCipher)).unwrap();
        let body = LoginResponse::Success(key.clone())
            .encode_body(&request.login_key(&self.password))
            .unwrap();
        if framed
            .send(Frame::new(login.id, login.sequence_id, body))
            .await
            .is_err()
        {
            return;
        }

        if self.stall_after_login.load(Ordering::SeqCst) {
            // Keep the connection open without ever reading it.
            let _framed = framed;
            std::future::pending::<()>().await;
            return;
        }

        loop {
            tokio::select! {
                frame = framed.next() => {
                    let Some(Ok(Ok(frame))) = frame else { break };
                    let request = open_request(&frame, &key);
                    self.requests.lock().unwrap().push(request.clone());
                    for reply in (self.responder)(&request) {
                        if send_reply(&mut framed, &key, reply).await.is_err() {
                            return;
                        }
                    }
                }
                Some(reply) = pushed.recv() => {
                    if send_reply(&mut framed, &key, reply).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

fn open_request(frame: &Frame, key: &SessionKey) -> Request {
    let mut reader = PacketReader::new(&frame.payload);
    assert_eq!(reader.read_qq().unwrap(), BOT_ID);
    assert_eq!(reader.read_array::<3>().unwrap(), FIX_VER2);
    Request {
        id: frame.id,
        sequence_id: frame.sequence_id,
        body: key.open(reader.read_remaining()).unwrap(),
    }
}

async fn send_reply(
    framed: &mut Framed<DuplexStream, FrameCodec>,
    key: &SessionKey,
    reply: Reply,
) -> Result<()> {
    let payload: Bytes = if reply.seal {
        key.seal(&reply.body)?.into()
    } else {
        reply.body
    };
    let frame = Frame::new(reply.id, reply.sequence_id, payload);
    if !reply.corrupt_tail {
        return framed.send(frame).await;
    }

    let mut raw = BytesMut::new();
    FrameCodec::default().encode(frame, &mut raw)?;
    let last = raw.len() - 1;
    raw[last] = 0xEE;
    framed.get_mut().write_all(&raw).await.map_err(ProtocolError::Io)
}

struct FakeConnector(Arc<FakeServer>);

impl Connector for FakeConnector {
    fn connect<'a>(&'a self, _addr: &'a str) -> BoxFuture<'a, Result<BoxedStream>> {
        Box::pin(async move {
            let server = &self.0;
            if server.refuse_connections.load(Ordering::SeqCst) {
                return Err(ProtocolError::Io(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }

            let delay = server.connect_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let (client, server_half) = tokio::io::duplex(64 * 1024);
            let (tx, rx) = mpsc::unbounded_channel();
            server.pushers.lock().unwrap().push(tx);
            server.connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(server.clone().serve(server_half, rx));

            if server.fail_shutdown.load(Ordering::SeqCst) {
                Ok(Box::new(FailingShutdown(client)) as BoxedStream)
            } else {
                Ok(Box::new(client) as BoxedStream)
            }
        })
    }
}

/// Stream whose shutdown always fails
pub struct FailingShutdown<S>(pub S);

impl<S: AsyncRead + Unpin> AsyncRead for FailingShutdown<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for FailingShutdown<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "shutdown refused")))
    }
}

pub fn new_bot(server: &Arc<FakeServer>, config: BotConfiguration) -> Bot {
    Bot::with_connector(
        BotAccount::new(BOT_ID, PASSWORD).unwrap(),
        config,
        server.connector(),
        Arc::new(XChaChaCipher),
    )
    .unwrap()
}

/// Bot logged in against `server`
pub async fn logged_in_bot(server: &Arc<FakeServer>) -> Bot {
    let bot = new_bot(server, test_config());
    let result = bot.login().await.unwrap();
    assert!(result.is_success(), "login failed: {result}");
    bot
}

/// Poll `condition` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
