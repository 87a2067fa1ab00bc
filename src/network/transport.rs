//! Byte-stream establishment.
//!
//! A [`Connector`] turns a server address into a boxed async stream; the
//! handler frames it with [`FrameCodec`]. Production code uses
//! [`TcpConnector`], tests plug in in-memory duplex streams.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

use crate::config::ProtocolVariant;
use crate::core::codec::FrameCodec;
use crate::error::{constants, ProtocolError, Result};

/// Any bidirectional async byte stream
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Framed connection to one server
pub type Transport = Framed<BoxedStream, FrameCodec>;

/// Opens connections to server addresses
pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, Result<BoxedStream>>;
}

/// Plain TCP
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, addr: &'a str) -> BoxFuture<'a, Result<BoxedStream>> {
        Box::pin(async move {
            let stream = TcpStream::connect(addr).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

/// Try `servers` in order and frame the first one that accepts.
#[instrument(skip(connector, servers))]
pub async fn connect_any(
    connector: &dyn Connector,
    servers: &[String],
    connect_timeout: Duration,
    variant: ProtocolVariant,
) -> Result<Transport> {
    for addr in servers {
        match tokio::time::timeout(connect_timeout, connector.connect(addr)).await {
            Ok(Ok(stream)) => {
                debug!(server = %addr, "Connected");
                return Ok(Framed::new(stream, FrameCodec::new(variant)));
            }
            Ok(Err(e)) => warn!(server = %addr, error = %e, "Connection failed"),
            Err(_) => warn!(server = %addr, "Connection timed out"),
        }
    }

    Err(ProtocolError::TransportError(
        constants::ERR_NO_SERVER_REACHABLE.into(),
    ))
}
