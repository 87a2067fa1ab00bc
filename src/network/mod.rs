//! # Network Layer
//!
//! ## Components
//! - **Transport**: connectors and server fallback
//! - **Pending**: sequence-id keyed table of requests awaiting a response
//! - **Handler**: login, request/response correlation, event dispatch, heartbeat

pub mod handler;
pub mod pending;
pub mod transport;

pub use handler::{HandlerState, NetworkHandler};
pub use transport::{BoxedStream, Connector, TcpConnector, Transport};
