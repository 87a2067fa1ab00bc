//! # tim-protocol
//!
//! Client-side session layer for the TIM instant-messaging protocol.
//!
//! ## Layers
//! - [`core`]: wire frame codec, packet identity, primitive field encoding
//! - [`protocol`]: typed packets of TIM 2.3.2 and the decoder table
//! - [`network`]: transport, login handshake, request/response correlation
//! - [`contact`]: lazily built, deduplicated friend and group objects
//! - [`bot`]: the handle callers hold; owns the handler and the contact cache
//!
//! ## Example
//! ```no_run
//! use tim_protocol::{Bot, BotAccount, BotConfiguration};
//!
//! # async fn run() -> tim_protocol::Result<()> {
//! let bot = Bot::new(BotAccount::new(1994701021, "password")?, BotConfiguration::default())?;
//! let result = bot.login().await?;
//! if result.is_success() {
//!     let outcome = bot.add_friend(1040400290).await?;
//!     println!("{outcome:?}");
//! }
//! bot.close().await;
//! # Ok(())
//! # }
//! ```

pub mod bot;
pub mod config;
pub mod contact;
pub mod core;
pub mod error;
pub mod network;
pub mod protocol;
pub mod utils;

pub use bot::{AddFriendResult, Bot, BotAccount};
pub use config::{BotConfiguration, ProtocolVariant, ServerSelection};
pub use contact::{Group, GroupId, Qq};
pub use error::{DecodeError, ProtocolError, Result};
pub use network::{HandlerState, NetworkHandler};
pub use protocol::{LoginResult, ServerEvent};
