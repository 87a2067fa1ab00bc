//! # Bot Session Manager
//!
//! [`Bot`] is the handle callers hold. It owns the account, the current
//! [`NetworkHandler`] and the contact cache.
//!
//! ## Components
//! - **Bot**: login, handler replacement, shutdown, event subscription
//! - **Registry**: process-wide list of live bots
//! - **Friend**: add-friend flow
//!
//! The handler is swapped as a whole on reinitialization and never mutated in
//! place. Every operation reads the current handler once through
//! [`Bot::network`] and works with that instance until it finishes.

mod friend;
pub mod registry;

pub use friend::AddFriendResult;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info, instrument, warn};
use zeroize::Zeroizing;

use crate::config::BotConfiguration;
use crate::contact::ContactSystem;
use crate::core::packet::{OutgoingPacket, SequenceId};
use crate::error::{constants, ProtocolError, Result};
use crate::network::{Connector, NetworkHandler, TcpConnector};
use crate::protocol::{LoginResult, ResponsePacket, ServerEvent};
use crate::utils::crypto::{SessionCipher, SessionKey, XChaChaCipher};

/// Account credentials. Immutable once handed to a [`Bot`].
#[derive(Clone)]
pub struct BotAccount {
    id: u32,
    password: Zeroizing<String>,
}

impl BotAccount {
    pub fn new(id: u32, password: impl Into<String>) -> Result<Self> {
        if id == 0 {
            return Err(ProtocolError::InvalidArgument(
                constants::ERR_ZERO_ACCOUNT_ID.into(),
            ));
        }
        Ok(Self {
            id,
            password: Zeroizing::new(password.into()),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for BotAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotAccount")
            .field("id", &self.id)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub(crate) struct BotInner {
    account: BotAccount,
    config: Arc<BotConfiguration>,
    connector: Arc<dyn Connector>,
    cipher: Arc<dyn SessionCipher>,
    network: RwLock<Arc<NetworkHandler>>,
    contacts: ContactSystem,
    events: broadcast::Sender<ServerEvent>,
    reinitializing: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl BotInner {
    fn new_handler(&self) -> NetworkHandler {
        NetworkHandler::new(
            self.account.id(),
            self.config.clone(),
            self.connector.clone(),
            self.cipher.clone(),
            self.events.clone(),
        )
    }
}

/// A logical bot: one account, one live connection at a time.
#[derive(Clone)]
pub struct Bot {
    inner: Arc<BotInner>,
}

impl PartialEq for Bot {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Bot {}

impl fmt::Debug for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bot")
            .field("id", &self.id())
            .field("state", &self.network().state())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Bot {
    /// Bot speaking TCP with the default session cipher.
    pub fn new(account: BotAccount, config: BotConfiguration) -> Result<Self> {
        Self::with_connector(
            account,
            config,
            Arc::new(TcpConnector),
            Arc::new(XChaChaCipher),
        )
    }

    /// Bot over a custom transport and cipher. The bot is registered in the
    /// process-wide list before this returns.
    pub fn with_connector(
        account: BotAccount,
        config: BotConfiguration,
        connector: Arc<dyn Connector>,
        cipher: Arc<dyn SessionCipher>,
    ) -> Result<Self> {
        config.validate_strict()?;

        let config = Arc::new(config);
        let (events, _) = broadcast::channel(config.event_capacity);

        let inner = Arc::new_cyclic(|weak: &Weak<BotInner>| {
            let handler = NetworkHandler::new(
                account.id(),
                config.clone(),
                connector.clone(),
                cipher.clone(),
                events.clone(),
            );
            BotInner {
                account,
                config,
                connector,
                cipher,
                network: RwLock::new(Arc::new(handler)),
                contacts: ContactSystem::new(weak.clone()),
                events,
                reinitializing: tokio::sync::Mutex::new(()),
                closed: AtomicBool::new(false),
            }
        });

        let bot = Self { inner };
        registry::register(bot.clone());
        info!(bot = bot.id(), "Bot created");
        Ok(bot)
    }

    pub(crate) fn upgrade(weak: &Weak<BotInner>) -> Result<Self> {
        weak.upgrade()
            .map(|inner| Self { inner })
            .ok_or_else(|| ProtocolError::InvalidState(constants::ERR_BOT_CLOSED.into()))
    }

    /// Live bots of this process
    pub fn instances() -> Vec<Bot> {
        registry::instances()
    }

    pub fn id(&self) -> u32 {
        self.inner.account.id()
    }

    pub fn config(&self) -> &BotConfiguration {
        &self.inner.config
    }

    pub fn contacts(&self) -> &ContactSystem {
        &self.inner.contacts
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The handler currently installed. Do not hold it across a
    /// reinitialization; read it again instead.
    pub fn network(&self) -> Arc<NetworkHandler> {
        self.inner
            .network
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Unsolicited server events. The stream survives handler replacement.
    pub fn subscribe(&self) -> BroadcastStream<ServerEvent> {
        BroadcastStream::new(self.inner.events.subscribe())
    }

    /// Log in on a fresh handler.
    pub async fn login(&self) -> Result<LoginResult> {
        self.reinitialize_network_handler(None).await
    }

    /// Close the current handler, then build, log in and install a new one.
    ///
    /// A failure to close the old handler is logged and does not stop the
    /// replacement. The new handler is installed whatever the login outcome.
    #[instrument(skip(self), fields(bot = self.id()))]
    pub async fn reinitialize_network_handler(&self, cause: Option<&str>) -> Result<LoginResult> {
        if self.is_closed() {
            return Err(ProtocolError::InvalidState(constants::ERR_BOT_CLOSED.into()));
        }
        let _reinitializing = self.inner.reinitializing.lock().await;
        // `close` may have run while this call waited for the lock.
        if self.is_closed() {
            return Err(ProtocolError::InvalidState(constants::ERR_BOT_CLOSED.into()));
        }

        info!(cause = cause.unwrap_or("none"), "Initializing network handler");

        let old = self.network();
        if let Err(e) = old.close(cause.unwrap_or("reinitialize")).await {
            error!(error = %e, "Failed to close network handler");
        }

        let handler = Arc::new(self.inner.new_handler());
        let result = handler.login(self.inner.account.password()).await?;

        *self
            .inner
            .network
            .write()
            .unwrap_or_else(PoisonError::into_inner) = handler;

        if result.is_success() {
            info!("Network handler ready");
        } else {
            warn!(%result, "Login did not succeed");
        }
        Ok(result)
    }

    /// Shut the bot down for good: close the handler, clear the contact cache
    /// and leave the registry. Later calls do nothing.
    #[instrument(skip(self), fields(bot = self.id()))]
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _reinitializing = self.inner.reinitializing.lock().await;
        if let Err(e) = self.network().close("bot closed").await {
            error!(error = %e, "Failed to close network handler");
        }
        self.inner.contacts.clear();
        registry::remove(self);
        info!("Bot closed");
    }

    /// Build a session packet against the current handler and wait for its
    /// typed response.
    pub(crate) async fn request<T, F>(&self, build: F) -> Result<T>
    where
        T: ResponsePacket,
        F: FnOnce(u32, SequenceId, &SessionKey) -> Result<OutgoingPacket>,
    {
        let handler = self.network();
        let key = handler.session_key()?;
        let packet = build(self.id(), handler.next_sequence_id(), &key)?;
        handler
            .send_and_expect(&packet, handler.request_timeout())
            .await
    }
}
