//! Process-wide list of live bots.
//!
//! A bot is appended when it is constructed and removed when it is closed.
//! The list holds strong handles, so a registered bot stays alive until
//! `Bot::close` even if the caller drops its own handle.

use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::bot::Bot;

static BOTS: RwLock<Vec<Bot>> = RwLock::new(Vec::new());

pub(crate) fn register(bot: Bot) {
    let mut bots = BOTS.write().unwrap_or_else(PoisonError::into_inner);
    debug!(bot = bot.id(), live = bots.len() + 1, "Registering bot");
    bots.push(bot);
}

pub(crate) fn remove(bot: &Bot) -> bool {
    let mut bots = BOTS.write().unwrap_or_else(PoisonError::into_inner);
    let before = bots.len();
    bots.retain(|live| live != bot);
    let removed = bots.len() != before;
    if removed {
        debug!(bot = bot.id(), live = bots.len(), "Removed bot from registry");
    }
    removed
}

/// Snapshot of the live bots in registration order
pub fn instances() -> Vec<Bot> {
    BOTS.read().unwrap_or_else(PoisonError::into_inner).clone()
}
