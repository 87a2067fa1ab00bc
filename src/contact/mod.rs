//! # Contact Cache
//!
//! Per-bot maps from numeric id to contact object, populated lazily.
//!
//! ## Lookup
//! 1. Read the map under a shared lock; a hit returns at once.
//! 2. On a miss, take the partition's creation lock (one for friends, one
//!    for groups).
//! 3. Look again, since another caller may have inserted meanwhile; only if
//!    still absent construct the object and insert it.
//!
//! Construction therefore happens at most once per id, and every caller asking
//! for the same id gets the same `Arc`. Construction only allocates; it never
//! touches the network.
//!
//! ## Usage
//! ```ignore
//! let qq = bot.contacts().get_qq(1040400290).await;
//! let names = qq.query_previous_names().await?;
//! ```

mod group;
mod qq;

pub use group::{Group, GroupId};
pub use qq::Qq;

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use tokio::sync::Mutex;
use tracing::trace;

use crate::bot::BotInner;

/// One partition of the contact cache
pub struct ContactList<K, V> {
    entries: RwLock<HashMap<K, Arc<V>>>,
    creation: Mutex<()>,
}

impl<K, V> Default for ContactList<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            creation: Mutex::new(()),
        }
    }
}

impl<K, V> ContactList<K, V>
where
    K: Eq + Hash + Copy,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached object for `id`, without creating one
    pub fn get(&self, id: K) -> Option<Arc<V>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Cached object for `id`, built with `create` on first request.
    pub async fn get_or_create<F>(&self, id: K, create: F) -> Arc<V>
    where
        F: FnOnce() -> V,
    {
        if let Some(hit) = self.get(id) {
            return hit;
        }

        let _creating = self.creation.lock().await;
        if let Some(hit) = self.get(id) {
            return hit;
        }

        let created = Arc::new(create());
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, created.clone());
        created
    }

    pub fn contains(&self, id: K) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Friends and groups of one bot
pub struct ContactSystem {
    bot: Weak<BotInner>,
    qqs: ContactList<u32, Qq>,
    groups: ContactList<GroupId, Group>,
}

impl ContactSystem {
    pub(crate) fn new(bot: Weak<BotInner>) -> Self {
        Self {
            bot,
            qqs: ContactList::new(),
            groups: ContactList::new(),
        }
    }

    pub async fn get_qq(&self, id: u32) -> Arc<Qq> {
        self.qqs
            .get_or_create(id, || {
                trace!(qq = id, "Creating contact");
                Qq::new(id, self.bot.clone())
            })
            .await
    }

    pub async fn get_group(&self, id: GroupId) -> Arc<Group> {
        self.groups
            .get_or_create(id, || {
                trace!(group = %id, "Creating group");
                Group::new(id, self.bot.clone())
            })
            .await
    }

    pub fn qqs(&self) -> &ContactList<u32, Qq> {
        &self.qqs
    }

    pub fn groups(&self) -> &ContactList<GroupId, Group> {
        &self.groups
    }

    /// Drop every cached object. Objects already handed out stay valid as
    /// values but are no longer shared with later lookups.
    pub fn clear(&self) {
        self.qqs.clear();
        self.groups.clear();
    }
}
