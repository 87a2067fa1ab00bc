use std::fmt;
use std::sync::Weak;

use serde::{Deserialize, Serialize};

use crate::bot::{Bot, BotInner};
use crate::error::Result;

/// Public group number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for GroupId {
    fn from(id: u32) -> Self {
        GroupId(id)
    }
}

pub struct Group {
    id: GroupId,
    bot: Weak<BotInner>,
}

impl Group {
    pub(crate) fn new(id: GroupId, bot: Weak<BotInner>) -> Self {
        Self { id, bot }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn bot(&self) -> Result<Bot> {
        Bot::upgrade(&self.bot)
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group").field("id", &self.id).finish()
    }
}
