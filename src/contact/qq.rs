use std::fmt;
use std::sync::Weak;

use tracing::instrument;

use crate::bot::{Bot, BotInner};
use crate::error::Result;
use crate::protocol::action::QueryPreviousNamePacket;
use crate::protocol::PreviousNameList;

/// A single account the bot can talk to.
pub struct Qq {
    id: u32,
    bot: Weak<BotInner>,
}

impl Qq {
    pub(crate) fn new(id: u32, bot: Weak<BotInner>) -> Self {
        Self { id, bot }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Owning bot, while it is alive
    pub fn bot(&self) -> Result<Bot> {
        Bot::upgrade(&self.bot)
    }

    /// Names this account used before, oldest first.
    #[instrument(skip(self), fields(qq = self.id))]
    pub async fn query_previous_names(&self) -> Result<Vec<String>> {
        let target = self.id;
        let list: PreviousNameList = self
            .bot()?
            .request(|bot, sequence_id, key| {
                QueryPreviousNamePacket::encode(bot, target, sequence_id, key)
            })
            .await?;
        Ok(list.names)
    }
}

impl fmt::Debug for Qq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Qq").field("id", &self.id).finish()
    }
}

impl fmt::Display for Qq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QQ({})", self.id)
    }
}
