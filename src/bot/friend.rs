//! Add-friend flow: probe whether the target can be added, then act on the
//! answer.

use tracing::{info, instrument};

use crate::bot::Bot;
use crate::error::{ProtocolError, Result};
use crate::protocol::action::{AddFriendPacket, CanAddFriendPacket};
use crate::protocol::{AddFriendOutcome, AddFriendResponse, CanAddFriendResponse};

/// Final outcome of [`Bot::add_friend`]
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddFriendResult {
    /// The target is a friend now
    Success,
    /// The target already was a friend; nothing was sent after the probe
    AlreadyAdded,
    /// The request was delivered and awaits the target's approval
    WaitingForAgreement,
    Rejected,
}

impl AddFriendResult {
    /// Whether the target is a friend after the call
    pub fn is_success(&self) -> bool {
        matches!(self, AddFriendResult::Success | AddFriendResult::AlreadyAdded)
    }
}

impl Bot {
    /// Add `target` as a friend.
    ///
    /// A target that demands a verification message fails with
    /// [`ProtocolError::NotImplemented`].
    #[instrument(skip(self, target), fields(bot = self.id(), qq = target))]
    pub async fn add_friend(&self, target: u32) -> Result<AddFriendResult> {
        let probe: CanAddFriendResponse = self
            .request(|bot, sequence_id, key| {
                CanAddFriendPacket::encode(bot, target, sequence_id, key)
            })
            .await?;

        let result = match probe {
            CanAddFriendResponse::AlreadyAdded { .. } => AddFriendResult::AlreadyAdded,
            CanAddFriendResponse::Rejected { .. } => AddFriendResult::Rejected,
            CanAddFriendResponse::RequireVerification { .. } => {
                return Err(ProtocolError::NotImplemented(
                    "adding a friend that requires a verification message",
                ))
            }
            CanAddFriendResponse::ReadyToAdd { .. } => {
                let response: AddFriendResponse = self
                    .request(|bot, sequence_id, key| {
                        AddFriendPacket::encode(bot, target, sequence_id, key)
                    })
                    .await?;
                match response.outcome {
                    AddFriendOutcome::Added => AddFriendResult::Success,
                    AddFriendOutcome::WaitingForAgreement => AddFriendResult::WaitingForAgreement,
                    AddFriendOutcome::Rejected => AddFriendResult::Rejected,
                }
            }
        };

        info!(?result, "Add friend finished");
        Ok(result)
    }
}
