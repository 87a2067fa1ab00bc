//! Requests waiting for their response, keyed by sequence id.
//!
//! A slot lives from registration until exactly one of: the response arrives,
//! the caller times out or goes away, or the handler closes. Whoever removes
//! the slot owns the sender, so a response can be delivered at most once.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use crate::core::packet::{KnownPacketId, PacketId, SequenceId};
use crate::error::{ProtocolError, Result};
use crate::protocol::IncomingPacket;

pub type ResponseReceiver = oneshot::Receiver<Result<IncomingPacket>>;

struct PendingRequest {
    expected: PacketId,
    tx: oneshot::Sender<Result<IncomingPacket>>,
}

#[derive(Default)]
pub struct PendingTable {
    slots: Mutex<HashMap<SequenceId, PendingRequest>>,
}

fn packet_name(id: PacketId) -> &'static str {
    KnownPacketId::from_id(id).map_or("Unknown", KnownPacketId::name)
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<SequenceId, PendingRequest>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve `sequence_id` for a request expecting a packet with id `expected`.
    pub fn register(
        &self,
        sequence_id: SequenceId,
        expected: PacketId,
    ) -> Result<ResponseReceiver> {
        let mut slots = self.slots();
        if slots.contains_key(&sequence_id) {
            return Err(ProtocolError::SequenceIdInUse(sequence_id));
        }

        let (tx, rx) = oneshot::channel();
        slots.insert(sequence_id, PendingRequest { expected, tx });
        Ok(rx)
    }

    pub fn contains(&self, sequence_id: SequenceId) -> bool {
        self.slots().contains_key(&sequence_id)
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots().is_empty()
    }

    pub fn remove(&self, sequence_id: SequenceId) -> bool {
        self.slots().remove(&sequence_id).is_some()
    }

    /// Hand a decoded packet (or its decode error) to the waiter of
    /// `sequence_id`. A packet whose id differs from the expected one resolves
    /// the waiter with `UnexpectedMessage`. Returns false when nobody waits.
    pub fn fulfil(
        &self,
        sequence_id: SequenceId,
        id: PacketId,
        result: Result<IncomingPacket>,
    ) -> bool {
        let Some(slot) = self.slots().remove(&sequence_id) else {
            debug!(sequence_id, packet = %id, "No waiter for response");
            return false;
        };

        let result = if slot.expected == id {
            result
        } else {
            Err(ProtocolError::UnexpectedMessage {
                expected: packet_name(slot.expected),
                actual: packet_name(id),
            })
        };

        // The receiver may already be gone; the slot is cleared either way.
        slot.tx.send(result).is_ok()
    }

    /// Fail every waiter with the error `make_error` builds.
    pub fn cancel_all<F>(&self, make_error: F) -> usize
    where
        F: Fn() -> ProtocolError,
    {
        let drained: Vec<_> = self.slots().drain().collect();
        let count = drained.len();
        for (_, slot) in drained {
            let _ = slot.tx.send(Err(make_error()));
        }
        count
    }
}

/// Removes a slot when the waiting future finishes or is dropped.
pub struct PendingGuard<'a> {
    table: &'a PendingTable,
    sequence_id: SequenceId,
}

impl<'a> PendingGuard<'a> {
    pub fn new(table: &'a PendingTable, sequence_id: SequenceId) -> Self {
        Self { table, sequence_id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.sequence_id);
    }
}
