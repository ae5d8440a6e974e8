//! Cell Protocol - Event Log
//!
//! Append-only, strictly monotonic record of every committed mutation.
//! Replaying a log over an empty ledger must reproduce the current state
//! bit-for-bit (property P4) - every payload variant below carries the
//! authoritative deltas needed for that replay, not just a human-readable
//! description.

use serde::{Deserialize, Serialize};

use crate::errors::EventLogError;
use crate::storage::{KvStore, KvStoreExt};
use crate::types::{
    BalanceDelta, CellId, CommitmentId, DisputeId, EventId, MemberId, MemberStatus, ProposalId,
    SequenceNumber, Timestamp, TransactionId,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EventPayload {
    BalanceUpdate { deltas: Vec<BalanceDelta> },
    ReserveUpdate { member: MemberId, delta: i64 },
    MemberAdded { member: MemberId, initial_limit: u32 },
    MemberAccepted { member: MemberId, status: MemberStatus },
    MemberRemoved { member: MemberId },
    MemberFrozen { member: MemberId },
    MemberUnfrozen { member: MemberId },
    LimitChanged { member: MemberId, old_limit: u32, new_limit: u32 },
    PolicyChanged,
    TransactionExecuted { transaction_id: TransactionId },
    TransactionQueued { transaction_id: TransactionId },
    CommitmentCreated { commitment_id: CommitmentId },
    CommitmentActivated { commitment_id: CommitmentId },
    CommitmentFulfilled { commitment_id: CommitmentId, transaction_id: TransactionId },
    CommitmentCancelled { commitment_id: CommitmentId },
    CommitmentDisputed { commitment_id: CommitmentId, dispute_id: DisputeId },
    ProposalCreated { proposal_id: ProposalId },
    ProposalVoted { proposal_id: ProposalId, voter: MemberId },
    ProposalClosed { proposal_id: ProposalId },
    ProposalExecuted { proposal_id: ProposalId },
    DisputeFiled { dispute_id: DisputeId },
    DisputeResolved { dispute_id: DisputeId },
    EmergencyTransition { from: String, to: String },
    EmergencyOverride { from: String, to: String, proposal_id: ProposalId },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub cell_id: CellId,
    pub sequence_number: SequenceNumber,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

/// The cell's single append-only event store.
pub struct EventLog<'a> {
    store: &'a dyn KvStore,
    cell_id: CellId,
}

impl<'a> EventLog<'a> {
    pub fn new(store: &'a dyn KvStore, cell_id: CellId) -> Self {
        EventLog { store, cell_id }
    }

    /// Highest sequence number written so far, 0 if the log is empty.
    pub fn current_sequence(&self) -> SequenceNumber {
        self.all_events()
            .into_iter()
            .map(|e| e.sequence_number)
            .max()
            .unwrap_or(0)
    }

    /// Appends one event, assigning the next contiguous sequence number.
    /// This is the only mutator on the log.
    pub fn append(&self, timestamp: Timestamp, payload: EventPayload) -> Result<Event, EventLogError> {
        let sequence_number = self.current_sequence() + 1;
        let event = Event {
            id: sequence_number,
            cell_id: self.cell_id.clone(),
            sequence_number,
            timestamp,
            payload,
        };
        self.store
            .put(crate::types::DocKey::Event(self.cell_id.clone(), event.id), &event, None)
            .map_err(|_| EventLogError::NonMonotonicSequence)?;
        tracing::debug!(sequence = event.sequence_number, "event appended");
        Ok(event)
    }

    /// All events for this cell, ordered by sequence number.
    pub fn all_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .store
            .scan(|k| matches!(k, crate::types::DocKey::Event(cell, _) if *cell == self.cell_id))
            .into_iter()
            .map(|(_, e): (_, Event)| e)
            .collect();
        events.sort_by_key(|e| e.sequence_number);
        events
    }

    /// Verifies invariant I7: sequence numbers are contiguous and strictly increasing.
    pub fn verify_monotonic(&self) -> Result<(), EventLogError> {
        for (idx, event) in self.all_events().iter().enumerate() {
            if event.sequence_number != (idx + 1) as SequenceNumber {
                return Err(EventLogError::NonMonotonicSequence);
            }
        }
        Ok(())
    }
}
