//! Cell Protocol - Core Data Model
//!
//! Shared types threaded through every engine: member accounts, identities,
//! transactions, commitments, proposals, disputes, emergency state and the
//! event log entries that record every committed mutation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Member identifier, unique within a cell.
pub type MemberId = String;

/// Raw ed25519 public key bytes, unique per member within a cell (invariant I6).
pub type PublicKeyBytes = [u8; 32];

/// Raw ed25519 signature bytes.
pub type SignatureBytes = [u8; 64];

/// Unix-seconds timestamp, sourced from the injected `Clock`.
pub type Timestamp = u64;

/// Monotonic event log sequence number (invariant I7).
pub type SequenceNumber = u64;

pub type EventId = u64;
pub type ProposalId = u64;
pub type CommitmentId = String;
pub type TransactionId = String;
pub type DisputeId = u64;
pub type CellId = String;

/// Member lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    PendingProfile,
    Review,
    Probation,
    Active,
    Frozen,
    Excluded,
}

/// Per-member accounting state held by the Ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Member {
    /// Signed integer balance, in integer units (x100 fixed point). No floats.
    pub balance: i64,
    /// Maximum negative balance permitted, bounded by `[limit_min, limit_max]`.
    pub limit: u32,
    /// Capacity held against outstanding escrowed commitments.
    pub reserve: u32,
    pub status: MemberStatus,
    pub joined_at: Timestamp,
    pub last_activity_at: Timestamp,
}

impl Member {
    pub fn new(limit: u32, now: Timestamp) -> Self {
        Member {
            balance: 0,
            limit,
            reserve: 0,
            status: MemberStatus::PendingProfile,
            joined_at: now,
            last_activity_at: now,
        }
    }

    /// Floor value `-limit`: the hard bound `balance` may not cross.
    pub fn floor(&self) -> i64 {
        -(self.limit as i64)
    }
}

/// Commitment admission/escrow policy mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentMode {
    Disabled,
    Soft,
    Escrowed,
}

/// Immutable ledger-wide parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerParameters {
    pub limit_min: u32,
    pub limit_max: u32,
    pub limit_default: u32,
    pub commitment_mode: CommitmentMode,
    pub floor_threshold: u32,
}

/// Reason tag carried on a single balance delta within a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaReason {
    SpotPayer,
    SpotPayee,
    CommitmentFulfillmentPayer,
    CommitmentFulfillmentPayee,
    DisputeCompensationPayer,
    DisputeCompensationPayee,
}

/// One leg of a balance-update batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub member: MemberId,
    pub delta: i64,
    pub reason: DeltaReason,
    pub related_event_id: Option<EventId>,
}

/// Identity membership-change audit record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MembershipChangeRecord {
    pub member: MemberId,
    pub change: MembershipChange,
    pub at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipChange {
    Admitted,
    Accepted,
    Frozen,
    Unfrozen,
    Removed,
}

/// Identity record: the bijection between a public key and a member id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub member: MemberId,
    pub cell: CellId,
    pub display_name: String,
    pub public_key: PublicKeyBytes,
    pub created_at: Timestamp,
    pub removed_at: Option<Timestamp>,
    pub changes: Vec<MembershipChangeRecord>,
}

/// Spot transaction lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Proposed,
    Completed,
    Rejected,
}

/// A single-shot, two-sided, co-signed spot transfer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub payer: MemberId,
    pub payee: MemberId,
    pub amount: u64,
    pub description: String,
    pub category: Option<String>,
    pub created_at: Timestamp,
    pub payer_signature: SignatureBytes,
    pub payee_signature: SignatureBytes,
    pub status: TransactionStatus,
}

/// A transaction accepted for later execution via the offline queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueuedTransaction {
    pub transaction: Transaction,
    pub queued_at: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentType {
    Soft,
    Escrowed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitmentStatus {
    Proposed,
    Active,
    Fulfilled,
    Cancelled,
    Disputed,
}

/// A future-dated obligation of the promisor toward the promisee.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commitment {
    pub id: CommitmentId,
    pub kind: CommitmentType,
    pub promisor: MemberId,
    pub promisee: MemberId,
    pub value: u64,
    pub due_date: Timestamp,
    pub category: Option<String>,
    pub status: CommitmentStatus,
    pub created_at: Timestamp,
    pub promisor_signature: SignatureBytes,
    pub promisee_signature: Option<SignatureBytes>,
    pub cancellation_signature: Option<SignatureBytes>,
    pub fulfillment_signature: Option<SignatureBytes>,
    pub fulfillment_rating: Option<u8>,
    pub related_transaction_id: Option<TransactionId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProposalCategory {
    Routine,
    Significant,
    Critical,
    Constitutional,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    Draft,
    Open,
    Closed,
    Passed,
    Rejected,
    Executed,
    Expired,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteChoice {
    Approve,
    Reject,
    Abstain,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Vote {
    pub voter: MemberId,
    pub choice: VoteChoice,
    pub signature: SignatureBytes,
    pub cast_at: Timestamp,
}

/// Typed payload a proposal carries, executed on passage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ProposalPayload {
    AdmitMember { applicant: MemberId, public_key: PublicKeyBytes, display_name: String },
    ExcludeMember { member: MemberId },
    FreezeMember { member: MemberId },
    UnfreezeMember { member: MemberId },
    AdjustLimit { member: MemberId, new_limit: u32 },
    CancelCommitment { commitment: CommitmentId },
    PolicyChange { new_parameters: LedgerParameters },
    EmergencyStateChange { new_state: crate::emergency::RiskState },
    CouncilElection { new_council: Vec<MemberId> },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub kind: ProposalKind,
    pub category: ProposalCategory,
    pub status: ProposalStatus,
    pub proposer: MemberId,
    pub votes: BTreeMap<MemberId, Vote>,
    pub voting_deadline: Timestamp,
    pub payload: ProposalPayload,
    pub created_at: Timestamp,
    pub outcome: Option<ProposalOutcome>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalKind {
    MemberAdmission,
    MemberExclusion,
    FreezeUnfreeze,
    LimitAdjustment,
    CommitmentCancellation,
    DisputeResolution,
    PolicyChange,
    EmergencyStateChange,
    CouncilElection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalOutcome {
    Passed,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeStatus {
    Filed,
    UnderReview,
    HearingScheduled,
    Resolved,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeType {
    NonDelivery,
    QualityDispute,
    FraudAllegation,
    Other,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub kind: DisputeType,
    pub claimant: MemberId,
    pub respondent: MemberId,
    pub evidence: Vec<String>,
    pub status: DisputeStatus,
    pub reviewer: Option<MemberId>,
    pub filed_at: Timestamp,
    pub resolution: Option<DisputeResolution>,
}

/// Side effects attached to a dispute resolution; each is re-validated by the Ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisputeResolution {
    pub decision: String,
    pub compensating_transaction: Option<(MemberId, MemberId, u64)>,
    pub freezes: Vec<MemberId>,
    pub limit_adjustments: Vec<(MemberId, u32)>,
    pub exclusions: Vec<MemberId>,
}

/// Council roster with rotating terms.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Council {
    pub members: Vec<MemberId>,
    pub term_started_at: Timestamp,
    pub term_length: u64,
}

/// Document key families recognized by the storage interface.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocKey {
    Ledger(CellId),
    Identity(MemberId),
    IdentityByPublicKey(PublicKeyBytes),
    Transaction(TransactionId),
    Queue(TransactionId),
    Event(CellId, EventId),
    MembershipChange(MemberId, Timestamp),
    Commitment(CommitmentId),
    Proposal(ProposalId),
    Dispute(DisputeId),
    CouncilRoster(CellId),
    Emergency(CellId),
    StateHistory(CellId, Timestamp),
}
