//! Cell Protocol - Error Definitions
//!
//! One disjoint sum type per engine, matching the exhaustive error lists in
//! per engine. No expected failure is ever modeled as a string.

use thiserror::Error;

use crate::types::{CommitmentId, DisputeId, MemberId, ProposalId, TransactionId};

#[derive(Clone, Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("sum of batch deltas is {sum}, not zero")]
    ConservationViolation { sum: i64 },
    #[error("member {member} would breach its floor (balance {balance}, limit {limit})")]
    FloorViolation { member: MemberId, balance: i64, limit: u32 },
    #[error("member {member} would breach escrow safety (balance {balance}, reserve {reserve}, limit {limit})")]
    EscrowViolation { member: MemberId, balance: i64, reserve: u32, limit: u32 },
    #[error("member {member} is frozen and cannot be debited")]
    MemberFrozen { member: MemberId },
    #[error("member {member} not found")]
    MemberNotFound { member: MemberId },
    #[error("member {member} already exists")]
    MemberAlreadyExists { member: MemberId },
    #[error("limit {limit} outside bounds [{min}, {max}]")]
    LimitOutOfBounds { limit: u32, min: u32, max: u32 },
    #[error("new limit {new_limit} would make balance {balance} breach the floor")]
    LimitBelowDebt { new_limit: u32, balance: i64 },
    #[error("reserve update would drive reserve negative for member {member}")]
    NegativeReserve { member: MemberId },
    #[error("member {member} has nonzero balance {balance}, cannot remove")]
    NonZeroBalanceOnRemoval { member: MemberId, balance: i64 },
    #[error("member {member} has an active commitment, cannot remove")]
    ActiveCommitmentOnRemoval { member: MemberId },
    #[error("member {member} cannot be accepted from its current status")]
    InvalidAdmissionTransition { member: MemberId },
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum IdentityError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("identity already exists for this public key")]
    IdentityAlreadyExists,
    #[error("identity {member} not found")]
    IdentityNotFound { member: MemberId },
    #[error("no identity registered for the given public key")]
    UnknownPublicKey,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum TransactionError {
    #[error("member {member} not found")]
    MemberNotFound { member: MemberId },
    #[error("member {member} is not active")]
    MemberNotActive { member: MemberId },
    #[error("payer and payee are the same member")]
    SelfTransaction,
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("insufficient capacity: available {available}, required {required}")]
    InsufficientCapacity { available: i64, required: u64 },
    #[error("transaction {id} already submitted")]
    DuplicateTransaction { id: TransactionId },
    #[error("invalid signature from {party}")]
    InvalidSignature { party: MemberId },
    #[error(transparent)]
    LedgerError(#[from] LedgerError),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum CommitmentError {
    #[error("member {member} is not active")]
    MemberNotActive { member: MemberId },
    #[error("insufficient reserve capacity: available {available}, required {required}")]
    InsufficientReserveCapacity { available: i64, required: u64 },
    #[error("due date must be strictly in the future")]
    InvalidDueDate,
    #[error("commitment {id} not found")]
    CommitmentNotFound { id: CommitmentId },
    #[error("invalid status transition for commitment {id}")]
    InvalidStatusTransition { id: CommitmentId },
    #[error("invalid signature from {party}")]
    InvalidSignature { party: MemberId },
    #[error("cancellation not authorized for {member}")]
    CancellationNotAuthorized { member: MemberId },
    #[error("commitment {id} already fulfilled")]
    AlreadyFulfilled { id: CommitmentId },
    #[error("commitments are disabled for this cell")]
    CommitmentsDisabled,
    #[error("escrowed commitments require the cell's commitment mode to be ESCROWED")]
    EscrowModeRequired,
    #[error("soft commitments are suspended while the emergency policy forces ESCROWED")]
    SoftCommitmentsSuspended,
    #[error(transparent)]
    LedgerError(#[from] LedgerError),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum GovernanceError {
    #[error("actor {member} is not a current council member")]
    NotCouncilMember { member: MemberId },
    #[error("proposal {id} not found")]
    ProposalNotFound { id: ProposalId },
    #[error("proposal {id} is not open for voting")]
    ProposalNotOpen { id: ProposalId },
    #[error("member {member} already voted on proposal {id}")]
    AlreadyVoted { member: MemberId, id: ProposalId },
    #[error("voting deadline has passed for proposal {id}")]
    VotingDeadlinePassed { id: ProposalId },
    #[error("proposal {id} did not pass")]
    ProposalNotPassed { id: ProposalId },
    #[error("proposal {id} already executed")]
    AlreadyExecuted { id: ProposalId },
    #[error("rate limit exceeded: |{new_limit} - {old_limit}| > {eta}")]
    RateLimitExceeded { old_limit: u32, new_limit: u32, eta: u32 },
    #[error("dispute {id} not found")]
    DisputeNotFound { id: DisputeId },
    #[error("reviewer cannot be a party to the dispute")]
    ReviewerIsParty,
    #[error("invalid signature from {party}")]
    InvalidSignature { party: MemberId },
    #[error(transparent)]
    LedgerError(#[from] LedgerError),
    #[error(transparent)]
    IdentityError(#[from] IdentityError),
    #[error(transparent)]
    CommitmentError(#[from] CommitmentError),
    #[error(transparent)]
    TransactionError(#[from] TransactionError),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum EmergencyError {
    #[error("invalid risk-state transition")]
    InvalidTransition,
    #[error("hold-down period has not elapsed for an automatic transition")]
    HoldDownNotElapsed,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum StorageError {
    #[error("revision conflict on key")]
    RevisionConflict,
    #[error("key not found")]
    NotFound,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum EventLogError {
    #[error("sequence numbers must be contiguous and strictly increasing")]
    NonMonotonicSequence,
}

/// Crate-level umbrella error returned by the `Cell` facade.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Commitment(#[from] CommitmentError),
    #[error(transparent)]
    Governance(#[from] GovernanceError),
    #[error(transparent)]
    Emergency(#[from] EmergencyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
}
