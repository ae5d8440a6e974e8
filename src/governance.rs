//! Cell Protocol - Governance
//!
//! Bounded authority: every governance mutation, whether it arrives through
//! a passed proposal or a direct council action, is executed through the
//! same Ledger/Identity/Commitments entry points used elsewhere. Governance
//! holds no private path into the ledger.

use serde::{Deserialize, Serialize};

use crate::commitments::Commitments;
use crate::emergency::Emergency;
use crate::errors::GovernanceError;
use crate::events::{EventLog, EventPayload};
use crate::identity::Identity;
use crate::ledger::Ledger;
use crate::storage::{KvStore, KvStoreExt};
use crate::types::{
    CellId, Council, Dispute, DisputeId, DisputeResolution, DisputeStatus, DisputeType, MemberId,
    Proposal, ProposalCategory, ProposalId, ProposalKind, ProposalOutcome, ProposalPayload,
    ProposalStatus, SignatureBytes, Timestamp, Vote, VoteChoice,
};

/// Minimum participation share and minimum approve share for a category.
fn quorum_and_threshold(category: ProposalCategory) -> (f64, f64) {
    match category {
        ProposalCategory::Routine => (0.5, 0.5),
        ProposalCategory::Significant => (0.5, 0.5),
        ProposalCategory::Critical => (0.5, 0.67),
        ProposalCategory::Constitutional => (0.5, 0.75),
    }
}

fn category_for_kind(kind: ProposalKind) -> ProposalCategory {
    match kind {
        ProposalKind::MemberAdmission | ProposalKind::FreezeUnfreeze | ProposalKind::LimitAdjustment => {
            ProposalCategory::Routine
        }
        ProposalKind::MemberExclusion | ProposalKind::DisputeResolution | ProposalKind::CommitmentCancellation => {
            ProposalCategory::Significant
        }
        ProposalKind::PolicyChange | ProposalKind::EmergencyStateChange => ProposalCategory::Critical,
        ProposalKind::CouncilElection => ProposalCategory::Constitutional,
    }
}

fn default_voting_duration(category: ProposalCategory) -> u64 {
    const DAY: u64 = 86_400;
    match category {
        ProposalCategory::Routine => 3 * DAY,
        ProposalCategory::Significant => 5 * DAY,
        ProposalCategory::Critical => 7 * DAY,
        ProposalCategory::Constitutional => 14 * DAY,
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct GovernanceDocument {
    council: Council,
    /// Governance policy rate limit on a single limit adjustment, `eta`.
    /// Not a Ledger invariant: the Ledger only enforces I5 bounds and the
    /// debt floor.
    limit_adjustment_rate_limit: u32,
}

pub struct Governance<'a> {
    store: &'a dyn KvStore,
    cell_id: CellId,
}

impl<'a> Governance<'a> {
    pub fn create(store: &'a dyn KvStore, cell_id: CellId, council: Council, limit_adjustment_rate_limit: u32) -> Self {
        let doc = GovernanceDocument { council, limit_adjustment_rate_limit };
        store
            .put(crate::types::DocKey::CouncilRoster(cell_id.clone()), &doc, None)
            .expect("fresh cell id must not already have a governance document");
        Governance { store, cell_id }
    }

    pub fn open(store: &'a dyn KvStore, cell_id: CellId) -> Self {
        Governance { store, cell_id }
    }

    fn key(&self) -> crate::types::DocKey {
        crate::types::DocKey::CouncilRoster(self.cell_id.clone())
    }

    fn load(&self) -> GovernanceDocument {
        self.store.get(&self.key()).expect("governance document must exist once created")
    }

    fn save(&self, doc: &GovernanceDocument) {
        self.store.put(self.key(), doc, None).expect("governance document write must succeed");
    }

    pub fn council(&self) -> Council {
        self.load().council
    }

    fn require_council_member(&self, actor: &MemberId) -> Result<(), GovernanceError> {
        if !self.load().council.members.contains(actor) {
            return Err(GovernanceError::NotCouncilMember { member: actor.clone() });
        }
        Ok(())
    }

    fn proposal_key(id: ProposalId) -> crate::types::DocKey {
        crate::types::DocKey::Proposal(id)
    }

    pub fn get_proposal(&self, id: ProposalId) -> Result<Proposal, GovernanceError> {
        self.store.get(&Self::proposal_key(id)).ok_or(GovernanceError::ProposalNotFound { id })
    }

    fn save_proposal(&self, proposal: &Proposal) {
        self.store.put(Self::proposal_key(proposal.id), proposal, None).expect("proposal write must succeed");
    }

    /// Creates a proposal in DRAFT and immediately opens it for voting, with
    /// a category-dependent deadline (spec.md's two-phase DRAFT/OPEN
    /// lifecycle collapses to one call since no separate drafting edits are
    /// supported by the core).
    pub fn create_proposal(
        &self,
        log: &EventLog,
        now: Timestamp,
        id: ProposalId,
        kind: ProposalKind,
        proposer: MemberId,
        payload: ProposalPayload,
    ) -> Result<Proposal, GovernanceError> {
        self.require_council_member(&proposer)?;
        let category = category_for_kind(kind);
        let proposal = Proposal {
            id,
            kind,
            category,
            status: ProposalStatus::Open,
            proposer,
            votes: Default::default(),
            voting_deadline: now + default_voting_duration(category),
            payload,
            created_at: now,
            outcome: None,
        };
        self.save_proposal(&proposal);
        log.append(now, EventPayload::ProposalCreated { proposal_id: id }).expect("event log append must succeed");
        Ok(proposal)
    }

    /// Casts a vote; votes are final, one per member, only while OPEN and
    /// before the deadline.
    pub fn cast_vote(
        &self,
        log: &EventLog,
        now: Timestamp,
        id: ProposalId,
        voter: MemberId,
        choice: VoteChoice,
        signature: SignatureBytes,
    ) -> Result<Proposal, GovernanceError> {
        self.require_council_member(&voter)?;
        let mut proposal = self.get_proposal(id)?;
        if proposal.status != ProposalStatus::Open {
            return Err(GovernanceError::ProposalNotOpen { id });
        }
        if now > proposal.voting_deadline {
            return Err(GovernanceError::VotingDeadlinePassed { id });
        }
        if proposal.votes.contains_key(&voter) {
            return Err(GovernanceError::AlreadyVoted { member: voter, id });
        }
        proposal.votes.insert(voter.clone(), Vote { voter: voter.clone(), choice, signature, cast_at: now });
        self.save_proposal(&proposal);
        log.append(now, EventPayload::ProposalVoted { proposal_id: id, voter }).expect("event log append must succeed");
        Ok(proposal)
    }

    /// Closes voting and computes PASSED/REJECTED from participation and
    /// approve share against the category's quorum/threshold. EXPIRED is the
    /// same close path invoked after the deadline with no votes cast.
    pub fn close_proposal(&self, log: &EventLog, now: Timestamp, id: ProposalId) -> Result<Proposal, GovernanceError> {
        let mut proposal = self.get_proposal(id)?;
        if proposal.status != ProposalStatus::Open {
            return Err(GovernanceError::ProposalNotOpen { id });
        }

        let council = self.load().council;
        let (quorum, threshold) = quorum_and_threshold(proposal.category);
        let eligible = council.members.len().max(1) as f64;
        let participation = proposal.votes.len() as f64 / eligible;
        let approvals = proposal.votes.values().filter(|v| v.choice == VoteChoice::Approve).count() as f64;
        let cast = proposal.votes.len().max(1) as f64;
        let approve_share = approvals / cast;

        if proposal.votes.is_empty() || now <= proposal.voting_deadline && participation < quorum {
            proposal.status = if now > proposal.voting_deadline { ProposalStatus::Expired } else { ProposalStatus::Rejected };
        } else if participation >= quorum && approve_share >= threshold {
            proposal.status = ProposalStatus::Passed;
            proposal.outcome = Some(ProposalOutcome::Passed);
        } else {
            proposal.status = ProposalStatus::Rejected;
            proposal.outcome = Some(ProposalOutcome::Rejected);
        }

        self.save_proposal(&proposal);
        log.append(now, EventPayload::ProposalClosed { proposal_id: id }).expect("event log append must succeed");
        Ok(proposal)
    }

    /// Executes a PASSED proposal's payload through the same entry points
    /// every other caller uses. EXECUTED on success, FAILED (proposal kept,
    /// status set to FAILED) if the underlying engine call rejects it.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_proposal(
        &self,
        ledger: &Ledger,
        identity: &Identity,
        commitments: &Commitments,
        emergency: &Emergency,
        log: &EventLog,
        now: Timestamp,
        id: ProposalId,
    ) -> Result<Proposal, GovernanceError> {
        let mut proposal = self.get_proposal(id)?;
        if proposal.status != ProposalStatus::Passed {
            return Err(GovernanceError::ProposalNotPassed { id });
        }

        let result = self.apply_payload(ledger, identity, commitments, emergency, log, now, id, &proposal.payload);
        match result {
            Ok(()) => {
                proposal.status = ProposalStatus::Executed;
                self.save_proposal(&proposal);
                log.append(now, EventPayload::ProposalExecuted { proposal_id: id }).expect("event log append must succeed");
                Ok(proposal)
            }
            Err(err) => {
                proposal.status = ProposalStatus::Failed;
                self.save_proposal(&proposal);
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_payload(
        &self,
        ledger: &Ledger,
        identity: &Identity,
        commitments: &Commitments,
        emergency: &Emergency,
        log: &EventLog,
        now: Timestamp,
        proposal_id: ProposalId,
        payload: &ProposalPayload,
    ) -> Result<(), GovernanceError> {
        match payload {
            ProposalPayload::AdmitMember { applicant, public_key, display_name } => {
                let limit = ledger.parameters().limit_default;
                identity.add_member(ledger, log, now, applicant.clone(), display_name.clone(), *public_key, limit)?;
            }
            ProposalPayload::ExcludeMember { member } => {
                identity.remove_member(ledger, commitments, log, now, member)?;
            }
            ProposalPayload::FreezeMember { member } => {
                identity.freeze(ledger, log, now, member)?;
            }
            ProposalPayload::UnfreezeMember { member } => {
                identity.unfreeze(ledger, log, now, member)?;
            }
            ProposalPayload::AdjustLimit { member, new_limit } => {
                self.adjust_limit(ledger, log, now, member, *new_limit)?;
            }
            ProposalPayload::CancelCommitment { commitment } => {
                let existing = commitments.get(commitment)?;
                commitments.cancel(ledger, log, now, commitment, &existing.promisor, [0u8; 64])?;
            }
            ProposalPayload::PolicyChange { new_parameters } => {
                ledger.set_parameters(log, now, new_parameters.clone())?;
            }
            ProposalPayload::EmergencyStateChange { new_state } => {
                emergency.override_transition(log, now, *new_state, proposal_id).map_err(|_| {
                    GovernanceError::ProposalNotPassed { id: proposal_id }
                })?;
                ledger.set_parameters(log, now, emergency.active_policy().apply_to(ledger.parameters()))?;
            }
            ProposalPayload::CouncilElection { new_council } => {
                let mut doc = self.load();
                doc.council.members = new_council.clone();
                doc.council.term_started_at = now;
                self.save(&doc);
            }
        }
        Ok(())
    }

    /// Direct council action: bypasses voting but still routes through the
    /// ledger check, exactly like a passed proposal's payload execution.
    pub fn adjust_limit(
        &self,
        ledger: &Ledger,
        log: &EventLog,
        now: Timestamp,
        member: &MemberId,
        new_limit: u32,
    ) -> Result<(), GovernanceError> {
        let eta = self.load().limit_adjustment_rate_limit;
        let old_limit = ledger.get_member_state(member)?.limit;
        let delta = (new_limit as i64 - old_limit as i64).unsigned_abs() as u32;
        if delta > eta {
            return Err(GovernanceError::RateLimitExceeded { old_limit, new_limit, eta });
        }
        ledger.set_member_limit(log, now, member, new_limit)?;
        Ok(())
    }

    fn dispute_key(id: DisputeId) -> crate::types::DocKey {
        crate::types::DocKey::Dispute(id)
    }

    pub fn get_dispute(&self, id: DisputeId) -> Result<Dispute, GovernanceError> {
        self.store.get(&Self::dispute_key(id)).ok_or(GovernanceError::DisputeNotFound { id })
    }

    fn save_dispute(&self, dispute: &Dispute) {
        self.store.put(Self::dispute_key(dispute.id), dispute, None).expect("dispute write must succeed");
    }

    pub fn file_dispute(
        &self,
        log: &EventLog,
        now: Timestamp,
        id: DisputeId,
        kind: DisputeType,
        claimant: MemberId,
        respondent: MemberId,
        evidence: Vec<String>,
    ) -> Result<Dispute, GovernanceError> {
        let dispute = Dispute {
            id,
            kind,
            claimant,
            respondent,
            evidence,
            status: DisputeStatus::Filed,
            reviewer: None,
            filed_at: now,
            resolution: None,
        };
        self.save_dispute(&dispute);
        log.append(now, EventPayload::DisputeFiled { dispute_id: id }).expect("event log append must succeed");
        Ok(dispute)
    }

    pub fn assign_reviewer(&self, id: DisputeId, reviewer: MemberId) -> Result<Dispute, GovernanceError> {
        let mut dispute = self.get_dispute(id)?;
        if reviewer == dispute.claimant || reviewer == dispute.respondent {
            return Err(GovernanceError::ReviewerIsParty);
        }
        dispute.reviewer = Some(reviewer);
        dispute.status = DisputeStatus::UnderReview;
        self.save_dispute(&dispute);
        Ok(dispute)
    }

    pub fn schedule_hearing(&self, id: DisputeId) -> Result<Dispute, GovernanceError> {
        let mut dispute = self.get_dispute(id)?;
        dispute.status = DisputeStatus::HearingScheduled;
        self.save_dispute(&dispute);
        Ok(dispute)
    }

    /// Resolves a dispute. Every side-effect carried by the resolution is
    /// re-validated by the ledger exactly as a direct council action would
    /// be; a failure partway leaves earlier side-effects committed (each is
    /// independently atomic) but the dispute itself stays UNDER_REVIEW, not
    /// RESOLVED, so the failure is visible.
    pub fn resolve_dispute(
        &self,
        ledger: &Ledger,
        identity: &Identity,
        commitments: &Commitments,
        log: &EventLog,
        now: Timestamp,
        id: DisputeId,
        resolution: DisputeResolution,
    ) -> Result<Dispute, GovernanceError> {
        let mut dispute = self.get_dispute(id)?;

        if let Some((payer, payee, amount)) = &resolution.compensating_transaction {
            ledger.apply_balance_updates(
                log,
                now,
                vec![
                    crate::types::BalanceDelta {
                        member: payer.clone(),
                        delta: -(*amount as i64),
                        reason: crate::types::DeltaReason::DisputeCompensationPayer,
                        related_event_id: None,
                    },
                    crate::types::BalanceDelta {
                        member: payee.clone(),
                        delta: *amount as i64,
                        reason: crate::types::DeltaReason::DisputeCompensationPayee,
                        related_event_id: None,
                    },
                ],
            )?;
        }
        for member in &resolution.freezes {
            identity.freeze(ledger, log, now, member)?;
        }
        for (member, new_limit) in &resolution.limit_adjustments {
            self.adjust_limit(ledger, log, now, member, *new_limit)?;
        }
        for member in &resolution.exclusions {
            identity.remove_member(ledger, commitments, log, now, member)?;
        }

        dispute.status = DisputeStatus::Resolved;
        dispute.resolution = Some(resolution);
        self.save_dispute(&dispute);
        log.append(now, EventPayload::DisputeResolved { dispute_id: id }).expect("event log append must succeed");
        Ok(dispute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MockVerifier;
    use crate::emergency::{Emergency, TransitionThresholds};
    use crate::identity::Identity;
    use crate::ledger::Ledger;
    use crate::storage::MemoryStore;
    use crate::types::{CommitmentMode, LedgerParameters, MemberStatus};

    fn params() -> LedgerParameters {
        LedgerParameters { limit_min: 10, limit_max: 1000, limit_default: 100, commitment_mode: CommitmentMode::Disabled, floor_threshold: 0 }
    }

    fn thresholds() -> TransitionThresholds {
        TransitionThresholds {
            floor_mass_stressed: 0.3,
            floor_mass_panic: 0.6,
            balance_variance_stressed: 1000.0,
            balance_variance_panic: 5000.0,
            hold_down_period: 100,
        }
    }

    struct Fixture<'a> {
        ledger: Ledger<'a>,
        identity: Identity<'a>,
        commitments: Commitments<'a>,
        emergency: Emergency<'a>,
        governance: Governance<'a>,
        log: EventLog<'a>,
    }

    fn setup<'a>(store: &'a MemoryStore, verifier: &'a MockVerifier) -> Fixture<'a> {
        let ledger = Ledger::create(store, "cell-1".into(), params());
        let identity = Identity::new(store, "cell-1".into());
        let log = EventLog::new(store, "cell-1".into());
        let commitments = Commitments::new(store, verifier, "cell-1".into());
        let emergency = Emergency::create(store, "cell-1".into(), thresholds());
        identity.add_member(&ledger, &log, 0, "a".into(), "A".into(), [1u8; 32], 100).unwrap();
        identity.add_member(&ledger, &log, 0, "b".into(), "B".into(), [2u8; 32], 100).unwrap();
        identity.add_member(&ledger, &log, 0, "c".into(), "C".into(), [3u8; 32], 100).unwrap();
        for member in ["a", "b", "c"] {
            identity.accept_member(&ledger, &log, 0, &member.to_string(), MemberStatus::Active).unwrap();
        }
        let council = Council { members: vec!["a".into(), "b".into(), "c".into()], term_started_at: 0, term_length: 1_000_000 };
        let governance = Governance::create(store, "cell-1".into(), council, 50);
        Fixture { ledger, identity, commitments, emergency, governance, log }
    }

    #[test]
    fn proposal_passes_with_quorum_and_executes_limit_adjustment() {
        let store = MemoryStore::new();
        let verifier = MockVerifier::accepting();
        let fx = setup(&store, &verifier);

        fx.governance
            .create_proposal(&fx.log, 100, 1, ProposalKind::LimitAdjustment, "a".into(), ProposalPayload::AdjustLimit { member: "b".into(), new_limit: 120 })
            .unwrap();
        fx.governance.cast_vote(&fx.log, 101, 1, "a".into(), VoteChoice::Approve, [0u8; 64]).unwrap();
        fx.governance.cast_vote(&fx.log, 101, 1, "b".into(), VoteChoice::Approve, [0u8; 64]).unwrap();

        let closed = fx.governance.close_proposal(&fx.log, 102, 1).unwrap();
        assert_eq!(closed.status, ProposalStatus::Passed);

        let executed = fx.governance.execute_proposal(&fx.ledger, &fx.identity, &fx.commitments, &fx.emergency, &fx.log, 103, 1).unwrap();
        assert_eq!(executed.status, ProposalStatus::Executed);
        assert_eq!(fx.ledger.get_member_state(&"b".to_string()).unwrap().limit, 120);
    }

    #[test]
    fn proposal_without_quorum_is_rejected() {
        let store = MemoryStore::new();
        let verifier = MockVerifier::accepting();
        let fx = setup(&store, &verifier);

        fx.governance
            .create_proposal(&fx.log, 100, 1, ProposalKind::LimitAdjustment, "a".into(), ProposalPayload::AdjustLimit { member: "b".into(), new_limit: 120 })
            .unwrap();
        fx.governance.cast_vote(&fx.log, 101, 1, "a".into(), VoteChoice::Approve, [0u8; 64]).unwrap();

        let closed = fx.governance.close_proposal(&fx.log, 102, 1).unwrap();
        assert_eq!(closed.status, ProposalStatus::Rejected);
    }

    #[test]
    fn rate_limited_direct_limit_adjustment_is_rejected_when_too_large() {
        let store = MemoryStore::new();
        let verifier = MockVerifier::accepting();
        let fx = setup(&store, &verifier);

        let err = fx.governance.adjust_limit(&fx.ledger, &fx.log, 100, &"a".to_string(), 500).unwrap_err();
        assert_eq!(err, GovernanceError::RateLimitExceeded { old_limit: 100, new_limit: 500, eta: 50 });
    }

    #[test]
    fn dispute_reviewer_cannot_be_a_party() {
        let store = MemoryStore::new();
        let verifier = MockVerifier::accepting();
        let fx = setup(&store, &verifier);

        fx.governance.file_dispute(&fx.log, 100, 1, DisputeType::NonDelivery, "a".into(), "b".into(), vec!["evidence".into()]).unwrap();
        let err = fx.governance.assign_reviewer(1, "a".to_string()).unwrap_err();
        assert_eq!(err, GovernanceError::ReviewerIsParty);

        let assigned = fx.governance.assign_reviewer(1, "c".to_string()).unwrap();
        assert_eq!(assigned.status, DisputeStatus::UnderReview);
    }

    #[test]
    fn dispute_resolution_applies_compensating_transaction() {
        let store = MemoryStore::new();
        let verifier = MockVerifier::accepting();
        let fx = setup(&store, &verifier);

        fx.governance.file_dispute(&fx.log, 100, 1, DisputeType::QualityDispute, "a".into(), "b".into(), vec![]).unwrap();
        fx.governance.assign_reviewer(1, "c".to_string()).unwrap();

        let resolution = DisputeResolution {
            decision: "b compensates a".into(),
            compensating_transaction: Some(("b".into(), "a".into(), 20)),
            freezes: vec![],
            limit_adjustments: vec![],
            exclusions: vec![],
        };
        let resolved = fx.governance.resolve_dispute(&fx.ledger, &fx.identity, &fx.commitments, &fx.log, 103, 1, resolution).unwrap();
        assert_eq!(resolved.status, DisputeStatus::Resolved);
        assert_eq!(fx.ledger.get_balance(&"a".to_string()).unwrap(), 20);
        assert_eq!(fx.ledger.get_balance(&"b".to_string()).unwrap(), -20);
    }
}
