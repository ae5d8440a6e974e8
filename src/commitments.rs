//! Cell Protocol - Commitments
//!
//! Future-dated obligations, optionally reserving capacity; the fulfill
//! path synthesizes a one-way spot transaction from promisee to promisor.

use crate::crypto::{canonical_commitment_bytes, SignatureVerifier};
use crate::emergency::Emergency;
use crate::errors::CommitmentError;
use crate::events::{EventLog, EventPayload};
use crate::identity::Identity;
use crate::ledger::{Ledger, ReserveUpdate};
use crate::storage::{KvStore, KvStoreExt};
use crate::types::{
    BalanceDelta, CellId, Commitment, CommitmentId, CommitmentMode, CommitmentStatus,
    CommitmentType, DeltaReason, MemberId, MemberStatus, SignatureBytes, Timestamp, TransactionId,
};

pub struct Commitments<'a> {
    store: &'a dyn KvStore,
    verifier: &'a dyn SignatureVerifier,
    #[allow(dead_code)]
    cell_id: CellId,
}

impl<'a> Commitments<'a> {
    pub fn new(store: &'a dyn KvStore, verifier: &'a dyn SignatureVerifier, cell_id: CellId) -> Self {
        Commitments { store, verifier, cell_id }
    }

    fn key(&self, id: &CommitmentId) -> crate::types::DocKey {
        crate::types::DocKey::Commitment(id.clone())
    }

    pub fn get(&self, id: &CommitmentId) -> Result<Commitment, CommitmentError> {
        self.store.get(&self.key(id)).ok_or_else(|| CommitmentError::CommitmentNotFound { id: id.clone() })
    }

    fn save(&self, commitment: &Commitment) {
        self.store.put(self.key(&commitment.id), commitment, None).expect("commitment write must succeed");
    }

    fn require_active(&self, ledger: &Ledger, member: &MemberId) -> Result<(), CommitmentError> {
        let state = ledger.get_member_state(member)?;
        if state.status != MemberStatus::Active {
            return Err(CommitmentError::MemberNotActive { member: member.clone() });
        }
        Ok(())
    }

    /// Creates a PROPOSED commitment, signed by the promisor only. Rejected
    /// outright if the ledger's commitment mode is DISABLED, if an ESCROWED
    /// commitment is attempted while the mode is SOFT (no reserve mechanics
    /// would back it), or if SOFT creation is attempted while the active
    /// emergency policy forces ESCROWED.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        &self,
        ledger: &Ledger,
        identity: &Identity,
        emergency: &Emergency,
        log: &EventLog,
        now: Timestamp,
        id: CommitmentId,
        kind: CommitmentType,
        promisor: MemberId,
        promisee: MemberId,
        value: u64,
        due_date: Timestamp,
        category: Option<String>,
        promisor_signature: SignatureBytes,
    ) -> Result<Commitment, CommitmentError> {
        if due_date <= now {
            return Err(CommitmentError::InvalidDueDate);
        }
        self.require_active(ledger, &promisor)?;
        self.require_active(ledger, &promisee)?;

        match (ledger.parameters().commitment_mode, kind) {
            (CommitmentMode::Disabled, _) => return Err(CommitmentError::CommitmentsDisabled),
            (CommitmentMode::Soft, CommitmentType::Escrowed) => return Err(CommitmentError::EscrowModeRequired),
            _ => {}
        }
        if kind == CommitmentType::Soft && emergency.active_policy().commitment_mode == CommitmentMode::Escrowed {
            return Err(CommitmentError::SoftCommitmentsSuspended);
        }

        let promisor_identity = identity.get_identity(&promisor).map_err(|_| CommitmentError::MemberNotActive { member: promisor.clone() })?;
        let message = canonical_commitment_bytes(&id, &promisor, &promisee, value, due_date, category.as_deref(), now);
        if !self.verifier.verify(&promisor_identity.public_key, &message, &promisor_signature) {
            return Err(CommitmentError::InvalidSignature { party: promisor });
        }

        let commitment = Commitment {
            id: id.clone(),
            kind,
            promisor,
            promisee,
            value,
            due_date,
            category,
            status: CommitmentStatus::Proposed,
            created_at: now,
            promisor_signature,
            promisee_signature: None,
            cancellation_signature: None,
            fulfillment_signature: None,
            fulfillment_rating: None,
            related_transaction_id: None,
        };
        self.save(&commitment);
        log.append(now, EventPayload::CommitmentCreated { commitment_id: id }).expect("event log append must succeed");
        Ok(commitment)
    }

    /// Promisee co-signs: PROPOSED -> ACTIVE. Escrowed commitments reserve
    /// capacity at this point, satisfying I4.
    pub fn activate(
        &self,
        ledger: &Ledger,
        identity: &Identity,
        log: &EventLog,
        now: Timestamp,
        id: &CommitmentId,
        promisee_signature: SignatureBytes,
    ) -> Result<Commitment, CommitmentError> {
        let mut commitment = self.get(id)?;
        if commitment.status != CommitmentStatus::Proposed {
            return Err(CommitmentError::InvalidStatusTransition { id: id.clone() });
        }

        let promisee_identity = identity
            .get_identity(&commitment.promisee)
            .map_err(|_| CommitmentError::MemberNotActive { member: commitment.promisee.clone() })?;
        let message = canonical_commitment_bytes(
            &commitment.id, &commitment.promisor, &commitment.promisee, commitment.value,
            commitment.due_date, commitment.category.as_deref(), commitment.created_at,
        );
        if !self.verifier.verify(&promisee_identity.public_key, &message, &promisee_signature) {
            return Err(CommitmentError::InvalidSignature { party: commitment.promisee.clone() });
        }

        if commitment.kind == CommitmentType::Escrowed {
            let available = ledger.available_capacity(&commitment.promisor)?;
            ledger
                .apply_reserve_update(log, now, ReserveUpdate { member: commitment.promisor.clone(), delta: commitment.value as i64 })
                .map_err(|_| CommitmentError::InsufficientReserveCapacity {
                    available: available.max(0),
                    required: commitment.value,
                })?;
        }

        commitment.promisee_signature = Some(promisee_signature);
        commitment.status = CommitmentStatus::Active;
        self.save(&commitment);
        log.append(now, EventPayload::CommitmentActivated { commitment_id: id.clone() }).expect("event log append must succeed");
        Ok(commitment)
    }

    /// Fulfillment: releases the escrow reserve (if any), then executes the
    /// one-way promisee->promisor transaction. If the
    /// transaction fails after the reserve release, the release is reversed
    /// in the same failure path so no partial state is observable.
    pub fn fulfill(
        &self,
        ledger: &Ledger,
        identity: &Identity,
        log: &EventLog,
        now: Timestamp,
        id: &CommitmentId,
        transaction_id: TransactionId,
        fulfillment_signature: SignatureBytes,
        rating: Option<u8>,
    ) -> Result<Commitment, CommitmentError> {
        let mut commitment = self.get(id)?;
        if commitment.status != CommitmentStatus::Active {
            if commitment.status == CommitmentStatus::Fulfilled {
                return Err(CommitmentError::AlreadyFulfilled { id: id.clone() });
            }
            return Err(CommitmentError::InvalidStatusTransition { id: id.clone() });
        }

        self.require_active(ledger, &commitment.promisor)?;
        self.require_active(ledger, &commitment.promisee)?;

        let promisee_identity = identity
            .get_identity(&commitment.promisee)
            .map_err(|_| CommitmentError::MemberNotActive { member: commitment.promisee.clone() })?;
        let message = canonical_commitment_bytes(
            &commitment.id, &commitment.promisor, &commitment.promisee, commitment.value,
            commitment.due_date, commitment.category.as_deref(), commitment.created_at,
        );
        if !self.verifier.verify(&promisee_identity.public_key, &message, &fulfillment_signature) {
            return Err(CommitmentError::InvalidSignature { party: commitment.promisee.clone() });
        }

        if commitment.kind == CommitmentType::Escrowed {
            ledger.apply_reserve_update(log, now, ReserveUpdate { member: commitment.promisor.clone(), delta: -(commitment.value as i64) })?;
        }

        let transfer = ledger.apply_balance_updates(
            log,
            now,
            vec![
                BalanceDelta { member: commitment.promisee.clone(), delta: -(commitment.value as i64), reason: DeltaReason::CommitmentFulfillmentPayer, related_event_id: None },
                BalanceDelta { member: commitment.promisor.clone(), delta: commitment.value as i64, reason: DeltaReason::CommitmentFulfillmentPayee, related_event_id: None },
            ],
        );

        if let Err(err) = transfer {
            if commitment.kind == CommitmentType::Escrowed {
                ledger
                    .apply_reserve_update(log, now, ReserveUpdate { member: commitment.promisor.clone(), delta: commitment.value as i64 })
                    .expect("reversing the reserve release must succeed since it only restores prior state");
            }
            return Err(err.into());
        }

        commitment.status = CommitmentStatus::Fulfilled;
        commitment.fulfillment_signature = Some(fulfillment_signature);
        commitment.fulfillment_rating = rating;
        commitment.related_transaction_id = Some(transaction_id.clone());
        self.save(&commitment);
        log.append(now, EventPayload::CommitmentFulfilled { commitment_id: id.clone(), transaction_id }).expect("event log append must succeed");
        Ok(commitment)
    }

    /// Cancellation: releases any reserve (restoring usable-capacity
    /// conservation even if the promisor has since been frozen) and
    /// executes no transaction.
    pub fn cancel(
        &self,
        ledger: &Ledger,
        log: &EventLog,
        now: Timestamp,
        id: &CommitmentId,
        actor: &MemberId,
        cancellation_signature: SignatureBytes,
    ) -> Result<Commitment, CommitmentError> {
        let mut commitment = self.get(id)?;
        if commitment.status != CommitmentStatus::Proposed && commitment.status != CommitmentStatus::Active {
            return Err(CommitmentError::InvalidStatusTransition { id: id.clone() });
        }
        if *actor != commitment.promisor && *actor != commitment.promisee {
            return Err(CommitmentError::CancellationNotAuthorized { member: actor.clone() });
        }

        if commitment.status == CommitmentStatus::Active && commitment.kind == CommitmentType::Escrowed {
            ledger.apply_reserve_update(log, now, ReserveUpdate { member: commitment.promisor.clone(), delta: -(commitment.value as i64) })?;
        }

        commitment.status = CommitmentStatus::Cancelled;
        commitment.cancellation_signature = Some(cancellation_signature);
        self.save(&commitment);
        log.append(now, EventPayload::CommitmentCancelled { commitment_id: id.clone() }).expect("event log append must succeed");
        Ok(commitment)
    }

    pub fn open_dispute(&self, log: &EventLog, now: Timestamp, id: &CommitmentId, dispute_id: crate::types::DisputeId) -> Result<Commitment, CommitmentError> {
        let mut commitment = self.get(id)?;
        if commitment.status != CommitmentStatus::Active {
            return Err(CommitmentError::InvalidStatusTransition { id: id.clone() });
        }
        commitment.status = CommitmentStatus::Disputed;
        self.save(&commitment);
        log.append(now, EventPayload::CommitmentDisputed { commitment_id: id.clone(), dispute_id }).expect("event log append must succeed");
        Ok(commitment)
    }

    /// OVERDUE is computed, never stored.
    pub fn is_overdue(commitment: &Commitment, now: Timestamp) -> bool {
        commitment.status == CommitmentStatus::Active && now > commitment.due_date
    }

    pub fn by_status(&self, status: CommitmentStatus) -> Vec<Commitment> {
        self.store
            .scan::<Commitment>(|k| matches!(k, crate::types::DocKey::Commitment(_)))
            .into_iter()
            .map(|(_, c)| c)
            .filter(|c| c.status == status)
            .collect()
    }

    pub fn by_category(&self, category: &str) -> Vec<Commitment> {
        self.store
            .scan::<Commitment>(|k| matches!(k, crate::types::DocKey::Commitment(_)))
            .into_iter()
            .map(|(_, c)| c)
            .filter(|c| c.category.as_deref() == Some(category))
            .collect()
    }

    pub fn by_date_range(&self, start: Timestamp, end: Timestamp) -> Vec<Commitment> {
        self.store
            .scan::<Commitment>(|k| matches!(k, crate::types::DocKey::Commitment(_)))
            .into_iter()
            .map(|(_, c)| c)
            .filter(|c| c.due_date >= start && c.due_date <= end)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MockVerifier;
    use crate::emergency::{Emergency, TransitionThresholds};
    use crate::errors::TransactionError;
    use crate::events::EventLog;
    use crate::identity::Identity;
    use crate::ledger::Ledger;
    use crate::storage::MemoryStore;
    use crate::types::{CommitmentMode, LedgerParameters, MemberStatus};

    fn params() -> LedgerParameters {
        LedgerParameters { limit_min: 10, limit_max: 1000, limit_default: 100, commitment_mode: CommitmentMode::Escrowed, floor_threshold: 0 }
    }

    fn thresholds() -> TransitionThresholds {
        TransitionThresholds {
            floor_mass_stressed: 0.3,
            floor_mass_panic: 0.6,
            balance_variance_stressed: 1_000_000.0,
            balance_variance_panic: 5_000_000.0,
            hold_down_period: 3600,
        }
    }

    fn setup<'a>(store: &'a MemoryStore) -> (Ledger<'a>, Identity<'a>, EventLog<'a>, Emergency<'a>) {
        let ledger = Ledger::create(store, "cell-1".into(), params());
        let identity = Identity::new(store, "cell-1".into());
        let log = EventLog::new(store, "cell-1".into());
        let emergency = Emergency::create(store, "cell-1".into(), thresholds());
        identity.add_member(&ledger, &log, 0, "a".into(), "A".into(), [1u8; 32], 100).unwrap();
        identity.add_member(&ledger, &log, 0, "b".into(), "B".into(), [2u8; 32], 100).unwrap();
        identity.add_member(&ledger, &log, 0, "c".into(), "C".into(), [3u8; 32], 100).unwrap();
        for member in ["a", "b", "c"] {
            identity.accept_member(&ledger, &log, 0, &member.to_string(), MemberStatus::Active).unwrap();
        }
        (ledger, identity, log, emergency)
    }

    #[test]
    fn scenario_three_escrow_reserve_caps_spending() {
        let store = MemoryStore::new();
        let (ledger, identity, log, emergency) = setup(&store);
        let verifier = MockVerifier::accepting();
        let commitments = Commitments::new(&store, &verifier, "cell-1".into());
        let txs = crate::transactions::Transactions::new(&store, &verifier, "cell-1".into());

        commitments.create(
            &ledger, &identity, &emergency, &log, 100,
            "c-1".into(), CommitmentType::Escrowed, "a".into(), "b".into(), 60, 200, None, [0u8; 64],
        ).unwrap();
        commitments.activate(&ledger, &identity, &log, 101, &"c-1".to_string(), [0u8; 64]).unwrap();

        assert_eq!(ledger.get_member_state(&"a".to_string()).unwrap().reserve, 60);

        let err = txs.create_spot_transaction(
            &ledger, &identity, &log, 102,
            "tx-1".into(), "a".into(), "c".into(), 50, "spend".into(), None, [0u8; 64], [0u8; 64],
        ).unwrap_err();
        assert_eq!(err, TransactionError::InsufficientCapacity { available: 40, required: 50 });

        txs.create_spot_transaction(
            &ledger, &identity, &log, 103,
            "tx-2".into(), "a".into(), "c".into(), 40, "spend".into(), None, [0u8; 64], [0u8; 64],
        ).unwrap();

        let a = ledger.get_member_state(&"a".to_string()).unwrap();
        assert_eq!(a.balance, -40);
        assert_eq!(a.reserve, 60);
        assert_eq!(a.balance - a.reserve as i64, -100); // I4 at equality
    }

    #[test]
    fn scenario_four_fulfillment_releases_reserve_and_transfers() {
        let store = MemoryStore::new();
        let (ledger, identity, log, emergency) = setup(&store);
        let verifier = MockVerifier::accepting();
        let commitments = Commitments::new(&store, &verifier, "cell-1".into());
        let txs = crate::transactions::Transactions::new(&store, &verifier, "cell-1".into());

        commitments.create(
            &ledger, &identity, &emergency, &log, 100,
            "c-1".into(), CommitmentType::Escrowed, "a".into(), "b".into(), 60, 200, None, [0u8; 64],
        ).unwrap();
        commitments.activate(&ledger, &identity, &log, 101, &"c-1".to_string(), [0u8; 64]).unwrap();
        txs.create_spot_transaction(
            &ledger, &identity, &log, 103,
            "tx-2".into(), "a".into(), "c".into(), 40, "spend".into(), None, [0u8; 64], [0u8; 64],
        ).unwrap();

        commitments.fulfill(&ledger, &identity, &log, 150, &"c-1".to_string(), "tx-fulfill".into(), [0u8; 64], None).unwrap();

        let a = ledger.get_member_state(&"a".to_string()).unwrap();
        let b = ledger.get_member_state(&"b".to_string()).unwrap();
        assert_eq!(a.reserve, 0);
        assert_eq!(a.balance, 20); // -40 + 60
        assert_eq!(b.balance, -60);
        assert_eq!(ledger.total_balance(), 0);
    }

    #[test]
    fn fulfillment_at_exactly_due_date_boundary_is_not_overdue() {
        let store = MemoryStore::new();
        let (ledger, identity, log, emergency) = setup(&store);
        let verifier = MockVerifier::accepting();
        let commitments = Commitments::new(&store, &verifier, "cell-1".into());

        let c = commitments.create(
            &ledger, &identity, &emergency, &log, 100,
            "c-1".into(), CommitmentType::Soft, "a".into(), "b".into(), 10, 200, None, [0u8; 64],
        ).unwrap();
        commitments.activate(&ledger, &identity, &log, 101, &"c-1".to_string(), [0u8; 64]).unwrap();
        let active = commitments.get(&"c-1".to_string()).unwrap();
        assert!(!Commitments::is_overdue(&active, 200));
        assert!(Commitments::is_overdue(&active, 201));
        let _ = c;
    }
}
