//! Cell Protocol - Transactions
//!
//! Validates and executes atomic two-sided spot transfers with signatures
//! and idempotency, plus the offline queue for
//! signed transactions accepted for later execution.

use crate::crypto::{canonical_transaction_bytes, SignatureVerifier};
use crate::errors::TransactionError;
use crate::events::{EventLog, EventPayload};
use crate::identity::Identity;
use crate::ledger::Ledger;
use crate::storage::{KvStore, KvStoreExt};
use crate::types::{
    BalanceDelta, CellId, DeltaReason, MemberId, MemberStatus, QueuedTransaction, SignatureBytes,
    Timestamp, Transaction, TransactionId, TransactionStatus,
};

pub struct Transactions<'a> {
    store: &'a dyn KvStore,
    verifier: &'a dyn SignatureVerifier,
    cell_id: CellId,
}

impl<'a> Transactions<'a> {
    pub fn new(store: &'a dyn KvStore, verifier: &'a dyn SignatureVerifier, cell_id: CellId) -> Self {
        Transactions { store, verifier, cell_id }
    }

    fn tx_key(&self, id: &TransactionId) -> crate::types::DocKey {
        crate::types::DocKey::Transaction(id.clone())
    }

    pub fn get(&self, id: &TransactionId) -> Option<Transaction> {
        self.store.get(&self.tx_key(id))
    }

    fn require_active(&self, identity: &Identity, ledger: &Ledger, member: &MemberId) -> Result<(), TransactionError> {
        identity
            .get_identity(member)
            .map_err(|_| TransactionError::MemberNotFound { member: member.clone() })?;
        let state = ledger
            .get_member_state(member)
            .map_err(|_| TransactionError::MemberNotFound { member: member.clone() })?;
        if state.status != MemberStatus::Active {
            return Err(TransactionError::MemberNotActive { member: member.clone() });
        }
        Ok(())
    }

    /// Validates and executes a spot transaction in one call: duplicate,
    /// self-transfer, amount, activity, capacity and signature checks, then
    /// an atomic two-leg balance update. Returns the completed transaction.
    #[allow(clippy::too_many_arguments)]
    pub fn create_spot_transaction(
        &self,
        ledger: &Ledger,
        identity: &Identity,
        log: &EventLog,
        now: Timestamp,
        id: TransactionId,
        payer: MemberId,
        payee: MemberId,
        amount: u64,
        description: String,
        category: Option<String>,
        payer_signature: SignatureBytes,
        payee_signature: SignatureBytes,
    ) -> Result<Transaction, TransactionError> {
        if self.get(&id).is_some() {
            return Err(TransactionError::DuplicateTransaction { id });
        }
        if payer == payee {
            return Err(TransactionError::SelfTransaction);
        }
        if amount == 0 {
            return Err(TransactionError::InvalidAmount);
        }

        self.require_active(identity, ledger, &payer)?;
        self.require_active(identity, ledger, &payee)?;

        let available = ledger.available_capacity(&payer)?;
        if !ledger.can_spend(&payer, amount)? {
            return Err(TransactionError::InsufficientCapacity {
                available: available.max(0),
                required: amount,
            });
        }

        let payer_identity = identity.get_identity(&payer).map_err(|_| TransactionError::MemberNotFound { member: payer.clone() })?;
        let payee_identity = identity.get_identity(&payee).map_err(|_| TransactionError::MemberNotFound { member: payee.clone() })?;

        let message = canonical_transaction_bytes(&id, &payer, &payee, amount, &description, category.as_deref(), now);
        if !self.verifier.verify(&payer_identity.public_key, &message, &payer_signature) {
            return Err(TransactionError::InvalidSignature { party: payer.clone() });
        }
        if !self.verifier.verify(&payee_identity.public_key, &message, &payee_signature) {
            return Err(TransactionError::InvalidSignature { party: payee.clone() });
        }

        ledger.apply_balance_updates(
            log,
            now,
            vec![
                BalanceDelta { member: payer.clone(), delta: -(amount as i64), reason: DeltaReason::SpotPayer, related_event_id: None },
                BalanceDelta { member: payee.clone(), delta: amount as i64, reason: DeltaReason::SpotPayee, related_event_id: None },
            ],
        )?;

        let transaction = Transaction {
            id: id.clone(),
            payer,
            payee,
            amount,
            description,
            category,
            created_at: now,
            payer_signature,
            payee_signature,
            status: TransactionStatus::Completed,
        };
        self.store.put(self.tx_key(&id), &transaction, None).expect("transaction write must succeed");
        log.append(now, EventPayload::TransactionExecuted { transaction_id: id })
            .expect("event log append must succeed immediately after executing a transaction");

        tracing::info!(transaction = %transaction.id, amount, "spot transaction executed");
        Ok(transaction)
    }

    /// Accepts a signed transaction for later execution. Only idempotency
    /// and signature validity are checked up front; feasibility is
    /// re-validated at `sync`.
    pub fn queue_offline(&self, log: &EventLog, now: Timestamp, transaction: Transaction) -> Result<(), TransactionError> {
        if self.get(&transaction.id).is_some() {
            return Err(TransactionError::DuplicateTransaction { id: transaction.id });
        }
        let id = transaction.id.clone();
        let entry = QueuedTransaction { transaction, queued_at: now };
        self.store
            .put(crate::types::DocKey::Queue(id.clone()), &entry, None)
            .expect("queue write must succeed");
        log.append(now, EventPayload::TransactionQueued { transaction_id: id })
            .expect("event log append must succeed immediately after queueing a transaction");
        Ok(())
    }

    /// Re-validates each queued transaction against live state, in
    /// timestamp order. `INSUFFICIENT_CAPACITY` keeps an entry queued; any
    /// other failure surfaces it as failed. The queue never holds balances.
    pub fn sync(
        &self,
        ledger: &Ledger,
        identity: &Identity,
        log: &EventLog,
        now: Timestamp,
    ) -> SyncReport {
        let mut entries: Vec<(crate::types::DocKey, QueuedTransaction)> =
            self.store.scan(|k| matches!(k, crate::types::DocKey::Queue(_)));
        entries.sort_by_key(|(_, e)| e.queued_at);

        let mut report = SyncReport::default();
        for (key, entry) in entries {
            let tx = entry.transaction;
            let result = self.create_spot_transaction(
                ledger,
                identity,
                log,
                now,
                tx.id.clone(),
                tx.payer.clone(),
                tx.payee.clone(),
                tx.amount,
                tx.description.clone(),
                tx.category.clone(),
                tx.payer_signature,
                tx.payee_signature,
            );
            match result {
                Ok(executed) => {
                    self.store.remove_raw(&key).ok();
                    report.executed.push(executed.id);
                }
                Err(TransactionError::InsufficientCapacity { .. }) => {
                    report.requeued.push(tx.id);
                }
                Err(other) => {
                    self.store.remove_raw(&key).ok();
                    report.failed.push((tx.id, other));
                }
            }
        }
        report
    }
}

#[derive(Default)]
pub struct SyncReport {
    pub executed: Vec<TransactionId>,
    pub requeued: Vec<TransactionId>,
    pub failed: Vec<(TransactionId, TransactionError)>,
}
