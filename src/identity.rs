//! Cell Protocol - Identity
//!
//! Maintains the bijection between public keys and member ids (invariant
//! I6) and the membership-change audit trail.
//! Identity never mutates balances directly; every lifecycle operation
//! calls through to the Ledger's batched-update interface.

use crate::commitments::Commitments;
use crate::errors::{IdentityError, LedgerError};
use crate::events::EventLog;
use crate::ledger::Ledger;
use crate::storage::{KvStore, KvStoreExt};
use crate::types::{
    CellId, CommitmentStatus, IdentityRecord, MemberId, MemberStatus, MembershipChange,
    MembershipChangeRecord, PublicKeyBytes, Timestamp,
};

pub struct Identity<'a> {
    store: &'a dyn KvStore,
    cell_id: CellId,
}

impl<'a> Identity<'a> {
    pub fn new(store: &'a dyn KvStore, cell_id: CellId) -> Self {
        Identity { store, cell_id }
    }

    fn id_key(&self, member: &MemberId) -> crate::types::DocKey {
        crate::types::DocKey::Identity(member.clone())
    }

    fn pk_key(&self, public_key: &PublicKeyBytes) -> crate::types::DocKey {
        crate::types::DocKey::IdentityByPublicKey(*public_key)
    }

    pub fn get_identity(&self, member: &MemberId) -> Result<IdentityRecord, IdentityError> {
        self.store
            .get(&self.id_key(member))
            .ok_or_else(|| IdentityError::IdentityNotFound { member: member.clone() })
    }

    pub fn get_identity_by_public_key(&self, public_key: &PublicKeyBytes) -> Result<IdentityRecord, IdentityError> {
        let member: MemberId = self.store.get(&self.pk_key(public_key)).ok_or(IdentityError::UnknownPublicKey)?;
        self.get_identity(&member)
    }

    pub fn search_by_display_name(&self, needle: &str) -> Vec<IdentityRecord> {
        self.store
            .scan::<IdentityRecord>(|k| matches!(k, crate::types::DocKey::Identity(_)))
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| record.display_name.contains(needle))
            .collect()
    }

    /// Admission: creates an identity in PENDING_PROFILE, inserts a member
    /// into the Ledger at the default limit, and records the change.
    pub fn add_member(
        &self,
        ledger: &Ledger,
        log: &EventLog,
        now: Timestamp,
        member: MemberId,
        display_name: String,
        public_key: PublicKeyBytes,
        limit_default: u32,
    ) -> Result<(), IdentityError> {
        if self.store.get::<MemberId>(&self.pk_key(&public_key)).is_some() {
            return Err(IdentityError::IdentityAlreadyExists);
        }

        ledger.add_member(log, now, member.clone(), limit_default)?;

        let record = IdentityRecord {
            member: member.clone(),
            cell: self.cell_id.clone(),
            display_name,
            public_key,
            created_at: now,
            removed_at: None,
            changes: vec![MembershipChangeRecord { member: member.clone(), change: MembershipChange::Admitted, at: now }],
        };
        self.store.put(self.id_key(&member), &record, None).expect("identity write must succeed");
        self.store.put(self.pk_key(&public_key), &member, None).expect("public key index write must succeed");
        Ok(())
    }

    fn record_change(&self, member: &MemberId, change: MembershipChange, now: Timestamp) -> Result<(), IdentityError> {
        let mut record = self.get_identity(member)?;
        record.changes.push(MembershipChangeRecord { member: member.clone(), change, at: now });
        self.store.put(self.id_key(member), &record, None).expect("identity write must succeed");
        Ok(())
    }

    /// Admission step (spec §3/§4.2): moves a member from PENDING_PROFILE or
    /// REVIEW into ACTIVE or PROBATION in the Ledger, then records the audit
    /// change here.
    pub fn accept_member(
        &self,
        ledger: &Ledger,
        log: &EventLog,
        now: Timestamp,
        member: &MemberId,
        status: MemberStatus,
    ) -> Result<(), IdentityError> {
        ledger.accept_member(log, now, member, status)?;
        self.record_change(member, MembershipChange::Accepted, now)
    }

    pub fn freeze(&self, ledger: &Ledger, log: &EventLog, now: Timestamp, member: &MemberId) -> Result<(), IdentityError> {
        ledger.freeze_member(log, now, member)?;
        self.record_change(member, MembershipChange::Frozen, now)
    }

    pub fn unfreeze(&self, ledger: &Ledger, log: &EventLog, now: Timestamp, member: &MemberId) -> Result<(), IdentityError> {
        ledger.unfreeze_member(log, now, member)?;
        self.record_change(member, MembershipChange::Unfrozen, now)
    }

    /// Requires `balance = 0` and no ACTIVE commitments; soft-deletes in the
    /// Ledger and records the change here.
    pub fn remove_member(
        &self,
        ledger: &Ledger,
        commitments: &Commitments,
        log: &EventLog,
        now: Timestamp,
        member: &MemberId,
    ) -> Result<(), IdentityError> {
        let has_active_commitment = commitments
            .by_status(CommitmentStatus::Active)
            .iter()
            .any(|c| &c.promisor == member || &c.promisee == member);
        if has_active_commitment {
            return Err(LedgerError::ActiveCommitmentOnRemoval { member: member.clone() }.into());
        }
        ledger.remove_member(log, now, member)?;
        let mut record = self.get_identity(member)?;
        record.removed_at = Some(now);
        record.changes.push(MembershipChangeRecord { member: member.clone(), change: MembershipChange::Removed, at: now });
        self.store.put(self.id_key(member), &record, None).expect("identity write must succeed");
        Ok(())
    }
}
