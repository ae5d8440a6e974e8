//! Cell Protocol - Ledger
//!
//! Owns the authoritative member-state map. All mutations arrive as
//! balance-update batches or reserve updates and are applied atomically with
//! invariant verification. The Ledger is the single
//! arbiter of invariants I1-I5; it refuses any caller, including Governance,
//! that would breach them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;
use crate::events::{EventLog, EventPayload};
use crate::storage::{KvStore, KvStoreExt};
use crate::types::{
    BalanceDelta, CellId, CommitmentMode, LedgerParameters, Member, MemberId, MemberStatus,
    Timestamp,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct LedgerDocument {
    members: BTreeMap<MemberId, Member>,
    parameters: LedgerParameters,
    version: u64,
}

/// A pending reserve change, applied the same way a balance batch is.
#[derive(Clone, Debug)]
pub struct ReserveUpdate {
    pub member: MemberId,
    pub delta: i64,
}

pub struct Ledger<'a> {
    store: &'a dyn KvStore,
    cell_id: CellId,
}

impl<'a> Ledger<'a> {
    /// Creates the ledger document for a brand-new cell. Idempotent only in
    /// the sense that calling it twice for the same cell id is a storage
    /// conflict, not a silent overwrite.
    pub fn create(store: &'a dyn KvStore, cell_id: CellId, parameters: LedgerParameters) -> Self {
        let doc = LedgerDocument { members: BTreeMap::new(), parameters, version: 0 };
        store
            .put(crate::types::DocKey::Ledger(cell_id.clone()), &doc, None)
            .expect("fresh cell id must not already have a ledger document");
        Ledger { store, cell_id }
    }

    pub fn open(store: &'a dyn KvStore, cell_id: CellId) -> Self {
        Ledger { store, cell_id }
    }

    fn key(&self) -> crate::types::DocKey {
        crate::types::DocKey::Ledger(self.cell_id.clone())
    }

    fn load(&self) -> LedgerDocument {
        self.store.get(&self.key()).expect("ledger document must exist once created")
    }

    fn save(&self, doc: &LedgerDocument) {
        self.store
            .put(self.key(), doc, None)
            .expect("ledger document write must succeed");
    }

    pub fn version(&self) -> u64 {
        self.load().version
    }

    pub fn parameters(&self) -> LedgerParameters {
        self.load().parameters
    }

    pub fn get_member_state(&self, member: &MemberId) -> Result<Member, LedgerError> {
        self.load()
            .members
            .get(member)
            .cloned()
            .ok_or_else(|| LedgerError::MemberNotFound { member: member.clone() })
    }

    pub fn get_balance(&self, member: &MemberId) -> Result<i64, LedgerError> {
        Ok(self.get_member_state(member)?.balance)
    }

    /// Accounts for reserve when the
    /// ledger is in escrowed commitment mode.
    pub fn can_spend(&self, member: &MemberId, amount: u64) -> Result<bool, LedgerError> {
        let doc = self.load();
        let state = doc
            .members
            .get(member)
            .ok_or_else(|| LedgerError::MemberNotFound { member: member.clone() })?;
        let usable = match doc.parameters.commitment_mode {
            CommitmentMode::Escrowed => state.balance - state.reserve as i64,
            _ => state.balance,
        };
        Ok(usable - amount as i64 >= state.floor())
    }

    /// Available capacity for error reporting (`INSUFFICIENT_CAPACITY.available`).
    pub fn available_capacity(&self, member: &MemberId) -> Result<i64, LedgerError> {
        let doc = self.load();
        let state = doc
            .members
            .get(member)
            .ok_or_else(|| LedgerError::MemberNotFound { member: member.clone() })?;
        let usable = match doc.parameters.commitment_mode {
            CommitmentMode::Escrowed => state.balance - state.reserve as i64,
            _ => state.balance,
        };
        Ok(usable - state.floor())
    }

    /// Applies a batch of balance deltas atomically: stages against a
    /// cloned working copy, verifies I1/I2/I4 and the frozen-member rule,
    /// and only then commits and appends one event.
    pub fn apply_balance_updates(
        &self,
        log: &EventLog,
        now: Timestamp,
        batch: Vec<BalanceDelta>,
    ) -> Result<u64, LedgerError> {
        let mut doc = self.load();

        let sum: i64 = batch.iter().map(|d| d.delta).sum();
        if sum != 0 {
            return Err(LedgerError::ConservationViolation { sum });
        }

        let mut working = doc.members.clone();
        for delta in &batch {
            let state = working
                .get_mut(&delta.member)
                .ok_or_else(|| LedgerError::MemberNotFound { member: delta.member.clone() })?;

            if delta.delta < 0 && state.status == MemberStatus::Frozen {
                return Err(LedgerError::MemberFrozen { member: delta.member.clone() });
            }

            state.balance += delta.delta;
            state.last_activity_at = now;

            if state.balance < state.floor() {
                return Err(LedgerError::FloorViolation {
                    member: delta.member.clone(),
                    balance: state.balance,
                    limit: state.limit,
                });
            }
            if doc.parameters.commitment_mode == CommitmentMode::Escrowed
                && state.balance - state.reserve as i64 < state.floor()
            {
                return Err(LedgerError::EscrowViolation {
                    member: delta.member.clone(),
                    balance: state.balance,
                    reserve: state.reserve,
                    limit: state.limit,
                });
            }
        }

        doc.members = working;
        doc.version += 1;
        self.save(&doc);

        let event = log
            .append(now, EventPayload::BalanceUpdate { deltas: batch })
            .expect("event log append must succeed immediately after a committed batch");
        Ok(event.sequence_number)
    }

    /// Changes one member's reserve by `delta`, atomically checked against
    /// I3 and, in escrowed mode, I4.
    pub fn apply_reserve_update(
        &self,
        log: &EventLog,
        now: Timestamp,
        update: ReserveUpdate,
    ) -> Result<u64, LedgerError> {
        let mut doc = self.load();
        let state = doc
            .members
            .get_mut(&update.member)
            .ok_or_else(|| LedgerError::MemberNotFound { member: update.member.clone() })?;

        let new_reserve = state.reserve as i64 + update.delta;
        if new_reserve < 0 {
            return Err(LedgerError::NegativeReserve { member: update.member.clone() });
        }
        let new_reserve = new_reserve as u32;

        if doc.parameters.commitment_mode == CommitmentMode::Escrowed
            && state.balance - new_reserve as i64 < state.floor()
        {
            return Err(LedgerError::EscrowViolation {
                member: update.member.clone(),
                balance: state.balance,
                reserve: new_reserve,
                limit: state.limit,
            });
        }

        state.reserve = new_reserve;
        doc.version += 1;
        self.save(&doc);

        let event = log
            .append(now, EventPayload::ReserveUpdate { member: update.member.clone(), delta: update.delta })
            .expect("event log append must succeed immediately after a committed reserve update");
        Ok(event.sequence_number)
    }

    pub fn set_member_limit(
        &self,
        log: &EventLog,
        now: Timestamp,
        member: &MemberId,
        new_limit: u32,
    ) -> Result<(), LedgerError> {
        let mut doc = self.load();
        if new_limit < doc.parameters.limit_min || new_limit > doc.parameters.limit_max {
            return Err(LedgerError::LimitOutOfBounds {
                limit: new_limit,
                min: doc.parameters.limit_min,
                max: doc.parameters.limit_max,
            });
        }
        let state = doc
            .members
            .get_mut(member)
            .ok_or_else(|| LedgerError::MemberNotFound { member: member.clone() })?;
        if state.balance < -(new_limit as i64) {
            return Err(LedgerError::LimitBelowDebt { new_limit, balance: state.balance });
        }
        let old_limit = state.limit;
        state.limit = new_limit;
        doc.version += 1;
        self.save(&doc);
        log.append(now, EventPayload::LimitChanged { member: member.clone(), old_limit, new_limit })
            .expect("event log append must succeed immediately after a committed limit change");
        Ok(())
    }

    /// Replaces the ledger-wide parameter tuple wholesale (governance policy
    /// changes and emergency-driven commitment-mode switches). Existing
    /// members are re-checked against the new bounds only lazily, on their
    /// next mutation; a policy change never itself touches balances.
    pub fn set_parameters(&self, log: &EventLog, now: Timestamp, new_parameters: LedgerParameters) -> Result<(), LedgerError> {
        let mut doc = self.load();
        doc.parameters = new_parameters;
        doc.version += 1;
        self.save(&doc);
        log.append(now, EventPayload::PolicyChanged)
            .expect("event log append must succeed immediately after a committed policy change");
        Ok(())
    }

    /// Callable only by Identity or Governance; never changes balances.
    pub fn add_member(
        &self,
        log: &EventLog,
        now: Timestamp,
        member: MemberId,
        initial_limit: u32,
    ) -> Result<(), LedgerError> {
        let mut doc = self.load();
        if doc.members.contains_key(&member) {
            return Err(LedgerError::MemberAlreadyExists { member });
        }
        doc.members.insert(member.clone(), Member::new(initial_limit, now));
        doc.version += 1;
        self.save(&doc);
        log.append(now, EventPayload::MemberAdded { member, initial_limit })
            .expect("event log append must succeed immediately after adding a member");
        Ok(())
    }

    /// Soft-delete: flips status to EXCLUDED, never removes the map entry,
    /// so historical balance accounting and the I6 bijection audit trail
    /// stay intact.
    pub fn remove_member(&self, log: &EventLog, now: Timestamp, member: &MemberId) -> Result<(), LedgerError> {
        let mut doc = self.load();
        let state = doc
            .members
            .get_mut(member)
            .ok_or_else(|| LedgerError::MemberNotFound { member: member.clone() })?;
        if state.balance != 0 {
            return Err(LedgerError::NonZeroBalanceOnRemoval { member: member.clone(), balance: state.balance });
        }
        state.status = MemberStatus::Excluded;
        doc.version += 1;
        self.save(&doc);
        log.append(now, EventPayload::MemberRemoved { member: member.clone() })
            .expect("event log append must succeed immediately after removing a member");
        Ok(())
    }

    /// Admits a member out of PENDING_PROFILE/REVIEW into ACTIVE or
    /// PROBATION, the Ledger-side half of the admission step spec.md §3/§4.2
    /// describes; `Identity::accept_member` is the only caller.
    pub fn accept_member(
        &self,
        log: &EventLog,
        now: Timestamp,
        member: &MemberId,
        status: MemberStatus,
    ) -> Result<(), LedgerError> {
        let mut doc = self.load();
        let state = doc
            .members
            .get_mut(member)
            .ok_or_else(|| LedgerError::MemberNotFound { member: member.clone() })?;
        let allowed_target = matches!(status, MemberStatus::Active | MemberStatus::Probation);
        let allowed_source = matches!(state.status, MemberStatus::PendingProfile | MemberStatus::Review);
        if !allowed_target || !allowed_source {
            return Err(LedgerError::InvalidAdmissionTransition { member: member.clone() });
        }
        state.status = status;
        doc.version += 1;
        self.save(&doc);
        log.append(now, EventPayload::MemberAccepted { member: member.clone(), status })
            .expect("event log append must succeed immediately after an admission change");
        Ok(())
    }

    pub fn freeze_member(&self, log: &EventLog, now: Timestamp, member: &MemberId) -> Result<(), LedgerError> {
        self.set_status(log, now, member, MemberStatus::Frozen, EventPayload::MemberFrozen { member: member.clone() })
    }

    pub fn unfreeze_member(&self, log: &EventLog, now: Timestamp, member: &MemberId) -> Result<(), LedgerError> {
        self.set_status(log, now, member, MemberStatus::Active, EventPayload::MemberUnfrozen { member: member.clone() })
    }

    fn set_status(
        &self,
        log: &EventLog,
        now: Timestamp,
        member: &MemberId,
        status: MemberStatus,
        event: EventPayload,
    ) -> Result<(), LedgerError> {
        let mut doc = self.load();
        let state = doc
            .members
            .get_mut(member)
            .ok_or_else(|| LedgerError::MemberNotFound { member: member.clone() })?;
        state.status = status;
        doc.version += 1;
        self.save(&doc);
        log.append(now, event).expect("event log append must succeed immediately after a status change");
        Ok(())
    }

    pub fn member_count(&self) -> usize {
        self.load().members.len()
    }

    /// `balanceVariance = sum(balance^2)/N`. Iterates the BTreeMap in key
    /// order so the statistic is deterministic across replay (Design Notes
    /// section 9).
    pub fn balance_variance(&self) -> f64 {
        let doc = self.load();
        if doc.members.is_empty() {
            return 0.0;
        }
        let sum_sq: i128 = doc.members.values().map(|m| (m.balance as i128).pow(2)).sum();
        sum_sq as f64 / doc.members.len() as f64
    }

    /// `floorMass(rho) = fraction with balance <= -rho*limit`.
    pub fn floor_mass(&self, rho: f64) -> f64 {
        let doc = self.load();
        if doc.members.is_empty() {
            return 0.0;
        }
        let count = doc
            .members
            .values()
            .filter(|m| (m.balance as f64) <= -rho * m.limit as f64)
            .count();
        count as f64 / doc.members.len() as f64
    }

    /// Sum of all member balances. Must be zero after every committed batch
    /// (invariant I1 / property P1).
    pub fn total_balance(&self) -> i64 {
        self.load().members.values().map(|m| m.balance).sum()
    }

    pub fn all_members(&self) -> BTreeMap<MemberId, Member> {
        self.load().members
    }
}

/// Reconstructs member state by replaying an ordered event log from an
/// empty ledger (property P4). Trusts the stream as already-committed: it
/// re-applies authoritative deltas verbatim and never re-runs I1-I5 checks,
/// since a replayed event was checked once, at commit time.
pub fn replay(events: &[crate::events::Event]) -> BTreeMap<MemberId, Member> {
    let mut members: BTreeMap<MemberId, Member> = BTreeMap::new();
    for event in events {
        match &event.payload {
            crate::events::EventPayload::MemberAdded { member, initial_limit } => {
                members.insert(member.clone(), Member::new(*initial_limit, event.timestamp));
            }
            crate::events::EventPayload::BalanceUpdate { deltas } => {
                for delta in deltas {
                    if let Some(state) = members.get_mut(&delta.member) {
                        state.balance += delta.delta;
                        state.last_activity_at = event.timestamp;
                    }
                }
            }
            crate::events::EventPayload::MemberAccepted { member, status } => {
                if let Some(state) = members.get_mut(member) {
                    state.status = *status;
                }
            }
            crate::events::EventPayload::ReserveUpdate { member, delta } => {
                if let Some(state) = members.get_mut(member) {
                    state.reserve = (state.reserve as i64 + delta) as u32;
                }
            }
            crate::events::EventPayload::LimitChanged { member, new_limit, .. } => {
                if let Some(state) = members.get_mut(member) {
                    state.limit = *new_limit;
                }
            }
            crate::events::EventPayload::MemberFrozen { member } => {
                if let Some(state) = members.get_mut(member) {
                    state.status = MemberStatus::Frozen;
                }
            }
            crate::events::EventPayload::MemberUnfrozen { member } => {
                if let Some(state) = members.get_mut(member) {
                    state.status = MemberStatus::Active;
                }
            }
            crate::events::EventPayload::MemberRemoved { member } => {
                if let Some(state) = members.get_mut(member) {
                    state.status = MemberStatus::Excluded;
                }
            }
            _ => {}
        }
    }
    members
}

#[cfg(test)]
mod replay_tests {
    use super::*;
    use crate::events::EventLog;
    use crate::storage::MemoryStore;
    use crate::types::{BalanceDelta, CommitmentMode, DeltaReason};

    fn params() -> LedgerParameters {
        LedgerParameters { limit_min: 10, limit_max: 1000, limit_default: 100, commitment_mode: CommitmentMode::Disabled, floor_threshold: 0 }
    }

    #[test]
    fn replay_reproduces_committed_state_bit_for_bit() {
        let store = MemoryStore::new();
        let ledger = Ledger::create(&store, "cell-1".into(), params());
        let log = EventLog::new(&store, "cell-1".into());

        ledger.add_member(&log, 10, "a".into(), 100).unwrap();
        ledger.add_member(&log, 10, "b".into(), 100).unwrap();
        ledger
            .apply_balance_updates(
                &log,
                20,
                vec![
                    BalanceDelta { member: "a".into(), delta: -30, reason: DeltaReason::SpotPayer, related_event_id: None },
                    BalanceDelta { member: "b".into(), delta: 30, reason: DeltaReason::SpotPayee, related_event_id: None },
                ],
            )
            .unwrap();
        ledger.set_member_limit(&log, 30, &"a".to_string(), 150).unwrap();

        let replayed = replay(&log.all_events());
        let committed = ledger.all_members();

        assert_eq!(replayed.len(), committed.len());
        for (id, state) in &committed {
            let r = replayed.get(id).unwrap();
            assert_eq!(r.balance, state.balance);
            assert_eq!(r.limit, state.limit);
            assert_eq!(r.reserve, state.reserve);
        }
        let replayed_sum: i64 = replayed.values().map(|m| m.balance).sum();
        assert_eq!(replayed_sum, 0);
    }
}
