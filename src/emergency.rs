//! Cell Protocol - Emergency Mode
//!
//! A risk-state machine driving admission and commitment policy. The state
//! itself never touches balances; its only binding effect on the rest of the
//! engine is the commitment mode it publishes through `Policy`.

use serde::{Deserialize, Serialize};

use crate::errors::EmergencyError;
use crate::events::{EventLog, EventPayload};
use crate::ledger::Ledger;
use crate::storage::{KvStore, KvStoreExt};
use crate::types::{CellId, CommitmentMode, LedgerParameters, ProposalId, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskState {
    Normal,
    Stressed,
    Panic,
    Recovery,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionMode {
    Open,
    ReviewRequired,
    Closed,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub enum SchedulerPriority {
    Normal,
    Elevated,
    Critical,
}

/// The policy effects bound to a risk state. Only `commitment_mode` is
/// binding on the rest of the core; `admission_mode` and
/// `scheduler_priority` are published for the host application to honor.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Policy {
    pub admission_mode: AdmissionMode,
    pub commitment_mode: CommitmentMode,
    pub scheduler_priority: SchedulerPriority,
}

impl Policy {
    /// Folds this policy's binding commitment-mode effect into a parameter
    /// set; the only ledger-visible effect of the risk-state machine.
    pub fn apply_to(&self, mut parameters: LedgerParameters) -> LedgerParameters {
        parameters.commitment_mode = self.commitment_mode;
        parameters
    }
}

impl RiskState {
    fn default_policy(self) -> Policy {
        match self {
            RiskState::Normal => Policy {
                admission_mode: AdmissionMode::Open,
                commitment_mode: CommitmentMode::Soft,
                scheduler_priority: SchedulerPriority::Normal,
            },
            RiskState::Stressed => Policy {
                admission_mode: AdmissionMode::ReviewRequired,
                commitment_mode: CommitmentMode::Soft,
                scheduler_priority: SchedulerPriority::Elevated,
            },
            RiskState::Panic => Policy {
                admission_mode: AdmissionMode::Closed,
                commitment_mode: CommitmentMode::Escrowed,
                scheduler_priority: SchedulerPriority::Critical,
            },
            RiskState::Recovery => Policy {
                admission_mode: AdmissionMode::ReviewRequired,
                commitment_mode: CommitmentMode::Escrowed,
                scheduler_priority: SchedulerPriority::Elevated,
            },
        }
    }

    /// Valid automatic edges: `NORMAL <-> STRESSED <-> PANIC -> RECOVERY -> NORMAL`.
    fn can_auto_transition_to(self, target: RiskState) -> bool {
        matches!(
            (self, target),
            (RiskState::Normal, RiskState::Stressed)
                | (RiskState::Stressed, RiskState::Normal)
                | (RiskState::Stressed, RiskState::Panic)
                | (RiskState::Panic, RiskState::Stressed)
                | (RiskState::Panic, RiskState::Recovery)
                | (RiskState::Recovery, RiskState::Normal)
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StressIndicators {
    pub floor_mass: f64,
    pub balance_variance: f64,
    pub recent_default_rate: f64,
    pub energy_stress: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TransitionThresholds {
    pub floor_mass_stressed: f64,
    pub floor_mass_panic: f64,
    pub balance_variance_stressed: f64,
    pub balance_variance_panic: f64,
    pub hold_down_period: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct EmergencyDocument {
    current: RiskState,
    last_transition_at: Timestamp,
    thresholds: TransitionThresholds,
}

pub struct Emergency<'a> {
    store: &'a dyn KvStore,
    cell_id: CellId,
}

impl<'a> Emergency<'a> {
    pub fn create(store: &'a dyn KvStore, cell_id: CellId, thresholds: TransitionThresholds) -> Self {
        let doc = EmergencyDocument { current: RiskState::Normal, last_transition_at: 0, thresholds };
        store
            .put(crate::types::DocKey::Emergency(cell_id.clone()), &doc, None)
            .expect("fresh cell id must not already have an emergency document");
        Emergency { store, cell_id }
    }

    pub fn open(store: &'a dyn KvStore, cell_id: CellId) -> Self {
        Emergency { store, cell_id }
    }

    fn key(&self) -> crate::types::DocKey {
        crate::types::DocKey::Emergency(self.cell_id.clone())
    }

    fn load(&self) -> EmergencyDocument {
        self.store.get(&self.key()).expect("emergency document must exist once created")
    }

    fn save(&self, doc: &EmergencyDocument) {
        self.store.put(self.key(), doc, None).expect("emergency document write must succeed");
    }

    pub fn current_state(&self) -> RiskState {
        self.load().current
    }

    pub fn active_policy(&self) -> Policy {
        self.load().current.default_policy()
    }

    /// Indicators are computed by the caller (ledger statistics plus
    /// externally supplied energy-stress); this engine only judges whether
    /// they cross a threshold for an automatic transition.
    pub fn indicated_state(&self, indicators: &StressIndicators) -> RiskState {
        let doc = self.load();
        let t = doc.thresholds;
        if indicators.floor_mass >= t.floor_mass_panic || indicators.balance_variance >= t.balance_variance_panic {
            RiskState::Panic
        } else if indicators.floor_mass >= t.floor_mass_stressed || indicators.balance_variance >= t.balance_variance_stressed {
            RiskState::Stressed
        } else {
            RiskState::Normal
        }
    }

    /// Attempts an automatic transition: only moves if the indicated state
    /// differs from current, the edge is a valid automatic edge, and the
    /// hold-down period has elapsed since the last transition.
    pub fn try_auto_transition(
        &self,
        log: &EventLog,
        now: Timestamp,
        indicators: &StressIndicators,
    ) -> Result<Option<RiskState>, EmergencyError> {
        let doc = self.load();
        let target = self.indicated_state(indicators);
        if target == doc.current {
            return Ok(None);
        }
        if !doc.current.can_auto_transition_to(target) {
            return Ok(None);
        }
        if now.saturating_sub(doc.last_transition_at) < doc.thresholds.hold_down_period {
            return Err(EmergencyError::HoldDownNotElapsed);
        }
        self.commit_transition(log, now, doc, target, None);
        Ok(Some(target))
    }

    /// Governance override: any target reachable, bypasses the hold-down.
    pub fn override_transition(
        &self,
        log: &EventLog,
        now: Timestamp,
        target: RiskState,
        proposal_id: ProposalId,
    ) -> Result<(), EmergencyError> {
        let doc = self.load();
        self.commit_transition(log, now, doc, target, Some(proposal_id));
        Ok(())
    }

    fn commit_transition(
        &self,
        log: &EventLog,
        now: Timestamp,
        mut doc: EmergencyDocument,
        target: RiskState,
        proposal_id: Option<ProposalId>,
    ) {
        let from = format!("{:?}", doc.current);
        let to = format!("{:?}", target);
        doc.current = target;
        doc.last_transition_at = now;
        self.save(&doc);

        let event = match proposal_id {
            Some(id) => EventPayload::EmergencyOverride { from, to, proposal_id: id },
            None => EventPayload::EmergencyTransition { from, to },
        };
        log.append(now, event).expect("event log append must succeed immediately after a committed emergency transition");
        tracing::warn!(state = ?target, "emergency state transitioned");
    }
}

/// Ledger-derived half of the indicator set; `recent_default_rate` and
/// `energy_stress` are supplied by the host application.
pub fn ledger_indicators(ledger: &Ledger, rho: f64, recent_default_rate: f64, energy_stress: f64) -> StressIndicators {
    StressIndicators {
        floor_mass: ledger.floor_mass(rho),
        balance_variance: ledger.balance_variance(),
        recent_default_rate,
        energy_stress,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn thresholds() -> TransitionThresholds {
        TransitionThresholds {
            floor_mass_stressed: 0.3,
            floor_mass_panic: 0.6,
            balance_variance_stressed: 1000.0,
            balance_variance_panic: 5000.0,
            hold_down_period: 100,
        }
    }

    #[test]
    fn automatic_transition_requires_hold_down_elapsed() {
        let store = MemoryStore::new();
        let log = EventLog::new(&store, "cell-1".to_string());
        let emergency = Emergency::create(&store, "cell-1".into(), thresholds());

        let indicators = StressIndicators { floor_mass: 0.5, balance_variance: 0.0, recent_default_rate: 0.0, energy_stress: 0.0 };
        let err = emergency.try_auto_transition(&log, 50, &indicators).unwrap_err();
        assert_eq!(err, EmergencyError::HoldDownNotElapsed);

        let transitioned = emergency.try_auto_transition(&log, 150, &indicators).unwrap();
        assert_eq!(transitioned, Some(RiskState::Stressed));
        assert_eq!(emergency.current_state(), RiskState::Stressed);
    }

    #[test]
    fn panic_policy_forces_escrowed_commitments() {
        let store = MemoryStore::new();
        let emergency = Emergency::create(&store, "cell-1".into(), thresholds());
        assert_eq!(emergency.active_policy().commitment_mode, CommitmentMode::Soft);

        let policy = RiskState::Panic.default_policy();
        assert_eq!(policy.commitment_mode, CommitmentMode::Escrowed);
    }

    #[test]
    fn override_transition_bypasses_hold_down() {
        let store = MemoryStore::new();
        let log = EventLog::new(&store, "cell-1".to_string());
        let emergency = Emergency::create(&store, "cell-1".into(), thresholds());

        emergency.override_transition(&log, 1, RiskState::Panic, 7).unwrap();
        assert_eq!(emergency.current_state(), RiskState::Panic);
        let events = log.all_events();
        assert_eq!(events.len(), 1);
    }
}
