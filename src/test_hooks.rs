//! Property-style tests over the quantified invariants of spec.md section 8
//! (P1-P7), plus the boundary behaviors called out alongside them. Unlike
//! `test.rs`'s scenario walkthroughs, these exercise edge cases at the exact
//! boundary where an invariant would first break.

#![cfg(test)]

use crate::clock::FixedClock;
use crate::crypto::MockVerifier;
use crate::emergency::TransitionThresholds;
use crate::errors::GovernanceError;
use crate::ledger;
use crate::storage::MemoryStore;
use crate::types::{CommitmentMode, Council, LedgerParameters, MemberStatus, ProposalKind, ProposalPayload, VoteChoice};
use crate::{Cell, CellConfig};

fn parameters() -> LedgerParameters {
    LedgerParameters { limit_min: 10, limit_max: 1000, limit_default: 100, commitment_mode: CommitmentMode::Disabled, floor_threshold: 0 }
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

fn cell_with_members<'a>(store: &'a MemoryStore, verifier: &'a MockVerifier, clock: &'a FixedClock, n: usize) -> Cell<'a> {
    let council: Vec<String> = (0..n).map(|i| format!("m{i}")).collect();
    let config = CellConfig {
        cell_id: "cell-1".into(),
        parameters: parameters(),
        council: Council { members: council, term_started_at: 0, term_length: 1_000_000 },
        limit_adjustment_rate_limit: 100,
        emergency_thresholds: thresholds(),
    };
    let cell = Cell::create(store, verifier, clock, config);
    for i in 0..n {
        let id = format!("m{i}");
        cell.admit_member(id.clone(), id.clone(), [i as u8 + 1; 32]).unwrap();
        cell.accept_member(&id, MemberStatus::Active).unwrap();
    }
    cell
}

/// P1: sum of balances is zero after an arbitrary sequence of accepted spot
/// transactions, including several that are individually rejected along the
/// way (rejections must leave the sum untouched).
#[test]
fn p1_conservation_holds_across_a_mixed_sequence_of_accepted_and_rejected_operations() {
    let store = MemoryStore::new();
    let verifier = MockVerifier::accepting();
    let clock = FixedClock::at(1000);
    let cell = cell_with_members(&store, &verifier, &clock, 4);

    cell.pay("t1".into(), "m0".into(), "m1".into(), 50, "a".into(), None, [0u8; 64], [0u8; 64]).unwrap();
    cell.pay("t2".into(), "m1".into(), "m2".into(), 80, "b".into(), None, [0u8; 64], [0u8; 64]).unwrap();
    // Rejected: m2 has no capacity for this after forwarding only 80.
    cell.pay("t3".into(), "m2".into(), "m3".into(), 500, "c".into(), None, [0u8; 64], [0u8; 64]).unwrap_err();
    cell.pay("t4".into(), "m3".into(), "m0".into(), 20, "d".into(), None, [0u8; 64], [0u8; 64]).unwrap();
    // Duplicate id: rejected, no-op.
    cell.pay("t1".into(), "m0".into(), "m1".into(), 50, "dup".into(), None, [0u8; 64], [0u8; 64]).unwrap_err();

    assert_eq!(cell.ledger.total_balance(), 0);
}

/// P2 boundary: spending exactly to `-limit` succeeds; one unit more fails.
#[test]
fn p2_spending_exactly_to_the_floor_succeeds_one_more_unit_fails() {
    let store = MemoryStore::new();
    let verifier = MockVerifier::accepting();
    let clock = FixedClock::at(1000);
    let cell = cell_with_members(&store, &verifier, &clock, 2);

    cell.pay("t1".into(), "m0".into(), "m1".into(), 100, "exact".into(), None, [0u8; 64], [0u8; 64]).unwrap();
    assert_eq!(cell.ledger.get_balance(&"m0".to_string()).unwrap(), -100);

    // m1 now holds 100; pushing m0 one further is infeasible regardless of counterparty.
    let err = cell.pay("t2".into(), "m0".into(), "m1".into(), 1, "one more".into(), None, [0u8; 64], [0u8; 64]).unwrap_err();
    assert!(matches!(err, crate::errors::EngineError::Transaction(crate::errors::TransactionError::InsufficientCapacity { .. })));
}

/// P3 + escrow equality: fulfillment at exactly the escrow reserve releases
/// precisely `value`, restoring reserve to zero with no remainder.
#[test]
fn p3_escrow_fulfillment_releases_exactly_the_reserved_value() {
    let store = MemoryStore::new();
    let verifier = MockVerifier::accepting();
    let clock = FixedClock::at(1000);
    let config = CellConfig {
        cell_id: "cell-1".into(),
        parameters: LedgerParameters { limit_min: 10, limit_max: 1000, limit_default: 100, commitment_mode: CommitmentMode::Escrowed, floor_threshold: 0 },
        council: Council { members: vec!["m0".into(), "m1".into()], term_started_at: 0, term_length: 1_000_000 },
        limit_adjustment_rate_limit: 100,
        emergency_thresholds: thresholds(),
    };
    let cell = Cell::create(&store, &verifier, &clock, config);
    for id in ["m0", "m1"] {
        cell.admit_member(id.to_string(), id.to_string(), [1u8; 32]).unwrap();
        cell.accept_member(&id.to_string(), MemberStatus::Active).unwrap();
    }

    cell.commitments
        .create(&cell.ledger, &cell.identity, &cell.emergency, &cell.log, clock.now(), "c-1".into(), crate::types::CommitmentType::Escrowed, "m0".into(), "m1".into(), 75, 2000, None, [0u8; 64])
        .unwrap();
    cell.commitments.activate(&cell.ledger, &cell.identity, &cell.log, clock.now(), &"c-1".to_string(), [0u8; 64]).unwrap();
    assert_eq!(cell.ledger.get_member_state(&"m0".to_string()).unwrap().reserve, 75);

    cell.fulfill_commitment(&"c-1".to_string(), "tx-f".into(), [0u8; 64], None).unwrap();
    let m0 = cell.ledger.get_member_state(&"m0".to_string()).unwrap();
    assert_eq!(m0.reserve, 0);
    assert_eq!(m0.balance, 75);
}

/// P4: replaying the event log of a cell that exercised admission,
/// transactions, commitments and governance together reproduces the ledger
/// state exactly.
#[test]
fn p4_replay_reproduces_state_after_a_mixed_workload() {
    let store = MemoryStore::new();
    let verifier = MockVerifier::accepting();
    let clock = FixedClock::at(1000);
    let cell = cell_with_members(&store, &verifier, &clock, 3);

    cell.pay("t1".into(), "m0".into(), "m1".into(), 40, "x".into(), None, [0u8; 64], [0u8; 64]).unwrap();
    cell.governance
        .create_proposal(&cell.log, clock.now(), 1, ProposalKind::LimitAdjustment, "m0".into(), ProposalPayload::AdjustLimit { member: "m1".into(), new_limit: 150 })
        .unwrap();
    for voter in ["m0", "m1", "m2"] {
        cell.governance.cast_vote(&cell.log, clock.now(), 1, voter.to_string(), VoteChoice::Approve, [0u8; 64]).unwrap();
    }
    cell.governance.close_proposal(&cell.log, clock.now(), 1).unwrap();
    cell.governance
        .execute_proposal(&cell.ledger, &cell.identity, &cell.commitments, &cell.emergency, &cell.log, clock.now(), 1)
        .unwrap();
    cell.pay("t2".into(), "m1".into(), "m2".into(), 60, "y".into(), None, [0u8; 64], [0u8; 64]).unwrap();

    let replayed = ledger::replay(&cell.log.all_events());
    let committed = cell.ledger.all_members();
    assert_eq!(replayed.len(), committed.len());
    for (id, state) in &committed {
        let r = replayed.get(id).unwrap();
        assert_eq!(r.balance, state.balance);
        assert_eq!(r.limit, state.limit);
        assert_eq!(r.reserve, state.reserve);
    }
}

/// P7: governance may lower a limit to exactly `-balance` but no further,
/// and never outside `[limit_min, limit_max]`.
#[test]
fn p7_governance_limit_reduction_stops_at_exactly_negative_balance() {
    let store = MemoryStore::new();
    let verifier = MockVerifier::accepting();
    let clock = FixedClock::at(1000);
    let cell = cell_with_members(&store, &verifier, &clock, 2);

    cell.pay("t1".into(), "m0".into(), "m1".into(), 40, "x".into(), None, [0u8; 64], [0u8; 64]).unwrap();
    assert_eq!(cell.ledger.get_balance(&"m0".to_string()).unwrap(), -40);

    // Reducing to exactly 40 succeeds (equality allowed per spec.md's resolved ambiguity).
    cell.governance.adjust_limit(&cell.ledger, &cell.log, clock.now(), &"m0".to_string(), 40).unwrap();
    assert_eq!(cell.ledger.get_member_state(&"m0".to_string()).unwrap().limit, 40);

    // One further unit of reduction would cross the member's actual debt.
    let err = cell.governance.adjust_limit(&cell.ledger, &cell.log, clock.now(), &"m0".to_string(), 39).unwrap_err();
    assert!(matches!(err, GovernanceError::LedgerError(crate::errors::LedgerError::LimitBelowDebt { .. })));

    // Outside [limit_min, limit_max] is rejected regardless of balance.
    let err = cell.governance.adjust_limit(&cell.ledger, &cell.log, clock.now(), &"m1".to_string(), 5).unwrap_err();
    assert!(matches!(err, GovernanceError::LedgerError(crate::errors::LedgerError::LimitOutOfBounds { .. })));
}
