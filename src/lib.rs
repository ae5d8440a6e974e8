//! Cell Protocol Core
//!
//! A mutual-credit accounting engine for a closed group ("cell") of peer
//! members: signed integer balances that sum to zero by construction, a
//! transaction/commitment pipeline, bounded governance, and a risk-state
//! emergency mode. This crate is a library engine, not a network service: a
//! host application supplies the three external collaborators (a key/value
//! store, a signature verifier, a wall clock) and drives every mutation
//! through the typed methods below.
//!
//! [`Cell`] wires the six engines together behind one construction so a
//! caller gets a single facade over components that otherwise only know
//! about each other through explicit parameters, never through shared
//! mutable references or circular setters.

pub mod clock;
pub mod commitments;
pub mod crypto;
pub mod emergency;
pub mod errors;
pub mod events;
pub mod governance;
pub mod identity;
pub mod ledger;
pub mod storage;
pub mod transactions;
pub mod types;

#[cfg(test)]
mod test_hooks;

use clock::Clock;
use commitments::Commitments;
use crypto::SignatureVerifier;
use emergency::{Emergency, TransitionThresholds};
use errors::EngineError;
use events::EventLog;
use governance::Governance;
use identity::Identity;
use ledger::Ledger;
use storage::KvStore;
use transactions::{SyncReport, Transactions};
use types::{
    CellId, Commitment, Council, LedgerParameters, MemberId, MemberStatus, PublicKeyBytes,
    SignatureBytes, Timestamp, Transaction, TransactionId,
};

/// Everything a host needs to stand up a brand-new cell's state across every
/// engine's document store, gathered in one place instead of threaded
/// through a long constructor argument list.
pub struct CellConfig {
    pub cell_id: CellId,
    pub parameters: LedgerParameters,
    pub council: Council,
    pub limit_adjustment_rate_limit: u32,
    pub emergency_thresholds: TransitionThresholds,
}

/// Facade over the six core engines sharing one cell's consistency boundary.
///
/// Construction wires every engine to the same store, verifier and clock;
/// nothing here bypasses an engine's own invariant checks; `Cell` adds only
/// the handful of operations that genuinely span more than one engine (e.g.
/// admission, which touches both Identity and Ledger, and removal, which
/// additionally must consult Commitments).
pub struct Cell<'a> {
    pub ledger: Ledger<'a>,
    pub identity: Identity<'a>,
    pub transactions: Transactions<'a>,
    pub commitments: Commitments<'a>,
    pub governance: Governance<'a>,
    pub emergency: Emergency<'a>,
    pub log: EventLog<'a>,
    clock: &'a dyn Clock,
}

impl<'a> Cell<'a> {
    /// Creates a brand-new cell: one document per engine, all empty except
    /// for the supplied parameters, council roster and emergency thresholds.
    pub fn create(
        store: &'a dyn KvStore,
        verifier: &'a dyn SignatureVerifier,
        clock: &'a dyn Clock,
        config: CellConfig,
    ) -> Self {
        let ledger = Ledger::create(store, config.cell_id.clone(), config.parameters);
        let identity = Identity::new(store, config.cell_id.clone());
        let transactions = Transactions::new(store, verifier, config.cell_id.clone());
        let commitments = Commitments::new(store, verifier, config.cell_id.clone());
        let governance = Governance::create(
            store,
            config.cell_id.clone(),
            config.council,
            config.limit_adjustment_rate_limit,
        );
        let emergency = Emergency::create(store, config.cell_id.clone(), config.emergency_thresholds);
        let log = EventLog::new(store, config.cell_id);
        Cell { ledger, identity, transactions, commitments, governance, emergency, log, clock }
    }

    /// Reopens a cell's state from documents a prior `create` call wrote.
    pub fn open(
        store: &'a dyn KvStore,
        verifier: &'a dyn SignatureVerifier,
        clock: &'a dyn Clock,
        cell_id: CellId,
    ) -> Self {
        Cell {
            ledger: Ledger::open(store, cell_id.clone()),
            identity: Identity::new(store, cell_id.clone()),
            transactions: Transactions::new(store, verifier, cell_id.clone()),
            commitments: Commitments::new(store, verifier, cell_id.clone()),
            governance: Governance::open(store, cell_id.clone()),
            emergency: Emergency::open(store, cell_id.clone()),
            log: EventLog::new(store, cell_id),
            clock,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Admission (§4.2): creates the identity in PENDING_PROFILE and inserts
    /// a ledger member at the cell's default limit, in one call.
    pub fn admit_member(
        &self,
        member: MemberId,
        display_name: String,
        public_key: PublicKeyBytes,
    ) -> Result<(), EngineError> {
        let now = self.now();
        let limit = self.ledger.parameters().limit_default;
        self.identity.add_member(&self.ledger, &self.log, now, member, display_name, public_key, limit)?;
        Ok(())
    }

    /// Admits a pending or under-review member into ACTIVE or PROBATION
    /// (§3/§4.2), the step that follows `admit_member`.
    pub fn accept_member(&self, member: &MemberId, status: MemberStatus) -> Result<(), EngineError> {
        let now = self.now();
        self.identity.accept_member(&self.ledger, &self.log, now, member, status)?;
        Ok(())
    }

    /// Removal requires `balance = 0` and no ACTIVE commitments (§4.2);
    /// `Identity::remove_member` enforces both against the Ledger and
    /// Commitments directly.
    pub fn remove_member(&self, member: &MemberId) -> Result<(), EngineError> {
        let now = self.now();
        self.identity.remove_member(&self.ledger, &self.commitments, &self.log, now, member)?;
        Ok(())
    }

    /// Validates and executes a co-signed spot transaction (§4.3) at the
    /// cell's current clock time.
    #[allow(clippy::too_many_arguments)]
    pub fn pay(
        &self,
        id: TransactionId,
        payer: MemberId,
        payee: MemberId,
        amount: u64,
        description: String,
        category: Option<String>,
        payer_signature: SignatureBytes,
        payee_signature: SignatureBytes,
    ) -> Result<Transaction, EngineError> {
        let now = self.now();
        Ok(self.transactions.create_spot_transaction(
            &self.ledger,
            &self.identity,
            &self.log,
            now,
            id,
            payer,
            payee,
            amount,
            description,
            category,
            payer_signature,
            payee_signature,
        )?)
    }

    /// Drains the offline queue against live state (§4.3's sync path).
    pub fn sync_offline_queue(&self) -> SyncReport {
        let now = self.now();
        self.transactions.sync(&self.ledger, &self.identity, &self.log, now)
    }

    /// Fulfills an escrowed or soft commitment, synthesizing the one-way
    /// promisee-to-promisor transaction (§4.4).
    pub fn fulfill_commitment(
        &self,
        id: &types::CommitmentId,
        transaction_id: TransactionId,
        fulfillment_signature: SignatureBytes,
        rating: Option<u8>,
    ) -> Result<Commitment, errors::CommitmentError> {
        let now = self.now();
        self.commitments.fulfill(&self.ledger, &self.identity, &self.log, now, id, transaction_id, fulfillment_signature, rating)
    }

    /// Recomputes stress indicators from current ledger statistics plus
    /// externally supplied rates, and attempts an automatic risk-state
    /// transition if the hold-down period has elapsed (§4.6). A committed
    /// transition immediately folds its policy's binding commitment mode
    /// into the ledger's parameters, the same propagation a governance
    /// override performs.
    pub fn reassess_emergency_state(
        &self,
        rho: f64,
        recent_default_rate: f64,
        energy_stress: f64,
    ) -> Result<Option<emergency::RiskState>, EngineError> {
        let now = self.now();
        let indicators = emergency::ledger_indicators(&self.ledger, rho, recent_default_rate, energy_stress);
        let transitioned = self.emergency.try_auto_transition(&self.log, now, &indicators)?;
        if transitioned.is_some() {
            let policy = self.emergency.active_policy();
            self.ledger.set_parameters(&self.log, now, policy.apply_to(self.ledger.parameters()))?;
        }
        Ok(transitioned)
    }
}
