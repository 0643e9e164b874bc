//! Service layer API consumed by request handlers
use super::commission::{CommissionEngine, CommissionSummary};
use super::config::EngineConfig;
use super::error::Result;
use super::graph::{ReferralGraph, ReferralNetwork, Registration};
use super::model::{Ancestor, Commission, CommissionStatus, Level, Participant, Purchase};
use super::purchase::{PurchaseDraft, PurchaseLedger, PurchaseReceipt};
use super::store::Store;
use std::sync::Arc;

pub struct ReferralService {
    store: Store,
    graph: ReferralGraph,
    engine: CommissionEngine,
    ledger: PurchaseLedger,
}

impl ReferralService {
    /// Service over `instance` with the default configuration
    pub fn new(instance: Arc<sled::Db>) -> Result<Self> {
        Self::with_config(instance, EngineConfig::default())
    }

    pub fn with_config(instance: Arc<sled::Db>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let store = Store::open(instance)?;

        Ok(Self {
            graph: ReferralGraph::new(store.clone(), config),
            engine: CommissionEngine::new(store.clone(), config),
            ledger: PurchaseLedger::new(store.clone(), config),
            store,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        self.graph.config()
    }

    pub fn graph(&self) -> &ReferralGraph {
        &self.graph
    }

    pub fn engine(&self) -> &CommissionEngine {
        &self.engine
    }

    /// Register a participant, optionally under a sponsor
    #[tracing::instrument(skip_all, fields(participant = %registration.referral_id(), sponsor = ?registration.sponsor()))]
    pub fn register(&self, registration: &Registration) -> Result<Participant> {
        self.graph.register(registration)
    }

    /// Record a purchase and create its commissions
    #[tracing::instrument(skip_all)]
    pub fn record_purchase(&self, draft: &PurchaseDraft) -> Result<PurchaseReceipt> {
        self.ledger.record_purchase(draft)
    }

    /// Store a purchase only, commissions follow from `on_purchase`
    #[tracing::instrument(skip_all)]
    pub fn store_purchase(&self, draft: &PurchaseDraft) -> Result<Purchase> {
        self.ledger.store_purchase(draft)
    }

    /// Compute commissions for a purchase stored by another writer
    #[tracing::instrument(skip_all, fields(purchase = %purchase.id))]
    pub fn on_purchase(&self, purchase: &Purchase) -> Result<Vec<Commission>> {
        self.engine.on_purchase(purchase)
    }

    /// Settlement bookkeeping: mark a commission paid or void
    #[tracing::instrument(skip(self))]
    pub fn set_commission_status(
        &self,
        purchase_id: &str,
        level: Level,
        status: CommissionStatus,
    ) -> Result<Commission> {
        self.engine.set_commission_status(purchase_id, level, status)
    }

    pub fn participant(&self, id: &str) -> Result<Participant> {
        self.graph.participant(id)
    }

    pub fn participants(&self) -> Result<Vec<Participant>> {
        self.graph.participants()
    }

    pub fn ancestors_of(&self, id: &str) -> Result<Vec<Ancestor>> {
        self.graph.ancestors_of(id)
    }

    pub fn descendants_of(&self, id: &str, level: Level) -> Result<Vec<Participant>> {
        self.graph.descendants_of(id, level)
    }

    pub fn network(&self, id: &str) -> Result<ReferralNetwork> {
        self.graph.network(id)
    }

    pub fn summarize(&self, id: &str) -> Result<CommissionSummary> {
        self.engine.summarize(id)
    }

    pub fn commissions_of(&self, id: &str) -> Result<Vec<Commission>> {
        self.engine.commissions_of(id)
    }

    pub fn commissions_for_purchase(&self, purchase_id: &str) -> Result<Vec<Commission>> {
        self.engine.commissions_for_purchase(purchase_id)
    }

    pub fn purchase(&self, id: &str) -> Result<Purchase> {
        self.ledger.purchase(id)
    }

    pub fn purchases(&self) -> Result<Vec<PurchaseReceipt>> {
        self.ledger.purchases()
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}
