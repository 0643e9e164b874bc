//! Commission computation: fan a purchase out over up to three ancestor levels
use super::config::EngineConfig;
use super::error::{ReferralError, Result};
use super::graph::indexed_ancestors;
use super::model::{
    Commission, CommissionStatus, Level, MAX_COMMISSION_LEVEL, Participant, Purchase, TimeStamp,
};
use super::money::{Money, Rate};
use super::store::{self, Store, TxResult, abort, keys, tx_get, tx_put};
use chrono::Utc;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusTotals {
    pub count: usize,
    pub amount: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelSummary {
    pub level: Level,
    pub rate: Rate, // rate currently configured, stored rows keep their own
    pub count: usize,
    pub earnings: Money,
}

/// Earnings of one beneficiary, computed in a single pass over its commissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionSummary {
    pub participant_id: String,
    pub total_earnings: Money,
    pub total_commissions: usize,
    pub pending: StatusTotals,
    pub paid: StatusTotals,
    pub void: StatusTotals,
    pub by_level: [LevelSummary; MAX_COMMISSION_LEVEL],
}

#[derive(Debug, Clone)]
pub struct CommissionEngine {
    store: Store,
    config: EngineConfig,
}

/// Transactional views needed to write commissions.
pub(crate) struct CommissionTrees<'a> {
    pub edges_up: &'a TransactionalTree,
    pub commissions: &'a TransactionalTree,
    pub beneficiary_commissions: &'a TransactionalTree,
}

impl CommissionSummary {
    fn empty(participant_id: &str, config: &EngineConfig) -> Self {
        let by_level = Level::ALL.map(|level| LevelSummary {
            level,
            rate: config.rates.rate(level),
            count: 0,
            earnings: Money::ZERO,
        });

        Self {
            participant_id: participant_id.to_string(),
            total_earnings: Money::ZERO,
            total_commissions: 0,
            pending: StatusTotals::default(),
            paid: StatusTotals::default(),
            void: StatusTotals::default(),
            by_level,
        }
    }
    fn record(&mut self, commission: &Commission) -> Result<()> {
        self.total_earnings = self.total_earnings.checked_add(commission.amount)?;
        self.total_commissions += 1;

        let bucket = match commission.status {
            CommissionStatus::Pending => &mut self.pending,
            CommissionStatus::Paid => &mut self.paid,
            CommissionStatus::Void => &mut self.void,
        };
        bucket.count += 1;
        bucket.amount = bucket.amount.checked_add(commission.amount)?;

        let level = &mut self.by_level[commission.level.index()];
        level.count += 1;
        level.earnings = level.earnings.checked_add(commission.amount)?;
        Ok(())
    }
    pub fn status(&self, status: CommissionStatus) -> &StatusTotals {
        match status {
            CommissionStatus::Pending => &self.pending,
            CommissionStatus::Paid => &self.paid,
            CommissionStatus::Void => &self.void,
        }
    }
    pub fn level(&self, level: Level) -> &LevelSummary {
        &self.by_level[level.index()]
    }
}

pub(crate) fn require_purchaser(participants: &TransactionalTree, purchaser: &str) -> TxResult<()> {
    match tx_get::<Participant>(participants, &keys::participant(purchaser))? {
        Some(_) => Ok(()),
        None => abort(ReferralError::UnknownPurchaser(purchaser.to_string())),
    }
}

/// Write one PENDING commission per ancestor level of the purchaser.
///
/// Must run inside the caller's transaction so a purchase either gets all of its
/// commissions or none. `(purchase_id, level)` is unique, a second run aborts
/// with `DuplicateCommission`.
pub(crate) fn create_commissions(
    trees: &CommissionTrees<'_>,
    purchase: &Purchase,
    config: &EngineConfig,
    created_at: &TimeStamp<Utc>,
) -> TxResult<Vec<Commission>> {
    let chain = indexed_ancestors(&purchase.purchaser, |key| tx_get(trees.edges_up, key))?;
    let mut created = Vec::with_capacity(chain.len());

    for ancestor in chain {
        let key = keys::commission(&purchase.id, ancestor.level);
        if trees.commissions.get(&key)?.is_some() {
            return abort(ReferralError::DuplicateCommission {
                purchase_id: purchase.id.clone(),
                level: ancestor.level,
            });
        }

        let rate = config.rates.rate(ancestor.level);
        let amount = purchase
            .amount
            .apply_rate(rate, config.currency_precision)
            .map_err(ConflictableTransactionError::Abort)?;

        let commission = Commission {
            purchase_id: purchase.id.clone(),
            beneficiary: ancestor.id,
            purchaser: purchase.purchaser.clone(),
            level: ancestor.level,
            rate,
            amount,
            status: CommissionStatus::Pending,
            seq: purchase.seq,
            created_at: created_at.clone(),
        };

        tx_put(trees.commissions, key.clone(), &commission)?;
        trees.beneficiary_commissions.insert(
            keys::beneficiary(
                &commission.beneficiary,
                purchase.seq,
                &purchase.id,
                commission.level,
            ),
            key,
        )?;
        created.push(commission);
    }

    Ok(created)
}

pub(crate) fn log_created(purchase: &Purchase, commissions: &[Commission]) {
    for commission in commissions {
        info!(
            purchase = %purchase.id,
            beneficiary = %commission.beneficiary,
            level = commission.level.number(),
            amount = %commission.amount,
            "Commission created"
        );
    }
    if commissions.len() < MAX_COMMISSION_LEVEL {
        debug!(
            purchase = %purchase.id,
            purchaser = %purchase.purchaser,
            created = commissions.len(),
            missing_levels = MAX_COMMISSION_LEVEL - commissions.len(),
            "Ancestor chain shorter than commission depth"
        );
    }
}

impl CommissionEngine {
    pub fn new(store: Store, config: EngineConfig) -> Self {
        Self { store, config }
    }
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compute and store the commissions of an already persisted purchase.
    ///
    /// Amounts come from the stored row, the argument must match it exactly.
    pub fn on_purchase(&self, purchase: &Purchase) -> Result<Vec<Commission>> {
        let created_at = TimeStamp::<Utc>::new();

        let commissions = (
            &self.store.purchases,
            &self.store.participants,
            &self.store.edges_up,
            &self.store.commissions,
            &self.store.beneficiary_commissions,
        )
            .transaction(
                |(purchases, participants, edges_up, commissions, beneficiary_commissions)| -> TxResult<Vec<Commission>> {
                    require_purchaser(participants, &purchase.purchaser)?;
                    let Some(stored) = tx_get::<Purchase>(purchases, &keys::purchase(&purchase.id))? else {
                        return abort(ReferralError::UnknownPurchase(purchase.id.clone()));
                    };
                    if stored != *purchase {
                        return abort(ReferralError::InvalidPurchase(format!(
                            "purchase {} does not match the stored record",
                            purchase.id
                        )));
                    }

                    let trees = CommissionTrees {
                        edges_up,
                        commissions,
                        beneficiary_commissions,
                    };
                    create_commissions(&trees, &stored, &self.config, &created_at)
                },
            )?;

        log_created(purchase, &commissions);
        Ok(commissions)
    }

    /// Settlement hook, the engine never calls this itself
    pub fn set_commission_status(
        &self,
        purchase_id: &str,
        level: Level,
        status: CommissionStatus,
    ) -> Result<Commission> {
        let key = keys::commission(purchase_id, level);

        let updated = self
            .store
            .commissions
            .transaction(|commissions| -> TxResult<Commission> {
                let Some(mut commission) = tx_get::<Commission>(commissions, &key)? else {
                    return abort(ReferralError::UnknownCommission {
                        purchase_id: purchase_id.to_string(),
                        level,
                    });
                };
                if !commission.status.can_transition_to(status) {
                    return abort(ReferralError::InvalidStatusTransition {
                        from: commission.status,
                        to: status,
                    });
                }
                commission.status = status;
                tx_put(commissions, key.clone(), &commission)?;
                Ok(commission)
            })?;

        info!(commission = %updated.id(), status = ?status, "Commission status changed");
        Ok(updated)
    }

    fn for_each_commission_of<F>(&self, beneficiary: &str, mut f: F) -> Result<()>
    where
        F: FnMut(Commission) -> Result<()>,
    {
        for item in self
            .store
            .beneficiary_commissions
            .scan_prefix(keys::beneficiary_prefix(beneficiary))
        {
            let (_, commission_key) = item?;
            let commission = store::get::<Commission>(&self.store.commissions, &commission_key)?
                .ok_or_else(|| {
                    ReferralError::DanglingIndex(String::from_utf8_lossy(&commission_key).into_owned())
                })?;
            f(commission)?;
        }
        Ok(())
    }

    /// Every commission earned by `beneficiary`, newest first
    pub fn commissions_of(&self, beneficiary: &str) -> Result<Vec<Commission>> {
        self.require_participant(beneficiary)?;
        let mut all = Vec::new();
        self.for_each_commission_of(beneficiary, |commission| {
            all.push(commission);
            Ok(())
        })?;
        all.reverse();
        Ok(all)
    }

    /// Commissions generated by one purchase, level 1 first
    pub fn commissions_for_purchase(&self, purchase_id: &str) -> Result<Vec<Commission>> {
        store::scan(&self.store.commissions, &keys::commission_prefix(purchase_id))
    }

    pub fn summarize(&self, participant_id: &str) -> Result<CommissionSummary> {
        self.require_participant(participant_id)?;
        let mut summary = CommissionSummary::empty(participant_id, &self.config);
        self.for_each_commission_of(participant_id, |commission| summary.record(&commission))?;
        Ok(summary)
    }

    fn require_participant(&self, id: &str) -> Result<()> {
        match store::get::<Participant>(&self.store.participants, &keys::participant(id))? {
            Some(_) => Ok(()),
            None => Err(ReferralError::UnknownParticipant(id.to_string())),
        }
    }
}
