//! Purchase recording. Storing a purchase and its commissions is one transaction.
use super::commission::{self, CommissionTrees};
use super::config::EngineConfig;
use super::error::{ReferralError, Result};
use super::model::{Commission, Purchase, TimeStamp};
use super::money::Money;
use super::store::{self, Store, TxResult, abort, keys, tx_put};
use super::utils::{new_uuid_to_bech32, validate_identifier};
use chrono::Utc;
use sled::Transactional;

pub const PURCHASE_HRP: &str = "purchase_";

/// Unvalidated purchase fields, finalised into a `Purchase` when recorded
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurchaseDraft {
    purchaser: Option<String>,
    product_id: Option<String>,
    product_name: Option<String>,
    amount: Option<Money>,
}

/// A stored purchase together with the commissions it generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReceipt {
    pub purchase: Purchase,
    pub commissions: Vec<Commission>,
}

#[derive(Debug, Clone)]
pub struct PurchaseLedger {
    store: Store,
    config: EngineConfig,
}

impl PurchaseDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_purchaser(mut self, purchaser: &str) -> Self {
        self.purchaser = Some(purchaser.to_string());
        self
    }
    pub fn set_product(mut self, product_id: &str, product_name: &str) -> Self {
        self.product_id = Some(product_id.to_string());
        self.product_name = Some(product_name.to_string());
        self
    }
    pub fn set_amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }
    // Checks fields and issues the purchase id
    pub fn validate_and_finalise(&self, seq: u64) -> Result<Purchase> {
        let Some(purchaser) = self.purchaser.as_deref() else {
            return Err(ReferralError::InvalidPurchase("purchaser is not set".into()));
        };
        validate_identifier(purchaser)?;

        let product_id = match self.product_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id,
            _ => return Err(ReferralError::InvalidPurchase("product id is not set".into())),
        };
        let product_name = match self.product_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => return Err(ReferralError::InvalidPurchase("product name is not set".into())),
        };
        let Some(amount) = self.amount else {
            return Err(ReferralError::InvalidAmount("amount is not set".into()));
        };

        let id = new_uuid_to_bech32(PURCHASE_HRP)
            .map_err(|e| ReferralError::InvalidPurchase(format!("failed to issue id: {e}")))?;

        Ok(Purchase {
            id,
            purchaser: purchaser.to_string(),
            product_id: product_id.to_string(),
            product_name: product_name.to_string(),
            amount,
            seq,
            created_at: TimeStamp::<Utc>::new(),
        })
    }
}

impl PurchaseLedger {
    pub fn new(store: Store, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Persist a purchase and fan it out into commissions, all or nothing
    pub fn record_purchase(&self, draft: &PurchaseDraft) -> Result<PurchaseReceipt> {
        let purchase = draft.validate_and_finalise(self.store.next_seq()?)?;

        let commissions = (
            &self.store.purchases,
            &self.store.participants,
            &self.store.edges_up,
            &self.store.commissions,
            &self.store.beneficiary_commissions,
        )
            .transaction(
                |(purchases, participants, edges_up, commissions, beneficiary_commissions)| -> TxResult<Vec<Commission>> {
                    commission::require_purchaser(participants, &purchase.purchaser)?;

                    let key = keys::purchase(&purchase.id);
                    if purchases.get(&key)?.is_some() {
                        return abort(ReferralError::InvalidPurchase(format!(
                            "purchase id {} already issued",
                            purchase.id
                        )));
                    }
                    tx_put(purchases, key, &purchase)?;

                    let trees = CommissionTrees {
                        edges_up,
                        commissions,
                        beneficiary_commissions,
                    };
                    commission::create_commissions(&trees, &purchase, &self.config, &purchase.created_at)
                },
            )?;

        tracing::info!(
            purchase = %purchase.id,
            purchaser = %purchase.purchaser,
            amount = %purchase.amount,
            commissions = commissions.len(),
            "Recorded purchase"
        );
        commission::log_created(&purchase, &commissions);

        Ok(PurchaseReceipt {
            purchase,
            commissions,
        })
    }

    /// Persist a purchase without computing commissions.
    ///
    /// The caller is expected to follow up with `CommissionEngine::on_purchase`.
    pub fn store_purchase(&self, draft: &PurchaseDraft) -> Result<Purchase> {
        let purchase = draft.validate_and_finalise(self.store.next_seq()?)?;

        (&self.store.purchases, &self.store.participants).transaction(
            |(purchases, participants)| -> TxResult<()> {
                commission::require_purchaser(participants, &purchase.purchaser)?;

                let key = keys::purchase(&purchase.id);
                if purchases.get(&key)?.is_some() {
                    return abort(ReferralError::InvalidPurchase(format!(
                        "purchase id {} already issued",
                        purchase.id
                    )));
                }
                tx_put(purchases, key, &purchase)
            },
        )?;

        tracing::info!(
            purchase = %purchase.id,
            purchaser = %purchase.purchaser,
            amount = %purchase.amount,
            "Stored purchase"
        );
        Ok(purchase)
    }

    pub fn purchase(&self, id: &str) -> Result<Purchase> {
        store::get(&self.store.purchases, &keys::purchase(id))?
            .ok_or_else(|| ReferralError::UnknownPurchase(id.to_string()))
    }

    /// Every purchase with its commissions, newest first
    pub fn purchases(&self) -> Result<Vec<PurchaseReceipt>> {
        let mut all: Vec<Purchase> = store::scan(&self.store.purchases, &[])?;
        all.sort_by(|a, b| b.seq.cmp(&a.seq));

        all.into_iter()
            .map(|purchase| {
                let commissions =
                    store::scan(&self.store.commissions, &keys::commission_prefix(&purchase.id))?;
                Ok(PurchaseReceipt {
                    purchase,
                    commissions,
                })
            })
            .collect()
    }
}
