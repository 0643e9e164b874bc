//! Referral forest and tiered commission engine backed by sled

pub mod commission;
pub mod config;
pub mod error;
pub mod graph;
pub mod model;
pub mod money;
pub mod purchase;
pub mod service;
pub mod store;
pub mod utils;

pub use commission::{CommissionEngine, CommissionSummary};
pub use config::{EngineConfig, RateTable};
pub use error::ReferralError;
pub use graph::{ReferralGraph, ReferralNetwork, Registration};
pub use model::{Ancestor, Commission, CommissionStatus, Level, Participant, Purchase};
pub use money::{Money, Rate};
pub use purchase::{PurchaseDraft, PurchaseLedger, PurchaseReceipt};
pub use service::ReferralService;
