use super::model::{CommissionStatus, Level};

#[derive(thiserror::Error, Debug)]
pub enum ReferralError {
    #[error("Participant identifier '{0}' is already taken")]
    DuplicateIdentifier(String),
    #[error("Sponsor '{0}' does not exist")]
    UnknownSponsor(String),
    #[error("Sponsor '{sponsor}' has reached the maximum number of direct referrals ({limit})")]
    FanoutLimitExceeded { sponsor: String, limit: u32 },
    #[error("Purchaser '{0}' does not exist")]
    UnknownPurchaser(String),
    #[error("Participant '{0}' does not exist")]
    UnknownParticipant(String),
    #[error("Purchase '{0}' does not exist")]
    UnknownPurchase(String),
    #[error("No level {level:?} commission exists for purchase '{purchase_id}'")]
    UnknownCommission { purchase_id: String, level: Level },
    #[error("Commissions for purchase '{purchase_id}' at level {level:?} were already created")]
    DuplicateCommission { purchase_id: String, level: Level },
    #[error("Invalid participant identifier {0:?}")]
    InvalidIdentifier(String),
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid purchase: {0}")]
    InvalidPurchase(String),
    #[error("Commission cannot move from {from:?} to {to:?}")]
    InvalidStatusTransition {
        from: CommissionStatus,
        to: CommissionStatus,
    },
    #[error("Index entry points at a missing record: {0}")]
    DanglingIndex(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Storage failure")]
    Storage(#[from] sled::Error),
    #[error("Failed to encode record")]
    Encode(#[from] minicbor::encode::Error<std::convert::Infallible>),
    #[error("Failed to decode record")]
    Decode(#[from] minicbor::decode::Error),
}

impl From<sled::transaction::TransactionError<ReferralError>> for ReferralError {
    fn from(value: sled::transaction::TransactionError<ReferralError>) -> Self {
        match value {
            sled::transaction::TransactionError::Abort(err) => err,
            sled::transaction::TransactionError::Storage(err) => ReferralError::Storage(err),
        }
    }
}

pub type Result<T, E = ReferralError> = std::result::Result<T, E>;
