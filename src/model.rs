//! Records stored in the referral dataset
use super::money::{Money, Rate};
use chrono::{DateTime, TimeZone, Utc};

/// Commission depth. Edges and commissions never go deeper than this.
pub const MAX_COMMISSION_LEVEL: usize = 3;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

/// Distance from an ancestor to a descendant along sponsor links.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    #[n(1)]
    One,
    #[n(2)]
    Two,
    #[n(3)]
    Three,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommissionStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Paid,
    #[n(2)]
    Void,
}

// Key is the participant's referral id
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    #[n(0)]
    pub referral_id: String,
    #[n(1)]
    pub email: String,
    #[n(2)]
    pub first_name: Option<String>,
    #[n(3)]
    pub last_name: Option<String>,
    #[n(4)]
    pub referred_by: Option<String>, // set once at registration
    #[n(5)]
    pub direct_referral_count: u32,
    #[n(6)]
    pub seq: u64, // registration order
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
}

/// Materialized `(ancestor, descendant, level)` fact. Derived from `referred_by`, never edited.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ReferralEdge {
    #[n(0)]
    pub ancestor: String,
    #[n(1)]
    pub descendant: String,
    #[n(2)]
    pub level: Level,
    #[n(3)]
    pub seq: u64,
}

/// One step of an ancestor chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ancestor {
    pub id: String,
    pub level: Level,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded
    #[n(1)]
    pub purchaser: String,
    #[n(2)]
    pub product_id: String,
    #[n(3)]
    pub product_name: String,
    #[n(4)]
    pub amount: Money,
    #[n(5)]
    pub seq: u64,
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
}

// Key is (purchase_id, level), which is also the uniqueness constraint
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Commission {
    #[n(0)]
    pub purchase_id: String,
    #[n(1)]
    pub beneficiary: String,
    #[n(2)]
    pub purchaser: String,
    #[n(3)]
    pub level: Level,
    #[n(4)]
    pub rate: Rate, // kept for audit, later rate changes never touch it
    #[n(5)]
    pub amount: Money,
    #[n(6)]
    pub status: CommissionStatus,
    #[n(7)]
    pub seq: u64,
    #[n(8)]
    pub created_at: TimeStamp<Utc>,
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Into::into)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl Level {
    pub const ALL: [Level; MAX_COMMISSION_LEVEL] = [Level::One, Level::Two, Level::Three];

    pub fn number(self) -> u8 {
        match self {
            Level::One => 1,
            Level::Two => 2,
            Level::Three => 3,
        }
    }
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Level::One),
            2 => Some(Level::Two),
            3 => Some(Level::Three),
            _ => None,
        }
    }
    pub(crate) fn index(self) -> usize {
        usize::from(self.number()) - 1
    }
}

impl CommissionStatus {
    /// Settlement moves: PENDING -> PAID, PENDING -> VOID, PAID -> VOID
    pub fn can_transition_to(self, next: CommissionStatus) -> bool {
        matches!(
            (self, next),
            (CommissionStatus::Pending, CommissionStatus::Paid)
                | (CommissionStatus::Pending, CommissionStatus::Void)
                | (CommissionStatus::Paid, CommissionStatus::Void)
        )
    }
}

impl Commission {
    /// Human readable id, `<purchase_id>:<level>`
    pub fn id(&self) -> String {
        format!("{}:{}", self.purchase_id, self.level.number())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
