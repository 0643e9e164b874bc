//! Referral forest: registration, fan-out limit and ancestor/descendant queries
use super::config::EngineConfig;
use super::error::{ReferralError, Result};
use super::model::{Ancestor, Level, Participant, ReferralEdge, TimeStamp, MAX_COMMISSION_LEVEL};
use super::store::{self, Store, TxResult, abort, keys, tx_get, tx_put};
use super::utils::validate_identifier;
use chrono::Utc;
use sled::Transactional;
use sled::transaction::ConflictableTransactionError;
use tracing::{debug, info, warn};

// Input for `register`. The referral id doubles as the username.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Registration {
    referral_id: String,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    sponsor: Option<String>,
}

/// A participant and its descendants grouped by level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralNetwork {
    pub participant: Participant,
    pub levels: [Vec<Participant>; MAX_COMMISSION_LEVEL],
}

#[derive(Debug, Clone)]
pub struct ReferralGraph {
    store: Store,
    config: EngineConfig,
}

impl Registration {
    pub fn new(referral_id: &str) -> Self {
        Self {
            referral_id: referral_id.to_string(),
            ..Self::default()
        }
    }
    pub fn set_email(mut self, email: &str) -> Self {
        self.email = email.to_string();
        self
    }
    pub fn set_names(mut self, first_name: &str, last_name: &str) -> Self {
        self.first_name = Some(first_name.to_string());
        self.last_name = Some(last_name.to_string());
        self
    }
    pub fn set_sponsor(mut self, sponsor: &str) -> Self {
        self.sponsor = Some(sponsor.to_string());
        self
    }
    pub fn referral_id(&self) -> &str {
        &self.referral_id
    }
    pub fn sponsor(&self) -> Option<&str> {
        self.sponsor.as_deref()
    }
    fn validate(&self) -> Result<()> {
        validate_identifier(&self.referral_id)?;
        if let Some(sponsor) = &self.sponsor {
            validate_identifier(sponsor)?;
        }
        Ok(())
    }
}

impl ReferralNetwork {
    pub fn level(&self, level: Level) -> &[Participant] {
        &self.levels[level.index()]
    }
    pub fn count(&self, level: Level) -> usize {
        self.level(level).len()
    }
    pub fn total(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}

/// Follow `referred_by` pointers from `start`, at most [`MAX_COMMISSION_LEVEL`] hops.
///
/// `start` is the direct sponsor (level 1). The walk ends early at a root.
pub fn walk_sponsors<E, F>(start: Option<&str>, mut lookup: F) -> std::result::Result<Vec<Ancestor>, E>
where
    F: FnMut(&str) -> std::result::Result<Participant, E>,
{
    let mut chain = Vec::with_capacity(MAX_COMMISSION_LEVEL);
    let mut next = start.map(str::to_string);

    for level in Level::ALL {
        let Some(id) = next.take() else { break };
        next = lookup(&id)?.referred_by;
        chain.push(Ancestor { id, level });
    }

    Ok(chain)
}

/// Read the materialized ancestor edges of `descendant`, level 1 upwards.
pub(crate) fn indexed_ancestors<E, F>(descendant: &str, mut lookup: F) -> std::result::Result<Vec<Ancestor>, E>
where
    F: FnMut(&[u8]) -> std::result::Result<Option<ReferralEdge>, E>,
{
    let mut chain = Vec::with_capacity(MAX_COMMISSION_LEVEL);

    for level in Level::ALL {
        // edges are contiguous from level 1, a gap means the chain ended
        let Some(edge) = lookup(&keys::edge_up(descendant, level))? else { break };
        chain.push(Ancestor {
            id: edge.ancestor,
            level,
        });
    }

    Ok(chain)
}

fn tx_participant(
    participants: &sled::transaction::TransactionalTree,
    id: &str,
) -> TxResult<Participant> {
    tx_get(participants, &keys::participant(id))?.ok_or_else(|| {
        ConflictableTransactionError::Abort(ReferralError::UnknownParticipant(id.to_string()))
    })
}

impl ReferralGraph {
    pub fn new(store: Store, config: EngineConfig) -> Self {
        Self { store, config }
    }
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a participant, bump the sponsor's counter and materialize edges, all in one transaction
    pub fn register(&self, registration: &Registration) -> Result<Participant> {
        registration.validate()?;

        let seq = self.store.next_seq()?;
        let created_at = TimeStamp::<Utc>::new();
        let fanout_limit = self.config.fanout_limit;
        let id = registration.referral_id.as_str();

        let outcome = (
            &self.store.participants,
            &self.store.edges_up,
            &self.store.edges_down,
        )
            .transaction(|(participants, edges_up, edges_down)| -> TxResult<(Participant, Vec<ReferralEdge>)> {
                let key = keys::participant(id);
                if participants.get(&key)?.is_some() {
                    return abort(ReferralError::DuplicateIdentifier(id.to_string()));
                }

                let mut edges = Vec::new();
                if let Some(sponsor_id) = registration.sponsor.as_deref() {
                    let Some(mut sponsor) =
                        tx_get::<Participant>(participants, &keys::participant(sponsor_id))?
                    else {
                        return abort(ReferralError::UnknownSponsor(sponsor_id.to_string()));
                    };
                    if sponsor.direct_referral_count >= fanout_limit {
                        return abort(ReferralError::FanoutLimitExceeded {
                            sponsor: sponsor_id.to_string(),
                            limit: fanout_limit,
                        });
                    }
                    sponsor.direct_referral_count += 1;
                    tx_put(participants, keys::participant(sponsor_id), &sponsor)?;

                    for ancestor in
                        walk_sponsors(Some(sponsor_id), |next| tx_participant(participants, next))?
                    {
                        let edge = ReferralEdge {
                            ancestor: ancestor.id,
                            descendant: id.to_string(),
                            level: ancestor.level,
                            seq,
                        };
                        tx_put(edges_up, keys::edge_up(id, edge.level), &edge)?;
                        tx_put(
                            edges_down,
                            keys::edge_down(&edge.ancestor, edge.level, seq, id),
                            &edge,
                        )?;
                        edges.push(edge);
                    }
                }

                let participant = Participant {
                    referral_id: id.to_string(),
                    email: registration.email.clone(),
                    first_name: registration.first_name.clone(),
                    last_name: registration.last_name.clone(),
                    referred_by: registration.sponsor.clone(),
                    direct_referral_count: 0,
                    seq,
                    created_at: created_at.clone(),
                };
                tx_put(participants, key, &participant)?;

                Ok((participant, edges))
            });

        match outcome {
            Ok((participant, edges)) => {
                info!(
                    participant = %participant.referral_id,
                    sponsor = ?participant.referred_by,
                    edges = edges.len(),
                    "Registered participant"
                );
                Ok(participant)
            }
            Err(err) => {
                let err = ReferralError::from(err);
                warn!(participant = %id, sponsor = ?registration.sponsor, error = %err, "Registration rejected");
                Err(err)
            }
        }
    }

    pub fn find_participant(&self, id: &str) -> Result<Option<Participant>> {
        store::get(&self.store.participants, &keys::participant(id))
    }

    pub fn participant(&self, id: &str) -> Result<Participant> {
        self.find_participant(id)?
            .ok_or_else(|| ReferralError::UnknownParticipant(id.to_string()))
    }

    /// Every participant, newest registration first
    pub fn participants(&self) -> Result<Vec<Participant>> {
        let mut all: Vec<Participant> = store::scan(&self.store.participants, &[])?;
        all.sort_by(|a, b| b.seq.cmp(&a.seq));
        Ok(all)
    }

    /// Ancestor chain from the materialized edge index, level 1 first
    pub fn ancestors_of(&self, id: &str) -> Result<Vec<Ancestor>> {
        self.participant(id)?;
        let chain = indexed_ancestors(id, |key| store::get(&self.store.edges_up, key))?;
        debug!(participant = %id, depth = chain.len(), "Resolved ancestors");
        Ok(chain)
    }

    /// Ancestor chain by following `referred_by` pointers. Must agree with [`Self::ancestors_of`].
    pub fn walk_ancestors(&self, id: &str) -> Result<Vec<Ancestor>> {
        let participant = self.participant(id)?;
        walk_sponsors(participant.referred_by.as_deref(), |next| self.participant(next))
    }

    /// Descendants exactly `level` hops below `id`, in registration order
    pub fn descendants_of(&self, id: &str, level: Level) -> Result<Vec<Participant>> {
        self.participant(id)?;
        let edges: Vec<ReferralEdge> =
            store::scan(&self.store.edges_down, &keys::edge_down_prefix(id, level))?;

        edges
            .iter()
            .map(|edge| self.participant(&edge.descendant))
            .collect()
    }

    /// Direct referrals, equivalent to `descendants_of(id, Level::One)`
    pub fn direct_referrals(&self, id: &str) -> Result<Vec<Participant>> {
        self.descendants_of(id, Level::One)
    }

    pub fn network(&self, id: &str) -> Result<ReferralNetwork> {
        let participant = self.participant(id)?;
        let levels = [
            self.descendants_of(id, Level::One)?,
            self.descendants_of(id, Level::Two)?,
            self.descendants_of(id, Level::Three)?,
        ];

        Ok(ReferralNetwork {
            participant,
            levels,
        })
    }
}
