//! Read-only view of the corpus used for matching.

use indexmap::IndexMap;
use tracing::{debug, warn};

use confmatch_embeddings::Embedding;
use confmatch_judge::QueryType;

use crate::config::RequestPoolSource;
use crate::error::Result;
use crate::model::{
    Attendee, AttendeeId, EntityId, MatchSet, Offering, OfferingId, Request, RequestId,
};
use crate::retriever::CandidatePool;
use crate::store::CorpusStore;

/// A loaded corpus with candidate pools built from its embeddings.
pub struct CorpusSnapshot {
    attendees: IndexMap<AttendeeId, Attendee>,
    offerings: IndexMap<OfferingId, Offering>,
    requests: IndexMap<RequestId, Request>,

    /// Offerings with a usable embedding.
    offering_pool: CandidatePool,

    /// Requests, embedded per [`RequestPoolSource`].
    request_pool: CandidatePool,
}

impl CorpusSnapshot {
    /// Load the corpus from a store.
    pub async fn load(
        store: &dyn CorpusStore,
        dimension: usize,
        request_pool: RequestPoolSource,
    ) -> Result<Self> {
        let attendees = store.attendees().await?;
        let offerings = store.offerings().await?;
        let requests = store.requests().await?;
        Ok(Self::from_parts(
            attendees,
            offerings,
            requests,
            dimension,
            request_pool,
        ))
    }

    /// Build a snapshot from already loaded tables.
    ///
    /// Statements without an embedding, or with one that cannot be used,
    /// are kept for lookup but left out of the pools.
    pub fn from_parts(
        attendees: Vec<Attendee>,
        offerings: Vec<Offering>,
        requests: Vec<Request>,
        dimension: usize,
        request_pool_source: RequestPoolSource,
    ) -> Self {
        let mut offering_pool = CandidatePool::new(QueryType::Offering, dimension);
        for offering in &offerings {
            if let Some(embedding) = &offering.embedding {
                add_to_pool(
                    &mut offering_pool,
                    offering.entity_id(),
                    offering.attendee_id,
                    embedding,
                );
            }
        }

        let mut request_pool = CandidatePool::new(QueryType::Request, dimension);
        for request in &requests {
            let embedding = match request_pool_source {
                RequestPoolSource::Native => request.embedding.as_ref(),
                RequestPoolSource::Synthetic => {
                    request.synthetic_offering.as_ref().map(|s| &s.embedding)
                }
            };
            if let Some(embedding) = embedding {
                add_to_pool(
                    &mut request_pool,
                    request.entity_id(),
                    request.attendee_id,
                    embedding,
                );
            }
        }

        debug!(
            "Snapshot pools: {} of {} offerings, {} of {} requests",
            offering_pool.len(),
            offerings.len(),
            request_pool.len(),
            requests.len()
        );

        Self {
            attendees: attendees.into_iter().map(|a| (a.id, a)).collect(),
            offerings: offerings.into_iter().map(|o| (o.id, o)).collect(),
            requests: requests.into_iter().map(|r| (r.id, r)).collect(),
            offering_pool,
            request_pool,
        }
    }

    /// Pool searched by queries of `query_type`: requests look for
    /// offerings and offerings look for requests.
    pub fn pool_for(&self, query_type: QueryType) -> &CandidatePool {
        match query_type {
            QueryType::Request => &self.offering_pool,
            QueryType::Offering => &self.request_pool,
        }
    }

    pub fn offering_pool(&self) -> &CandidatePool {
        &self.offering_pool
    }

    pub fn request_pool(&self) -> &CandidatePool {
        &self.request_pool
    }

    pub fn attendee(&self, id: AttendeeId) -> Option<&Attendee> {
        self.attendees.get(&id)
    }

    pub fn offering(&self, id: OfferingId) -> Option<&Offering> {
        self.offerings.get(&id)
    }

    pub fn request(&self, id: RequestId) -> Option<&Request> {
        self.requests.get(&id)
    }

    pub fn attendees(&self) -> impl Iterator<Item = &Attendee> {
        self.attendees.values()
    }

    pub fn offerings(&self) -> impl Iterator<Item = &Offering> {
        self.offerings.values()
    }

    pub fn requests(&self) -> impl Iterator<Item = &Request> {
        self.requests.values()
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        match entity {
            EntityId::Offering(id) => self.offerings.contains_key(&id),
            EntityId::Request(id) => self.requests.contains_key(&id),
        }
    }

    /// Owning attendee of a statement.
    pub fn owner_of(&self, entity: EntityId) -> Option<AttendeeId> {
        match entity {
            EntityId::Offering(id) => self.offerings.get(&id).map(|o| o.attendee_id),
            EntityId::Request(id) => self.requests.get(&id).map(|r| r.attendee_id),
        }
    }

    /// Statement text.
    pub fn text_of(&self, entity: EntityId) -> Option<&str> {
        match entity {
            EntityId::Offering(id) => self.offerings.get(&id).map(|o| o.text.as_str()),
            EntityId::Request(id) => self.requests.get(&id).map(|r| r.text.as_str()),
        }
    }

    /// Vector a statement is matched with: an offering's own embedding, a
    /// request's synthetic-offering embedding.
    pub fn query_embedding(&self, entity: EntityId) -> Option<&[f32]> {
        match entity {
            EntityId::Offering(id) => self.offerings.get(&id)?.embedding.as_deref(),
            EntityId::Request(id) => self
                .requests
                .get(&id)?
                .synthetic_offering
                .as_ref()
                .map(|s| s.embedding.as_slice()),
        }
    }

    /// Statements owned by an attendee.
    pub fn statements_of(&self, attendee: AttendeeId) -> (Vec<&Offering>, Vec<&Request>) {
        let offerings = self
            .offerings
            .values()
            .filter(|o| o.attendee_id == attendee)
            .collect();
        let requests = self
            .requests
            .values()
            .filter(|r| r.attendee_id == attendee)
            .collect();
        (offerings, requests)
    }

    /// Attendees whose full name contains `name`, ignoring case.
    pub fn find_attendees(&self, name: &str) -> Vec<&Attendee> {
        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.attendees
            .values()
            .filter(|a| a.full_name().to_lowercase().contains(&needle))
            .collect()
    }

    /// Remove matches that break corpus invariants and re-rank the rest.
    ///
    /// A kept match points at an existing statement of the opposite kind with
    /// a different owner. Returns the number rejected.
    pub fn enforce_integrity(&self, set: &mut MatchSet) -> usize {
        let source = set.source;
        let source_owner = self.owner_of(source);
        let before = set.matches.len();

        set.matches.retain(|m| {
            let reason = if m.target.kind() == source.kind() {
                Some("same kind as source")
            } else if !self.contains(m.target) {
                Some("target not in corpus")
            } else if source_owner.is_none() || self.owner_of(m.target) == source_owner {
                Some("target shares the source's owner")
            } else {
                None
            };
            if let Some(reason) = reason {
                warn!("Rejecting match {source} -> {}: {reason}", m.target);
            }
            reason.is_none()
        });

        for (m, rank) in set.matches.iter_mut().zip(1u32..) {
            m.rank = rank;
        }
        before - set.matches.len()
    }
}

fn add_to_pool(
    pool: &mut CandidatePool,
    entity: EntityId,
    owner: AttendeeId,
    embedding: &Embedding,
) {
    if let Err(e) = pool.insert(entity, owner, embedding.clone()) {
        warn!("Leaving {entity} out of the {} pool: {e}", pool.kind());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Match, SyntheticOffering};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn snapshot(source: RequestPoolSource) -> CorpusSnapshot {
        let synthetic = SyntheticOffering {
            text: "I can mentor".to_string(),
            embedding: vec![0.0, 1.0],
            generated_at: Utc::now(),
        };
        CorpusSnapshot::from_parts(
            vec![
                Attendee::new(AttendeeId(1), "Grace", "Hopper"),
                Attendee::new(AttendeeId(2), "Alan", "Turing"),
            ],
            vec![
                Offering::new(OfferingId(1), AttendeeId(1), "Compiler mentoring")
                    .with_embedding(vec![1.0, 0.0]),
                Offering::new(OfferingId(2), AttendeeId(2), "No embedding yet"),
            ],
            vec![
                Request::new(RequestId(1), AttendeeId(2), "Need a mentor")
                    .with_embedding(vec![1.0, 1.0])
                    .with_synthetic_offering(synthetic),
                Request::new(RequestId(2), AttendeeId(1), "Need funding")
                    .with_embedding(vec![0.0, 0.0]),
            ],
            2,
            source,
        )
    }

    #[test]
    fn test_pools_skip_missing_and_degenerate_embeddings() {
        let snapshot = snapshot(RequestPoolSource::Native);
        assert_eq!(snapshot.offering_pool().len(), 1);
        // request 2 has a zero vector
        assert_eq!(snapshot.request_pool().len(), 1);
        assert!(snapshot.contains(EntityId::Offering(OfferingId(2))));
    }

    #[test]
    fn test_synthetic_request_pool() {
        let snapshot = snapshot(RequestPoolSource::Synthetic);
        assert_eq!(snapshot.request_pool().len(), 1);
        assert_eq!(
            snapshot.query_embedding(EntityId::Request(RequestId(1))),
            Some([0.0, 1.0].as_slice())
        );
        assert_eq!(snapshot.query_embedding(EntityId::Request(RequestId(2))), None);
    }

    #[test]
    fn test_find_attendees_by_name() {
        let snapshot = snapshot(RequestPoolSource::Native);
        let found: Vec<AttendeeId> = snapshot
            .find_attendees("ACE hop")
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(found, vec![AttendeeId(1)]);
        assert!(snapshot.find_attendees("  ").is_empty());
        assert!(snapshot.find_attendees("Lovelace").is_empty());
    }

    #[test]
    fn test_enforce_integrity() {
        let snapshot = snapshot(RequestPoolSource::Native);
        let source = EntityId::Offering(OfferingId(1));
        let mut set = MatchSet::ranked(
            source,
            vec![
                (EntityId::Request(RequestId(2)), 0.9),  // same owner
                (EntityId::Request(RequestId(99)), 0.8), // missing
                (EntityId::Offering(OfferingId(2)), 0.7), // same kind
                (EntityId::Request(RequestId(1)), 0.6),
            ],
        );

        assert_eq!(snapshot.enforce_integrity(&mut set), 3);
        assert_eq!(
            set.matches,
            vec![Match {
                source,
                target: EntityId::Request(RequestId(1)),
                similarity_score: 0.6,
                rank: 1,
            }]
        );
    }
}
