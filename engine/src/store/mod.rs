//! Corpus persistence.
//!
//! The engine reads attendees and their statements through [`CorpusStore`]
//! and writes back only derived data: embeddings, synthetic offerings and
//! match sets. Bulk writes validate every record before applying any, and a
//! batch that cannot be persisted leaves the store unchanged.

mod json;
mod memory;

pub use json::JsonCorpusStore;
pub use memory::MemoryCorpus;

use async_trait::async_trait;
use indexmap::IndexMap;

use confmatch_embeddings::Embedding;

use crate::error::{StoreError, StoreResult};
use crate::model::{
    Attendee, AttendeeId, EntityId, MatchSet, Offering, OfferingId, Request, RequestId,
    SyntheticOffering,
};

/// Storage backend for the matching corpus.
#[async_trait]
pub trait CorpusStore: Send + Sync {
    /// All attendees, in store order.
    async fn attendees(&self) -> StoreResult<Vec<Attendee>>;

    /// All offerings, in store order.
    async fn offerings(&self) -> StoreResult<Vec<Offering>>;

    /// All requests, in store order.
    async fn requests(&self) -> StoreResult<Vec<Request>>;

    /// Set the native embedding of offerings and requests.
    async fn save_embeddings(&self, updates: Vec<(EntityId, Embedding)>) -> StoreResult<()>;

    /// Attach synthetic offerings (text and embedding together) to requests.
    ///
    /// A request reports [`Request::has_synthetic`] only once its batch is
    /// durably stored.
    async fn save_synthetic_offerings(
        &self,
        updates: Vec<(RequestId, SyntheticOffering)>,
    ) -> StoreResult<()>;

    /// Insert or replace match sets, one per source.
    ///
    /// On error no set of the batch is visible, in memory or on disk.
    async fn save_match_sets(&self, sets: Vec<MatchSet>) -> StoreResult<()>;

    /// The persisted match set for a source, if any.
    async fn match_set(&self, source: EntityId) -> StoreResult<Option<MatchSet>>;

    /// Sources that currently have a persisted match set.
    async fn match_set_sources(&self) -> StoreResult<Vec<EntityId>>;

    /// Delete every match set. Returns how many were removed.
    async fn clear_match_sets(&self) -> StoreResult<usize>;
}

/// In-memory tables shared by the store implementations.
#[derive(Debug, Default)]
pub(crate) struct CorpusTables {
    pub attendees: IndexMap<AttendeeId, Attendee>,
    pub offerings: IndexMap<OfferingId, Offering>,
    pub requests: IndexMap<RequestId, Request>,
    pub match_sets: IndexMap<EntityId, MatchSet>,
}

/// Which tables a write touched.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Touched {
    pub offerings: bool,
    pub requests: bool,
}

impl CorpusTables {
    pub fn new(attendees: Vec<Attendee>, offerings: Vec<Offering>, requests: Vec<Request>) -> Self {
        Self {
            attendees: attendees.into_iter().map(|a| (a.id, a)).collect(),
            offerings: offerings.into_iter().map(|o| (o.id, o)).collect(),
            requests: requests.into_iter().map(|r| (r.id, r)).collect(),
            match_sets: IndexMap::new(),
        }
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        match entity {
            EntityId::Offering(id) => self.offerings.contains_key(&id),
            EntityId::Request(id) => self.requests.contains_key(&id),
        }
    }

    fn ensure(&self, entity: EntityId) -> StoreResult<()> {
        if self.contains(entity) {
            Ok(())
        } else {
            Err(StoreError::UnknownEntity(entity))
        }
    }

    /// A copy of the statement tables to apply a write to before committing it.
    pub fn statements(&self) -> CorpusTables {
        CorpusTables {
            offerings: self.offerings.clone(),
            requests: self.requests.clone(),
            ..CorpusTables::default()
        }
    }

    pub fn apply_embeddings(
        &mut self,
        updates: Vec<(EntityId, Embedding)>,
    ) -> StoreResult<Touched> {
        for (entity, _) in &updates {
            self.ensure(*entity)?;
        }

        let mut touched = Touched::default();
        for (entity, embedding) in updates {
            match entity {
                EntityId::Offering(id) => {
                    if let Some(offering) = self.offerings.get_mut(&id) {
                        offering.embedding = Some(embedding);
                        touched.offerings = true;
                    }
                }
                EntityId::Request(id) => {
                    if let Some(request) = self.requests.get_mut(&id) {
                        request.embedding = Some(embedding);
                        touched.requests = true;
                    }
                }
            }
        }
        Ok(touched)
    }

    pub fn apply_synthetic(
        &mut self,
        updates: Vec<(RequestId, SyntheticOffering)>,
    ) -> StoreResult<()> {
        for (id, _) in &updates {
            self.ensure(EntityId::Request(*id))?;
        }
        for (id, synthetic) in updates {
            if let Some(request) = self.requests.get_mut(&id) {
                request.synthetic_offering = Some(synthetic);
            }
        }
        Ok(())
    }

    pub fn check_match_sets(&self, sets: &[MatchSet]) -> StoreResult<()> {
        for set in sets {
            self.ensure(set.source)?;
        }
        Ok(())
    }
}
