//! In-memory corpus store.

use async_trait::async_trait;
use tokio::sync::RwLock;

use confmatch_embeddings::Embedding;

use super::{CorpusStore, CorpusTables};
use crate::error::StoreResult;
use crate::model::{Attendee, EntityId, MatchSet, Offering, Request, RequestId, SyntheticOffering};

/// A [`CorpusStore`] that keeps everything in memory.
///
/// Useful for tests and for callers that load the corpus themselves.
#[derive(Debug, Default)]
pub struct MemoryCorpus {
    tables: RwLock<CorpusTables>,
}

impl MemoryCorpus {
    /// Create a store holding the given corpus.
    pub fn new(attendees: Vec<Attendee>, offerings: Vec<Offering>, requests: Vec<Request>) -> Self {
        Self {
            tables: RwLock::new(CorpusTables::new(attendees, offerings, requests)),
        }
    }

    /// Add an attendee.
    pub fn with_attendee(mut self, attendee: Attendee) -> Self {
        self.tables.get_mut().attendees.insert(attendee.id, attendee);
        self
    }

    /// Add an offering.
    pub fn with_offering(mut self, offering: Offering) -> Self {
        self.tables.get_mut().offerings.insert(offering.id, offering);
        self
    }

    /// Add a request.
    pub fn with_request(mut self, request: Request) -> Self {
        self.tables.get_mut().requests.insert(request.id, request);
        self
    }
}

#[async_trait]
impl CorpusStore for MemoryCorpus {
    async fn attendees(&self) -> StoreResult<Vec<Attendee>> {
        Ok(self.tables.read().await.attendees.values().cloned().collect())
    }

    async fn offerings(&self) -> StoreResult<Vec<Offering>> {
        Ok(self.tables.read().await.offerings.values().cloned().collect())
    }

    async fn requests(&self) -> StoreResult<Vec<Request>> {
        Ok(self.tables.read().await.requests.values().cloned().collect())
    }

    async fn save_embeddings(&self, updates: Vec<(EntityId, Embedding)>) -> StoreResult<()> {
        self.tables.write().await.apply_embeddings(updates)?;
        Ok(())
    }

    async fn save_synthetic_offerings(
        &self,
        updates: Vec<(RequestId, SyntheticOffering)>,
    ) -> StoreResult<()> {
        self.tables.write().await.apply_synthetic(updates)
    }

    async fn save_match_sets(&self, sets: Vec<MatchSet>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check_match_sets(&sets)?;
        for set in sets {
            tables.match_sets.insert(set.source, set);
        }
        Ok(())
    }

    async fn match_set(&self, source: EntityId) -> StoreResult<Option<MatchSet>> {
        Ok(self.tables.read().await.match_sets.get(&source).cloned())
    }

    async fn match_set_sources(&self) -> StoreResult<Vec<EntityId>> {
        Ok(self.tables.read().await.match_sets.keys().copied().collect())
    }

    async fn clear_match_sets(&self) -> StoreResult<usize> {
        let mut tables = self.tables.write().await;
        let removed = tables.match_sets.len();
        tables.match_sets.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{AttendeeId, OfferingId};
    use pretty_assertions::assert_eq;

    fn corpus() -> MemoryCorpus {
        MemoryCorpus::default()
            .with_attendee(Attendee::new(AttendeeId(1), "Ada", "Lovelace"))
            .with_offering(Offering::new(OfferingId(10), AttendeeId(1), "Compiler mentoring"))
            .with_request(Request::new(RequestId(20), AttendeeId(1), "Need a cofounder"))
    }

    #[tokio::test]
    async fn test_save_embeddings_updates_entities() {
        let store = corpus();
        store
            .save_embeddings(vec![(EntityId::Offering(OfferingId(10)), vec![1.0, 0.0])])
            .await
            .unwrap();

        let offerings = store.offerings().await.unwrap();
        assert_eq!(offerings[0].embedding, Some(vec![1.0, 0.0]));
    }

    #[tokio::test]
    async fn test_unknown_entity_rejects_whole_batch() {
        let store = corpus();
        let err = store
            .save_embeddings(vec![
                (EntityId::Offering(OfferingId(10)), vec![1.0, 0.0]),
                (EntityId::Offering(OfferingId(99)), vec![0.0, 1.0]),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::UnknownEntity(_)));
        assert!(store.offerings().await.unwrap()[0].embedding.is_none());
    }

    #[tokio::test]
    async fn test_match_sets_replace_and_clear() {
        let store = corpus();
        let source = EntityId::Request(RequestId(20));

        store
            .save_match_sets(vec![MatchSet::ranked(source, vec![])])
            .await
            .unwrap();
        store
            .save_match_sets(vec![MatchSet::ranked(
                source,
                vec![(EntityId::Offering(OfferingId(10)), 0.5)],
            )])
            .await
            .unwrap();

        assert_eq!(store.match_set_sources().await.unwrap(), vec![source]);
        assert_eq!(store.match_set(source).await.unwrap().unwrap().len(), 1);
        assert_eq!(store.clear_match_sets().await.unwrap(), 1);
        assert!(store.match_set(source).await.unwrap().is_none());
    }
}
