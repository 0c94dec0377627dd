//! End-to-end behavior of the retrieval building blocks: coarse ordering,
//! synthetic queries, re-rank validation and fallback, owner exclusion.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use confmatch_engine::{
    AttendeeId, CandidatePool, CoarseRetriever, EntityId, FineReranker, MatchingEngine,
    OfferingId, QueryType, SyntheticQueryTransformer,
};
use confmatch_judge::RerankCandidate;
use pretty_assertions::assert_eq;

use common::{
    KeywordProvider, MockJudge, RerankBehavior, conference, keyword_embedding, test_config,
};

const MENTORSHIP: &str = "AI safety mentorship, 10 yrs at a lab";
const BIOSECURITY: &str = "Biosecurity policy connections in DC";

fn two_offerings() -> CandidatePool {
    let mut pool = CandidatePool::new(QueryType::Offering, common::TOPICS.len() + 1);
    pool.insert(
        EntityId::Offering(OfferingId(1)),
        AttendeeId(1),
        keyword_embedding(MENTORSHIP),
    )
    .unwrap();
    pool.insert(
        EntityId::Offering(OfferingId(2)),
        AttendeeId(2),
        keyword_embedding(BIOSECURITY),
    )
    .unwrap();
    pool
}

#[test]
fn test_coarse_retrieval_ranks_closest_first() {
    let query = keyword_embedding("looking for an AI safety mentor");
    let results = CoarseRetriever::new(2)
        .retrieve(&query, &two_offerings(), None)
        .unwrap();

    let ids: Vec<EntityId> = results.iter().map(|c| c.entity).collect();
    assert_eq!(
        ids,
        vec![
            EntityId::Offering(OfferingId(1)),
            EntityId::Offering(OfferingId(2))
        ]
    );
    assert!(results[0].similarity_score > results[1].similarity_score);
}

#[tokio::test]
async fn test_synthetic_query_finds_the_matching_offering() {
    let judge = Arc::new(MockJudge::new(RerankBehavior::Reverse));
    let provider = KeywordProvider::default();
    let transformer = SyntheticQueryTransformer::new(judge);

    let synthetic = transformer
        .synthesize("Need AI safety mentorship for a PhD student", &provider)
        .await
        .unwrap();
    assert!(synthetic.text.contains("AI safety"));
    assert!(synthetic.text.contains("mentorship"));
    assert_eq!(provider.calls(), 1);

    let results = CoarseRetriever::new(2)
        .retrieve(&synthetic.embedding, &two_offerings(), None)
        .unwrap();
    assert_eq!(results[0].entity, EntityId::Offering(OfferingId(1)));
}

fn fifty_candidates() -> Vec<RerankCandidate> {
    (0..50)
        .map(|i| RerankCandidate::new(format!("offering {i}"), 0.9 - i as f32 * 0.01))
        .collect()
}

#[tokio::test]
async fn test_rerank_returns_n_unique_in_range_indices() {
    let mut answer: Vec<usize> = (0..50).rev().collect();
    // repeated and out-of-range answers are dropped
    answer.insert(3, 49);
    answer.insert(0, 77);
    let judge = Arc::new(MockJudge::new(RerankBehavior::Fixed(answer)));

    let result = FineReranker::new(judge, 25)
        .rerank("Need a mentor", QueryType::Request, &fifty_candidates())
        .await;

    assert_eq!(result.indices.len(), 25);
    assert!(result.indices.iter().all(|&i| i < 50));
    let unique: HashSet<usize> = result.indices.iter().copied().collect();
    assert_eq!(unique.len(), 25);
    assert_eq!(result.indices[0], 49);
    assert!(!result.fallback);
}

#[tokio::test]
async fn test_judge_failure_returns_coarse_top_n() {
    let judge = Arc::new(MockJudge::new(RerankBehavior::Fail));
    let candidates = fifty_candidates();

    let result = FineReranker::new(judge, 25)
        .rerank("Need a mentor", QueryType::Request, &candidates)
        .await;

    assert!(result.fallback);
    assert_eq!(result.indices, (0..25).collect::<Vec<usize>>());
}

#[tokio::test]
async fn test_offering_query_never_returns_own_requests() {
    let judge = Arc::new(MockJudge::new(RerankBehavior::Reverse));
    let engine = MatchingEngine::new(
        test_config(),
        Arc::new(conference()),
        Arc::new(KeywordProvider::default()),
        judge,
    )
    .await
    .unwrap();

    // Ada owns offering 1 and request 1.
    let results = engine
        .retrieve_and_rerank(MENTORSHIP, QueryType::Offering, Some(AttendeeId(1)))
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|m| m.owner != AttendeeId(1)));
    assert!(results.iter().all(|m| matches!(m.target, EntityId::Request(_))));
    let ranks: Vec<u32> = results.iter().map(|m| m.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
}
