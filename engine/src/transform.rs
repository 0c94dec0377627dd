//! Restating requests as offerings so both live in one vector space.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use confmatch_embeddings::EmbeddingProvider;
use confmatch_judge::{GenerativeJudge, clean_generated_text};

use crate::error::{EngineError, Result};
use crate::model::SyntheticOffering;

/// Turns a request into the first-person offering that would satisfy it.
#[derive(Clone)]
pub struct SyntheticQueryTransformer {
    judge: Arc<dyn GenerativeJudge>,
}

impl SyntheticQueryTransformer {
    pub fn new(judge: Arc<dyn GenerativeJudge>) -> Self {
        Self { judge }
    }

    /// Restate `request_text` as an offering.
    ///
    /// Never returns empty text: a judge failure or a blank answer is a
    /// [`EngineError::TransformationFailed`].
    pub async fn transform(&self, request_text: &str) -> Result<String> {
        let request_text = request_text.trim();
        if request_text.is_empty() {
            return Err(EngineError::EmptyQuery);
        }

        let raw = self
            .judge
            .transform(request_text)
            .await
            .map_err(|e| EngineError::TransformationFailed(e.to_string()))?;

        let text = clean_generated_text(&raw);
        if text.is_empty() {
            return Err(EngineError::TransformationFailed(format!(
                "{} returned no text",
                self.judge.name()
            )));
        }

        debug!("Synthetic offering: {text}");
        Ok(text)
    }

    /// Transform a request and embed the result.
    pub async fn synthesize(
        &self,
        request_text: &str,
        provider: &dyn EmbeddingProvider,
    ) -> Result<SyntheticOffering> {
        let text = self.transform(request_text).await?;
        let embedding = provider.embed_text(&text).await?;
        Ok(SyntheticOffering {
            text,
            embedding,
            generated_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use confmatch_judge::{JudgeError, QueryType, RerankCandidate};
    use pretty_assertions::assert_eq;

    struct FixedJudge(&'static str);

    #[async_trait]
    impl GenerativeJudge for FixedJudge {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn transform(&self, _request_text: &str) -> confmatch_judge::Result<String> {
            if self.0 == "fail" {
                return Err(JudgeError::ApiRequest("timeout".to_string()));
            }
            Ok(self.0.to_string())
        }

        async fn rerank(
            &self,
            _query_text: &str,
            _query_type: QueryType,
            _candidates: &[RerankCandidate],
            _n: usize,
        ) -> confmatch_judge::Result<Vec<usize>> {
            Ok(Vec::new())
        }
    }

    fn transformer(answer: &'static str) -> SyntheticQueryTransformer {
        SyntheticQueryTransformer::new(Arc::new(FixedJudge(answer)))
    }

    #[tokio::test]
    async fn test_transform_cleans_judge_output() {
        let text = transformer("  \"I can mentor PhD students in AI safety.\"  ")
            .transform("Need AI safety mentorship for a PhD student")
            .await
            .unwrap();
        assert_eq!(text, "I can mentor PhD students in AI safety.");
    }

    #[tokio::test]
    async fn test_empty_request_is_rejected() {
        let err = transformer("anything").transform("   ").await.unwrap_err();
        assert!(matches!(err, EngineError::EmptyQuery));
    }

    #[tokio::test]
    async fn test_judge_failure_and_blank_output_fail_explicitly() {
        let err = transformer("fail").transform("Need help").await.unwrap_err();
        assert!(matches!(err, EngineError::TransformationFailed(_)));

        let err = transformer("``` ```").transform("Need help").await.unwrap_err();
        assert!(matches!(err, EngineError::TransformationFailed(_)));
    }
}
