//! The judgment capability consumed by the matching engine.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What kind of statement a query is.
///
/// An `Offering` query looks for requests it can fulfil; a `Request` query
/// looks for offerings that fulfil it. The judge uses different evaluation
/// criteria for each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Offering,
    Request,
}

impl QueryType {
    /// The statement kind a query of this type is matched against.
    pub fn counterpart(self) -> Self {
        match self {
            QueryType::Offering => QueryType::Request,
            QueryType::Request => QueryType::Offering,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Offering => "offering",
            QueryType::Request => "request",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "offering" | "offer" => Ok(QueryType::Offering),
            "request" | "need" => Ok(QueryType::Request),
            other => Err(format!("unknown query type: {other}")),
        }
    }
}

/// One shortlisted candidate shown to the judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankCandidate {
    /// Statement text of the candidate.
    pub text: String,

    /// Cosine similarity from coarse retrieval.
    pub similarity_score: f32,

    /// Full name of the attendee who wrote the statement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
}

impl RerankCandidate {
    pub fn new(text: impl Into<String>, similarity_score: f32) -> Self {
        Self {
            text: text.into(),
            similarity_score,
            name: None,
            company: None,
        }
    }

    /// Attach who wrote the statement, so the judge can weigh the person too.
    pub fn with_owner(mut self, name: impl Into<String>, company: Option<String>) -> Self {
        self.name = Some(name.into());
        self.company = company;
        self
    }
}

/// A generative model used for qualitative judgments.
#[async_trait]
pub trait GenerativeJudge: Send + Sync {
    /// Name of this judge, for logging.
    fn name(&self) -> &str;

    /// Restate a request as the first-person offering that would satisfy it.
    ///
    /// Implementations must never return empty text on success.
    async fn transform(&self, request_text: &str) -> Result<String>;

    /// Select and order at most `n` candidates by substantive relevance.
    ///
    /// Returns indices into `candidates`, best first. Callers validate the
    /// indices; implementations only need to return what the model said.
    async fn rerank(
        &self,
        query_text: &str,
        query_type: QueryType,
        candidates: &[RerankCandidate],
        n: usize,
    ) -> Result<Vec<usize>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_type_round_trip() {
        assert_eq!("Offering".parse::<QueryType>(), Ok(QueryType::Offering));
        assert_eq!("need".parse::<QueryType>(), Ok(QueryType::Request));
        assert!("mentor".parse::<QueryType>().is_err());
        assert_eq!(QueryType::Request.to_string(), "request");
        assert_eq!(QueryType::Request.counterpart(), QueryType::Offering);
    }

    #[test]
    fn test_query_type_serde() {
        let json = serde_json::to_string(&QueryType::Offering).unwrap();
        assert_eq!(json, "\"offering\"");
    }
}
