//! Corpus data model: attendees, their statements, and ranked matches.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use confmatch_embeddings::Embedding;
use confmatch_judge::QueryType;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

id_newtype!(
    /// Identifier of a conference attendee.
    AttendeeId
);
id_newtype!(
    /// Identifier of an offering statement.
    OfferingId
);
id_newtype!(
    /// Identifier of a request statement.
    RequestId
);

/// Reference to either kind of matchable statement.
///
/// The textual form is `offering:<id>` or `request:<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityId {
    Offering(OfferingId),
    Request(RequestId),
}

impl EntityId {
    /// The statement kind, expressed as the query type it acts as.
    pub fn kind(self) -> QueryType {
        match self {
            EntityId::Offering(_) => QueryType::Offering,
            EntityId::Request(_) => QueryType::Request,
        }
    }

    /// File-system friendly form, e.g. `offering-12`.
    pub fn file_stem(self) -> String {
        match self {
            EntityId::Offering(id) => format!("offering-{id}"),
            EntityId::Request(id) => format!("request-{id}"),
        }
    }
}

impl From<OfferingId> for EntityId {
    fn from(id: OfferingId) -> Self {
        EntityId::Offering(id)
    }
}

impl From<RequestId> for EntityId {
    fn from(id: RequestId) -> Self {
        EntityId::Request(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Offering(id) => write!(f, "offering:{id}"),
            EntityId::Request(id) => write!(f, "request:{id}"),
        }
    }
}

impl FromStr for EntityId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .trim()
            .split_once([':', '-'])
            .ok_or_else(|| format!("expected offering:<id> or request:<id>, got {s:?}"))?;
        let id: u64 = id
            .parse()
            .map_err(|e| format!("invalid id in {s:?}: {e}"))?;
        match kind.parse::<QueryType>()? {
            QueryType::Offering => Ok(EntityId::Offering(OfferingId(id))),
            QueryType::Request => Ok(EntityId::Request(RequestId(id))),
        }
    }
}

/// A conference attendee. Only ownership and name lookup use these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    pub id: AttendeeId,

    pub first_name: String,

    pub last_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    /// Profile links (LinkedIn, personal site, ...).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
}

impl Attendee {
    pub fn new(id: AttendeeId, first_name: &str, last_name: &str) -> Self {
        Self {
            id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            company: None,
            job_title: None,
            country: None,
            links: Vec::new(),
        }
    }

    /// `"first last"`, trimmed.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }
}

/// A capability statement: something an attendee can provide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Offering {
    pub id: OfferingId,

    /// Owning attendee.
    pub attendee_id: AttendeeId,

    pub text: String,

    /// Unit-length embedding of `text`, once computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,
}

impl Offering {
    pub fn new(id: OfferingId, attendee_id: AttendeeId, text: impl Into<String>) -> Self {
        Self {
            id,
            attendee_id,
            text: text.into(),
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn entity_id(&self) -> EntityId {
        EntityId::Offering(self.id)
    }
}

/// A need statement: something an attendee is looking for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,

    /// Owning attendee.
    pub attendee_id: AttendeeId,

    pub text: String,

    /// Unit-length embedding of `text`, once computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Embedding>,

    /// Capability-phrased restatement. Its presence marks the request as
    /// processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthetic_offering: Option<SyntheticOffering>,
}

impl Request {
    pub fn new(id: RequestId, attendee_id: AttendeeId, text: impl Into<String>) -> Self {
        Self {
            id,
            attendee_id,
            text: text.into(),
            embedding: None,
            synthetic_offering: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_synthetic_offering(mut self, synthetic: SyntheticOffering) -> Self {
        self.synthetic_offering = Some(synthetic);
        self
    }

    pub fn entity_id(&self) -> EntityId {
        EntityId::Request(self.id)
    }

    pub fn has_synthetic(&self) -> bool {
        self.synthetic_offering.is_some()
    }
}

/// A request restated as the offering that would fulfil it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticOffering {
    pub text: String,

    /// Unit-length embedding of `text`.
    pub embedding: Embedding,

    pub generated_at: DateTime<Utc>,
}

/// Direction of a match set, fixed by the kind of its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchDirection {
    /// Who can help a request.
    RequestToOffering,
    /// Whom an offering can help.
    OfferingToRequest,
}

impl MatchDirection {
    pub fn from_source(source: EntityId) -> Self {
        match source {
            EntityId::Request(_) => MatchDirection::RequestToOffering,
            EntityId::Offering(_) => MatchDirection::OfferingToRequest,
        }
    }
}

/// A directed, ranked edge from one statement to a statement of the
/// opposite kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub source: EntityId,

    pub target: EntityId,

    /// Cosine similarity in `[-1, 1]`.
    pub similarity_score: f32,

    /// 1-based position within the match set.
    pub rank: u32,
}

/// All matches for one source, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSet {
    pub source: EntityId,

    pub direction: MatchDirection,

    pub matches: Vec<Match>,

    pub computed_at: DateTime<Utc>,
}

impl MatchSet {
    /// Build a match set from `(target, score)` pairs already in rank order.
    pub fn ranked(source: EntityId, targets: impl IntoIterator<Item = (EntityId, f32)>) -> Self {
        let matches = targets
            .into_iter()
            .zip(1u32..)
            .map(|((target, similarity_score), rank)| Match {
                source,
                target,
                similarity_score,
                rank,
            })
            .collect();
        Self {
            source,
            direction: MatchDirection::from_source(source),
            matches,
            computed_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// `(target, score)` pairs in rank order, without timestamps.
    pub fn targets(&self) -> Vec<(EntityId, f32)> {
        self.matches
            .iter()
            .map(|m| (m.target, m.similarity_score))
            .collect()
    }
}
