//! # Judge
//!
//! The generative judgment service consumed by the matching engine. It
//! exposes two capabilities behind [`GenerativeJudge`]:
//!
//! - **transform**: restate a request as the offering that would satisfy it
//! - **rerank**: pick and order the substantively relevant candidates from a
//!   similarity shortlist
//!
//! [`GeminiJudge`] implements both against the Gemini `generateContent` API.
//! Prompt construction and output parsing live in [`prompts`] and [`parse`]
//! so they can be reused by other providers.

pub mod error;
pub mod gemini;
pub mod judge;
pub mod parse;
pub mod prompts;

pub use error::{JudgeError, Result};
pub use gemini::GeminiJudge;
pub use judge::{GenerativeJudge, QueryType, RerankCandidate};
pub use parse::{clean_generated_text, parse_index_list};
