//! Prompt construction for the generative judge.

use serde::Serialize;

use crate::judge::{QueryType, RerankCandidate};

/// Prompt asking the model to restate a request as a matching offering.
pub fn synthetic_offering_prompt(request_text: &str) -> String {
    format!(
        r#"You help match conference attendees. People describe what they OFFER and what they REQUEST.
Rewrite the REQUEST below as the OFFERING a person who could fulfil it would write about themselves.

REQUEST: "{request_text}"

Rules:
1. Turn the need into a capability: "Need an AI safety mentor" becomes "I can provide AI safety mentorship".
2. Keep every specific from the request: domain, experience level, career stage, location, constraints.
3. Write in the first person with a collaborative tone ("Happy to...", "I can...", "I'm glad to share...").
4. Do not invent credentials the request does not imply.

Examples:
Request: "Seeking a technical cofounder with an AI safety background in San Francisco"
Offering: "I'm a technical person with an AI safety background, open to cofounder conversations for startups in San Francisco."

Request: "Looking for connections to biosecurity policy experts in DC"
Offering: "I can introduce you to biosecurity policy experts in the DC area."

Request: "Want advice on animal welfare career paths as a recent graduate"
Offering: "Happy to talk through animal welfare career paths for recent graduates, including organizations and early-career options."

Return ONLY the offering text (1-3 sentences)."#
    )
}

#[derive(Serialize)]
struct CandidateLine<'a> {
    index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    company: Option<&'a str>,
    text: &'a str,
    similarity_score: f32,
}

fn candidate_block(candidates: &[RerankCandidate]) -> String {
    let lines: Vec<CandidateLine<'_>> = candidates
        .iter()
        .enumerate()
        .map(|(index, c)| CandidateLine {
            index,
            name: c.name.as_deref(),
            company: c.company.as_deref(),
            text: &c.text,
            similarity_score: (c.similarity_score * 1000.0).round() / 1000.0,
        })
        .collect();
    serde_json::to_string_pretty(&lines).unwrap_or_default()
}

/// Prompt asking the model to select the best `n` candidates for a query.
pub fn rerank_prompt(
    query_text: &str,
    query_type: QueryType,
    candidates: &[RerankCandidate],
    n: usize,
) -> String {
    let total = candidates.len();
    let (header, criteria, examples) = match query_type {
        QueryType::Request => (
            format!(
                "Someone needs help with this:\n\nREQUEST: \"{query_text}\"\n\nBelow are {total} offerings from potential helpers, ranked by semantic similarity."
            ),
            "1. Direct relevance (most important): does the offering actually address the request?\n\
             2. Expertise level: does the helper's experience fit what is needed?\n\
             3. Specificity: concrete capability beats a vague offer.\n\
             4. Context: domain, career stage and geography line up.",
            "Request: \"Seeking AI safety research mentorship for a PhD student\"\n\
             GOOD: \"AI safety research mentorship, 10 years at a leading lab\"\n\
             POOR: \"General career mentorship\" (too vague)\n\
             POOR: \"Also looking for an AI safety mentor\" (same need, not a helper)",
        ),
        QueryType::Offering => (
            format!(
                "Someone can provide this:\n\nOFFERING: \"{query_text}\"\n\nBelow are {total} requests from people who might need it, ranked by semantic similarity."
            ),
            "1. Need alignment (most important): does the request actually need this offering?\n\
             2. Scope: is the offering's level right for the request?\n\
             3. Context: domain, career stage and specifics line up.\n\
             4. Mutual benefit: would the connection be valuable for both people?",
            "Offering: \"Connections to biosecurity policy experts in DC\"\n\
             GOOD: \"Need introductions to the DC biosecurity policy community for a new role\"\n\
             POOR: \"Interested in biosecurity\" (no clear need)\n\
             POOR: \"Looking for technical collaborators in biosecurity\" (wrong kind of connection)",
        ),
    };

    format!(
        "You are matching conference attendees. {header}\n\n\
         Select at most {n} candidates that are SUBSTANTIVELY good matches, not merely on the same topic.\n\n\
         Criteria:\n{criteria}\n\n\
         Examples:\n{examples}\n\n\
         Drop candidates that do not truly help. Rank best first.\n\n\
         CANDIDATES:\n{candidates}\n\n\
         Return ONLY a JSON array of candidate indices, best first, for example [4, 0, 12].\n\
         No markdown, no explanation.",
        candidates = candidate_block(candidates),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_prompt_embeds_request() {
        let prompt = synthetic_offering_prompt("Need AI safety mentorship for a PhD student");
        assert!(prompt.contains("REQUEST: \"Need AI safety mentorship for a PhD student\""));
    }

    #[test]
    fn test_rerank_prompt_differs_by_query_type() {
        let candidates = vec![
            RerankCandidate::new("AI safety mentorship", 0.91234),
            RerankCandidate::new("Biosecurity policy connections", 0.4),
        ];

        let request = rerank_prompt("Need a mentor", QueryType::Request, &candidates, 1);
        let offering = rerank_prompt("I mentor", QueryType::Offering, &candidates, 1);

        assert!(request.contains("REQUEST: \"Need a mentor\""));
        assert!(offering.contains("OFFERING: \"I mentor\""));
        assert!(request.contains("\"index\": 1"));
        assert!(request.contains("0.912"));
        assert!(request.contains("at most 1 candidates"));
        assert!(!request.contains("\"name\""));
    }

    #[test]
    fn test_rerank_prompt_names_candidate_owners() {
        let candidates = vec![
            RerankCandidate::new("AI safety mentorship", 0.9)
                .with_owner("Ada Lovelace", Some("Analytical Engines".to_string())),
            RerankCandidate::new("Seed funding", 0.5).with_owner("Grace Hopper", None),
        ];

        let prompt = rerank_prompt("Need a mentor", QueryType::Request, &candidates, 2);

        assert!(prompt.contains("\"name\": \"Ada Lovelace\""));
        assert!(prompt.contains("\"company\": \"Analytical Engines\""));
        assert!(prompt.contains("\"name\": \"Grace Hopper\""));
        assert_eq!(prompt.matches("\"company\"").count(), 1);
    }
}
