//! Prompt threading across deliberation rounds.
//!
//! Round 1 gets the bare question plus an optional stance hint; later
//! rounds carry a structured block of every prior round's responses with
//! author attribution. Very long prior responses are truncated, but the
//! author line and any trailing vote block survive the cut.

use super::types::{RoundResponse, Stance};

const PREVIOUS_RESPONSES_HEADER: &str = "## PREVIOUS RESPONSES";
const MAX_PRIOR_RESPONSE_CHARS: usize = 2000;

const VOTE_INSTRUCTIONS: &str = "\
When you have reached a position, end your response with a vote block:\n\
VOTE: <option>\n\
CONFIDENCE: <0.0-1.0>\n\
RATIONALE: <one line>";

/// Round 1: question + optional stance hint + vote instructions.
pub fn round_one(question: &str, stance: Stance) -> String {
    let mut prompt = format!("## QUESTION\n\n{question}\n");
    if let Some(hint) = stance.hint() {
        prompt.push_str(&format!("\n## YOUR STANCE\n\n{hint}\n"));
    }
    prompt.push_str(&format!("\n{VOTE_INSTRUCTIONS}\n"));
    prompt
}

/// Round n > 1: question + all previous rounds' responses, attributed.
pub fn followup(question: &str, prior_rounds: &[Vec<RoundResponse>], round_num: u32) -> String {
    let mut prompt = format!(
        "## QUESTION\n\n{question}\n\n\
         ## ROUND {round_num}\n\n\
         You have seen every participant's previous responses below. \
         Critique them, update your position where their arguments are \
         stronger, and restate your current position.\n\n\
         {PREVIOUS_RESPONSES_HEADER}\n\n"
    );

    for round in prior_rounds {
        for response in round {
            prompt.push_str(&format!(
                "### {} (stance: {}, round {})\n{}\n\n",
                response.participant,
                response.stance.as_str(),
                response.round,
                truncate_preserving_vote(&response.response, MAX_PRIOR_RESPONSE_CHARS),
            ));
        }
    }

    prompt.push_str(&format!("{VOTE_INSTRUCTIONS}\n"));
    prompt
}

/// Truncate to `max_chars`, re-appending the trailing vote block (if any)
/// so later rounds always see the author's last vote.
fn truncate_preserving_vote(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut: String = text.chars().take(max_chars).collect();
    let vote_block = text
        .rfind("VOTE:")
        .map(|pos| text[pos..].trim().to_string());

    match vote_block {
        Some(block) if !cut.contains(&block) => {
            format!("{}\n[...truncated...]\n{}", cut.trim_end(), block)
        }
        _ => format!("{}\n[...truncated...]", cut.trim_end()),
    }
}
