//! Vote parsing and aggregation.
//!
//! Two accepted syntaxes: a line block
//! (`VOTE: ...` / `CONFIDENCE: ...` / `RATIONALE: ...`) and a fenced JSON
//! object with `vote`/`confidence`/`rationale` keys. The last well-formed
//! occurrence in a response wins; malformed blocks are silently ignored.

use super::types::{OptionTally, RoundResponse, Summary, Vote, VotingResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static LINE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*VOTE:[ \t]*(?P<option>\S[^\r\n]*)\r?\n[ \t]*CONFIDENCE:[ \t]*(?P<confidence>[^\r\n]+)\r?\n[ \t]*RATIONALE:[ \t]*(?P<rationale>[^\r\n]*)",
    )
    .expect("valid vote block pattern")
});

static JSON_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"```(?:json)?\s*(?P<body>\{[^`]*\})\s*```").expect("valid fence pattern")
});

/// Extract the last well-formed vote block from a response, or None.
pub fn parse_vote(response: &str) -> Option<Vote> {
    let mut best: Option<(usize, Vote)> = None;

    for caps in LINE_BLOCK.captures_iter(response) {
        let pos = caps.get(0).expect("match").start();
        let confidence: f64 = match caps["confidence"].trim().parse() {
            Ok(c) => c,
            // Malformed confidence: the whole block is rejected
            Err(_) => continue,
        };
        let vote = Vote {
            option: caps["option"].trim().to_string(),
            confidence: clamp_confidence(confidence),
            rationale: caps["rationale"].trim().to_string(),
        };
        if vote.option.is_empty() {
            continue;
        }
        if best.as_ref().map(|(p, _)| pos >= *p).unwrap_or(true) {
            best = Some((pos, vote));
        }
    }

    for caps in JSON_FENCE.captures_iter(response) {
        let pos = caps.get(0).expect("match").start();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&caps["body"]) else {
            continue;
        };
        let Some(option) = value.get("vote").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(confidence) = value.get("confidence").and_then(|v| v.as_f64()) else {
            continue;
        };
        let option = option.trim().to_string();
        if option.is_empty() {
            continue;
        }
        let vote = Vote {
            option,
            confidence: clamp_confidence(confidence),
            rationale: value
                .get("rationale")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim()
                .to_string(),
        };
        if best.as_ref().map(|(p, _)| pos >= *p).unwrap_or(true) {
            best = Some((pos, vote));
        }
    }

    best.map(|(_, vote)| vote)
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Tally the final round's votes, confidence-weighted. Winner is the option
/// with the highest confidence sum; ties break on raw count, then on the
/// most recent vote timestamp. None when nobody voted.
pub fn aggregate_votes(final_round: &[RoundResponse]) -> Option<VotingResult> {
    let mut tally: BTreeMap<String, OptionTally> = BTreeMap::new();
    let mut latest: BTreeMap<String, chrono::DateTime<chrono::Utc>> = BTreeMap::new();
    let mut total_votes = 0u32;

    for response in final_round {
        let Some(vote) = &response.vote else { continue };
        total_votes += 1;
        let entry = tally.entry(vote.option.clone()).or_insert(OptionTally {
            weight: 0.0,
            count: 0,
        });
        entry.weight += vote.confidence;
        entry.count += 1;
        let ts = latest.entry(vote.option.clone()).or_insert(response.timestamp);
        if response.timestamp > *ts {
            *ts = response.timestamp;
        }
    }

    if total_votes == 0 {
        return None;
    }

    let winner = tally
        .iter()
        .max_by(|(a_opt, a), (b_opt, b)| {
            a.weight
                .partial_cmp(&b.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.count.cmp(&b.count))
                .then(latest[a_opt.as_str()].cmp(&latest[b_opt.as_str()]))
        })
        .map(|(option, _)| option.clone())
        .expect("non-empty tally");

    Some(VotingResult {
        winner,
        tally,
        total_votes,
    })
}

const MAX_SUMMARY_ITEM_CHARS: usize = 200;

/// Deterministic summary from the final round + voting result.
pub fn build_summary(
    final_round: &[RoundResponse],
    voting: Option<&VotingResult>,
) -> Summary {
    let mut key_agreements = Vec::new();
    let mut key_disagreements = Vec::new();

    if let Some(voting) = voting {
        for response in final_round {
            let Some(vote) = &response.vote else { continue };
            let line = format!(
                "{}: {} (confidence {:.2}) — {}",
                response.participant,
                vote.option,
                vote.confidence,
                truncate(&vote.rationale, MAX_SUMMARY_ITEM_CHARS),
            );
            if vote.option == voting.winner {
                key_agreements.push(line);
            } else {
                key_disagreements.push(line);
            }
        }

        let winner_tally = &voting.tally[&voting.winner];
        let consensus = format!(
            "'{}' selected with {}/{} votes (weighted {:.2})",
            voting.winner, winner_tally.count, voting.total_votes, winner_tally.weight,
        );
        let final_recommendation = voting.winner.clone();

        return Summary {
            consensus,
            key_agreements,
            key_disagreements,
            final_recommendation,
        };
    }

    // No votes cast: summarise positions without declaring a winner
    for response in final_round.iter().filter(|r| !r.is_error()) {
        key_disagreements.push(format!(
            "{}: {}",
            response.participant,
            truncate(&response.response, MAX_SUMMARY_ITEM_CHARS),
        ));
    }

    Summary {
        consensus: "No consensus reached — no votes were cast".to_string(),
        key_agreements,
        key_disagreements,
        final_recommendation: "Further deliberation required".to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::Stance;
    use chrono::{TimeZone, Utc};

    fn response_with_vote(
        participant: &str,
        vote: Option<Vote>,
        ts_secs: i64,
    ) -> RoundResponse {
        RoundResponse {
            round: 2,
            participant: participant.to_string(),
            stance: Stance::Neutral,
            response: "position text".to_string(),
            timestamp: Utc.timestamp_opt(ts_secs, 0).single().expect("valid ts"),
            vote,
            token_usage: None,
        }
    }

    #[test]
    fn test_parse_line_block() {
        let vote = parse_vote(
            "I think we should.\nVOTE: yes\nCONFIDENCE: 0.8\nRATIONALE: strong typing helps",
        )
        .expect("parses");
        assert_eq!(vote.option, "yes");
        assert!((vote.confidence - 0.8).abs() < 1e-9);
        assert_eq!(vote.rationale, "strong typing helps");
    }

    #[test]
    fn test_parse_json_fence() {
        let vote = parse_vote(
            "Position...\n```json\n{\"vote\": \"no\", \"confidence\": 0.6, \"rationale\": \"risk\"}\n```",
        )
        .expect("parses");
        assert_eq!(vote.option, "no");
        assert!((vote.confidence - 0.6).abs() < 1e-9);
        assert_eq!(vote.rationale, "risk");
    }

    #[test]
    fn test_last_block_wins() {
        let text = "VOTE: maybe\nCONFIDENCE: 0.5\nRATIONALE: early thought\n\
                    ...more deliberation...\n\
                    VOTE: yes\nCONFIDENCE: 0.9\nRATIONALE: convinced now";
        let vote = parse_vote(text).expect("parses");
        assert_eq!(vote.option, "yes");
        assert!((vote.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_last_block_wins_across_syntaxes() {
        let text = "VOTE: early\nCONFIDENCE: 0.4\nRATIONALE: first\n\
                    later on:\n```json\n{\"vote\": \"late\", \"confidence\": 0.7}\n```";
        let vote = parse_vote(text).expect("parses");
        assert_eq!(vote.option, "late");
    }

    #[test]
    fn test_confidence_clamped() {
        let vote = parse_vote("VOTE: yes\nCONFIDENCE: 1.7\nRATIONALE: sure").expect("parses");
        assert_eq!(vote.confidence, 1.0);
        let vote = parse_vote("VOTE: yes\nCONFIDENCE: -0.3\nRATIONALE: sure").expect("parses");
        assert_eq!(vote.confidence, 0.0);
    }

    #[test]
    fn test_malformed_confidence_rejects_block() {
        assert!(parse_vote("VOTE: yes\nCONFIDENCE: very high\nRATIONALE: x").is_none());
    }

    #[test]
    fn test_no_block_is_none() {
        assert!(parse_vote("just free text with no vote at all").is_none());
        assert!(parse_vote("").is_none());
    }

    #[test]
    fn test_malformed_then_valid_takes_valid() {
        let text = "VOTE: a\nCONFIDENCE: nope\nRATIONALE: bad\n\
                    VOTE: b\nCONFIDENCE: 0.5\nRATIONALE: good";
        let vote = parse_vote(text).expect("parses");
        assert_eq!(vote.option, "b");
    }

    #[test]
    fn test_aggregate_weighted_winner() {
        let votes = vec![
            response_with_vote(
                "a@x",
                Some(Vote {
                    option: "yes".into(),
                    confidence: 0.9,
                    rationale: "".into(),
                }),
                100,
            ),
            response_with_vote(
                "b@y",
                Some(Vote {
                    option: "no".into(),
                    confidence: 0.5,
                    rationale: "".into(),
                }),
                101,
            ),
            response_with_vote(
                "c@z",
                Some(Vote {
                    option: "yes".into(),
                    confidence: 0.4,
                    rationale: "".into(),
                }),
                102,
            ),
        ];
        let result = aggregate_votes(&votes).expect("has votes");
        assert_eq!(result.winner, "yes");
        assert_eq!(result.total_votes, 3);
        assert_eq!(result.tally["yes"].count, 2);
        assert!((result.tally["yes"].weight - 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_tie_breaks_on_count() {
        // Equal weight 0.8: "yes" has 2 votes, "no" has 1
        let votes = vec![
            response_with_vote(
                "a@x",
                Some(Vote {
                    option: "yes".into(),
                    confidence: 0.4,
                    rationale: "".into(),
                }),
                100,
            ),
            response_with_vote(
                "b@y",
                Some(Vote {
                    option: "yes".into(),
                    confidence: 0.4,
                    rationale: "".into(),
                }),
                101,
            ),
            response_with_vote(
                "c@z",
                Some(Vote {
                    option: "no".into(),
                    confidence: 0.8,
                    rationale: "".into(),
                }),
                102,
            ),
        ];
        let result = aggregate_votes(&votes).expect("has votes");
        assert_eq!(result.winner, "yes");
    }

    #[test]
    fn test_aggregate_no_votes_is_none() {
        let votes = vec![response_with_vote("a@x", None, 100)];
        assert!(aggregate_votes(&votes).is_none());
    }

    #[test]
    fn test_summary_with_winner() {
        let votes = vec![
            response_with_vote(
                "a@x",
                Some(Vote {
                    option: "yes".into(),
                    confidence: 0.9,
                    rationale: "types help".into(),
                }),
                100,
            ),
            response_with_vote(
                "b@y",
                Some(Vote {
                    option: "no".into(),
                    confidence: 0.3,
                    rationale: "churn".into(),
                }),
                101,
            ),
        ];
        let voting = aggregate_votes(&votes).expect("votes");
        let summary = build_summary(&votes, Some(&voting));
        assert!(summary.consensus.contains("'yes'"));
        assert_eq!(summary.final_recommendation, "yes");
        assert_eq!(summary.key_agreements.len(), 1);
        assert_eq!(summary.key_disagreements.len(), 1);
        assert!(summary.key_agreements[0].contains("types help"));
    }

    #[test]
    fn test_summary_without_votes() {
        let responses = vec![response_with_vote("a@x", None, 100)];
        let summary = build_summary(&responses, None);
        assert!(summary.consensus.contains("No consensus"));
        assert_eq!(summary.final_recommendation, "Further deliberation required");
    }
}
