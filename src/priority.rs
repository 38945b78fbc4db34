//! Heuristic message prioritization.
//!
//! Scores each message from its wording, age, author and punctuation and
//! returns the messages highest score first.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{Message, Timestamp};

const URGENT_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "immediately",
    "emergency",
    "critical",
    "important",
    "priority",
    "now",
    "right away",
];

const PROBLEM_KEYWORDS: &[&str] = &[
    "error",
    "broken",
    "not working",
    "issue",
    "problem",
    "failed",
    "crash",
    "down",
    "outage",
];

const QUESTION_KEYWORDS: &[&str] = &["?", "how", "what", "why", "when", "where", "help"];

/// Authors whose id contains one of these get a boost
const IMPORTANT_AUTHORS: &[&str] = &["admin", "support"];

const URGENT_WEIGHT: f64 = 3.0;
const PROBLEM_WEIGHT: f64 = 2.0;
const QUESTION_WEIGHT: f64 = 1.0;
const AUTHOR_BOOST: f64 = 1.5;
const MENTION_BOOST: f64 = 1.0;

/// A message with its priority score. Serializes as the message's own
/// fields plus `priority_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub priority_score: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePrioritizer;

impl MessagePrioritizer {
    pub fn new() -> Self {
        Self
    }

    /// Rank messages by priority, highest first, relative to the current time.
    pub fn rank(&self, messages: &[Message]) -> Vec<RankedMessage> {
        self.rank_at(messages, Utc::now())
    }

    /// Rank messages by priority, highest first. Equal scores keep input order.
    pub fn rank_at(&self, messages: &[Message], now: DateTime<Utc>) -> Vec<RankedMessage> {
        let mut ranked: Vec<RankedMessage> = messages
            .iter()
            .map(|m| RankedMessage {
                message: m.clone(),
                priority_score: self.score_at(m, now),
            })
            .collect();

        ranked.sort_by(|a, b| b.priority_score.total_cmp(&a.priority_score));

        log::info!("Ranked {} messages", ranked.len());
        ranked
    }

    /// Priority score of one message, rounded to 2 decimals.
    pub fn score_at(&self, message: &Message, now: DateTime<Utc>) -> f64 {
        let body = message.body.to_lowercase();
        let mut score = 0.0;

        // longer messages matter more, up to a point
        let words = body.split_whitespace().count() as f64;
        score += (words / 50.0).min(2.0);

        score += URGENT_WEIGHT * count_contained(&body, URGENT_KEYWORDS);
        score += PROBLEM_WEIGHT * count_contained(&body, PROBLEM_KEYWORDS);
        score += QUESTION_WEIGHT * count_contained(&body, QUESTION_KEYWORDS);

        if let Some(ts) = message.effective_timestamp() {
            match parse_timestamp(ts) {
                Some(sent) => {
                    // timestamps ahead of `now` count as just sent
                    let hours_ago = ((now - sent).num_seconds() as f64 / 3600.0).max(0.0);
                    if hours_ago < 24.0 {
                        score += 2.0 - hours_ago / 24.0;
                    }
                }
                None => log::warn!("Error parsing timestamp: {:?}", ts),
            }
        }

        if let Some(user) = &message.user_id {
            let user = user.to_lowercase();
            if IMPORTANT_AUTHORS.iter().any(|a| user.contains(a)) {
                score += AUTHOR_BOOST;
            }
        }

        if body.contains('@') {
            score += MENTION_BOOST;
        }

        let exclamations = body.matches('!').count() as f64;
        score += (exclamations * 0.5).min(2.0);

        (score * 100.0).round() / 100.0
    }
}

/// How many of `keywords` occur anywhere in `body`.
fn count_contained(body: &str, keywords: &[&str]) -> f64 {
    keywords.iter().filter(|k| body.contains(*k)).count() as f64
}

/// Epoch millis, RFC 3339, or a naive ISO-8601 date/datetime taken as UTC.
fn parse_timestamp(ts: &Timestamp) -> Option<DateTime<Utc>> {
    match ts {
        Timestamp::Millis(ms) => DateTime::from_timestamp_millis(*ms),
        Timestamp::Float(ms) if ms.is_finite() => DateTime::from_timestamp_millis(*ms as i64),
        Timestamp::Float(_) => None,
        Timestamp::Text(text) => {
            let text = text.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Some(dt.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                    return Some(naive.and_utc());
                }
            }
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        }
    }
}
