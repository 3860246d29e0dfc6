//! Chat transcript sentiment
//!
//! Lines spoken by the configured participant are pulled out of exported transcripts
//! (`<timestamp> - <participant>: <message>`) and scored against a small sentiment lexicon.

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, error};

use super::ChatAnalyzer;

pub const NO_CHAT_FILES: &str = "No chat files to process";

/// Scored when the participant said nothing.
const FALLBACK_TEXT: &str = "The quick brown fox jumps over the lazy dog.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Positive,
    Negative,
}

impl Sentiment {
    pub fn label(&self) -> &'static str {
        match self {
            Sentiment::Positive => "POSITIVE",
            Sentiment::Negative => "NEGATIVE",
        }
    }
}

lazy_static! {
    static ref POSITIVE_WORDS: HashSet<&'static str> = [
        "good", "great", "excellent", "amazing", "awesome", "love", "loved", "like", "happy",
        "glad", "thanks", "thank", "perfect", "helpful", "satisfied", "pleased", "wonderful",
        "fantastic", "best", "easy", "quick", "fast", "resolved", "fixed", "works", "appreciate",
        "recommend", "nice", "fine", "smooth", "reliable", "friendly", "enjoy", "enjoyed",
    ]
    .into_iter()
    .collect();
    static ref NEGATIVE_WORDS: HashSet<&'static str> = [
        "bad", "terrible", "awful", "horrible", "hate", "hated", "angry", "upset", "annoyed",
        "frustrated", "frustrating", "disappointed", "disappointing", "poor", "worst", "slow",
        "broken", "useless", "problem", "problems", "issue", "issues", "cancel", "cancelling",
        "canceling", "leave", "leaving", "quit", "switch", "switching", "refund", "expensive",
        "complaint", "unhappy", "never", "waste", "wrong", "fail", "failed", "error", "unacceptable",
    ]
    .into_iter()
    .collect();
    static ref NEGATIONS: HashSet<&'static str> = [
        "not", "no", "don't", "dont", "doesn't", "doesnt", "isn't", "isnt", "wasn't", "wasnt",
        "can't", "cant", "won't", "wont", "didn't", "didnt", "hardly",
    ]
    .into_iter()
    .collect();
    static ref RE_WORD: Regex = Regex::new(r"[a-z']+").unwrap();
}

/// Classify free text. Ties count as positive.
pub fn classify(text: &str) -> Sentiment {
    let lowered = text.to_lowercase();
    let mut score = 0i32;
    let mut negate = false;

    for word in RE_WORD.find_iter(&lowered).map(|m| m.as_str()) {
        if NEGATIONS.contains(word) {
            negate = true;
            continue;
        }
        let polarity = if POSITIVE_WORDS.contains(word) {
            1
        } else if NEGATIVE_WORDS.contains(word) {
            -1
        } else {
            0
        };
        if polarity != 0 {
            score += if negate { -polarity } else { polarity };
            negate = false;
        }
    }

    if score < 0 {
        Sentiment::Negative
    } else {
        Sentiment::Positive
    }
}

pub struct TranscriptSentiment {
    line_pattern: Regex,
}

impl TranscriptSentiment {
    pub fn new(participant: &str) -> Result<Self> {
        let line_pattern = Regex::new(&format!(r".*? - {}: (.*)", regex::escape(participant)))?;
        Ok(Self { line_pattern })
    }

    /// Messages by the participant, in file order. Unreadable files are logged and skipped.
    pub fn extract_messages(&self, paths: &[PathBuf]) -> Vec<String> {
        let mut messages = Vec::new();
        for path in paths {
            let contents = match fs::read(path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    error!("Error reading chat file {}: {}", path.display(), e);
                    continue;
                }
            };
            messages.extend(contents.lines().filter_map(|line| {
                self.line_pattern
                    .captures(line)
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().trim().to_string())
            }));
        }
        messages
    }
}

impl ChatAnalyzer for TranscriptSentiment {
    fn analyze(&self, paths: &[PathBuf]) -> Result<String> {
        if paths.is_empty() {
            return Ok(NO_CHAT_FILES.to_string());
        }
        let messages = self.extract_messages(paths);
        debug!(messages = messages.len(), "Chat messages extracted");
        let text = if messages.is_empty() {
            FALLBACK_TEXT.to_string()
        } else {
            messages.join(" ")
        };
        Ok(classify(&text).label().to_string())
    }
}
