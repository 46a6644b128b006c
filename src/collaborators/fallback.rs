//! Deterministic local stand-ins for the text analysis service.
//!
//! Stages call these when the analyzer times out, errors or is not
//! configured. None of them touch the network and all are pure functions of
//! their input.

use super::{Classification, SentimentReading};

/// Keywords that mark a text as news at all.
const RELEVANCE_KEYWORDS: &[&str] = &["news", "breaking", "update", "report", "announcement"];

/// Phrases that attribute claims to a source.
const SOURCE_INDICATORS: &[&str] = &["according to", "reported by", "confirmed", "official"];

const CATEGORY_LEXICON: &[(&str, &[&str])] = &[
    ("news", RELEVANCE_KEYWORDS),
    (
        "politics",
        &["election", "government", "minister", "parliament", "policy", "council", "vote"],
    ),
    ("sports", &["match", "team", "league", "tournament", "championship"]),
    ("technology", &["software", "technology", "device", "startup", "internet"]),
    ("business", &["market", "economy", "company", "shares", "budget"]),
    ("entertainment", &["film", "music", "celebrity", "movie", "festival"]),
];

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "success", "successful", "win", "wins", "improve", "improved", "growth",
    "gain", "gains", "positive", "celebrate", "record", "boost", "welcome", "agreement",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "crisis", "fail", "failed", "failure", "loss", "losses", "decline", "attack",
    "death", "dead", "killed", "disaster", "negative", "shocking", "devastating", "collapse",
];

/// Fallback sentiment never claims more confidence than this.
const MAX_FALLBACK_CONFIDENCE: f64 = 0.5;

/// Base authenticity before indicators are counted.
const AUTHENTICITY_BASE: f64 = 70.0;

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(|w| {
        w.trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
    })
}

/// Keyword classification over a fixed lexicon.
///
/// Candidates outside the lexicon match when their own name appears in the
/// text. Result order follows `candidates`.
pub fn classify_keywords(text: &str, candidates: &[String]) -> Classification {
    let tokens: Vec<String> = words(text).collect();
    let has = |needle: &str| tokens.iter().any(|t| t == needle);

    let categories: Vec<String> = candidates
        .iter()
        .filter(|candidate| {
            let name = candidate.to_lowercase();
            let lexicon = CATEGORY_LEXICON
                .iter()
                .find(|(category, _)| *category == name)
                .map(|(_, keywords)| *keywords);
            match lexicon {
                Some(keywords) => keywords.iter().any(|k| has(*k)),
                None => has(name.as_str()),
            }
        })
        .cloned()
        .collect();

    Classification {
        primary_category: categories.first().cloned(),
        categories,
    }
}

/// Keyword and length pre-screen, 0-100.
///
/// Each relevance keyword found in title or body adds 20; a body over 100
/// words adds 30.
pub fn prescreen_score(title: &str, body: &str) -> u8 {
    let text = format!("{} {}", title, body).to_lowercase();
    let mut score: u32 = RELEVANCE_KEYWORDS
        .iter()
        .filter(|k| text.contains(*k))
        .map(|_| 20)
        .sum();

    if body.split_whitespace().count() > 100 {
        score += 30;
    }

    score.min(100) as u8
}

/// Word-count sentiment over small positive and negative lexicons.
pub fn lexicon_sentiment(text: &str) -> SentimentReading {
    let (positive, negative) = words(text).fold((0usize, 0usize), |(p, n), word| {
        if POSITIVE_WORDS.contains(&word.as_str()) {
            (p + 1, n)
        } else if NEGATIVE_WORDS.contains(&word.as_str()) {
            (p, n + 1)
        } else {
            (p, n)
        }
    });

    let hits = positive + negative;
    if hits == 0 {
        return SentimentReading {
            polarity: 0.0,
            confidence: 0.0,
        };
    }

    SentimentReading {
        polarity: (positive as f64 - negative as f64) / hits as f64,
        confidence: (hits as f64 / 10.0).min(1.0) * MAX_FALLBACK_CONFIDENCE,
    }
}

/// Authenticity estimate from attribution phrases and length, 0-100.
pub fn authenticity_heuristic(body: &str) -> f64 {
    let lower = body.to_lowercase();
    let indicators = SOURCE_INDICATORS
        .iter()
        .filter(|i| lower.contains(*i))
        .count();

    let mut score = AUTHENTICITY_BASE + (indicators as f64 * 5.0).min(20.0);
    if body.split_whitespace().count() > 200 {
        score += 10.0;
    }
    score.min(100.0)
}

/// Splits text into trimmed sentences on `.`, `!` and `?`.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let end = idx + ch.len_utf8();
            let sentence = text[start..end].trim();
            if sentence.len() > 1 {
                out.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// Extractive summary: the first and last sentence, or the only one.
pub fn extractive_summary(text: &str) -> String {
    let sentences = sentences(text);
    match sentences.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [first, .., last] => format!("{} {}", first, last),
    }
}

/// Truncates `text` to at most `max_words` words.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}
