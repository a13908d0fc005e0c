//! Lexical relevance ranker.
//!
//! Scores document sections against a query by weighted term overlap:
//! header matches outrank body matches, and filename/folder matches outrank
//! both. Deliberately lexical rather than embedding-based so the core stays
//! deterministic and cheap to test; an embedding ranker could replace this
//! behind the same `search` signature.

use crate::models::{DocumentUnit, RankedSource};

/// Extra points when any query term appears in the section header.
const HEADER_BONUS: f64 = 2.0;
/// Points when any query term appears in the file name.
const FILENAME_BONUS: f64 = 10.0;
/// Points when any query term appears in the folder path (and none in the
/// file name).
const FOLDER_BONUS: f64 = 8.0;

const PREVIEW_CHARS: usize = 200;

/// Rank `corpus` sections against `query` and return at most `top_k`
/// sources, best first.
///
/// An empty query or corpus yields an empty result, not an error. Scores
/// are scaled to `[0, 100]` and are non-increasing across the returned
/// sequence; ties are broken by most-recent modification time.
pub fn search(query: &str, corpus: &[DocumentUnit], top_k: usize) -> Vec<RankedSource> {
    let query_terms = normalize_terms(query);
    if query_terms.is_empty() || corpus.is_empty() || top_k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(f64, &DocumentUnit)> = Vec::new();

    for unit in corpus {
        if unit.content.trim().is_empty() && unit.section_header.is_none() {
            continue;
        }

        let score = score_unit(&query_terms, unit);
        if score > 0.0 {
            scored.push((score, unit));
        }
    }

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.1.modified_at.cmp(&a.1.modified_at))
            .then(a.1.filename.cmp(&b.1.filename))
    });
    scored.truncate(top_k);

    // One extra term's worth of headroom in the divisor keeps header and
    // filename bonuses from saturating the scale too early.
    let divisor = query_terms.len() as f64 + 2.0;

    scored
        .into_iter()
        .map(|(score, unit)| RankedSource {
            unit: unit.clone(),
            relevance_score: ((score / divisor) * 100.0).min(100.0),
            content_preview: preview(&unit.content),
        })
        .collect()
}

fn score_unit(query_terms: &[String], unit: &DocumentUnit) -> f64 {
    let header_lower = unit
        .section_header
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let filename_lower = unit.filename.to_lowercase();
    let folder_lower = unit.folder_path.to_lowercase();

    let section_terms = normalize_terms(&format!("{} {}", header_lower, unit.content));
    let overlap = query_terms
        .iter()
        .filter(|t| section_terms.contains(*t))
        .count() as f64;

    let mut score = overlap;

    if query_terms.iter().any(|t| header_lower.contains(t.as_str())) {
        score += HEADER_BONUS;
    }

    if query_terms
        .iter()
        .any(|t| filename_lower.contains(t.as_str()))
    {
        score += FILENAME_BONUS;
    } else if query_terms.iter().any(|t| folder_lower.contains(t.as_str())) {
        score += FOLDER_BONUS;
    }

    score
}

/// Lowercase, strip punctuation, and split into unique terms (first
/// occurrence order preserved).
fn normalize_terms(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut terms: Vec<String> = Vec::new();
    for term in cleaned.split_whitespace() {
        if !terms.iter().any(|t| t == term) {
            terms.push(term.to_string());
        }
    }
    terms
}

fn preview(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.len() <= PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut end = PREVIEW_CHARS;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn unit(filename: &str, header: Option<&str>, content: &str, ts: i64) -> DocumentUnit {
        let folder_path = match filename.rsplit_once('/') {
            Some((folder, _)) => folder.to_string(),
            None => "root".to_string(),
        };
        DocumentUnit {
            filename: filename.to_string(),
            folder_path,
            section_header: header.map(|h| h.to_string()),
            content: content.to_string(),
            modified_at: Utc.timestamp_opt(ts, 0).unwrap(),
        }
    }

    #[test]
    fn empty_query_returns_nothing() {
        let corpus = vec![unit("a.md", Some("Setup"), "install steps", 0)];
        assert!(search("", &corpus, 5).is_empty());
        assert!(search("   ", &corpus, 5).is_empty());
    }

    #[test]
    fn empty_corpus_returns_nothing() {
        assert!(search("setup", &[], 5).is_empty());
    }

    #[test]
    fn setup_query_finds_setup_section_first() {
        // The Setup section must outrank an unrelated one and score > 0.
        let corpus = vec![
            unit("misc/todo.md", Some("Groceries"), "milk and eggs", 10),
            unit(
                "general/overview.md",
                Some("Setup"),
                "install steps",
                20,
            ),
        ];
        let results = search("setup", &corpus, 5);
        assert!(!results.is_empty());
        assert_eq!(results[0].unit.filename, "general/overview.md");
        assert_eq!(results[0].unit.section_header.as_deref(), Some("Setup"));
        assert!(results[0].relevance_score > 0.0);
        assert_eq!(results.len(), 1, "unrelated section must not match");
    }

    #[test]
    fn results_bounded_and_non_increasing() {
        let corpus: Vec<DocumentUnit> = (0..20)
            .map(|i| {
                unit(
                    &format!("f{i}.md"),
                    Some("Notes"),
                    &format!("deploy notes item {i}"),
                    i,
                )
            })
            .collect();

        let results = search("deploy notes", &corpus, 7);
        assert!(results.len() <= 7);
        for pair in results.windows(2) {
            assert!(pair[0].relevance_score >= pair[1].relevance_score);
        }
        for r in &results {
            assert!(r.relevance_score >= 0.0 && r.relevance_score <= 100.0);
        }
    }

    #[test]
    fn header_match_outranks_body_match() {
        let corpus = vec![
            unit("a.md", Some("Other"), "the deployment happened", 0),
            unit("b.md", Some("Deployment"), "some body text", 0),
        ];
        let results = search("deployment", &corpus, 5);
        assert_eq!(results[0].unit.filename, "b.md");
    }

    #[test]
    fn filename_match_outranks_header_match() {
        let corpus = vec![
            unit("notes.md", Some("Passport"), "expiry date", 0),
            unit("passport.md", Some("Info"), "expiry date", 0),
        ];
        let results = search("passport", &corpus, 5);
        assert_eq!(results[0].unit.filename, "passport.md");
    }

    #[test]
    fn ties_broken_by_recency() {
        let corpus = vec![
            unit("old.md", Some("Setup"), "install steps", 100),
            unit("new.md", Some("Setup"), "install steps", 200),
        ];
        let results = search("setup install", &corpus, 5);
        assert_eq!(results[0].unit.filename, "new.md");
        assert_eq!(results[0].relevance_score, results[1].relevance_score);
    }

    #[test]
    fn preview_is_truncated() {
        let long = "word ".repeat(100);
        let corpus = vec![unit("a.md", Some("Word"), &long, 0)];
        let results = search("word", &corpus, 1);
        assert!(results[0].content_preview.len() <= PREVIEW_CHARS + 3);
        assert!(results[0].content_preview.ends_with("..."));
    }

    #[test]
    fn punctuation_is_ignored() {
        let corpus = vec![unit("a.md", Some("Setup"), "install, steps!", 0)];
        let results = search("What about install?", &corpus, 5);
        assert_eq!(results.len(), 1);
    }
}
