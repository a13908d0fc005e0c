//! File-intent classification for incoming questions.
//!
//! A pure keyword/pattern classifier that decides whether a question should
//! trigger a file-tool lookup before prompt assembly, and which one. Best
//! effort by design: a false negative degrades to plain retrieval, a false
//! positive adds harmless extra context.

/// The tool invocation a question calls for, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileIntent {
    None,
    /// "what was my last note?": fetch the newest matching file.
    FindLatest {
        directory: Option<String>,
        pattern: String,
    },
    /// "is there anything for 8/2/2025?": grep for the date token.
    DateSearch { date: String },
    /// "which notes mention passport?": grep for a content term.
    ContentSearch { term: String },
}

const LATEST_PHRASES: &[&str] = &[
    "latest",
    "last note",
    "last file",
    "last document",
    "most recent",
    "newest",
];

const CONTENT_TRIGGERS: &[&str] = &["mention", "contain", "grep", "about", "search for"];

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "my", "your", "of", "in", "on", "for", "to", "is", "are", "was", "were",
    "any", "do", "does", "have", "has", "what", "which", "that", "it", "there", "about",
];

/// Classify a question against the known knowledge-base directories.
///
/// `known_directories` are top-level folder names; the first one mentioned
/// in the question scopes a `FindLatest` lookup.
pub fn classify(question: &str, known_directories: &[String]) -> FileIntent {
    let lower = question.to_lowercase();

    if LATEST_PHRASES.iter().any(|p| lower.contains(p)) {
        let directory = known_directories
            .iter()
            .find(|d| lower.contains(&d.to_lowercase()))
            .cloned();
        return FileIntent::FindLatest {
            directory,
            pattern: "*.md".to_string(),
        };
    }

    if let Some(date) = find_date_token(question) {
        return FileIntent::DateSearch { date };
    }

    if let Some(term) = quoted_term(question) {
        return FileIntent::ContentSearch { term };
    }

    if let Some(term) = term_after_trigger(&lower) {
        return FileIntent::ContentSearch { term };
    }

    FileIntent::None
}

/// A token that looks like a calendar date: slash-separated numerics
/// (`8/2/2025`, `12/31`) or a standalone year (`2025`).
fn find_date_token(question: &str) -> Option<String> {
    for raw in question.split_whitespace() {
        let token = raw.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '/');
        if token.contains('/') {
            let parts: Vec<&str> = token.split('/').collect();
            if parts.len() >= 2
                && parts
                    .iter()
                    .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
            {
                return Some(token.to_string());
            }
        }
        if token.len() == 4 && token.starts_with("20") && token.chars().all(|c| c.is_ascii_digit())
        {
            return Some(token.to_string());
        }
    }
    None
}

fn quoted_term(question: &str) -> Option<String> {
    let start = question.find('"')?;
    let rest = &question[start + 1..];
    let end = rest.find('"')?;
    let term = rest[..end].trim();
    if term.is_empty() {
        None
    } else {
        Some(term.to_lowercase())
    }
}

/// Words following a content trigger ("mention", "contain", ...), minus
/// stopwords, capped at a few terms.
fn term_after_trigger(lower: &str) -> Option<String> {
    let trigger_pos = CONTENT_TRIGGERS
        .iter()
        .filter_map(|t| lower.find(t).map(|pos| pos + t.len()))
        .min()?;

    let tail = &lower[trigger_pos..];
    let terms: Vec<&str> = tail
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        // "mentions"/"contains"/"containing" leave their own suffix behind
        .filter(|w| !matches!(*w, "s" | "ing" | "ed"))
        .take(3)
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirs() -> Vec<String> {
        vec!["Medscribe".to_string(), "QA".to_string()]
    }

    #[test]
    fn plain_question_is_none() {
        assert_eq!(classify("explain the deployment process", &dirs()), FileIntent::None);
    }

    #[test]
    fn last_note_maps_to_find_latest() {
        let intent = classify("when was my last note added to Medscribe?", &dirs());
        assert_eq!(
            intent,
            FileIntent::FindLatest {
                directory: Some("Medscribe".to_string()),
                pattern: "*.md".to_string(),
            }
        );
    }

    #[test]
    fn latest_without_directory_searches_whole_base() {
        let intent = classify("show me the latest entry", &dirs());
        assert_eq!(
            intent,
            FileIntent::FindLatest {
                directory: None,
                pattern: "*.md".to_string(),
            }
        );
    }

    #[test]
    fn slash_date_maps_to_date_search() {
        let intent = classify("are there notes for 8/2/2025?", &dirs());
        assert_eq!(
            intent,
            FileIntent::DateSearch {
                date: "8/2/2025".to_string()
            }
        );
    }

    #[test]
    fn bare_year_maps_to_date_search() {
        let intent = classify("anything from 2024?", &dirs());
        assert_eq!(
            intent,
            FileIntent::DateSearch {
                date: "2024".to_string()
            }
        );
    }

    #[test]
    fn non_date_slashes_are_ignored() {
        assert_eq!(classify("explain tcp/ip basics", &dirs()), FileIntent::None);
    }

    #[test]
    fn mention_maps_to_content_search() {
        let intent = classify("which notes mention passport renewal?", &dirs());
        assert_eq!(
            intent,
            FileIntent::ContentSearch {
                term: "passport renewal".to_string()
            }
        );
    }

    #[test]
    fn quoted_term_wins_over_trigger_words() {
        let intent = classify("do any files contain \"error code 42\"?", &dirs());
        assert_eq!(
            intent,
            FileIntent::ContentSearch {
                term: "error code 42".to_string()
            }
        );
    }

    #[test]
    fn latest_wins_over_date() {
        // Both cues present; the latest-file flow also answers the date part.
        let intent = classify("what was in my last note on 8/2/2025?", &dirs());
        assert!(matches!(intent, FileIntent::FindLatest { .. }));
    }
}
