//! Text utilities shared by the extractor, deduplicator, ranker and
//! research agent: tokenization, stop-word filtering, sentence splitting,
//! language detection and extractive summaries.

use std::collections::{HashMap, HashSet};

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "shall", "should", "may", "might", "must", "can",
    "could", "of", "in", "to", "for", "with", "on", "at", "from", "by", "about", "as", "into",
    "through", "during", "before", "after", "above", "below", "between", "this", "that", "these",
    "those", "it", "its", "and", "but", "or", "not", "no", "so", "than", "too", "very", "just",
    "also", "how", "what", "when", "where", "which", "who", "why", "all", "any", "each", "more",
    "most", "other", "some", "such", "only", "own", "same", "then", "there", "their", "they",
    "them", "we", "you", "your", "our", "his", "her", "she", "him", "i", "me", "my", "if",
];

/// Whether a lower-cased word is an English stop word.
pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Collapse all runs of whitespace into single spaces.
pub fn compact_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-cased alphanumeric tokens, in order, stop words included.
pub fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

/// Lower-cased content terms: stop words and one-character tokens removed.
pub fn terms(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() > 1 && !is_stop_word(w))
        .collect()
}

/// The set of content terms in `text`.
pub fn term_set(text: &str) -> HashSet<String> {
    terms(text).into_iter().collect()
}

/// Jaccard similarity of two sets; two empty sets have similarity 0.
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Fraction of `needle` terms present in `haystack`.
pub fn containment(needle: &HashSet<String>, haystack: &HashSet<String>) -> f64 {
    if needle.is_empty() {
        return 0.0;
    }
    needle.iter().filter(|t| haystack.contains(*t)).count() as f64 / needle.len() as f64
}

/// First `n` characters of `text` (char-boundary safe).
pub fn prefix_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Split text into sentences on terminal punctuation followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let at_boundary = chars.peek().is_none_or(|next| next.is_whitespace());
            if at_boundary {
                let sentence = compact_ws(&current);
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                current.clear();
            }
        } else if ch == '\n' && chars.peek() == Some(&'\n') {
            let sentence = compact_ws(&current);
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let tail = compact_ws(&current);
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Extractive three-sentence summary: first, middle and last sentence.
pub fn summarize(text: &str) -> String {
    let sentences = split_sentences(text);
    match sentences.len() {
        0 => String::new(),
        1..=3 => sentences.join(" "),
        n => {
            let picked = [&sentences[0], &sentences[n / 2], &sentences[n - 1]];
            picked
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        }
    }
}

/// Top `limit` content terms by frequency (ties broken alphabetically).
pub fn top_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for term in terms(text) {
        if term.chars().count() > 2 && !term.chars().all(|c| c.is_ascii_digit()) {
            *counts.entry(term).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(limit).map(|(t, _)| t).collect()
}

// ---------------------------------------------------------------------------
// Language detection
// ---------------------------------------------------------------------------

const LEXICONS: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "is", "are", "of", "to", "in", "that", "with", "for", "this", "was",
        ],
    ),
    (
        "es",
        &[
            "el", "la", "los", "las", "y", "es", "de", "que", "en", "por", "una", "con",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "et", "est", "des", "une", "que", "dans", "pour", "avec", "sur",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "nicht", "mit", "ein", "eine", "auf", "den", "zu",
        ],
    ),
    (
        "pt",
        &[
            "o", "os", "as", "e", "que", "do", "da", "em", "um", "uma", "para", "com",
        ],
    ),
    (
        "it",
        &[
            "il", "lo", "gli", "e", "che", "di", "della", "un", "una", "per", "con", "sono",
        ],
    ),
];

/// Guess the language of `text` by stop-word lexicon overlap.
///
/// Returns an ISO 639-1 code or `"unknown"` when there is too little signal.
pub fn detect_language(text: &str) -> String {
    let tokens = words(text);
    if tokens.len() < 3 {
        return "unknown".to_string();
    }

    let mut best: Option<(&str, usize)> = None;
    for (lang, lexicon) in LEXICONS {
        let hits = tokens.iter().filter(|t| lexicon.contains(&t.as_str())).count();
        if best.is_none_or(|(_, best_hits)| hits > best_hits) {
            best = Some((lang, hits));
        }
    }

    match best {
        Some((lang, hits)) if hits >= 2 && hits * 20 >= tokens.len().min(200) => lang.to_string(),
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terms_drop_stop_words() {
        let t = terms("The migration of ducks is a seasonal event");
        assert_eq!(t, vec!["migration", "ducks", "seasonal", "event"]);
    }

    #[test]
    fn test_jaccard() {
        let a = term_set("duck migration patterns");
        let b = term_set("duck migration routes");
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard(&HashSet::new(), &b), 0.0);
    }

    #[test]
    fn test_prefix_chars_multibyte() {
        assert_eq!(prefix_chars("héllo wörld", 4), "héll");
        assert_eq!(prefix_chars("abc", 10), "abc");
    }

    #[test]
    fn test_split_sentences() {
        let s = split_sentences("Ducks fly south. They return in spring! Why? Food.");
        assert_eq!(s.len(), 4);
        assert_eq!(s[0], "Ducks fly south.");
    }

    #[test]
    fn test_split_sentences_keeps_decimals() {
        let s = split_sentences("The rate rose 3.5 percent. Then it fell.");
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_summarize_first_middle_last() {
        let text = "One. Two. Three. Four. Five.";
        assert_eq!(summarize(text), "One. Three. Five.");
        assert_eq!(summarize("Only one."), "Only one.");
        assert_eq!(summarize(""), "");
    }

    #[test]
    fn test_top_keywords() {
        let kw = top_keywords("duck duck goose migration duck goose", 2);
        assert_eq!(kw, vec!["duck", "goose"]);
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(
            detect_language("The ducks are flying to the south and this is the season for that"),
            "en"
        );
        assert_eq!(
            detect_language("Los patos migran hacia el sur y la temporada es de las aves"),
            "es"
        );
        assert_eq!(
            detect_language("Die Enten fliegen nach Süden und das ist nicht ein Problem"),
            "de"
        );
        assert_eq!(detect_language("hi"), "unknown");
    }
}
