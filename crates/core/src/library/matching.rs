//! Release-name to catalog-title matching.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex_lite::Regex;

use super::{ExternalId, LibraryEntry};

/// Minimum score for a catalog entry to count as a match.
pub const MATCH_THRESHOLD: f32 = 0.8;

fn cut_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(\b(19|20)\d{2}\b|\bS\d{1,2}(E\d{1,3})?\b|\b\d{1,2}x\d{2}\b|\b(480|576|720|1080|2160)[pi]\b|\b(complete|season|web-?dl|webrip|bluray|brrip|hdtv|dvdrip|remux|proper|repack)\b)",
        )
        .unwrap()
    })
}

fn year_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b((?:19|20)\d{2})\b").unwrap())
}

fn id_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[\[{(](tvdb|tmdb|imdb)(?:id)?[-=: ]?(tt\d{7,9}|\d+)[\]})]|\b(tt\d{7,9})\b")
            .unwrap()
    })
}

/// External id embedded in a release name, as in `{tvdb-280619}`,
/// `[tmdbid-603]` or a bare IMDb `tt0113277`.
pub fn extract_external_id(release: &str) -> Option<ExternalId> {
    let caps = id_tag().captures(release)?;
    if let Some(imdb) = caps.get(3) {
        return Some(ExternalId::Imdb(imdb.as_str().to_lowercase()));
    }
    let value = caps.get(2)?.as_str();
    match caps.get(1)?.as_str().to_lowercase().as_str() {
        "tvdb" => value.parse().ok().map(ExternalId::Tvdb),
        "tmdb" => value.parse().ok().map(ExternalId::Tmdb),
        _ if value.to_lowercase().starts_with("tt") => Some(ExternalId::Imdb(value.to_lowercase())),
        _ => None,
    }
}

/// Title part of a release name: separators become spaces and everything
/// from the first year/episode/quality marker on is dropped.
pub fn clean_release_title(release: &str) -> String {
    let spaced: String = release
        .chars()
        .map(|c| if c == '.' || c == '_' { ' ' } else { c })
        .collect();

    let cut = match cut_marker().find(&spaced) {
        Some(m) if m.start() > 0 => &spaced[..m.start()],
        _ => spaced.as_str(),
    };

    cut.trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '[' || c == '(')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// First plausible release year in the name.
pub fn extract_year(release: &str) -> Option<u32> {
    let spaced = release.replace(['.', '_'], " ");
    year_marker()
        .captures(&spaced)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Lowercase alphanumeric words.
fn normalize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('&', " and ")
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Similarity of two titles (0.0-1.0): the better of edit-distance ratio
/// and word overlap.
pub fn title_similarity(a: &str, b: &str) -> f32 {
    let a_words = normalize(a);
    let b_words = normalize(b);
    if a_words.is_empty() || b_words.is_empty() {
        return 0.0;
    }

    let a_joined = a_words.join(" ");
    let b_joined = b_words.join(" ");
    if a_joined == b_joined {
        return 1.0;
    }

    let max_len = a_joined.chars().count().max(b_joined.chars().count());
    let edit_ratio = 1.0 - levenshtein_distance(&a_joined, &b_joined) as f32 / max_len as f32;

    let a_set: HashSet<&String> = a_words.iter().collect();
    let b_set: HashSet<&String> = b_words.iter().collect();
    let shared = a_set.intersection(&b_set).count() as f32;
    let union = a_set.union(&b_set).count() as f32;
    let overlap = shared / union;

    edit_ratio.max(overlap)
}

/// Levenshtein edit distance between two strings.
fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut previous: Vec<usize> = (0..=b_chars.len()).collect();
    let mut current = vec![0usize; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        current[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b_chars.len()]
}

/// Score of `entry` against a release name, with a year bonus or penalty.
pub fn score_entry(release: &str, entry: &LibraryEntry) -> f32 {
    let title = clean_release_title(release);
    let mut score = title_similarity(&title, &entry.title);

    match (extract_year(release), entry.year) {
        (Some(release_year), Some(entry_year)) if release_year == entry_year => score += 0.1,
        (Some(_), Some(_)) => score -= 0.2,
        _ => {}
    }

    score.clamp(0.0, 1.0)
}

/// Best-scoring entry at or above [`MATCH_THRESHOLD`].
pub fn best_match<'a>(release: &str, entries: &'a [LibraryEntry]) -> Option<&'a LibraryEntry> {
    entries
        .iter()
        .map(|entry| (score_entry(release, entry), entry))
        .filter(|(score, _)| *score >= MATCH_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, entry)| entry)
}
