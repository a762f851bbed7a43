use crate::domain::CriteriaResult;

const MIN_KEYWORD_LEN: usize = 2;

fn keywords(criteria: &str) -> Vec<String> {
    criteria
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_KEYWORD_LEN)
        .map(str::to_string)
        .collect()
}

/// Fallback relevance check used when a program does not judge its own items.
///
/// Matches when any keyword of the subscription's criteria appears in the
/// item's title or summary, case-insensitively. `None` when the criteria
/// yields no usable keywords.
pub fn keyword_overlap(criteria: &str, title: &str, summary: Option<&str>) -> Option<CriteriaResult> {
    let keywords = keywords(criteria);
    if keywords.is_empty() {
        return None;
    }

    let haystack = format!("{} {}", title, summary.unwrap_or("")).to_lowercase();
    if keywords.iter().any(|k| haystack.contains(k.as_str())) {
        Some(CriteriaResult::Matched)
    } else {
        Some(CriteriaResult::NotMatched)
    }
}
