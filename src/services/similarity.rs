//! String similarity scores used by the material matcher.
//!
//! All scores are integers on a 0-100 scale built on top of
//! `strsim::normalized_levenshtein`.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Phrase rewrites applied after upper-casing, in order.
const REWRITES: &[(&str, &str)] = &[
    ("NOMINAL", ""),
    ("ACTUAL", ""),
    ("#", "NO"),
    ("\"", "INCH"),
    ("'", "FOOT"),
    ("-", " "),
    ("/", " "),
    ("STUDS", "STUD"),
    ("WALL FRAMING", ""),
    ("EXTERIOR WALLS", ""),
    ("FLOOR JOISTS", "JOIST"),
    ("RIDGE BEAM", "RIDGE"),
    ("SHEATHING", ""),
];

fn dimension_separator() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d)\s*X\s*(\d)").expect("valid regex"))
}

fn lumber_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*[Xx]\s*(\d+)").expect("valid regex"))
}

/// Canonical form of a takeoff or catalog description.
///
/// `2X4` style separators become spaces; an `X` inside a word is kept.
pub fn normalize_description(text: &str) -> String {
    let mut text = text.to_uppercase();
    for (from, to) in REWRITES {
        text = text.replace(from, to);
    }
    let text = dimension_separator().replace_all(&text, "$1 $2");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Nominal lumber dimension such as `2X4`, if the text mentions one.
pub fn lumber_dimensions(text: &str) -> Option<String> {
    lumber_pattern()
        .captures(text)
        .map(|caps| format!("{}X{}", &caps[1], &caps[2]))
}

fn to_score(similarity: f64) -> u32 {
    (similarity * 100.0).round().clamp(0.0, 100.0) as u32
}

/// Plain edit-distance similarity. Empty input scores 0.
pub fn ratio(a: &str, b: &str) -> u32 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    to_score(strsim::normalized_levenshtein(a, b))
}

/// Best ratio of the shorter string against every equally long window of the longer one.
pub fn partial_ratio(a: &str, b: &str) -> u32 {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };

    let long_chars: Vec<char> = long.chars().collect();
    let window = short.chars().count();
    if window == long_chars.len() {
        return ratio(short, long);
    }

    let mut best = 0;
    for start in 0..=(long_chars.len() - window) {
        let candidate: String = long_chars[start..start + window].iter().collect();
        let score = ratio(short, &candidate);
        if score > best {
            best = score;
            if best == 100 {
                break;
            }
        }
    }
    best
}

fn tokens(text: &str) -> Vec<String> {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_uppercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Ratio after sorting the words of both strings.
pub fn token_sort_ratio(a: &str, b: &str) -> u32 {
    let mut ta = tokens(a);
    let mut tb = tokens(b);
    ta.sort();
    tb.sort();
    ratio(&ta.join(" "), &tb.join(" "))
}

/// Ratio that ignores duplicated words and rewards one word set containing the other.
pub fn token_set_ratio(a: &str, b: &str) -> u32 {
    let sa: BTreeSet<String> = tokens(a).into_iter().collect();
    let sb: BTreeSet<String> = tokens(b).into_iter().collect();

    let common = sa.intersection(&sb).cloned().collect::<Vec<_>>().join(" ");
    let only_a = sa.difference(&sb).cloned().collect::<Vec<_>>().join(" ");
    let only_b = sb.difference(&sa).cloned().collect::<Vec<_>>().join(" ");

    let combined_a = format!("{} {}", common, only_a).trim().to_string();
    let combined_b = format!("{} {}", common, only_b).trim().to_string();

    ratio(&common, &combined_a)
        .max(ratio(&common, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

/// Highest of the partial, token-sort and token-set ratios.
pub fn best_ratio(a: &str, b: &str) -> u32 {
    partial_ratio(a, b)
        .max(token_sort_ratio(a, b))
        .max(token_set_ratio(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_lumber_descriptions() {
        assert_eq!(
            normalize_description("2x4 Studs - Exterior Walls"),
            "2 4 STUD"
        );
        assert_eq!(normalize_description("1/2\" OSB Sheathing"), "1 2INCH OSB");
        assert_eq!(normalize_description("#10 wire  box"), "NO10 WIRE BOX");
    }

    #[test]
    fn extracts_lumber_dimensions() {
        assert_eq!(lumber_dimensions("2x10 floor joist"), Some("2X10".to_string()));
        assert_eq!(lumber_dimensions("2 X 6 STUD"), Some("2X6".to_string()));
        assert_eq!(lumber_dimensions("drywall screws"), None);
    }

    #[test]
    fn identical_strings_score_100() {
        assert_eq!(ratio("OSB PANEL", "OSB PANEL"), 100);
        assert_eq!(partial_ratio("OSB", "7 16 OSB PANEL"), 100);
        assert_eq!(token_sort_ratio("PANEL OSB", "OSB PANEL"), 100);
    }

    #[test]
    fn empty_input_scores_zero() {
        assert_eq!(ratio("", "ANYTHING"), 0);
        assert_eq!(partial_ratio("ANYTHING", ""), 0);
        assert_eq!(token_set_ratio("", ""), 0);
    }

    #[test]
    fn token_set_rewards_subsets() {
        assert_eq!(token_set_ratio("2 4 STUD", "2 4 STUD 92 5 8 SPF"), 100);
        assert!(token_sort_ratio("2 4 STUD", "2 4 STUD 92 5 8 SPF") < 100);
    }

    #[test]
    fn unrelated_strings_score_low() {
        assert!(best_ratio("ASPHALT SHINGLE", "CONCRETE ANCHOR BOLT") < 60);
    }
}
