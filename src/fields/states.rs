//! US state and territory names, and detection of a state that OCR left at
//! the end of a city value.

/// `(abbreviation, full name)`.
pub const STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("DC", "District of Columbia"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
    ("PR", "Puerto Rico"),
    ("VI", "Virgin Islands"),
    ("GU", "Guam"),
    ("AS", "American Samoa"),
    ("MP", "Northern Mariana Islands"),
];

/// The canonical abbreviation if `s` is an abbreviation in any case.
pub fn abbreviation(s: &str) -> Option<&'static str> {
    let s = s.trim();
    STATES
        .iter()
        .find(|(abbr, _)| abbr.eq_ignore_ascii_case(s))
        .map(|(abbr, _)| *abbr)
}

/// The abbreviation for a full state name (case-insensitive, whitespace-collapsed).
pub fn abbreviation_for_name(s: &str) -> Option<&'static str> {
    let wanted = collapse_ws(s);
    STATES
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(&wanted))
        .map(|(abbr, _)| *abbr)
}

/// Normalise a state value to its two-letter abbreviation.
pub fn normalize_state(s: &str) -> Option<&'static str> {
    let trimmed = s.trim().trim_end_matches('.');
    abbreviation(trimmed).or_else(|| abbreviation_for_name(trimmed))
}

/// A city value with a trailing state removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CityStateSplit {
    pub city: String,
    pub state: &'static str,
}

/// Detect a state at the end of a city value.
///
/// Matches a trailing full state name as whole words (any case), or a
/// trailing whole-word abbreviation written in upper case. Lower-case
/// two-letter words are left alone since they are usually part of the
/// city. Returns `None` when removing the state would empty the city.
pub fn detect_trailing_state(city: &str) -> Option<CityStateSplit> {
    let city = city.trim().trim_end_matches(['.', ',']).trim_end();
    if city.is_empty() {
        return None;
    }
    let words: Vec<&str> = city
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
        .collect();

    // Longest names first so "West Virginia" wins over "Virginia".
    let mut by_length: Vec<&(&str, &str)> = STATES.iter().collect();
    by_length.sort_by_key(|(_, name)| std::cmp::Reverse(name.split(' ').count()));

    for (abbr, name) in by_length {
        let name_words: Vec<&str> = name.split(' ').collect();
        if words.len() <= name_words.len() {
            continue;
        }
        let tail = &words[words.len() - name_words.len()..];
        let matches = tail
            .iter()
            .zip(&name_words)
            .all(|(w, n)| w.eq_ignore_ascii_case(n));
        if matches {
            return split_at_word(city, words.len() - name_words.len(), abbr);
        }
    }

    let last = *words.last()?;
    if words.len() > 1
        && last.len() == 2
        && last.chars().all(|c| c.is_ascii_uppercase())
    {
        if let Some(abbr) = abbreviation(last) {
            return split_at_word(city, words.len() - 1, abbr);
        }
    }
    None
}

/// Keep the first `keep` words of `city` with their original spacing.
fn split_at_word(city: &str, keep: usize, state: &'static str) -> Option<CityStateSplit> {
    let mut seen = 0;
    let mut end = 0;
    let mut in_word = false;
    for (i, c) in city.char_indices() {
        let sep = c.is_whitespace() || c == ',';
        if !sep && !in_word {
            if seen == keep {
                break;
            }
            seen += 1;
            in_word = true;
        }
        if sep {
            in_word = false;
        } else {
            end = i + c.len_utf8();
        }
    }
    let kept = city[..end].trim_end_matches([',', '-', ' ']).trim();
    if kept.is_empty() {
        None
    } else {
        Some(CityStateSplit {
            city: kept.to_string(),
            state,
        })
    }
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
