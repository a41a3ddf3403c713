//! Turning free-text creator, publisher and subject fields into catalog names.

use unicode_normalization::UnicodeNormalization;

/// Post-nominal credentials dropped from creator names.
const CREDENTIALS: &[&str] = &["PhD", "Ph.D.", "Ph.D", "PH.D.", "M.D.", "MD", "DPhil"];

/// Generational suffixes kept at the end of a name.
const SUFFIXES: &[&str] = &["Jr.", "Jr", "Sr.", "Sr", "II", "III", "IV"];

const TAG_SEPARATORS: &[char] = &['/', ';', ',', '\n'];

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Key used to match author and publisher names: NFC, lowercased, single spaces.
pub fn name_key(name: &str) -> String {
    collapse_whitespace(&name.nfc().collect::<String>()).to_lowercase()
}

/// Split one `dc:creator` value into individual author names.
///
/// `"Smith, John and Doe, Jane"` gives `["John Smith", "Jane Doe"]`.
pub fn split_authors(raw: &str) -> Vec<String> {
    let mut names = Vec::new();
    for piece in split_connectives(raw) {
        names.extend(names_from_piece(&piece));
    }
    dedup_names(names)
}

/// Split every creator of a package and merge the results.
pub fn authors_from_creators(creators: &[String]) -> Vec<String> {
    dedup_names(creators.iter().flat_map(|c| split_authors(c)).collect())
}

fn split_connectives(raw: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    for chunk in raw.split(['&', ';']) {
        let mut current: Vec<&str> = Vec::new();
        for word in chunk.split_whitespace() {
            if word.eq_ignore_ascii_case("and") {
                pieces.push(current.join(" "));
                current.clear();
            } else {
                current.push(word);
            }
        }
        pieces.push(current.join(" "));
    }
    pieces.retain(|p| !p.trim().is_empty());
    pieces
}

fn strip_credentials(part: &str, first_part: bool) -> String {
    let words: Vec<&str> = part.split_whitespace().collect();
    words
        .iter()
        .enumerate()
        .filter(|(i, w)| {
            // A credential only counts after a space or comma, never as the whole name.
            let leading = first_part && *i == 0;
            leading || !CREDENTIALS.contains(*w)
        })
        .map(|(_, w)| *w)
        .collect::<Vec<_>>()
        .join(" ")
}

fn names_from_piece(piece: &str) -> Vec<String> {
    let mut parts: Vec<String> = piece
        .split(',')
        .enumerate()
        .map(|(i, p)| strip_credentials(p, i == 0))
        .filter(|p| !p.is_empty())
        .collect();

    let has_suffix =
        parts.len() > 1 && parts.last().is_some_and(|l| SUFFIXES.contains(&l.as_str()));
    let suffix = if has_suffix { parts.pop() } else { None };

    let all_multi_word = parts.iter().all(|p| p.split_whitespace().count() > 1);
    let mut names: Vec<String> = if parts.len() % 2 == 0 && !all_multi_word {
        parts
            .chunks(2)
            .map(|pair| format!("{} {}", pair[1], pair[0]))
            .collect()
    } else {
        parts
    };

    if let (Some(suffix), Some(last)) = (suffix, names.last_mut()) {
        last.push(' ');
        last.push_str(&suffix);
    }
    names.iter().map(|n| collapse_whitespace(n)).collect()
}

fn dedup_names(names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names
        .into_iter()
        .filter(|n| !n.is_empty() && seen.insert(name_key(n)))
        .collect()
}

/// Turn subject strings into tags.
///
/// Subjects longer than `max_len` characters read like descriptions and are
/// skipped entirely.
pub fn normalize_tags(subjects: &[String], max_len: usize) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for subject in subjects {
        if subject.chars().count() > max_len {
            tracing::debug!("Skipping subject longer than {} chars", max_len);
            continue;
        }
        for raw in subject.split(TAG_SEPARATORS) {
            let tag = collapse_whitespace(&raw.replace(':', " ")).to_lowercase();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}

pub fn normalize_publishers(publishers: &[String]) -> Vec<String> {
    dedup_names(publishers.iter().map(|p| collapse_whitespace(p)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn last_first_pairs_joined_by_and() {
        assert_eq!(split_authors("Smith, John and Doe, Jane"), v(&["John Smith", "Jane Doe"]));
    }

    #[test]
    fn connectives() {
        assert_eq!(
            split_authors("Alice Adams & Bob Brown; Carol Clark AND Dan Drake"),
            v(&["Alice Adams", "Bob Brown", "Carol Clark", "Dan Drake"])
        );
    }

    #[test]
    fn credentials_are_stripped() {
        assert_eq!(split_authors("Jane Doe, PhD"), v(&["Jane Doe"]));
        assert_eq!(split_authors("John Watson M.D."), v(&["John Watson"]));
        assert_eq!(split_authors("Doe, Jane, Ph.D."), v(&["Jane Doe"]));
        assert_eq!(split_authors("Smith, Anna DPhil"), v(&["Anna Smith"]));
    }

    #[test]
    fn suffixes_are_kept_last() {
        assert_eq!(split_authors("Smith, John, Jr."), v(&["John Smith Jr."]));
        assert_eq!(split_authors("John Smith, Jr."), v(&["John Smith Jr."]));
        assert_eq!(split_authors("Martin Luther King Jr."), v(&["Martin Luther King Jr."]));
    }

    #[test]
    fn comma_lists() {
        assert_eq!(
            split_authors("Smith, John, Doe, Jane"),
            v(&["John Smith", "Jane Doe"])
        );
        assert_eq!(
            split_authors("Ann Lee, Bo Chan, Cy Twombly"),
            v(&["Ann Lee", "Bo Chan", "Cy Twombly"])
        );
        assert_eq!(split_authors("Ann Lee, Bo Chan"), v(&["Ann Lee", "Bo Chan"]));
        assert_eq!(split_authors("van Gogh, Vincent"), v(&["Vincent van Gogh"]));
    }

    #[test]
    fn duplicates_and_blanks_dropped() {
        assert_eq!(split_authors("  Jane   Doe and jane doe & "), v(&["Jane Doe"]));
        assert_eq!(split_authors(""), Vec::<String>::new());
        assert_eq!(
            authors_from_creators(&v(&["Jane Doe", "Doe, Jane", "Other Person"])),
            v(&["Jane Doe", "Other Person"])
        );
    }

    #[test]
    fn tags_split_and_fold() {
        let subjects = v(&[
            "Science Fiction / Space Opera",
            "History: Europe",
            "fiction;FICTION,  Adventure\nSea",
        ]);
        assert_eq!(
            normalize_tags(&subjects, 80),
            v(&[
                "science fiction",
                "space opera",
                "history europe",
                "fiction",
                "adventure",
                "sea"
            ])
        );
    }

    #[test]
    fn long_subjects_are_rejected() {
        let long = "word ".repeat(30);
        assert_eq!(normalize_tags(&[long, "Poetry".into()], 80), v(&["poetry"]));
    }

    #[test]
    fn publishers_are_cleaned() {
        assert_eq!(
            normalize_publishers(&v(&["  Penguin   Books ", "penguin books", "", "Tor"])),
            v(&["Penguin Books", "Tor"])
        );
    }

    #[test]
    fn name_key_is_case_and_form_insensitive() {
        assert_eq!(name_key("Émile  Zola"), name_key("E\u{301}mile zola"));
    }

    proptest! {
        #[test]
        fn tags_are_clean(subjects in proptest::collection::vec("[a-zA-Z /;,:\n]{0,30}", 0..6)) {
            let tags = normalize_tags(&subjects, 80);
            for (i, tag) in tags.iter().enumerate() {
                prop_assert!(!tag.is_empty());
                prop_assert!(!tag.contains(|c| TAG_SEPARATORS.contains(&c) || c == ':'));
                prop_assert_eq!(tag, &tag.to_lowercase());
                prop_assert_eq!(tag.trim(), tag.as_str());
                prop_assert!(!tags[..i].contains(tag));
            }
        }
    }
}
