//! Language tag normalisation and display names.
//!
//! Accepts ISO 639-1/639-2 primary subtags with optional script, region and
//! variant subtags. Bibliographic 639-2/B codes go through a fixed synonym
//! table first. Codes that cannot be normalised are rejected so the caller
//! can leave the book's language unset.

use serde::{Deserialize, Serialize};

use crate::error::LanguageError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LanguageTag {
    /// Normalised lowercase tag, unique in the catalog (`en-gb`).
    pub code: String,
    /// Language name alone (`English`).
    pub label: String,
    /// Name with subtag detail (`English (United Kingdom)`).
    pub long_name: String,
}

/// (639-1, 639-2/T, English name). Languages without a two-letter code have "".
const LANGUAGES: &[(&str, &str, &str)] = &[
    ("af", "afr", "Afrikaans"),
    ("am", "amh", "Amharic"),
    ("ar", "ara", "Arabic"),
    ("az", "aze", "Azerbaijani"),
    ("be", "bel", "Belarusian"),
    ("bg", "bul", "Bulgarian"),
    ("bn", "ben", "Bengali"),
    ("bo", "bod", "Tibetan"),
    ("br", "bre", "Breton"),
    ("bs", "bos", "Bosnian"),
    ("ca", "cat", "Catalan"),
    ("cs", "ces", "Czech"),
    ("cy", "cym", "Welsh"),
    ("da", "dan", "Danish"),
    ("de", "deu", "German"),
    ("el", "ell", "Greek"),
    ("en", "eng", "English"),
    ("eo", "epo", "Esperanto"),
    ("es", "spa", "Spanish"),
    ("et", "est", "Estonian"),
    ("eu", "eus", "Basque"),
    ("fa", "fas", "Persian"),
    ("fi", "fin", "Finnish"),
    ("fo", "fao", "Faroese"),
    ("fr", "fra", "French"),
    ("fy", "fry", "Western Frisian"),
    ("ga", "gle", "Irish"),
    ("gd", "gla", "Scottish Gaelic"),
    ("gl", "glg", "Galician"),
    ("gu", "guj", "Gujarati"),
    ("he", "heb", "Hebrew"),
    ("hi", "hin", "Hindi"),
    ("hr", "hrv", "Croatian"),
    ("ht", "hat", "Haitian Creole"),
    ("hu", "hun", "Hungarian"),
    ("hy", "hye", "Armenian"),
    ("id", "ind", "Indonesian"),
    ("is", "isl", "Icelandic"),
    ("it", "ita", "Italian"),
    ("ja", "jpn", "Japanese"),
    ("jv", "jav", "Javanese"),
    ("ka", "kat", "Georgian"),
    ("kk", "kaz", "Kazakh"),
    ("km", "khm", "Khmer"),
    ("kn", "kan", "Kannada"),
    ("ko", "kor", "Korean"),
    ("ku", "kur", "Kurdish"),
    ("ky", "kir", "Kyrgyz"),
    ("la", "lat", "Latin"),
    ("lb", "ltz", "Luxembourgish"),
    ("lo", "lao", "Lao"),
    ("lt", "lit", "Lithuanian"),
    ("lv", "lav", "Latvian"),
    ("mg", "mlg", "Malagasy"),
    ("mi", "mri", "Maori"),
    ("mk", "mkd", "Macedonian"),
    ("ml", "mal", "Malayalam"),
    ("mn", "mon", "Mongolian"),
    ("mr", "mar", "Marathi"),
    ("ms", "msa", "Malay"),
    ("mt", "mlt", "Maltese"),
    ("my", "mya", "Burmese"),
    ("nb", "nob", "Norwegian Bokmål"),
    ("ne", "nep", "Nepali"),
    ("nl", "nld", "Dutch"),
    ("nn", "nno", "Norwegian Nynorsk"),
    ("no", "nor", "Norwegian"),
    ("oc", "oci", "Occitan"),
    ("pa", "pan", "Punjabi"),
    ("pl", "pol", "Polish"),
    ("ps", "pus", "Pashto"),
    ("pt", "por", "Portuguese"),
    ("qu", "que", "Quechua"),
    ("rm", "roh", "Romansh"),
    ("ro", "ron", "Romanian"),
    ("ru", "rus", "Russian"),
    ("sa", "san", "Sanskrit"),
    ("sd", "snd", "Sindhi"),
    ("si", "sin", "Sinhala"),
    ("sk", "slk", "Slovak"),
    ("sl", "slv", "Slovenian"),
    ("so", "som", "Somali"),
    ("sq", "sqi", "Albanian"),
    ("sr", "srp", "Serbian"),
    ("sv", "swe", "Swedish"),
    ("sw", "swa", "Swahili"),
    ("ta", "tam", "Tamil"),
    ("te", "tel", "Telugu"),
    ("tg", "tgk", "Tajik"),
    ("th", "tha", "Thai"),
    ("tk", "tuk", "Turkmen"),
    ("tl", "tgl", "Tagalog"),
    ("tr", "tur", "Turkish"),
    ("tt", "tat", "Tatar"),
    ("ug", "uig", "Uyghur"),
    ("uk", "ukr", "Ukrainian"),
    ("ur", "urd", "Urdu"),
    ("uz", "uzb", "Uzbek"),
    ("vi", "vie", "Vietnamese"),
    ("yi", "yid", "Yiddish"),
    ("yo", "yor", "Yoruba"),
    ("zh", "zho", "Chinese"),
    ("zu", "zul", "Zulu"),
    ("", "ang", "Old English"),
    ("", "ast", "Asturian"),
    ("", "chr", "Cherokee"),
    ("", "enm", "Middle English"),
    ("", "fil", "Filipino"),
    ("", "fro", "Old French"),
    ("", "grc", "Ancient Greek"),
    ("", "haw", "Hawaiian"),
    ("", "non", "Old Norse"),
];

/// Legacy codes mapped to their current form: ISO 639-2/B bibliographic codes
/// and withdrawn two-letter codes.
const SYNONYMS: &[(&str, &str)] = &[
    ("alb", "sqi"),
    ("arm", "hye"),
    ("baq", "eus"),
    ("bur", "mya"),
    ("chi", "zho"),
    ("cze", "ces"),
    ("dut", "nld"),
    ("fre", "fra"),
    ("geo", "kat"),
    ("ger", "deu"),
    ("gre", "ell"),
    ("ice", "isl"),
    ("mac", "mkd"),
    ("mao", "mri"),
    ("may", "msa"),
    ("per", "fas"),
    ("rum", "ron"),
    ("slo", "slk"),
    ("tib", "bod"),
    ("wel", "cym"),
    ("iw", "he"),
    ("in", "id"),
    ("ji", "yi"),
];

const SCRIPTS: &[(&str, &str)] = &[
    ("arab", "Arabic"),
    ("armn", "Armenian"),
    ("beng", "Bengali"),
    ("cyrl", "Cyrillic"),
    ("deva", "Devanagari"),
    ("ethi", "Ethiopic"),
    ("geor", "Georgian"),
    ("grek", "Greek"),
    ("hans", "Simplified"),
    ("hant", "Traditional"),
    ("hebr", "Hebrew"),
    ("jpan", "Japanese"),
    ("kore", "Korean"),
    ("latn", "Latin"),
    ("thai", "Thai"),
];

const REGIONS: &[(&str, &str)] = &[
    ("001", "World"),
    ("150", "Europe"),
    ("419", "Latin America"),
    ("ar", "Argentina"),
    ("at", "Austria"),
    ("au", "Australia"),
    ("be", "Belgium"),
    ("br", "Brazil"),
    ("ca", "Canada"),
    ("ch", "Switzerland"),
    ("cl", "Chile"),
    ("cn", "China"),
    ("co", "Colombia"),
    ("cz", "Czechia"),
    ("de", "Germany"),
    ("dk", "Denmark"),
    ("eg", "Egypt"),
    ("es", "Spain"),
    ("fi", "Finland"),
    ("fr", "France"),
    ("gb", "United Kingdom"),
    ("gr", "Greece"),
    ("hk", "Hong Kong"),
    ("ie", "Ireland"),
    ("il", "Israel"),
    ("in", "India"),
    ("it", "Italy"),
    ("jp", "Japan"),
    ("kr", "South Korea"),
    ("lu", "Luxembourg"),
    ("mx", "Mexico"),
    ("nl", "Netherlands"),
    ("no", "Norway"),
    ("nz", "New Zealand"),
    ("pe", "Peru"),
    ("ph", "Philippines"),
    ("pl", "Poland"),
    ("pt", "Portugal"),
    ("ru", "Russia"),
    ("sa", "Saudi Arabia"),
    ("se", "Sweden"),
    ("sg", "Singapore"),
    ("tr", "Turkey"),
    ("tw", "Taiwan"),
    ("ua", "Ukraine"),
    ("us", "United States"),
    ("uy", "Uruguay"),
    ("ve", "Venezuela"),
    ("za", "South Africa"),
];

fn lookup<'a>(table: &'a [(&'a str, &'a str)], key: &str) -> Option<&'a str> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Resolve a primary subtag to (canonical code, English name).
fn primary_language(subtag: &str) -> Option<(&'static str, &'static str)> {
    let subtag = lookup(SYNONYMS, subtag).unwrap_or(subtag);
    let entry = match subtag.len() {
        2 => LANGUAGES.iter().find(|(a2, _, _)| *a2 == subtag),
        3 => LANGUAGES.iter().find(|(_, a3, _)| *a3 == subtag),
        _ => None,
    }?;
    let (alpha2, alpha3, name) = *entry;
    Some((if alpha2.is_empty() { alpha3 } else { alpha2 }, name))
}

fn is_script(s: &str) -> bool {
    s.len() == 4 && s.chars().all(|c| c.is_ascii_alphabetic())
}

fn is_region(s: &str) -> bool {
    (s.len() == 2 && s.chars().all(|c| c.is_ascii_alphabetic()))
        || (s.len() == 3 && s.chars().all(|c| c.is_ascii_digit()))
}

fn is_variant(s: &str) -> bool {
    let alnum = s.chars().all(|c| c.is_ascii_alphanumeric());
    alnum
        && ((5..=8).contains(&s.len())
            || (s.len() == 4 && s.starts_with(|c: char| c.is_ascii_digit())))
}

/// Normalise a free-form language code into a catalog `LanguageTag`.
pub fn standardize(raw: &str) -> Result<LanguageTag, LanguageError> {
    let invalid = || LanguageError::Invalid(raw.to_string());
    let cleaned = raw.trim().to_ascii_lowercase().replace('_', "-");
    let mut subtags = cleaned.split('-');

    let (primary, label) = subtags
        .next()
        .and_then(primary_language)
        .ok_or_else(invalid)?;

    let mut code = primary.to_string();
    let mut details: Vec<String> = Vec::new();
    let mut seen_script = false;
    let mut seen_region = false;
    let mut seen_variant = false;

    for subtag in subtags {
        if !seen_script && !seen_region && !seen_variant && is_script(subtag) {
            seen_script = true;
            details.push(
                lookup(SCRIPTS, subtag)
                    .map(str::to_string)
                    .unwrap_or_else(|| title_case(subtag)),
            );
        } else if !seen_region && !seen_variant && is_region(subtag) {
            seen_region = true;
            details.push(
                lookup(REGIONS, subtag)
                    .map(str::to_string)
                    .unwrap_or_else(|| subtag.to_ascii_uppercase()),
            );
        } else if is_variant(subtag) {
            seen_variant = true;
            details.push(subtag.to_string());
        } else {
            return Err(invalid());
        }
        code.push('-');
        code.push_str(subtag);
    }

    let long_name = if details.is_empty() {
        label.to_string()
    } else {
        format!("{} ({})", label, details.join(", "))
    };

    Ok(LanguageTag {
        code,
        label: label.to_string(),
        long_name,
    })
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
