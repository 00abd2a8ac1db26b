//! Report languages offered to API clients

use serde::Serialize;

/// One selectable output language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Language {
    pub code: &'static str,
    pub name: &'static str,
    /// Written right to left
    pub rtl: bool,
}

const fn lang(code: &'static str, name: &'static str, rtl: bool) -> Language {
    Language { code, name, rtl }
}

/// Languages in the order clients list them
pub const SUPPORTED_LANGUAGES: &[Language] = &[
    lang("ar", "Arabic", true),
    lang("en", "English", false),
    lang("fr", "French", false),
    lang("bn", "Bengali", false),
    lang("zh", "Chinese", false),
    lang("cs", "Czech", false),
    lang("da", "Danish", false),
    lang("nl", "Dutch", false),
    lang("fi", "Finnish", false),
    lang("de", "German", false),
    lang("el", "Greek", false),
    lang("he", "Hebrew", true),
    lang("hi", "Hindi", false),
    lang("hu", "Hungarian", false),
    lang("id", "Indonesian", false),
    lang("it", "Italian", false),
    lang("ja", "Japanese", false),
    lang("ko", "Korean", false),
    lang("ms", "Malay", false),
    lang("no", "Norwegian", false),
    lang("fa", "Persian", true),
    lang("pl", "Polish", false),
    lang("pt", "Portuguese", false),
    lang("ro", "Romanian", false),
    lang("ru", "Russian", false),
    lang("es", "Spanish", false),
    lang("sw", "Swahili", false),
    lang("sv", "Swedish", false),
    lang("tl", "Filipino (Tagalog)", false),
    lang("th", "Thai", false),
    lang("tr", "Turkish", false),
    lang("uk", "Ukrainian", false),
    lang("ur", "Urdu", true),
    lang("vi", "Vietnamese", false),
];

/// English name of a language code, or the code itself when unknown
pub fn language_name(code: &str) -> &str {
    SUPPORTED_LANGUAGES
        .iter()
        .find(|l| l.code == code)
        .map(|l| l.name)
        .unwrap_or(code)
}
