//! Script-based language detection and per-language fixed strings.
//!
//! Detection is a pure function of the input text: count characters in
//! each supported script block, prefer the dominant non-Latin script, and
//! fall back to a romanized-Hindi marker-word check for Latin input.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported conversation languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    English,
    Hindi,
    Punjabi,
    Kannada,
    /// Hindi written in Latin script.
    Hinglish,
}

/// Non-Latin scripts in tie-break priority order (first wins on equal counts).
const SCRIPTS: &[(Language, char, char)] = &[
    (Language::Punjabi, '\u{0A00}', '\u{0A7F}'), // Gurmukhi
    (Language::Kannada, '\u{0C80}', '\u{0CFF}'),
    (Language::Hindi, '\u{0900}', '\u{097F}'), // Devanagari
];

/// Romanized Hindi words that rarely appear in English chat.
const HINGLISH_MARKERS: &[&str] = &[
    "kya", "hai", "mujhe", "chahiye", "kitna", "kitne", "aur", "nahi", "haan", "ji", "bhai",
    "dukan", "saman", "paisa", "rupee", "rupaye", "theek", "accha", "bahut", "dhanyavaad",
    "namaste", "bolo", "batao", "dikha", "do", "lena", "dena", "aapko",
];

/// Distinct marker words needed before Latin text counts as Hinglish.
const MIN_HINGLISH_MARKERS: usize = 2;

/// Classify an utterance into a supported language.
pub fn detect(text: &str) -> Language {
    if text.trim().is_empty() {
        return Language::default();
    }

    let mut counts = [0usize; SCRIPTS.len()];
    let mut latin = 0usize;
    for c in text.chars() {
        if c.is_ascii_alphabetic() {
            latin += 1;
            continue;
        }
        if let Some(i) = SCRIPTS.iter().position(|(_, lo, hi)| (*lo..=*hi).contains(&c)) {
            counts[i] += 1;
        }
    }

    let max = counts.iter().copied().max().unwrap_or(0);
    if max > 0 {
        // `position` returns the first index, which is the priority order.
        if let Some(i) = counts.iter().position(|&n| n == max) {
            return SCRIPTS[i].0;
        }
    }

    if latin > 0 && count_markers(text) >= MIN_HINGLISH_MARKERS {
        return Language::Hinglish;
    }

    Language::default()
}

/// Count distinct Hinglish marker words in whitespace-separated tokens.
fn count_markers(text: &str) -> usize {
    let lower = text.to_lowercase();
    let mut seen: Vec<&str> = Vec::new();
    for token in lower.split_whitespace() {
        let token = token.trim_matches(|c: char| c.is_ascii_punctuation());
        if let Some(marker) = HINGLISH_MARKERS.iter().find(|m| **m == token)
            && !seen.contains(marker)
        {
            seen.push(marker);
        }
    }
    seen.len()
}

impl Language {
    /// All supported languages.
    pub const ALL: [Language; 5] = [
        Language::English,
        Language::Hindi,
        Language::Punjabi,
        Language::Kannada,
        Language::Hinglish,
    ];

    /// Canonical tag as stored and exchanged over the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Hindi => "Hindi",
            Self::Punjabi => "Punjabi",
            Self::Kannada => "Kannada",
            Self::Hinglish => "Hinglish",
        }
    }

    /// Parse a stored tag, falling back to the default for unknown values.
    pub fn parse_or_default(tag: &str) -> Self {
        tag.parse().unwrap_or_default()
    }

    /// The reply-language directive included in composed prompts.
    pub fn instruction(&self) -> &'static str {
        match self {
            Self::English => "Respond in clear, simple English.",
            Self::Hindi => "Respond in Hindi (Devanagari script). Use simple everyday Hindi.",
            Self::Punjabi => "Respond in Punjabi (Gurmukhi script). Use simple everyday Punjabi.",
            Self::Kannada => "Respond in Kannada (Kannada script). Use simple everyday Kannada.",
            Self::Hinglish => {
                "Respond in Hinglish: everyday Hindi written in English (Latin) letters, \
                 the way the customer writes."
            }
        }
    }

    /// Shown when an order block was the whole reply.
    pub fn order_confirmation(&self) -> &'static str {
        match self {
            Self::English => "✅ Your order has been placed! We'll prepare it shortly. Thank you! 🙏",
            Self::Hindi => "✅ आपका ऑर्डर दर्ज हो गया है! हम इसे जल्द ही तैयार करेंगे। धन्यवाद! 🙏",
            Self::Punjabi => "✅ ਤੁਹਾਡਾ ਆਰਡਰ ਦਰਜ ਹੋ ਗਿਆ ਹੈ! ਅਸੀਂ ਇਸਨੂੰ ਜਲਦੀ ਤਿਆਰ ਕਰਾਂਗੇ। ਧੰਨਵਾਦ! 🙏",
            Self::Kannada => "✅ ನಿಮ್ಮ ಆರ್ಡರ್ ದಾಖಲಾಗಿದೆ! ನಾವು ಶೀಘ್ರದಲ್ಲೇ ಸಿದ್ಧಪಡಿಸುತ್ತೇವೆ. ಧನ್ಯವಾದಗಳು! 🙏",
            Self::Hinglish => "✅ Aapka order place ho gaya hai! Hum jaldi hi taiyaar karenge. Dhanyavaad! 🙏",
        }
    }

    /// Substituted when the backend produced no usable text.
    pub fn fallback_reply(&self) -> &'static str {
        match self {
            Self::English => "Sorry, I didn't catch that. Could you please say it again? 🙏",
            Self::Hindi => "माफ़ कीजिए, मैं समझ नहीं पाया। क्या आप फिर से बता सकते हैं? 🙏",
            Self::Punjabi => "ਮਾਫ਼ ਕਰਨਾ, ਮੈਂ ਸਮਝ ਨਹੀਂ ਸਕਿਆ। ਕੀ ਤੁਸੀਂ ਦੁਬਾਰਾ ਦੱਸ ਸਕਦੇ ਹੋ? 🙏",
            Self::Kannada => "ಕ್ಷಮಿಸಿ, ನನಗೆ ಅರ್ಥವಾಗಲಿಲ್ಲ. ದಯವಿಟ್ಟು ಮತ್ತೊಮ್ಮೆ ಹೇಳಬಹುದೇ? 🙏",
            Self::Hinglish => "Sorry, samajh nahi aaya. Kya aap phir se bata sakte hain? 🙏",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unsupported language: '{s}'"))
    }
}
