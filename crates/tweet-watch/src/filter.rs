//! Keyword matching over item text.

/// Keywords watched when none are configured. Common misspellings are
/// listed on purpose.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "alpha",
    "aplha",
    "积分",
    "points",
    "奖励",
    "reward",
    "空投",
    "airdrop",
    "alpha积分",
    "alpha points",
];

/// Case-insensitive substring filter over a fixed keyword set.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    /// Build a filter; keywords are lower-cased, blanks and case-insensitive
    /// duplicates dropped, first-seen order kept.
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for keyword in keywords {
            let keyword = keyword.as_ref().trim().to_lowercase();
            if !keyword.is_empty() && !normalized.contains(&keyword) {
                normalized.push(keyword);
            }
        }
        Self {
            keywords: normalized,
        }
    }

    /// The normalized keyword set.
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Keywords contained in `text`, in keyword-set order. Empty when
    /// nothing matches.
    #[must_use]
    pub fn matches(&self, text: &str) -> Vec<String> {
        let haystack = text.to_lowercase();
        self.keywords
            .iter()
            .filter(|keyword| haystack.contains(keyword.as_str()))
            .cloned()
            .collect()
    }
}

impl Default for KeywordFilter {
    fn default() -> Self {
        Self::new(DEFAULT_KEYWORDS)
    }
}
