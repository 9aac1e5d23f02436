//! Text preprocessing for company names.
//!
//! The default pipeline trims, lowercases, strips special characters, and
//! removes corporate-suffix stopwords, so "Acme Corp" and "ACME Inc."
//! normalize to the same key. A custom transform can be injected instead;
//! it is stored on the matcher at construction time and applied to every
//! name before embedding.

use regex::Regex;
use std::sync::LazyLock;

/// Default corporate-suffix stopwords removed by the default pipeline.
///
/// Each matcher instance clones its own list; there is no shared mutable
/// default.
pub const DEFAULT_STOPWORDS: [&str; 7] = [
    "inc",
    "corp",
    "corporation",
    "llc",
    "ltd",
    "limited",
    "company",
];

static STRIP_SPECIAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\s]").expect("static pattern is valid"));

enum Transform {
    Default { stopwords: Vec<String> },
    Custom(Box<dyn Fn(&str) -> String + Send + Sync>),
}

/// Pluggable name normalizer applied before embedding and cache lookup.
pub struct Preprocessor {
    transform: Transform,
}

impl Preprocessor {
    /// Default pipeline with a caller-provided stopword list.
    ///
    /// An empty list disables stopword removal but keeps lowercasing and
    /// special-character stripping.
    #[must_use]
    pub fn with_stopwords(stopwords: Vec<String>) -> Self {
        Self {
            transform: Transform::Default { stopwords },
        }
    }

    /// Wraps an arbitrary text transform. The function must be pure and
    /// deterministic; it is called from worker threads during batch
    /// matching.
    #[must_use]
    pub fn custom(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            transform: Transform::Custom(Box::new(f)),
        }
    }

    /// Applies the configured transform to a raw name.
    #[must_use]
    pub fn apply(&self, name: &str) -> String {
        match &self.transform {
            Transform::Default { stopwords } => {
                let lowered = name.trim().to_lowercase();
                let stripped = STRIP_SPECIAL.replace_all(&lowered, "");
                if stopwords.is_empty() {
                    return stripped.split_whitespace().collect::<Vec<_>>().join(" ");
                }
                stripped
                    .split_whitespace()
                    .filter(|word| !stopwords.iter().any(|s| s == word))
                    .collect::<Vec<_>>()
                    .join(" ")
            }
            Transform::Custom(f) => f(name),
        }
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::with_stopwords(DEFAULT_STOPWORDS.iter().map(|s| s.to_string()).collect())
    }
}

impl std::fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.transform {
            Transform::Default { stopwords } => f
                .debug_struct("Preprocessor")
                .field("transform", &"default")
                .field("stopwords", stopwords)
                .finish(),
            Transform::Custom(_) => f
                .debug_struct("Preprocessor")
                .field("transform", &"custom")
                .finish(),
        }
    }
}
