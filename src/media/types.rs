use serde::Serialize;
use std::fmt;

pub const UNKNOWN_RESOLUTION: &str = "unknown";
pub const BEST_FORMAT: &str = "best";

/// One selectable encoding of a source video as advertised by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingOption {
    pub format_id: String,
    pub resolution: String,
    pub approx_size: String,
}

impl EncodingOption {
    pub fn has_known_resolution(&self) -> bool {
        self.resolution != UNKNOWN_RESOLUTION
    }
}

/// Which encoding to retrieve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSelector {
    /// Let the backend apply its default-quality logic
    Default,
    /// Let the backend pick its own highest-quality stream
    Best,
    /// An opaque `format_id` from the catalog
    Exact(String),
}

impl FormatSelector {
    pub fn from_callback_value(value: &str) -> Self {
        match value {
            BEST_FORMAT => FormatSelector::Best,
            "" => FormatSelector::Default,
            other => FormatSelector::Exact(other.to_string()),
        }
    }
}

impl fmt::Display for FormatSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatSelector::Default => f.write_str("default"),
            FormatSelector::Best => f.write_str(BEST_FORMAT),
            FormatSelector::Exact(id) => f.write_str(id),
        }
    }
}

/// A button in the quality menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub label: String,
    pub callback: String,
}
