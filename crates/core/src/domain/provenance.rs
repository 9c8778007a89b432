use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Trust tag attached to every value the engine produces.
///
/// Variants are declared from least to most trustworthy, so the derived
/// `Ord` doubles as the trust order and `min` picks the weakest tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Error,
    Stub,
    Degraded,
    Cached,
    Real,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Stub => "stub",
            Self::Degraded => "degraded",
            Self::Cached => "cached",
            Self::Real => "real",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Self::Error),
            "stub" => Some(Self::Stub),
            "degraded" => Some(Self::Degraded),
            "cached" => Some(Self::Cached),
            "real" => Some(Self::Real),
            _ => None,
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self, Self::Real)
    }

    /// The less trustworthy of the two tags.
    pub fn combine(self, other: Provenance) -> Provenance {
        self.min(other)
    }

    /// Weakest tag in `tags`, or `Real` when there is nothing to weaken it.
    pub fn weakest<I>(tags: I) -> Provenance
    where
        I: IntoIterator<Item = Provenance>,
    {
        tags.into_iter().fold(Provenance::Real, Provenance::combine)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provenance {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| CoreError::UnknownProvenance(s.to_string()))
    }
}
