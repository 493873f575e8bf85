//! Donation categories.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of a donated good.
///
/// The wire carries the category as an upper-case name. Names this node does
/// not recognise are kept verbatim in `Unknown` so that messages from newer
/// peers still round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DonationCategory {
    /// Clothing.
    Ropa,
    /// Food.
    Alimentos,
    /// Toys.
    Juguetes,
    /// School supplies.
    UtilesEscolares,
    /// A category outside the known set.
    Unknown(String),
}

impl DonationCategory {
    /// The wire name of the category.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ropa => "ROPA",
            Self::Alimentos => "ALIMENTOS",
            Self::Juguetes => "JUGUETES",
            Self::UtilesEscolares => "UTILES_ESCOLARES",
            Self::Unknown(raw) => raw,
        }
    }

    /// Returns `true` for categories outside the known set.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }
}

impl From<String> for DonationCategory {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "ROPA" => Self::Ropa,
            "ALIMENTOS" => Self::Alimentos,
            "JUGUETES" => Self::Juguetes,
            "UTILES_ESCOLARES" => Self::UtilesEscolares,
            _ => Self::Unknown(value),
        }
    }
}

impl From<&str> for DonationCategory {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}

impl From<DonationCategory> for String {
    fn from(value: DonationCategory) -> Self {
        match value {
            DonationCategory::Unknown(raw) => raw,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for DonationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
