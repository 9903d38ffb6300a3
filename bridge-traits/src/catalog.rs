//! Catalog Value Types
//!
//! The provider-neutral shape of one remote catalog entry. Providers produce
//! [`CatalogItem`]s, the store persists them, and the sync engine compares
//! them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Category of a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Movie,
    Series,
}

impl MediaKind {
    pub const ALL: [MediaKind; 2] = [MediaKind::Movie, MediaKind::Series];

    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "series",
        }
    }

    /// Item type name used by the remote library API
    pub fn api_name(&self) -> &'static str {
        match self {
            MediaKind::Movie => "Movie",
            MediaKind::Series => "Series",
        }
    }

    /// Inverse of [`MediaKind::api_name`]; unknown remote types yield `None`.
    pub fn from_api_name(name: &str) -> Option<Self> {
        match name {
            "Movie" => Some(MediaKind::Movie),
            "Series" => Some(MediaKind::Series),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(MediaKind::Movie),
            "series" => Ok(MediaKind::Series),
            _ => Err(format!("Invalid media kind: {}", s)),
        }
    }
}

/// One entry of the remote catalog, as read from a page.
///
/// Maps use `BTreeMap` so that equality and serialization are independent of
/// the order the server returned keys in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Identifier assigned by the remote library. Unique per catalog.
    pub remote_id: String,
    /// Cross references into third-party metadata sources, e.g. `"Tmdb" -> "603"`.
    pub external_ids: BTreeMap<String, String>,
    pub title: String,
    pub year: Option<i32>,
    pub kind: MediaKind,
    pub genres: Vec<String>,
    pub synopsis: Option<String>,
    /// Artwork slot to image tag, e.g. `"Primary" -> "a1b2c3"`.
    pub artwork: BTreeMap<String, String>,
    pub runtime_minutes: Option<u32>,
    pub rating: Option<f32>,
    pub file_path: Option<String>,
}

impl CatalogItem {
    /// Minimal item with only the required attributes set.
    pub fn new(remote_id: impl Into<String>, title: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            remote_id: remote_id.into(),
            external_ids: BTreeMap::new(),
            title: title.into(),
            year: None,
            kind,
            genres: Vec::new(),
            synopsis: None,
            artwork: BTreeMap::new(),
            runtime_minutes: None,
            rating: None,
            file_path: None,
        }
    }

    /// Short human-readable label for progress reporting.
    pub fn label(&self) -> String {
        match self.year {
            Some(year) => format!("{} ({})", self.title, year),
            None => self.title.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_round_trips_through_storage_name() {
        for kind in MediaKind::ALL {
            assert_eq!(kind.as_str().parse::<MediaKind>().unwrap(), kind);
            assert_eq!(MediaKind::from_api_name(kind.api_name()), Some(kind));
        }
        assert!("episode".parse::<MediaKind>().is_err());
        assert_eq!(MediaKind::from_api_name("Episode"), None);
    }

    #[test]
    fn test_item_label() {
        let mut item = CatalogItem::new("x", "The Matrix", MediaKind::Movie);
        assert_eq!(item.label(), "The Matrix");

        item.year = Some(1999);
        assert_eq!(item.label(), "The Matrix (1999)");
    }

    #[test]
    fn test_item_serde_uses_snake_case_kind() {
        let item = CatalogItem::new("x", "Dark", MediaKind::Series);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["kind"], "series");
    }
}
