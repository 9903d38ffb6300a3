//! Change detection for reconciliation
//!
//! Decides whether an incoming catalog item is new, unchanged, or an update
//! of the stored record. Which fields take part in the comparison is
//! configurable; fields that drift on every scan (such as the community
//! rating) can be left out so they do not turn every run into a rewrite.

use bridge_traits::CatalogItem;
use core_library::StoredRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Comparable attribute of a catalog item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogField {
    ExternalIds,
    Title,
    Year,
    Kind,
    Genres,
    Synopsis,
    Artwork,
    Runtime,
    Rating,
    FilePath,
}

impl CatalogField {
    pub const ALL: [CatalogField; 10] = [
        CatalogField::ExternalIds,
        CatalogField::Title,
        CatalogField::Year,
        CatalogField::Kind,
        CatalogField::Genres,
        CatalogField::Synopsis,
        CatalogField::Artwork,
        CatalogField::Runtime,
        CatalogField::Rating,
        CatalogField::FilePath,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogField::ExternalIds => "external_ids",
            CatalogField::Title => "title",
            CatalogField::Year => "year",
            CatalogField::Kind => "kind",
            CatalogField::Genres => "genres",
            CatalogField::Synopsis => "synopsis",
            CatalogField::Artwork => "artwork",
            CatalogField::Runtime => "runtime",
            CatalogField::Rating => "rating",
            CatalogField::FilePath => "file_path",
        }
    }

    fn differs(&self, a: &CatalogItem, b: &CatalogItem) -> bool {
        match self {
            CatalogField::ExternalIds => a.external_ids != b.external_ids,
            CatalogField::Title => a.title != b.title,
            CatalogField::Year => a.year != b.year,
            CatalogField::Kind => a.kind != b.kind,
            CatalogField::Genres => a.genres != b.genres,
            CatalogField::Synopsis => a.synopsis != b.synopsis,
            CatalogField::Artwork => a.artwork != b.artwork,
            CatalogField::Runtime => a.runtime_minutes != b.runtime_minutes,
            CatalogField::Rating => a.rating != b.rating,
            CatalogField::FilePath => a.file_path != b.file_path,
        }
    }
}

impl fmt::Display for CatalogField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an incoming item relates to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    New,
    Unchanged,
    /// Fields that differ, in declaration order
    Updated(Vec<CatalogField>),
}

/// Field-by-field comparison over a configurable field set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDetector {
    fields: BTreeSet<CatalogField>,
}

impl ChangeDetector {
    pub fn new(fields: impl IntoIterator<Item = CatalogField>) -> Self {
        Self {
            fields: fields.into_iter().collect(),
        }
    }

    /// Compare every field, volatile ones included
    pub fn strict() -> Self {
        Self::new(CatalogField::ALL)
    }

    pub fn fields(&self) -> &BTreeSet<CatalogField> {
        &self.fields
    }

    pub fn changed_fields(&self, stored: &CatalogItem, incoming: &CatalogItem) -> Vec<CatalogField> {
        self.fields
            .iter()
            .copied()
            .filter(|field| field.differs(stored, incoming))
            .collect()
    }

    pub fn classify(&self, existing: Option<&StoredRecord>, incoming: &CatalogItem) -> Classification {
        let Some(existing) = existing else {
            return Classification::New;
        };

        let changed = self.changed_fields(&existing.item, incoming);
        if changed.is_empty() {
            Classification::Unchanged
        } else {
            Classification::Updated(changed)
        }
    }
}

/// Every field except [`CatalogField::Rating`]
impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(
            CatalogField::ALL
                .into_iter()
                .filter(|field| *field != CatalogField::Rating),
        )
    }
}
