//! Library API response types
//!
//! Data structures for deserializing the remote `/Items` endpoint.

use bridge_traits::{CatalogItem, MediaKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Runtime ticks are 100 ns units.
pub const TICKS_PER_MINUTE: i64 = 600_000_000;

/// One library item as returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BaseItemDto {
    pub id: String,

    pub name: String,

    /// Item type, e.g. `Movie` or `Series`
    #[serde(rename = "Type")]
    pub item_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub production_year: Option<i32>,

    #[serde(default)]
    pub genres: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,

    #[serde(default)]
    pub image_tags: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_time_ticks: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub community_rating: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default)]
    pub provider_ids: BTreeMap<String, String>,
}

impl BaseItemDto {
    /// Convert to a catalog item. Items of an unsupported type yield `None`.
    pub fn into_catalog_item(self) -> Option<CatalogItem> {
        let kind = MediaKind::from_api_name(&self.item_type)?;

        Some(CatalogItem {
            remote_id: self.id,
            external_ids: self.provider_ids,
            title: self.name,
            year: self.production_year,
            kind,
            genres: self.genres,
            synopsis: self.overview,
            artwork: self.image_tags,
            runtime_minutes: self
                .run_time_ticks
                .filter(|ticks| *ticks >= 0)
                .and_then(|ticks| u32::try_from(ticks / TICKS_PER_MINUTE).ok()),
            rating: self.community_rating,
            file_path: self.path,
        })
    }
}

impl From<&CatalogItem> for BaseItemDto {
    fn from(item: &CatalogItem) -> Self {
        Self {
            id: item.remote_id.clone(),
            name: item.title.clone(),
            item_type: item.kind.api_name().to_string(),
            production_year: item.year,
            genres: item.genres.clone(),
            overview: item.synopsis.clone(),
            image_tags: item.artwork.clone(),
            run_time_ticks: item
                .runtime_minutes
                .map(|minutes| i64::from(minutes) * TICKS_PER_MINUTE),
            community_rating: item.rating,
            path: item.file_path.clone(),
            provider_ids: item.external_ids.clone(),
        }
    }
}

/// `/Items` list response
///
/// Entries stay raw JSON by default so one malformed item does not fail the
/// whole page. See [`decode_item`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemsResponse<T = serde_json::Value> {
    pub items: Vec<T>,

    /// Server-reported size of the whole filtered collection
    pub total_record_count: u64,

    #[serde(default)]
    pub start_index: u64,
}

/// Result of decoding one raw `Items` entry
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedItem {
    Item(CatalogItem),
    /// Well-formed entry of a type the catalog does not track
    Unsupported { item_type: String },
    /// Entry missing required fields or carrying wrongly typed ones
    Malformed {
        remote_id: Option<String>,
        reason: String,
    },
}

/// Decode one entry of an `/Items` response.
pub fn decode_item(raw: serde_json::Value) -> DecodedItem {
    let remote_id = raw
        .get("Id")
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string);

    let dto = match serde_json::from_value::<BaseItemDto>(raw) {
        Ok(dto) => dto,
        Err(e) => {
            return DecodedItem::Malformed {
                remote_id,
                reason: e.to_string(),
            }
        }
    };

    let item_type = dto.item_type.clone();
    match dto.into_catalog_item() {
        Some(item) => DecodedItem::Item(item),
        None => DecodedItem::Unsupported { item_type },
    }
}
