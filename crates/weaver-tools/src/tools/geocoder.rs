//! Deterministic geocoder provider.

use async_trait::async_trait;
use serde_json::json;

use crate::{Tool, ToolContext, ToolError, ToolRequest, ToolResponse};

/// A geocoding entry: needle phrase → place.
#[derive(Debug, Clone)]
pub struct GeoEntry {
    /// Case-insensitive phrase matched against the input text.
    pub needle: String,
    /// Canonical place label returned on match.
    pub place_label: String,
    /// Longitude, latitude.
    pub coordinates: (f64, f64),
}

/// Lookup-table geocoder conforming to the geocoder tool contract:
/// `text → {coordinates|null, place_label, geometry_type}`.
///
/// Real deployments register a provider backed by an actual geocoding
/// service; this deterministic table serves tests and local development.
#[derive(Debug, Clone, Default)]
pub struct StaticGeocoder {
    entries: Vec<GeoEntry>,
}

impl StaticGeocoder {
    /// A geocoder with no entries (always unmatched).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lookup entry.
    pub fn with_entry(
        mut self,
        needle: impl Into<String>,
        place_label: impl Into<String>,
        coordinates: (f64, f64),
    ) -> Self {
        self.entries.push(GeoEntry {
            needle: needle.into().to_lowercase(),
            place_label: place_label.into(),
            coordinates,
        });
        self
    }
}

#[async_trait]
impl Tool for StaticGeocoder {
    fn name(&self) -> &str {
        "geocoder"
    }

    fn description(&self) -> &str {
        "Resolves place references in text to coordinates and a place label"
    }

    async fn invoke(
        &self,
        request: &ToolRequest,
        _ctx: &ToolContext,
    ) -> Result<ToolResponse, ToolError> {
        let haystack = request.input.to_lowercase();
        let hit = self.entries.iter().find(|e| haystack.contains(&e.needle));
        let output = match hit {
            Some(entry) => json!({
                "coordinates": [entry.coordinates.0, entry.coordinates.1],
                "place_label": entry.place_label,
                "geometry_type": "Point",
            }),
            None => json!({
                "coordinates": null,
                "place_label": "",
                "geometry_type": "unknown",
            }),
        };
        Ok(ToolResponse::structured(output))
    }
}
