use serde::{Deserialize, Serialize};

/// Safety classification of an [`AreaZone`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZoneType {
    NoFire,
    NoTraverse,
    #[default]
    Safety,
}

/// An azimuth/elevation/range polytope with a safety classification.
///
/// The azimuth arc runs from `start_azimuth` to `end_azimuth` wrapping
/// through 360 degrees; the range bounds are optional (both zero means
/// "any range").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AreaZone {
    pub id: u32,
    #[serde(rename = "type")]
    pub zone_type: ZoneType,
    pub is_enabled: bool,
    pub is_factory_set: bool,
    pub is_overridable: bool,
    pub start_azimuth: f32,
    pub end_azimuth: f32,
    pub min_elevation: f32,
    pub max_elevation: f32,
    pub min_range: f32,
    pub max_range: f32,
    pub name: String,
}

impl Default for AreaZone {
    fn default() -> Self {
        AreaZone {
            id: 0,
            zone_type: ZoneType::Safety,
            is_enabled: false,
            is_factory_set: false,
            is_overridable: false,
            start_azimuth: 0.0,
            end_azimuth: 0.0,
            min_elevation: 0.0,
            max_elevation: 0.0,
            min_range: 0.0,
            max_range: 0.0,
            name: String::new(),
        }
    }
}

/// Automatic sector-scan definition: two corner points and a sweep speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SectorScanZone {
    pub id: u32,
    pub is_enabled: bool,
    pub az1: f32,
    pub el1: f32,
    pub az2: f32,
    pub el2: f32,
    /// Sweep speed in degrees per second, valid range [1, 50].
    pub scan_speed: f32,
}

impl Default for SectorScanZone {
    fn default() -> Self {
        SectorScanZone {
            id: 0,
            is_enabled: false,
            az1: 0.0,
            el1: 0.0,
            az2: 0.0,
            el2: 0.0,
            scan_speed: 50.0,
        }
    }
}

/// A named aim point for quick recall, organised into pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetReferencePoint {
    pub id: u32,
    pub location_page: u32,
    pub trp_in_page: u32,
    pub azimuth: f32,
    pub elevation: f32,
    /// Dwell time in seconds when visited by a TRP scan.
    pub halt_time: f32,
}

impl Default for TargetReferencePoint {
    fn default() -> Self {
        TargetReferencePoint {
            id: 0,
            location_page: 1,
            trp_in_page: 1,
            azimuth: 0.0,
            elevation: 0.0,
            halt_time: 0.0,
        }
    }
}

/// On-disk schema of the zone persistence file.
///
/// Unknown future fields are tolerated on load; entries that fail to
/// deserialize are skipped by the loader, not fatal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZoneFile {
    pub zone_file_version: u32,
    pub next_area_zone_id: u32,
    pub next_sector_scan_id: u32,
    #[serde(rename = "nextTRPId")]
    pub next_trp_id: u32,
    pub area_zones: Vec<serde_json::Value>,
    pub sector_scan_zones: Vec<serde_json::Value>,
    pub target_reference_points: Vec<serde_json::Value>,
}

pub const ZONE_FILE_VERSION: u32 = 1;
