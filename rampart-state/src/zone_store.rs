//! Zone persistence: a versioned JSON file holding all three zone kinds
//! and the next-id counters.
//!
//! Loading is tolerant: unknown future fields are ignored and entries
//! that are missing required fields are skipped with a warning. Saving
//! writes to a sibling temporary file and renames it into place.

use std::path::Path;

use tracing::{debug, warn};

use rampart_types::{
    AreaZone, SectorScanZone, TargetReferencePoint, ZoneFile, ZONE_FILE_VERSION,
};

use crate::Result;

/// The three zone lists plus recovered next-id counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneCollections {
    pub area_zones: Vec<AreaZone>,
    pub sector_scan_zones: Vec<SectorScanZone>,
    pub target_reference_points: Vec<TargetReferencePoint>,
    pub next_area_zone_id: u32,
    pub next_sector_scan_id: u32,
    pub next_trp_id: u32,
}

/// Save all zones to `path` (write-then-rename).
pub fn save_zones(path: &Path, zones: &ZoneCollections) -> Result<()> {
    let file = ZoneFile {
        zone_file_version: ZONE_FILE_VERSION,
        next_area_zone_id: zones.next_area_zone_id,
        next_sector_scan_id: zones.next_sector_scan_id,
        next_trp_id: zones.next_trp_id,
        area_zones: zones
            .area_zones
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<_, _>>()?,
        sector_scan_zones: zones
            .sector_scan_zones
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<_, _>>()?,
        target_reference_points: zones
            .target_reference_points
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<_, _>>()?,
    };

    let json = serde_json::to_string_pretty(&file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    debug!("zones saved to {}", path.display());
    Ok(())
}

/// Load zones from `path`. Per-entry failures are skipped, not fatal.
pub fn load_zones(path: &Path) -> Result<ZoneCollections> {
    let raw = std::fs::read_to_string(path)?;
    let file: ZoneFile = serde_json::from_str(&raw)?;

    if file.zone_file_version > ZONE_FILE_VERSION {
        warn!(
            "zones file {} has newer version {}, compatibility not guaranteed",
            path.display(),
            file.zone_file_version
        );
    }

    let mut zones = ZoneCollections {
        next_area_zone_id: file.next_area_zone_id.max(1),
        next_sector_scan_id: file.next_sector_scan_id.max(1),
        next_trp_id: file.next_trp_id.max(1),
        ..Default::default()
    };

    for value in file.area_zones {
        match serde_json::from_value::<AreaZone>(value) {
            Ok(zone) if zone.id != 0 => zones.area_zones.push(zone),
            Ok(_) => warn!("skipping area zone entry with missing or invalid id"),
            Err(e) => warn!("skipping malformed area zone entry: {e}"),
        }
    }
    for value in file.sector_scan_zones {
        match serde_json::from_value::<SectorScanZone>(value) {
            Ok(zone) if zone.id != 0 => zones.sector_scan_zones.push(zone),
            Ok(_) => warn!("skipping sector scan entry with missing or invalid id"),
            Err(e) => warn!("skipping malformed sector scan entry: {e}"),
        }
    }
    for value in file.target_reference_points {
        match serde_json::from_value::<TargetReferencePoint>(value) {
            Ok(trp) if trp.id != 0 => zones.target_reference_points.push(trp),
            Ok(_) => warn!("skipping TRP entry with missing or invalid id"),
            Err(e) => warn!("skipping malformed TRP entry: {e}"),
        }
    }

    update_next_ids(&mut zones);
    Ok(zones)
}

/// Advance the counters past the highest loaded id of each kind.
fn update_next_ids(zones: &mut ZoneCollections) {
    let max_area = zones.area_zones.iter().map(|z| z.id).max().unwrap_or(0);
    zones.next_area_zone_id = zones.next_area_zone_id.max(max_area + 1);

    let max_sector = zones
        .sector_scan_zones
        .iter()
        .map(|z| z.id)
        .max()
        .unwrap_or(0);
    zones.next_sector_scan_id = zones.next_sector_scan_id.max(max_sector + 1);

    let max_trp = zones
        .target_reference_points
        .iter()
        .map(|t| t.id)
        .max()
        .unwrap_or(0);
    zones.next_trp_id = zones.next_trp_id.max(max_trp + 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_types::ZoneType;

    #[test]
    fn round_trip_preserves_all_fields_and_advances_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.json");

        let zones = ZoneCollections {
            area_zones: vec![AreaZone {
                id: 3,
                zone_type: ZoneType::NoFire,
                is_enabled: true,
                start_azimuth: 90.0,
                end_azimuth: 180.0,
                min_elevation: -5.0,
                max_elevation: 30.0,
                name: "harbour".to_string(),
                ..Default::default()
            }],
            sector_scan_zones: vec![SectorScanZone {
                id: 2,
                is_enabled: true,
                az1: 10.0,
                el1: 5.0,
                az2: 170.0,
                el2: 5.0,
                scan_speed: 20.0,
            }],
            target_reference_points: vec![TargetReferencePoint {
                id: 7,
                location_page: 1,
                trp_in_page: 1,
                azimuth: 45.0,
                elevation: 15.0,
                halt_time: 2.0,
            }],
            next_area_zone_id: 4,
            next_sector_scan_id: 3,
            next_trp_id: 8,
        };

        save_zones(&path, &zones).unwrap();
        let loaded = load_zones(&path).unwrap();

        assert_eq!(loaded.area_zones, zones.area_zones);
        assert_eq!(loaded.sector_scan_zones, zones.sector_scan_zones);
        assert_eq!(loaded.target_reference_points, zones.target_reference_points);
        assert!(loaded.next_area_zone_id >= 4);
        assert!(loaded.next_sector_scan_id >= 3);
        assert!(loaded.next_trp_id >= 8);
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zones.json");
        let json = r#"{
            "zoneFileVersion": 1,
            "nextAreaZoneId": 1,
            "nextSectorScanId": 1,
            "nextTRPId": 1,
            "areaZones": [
                {"id": 5, "type": "NoFire", "startAzimuth": 10.0, "endAzimuth": 20.0},
                {"startAzimuth": 99.0},
                "not an object"
            ],
            "sectorScanZones": [],
            "targetReferencePoints": [],
            "futureField": {"ignored": true}
        }"#;
        std::fs::write(&path, json).unwrap();

        let loaded = load_zones(&path).unwrap();
        assert_eq!(loaded.area_zones.len(), 1);
        assert_eq!(loaded.area_zones[0].id, 5);
        assert_eq!(loaded.next_area_zone_id, 6);
    }

    #[test]
    fn missing_file_is_an_error_not_a_panic() {
        assert!(load_zones(Path::new("/nonexistent/zones.json")).is_err());
    }
}
