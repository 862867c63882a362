//! Schemas of the SpaceX launch, payload and launchpad documents
//!
//! Column names are the flattened (`_`-joined) paths of the v5 launches and
//! v4 payloads / launchpads API responses.

use super::{ColumnSpec, TableSchema};

use super::ColumnKind::{Boolean, Float, Integer, Json, SerializedJson, Text, Timestamp};

/// Look up a schema by its registered name
pub fn registered(name: &str) -> Option<TableSchema> {
    match name {
        "launches" => Some(launches()),
        "payloads" => Some(payloads()),
        "launchpads" => Some(launchpads()),
        _ => None,
    }
}

/// Primary fact table: one row per launch
pub fn launches() -> TableSchema {
    TableSchema::new(
        "launches",
        1,
        vec![
            ColumnSpec::required("id", Text),
            ColumnSpec::optional("flight_number", Integer),
            ColumnSpec::optional("name", Text),
            ColumnSpec::optional("date_utc", Timestamp),
            ColumnSpec::optional("date_unix", Integer),
            ColumnSpec::optional("date_local", Timestamp),
            ColumnSpec::optional("date_precision", Text),
            ColumnSpec::optional("static_fire_date_utc", Timestamp),
            ColumnSpec::optional("static_fire_date_unix", Integer),
            ColumnSpec::optional("net", Boolean),
            ColumnSpec::optional("window", Integer),
            ColumnSpec::optional("rocket", Text),
            ColumnSpec::optional("success", Boolean),
            ColumnSpec::optional("failures", SerializedJson),
            ColumnSpec::optional("upcoming", Boolean),
            ColumnSpec::optional("details", Text),
            ColumnSpec::optional("crew", SerializedJson),
            ColumnSpec::optional("ships", Json),
            ColumnSpec::optional("capsules", Json),
            ColumnSpec::optional("payloads", Json),
            ColumnSpec::optional("launchpad", Text),
            ColumnSpec::optional("cores", SerializedJson),
            ColumnSpec::optional("auto_update", Boolean),
            ColumnSpec::optional("tbd", Boolean),
            ColumnSpec::optional("launch_library_id", Text),
            ColumnSpec::optional("fairings_reused", Boolean),
            ColumnSpec::optional("fairings_recovery_attempt", Boolean),
            ColumnSpec::optional("fairings_recovered", Boolean),
            ColumnSpec::optional("fairings_ships", Json),
            ColumnSpec::optional("links_patch_small", Text),
            ColumnSpec::optional("links_patch_large", Text),
            ColumnSpec::optional("links_reddit_campaign", Text),
            ColumnSpec::optional("links_reddit_launch", Text),
            ColumnSpec::optional("links_reddit_media", Text),
            ColumnSpec::optional("links_reddit_recovery", Text),
            ColumnSpec::optional("links_flickr_small", Json),
            ColumnSpec::optional("links_flickr_original", Json),
            ColumnSpec::optional("links_presskit", Text),
            ColumnSpec::optional("links_webcast", Text),
            ColumnSpec::optional("links_youtube_id", Text),
            ColumnSpec::optional("links_article", Text),
            ColumnSpec::optional("links_wikipedia", Text),
        ],
    )
}

pub fn payloads() -> TableSchema {
    TableSchema::new(
        "payloads",
        1,
        vec![
            ColumnSpec::required("id", Text),
            ColumnSpec::optional("name", Text),
            ColumnSpec::optional("type", Text),
            ColumnSpec::optional("reused", Boolean),
            ColumnSpec::optional("launch", Text),
            ColumnSpec::optional("customers", Json),
            ColumnSpec::optional("norad_ids", Json),
            ColumnSpec::optional("nationalities", Json),
            ColumnSpec::optional("manufacturers", Json),
            ColumnSpec::optional("mass_kg", Float),
            ColumnSpec::optional("mass_lbs", Float),
            ColumnSpec::optional("orbit", Text),
            ColumnSpec::optional("reference_system", Text),
            ColumnSpec::optional("regime", Text),
            ColumnSpec::optional("longitude", Float),
            ColumnSpec::optional("semi_major_axis_km", Float),
            ColumnSpec::optional("eccentricity", Float),
            ColumnSpec::optional("periapsis_km", Float),
            ColumnSpec::optional("apoapsis_km", Float),
            ColumnSpec::optional("inclination_deg", Float),
            ColumnSpec::optional("period_min", Float),
            ColumnSpec::optional("lifespan_years", Float),
            ColumnSpec::optional("epoch", Text),
            ColumnSpec::optional("mean_motion", Float),
            ColumnSpec::optional("raan", Float),
            ColumnSpec::optional("arg_of_pericenter", Float),
            ColumnSpec::optional("mean_anomaly", Float),
            ColumnSpec::optional("dragon_capsule", Text),
            ColumnSpec::optional("dragon_mass_returned_kg", Float),
            ColumnSpec::optional("dragon_mass_returned_lbs", Float),
            ColumnSpec::optional("dragon_flight_time_sec", Integer),
            ColumnSpec::optional("dragon_manifest", Text),
            ColumnSpec::optional("dragon_water_landing", Boolean),
            ColumnSpec::optional("dragon_land_landing", Boolean),
        ],
    )
}

pub fn launchpads() -> TableSchema {
    TableSchema::new(
        "launchpads",
        1,
        vec![
            ColumnSpec::required("id", Text),
            ColumnSpec::optional("name", Text),
            ColumnSpec::optional("full_name", Text),
            ColumnSpec::optional("locality", Text),
            ColumnSpec::optional("region", Text),
            ColumnSpec::optional("timezone", Text),
            ColumnSpec::optional("latitude", Float),
            ColumnSpec::optional("longitude", Float),
            ColumnSpec::optional("launch_attempts", Integer),
            ColumnSpec::optional("launch_successes", Integer),
            ColumnSpec::optional("rockets", Json),
            ColumnSpec::optional("launches", Json),
            ColumnSpec::optional("status", Text),
            ColumnSpec::optional("details", Text),
            ColumnSpec::optional("images_large", Json),
        ],
    )
}
