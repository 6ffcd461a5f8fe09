//! Pipeline configuration.
//!
//! Everything is read from the environment (a `.env` file is
//! loaded by the binary), then selectively overridden from
//! the command line.
use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    time::Duration,
};

use anyhow::{Context, Result};

/// Prefix of per-district recipient variables
/// (`EMAIL_DISTRICT_SWAN_COASTAL=a@x, b@y`).
const DISTRICT_EMAIL_PREFIX: &str = "EMAIL_DISTRICT_";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root under which flight directories are extracted.
    pub destination_folder: PathBuf,
    /// Prefix stripped from the flight name to get its timestamp.
    pub flight_prefix: String,
    pub frame_dir: PathBuf,
    pub boundary_dir: PathBuf,
    pub output_dir: PathBuf,
    pub frame_ext: String,
    /// CRS of the frames' georeferencing.
    pub source_epsg: u32,
    /// Append-only geometry database.
    pub database_path: PathBuf,
    pub districts_path: Option<PathBuf>,
    pub districts_field: String,
    /// Where artifacts are pushed; `None` disables pushing.
    pub storage_root: Option<PathBuf>,
    /// Directory of the per-flight report files.
    pub log_dir: PathBuf,
    pub sync: SyncConfig,
    /// Upper bound of any single mosaic, conversion or
    /// storage call.
    pub call_timeout: Duration,
    pub geoserver: Option<GeoServerConfig>,
    pub email: Option<EmailConfig>,
}

/// Waits that let the external storage sync catch up.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub delay: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct GeoServerConfig {
    /// REST endpoint of the coverage stores of the workspace.
    pub url_base: String,
    /// URL under which GeoServer sees the storage root.
    pub file_url_base: String,
    pub workspace: String,
    pub srs: String,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub server_token: String,
    pub from: String,
    /// Recipients of every notification.
    pub always: String,
    /// District identifier to recipients.
    pub districts: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            destination_folder: PathBuf::from("."),
            flight_prefix: "FireFlight_".to_string(),
            frame_dir: PathBuf::from("PNGs/CAMERA1"),
            boundary_dir: PathBuf::from("KML Boundaries/CAMERA1"),
            output_dir: PathBuf::from("Processed"),
            frame_ext: "png".to_string(),
            source_epsg: 28350,
            database_path: PathBuf::from("hotspots.sqlite"),
            districts_path: None,
            districts_field: "ADMIN_ZONE".to_string(),
            storage_root: None,
            log_dir: PathBuf::from("logs"),
            sync: SyncConfig::default(),
            call_timeout: Duration::from_secs(600),
            geoserver: None,
            email: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let get = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();
        let secs = |key: &str, default: u64| -> Result<Duration> {
            Ok(Duration::from_secs(match get(key) {
                Some(v) => v.parse().with_context(|| format!("invalid {}: {}", key, v))?,
                None => default,
            }))
        };

        let defaults = Self::default();
        let source_epsg = match get("THERMAL_SOURCE_EPSG") {
            Some(v) => v
                .parse()
                .with_context(|| format!("invalid THERMAL_SOURCE_EPSG: {}", v))?,
            None => defaults.source_epsg,
        };

        let geoserver = match (get("GEOSERVER_USER"), get("GEOSERVER_PASSWORD")) {
            (Some(user), Some(password)) => Some(GeoServerConfig {
                url_base: get("GEOSERVER_URL_BASE").unwrap_or_else(|| {
                    "https://hotspots.dbca.wa.gov.au/geoserver/rest/workspaces/hotspots/coveragestores/"
                        .to_string()
                }),
                file_url_base: get("GEOSERVER_FILE_URL_BASE").unwrap_or_else(|| {
                    "file:///rclone-mounts/thermalimaging-flightmosaics/".to_string()
                }),
                workspace: get("GEOSERVER_WORKSPACE").unwrap_or_else(|| "hotspots".to_string()),
                srs: get("GEOSERVER_SRS").unwrap_or_else(|| "EPSG:28350".to_string()),
                user,
                password,
                timeout: secs("GEOSERVER_TIMEOUT_SECS", 60)?,
            }),
            _ => None,
        };

        let email = match get("POSTMARK_SERVER_TOKEN") {
            Some(server_token) => Some(EmailConfig {
                server_token,
                from: get("EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|| "no-reply@dbca.wa.gov.au".to_string()),
                always: get("EMAIL_ALWAYS").unwrap_or_default(),
                districts: vars
                    .iter()
                    .filter_map(|(k, v)| {
                        k.strip_prefix(DISTRICT_EMAIL_PREFIX)
                            .map(|district| (district.to_string(), v.clone()))
                    })
                    .collect(),
                timeout: secs("EMAIL_TIMEOUT_SECS", 30)?,
            }),
            None => None,
        };

        Ok(Self {
            destination_folder: get("THERMAL_DESTINATION_FOLDER")
                .map(PathBuf::from)
                .unwrap_or(defaults.destination_folder),
            flight_prefix: get("THERMAL_FLIGHT_PREFIX").unwrap_or(defaults.flight_prefix),
            frame_dir: get("THERMAL_FRAME_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.frame_dir),
            boundary_dir: get("THERMAL_BOUNDARY_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.boundary_dir),
            output_dir: get("THERMAL_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            frame_ext: get("THERMAL_FRAME_EXT").unwrap_or(defaults.frame_ext),
            source_epsg,
            database_path: get("THERMAL_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            districts_path: get("THERMAL_DISTRICTS_PATH").map(PathBuf::from),
            districts_field: get("THERMAL_DISTRICTS_FIELD").unwrap_or(defaults.districts_field),
            storage_root: get("THERMAL_STORAGE_ROOT").map(PathBuf::from),
            log_dir: get("THERMAL_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            sync: SyncConfig {
                delay: secs("THERMAL_SYNC_DELAY_SECS", 60)?,
                poll_interval: secs("THERMAL_SYNC_POLL_SECS", 5)?,
            },
            call_timeout: secs("THERMAL_CALL_TIMEOUT_SECS", 600)?,
            geoserver,
            email,
        })
    }
}
