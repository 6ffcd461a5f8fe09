//! Geometry layers in SQLite.
//!
//! The same layout serves two roles: the per-flight geometry
//! package, whose layers are replaced on every run, and the
//! shared hotspot database, whose tables only ever grow.
//! Geometries are stored as GeoJSON text in EPSG:4326.
use std::{
    fs::create_dir_all,
    path::Path,
    sync::Mutex,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::{params, Connection, Row};
use tracing::debug;

use crate::{crs::OUTPUT_EPSG, external::GeometryDatabase, geojson::Geometry};

pub const FOOTPRINT_LAYER: &str = "footprint";
pub const BOUNDARIES_LAYER: &str = "boundaries";
pub const CENTROIDS_LAYER: &str = "centroids";

pub const FOOTPRINTS_TABLE: &str = "hotspot_flight_footprints";
pub const BOUNDARIES_TABLE: &str = "hotspot_boundaries";
pub const CENTROIDS_TABLE: &str = "hotspot_centroids";

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// One feature of a layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub geometry: Geometry,
    pub flight_datetime: String,
    pub hotspot_no: Option<u32>,
    pub images: Option<String>,
}

impl Record {
    pub fn new(geometry: Geometry, flight_datetime: &str) -> Self {
        Record {
            geometry,
            flight_datetime: flight_datetime.to_string(),
            hotspot_no: None,
            images: None,
        }
    }
}

fn row_to_record(row: &Row) -> Result<Record> {
    let geometry: String = row.get("geometry")?;
    let hotspot_no: Option<i64> = row.get("hotspot_no")?;
    Ok(Record {
        geometry: serde_json::from_str(&geometry).context("decoding stored geometry")?,
        flight_datetime: row.get("flight_datetime")?,
        hotspot_no: hotspot_no.map(u32::try_from).transpose()?,
        images: row.get("images")?,
    })
}

/// Layer names end up in SQL; only plain identifiers pass.
fn checked(name: &str) -> Result<&str> {
    lazy_static! {
        static ref IDENT: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    }
    if !IDENT.is_match(name) {
        bail!("invalid layer name `{}`", name);
    }
    Ok(name)
}

pub struct LayerStore {
    conn: Connection,
}

impl LayerStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS layer_contents (
                table_name TEXT PRIMARY KEY,
                srs_id INTEGER NOT NULL,
                last_change TEXT NOT NULL
            );",
        )?;
        Ok(LayerStore { conn })
    }

    fn create(&self, name: &str) -> Result<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                fid INTEGER PRIMARY KEY AUTOINCREMENT,
                geometry TEXT NOT NULL,
                flight_datetime TEXT NOT NULL,
                hotspot_no INTEGER,
                images TEXT
            );",
            checked(name)?
        ))?;
        self.conn.execute(
            "INSERT OR REPLACE INTO layer_contents (table_name, srs_id, last_change)
             VALUES (?1, ?2, ?3)",
            params![name, OUTPUT_EPSG, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn insert(&self, name: &str, records: &[Record]) -> Result<()> {
        let mut stmt = self.conn.prepare(&format!(
            "INSERT INTO {} (geometry, flight_datetime, hotspot_no, images)
             VALUES (?1, ?2, ?3, ?4)",
            checked(name)?
        ))?;
        for r in records {
            stmt.execute(params![
                serde_json::to_string(&r.geometry)?,
                r.flight_datetime,
                r.hotspot_no,
                r.images,
            ])?;
        }
        Ok(())
    }

    /// Write a layer, dropping whatever it held before.
    pub fn replace_layer(&self, name: &str, records: &[Record]) -> Result<()> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {};", checked(name)?))?;
        self.create(name)?;
        self.insert(name, records)?;
        debug!(layer = name, rows = records.len(), "layer replaced");
        Ok(())
    }

    /// Remove a layer and its contents entry; a missing layer
    /// is not an error.
    pub fn drop_layer(&self, name: &str) -> Result<()> {
        self.conn
            .execute_batch(&format!("DROP TABLE IF EXISTS {};", checked(name)?))?;
        self.conn.execute(
            "DELETE FROM layer_contents WHERE table_name = ?1",
            params![name],
        )?;
        debug!(layer = name, "layer dropped");
        Ok(())
    }

    /// Add rows to a layer, creating it on first use.
    pub fn append(&self, name: &str, records: &[Record]) -> Result<()> {
        self.create(name)?;
        self.insert(name, records)?;
        debug!(layer = name, rows = records.len(), "rows appended");
        Ok(())
    }

    pub fn has_layer(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![checked(name)?],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Rows of a layer in insertion order; a missing layer is
    /// an error.
    pub fn read_layer(&self, name: &str) -> Result<Vec<Record>> {
        if !self.has_layer(name)? {
            bail!("layer `{}` does not exist", name);
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT geometry, flight_datetime, hotspot_no, images FROM {} ORDER BY fid",
            checked(name)?
        ))?;
        let mut rows = stmt.query([])?;
        let mut records = vec![];
        while let Some(row) = rows.next()? {
            records.push(row_to_record(row)?);
        }
        Ok(records)
    }
}

/// The shared, append-only hotspot database.
pub struct SqliteDatabase {
    store: Mutex<LayerStore>,
}

impl SqliteDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(SqliteDatabase {
            store: Mutex::new(LayerStore::open(path)?),
        })
    }

    pub fn read(&self, table: &str) -> Result<Vec<Record>> {
        self.lock()?.read_layer(table)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LayerStore>> {
        self.store
            .lock()
            .map_err(|_| anyhow!("geometry database lock poisoned"))
    }
}

impl GeometryDatabase for SqliteDatabase {
    fn append(&self, table: &str, records: &[Record]) -> Result<()> {
        self.lock()?.append(table, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Point, Polygon};

    fn square() -> Geometry {
        Geometry::from(&Polygon::new(
            LineString::from(vec![(116., -32.), (116.1, -32.), (116.1, -32.1), (116., -32.)]),
            vec![],
        ))
    }

    #[test]
    fn replace_drops_previous_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LayerStore::open(&dir.path().join("Processed/output.gpkg"))?;
        store.replace_layer(FOOTPRINT_LAYER, &[Record::new(square(), "a"), Record::new(square(), "a")])?;
        store.replace_layer(FOOTPRINT_LAYER, &[Record::new(square(), "b")])?;

        let rows = store.read_layer(FOOTPRINT_LAYER)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].flight_datetime, "b");
        assert_eq!(rows[0].geometry, square());
        Ok(())
    }

    #[test]
    fn append_twice_duplicates_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let db = SqliteDatabase::open(&dir.path().join("hotspots.sqlite"))?;
        let row = Record {
            geometry: Geometry::from(&Point::new(116.05, -32.05)),
            flight_datetime: "20230110_0200".to_string(),
            hotspot_no: Some(1),
            images: Some("000001, 000002".to_string()),
        };
        db.append(CENTROIDS_TABLE, &[row.clone()])?;
        db.append(CENTROIDS_TABLE, &[row.clone()])?;
        assert_eq!(db.read(CENTROIDS_TABLE)?, vec![row.clone(), row]);
        Ok(())
    }

    #[test]
    fn missing_layer_and_bad_names() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LayerStore::open(&dir.path().join("output.gpkg"))?;
        assert!(!store.has_layer(BOUNDARIES_LAYER)?);
        assert!(store.read_layer(BOUNDARIES_LAYER).is_err());
        assert!(store.append("boundaries; DROP TABLE x", &[]).is_err());

        store.replace_layer(BOUNDARIES_LAYER, &[])?;
        assert!(store.read_layer(BOUNDARIES_LAYER)?.is_empty());
        Ok(())
    }

    #[test]
    fn dropped_layer_cannot_be_read() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = LayerStore::open(&dir.path().join("output.gpkg"))?;
        store.replace_layer(FOOTPRINT_LAYER, &[Record::new(square(), "a")])?;
        store.drop_layer(FOOTPRINT_LAYER)?;
        assert!(!store.has_layer(FOOTPRINT_LAYER)?);
        assert!(store.read_layer(FOOTPRINT_LAYER).is_err());
        store.drop_layer(FOOTPRINT_LAYER)?;
        assert!(store.drop_layer("footprint; --").is_err());
        Ok(())
    }
}
