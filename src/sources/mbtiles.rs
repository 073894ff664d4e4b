use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::DataEntryConfig;
use crate::error::{Result, TileServerError};
use crate::sources::{TileCompression, TileData, TileFormat, TileMetadata, TileSource};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A tile source backed by a single MBTiles (SQLite) archive.
///
/// MBTiles stores tiles under the TMS scheme (row 0 at the south); requests
/// arrive in XYZ (row 0 at the north) and are flipped on read.
///
/// rusqlite's `Connection` has no thread-affinity requirement of its own
/// (unlike the native MapLibre render/file-source handles `worker.rs`
/// dedicates an OS thread to), so queries against it are dispatched through
/// `tokio::task::spawn_blocking` rather than a bespoke worker pool: that
/// keeps the synchronous SQLite call off the async reactor thread, which is
/// the actual property spec.md §4.4's file-source worker pool buys here.
pub struct MbTilesSource {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    metadata: TileMetadata,
}

impl MbTilesSource {
    /// Open an MBTiles archive and derive its TileJSON-shaped metadata.
    pub async fn from_file(config: &DataEntryConfig, mbtiles_dir: &Path) -> Result<Self> {
        let path = mbtiles_dir.join(&config.mbtiles);

        if !path.exists() {
            return Err(TileServerError::FileError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("MBTiles file not found: {}", path.display()),
            )));
        }

        let id = config.id.clone();
        let tilejson_overlay = config.tilejson.clone();
        let path_for_blocking = path.clone();

        let (conn, metadata) = tokio::task::spawn_blocking(move || {
            open_and_read_metadata(&path_for_blocking, &id, &tilejson_overlay)
        })
        .await
        .map_err(|e| TileServerError::UpstreamError(format!("mbtiles open task panicked: {e}")))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            metadata,
        })
    }

    /// Absolute path to the underlying file, as `fetchTile`'s
    /// `mbtiles://<path>` URL template needs.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_and_read_metadata(
    path: &Path,
    id: &str,
    tilejson_overlay: &serde_json::Value,
) -> Result<(Connection, TileMetadata)> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| TileServerError::UpstreamError(format!("opening {}: {e}", path.display())))?;

    let mut rows: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT name, value FROM metadata")
            .map_err(|e| TileServerError::UpstreamError(e.to_string()))?;
        let iter = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| TileServerError::UpstreamError(e.to_string()))?;
        for entry in iter {
            let (name, value) = entry.map_err(|e| TileServerError::UpstreamError(e.to_string()))?;
            rows.insert(name, value);
        }
    }

    let format = rows
        .get("format")
        .and_then(|f| f.parse::<TileFormat>().ok())
        .unwrap_or(TileFormat::Pbf);

    let minzoom = rows
        .get("minzoom")
        .and_then(|v| v.parse::<u8>().ok())
        .unwrap_or(0);
    let maxzoom = rows
        .get("maxzoom")
        .and_then(|v| v.parse::<u8>().ok())
        .unwrap_or(14);

    let bounds = rows.get("bounds").and_then(|v| parse_f64_list::<4>(v));
    // `center` is sometimes stored as a legacy string; ignore malformed values.
    let center = rows.get("center").and_then(|v| parse_f64_list::<3>(v));

    let name = rows
        .get("name")
        .cloned()
        .unwrap_or_else(|| id.to_string());
    let description = rows.get("description").cloned();
    let attribution = rows.get("attribution").cloned();

    let vector_layers = rows
        .get("json")
        .and_then(|v| serde_json::from_str::<serde_json::Value>(v).ok())
        .and_then(|v| v.get("vector_layers").cloned());

    let filesize = std::fs::metadata(path).ok().map(|m| m.len());

    let mut metadata = TileMetadata {
        id: id.to_string(),
        name,
        description,
        attribution,
        format,
        minzoom,
        maxzoom,
        bounds,
        center,
        vector_layers,
        filesize,
    };

    if let Some(obj) = tilejson_overlay.as_object() {
        if let Some(name) = obj.get("name").and_then(|v| v.as_str()) {
            metadata.name = name.to_string();
        }
        if let Some(desc) = obj.get("description").and_then(|v| v.as_str()) {
            metadata.description = Some(desc.to_string());
        }
        if let Some(attr) = obj.get("attribution").and_then(|v| v.as_str()) {
            metadata.attribution = Some(attr.to_string());
        }
    }

    Ok((conn, metadata))
}

fn parse_f64_list<const N: usize>(s: &str) -> Option<[f64; N]> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    parts.try_into().ok()
}

#[async_trait]
impl TileSource for MbTilesSource {
    async fn get_tile(&self, z: u8, x: u32, y: u32) -> Result<Option<TileData>> {
        let max_tile = 1u32 << z;
        if x >= max_tile || y >= max_tile {
            return Err(TileServerError::OutOfBounds { z, x, y });
        }

        if z < self.metadata.minzoom || z > self.metadata.maxzoom {
            return Ok(None);
        }

        // MBTiles uses the TMS row convention; flip from the XYZ row we were given.
        let tms_row = max_tile - 1 - y;
        let format = self.metadata.format;

        let conn = self.conn.clone();
        let data = tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| TileServerError::UpstreamError("mbtiles connection poisoned".into()))?;
            conn.query_row(
                "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
                rusqlite::params![z, x, tms_row],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(|e| TileServerError::UpstreamError(e.to_string()))
        })
        .await
        .map_err(|e| TileServerError::UpstreamError(format!("mbtiles read task panicked: {e}")))??;

        let Some(bytes) = data else {
            return Ok(None);
        };

        let compression = if bytes.len() >= 2 && bytes[0..2] == GZIP_MAGIC {
            TileCompression::Gzip
        } else {
            TileCompression::None
        };

        Ok(Some(TileData {
            data: Bytes::from(bytes),
            format,
            compression,
        }))
    }

    fn metadata(&self) -> &TileMetadata {
        &self.metadata
    }
}
