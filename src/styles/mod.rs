use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::config::{PathsConfig, StyleEntryConfig};
use crate::error::{Result, TileServerError};
use crate::sources::manager::SourceManager;
use crate::tilemath::zoom_for_bbox;

/// Style metadata returned by `/styles.json`-shaped listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleInfo {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A loaded map style, kept in the `local://` form between the two rewrite
/// passes described in §4.5: one copy, read two ways.
#[derive(Debug, Clone)]
pub struct Style {
    pub id: String,
    pub name: String,
    pub style_json: serde_json::Value,
    pub tilejson: serde_json::Value,
    /// Resolved relative to `paths.sprites`, e.g. `<id>/sprite`.
    pub sprite_path: Option<String>,
    pub serve_rendered: bool,
    pub serve_data: bool,
}

impl Style {
    /// Load a style document (local file or HTTP URL) and run the first
    /// `local://` rewrite pass over its source/sprite/glyphs URLs.
    pub async fn load(
        config: &StyleEntryConfig,
        paths: &PathsConfig,
        sources: &SourceManager,
    ) -> Result<Self> {
        let mut style_json = Self::read_style_json(config, paths).await?;

        let name = style_json
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| config.id.clone());

        let sprite_path = rewrite_sprite(&mut style_json, &config.id);
        rewrite_glyphs(&mut style_json);
        rewrite_sources(&mut style_json);

        let tilejson = build_tilejson(&style_json, &name, config, sources);

        Ok(Self {
            id: config.id.clone(),
            name,
            style_json,
            tilejson,
            sprite_path,
            serve_rendered: config.serve_rendered,
            serve_data: config.serve_data,
        })
    }

    async fn read_style_json(
        config: &StyleEntryConfig,
        paths: &PathsConfig,
    ) -> Result<serde_json::Value> {
        if config.style.starts_with("http://") || config.style.starts_with("https://") {
            let body = reqwest::get(&config.style)
                .await
                .map_err(|e| TileServerError::UpstreamError(e.to_string()))?
                .text()
                .await
                .map_err(|e| TileServerError::UpstreamError(e.to_string()))?;
            return serde_json::from_str(&body)
                .map_err(|e| TileServerError::MetadataError(format!("Invalid style JSON: {e}")));
        }

        let path = Path::new(&config.style);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            paths.styles_dir().join(path)
        };

        if !path.exists() {
            return Err(TileServerError::StyleNotFound(config.id.clone()));
        }

        let content = std::fs::read_to_string(&path).map_err(TileServerError::FileError)?;
        serde_json::from_str(&content)
            .map_err(|e| TileServerError::MetadataError(format!("Invalid style JSON: {e}")))
    }

    /// Rewrite the style into a form a renderer can load: `local://` URLs
    /// become concrete `mbtiles://`/`file://` locations, per §4.5's second pass.
    ///
    /// `sources` resolves each data id to its actual configured MBTiles file,
    /// since that filename need not match `<id>.mbtiles`.
    pub fn for_renderer(&self, paths: &PathsConfig, sources: &SourceManager) -> serde_json::Value {
        let mut json = self.style_json.clone();
        if let Some(obj) = json.get_mut("sources").and_then(|v| v.as_object_mut()) {
            for (_, source) in obj.iter_mut() {
                if let Some(url) = source.get("url").and_then(|v| v.as_str()) {
                    if let Some(id) = url.strip_prefix("local://data/").and_then(|s| s.strip_suffix(".json")) {
                        let mbtiles_path = sources
                            .get(id)
                            .map(|s| s.path().to_path_buf())
                            .unwrap_or_else(|| paths.mbtiles_dir().join(format!("{id}.mbtiles")));
                        source["url"] = serde_json::Value::String(format!(
                            "mbtiles://{}",
                            mbtiles_path.display()
                        ));
                    }
                }
            }
        }

        if let Some(sprite) = json.get("sprite").and_then(|v| v.as_str()) {
            if let Some(rel) = sprite.strip_prefix("local://styles/") {
                let rel = rel.strip_suffix("/sprite").unwrap_or(rel);
                let sprite_path = paths.sprites_dir().join(rel).join("sprite");
                json["sprite"] =
                    serde_json::Value::String(format!("file://{}", sprite_path.display()));
            }
        }

        if let Some(glyphs) = json.get("glyphs").and_then(|v| v.as_str()) {
            if let Some(rel) = glyphs.strip_prefix("local://fonts/") {
                let fonts_path = paths.fonts_dir().join(rel);
                json["glyphs"] =
                    serde_json::Value::String(format!("file://{}", fonts_path.display()));
            }
        }

        json
    }

    /// Rewrite for a client response: `local://` URLs become the current
    /// request's public base URL.
    pub fn for_client(&self, base_url: &str) -> serde_json::Value {
        let mut json = self.style_json.clone();
        replace_local_prefix(&mut json, base_url);
        json
    }

    pub fn to_info(&self, base_url: &str) -> StyleInfo {
        StyleInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            url: Some(format!("{base_url}/styles/{}/style.json", self.id)),
        }
    }
}

fn replace_local_prefix(value: &mut serde_json::Value, base_url: &str) {
    match value {
        serde_json::Value::String(s) => {
            if let Some(rest) = s.strip_prefix("local://") {
                *s = format!("{base_url}/{rest}");
            }
        }
        serde_json::Value::Array(arr) => {
            for v in arr {
                replace_local_prefix(v, base_url);
            }
        }
        serde_json::Value::Object(obj) => {
            for (_, v) in obj.iter_mut() {
                replace_local_prefix(v, base_url);
            }
        }
        _ => {}
    }
}

/// `sources[*].url` matching `mbtiles://{id}` becomes `local://data/<id>.json`.
fn rewrite_sources(style_json: &mut serde_json::Value) {
    let Some(sources) = style_json.get_mut("sources").and_then(|v| v.as_object_mut()) else {
        return;
    };
    for (_, source) in sources.iter_mut() {
        let Some(url) = source.get("url").and_then(|v| v.as_str()).map(str::to_string) else {
            continue;
        };
        if let Some(id) = url.strip_prefix("mbtiles://{").and_then(|s| s.strip_suffix('}')) {
            source["url"] = serde_json::Value::String(format!("local://data/{id}.json"));
        }
    }
}

fn rewrite_sprite(style_json: &mut serde_json::Value, style_id: &str) -> Option<String> {
    let sprite = style_json.get("sprite").and_then(|v| v.as_str())?.to_string();
    if sprite.starts_with("http://") || sprite.starts_with("https://") {
        return None;
    }
    let sprite_path = format!("{style_id}/sprite");
    style_json["sprite"] =
        serde_json::Value::String(format!("local://styles/{style_id}/sprite"));
    Some(sprite_path)
}

fn rewrite_glyphs(style_json: &mut serde_json::Value) {
    let Some(glyphs) = style_json.get("glyphs").and_then(|v| v.as_str()).map(str::to_string)
    else {
        return;
    };
    if glyphs.starts_with("http://") || glyphs.starts_with("https://") {
        return;
    }
    style_json["glyphs"] =
        serde_json::Value::String("local://fonts/{fontstack}/{range}.pbf".to_string());
}

fn build_tilejson(
    style_json: &serde_json::Value,
    name: &str,
    config: &StyleEntryConfig,
    _sources: &SourceManager,
) -> serde_json::Value {
    let bounds = style_json
        .get("bounds")
        .and_then(|v| v.as_array())
        .and_then(|a| {
            let v: Vec<f64> = a.iter().filter_map(|x| x.as_f64()).collect();
            (v.len() == 4).then(|| [v[0], v[1], v[2], v[3]])
        })
        .unwrap_or([-180.0, -85.0511, 180.0, 85.0511]);

    let mut tilejson = serde_json::json!({
        "tilejson": "2.0.0",
        "name": name,
        "attribution": "",
        "minzoom": 0,
        "maxzoom": 20,
        "bounds": bounds,
        "format": "png",
        "type": "baselayer",
    });

    let style_center = style_json.get("center").and_then(|v| v.as_array());
    let style_zoom = style_json.get("zoom").and_then(|v| v.as_f64());

    let center = if let (Some(c), Some(zoom)) = (style_center, style_zoom) {
        let lon = c.first().and_then(|v| v.as_f64()).unwrap_or(0.0);
        let lat = c.get(1).and_then(|v| v.as_f64()).unwrap_or(0.0);
        Some([lon, lat, zoom])
    } else {
        let [min_lon, min_lat, max_lon, max_lat] = bounds;
        let zoom = zoom_for_bbox(min_lon, min_lat, max_lon, max_lat, 256, 256, 0.0);
        Some([
            (min_lon + max_lon) / 2.0,
            (min_lat + max_lat) / 2.0,
            zoom,
        ])
    };
    if let Some(c) = center {
        tilejson["center"] = serde_json::json!(c);
    }

    if let serde_json::Value::Object(overlay) = &config.tilejson {
        if let serde_json::Value::Object(base) = &mut tilejson {
            for (k, v) in overlay {
                base.insert(k.clone(), v.clone());
            }
        }
    }

    tilejson
}

/// Manages all loaded map styles.
pub struct StyleManager {
    styles: HashMap<String, Style>,
}

impl StyleManager {
    pub fn new() -> Self {
        Self {
            styles: HashMap::new(),
        }
    }

    /// Load styles from configuration. A style whose document cannot be
    /// read or parsed is dropped and logged; never fatal.
    pub async fn from_configs(
        configs: &[StyleEntryConfig],
        paths: &PathsConfig,
        sources: &SourceManager,
    ) -> Result<Self> {
        let mut manager = Self::new();

        for config in configs {
            match Style::load(config, paths, sources).await {
                Ok(style) => {
                    tracing::info!("Loaded style: {} ({})", config.id, config.style);
                    manager.styles.insert(config.id.clone(), style);
                }
                Err(e) => {
                    tracing::warn!("Failed to load style {}: {}", config.id, e);
                }
            }
        }

        Ok(manager)
    }

    pub fn get(&self, id: &str) -> Option<&Style> {
        self.styles.get(id)
    }

    pub fn all_infos(&self, base_url: &str) -> Vec<StyleInfo> {
        self.styles.values().map(|s| s.to_info(base_url)).collect()
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}

impl Default for StyleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_sprite_skips_http() {
        let mut json = serde_json::json!({ "sprite": "https://example.com/sprite" });
        assert_eq!(rewrite_sprite(&mut json, "basic"), None);
        assert_eq!(json["sprite"], "https://example.com/sprite");
    }

    #[test]
    fn rewrite_sprite_rewrites_local() {
        let mut json = serde_json::json!({ "sprite": "sprite" });
        let path = rewrite_sprite(&mut json, "basic").unwrap();
        assert_eq!(path, "basic/sprite");
        assert_eq!(json["sprite"], "local://styles/basic/sprite");
    }

    #[test]
    fn rewrite_sources_matches_mbtiles_scheme() {
        let mut json = serde_json::json!({
            "sources": { "openmaptiles": { "url": "mbtiles://{openmaptiles}" } }
        });
        rewrite_sources(&mut json);
        assert_eq!(
            json["sources"]["openmaptiles"]["url"],
            "local://data/openmaptiles.json"
        );
    }

    #[test]
    fn local_prefix_replaced_with_base_url() {
        let mut json = serde_json::json!({ "sprite": "local://styles/basic/sprite" });
        replace_local_prefix(&mut json, "http://localhost:8080");
        assert_eq!(
            json["sprite"],
            "http://localhost:8080/styles/basic/sprite"
        );
    }
}
