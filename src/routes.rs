//! HTTP route table (spec.md §6.1).
//!
//! Handlers are thin: parse the path/query, delegate to `styles`/`sources`/
//! `render`, translate the result into a response. Bounds- and
//! format-validation lives here rather than in the lower layers, since it is
//! purely an HTTP-contract concern (the renderer and file sources are usable
//! as libraries without it).

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::cache_control::tile_cache_headers;
use crate::error::{Result, TileServerError};
use crate::render::overlay::{self, OverlayDefaults};
use crate::render::{ImageFormat, RenderOptions, StaticQueryParams, StaticType};
use crate::sources::{mvt, TileFormat};
use crate::state::SharedState;
use crate::tilemath::{lat_to_tile_y, lon_to_tile_x};

pub fn router(state: SharedState, ui_enabled: bool) -> Router {
    let mut router = Router::new().route("/health", get(health));
    if ui_enabled {
        router = router.route("/", get(index));
    }
    router
        .route("/styles/{id}/style.json", get(style_json))
        .route("/styles/{id}/wmts.xml", get(style_wmts))
        .route("/styles/{id}/static/{*rest}", get(style_static))
        .route("/styles/{id}/{z}/{x}/{yfmt}", get(style_tile))
        .route("/styles/{id}/{file}", get(style_file))
        .route("/styles/{idjson}", get(style_tilejson))
        .route("/data/{id}/{z}/{x}/{yfmt}", get(data_tile))
        .route("/data/{idjson}", get(data_tilejson))
        .route("/fonts/{fontstack}/{rangepbf}", get(font_glyphs))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn index(State(state): State<SharedState>, headers: HeaderMap) -> impl IntoResponse {
    let base_url = state.base_url(&headers);
    let styles = state.styles.all_infos(&base_url);
    let data_ids = state.sources.ids();

    let mut body = String::new();
    body.push_str("<!DOCTYPE html><html><head><title>maptiles-server</title></head><body>");
    body.push_str("<h1>maptiles-server</h1>");
    body.push_str("<h2>Styles</h2><ul>");
    for style in &styles {
        body.push_str(&format!(
            "<li><a href=\"{base_url}/styles/{id}/style.json\">{name}</a></li>",
            id = style.id,
            name = style.name
        ));
    }
    body.push_str("</ul><h2>Data</h2><ul>");
    for id in &data_ids {
        body.push_str(&format!(
            "<li><a href=\"{base_url}/data/{id}.json\">{id}</a></li>"
        ));
    }
    body.push_str("</ul></body></html>");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body))
        .unwrap()
}

async fn style_json(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let style = state
        .styles
        .get(&id)
        .ok_or_else(|| TileServerError::StyleNotFound(id.clone()))?;
    let base_url = state.base_url(&headers);
    let json = style.for_client(&base_url);
    Ok(json_response(&json))
}

async fn style_tilejson(
    State(state): State<SharedState>,
    Path(idjson): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let id = idjson
        .strip_suffix(".json")
        .ok_or_else(|| TileServerError::StyleNotFound(idjson.clone()))?;
    let style = state
        .styles
        .get(id)
        .ok_or_else(|| TileServerError::StyleNotFound(id.to_string()))?;

    let base_url = state.base_url(&headers);
    let mut tilejson = style.tilejson.clone();
    if let serde_json::Value::Object(obj) = &mut tilejson {
        obj.insert("id".to_string(), serde_json::Value::String(id.to_string()));
        obj.insert(
            "tiles".to_string(),
            serde_json::json!([format!("{base_url}/styles/{id}/{{z}}/{{x}}/{{y}}.png")]),
        );
    }
    Ok(json_response(&tilejson))
}

async fn style_wmts(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let style = state
        .styles
        .get(&id)
        .ok_or_else(|| TileServerError::StyleNotFound(id.clone()))?;
    let base_url = state.base_url(&headers);
    let minzoom = style.tilejson.get("minzoom").and_then(|v| v.as_u64()).unwrap_or(0) as u8;
    let maxzoom = style.tilejson.get("maxzoom").and_then(|v| v.as_u64()).unwrap_or(20) as u8;
    let xml = crate::wmts::generate_wmts_capabilities(&base_url, &id, &style.name, minzoom, maxzoom, None);

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(xml))
        .unwrap())
}

/// Dispatches the single path segment following `/styles/{id}/` that isn't
/// one of the other literal routes: sprite sheets, in this server.
async fn style_file(
    State(state): State<SharedState>,
    Path((id, file)): Path<(String, String)>,
) -> Result<Response> {
    let style = state
        .styles
        .get(&id)
        .ok_or_else(|| TileServerError::StyleNotFound(id.clone()))?;

    let Some((scale, ext)) = parse_sprite_file(&file) else {
        return Err(TileServerError::SpriteNotFound(file));
    };

    let paths = &state.config.options.paths;
    let scale_suffix = if scale > 1 {
        format!("@{scale}x")
    } else {
        String::new()
    };
    let sprite_dir = style
        .sprite_path
        .as_deref()
        .and_then(|p| p.strip_suffix("/sprite"))
        .unwrap_or(&id);
    let file_path = paths
        .sprites_dir()
        .join(sprite_dir)
        .join(format!("sprite{scale_suffix}.{ext}"));

    let data = tokio::fs::read(&file_path)
        .await
        .map_err(|_| TileServerError::SpriteNotFound(format!("{id}/sprite{scale_suffix}.{ext}")))?;

    let content_type = if ext == "json" { "application/json" } else { "image/png" };
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(data))
        .unwrap())
}

fn parse_sprite_file(file: &str) -> Option<(u8, String)> {
    let (stem, ext) = file.rsplit_once('.')?;
    if ext != "json" && ext != "png" {
        return None;
    }
    let scale = if let Some(rest) = stem.strip_prefix("sprite@") {
        let digits = rest.strip_suffix('x')?;
        digits.parse().ok()?
    } else if stem == "sprite" {
        1
    } else {
        return None;
    };
    Some((scale, ext.to_string()))
}

async fn style_tile(
    State(state): State<SharedState>,
    Path((id, z, x, yfmt)): Path<(String, u8, u32, String)>,
) -> Result<Response> {
    let style = state
        .styles
        .get(&id)
        .ok_or_else(|| TileServerError::StyleNotFound(id.clone()))?;
    if !style.serve_rendered {
        return Err(TileServerError::StyleNotFound(id));
    }

    let (y, scale, fmt_str) = parse_tile_suffix(&yfmt)?;
    let format = ImageFormat::from_str(&fmt_str)
        .ok_or_else(|| TileServerError::InvalidFormat(fmt_str.clone()))?;

    let opts = state.renderer.options();
    check_tile_bounds(z, x, y, opts.normalized_serve_bounds())?;
    check_scale(scale, opts.max_scale_factor)?;

    let style_json = serde_json::to_string(&style.for_renderer(&opts.paths, &state.sources))
        .map_err(|e| TileServerError::Internal(e.into()))?;

    let bytes = state
        .renderer
        .render_tile(&id, Arc::from(style_json.as_str()), z, x, y, scale, format)
        .await?;

    Ok(image_response(bytes, format.content_type()))
}

async fn style_static(
    State(state): State<SharedState>,
    Path((id, rest)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response> {
    let style = state
        .styles
        .get(&id)
        .ok_or_else(|| TileServerError::StyleNotFound(id.clone()))?;

    let opts = state.renderer.options();
    if !opts.serve_static_maps {
        return Err(TileServerError::InvalidTileRequest);
    }

    let mut segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    let raw = segments.first() == Some(&"raw");
    if raw {
        segments.remove(0);
    }
    if segments.len() != 2 {
        return Err(TileServerError::InvalidTileRequest);
    }
    let (coords, sizefmt) = (segments[0], segments[1]);

    let (width, height, scale, fmt_str) = parse_size_fmt(sizefmt)?;
    let format = ImageFormat::from_str(&fmt_str)
        .ok_or_else(|| TileServerError::InvalidFormat(fmt_str.clone()))?;
    check_scale(scale, opts.max_scale_factor)?;
    if width == 0 || height == 0 || width > opts.max_size || height > opts.max_size {
        return Err(TileServerError::InvalidSize(format!("{width}x{height}")));
    }

    let static_type = if raw {
        reproject_static_type(coords)?
    } else {
        StaticType::from_str(coords).map_err(TileServerError::InvalidOverlay)?
    };

    let (query_pairs, path_values, marker_values) = parse_overlay_query(raw_query.as_deref());
    let path = (!path_values.is_empty()).then(|| path_values.join(" "));
    let marker = (!marker_values.is_empty()).then(|| marker_values.join(" "));

    let query_params = StaticQueryParams {
        path: path.clone(),
        marker: marker.clone(),
        latlng: query_pairs.get("latlng").map(|v| v == "true").unwrap_or(false),
        padding: query_pairs.get("padding").and_then(|v| v.parse().ok()),
        maxzoom: query_pairs.get("maxzoom").and_then(|v| v.parse().ok()),
    };

    let auto_bbox = overlay::overlay_bbox(path.as_deref(), marker.as_deref());
    let serve_bounds = opts.normalized_serve_bounds();

    let style_json = serde_json::to_string(&style.for_renderer(&opts.paths, &state.sources))
        .map_err(|e| TileServerError::Internal(e.into()))?;

    let render_options = RenderOptions::for_static(
        id.clone(),
        style_json.clone(),
        static_type,
        width,
        height,
        scale,
        format,
        query_params,
        serve_bounds,
        auto_bbox,
    )
    .map_err(TileServerError::InvalidOverlay)?;

    let overlay_defaults = OverlayDefaults::from_query(&query_pairs);

    let bytes = state
        .renderer
        .render_static(
            &id,
            Arc::from(style_json.as_str()),
            render_options,
            overlay_defaults,
            &opts.paths.icons_dir(),
            opts.allow_remote_marker_icons,
        )
        .await?;

    Ok(image_response(bytes, format.content_type()))
}

async fn data_tile(
    State(state): State<SharedState>,
    Path((id, z, x, yfmt)): Path<(String, u8, u32, String)>,
) -> Result<Response> {
    let source = state
        .sources
        .get(&id)
        .ok_or_else(|| TileServerError::SourceNotFound(id.clone()))?;

    let (y, _scale, fmt_str) = parse_tile_suffix(&yfmt)?;
    let requested: TileFormat = fmt_str
        .parse()
        .unwrap_or(TileFormat::Unknown);

    let stored = source.metadata().format;
    let allowed = requested == stored || (requested == TileFormat::GeoJson && stored == TileFormat::Pbf);
    if !allowed {
        return Err(TileServerError::InvalidFormat(fmt_str));
    }

    check_tile_bounds(z, x, y, state.renderer.options().normalized_serve_bounds())?;

    let tile = source
        .get_tile(z, x, y)
        .await?
        .ok_or(TileServerError::TileNotPresent { z, x, y })?;

    let (body, gzipped) = if requested == TileFormat::GeoJson {
        let geojson = mvt::mvt_to_geojson(&tile.data, z, x, y)?;
        let raw = serde_json::to_vec(&geojson).map_err(|e| TileServerError::Internal(e.into()))?;
        (mvt::ensure_gzipped(&raw)?, true)
    } else if requested == TileFormat::Pbf {
        (mvt::ensure_gzipped(&tile.data)?, true)
    } else {
        (tile.data.to_vec(), false)
    };

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, requested.content_type())
        .header(header::CACHE_CONTROL, tile_cache_headers());
    if gzipped {
        response = response.header(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }
    Ok(response.body(Body::from(body)).unwrap())
}

async fn data_tilejson(
    State(state): State<SharedState>,
    Path(idjson): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let id = idjson
        .strip_suffix(".json")
        .ok_or_else(|| TileServerError::SourceNotFound(idjson.clone()))?;
    let source = state
        .sources
        .get(id)
        .ok_or_else(|| TileServerError::SourceNotFound(id.to_string()))?;

    let base_url = state.base_url(&headers);
    let tilejson = source.metadata().to_tilejson(&base_url);
    Ok(json_response(&tilejson))
}

async fn font_glyphs(
    State(state): State<SharedState>,
    Path((fontstack, rangepbf)): Path<(String, String)>,
) -> Result<Response> {
    if !is_valid_fontstack(&fontstack) {
        return Err(TileServerError::FontNotFound(fontstack));
    }
    let range = rangepbf
        .strip_suffix(".pbf")
        .ok_or_else(|| TileServerError::FontNotFound(rangepbf.clone()))?;

    let path = state
        .config
        .options
        .paths
        .fonts_dir()
        .join(&fontstack)
        .join(format!("{range}.pbf"));

    let data = tokio::fs::read(&path)
        .await
        .map_err(|_| TileServerError::FontNotFound(format!("{fontstack}/{range}.pbf")))?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-protobuf")
        .header(header::CACHE_CONTROL, tile_cache_headers())
        .body(Body::from(data))
        .unwrap())
}

fn is_valid_fontstack(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == ' ')
}

/// Parse a combined `"<y>[@<scale>x].<fmt>"` path segment.
fn parse_tile_suffix(segment: &str) -> Result<(u32, u8, String)> {
    let (left, fmt) = segment
        .rsplit_once('.')
        .ok_or_else(|| TileServerError::InvalidTileRequest)?;
    let (y_str, scale) = match left.split_once('@') {
        Some((y_str, scale_str)) => {
            let digits = scale_str
                .strip_suffix('x')
                .ok_or(TileServerError::InvalidTileRequest)?;
            let scale: u8 = digits.parse().map_err(|_| TileServerError::InvalidTileRequest)?;
            (y_str, scale)
        }
        None => (left, 1),
    };
    let y: u32 = y_str.parse().map_err(|_| TileServerError::InvalidTileRequest)?;
    Ok((y, scale, fmt.to_string()))
}

/// Parse a combined `"<W>x<H>[@<scale>x].<fmt>"` static-map size segment.
fn parse_size_fmt(segment: &str) -> Result<(u32, u32, u8, String)> {
    let (left, fmt) = segment
        .rsplit_once('.')
        .ok_or(TileServerError::InvalidTileRequest)?;
    let (wh, scale) = match left.split_once('@') {
        Some((wh, scale_str)) => {
            let digits = scale_str
                .strip_suffix('x')
                .ok_or(TileServerError::InvalidTileRequest)?;
            let scale: u8 = digits.parse().map_err(|_| TileServerError::InvalidTileRequest)?;
            (wh, scale)
        }
        None => (left, 1),
    };
    let (w_str, h_str) = wh.split_once('x').ok_or(TileServerError::InvalidTileRequest)?;
    let width: u32 = w_str.parse().map_err(|_| TileServerError::InvalidTileRequest)?;
    let height: u32 = h_str.parse().map_err(|_| TileServerError::InvalidTileRequest)?;
    Ok((width, height, scale, fmt.to_string()))
}

fn check_tile_bounds(z: u8, x: u32, y: u32, serve_bounds: [f64; 4]) -> Result<()> {
    if z > 22 {
        return Err(TileServerError::OutOfBounds { z, x, y });
    }
    let [min_lon, min_lat, max_lon, max_lat] = serve_bounds;
    let x_min = lon_to_tile_x(min_lon, z).max(0) as u32;
    let x_max = lon_to_tile_x(max_lon, z).max(0) as u32;
    let y_min = lat_to_tile_y(max_lat, z).max(0) as u32;
    let y_max = lat_to_tile_y(min_lat, z).max(0) as u32;

    if x < x_min || x > x_max || y < y_min || y > y_max {
        return Err(TileServerError::OutOfBounds { z, x, y });
    }
    Ok(())
}

fn check_scale(scale: u8, max_scale_factor: u8) -> Result<()> {
    let max = max_scale_factor.max(1).min(9);
    if scale < 1 || scale > max {
        return Err(TileServerError::InvalidSize(format!("scale {scale} out of range 1..={max}")));
    }
    Ok(())
}

/// `/static/raw/...` coordinates arrive in EPSG:3857 meters; reproject to
/// EPSG:4326 before delegating to the normal `StaticType` parser.
fn reproject_static_type(coords: &str) -> Result<StaticType> {
    if coords == "auto" {
        return Ok(StaticType::Auto);
    }
    let parts: Vec<&str> = coords.split(',').collect();
    if parts.len() == 4 {
        let vals: Vec<f64> = parts
            .iter()
            .map(|p| p.parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| TileServerError::InvalidOverlay("invalid raw bounding box".into()))?;
        let (min_lon, min_lat) = merc_to_lonlat(vals[0], vals[1]);
        let (max_lon, max_lat) = merc_to_lonlat(vals[2], vals[3]);
        return Ok(StaticType::BoundingBox {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        });
    }
    if parts.len() >= 3 {
        let x: f64 = parts[0].parse().map_err(|_| TileServerError::InvalidOverlay("invalid raw x".into()))?;
        let y: f64 = parts[1].parse().map_err(|_| TileServerError::InvalidOverlay("invalid raw y".into()))?;
        let zoom_parts: Vec<&str> = parts[2].split('@').collect();
        let zoom: f64 = zoom_parts[0]
            .parse()
            .map_err(|_| TileServerError::InvalidOverlay("invalid raw zoom".into()))?;
        let (bearing, pitch) = if zoom_parts.len() > 1 {
            let bp: Vec<&str> = zoom_parts[1].split(',').collect();
            let bearing = bp[0].parse().ok();
            let pitch = bp.get(1).and_then(|s| s.parse().ok());
            (bearing, pitch)
        } else {
            (None, None)
        };
        let (lon, lat) = merc_to_lonlat(x, y);
        return Ok(StaticType::Center { lon, lat, zoom, bearing, pitch });
    }
    Err(TileServerError::InvalidOverlay(format!("invalid raw static type: {coords}")))
}

const EARTH_RADIUS_MERC: f64 = 20037508.34;

fn merc_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS_MERC) * 180.0;
    let lat_deg = (y / EARTH_RADIUS_MERC) * 180.0;
    let lat = 180.0 / std::f64::consts::PI
        * (2.0 * (lat_deg * std::f64::consts::PI / 180.0).exp().atan() - std::f64::consts::PI / 2.0);
    (lon, lat)
}

/// Parse a raw query string into a flattened last-value map (for single-value
/// params like `fill`/`padding`) plus the full repeated lists for `path=`
/// and `marker=`, which the overlay grammar allows to repeat (spec.md §4.7).
fn parse_overlay_query(
    raw: Option<&str>,
) -> (std::collections::HashMap<String, String>, Vec<String>, Vec<String>) {
    let mut map = std::collections::HashMap::new();
    let mut paths = Vec::new();
    let mut markers = Vec::new();

    let Some(raw) = raw else {
        return (map, paths, markers);
    };

    for pair in raw.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key).map(|s| s.into_owned()).unwrap_or_else(|_| key.to_string());
        let value = urlencoding::decode(value).map(|s| s.into_owned()).unwrap_or_else(|_| value.to_string());

        match key.as_str() {
            "path" => paths.push(value),
            "marker" => markers.push(value),
            _ => {
                map.insert(key, value);
            }
        }
    }

    (map, paths, markers)
}

fn json_response<T: serde::Serialize>(value: &T) -> Response {
    let body = serde_json::to_vec(value).unwrap_or_default();
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn image_response(bytes: Vec<u8>, content_type: &'static str) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, tile_cache_headers())
        .body(Body::from(bytes))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tile_suffix_without_scale() {
        let (y, scale, fmt) = parse_tile_suffix("5.png").unwrap();
        assert_eq!((y, scale, fmt.as_str()), (5, 1, "png"));
    }

    #[test]
    fn parse_tile_suffix_with_scale() {
        let (y, scale, fmt) = parse_tile_suffix("5@2x.jpg").unwrap();
        assert_eq!((y, scale, fmt.as_str()), (5, 2, "jpg"));
    }

    #[test]
    fn parse_size_fmt_with_scale() {
        let (w, h, scale, fmt) = parse_size_fmt("256x256@2x.png").unwrap();
        assert_eq!((w, h, scale, fmt.as_str()), (256, 256, 2, "png"));
    }

    #[test]
    fn parse_sprite_file_variants() {
        assert_eq!(parse_sprite_file("sprite.json"), Some((1, "json".to_string())));
        assert_eq!(parse_sprite_file("sprite@2x.png"), Some((2, "png".to_string())));
        assert_eq!(parse_sprite_file("wmts.xml"), None);
    }

    #[test]
    fn check_tile_bounds_rejects_high_zoom() {
        let err = check_tile_bounds(23, 0, 0, [-180.0, -85.0511, 180.0, 85.0511]);
        assert!(err.is_err());
    }

    #[test]
    fn check_scale_clamps_to_nine() {
        assert!(check_scale(9, 20).is_ok());
        assert!(check_scale(10, 20).is_err());
        assert!(check_scale(0, 20).is_err());
    }

    #[test]
    fn overlay_query_collects_repeated_path_params() {
        let (map, paths, markers) = parse_overlay_query(Some("path=a&path=b&fill=%23fff"));
        assert_eq!(paths, vec!["a".to_string(), "b".to_string()]);
        assert!(markers.is_empty());
        assert_eq!(map.get("fill"), Some(&"#fff".to_string()));
    }

    #[test]
    fn merc_to_lonlat_roundtrips_origin() {
        let (lon, lat) = merc_to_lonlat(0.0, 0.0);
        assert!(lon.abs() < 1e-9);
        assert!(lat.abs() < 1e-9);
    }
}
