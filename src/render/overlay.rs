//! Static-map overlay grammar, parsing, and compositing (spec.md §4.7).
//!
//! Overlay coordinates are projected onto the rendered bitmap using the
//! camera's known center/zoom assuming bearing and pitch are zero — the
//! renderer has no FFI query for the map's live transform state, so this
//! is a planar Web Mercator approximation rather than a true 3D projection.
//! Static requests that also set bearing/pitch will see overlays drift from
//! their true screen position; acceptable for this renderer's scope.

use std::collections::HashMap;
use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::error::{Result, TileServerError};
use crate::tilemath::{decode_polyline, lat_to_pixel, lon_to_pixel};

const DEFAULT_STROKE: Rgba<u8> = Rgba([0x00, 0x40, 0xff, 0xb2]);

/// Top-level query params that seed per-path defaults when a path omits them.
#[derive(Debug, Clone, Default)]
pub struct OverlayDefaults {
    pub fill: Option<Rgba<u8>>,
    pub stroke: Option<Rgba<u8>>,
    pub width: Option<f64>,
    pub linecap: Option<String>,
    pub linejoin: Option<String>,
    pub border: Option<Rgba<u8>>,
    pub border_width: Option<f64>,
    pub padding: f64,
    pub maxzoom: u8,
}

impl OverlayDefaults {
    pub fn from_query(params: &HashMap<String, String>) -> Self {
        Self {
            fill: params.get("fill").and_then(|v| parse_hex_color(v)),
            stroke: params.get("stroke").and_then(|v| parse_hex_color(v)),
            width: params.get("width").and_then(|v| v.parse().ok()),
            linecap: params.get("linecap").cloned(),
            linejoin: params.get("linejoin").cloned(),
            border: params.get("border").and_then(|v| parse_hex_color(v)),
            border_width: params.get("borderWidth").and_then(|v| v.parse().ok()),
            padding: params
                .get("padding")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.1),
            maxzoom: params
                .get("maxzoom")
                .and_then(|v| v.parse().ok())
                .unwrap_or(22),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PathOverlay {
    pub points: Vec<(f64, f64)>,
    pub fill: Option<Rgba<u8>>,
    pub stroke: Option<Rgba<u8>>,
    pub width: Option<f64>,
    #[allow(dead_code)]
    pub linecap: Option<String>,
    #[allow(dead_code)]
    pub linejoin: Option<String>,
    pub border: Option<Rgba<u8>>,
    pub border_width: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct MarkerOverlay {
    pub lon: f64,
    pub lat: f64,
    pub icon: String,
    pub scale: f64,
    pub offset: (f64, f64),
}

const PATH_PROPS: &[&str] = &[
    "latlng",
    "fill",
    "stroke",
    "width",
    "linecap",
    "linejoin",
    "border",
    "borderWidth",
];

/// Parse one `path=` value: up to 8 leading `key:value|` properties followed
/// by `enc:<polyline>` or a pipe-separated `lon,lat` list (spec.md §4.7).
pub fn parse_path(path_str: &str) -> Option<PathOverlay> {
    let mut rest = path_str;
    let mut props: HashMap<&str, &str> = HashMap::new();

    while props.len() < 8 {
        let Some(idx) = rest.find('|') else { break };
        let segment = &rest[..idx];
        let Some(colon) = segment.find(':') else { break };
        let key = &segment[..colon];
        if !PATH_PROPS.contains(&key) {
            break;
        }
        props.insert(key, &segment[colon + 1..]);
        rest = &rest[idx + 1..];
    }

    let latlng_order = props.contains_key("latlng");
    let points: Vec<(f64, f64)> = if let Some(encoded) = rest.strip_prefix("enc:") {
        decode_polyline(encoded)
    } else {
        rest.split('|').filter_map(|c| parse_coord_pair(c, latlng_order)).collect()
    };

    if points.len() < 2 {
        return None;
    }

    Some(PathOverlay {
        points,
        fill: props.get("fill").and_then(|v| parse_hex_color(v)),
        stroke: props.get("stroke").and_then(|v| parse_hex_color(v)),
        width: props.get("width").and_then(|v| v.parse().ok()),
        linecap: props.get("linecap").map(|s| s.to_string()),
        linejoin: props.get("linejoin").map(|s| s.to_string()),
        border: props.get("border").and_then(|v| parse_hex_color(v)),
        border_width: props.get("borderWidth").and_then(|v| v.parse().ok()),
    })
}

/// Parse one `marker=` value: `<lon>,<lat>|<iconPath>(|scale:<f>|offset:<dx>,<dy>){0,2}`.
pub fn parse_marker(marker_str: &str) -> Option<MarkerOverlay> {
    let mut parts = marker_str.split('|');
    let (lon, lat) = parse_coord_pair(parts.next()?, false)?;
    let icon = parts.next()?.to_string();

    let mut scale = 1.0;
    let mut offset = (0.0, 0.0);
    for part in parts {
        if let Some(v) = part.strip_prefix("scale:") {
            if let Ok(f) = v.parse() {
                scale = f;
            }
        } else if let Some(v) = part.strip_prefix("offset:") {
            let xy: Vec<&str> = v.split(',').collect();
            if xy.len() == 2 {
                if let (Ok(dx), Ok(dy)) = (xy[0].parse(), xy[1].parse()) {
                    offset = (dx, dy);
                }
            }
        }
    }

    Some(MarkerOverlay {
        lon,
        lat,
        icon,
        scale,
        offset,
    })
}

fn parse_coord_pair(s: &str, latlng_order: bool) -> Option<(f64, f64)> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 2 {
        return None;
    }
    let a: f64 = parts[0].parse().ok()?;
    let b: f64 = parts[1].parse().ok()?;
    Some(if latlng_order { (b, a) } else { (a, b) })
}

fn parse_hex_color(hex: &str) -> Option<Rgba<u8>> {
    let hex = hex.trim_start_matches('#');
    match hex.len() {
        3 => {
            let r = u8::from_str_radix(&hex[0..1], 16).ok()? * 17;
            let g = u8::from_str_radix(&hex[1..2], 16).ok()? * 17;
            let b = u8::from_str_radix(&hex[2..3], 16).ok()? * 17;
            Some(Rgba([r, g, b, 255]))
        }
        4 => {
            let r = u8::from_str_radix(&hex[0..1], 16).ok()? * 17;
            let g = u8::from_str_radix(&hex[1..2], 16).ok()? * 17;
            let b = u8::from_str_radix(&hex[2..3], 16).ok()? * 17;
            let a = u8::from_str_radix(&hex[3..4], 16).ok()? * 17;
            Some(Rgba([r, g, b, a]))
        }
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some(Rgba([r, g, b, 255]))
        }
        8 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            let a = u8::from_str_radix(&hex[6..8], 16).ok()?;
            Some(Rgba([r, g, b, a]))
        }
        _ => None,
    }
}

/// Project `(lon, lat)` to screen pixels given the static map's camera
/// center/zoom. Zoom is expressed at the 512px tile convention used
/// throughout this crate (see [`crate::tilemath::INTERNAL_TILE_SIZE`]).
fn project(lon: f64, lat: f64, center_lon: f64, center_lat: f64, zoom: f64, width: u32, height: u32) -> (f64, f64) {
    let tile_size = crate::tilemath::INTERNAL_TILE_SIZE;
    let dx = lon_to_pixel(lon, zoom, tile_size) - lon_to_pixel(center_lon, zoom, tile_size);
    let dy = lat_to_pixel(lat, zoom, tile_size) - lat_to_pixel(center_lat, zoom, tile_size);
    (width as f64 / 2.0 + dx, height as f64 / 2.0 + dy)
}

/// Parse and draw every `path=`/`marker=` value onto `image` (spec.md §4.7's
/// compositing rules), fetching marker icons from disk or (if allowed) HTTP.
#[allow(clippy::too_many_arguments)]
pub async fn composite(
    image: &mut RgbaImage,
    path: Option<&str>,
    marker: Option<&str>,
    defaults: &OverlayDefaults,
    center_lon: f64,
    center_lat: f64,
    zoom: f64,
    scale: f32,
    icons_dir: &Path,
    allow_remote_icons: bool,
) -> Result<()> {
    let width = image.width();
    let height = image.height();

    if let Some(path_str) = path {
        for segment in path_str.split(' ').filter(|s| !s.is_empty()) {
            if let Some(overlay) = parse_path(segment) {
                draw_path(image, &overlay, defaults, center_lon, center_lat, zoom, width, height);
            }
        }
    }

    if let Some(marker_str) = marker {
        for segment in marker_str.split(' ').filter(|s| !s.is_empty()) {
            if let Some(overlay) = parse_marker(segment) {
                draw_marker(
                    image,
                    &overlay,
                    center_lon,
                    center_lat,
                    zoom,
                    width,
                    height,
                    scale,
                    icons_dir,
                    allow_remote_icons,
                )
                .await?;
            }
        }
    }

    Ok(())
}

fn draw_path(
    image: &mut RgbaImage,
    path: &PathOverlay,
    defaults: &OverlayDefaults,
    center_lon: f64,
    center_lat: f64,
    zoom: f64,
    width: u32,
    height: u32,
) {
    let pixels: Vec<(f64, f64)> = path
        .points
        .iter()
        .map(|&(lon, lat)| project(lon, lat, center_lon, center_lat, zoom, width, height))
        .collect();
    if pixels.len() < 2 {
        return;
    }
    let closed = path.points.first() == path.points.last();

    let fill = path.fill.or(defaults.fill);
    if let Some(fill_color) = fill {
        fill_polygon(image, &pixels, fill_color);
    }

    let configured_width = path.width.or(defaults.width).unwrap_or(0.0);
    let stroke_width = if fill.is_none() && configured_width <= 0.0 {
        1.0
    } else {
        configured_width
    };

    if stroke_width > 0.0 {
        let border = path.border.or(defaults.border);
        if let Some(border_color) = border {
            let border_width = path.border_width.or(defaults.border_width).unwrap_or(stroke_width * 0.1);
            if border_width > 0.0 {
                draw_polyline(image, &pixels, border_color, stroke_width + 2.0 * border_width, closed);
            }
        }
        let stroke_color = path.stroke.or(defaults.stroke).unwrap_or(DEFAULT_STROKE);
        draw_polyline(image, &pixels, stroke_color, stroke_width, closed);
    }
}

async fn draw_marker(
    image: &mut RgbaImage,
    marker: &MarkerOverlay,
    center_lon: f64,
    center_lat: f64,
    zoom: f64,
    width: u32,
    height: u32,
    scale: f32,
    icons_dir: &Path,
    allow_remote_icons: bool,
) -> Result<()> {
    let icon = match load_icon(&marker.icon, icons_dir, allow_remote_icons).await? {
        Some(icon) => icon,
        None => return Ok(()),
    };

    let (px, py) = project(marker.lon, marker.lat, center_lon, center_lat, zoom, width, height);

    let icon_scale = marker.scale * scale as f64;
    let icon_w = icon.width() as f64 * icon_scale;
    let icon_h = icon.height() as f64 * icon_scale;

    // Anchor is bottom-center with an optional pixel offset (spec.md §4.7).
    let origin_x = px + (-icon_w / 2.0 + marker.offset.0 * scale as f64);
    let origin_y = py + (-icon_h + marker.offset.1 * scale as f64);

    let resized = image::imageops::resize(
        &icon,
        icon_w.round().max(1.0) as u32,
        icon_h.round().max(1.0) as u32,
        image::imageops::FilterType::CatmullRom,
    );

    image::imageops::overlay(image, &resized, origin_x.round() as i64, origin_y.round() as i64);
    Ok(())
}

async fn load_icon(icon_path: &str, icons_dir: &Path, allow_remote: bool) -> Result<Option<RgbaImage>> {
    let bytes = if icon_path.starts_with("http://") || icon_path.starts_with("https://") {
        if !allow_remote {
            return Ok(None);
        }
        reqwest::get(icon_path)
            .await
            .map_err(|e| TileServerError::UpstreamError(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| TileServerError::UpstreamError(e.to_string()))?
            .to_vec()
    } else {
        let path = icons_dir.join(icon_path);
        std::fs::read(&path).map_err(TileServerError::FileError)?
    };

    let image = image::load_from_memory(&bytes)
        .map_err(|e| TileServerError::RenderError(format!("invalid marker icon: {e}")))?
        .to_rgba8();
    Ok(Some(image))
}

fn fill_polygon(image: &mut RgbaImage, points: &[(f64, f64)], color: Rgba<u8>) {
    if points.len() < 3 {
        return;
    }
    let min_y = points.iter().map(|p| p.1).fold(f64::MAX, f64::min).floor().max(0.0) as i64;
    let max_y = points
        .iter()
        .map(|p| p.1)
        .fold(f64::MIN, f64::max)
        .ceil()
        .min(image.height() as f64) as i64;

    for y in min_y..max_y {
        let yf = y as f64 + 0.5;
        let mut crossings: Vec<f64> = Vec::new();
        for i in 0..points.len() {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % points.len()];
            if (y0 <= yf && y1 > yf) || (y1 <= yf && y0 > yf) {
                let t = (yf - y0) / (y1 - y0);
                crossings.push(x0 + t * (x1 - x0));
            }
        }
        crossings.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for pair in crossings.chunks(2) {
            if pair.len() < 2 {
                continue;
            }
            let x_start = pair[0].max(0.0) as u32;
            let x_end = (pair[1].min(image.width() as f64 - 1.0)).max(0.0) as u32;
            for x in x_start..=x_end.min(image.width().saturating_sub(1)) {
                blend_pixel(image, x, y as u32, color);
            }
        }
    }
}

fn draw_polyline(image: &mut RgbaImage, points: &[(f64, f64)], color: Rgba<u8>, width: f64, closed: bool) {
    let n = if closed { points.len() } else { points.len() - 1 };
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % points.len()];
        draw_thick_line(image, a, b, color, width);
    }
}

fn draw_thick_line(image: &mut RgbaImage, (x0, y0): (f64, f64), (x1, y1): (f64, f64), color: Rgba<u8>, width: f64) {
    let dx = x1 - x0;
    let dy = y1 - y0;
    let length = (dx * dx + dy * dy).sqrt();
    if length < 0.5 {
        return;
    }

    let steps = length.ceil() as i64;
    let half = width / 2.0;
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let cx = x0 + dx * t;
        let cy = y0 + dy * t;
        let r = half.ceil() as i64;
        for ox in -r..=r {
            for oy in -r..=r {
                let dist = ((ox * ox + oy * oy) as f64).sqrt();
                if dist <= half {
                    let px = cx + ox as f64;
                    let py = cy + oy as f64;
                    if px >= 0.0 && py >= 0.0 && (px as u32) < image.width() && (py as u32) < image.height() {
                        blend_pixel(image, px as u32, py as u32, color);
                    }
                }
            }
        }
    }
}

fn blend_pixel(image: &mut RgbaImage, x: u32, y: u32, color: Rgba<u8>) {
    let existing = *image.get_pixel(x, y);
    let alpha = color.0[3] as f32 / 255.0;
    let inv_alpha = 1.0 - alpha;

    let r = (color.0[0] as f32 * alpha + existing.0[0] as f32 * inv_alpha) as u8;
    let g = (color.0[1] as f32 * alpha + existing.0[1] as f32 * inv_alpha) as u8;
    let b = (color.0[2] as f32 * alpha + existing.0[2] as f32 * inv_alpha) as u8;
    let a = (color.0[3] as f32 + existing.0[3] as f32 * inv_alpha).min(255.0) as u8;

    image.put_pixel(x, y, Rgba([r, g, b, a]));
}

/// Bounding box of every vertex across all `path=`/`marker=` query values
/// (spec.md §9: `auto` uses every overlay point, not just the first kind seen).
pub fn overlay_bbox(path: Option<&str>, marker: Option<&str>) -> Option<[f64; 4]> {
    let mut min_lon = f64::MAX;
    let mut min_lat = f64::MAX;
    let mut max_lon = f64::MIN;
    let mut max_lat = f64::MIN;
    let mut has_points = false;

    if let Some(path_str) = path {
        for segment in path_str.split(' ').filter(|s| !s.is_empty()) {
            if let Some(overlay) = parse_path(segment) {
                for (lon, lat) in overlay.points {
                    min_lon = min_lon.min(lon);
                    min_lat = min_lat.min(lat);
                    max_lon = max_lon.max(lon);
                    max_lat = max_lat.max(lat);
                    has_points = true;
                }
            }
        }
    }

    if let Some(marker_str) = marker {
        for segment in marker_str.split(' ').filter(|s| !s.is_empty()) {
            if let Some(overlay) = parse_marker(segment) {
                min_lon = min_lon.min(overlay.lon);
                min_lat = min_lat.min(overlay.lat);
                max_lon = max_lon.max(overlay.lon);
                max_lat = max_lat.max(overlay.lat);
                has_points = true;
            }
        }
    }

    has_points.then_some([min_lon, min_lat, max_lon, max_lat])
}
