//! Web Mercator tile-coordinate math and the Google encoded-polyline codec.
//!
//! Pure functions over `f64`; no I/O, no allocation beyond the polyline
//! vectors. Mirrors the projection math `render::overlay` already used for
//! screen-space projection, generalized into the standalone primitives the
//! tile renderer and static renderer both build on.

use std::f64::consts::PI;

/// Native rendering grid size. Tiles are rendered at this size and
/// clipped/resampled down to the configured `tile_size`.
pub const INTERNAL_TILE_SIZE: u32 = 512;

/// Longitude in degrees to the unit interval `[0, 1]`.
pub fn lon_to_x(lon: f64) -> f64 {
    (lon + 180.0) / 360.0
}

/// Latitude in degrees to the unit interval `[0, 1]` (Web Mercator).
pub fn lat_to_y(lat: f64) -> f64 {
    let sin_component = (lat * PI / 180.0).tan() + 1.0 / (lat * PI / 180.0).cos();
    (1.0 - sin_component.ln() / PI) / 2.0
}

/// Tile column containing `lon` at zoom `z`.
pub fn lon_to_tile_x(lon: f64, z: u8) -> i64 {
    (lon_to_x(lon) * 2f64.powi(z as i32)).floor() as i64
}

/// Tile row containing `lat` at zoom `z`.
pub fn lat_to_tile_y(lat: f64, z: u8) -> i64 {
    (lat_to_y(lat) * 2f64.powi(z as i32)).floor() as i64
}

/// Pixel column of `lon` at (possibly fractional) zoom `z` for a given tile size.
pub fn lon_to_pixel(lon: f64, z: f64, tile_size: u32) -> f64 {
    lon_to_x(lon) * 2f64.powf(z) * tile_size as f64
}

/// Pixel row of `lat` at (possibly fractional) zoom `z` for a given tile size.
pub fn lat_to_pixel(lat: f64, z: f64, tile_size: u32) -> f64 {
    lat_to_y(lat) * 2f64.powf(z) * tile_size as f64
}

/// Choose the zoom level that fits a geographic bounding box into an image of
/// size `width x height`, padded by `padding` (fraction of the box size).
///
/// Returns the largest zoom for which the box, inflated by `padding` on every
/// side, still fits inside the image; never negative.
pub fn zoom_for_bbox(
    lon_min: f64,
    lat_min: f64,
    lon_max: f64,
    lat_max: f64,
    width: u32,
    height: u32,
    padding: f64,
) -> f64 {
    let x_min = lon_to_x(lon_min);
    let x_max = lon_to_x(lon_max);
    let y_min = lat_to_y(lat_max);
    let y_max = lat_to_y(lat_min);

    let box_width = (x_max - x_min).abs().max(f64::EPSILON);
    let box_height = (y_max - y_min).abs().max(f64::EPSILON);

    let aspect_image = width as f64 / height as f64;
    let aspect_box = box_width / box_height;

    // Whichever dimension is most constraining against the image's aspect
    // ratio determines the zoom.
    let (dim, box_size) = if aspect_box > aspect_image {
        (width as f64, box_width)
    } else {
        (height as f64, box_height)
    };

    let zoom = (dim / (1.0 + 2.0 * padding) / box_size / INTERNAL_TILE_SIZE as f64).log2();
    zoom.max(0.0)
}

/// Decode a Google encoded-polyline v5 string into `(lon, lat)` pairs.
///
/// The wire format stores latitude before longitude for each point; the
/// returned pairs are in `(lon, lat)` order for GeoJSON-style consumption.
pub fn decode_polyline(encoded: &str) -> Vec<(f64, f64)> {
    let mut points = Vec::new();
    let bytes = encoded.as_bytes();
    let mut index = 0usize;
    let mut lat = 0i64;
    let mut lng = 0i64;

    while index < bytes.len() {
        let Some(dlat) = decode_value(bytes, &mut index) else {
            return points;
        };
        lat += dlat;

        let Some(dlng) = decode_value(bytes, &mut index) else {
            return points;
        };
        lng += dlng;

        points.push((lng as f64 / 1e5, lat as f64 / 1e5));
    }

    points
}

fn decode_value(bytes: &[u8], index: &mut usize) -> Option<i64> {
    let mut shift = 0;
    let mut result = 0i64;
    loop {
        if *index >= bytes.len() {
            return None;
        }
        let b = (bytes[*index] as i64) - 63;
        *index += 1;
        result |= (b & 0x1f) << shift;
        shift += 5;
        if b < 0x20 {
            break;
        }
    }
    Some(if (result & 1) != 0 {
        !(result >> 1)
    } else {
        result >> 1
    })
}

/// Encode `(lon, lat)` pairs into a Google encoded-polyline v5 string.
pub fn encode_polyline(points: &[(f64, f64)]) -> String {
    let mut encoded = String::new();
    let mut prev_lat = 0i64;
    let mut prev_lng = 0i64;

    // Walking `points` by index, not `ElementAt` over a lazy sequence: O(n).
    for &(lon, lat) in points {
        let lat_i = (lat * 1e5).round() as i64;
        let lng_i = (lon * 1e5).round() as i64;

        encode_value(lat_i - prev_lat, &mut encoded);
        encode_value(lng_i - prev_lng, &mut encoded);

        prev_lat = lat_i;
        prev_lng = lng_i;
    }

    encoded
}

fn encode_value(mut value: i64, out: &mut String) {
    value = if value < 0 { !(value << 1) } else { value << 1 };
    while value >= 0x20 {
        out.push(((value & 0x1f) as u8 + 63 + 0x20) as char);
        value >>= 5;
    }
    out.push((value as u8 + 63) as char);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_x_y_in_range() {
        for z in 0u8..=22 {
            for &lon in &[-180.0, -45.0, 0.0, 45.0, 179.999] {
                let x = lon_to_tile_x(lon, z);
                assert!(x >= 0 && x < (1i64 << z));
            }
            for &lat in &[-85.0511, -10.0, 0.0, 10.0, 85.0511] {
                let y = lat_to_tile_y(lat, z);
                assert!(y >= 0 && y < (1i64 << z));
            }
        }
    }

    #[test]
    fn zoom_for_bbox_never_negative() {
        let z = zoom_for_bbox(-1.0, -1.0, 1.0, 1.0, 256, 256, 0.1);
        assert!(z >= 0.0);
    }

    #[test]
    fn zoom_for_bbox_shrinking_box_does_not_decrease_zoom() {
        let big = zoom_for_bbox(-10.0, -10.0, 10.0, 10.0, 512, 512, 0.1);
        let small = zoom_for_bbox(-1.0, -1.0, 1.0, 1.0, 512, 512, 0.1);
        assert!(small >= big);
    }

    #[test]
    fn zoom_for_bbox_more_padding_does_not_increase_zoom() {
        let low_pad = zoom_for_bbox(-5.0, -5.0, 5.0, 5.0, 512, 512, 0.0);
        let high_pad = zoom_for_bbox(-5.0, -5.0, 5.0, 5.0, 512, 512, 0.5);
        assert!(high_pad <= low_pad);
    }

    #[test]
    fn polyline_roundtrip() {
        let points: Vec<(f64, f64)> = (0..200)
            .map(|i| (-122.0 + i as f64 * 0.001, 37.0 + i as f64 * 0.002))
            .collect();
        let encoded = encode_polyline(&points);
        let decoded = decode_polyline(&encoded);
        assert_eq!(decoded.len(), points.len());
        for (a, b) in points.iter().zip(decoded.iter()) {
            assert!((a.0 - b.0).abs() < 1e-5);
            assert!((a.1 - b.1).abs() < 1e-5);
        }
    }

    #[test]
    fn polyline_decodes_google_example() {
        let points = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@");
        assert_eq!(points.len(), 3);
        assert!((points[0].1 - 38.5).abs() < 0.001);
        assert!((points[0].0 - (-120.2)).abs() < 0.001);
    }
}
