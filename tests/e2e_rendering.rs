//! End-to-end tests for the static-map overlay pipeline and the rendering
//! option types that feed it, using the real `path=`/`marker=` grammar.

use image::{Rgba, RgbaImage};
use tempfile::TempDir;

use maptiles_server::render::overlay::{composite, overlay_bbox, OverlayDefaults};
use maptiles_server::render::{ImageFormat, RenderOptions, StaticQueryParams, StaticType};

fn transparent(image: &RgbaImage) -> bool {
    image.pixels().all(|p| p.0[3] == 0)
}

#[tokio::test]
async fn composite_draws_a_filled_path_around_the_center() {
    let mut image = RgbaImage::new(256, 256);
    let defaults = OverlayDefaults::default();

    composite(
        &mut image,
        Some("fill:ff0000|-1,-1|1,-1|0,1"),
        None,
        &defaults,
        0.0,
        0.0,
        4.0,
        1.0,
        TempDir::new().unwrap().path(),
        false,
    )
    .await
    .unwrap();

    assert!(!transparent(&image), "expected the fill to paint some pixels");
    let center = *image.get_pixel(128, 128);
    assert!(center.0[3] > 0, "center pixel should be covered by the triangle");
}

#[tokio::test]
async fn composite_with_unparseable_path_leaves_image_untouched() {
    let mut image = RgbaImage::new(64, 64);
    let defaults = OverlayDefaults::default();

    // A single coordinate is not a valid path (needs >= 2 points).
    composite(
        &mut image,
        Some("0,0"),
        None,
        &defaults,
        0.0,
        0.0,
        4.0,
        1.0,
        TempDir::new().unwrap().path(),
        false,
    )
    .await
    .unwrap();

    assert!(transparent(&image));
}

#[tokio::test]
async fn composite_draws_a_marker_icon_loaded_from_disk() {
    let icons_dir = TempDir::new().unwrap();
    let icon = RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 255]));
    icon.save(icons_dir.path().join("pin.png")).unwrap();

    let mut image = RgbaImage::new(128, 128);
    let defaults = OverlayDefaults::default();

    composite(
        &mut image,
        None,
        Some("0,0|pin.png"),
        &defaults,
        0.0,
        0.0,
        4.0,
        1.0,
        icons_dir.path(),
        false,
    )
    .await
    .unwrap();

    assert!(!transparent(&image), "marker icon should have been blitted onto the image");
}

#[tokio::test]
async fn composite_skips_remote_marker_icon_when_not_allowed() {
    let mut image = RgbaImage::new(64, 64);
    let defaults = OverlayDefaults::default();

    composite(
        &mut image,
        None,
        Some("0,0|https://example.invalid/pin.png"),
        &defaults,
        0.0,
        0.0,
        4.0,
        1.0,
        TempDir::new().unwrap().path(),
        false,
    )
    .await
    .unwrap();

    assert!(transparent(&image), "remote icon fetch should be skipped, not attempted");
}

#[tokio::test]
async fn composite_draws_multiple_space_separated_paths() {
    let mut image = RgbaImage::new(256, 256);
    let defaults = OverlayDefaults::default();

    composite(
        &mut image,
        Some("fill:f00|-2,-2|-1,-2|-1.5,-1 fill:00f|1,1|2,1|1.5,2"),
        None,
        &defaults,
        0.0,
        0.0,
        4.0,
        1.0,
        TempDir::new().unwrap().path(),
        false,
    )
    .await
    .unwrap();

    assert!(!transparent(&image));
}

#[test]
fn static_type_parses_center_bbox_and_auto() {
    assert!(matches!(StaticType::from_str("auto").unwrap(), StaticType::Auto));

    match StaticType::from_str("-122.4,37.8,10@45,30").unwrap() {
        StaticType::Center { lon, lat, zoom, bearing, pitch } => {
            assert_eq!(lon, -122.4);
            assert_eq!(lat, 37.8);
            assert_eq!(zoom, 10.0);
            assert_eq!(bearing, Some(45.0));
            assert_eq!(pitch, Some(30.0));
        }
        other => panic!("expected Center, got {other:?}"),
    }

    match StaticType::from_str("-123,37,-122,38").unwrap() {
        StaticType::BoundingBox { min_lon, min_lat, max_lon, max_lat } => {
            assert_eq!((min_lon, min_lat, max_lon, max_lat), (-123.0, 37.0, -122.0, 38.0));
        }
        other => panic!("expected BoundingBox, got {other:?}"),
    }

    assert!(StaticType::from_str("garbage").is_err());
}

#[test]
fn for_static_rejects_auto_without_overlay_points() {
    let params = StaticQueryParams::default();
    let err = RenderOptions::for_static(
        "basic".to_string(),
        "{}".to_string(),
        StaticType::Auto,
        512,
        512,
        1,
        ImageFormat::Png,
        params,
        [-180.0, -85.0511, 180.0, 85.0511],
        None,
    )
    .unwrap_err();
    assert!(err.contains("auto requires"));
}

#[test]
fn for_static_auto_frames_every_overlay_point() {
    let path = Some("0,0|10,10".to_string());
    let marker = Some("-5,15|pin.png".to_string());
    let bbox = overlay_bbox(path.as_deref(), marker.as_deref()).unwrap();
    assert_eq!(bbox, [-5.0, 0.0, 10.0, 15.0]);

    let params = StaticQueryParams {
        path,
        marker,
        ..Default::default()
    };
    let options = RenderOptions::for_static(
        "basic".to_string(),
        "{}".to_string(),
        StaticType::Auto,
        512,
        512,
        1,
        ImageFormat::Png,
        params,
        [-180.0, -85.0511, 180.0, 85.0511],
        Some(bbox),
    )
    .unwrap();

    assert!((options.lon - 2.5).abs() < 1e-9);
    assert!((options.lat - 7.5).abs() < 1e-9);
    assert!(options.zoom > 0.0);
}

#[test]
fn for_static_bbox_rejects_box_outside_serve_bounds() {
    let params = StaticQueryParams::default();
    let err = RenderOptions::for_static(
        "basic".to_string(),
        "{}".to_string(),
        StaticType::BoundingBox {
            min_lon: 40.0,
            min_lat: 10.0,
            max_lon: 41.0,
            max_lat: 11.0,
        },
        512,
        512,
        1,
        ImageFormat::Png,
        params,
        [-10.0, -10.0, 10.0, 10.0],
        None,
    )
    .unwrap_err();
    assert!(err.contains("outside serve bounds"));
}

#[test]
fn for_static_center_rejects_point_outside_serve_bounds() {
    let params = StaticQueryParams::default();
    let err = RenderOptions::for_static(
        "basic".to_string(),
        "{}".to_string(),
        StaticType::Center {
            lon: 100.0,
            lat: 0.0,
            zoom: 5.0,
            bearing: None,
            pitch: None,
        },
        512,
        512,
        1,
        ImageFormat::Png,
        params,
        [-10.0, -10.0, 10.0, 10.0],
        None,
    )
    .unwrap_err();
    assert!(err.contains("outside serve bounds"));
}

#[test]
fn image_format_aliases_and_content_types() {
    assert_eq!(ImageFormat::from_str("png"), Some(ImageFormat::Png));
    assert_eq!(ImageFormat::from_str("JPG"), Some(ImageFormat::Jpeg));
    assert_eq!(ImageFormat::from_str("jpeg"), Some(ImageFormat::Jpeg));
    assert_eq!(ImageFormat::from_str("webp"), Some(ImageFormat::Webp));
    assert_eq!(ImageFormat::from_str("bmp"), None);
    assert_eq!(ImageFormat::Png.content_type(), "image/png");
}

#[test]
fn render_options_for_tile_centers_on_the_tile_midpoint() {
    let options = RenderOptions::for_tile("basic".to_string(), "{}".to_string(), 2, 1, 1, 1, ImageFormat::Png);
    assert_eq!(options.width, 512);
    assert_eq!(options.height, 512);
    assert_eq!(options.zoom, 2.0);
}
