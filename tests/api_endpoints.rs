//! HTTP API endpoint tests: formats, sprites, fonts, cache headers.
//!
//! These complement `integration.rs` (which covers the core style/data
//! routes) by exercising the sprite and font file-serving paths and the
//! format/content-type edge cases in `sources::TileFormat`.

use std::path::Path;
use std::sync::Arc;

use axum_test::TestServer;
use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

use maptiles_server::cache_control::tile_cache_headers;
use maptiles_server::config::{
    Config, DataEntryConfig, PathsConfig, RenderOptionsConfig, StyleEntryConfig,
};
use maptiles_server::render::Renderer;
use maptiles_server::routes;
use maptiles_server::sources::{SourceManager, TileCompression, TileFormat};
use maptiles_server::state::AppState;
use maptiles_server::styles::StyleManager;

#[test]
fn tile_format_parses_known_aliases() {
    assert_eq!("pbf".parse::<TileFormat>(), Ok(TileFormat::Pbf));
    assert_eq!("mvt".parse::<TileFormat>(), Ok(TileFormat::Pbf));
    assert_eq!("vector".parse::<TileFormat>(), Ok(TileFormat::Pbf));
    assert_eq!("png".parse::<TileFormat>(), Ok(TileFormat::Png));
    assert_eq!("jpg".parse::<TileFormat>(), Ok(TileFormat::Jpeg));
    assert_eq!("jpeg".parse::<TileFormat>(), Ok(TileFormat::Jpeg));
    assert_eq!("webp".parse::<TileFormat>(), Ok(TileFormat::Webp));
    assert_eq!("geojson".parse::<TileFormat>(), Ok(TileFormat::GeoJson));
    assert_eq!("exe".parse::<TileFormat>(), Ok(TileFormat::Unknown));
}

#[test]
fn tile_format_content_types_and_extensions() {
    assert_eq!(TileFormat::Pbf.content_type(), "application/x-protobuf");
    assert_eq!(TileFormat::Pbf.extension(), "pbf");
    assert_eq!(TileFormat::Png.content_type(), "image/png");
    assert_eq!(TileFormat::Jpeg.extension(), "jpg");
    assert_eq!(TileFormat::Unknown.content_type(), "application/octet-stream");
}

#[test]
fn tile_compression_content_encodings() {
    assert_eq!(TileCompression::None.content_encoding(), None);
    assert_eq!(TileCompression::Gzip.content_encoding(), Some("gzip"));
    assert_eq!(TileCompression::Brotli.content_encoding(), Some("br"));
}

#[test]
fn tile_cache_headers_set_long_lived_directives() {
    let header = tile_cache_headers();
    let value = header.to_str().unwrap();
    assert!(value.contains("max-age=86400"));
    assert!(value.contains("stale-while-revalidate"));
}

fn write_mbtiles(path: &Path, tile_bytes: &[u8]) {
    let conn = Connection::open(path).expect("create mbtiles file");
    conn.execute_batch(
        "CREATE TABLE metadata (name TEXT, value TEXT);
         CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);",
    )
    .unwrap();
    for (name, value) in [
        ("name", "Test Source"),
        ("format", "pbf"),
        ("minzoom", "0"),
        ("maxzoom", "14"),
    ] {
        conn.execute(
            "INSERT INTO metadata (name, value) VALUES (?1, ?2)",
            rusqlite::params![name, value],
        )
        .unwrap();
    }
    conn.execute(
        "INSERT INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (0, 0, 0, ?1)",
        rusqlite::params![tile_bytes],
    )
    .unwrap();
}

struct Fixture {
    _dir: TempDir,
    server: TestServer,
}

/// Builds a style with a sprite sheet and a font glyph range on disk, so the
/// sprite/font routes have something real to serve.
async fn build_fixture() -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let root = dir.path();

    for sub in [
        "styles/basic",
        "fonts/Noto Sans Regular",
        "sprites/basic",
        "icons",
        "mbtiles",
    ] {
        std::fs::create_dir_all(root.join(sub)).unwrap();
    }

    std::fs::write(
        root.join("styles/basic/style.json"),
        json!({
            "version": 8,
            "name": "Basic",
            "sources": { "osm": { "type": "vector", "url": "mbtiles://{osm}" } },
            "sprite": "sprite",
            "glyphs": "fonts/{fontstack}/{range}.pbf",
            "layers": [],
        })
        .to_string(),
    )
    .unwrap();

    // A tiny valid PNG (1x1 transparent pixel) for each sprite scale.
    let sprite_png = image::RgbaImage::new(1, 1);
    sprite_png
        .save(root.join("sprites/basic/sprite.png"))
        .unwrap();
    sprite_png
        .save(root.join("sprites/basic/sprite@2x.png"))
        .unwrap();
    std::fs::write(
        root.join("sprites/basic/sprite.json"),
        json!({ "pin": { "width": 1, "height": 1, "x": 0, "y": 0, "pixelRatio": 1 } }).to_string(),
    )
    .unwrap();

    std::fs::write(root.join("fonts/Noto Sans Regular/0-255.pbf"), b"not-a-real-glyph-pbf").unwrap();

    write_mbtiles(&root.join("mbtiles/osm.mbtiles"), b"not-really-a-tile");

    let config = Config {
        options: RenderOptionsConfig {
            paths: PathsConfig {
                root: root.to_path_buf(),
                ..PathsConfig::default()
            },
            ..RenderOptionsConfig::default()
        },
        styles: vec![StyleEntryConfig {
            id: "basic".to_string(),
            style: "basic/style.json".to_string(),
            serve_rendered: true,
            serve_data: true,
            tilejson: json!({}),
        }],
        data: vec![DataEntryConfig {
            id: "osm".to_string(),
            mbtiles: "osm.mbtiles".to_string(),
            tilejson: json!({}),
        }],
        ..Config::default()
    };

    let sources = SourceManager::from_configs(&config.data, &config.options.paths.mbtiles_dir())
        .await
        .expect("load sources");
    let styles = StyleManager::from_configs(&config.styles, &config.options.paths, &sources)
        .await
        .expect("load styles");
    let renderer = Renderer::new(config.options.clone()).expect("construct renderer");

    let state = Arc::new(AppState {
        config,
        styles,
        sources,
        renderer,
    });

    let app = routes::router(state, true);
    let server = TestServer::new(app).expect("test server");

    Fixture { _dir: dir, server }
}

#[tokio::test]
async fn sprite_json_is_served_with_json_content_type() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/styles/basic/sprite.json").await;
    response.assert_status_ok();
    response.assert_header("content-type", "application/json");
}

#[tokio::test]
async fn sprite_png_at_2x_scale_is_served() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/styles/basic/sprite@2x.png").await;
    response.assert_status_ok();
    response.assert_header("content-type", "image/png");
}

#[tokio::test]
async fn sprite_file_404s_for_malformed_filename() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/styles/basic/sprite@3xpng").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn font_glyphs_served_from_disk_with_cache_headers() {
    let fixture = build_fixture().await;
    let response = fixture
        .server
        .get("/fonts/Noto%20Sans%20Regular/0-255.pbf")
        .await;
    response.assert_status_ok();
    response.assert_header("content-type", "application/x-protobuf");
    let cache_control = response.header("cache-control");
    assert!(cache_control.to_str().unwrap().contains("max-age"));
}

#[tokio::test]
async fn font_glyphs_reject_path_traversal_in_fontstack() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/fonts/..%2f..%2fetc/0-255.pbf").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn data_tile_rejects_mismatched_requested_format() {
    let fixture = build_fixture().await;
    // The source only stores pbf; requesting png should be rejected rather
    // than silently returning raw protobuf bytes with an image content type.
    let response = fixture.server.get("/data/osm/0/0/0.png").await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn style_json_reports_rewritten_sprite_and_glyphs_urls() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/styles/basic/style.json").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let sprite = body["sprite"].as_str().unwrap();
    assert!(sprite.ends_with("/styles/basic/sprite"), "got {sprite}");
    let glyphs = body["glyphs"].as_str().unwrap();
    assert!(glyphs.ends_with("/fonts/{fontstack}/{range}.pbf"), "got {glyphs}");
}
