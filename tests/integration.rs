//! HTTP-level integration tests for the full router.
//!
//! Spins up a real `axum` app (via `axum-test`) against a throwaway tree of
//! styles/fonts/mbtiles built with `tempfile`, the same way a reader would
//! exercise the server from outside without a running MapLibre renderer.

use std::path::Path;
use std::sync::Arc;

use axum_test::TestServer;
use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

use maptiles_server::config::{
    Config, DataEntryConfig, PathsConfig, RenderOptionsConfig, StyleEntryConfig,
};
use maptiles_server::render::Renderer;
use maptiles_server::routes;
use maptiles_server::sources::SourceManager;
use maptiles_server::state::AppState;
use maptiles_server::styles::StyleManager;

/// Build a minimal MBTiles archive with one tile at z=0/x=0/y=0 (XYZ).
fn write_mbtiles(path: &Path, minzoom: u8, maxzoom: u8, tile_bytes: &[u8]) {
    let conn = Connection::open(path).expect("create mbtiles file");
    conn.execute_batch(
        "CREATE TABLE metadata (name TEXT, value TEXT);
         CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);",
    )
    .unwrap();
    let rows = [
        ("name", "Test Source".to_string()),
        ("format", "pbf".to_string()),
        ("minzoom", minzoom.to_string()),
        ("maxzoom", maxzoom.to_string()),
        ("bounds", "-180,-85.0511,180,85.0511".to_string()),
    ];
    for (name, value) in rows {
        conn.execute(
            "INSERT INTO metadata (name, value) VALUES (?1, ?2)",
            rusqlite::params![name, value],
        )
        .unwrap();
    }
    // zoom 0 has a single tile; TMS row 0 == XYZ row 0 at that zoom.
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

async fn build_fixture() -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let root = dir.path();

    for sub in ["styles/basic", "fonts", "sprites", "icons", "mbtiles"] {
        std::fs::create_dir_all(root.join(sub)).unwrap();
    }

    std::fs::write(
        root.join("styles/basic/style.json"),
        json!({
            "version": 8,
            "name": "Basic",
            "sources": {
                "osm": { "type": "vector", "url": "mbtiles://{osm}" }
            },
            "glyphs": "fonts/{fontstack}/{range}.pbf",
            "layers": [],
        })
        .to_string(),
    )
    .unwrap();

    write_mbtiles(&root.join("mbtiles/osm.mbtiles"), 0, 14, b"not-really-a-tile");

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
async fn health_check_returns_ok() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/health").await;
    response.assert_status_ok();
    response.assert_text("OK");
}

#[tokio::test]
async fn index_lists_loaded_styles_and_sources() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/").await;
    response.assert_status_ok();
    let body = response.text();
    assert!(body.contains("basic"), "landing page should list the style: {body}");
    assert!(body.contains("osm"), "landing page should list the source: {body}");
}

#[tokio::test]
async fn style_json_rewrites_local_sources_to_public_urls() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/styles/basic/style.json").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let url = body["sources"]["osm"]["url"].as_str().unwrap();
    assert!(url.ends_with("/data/osm.json"), "got {url}");
}

#[tokio::test]
async fn style_json_404s_for_unknown_style() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/styles/nope/style.json").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn style_wmts_capabilities_document() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/styles/basic/wmts.xml").await;
    response.assert_status_ok();
    let body = response.text();
    assert!(body.starts_with("<?xml"));
    assert!(body.contains("basic-256"));
}

#[tokio::test]
async fn data_tilejson_describes_the_source() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/data/osm.json").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["tilejson"], "2.0.0");
    assert_eq!(body["id"], "osm");
    assert!(body["tiles"][0].as_str().unwrap().ends_with(".pbf"));
}

#[tokio::test]
async fn data_tilejson_404s_for_unknown_source() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/data/nope.json").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn data_tile_returns_gzipped_pbf() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/data/osm/0/0/0.pbf").await;
    response.assert_status_ok();
    response.assert_header("content-type", "application/x-protobuf");
    response.assert_header("content-encoding", "gzip");
}

#[tokio::test]
async fn data_tile_is_no_content_when_absent_but_in_range() {
    let fixture = build_fixture().await;
    // z=5 is within [minzoom, maxzoom] but no row was inserted for it.
    let response = fixture.server.get("/data/osm/5/0/0.pbf").await;
    response.assert_status(axum::http::StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn data_tile_rejects_out_of_range_xy() {
    let fixture = build_fixture().await;
    // Only tile 0/0 exists at zoom 0; 5/5 is out of the valid 2^z grid.
    let response = fixture.server.get("/data/osm/0/5/5.pbf").await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn font_glyphs_404_when_missing_from_disk() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/fonts/Noto Sans Regular/0-255.pbf").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn style_sprite_404_when_not_configured() {
    let fixture = build_fixture().await;
    let response = fixture.server.get("/styles/basic/sprite.json").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ui_disabled_removes_the_landing_page() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    for sub in ["styles", "fonts", "sprites", "icons", "mbtiles"] {
        std::fs::create_dir_all(root.join(sub)).unwrap();
    }
    let config = Config {
        options: RenderOptionsConfig {
            paths: PathsConfig {
                root: root.to_path_buf(),
                ..PathsConfig::default()
            },
            ..RenderOptionsConfig::default()
        },
        ..Config::default()
    };
    let sources = SourceManager::from_configs(&config.data, &config.options.paths.mbtiles_dir())
        .await
        .unwrap();
    let styles = StyleManager::from_configs(&config.styles, &config.options.paths, &sources)
        .await
        .unwrap();
    let renderer = Renderer::new(config.options.clone()).unwrap();
    let state = Arc::new(AppState {
        config,
        styles,
        sources,
        renderer,
    });

    let app = routes::router(state, false);
    let server = TestServer::new(app).unwrap();

    let response = server.get("/").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}
