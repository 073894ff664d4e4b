use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration, immutable for the lifetime of the process once
/// [`Config::load`] returns.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub options: RenderOptionsConfig,
    #[serde(default)]
    pub styles: Vec<StyleEntryConfig>,
    #[serde(default)]
    pub data: Vec<DataEntryConfig>,
}

/// Server bind configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// OpenTelemetry configuration; disabled unless `enabled = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otlp_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "maptiles-server".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otlp_endpoint(),
            service_name: default_service_name(),
            sample_rate: default_sample_rate(),
        }
    }
}

/// Paths resolved against `root` at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_styles_dir")]
    pub styles: PathBuf,
    #[serde(default = "default_fonts_dir")]
    pub fonts: PathBuf,
    #[serde(default = "default_sprites_dir")]
    pub sprites: PathBuf,
    #[serde(default = "default_icons_dir")]
    pub icons: PathBuf,
    #[serde(default = "default_mbtiles_dir")]
    pub mbtiles: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_styles_dir() -> PathBuf {
    PathBuf::from("styles")
}
fn default_fonts_dir() -> PathBuf {
    PathBuf::from("fonts")
}
fn default_sprites_dir() -> PathBuf {
    PathBuf::from("sprites")
}
fn default_icons_dir() -> PathBuf {
    PathBuf::from("icons")
}
fn default_mbtiles_dir() -> PathBuf {
    PathBuf::from("mbtiles")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            styles: default_styles_dir(),
            fonts: default_fonts_dir(),
            sprites: default_sprites_dir(),
            icons: default_icons_dir(),
            mbtiles: default_mbtiles_dir(),
        }
    }
}

impl PathsConfig {
    pub fn styles_dir(&self) -> PathBuf {
        self.root.join(&self.styles)
    }
    pub fn fonts_dir(&self) -> PathBuf {
        self.root.join(&self.fonts)
    }
    pub fn sprites_dir(&self) -> PathBuf {
        self.root.join(&self.sprites)
    }
    pub fn icons_dir(&self) -> PathBuf {
        self.root.join(&self.icons)
    }
    pub fn mbtiles_dir(&self) -> PathBuf {
        self.root.join(&self.mbtiles)
    }

    /// Every configured directory must exist; missing a directory aborts startup.
    pub fn verify_exist(&self) -> anyhow::Result<()> {
        for dir in [
            self.styles_dir(),
            self.fonts_dir(),
            self.sprites_dir(),
            self.icons_dir(),
            self.mbtiles_dir(),
        ] {
            if !dir.exists() {
                anyhow::bail!("configured directory does not exist: {}", dir.display());
            }
        }
        Ok(())
    }
}

/// Rendering options shared by every style/scale renderer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOptionsConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default)]
    pub tile_margin: u32,
    #[serde(default = "default_pool_sizes")]
    pub min_renderer_pool_sizes: Vec<usize>,
    #[serde(default = "default_pool_sizes")]
    pub max_renderer_pool_sizes: Vec<usize>,
    #[serde(default = "default_serve_bounds")]
    pub serve_bounds: [f64; 4],
    #[serde(default = "default_max_scale_factor")]
    pub max_scale_factor: u8,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[serde(default)]
    pub format_quality: FormatQualityConfig,
    #[serde(default)]
    pub allow_remote_marker_icons: bool,
    #[serde(default = "default_true")]
    pub serve_static_maps: bool,
}

fn default_tile_size() -> u32 {
    256
}
fn default_pool_sizes() -> Vec<usize> {
    vec![2, 1, 1, 1, 1, 1, 1, 1, 1]
}
fn default_serve_bounds() -> [f64; 4] {
    [-180.0, -85.0511, 180.0, 85.0511]
}
fn default_max_scale_factor() -> u8 {
    9
}
fn default_max_size() -> u32 {
    2048
}
fn default_true() -> bool {
    true
}

impl Default for RenderOptionsConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            tile_size: default_tile_size(),
            tile_margin: 0,
            min_renderer_pool_sizes: default_pool_sizes(),
            max_renderer_pool_sizes: default_pool_sizes(),
            serve_bounds: default_serve_bounds(),
            max_scale_factor: default_max_scale_factor(),
            max_size: default_max_size(),
            format_quality: FormatQualityConfig::default(),
            allow_remote_marker_icons: false,
            serve_static_maps: true,
        }
    }
}

impl RenderOptionsConfig {
    /// `internalTileMargin = max(configured, (internalTileSize - tileSize)/2, 0)`.
    pub fn internal_tile_margin(&self) -> u32 {
        let half_diff = (crate::tilemath::INTERNAL_TILE_SIZE as i64 - self.tile_size as i64) / 2;
        self.tile_margin.max(half_diff.max(0) as u32)
    }

    pub fn min_pool_size(&self, scale: u8) -> usize {
        pool_size_for_scale(&self.min_renderer_pool_sizes, scale)
    }

    pub fn max_pool_size(&self, scale: u8) -> usize {
        pool_size_for_scale(&self.max_renderer_pool_sizes, scale).max(1)
    }

    pub fn normalized_serve_bounds(&self) -> [f64; 4] {
        let [min_lon, min_lat, max_lon, max_lat] = self.serve_bounds;
        [
            min_lon.min(max_lon),
            min_lat.min(max_lat),
            min_lon.max(max_lon),
            min_lat.max(max_lat),
        ]
    }
}

fn pool_size_for_scale(sizes: &[usize], scale: u8) -> usize {
    let idx = scale.saturating_sub(1) as usize;
    sizes.get(idx).copied().unwrap_or(1)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatQualityConfig {
    #[serde(default = "default_jpeg_quality")]
    pub jpeg: u8,
    #[serde(default = "default_webp_quality")]
    pub webp: u8,
    #[serde(default = "default_png_compression")]
    pub png: u8,
}

fn default_jpeg_quality() -> u8 {
    90
}
fn default_webp_quality() -> u8 {
    90
}
fn default_png_compression() -> u8 {
    6
}

impl Default for FormatQualityConfig {
    fn default() -> Self {
        Self {
            jpeg: default_jpeg_quality(),
            webp: default_webp_quality(),
            png: default_png_compression(),
        }
    }
}

/// A configured style: source path plus user-supplied TileJSON overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleEntryConfig {
    pub id: String,
    /// File path (absolute, or relative to `paths.styles`) or an `http(s)://` URL.
    pub style: String,
    #[serde(default = "default_true")]
    pub serve_rendered: bool,
    #[serde(default = "default_true")]
    pub serve_data: bool,
    #[serde(default)]
    pub tilejson: serde_json::Value,
}

/// A configured MBTiles data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataEntryConfig {
    pub id: String,
    /// Relative filename inside `paths.mbtiles`.
    pub mbtiles: String,
    #[serde(default)]
    pub tilejson: serde_json::Value,
}

impl Config {
    fn substitute_env_vars(content: &str) -> String {
        shellexpand::env_with_context_no_errors(content, |var| std::env::var(var).ok()).to_string()
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let content = Self::substitute_env_vars(&content);
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the provided path, or the default search
    /// locations, or fall back to an (empty) default configuration.
    pub fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = config_path {
            if path.exists() {
                return Self::from_file(&path);
            }
            anyhow::bail!("configuration file not found: {}", path.display());
        }

        for path in [
            PathBuf::from("config.toml"),
            PathBuf::from("/etc/maptiles-server/config.toml"),
        ] {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.options.tile_size, 256);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 3000

            [options]
            tile_size = 256
            tile_margin = 64

            [[styles]]
            id = "basic"
            style = "basic/style.json"

            [[data]]
            id = "openmaptiles"
            mbtiles = "openmaptiles.mbtiles"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.options.tile_margin, 64);
        assert_eq!(config.styles.len(), 1);
        assert_eq!(config.styles[0].id, "basic");
        assert_eq!(config.data[0].id, "openmaptiles");
    }

    #[test]
    fn test_internal_tile_margin_floor() {
        let mut opts = RenderOptionsConfig::default();
        opts.tile_size = 256;
        opts.tile_margin = 0;
        assert_eq!(opts.internal_tile_margin(), 128);

        opts.tile_margin = 200;
        assert_eq!(opts.internal_tile_margin(), 200);
    }

    #[test]
    fn test_normalized_serve_bounds() {
        let mut opts = RenderOptionsConfig::default();
        opts.serve_bounds = [10.0, 10.0, -10.0, -10.0];
        assert_eq!(opts.normalized_serve_bounds(), [-10.0, -10.0, 10.0, 10.0]);
    }

    #[test]
    fn test_env_var_substitution_basic() {
        std::env::set_var("TEST_VAR_1", "hello");
        let result = Config::substitute_env_vars("value is ${TEST_VAR_1}");
        assert_eq!(result, "value is hello");
        std::env::remove_var("TEST_VAR_1");
    }

    #[test]
    fn test_env_var_substitution_with_default() {
        std::env::remove_var("NONEXISTENT_VAR");
        let result = Config::substitute_env_vars("value is ${NONEXISTENT_VAR:-fallback}");
        assert_eq!(result, "value is fallback");
    }
}
