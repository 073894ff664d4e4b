//! High-level renderer interface
//!
//! Wraps [`RendererPoolManager`] with the tile margin-clip algorithm and the
//! static-map render + overlay-composite pipeline.

use std::sync::Arc;

use super::native::{self, CameraOptions, MapMode, NativeMap, RenderedImage, Size};
use super::overlay::{self, OverlayDefaults};
use super::pool::RendererPoolManager;
use super::types::{ImageFormat, RenderOptions};
use crate::config::{FormatQualityConfig, RenderOptionsConfig};
use crate::error::{Result, TileServerError};
use crate::tilemath::INTERNAL_TILE_SIZE;

/// High-level renderer that manages per-(style, scale) renderer pools.
pub struct Renderer {
    pools: Arc<RendererPoolManager>,
}

impl Renderer {
    pub fn new(options: RenderOptionsConfig) -> Result<Self> {
        Ok(Self {
            pools: Arc::new(RendererPoolManager::new(options)?),
        })
    }

    pub fn pools(&self) -> Arc<RendererPoolManager> {
        self.pools.clone()
    }

    pub fn options(&self) -> &RenderOptionsConfig {
        self.pools.options()
    }

    /// Dispose every renderer pool (spec.md §5 shutdown sequence).
    pub async fn dispose(&self) {
        self.pools.dispose_all().await;
    }

    /// Render a single XYZ raster tile (spec.md §4.6).
    pub async fn render_tile(
        &self,
        style_id: &str,
        style_json: Arc<str>,
        z: u8,
        x: u32,
        y: u32,
        scale: u8,
        format: ImageFormat,
    ) -> Result<Vec<u8>> {
        let opts = self.pools.options();
        let tile_size = opts.tile_size;
        let margin = opts.internal_tile_margin();
        let quality = opts.format_quality.clone();

        let internal_zoom = z as f64 + (tile_size as f64 / INTERNAL_TILE_SIZE as f64).log2();
        let map_size = tile_size + 2 * margin;

        let n = 2_f64.powi(z as i32);
        let lon = (x as f64 + 0.5) / n * 360.0 - 180.0;
        let lat_rad = ((1.0 - 2.0 * (y as f64 + 0.5) / n) * std::f64::consts::PI)
            .sinh()
            .atan();
        let lat = lat_rad.to_degrees();

        let pool = self
            .pools
            .pool_for(style_id, scale, style_json, MapMode::Tile, map_size)
            .await?;
        let worker = pool.acquire().await?;

        let pixel_ratio = scale as f32;
        let image = worker
            .submit(move |map: &mut NativeMap| {
                map.set_size(Size::new(map_size, map_size));
                map.render(Some(native::RenderOptions {
                    size: Size::new(map_size, map_size),
                    pixel_ratio,
                    camera: CameraOptions::new(lat, lon, internal_zoom),
                    mode: MapMode::Tile,
                }))
            })
            .await?;

        let clipped = clip_tile_image(image, tile_size, margin, scale, internal_zoom)?;
        encode_image(&clipped, format, &quality)
    }

    /// Render a static map image, compositing path/marker overlays on the
    /// raw bitmap before encoding (spec.md §4.7).
    pub async fn render_static(
        &self,
        style_id: &str,
        style_json: Arc<str>,
        options: RenderOptions,
        overlay_defaults: OverlayDefaults,
        icons_dir: &std::path::Path,
        allow_remote_icons: bool,
    ) -> Result<Vec<u8>> {
        let opts = self.pools.options();
        let quality = opts.format_quality.clone();

        let pool = self
            .pools
            .pool_for(
                style_id,
                options.scale,
                style_json,
                MapMode::Static,
                options.width.max(options.height),
            )
            .await?;
        let worker = pool.acquire().await?;

        let (width, height, pixel_ratio) = (options.width, options.height, options.scale as f32);
        let camera = CameraOptions::new(options.lat, options.lon, options.zoom)
            .with_bearing(options.bearing)
            .with_pitch(options.pitch);

        let image = worker
            .submit(move |map: &mut NativeMap| {
                map.set_size(Size::new(width, height));
                map.render(Some(native::RenderOptions {
                    size: Size::new(width, height),
                    pixel_ratio,
                    camera,
                    mode: MapMode::Static,
                }))
            })
            .await?;

        let mut rgba = image::RgbaImage::from_raw(image.width(), image.height(), image.data().to_vec())
            .ok_or_else(|| TileServerError::RenderError("invalid static framebuffer".into()))?;

        if options.path.is_some() || options.marker.is_some() {
            overlay::composite(
                &mut rgba,
                options.path.as_deref(),
                options.marker.as_deref(),
                &overlay_defaults,
                options.lon,
                options.lat,
                options.zoom,
                pixel_ratio,
                icons_dir,
                allow_remote_icons,
            )
            .await?;
        }

        let composited = RenderedImage::from_rgba(rgba.width(), rgba.height(), rgba.into_raw());
        encode_image(&composited, options.format, &quality)
    }
}

/// Clip and resize a rendered tile framebuffer down to `tile_size` per
/// spec.md §4.6's margin-clip algorithm.
fn clip_tile_image(
    image: RenderedImage,
    tile_size: u32,
    margin: u32,
    scale: u8,
    internal_zoom: f64,
) -> Result<RenderedImage> {
    if margin == 0 {
        return Ok(image);
    }

    let scale = scale as u32;
    let target_side = tile_size * scale;
    let width = image.width();
    let height = image.height();

    let mut buf = image::RgbaImage::from_raw(width, height, image.data().to_vec())
        .ok_or_else(|| TileServerError::RenderError("invalid tile framebuffer".into()))?;

    let result = if internal_zoom >= 0.0 {
        let offset = margin * scale;
        image::imageops::crop(&mut buf, offset, offset, target_side, target_side).to_image()
    } else {
        let factor = (-internal_zoom).floor() as u32;
        let side = (target_side * 2u32.pow(factor)).min(width).min(height);
        let cx = width.saturating_sub(side) / 2;
        let cy = height.saturating_sub(side) / 2;
        let cropped = image::imageops::crop(&mut buf, cx, cy, side, side).to_image();
        image::imageops::resize(
            &cropped,
            target_side,
            target_side,
            image::imageops::FilterType::Lanczos3,
        )
    };

    Ok(RenderedImage::from_rgba(target_side, target_side, result.into_raw()))
}

fn encode_image(image: &RenderedImage, format: ImageFormat, quality: &FormatQualityConfig) -> Result<Vec<u8>> {
    match format {
        ImageFormat::Png => image.to_png(),
        ImageFormat::Jpeg => image.to_jpeg(quality.jpeg),
        ImageFormat::Webp => image.to_webp(quality.webp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_tile_image_noop_without_margin() {
        let image = RenderedImage::from_rgba(256, 256, vec![0u8; 256 * 256 * 4]);
        let clipped = clip_tile_image(image, 256, 0, 1, 0.0).unwrap();
        assert_eq!(clipped.width(), 256);
        assert_eq!(clipped.height(), 256);
    }

    #[test]
    fn clip_tile_image_extracts_center_when_zoom_nonnegative() {
        let image = RenderedImage::from_rgba(512, 512, vec![0u8; 512 * 512 * 4]);
        let clipped = clip_tile_image(image, 256, 128, 1, 1.0).unwrap();
        assert_eq!(clipped.width(), 256);
        assert_eq!(clipped.height(), 256);
    }

    #[test]
    fn clip_tile_image_downsamples_when_zoom_negative() {
        let image = RenderedImage::from_rgba(512, 512, vec![0u8; 512 * 512 * 4]);
        let clipped = clip_tile_image(image, 256, 128, 1, -1.0).unwrap();
        assert_eq!(clipped.width(), 256);
        assert_eq!(clipped.height(), 256);
    }
}
