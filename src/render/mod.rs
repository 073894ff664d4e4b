mod native;
pub mod overlay;
mod pool;
mod renderer;
mod types;

pub use pool::RendererPoolManager;
pub use renderer::Renderer;
pub use types::{ImageFormat, RenderOptions, StaticQueryParams, StaticType};
