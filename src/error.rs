use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TileServerError {
    #[error("Style not found: {0}")]
    StyleNotFound(String),

    #[error("Data source not found: {0}")]
    SourceNotFound(String),

    /// MBTiles reports the tile as simply absent — a 204, not a 404: the id
    /// is valid, the tile at that index just has no content.
    #[error("Tile not present: z={z}, x={x}, y={y}")]
    TileNotPresent { z: u8, x: u32, y: u32 },

    #[error("Out of bounds: z={z}, x={x}, y={y}")]
    OutOfBounds { z: u8, x: u32, y: u32 },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid overlay grammar: {0}")]
    InvalidOverlay(String),

    #[error("Invalid image size: {0}")]
    InvalidSize(String),

    #[error("Invalid tile request format")]
    InvalidTileRequest,

    #[error("Sprite not found: {0}")]
    SpriteNotFound(String),

    #[error("Font not found: {0}")]
    FontNotFound(String),

    #[error("Failed to read file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse metadata: {0}")]
    MetadataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The native file-source or renderer reported an error object.
    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Render error: {0}")]
    RenderError(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for TileServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            TileServerError::StyleNotFound(_) => StatusCode::NOT_FOUND,
            TileServerError::SourceNotFound(_) => StatusCode::NOT_FOUND,
            TileServerError::SpriteNotFound(_) => StatusCode::NOT_FOUND,
            TileServerError::FontNotFound(_) => StatusCode::NOT_FOUND,
            TileServerError::TileNotPresent { .. } => StatusCode::NO_CONTENT,
            TileServerError::OutOfBounds { .. } => StatusCode::BAD_REQUEST,
            TileServerError::InvalidFormat(_) => StatusCode::BAD_REQUEST,
            TileServerError::InvalidOverlay(_) => StatusCode::BAD_REQUEST,
            TileServerError::InvalidSize(_) => StatusCode::BAD_REQUEST,
            TileServerError::InvalidTileRequest => StatusCode::BAD_REQUEST,
            TileServerError::FileError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TileServerError::MetadataError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TileServerError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TileServerError::UpstreamError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TileServerError::RenderError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TileServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::NO_CONTENT {
            return status.into_response();
        }

        (status, self.to_string()).into_response()
    }
}

pub type Result<T> = std::result::Result<T, TileServerError>;
