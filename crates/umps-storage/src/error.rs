use thiserror::Error;

pub type Result<T> = std::result::Result<T, ImageError>;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("bad image magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic { expected: u32, found: u32 },

    #[error("truncated image header")]
    TruncatedHeader,

    #[error("invalid geometry: {0}")]
    InvalidGeometry(&'static str),

    #[error("payload does not fit the device ({blocks} blocks)")]
    PayloadTooLarge { blocks: u32 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
