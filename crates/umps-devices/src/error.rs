use thiserror::Error;

/// Failure to bring a device up (bad backing file, unusable image).
///
/// Mid-simulation backing-file failures are not represented here: once the
/// machine is running they are impossible states and the device panics with a
/// diagnostic instead.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("cannot access backing file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid device image: {0}")]
    Image(#[from] umps_storage::ImageError),
}
