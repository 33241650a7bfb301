use thiserror::Error;

use crate::ConfigError;
use umps_devices::DeviceError;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot set up {kind} device {line}.{dev}: {source}")]
    DeviceSetup {
        kind: &'static str,
        line: u32,
        dev: u32,
        #[source]
        source: DeviceError,
    },
}
