use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use umps_devices::{DeviceKind, N_DEV_LINES, N_DEV_PER_LINE};

use crate::FIRST_DEV_LINE;

pub const MIN_RAM_FRAMES: u32 = 8;
pub const MAX_RAM_FRAMES: u32 = 512;
pub const DEFAULT_RAM_FRAMES: u32 = 64;

pub const MIN_CLOCK_RATE: u32 = 1;
pub const MAX_CLOCK_RATE: u32 = 99;
pub const DEFAULT_CLOCK_RATE: u32 = 1;

pub const MIN_CPUS: u32 = 1;
pub const MAX_CPUS: u32 = 8;

pub const MIN_TLB_SIZE: u32 = 4;
pub const MAX_TLB_SIZE: u32 = 64;
pub const DEFAULT_TLB_SIZE: u32 = 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One of the 40 device slots: whether it is populated, the backing file
/// (image or log), and an optional MAC override for ethernet slots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSlot {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<[u8; 6]>,
}

fn default_ram_frames() -> u32 {
    DEFAULT_RAM_FRAMES
}

fn default_clock_rate() -> u32 {
    DEFAULT_CLOCK_RATE
}

fn default_cpus() -> u32 {
    MIN_CPUS
}

fn default_tlb_size() -> u32 {
    DEFAULT_TLB_SIZE
}

fn default_slots() -> Vec<DeviceSlot> {
    vec![DeviceSlot::default(); N_DEV_LINES * N_DEV_PER_LINE]
}

/// Machine-wide settings, persisted as JSON. Devices see this read-only for
/// the lifetime of the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Guest RAM size in 4 KiB frames.
    #[serde(default = "default_ram_frames")]
    pub ram_frames: u32,
    /// Processor clock rate in MHz; scales every device latency.
    #[serde(default = "default_clock_rate")]
    pub clock_rate: u32,
    #[serde(default = "default_cpus")]
    pub num_cpus: u32,
    #[serde(default = "default_tlb_size")]
    pub tlb_size: u32,
    /// The 40 device slots, row-major by interrupt line.
    #[serde(default = "default_slots")]
    pub devices: Vec<DeviceSlot>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            ram_frames: DEFAULT_RAM_FRAMES,
            clock_rate: DEFAULT_CLOCK_RATE,
            num_cpus: MIN_CPUS,
            tlb_size: DEFAULT_TLB_SIZE,
            devices: default_slots(),
        }
    }
}

impl MachineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_RAM_FRAMES..=MAX_RAM_FRAMES).contains(&self.ram_frames) {
            return Err(ConfigError::Invalid(format!(
                "ram size {} frames out of range [{MIN_RAM_FRAMES}, {MAX_RAM_FRAMES}]",
                self.ram_frames
            )));
        }
        if !(MIN_CLOCK_RATE..=MAX_CLOCK_RATE).contains(&self.clock_rate) {
            return Err(ConfigError::Invalid(format!(
                "clock rate {} MHz out of range [{MIN_CLOCK_RATE}, {MAX_CLOCK_RATE}]",
                self.clock_rate
            )));
        }
        if !(MIN_CPUS..=MAX_CPUS).contains(&self.num_cpus) {
            return Err(ConfigError::Invalid(format!(
                "cpu count {} out of range [{MIN_CPUS}, {MAX_CPUS}]",
                self.num_cpus
            )));
        }
        if !(MIN_TLB_SIZE..=MAX_TLB_SIZE).contains(&self.tlb_size) {
            return Err(ConfigError::Invalid(format!(
                "tlb size {} out of range [{MIN_TLB_SIZE}, {MAX_TLB_SIZE}]",
                self.tlb_size
            )));
        }
        if self.devices.len() != N_DEV_LINES * N_DEV_PER_LINE {
            return Err(ConfigError::Invalid(format!(
                "expected {} device slots, found {}",
                N_DEV_LINES * N_DEV_PER_LINE,
                self.devices.len()
            )));
        }
        for (idx, slot) in self.devices.iter().enumerate() {
            if slot.enabled && slot.file.is_empty() {
                let line = FIRST_DEV_LINE + (idx / N_DEV_PER_LINE) as u32;
                let dev = idx % N_DEV_PER_LINE;
                let kind = DeviceKind::for_line(line).expect("device line");
                return Err(ConfigError::Invalid(format!(
                    "{} device {line}.{dev} is enabled but names no backing file",
                    kind.name()
                )));
            }
        }
        Ok(())
    }

    /// Guest RAM size in bytes.
    pub fn ram_bytes(&self) -> usize {
        self.ram_frames as usize * 4096
    }

    pub fn slot(&self, line: u32, dev: u32) -> &DeviceSlot {
        &self.devices[Self::slot_index(line, dev)]
    }

    /// Enable slot `(line, dev)` with the given backing file.
    pub fn set_device(&mut self, line: u32, dev: u32, file: impl Into<String>) {
        let slot = &mut self.devices[Self::slot_index(line, dev)];
        slot.enabled = true;
        slot.file = file.into();
    }

    fn slot_index(line: u32, dev: u32) -> usize {
        assert!(
            (FIRST_DEV_LINE..FIRST_DEV_LINE + N_DEV_LINES as u32).contains(&line),
            "interrupt line {line} carries no devices"
        );
        assert!((dev as usize) < N_DEV_PER_LINE, "device number {dev} out of range");
        (line - FIRST_DEV_LINE) as usize * N_DEV_PER_LINE + dev as usize
    }
}
