#![allow(dead_code)]

use std::path::PathBuf;

use tempfile::TempDir;
use umps_machine::{MachineConfig, Ram, SystemBus};
use umps_storage::{create_disk_image, create_flash_image, DiskGeometry, FlashGeometry};

pub const TEST_RAM_BYTES: usize = 16 * 4096;

pub fn make_disk_image(dir: &TempDir, name: &str, geometry: &DiskGeometry) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    create_disk_image(&mut file, geometry).unwrap();
    path
}

pub fn make_flash_image(dir: &TempDir, name: &str, geometry: &FlashGeometry) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    create_flash_image(&mut file, geometry, std::io::empty()).unwrap();
    path
}

pub fn bus_with(config: &MachineConfig) -> SystemBus {
    SystemBus::new(config, Box::new(Ram::new(TEST_RAM_BYTES))).unwrap()
}
