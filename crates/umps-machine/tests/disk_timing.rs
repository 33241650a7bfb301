mod common;

use common::{bus_with, make_disk_image};
use pretty_assertions::assert_eq;
use umps_devices::disk::{CMD_READ_BLK, CMD_SEEK_CYL, CMD_WRITE_BLK, STAT_DMA_ERR, STAT_SEEK_ERR};
use umps_devices::{
    BYTE_BITS, CMD_ACK, CMD_RESET, COMMAND, DATA0, DATA1, DMA_TICKS, HWORD_BITS, IL_DISK, STATUS,
    STAT_READY,
};
use umps_machine::{MachineConfig, RAM_BASE};
use umps_storage::{DiskGeometry, BLOCK_SIZE_BYTES};

fn disk_config(dir: &tempfile::TempDir, geometry: &DiskGeometry) -> MachineConfig {
    let image = make_disk_image(dir, "disk0.umps", geometry);
    let mut config = MachineConfig::default();
    config.set_device(IL_DISK, 0, image.to_str().unwrap());
    config
}

fn read_cmd(head: u32, sect: u32) -> u32 {
    (head << HWORD_BITS) | (sect << BYTE_BITS) | CMD_READ_BLK
}

#[test]
fn data1_encodes_the_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let geometry = DiskGeometry::default();
    let bus = bus_with(&disk_config(&dir, &geometry));

    assert_eq!(
        bus.read_device_register(IL_DISK, 0, DATA1),
        (geometry.cylinders << HWORD_BITS) | (geometry.heads << BYTE_BITS) | geometry.sectors
    );
}

#[test]
fn seeking_past_the_last_cylinder_errors_without_an_event() {
    let dir = tempfile::tempdir().unwrap();
    let geometry = DiskGeometry {
        cylinders: 100,
        ..DiskGeometry::default()
    };
    let mut bus = bus_with(&disk_config(&dir, &geometry));

    bus.write_device_register(IL_DISK, 0, COMMAND, (200 << BYTE_BITS) | CMD_SEEK_CYL);
    assert_eq!(bus.read_device_register(IL_DISK, 0, STATUS), STAT_SEEK_ERR);
    assert!(bus.int_line_asserted(IL_DISK));
    assert!(!bus.idle_until_next_event());
}

#[test]
fn rereading_a_cached_sector_costs_exactly_the_dma_time() {
    let dir = tempfile::tempdir().unwrap();
    let mut bus = bus_with(&disk_config(&dir, &DiskGeometry::default()));

    // Position the head on cylinder 10 first.
    bus.write_device_register(IL_DISK, 0, COMMAND, (10 << BYTE_BITS) | CMD_SEEK_CYL);
    bus.idle_until_next_event();
    bus.write_device_register(IL_DISK, 0, COMMAND, CMD_ACK);

    // Cold read of (10, 0, 5).
    bus.write_device_register(IL_DISK, 0, DATA0, RAM_BASE);
    bus.write_device_register(IL_DISK, 0, COMMAND, read_cmd(0, 5));
    bus.idle_until_next_event();
    assert_eq!(bus.read_device_register(IL_DISK, 0, STATUS), STAT_READY);
    bus.write_device_register(IL_DISK, 0, COMMAND, CMD_ACK);

    // Cache hit: the completion lands one DMA transfer later.
    let issued_at = bus.tod();
    bus.write_device_register(IL_DISK, 0, COMMAND, read_cmd(0, 5));
    bus.idle_until_next_event();
    assert_eq!(bus.tod() - issued_at, DMA_TICKS);
    assert_eq!(bus.read_device_register(IL_DISK, 0, STATUS), STAT_READY);
}

#[test]
fn sectors_round_trip_through_guest_memory() {
    let dir = tempfile::tempdir().unwrap();
    let mut bus = bus_with(&disk_config(&dir, &DiskGeometry::default()));

    let mut pattern = vec![0u8; BLOCK_SIZE_BYTES];
    for (i, byte) in pattern.iter_mut().enumerate() {
        *byte = (i % 241) as u8;
    }
    assert!(!bus.memory_mut().write(RAM_BASE, &pattern));

    bus.write_device_register(IL_DISK, 0, DATA0, RAM_BASE);
    bus.write_device_register(IL_DISK, 0, COMMAND, (3 << BYTE_BITS) | CMD_WRITE_BLK);
    bus.idle_until_next_event();
    assert_eq!(bus.read_device_register(IL_DISK, 0, STATUS), STAT_READY);
    bus.write_device_register(IL_DISK, 0, COMMAND, CMD_ACK);

    // Reset invalidates the sector cache, so the read below must come back
    // from the image file.
    bus.write_device_register(IL_DISK, 0, COMMAND, CMD_RESET);
    bus.idle_until_next_event();
    bus.write_device_register(IL_DISK, 0, COMMAND, CMD_ACK);

    let dst = RAM_BASE + BLOCK_SIZE_BYTES as u32;
    bus.write_device_register(IL_DISK, 0, DATA0, dst);
    bus.write_device_register(IL_DISK, 0, COMMAND, read_cmd(0, 3));
    bus.idle_until_next_event();
    assert_eq!(bus.read_device_register(IL_DISK, 0, STATUS), STAT_READY);

    let mut back = vec![0u8; BLOCK_SIZE_BYTES];
    assert!(!bus.memory_mut().read(dst, &mut back));
    assert_eq!(back, pattern);
}

#[test]
fn write_with_a_bad_buffer_address_reports_dma_error_and_drops_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut bus = bus_with(&disk_config(&dir, &DiskGeometry::default()));

    // Warm the cache.
    bus.write_device_register(IL_DISK, 0, DATA0, RAM_BASE);
    bus.write_device_register(IL_DISK, 0, COMMAND, read_cmd(0, 1));
    bus.idle_until_next_event();
    bus.write_device_register(IL_DISK, 0, COMMAND, CMD_ACK);

    // Physical address 0 is outside the RAM window.
    bus.write_device_register(IL_DISK, 0, DATA0, 0);
    bus.write_device_register(IL_DISK, 0, COMMAND, (1 << BYTE_BITS) | CMD_WRITE_BLK);
    bus.idle_until_next_event();
    assert_eq!(bus.read_device_register(IL_DISK, 0, STATUS), STAT_DMA_ERR);
    assert!(bus.int_line_asserted(IL_DISK));
    bus.write_device_register(IL_DISK, 0, COMMAND, CMD_ACK);

    // The failed write invalidated the cache: rereading takes the slow path.
    let issued_at = bus.tod();
    bus.write_device_register(IL_DISK, 0, DATA0, RAM_BASE);
    bus.write_device_register(IL_DISK, 0, COMMAND, read_cmd(0, 1));
    bus.idle_until_next_event();
    assert!(bus.tod() - issued_at > DMA_TICKS);
}

#[test]
fn reset_reaches_ready_even_while_not_working() {
    let dir = tempfile::tempdir().unwrap();
    let mut bus = bus_with(&disk_config(&dir, &DiskGeometry::default()));

    bus.set_device_condition(IL_DISK, 0, false);
    bus.write_device_register(IL_DISK, 0, COMMAND, CMD_RESET);
    bus.idle_until_next_event();
    assert_eq!(bus.read_device_register(IL_DISK, 0, STATUS), STAT_READY);
}
