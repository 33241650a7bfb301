mod common;

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use umps_devices::eth::{
    CMD_READ_NET, CMD_WRITE_NET, POLL_NET_US, READ_NET_US, READ_PENDING, WRITE_NET_US,
};
use umps_devices::{
    QueueInterface, SharedQueueInterface, CMD_ACK, COMMAND, DATA0, DATA1, IL_ETH, MODE_INTERRUPT,
    STATUS, STAT_READY,
};
use umps_machine::{MachineConfig, Ram, SystemBus, RAM_BASE};

fn eth_bus(mode: u32) -> (SystemBus, SharedQueueInterface) {
    let mut config = MachineConfig::default();
    config.set_device(IL_ETH, 0, "net0");

    let shared: SharedQueueInterface = Rc::new(RefCell::new(QueueInterface::new(
        mode,
        [2, 0, 0, 0, 0, 1],
    )));
    let handle = shared.clone();
    let bus = SystemBus::new_with_net(
        &config,
        Box::new(Ram::new(common::TEST_RAM_BYTES)),
        move |_, _| Box::new(handle.clone()),
    )
    .unwrap();
    (bus, shared)
}

#[test]
fn poll_latches_read_pending_and_interrupts_exactly_once() {
    let (mut bus, net) = eth_bus(MODE_INTERRUPT);

    // Polls with nothing waiting stay silent.
    bus.advance(3 * POLL_NET_US);
    assert!(!bus.int_line_asserted(IL_ETH));
    assert_eq!(bus.read_device_register(IL_ETH, 0, STATUS), STAT_READY);

    net.borrow_mut().push_rx(&[0xAA; 60]);
    bus.advance(POLL_NET_US);
    assert_eq!(
        bus.read_device_register(IL_ETH, 0, STATUS),
        READ_PENDING | STAT_READY
    );
    assert!(bus.int_line_asserted(IL_ETH));
    assert!(!bus.device_is_busy(IL_ETH, 0));

    // The latch parks the poll loop: time passing raises nothing further.
    bus.write_device_register(IL_ETH, 0, COMMAND, CMD_ACK);
    assert!(!bus.int_line_asserted(IL_ETH));
    bus.advance(4 * POLL_NET_US);
    assert!(!bus.int_line_asserted(IL_ETH));
    assert_eq!(
        bus.read_device_register(IL_ETH, 0, STATUS) & READ_PENDING,
        READ_PENDING
    );
}

#[test]
fn readnet_consumes_the_frame_and_restarts_the_poll_loop() {
    let (mut bus, net) = eth_bus(MODE_INTERRUPT);

    net.borrow_mut().push_rx(&[1, 2, 3, 4]);
    bus.advance(POLL_NET_US);
    assert!(bus.int_line_asserted(IL_ETH));
    bus.write_device_register(IL_ETH, 0, COMMAND, CMD_ACK);

    bus.write_device_register(IL_ETH, 0, DATA0, RAM_BASE);
    bus.write_device_register(IL_ETH, 0, COMMAND, CMD_READ_NET);
    bus.advance(READ_NET_US);

    assert_eq!(bus.read_device_register(IL_ETH, 0, DATA1), 4);
    // Latch cleared: nothing else is queued behind the frame.
    assert_eq!(bus.read_device_register(IL_ETH, 0, STATUS), STAT_READY);

    let mut back = [0u8; 4];
    assert!(!bus.memory_mut().read(RAM_BASE, &mut back));
    assert_eq!(back, [1, 2, 3, 4]);

    // The poll loop is running again: a late frame is still noticed.
    bus.write_device_register(IL_ETH, 0, COMMAND, CMD_ACK);
    net.borrow_mut().push_rx(&[9]);
    bus.advance(2 * POLL_NET_US);
    assert!(bus.int_line_asserted(IL_ETH));
}

#[test]
fn writenet_sends_the_frame_from_guest_memory() {
    let (mut bus, net) = eth_bus(0);

    let frame = [0x52u8, 0x54, 0, 0, 0, 1, 0xDE, 0xAD];
    assert!(!bus.memory_mut().write(RAM_BASE, &frame));

    bus.write_device_register(IL_ETH, 0, DATA0, RAM_BASE);
    bus.write_device_register(IL_ETH, 0, DATA1, frame.len() as u32);
    bus.write_device_register(IL_ETH, 0, COMMAND, CMD_WRITE_NET);
    assert!(bus.device_is_busy(IL_ETH, 0));

    bus.advance(WRITE_NET_US);
    assert_eq!(bus.read_device_register(IL_ETH, 0, STATUS), STAT_READY);
    assert!(bus.int_line_asserted(IL_ETH));
    assert_eq!(net.borrow_mut().take_tx(), vec![frame.to_vec()]);
}

#[test]
fn polled_mode_schedules_nothing_until_commanded() {
    let (mut bus, net) = eth_bus(0);

    net.borrow_mut().push_rx(&[5, 5]);
    // No interrupt-driven polling: the frame sits there silently.
    assert!(!bus.idle_until_next_event());
    assert!(!bus.int_line_asserted(IL_ETH));

    bus.write_device_register(IL_ETH, 0, DATA0, RAM_BASE);
    bus.write_device_register(IL_ETH, 0, COMMAND, CMD_READ_NET);
    bus.advance(READ_NET_US);
    assert_eq!(bus.read_device_register(IL_ETH, 0, DATA1), 2);
}
