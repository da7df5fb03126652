//! Log drain tests
//!
//! Kept in their own binary: the log rings are process-wide.

use rust_serial_hub::host::{HostPlatform, LoopbackBus};
use rust_serial_hub::{log_drain, ChannelConfig, Driver, DriverHub, HubConfig, ProcessorFn};

fn idle() -> Option<ProcessorFn<HostPlatform, LoopbackBus>> {
    Some(Box::new(|_: &Driver<'_, HostPlatform, LoopbackBus>| {}))
}

#[test]
fn test_lifecycle_logged() {
    let bus = LoopbackBus::new(1);
    let hub = DriverHub::new(HostPlatform::new(), bus, HubConfig::fast()).unwrap();

    let handle = hub
        .register("logged-drv", ChannelConfig::new(0, 1, 2, 0x42), idle())
        .unwrap();
    hub.deactivate(handle).unwrap();
    hub.unregister(handle).unwrap();

    let mut out = String::new();
    log_drain::drain_to(&mut out);
    assert!(out.contains("logged-drv registered"));
    assert!(out.contains("logged-drv deactivated"));
    assert!(out.contains("logged-drv unregistered"));
}
