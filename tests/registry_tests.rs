//! Registry and lifecycle tests: register, unregister, deactivate

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rust_serial_hub::config::DEFAULT_REQUEST_MARKER;
use rust_serial_hub::host::{HostPlatform, LoopbackBus, RecordingSink};
use rust_serial_hub::platform::TaskRole;
use rust_serial_hub::{
    ChannelConfig, Core, Driver, DriverHub, DriverStatus, HubConfig, HubError, ProcessorFn,
    StatusCode, MAX_DRIVERS,
};

type Hub = DriverHub<HostPlatform, LoopbackBus>;

fn idle() -> Option<ProcessorFn<HostPlatform, LoopbackBus>> {
    Some(Box::new(|_: &Driver<'_, HostPlatform, LoopbackBus>| {}))
}

fn hub(ports: u8) -> (Arc<Hub>, HostPlatform, LoopbackBus) {
    let platform = HostPlatform::new();
    let bus = LoopbackBus::new(ports);
    let hub = DriverHub::new(platform.clone(), bus.clone(), HubConfig::fast()).unwrap();
    (hub, platform, bus)
}

fn channel(port: u8) -> ChannelConfig {
    ChannelConfig::new(port, 10 + port, 20 + port, 0xA5A5_0000 + u32::from(port) + 1)
}

fn wait_until(timeout_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn test_register_assigns_distinct_slots() {
    let (hub, _platform, _bus) = hub(4);

    let handles: Vec<_> = (0..4)
        .map(|port| hub.register("drv", channel(port), idle()).unwrap())
        .collect();

    let mut slots: Vec<u8> = handles.iter().map(|h| h.slot()).collect();
    slots.sort_unstable();
    assert_eq!(slots, [0, 1, 2, 3]);
    assert_eq!(hub.len(), 4);
    assert_eq!(hub.slot_mask(), 0b1111);
    assert_eq!(hub.pool_usage(), (4, MAX_DRIVERS));

    hub.shutdown().unwrap();
}

#[test]
fn test_workers_pinned_with_distinct_priorities() {
    let (hub, platform, _bus) = hub(3);
    for port in 0..3 {
        hub.register("drv", channel(port), idle()).unwrap();
    }

    let spawned = platform.spawned();
    assert_eq!(spawned.len(), 6);

    let readers: Vec<_> = spawned.iter().filter(|s| s.role == TaskRole::Reader).collect();
    let processors: Vec<_> = spawned.iter().filter(|s| s.role == TaskRole::Processor).collect();
    assert!(readers.iter().all(|s| s.core == Core::Core0));
    assert!(processors.iter().all(|s| s.core == Core::Core1));

    let mut reader_prios: Vec<u8> = readers.iter().map(|s| s.priority).collect();
    reader_prios.sort_unstable();
    reader_prios.dedup();
    assert_eq!(reader_prios.len(), 3);

    let mut processor_prios: Vec<u8> = processors.iter().map(|s| s.priority).collect();
    processor_prios.sort_unstable();
    processor_prios.dedup();
    assert_eq!(processor_prios.len(), 3);

    hub.shutdown().unwrap();
}

#[test]
fn test_capacity_exceeded() {
    let (hub, _platform, bus) = hub(MAX_DRIVERS as u8 + 1);

    for port in 0..MAX_DRIVERS as u8 {
        hub.register("drv", channel(port), idle()).unwrap();
    }
    let last = MAX_DRIVERS as u8;
    assert_eq!(
        hub.register("extra", channel(last), idle()),
        Err(HubError::CapacityExceeded)
    );
    // claim on the channel was released again
    assert_eq!(
        hub.register("extra", channel(last), idle()),
        Err(HubError::CapacityExceeded)
    );
    assert!(!bus.is_open(last));
    assert_eq!(hub.len(), MAX_DRIVERS);

    hub.shutdown().unwrap();
}

#[test]
fn test_slot_reused_after_unregister() {
    let (hub, _platform, _bus) = hub(3);
    let a = hub.register("a", channel(0), idle()).unwrap();
    let b = hub.register("b", channel(1), idle()).unwrap();
    assert_eq!(a.slot(), 0);
    assert_eq!(b.slot(), 1);

    hub.deactivate(a).unwrap();
    hub.unregister(a).unwrap();
    assert_eq!(hub.len(), 1);

    let c = hub.register("c", channel(2), idle()).unwrap();
    assert_eq!(c.slot(), 0);
    assert_ne!(c, a);

    hub.shutdown().unwrap();
}

#[test]
fn test_rejected_inputs_leave_no_trace() {
    let (hub, _platform, bus) = hub(2);

    assert_eq!(hub.register("x", channel(0), None), Err(HubError::InvalidCallback));
    assert_eq!(hub.register("x", channel(2), idle()), Err(HubError::InvalidChannel));
    assert_eq!(
        hub.register("x", ChannelConfig::new(0, 1, 2, 0), idle()),
        Err(HubError::InvalidSecret)
    );
    assert_eq!(
        hub.register("x", ChannelConfig::new(0, 1, 2, DEFAULT_REQUEST_MARKER), idle()),
        Err(HubError::InvalidSecret)
    );

    assert_eq!(hub.len(), 0);
    assert_eq!(hub.slot_mask(), 0);
    assert_eq!(hub.pool_usage().0, 0);
    assert!(!bus.is_open(0));
}

#[test]
fn test_channel_in_use() {
    let (hub, _platform, _bus) = hub(2);
    let first = hub.register("a", channel(0), idle()).unwrap();
    assert_eq!(hub.register("b", channel(0), idle()), Err(HubError::ChannelInUse));
    assert_eq!(hub.len(), 1);

    hub.deactivate(first).unwrap();
    hub.unregister(first).unwrap();
    assert!(hub.register("b", channel(0), idle()).is_ok());

    hub.shutdown().unwrap();
}

#[test]
fn test_open_failure_unwinds() {
    let (hub, _platform, bus) = hub(2);
    bus.fail_open(0, true);

    assert_eq!(hub.register("a", channel(0), idle()), Err(HubError::ChannelOpenFailed));
    assert_eq!(hub.slot_mask(), 0);
    assert_eq!(hub.pool_usage().0, 0);

    bus.fail_open(0, false);
    let handle = hub.register("a", channel(0), idle()).unwrap();
    assert_eq!(handle.slot(), 0);

    hub.shutdown().unwrap();
}

#[test]
fn test_spawn_failure_unwinds() {
    let (hub, platform, bus) = hub(2);

    // reader starts, processor fails
    platform.limit_spawns(Some(1));
    assert_eq!(hub.register("a", channel(0), idle()), Err(HubError::SpawnFailed));
    assert_eq!(hub.len(), 0);
    assert_eq!(hub.slot_mask(), 0);
    assert_eq!(hub.pool_usage().0, 0);
    assert!(!bus.is_open(0));

    // reader fails outright
    platform.limit_spawns(Some(0));
    assert_eq!(hub.register("a", channel(0), idle()), Err(HubError::SpawnFailed));
    assert_eq!(hub.pool_usage().0, 0);

    platform.limit_spawns(None);
    assert!(hub.register("a", channel(0), idle()).is_ok());

    hub.shutdown().unwrap();
}

#[test]
fn test_stuck_reader_stays_reachable() {
    let platform = HostPlatform::new();
    let bus = LoopbackBus::new(1);
    let config = HubConfig {
        stop_timeout_ms: 10,
        ..HubConfig::fast()
    };
    let hub = DriverHub::new(platform.clone(), bus.clone(), config).unwrap();

    // reader is slow to start, processor spawn fails, stop times out
    platform.delay_starts(200);
    platform.limit_spawns(Some(1));
    assert_eq!(hub.register("a", channel(0), idle()), Err(HubError::WorkerStuck));
    platform.limit_spawns(None);
    platform.delay_starts(0);

    let handles = hub.handles();
    assert_eq!(handles.len(), 1);
    let handle = handles[0];
    assert!(!hub.is_active(handle));
    assert_eq!(hub.register("b", channel(0), idle()), Err(HubError::ChannelInUse));

    assert!(wait_until(2_000, || hub.deactivate(handle).is_ok()));
    hub.unregister(handle).unwrap();
    assert_eq!(hub.len(), 0);
    assert_eq!(hub.slot_mask(), 0);
    assert_eq!(hub.pool_usage().0, 0);
    assert!(!bus.is_open(0));

    let again = hub.register("b", channel(0), idle()).unwrap();
    assert!(hub.is_active(again));
    hub.shutdown().unwrap();
}

#[test]
fn test_unregister_requires_deactivation() {
    let (hub, _platform, bus) = hub(1);
    let handle = hub.register("a", channel(0), idle()).unwrap();

    assert_eq!(hub.unregister(handle), Err(HubError::StillActive));
    assert!(hub.is_active(handle));

    hub.deactivate(handle).unwrap();
    assert!(!hub.is_active(handle));
    hub.unregister(handle).unwrap();
    assert!(!bus.is_open(0));

    assert_eq!(hub.unregister(handle), Err(HubError::StaleHandle));
    assert_eq!(hub.deactivate(handle), Err(HubError::StaleHandle));
}

#[test]
fn test_stale_handle_accessors() {
    let (hub, _platform, _bus) = hub(1);
    let handle = hub.register("a", channel(0), idle()).unwrap();
    hub.deactivate(handle).unwrap();
    hub.unregister(handle).unwrap();

    assert_eq!(hub.get_data(handle), 0);
    assert_eq!(hub.send_data(handle, 5), Err(HubError::StaleHandle));
    assert_eq!(hub.status(handle), None);
    assert!(hub.snapshot(handle).is_none());
    assert!(!hub.is_access_granted(handle));
}

#[test]
fn test_deactivate_is_quiescent_and_idempotent() {
    let (hub, _platform, bus) = hub(1);
    bus.emulate_peer(0, DEFAULT_REQUEST_MARKER, channel(0).secret);
    let handle = hub.register("a", channel(0), idle()).unwrap();
    assert!(wait_until(1_000, || hub.is_access_granted(handle)));

    hub.deactivate(handle).unwrap();
    assert_eq!(hub.status(handle), Some(DriverStatus::NotConnected));
    assert!(!hub.is_access_granted(handle));

    // workers are gone: nothing new is written on the line
    let written = bus.outbound(0).len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(bus.outbound(0).len(), written);

    hub.deactivate(handle).unwrap();
    hub.unregister(handle).unwrap();
}

#[test]
fn test_for_each_in_registration_order() {
    let (hub, _platform, _bus) = hub(3);
    for (port, name) in ["first", "second", "third"].iter().enumerate() {
        hub.register(name, channel(port as u8), idle()).unwrap();
    }

    let mut names = Vec::new();
    let stats = hub.for_each(|snapshot| names.push(snapshot.name.as_str().to_string()));
    assert_eq!(names, ["first", "second", "third"]);
    assert_eq!(stats.visited, 3);
    assert_eq!(stats.skipped, 0);

    hub.shutdown().unwrap();
    assert_eq!(hub.for_each(|_| {}).visited, 0);
}

#[test]
fn test_long_name_truncated() {
    let (hub, _platform, _bus) = hub(1);
    let handle = hub
        .register("a-very-long-driver-name", channel(0), idle())
        .unwrap();
    let snapshot = hub.snapshot(handle).unwrap();
    assert_eq!(snapshot.name.as_str(), "a-very-long-driv");
    hub.shutdown().unwrap();
}

#[test]
fn test_lifecycle_events() {
    let platform = HostPlatform::new();
    let bus = LoopbackBus::new(1);
    let sink = RecordingSink::new(64);
    let hub = DriverHub::with_sink(platform, bus, HubConfig::fast(), Box::new(sink.clone())).unwrap();

    let handle = hub.register("a", channel(0), idle()).unwrap();
    hub.deactivate(handle).unwrap();
    hub.unregister(handle).unwrap();

    assert_eq!(sink.count(StatusCode::Registered), 1);
    assert_eq!(sink.count(StatusCode::Deactivated), 1);
    assert_eq!(sink.count(StatusCode::Unregistered), 1);
    assert!(sink.events().iter().all(|e| e.slot == handle.slot()));
}

#[test]
fn test_shutdown_releases_everything() {
    let (hub, _platform, bus) = hub(4);
    for port in 0..4 {
        hub.register("drv", channel(port), idle()).unwrap();
    }
    hub.shutdown().unwrap();

    assert!(hub.is_empty());
    assert_eq!(hub.slot_mask(), 0);
    assert_eq!(hub.pool_usage().0, 0);
    assert!((0..4).all(|port| !bus.is_open(port)));
}
