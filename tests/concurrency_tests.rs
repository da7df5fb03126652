//! Concurrency tests: accessors interleaved with a running Reader

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rust_serial_hub::config::DEFAULT_REQUEST_MARKER;
use rust_serial_hub::frame::FRAME_LEN;
use rust_serial_hub::host::{HostPlatform, LoopbackBus};
use rust_serial_hub::{
    ChannelConfig, Driver, DriverHandle, DriverHub, Frame, HubConfig, ProcessorFn, SlotBitmap,
    MAX_DRIVERS,
};

type Hub = DriverHub<HostPlatform, LoopbackBus>;

const SECRET: u32 = 0x0C0C_0001;

fn idle() -> Option<ProcessorFn<HostPlatform, LoopbackBus>> {
    Some(Box::new(|_: &Driver<'_, HostPlatform, LoopbackBus>| {}))
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

fn connected_hub() -> (Arc<Hub>, LoopbackBus, DriverHandle) {
    let bus = LoopbackBus::new(1);
    bus.emulate_peer(0, DEFAULT_REQUEST_MARKER, SECRET);
    let hub = DriverHub::new(HostPlatform::new(), bus.clone(), HubConfig::fast()).unwrap();
    let handle = hub
        .register("drv", ChannelConfig::new(0, 1, 2, SECRET), idle())
        .unwrap();
    assert!(wait_until(1_000, || hub.is_access_granted(handle)));
    (hub, bus, handle)
}

#[test]
fn test_interleaved_accessors_never_tear() {
    let (hub, bus, handle) = connected_hub();

    let feeding = Arc::new(AtomicBool::new(true));
    let feeder = {
        let bus = bus.clone();
        let feeding = Arc::clone(&feeding);
        thread::spawn(move || {
            let mut value = 1u32;
            while feeding.load(Ordering::Relaxed) && value <= 5_000 {
                bus.inject_value(0, value);
                value += 1;
                if value % 16 == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
            }
        })
    };

    let mut last = 0u32;
    for i in 1..=1_000u32 {
        let value = hub.get_data(handle);
        if value != 0 {
            assert!(value > last, "queue out of order: {} after {}", value, last);
            last = value;
        }

        hub.send_data(handle, i).unwrap();

        let snapshot = hub.snapshot(handle).unwrap();
        assert_eq!(snapshot.access_granted, snapshot.status.is_granted());
    }

    feeding.store(false, Ordering::Relaxed);
    feeder.join().unwrap();

    // every write landed as a whole frame, in call order
    let outbound = bus.outbound(0);
    assert_eq!(outbound.len() % FRAME_LEN, 0);
    let sent: Vec<u32> = outbound
        .chunks_exact(FRAME_LEN)
        .map(|chunk| Frame::decode(chunk).unwrap().value)
        .filter(|&v| v != DEFAULT_REQUEST_MARKER && v != SECRET)
        .collect();
    assert_eq!(sent, (1..=1_000).collect::<Vec<_>>());

    hub.shutdown().unwrap();
}

#[test]
fn test_concurrent_consumers_never_duplicate() {
    let (hub, bus, handle) = connected_hub();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let hub = Arc::clone(&hub);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_millis(500);
                while Instant::now() < deadline {
                    match hub.get_data(handle) {
                        0 => thread::yield_now(),
                        value => seen.lock().unwrap().push(value),
                    }
                }
            })
        })
        .collect();

    for value in 1..=200u32 {
        bus.inject_value(0, value);
        if value % 8 == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
    for w in workers {
        w.join().unwrap();
    }

    let seen = seen.lock().unwrap();
    let unique: HashSet<u32> = seen.iter().copied().collect();
    assert_eq!(unique.len(), seen.len());
    assert!(!seen.is_empty());

    hub.shutdown().unwrap();
}

#[test]
fn test_concurrent_registration_distinct_slots() {
    let bus = LoopbackBus::new(MAX_DRIVERS as u8);
    let hub = DriverHub::new(HostPlatform::new(), bus, HubConfig::fast()).unwrap();

    let threads: Vec<_> = (0..MAX_DRIVERS as u8)
        .map(|port| {
            let hub = Arc::clone(&hub);
            thread::spawn(move || {
                hub.register("drv", ChannelConfig::new(port, 1, 2, 0x100 + u32::from(port)), idle())
                    .unwrap()
                    .slot()
            })
        })
        .collect();

    let slots: HashSet<u8> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    assert_eq!(slots.len(), MAX_DRIVERS);
    assert_eq!(hub.len(), MAX_DRIVERS);

    hub.shutdown().unwrap();
}

#[test]
fn test_slot_bitmap_concurrent_claims() {
    let bitmap = Arc::new(SlotBitmap::<8>::new());

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let bitmap = Arc::clone(&bitmap);
            thread::spawn(move || bitmap.find_and_occupy())
        })
        .collect();
    let slots: HashSet<u8> = threads
        .into_iter()
        .map(|t| t.join().unwrap().unwrap())
        .collect();

    assert_eq!(slots.len(), 8);
    assert_eq!(bitmap.find_and_occupy(), None);
    assert!(bitmap.release(3));
    assert_eq!(bitmap.find_and_occupy(), Some(3));
}
