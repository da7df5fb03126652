//! RustSerialHub - entry point
//!
//! On target: UART1/UART2 drivers, log drain and a periodic driver table on
//! the console. On host: the same hub over loopback lines, two linked
//! driver pairs exchanging values, then an orderly shutdown.

use rust_serial_hub::{diagnostics, log_drain, DriverHub, Platform, SerialBus};

/// Print every pending log line.
fn flush_logs() {
    let mut out = String::new();
    log_drain::drain_to(&mut out);
    print!("{out}");
}

fn print_report<P: Platform, B: SerialBus>(hub: &DriverHub<P, B>) {
    let mut out = String::new();
    diagnostics::write_report(hub, &mut out);
    print!("{out}");
}

#[cfg(target_os = "espidf")]
fn main() {
    use rust_serial_hub::esp::{EspPlatform, EspUartBus};
    use rust_serial_hub::{ChannelConfig, Driver, HubConfig, ProcessorFn};

    /// Report period for the driver table.
    const REPORT_PERIOD_US: i64 = 10_000_000;

    /// Echo every received value back to the peer.
    fn echo(driver: &Driver<'_, EspPlatform, EspUartBus>) {
        let value = driver.get_data();
        if value != 0 {
            let _ = driver.send_data(value);
        }
    }

    esp_idf_svc::sys::link_patches();
    println!("{}", env!("VERSION_STRING"));

    let hub = match DriverHub::new(EspPlatform, EspUartBus::new(), HubConfig::default()) {
        Ok(hub) => hub,
        Err(e) => {
            println!("pool init failed: {e}");
            return;
        }
    };

    let channels = [
        ("uart1", ChannelConfig::new(1, 17, 18, 0xC0DE_0001)),
        ("uart2", ChannelConfig::new(2, 4, 5, 0xC0DE_0002)),
    ];
    for (name, config) in channels {
        let callback: ProcessorFn<EspPlatform, EspUartBus> = Box::new(echo);
        if let Err(e) = hub.register(name, config, Some(callback)) {
            println!("{name}: {e}");
        }
    }

    let mut last_report = 0i64;
    loop {
        flush_logs();
        let now = hub.platform().now_us();
        if now - last_report > REPORT_PERIOD_US {
            print_report(&hub);
            last_report = now;
        }
        hub.platform().delay_ms(10);
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use rust_serial_hub::host::{HostPlatform, LoopbackBus};
    use rust_serial_hub::{ChannelConfig, Driver, HubConfig, ProcessorFn};

    type HostDriver<'a> = Driver<'a, HostPlatform, LoopbackBus>;

    /// Values each sender pushes to its peer.
    const VALUES_PER_PAIR: u32 = 20;

    println!("{} (host simulation)", env!("VERSION_STRING"));

    let bus = LoopbackBus::new(4);
    bus.link(0, 1);
    bus.link(2, 3);

    let hub = match DriverHub::new(HostPlatform::new(), bus, HubConfig::fast()) {
        Ok(hub) => hub,
        Err(e) => {
            println!("pool init failed: {e}");
            return;
        }
    };

    let pairs = [
        ("tx-a", "rx-a", 0u8, 1u8, 0x1111_0001u32),
        ("tx-b", "rx-b", 2, 3, 0x2222_0002),
    ];
    let mut totals = Vec::new();

    for (tx_name, rx_name, tx_port, rx_port, secret) in pairs {
        let mut next = 1u32;
        let sender: ProcessorFn<HostPlatform, LoopbackBus> = Box::new(move |driver: &HostDriver<'_>| {
            if next <= VALUES_PER_PAIR && driver.send_data(next).is_ok() {
                next += 1;
            }
        });

        let total = Arc::new(AtomicU32::new(0));
        let sum = Arc::clone(&total);
        let receiver: ProcessorFn<HostPlatform, LoopbackBus> = Box::new(move |driver: &HostDriver<'_>| loop {
            match driver.get_data() {
                0 => break,
                value => {
                    sum.fetch_add(value, Ordering::Relaxed);
                }
            }
        });

        let tx = ChannelConfig::new(tx_port, 10 + tx_port, 20 + tx_port, secret);
        let rx = ChannelConfig::new(rx_port, 10 + rx_port, 20 + rx_port, secret);
        if let Err(e) = hub.register(tx_name, tx, Some(sender)) {
            println!("{tx_name}: {e}");
        }
        if let Err(e) = hub.register(rx_name, rx, Some(receiver)) {
            println!("{rx_name}: {e}");
        }
        totals.push((rx_name, total));
    }

    hub.platform().delay_ms(1_000);
    print_report(&hub);

    for (name, total) in &totals {
        println!("{name}: sum {}", total.load(Ordering::Relaxed));
    }

    if let Err(e) = hub.shutdown() {
        println!("shutdown: {e}");
    }
    flush_logs();
}
