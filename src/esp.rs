//! ESP-IDF backend: FreeRTOS tasks and UART channels.
//!
//! # Hardware Setup
//!
//! ```text
//! UART0  ── console / log drain (IDF default)
//! UART1  ── channel 1 ──▶ peer device
//! UART2  ── channel 2 ──▶ peer device
//! ```
//!
//! Workers are created with `xTaskCreatePinnedToCore` through the HAL task
//! helper. A worker entry is boxed, handed to the task as its argument and
//! run by a trampoline that deletes the task when the entry returns.

use alloc::boxed::Box;
use core::ffi::{c_void, CStr};

use esp_idf_svc::hal::cpu;
use esp_idf_svc::hal::gpio::AnyIOPin;
use esp_idf_svc::hal::task;
use esp_idf_svc::hal::uart::{self, UartDriver, UART1, UART2};
use esp_idf_svc::hal::units::Hertz;
use esp_idf_svc::sys;

use crate::channel::{SerialBus, SerialPort};
use crate::config::ChannelConfig;
use crate::error::{ChannelError, SpawnError};
use crate::platform::{Core, Platform, TaskEntry, TaskRole, TaskSpec};

/// Milliseconds to FreeRTOS ticks, rounded up, never zero.
fn ms_to_ticks(ms: u32) -> u32 {
    let ticks = (u64::from(ms) * u64::from(sys::configTICK_RATE_HZ)).div_ceil(1000);
    ticks.clamp(1, u64::from(u32::MAX)) as u32
}

// ============================================================================
// Platform
// ============================================================================

/// Handle of a FreeRTOS worker.
///
/// The task deletes itself when its entry returns, so the handle is only
/// informational once the worker has exited.
pub struct EspTask(sys::TaskHandle_t);

// SAFETY: a task handle is an opaque id; FreeRTOS APIs taking it are
// callable from any task.
unsafe impl Send for EspTask {}
unsafe impl Sync for EspTask {}

impl EspTask {
    pub fn raw(&self) -> sys::TaskHandle_t {
        self.0
    }
}

extern "C" fn task_trampoline(arg: *mut c_void) {
    // SAFETY: `arg` is the pointer leaked by `EspPlatform::spawn`, passed to
    // exactly one task.
    let entry = unsafe { Box::from_raw(arg as *mut TaskEntry) };
    entry();
    // SAFETY: deleting the calling task; FreeRTOS tasks must not return.
    unsafe { sys::vTaskDelete(core::ptr::null_mut()) };
}

/// FreeRTOS scheduler on the two ESP32-S3 cores.
#[derive(Clone, Copy, Default)]
pub struct EspPlatform;

impl Platform for EspPlatform {
    type Task = EspTask;

    fn spawn(&self, spec: TaskSpec<'_>, entry: TaskEntry) -> Result<EspTask, SpawnError> {
        let name: &CStr = match spec.role {
            TaskRole::Reader => c"hub_reader",
            TaskRole::Processor => c"hub_proc",
        };
        let core = match spec.core {
            Core::Core0 => cpu::Core::Core0,
            Core::Core1 => cpu::Core::Core1,
        };
        let arg = Box::into_raw(Box::new(entry)) as *mut c_void;

        // SAFETY: the trampoline takes ownership of `arg`; on failure the
        // task never ran and ownership comes back here.
        let created = unsafe {
            task::create(
                task_trampoline,
                name,
                spec.stack_size,
                arg,
                spec.priority,
                Some(core),
            )
        };
        match created {
            Ok(handle) => Ok(EspTask(handle)),
            Err(_) => {
                // SAFETY: see above; the task was not created.
                drop(unsafe { Box::from_raw(arg as *mut TaskEntry) });
                Err(SpawnError)
            }
        }
    }

    fn reap(&self, _task: EspTask) {}

    fn delay_ms(&self, ms: u32) {
        // SAFETY: plain FreeRTOS delay of the calling task.
        unsafe { sys::vTaskDelay(ms_to_ticks(ms)) };
    }

    fn yield_now(&self) {
        task::do_yield();
    }

    fn now_us(&self) -> i64 {
        // SAFETY: reads the monotonic system timer.
        unsafe { sys::esp_timer_get_time() }
    }

    fn current_core(&self) -> Core {
        match cpu::core() {
            cpu::Core::Core0 => Core::Core0,
            _ => Core::Core1,
        }
    }
}

// ============================================================================
// UART channels
// ============================================================================

/// UART1 and UART2 as hub channels 1 and 2. Channel 0 is the console.
#[derive(Clone, Copy, Default)]
pub struct EspUartBus;

impl EspUartBus {
    pub const fn new() -> Self {
        Self
    }
}

impl SerialBus for EspUartBus {
    type Port = EspUartPort;

    fn port_count(&self) -> u8 {
        3
    }

    fn open(&self, config: &ChannelConfig) -> Result<EspUartPort, ChannelError> {
        let uart_config = uart::config::Config::default().baudrate(Hertz(config.baud));

        // SAFETY: the hub lets one live driver own a channel at a time, so
        // each UART peripheral and its pins are claimed once.
        let driver = unsafe {
            let tx = AnyIOPin::new(i32::from(config.tx_pin));
            let rx = AnyIOPin::new(i32::from(config.rx_pin));
            match config.port {
                1 => UartDriver::new(
                    UART1::new(),
                    tx,
                    rx,
                    Option::<AnyIOPin>::None,
                    Option::<AnyIOPin>::None,
                    &uart_config,
                ),
                2 => UartDriver::new(
                    UART2::new(),
                    tx,
                    rx,
                    Option::<AnyIOPin>::None,
                    Option::<AnyIOPin>::None,
                    &uart_config,
                ),
                _ => return Err(ChannelError::OpenFailed),
            }
        }
        .map_err(|_| ChannelError::OpenFailed)?;

        Ok(EspUartPort { driver })
    }
}

/// One open UART. The driver is closed on drop.
pub struct EspUartPort {
    driver: UartDriver<'static>,
}

// SAFETY: the IDF UART driver serializes access internally; reads come
// from the Reader and writes are serialized by the driver token.
unsafe impl Send for EspUartPort {}
unsafe impl Sync for EspUartPort {}

impl SerialPort for EspUartPort {
    fn read(&self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, ChannelError> {
        self.driver
            .read(buf, ms_to_ticks(timeout_ms))
            .map_err(|_| ChannelError::ReadFailed)
    }

    fn write(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        let mut written = 0;
        while written < bytes.len() {
            written += self
                .driver
                .write(&bytes[written..])
                .map_err(|_| ChannelError::WriteFailed)?;
        }
        Ok(())
    }
}
