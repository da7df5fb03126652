//! Processor worker: runs the user callback on the processor core.

use crate::channel::SerialBus;
use crate::platform::Platform;

use super::hub::ProcessorFn;
use super::{Driver, DriverHandle, DriverHub, WorkerExit};

/// Worker entry. Calls `callback` once per iteration until deactivated.
pub(crate) fn run<P: Platform, B: SerialBus>(
    hub: &DriverHub<P, B>,
    handle: DriverHandle,
    mut callback: ProcessorFn<P, B>,
) {
    let Some(record) = hub.record(handle) else {
        return;
    };
    let _exit = WorkerExit::new(&*record);
    let driver = Driver::new(hub, handle);
    let idle_ms = hub.config().processor_idle_ms;

    while record.is_active() {
        callback(&driver);
        hub.platform().delay_ms(idle_ms);
    }
}
