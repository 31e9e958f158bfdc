//! Display refresh, core 0.
//!
//! The panel driver is an external collaborator; the task renders into
//! whatever [`DisplayPanel`] was registered, or the null panel when the OLED
//! is absent or disabled.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;
use embassy_time::{Duration, Ticker};

use opl_core::scheduler::periods;
use opl_core::telemetry::TelemetrySnapshot;

/// Interface a panel driver must satisfy.
pub trait DisplayPanel {
    fn render(&mut self, snapshot: &TelemetrySnapshot) -> Result<(), ()>;
}

pub struct NullPanel;

impl DisplayPanel for NullPanel {
    fn render(&mut self, _snapshot: &TelemetrySnapshot) -> Result<(), ()> {
        Ok(())
    }
}

#[embassy_executor::task]
pub async fn display_task(
    panel: &'static mut dyn DisplayPanel,
    snapshot_rx: Receiver<'static, CriticalSectionRawMutex, TelemetrySnapshot, 1>,
) {
    let mut snapshot = TelemetrySnapshot::default();
    let mut ticker = Ticker::every(Duration::from_micros(periods::DISPLAY_REFRESH));
    loop {
        ticker.next().await;
        if let Ok(s) = snapshot_rx.try_receive() {
            snapshot = s;
        }
        if panel.render(&snapshot).is_err() {
            defmt::warn!("display: render failed");
        }
    }
}
