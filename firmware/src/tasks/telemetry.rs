//! Telemetry task, core 0: folds the latest snapshots into one `WS:` JSON
//! line per tick and hands it to the link task's outbound queue.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_time::{Instant, Timer};

use opl_core::config::AppConfig;
use opl_core::link::{self, Line};
use opl_core::scheduler::Periodic;
use opl_core::status::SessionStatus;
use opl_core::telemetry::{self, GForceSmoother, TelemetrySnapshot};

use crate::tasks::{GpsSnapshot, MotionSnapshot, WsLines};

#[embassy_executor::task]
pub async fn telemetry_task(
    status: &'static SessionStatus,
    motion_rx: Receiver<'static, CriticalSectionRawMutex, MotionSnapshot, 1>,
    gps_rx: Receiver<'static, CriticalSectionRawMutex, GpsSnapshot, 1>,
    snapshot_tx: Sender<'static, CriticalSectionRawMutex, TelemetrySnapshot, 1>,
    ws_lines: &'static WsLines,
    app: AppConfig,
) {
    let period_us = 1_000_000 / (app.telemetry_rate_hz.max(1) as u64);
    let start = Instant::now().as_micros();
    let mut tick = Periodic::new(period_us, start);
    let mut sats_tick =
        Periodic::new(app.satellite_details_interval_s as u64 * 1_000_000, start);

    let mut smoother = GForceSmoother::new(0.25);
    let mut motion = MotionSnapshot::default();
    let mut gps = GpsSnapshot::default();

    loop {
        let now = Instant::now().as_micros();
        if tick.due(now) {
            if let Ok(m) = motion_rx.try_receive() {
                motion = m;
            }
            if let Ok(g) = gps_rx.try_receive() {
                gps = g;
            }

            let snapshot = TelemetrySnapshot {
                epoch_s: status.wallclock_us(now).map(|us| us as f64 / 1_000_000.0),
                has_fix: gps.update.has_fix,
                fix: gps.update.fix,
                fix_type: gps.update.fix_type,
                sats_in_use: gps.update.sats_in_use,
                accel_g: smoother.update(motion.accel_g),
                gyro_dps: motion.gyro_dps,
            };
            let _ = snapshot_tx.try_send(snapshot);

            let sat_details =
                (sats_tick.due(now) && gps.sats.count > 0).then(|| gps.sats);

            let mut line = Line::new();
            let ok = link::write_ws_prefix(&mut line).is_ok()
                && telemetry::write_json(
                    &mut line,
                    &snapshot,
                    sat_details.as_ref().map(|s| s.as_slice()),
                )
                .is_ok();
            if ok {
                ws_lines.lock(|q| q.borrow_mut().push(line));
            }
        }

        Timer::after_micros(tick.until_next(Instant::now().as_micros()).max(1_000)).await;
    }
}
