//! Acquisition task, core 0: polls the registry at the configured rates and
//! feeds the ring.
//!
//! Accel samples ride the lossy path (newest wins under overflow); GPS fixes
//! are parked and retried so none are lost to a full ring.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_time::{Instant, Timer};

use opl_core::config::AppConfig;
use opl_core::sample::Sample;
use opl_core::scheduler::{periods, Periodic};
use opl_core::sensors::registry::Registry;
use opl_core::status::SessionStatus;

use crate::tasks::storage::Ring;
use crate::tasks::{GpsSnapshot, MotionSnapshot};

#[embassy_executor::task]
pub async fn acquisition_task(
    registry: &'static mut Registry<'static>,
    ring: &'static Ring,
    status: &'static SessionStatus,
    motion_tx: Sender<'static, CriticalSectionRawMutex, MotionSnapshot, 1>,
    gps_tx: Sender<'static, CriticalSectionRawMutex, GpsSnapshot, 1>,
    app: AppConfig,
    accel_period_us: u64,
    gps_period_us: u64,
) {
    let start = Instant::now().as_micros();
    let mut accel_tick = Periodic::new_due(accel_period_us, start);
    let mut gps_tick = Periodic::new(gps_period_us, start);
    let mut sats_tick =
        Periodic::new(app.satellite_details_interval_s as u64 * 1_000_000, start);
    let mut rtc_tick = Periodic::new(periods::RTC_SYNC, start);

    let mut pending_fix: Option<Sample> = None;
    let mut last_gps_epoch: Option<(i64, u64)> = None;

    loop {
        if status.shutdown_requested() {
            defmt::info!("acquisition: stopping");
            break;
        }
        crate::ACQ_ALIVE.store(true, portable_atomic::Ordering::Relaxed);
        let now = Instant::now().as_micros();

        if accel_tick.due(now) {
            match registry.accel().read_g() {
                Ok(g) => {
                    ring.force_push(Sample::accel(now, g), Sample::droppable);
                    let gyro_dps = if registry.has_gyro() {
                        registry.gyro().read_dps().ok()
                    } else {
                        None
                    };
                    let _ = motion_tx.try_send(MotionSnapshot { accel_g: g, gyro_dps });
                }
                Err(e) => defmt::warn!("acquisition: accel read failed: {}", e),
            }

            // A fix that found the ring full last tick goes in now.
            if let Some(fix) = pending_fix.take() {
                if let Err(fix) = ring.push(fix) {
                    pending_fix = Some(fix);
                }
            }
        }

        if gps_tick.due(now) {
            if let Some(update) = registry.gps().poll(now) {
                crate::GPS_HAS_FIX
                    .store(update.has_fix, portable_atomic::Ordering::Relaxed);
                if let Some(epoch) = update.epoch_seconds {
                    last_gps_epoch = Some((epoch, now));
                }

                let sats =
                    opl_core::sample::SatSnapshot::from_slice(registry.gps().satellites());
                let _ = gps_tx.try_send(GpsSnapshot { update, sats });

                if update.has_fix {
                    let sample = Sample::gps_fix(now, update.fix);
                    if let Err(sample) = ring.push(sample) {
                        pending_fix = Some(sample);
                    }
                    if sats_tick.due(now) && sats.count > 0 {
                        // Snapshots are droppable under pressure, unlike fixes.
                        ring.force_push(
                            Sample::gps_sats(now, sats.as_slice()),
                            Sample::droppable,
                        );
                    }
                }
            }
        }

        // RTC catches up from GPS time once a valid date was decoded.
        if rtc_tick.due(now) {
            if let Some((epoch, at_us)) = last_gps_epoch {
                let epoch_now = epoch + (now.saturating_sub(at_us) / 1_000_000) as i64;
                if let Ok(dt) = time::OffsetDateTime::from_unix_timestamp(epoch_now) {
                    let civil = time::PrimitiveDateTime::new(dt.date(), dt.time());
                    match registry.rtc().set_utc(civil) {
                        Ok(()) => {
                            status.set_wallclock(epoch_now as u64 * 1_000_000, now);
                            defmt::debug!("acquisition: rtc synced from gps");
                        }
                        Err(e) => defmt::warn!("acquisition: rtc sync failed: {}", e),
                    }
                }
            }
        }

        let sleep = accel_tick
            .until_next(now)
            .min(gps_tick.until_next(now))
            .min(rtc_tick.until_next(now))
            .max(500);
        Timer::after_micros(sleep).await;
    }
}
