//! One Embassy task per concern; cap-1 channels carry latest-wins snapshots
//! between them, the lock-free ring carries the lossless sample stream to
//! the storage core.

pub mod acquisition;
pub mod display;
pub mod esp_link;
pub mod storage;
pub mod telemetry;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::channel::Channel;

use core::cell::RefCell;

use opl_core::link::TxQueue;
use opl_core::opl::SessionMetadata;
use opl_core::sample::{SatSnapshot, Vec3};
use opl_core::sensors::GpsUpdate;
use opl_core::telemetry::TelemetrySnapshot;

/// Latest motion readings for telemetry and display.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionSnapshot {
    pub accel_g: Vec3,
    pub gyro_dps: Option<Vec3>,
}

/// Latest GPS state for telemetry and display.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpsSnapshot {
    pub update: GpsUpdate,
    pub sats: SatSnapshot,
}

pub type MotionChannel = Channel<CriticalSectionRawMutex, MotionSnapshot, 1>;
pub type GpsChannel = Channel<CriticalSectionRawMutex, GpsSnapshot, 1>;
pub type SnapshotChannel = Channel<CriticalSectionRawMutex, TelemetrySnapshot, 1>;

/// Outbound telemetry lines, oldest dropped when the UART lags.
pub type WsLines = BlockingMutex<CriticalSectionRawMutex, RefCell<TxQueue<4>>>;

/// Session metadata defaults, updatable over the link (`ESP:session_update`).
pub type SharedMeta = BlockingMutex<CriticalSectionRawMutex, RefCell<SessionMetadata>>;
