//! Declarative configuration tables.
//!
//! `HwConfig` says what is wired where; `AppConfig` says how the logger
//! behaves. Both ship as compiled-in defaults describing the reference
//! build (Feather RP2040 + Adalogger wing) and are constructed once in
//! `main`, then passed by reference.

use crate::link::RADIO_BAUD;
use crate::opl::writer::FlushPolicy;
use crate::opl::Weather;

// ── Interfaces ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct I2cIface {
    pub enabled: bool,
    pub sda: &'static str,
    pub scl: &'static str,
    pub freq_hz: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct SpiIface {
    pub sck: &'static str,
    pub mosi: &'static str,
    pub miso: &'static str,
    pub cs: &'static str,
    pub freq_hz: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct UartIface {
    pub tx: &'static str,
    pub rx: &'static str,
    pub baud: u32,
}

// ── Peripherals ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct AccelConfig {
    pub enabled: bool,
    pub address: u8,
    /// Full-scale range, ±g.
    pub range_g: u8,
    pub sample_rate_hz: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct GyroConfig {
    pub enabled: bool,
    pub address: u8,
    /// Full-scale range, ±degrees/second.
    pub range_dps: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct MagConfig {
    pub enabled: bool,
    pub address: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct GpsConfig {
    pub enabled: bool,
    /// `Some` for an I²C receiver, `None` for the UART wiring.
    pub i2c_address: Option<u8>,
    pub update_rate_ms: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RtcConfig {
    pub enabled: bool,
    pub address: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct OledConfig {
    pub enabled: bool,
    pub address: u8,
    pub brightness: u8,
}

#[derive(Debug, Clone, Copy)]
pub struct SdConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct IndicatorConfig {
    pub enabled: bool,
    pub led: &'static str,
    pub neopixel: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct RadioConfig {
    pub enabled: bool,
    pub baud: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct HwConfig {
    pub i2c: I2cIface,
    pub spi: SpiIface,
    pub uart_gps: UartIface,
    pub uart_radio: UartIface,
    pub accelerometer: AccelConfig,
    pub gyroscope: GyroConfig,
    pub magnetometer: MagConfig,
    pub gps: GpsConfig,
    pub oled: OledConfig,
    pub sdcard: SdConfig,
    pub rtc: RtcConfig,
    pub indicators: IndicatorConfig,
    pub radio: RadioConfig,
    /// Reported in the session header.
    pub hw_version: (u8, u8),
}

impl Default for HwConfig {
    fn default() -> Self {
        Self {
            i2c: I2cIface { enabled: true, sda: "GP2", scl: "GP3", freq_hz: 400_000 },
            spi: SpiIface {
                sck: "GP18",
                mosi: "GP19",
                miso: "GP20",
                cs: "GP10",
                freq_hz: 12_000_000,
            },
            uart_gps: UartIface { tx: "GP0", rx: "GP1", baud: 9_600 },
            uart_radio: UartIface { tx: "GP8", rx: "GP9", baud: RADIO_BAUD },
            accelerometer: AccelConfig {
                enabled: true,
                address: 0x18,
                range_g: 8,
                sample_rate_hz: 100,
            },
            gyroscope: GyroConfig { enabled: false, address: 0x6A, range_dps: 2000 },
            magnetometer: MagConfig { enabled: false, address: 0x1C },
            gps: GpsConfig { enabled: true, i2c_address: Some(0x10), update_rate_ms: 100 },
            oled: OledConfig { enabled: false, address: 0x3C, brightness: 128 },
            sdcard: SdConfig { enabled: true },
            rtc: RtcConfig { enabled: true, address: 0x68 },
            indicators: IndicatorConfig { enabled: true, led: "LED", neopixel: None },
            radio: RadioConfig { enabled: true, baud: 115_200 },
            hw_version: (2, 0),
        }
    }
}

// ── Application behavior ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LogFormat {
    Binary,
    Csv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WifiMode {
    Ap,
    Sta,
}

impl WifiMode {
    pub fn label(self) -> &'static str {
        match self {
            WifiMode::Ap => "ap",
            WifiMode::Sta => "sta",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WifiConfig {
    pub mode: WifiMode,
    pub ssid: &'static str,
    pub password: &'static str,
    pub address: &'static str,
    pub netmask: &'static str,
    pub gateway: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionDefaults {
    pub name: &'static str,
    pub driver: &'static str,
    pub vehicle: &'static str,
    pub weather: Weather,
    pub ambient_temp_c: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct AppConfig {
    pub log_format: LogFormat,
    pub session: SessionDefaults,
    pub gforce_event_threshold: f32,
    pub event_rate_limit_s: f32,
    pub telemetry_rate_hz: u8,
    pub satellite_details_interval_s: u16,
    pub wifi: WifiConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Binary,
            session: SessionDefaults {
                name: "Session",
                driver: "",
                vehicle: "",
                weather: Weather::Unknown,
                ambient_temp_c: 20.0,
            },
            gforce_event_threshold: 3.0,
            event_rate_limit_s: 1.0,
            telemetry_rate_hz: 10,
            satellite_details_interval_s: 5,
            wifi: WifiConfig {
                mode: WifiMode::Ap,
                ssid: "openpony",
                password: "ponyride",
                address: "192.168.4.1",
                netmask: "255.255.255.0",
                gateway: "192.168.4.1",
            },
        }
    }
}

impl AppConfig {
    pub fn flush_policy(&self) -> FlushPolicy {
        FlushPolicy {
            event_threshold_g: self.gforce_event_threshold,
            event_rate_limit_us: (self.event_rate_limit_s * 1_000_000.0) as u64,
            ..FlushPolicy::default()
        }
    }

    /// Opaque marker stored in the session header so a reader can tell two
    /// runs recorded under different settings apart.
    pub fn fingerprint(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[
            match self.log_format {
                LogFormat::Binary => 0u8,
                LogFormat::Csv => 1,
            },
            self.telemetry_rate_hz,
        ]);
        hasher.update(&self.gforce_event_threshold.to_le_bytes());
        hasher.update(&self.event_rate_limit_s.to_le_bytes());
        hasher.update(&self.satellite_details_interval_s.to_le_bytes());
        hasher.update(self.wifi.ssid.as_bytes());
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_tracks_settings() {
        let base = AppConfig::default();
        let mut tweaked = base;
        tweaked.gforce_event_threshold = 2.5;
        assert_ne!(base.fingerprint(), tweaked.fingerprint());
        assert_eq!(base.fingerprint(), AppConfig::default().fingerprint());
    }

    #[test]
    fn flush_policy_converts_units() {
        let mut cfg = AppConfig::default();
        cfg.event_rate_limit_s = 0.5;
        let policy = cfg.flush_policy();
        assert_eq!(policy.event_rate_limit_us, 500_000);
        assert_eq!(policy.event_threshold_g, 3.0);
        assert_eq!(policy.interval_us, 300_000_000);
    }
}
