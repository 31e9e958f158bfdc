//! Pin-name resolution and hardware-config validation.
//!
//! The declarative config names pins the way the silkscreen does ("GP4",
//! "LED", "STEMMA_I2C"); this module turns those names into GPIO numbers
//! against a board profile and rejects configs that double-book a pin.
//! Actual peripheral bring-up is chip code in the firmware crate.

use crate::config::HwConfig;

/// Alias table for one board variant.
pub struct BoardProfile {
    pub name: &'static str,
    /// On-chip status LED.
    pub led: u8,
    pub neopixel: Option<u8>,
    /// SDA/SCL of the powered I²C connector, when the board has one.
    pub stemma: Option<(u8, u8)>,
    pub gpio_count: u8,
}

pub const FEATHER_RP2040: BoardProfile = BoardProfile {
    name: "feather_rp2040",
    led: 13,
    neopixel: Some(16),
    stemma: Some((2, 3)),
    gpio_count: 30,
};

pub const PICO: BoardProfile = BoardProfile {
    name: "pico",
    led: 25,
    neopixel: None,
    stemma: None,
    gpio_count: 30,
};

/// A resolved pin. The role survives resolution so the board LED keeps its
/// identity even when the config spelled it `GPnn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinHandle {
    Gpio(u8),
    Led(u8),
    Neopixel(u8),
    /// Virtual name for the powered I²C connector.
    StemmaI2c { sda: u8, scl: u8 },
}

impl PinHandle {
    /// GPIO number for single-pin handles.
    pub fn gpio(&self) -> Option<u8> {
        match *self {
            PinHandle::Gpio(n) | PinHandle::Led(n) | PinHandle::Neopixel(n) => Some(n),
            PinHandle::StemmaI2c { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinError {
    Unknown,
    OutOfRange,
}

/// Interface slots a peripheral can be wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Interface {
    I2c,
    Spi,
    UartGps,
    UartRadio,
    Indicators,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HwInitCause {
    /// Two interfaces claim the same pin.
    Conflict { pin: u8 },
    /// A required peripheral did not respond.
    Missing,
    /// Bus or device fault during init.
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HwInitError {
    pub interface: Interface,
    pub cause: HwInitCause,
}

/// Resolves a config pin name. Board aliases win over numeric names: `GP13`
/// on a Feather comes back as the LED it physically is.
pub fn resolve_pin(board: &BoardProfile, name: &str) -> Result<PinHandle, PinError> {
    match name {
        "LED" => return Ok(PinHandle::Led(board.led)),
        "NEOPIXEL" => {
            return board.neopixel.map(PinHandle::Neopixel).ok_or(PinError::Unknown);
        }
        "STEMMA_I2C" => {
            return board
                .stemma
                .map(|(sda, scl)| PinHandle::StemmaI2c { sda, scl })
                .ok_or(PinError::Unknown);
        }
        _ => {}
    }

    let digits = name.strip_prefix("GP").ok_or(PinError::Unknown)?;
    let n: u8 = digits.parse().map_err(|_| PinError::Unknown)?;
    if n >= board.gpio_count {
        return Err(PinError::OutOfRange);
    }
    if n == board.led {
        Ok(PinHandle::Led(n))
    } else if board.neopixel == Some(n) {
        Ok(PinHandle::Neopixel(n))
    } else {
        Ok(PinHandle::Gpio(n))
    }
}

/// Resolves every pin the config names and rejects double-bookings.
///
/// Returns the conflict against the *second* interface that claimed the pin,
/// which is the one the operator most recently added.
pub fn validate_pins(board: &BoardProfile, cfg: &HwConfig) -> Result<(), HwInitError> {
    let mut claimed: heapless::Vec<(u8, Interface), 16> = heapless::Vec::new();

    let mut claim = |pin: PinHandle, interface: Interface| -> Result<(), HwInitError> {
        let mut claim_one = |n: u8| -> Result<(), HwInitError> {
            if claimed.iter().any(|&(p, _)| p == n) {
                return Err(HwInitError { interface, cause: HwInitCause::Conflict { pin: n } });
            }
            claimed
                .push((n, interface))
                .map_err(|_| HwInitError { interface, cause: HwInitCause::Fault })
        };
        match pin {
            PinHandle::StemmaI2c { sda, scl } => {
                claim_one(sda)?;
                claim_one(scl)
            }
            other => match other.gpio() {
                Some(n) => claim_one(n),
                None => Ok(()),
            },
        }
    };

    let resolve = |name: &str, interface: Interface| -> Result<PinHandle, HwInitError> {
        resolve_pin(board, name)
            .map_err(|_| HwInitError { interface, cause: HwInitCause::Missing })
    };

    if cfg.i2c.enabled {
        // STEMMA_I2C resolves both pins through the sda name.
        let sda = resolve(cfg.i2c.sda, Interface::I2c)?;
        if let PinHandle::StemmaI2c { .. } = sda {
            claim(sda, Interface::I2c)?;
        } else {
            claim(sda, Interface::I2c)?;
            claim(resolve(cfg.i2c.scl, Interface::I2c)?, Interface::I2c)?;
        }
    }
    if cfg.sdcard.enabled {
        claim(resolve(cfg.spi.sck, Interface::Spi)?, Interface::Spi)?;
        claim(resolve(cfg.spi.mosi, Interface::Spi)?, Interface::Spi)?;
        claim(resolve(cfg.spi.miso, Interface::Spi)?, Interface::Spi)?;
        claim(resolve(cfg.spi.cs, Interface::Spi)?, Interface::Spi)?;
    }
    if cfg.gps.enabled && cfg.gps.i2c_address.is_none() {
        claim(resolve(cfg.uart_gps.tx, Interface::UartGps)?, Interface::UartGps)?;
        claim(resolve(cfg.uart_gps.rx, Interface::UartGps)?, Interface::UartGps)?;
    }
    if cfg.radio.enabled {
        claim(resolve(cfg.uart_radio.tx, Interface::UartRadio)?, Interface::UartRadio)?;
        claim(resolve(cfg.uart_radio.rx, Interface::UartRadio)?, Interface::UartRadio)?;
    }
    if cfg.indicators.enabled {
        claim(resolve(cfg.indicators.led, Interface::Indicators)?, Interface::Indicators)?;
    }
    Ok(())
}

/// Firmware-side probe access so candidate detection stays host-testable.
pub trait I2cProbe {
    /// True when a device acknowledges the 7-bit address.
    fn probe(&mut self, addr: u8) -> bool;
}

/// Every responding address in the valid 7-bit range, for boot reporting.
pub fn scan_bus(probe: &mut dyn I2cProbe, out: &mut heapless::Vec<u8, 112>) {
    for addr in 0x08..=0x77u8 {
        if probe.probe(addr) {
            let _ = out.push(addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HwConfig;

    #[test]
    fn numeric_names_resolve() {
        assert_eq!(resolve_pin(&PICO, "GP4"), Ok(PinHandle::Gpio(4)));
        assert_eq!(resolve_pin(&PICO, "GP29"), Ok(PinHandle::Gpio(29)));
        assert_eq!(resolve_pin(&PICO, "GP30"), Err(PinError::OutOfRange));
        assert_eq!(resolve_pin(&PICO, "P4"), Err(PinError::Unknown));
        assert_eq!(resolve_pin(&PICO, "GPx"), Err(PinError::Unknown));
    }

    #[test]
    fn led_alias_wins_over_numeric_name() {
        assert_eq!(resolve_pin(&FEATHER_RP2040, "LED"), Ok(PinHandle::Led(13)));
        // The numeric spelling of the LED pin still identifies as the LED.
        assert_eq!(resolve_pin(&FEATHER_RP2040, "GP13"), Ok(PinHandle::Led(13)));
        assert_eq!(resolve_pin(&PICO, "GP25"), Ok(PinHandle::Led(25)));
    }

    #[test]
    fn virtual_stemma_resolves_on_feather_only() {
        assert_eq!(
            resolve_pin(&FEATHER_RP2040, "STEMMA_I2C"),
            Ok(PinHandle::StemmaI2c { sda: 2, scl: 3 })
        );
        assert_eq!(resolve_pin(&PICO, "STEMMA_I2C"), Err(PinError::Unknown));
        assert_eq!(resolve_pin(&PICO, "NEOPIXEL"), Err(PinError::Unknown));
    }

    #[test]
    fn default_config_has_no_conflicts() {
        let cfg = HwConfig::default();
        assert!(validate_pins(&FEATHER_RP2040, &cfg).is_ok());
    }

    #[test]
    fn double_booked_pin_is_a_conflict() {
        let mut cfg = HwConfig::default();
        cfg.uart_radio.rx = cfg.spi.miso;
        let err = validate_pins(&FEATHER_RP2040, &cfg).unwrap_err();
        assert_eq!(err.interface, Interface::UartRadio);
        assert!(matches!(err.cause, HwInitCause::Conflict { .. }));
    }

    struct FakeBus(&'static [u8]);

    impl I2cProbe for FakeBus {
        fn probe(&mut self, addr: u8) -> bool {
            self.0.contains(&addr)
        }
    }

    #[test]
    fn bus_scan_reports_responders() {
        let mut bus = FakeBus(&[0x19, 0x68]);
        let mut found = heapless::Vec::new();
        scan_bus(&mut bus, &mut found);
        assert_eq!(found.as_slice(), &[0x19, 0x68]);
    }
}
