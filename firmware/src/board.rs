//! RP2040 bring-up.

use embassy_rp::gpio::{Input, Level, Output, Pull};
use embassy_rp::peripherals;
use embassy_time::{block_for, Duration};

pub struct Board {
    pub p: embassy_rp::Peripherals,
}

impl Board {
    pub fn init() -> Self {
        // Default clock tree: 125 MHz system from the 12 MHz crystal.
        let p = embassy_rp::init(Default::default());
        Self { p }
    }
}

/// Clocks the I²C bus free before any peripheral claims it.
///
/// A display (or any slave) left mid-transaction by a reset can hold SDA low
/// and wedge the bus; up to nine SCL pulses walk it back to idle. Must run
/// before display or I²C init.
pub fn release_display_bus(scl: &mut peripherals::PIN_3, sda: &mut peripherals::PIN_2) {
    let sda_in = Input::new(&mut *sda, Pull::Up);
    let mut scl_out = Output::new(&mut *scl, Level::High);
    for _ in 0..9 {
        if sda_in.is_high() {
            break;
        }
        scl_out.set_low();
        block_for(Duration::from_micros(5));
        scl_out.set_high();
        block_for(Duration::from_micros(5));
    }
}
