#![no_std]
#![no_main]

mod board;
mod drivers;
mod tasks;

use core::cell::RefCell;

use embassy_embedded_hal::shared_bus::blocking::i2c::I2cDevice;
use embassy_executor::{Executor, Spawner};
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Level, Output};
use embassy_rp::i2c::{self, I2c};
use embassy_rp::multicore::{spawn_core1, Stack};
use embassy_rp::peripherals::{I2C1, UART0, UART1};
use embassy_rp::spi::{self, Spi};
use embassy_rp::uart::{self, BufferedInterruptHandler, BufferedUart, BufferedUartRx};
use embassy_rp::watchdog::Watchdog;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_time::{Duration, Instant, Timer};
use embedded_hal_bus::spi::ExclusiveDevice;
use portable_atomic::{AtomicBool, Ordering};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use opl_core::config::{AppConfig, HwConfig};
use opl_core::hal::{self, I2cProbe, FEATHER_RP2040};
use opl_core::opl::SessionMetadata;
use opl_core::ring::SampleRing;
use opl_core::sensors::registry::{
    detect_slot, ConnType, HardwareItem, HwType, Registry, SensorModel, ACCEL_CANDIDATES,
    GPS_I2C_CANDIDATES, IMU_CANDIDATES, RTC_CANDIDATES,
};
use opl_core::status::{SessionState, SessionStatus};

use crate::board::Board;
use crate::drivers::atgm336h::UartGps;
use crate::drivers::lis3dh::Lis3dh;
use crate::drivers::lsm6dsox::Lsm6dsox;
use crate::drivers::pa1010d::Pa1010d;
use crate::drivers::pcf8523::Pcf8523;
use crate::drivers::sdcard::{SdStorage, WallclockTimeSource};
use crate::tasks::display::NullPanel;
use crate::tasks::storage::Ring;

pub const HW_VERSION: (u8, u8) = (2, 0);

// ── Cross-core shared state ───────────────────────────────────────────────────
pub static STATUS: SessionStatus = SessionStatus::new();
pub static GPS_HAS_FIX: AtomicBool = AtomicBool::new(false);
pub static ACQ_ALIVE: AtomicBool = AtomicBool::new(false);
pub static STORAGE_ALIVE: AtomicBool = AtomicBool::new(false);

// ── Inter-task channels ───────────────────────────────────────────────────────
//  Cap=1 snapshots: consumers always want the LATEST value, stale ones drop.
static MOTION_CHAN: tasks::MotionChannel = embassy_sync::channel::Channel::new();
static GPS_CHAN: tasks::GpsChannel = embassy_sync::channel::Channel::new();
static SNAPSHOT_CHAN: tasks::SnapshotChannel = embassy_sync::channel::Channel::new();
static FILE_REQ: tasks::storage::FileReqChannel = embassy_sync::channel::Channel::new();
static FILE_REPLY: tasks::storage::FileReplyChannel = embassy_sync::channel::Channel::new();
static WS_LINES: tasks::WsLines = BlockingMutex::new(RefCell::new(opl_core::link::TxQueue::new()));
static META: tasks::SharedMeta = BlockingMutex::new(RefCell::new(SessionMetadata {
    name: heapless::String::new(),
    driver: heapless::String::new(),
    vehicle: heapless::String::new(),
    weather: opl_core::opl::Weather::Unknown,
    ambient_temp_dc: 0,
    config_crc: 0,
}));

// ── Interrupt bindings ────────────────────────────────────────────────────────
bind_interrupts!(struct Irqs {
    UART0_IRQ => BufferedInterruptHandler<UART0>;
    UART1_IRQ => BufferedInterruptHandler<UART1>;
});

// ── 'static storage ───────────────────────────────────────────────────────────
type I2cBus = BlockingMutex<NoopRawMutex, RefCell<I2c<'static, I2C1, i2c::Blocking>>>;
type SharedI2c = I2cDevice<'static, NoopRawMutex, I2c<'static, I2C1, i2c::Blocking>>;

static I2C_BUS: StaticCell<I2cBus> = StaticCell::new();
static RING: StaticCell<Ring> = StaticCell::new();
static REGISTRY: StaticCell<Registry<'static>> = StaticCell::new();
static LIS3DH_CELL: StaticCell<Lis3dh<SharedI2c>> = StaticCell::new();
static IMU_ACCEL_CELL: StaticCell<Lsm6dsox<SharedI2c>> = StaticCell::new();
static IMU_GYRO_CELL: StaticCell<Lsm6dsox<SharedI2c>> = StaticCell::new();
static PA1010D_CELL: StaticCell<Pa1010d<SharedI2c>> = StaticCell::new();
static UART_GPS_CELL: StaticCell<UartGps<BufferedUartRx<'static, UART0>>> = StaticCell::new();
static PCF8523_CELL: StaticCell<Pcf8523<SharedI2c>> = StaticCell::new();
static NULL_PANEL: StaticCell<NullPanel> = StaticCell::new();
static GPS_TX_BUF: StaticCell<[u8; 32]> = StaticCell::new();
static GPS_RX_BUF: StaticCell<[u8; 512]> = StaticCell::new();
static RADIO_TX_BUF: StaticCell<[u8; 512]> = StaticCell::new();
static RADIO_RX_BUF: StaticCell<[u8; 512]> = StaticCell::new();
static CORE1_STACK: StaticCell<Stack<8192>> = StaticCell::new();
static EXECUTOR1: StaticCell<Executor> = StaticCell::new();

struct BusProbe(SharedI2c);

impl I2cProbe for BusProbe {
    fn probe(&mut self, addr: u8) -> bool {
        let mut byte = [0u8; 1];
        embedded_hal::i2c::I2c::read(&mut self.0, addr, &mut byte).is_ok()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // 1. Board init
    let board = Board::init();
    let mut p = board.p;
    let hw = HwConfig::default();
    let app = AppConfig::default();
    defmt::info!("openponylogger {} starting", env!("CARGO_PKG_VERSION"));

    // 2. Pin table validation against the board profile
    if let Err(e) = hal::validate_pins(&FEATHER_RP2040, &hw) {
        defmt::error!("hw config rejected: {}", e);
    }
    match hal::resolve_pin(&FEATHER_RP2040, hw.indicators.led) {
        Ok(pin) => defmt::info!("status led: {}", pin),
        Err(_) => defmt::warn!("status led name unknown"),
    }

    // 3. Free the display bus, then bring up I2C1 @ 400 kHz
    board::release_display_bus(&mut p.PIN_3, &mut p.PIN_2);
    let mut i2c_cfg = i2c::Config::default();
    i2c_cfg.frequency = hw.i2c.freq_hz;
    let bus = I2C_BUS.init(BlockingMutex::new(RefCell::new(I2c::new_blocking(
        p.I2C1, p.PIN_3, p.PIN_2, i2c_cfg,
    ))));
    let mut probe = BusProbe(I2cDevice::new(bus));

    let mut responders: heapless::Vec<u8, 112> = heapless::Vec::new();
    hal::scan_bus(&mut probe, &mut responders);
    defmt::info!("i2c scan: {} device(s)", responders.len());

    // 4. Sensor autodetect: configured address first, then the slot's
    //    candidate list. Missing peripherals leave the null impls bound.
    let mut registry = Registry::new();
    let mut accel_bound = false;

    if hw.accelerometer.enabled {
        if let Some(det) = detect_slot(
            &mut probe,
            Some((SensorModel::Lis3dh, hw.accelerometer.address)),
            ACCEL_CANDIDATES,
        ) {
            let drv = LIS3DH_CELL.init(Lis3dh::new(
                I2cDevice::new(bus),
                det.address,
                hw.accelerometer.range_g,
            ));
            match drv.init() {
                Ok(()) => {
                    defmt::info!("accel: lis3dh at 0x{:02x}", det.address);
                    registry.set_accel(
                        drv,
                        HardwareItem::detected(HwType::Accelerometer, det.model, det.address),
                    );
                    accel_bound = true;
                }
                Err(e) => defmt::error!("accel init failed: {}", e),
            }
        } else {
            defmt::warn!("accelerometer missing");
        }
    }

    if hw.gyroscope.enabled {
        if let Some(det) = detect_slot(
            &mut probe,
            Some((SensorModel::Lsm6dsox, hw.gyroscope.address)),
            IMU_CANDIDATES,
        ) {
            if det.model == SensorModel::Lsm6dsox {
                let imu_gyro =
                    IMU_GYRO_CELL.init(Lsm6dsox::new(I2cDevice::new(bus), det.address));
                if imu_gyro.init().is_ok() {
                    registry.set_gyro(imu_gyro);
                    let item = HardwareItem::detected(HwType::Imu, det.model, det.address);
                    if accel_bound {
                        registry.add_item(item);
                    } else {
                        let imu_accel = IMU_ACCEL_CELL
                            .init(Lsm6dsox::new(I2cDevice::new(bus), det.address));
                        registry.set_accel(imu_accel, item);
                        accel_bound = true;
                    }
                    defmt::info!("imu: lsm6dsox at 0x{:02x}", det.address);
                }
            } else {
                defmt::warn!("imu variant {} detected, no driver bound", det.model);
            }
        }
    }
    let _ = accel_bound;

    if hw.gps.enabled {
        match hw.gps.i2c_address {
            Some(addr) => {
                if let Some(det) = detect_slot(
                    &mut probe,
                    Some((SensorModel::Pa1010d, addr)),
                    GPS_I2C_CANDIDATES,
                ) {
                    let gps =
                        PA1010D_CELL.init(Pa1010d::new(I2cDevice::new(bus), det.address));
                    if gps.init().is_ok() {
                        registry.set_gps(
                            gps,
                            HardwareItem::detected(HwType::Gps, det.model, det.address),
                        );
                        defmt::info!("gps: pa1010d at 0x{:02x}", det.address);
                    }
                } else {
                    defmt::warn!("gps missing");
                }
            }
            None => {
                let mut gps_cfg = uart::Config::default();
                gps_cfg.baudrate = hw.uart_gps.baud;
                let gps_uart = BufferedUart::new(
                    p.UART0,
                    Irqs,
                    p.PIN_0,
                    p.PIN_1,
                    GPS_TX_BUF.init([0; 32]),
                    GPS_RX_BUF.init([0; 512]),
                    gps_cfg,
                );
                let (gps_rx, _gps_tx) = gps_uart.split();
                let gps = UART_GPS_CELL.init(UartGps::new(gps_rx));
                registry.set_gps(
                    gps,
                    HardwareItem::new(HwType::Gps, ConnType::Uart, "atgm336h@uart0"),
                );
                defmt::info!("gps: uart at {} bps", hw.uart_gps.baud);
            }
        }
    }

    if hw.rtc.enabled {
        if let Some(det) =
            detect_slot(&mut probe, Some((SensorModel::Pcf8523, hw.rtc.address)), RTC_CANDIDATES)
        {
            let rtc = PCF8523_CELL.init(Pcf8523::new(I2cDevice::new(bus), det.address));
            if rtc.init().is_ok() {
                registry.set_rtc(
                    rtc,
                    HardwareItem::detected(HwType::Rtc, det.model, det.address),
                );
                defmt::info!("rtc: pcf8523 at 0x{:02x}", det.address);
            }
        } else {
            defmt::warn!("rtc missing");
        }
    }

    // 5. Wallclock from the RTC until GPS takes over
    match registry.rtc().now_utc() {
        Ok(dt) if dt.year() >= 2000 => {
            let epoch_us = dt.assume_utc().unix_timestamp() as u64 * 1_000_000;
            STATUS.set_wallclock(epoch_us, Instant::now().as_micros());
            defmt::info!("wallclock from rtc: {}", dt.year());
        }
        Ok(_) => {}
        Err(e) => defmt::warn!("rtc read failed: {}", e),
    }

    // 6. SD card on SPI0: init at 400 kHz, then run at speed
    let sd = if hw.sdcard.enabled {
        let mut spi_cfg = spi::Config::default();
        spi_cfg.frequency = 400_000;
        let sd_spi = Spi::new_blocking(p.SPI0, p.PIN_18, p.PIN_19, p.PIN_20, spi_cfg);
        let sd_cs = Output::new(p.PIN_10, Level::High);
        let sd_dev = ExclusiveDevice::new(sd_spi, sd_cs, embassy_time::Delay).unwrap();
        match SdStorage::new(sd_dev, WallclockTimeSource { status: &STATUS }) {
            Ok(mut sd) => {
                sd.set_spi_frequency(hw.spi.freq_hz);
                if let Some(bytes) = sd.card_size_bytes() {
                    defmt::info!("sd: {} MiB", bytes / (1024 * 1024));
                }
                registry.add_item(HardwareItem::new(HwType::SdCard, ConnType::Spi, "sd@spi0"));
                Some(sd)
            }
            Err(e) => {
                defmt::error!("sd init failed: {}", defmt::Debug2Format(&e));
                None
            }
        }
    } else {
        None
    };

    if hw.radio.enabled {
        registry.add_item(HardwareItem::new(HwType::Radio, ConnType::Uart, "esp32@uart1"));
    }

    // 7. Session metadata defaults
    META.lock(|m| {
        *m.borrow_mut() = SessionMetadata::new(
            app.session.name,
            app.session.driver,
            app.session.vehicle,
            app.session.weather,
            app.session.ambient_temp_c,
        );
    });

    let hw_items: heapless::Vec<HardwareItem, 8> =
        heapless::Vec::from_slice(registry.items()).unwrap_or_default();
    let ring: &'static Ring = RING.init(SampleRing::new());
    let registry: &'static mut Registry<'static> = REGISTRY.init(registry);

    // 8. Storage runs alone on core 1
    spawn_core1(p.CORE1, CORE1_STACK.init(Stack::new()), move || {
        let executor1 = EXECUTOR1.init(Executor::new());
        executor1.run(|spawner| {
            spawner.must_spawn(tasks::storage::storage_task(
                sd,
                ring,
                &STATUS,
                &META,
                app,
                hw_items,
                FILE_REQ.receiver(),
                FILE_REPLY.sender(),
            ));
        })
    });

    // 9. Radio UART1 @ 115200 to the WiFi co-processor
    let mut radio_cfg = uart::Config::default();
    radio_cfg.baudrate = hw.uart_radio.baud;
    let radio = BufferedUart::new(
        p.UART1,
        Irqs,
        p.PIN_8,
        p.PIN_9,
        RADIO_TX_BUF.init([0; 512]),
        RADIO_RX_BUF.init([0; 512]),
        radio_cfg,
    );
    let (radio_rx, radio_tx) = radio.split();

    // 10. Core 0 tasks: acquisition, telemetry, link, display
    let accel_period_us = 1_000_000 / hw.accelerometer.sample_rate_hz.max(1) as u64;
    let gps_period_us = hw.gps.update_rate_ms.max(1) as u64 * 1_000;
    spawner.must_spawn(tasks::acquisition::acquisition_task(
        registry,
        ring,
        &STATUS,
        MOTION_CHAN.sender(),
        GPS_CHAN.sender(),
        app,
        accel_period_us,
        gps_period_us,
    ));
    spawner.must_spawn(tasks::telemetry::telemetry_task(
        &STATUS,
        MOTION_CHAN.receiver(),
        GPS_CHAN.receiver(),
        SNAPSHOT_CHAN.sender(),
        &WS_LINES,
        app,
    ));
    spawner.must_spawn(tasks::esp_link::esp_link_task(
        radio_rx,
        radio_tx,
        &STATUS,
        &META,
        &WS_LINES,
        FILE_REQ.sender(),
        FILE_REPLY.receiver(),
        app,
    ));
    spawner.must_spawn(tasks::display::display_task(
        NULL_PANEL.init(NullPanel),
        SNAPSHOT_CHAN.receiver(),
    ));

    // 11. Main loop: LED patterns + watchdog guard.
    //     Long blink = fix, short blink = no fix, solid = storage fault.
    let mut watchdog = Watchdog::new(p.WATCHDOG);
    watchdog.start(Duration::from_millis(2_000));
    let mut led = Output::new(p.PIN_13, Level::Low);
    let mut phase = 0u32;
    let mut healthy = true;

    loop {
        phase = (phase + 1) % 10;
        let lit = match STATUS.state() {
            SessionState::Faulted => true,
            _ => {
                if GPS_HAS_FIX.load(Ordering::Relaxed) {
                    phase < 7
                } else {
                    phase < 1
                }
            }
        };
        led.set_level(if lit { Level::High } else { Level::Low });

        if phase == 0 {
            healthy = ACQ_ALIVE.swap(false, Ordering::Relaxed)
                && STORAGE_ALIVE.swap(false, Ordering::Relaxed);
            if !healthy {
                defmt::error!("task heartbeat missing, watchdog will reset");
            }
        }
        if healthy {
            watchdog.feed();
        }
        Timer::after_millis(100).await;
    }
}
