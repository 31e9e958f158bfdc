//! SD card over SPI: embedded-sdmmc wiring and the session directory.

use embassy_rp::gpio::Output;
use embassy_rp::peripherals::SPI0;
use embassy_rp::spi::{Blocking, Spi};
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::{
    Mode, RawDirectory, RawFile, SdCard, TimeSource, Timestamp, VolumeIdx, VolumeManager,
};

use opl_core::session::parse_session_number;
use opl_core::status::SessionStatus;

pub type SdSpiDevice = ExclusiveDevice<Spi<'static, SPI0, Blocking>, Output<'static>, Delay>;
pub type SdError = embedded_sdmmc::Error<embedded_sdmmc::SdCardError>;

type Vm = VolumeManager<SdCard<SdSpiDevice, Delay>, WallclockTimeSource>;

/// FAT timestamps come from the synced wallclock; before the first sync they
/// pin to a fixed date rather than counting from power-on.
pub struct WallclockTimeSource {
    pub status: &'static SessionStatus,
}

impl TimeSource for WallclockTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        let now_us = embassy_time::Instant::now().as_micros();
        if let Some(wall_us) = self.status.wallclock_us(now_us) {
            if let Ok(dt) =
                time::OffsetDateTime::from_unix_timestamp((wall_us / 1_000_000) as i64)
            {
                return Timestamp {
                    year_since_1970: (dt.year() - 1970) as u8,
                    zero_indexed_month: dt.month() as u8 - 1,
                    zero_indexed_day: dt.day() - 1,
                    hours: dt.hour(),
                    minutes: dt.minute(),
                    seconds: dt.second(),
                };
            }
        }
        Timestamp {
            year_since_1970: 54,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// One session file on the card.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub name: heapless::String<17>,
    pub size: u32,
    pub number: u32,
}

pub struct SdStorage {
    vm: Vm,
    root: RawDirectory,
}

impl SdStorage {
    pub fn new(spi: SdSpiDevice, clock: WallclockTimeSource) -> Result<Self, SdError> {
        let card = SdCard::new(spi, Delay);
        let mut vm = VolumeManager::new(card, clock);
        let volume = vm.open_raw_volume(VolumeIdx(0))?;
        let root = vm.open_root_dir(volume)?;
        Ok(Self { vm, root })
    }

    pub fn card_size_bytes(&mut self) -> Option<u64> {
        self.vm.device().num_bytes().ok()
    }

    /// Every `session_NNNNN.*` in the root directory.
    pub fn list_sessions(&mut self) -> heapless::Vec<SessionEntry, 16> {
        let mut out: heapless::Vec<SessionEntry, 16> = heapless::Vec::new();
        let _ = self.vm.iterate_dir(self.root, |entry| {
            let mut name: heapless::String<17> = heapless::String::new();
            for &b in entry.name.base_name() {
                let _ = name.push(b as char);
            }
            if !entry.name.extension().is_empty() {
                let _ = name.push('.');
                for &b in entry.name.extension() {
                    let _ = name.push(b as char);
                }
            }
            if let Some(number) = parse_session_number(name.as_str()) {
                let _ = out.push(SessionEntry { name, size: entry.size, number });
            }
        });
        out
    }

    pub fn next_session_number(&mut self) -> u32 {
        let entries = self.list_sessions();
        opl_core::session::next_session_number(entries.iter().map(|e| e.name.as_str()))
    }

    pub fn create(&mut self, name: &str) -> Result<RawFile, SdError> {
        self.vm.open_file_in_dir(self.root, name, Mode::ReadWriteCreateOrTruncate)
    }

    pub fn open_read(&mut self, name: &str) -> Result<RawFile, SdError> {
        self.vm.open_file_in_dir(self.root, name, Mode::ReadOnly)
    }

    pub fn append(&mut self, file: RawFile, bytes: &[u8]) -> Result<(), SdError> {
        self.vm.write(file, bytes)
    }

    pub fn flush(&mut self, file: RawFile) -> Result<(), SdError> {
        self.vm.flush_file(file)
    }

    pub fn read(&mut self, file: RawFile, buf: &mut [u8]) -> Result<usize, SdError> {
        self.vm.read(file, buf)
    }

    pub fn file_size(&mut self, file: RawFile) -> Result<u32, SdError> {
        self.vm.file_length(file)
    }

    pub fn stat(&mut self, name: &str) -> Option<u32> {
        self.vm.find_directory_entry(self.root, name).ok().map(|e| e.size)
    }

    pub fn close(&mut self, file: RawFile) {
        let _ = self.vm.close_file(file);
    }
}
