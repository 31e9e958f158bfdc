//! Plain-text session sheet, used when `log_format = "csv"`.
//!
//! Lossier and fatter than the binary container but opens straight in a
//! spreadsheet; the trade is the operator's to make per config.

use core::fmt::Write;

use crate::opl::writer::BlockSink;
use crate::opl::SessionMetadata;
use crate::sample::Vec3;

/// One spreadsheet row: the latest accel sample joined with the latest fix.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvRow {
    pub timestamp_s: f64,
    pub accel_g: Vec3,
    pub lat: f64,
    pub lon: f64,
    pub alt_m: f32,
    pub speed_ms: f32,
    pub sats: u8,
    pub hdop: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CsvError<E> {
    Format,
    Storage(E),
}

fn append_line<S: BlockSink>(
    sink: &mut S,
    line: &heapless::String<192>,
) -> Result<(), CsvError<S::Error>> {
    sink.append(line.as_bytes()).map_err(CsvError::Storage)
}

/// Comment header plus the column row.
pub fn write_header<S: BlockSink>(
    sink: &mut S,
    meta: &SessionMetadata,
    start_epoch_s: i64,
) -> Result<(), CsvError<S::Error>> {
    let mut line: heapless::String<192> = heapless::String::new();
    write!(line, "# Driver: {}\n# VIN: {}\n", meta.driver, meta.vehicle)
        .map_err(|_| CsvError::Format)?;
    append_line(sink, &line)?;

    line.clear();
    match time::OffsetDateTime::from_unix_timestamp(start_epoch_s) {
        Ok(dt) => write!(
            line,
            "# Start: {:04}-{:02}-{:02} {:02}:{:02}:{:02} UTC\n",
            dt.year(),
            dt.month() as u8,
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second()
        )
        .map_err(|_| CsvError::Format)?,
        Err(_) => write!(line, "# Start: unknown\n").map_err(|_| CsvError::Format)?,
    }
    append_line(sink, &line)?;

    line.clear();
    write!(line, "timestamp,gx,gy,gz,g_total,lat,lon,alt,speed,sats,hdop\n")
        .map_err(|_| CsvError::Format)?;
    append_line(sink, &line)
}

pub fn write_row<S: BlockSink>(sink: &mut S, row: &CsvRow) -> Result<(), CsvError<S::Error>> {
    let mut line: heapless::String<192> = heapless::String::new();
    write!(
        line,
        "{:.3},{:.4},{:.4},{:.4},{:.4},{:.6},{:.6},{:.1},{:.2},{},{:.1}\n",
        row.timestamp_s,
        row.accel_g.x,
        row.accel_g.y,
        row.accel_g.z,
        row.accel_g.magnitude(),
        row.lat,
        row.lon,
        row.alt_m,
        row.speed_ms,
        row.sats,
        row.hdop
    )
    .map_err(|_| CsvError::Format)?;
    append_line(sink, &line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opl::Weather;

    struct StringSink(std::string::String);

    impl BlockSink for StringSink {
        type Error = ();

        fn append(&mut self, bytes: &[u8]) -> Result<(), ()> {
            self.0.push_str(core::str::from_utf8(bytes).unwrap());
            Ok(())
        }

        fn sync(&mut self) -> Result<(), ()> {
            Ok(())
        }
    }

    #[test]
    fn sheet_shape() {
        let mut sink = StringSink(std::string::String::new());
        let meta = SessionMetadata::new("Track Day", "John", "1FA6P8CF", Weather::Clear, 18.5);
        write_header(&mut sink, &meta, 1_711_214_894).unwrap();
        write_row(
            &mut sink,
            &CsvRow {
                timestamp_s: 1_711_214_894.5,
                accel_g: Vec3::new(0.0, 0.0, 1.0),
                lat: 48.1173,
                lon: 11.5166,
                alt_m: 545.4,
                speed_ms: 5.1,
                sats: 8,
                hdop: 0.9,
            },
        )
        .unwrap();

        let text = sink.0;
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("# Driver: John"));
        assert_eq!(lines.next(), Some("# VIN: 1FA6P8CF"));
        assert_eq!(lines.next(), Some("# Start: 2024-03-23 17:28:14 UTC"));
        assert_eq!(
            lines.next(),
            Some("timestamp,gx,gy,gz,g_total,lat,lon,alt,speed,sats,hdop")
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("1711214894.500,"));
        assert!(row.contains(",48.117300,"));
        assert!(row.ends_with(",8,0.9"));
    }
}
