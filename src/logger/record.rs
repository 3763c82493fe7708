//! CSV records and file names.

use core::fmt::Write;

use heapless::String;

/// Longest record we format, in bytes.
pub const RECORD_CAPACITY: usize = 96;

/// Longest 8.3 file name, in bytes.
pub const FILE_NAME_CAPACITY: usize = 12;

/// One formatted CSV line.
pub type Record = String<RECORD_CAPACITY>;

/// A file name from [`FileNaming`].
pub type FileName = String<FILE_NAME_CAPACITY>;

/// Wall-clock time of day, as read from the RTC.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
}

impl Timestamp {
    pub const fn new(hours: u8, minutes: u8, seconds: u8) -> Self {
        Self {
            hours,
            minutes,
            seconds,
        }
    }
}

/// One set of compensated sensor readings.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Measurement {
    /// degrees Celsius
    pub temperature: f32,
    /// hPa
    pub pressure: f32,
    /// % relative humidity
    pub humidity: f32,
    /// lux, when a light sensor is fitted
    pub light: Option<f32>,
}

/// The first line of every log file.
pub fn header_line(light_column: bool) -> &'static str {
    if light_column {
        "time,temperature,pressure,humidity,light\n"
    } else {
        "time,temperature,pressure,humidity\n"
    }
}

/// Render `HH:MM:SS,t,p,h[,l]\n` with two decimals per value. A light column
/// without a reading is left empty.
pub fn format_record(
    time: &Timestamp,
    measurement: &Measurement,
    light_column: bool,
) -> Result<Record, core::fmt::Error> {
    let mut record = Record::new();
    write!(
        record,
        "{:02}:{:02}:{:02},{:.2},{:.2},{:.2}",
        time.hours,
        time.minutes,
        time.seconds,
        measurement.temperature,
        measurement.pressure,
        measurement.humidity
    )?;
    if light_column {
        match measurement.light {
            Some(light) => write!(record, ",{:.2}", light)?,
            None => record.write_char(',')?,
        }
    }
    record.write_char('\n')?;
    Ok(record)
}

/// How a session picks its file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileNaming {
    /// Always the same file
    Fixed(&'static str),
    /// `HHMMLOG.TXT` from the time the session starts
    TimeOfDay,
}

impl FileNaming {
    pub fn file_name(&self, start: &Timestamp) -> Result<FileName, core::fmt::Error> {
        let mut name = FileName::new();
        match self {
            FileNaming::Fixed(fixed) => name.write_str(fixed)?,
            FileNaming::TimeOfDay => write!(name, "{:02}{:02}LOG.TXT", start.hours, start.minutes)?,
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records() {
        let time = Timestamp::new(9, 5, 7);
        let reading = Measurement {
            temperature: 21.456,
            pressure: 1013.25,
            humidity: 40.0,
            light: None,
        };
        assert_eq!(
            format_record(&time, &reading, false).unwrap().as_str(),
            "09:05:07,21.46,1013.25,40.00\n"
        );
        assert_eq!(
            format_record(&time, &reading, true).unwrap().as_str(),
            "09:05:07,21.46,1013.25,40.00,\n"
        );
        let lit = Measurement {
            temperature: -3.5,
            light: Some(120.0),
            ..reading
        };
        assert_eq!(
            format_record(&time, &lit, true).unwrap().as_str(),
            "09:05:07,-3.50,1013.25,40.00,120.00\n"
        );
    }

    #[test]
    fn unprintable_values_do_not_fit() {
        let huge = Measurement {
            temperature: f32::MAX,
            pressure: f32::MAX,
            humidity: f32::MAX,
            light: None,
        };
        assert!(format_record(&Timestamp::default(), &huge, false).is_err());
    }

    #[test]
    fn headers() {
        assert_eq!(header_line(false), "time,temperature,pressure,humidity\n");
        assert_eq!(
            header_line(true),
            "time,temperature,pressure,humidity,light\n"
        );
    }

    #[test]
    fn file_names() {
        let start = Timestamp::new(7, 3, 59);
        assert_eq!(
            FileNaming::TimeOfDay.file_name(&start).unwrap().as_str(),
            "0703LOG.TXT"
        );
        assert_eq!(
            FileNaming::Fixed("DATA.CSV").file_name(&start).unwrap().as_str(),
            "DATA.CSV"
        );
        assert!(FileNaming::Fixed("MUCH_TOO_LONG.TXT")
            .file_name(&start)
            .is_err());
    }
}
