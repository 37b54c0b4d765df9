//! Telemetry payload.
//!
//! One reading is published as a flat JSON object:
//!
//! ```text
//! {"device_id":"0002","temperature":23.40,"timestamp":"2024-05-01 14:36:07","minutes":"36"}
//! ```
//!
//! `timestamp` and `minutes` are local time at a fixed offset from UTC.

use core::fmt::{self, Write};

use crate::time::LocalDateTime;

/// Capacity of an encoded telemetry payload.
pub const MAX_TELEMETRY_LEN: usize = 256;

/// A single temperature reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry<'a> {
    pub device_id: &'a str,
    /// Degrees Celsius.
    pub temperature: f32,
    pub local_time: LocalDateTime,
}

impl<'a> Telemetry<'a> {
    /// A reading taken at `unix_secs`, reported in the `utc_offset_secs` zone.
    pub fn new(device_id: &'a str, temperature: f32, unix_secs: u64, utc_offset_secs: i32) -> Self {
        Self {
            device_id,
            temperature,
            local_time: LocalDateTime::from_unix(unix_secs, utc_offset_secs),
        }
    }

    pub fn encode<W: Write>(&self, out: &mut W) -> fmt::Result {
        out.write_str(r#"{"device_id":""#)?;
        write_escaped(out, self.device_id)?;
        out.write_str(r#"","temperature":"#)?;
        if self.temperature.is_finite() {
            write!(out, "{:.2}", self.temperature)?;
        } else {
            out.write_str("null")?;
        }
        write!(
            out,
            r#","timestamp":"{}","minutes":"{:02}"}}"#,
            self.local_time, self.local_time.minute
        )
    }
}

fn write_escaped<W: Write>(out: &mut W, value: &str) -> fmt::Result {
    for c in value.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            c if c.is_control() => write!(out, "\\u{:04x}", c as u32)?,
            c => out.write_char(c)?,
        }
    }
    Ok(())
}

/// Converts a 10-bit ADC reading of an analog temperature sensor
/// (10 mV/°C, 500 mV offset) to degrees Celsius.
pub fn celsius_from_adc(raw: u16) -> f32 {
    let volts = f32::from(raw) / 1023.0;
    (volts - 0.5) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::String;

    fn encode(telemetry: &Telemetry<'_>) -> String<MAX_TELEMETRY_LEN> {
        let mut out = String::new();
        telemetry.encode(&mut out).unwrap();
        out
    }

    #[test]
    fn encodes_reading_in_local_time() {
        // 2017-11-14 07:36:07 UTC, reported at UTC+7.
        let reading = Telemetry::new("0002", 23.4, 1_510_644_967, 25_200);
        assert_eq!(
            encode(&reading).as_str(),
            r#"{"device_id":"0002","temperature":23.40,"timestamp":"2017-11-14 14:36:07","minutes":"36"}"#
        );
    }

    #[test]
    fn minutes_are_zero_padded() {
        let reading = Telemetry::new("n", -5.0, 1_510_642_920, 0);
        assert_eq!(
            encode(&reading).as_str(),
            r#"{"device_id":"n","temperature":-5.00,"timestamp":"2017-11-14 07:02:00","minutes":"02"}"#
        );
    }

    #[test]
    fn non_finite_temperature_is_null() {
        let reading = Telemetry::new("n", f32::NAN, 0, 0);
        assert!(encode(&reading).contains(r#""temperature":null,"#));
    }

    #[test]
    fn device_id_is_escaped() {
        let reading = Telemetry::new("a\"b", 0.0, 0, 0);
        assert!(encode(&reading).starts_with(r#"{"device_id":"a\"b","#));
    }

    #[test]
    fn adc_conversion() {
        assert_eq!(celsius_from_adc(0), -50.0);
        assert_eq!(celsius_from_adc(1023), 50.0);
        let mid = celsius_from_adc(512);
        assert!((mid - 0.0489).abs() < 0.001);
    }
}
