//! FINS response parsing, validation, and payload extraction.
//!
//! A FINS response is the 10-byte header, the echoed two command bytes, a
//! two-byte end code, and the payload. Validation runs in wire order:
//! length, header start byte, command echo, sub-code table membership,
//! service-ID echo, network-relay bit, end code. Only then are the typed
//! payload extractors safe to call.

use chrono::{NaiveDate, NaiveDateTime};

use crate::bcd;
use crate::command::{is_known_subcode, FinsCommand};
use crate::error::{EchoField, FinsError, Result};
use crate::header::{is_response_start, FinsHeader, FINS_HEADER_SIZE};

/// Minimum response size: header (10) + command echo (2) + end code (2).
pub const MIN_RESPONSE_SIZE: usize = FINS_HEADER_SIZE + 4;

/// The PLC clock as read from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    /// Calendar date and time.
    pub datetime: NaiveDateTime,
    /// Day of week, 0 = Sunday.
    pub day_of_week: u8,
}

/// Controller identification returned by CPU Unit Data Read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerData {
    /// Controller model string, e.g. `"NJ501-1300"`.
    pub model: String,
    /// Controller firmware version string.
    pub version: String,
}

/// PLC scan cycle times in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleTime {
    /// Average cycle time.
    pub average_ms: f64,
    /// Maximum cycle time.
    pub maximum_ms: f64,
    /// Minimum cycle time.
    pub minimum_ms: f64,
}

/// Parsed and validated FINS response.
#[derive(Debug, Clone)]
pub struct FinsResponse {
    /// Response header.
    pub header: FinsHeader,
    /// Echoed main request code.
    pub mrc: u8,
    /// Echoed sub request code.
    pub src: u8,
    /// Main end code (bits 0-6 of end-code byte 0).
    pub main_code: u8,
    /// Sub end code (bits 0-5 of end-code byte 1).
    pub sub_code: u8,
    /// Response payload.
    pub data: Vec<u8>,
}

impl FinsResponse {
    /// Parses and validates a raw FINS response against its originating
    /// request and expected service ID.
    ///
    /// # Errors
    ///
    /// - `ProtocolFraming` - short message, bad start byte, or a sub code
    ///   outside its function group's enumeration
    /// - `ProtocolEcho` - command, sub-command, or service-ID mismatch
    /// - `NetworkRelay` - relay bit set in the end code
    /// - `Fins` - non-zero end code
    pub fn parse(bytes: &[u8], request: &FinsCommand, expected_sid: u8) -> Result<Self> {
        if bytes.len() < MIN_RESPONSE_SIZE {
            return Err(FinsError::framing(format!(
                "response too short: expected at least {} bytes, got {}",
                MIN_RESPONSE_SIZE,
                bytes.len()
            )));
        }
        if !is_response_start(bytes[0]) {
            return Err(FinsError::framing(format!(
                "invalid FINS header start byte 0x{:02X}",
                bytes[0]
            )));
        }

        let header = FinsHeader::from_bytes(&bytes[..FINS_HEADER_SIZE])?;
        let mrc = bytes[FINS_HEADER_SIZE];
        let src = bytes[FINS_HEADER_SIZE + 1];

        if mrc != request.mrc() {
            return Err(FinsError::echo_mismatch(EchoField::Command, request.mrc(), mrc));
        }
        if src != request.src() {
            return Err(FinsError::echo_mismatch(
                EchoField::SubCommand,
                request.src(),
                src,
            ));
        }
        if !is_known_subcode(mrc, src) {
            return Err(FinsError::framing(format!(
                "sub code 0x{:02X} is not defined for function 0x{:02X}",
                src, mrc
            )));
        }
        if header.sid != expected_sid {
            return Err(FinsError::echo_mismatch(
                EchoField::ServiceId,
                expected_sid,
                header.sid,
            ));
        }

        let code0 = bytes[FINS_HEADER_SIZE + 2];
        let code1 = bytes[FINS_HEADER_SIZE + 3];
        if code0 & 0x80 != 0 {
            return Err(FinsError::NetworkRelay);
        }
        let main_code = code0 & 0x7F;
        let sub_code = code1 & 0x3F;
        if (main_code, sub_code) != (0, 0) {
            return Err(FinsError::fins(main_code, sub_code));
        }

        Ok(Self {
            header,
            mrc,
            src,
            main_code,
            sub_code,
            data: bytes[MIN_RESPONSE_SIZE..].to_vec(),
        })
    }

    /// Deserializes the payload as big-endian signed 16-bit words.
    pub fn words(&self) -> Result<Vec<i16>> {
        if self.data.len() % 2 != 0 {
            return Err(FinsError::framing(
                "word payload length must be even".to_string(),
            ));
        }
        Ok(self
            .data
            .chunks_exact(2)
            .map(|chunk| i16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }

    /// Deserializes the payload as bit values, one byte per bit.
    pub fn bits(&self) -> Result<Vec<bool>> {
        if self.data.is_empty() {
            return Err(FinsError::framing("empty bit payload".to_string()));
        }
        Ok(self.data.iter().map(|&b| b != 0).collect())
    }

    /// Deserializes the payload as a single bit value.
    pub fn bit(&self) -> Result<bool> {
        Ok(*self.bits()?.first().expect("bits() rejects empty payloads"))
    }

    /// Decodes a Clock Read payload: seven BCD bytes, two-digit year.
    ///
    /// Years below 70 land in 2000-2069, 70-99 in 1970-1999; anything the
    /// BCD nibbles push to 100 or beyond is malformed.
    pub fn clock(&self) -> Result<ClockReading> {
        if self.data.len() < 7 {
            return Err(FinsError::framing(format!(
                "clock payload needs 7 bytes, got {}",
                self.data.len()
            )));
        }
        let yy = bcd::bcd_to_u8(&self.data[..1])?;
        let year = match yy {
            0..=69 => 2000 + i32::from(yy),
            70..=99 => 1900 + i32::from(yy),
            _ => {
                return Err(FinsError::framing(format!(
                    "clock year byte decodes to {}",
                    yy
                )))
            }
        };
        let month = bcd::bcd_to_u8(&self.data[1..2])?;
        let day = bcd::bcd_to_u8(&self.data[2..3])?;
        let hour = bcd::bcd_to_u8(&self.data[3..4])?;
        let minute = bcd::bcd_to_u8(&self.data[4..5])?;
        let second = bcd::bcd_to_u8(&self.data[5..6])?;
        let day_of_week = bcd::bcd_to_u8(&self.data[6..7])?;

        let datetime = NaiveDate::from_ymd_opt(year, u32::from(month), u32::from(day))
            .and_then(|d| d.and_hms_opt(u32::from(hour), u32::from(minute), u32::from(second)))
            .ok_or_else(|| {
                FinsError::framing(format!(
                    "clock fields out of range: {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                ))
            })?;

        Ok(ClockReading {
            datetime,
            day_of_week,
        })
    }

    /// Decodes a CPU Unit Data Read payload: 20 model bytes and 20 version
    /// bytes, both NUL-terminated ASCII, followed by 40 reserved bytes and
    /// 12 area bytes.
    pub fn controller_data(&self) -> Result<ControllerData> {
        if self.data.len() < 40 {
            return Err(FinsError::framing(format!(
                "controller data payload needs at least 40 bytes, got {}",
                self.data.len()
            )));
        }
        Ok(ControllerData {
            model: ascii_until_nul(&self.data[..20]),
            version: ascii_until_nul(&self.data[20..40]),
        })
    }

    /// Decodes a Cycle Time Read payload: three 4-byte BCD groups
    /// (average, maximum, minimum) in tenths of a millisecond.
    pub fn cycle_time(&self) -> Result<CycleTime> {
        if self.data.len() < 12 {
            return Err(FinsError::framing(format!(
                "cycle time payload needs 12 bytes, got {}",
                self.data.len()
            )));
        }
        let average = bcd::bcd_to_u32(&self.data[..4])?;
        let maximum = bcd::bcd_to_u32(&self.data[4..8])?;
        let minimum = bcd::bcd_to_u32(&self.data[8..12])?;
        Ok(CycleTime {
            average_ms: f64::from(average) / 10.0,
            maximum_ms: f64::from(maximum) / 10.0,
            minimum_ms: f64::from(minimum) / 10.0,
        })
    }
}

fn ascii_until_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}
