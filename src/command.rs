//! FINS command construction and serialization.
//!
//! A [`FinsCommand`] carries the two request-code bytes and the payload of
//! one FINS request. The 10-byte header is prepended at send time by the
//! channel, because over FINS/TCP the node addresses are only known after
//! the node-address handshake and the service ID rotates per exchange.
//!
//! Payload layouts follow the FINS command reference: multi-byte integers
//! are big-endian throughout.

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::bcd;
use crate::header::FinsHeader;
use crate::memory::MemoryArea;

/// Memory Area function code.
pub(crate) const MRC_MEMORY_AREA: u8 = 0x01;
/// Parameter Area function code.
pub(crate) const MRC_PARAMETER_AREA: u8 = 0x02;
/// Program Area function code.
pub(crate) const MRC_PROGRAM_AREA: u8 = 0x03;
/// Operating Mode function code.
pub(crate) const MRC_OPERATING_MODE: u8 = 0x04;
/// Machine Configuration function code.
pub(crate) const MRC_MACHINE_CONFIG: u8 = 0x05;
/// Status function code.
pub(crate) const MRC_STATUS: u8 = 0x06;
/// Time Data function code.
pub(crate) const MRC_TIME_DATA: u8 = 0x07;
/// Message Display function code.
pub(crate) const MRC_MESSAGE_DISPLAY: u8 = 0x09;
/// Access Rights function code.
pub(crate) const MRC_ACCESS_RIGHTS: u8 = 0x0C;
/// Error Log function code, shared with the FINS write-access log.
pub(crate) const MRC_ERROR_LOG: u8 = 0x21;
/// File Memory function code.
pub(crate) const MRC_FILE_MEMORY: u8 = 0x22;
/// Debugging (forced set/reset) function code.
pub(crate) const MRC_DEBUGGING: u8 = 0x23;
/// Serial Gateway function code.
pub(crate) const MRC_SERIAL_GATEWAY: u8 = 0x28;

/// Memory Area Read sub code.
pub(crate) const SRC_MEMORY_READ: u8 = 0x01;
/// Memory Area Write sub code.
pub(crate) const SRC_MEMORY_WRITE: u8 = 0x02;
/// CPU Unit Data Read sub code.
pub(crate) const SRC_CPU_DATA_READ: u8 = 0x01;
/// Clock Read sub code.
pub(crate) const SRC_CLOCK_READ: u8 = 0x01;
/// Clock Write sub code.
pub(crate) const SRC_CLOCK_WRITE: u8 = 0x02;
/// Cycle Time Read sub code.
pub(crate) const SRC_CYCLE_TIME: u8 = 0x20;

/// Returns whether a sub code belongs to the closed enumeration of its
/// function group. Function code `0x21` is overloaded between the error
/// log and the FINS write-access log; either group's codes are accepted.
pub(crate) fn is_known_subcode(mrc: u8, src: u8) -> bool {
    match mrc {
        // Read, Write, Fill, MultipleRead, Transfer
        MRC_MEMORY_AREA => (0x01..=0x05).contains(&src),
        // Read, Write, Fill
        MRC_PARAMETER_AREA => (0x01..=0x03).contains(&src),
        // Read, Write, Clear
        MRC_PROGRAM_AREA => (0x06..=0x08).contains(&src),
        // Run, Stop
        MRC_OPERATING_MODE => matches!(src, 0x01 | 0x02),
        // CPU Unit Data Read, Connection Data Read
        MRC_MACHINE_CONFIG => matches!(src, 0x01 | 0x02),
        // CPU Unit Status Read, Cycle Time Read
        MRC_STATUS => matches!(src, 0x01 | 0x20),
        // Clock Read, Clock Write
        MRC_TIME_DATA => matches!(src, 0x01 | 0x02),
        // Message Read/Clear
        MRC_MESSAGE_DISPLAY => src == 0x20,
        // Acquire, Forced Acquire, Release
        MRC_ACCESS_RIGHTS => (0x01..=0x03).contains(&src),
        // Error log: Clear, Read, Log Clear; write-access log: Read, Clear
        MRC_ERROR_LOG => matches!(src, 0x01..=0x03 | 0x40 | 0x41),
        MRC_FILE_MEMORY => matches!(
            src,
            0x01..=0x05 | 0x07 | 0x08 | 0x0A..=0x0C | 0x15
        ),
        // Forced Set/Reset, Forced Set/Reset Cancel
        MRC_DEBUGGING => matches!(src, 0x01 | 0x02),
        // CompoWay/F, Modbus RTU, Modbus ASCII conversion
        MRC_SERIAL_GATEWAY => matches!(src, 0x03..=0x05),
        _ => false,
    }
}

/// One FINS request: the two command bytes plus the serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinsCommand {
    mrc: u8,
    src: u8,
    payload: Vec<u8>,
}

impl FinsCommand {
    /// Memory Area Read for `count` words starting at `word`.
    ///
    /// Payload: `[areaCode, addrHi, addrLo, 0x00, lenHi, lenLo]`.
    pub fn read_words(area: MemoryArea, word: u16, count: u16) -> Self {
        let mut payload = Vec::with_capacity(6);
        payload.push(area.word_code());
        payload.extend_from_slice(&word.to_be_bytes());
        payload.push(0x00);
        payload.extend_from_slice(&count.to_be_bytes());
        Self {
            mrc: MRC_MEMORY_AREA,
            src: SRC_MEMORY_READ,
            payload,
        }
    }

    /// Memory Area Read for `count` bits starting at `word`.`bit`.
    ///
    /// Payload: `[areaCode, addrHi, addrLo, bit, lenHi, lenLo]`.
    pub fn read_bits(area: MemoryArea, word: u16, bit: u8, count: u16) -> Self {
        let mut payload = Vec::with_capacity(6);
        payload.push(area.bit_code());
        payload.extend_from_slice(&word.to_be_bytes());
        payload.push(bit);
        payload.extend_from_slice(&count.to_be_bytes());
        Self {
            mrc: MRC_MEMORY_AREA,
            src: SRC_MEMORY_READ,
            payload,
        }
    }

    /// Memory Area Write of consecutive words, each big-endian on the wire.
    pub fn write_words(area: MemoryArea, word: u16, values: &[u16]) -> Self {
        let mut payload = Vec::with_capacity(6 + values.len() * 2);
        payload.push(area.word_code());
        payload.extend_from_slice(&word.to_be_bytes());
        payload.push(0x00);
        payload.extend_from_slice(&(values.len() as u16).to_be_bytes());
        for value in values {
            payload.extend_from_slice(&value.to_be_bytes());
        }
        Self {
            mrc: MRC_MEMORY_AREA,
            src: SRC_MEMORY_WRITE,
            payload,
        }
    }

    /// Memory Area Write of consecutive bits, one byte per bit.
    pub fn write_bits(area: MemoryArea, word: u16, bit: u8, values: &[bool]) -> Self {
        let mut payload = Vec::with_capacity(6 + values.len());
        payload.push(area.bit_code());
        payload.extend_from_slice(&word.to_be_bytes());
        payload.push(bit);
        payload.extend_from_slice(&(values.len() as u16).to_be_bytes());
        for value in values {
            payload.push(if *value { 0x01 } else { 0x00 });
        }
        Self {
            mrc: MRC_MEMORY_AREA,
            src: SRC_MEMORY_WRITE,
            payload,
        }
    }

    /// CPU Unit Data Read (controller model and version).
    pub fn controller_data_read() -> Self {
        Self {
            mrc: MRC_MACHINE_CONFIG,
            src: SRC_CPU_DATA_READ,
            payload: vec![0x00],
        }
    }

    /// Clock Read.
    pub fn clock_read() -> Self {
        Self {
            mrc: MRC_TIME_DATA,
            src: SRC_CLOCK_READ,
            payload: Vec::new(),
        }
    }

    /// Clock Write from a date-time plus an explicit day of week (0 =
    /// Sunday). Seven BCD bytes: `year % 100`, month, day, hour, minute,
    /// second, day of week.
    pub fn clock_write(datetime: &NaiveDateTime, day_of_week: u8) -> Self {
        let payload = vec![
            bcd::u8_to_bcd((datetime.year() % 100) as u8)[0],
            bcd::u8_to_bcd(datetime.month() as u8)[0],
            bcd::u8_to_bcd(datetime.day() as u8)[0],
            bcd::u8_to_bcd(datetime.hour() as u8)[0],
            bcd::u8_to_bcd(datetime.minute() as u8)[0],
            bcd::u8_to_bcd(datetime.second() as u8)[0],
            bcd::u8_to_bcd(day_of_week)[0],
        ];
        Self {
            mrc: MRC_TIME_DATA,
            src: SRC_CLOCK_WRITE,
            payload,
        }
    }

    /// Cycle Time Read.
    pub fn cycle_time_read() -> Self {
        Self {
            mrc: MRC_STATUS,
            src: SRC_CYCLE_TIME,
            payload: vec![0x01],
        }
    }

    /// Returns the main request code.
    pub fn mrc(&self) -> u8 {
        self.mrc
    }

    /// Returns the sub request code.
    pub fn src(&self) -> u8 {
        self.src
    }

    /// Serializes the full FINS message: header, command bytes, payload.
    pub fn encode(&self, local_node: u8, remote_node: u8, sid: u8) -> Vec<u8> {
        let header = FinsHeader::command(local_node, remote_node, sid);
        let mut bytes = Vec::with_capacity(12 + self.payload.len());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.push(self.mrc);
        bytes.push(self.src);
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}
