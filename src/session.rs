//! PLC session: lifecycle, controller identification, and validated
//! typed read/write operations.
//!
//! The session wraps one [`Channel`] and layers the capability table on
//! top of it. `initialize` runs once: it opens the channel, reads the CPU
//! unit data, and classifies the controller; every later operation checks
//! the init flag and validates its arguments against the detected model
//! before any bytes leave the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use tokio::sync::Mutex;
use tracing::info;

use crate::command::FinsCommand;
use crate::error::{FinsError, Result};
use crate::memory::MemoryArea;
use crate::model::PlcType;
use crate::response::{ClockReading, ControllerData, CycleTime};
use crate::transport::Channel;

/// Earliest date the PLC clock accepts.
const CLOCK_MIN: (i32, u32, u32) = (1998, 1, 1);
/// Latest date the PLC clock accepts.
const CLOCK_MAX: (i32, u32, u32) = (2069, 12, 31);

#[derive(Clone)]
struct SessionInfo {
    plc_type: PlcType,
    model: String,
    version: String,
}

/// A stateful session against one PLC.
pub(crate) struct PlcSession {
    channel: Channel,
    init_lock: Mutex<()>,
    initialized: AtomicBool,
    info: RwLock<Option<SessionInfo>>,
}

impl PlcSession {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            init_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
            info: RwLock::new(None),
        }
    }

    /// Opens the channel and identifies the controller. Idempotent; a
    /// second call after success returns immediately.
    pub async fn initialize(&self) -> Result<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        self.channel.connect().await?;
        let exchange = self
            .channel
            .transact(&FinsCommand::controller_data_read())
            .await?;
        let ControllerData { model, version } = exchange.response.controller_data()?;
        let plc_type = PlcType::from_model(&model);
        info!(%model, %version, plc = %plc_type, "controller identified");

        *self.info.write().expect("session info lock poisoned") = Some(SessionInfo {
            plc_type,
            model,
            version,
        });
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Detected controller family, `Unknown` before initialization.
    pub fn plc_type(&self) -> PlcType {
        self.info
            .read()
            .expect("session info lock poisoned")
            .as_ref()
            .map(|info| info.plc_type)
            .unwrap_or(PlcType::Unknown)
    }

    /// Controller model string, `None` before initialization.
    pub fn controller_model(&self) -> Option<String> {
        self.info
            .read()
            .expect("session info lock poisoned")
            .as_ref()
            .map(|info| info.model.clone())
    }

    /// Controller version string, `None` before initialization.
    pub fn controller_version(&self) -> Option<String> {
        self.info
            .read()
            .expect("session info lock poisoned")
            .as_ref()
            .map(|info| info.version.clone())
    }

    fn ensure_initialized(&self) -> Result<PlcType> {
        if !self.is_initialized() {
            return Err(FinsError::NotInitialized);
        }
        Ok(self.plc_type())
    }

    /// Reads `count` consecutive bits starting at `word`.`start_bit`.
    pub async fn read_bits(
        &self,
        area: MemoryArea,
        word: u16,
        start_bit: u8,
        count: u16,
    ) -> Result<Vec<bool>> {
        let plc = self.ensure_initialized()?;
        check_bit_window(start_bit, count)?;
        check_bit_area(plc, area)?;
        check_word_range(plc, area, word, 1)?;

        let exchange = self
            .channel
            .transact(&FinsCommand::read_bits(area, word, start_bit, count))
            .await?;
        exchange.response.bits()
    }

    /// Reads `count` consecutive words starting at `word`.
    pub async fn read_words(&self, area: MemoryArea, word: u16, count: u16) -> Result<Vec<i16>> {
        let plc = self.ensure_initialized()?;
        if count == 0 {
            return Err(FinsError::range_invalid("read length must be at least 1"));
        }
        if count > plc.max_read_words() {
            return Err(FinsError::range_invalid(format!(
                "read length {} exceeds {} limit of {}",
                count,
                plc,
                plc.max_read_words()
            )));
        }
        check_word_range(plc, area, word, count)?;

        let exchange = self
            .channel
            .transact(&FinsCommand::read_words(area, word, count))
            .await?;
        exchange.response.words()
    }

    /// Writes consecutive bits starting at `word`.`start_bit`.
    pub async fn write_bits(
        &self,
        area: MemoryArea,
        word: u16,
        start_bit: u8,
        values: &[bool],
    ) -> Result<()> {
        let plc = self.ensure_initialized()?;
        check_bit_window(start_bit, values.len() as u16)?;
        check_bit_area(plc, area)?;
        check_word_range(plc, area, word, 1)?;

        self.channel
            .transact(&FinsCommand::write_bits(area, word, start_bit, values))
            .await?;
        Ok(())
    }

    /// Writes consecutive words starting at `word`.
    pub async fn write_words(&self, area: MemoryArea, word: u16, values: &[u16]) -> Result<()> {
        let plc = self.ensure_initialized()?;
        if values.is_empty() {
            return Err(FinsError::range_invalid("write length must be at least 1"));
        }
        if values.len() > usize::from(plc.max_write_words()) {
            return Err(FinsError::range_invalid(format!(
                "write length {} exceeds {} limit of {}",
                values.len(),
                plc,
                plc.max_write_words()
            )));
        }
        check_word_range(plc, area, word, values.len() as u16)?;

        self.channel
            .transact(&FinsCommand::write_words(area, word, values))
            .await?;
        Ok(())
    }

    /// Reads the PLC clock.
    pub async fn read_clock(&self) -> Result<ClockReading> {
        self.ensure_initialized()?;
        let exchange = self.channel.transact(&FinsCommand::clock_read()).await?;
        exchange.response.clock()
    }

    /// Sets the PLC clock. Omitting `day_of_week` derives it from the
    /// date (0 = Sunday).
    pub async fn write_clock(
        &self,
        datetime: NaiveDateTime,
        day_of_week: Option<u8>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        check_clock_range(&datetime)?;
        let dow = match day_of_week {
            Some(dow) if dow > 6 => {
                return Err(FinsError::range_invalid("day of week must be 0-6"));
            }
            Some(dow) => dow,
            None => datetime.weekday().num_days_from_sunday() as u8,
        };

        self.channel
            .transact(&FinsCommand::clock_write(&datetime, dow))
            .await?;
        Ok(())
    }

    /// Reads the scan cycle times. Rejected by the capability table on NX
    /// and NY controllers without touching the wire.
    pub async fn read_cycle_time(&self) -> Result<CycleTime> {
        let plc = self.ensure_initialized()?;
        if !plc.supports_cycle_time() {
            return Err(FinsError::unsupported(format!(
                "{} controllers do not answer cycle time reads",
                plc
            )));
        }
        let exchange = self
            .channel
            .transact(&FinsCommand::cycle_time_read())
            .await?;
        exchange.response.cycle_time()
    }

    /// Closes the underlying channel.
    pub async fn close(&self) {
        self.channel.close().await;
    }

    #[cfg(test)]
    pub(crate) fn force_initialized(&self, plc_type: PlcType) {
        *self.info.write().unwrap() = Some(SessionInfo {
            plc_type,
            model: format!("{}-TEST", plc_type),
            version: "V0.00".to_string(),
        });
        self.initialized.store(true, Ordering::Release);
    }
}

fn check_bit_window(start_bit: u8, count: u16) -> Result<()> {
    if start_bit > 15 {
        return Err(FinsError::range_invalid("start bit must be 0-15"));
    }
    if count == 0 {
        return Err(FinsError::range_invalid("bit count must be at least 1"));
    }
    if u16::from(start_bit) + count > 16 {
        return Err(FinsError::range_invalid(
            "bit window must stay within one word",
        ));
    }
    Ok(())
}

fn check_bit_area(plc: PlcType, area: MemoryArea) -> Result<()> {
    if !plc.supports_bit_access(area) {
        return Err(FinsError::range_invalid(format!(
            "{} does not support bit access to {}",
            plc, area
        )));
    }
    Ok(())
}

fn check_word_range(plc: PlcType, area: MemoryArea, start: u16, count: u16) -> Result<()> {
    let ceiling = plc.area_ceiling(area).ok_or_else(|| {
        FinsError::range_invalid(format!("area {} does not exist on {}", area, plc))
    })?;
    let last = u32::from(start) + u32::from(count) - 1;
    if last >= ceiling {
        return Err(FinsError::range_invalid(format!(
            "address {}{}..={} exceeds the {} ceiling of {}",
            area, start, last, plc, ceiling
        )));
    }
    Ok(())
}

fn check_clock_range(datetime: &NaiveDateTime) -> Result<()> {
    let min = NaiveDate::from_ymd_opt(CLOCK_MIN.0, CLOCK_MIN.1, CLOCK_MIN.2)
        .expect("valid constant date")
        .and_hms_opt(0, 0, 0)
        .expect("valid constant time");
    let max = NaiveDate::from_ymd_opt(CLOCK_MAX.0, CLOCK_MAX.1, CLOCK_MAX.2)
        .expect("valid constant date")
        .and_hms_opt(23, 59, 59)
        .expect("valid constant time");
    if *datetime < min || *datetime > max {
        return Err(FinsError::range_invalid(format!(
            "clock date {} outside 1998-01-01..2069-12-31",
            datetime
        )));
    }
    Ok(())
}
