//! Controller model classification and per-model capability table.
//!
//! The session identifies the controller once at initialization via CPU
//! Unit Data Read and derives a [`PlcType`] from the model string's ASCII
//! prefix. Every read/write limit the session enforces afterwards comes
//! from this table.

use crate::memory::MemoryArea;

/// Detected controller family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlcType {
    /// NJ101 machine automation controller.
    Nj101,
    /// NJ301 machine automation controller.
    Nj301,
    /// NJ501 machine automation controller.
    Nj501,
    /// NX1P2 machine automation controller.
    Nx1p2,
    /// NX102 machine automation controller.
    Nx102,
    /// NX701 machine automation controller.
    Nx701,
    /// NY512 industrial-PC controller.
    Ny512,
    /// NY532 industrial-PC controller.
    Ny532,
    /// Other NJ/NX/NY-family controller.
    NjNxNySeries,
    /// CJ2 controller.
    Cj2,
    /// CP1 controller.
    Cp1,
    /// Other C-family controller.
    CSeries,
    /// Unrecognized model string.
    Unknown,
}

impl PlcType {
    /// Classifies a controller model string by ASCII prefix.
    ///
    /// Specific models are matched before their family prefixes, so
    /// `"NX1P2-9024DT"` lands on [`PlcType::Nx1p2`] rather than the
    /// generic NJ/NX/NY bucket.
    pub fn from_model(model: &str) -> Self {
        let model = model.trim().to_ascii_uppercase();
        const SPECIFIC: &[(&str, PlcType)] = &[
            ("NJ101", PlcType::Nj101),
            ("NJ301", PlcType::Nj301),
            ("NJ501", PlcType::Nj501),
            ("NX1P2", PlcType::Nx1p2),
            ("NX102", PlcType::Nx102),
            ("NX701", PlcType::Nx701),
            ("NY512", PlcType::Ny512),
            ("NY532", PlcType::Ny532),
        ];
        for (prefix, plc_type) in SPECIFIC {
            if model.starts_with(prefix) {
                return *plc_type;
            }
        }
        if model.starts_with("NJ") || model.starts_with("NX") || model.starts_with("NY") {
            return PlcType::NjNxNySeries;
        }
        if model.starts_with("CJ2") {
            return PlcType::Cj2;
        }
        if model.starts_with("CP1") {
            return PlcType::Cp1;
        }
        if model.starts_with('C') {
            return PlcType::CSeries;
        }
        PlcType::Unknown
    }

    /// Maximum word count for one Memory Area Read.
    pub fn max_read_words(self) -> u16 {
        match self {
            PlcType::Cp1 => 499,
            _ => 999,
        }
    }

    /// Maximum word count for one Memory Area Write.
    pub fn max_write_words(self) -> u16 {
        match self {
            PlcType::Cp1 => 496,
            _ => 996,
        }
    }

    /// Whether the model supports bit access to the given area.
    ///
    /// Only bit-addressable Data Memory varies by model; CP1 controllers
    /// lack it.
    pub fn supports_bit_access(self, area: MemoryArea) -> bool {
        !(matches!(self, PlcType::Cp1) && area == MemoryArea::DataMemory)
    }

    /// Word-address ceiling for an area, or `None` when the area does not
    /// exist on the model.
    ///
    /// The Auxiliary area exists on the C family only.
    pub fn area_ceiling(self, area: MemoryArea) -> Option<u32> {
        match area {
            MemoryArea::DataMemory => Some(match self {
                PlcType::Nx1p2 => 16_000,
                _ => 32_768,
            }),
            MemoryArea::CommonIo => Some(6_144),
            MemoryArea::Work => Some(512),
            MemoryArea::Holding => Some(1_536),
            MemoryArea::Auxiliary => match self {
                PlcType::Cj2 => Some(11_536),
                PlcType::Cp1 | PlcType::CSeries => Some(960),
                _ => None,
            },
        }
    }

    /// Whether the model answers Cycle Time Read. NX and NY controllers
    /// reject it.
    pub fn supports_cycle_time(self) -> bool {
        !matches!(
            self,
            PlcType::Nx1p2
                | PlcType::Nx102
                | PlcType::Nx701
                | PlcType::Ny512
                | PlcType::Ny532
        )
    }
}

impl std::fmt::Display for PlcType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlcType::Nj101 => "NJ101",
            PlcType::Nj301 => "NJ301",
            PlcType::Nj501 => "NJ501",
            PlcType::Nx1p2 => "NX1P2",
            PlcType::Nx102 => "NX102",
            PlcType::Nx701 => "NX701",
            PlcType::Ny512 => "NY512",
            PlcType::Ny532 => "NY532",
            PlcType::NjNxNySeries => "NJ/NX/NY",
            PlcType::Cj2 => "CJ2",
            PlcType::Cp1 => "CP1",
            PlcType::CSeries => "C-series",
            PlcType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}
