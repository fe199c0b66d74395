//! Memory area definitions and tag address parsing.
//!
//! Tag addresses follow the `<area><word>[.bit]` or `<area><word>[len]`
//! convention used by Omron programming tools: `D100` is word 100 of Data
//! Memory, `CIO20.5` is bit 5 of Common IO word 20, and `D300[4]` is a
//! 4-character string starting at Data Memory word 300. Bit and length
//! suffixes are mutually exclusive.

use crate::error::{FinsError, Result};

/// Maximum array length accepted in a length bracket.
pub const MAX_TAG_LENGTH: u16 = 999;

/// Memory areas addressable through the tag layer.
///
/// Each area has distinct FINS codes for word and bit access. Whether a
/// given model actually supports bit access to an area (CP1 has no
/// bit-addressable Data Memory) is a session-level capability check, not
/// an addressing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryArea {
    /// Data Memory (`D`/`DM`) - numeric data storage.
    DataMemory,
    /// Common IO (`C`/`CIO`) - inputs, outputs, internal relays.
    CommonIo,
    /// Work area (`W`) - temporary work bits/words.
    Work,
    /// Holding area (`H`) - retentive bits/words.
    Holding,
    /// Auxiliary area (`A`) - system status and control.
    Auxiliary,
}

impl MemoryArea {
    /// Returns the FINS code for word access to this area.
    pub(crate) fn word_code(self) -> u8 {
        match self {
            MemoryArea::DataMemory => 0x82,
            MemoryArea::CommonIo => 0xB0,
            MemoryArea::Work => 0xB1,
            MemoryArea::Holding => 0xB2,
            MemoryArea::Auxiliary => 0xB3,
        }
    }

    /// Returns the FINS code for bit access to this area.
    pub(crate) fn bit_code(self) -> u8 {
        match self {
            MemoryArea::DataMemory => 0x02,
            MemoryArea::CommonIo => 0x30,
            MemoryArea::Work => 0x31,
            MemoryArea::Holding => 0x32,
            MemoryArea::Auxiliary => 0x33,
        }
    }

    /// Maps an address prefix (case-insensitive) onto an area.
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_uppercase().as_str() {
            "D" | "DM" => Some(MemoryArea::DataMemory),
            "C" | "CIO" => Some(MemoryArea::CommonIo),
            "W" => Some(MemoryArea::Work),
            "H" => Some(MemoryArea::Holding),
            "A" => Some(MemoryArea::Auxiliary),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemoryArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryArea::DataMemory => write!(f, "D"),
            MemoryArea::CommonIo => write!(f, "CIO"),
            MemoryArea::Work => write!(f, "W"),
            MemoryArea::Holding => write!(f, "H"),
            MemoryArea::Auxiliary => write!(f, "A"),
        }
    }
}

/// A parsed tag address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagAddress {
    /// Memory area the address refers to.
    pub area: MemoryArea,
    /// Word index within the area.
    pub word: u16,
    /// Bit position (0-15) when the address refers to a single bit.
    pub bit: Option<u8>,
    /// Array length (1-999) when the address carries a length bracket.
    pub length: Option<u16>,
}

impl TagAddress {
    /// Parses an address string of the form `<area><word>[.bit]` or
    /// `<area><word>[len]`.
    ///
    /// # Errors
    ///
    /// Returns `FinsError::AddressInvalid` for an unknown area prefix,
    /// missing or malformed word index, a bit outside 0-15, a length
    /// outside 1-999, or a bit combined with a length bracket.
    ///
    /// # Example
    ///
    /// ```
    /// use omron_tagio::{MemoryArea, TagAddress};
    ///
    /// let addr = TagAddress::parse("D10.3").unwrap();
    /// assert_eq!(addr.area, MemoryArea::DataMemory);
    /// assert_eq!(addr.word, 10);
    /// assert_eq!(addr.bit, Some(3));
    ///
    /// let addr = TagAddress::parse("cio300[4]").unwrap();
    /// assert_eq!(addr.area, MemoryArea::CommonIo);
    /// assert_eq!(addr.length, Some(4));
    /// ```
    pub fn parse(address: &str) -> Result<Self> {
        let input = address.trim();
        let prefix_len = input.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        if prefix_len == 0 {
            return Err(FinsError::address_invalid(address, "missing area prefix"));
        }
        let area = MemoryArea::from_prefix(&input[..prefix_len]).ok_or_else(|| {
            FinsError::address_invalid(
                address,
                format!("unknown area prefix '{}'", &input[..prefix_len]),
            )
        })?;

        let rest = &input[prefix_len..];
        let digit_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digit_len == 0 {
            return Err(FinsError::address_invalid(address, "missing word index"));
        }
        let word: u16 = rest[..digit_len]
            .parse()
            .map_err(|_| FinsError::address_invalid(address, "word index out of range"))?;

        let suffix = &rest[digit_len..];
        let (bit, length) = Self::parse_suffix(address, suffix)?;

        Ok(Self {
            area,
            word,
            bit,
            length,
        })
    }

    fn parse_suffix(address: &str, suffix: &str) -> Result<(Option<u8>, Option<u16>)> {
        if suffix.is_empty() {
            return Ok((None, None));
        }
        if let Some(bit_str) = suffix.strip_prefix('.') {
            if bit_str.contains('[') {
                return Err(FinsError::address_invalid(
                    address,
                    "bit index and length bracket are mutually exclusive",
                ));
            }
            let bit: u8 = bit_str
                .parse()
                .map_err(|_| FinsError::address_invalid(address, "malformed bit index"))?;
            if bit > 15 {
                return Err(FinsError::address_invalid(address, "bit index must be 0-15"));
            }
            return Ok((Some(bit), None));
        }
        if let Some(len_str) = suffix.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let length: u16 = len_str
                .parse()
                .map_err(|_| FinsError::address_invalid(address, "malformed length bracket"))?;
            if length == 0 || length > MAX_TAG_LENGTH {
                return Err(FinsError::address_invalid(
                    address,
                    format!("length must be 1-{}", MAX_TAG_LENGTH),
                ));
            }
            return Ok((None, Some(length)));
        }
        Err(FinsError::address_invalid(
            address,
            format!("unexpected trailing characters '{}'", suffix),
        ))
    }

    /// Returns whether the address refers to a single bit.
    pub fn is_bit(&self) -> bool {
        self.bit.is_some()
    }
}

impl std::fmt::Display for TagAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.area, self.word)?;
        if let Some(bit) = self.bit {
            write!(f, ".{}", bit)?;
        }
        if let Some(len) = self.length {
            write!(f, "[{}]", len)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_codes() {
        assert_eq!(MemoryArea::DataMemory.word_code(), 0x82);
        assert_eq!(MemoryArea::CommonIo.word_code(), 0xB0);
        assert_eq!(MemoryArea::Work.word_code(), 0xB1);
        assert_eq!(MemoryArea::Holding.word_code(), 0xB2);
        assert_eq!(MemoryArea::Auxiliary.word_code(), 0xB3);
    }

    #[test]
    fn test_bit_codes() {
        assert_eq!(MemoryArea::DataMemory.bit_code(), 0x02);
        assert_eq!(MemoryArea::CommonIo.bit_code(), 0x30);
        assert_eq!(MemoryArea::Work.bit_code(), 0x31);
        assert_eq!(MemoryArea::Holding.bit_code(), 0x32);
        assert_eq!(MemoryArea::Auxiliary.bit_code(), 0x33);
    }

    #[test]
    fn test_parse_word_address() {
        let addr = TagAddress::parse("D100").unwrap();
        assert_eq!(addr.area, MemoryArea::DataMemory);
        assert_eq!(addr.word, 100);
        assert_eq!(addr.bit, None);
        assert_eq!(addr.length, None);
    }

    #[test]
    fn test_parse_prefix_aliases() {
        assert_eq!(
            TagAddress::parse("DM5").unwrap().area,
            MemoryArea::DataMemory
        );
        assert_eq!(TagAddress::parse("C5").unwrap().area, MemoryArea::CommonIo);
        assert_eq!(
            TagAddress::parse("CIO5").unwrap().area,
            MemoryArea::CommonIo
        );
        assert_eq!(TagAddress::parse("W5").unwrap().area, MemoryArea::Work);
        assert_eq!(TagAddress::parse("H5").unwrap().area, MemoryArea::Holding);
        assert_eq!(TagAddress::parse("A5").unwrap().area, MemoryArea::Auxiliary);
    }

    #[test]
    fn test_parse_case_insensitive() {
        assert_eq!(
            TagAddress::parse("cio20").unwrap().area,
            MemoryArea::CommonIo
        );
        assert_eq!(
            TagAddress::parse("dm42").unwrap().area,
            MemoryArea::DataMemory
        );
    }

    #[test]
    fn test_parse_bit_address() {
        let addr = TagAddress::parse("D10.3").unwrap();
        assert_eq!(addr.word, 10);
        assert_eq!(addr.bit, Some(3));
        assert!(addr.is_bit());

        assert_eq!(TagAddress::parse("W0.0").unwrap().bit, Some(0));
        assert_eq!(TagAddress::parse("W0.15").unwrap().bit, Some(15));
    }

    #[test]
    fn test_parse_bit_out_of_range() {
        assert!(TagAddress::parse("W0.16").is_err());
        assert!(TagAddress::parse("W0.").is_err());
    }

    #[test]
    fn test_parse_length_bracket() {
        let addr = TagAddress::parse("D300[4]").unwrap();
        assert_eq!(addr.word, 300);
        assert_eq!(addr.length, Some(4));

        assert_eq!(TagAddress::parse("D0[1]").unwrap().length, Some(1));
        assert_eq!(TagAddress::parse("D0[999]").unwrap().length, Some(999));
    }

    #[test]
    fn test_parse_length_out_of_range() {
        assert!(TagAddress::parse("D0[0]").is_err());
        assert!(TagAddress::parse("D0[1000]").is_err());
    }

    #[test]
    fn test_parse_bit_and_length_exclusive() {
        assert!(TagAddress::parse("D10.3[4]").is_err());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(TagAddress::parse("").is_err());
        assert!(TagAddress::parse("100").is_err());
        assert!(TagAddress::parse("X100").is_err());
        assert!(TagAddress::parse("D").is_err());
        assert!(TagAddress::parse("D100x").is_err());
        assert!(TagAddress::parse("D70000").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        for s in ["D100", "CIO20.5", "W0.15", "D300[4]"] {
            let addr = TagAddress::parse(s).unwrap();
            assert_eq!(TagAddress::parse(&addr.to_string()).unwrap(), addr);
        }
    }
}
