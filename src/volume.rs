//! Volume-level metadata carried by the Primary Volume Descriptor.
//!
//! ISO 9660 restricts which characters may appear in each identifier field.
//! Two sets matter here:
//!
//! - **a-characters**: printable ASCII `0x20..=0x5F` minus `#`, `$`, `@` and
//!   `^`.  Used for free-form fields like the publisher.
//! - **d-characters**: `A-Z`, `0-9` and `_`.  Used for the volume identifier,
//!   file identifiers and directory names.

use std::fmt;
use std::path::PathBuf;

use crate::error::{DiscError, Result};

/// A-character test as used for system/publisher/preparer/application IDs.
pub fn is_achar(c: u8) -> bool {
    (0x20..=0x5F).contains(&c) && !matches!(c, b'#' | b'$' | b'@' | b'^')
}

/// D-character test as used for volume and file identifiers.
pub fn is_dchar(c: u8) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || c == b'_'
}

fn check_chars(s: &str, description: &str, ok: impl Fn(u8) -> bool) -> Result<()> {
    match s.bytes().find(|&c| !ok(c)) {
        Some(c) => Err(DiscError::validation(format!(
            "Illegal character '{}' in {description} \"{s}\"",
            c as char
        ))),
        None => Ok(()),
    }
}

/// Reject anything outside the a-character set.
pub fn check_astring(s: &str, description: &str) -> Result<()> {
    check_chars(s, description, is_achar)
}

/// Reject anything outside the d-character set.
pub fn check_dstring(s: &str, description: &str) -> Result<()> {
    check_chars(s, description, is_dchar)
}

/// Longest file identifier, counting the `;1` version suffix.
pub const MAX_FILE_ID_LEN: usize = 30;

/// Longest directory identifier.
pub const MAX_DIR_ID_LEN: usize = 31;

fn check_len(s: &str, description: &str, max: usize) -> Result<()> {
    if s.len() > max {
        return Err(DiscError::validation(format!(
            "{description} \"{s}\" is longer than {max} characters"
        )));
    }
    Ok(())
}

/// File names are d-characters plus the `.` extension separator, short
/// enough to take the `;1` suffix.
pub fn check_file_name(s: &str, description: &str) -> Result<()> {
    check_chars(s, description, |c| is_dchar(c) || c == b'.')?;
    check_len(s, description, MAX_FILE_ID_LEN - 2)
}

/// Directory names are d-characters.
pub fn check_dir_name(s: &str, description: &str) -> Result<()> {
    check_dstring(s, description)?;
    check_len(s, description, MAX_DIR_ID_LEN)
}

/// ISO 9660 "long form" date/time: 16 ASCII digits plus a signed GMT offset in
/// 15-minute units.  This is the 17-byte layout used for the four PVD dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongTime {
    /// `YYYYMMDDHHMMSSCC`
    pub digits: [u8; 16],
    pub gmt_offset: i8,
}

impl Default for LongTime {
    fn default() -> Self {
        Self {
            digits: [b'0'; 16],
            gmt_offset: 0,
        }
    }
}

impl LongTime {
    /// Parse `YYYY-MM-DD HH:MM:SS.CC <offset>`.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid =
            || DiscError::validation(format!("'{s}' is not a valid date/time specification"));

        let mut parts = s.split_whitespace();
        let (Some(date), Some(time), Some(offset), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        let date: Vec<&str> = date.split('-').collect();
        let (hms, hundredths) = time.split_once('.').ok_or_else(invalid)?;
        let hms: Vec<&str> = hms.split(':').collect();
        if date.len() != 3 || hms.len() != 3 {
            return Err(invalid());
        }

        let fields = [
            (date[0], 4),
            (date[1], 2),
            (date[2], 2),
            (hms[0], 2),
            (hms[1], 2),
            (hms[2], 2),
            (hundredths, 2),
        ];
        let mut digits = [0u8; 16];
        let mut pos = 0;
        for (field, width) in fields {
            if field.len() != width || !field.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            digits[pos..pos + width].copy_from_slice(field.as_bytes());
            pos += width;
        }

        let gmt_offset = offset
            .parse::<i8>()
            .ok()
            .filter(|o| (-48..=52).contains(o))
            .ok_or_else(|| {
                DiscError::validation(format!("'{offset}' is not a valid GMT offset specification"))
            })?;

        Ok(Self { digits, gmt_offset })
    }

    /// Decode the 17-byte on-disc form.  Bytes are kept as found; [`Display`]
    /// shows non-digits as `0`.
    ///
    /// [`Display`]: fmt::Display
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut digits = [b'0'; 16];
        digits.copy_from_slice(&bytes[..16]);
        Self {
            digits,
            gmt_offset: bytes[16] as i8,
        }
    }

    pub fn to_bytes(&self) -> [u8; 17] {
        let mut out = [0u8; 17];
        out[..16].copy_from_slice(&self.digits);
        out[16] = self.gmt_offset as u8;
        out
    }

    fn number(&self, range: std::ops::Range<usize>) -> u32 {
        self.digits[range]
            .iter()
            .fold(0, |acc, d| acc * 10 + d.wrapping_sub(b'0') as u32 % 10)
    }

    /// The 7-byte short form stored in every directory record.  An unset date
    /// (all zeros) yields an all-zero recording time.
    pub fn to_dir_time(&self) -> [u8; 7] {
        let year = self.number(0..4);
        if year < 1900 {
            return [0; 7];
        }
        [
            (year - 1900).min(255) as u8,
            self.number(4..6) as u8,
            self.number(6..8) as u8,
            self.number(8..10) as u8,
            self.number(10..12) as u8,
            self.number(12..14) as u8,
            self.gmt_offset as u8,
        ]
    }
}

impl fmt::Display for LongTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Damaged fields render as zeros so the catalog stays parseable.
        let part = |range: std::ops::Range<usize>| -> String {
            self.digits[range]
                .iter()
                .map(|&b| if b.is_ascii_digit() { char::from(b) } else { '0' })
                .collect()
        };
        write!(
            f,
            "{}-{}-{} {}:{}:{}.{} {}",
            part(0..4),
            part(4..6),
            part(6..8),
            part(8..10),
            part(10..12),
            part(12..14),
            part(14..16),
            self.gmt_offset
        )
    }
}

/// Everything the `volume` and `system_area` catalog sections describe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeInfo {
    pub system_area_file: Option<PathBuf>,

    pub system_id: String,
    pub volume_id: String,
    pub volume_set_id: String,
    pub publisher_id: String,
    pub preparer_id: String,
    pub application_id: String,
    pub copyright_file_id: String,
    pub abstract_file_id: String,
    pub bibliographic_file_id: String,

    pub creation_date: LongTime,
    pub modification_date: LongTime,
    pub expiration_date: LongTime,
    pub effective_date: LongTime,

    pub default_uid: u16,
    pub default_gid: u16,
}
