//! Reading (and patching) existing disc images.
//!
//! Two layouts are understood:
//!
//! - **Raw Mode 2**: 2352 bytes per sector, starting with the CD sync
//!   pattern.  This is what the builder produces and what most PlayStation
//!   rips look like.
//! - **ISO**: plain 2048-byte logical blocks with no framing.
//!
//! A `.cue` sheet can be given instead of an image; the image named by its
//! first `FILE` line is opened.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{DiscError, Result};
use crate::iso9660::{BLOCK_SIZE, DirEntry, PVD_SECTOR, PvdInfo, parse_pvd};
use crate::sector::{
    MODE2_RAW_SIZE, RAW_SECTOR_SIZE, SUBHEADER_OFFSET, SYNC_PATTERN, Subheader, form1_data,
    make_mode2, make_mode2_from_raw,
};
use crate::writer::read_full;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    RawMode2,
    Iso,
}

impl ImageFormat {
    /// Bytes per sector in the image file.
    pub fn sector_size(self) -> u64 {
        match self {
            ImageFormat::RawMode2 => RAW_SECTOR_SIZE as u64,
            ImageFormat::Iso => BLOCK_SIZE as u64,
        }
    }
}

/// Where a directory record lives: the directory sector and the byte
/// offset of the record inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub sector: u32,
    pub offset: usize,
    /// Index of `sector` within its directory extent.
    pub index: u32,
}

#[derive(Debug, Clone)]
pub struct Record {
    pub entry: DirEntry,
    pub location: RecordLocation,
}

/// Resolve a command-line image argument: extensionless names get `.bin`,
/// `.cue` sheets are followed to their data file.
pub fn resolve_image_path(input: &Path) -> Result<PathBuf> {
    match input.extension() {
        None => Ok(input.with_extension("bin")),
        Some(ext) if ext.eq_ignore_ascii_case("cue") => {
            let text = fs::read_to_string(input).map_err(|e| {
                DiscError::io(format!("Error opening cue sheet {}", input.display()), e)
            })?;
            let name = cue_file_name(&text).ok_or_else(|| DiscError::UnsupportedImage {
                message: format!("Cue sheet {} contains no FILE entry", input.display()),
            })?;
            Ok(input.with_file_name(name))
        }
        Some(_) => Ok(input.to_path_buf()),
    }
}

/// The file named on the first `FILE` line of a cue sheet.
pub fn cue_file_name(text: &str) -> Option<String> {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| l.get(..5).is_some_and(|p| p.eq_ignore_ascii_case("FILE ")))?;
    let rest = line[5..].trim_start();
    let name = match rest.strip_prefix('"') {
        Some(quoted) => &quoted[..quoted.find('"')?],
        None => rest.split_whitespace().next()?,
    };
    (!name.is_empty()).then(|| name.to_string())
}

/// An open disc image with a parsed ISO 9660 volume descriptor.
pub struct DiscImage {
    file: File,
    path: PathBuf,
    format: ImageFormat,
    pvd: PvdInfo,
}

impl DiscImage {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, false)
    }

    /// Open for reading and in-place patching.
    pub fn open_rw(path: &Path) -> Result<Self> {
        Self::open_with(path, true)
    }

    fn open_with(path: &Path, write: bool) -> Result<Self> {
        let open_err = |e| {
            DiscError::io(
                format!("Error opening input image {}, or image has wrong type", path.display()),
                e,
            )
        };
        let mut file = OpenOptions::new()
            .read(true)
            .write(write)
            .open(path)
            .map_err(open_err)?;

        let mut head = [0u8; 16];
        let n = read_full(&mut file, &mut head).map_err(open_err)?;
        let format = if n == head.len() && head[..12] == SYNC_PATTERN {
            if head[15] != 2 {
                return Err(DiscError::UnsupportedImage {
                    message: format!(
                        "{} is a raw mode {} image; only mode 2 is supported",
                        path.display(),
                        head[15]
                    ),
                });
            }
            ImageFormat::RawMode2
        } else {
            ImageFormat::Iso
        };
        tracing::debug!(?format, "opened {}", path.display());

        let mut image = Self {
            file,
            path: path.to_path_buf(),
            format,
            pvd: PvdInfo::default(),
        };
        let pvd_sector = image.read_data(PVD_SECTOR)?;
        image.pvd = parse_pvd(&pvd_sector).ok_or_else(|| DiscError::UnsupportedImage {
            message: format!("No ISO 9660 filesystem in {}", path.display()),
        })?;
        Ok(image)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn pvd(&self) -> &PvdInfo {
        &self.pvd
    }

    pub fn root(&self) -> &DirEntry {
        &self.pvd.root
    }

    fn read_at(&mut self, lsn: u32, buf: &mut [u8], skip: u64) -> Result<()> {
        let offset = lsn as u64 * self.format.sector_size() + skip;
        let result = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(buf));
        result.map_err(|e| {
            DiscError::io(format!("Error reading sector {lsn} of image file"), e)
        })
    }

    /// The 2048 bytes of user data of sector `lsn`.
    pub fn read_data(&mut self, lsn: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; BLOCK_SIZE];
        match self.format {
            ImageFormat::RawMode2 => {
                let raw = self.read_raw(lsn)?;
                buf.copy_from_slice(form1_data(&raw));
            }
            ImageFormat::Iso => self.read_at(lsn, &mut buf, 0)?,
        }
        Ok(buf)
    }

    /// The full 2352-byte sector.  Raw images only.
    pub fn read_raw(&mut self, lsn: u32) -> Result<Vec<u8>> {
        self.require_raw()?;
        let mut buf = vec![0u8; RAW_SECTOR_SIZE];
        self.read_at(lsn, &mut buf, 0)?;
        Ok(buf)
    }

    /// Subheader, data and EDC/ECC of a Mode 2 sector (2336 bytes).
    pub fn read_mode2(&mut self, lsn: u32) -> Result<Vec<u8>> {
        self.require_raw()?;
        let mut buf = vec![0u8; MODE2_RAW_SIZE];
        self.read_at(lsn, &mut buf, SUBHEADER_OFFSET as u64)?;
        Ok(buf)
    }

    fn require_raw(&self) -> Result<()> {
        match self.format {
            ImageFormat::RawMode2 => Ok(()),
            ImageFormat::Iso => Err(DiscError::UnsupportedImage {
                message: format!("{} is not a raw mode 2 image", self.path.display()),
            }),
        }
    }

    /// All records of directory `dir`, including `.` and `..`, in on-disc
    /// order.
    pub fn readdir(&mut self, dir: &DirEntry) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        for index in 0..dir.sectors() {
            let sector = dir.extent + index;
            let data = self.read_data(sector)?;
            let mut offset = 0;
            while offset < BLOCK_SIZE {
                let len = data[offset] as usize;
                if len == 0 {
                    offset += 1;
                    continue;
                }
                let Some(entry) = DirEntry::parse(&data[offset..]) else {
                    tracing::warn!("malformed directory record at sector {sector} offset {offset}");
                    break;
                };
                records.push(Record {
                    entry,
                    location: RecordLocation {
                        sector,
                        offset,
                        index,
                    },
                });
                offset += len;
            }
        }
        Ok(records)
    }

    /// Look up a `/`-separated path.  Components match the recorded name
    /// exactly or with the `;1` version suffix left off.  The empty path
    /// (or `/`) is the root directory, which has no location.
    pub fn stat(&mut self, path: &str) -> Result<Option<(DirEntry, Option<RecordLocation>)>> {
        let mut current = self.root().clone();
        let mut location = None;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !current.is_dir() {
                return Ok(None);
            }
            let found = self.readdir(&current)?.into_iter().find(|r| {
                !r.entry.is_self_or_parent()
                    && (r.entry.name == component
                        || r.entry.name.strip_suffix(";1") == Some(component))
            });
            let Some(record) = found else {
                return Ok(None);
            };
            current = record.entry;
            location = Some(record.location);
        }
        Ok(Some((current, location)))
    }

    /// Overwrite sector `lsn`.  Raw images get a freshly framed sector with
    /// subheader `sub`; ISO images get the 2048 data bytes.
    pub fn write_sector(&mut self, lsn: u32, sub: Subheader, data: &[u8]) -> Result<()> {
        match self.format {
            ImageFormat::RawMode2 => {
                let raw = make_mode2(lsn, sub, data);
                self.write_at(lsn, &raw)
            }
            ImageFormat::Iso => {
                let mut block = [0u8; BLOCK_SIZE];
                let n = data.len().min(BLOCK_SIZE);
                block[..n].copy_from_slice(&data[..n]);
                self.write_at(lsn, &block)
            }
        }
    }

    /// Overwrite sector `lsn` of a raw image from a 2336-byte block whose
    /// first bytes are the subheader.
    pub fn write_form2_block(&mut self, lsn: u32, block: &[u8]) -> Result<()> {
        self.require_raw()?;
        let raw = make_mode2_from_raw(lsn, block);
        self.write_at(lsn, &raw)
    }

    fn write_at(&mut self, lsn: u32, bytes: &[u8]) -> Result<()> {
        let offset = lsn as u64 * self.format.sector_size();
        let result = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(bytes));
        result.map_err(|e| {
            DiscError::io(
                format!("Error writing sector {lsn} of {}", self.path.display()),
                e,
            )
        })
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .map_err(|e| DiscError::io(format!("Error writing to {}", self.path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensionless_gets_bin() {
        assert_eq!(
            resolve_image_path(Path::new("out/game")).unwrap(),
            PathBuf::from("out/game.bin")
        );
        assert_eq!(
            resolve_image_path(Path::new("game.img")).unwrap(),
            PathBuf::from("game.img")
        );
    }

    #[test]
    fn cue_sheet_is_followed() {
        let dir = tempfile::tempdir().unwrap();
        let cue = dir.path().join("game.cue");
        fs::write(
            &cue,
            "FILE \"Game (USA).bin\" BINARY\r\n  TRACK 01 MODE2/2352\r\n    INDEX 01 00:00:00\r\n",
        )
        .unwrap();
        assert_eq!(
            resolve_image_path(&cue).unwrap(),
            dir.path().join("Game (USA).bin")
        );
    }

    #[test]
    fn cue_file_name_variants() {
        assert_eq!(cue_file_name("file a.bin BINARY"), Some("a.bin".into()));
        assert_eq!(cue_file_name("REM x\nFILE \"b c.bin\" BINARY"), Some("b c.bin".into()));
        assert_eq!(cue_file_name("TRACK 01 MODE2/2352"), None);
    }

    #[test]
    fn non_iso_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.bin");
        fs::write(&path, vec![0u8; 40 * BLOCK_SIZE]).unwrap();
        let err = DiscImage::open(&path).err().unwrap();
        assert!(matches!(err, DiscError::UnsupportedImage { .. }));
    }

    #[test]
    fn short_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.iso");
        fs::write(&path, b"tiny").unwrap();
        let err = DiscImage::open(&path).err().unwrap();
        assert!(matches!(err, DiscError::Io { .. }));
    }
}
