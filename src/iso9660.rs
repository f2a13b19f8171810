//! ISO 9660 primitive structures with CD-ROM XA extensions.
//!
//! # Background
//!
//! ISO 9660 stores every multi-byte number either in one fixed byte order or
//! in "both-endian" form (little-endian copy followed by big-endian copy), so
//! readers on either architecture can use it without swapping.  CD-ROM XA
//! (used by the PlayStation) appends a 14-byte attribute block to the System
//! Use area of each directory record, carrying owner/group IDs and the sector
//! form of the file.
//!
//! This module only encodes and decodes single records.  Deciding where they
//! go is the job of [`crate::layout`].
//!
//! # References
//!
//! - ECMA-119 (ISO 9660): <https://ecma-international.org/publications-and-standards/standards/ecma-119/>
//! - System Description CD-ROM XA (Philips/Sony "Green Book" XA)

use crate::volume::{LongTime, VolumeInfo, is_achar, is_dchar};

/// Each logical block in an ISO 9660 image is 2048 bytes.
pub const BLOCK_SIZE: usize = 2048;

pub const PVD_SECTOR: u32 = 16;
pub const TERMINATOR_SECTOR: u32 = 17;
pub const PATH_TABLE_SECTOR: u32 = 18;
/// Sectors in one path table copy; fixed to one.
pub const PATH_TABLE_SECTORS: u32 = 1;
/// L primary, L backup, M primary, M backup.
pub const PATH_TABLE_COPIES: u32 = 4;
pub const ROOT_DIR_SECTOR: u32 = PATH_TABLE_SECTOR + PATH_TABLE_SECTORS * PATH_TABLE_COPIES;

/// Fixed part of a directory record, up to and including the name length.
pub const DIR_RECORD_HEADER: usize = 33;

pub const FLAG_DIRECTORY: u8 = 0x02;

/// XA attribute bits (stored big-endian in the XA block).
pub const XA_PERM_ALL: u16 = 0x0555;
pub const XA_ATTR_MODE2FORM1: u16 = 1 << 11;
pub const XA_ATTR_MODE2FORM2: u16 = 1 << 12;
pub const XA_ATTR_INTERLEAVED: u16 = 1 << 13;
pub const XA_ATTR_CDDA: u16 = 1 << 14;
pub const XA_ATTR_DIRECTORY: u16 = 1 << 15;

pub const XA_FORM1_DIR: u16 = XA_ATTR_DIRECTORY | XA_ATTR_MODE2FORM1 | XA_PERM_ALL;
pub const XA_FORM1_FILE: u16 = XA_ATTR_MODE2FORM1 | XA_PERM_ALL;
pub const XA_FORM2_FILE: u16 = XA_ATTR_MODE2FORM2 | XA_PERM_ALL;

/// Length of the XA attribute block.
pub const XA_LEN: usize = 14;

/// Offset of the `CD-XA001` marker inside the PVD.
const XA_MARKER_OFFSET: usize = 1024;
const XA_MARKER: &[u8] = b"CD-XA001";

/// CD-ROM XA system use block attached to each directory record.
///
/// | Offset | Size | Field                             |
/// |--------|------|-----------------------------------|
/// |   0    |   2  | Group ID (BE)                     |
/// |   2    |   2  | User ID (BE)                      |
/// |   4    |   2  | Attributes (BE)                   |
/// |   6    |   2  | Signature `"XA"`                  |
/// |   8    |   1  | File number (interleave channel)  |
/// |   9    |   5  | Reserved                          |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XaAttr {
    pub group_id: u16,
    pub user_id: u16,
    pub attributes: u16,
    pub file_number: u8,
}

impl XaAttr {
    pub fn new(user_id: u16, group_id: u16, attributes: u16, file_number: u8) -> Self {
        Self {
            group_id,
            user_id,
            attributes,
            file_number,
        }
    }

    pub fn to_bytes(&self) -> [u8; XA_LEN] {
        let mut buf = [0u8; XA_LEN];
        buf[0..2].copy_from_slice(&self.group_id.to_be_bytes());
        buf[2..4].copy_from_slice(&self.user_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.attributes.to_be_bytes());
        buf[6..8].copy_from_slice(b"XA");
        buf[8] = self.file_number;
        buf
    }

    pub fn parse(su: &[u8]) -> Option<Self> {
        if su.len() < XA_LEN || &su[6..8] != b"XA" {
            return None;
        }
        Some(Self {
            group_id: u16::from_be_bytes([su[0], su[1]]),
            user_id: u16::from_be_bytes([su[2], su[3]]),
            attributes: u16::from_be_bytes([su[4], su[5]]),
            file_number: su[8],
        })
    }

    /// Form 2 or interleaved data (video/audio streams).
    pub fn is_form2(&self) -> bool {
        self.attributes & (XA_ATTR_MODE2FORM2 | XA_ATTR_INTERLEAVED) != 0
    }

    pub fn is_cdda(&self) -> bool {
        self.attributes & XA_ATTR_CDDA != 0
    }
}

/// Encoded length of a directory record with a `name_len`-byte identifier and
/// `su_len` bytes of system use data.  The identifier and the system use area
/// are each padded to an even length.
pub fn dir_record_size(name_len: usize, su_len: usize) -> usize {
    let mut len = DIR_RECORD_HEADER + name_len;
    len += len % 2;
    len += su_len;
    len += len % 2;
    len
}

/// Build one directory record.
///
/// | Offset    | Size | Field                                             |
/// |-----------|------|---------------------------------------------------|
/// |  0        |   1  | Record Length                                     |
/// |  1        |   1  | Extended Attribute Record Length (0)              |
/// |  2        |   8  | Extent Location (both-endian u32)                 |
/// | 10        |   8  | Data Length (both-endian u32)                     |
/// | 18        |   7  | Recording Date/Time                               |
/// | 25        |   1  | File Flags (bit 1 = directory)                    |
/// | 26        |   1  | File Unit Size (0)                                |
/// | 27        |   1  | Interleave Gap Size (0)                           |
/// | 28        |   4  | Volume Sequence Number (both-endian u16)          |
/// | 32        |   1  | File Identifier Length                            |
/// | 33        |   N  | File Identifier                                   |
/// | 33+N      |  pad | Padding byte if N is even                         |
/// | 33+N+pad  |   *  | System Use area (XA block)                        |
pub fn dir_record(
    extent: u32,
    size: u32,
    name: &[u8],
    flags: u8,
    time: &[u8; 7],
    su: &[u8],
) -> Vec<u8> {
    let record_len = dir_record_size(name.len(), su.len());
    let mut buf = vec![0u8; record_len];
    buf[0] = record_len as u8;
    put_u32_both(&mut buf[2..10], extent);
    put_u32_both(&mut buf[10..18], size);
    buf[18..25].copy_from_slice(time);
    buf[25] = flags;
    put_u16_both(&mut buf[28..32], 1);
    buf[32] = name.len() as u8;
    buf[33..33 + name.len()].copy_from_slice(name);
    let su_start = DIR_RECORD_HEADER + name.len() + (1 - name.len() % 2);
    buf[su_start..su_start + su.len()].copy_from_slice(su);
    buf
}

/// Offset of the data length field within a directory record.
pub const DIR_RECORD_SIZE_OFFSET: usize = 10;

/// Overwrite the data length field of the record starting at `record`.
pub fn patch_record_size(record: &mut [u8], size: u32) {
    put_u32_both(
        &mut record[DIR_RECORD_SIZE_OFFSET..DIR_RECORD_SIZE_OFFSET + 8],
        size,
    );
}

/// A decoded directory record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirEntry {
    /// Identifier as stored; `.` and `..` for the self/parent records.
    pub name: String,
    pub extent: u32,
    pub size: u32,
    pub flags: u8,
    pub xa: Option<XaAttr>,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    /// Number of 2048-byte blocks covered by the data length.
    pub fn sectors(&self) -> u32 {
        self.size.div_ceil(BLOCK_SIZE as u32)
    }

    pub fn is_form2(&self) -> bool {
        self.xa.is_some_and(|xa| xa.is_form2())
    }

    pub fn is_cdda(&self) -> bool {
        self.xa.is_some_and(|xa| xa.is_cdda())
    }

    pub fn is_self_or_parent(&self) -> bool {
        self.name == "." || self.name == ".."
    }

    /// Parse the record at the start of `data`.  Returns `None` for padding or
    /// a malformed record.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let record_len = *data.first()? as usize;
        if record_len < DIR_RECORD_HEADER + 1 || record_len > data.len() {
            return None;
        }
        let id_len = data[32] as usize;
        if DIR_RECORD_HEADER + id_len > record_len {
            return None;
        }
        let id = &data[33..33 + id_len];
        let name = match id {
            [0x00] => ".".to_string(),
            [0x01] => "..".to_string(),
            _ => String::from_utf8_lossy(id).into_owned(),
        };
        let su_start = DIR_RECORD_HEADER + id_len + (1 - id_len % 2);
        let xa = data
            .get(su_start..record_len)
            .and_then(XaAttr::parse);

        Some(Self {
            name,
            extent: get_u32_le(&data[2..6]),
            size: get_u32_le(&data[10..14]),
            flags: data[25],
            xa,
        })
    }
}

/// Encoded length of one path table entry.
pub fn path_table_entry_size(name_len: usize) -> usize {
    let name_len = name_len.max(1);
    8 + name_len + name_len % 2
}

/// Append one path table entry.  The root directory passes an empty name and
/// is stored with the single-byte identifier `0x00`.
///
/// | Offset | Size | Field                                   |
/// |--------|------|-----------------------------------------|
/// |   0    |   1  | Directory Identifier Length             |
/// |   1    |   1  | Extended Attribute Record Length (0)    |
/// |   2    |   4  | Extent Location                         |
/// |   6    |   2  | Parent Directory Number                 |
/// |   8    |   N  | Directory Identifier                    |
/// |  8+N   |  pad | Padding (to even length)                |
pub fn push_path_table_entry(
    table: &mut Vec<u8>,
    name: &[u8],
    extent: u32,
    parent: u16,
    endian: Endian,
) {
    let start = table.len();
    table.resize(start + path_table_entry_size(name.len()), 0);
    let entry = &mut table[start..];
    entry[0] = name.len().max(1) as u8;
    match endian {
        Endian::Little => {
            entry[2..6].copy_from_slice(&extent.to_le_bytes());
            entry[6..8].copy_from_slice(&parent.to_le_bytes());
        }
        Endian::Big => {
            entry[2..6].copy_from_slice(&extent.to_be_bytes());
            entry[6..8].copy_from_slice(&parent.to_be_bytes());
        }
    }
    entry[8..8 + name.len()].copy_from_slice(name);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Inputs for the Primary Volume Descriptor that come from the layout rather
/// than the catalog.
#[derive(Debug, Clone, Copy)]
pub struct PvdLayout {
    pub volume_sectors: u32,
    pub root_dir_sector: u32,
    pub root_dir_size: u32,
    pub path_table_size: u32,
}

/// Build the Primary Volume Descriptor.
///
/// | Offset | Size | Field                                        |
/// |--------|------|----------------------------------------------|
/// |   0    |   1  | Type (1 = PVD)                               |
/// |   1    |   5  | Standard Identifier (`"CD001"`)              |
/// |   6    |   1  | Version (1)                                  |
/// |   8    |  32  | System Identifier (a-chars)                  |
/// |  40    |  32  | Volume Identifier (d-chars)                  |
/// |  80    |   8  | Volume Space Size (both-endian)              |
/// | 120    |   4  | Volume Set Size (both-endian)                |
/// | 124    |   4  | Volume Sequence Number (both-endian)         |
/// | 128    |   4  | Logical Block Size (both-endian)             |
/// | 132    |   8  | Path Table Size (both-endian)                |
/// | 140    |   4  | L Path Table Location (LE)                   |
/// | 144    |   4  | Optional L Path Table Location (LE)          |
/// | 148    |   4  | M Path Table Location (BE)                   |
/// | 152    |   4  | Optional M Path Table Location (BE)          |
/// | 156    |  34  | Root Directory Record                        |
/// | 190    | 128  | Volume Set Identifier                        |
/// | 318    | 128  | Publisher Identifier                         |
/// | 446    | 128  | Data Preparer Identifier                     |
/// | 574    | 128  | Application Identifier                       |
/// | 702    |  37  | Copyright File Identifier                    |
/// | 739    |  37  | Abstract File Identifier                     |
/// | 776    |  37  | Bibliographic File Identifier                |
/// | 813    |  17  | Creation Date                                |
/// | 830    |  17  | Modification Date                            |
/// | 847    |  17  | Expiration Date                              |
/// | 864    |  17  | Effective Date                               |
/// | 881    |   1  | File Structure Version (1)                   |
/// | 883    | 512  | Application Use (`CD-XA001` at 1024)         |
pub fn pvd(vol: &VolumeInfo, layout: &PvdLayout) -> [u8; BLOCK_SIZE] {
    let mut pvd = [0u8; BLOCK_SIZE];
    pvd[0] = 1;
    pvd[1..6].copy_from_slice(b"CD001");
    pvd[6] = 1;

    put_str(&mut pvd[8..40], &vol.system_id, "system_id", is_achar);
    put_str(&mut pvd[40..72], &vol.volume_id, "volume_id", is_dchar);
    put_u32_both(&mut pvd[80..88], layout.volume_sectors);
    put_u16_both(&mut pvd[120..124], 1);
    put_u16_both(&mut pvd[124..128], 1);
    put_u16_both(&mut pvd[128..132], BLOCK_SIZE as u16);
    put_u32_both(&mut pvd[132..140], layout.path_table_size);

    let pt = PATH_TABLE_SECTOR;
    let n = PATH_TABLE_SECTORS;
    pvd[140..144].copy_from_slice(&pt.to_le_bytes());
    pvd[144..148].copy_from_slice(&(pt + n).to_le_bytes());
    pvd[148..152].copy_from_slice(&(pt + n * 2).to_be_bytes());
    pvd[152..156].copy_from_slice(&(pt + n * 3).to_be_bytes());

    let root = dir_record(
        layout.root_dir_sector,
        layout.root_dir_size,
        &[0],
        FLAG_DIRECTORY,
        &vol.creation_date.to_dir_time(),
        &[],
    );
    pvd[156..156 + root.len()].copy_from_slice(&root);

    put_str(&mut pvd[190..318], &vol.volume_set_id, "volume_set_id", is_dchar);
    put_str(&mut pvd[318..446], &vol.publisher_id, "publisher_id", is_achar);
    put_str(&mut pvd[446..574], &vol.preparer_id, "preparer_id", is_achar);
    put_str(&mut pvd[574..702], &vol.application_id, "application_id", is_achar);
    put_str(&mut pvd[702..739], &vol.copyright_file_id, "copyright_file_id", is_dchar);
    put_str(&mut pvd[739..776], &vol.abstract_file_id, "abstract_file_id", is_dchar);
    put_str(
        &mut pvd[776..813],
        &vol.bibliographic_file_id,
        "bibliographic_file_id",
        is_dchar,
    );

    pvd[813..830].copy_from_slice(&vol.creation_date.to_bytes());
    pvd[830..847].copy_from_slice(&vol.modification_date.to_bytes());
    pvd[847..864].copy_from_slice(&vol.expiration_date.to_bytes());
    pvd[864..881].copy_from_slice(&vol.effective_date.to_bytes());
    pvd[881] = 1;

    pvd[XA_MARKER_OFFSET..XA_MARKER_OFFSET + XA_MARKER.len()].copy_from_slice(XA_MARKER);
    pvd
}

/// Marks the end of the volume descriptor sequence.
pub fn terminator() -> [u8; BLOCK_SIZE] {
    let mut vdst = [0u8; BLOCK_SIZE];
    vdst[0] = 255;
    vdst[1..6].copy_from_slice(b"CD001");
    vdst[6] = 1;
    vdst
}

/// The parts of a PVD that rip and inject care about.
#[derive(Debug, Clone, Default)]
pub struct PvdInfo {
    pub volume: VolumeInfo,
    pub volume_sectors: u32,
    pub root: DirEntry,
}

/// Decode a PVD sector.  Returns `None` if the signature does not match.
pub fn parse_pvd(pvd: &[u8]) -> Option<PvdInfo> {
    if pvd.len() < BLOCK_SIZE || pvd[0] != 1 || &pvd[1..6] != b"CD001" {
        return None;
    }
    let root = DirEntry::parse(&pvd[156..190])?;
    let volume = VolumeInfo {
        system_area_file: None,
        system_id: get_str(&pvd[8..40]),
        volume_id: get_str(&pvd[40..72]),
        volume_set_id: get_str(&pvd[190..318]),
        publisher_id: get_str(&pvd[318..446]),
        preparer_id: get_str(&pvd[446..574]),
        application_id: get_str(&pvd[574..702]),
        copyright_file_id: get_str(&pvd[702..739]),
        abstract_file_id: get_str(&pvd[739..776]),
        bibliographic_file_id: get_str(&pvd[776..813]),
        creation_date: LongTime::from_bytes(&pvd[813..830]),
        modification_date: LongTime::from_bytes(&pvd[830..847]),
        expiration_date: LongTime::from_bytes(&pvd[847..864]),
        effective_date: LongTime::from_bytes(&pvd[864..881]),
        default_uid: 0,
        default_gid: 0,
    };
    Some(PvdInfo {
        volume,
        volume_sectors: get_u32_le(&pvd[80..84]),
        root,
    })
}

/// Space-pad `value` into `field`.  Over-long values are truncated, and
/// characters outside the field's set are replaced by `_`; both are logged.
fn put_str(field: &mut [u8], value: &str, name: &str, allowed: fn(u8) -> bool) {
    field.fill(b' ');
    if value.len() > field.len() {
        tracing::warn!(
            field = name,
            value,
            "identifier is getting truncated to {} characters",
            field.len()
        );
    }
    for (dst, c) in field.iter_mut().zip(value.bytes()) {
        *dst = if allowed(c) {
            c
        } else {
            tracing::warn!(field = name, value, "replacing illegal character '{}'", c as char);
            b'_'
        };
    }
}

/// Read a space-padded identifier field.
fn get_str(field: &[u8]) -> String {
    String::from_utf8_lossy(field)
        .trim_end_matches([' ', '\0'])
        .to_string()
}

/// Write a u32 in "both-endian" format: 4 bytes LE followed by 4 bytes BE.
pub fn put_u32_both(buf: &mut [u8], val: u32) {
    buf[0..4].copy_from_slice(&val.to_le_bytes());
    buf[4..8].copy_from_slice(&val.to_be_bytes());
}

/// Write a u16 in "both-endian" format: 2 bytes LE followed by 2 bytes BE.
pub fn put_u16_both(buf: &mut [u8], val: u16) {
    buf[0..2].copy_from_slice(&val.to_le_bytes());
    buf[2..4].copy_from_slice(&val.to_be_bytes());
}

fn get_u32_le(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_size_pads_name_and_su() {
        // "." / ".." with an XA block: 33 + 1 = 34, + 14 = 48.
        assert_eq!(dir_record_size(1, XA_LEN), 48);
        // Even name length gets a pad byte before the system use area.
        assert_eq!(dir_record_size(6, XA_LEN), 33 + 6 + 1 + 14);
        assert_eq!(dir_record_size(0, 0), 34);
    }

    #[test]
    fn record_round_trip() {
        let xa = XaAttr::new(7, 9, XA_FORM2_FILE, 1);
        let rec = dir_record(
            1234,
            4096,
            b"MOVIE.STR;1",
            0,
            &[98, 1, 2, 3, 4, 5, 0],
            &xa.to_bytes(),
        );
        assert_eq!(rec.len(), dir_record_size(11, XA_LEN));
        assert_eq!(rec[0] as usize, rec.len());

        let entry = DirEntry::parse(&rec).unwrap();
        assert_eq!(entry.name, "MOVIE.STR;1");
        assert_eq!(entry.extent, 1234);
        assert_eq!(entry.size, 4096);
        assert_eq!(entry.sectors(), 2);
        assert!(!entry.is_dir());
        assert!(entry.is_form2());
        assert_eq!(entry.xa, Some(xa));
    }

    #[test]
    fn self_and_parent_names() {
        let rec = dir_record(22, 2048, &[0], FLAG_DIRECTORY, &[0; 7], &[]);
        assert_eq!(DirEntry::parse(&rec).unwrap().name, ".");
        let rec = dir_record(22, 2048, &[1], FLAG_DIRECTORY, &[0; 7], &[]);
        let entry = DirEntry::parse(&rec).unwrap();
        assert_eq!(entry.name, "..");
        assert!(entry.is_self_or_parent());
        assert!(entry.is_dir());
    }

    #[test]
    fn padding_byte_is_not_a_record() {
        assert!(DirEntry::parse(&[0u8; 40]).is_none());
        assert!(DirEntry::parse(&[]).is_none());
    }

    #[test]
    fn patch_size_only_touches_size_field() {
        let mut rec = dir_record(500, 10, b"A;1", 0, &[1; 7], &[]);
        let before = rec.clone();
        patch_record_size(&mut rec, 0x01020304);
        assert_eq!(DirEntry::parse(&rec).unwrap().size, 0x01020304);
        assert_eq!(&rec[18..], &before[18..]);
        assert_eq!(&rec[..10], &before[..10]);
        assert_eq!(&rec[14..18], &[1, 2, 3, 4]);
    }

    #[test]
    fn path_table_entries() {
        let mut l = Vec::new();
        push_path_table_entry(&mut l, b"", 22, 1, Endian::Little);
        assert_eq!(l, [1, 0, 22, 0, 0, 0, 1, 0, 0, 0]);

        let mut m = Vec::new();
        push_path_table_entry(&mut m, b"XA", 0x0102, 1, Endian::Big);
        assert_eq!(m, [2, 0, 0, 0, 1, 2, 0, 1, b'X', b'A']);
        assert_eq!(path_table_entry_size(3), 12);
    }

    #[test]
    fn pvd_round_trip() {
        let vol = VolumeInfo {
            system_id: "PLAYSTATION".into(),
            volume_id: "MYGAME".into(),
            publisher_id: "ME".into(),
            creation_date: LongTime::parse("1997-01-02 03:04:05.06 0").unwrap(),
            ..Default::default()
        };
        let layout = PvdLayout {
            volume_sectors: 300,
            root_dir_sector: ROOT_DIR_SECTOR,
            root_dir_size: 2048,
            path_table_size: 10,
        };
        let bytes = pvd(&vol, &layout);
        assert_eq!(&bytes[1..6], b"CD001");
        assert_eq!(&bytes[1024..1032], b"CD-XA001");
        assert_eq!(&bytes[148..152], &20u32.to_be_bytes());

        let info = parse_pvd(&bytes).unwrap();
        assert_eq!(info.volume_sectors, 300);
        assert_eq!(info.root.extent, ROOT_DIR_SECTOR);
        assert_eq!(info.root.size, 2048);
        assert_eq!(info.volume.system_id, "PLAYSTATION");
        assert_eq!(info.volume.volume_id, "MYGAME");
        assert_eq!(info.volume.publisher_id, "ME");
        assert_eq!(info.volume.creation_date, vol.creation_date);
    }

    #[test]
    fn terminator_is_type_255() {
        let t = terminator();
        assert_eq!(t[0], 255);
        assert!(parse_pvd(&t).is_none());
    }
}
