//! Raw CD-ROM Mode 2 (XA) sector framing.
//!
//! # Background
//!
//! A CD stores 2352 bytes per sector.  In Mode 2 the layout is:
//!
//! ```text
//! ┌──────────┬──────────┬──────────────┬──────────────────────┬─────┬─────────┐
//! │ sync 12  │ header 4 │ subheader 8  │ user data            │ EDC │ ECC     │
//! ├──────────┼──────────┼──────────────┼──────────────────────┼─────┼─────────┤
//! │ Form 1   │ MSF+mode │ 4 bytes × 2  │ 2048                 │  4  │ 276 P/Q │
//! │ Form 2   │ MSF+mode │ 4 bytes × 2  │ 2324                 │  4  │   -     │
//! └──────────┴──────────┴──────────────┴──────────────────────┴─────┴─────────┘
//! ```
//!
//! The subheader (file number, channel, submode, coding info) is stored
//! twice.  Bit 5 of the submode selects Form 2.  The EDC is a CRC-32 over the
//! subheader and data; Form 1 sectors add Reed-Solomon product code parity
//! (P and Q) computed with the header address zeroed.
//!
//! # References
//!
//! - ECMA-130: <https://ecma-international.org/publications-and-standards/standards/ecma-130/>

/// Size of a full raw sector.
pub const RAW_SECTOR_SIZE: usize = 2352;

/// Everything after sync and header: subheader + data + EDC (+ ECC).
pub const MODE2_RAW_SIZE: usize = 2336;

pub const SUBHEADER_SIZE: usize = 8;
pub const FORM1_DATA_SIZE: usize = 2048;
pub const FORM2_DATA_SIZE: usize = 2324;

/// Offset of the subheader within a raw sector.
pub const SUBHEADER_OFFSET: usize = 16;
/// Offset of user data within a raw Mode 2 sector.
pub const DATA_OFFSET: usize = 24;

/// Lead-in pregap; logical sector 0 sits at MSF 00:02:00.
const PREGAP_SECTORS: u32 = 150;

pub const SYNC_PATTERN: [u8; 12] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

/// Submode bits.
pub const SM_EOR: u8 = 0x01;
pub const SM_VIDEO: u8 = 0x02;
pub const SM_AUDIO: u8 = 0x04;
pub const SM_DATA: u8 = 0x08;
pub const SM_TRIGGER: u8 = 0x10;
pub const SM_FORM2: u8 = 0x20;
pub const SM_REALTIME: u8 = 0x40;
pub const SM_EOF: u8 = 0x80;

/// The four subheader bytes of a Mode 2 sector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subheader {
    pub file: u8,
    pub channel: u8,
    pub submode: u8,
    pub coding: u8,
}

impl Subheader {
    pub fn data(submode: u8) -> Self {
        Self {
            submode,
            ..Default::default()
        }
    }

    /// Submode for sector `index` of an extent `count` sectors long: plain
    /// data, with EOF/EOR on the last sector.
    pub fn data_extent(index: u32, count: u32) -> Self {
        if index + 1 == count {
            Self::data(SM_DATA | SM_EOF | SM_EOR)
        } else {
            Self::data(SM_DATA)
        }
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        Self {
            file: b[0],
            channel: b[1],
            submode: b[2],
            coding: b[3],
        }
    }

    pub fn is_form2(&self) -> bool {
        self.submode & SM_FORM2 != 0
    }
}

/// Frame `data` as a raw Mode 2 sector for logical sector `lsn`.
///
/// Form 2 sectors take [`FORM2_DATA_SIZE`] bytes of data, Form 1 sectors
/// [`FORM1_DATA_SIZE`].  Shorter input is zero-padded; longer input is cut.
pub fn make_mode2(lsn: u32, sub: Subheader, data: &[u8]) -> [u8; RAW_SECTOR_SIZE] {
    let mut raw = [0u8; RAW_SECTOR_SIZE];
    raw[..12].copy_from_slice(&SYNC_PATTERN);
    raw[12..15].copy_from_slice(&msf(lsn + PREGAP_SECTORS));
    raw[15] = 2;

    let sh = [sub.file, sub.channel, sub.submode, sub.coding];
    raw[16..20].copy_from_slice(&sh);
    raw[20..24].copy_from_slice(&sh);

    let len = if sub.is_form2() {
        FORM2_DATA_SIZE
    } else {
        FORM1_DATA_SIZE
    };
    let n = data.len().min(len);
    raw[DATA_OFFSET..DATA_OFFSET + n].copy_from_slice(&data[..n]);

    if sub.is_form2() {
        let edc = edc(&raw[SUBHEADER_OFFSET..DATA_OFFSET + FORM2_DATA_SIZE]);
        raw[2348..2352].copy_from_slice(&edc.to_le_bytes());
    } else {
        let edc = edc(&raw[SUBHEADER_OFFSET..DATA_OFFSET + FORM1_DATA_SIZE]);
        raw[2072..2076].copy_from_slice(&edc.to_le_bytes());
        ecc_generate(&mut raw);
    }
    raw
}

/// Frame a Form 2 payload block the way PlayStation streams are stored on
/// the host: the first four bytes are the subheader, the data follows at
/// [`SUBHEADER_SIZE`].
pub fn make_mode2_from_raw(lsn: u32, block: &[u8]) -> [u8; RAW_SECTOR_SIZE] {
    let sub = Subheader::from_bytes(block);
    make_mode2(lsn, sub, &block[SUBHEADER_SIZE.min(block.len())..])
}

/// Encode an absolute sector number as BCD minute/second/frame.
fn msf(sector: u32) -> [u8; 3] {
    let bcd = |v: u32| (((v / 10) << 4) | (v % 10)) as u8;
    [bcd(sector / (60 * 75)), bcd((sector / 75) % 60), bcd(sector % 75)]
}

/// Decode the BCD MSF header of a raw sector back to a logical sector number.
pub fn header_lsn(raw: &[u8]) -> u32 {
    let dec = |b: u8| ((b >> 4) * 10 + (b & 0x0F)) as u32;
    (dec(raw[12]) * 60 + dec(raw[13])) * 75 + dec(raw[14]) - PREGAP_SECTORS
}

const fn edc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut edc = i as u32;
        let mut bit = 0;
        while bit < 8 {
            edc = (edc >> 1) ^ if edc & 1 != 0 { 0xD801_8001 } else { 0 };
            bit += 1;
        }
        table[i] = edc;
        i += 1;
    }
    table
}

static EDC_TABLE: [u32; 256] = edc_table();

/// CD-ROM error detection code (CRC-32, polynomial 0xD8018001 reflected).
pub fn edc(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |edc, &b| {
        (edc >> 8) ^ EDC_TABLE[((edc ^ b as u32) & 0xFF) as usize]
    })
}

const fn ecc_tables() -> ([u8; 256], [u8; 256]) {
    let mut f = [0u8; 256];
    let mut b = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let j = ((i << 1) ^ if i & 0x80 != 0 { 0x11D } else { 0 }) as u8;
        f[i] = j;
        b[i ^ j as usize] = i as u8;
        i += 1;
    }
    (f, b)
}

static ECC_TABLES: ([u8; 256], [u8; 256]) = ecc_tables();

/// One Reed-Solomon parity pass over `src` writing `2 * major_count` bytes to
/// `dest`.
fn ecc_block(
    src: &[u8],
    major_count: usize,
    minor_count: usize,
    major_mult: usize,
    minor_inc: usize,
    dest: &mut [u8],
) {
    let (f_lut, b_lut) = &ECC_TABLES;
    let size = major_count * minor_count;
    for major in 0..major_count {
        let mut index = (major >> 1) * major_mult + (major & 1);
        let mut a = 0u8;
        let mut b = 0u8;
        for _ in 0..minor_count {
            let t = src[index];
            index += minor_inc;
            if index >= size {
                index -= size;
            }
            a ^= t;
            b ^= t;
            a = f_lut[a as usize];
        }
        a = b_lut[(f_lut[a as usize] ^ b) as usize];
        dest[major] = a;
        dest[major + major_count] = a ^ b;
    }
}

/// Fill in the P and Q parity of a Form 1 sector.  Mode 2 computes parity
/// as if the header address were zero.
fn ecc_generate(raw: &mut [u8; RAW_SECTOR_SIZE]) {
    let header: [u8; 4] = [raw[12], raw[13], raw[14], raw[15]];
    raw[12..16].fill(0);

    // P parity covers 0x00C..0x81C, Q parity covers 0x00C..0x8C8 (data + P).
    let (src, rest) = raw.split_at_mut(0x81C);
    ecc_block(&src[0x0C..], 86, 24, 2, 86, &mut rest[..172]);
    let (src, rest) = raw.split_at_mut(0x8C8);
    ecc_block(&src[0x0C..], 52, 43, 86, 88, &mut rest[..104]);

    raw[12..16].copy_from_slice(&header);
}

/// The 2336 bytes following the header (subheader, data, EDC/ECC).
pub fn mode2_payload(raw: &[u8]) -> &[u8] {
    &raw[SUBHEADER_OFFSET..SUBHEADER_OFFSET + MODE2_RAW_SIZE]
}

/// The 2048 bytes of Form 1 user data.
pub fn form1_data(raw: &[u8]) -> &[u8] {
    &raw[DATA_OFFSET..DATA_OFFSET + FORM1_DATA_SIZE]
}
