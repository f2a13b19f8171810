//! Raw Mode 2 image output.
//!
//! The image is written strictly front to back: system area, volume
//! descriptors, path tables, then every directory and file extent in
//! [`EXTENT_ORDER`].  Sectors skipped by a placement request are filled
//! with empty Form 2 sectors, so each extent lands exactly at the address
//! the allocator gave it.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{DiscError, Result};
use crate::iso9660::{
    BLOCK_SIZE, PVD_SECTOR, PvdLayout, ROOT_DIR_SECTOR, pvd, terminator,
};
use crate::layout::PathTables;
use crate::sector::{
    RAW_SECTOR_SIZE, SM_DATA, SM_EOF, SM_EOR, SM_FORM2, Subheader, make_mode2,
    make_mode2_from_raw,
};
use crate::tree::{EXTENT_ORDER, NodeId, NodeKind, Tree, Visitor};
use crate::volume::VolumeInfo;

/// Sectors 0..16 hold console boot data.
pub const SYSTEM_AREA_SECTORS: u32 = PVD_SECTOR;

/// Writes consecutive raw sectors, tracking the current sector number.
pub struct ImageWriter<W: Write> {
    out: W,
    sector: u32,
    /// Name used in error messages.
    name: String,
}

impl<W: Write> ImageWriter<W> {
    pub fn new(out: W, name: impl Into<String>) -> Self {
        Self {
            out,
            sector: 0,
            name: name.into(),
        }
    }

    /// Number of the next sector to be written.
    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, raw: &[u8; RAW_SECTOR_SIZE]) -> Result<()> {
        self.out
            .write_all(raw)
            .map_err(|e| DiscError::io(format!("Error writing to image file {}", self.name), e))?;
        self.sector += 1;
        Ok(())
    }

    /// Write one sector of Form 1 or Form 2 data.
    pub fn put(&mut self, sub: Subheader, data: &[u8]) -> Result<()> {
        let raw = make_mode2(self.sector, sub, data);
        self.emit(&raw)
    }

    /// Write an empty Form 2 sector.
    pub fn put_empty(&mut self) -> Result<()> {
        self.put(Subheader::data(SM_FORM2), &[])
    }

    /// Fill with empty sectors up to (not including) `until`.
    pub fn gap(&mut self, until: u32) -> Result<()> {
        while self.sector < until {
            self.put_empty()?;
        }
        Ok(())
    }

    /// Sectors 0..16.  Data from `file` (at most 32 KiB) goes into DATA
    /// sectors, the rest is empty.
    pub fn system_area(&mut self, file: Option<&Path>) -> Result<()> {
        let mut data = vec![0u8; SYSTEM_AREA_SECTORS as usize * BLOCK_SIZE];
        let mut len = 0;
        if let Some(path) = file {
            let mut f = File::open(path).map_err(|e| {
                DiscError::io(
                    format!("Cannot open system area file \"{}\"", path.display()),
                    e,
                )
            })?;
            len = read_full(&mut f, &mut data).map_err(|e| {
                DiscError::io(
                    format!("Error reading system area file \"{}\"", path.display()),
                    e,
                )
            })?;
        }

        let data_sectors = len.div_ceil(BLOCK_SIZE);
        for chunk in data.chunks(BLOCK_SIZE).take(data_sectors) {
            self.put(Subheader::data(SM_DATA), chunk)?;
        }
        self.gap(SYSTEM_AREA_SECTORS)
    }

    /// PVD, terminator and the four path table copies.
    pub fn descriptors(&mut self, pvd: &[u8], tables: &PathTables) -> Result<()> {
        let table_end = Subheader::data(SM_DATA | SM_EOF | SM_EOR);
        self.put(Subheader::data(SM_DATA | SM_EOR), pvd)?;
        self.put(table_end, &terminator())?;
        self.put(table_end, &tables.l_table)?;
        self.put(table_end, &tables.l_table)?;
        self.put(table_end, &tables.m_table)?;
        self.put(table_end, &tables.m_table)
    }

    fn write_file(&mut self, tree: &Tree, id: NodeId) -> Result<()> {
        let node = &tree[id];
        let NodeKind::File(file) = &node.kind else {
            return Ok(());
        };
        let mut f = File::open(&node.path)
            .map_err(|e| DiscError::io(format!("Cannot open file {}", node.path.display()), e))?;
        tracing::debug!("Writing \"{}\"...", node.path.display());

        self.gap(node.first_sector)?;
        let mut block = vec![0u8; file.block_size() as usize];
        for i in 0..node.num_sectors {
            block.fill(0);
            read_full(&mut f, &mut block)
                .map_err(|e| DiscError::io(format!("Error reading {}", node.path.display()), e))?;
            if file.form2 {
                let raw = make_mode2_from_raw(self.sector, &block);
                self.emit(&raw)?;
            } else {
                self.put(Subheader::data_extent(i, node.num_sectors), &block)?;
            }
        }
        Ok(())
    }

    fn write_dir(&mut self, tree: &Tree, id: NodeId) -> Result<()> {
        let node = &tree[id];
        let Some(dir) = node.as_dir() else {
            return Ok(());
        };
        self.gap(node.first_sector)?;
        for i in 0..node.num_sectors {
            let start = i as usize * BLOCK_SIZE;
            let chunk = dir.extent.get(start..start + BLOCK_SIZE).unwrap_or(&[]);
            self.put(Subheader::data_extent(i, node.num_sectors), chunk)?;
        }
        Ok(())
    }
}

impl<W: Write> Visitor for ImageWriter<W> {
    fn visit_file(&mut self, tree: &mut Tree, id: NodeId) -> Result<()> {
        self.write_file(tree, id)
    }

    fn visit_dir(&mut self, tree: &mut Tree, id: NodeId) -> Result<()> {
        self.write_dir(tree, id)
    }
}

/// Read into `buf` until it is full or the reader hits end of file.
/// Returns the number of bytes read; the rest of `buf` is left untouched.
pub fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Everything the writer needs beyond the tree itself.
pub struct ImagePlan<'a> {
    pub volume: &'a VolumeInfo,
    pub volume_sectors: u32,
    pub tables: &'a PathTables,
}

/// Write a complete image of an allocated and laid out `tree`.
pub fn write_image<W: Write>(
    writer: &mut ImageWriter<W>,
    tree: &mut Tree,
    plan: &ImagePlan<'_>,
) -> Result<()> {
    let root = &tree[tree.root()];
    let layout = PvdLayout {
        volume_sectors: plan.volume_sectors,
        root_dir_sector: root.first_sector,
        root_dir_size: root.num_sectors * BLOCK_SIZE as u32,
        path_table_size: plan.tables.size() as u32,
    };

    tracing::debug!("Writing system area...");
    writer.system_area(plan.volume.system_area_file.as_deref())?;

    tracing::debug!("Writing volume descriptors and path tables...");
    debug_assert_eq!(writer.sector(), PVD_SECTOR);
    writer.descriptors(&pvd(plan.volume, &layout), plan.tables)?;
    debug_assert_eq!(writer.sector(), ROOT_DIR_SECTOR);

    tree.traverse(EXTENT_ORDER, writer)?;
    writer.gap(plan.volume_sectors)
}

/// Create `path` and write the image into it.
pub fn write_image_file(path: &Path, tree: &mut Tree, plan: &ImagePlan<'_>) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| DiscError::io(format!("Error creating image file {}", path.display()), e))?;
    let mut writer = ImageWriter::new(BufWriter::new(file), path.display().to_string());
    write_image(&mut writer, tree, plan)?;
    writer
        .into_inner()
        .flush()
        .map_err(|e| DiscError::io(format!("Error writing to image file {}", path.display()), e))
}

/// Cue sheet describing a single Mode 2 track stored in `image_name`.
pub fn cue_sheet(image_name: &str) -> String {
    format!("FILE \"{image_name}\" BINARY\r\n  TRACK 01 MODE2/2352\r\n    INDEX 01 00:00:00\r\n")
}

pub fn write_cue_file(path: &Path, image: &Path) -> Result<()> {
    let name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.display().to_string());
    std::fs::write(path, cue_sheet(&name))
        .map_err(|e| DiscError::io(format!("Error creating cue file {}", path.display()), e))
}
