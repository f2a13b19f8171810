//! Disassemble an image into a catalog, a system area file and a host
//! directory tree that the builder can turn back into an image.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::catalog::{system_area_section, volume_section};
use crate::error::{DiscError, Result};
use crate::image::{DiscImage, ImageFormat, Record};
use crate::iso9660::{BLOCK_SIZE, DirEntry};
use crate::sector::{SM_DATA, SUBHEADER_SIZE};
use crate::tree::FORM2_BLOCK_SIZE;
use crate::writer::SYSTEM_AREA_SECTORS;

/// Output files of a rip.
#[derive(Debug, Clone)]
pub struct RipOutput {
    pub catalog: PathBuf,
    pub system_area: PathBuf,
    pub tree: PathBuf,
}

impl RipOutput {
    /// `<base>.cat`, `<base>.sys` and the directory `<base>/`.
    pub fn new(base: &Path) -> Self {
        Self {
            catalog: base.with_extension("cat"),
            system_area: base.with_extension("sys"),
            tree: base.to_path_buf(),
        }
    }
}

fn strip_version(name: &str) -> &str {
    match name.rfind(';') {
        Some(i) => &name[..i],
        None => name,
    }
}

fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Whether `name` can be used as a single path component on the host.
fn is_host_safe(name: &str) -> bool {
    !name.contains(['/', '\\', '\0'])
        && matches!(
            Path::new(name).components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        )
}

/// Directory entries sorted by start sector, which recovers declaration order
/// for images laid out contiguously.
fn sorted_by_lsn(mut records: Vec<Record>) -> Vec<DirEntry> {
    records.sort_by_key(|r| r.entry.extent);
    records.into_iter().map(|r| r.entry).collect()
}

/// Copy the system area to `path`, stopping at the first sector that does
/// not hold plain data.
fn dump_system_area(image: &mut DiscImage, path: &Path) -> Result<()> {
    let mut out = File::create(path)
        .map_err(|e| DiscError::io(format!("Cannot create system area file {}", path.display()), e))?;
    for sector in 0..SYSTEM_AREA_SECTORS {
        let data = match image.format() {
            ImageFormat::RawMode2 => {
                let buf = image.read_mode2(sector)?;
                if buf[2] != SM_DATA {
                    break;
                }
                buf[SUBHEADER_SIZE..SUBHEADER_SIZE + BLOCK_SIZE].to_vec()
            }
            ImageFormat::Iso => {
                let buf = image.read_data(sector)?;
                if buf.iter().all(|&b| b == 0) {
                    break;
                }
                buf
            }
        };
        out.write_all(&data).map_err(|e| {
            DiscError::io(format!("Cannot write to system area file {}", path.display()), e)
        })?;
    }
    Ok(())
}

struct Ripper<'a> {
    image: &'a mut DiscImage,
    write_lbns: bool,
    catalog: String,
    /// Owner and group of the first file seen, recorded as catalog defaults.
    default_ids: Option<(u16, u16)>,
}

impl Ripper<'_> {
    fn dump_dir(
        &mut self,
        dir: &DirEntry,
        image_path: &str,
        out_dir: &Path,
        level: usize,
    ) -> Result<()> {
        tracing::debug!("Dumping '{image_path}' to {}", out_dir.display());
        fs::create_dir_all(out_dir)
            .map_err(|e| DiscError::io(format!("Cannot create directory {}", out_dir.display()), e))?;

        let indent = "  ".repeat(level);
        if level == 0 {
            self.catalog.push_str("dir {\n");
        } else {
            self.catalog.push_str(&format!("{indent}dir {}", dir.name));
            if self.write_lbns {
                self.catalog.push_str(&format!(" @{}", dir.extent));
            }
            self.catalog.push_str(" {\n");
        }

        let records = self.image.readdir(dir)?;
        for entry in sorted_by_lsn(records) {
            if entry.is_self_or_parent() {
                continue;
            }
            let host_name = if entry.is_dir() {
                entry.name.as_str()
            } else {
                strip_version(&entry.name)
            };
            if !is_host_safe(host_name) {
                tracing::warn!(
                    "Skipping '{}' whose name cannot be used as a file name",
                    join(image_path, &entry.name)
                );
                continue;
            }
            if entry.is_dir() {
                let path = join(image_path, &entry.name);
                self.dump_dir(&entry, &path, &out_dir.join(&entry.name), level + 1)?;
            } else {
                self.dump_file(&entry, image_path, out_dir, level + 1)?;
            }
        }

        self.catalog.push_str(&format!("{indent}}}\n"));
        Ok(())
    }

    fn dump_file(
        &mut self,
        entry: &DirEntry,
        dir_path: &str,
        out_dir: &Path,
        level: usize,
    ) -> Result<()> {
        let name = strip_version(&entry.name);
        let path = join(dir_path, name);

        if let Some(xa) = entry.xa {
            if xa.is_form2() {
                tracing::debug!(
                    "XA file '{name}' size = {}, secsize = {}, group_id = {}, user_id = {}, attributes = {:04x}, filenum = {}",
                    entry.size,
                    entry.sectors(),
                    xa.group_id,
                    xa.user_id,
                    xa.attributes,
                    xa.file_number
                );
            }
            if xa.is_cdda() {
                println!("Skipping '{path}' which is a CD-DA file");
                return Ok(());
            }
            self.default_ids.get_or_insert((xa.user_id, xa.group_id));
        }

        let form2 = entry.is_form2();
        let keyword = if form2 { "xafile" } else { "file" };
        self.catalog
            .push_str(&format!("{}{keyword} {name}", "  ".repeat(level)));
        if self.write_lbns {
            self.catalog.push_str(&format!(" @{}", entry.extent));
        }
        self.catalog.push('\n');

        let out_path = out_dir.join(name);
        let mut out = File::create(&out_path)
            .map_err(|e| DiscError::io(format!("Cannot create output file {}", out_path.display()), e))?;

        let block_size = u64::from(if form2 { FORM2_BLOCK_SIZE } else { BLOCK_SIZE as u32 });
        let mut remaining = if form2 {
            entry.sectors() as u64 * block_size
        } else {
            entry.size as u64
        };

        for i in 0..entry.sectors() {
            let lsn = entry.extent + i;
            let read = if form2 {
                self.image.read_mode2(lsn)
            } else {
                self.image.read_data(lsn)
            };
            let data = match read {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!("{e}");
                    tracing::warn!("Output file {} may be incomplete", out_path.display());
                    break;
                }
            };
            let n = remaining.min(block_size) as usize;
            out.write_all(&data[..n])
                .map_err(|e| DiscError::io(format!("Cannot write to file {}", out_path.display()), e))?;
            remaining -= n as u64;
        }
        Ok(())
    }
}

/// Rip `image` into `output`.  With `write_lbns`, every
/// file and subdirectory in the catalog carries its start sector.
pub fn rip(image: &mut DiscImage, output: &RipOutput, write_lbns: bool) -> Result<()> {
    let pvd = image.pvd().clone();
    println!("Volume ID = {}", pvd.volume.volume_id);

    dump_system_area(image, &output.system_area)?;
    println!("System area data written to {}", output.system_area.display());

    println!("Dumping filesystem to directory {}...", output.tree.display());
    let mut ripper = Ripper {
        image,
        write_lbns,
        catalog: String::new(),
        default_ids: None,
    };
    ripper.dump_dir(&pvd.root, "", &output.tree, 0)?;

    let mut volume = pvd.volume;
    if let Some((uid, gid)) = ripper.default_ids {
        volume.default_uid = uid;
        volume.default_gid = gid;
    }
    let text = format!(
        "{}{}{}",
        system_area_section(&output.system_area),
        volume_section(&volume),
        ripper.catalog
    );
    fs::write(&output.catalog, text).map_err(|e| {
        DiscError::io(format!("Cannot create catalog file {}", output.catalog.display()), e)
    })?;
    println!("Catalog written to {}", output.catalog.display());
    Ok(())
}

/// Print the start sector, sector count, size and type of every directory
/// and file.  Directories come first, followed by their entries in sector
/// order; subdirectories are expanded in place.
pub fn lbn_table(image: &mut DiscImage, out: &mut impl Write) -> Result<()> {
    let write_err = |e| DiscError::io("Error writing LBN table", e);
    writeln!(out, "{:>8} {:>8} {:>8} T Path", "LBN", "NumSec", "Size").map_err(write_err)?;
    let root = image.root().clone();
    lbn_table_dir(image, &root, "", out)?;
    out.flush().map_err(write_err)
}

fn lbn_table_dir(
    image: &mut DiscImage,
    dir: &DirEntry,
    path: &str,
    out: &mut impl Write,
) -> Result<()> {
    let write_err = |e| DiscError::io("Error writing LBN table", e);
    let records = image.readdir(dir)?;
    let this = records
        .iter()
        .find(|r| r.entry.name == ".")
        .map_or(dir, |r| &r.entry);
    writeln!(
        out,
        "{:08x} {:08x} {:08x} d {path}",
        this.extent,
        this.sectors(),
        this.size
    )
    .map_err(write_err)?;

    for entry in sorted_by_lsn(records) {
        if entry.is_self_or_parent() {
            continue;
        }
        let entry_path = join(path, strip_version(&entry.name));
        if entry.is_dir() {
            lbn_table_dir(image, &entry, &entry_path, out)?;
            continue;
        }
        let (kind, size) = if entry.is_cdda() {
            ('a', entry.size)
        } else if entry.is_form2() {
            ('x', entry.sectors() * FORM2_BLOCK_SIZE)
        } else {
            ('f', entry.size)
        };
        writeln!(
            out,
            "{:08x} {:08x} {:08x} {kind} {entry_path}",
            entry.extent,
            entry.sectors(),
            size
        )
        .map_err(write_err)?;
    }
    Ok(())
}
