//! Replace the contents of one file inside an existing image.
//!
//! The file keeps its extent: the new data must fit in the sectors the
//! original occupied.  Only the payload sectors and the single directory
//! sector holding the file's record are rewritten; the record's data
//! length field is the only byte range of the directory that changes.

use std::fs::File;
use std::path::Path;

use crate::error::{DiscError, Result};
use crate::image::{DiscImage, ImageFormat};
use crate::iso9660::{BLOCK_SIZE, DirEntry, patch_record_size};
use crate::sector::Subheader;
use crate::tree::{FORM1_BLOCK_SIZE, FORM2_BLOCK_SIZE, file_sectors};
use crate::writer::read_full;

/// What [`inject`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injected {
    pub extent: u32,
    pub sectors: u32,
    /// Value written to the record's data length field.
    pub recorded_size: u32,
}

/// The file's own record plus the directory that holds it.
struct Target {
    entry: DirEntry,
    dir_path: String,
    dir: DirEntry,
    search_name: String,
}

fn find_target(image: &mut DiscImage, target: &str) -> Result<Target> {
    let target = target.trim_start_matches('/');
    let versioned = format!("{target};1");
    let Some((entry, _)) = image.stat(&versioned)? else {
        return Err(DiscError::not_found(format!("Cannot find '{target}' in image")));
    };
    if entry.is_dir() {
        return Err(DiscError::not_found(format!(
            "'{target}' does not refer to a file"
        )));
    }

    let (dir_path, file_name) = match target.rsplit_once('/') {
        Some((dir, name)) => (dir.to_string(), name),
        None => ("/".to_string(), target),
    };
    let Some((dir, _)) = image.stat(&dir_path)? else {
        return Err(DiscError::not_found(format!("Cannot find '{dir_path}' in image")));
    };
    if !dir.is_dir() {
        return Err(DiscError::not_found(format!(
            "'{dir_path}' does not refer to a directory"
        )));
    }

    Ok(Target {
        entry,
        dir_path,
        dir,
        search_name: format!("{file_name};1"),
    })
}

/// Scan the sectors of `dir` for a non-directory record named `name`.
/// Returns the directory sector index, its data and the record offset.
fn scan_directory(
    image: &mut DiscImage,
    dir: &DirEntry,
    name: &str,
) -> Result<Option<(u32, Vec<u8>, usize)>> {
    for index in 0..dir.sectors() {
        let data = image.read_data(dir.extent + index)?;
        let mut offset = 0;
        while offset < BLOCK_SIZE {
            let len = data[offset] as usize;
            if len == 0 {
                offset += 1;
                continue;
            }
            if let Some(entry) = DirEntry::parse(&data[offset..])
                && !entry.is_dir()
                && entry.name == name
            {
                return Ok(Some((index, data, offset)));
            }
            offset += len;
        }
    }
    Ok(None)
}

/// Replace file `target` (a `/`-separated path inside the image, without
/// version suffix) with the contents of `new_file`.
///
/// Everything is looked up and checked with the image opened read-only; it
/// is reopened for writing only once the replacement is known to fit.
pub fn inject(image_path: &Path, target: &str, new_file: &Path) -> Result<Injected> {
    let mut image = DiscImage::open(image_path)?;
    let found = find_target(&mut image, target)?;

    let form2 = found.entry.is_form2();
    let extent = found.entry.extent;
    // An empty file still owns one sector.
    let max_sectors = found.entry.sectors().max(1);
    tracing::info!(
        "'{target}' (form {}) found at LBN {extent}, length = {max_sectors} sectors ({} bytes)",
        if form2 { 2 } else { 1 },
        found.entry.size
    );

    let new_size = std::fs::metadata(new_file)
        .map_err(|e| DiscError::io(format!("Cannot access {}", new_file.display()), e))?
        .len();
    let block_size = if form2 { FORM2_BLOCK_SIZE } else { FORM1_BLOCK_SIZE };

    if form2 {
        if image.format() != ImageFormat::RawMode2 {
            return Err(DiscError::validation(format!(
                "'{target}' is a form 2 file but '{}' is not a raw mode 2 image",
                image_path.display()
            )));
        }
        if new_size % block_size as u64 != 0 {
            return Err(DiscError::validation(format!(
                "'{target}' is a form 2 file but the size of {} is not a multiple of {block_size} bytes",
                new_file.display()
            )));
        }
    }

    let new_size = u32::try_from(new_size).map_err(|_| DiscError::Capacity {
        path: new_file.display().to_string(),
        needed: u32::MAX,
        available: max_sectors,
        bytes: max_sectors as u64 * block_size as u64,
    })?;
    let sectors = file_sectors(new_size, block_size);
    if sectors > max_sectors {
        return Err(DiscError::Capacity {
            path: new_file.display().to_string(),
            needed: sectors,
            available: max_sectors,
            bytes: max_sectors as u64 * block_size as u64,
        });
    }

    let Some((dir_index, mut dir_data, offset)) =
        scan_directory(&mut image, &found.dir, &found.search_name)?
    else {
        return Err(DiscError::not_found(format!(
            "'{}' not found in directory '{}'",
            found.search_name, found.dir_path
        )));
    };

    let mut source = File::open(new_file)
        .map_err(|e| DiscError::io(format!("Cannot open file {}", new_file.display()), e))?;
    drop(image);
    let mut image = DiscImage::open_rw(image_path)?;
    let mut block = vec![0u8; block_size as usize];
    for i in 0..sectors {
        block.fill(0);
        read_full(&mut source, &mut block)
            .map_err(|e| DiscError::io(format!("Error reading {}", new_file.display()), e))?;
        if form2 {
            image.write_form2_block(extent + i, &block)?;
        } else {
            image.write_sector(extent + i, Subheader::data_extent(i, sectors), &block)?;
        }
    }

    let recorded_size = if form2 {
        sectors * BLOCK_SIZE as u32
    } else {
        new_size
    };
    patch_record_size(&mut dir_data[offset..], recorded_size);
    image.write_sector(
        found.dir.extent + dir_index,
        Subheader::data_extent(dir_index, found.dir.sectors()),
        &dir_data,
    )?;
    image.flush()?;

    Ok(Injected {
        extent,
        sectors,
        recorded_size,
    })
}
