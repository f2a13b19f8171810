//! Turn a catalog and a host directory tree into a disc image.

use std::path::{Path, PathBuf};

use crate::catalog;
use crate::error::Result;
use crate::iso9660::ROOT_DIR_SECTOR;
use crate::layout::{DirectoryBuilder, PathTables, allocate};
use crate::tree::{EXTENT_ORDER, NodeId, NodeKind, Traversal, Tree, Visitor};
use crate::writer::{ImagePlan, write_cue_file, write_image_file};

/// File names involved in a build, derived from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPaths {
    pub catalog: PathBuf,
    /// Host directory the catalog's root `dir` maps to.
    pub fs_base: PathBuf,
    pub image: PathBuf,
    pub cue: PathBuf,
}

impl BuildPaths {
    /// `input` names the catalog, `.cat` is appended when it has no
    /// extension.  `output` defaults to the input without its extension.
    pub fn resolve(input: &Path, output: Option<&Path>) -> Self {
        let catalog = if input.extension().is_none() {
            input.with_extension("cat")
        } else {
            input.to_path_buf()
        };
        let fs_base = input.with_extension("");
        let base = output.map_or_else(|| fs_base.clone(), Path::to_path_buf);
        let image = if base.extension().is_none() {
            base.with_extension("bin")
        } else {
            base.clone()
        };
        Self {
            catalog,
            fs_base,
            cue: image.with_extension("cue"),
            image,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub write_cue: bool,
    /// Print every node with its address after allocation.
    pub list_tree: bool,
}

/// Prints the allocated tree.
struct Listing;

impl Visitor for Listing {
    fn visit_file(&mut self, tree: &mut Tree, id: NodeId) -> Result<()> {
        let node = &tree[id];
        if let NodeKind::File(file) = &node.kind {
            println!(
                "{} ({} sectors @ {}, {} bytes)",
                node.path.display(),
                node.num_sectors,
                node.first_sector,
                file.size
            );
        }
        Ok(())
    }

    fn visit_dir(&mut self, tree: &mut Tree, id: NodeId) -> Result<()> {
        let node = &tree[id];
        if let NodeKind::Dir(dir) = &node.kind {
            println!(
                "{} ({} sectors @ {}, PT record {})",
                node.path.display(),
                node.num_sectors,
                node.first_sector,
                dir.record_number
            );
        }
        Ok(())
    }
}

/// Lay out `tree` from the root directory sector onwards.  Returns the
/// volume size in sectors and the path tables.
pub fn lay_out(tree: &mut Tree, dir_time: [u8; 7], uid: u16, gid: u16) -> Result<(u32, PathTables)> {
    let volume_sectors = allocate(tree, ROOT_DIR_SECTOR)?;
    tree.traverse(
        Traversal::Sorted,
        &mut DirectoryBuilder {
            uid,
            gid,
            time: dir_time,
        },
    )?;
    let tables = PathTables::build(tree)?;
    tracing::debug!(
        "{volume_sectors} sectors, path table {} bytes",
        tables.size()
    );
    Ok((volume_sectors, tables))
}

/// Run a complete build.
pub fn build(paths: &BuildPaths, options: &BuildOptions) -> Result<()> {
    println!("Reading catalog file {}...", paths.catalog.display());
    println!(
        "Reading filesystem from directory {}...",
        paths.fs_base.display()
    );
    let catalog::Catalog { volume, mut tree } = catalog::load(&paths.catalog, &paths.fs_base)?;

    let (volume_sectors, tables) = lay_out(
        &mut tree,
        volume.creation_date.to_dir_time(),
        volume.default_uid,
        volume.default_gid,
    )?;

    if options.list_tree {
        tree.traverse(EXTENT_ORDER, &mut Listing)?;
    }

    write_image_file(
        &paths.image,
        &mut tree,
        &ImagePlan {
            volume: &volume,
            volume_sectors,
            tables: &tables,
        },
    )?;
    println!("Image file written to {}", paths.image.display());

    if options.write_cue {
        write_cue_file(&paths.cue, &paths.image)?;
        println!("Cue file written to {}", paths.cue.display());
    }
    Ok(())
}
