//! Sector layout of a filesystem tree.
//!
//! Four passes run over a loaded [`Tree`], in this order:
//!
//! 1. [`DirectorySizer`] computes how many sectors each directory extent
//!    needs.  Only the directory's own sorted children matter, so any
//!    traversal works.
//! 2. [`Allocator`] assigns `first_sector` to every node, walking in
//!    [`EXTENT_ORDER`].  The image writer walks the same order, which is what
//!    keeps recorded addresses and actual data positions in agreement.
//! 3. [`DirectoryBuilder`] serializes every directory extent from the
//!    allocated addresses.
//! 4. [`PathTables`] walks breadth-first to number the directories and emit
//!    the little- and big-endian path tables.
//!
//! The sizer and the builder share [`place_record`], so the builder never
//! needs more room than the sizer reserved.

use crate::error::{DiscError, Result};
use crate::iso9660::{
    BLOCK_SIZE, Endian, FLAG_DIRECTORY, XA_FORM1_DIR, XA_FORM1_FILE, XA_FORM2_FILE, XA_LEN,
    XaAttr, dir_record, dir_record_size, push_path_table_entry,
};
use crate::tree::{EXTENT_ORDER, NodeId, NodeKind, Traversal, Tree, Visitor};

/// Sectors on a 74-minute disc.
pub const MAX_ISO_SECTORS: u32 = 74 * 60 * 75;

/// Offset at which a record of `len` bytes goes when the extent so far is
/// `offset` bytes long.  Records never straddle a sector boundary; one that
/// would is moved to the start of the next sector.
pub fn place_record(offset: usize, len: usize) -> usize {
    if offset % BLOCK_SIZE + len > BLOCK_SIZE {
        offset.next_multiple_of(BLOCK_SIZE)
    } else {
        offset
    }
}

/// Size of the "." and ".." records.
fn self_record_size() -> usize {
    dir_record_size(1, XA_LEN)
}

/// Byte length of the extent of directory `dir`, before rounding to whole
/// sectors.
pub fn directory_bytes(tree: &Tree, dir: NodeId) -> usize {
    let mut offset = 2 * self_record_size();
    for &child in &tree[dir].sorted_children {
        let len = dir_record_size(tree[child].name.len(), XA_LEN);
        offset = place_record(offset, len) + len;
    }
    offset
}

/// Sets `num_sectors` of every directory.
pub struct DirectorySizer;

impl Visitor for DirectorySizer {
    fn visit_dir(&mut self, tree: &mut Tree, id: NodeId) -> Result<()> {
        let bytes = directory_bytes(tree, id);
        tree[id].num_sectors = bytes.div_ceil(BLOCK_SIZE) as u32;
        Ok(())
    }
}

/// Assigns `first_sector` to every node from a single running cursor.
pub struct Allocator {
    cursor: u32,
}

impl Allocator {
    pub fn new(start_sector: u32) -> Self {
        Self {
            cursor: start_sector,
        }
    }

    /// One past the last allocated sector, i.e. the volume size.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    fn place(&mut self, tree: &mut Tree, id: NodeId) {
        let requested = tree[id].requested_start_sector;
        let first = if requested == 0 {
            self.cursor
        } else if requested < self.cursor {
            tracing::warn!(
                "{} will start at sector {} instead of {}",
                tree[id].path.display(),
                self.cursor,
                requested
            );
            self.cursor
        } else {
            requested
        };
        let node = &mut tree[id];
        node.first_sector = first;
        self.cursor = first + node.num_sectors;
    }
}

impl Visitor for Allocator {
    fn visit_file(&mut self, tree: &mut Tree, id: NodeId) -> Result<()> {
        self.place(tree, id);
        Ok(())
    }

    fn visit_dir(&mut self, tree: &mut Tree, id: NodeId) -> Result<()> {
        self.place(tree, id);
        Ok(())
    }
}

/// Run the sizer and the allocator.  Returns the volume size in sectors.
pub fn allocate(tree: &mut Tree, start_sector: u32) -> Result<u32> {
    tree.traverse(Traversal::Sorted, &mut DirectorySizer)?;

    let mut alloc = Allocator::new(start_sector);
    tree.traverse(EXTENT_ORDER, &mut alloc)?;

    let volume_sectors = alloc.cursor();
    if volume_sectors > MAX_ISO_SECTORS {
        let mib = MAX_ISO_SECTORS as u64 * crate::sector::RAW_SECTOR_SIZE as u64 / (1024 * 1024);
        tracing::warn!("Output image larger than {mib} MiB");
    }
    Ok(volume_sectors)
}

/// Serializes each directory's extent into its [`DirNode::extent`].
///
/// [`DirNode::extent`]: crate::tree::DirNode::extent
pub struct DirectoryBuilder {
    pub uid: u16,
    pub gid: u16,
    /// Recording time stamped on every record.
    pub time: [u8; 7],
}

impl DirectoryBuilder {
    fn push(extent: &mut Vec<u8>, offset: &mut usize, record: &[u8]) {
        let at = place_record(*offset, record.len());
        extent[at..at + record.len()].copy_from_slice(record);
        *offset = at + record.len();
    }
}

impl Visitor for DirectoryBuilder {
    fn visit_dir(&mut self, tree: &mut Tree, id: NodeId) -> Result<()> {
        let node = &tree[id];
        let dir_xa = XaAttr::new(0, 0, XA_FORM1_DIR, 0).to_bytes();
        let own_size = node.num_sectors * BLOCK_SIZE as u32;
        let parent = match node.parent {
            Some(p) => &tree[p],
            None => node,
        };
        let parent_size = parent.num_sectors * BLOCK_SIZE as u32;

        let mut extent = vec![0u8; own_size as usize];
        let mut offset = 0;
        Self::push(
            &mut extent,
            &mut offset,
            &dir_record(node.first_sector, own_size, &[0], FLAG_DIRECTORY, &self.time, &dir_xa),
        );
        Self::push(
            &mut extent,
            &mut offset,
            &dir_record(
                parent.first_sector,
                parent_size,
                &[1],
                FLAG_DIRECTORY,
                &self.time,
                &dir_xa,
            ),
        );

        for &child_id in &node.sorted_children {
            let child = &tree[child_id];
            let (size, flags, xa) = match &child.kind {
                NodeKind::File(f) if f.form2 => (
                    child.num_sectors * BLOCK_SIZE as u32,
                    0,
                    XaAttr::new(self.uid, self.gid, XA_FORM2_FILE, 1),
                ),
                NodeKind::File(f) => (f.size, 0, XaAttr::new(self.uid, self.gid, XA_FORM1_FILE, 0)),
                NodeKind::Dir(_) => (
                    child.num_sectors * BLOCK_SIZE as u32,
                    FLAG_DIRECTORY,
                    XaAttr::new(0, 0, XA_FORM1_DIR, 0),
                ),
            };
            let record = dir_record(
                child.first_sector,
                size,
                child.name.as_bytes(),
                flags,
                &self.time,
                &xa.to_bytes(),
            );
            Self::push(&mut extent, &mut offset, &record);
        }

        if let Some(dir) = tree[id].as_dir_mut() {
            dir.extent = extent;
        }
        Ok(())
    }
}

/// Little- and big-endian path tables.  Visit with
/// [`Traversal::BreadthFirstSorted`]; assigns each directory's record number.
#[derive(Debug, Default)]
pub struct PathTables {
    pub l_table: Vec<u8>,
    pub m_table: Vec<u8>,
    records: u16,
}

impl PathTables {
    pub fn build(tree: &mut Tree) -> Result<Self> {
        let mut tables = Self::default();
        tree.traverse(Traversal::BreadthFirstSorted, &mut tables)?;
        if tables.size() > BLOCK_SIZE {
            return Err(DiscError::PathTableOverflow {
                size: tables.size(),
            });
        }
        Ok(tables)
    }

    pub fn size(&self) -> usize {
        self.l_table.len()
    }
}

impl Visitor for PathTables {
    fn visit_dir(&mut self, tree: &mut Tree, id: NodeId) -> Result<()> {
        let parent_record = match tree[id].parent {
            Some(p) => tree[p].as_dir().map_or(1, |d| d.record_number),
            None => 1,
        };
        let node = &tree[id];
        let name = node.name.as_bytes();
        push_path_table_entry(
            &mut self.l_table,
            name,
            node.first_sector,
            parent_record,
            Endian::Little,
        );
        push_path_table_entry(
            &mut self.m_table,
            name,
            node.first_sector,
            parent_record,
            Endian::Big,
        );
        let record = self
            .records
            .checked_add(1)
            .ok_or(DiscError::PathTableOverflow { size: self.size() })?;
        self.records = record;
        if let Some(dir) = tree[id].as_dir_mut() {
            dir.record_number = record;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iso9660::{DirEntry, ROOT_DIR_SECTOR};
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Run `f` with a subscriber that records warnings, returning them.
    fn warnings_during<T>(f: impl FnOnce() -> T) -> (T, String) {
        let buffer = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        let text = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
        (result, text)
    }

    fn build_tree(names: &[&str]) -> Tree {
        let mut tree = Tree::new("base");
        let root = tree.root();
        for name in names {
            tree.add_file(root, name, format!("base/{name}"), 100, false, 0);
        }
        tree.finish_dir(root);
        tree
    }

    /// Walk the records of an extent the way a reader does.
    fn records(extent: &[u8]) -> Vec<(usize, DirEntry)> {
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < extent.len() {
            match DirEntry::parse(&extent[offset..]) {
                Some(e) => {
                    let len = extent[offset] as usize;
                    out.push((offset, e));
                    offset += len;
                }
                None => offset = (offset / BLOCK_SIZE + 1) * BLOCK_SIZE,
            }
        }
        out
    }

    #[test]
    fn place_record_pads_only_on_overflow() {
        assert_eq!(place_record(0, 48), 0);
        assert_eq!(place_record(2000, 48), 2000);
        assert_eq!(place_record(2001, 48), 2048);
        assert_eq!(place_record(4096, 100), 4096);
    }

    #[test]
    fn small_directory_is_one_sector() {
        let mut tree = build_tree(&["A.BIN", "B.BIN"]);
        allocate(&mut tree, ROOT_DIR_SECTOR).unwrap();
        assert_eq!(tree[tree.root()].num_sectors, 1);
    }

    #[test]
    fn records_never_straddle_sectors() {
        let names: Vec<String> = (0..80).map(|i| format!("FILE_{i:04}.DAT")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut tree = build_tree(&refs);
        allocate(&mut tree, ROOT_DIR_SECTOR).unwrap();
        let root = tree.root();
        assert!(tree[root].num_sectors > 1);

        let mut builder = DirectoryBuilder {
            uid: 0,
            gid: 0,
            time: [0; 7],
        };
        tree.traverse(Traversal::Sorted, &mut builder).unwrap();
        let extent = &tree[root].as_dir().unwrap().extent;
        assert_eq!(extent.len(), tree[root].num_sectors as usize * BLOCK_SIZE);

        let recs = records(extent);
        assert_eq!(recs.len(), 82);
        for (offset, _) in &recs {
            let len = extent[*offset] as usize;
            assert!(offset % BLOCK_SIZE + len <= BLOCK_SIZE);
        }
        assert_eq!(recs[2].1.name, "FILE_0000.DAT;1");
        assert_eq!(recs[81].1.name, "FILE_0079.DAT;1");
    }

    #[test]
    fn unconstrained_allocation_is_contiguous() {
        let mut tree = Tree::new("base");
        let root = tree.root();
        let a = tree.add_file(root, "A", "base/A", 5000, false, 0);
        let sub = tree.add_dir(root, "SUB", "base/SUB", 0);
        let b = tree.add_file(sub, "B", "base/SUB/B", 0, false, 0);
        tree.finish_dir(sub);
        let c = tree.add_file(root, "C", "base/C", 3 * 2336, true, 0);
        tree.finish_dir(root);

        let size = allocate(&mut tree, ROOT_DIR_SECTOR).unwrap();
        assert_eq!(tree[root].first_sector, 22);
        assert_eq!(tree[a].first_sector, 23);
        assert_eq!(tree[sub].first_sector, 26);
        assert_eq!(tree[b].first_sector, 27);
        assert_eq!(tree[c].first_sector, 28);
        assert_eq!(size, 31);
    }

    #[test]
    fn satisfiable_request_leaves_gap() {
        let mut tree = Tree::new("base");
        let root = tree.root();
        let a = tree.add_file(root, "A", "base/A", 10, false, 0);
        let data = tree.add_file(root, "DATA.BIN", "base/DATA.BIN", 10, false, 500);
        let after = tree.add_file(root, "Z", "base/Z", 10, false, 0);
        tree.finish_dir(root);

        allocate(&mut tree, ROOT_DIR_SECTOR).unwrap();
        assert_eq!(tree[a].first_sector, 23);
        assert_eq!(tree[data].first_sector, 500);
        assert_eq!(tree[after].first_sector, 501);
    }

    #[test]
    fn overlapping_request_is_overridden() {
        let mut tree = Tree::new("base");
        let root = tree.root();
        let a = tree.add_file(root, "A", "base/A", 20 * 2048, false, 0);
        let b = tree.add_file(root, "B", "base/B", 10, false, 30);
        tree.finish_dir(root);

        let (result, logs) = warnings_during(|| allocate(&mut tree, ROOT_DIR_SECTOR));
        result.unwrap();
        assert_eq!(tree[a].first_sector, 23);
        assert_eq!(tree[b].first_sector, 43);
        assert!(logs.contains("base/B will start at sector 43 instead of 30"));
    }

    #[test]
    fn unconstrained_allocation_logs_nothing() {
        let mut tree = build_tree(&["A.BIN", "B.BIN"]);
        let (result, logs) = warnings_during(|| allocate(&mut tree, ROOT_DIR_SECTOR));
        result.unwrap();
        assert!(logs.is_empty(), "{logs}");
    }

    #[test]
    fn oversized_image_is_written_with_a_warning() {
        let mut tree = Tree::new("base");
        let root = tree.root();
        tree.add_file(root, "BIG.DAT", "base/BIG.DAT", 2000 * 2048, false, 332_000);
        tree.finish_dir(root);

        let (result, logs) = warnings_during(|| allocate(&mut tree, ROOT_DIR_SECTOR));
        assert_eq!(result.unwrap(), 334_000);
        assert!(logs.contains("Output image larger than 746 MiB"));
    }

    #[test]
    fn path_table_record_numbers_cannot_wrap() {
        let mut tree = Tree::new("base");
        let root = tree.root();
        tree.finish_dir(root);
        let mut tables = PathTables {
            records: u16::MAX,
            ..Default::default()
        };
        let err = tables.visit_dir(&mut tree, root).unwrap_err();
        assert!(matches!(err, DiscError::PathTableOverflow { .. }));
    }

    #[test]
    fn directory_records_carry_sizes_and_parent() {
        let mut tree = Tree::new("base");
        let root = tree.root();
        let sub = tree.add_dir(root, "SUB", "base/SUB", 0);
        let xa = tree.add_file(sub, "MOVIE.STR", "base/SUB/MOVIE.STR", 2336 * 4, true, 0);
        tree.finish_dir(sub);
        let f = tree.add_file(root, "A.TXT", "base/A.TXT", 123, false, 0);
        tree.finish_dir(root);

        allocate(&mut tree, ROOT_DIR_SECTOR).unwrap();
        let mut builder = DirectoryBuilder {
            uid: 5,
            gid: 6,
            time: [0; 7],
        };
        tree.traverse(Traversal::Sorted, &mut builder).unwrap();

        let root_recs = records(&tree[root].as_dir().unwrap().extent);
        let names: Vec<&str> = root_recs.iter().map(|(_, e)| e.name.as_str()).collect();
        assert_eq!(names, [".", "..", "A.TXT;1", "SUB"]);
        assert_eq!(root_recs[1].1.extent, tree[root].first_sector);
        assert_eq!(root_recs[2].1.size, 123);
        assert_eq!(root_recs[2].1.extent, tree[f].first_sector);
        assert_eq!(root_recs[2].1.xa.unwrap().user_id, 5);
        assert!(root_recs[3].1.is_dir());
        assert_eq!(root_recs[3].1.size, 2048);

        let sub_recs = records(&tree[sub].as_dir().unwrap().extent);
        assert_eq!(sub_recs[1].1.extent, tree[root].first_sector);
        let movie = &sub_recs[2].1;
        assert!(movie.is_form2());
        assert_eq!(movie.size, 4 * 2048);
        assert_eq!(movie.extent, tree[xa].first_sector);
        assert_eq!(movie.xa.unwrap().file_number, 1);
    }

    #[test]
    fn path_tables_number_breadth_first() {
        let mut tree = Tree::new("base");
        let root = tree.root();
        let b = tree.add_dir(root, "B", "base/B", 0);
        let deep = tree.add_dir(b, "DEEP", "base/B/DEEP", 0);
        tree.finish_dir(deep);
        tree.finish_dir(b);
        let a = tree.add_dir(root, "A", "base/A", 0);
        tree.finish_dir(a);
        tree.finish_dir(root);

        allocate(&mut tree, ROOT_DIR_SECTOR).unwrap();
        let tables = PathTables::build(&mut tree).unwrap();

        let number = |id| tree[id].as_dir().unwrap().record_number;
        assert_eq!(number(root), 1);
        assert_eq!(number(a), 2);
        assert_eq!(number(b), 3);
        assert_eq!(number(deep), 4);

        // root(10) + A(10) + B(10) + DEEP(12)
        assert_eq!(tables.size(), 42);
        assert_eq!(tables.m_table.len(), tables.l_table.len());
        // DEEP's parent is B (record 3).
        assert_eq!(&tables.l_table[30 + 6..30 + 8], &3u16.to_le_bytes());
        assert_eq!(&tables.m_table[30 + 6..30 + 8], &3u16.to_be_bytes());
    }

    #[test]
    fn path_table_overflow_is_fatal() {
        let mut tree = Tree::new("base");
        let root = tree.root();
        for i in 0..200 {
            let d = tree.add_dir(root, &format!("DIRECTORY_{i:03}"), "base", 0);
            tree.finish_dir(d);
        }
        tree.finish_dir(root);
        allocate(&mut tree, ROOT_DIR_SECTOR).unwrap();
        let err = PathTables::build(&mut tree).unwrap_err();
        assert!(matches!(err, DiscError::PathTableOverflow { .. }));
    }
}
