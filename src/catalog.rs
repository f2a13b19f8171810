//! Catalog descriptor files.
//!
//! A catalog is a line-oriented description of a disc: an optional
//! `system_area` section naming the boot data file, a `volume` section with
//! the PVD identifiers and dates, and one root `dir` section listing the
//! filesystem tree.  Host files are looked up relative to a base directory
//! while the tree is parsed.
//!
//! ```text
//! system_area {
//!   file "game.sys"
//! }
//! volume {
//!   system_id [PLAYSTATION]
//!   volume_id [GAME]
//!   creation_date 1998-07-21 12:34:56.00 36
//!   default_uid 0
//! }
//! dir {
//!   file SYSTEM.CNF
//!   xafile MOVIE.STR @500
//!   dir DATA {
//!     file LEVEL1.BIN
//!   }
//! }
//! ```

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{DiscError, Result};
use crate::layout::MAX_ISO_SECTORS;
use crate::iso9660::TERMINATOR_SECTOR;
use crate::tree::{NodeId, Tree};
use crate::volume::{
    LongTime, VolumeInfo, check_astring, check_dir_name, check_dstring, check_file_name,
};

/// A parsed catalog: volume metadata plus the filesystem tree.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub volume: VolumeInfo,
    pub tree: Tree,
}

/// Read and parse the catalog at `path`.  Host files are resolved under
/// `fs_base`.
pub fn load(path: &Path, fs_base: &Path) -> Result<Catalog> {
    let text = fs::read_to_string(path)
        .map_err(|e| DiscError::io(format!("Cannot open catalog file {}", path.display()), e))?;
    parse(&text, fs_base)
}

/// Parse catalog text.
pub fn parse(text: &str, fs_base: &Path) -> Result<Catalog> {
    let mut parser = Parser {
        lines: text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .into_iter(),
        volume: VolumeInfo::default(),
        tree: None,
    };
    parser.top_level(fs_base)?;

    let tree = parser
        .tree
        .ok_or_else(|| DiscError::validation("No root directory specified in catalog file"))?;
    Ok(Catalog {
        volume: parser.volume,
        tree,
    })
}

struct Parser<'a> {
    lines: std::vec::IntoIter<&'a str>,
    volume: VolumeInfo,
    tree: Option<Tree>,
}

fn unrecognized(line: &str, section: &str) -> DiscError {
    DiscError::syntax(format!("\"{line}\" unrecognized{section}"))
}

/// `keyword [value]`
fn bracketed<'l>(line: &'l str, keyword: &str) -> Option<&'l str> {
    line.strip_prefix(keyword)?
        .trim_start()
        .strip_prefix('[')?
        .strip_suffix(']')
}

/// `keyword value`; the value may be empty.
fn keyword<'l>(line: &'l str, keyword: &str) -> Option<&'l str> {
    let rest = line.strip_prefix(keyword)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

/// Split `NAME`, `NAME@LBN` or `NAME @LBN`.
fn name_and_lbn(spec: &str) -> Option<(&str, Option<&str>)> {
    let (name, lbn) = match spec.split_once('@') {
        Some((name, lbn)) => (name.trim_end(), Some(lbn.trim())),
        None => (spec, None),
    };
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, lbn))
}

/// Validate a placement request.  No request means 0 (allocate freely).
fn check_lbn(lbn: Option<&str>, item: &str) -> Result<u32> {
    let Some(s) = lbn else {
        return Ok(0);
    };
    let n = s
        .parse::<u32>()
        .ok()
        .filter(|_| s.bytes().all(|b| b.is_ascii_digit()))
        .ok_or_else(|| DiscError::validation(format!("Invalid start LBN '{s}' specified for '{item}'")))?;
    if n <= TERMINATOR_SECTOR || n >= MAX_ISO_SECTORS {
        return Err(DiscError::validation(format!(
            "Start LBN '{s}' of '{item}' is outside the valid range {TERMINATOR_SECTOR}..{MAX_ISO_SECTORS}"
        )));
    }
    Ok(n)
}

fn host_file_size(path: &Path) -> Result<u32> {
    let meta = fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => {
            DiscError::not_found(format!("File {} not found", path.display()))
        }
        _ => DiscError::io(format!("Cannot access {}", path.display()), e),
    })?;
    if !meta.is_file() {
        return Err(DiscError::not_found(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    u32::try_from(meta.len())
        .map_err(|_| DiscError::validation(format!("File {} is too large", path.display())))
}

impl Parser<'_> {
    fn top_level(&mut self, fs_base: &Path) -> Result<()> {
        while let Some(line) = self.lines.next() {
            let Some(rest) = line.strip_suffix('{').map(str::trim_end) else {
                return Err(unrecognized(line, ""));
            };
            match rest {
                "system_area" => self.system_area()?,
                "volume" => self.volume()?,
                "dir" => {
                    if self.tree.is_some() {
                        return Err(DiscError::validation(
                            "More than one root directory section in catalog file",
                        ));
                    }
                    let mut tree = Tree::new(fs_base);
                    let root = tree.root();
                    self.dir(&mut tree, root, "")?;
                    self.tree = Some(tree);
                }
                _ => return Err(unrecognized(line, "")),
            }
        }
        Ok(())
    }

    fn system_area(&mut self) -> Result<()> {
        loop {
            let line = self
                .lines
                .next()
                .ok_or_else(|| DiscError::syntax("unterminated system_area section"))?;
            if line == "}" {
                return Ok(());
            }
            let path = keyword(line, "file")
                .and_then(|rest| rest.strip_prefix('"')?.strip_suffix('"'))
                .filter(|p| !p.is_empty())
                .ok_or_else(|| unrecognized(line, " in system_area section"))?;
            self.volume.system_area_file = Some(PathBuf::from(path));
        }
    }

    fn volume(&mut self) -> Result<()> {
        loop {
            let line = self
                .lines
                .next()
                .ok_or_else(|| DiscError::syntax("unterminated volume section"))?;
            if line == "}" {
                return Ok(());
            }
            self.volume_line(line)?;
        }
    }

    fn volume_line(&mut self, line: &str) -> Result<()> {
        let vol = &mut self.volume;

        let astrings: [(&str, &mut String); 4] = [
            ("system_id", &mut vol.system_id),
            ("publisher_id", &mut vol.publisher_id),
            ("preparer_id", &mut vol.preparer_id),
            ("application_id", &mut vol.application_id),
        ];
        for (name, field) in astrings {
            if let Some(value) = bracketed(line, name) {
                check_astring(value, name)?;
                *field = value.to_string();
                return Ok(());
            }
        }

        let dstrings: [(&str, &mut String); 5] = [
            ("volume_id", &mut vol.volume_id),
            ("volume_set_id", &mut vol.volume_set_id),
            ("copyright_file_id", &mut vol.copyright_file_id),
            ("abstract_file_id", &mut vol.abstract_file_id),
            ("bibliographic_file_id", &mut vol.bibliographic_file_id),
        ];
        for (name, field) in dstrings {
            if let Some(value) = bracketed(line, name) {
                check_dstring(value, name)?;
                *field = value.to_string();
                return Ok(());
            }
        }

        let dates: [(&str, &mut LongTime); 4] = [
            ("creation_date", &mut vol.creation_date),
            ("modification_date", &mut vol.modification_date),
            ("expiration_date", &mut vol.expiration_date),
            ("effective_date", &mut vol.effective_date),
        ];
        for (name, field) in dates {
            if let Some(value) = keyword(line, name) {
                *field = LongTime::parse(value)?;
                return Ok(());
            }
        }

        let ids: [(&str, &str, &mut u16); 2] = [
            ("default_uid", "user", &mut vol.default_uid),
            ("default_gid", "group", &mut vol.default_gid),
        ];
        for (name, kind, field) in ids {
            if let Some(value) = keyword(line, name)
                && !value.is_empty()
                && value.bytes().all(|b| b.is_ascii_digit())
            {
                *field = value.parse().map_err(|_| {
                    DiscError::validation(format!("'{value}' is not a valid {kind} ID"))
                })?;
                return Ok(());
            }
        }

        Err(unrecognized(line, " in volume section"))
    }

    /// Parse the body of a `dir` section whose opening line has already
    /// been consumed.
    fn dir(&mut self, tree: &mut Tree, dir: NodeId, name: &str) -> Result<()> {
        loop {
            let line = self.lines.next().ok_or_else(|| {
                DiscError::syntax(format!("unterminated directory section \"{name}\""))
            })?;
            if line == "}" {
                break;
            }

            if let Some(rest) = keyword(line, "dir").and_then(|r| r.strip_suffix('{')) {
                let (sub_name, lbn) =
                    name_and_lbn(rest.trim_end()).ok_or_else(|| unrecognized(line, " in directory section"))?;
                check_dir_name(sub_name, "directory name")?;
                let start = check_lbn(lbn, sub_name)?;
                let path = tree[dir].path.join(sub_name);
                let sub = tree.add_dir(dir, sub_name, path, start);
                self.dir(tree, sub, sub_name)?;
                continue;
            }

            let (spec, form2) = if let Some(rest) = keyword(line, "file") {
                (rest, false)
            } else if let Some(rest) = keyword(line, "xafile") {
                (rest, true)
            } else {
                return Err(unrecognized(line, " in directory section"));
            };
            let (file_name, lbn) =
                name_and_lbn(spec).ok_or_else(|| unrecognized(line, " in directory section"))?;
            check_file_name(file_name, "file name")?;
            let start = check_lbn(lbn, file_name)?;
            let path = tree[dir].path.join(file_name);
            let size = host_file_size(&path)?;
            tree.add_file(dir, file_name, path, size, form2, start);
        }

        tree.finish_dir(dir);
        Ok(())
    }
}

/// Render the `system_area` section naming `path`.
pub fn system_area_section(path: &Path) -> String {
    format!("system_area {{\n  file \"{}\"\n}}\n\n", path.display())
}

/// Render the `volume` section.
pub fn volume_section(vol: &VolumeInfo) -> String {
    let mut out = String::from("volume {\n");
    let fields = [
        ("system_id", &vol.system_id),
        ("volume_id", &vol.volume_id),
        ("volume_set_id", &vol.volume_set_id),
        ("publisher_id", &vol.publisher_id),
        ("preparer_id", &vol.preparer_id),
        ("application_id", &vol.application_id),
        ("copyright_file_id", &vol.copyright_file_id),
        ("abstract_file_id", &vol.abstract_file_id),
        ("bibliographic_file_id", &vol.bibliographic_file_id),
    ];
    for (name, value) in fields {
        let _ = writeln!(out, "  {name} [{value}]");
    }
    let dates = [
        ("creation_date", &vol.creation_date),
        ("modification_date", &vol.modification_date),
        ("expiration_date", &vol.expiration_date),
        ("effective_date", &vol.effective_date),
    ];
    for (name, value) in dates {
        let _ = writeln!(out, "  {name} {value}");
    }
    let _ = writeln!(out, "  default_uid {}", vol.default_uid);
    let _ = writeln!(out, "  default_gid {}", vol.default_gid);
    out.push_str("}\n\n");
    out
}
