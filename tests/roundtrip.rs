use std::fs;
use std::path::{Path, PathBuf};

use psxdisc::build::{BuildOptions, BuildPaths, build};
use psxdisc::error::DiscError;
use psxdisc::image::{DiscImage, ImageFormat};
use psxdisc::inject::inject;
use psxdisc::rip::{RipOutput, lbn_table, rip};
use psxdisc::iso9660::DIR_RECORD_SIZE_OFFSET;
use psxdisc::sector::{RAW_SECTOR_SIZE, SM_DATA, SM_FORM2, Subheader, header_lsn};

const SYSTEM_CNF: &[u8] = b"BOOT = cdrom:\\MAIN.EXE;1\nTCB = 4\nEVENT = 10\n";

const CATALOG: &str = r#"
volume {
  system_id [PLAYSTATION]
  volume_id [ROUNDTRIP]
  publisher_id [TEST]
  creation_date 1999-03-04 05:06:07.08 36
  default_uid 7
  default_gid 9
}

dir {
  file SYSTEM.CNF
  dir DATA {
    file EMPTY.BIN
    file LEVEL.DAT
  }
  xafile MOVIE.STR @500
}
"#;

/// Three Form 2 sectors with a realistic subheader in front of each.
fn movie() -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..3u8 {
        let mut block = vec![i.wrapping_mul(31); 2336];
        block[..8].copy_from_slice(&[1, 1, SM_FORM2 | SM_DATA, 0, 1, 1, SM_FORM2 | SM_DATA, 0]);
        data.extend(block);
    }
    data
}

fn level() -> Vec<u8> {
    (0..5000u32).map(|i| (i % 251) as u8).collect()
}

/// Write a catalog and its host tree into `dir` and build `game.bin`.
fn build_game(dir: &Path) -> PathBuf {
    let host = dir.join("game");
    fs::create_dir_all(host.join("DATA")).unwrap();
    fs::write(host.join("SYSTEM.CNF"), SYSTEM_CNF).unwrap();
    fs::write(host.join("DATA/EMPTY.BIN"), b"").unwrap();
    fs::write(host.join("DATA/LEVEL.DAT"), level()).unwrap();
    fs::write(host.join("MOVIE.STR"), movie()).unwrap();
    fs::write(dir.join("game.cat"), CATALOG).unwrap();

    let paths = BuildPaths::resolve(&host, None);
    build(&paths, &BuildOptions::default()).unwrap();
    paths.image
}

#[test]
fn image_layout() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = build_game(dir.path());

    let bytes = fs::read(&image_path).unwrap();
    assert_eq!(bytes.len() % RAW_SECTOR_SIZE, 0);
    assert_eq!(bytes.len() / RAW_SECTOR_SIZE, 503);

    let mut image = DiscImage::open(&image_path).unwrap();
    assert_eq!(image.format(), ImageFormat::RawMode2);
    assert_eq!(image.pvd().volume.volume_id, "ROUNDTRIP");
    assert_eq!(image.pvd().volume_sectors, 503);
    assert_eq!(image.root().extent, 22);

    let (cnf, _) = image.stat("SYSTEM.CNF").unwrap().unwrap();
    assert_eq!((cnf.extent, cnf.size), (23, SYSTEM_CNF.len() as u32));
    let (data, _) = image.stat("DATA").unwrap().unwrap();
    assert!(data.is_dir());
    assert_eq!(data.extent, 24);
    let (empty, _) = image.stat("DATA/EMPTY.BIN").unwrap().unwrap();
    assert_eq!((empty.extent, empty.size), (25, 0));
    let (level, _) = image.stat("DATA/LEVEL.DAT;1").unwrap().unwrap();
    assert_eq!((level.extent, level.size), (26, 5000));

    let (movie, _) = image.stat("MOVIE.STR").unwrap().unwrap();
    assert!(movie.is_form2());
    assert_eq!(movie.extent, 500);
    assert_eq!(movie.size, 3 * 2048);
    let xa = movie.xa.unwrap();
    assert_eq!((xa.user_id, xa.group_id), (7, 9));

    // Everything between LEVEL.DAT and MOVIE.STR is padding.
    for lsn in [29, 300, 499] {
        let raw = image.read_raw(lsn).unwrap();
        assert_eq!(header_lsn(&raw), lsn);
        assert_eq!(raw[18], SM_FORM2);
    }
}

#[test]
fn rip_and_rebuild_is_identical() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = build_game(dir.path());

    let ripped = dir.path().join("ripped");
    let mut image = DiscImage::open(&image_path).unwrap();
    rip(&mut image, &RipOutput::new(&ripped), true).unwrap();

    assert_eq!(fs::read(ripped.join("SYSTEM.CNF")).unwrap(), SYSTEM_CNF);
    assert_eq!(fs::read(ripped.join("DATA/LEVEL.DAT")).unwrap(), level());
    assert_eq!(fs::metadata(ripped.join("DATA/EMPTY.BIN")).unwrap().len(), 0);
    assert_eq!(fs::metadata(dir.path().join("ripped.sys")).unwrap().len(), 0);

    // Form 2 payloads come back with the subheader and data intact.
    let movie_out = fs::read(ripped.join("MOVIE.STR")).unwrap();
    assert_eq!(movie_out.len(), 3 * 2336);
    for (got, want) in movie_out.chunks(2336).zip(movie().chunks(2336)) {
        assert_eq!(got[..2332], want[..2332]);
    }

    let catalog = fs::read_to_string(dir.path().join("ripped.cat")).unwrap();
    assert!(catalog.starts_with("system_area {\n"));
    assert!(catalog.contains("  volume_id [ROUNDTRIP]\n"));
    assert!(catalog.contains("  creation_date 1999-03-04 05:06:07.08 36\n"));
    assert!(catalog.contains("  default_uid 7\n"));
    assert!(catalog.contains("  default_gid 9\n"));
    assert!(catalog.contains("\ndir {\n  file SYSTEM.CNF @23\n  dir DATA @24 {\n"));
    assert!(catalog.contains("    file EMPTY.BIN @25\n    file LEVEL.DAT @26\n  }\n"));
    assert!(catalog.contains("  xafile MOVIE.STR @500\n}\n"));

    let paths = BuildPaths::resolve(&ripped, Some(&dir.path().join("again")));
    build(&paths, &BuildOptions::default()).unwrap();
    assert_eq!(fs::read(&paths.image).unwrap(), fs::read(&image_path).unwrap());
}

#[test]
fn lbn_table_lists_every_entry() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = build_game(dir.path());

    let mut image = DiscImage::open(&image_path).unwrap();
    let mut out = Vec::new();
    lbn_table(&mut image, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(
        lines,
        [
            "     LBN   NumSec     Size T Path",
            "00000016 00000001 00000800 d ",
            "00000017 00000001 0000002c f SYSTEM.CNF",
            "00000018 00000001 00000800 d DATA",
            "00000019 00000000 00000000 f DATA/EMPTY.BIN",
            "0000001a 00000003 00001388 f DATA/LEVEL.DAT",
            "000001f4 00000003 00001b60 x MOVIE.STR",
        ]
    );
}

#[test]
fn inject_replaces_contents_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = build_game(dir.path());

    let mut image = DiscImage::open(&image_path).unwrap();
    let root = image.root().clone();
    let before = image.readdir(&root).unwrap();
    let (_, cnf_location) = image.stat("SYSTEM.CNF").unwrap().unwrap();
    let cnf_location = cnf_location.unwrap();
    let dir_before = image.read_data(cnf_location.sector).unwrap();
    drop(image);

    let new_cnf = b"BOOT = cdrom:\\OTHER.EXE;1\n";
    let new_path = dir.path().join("new.cnf");
    fs::write(&new_path, new_cnf).unwrap();
    let done = inject(&image_path, "SYSTEM.CNF", &new_path).unwrap();
    assert_eq!(done.extent, 23);
    assert_eq!(done.sectors, 1);
    assert_eq!(done.recorded_size, new_cnf.len() as u32);

    let mut image = DiscImage::open(&image_path).unwrap();
    let root = image.root().clone();
    let after = image.readdir(&root).unwrap();
    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.location, new.location);
        if new.entry.name == "SYSTEM.CNF;1" {
            assert_eq!(new.entry.size, new_cnf.len() as u32);
            assert_eq!(new.entry.extent, old.entry.extent);
        } else {
            assert_eq!(old.entry, new.entry);
        }
    }

    // Only the 8-byte data length field of the directory sector changes.
    let dir_after = image.read_data(cnf_location.sector).unwrap();
    let size_field = cnf_location.offset + DIR_RECORD_SIZE_OFFSET;
    assert_eq!(dir_before[..size_field], dir_after[..size_field]);
    assert_eq!(dir_before[size_field + 8..], dir_after[size_field + 8..]);
    assert_ne!(dir_before[size_field..size_field + 8], dir_after[size_field..size_field + 8]);

    let data = image.read_data(23).unwrap();
    assert_eq!(&data[..new_cnf.len()], new_cnf);
    assert!(data[new_cnf.len()..].iter().all(|&b| b == 0));

    // The rewritten sector carries the same subheader as a freshly built one.
    let raw = image.read_raw(23).unwrap();
    assert_eq!(header_lsn(&raw), 23);
    assert_eq!(raw[18] & SM_DATA, SM_DATA);
}

#[test]
fn inject_form2_file() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = build_game(dir.path());

    let mut replacement = movie();
    replacement.truncate(2 * 2336);
    let new_path = dir.path().join("short.str");
    fs::write(&new_path, &replacement).unwrap();

    let done = inject(&image_path, "MOVIE.STR", &new_path).unwrap();
    assert_eq!(done.sectors, 2);
    assert_eq!(done.recorded_size, 2 * 2048);

    let mut image = DiscImage::open(&image_path).unwrap();
    let (movie, _) = image.stat("MOVIE.STR").unwrap().unwrap();
    assert_eq!(movie.extent, 500);
    assert_eq!(movie.size, 2 * 2048);
    assert!(movie.is_form2());
}

#[test]
fn inject_form2_needs_whole_sectors() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = build_game(dir.path());

    let new_path = dir.path().join("odd.str");
    fs::write(&new_path, vec![0u8; 2336 + 1]).unwrap();
    let err = inject(&image_path, "MOVIE.STR", &new_path).unwrap_err();
    assert!(matches!(err, DiscError::Validation { .. }));
    assert!(err.to_string().contains("not a multiple of 2336"));
}

#[test]
fn inject_too_large_leaves_image_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = build_game(dir.path());
    let original = fs::read(&image_path).unwrap();

    let new_path = dir.path().join("big.dat");
    fs::write(&new_path, vec![0xAAu8; 4 * 2048]).unwrap();
    let err = inject(&image_path, "DATA/LEVEL.DAT", &new_path).unwrap_err();
    match err {
        DiscError::Capacity {
            needed,
            available,
            bytes,
            ..
        } => {
            assert_eq!((needed, available, bytes), (4, 3, 3 * 2048));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fs::read(&image_path).unwrap(), original);
}

#[test]
fn inject_lookup_errors() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = build_game(dir.path());
    let new_path = dir.path().join("x");
    fs::write(&new_path, b"x").unwrap();

    let err = inject(&image_path, "NOPE.BIN", &new_path).unwrap_err();
    assert!(matches!(err, DiscError::NotFound { .. }));
    assert_eq!(err.to_string(), "Cannot find 'NOPE.BIN' in image");
}

#[test]
fn empty_file_can_be_injected_into_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = build_game(dir.path());
    let new_path = dir.path().join("empty");
    fs::write(&new_path, b"").unwrap();

    let done = inject(&image_path, "DATA/EMPTY.BIN", &new_path).unwrap();
    assert_eq!((done.extent, done.sectors, done.recorded_size), (25, 1, 0));
}

#[test]
fn rip_skips_names_that_escape_the_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = build_game(dir.path());

    let mut image = DiscImage::open_rw(&image_path).unwrap();
    let (_, location) = image.stat("SYSTEM.CNF").unwrap().unwrap();
    let location = location.unwrap();
    let mut sector = image.read_data(location.sector).unwrap();
    let name = location.offset + 33;
    assert_eq!(&sector[name..name + 12], b"SYSTEM.CNF;1");
    sector[name..name + 12].copy_from_slice(b"../PWNED.B;1");
    image
        .write_sector(location.sector, Subheader::data_extent(0, 1), &sector)
        .unwrap();
    image.flush().unwrap();
    drop(image);

    let work = dir.path().join("work");
    let mut image = DiscImage::open(&image_path).unwrap();
    rip(&mut image, &RipOutput::new(&work.join("ripped")), false).unwrap();

    assert!(!work.join("PWNED.B").exists());
    assert!(!work.join("ripped/SYSTEM.CNF").exists());
    assert_eq!(fs::read(work.join("ripped/DATA/LEVEL.DAT")).unwrap(), level());
    let catalog = fs::read_to_string(work.join("ripped.cat")).unwrap();
    assert!(!catalog.contains("PWNED"));
    assert!(catalog.contains("  file LEVEL.DAT\n"));
}

#[test]
fn inject_lookup_works_on_read_only_images() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = build_game(dir.path());
    let mut perms = fs::metadata(&image_path).unwrap().permissions();
    perms.set_readonly(true);
    fs::set_permissions(&image_path, perms).unwrap();

    let new_path = dir.path().join("x");
    fs::write(&new_path, b"x").unwrap();
    let err = inject(&image_path, "DATA/NOPE.BIN", &new_path).unwrap_err();
    assert!(matches!(err, DiscError::NotFound { .. }));
    assert_eq!(err.to_string(), "Cannot find 'DATA/NOPE.BIN' in image");
}
