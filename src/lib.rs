#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod build;
pub mod catalog;
pub mod cli;
pub mod error;
pub mod image;
pub mod inject;
pub mod iso9660;
pub mod layout;
pub mod logging;
pub mod rip;
pub mod sector;
pub mod tree;
pub mod volume;
pub mod writer;
