use clap::error::ErrorKind;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Exit status for command line usage errors.
pub const EX_USAGE: i32 = 64;

#[derive(Parser, Debug)]
#[command(
    name = "psxbuild",
    version,
    about = "Create a PlayStation 1 CD-ROM XA image from a catalog file and a directory tree",
    disable_help_flag = true
)]
pub struct BuildArgs {
    /// Catalog file (`.cat` is appended when no extension is given)
    pub input: PathBuf,

    /// Image file base name, defaults to the catalog name (`.bin` is appended
    /// when no extension is given)
    pub output: Option<PathBuf>,

    /// Also write a cue file
    #[arg(short = 'c', long = "cuefile")]
    pub cue_file: bool,

    /// Print the filesystem layout and debug messages
    #[arg(short, long)]
    pub verbose: bool,

    /// Print help
    #[arg(short = '?', long, action = ArgAction::Help)]
    help: Option<bool>,
}

#[derive(Parser, Debug)]
#[command(
    name = "psxrip",
    version,
    about = "Dump the filesystem and system area of a PlayStation 1 disc image",
    disable_help_flag = true
)]
pub struct RipArgs {
    /// Image file (`.bin` is appended when no extension is given; a `.cue`
    /// file names its image)
    pub input: PathBuf,

    /// Output base name for the `.cat`, the `.sys` and the directory,
    /// defaults to the image name without extension
    pub output_dir: Option<PathBuf>,

    /// Write the start sector of every file and directory to the catalog
    #[arg(short = 'l', long = "lbns")]
    pub lbns: bool,

    /// Print a table of start sectors and sizes instead of dumping
    #[arg(short = 't', long = "lbn-table")]
    pub lbn_table: bool,

    /// Print debug messages
    #[arg(short, long)]
    pub verbose: bool,

    /// Print help
    #[arg(short = '?', long, action = ArgAction::Help)]
    help: Option<bool>,
}

#[derive(Parser, Debug)]
#[command(
    name = "psxinject",
    version,
    about = "Replace a file inside a PlayStation 1 disc image",
    disable_help_flag = true
)]
pub struct InjectArgs {
    /// Image file (`.bin` is appended when no extension is given; a `.cue`
    /// file names its image)
    pub input: PathBuf,

    /// Path of the file inside the image, e.g. `DATA/MOVIE.STR`
    pub repl_file_path: String,

    /// File holding the new contents
    pub new_file: PathBuf,

    /// Print debug messages
    #[arg(short, long)]
    pub verbose: bool,

    /// Print help
    #[arg(short = '?', long, action = ArgAction::Help)]
    help: Option<bool>,
}

/// Parse the command line.  Help and version requests exit with status 0,
/// every other parse failure with [`EX_USAGE`].
pub fn parse_or_exit<T: Parser>() -> T {
    match T::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EX_USAGE,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    }
}
