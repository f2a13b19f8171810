use psxdisc::build::{BuildOptions, BuildPaths, build};
use psxdisc::cli::{BuildArgs, parse_or_exit};
use psxdisc::logging;

fn main() -> miette::Result<()> {
    let args: BuildArgs = parse_or_exit();
    logging::init(args.verbose);

    let paths = BuildPaths::resolve(&args.input, args.output.as_deref());
    build(
        &paths,
        &BuildOptions {
            write_cue: args.cue_file,
            list_tree: args.verbose,
        },
    )?;
    Ok(())
}
