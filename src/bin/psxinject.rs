use psxdisc::cli::{InjectArgs, parse_or_exit};
use psxdisc::image::resolve_image_path;
use psxdisc::inject::inject;
use psxdisc::logging;

fn main() -> miette::Result<()> {
    let args: InjectArgs = parse_or_exit();
    logging::init(args.verbose);

    let image_path = resolve_image_path(&args.input)?;
    inject(&image_path, &args.repl_file_path, &args.new_file)?;
    println!(
        "File '{}' replaced in {}",
        args.repl_file_path,
        image_path.display()
    );
    Ok(())
}
