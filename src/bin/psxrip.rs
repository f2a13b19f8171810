use psxdisc::cli::{RipArgs, parse_or_exit};
use psxdisc::image::{DiscImage, resolve_image_path};
use psxdisc::logging;
use psxdisc::rip::{RipOutput, lbn_table, rip};

fn main() -> miette::Result<()> {
    let args: RipArgs = parse_or_exit();
    logging::init(args.verbose);

    let image_path = resolve_image_path(&args.input)?;
    println!("Analyzing image {}...", image_path.display());
    let mut image = DiscImage::open(&image_path)?;

    if args.lbn_table {
        lbn_table(&mut image, &mut std::io::stdout().lock())?;
        return Ok(());
    }

    let base = args
        .output_dir
        .unwrap_or_else(|| args.input.with_extension(""));
    rip(&mut image, &RipOutput::new(&base), args.lbns)?;
    Ok(())
}
