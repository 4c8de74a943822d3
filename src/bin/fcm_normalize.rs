//! Model the tissue classes of the brain with fuzzy c-means and use the
//! found WM mean to normalize NIfTI MR images.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::bail;
use clap::{ArgAction, Parser};
use tracing::{error, Level};

use norm_core::pipeline;

#[derive(Parser, Debug)]
#[command(
    name = "fcm-normalize",
    about = "Use FCM to model the tissue classes of the brain and use the found \
             WM mean to normalize NIfTI MR images"
)]
struct Args {
    /// Path to a directory of/single NIfTI MR image of the brain
    #[arg(short, long)]
    image: PathBuf,

    /// Brain mask (directory or file); provide this if not providing a WM
    /// mask (step 1)
    #[arg(short = 'm', long)]
    brain_mask: Option<PathBuf>,

    /// WM mask found through FCM (directory or file); provide this if not
    /// providing the brain mask (step 2)
    #[arg(short = 'w', long)]
    wm_mask: Option<PathBuf>,

    /// Output directory for normalized images (default: directory containing
    /// the image in single-img mode, otherwise ./fcm)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Contrast of the images being normalized (must be t1 when calculating
    /// the WM masks)
    #[arg(short, long, default_value = "t1")]
    contrast: String,

    /// Normalize the WM of the image to this value
    #[arg(short, long, default_value_t = 1.0)]
    norm_value: f64,

    /// Image and mask are individual files, not directories
    #[arg(short, long)]
    single_img: bool,

    /// Increase output verbosity (e.g. -vv is more than -v)
    #[arg(short, long, action = ArgAction::Count)]
    verbosity: u8,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn run(args: &Args) -> anyhow::Result<()> {
    if args.brain_mask.is_some() == args.wm_mask.is_some() {
        bail!("only one of {{brain mask, wm mask}} should be given");
    }

    if args.single_img {
        if !args.image.is_file() {
            bail!("if single-img option on, then image must be a file");
        }
        pipeline::fcm_normalize_single(
            &args.image,
            args.brain_mask.as_deref(),
            args.wm_mask.as_deref(),
            args.output_dir.as_deref(),
            &args.contrast,
            args.norm_value,
        )?;
    } else {
        if !args.image.is_dir() {
            bail!("if single-img option off, then image and brain-mask must be directories");
        }
        if let Some(mask_dir) = &args.brain_mask {
            if !mask_dir.is_dir() {
                bail!("if single-img option off, then image and brain-mask must be directories");
            }
        }
        pipeline::fcm_normalize_directory(
            &args.image,
            args.brain_mask.as_deref(),
            args.wm_mask.as_deref(),
            args.output_dir.as_deref(),
            &args.contrast,
            args.norm_value,
        )?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbosity);
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
