//! Basic preprocessing of a set of NIfTI MR brain images: bias-field
//! correction, resampling, and reorientation. Requires brain masks for all
//! images.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing::{error, Level};

use norm_core::pipeline;
use norm_core::preprocess::{BiasOpts, PreprocessOpts};

#[derive(Parser, Debug)]
#[command(
    name = "preprocess",
    about = "Do some basic preprocessing on a set of NIfTI MR images of the \
             brain (i.e., bias field correction, resampling, reorientation)"
)]
struct Args {
    /// Directory with the images to be processed (should all be T1w contrast)
    #[arg(short, long)]
    img_dir: PathBuf,

    /// Directory with the corresponding brain masks
    #[arg(short, long)]
    mask_dir: PathBuf,

    /// Output directory for preprocessed files
    #[arg(short, long)]
    out_dir: PathBuf,

    /// Resolution for resampled images in mm (x y z)
    #[arg(short, long, num_args = 3, default_values_t = [1.0, 1.0, 1.0])]
    resolution: Vec<f64>,

    /// Orientation of the preprocessed images
    #[arg(long, default_value = "RAI")]
    orientation: String,

    /// Maximum bias-correction iterations per resolution level
    #[arg(long, num_args = 1.., default_values_t = [200usize, 200, 200, 200])]
    bias_iters: Vec<usize>,

    /// Bias-correction convergence tolerance
    #[arg(long, default_value_t = 0.0005)]
    bias_tol: f64,

    /// Run bias correction only once instead of twice (twice often works
    /// better, and is the default)
    #[arg(long)]
    bias_once: bool,

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
    let opts = PreprocessOpts {
        resolution: (args.resolution[0], args.resolution[1], args.resolution[2]),
        orientation: args.orientation.clone(),
        bias: BiasOpts {
            iters: args.bias_iters.clone(),
            tol: args.bias_tol,
        },
        bias_once: args.bias_once,
    };

    let summary = pipeline::preprocess_directory(&args.img_dir, &args.mask_dir, &args.out_dir, &opts)?;
    summary.into_result()?;
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
