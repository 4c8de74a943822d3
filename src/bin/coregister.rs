//! Rigidly (then affinely) register a set of MR images to a template image
//! (e.g., a T1-w template, or per-subject templates).

use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::bail;
use clap::{ArgAction, Parser};
use tracing::{error, Level};

use norm_core::pipeline::{self, TemplateSpec};
use norm_core::register::{RegisterOpts, TransformKind};

#[derive(Parser, Debug)]
#[command(
    name = "coregister",
    about = "Coregister a set of MR images to a template (e.g., to a standard \
             space or to per-subject T1 images)"
)]
struct Args {
    /// Directory with the images to be registered (should all be T1w contrast)
    #[arg(short, long)]
    img_dir: PathBuf,

    /// Directory to output the corresponding registered image files
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Template image to register every image to
    #[arg(short, long, conflicts_with = "template_dir")]
    template: Option<PathBuf>,

    /// Directory of per-subject templates, in correspondence with the images
    #[arg(long)]
    template_dir: Option<PathBuf>,

    /// Output orientation of the registered images
    #[arg(long, default_value = "RAI")]
    orientation: String,

    /// Registration transform class (Rigid or Affine)
    #[arg(short, long, default_value = "Affine")]
    registration: String,

    /// Do not do rigid registration first
    #[arg(long)]
    no_rigid: bool,

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
    let template = match (&args.template, &args.template_dir) {
        (Some(file), None) => TemplateSpec::Single(file.clone()),
        (None, Some(dir)) => TemplateSpec::PerSubject(dir.clone()),
        _ => bail!("exactly one of --template or --template-dir must be given"),
    };

    let opts = RegisterOpts {
        kind: TransformKind::from_str(&args.registration)?,
        rigid_prealign: !args.no_rigid,
    };

    pipeline::coregister_directory(
        &args.img_dir,
        &template,
        &args.output_dir,
        &opts,
        &args.orientation,
    )?;
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
