use clap::{Args, Parser, Subcommand};
use facealign_core::config::Config;
use facealign_core::{reference, AlignMode, FaceAligner, LandmarkSubset, TemplateModel};
use image::DynamicImage;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "facealign")]
#[command(about = "Align faces to a canonical 68-point landmark template", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of the default search path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Args, Clone)]
struct AlignArgs {
    /// Transform model: affine3 or similarity
    #[arg(short, long)]
    mode: Option<AlignMode>,
    /// Landmark subset: outer_eyes_and_nose, inner_eyes_and_bottom_lip or all_points
    #[arg(short, long)]
    subset: Option<LandmarkSubset>,
    /// Output edge length in pixels
    #[arg(long)]
    size: Option<u32>,
    /// Face scale within the output canvas
    #[arg(long)]
    scale: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Align a face image using detected landmarks
    Align {
        /// Input image
        image: PathBuf,
        /// Landmark file (.json or whitespace-separated text)
        landmarks: PathBuf,
        /// Output image path
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        options: AlignArgs,
        /// Save landmark overlay of the input image
        #[arg(long)]
        debug: Option<String>,
    },
    /// Print the fitted transform for a landmark file
    Inspect {
        /// Landmark file (.json or whitespace-separated text)
        landmarks: PathBuf,
        #[command(flatten)]
        options: AlignArgs,
    },
    /// Print template landmark coordinates
    Template {
        /// Print min-max normalized coordinates instead of raw ones
        #[arg(long)]
        normalized: bool,
        /// Only print points of this subset
        #[arg(short, long)]
        subset: Option<LandmarkSubset>,
    },
    /// Print the 5-point reference template
    Reference,
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let config_path = cli.config;
    match cli.command {
        Commands::Align { image, landmarks, output, options, debug } => {
            cmd_align(config_path, image, landmarks, output, options, debug)
        }
        Commands::Inspect { landmarks, options } => cmd_inspect(config_path, landmarks, options),
        Commands::Template { normalized, subset } => cmd_template(normalized, subset),
        Commands::Reference => cmd_reference(),
        Commands::Config { validate } => cmd_config(config_path, validate),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            log::debug!("Loading config from {}", path.display());
            Config::load_from_path(path)?
        }
        None => Config::load()?,
    };
    Ok(config)
}

/// Config file values overridden by whatever was given on the command line
fn build_aligner(config_path: Option<PathBuf>, args: AlignArgs) -> anyhow::Result<FaceAligner> {
    let mut config = load_config(config_path)?;

    if let Some(mode) = args.mode {
        // A new mode brings its own default subset unless one is given too
        if mode != config.alignment.mode && args.subset.is_none() {
            config.alignment.subset = None;
        }
        config.alignment.mode = mode;
    }
    if let Some(subset) = args.subset {
        config.alignment.subset = Some(subset);
    }
    if let Some(size) = args.size {
        config.alignment.size = size;
    }
    if let Some(scale) = args.scale {
        config.alignment.scale = scale;
    }

    Ok(FaceAligner::new(config)?)
}

fn cmd_align(
    config_path: Option<PathBuf>,
    image_path: PathBuf,
    landmarks_path: PathBuf,
    output: PathBuf,
    args: AlignArgs,
    debug: Option<String>,
) -> anyhow::Result<()> {
    let aligner = build_aligner(config_path, args)?;
    let options = aligner.options();

    let image = image::open(&image_path)?;
    let landmarks = facealign_core::landmarks::load_landmarks(&landmarks_path)?;
    println!(
        "Aligning {} ({}x{}, {} landmarks)",
        image_path.display(),
        image.width(),
        image.height(),
        landmarks.len()
    );

    let start = Instant::now();
    // Keep the input channel layout where the warp supports it
    let debug_path = debug.as_deref();
    let (aligned, overlay) = match image {
        DynamicImage::ImageLuma8(gray) => {
            let (aligned, overlay) = aligner.align_with_debug(&gray, &landmarks, debug_path)?;
            (DynamicImage::ImageLuma8(aligned), overlay)
        }
        DynamicImage::ImageLumaA8(gray) => {
            let (aligned, overlay) = aligner.align_with_debug(&gray, &landmarks, debug_path)?;
            (DynamicImage::ImageLumaA8(aligned), overlay)
        }
        DynamicImage::ImageRgba8(rgba) => {
            let (aligned, overlay) = aligner.align_with_debug(&rgba, &landmarks, debug_path)?;
            (DynamicImage::ImageRgba8(aligned), overlay)
        }
        other => {
            let rgb = other.to_rgb8();
            let (aligned, overlay) = aligner.align_with_debug(&rgb, &landmarks, debug_path)?;
            (DynamicImage::ImageRgb8(aligned), overlay)
        }
    };
    let duration = start.elapsed();

    aligned.save(&output)?;

    println!("✓ Aligned face saved: {}", output.display());
    println!(
        "Mode: {}, subset: {}, output: {}x{}",
        options.mode,
        options.subset,
        aligned.width(),
        aligned.height()
    );
    println!("Time: {:.2}ms", duration.as_secs_f64() * 1000.0);

    match overlay {
        Some(path) => println!("📷 Debug visualization saved to: {}", path.display()),
        None if debug.is_some() => println!("⚠ Debug visualization could not be saved"),
        None => {}
    }

    Ok(())
}

fn cmd_inspect(
    config_path: Option<PathBuf>,
    landmarks_path: PathBuf,
    args: AlignArgs,
) -> anyhow::Result<()> {
    let aligner = build_aligner(config_path, args)?;
    let options = aligner.options();
    let landmarks = facealign_core::landmarks::load_landmarks(&landmarks_path)?;

    let transform = aligner.estimate(&landmarks)?;
    let [row0, row1] = transform.matrix();

    println!("Mode: {}, subset: {}", options.mode, options.subset);
    println!();
    println!("Transform (source -> aligned):");
    println!("  [{:>12.6} {:>12.6} {:>12.6}]", row0[0], row0[1], row0[2]);
    println!("  [{:>12.6} {:>12.6} {:>12.6}]", row1[0], row1[1], row1[2]);

    if let Some(similarity) = transform.as_similarity() {
        println!("  scale = {:.6}", similarity.scale());
        println!("  rotation = {:.3}°", similarity.rotation().to_degrees());
    }

    let src: Vec<(f64, f64)> = options
        .subset
        .indices()
        .iter()
        .map(|&i| (landmarks[i].0 as f64, landmarks[i].1 as f64))
        .collect();
    let dst = aligner.engine().destination_points(&options);
    let residual = facealign_core::transform::residual(&transform, &src, &dst);
    println!("  RMS residual = {:.4}px", residual);

    Ok(())
}

fn cmd_template(normalized: bool, subset: Option<LandmarkSubset>) -> anyhow::Result<()> {
    let template = TemplateModel::shared();
    let subset = subset.unwrap_or(LandmarkSubset::AllPoints);
    let points = if normalized {
        template.normalized()
    } else {
        template.raw()
    };

    println!(
        "{} template, subset {} ({} points):",
        if normalized { "Normalized" } else { "Raw" },
        subset,
        subset.indices().len()
    );
    println!();
    println!("{:<6} {:>14} {:>14}", "Index", "x", "y");
    println!("{}", "-".repeat(36));
    for &i in subset.indices() {
        let (x, y) = points[i];
        println!("{:<6} {:>14.10} {:>14.10}", i, x, y);
    }

    Ok(())
}

fn cmd_reference() -> anyhow::Result<()> {
    let ((height, width), points) = reference::sphereface_mean_5points();
    let names = ["left eye", "right eye", "nose", "left mouth", "right mouth"];

    println!("5-point reference template ({}x{} canvas, height x width):", height, width);
    println!();
    for (name, (x, y)) in names.iter().zip(points) {
        println!("  {:<12} ({:>8.4}, {:>8.4})", name, x, y);
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, validate: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    if validate {
        config.validate()?;
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let options = config.alignment.options();

    println!("Configuration:");
    println!();

    println!("[alignment]");
    println!("  mode = {}", options.mode);
    println!("  subset = {}", options.subset);
    println!("  size = {}", options.size);
    println!("  scale = {}", options.scale);
    println!();

    println!("[debug]");
    println!("  save_visualizations = {}", config.debug.save_visualizations);
    println!("  output_dir = {:?}", config.debug.output_dir);

    Ok(())
}
