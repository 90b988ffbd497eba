//! Command-line interface for inspecting normalized worms.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::matfile::MatArray;
use crate::core::writers::{write_mat, write_points_csv};
use crate::processors::normalized_worm::NormalizedWorm;
use crate::processors::partitions::PartitionData;
use crate::WormConfig;

#[derive(Parser)]
#[command(name = "normworm")]
#[command(about = "Inspect and transform normalized worm data", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// The two files every command loads.
#[derive(Args)]
struct Inputs {
    /// Normalized worm data file (norm_obj.mat)
    data: PathBuf,
    /// Eigenworm basis file
    eigen: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Show frame count, field shapes and segmentation summary
    Info {
        #[command(flatten)]
        inputs: Inputs,
    },

    /// List partition ranges
    Partitions {
        #[command(flatten)]
        inputs: Inputs,
        /// Only list the partitions of this subset
        #[arg(short, long)]
        subset: Option<String>,
    },

    /// Show one partition of a field
    Partition {
        #[command(flatten)]
        inputs: Inputs,
        /// Partition name (head, neck, midbody, ...)
        name: String,
        /// Field to slice
        #[arg(short, long, default_value = "skeletons")]
        field: String,
    },

    /// Show x/y position limits of a (49, 2, n) field
    Limits {
        #[command(flatten)]
        inputs: Inputs,
        /// Field to measure
        #[arg(short, long, default_value = "skeletons")]
        field: String,
    },

    /// Export skeletons to CSV, or to MAT when OUTPUT ends in .mat
    Export {
        #[command(flatten)]
        inputs: Inputs,
        /// Output file path
        output: PathBuf,
        /// Transform applied before export
        #[arg(short, long, value_enum, default_value_t = ExportTransform::Raw)]
        transform: ExportTransform,
        /// zlib-compress MAT output
        #[arg(long)]
        compress: bool,
    },

    /// Plot the skeleton and contours of one frame (PNG)
    PlotFrame {
        #[command(flatten)]
        inputs: Inputs,
        /// Frame index
        frame: usize,
        /// Output PNG file path (defaults to frame_<FRAME>.png)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Plot a bar chart of frame-code counts (PNG)
    PlotFrameCodes {
        #[command(flatten)]
        inputs: Inputs,
        /// Output PNG file path
        #[arg(short, long, default_value = "frame_codes.png")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExportTransform {
    /// Skeletons as stored
    Raw,
    /// Each frame moved to its centroid
    Centred,
    /// Centred, then rotated onto the x axis
    Rotated,
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match WormConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}, using defaults",
                    path.display(),
                    e
                );
                WormConfig::default()
            }
        },
        None => WormConfig::default(),
    };

    // Dispatch to subcommands
    let result = match cli.command {
        Commands::Info { inputs } => cmd_info(&inputs, &config),
        Commands::Partitions { inputs, subset } => cmd_partitions(&inputs, subset.as_deref(), &config),
        Commands::Partition { inputs, name, field } => cmd_partition(&inputs, &name, &field, &config),
        Commands::Limits { inputs, field } => cmd_limits(&inputs, &field, &config),
        Commands::Export {
            inputs,
            output,
            transform,
            compress,
        } => cmd_export(&inputs, &output, transform, compress, &config),
        Commands::PlotFrame {
            inputs,
            frame,
            output,
        } => cmd_plot_frame(&inputs, frame, output, &config),
        Commands::PlotFrameCodes { inputs, output } => cmd_plot_frame_codes(&inputs, &output, &config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn load_worm(inputs: &Inputs, config: &WormConfig) -> Result<NormalizedWorm> {
    let spinner = create_spinner("Loading normalized worm...");
    let worm = NormalizedWorm::load(&inputs.data, &inputs.eigen, config);
    spinner.finish_and_clear();
    worm.with_context(|| {
        format!(
            "failed to load {} with {}",
            inputs.data.display(),
            inputs.eigen.display()
        )
    })
}

/// NaN-ignoring (min, max) of any set of values.
fn finite_range<'a>(values: impl Iterator<Item = &'a f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |range, &v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
        })
}

fn format_range(range: Option<(f64, f64)>) -> String {
    match range {
        Some((lo, hi)) => format!("{:.3} .. {:.3}", lo, hi),
        None => "no finite values".to_string(),
    }
}

fn cmd_info(inputs: &Inputs, config: &WormConfig) -> Result<()> {
    let start = Instant::now();
    let worm = load_worm(inputs, config)?;
    let data = worm.data();

    let mut items = vec![
        ("Data file", inputs.data.display().to_string()),
        ("Frames", worm.num_frames().to_string()),
        ("Eigenworm hint", data.eigenworm_path().to_string()),
        (
            "Eigenworm basis",
            format!("{:?}", worm.eigen_worms().basis().shape()),
        ),
    ];
    for (field, value) in data.iter() {
        if value.frame_count().is_some() {
            items.push((field.as_str(), format!("{:?}", value.shape())));
        }
    }
    for (status, count) in data.status_counts() {
        items.push((status.label(), count.to_string()));
    }
    items.push(("Duration", format!("{:.2?}", start.elapsed())));

    print_summary("Normalized Worm", &items);
    Ok(())
}

fn cmd_partitions(inputs: &Inputs, subset: Option<&str>, config: &WormConfig) -> Result<()> {
    let worm = load_worm(inputs, config)?;
    let map = match subset {
        Some(name) => worm.get_partition_subset(name)?,
        None => worm.partitions().clone(),
    };

    let items: Vec<(&str, String)> = map
        .iter()
        .map(|(name, range)| (name, format!("{} ({} points)", range, range.len())))
        .collect();

    let title = match subset {
        Some(name) => format!("Partitions in subset '{}'", name),
        None => format!("Partitions ({:?} layout)", map.layout()),
    };
    print_summary(&title, &items);
    Ok(())
}

fn cmd_partition(inputs: &Inputs, name: &str, field: &str, config: &WormConfig) -> Result<()> {
    let worm = load_worm(inputs, config)?;
    let range = worm.partitions().get(name)?;
    let partition = worm.get_partition(name, field, false)?;

    let (shape, values) = match &partition {
        PartitionData::PointsXy(values) => (format!("{:?}", values.shape()), finite_range(values.iter())),
        PartitionData::Points(values) => (format!("{:?}", values.shape()), finite_range(values.iter())),
        PartitionData::Split { x, y } => (
            format!("{:?} x2", x.shape()),
            finite_range(x.iter().chain(y.iter())),
        ),
    };

    print_summary(
        &format!("Partition '{}' of '{}'", name, field),
        &[
            ("Points", range.to_string()),
            ("Shape", shape),
            ("Frames", partition.num_frames().to_string()),
            ("Value range", format_range(values)),
        ],
    );
    Ok(())
}

fn cmd_limits(inputs: &Inputs, field: &str, config: &WormConfig) -> Result<()> {
    let worm = load_worm(inputs, config)?;
    let (x_min, x_max) = worm.position_limits(0, field)?;
    let (y_min, y_max) = worm.position_limits(1, field)?;

    print_summary(
        &format!("Position limits of '{}'", field),
        &[
            ("x", format!("{:.3} .. {:.3}", x_min, x_max)),
            ("y", format!("{:.3} .. {:.3}", y_min, y_max)),
        ],
    );
    Ok(())
}

fn cmd_export(
    inputs: &Inputs,
    output: &Path,
    transform: ExportTransform,
    compress: bool,
    config: &WormConfig,
) -> Result<()> {
    let start = Instant::now();
    let worm = load_worm(inputs, config)?;

    let spinner = create_spinner("Transforming skeletons...");
    let skeletons = match transform {
        ExportTransform::Raw => worm.data().skeletons().to_owned(),
        ExportTransform::Centred => worm.translate_to_centre(),
        ExportTransform::Rotated => worm.rotate_and_translate(),
    };

    spinner.set_message("Writing output...");
    let is_mat = output
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mat"));
    let written = if is_mat {
        write_mat(
            output,
            &[MatArray::from_ndarray("skeletons", skeletons.view())],
            compress,
        )
    } else {
        write_points_csv(output, skeletons.view())
    };
    spinner.finish_and_clear();
    written.with_context(|| format!("failed to write {}", output.display()))?;

    print_summary(
        "Export Complete",
        &[
            ("Output file", output.display().to_string()),
            ("Transform", format!("{:?}", transform)),
            ("Frames", worm.num_frames().to_string()),
            ("Format", if is_mat { "MAT" } else { "CSV" }.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_plot_frame(
    inputs: &Inputs,
    frame: usize,
    output: Option<PathBuf>,
    config: &WormConfig,
) -> Result<()> {
    use crate::visualization;

    let worm = load_worm(inputs, config)?;
    let output_path = output.unwrap_or_else(|| PathBuf::from(format!("frame_{}.png", frame)));

    let spinner = create_spinner("Generating plot...");
    let plotted = visualization::plot_frame(&output_path, worm.data(), frame, &config.plot);
    spinner.finish_and_clear();
    plotted.with_context(|| format!("failed to plot frame {}", frame))?;

    let status = worm
        .data()
        .segmentation_status()
        .get(frame)
        .map_or("-", |s| s.label());
    let code = worm.data().frame_codes()[frame];

    print_summary(
        "Frame Plot Complete",
        &[
            ("Output PNG", output_path.display().to_string()),
            ("Frame", frame.to_string()),
            ("Status", status.to_string()),
            (
                "Frame code",
                format!(
                    "{} ({})",
                    code,
                    worm.describe_frame_code(code).unwrap_or("unknown")
                ),
            ),
        ],
    );
    Ok(())
}

fn cmd_plot_frame_codes(inputs: &Inputs, output: &Path, config: &WormConfig) -> Result<()> {
    use crate::visualization;

    let worm = load_worm(inputs, config)?;
    let counts = worm.frame_code_counts();

    visualization::plot_frame_codes(output, &counts, &config.plot)
        .with_context(|| format!("failed to write {}", output.display()))?;

    let code_names: Vec<String> = counts.keys().map(|code| format!("Code {}", code)).collect();
    let mut items = vec![("Output PNG", output.display().to_string())];
    for ((code, count), name) in counts.iter().zip(&code_names) {
        let description = worm.describe_frame_code(*code).unwrap_or("unknown code");
        items.push((name.as_str(), format!("{} ({})", count, description)));
    }

    print_summary("Frame Codes", &items);
    Ok(())
}
