//! CLI Entry Point for flim-stream
//!
//! Offline access to the event pipeline:
//! - Inspecting recorded containers
//! - Replaying recordings through the image reconstructor
//! - Re-recording with a different payload encoding
//! - Importing raw vendor FIFO dumps
//!
//! # Usage
//!
//! ```bash
//! flim-stream info run.flim
//! flim-stream replay run.flim --csv intensity.csv
//! flim-stream convert run.flim run_lz4.flim --compress
//! flim-stream import dump.spc run.flim --format spc
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use flim_stream::config::FlimConfig;
use flim_stream::flim_codec::spc::{SpcConfig, SpcDecoder};
use flim_stream::flim_codec::timetagger::{TimeTaggerConfig, TimeTaggerDecoder};
use flim_stream::flim_codec::StreamProducer;
use flim_stream::flim_core::EventProducer;
use flim_stream::flim_storage::{Compression, FlimFileReader};
use flim_stream::image::ImageHandle;
use flim_stream::tracing_setup;
use flim_stream::{FlimPipeline, ProcessorStats};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "flim-stream")]
#[command(about = "TCSPC event stream tools for lifetime imaging", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = flim_stream::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the header of a recording
    Info {
        /// Recorded .flim file
        file: PathBuf,
    },

    /// Replay a recording into the image reconstructor
    Replay {
        /// Recorded .flim file
        file: PathBuf,

        /// Write the intensity image as CSV
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Image width, overriding the configuration
        #[arg(long)]
        n_x: Option<usize>,

        /// Image height, overriding the configuration
        #[arg(long)]
        n_y: Option<usize>,
    },

    /// Re-record a file, optionally changing the payload compression
    Convert {
        input: PathBuf,
        output: PathBuf,

        /// LZ4-compress the payload
        #[arg(long)]
        compress: bool,

        /// Compress on a dedicated writer thread
        #[arg(long, requires = "compress")]
        threaded: bool,
    },

    /// Decode a raw vendor FIFO dump into a recording
    Import {
        input: PathBuf,
        output: PathBuf,

        #[arg(long, value_enum)]
        format: RawFormat,

        /// Phosphorescence mode (time tagger only)
        #[arg(long)]
        plim: bool,

        /// LZ4-compress the payload
        #[arg(long)]
        compress: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RawFormat {
    /// Becker & Hickl SPC FIFO words
    Spc,
    /// Time-tagger packet stream
    TimeTagger,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = FlimConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.validate().map_err(anyhow::Error::msg)?;
    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Info { file } => show_info(&file),
        Commands::Replay { file, csv, n_x, n_y } => {
            if let Some(n_x) = n_x {
                config.image.n_x = n_x;
            }
            if let Some(n_y) = n_y {
                config.image.n_y = n_y;
            }
            replay(&file, csv.as_deref(), &config)
        }
        Commands::Convert {
            input,
            output,
            compress,
            threaded,
        } => {
            set_compression(&mut config, compress);
            config.recording.threaded = threaded;
            let reader = FlimFileReader::open(&input)
                .with_context(|| format!("opening {}", input.display()))?;
            record(Box::new(reader), &output, &config)
        }
        Commands::Import {
            input,
            output,
            format,
            plim,
            compress,
        } => {
            set_compression(&mut config, compress);
            let file =
                File::open(&input).with_context(|| format!("opening {}", input.display()))?;
            let producer: Box<dyn EventProducer> = match format {
                RawFormat::Spc => {
                    if plim {
                        bail!("--plim is only supported for time-tagger streams");
                    }
                    let decoder = SpcDecoder::new(SpcConfig {
                        markers: config.markers.map.clone(),
                        ..SpcConfig::default()
                    });
                    Box::new(StreamProducer::new(file, decoder))
                }
                RawFormat::TimeTagger => {
                    let base = if plim {
                        TimeTaggerConfig::plim()
                    } else {
                        TimeTaggerConfig::default()
                    };
                    let decoder = TimeTaggerDecoder::new(TimeTaggerConfig {
                        calibration: config.markers.calibration.clone(),
                        ..base
                    });
                    Box::new(StreamProducer::new(file, decoder))
                }
            };
            record(producer, &output, &config)
        }
    }
}

fn set_compression(config: &mut FlimConfig, compress: bool) {
    config.recording.compression = if compress {
        Compression::Lz4
    } else {
        Compression::None
    };
}

fn show_info(path: &Path) -> Result<()> {
    let reader =
        FlimFileReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let header = reader.header();

    println!("{}", path.display());
    println!("  format version: {}", header.version);
    for tag in &header.tags {
        println!("  {:<28} {}", tag.name, tag.value);
    }
    Ok(())
}

fn replay(path: &Path, csv: Option<&Path>, config: &FlimConfig) -> Result<()> {
    let reader =
        FlimFileReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut pipeline = FlimPipeline::new(Box::new(reader), config)?;
    let stats = pipeline.run_to_end()?;
    report(&stats);

    let image = pipeline.image();
    let recon = pipeline.reconstructor().lock().stats();
    let (n_x, n_y) = image.size();
    println!(
        "image {n_x} x {n_y}: {} frames, {} photons placed, {} outside, max pixel {}",
        image.frame_index(),
        recon.placed,
        recon.outside_image,
        image.max_pixel_count()
    );
    for (channel, rate) in image.count_rates().iter().enumerate() {
        println!("  channel {channel}: {rate:.0} counts/s");
    }

    if let Some(csv) = csv {
        write_intensity_csv(&image, csv)?;
        info!(path = %csv.display(), "intensity written");
    }
    Ok(())
}

fn record(producer: Box<dyn EventProducer>, output: &Path, config: &FlimConfig) -> Result<()> {
    let mut pipeline = FlimPipeline::new(producer, config)?;
    pipeline
        .start_recording(output)
        .with_context(|| format!("recording to {}", output.display()))?;
    let stats = pipeline.run_to_end()?;
    report(&stats);

    let summary = pipeline.stop_recording()?;
    println!(
        "wrote {} events to {} file(s), {} bytes",
        summary.events,
        summary.files.len(),
        summary.bytes_on_disk
    );
    if summary.dropped_frames > 0 {
        println!(
            "  warning: {} compressed frames dropped",
            summary.dropped_frames
        );
    }
    Ok(())
}

fn report(stats: &ProcessorStats) {
    println!(
        "processed {} events in {} buffers ({} batches dropped)",
        stats.events_processed, stats.buffers_processed, stats.dropped_batches
    );
}

/// One row per scan line, one column per pixel.
fn write_intensity_csv(image: &ImageHandle, path: &Path) -> Result<()> {
    let intensity = image.intensity();
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    for line in intensity.columns() {
        writer.write_record(line.iter().map(|count| count.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}
