use apng_stream::{
    ApngDecoder, ApngError, DecodingOptions, ErrorKind, FileSource, FirstPassSummary, ImageFrame, ImageHeader, Logger,
    LoopCount, Opened, Writer,
};
use clap::Parser;
use glob::glob;
use log::LevelFilter;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[clap(name = "apng-stream")]
struct Cli {
    #[arg(required = true)]
    path: String,

    #[arg(short, long, value_parser = ["ppm", "pam", "png", "webp"], help = "Output format")]
    format: Option<String>,

    #[arg(short = 'o', long = "output-dir", help = "Output directory for converted files")]
    output_dir: Option<String>,

    #[arg(long, help = "Print container and frame metadata")]
    info: bool,

    #[arg(long, help = "Decode the image without writing to a file")]
    void: bool,

    #[arg(long, help = "Scan all frame metadata before decoding")]
    full_first_pass: bool,

    #[arg(long, help = "Keep compressed frame data in memory")]
    load_frame_data: bool,

    #[arg(long, help = "Keep decoded frames")]
    cache: bool,

    #[arg(long, help = "Decode every frame during the first pass")]
    preload: bool,

    #[arg(long, help = "Enable every eager option")]
    eager: bool,

    #[arg(long, help = "Run the first pass on a worker thread")]
    background: bool,

    #[arg(long, default_value = "warn", value_parser = ["off", "error", "warn", "info", "debug", "trace"])]
    log_level: String,
}

impl Cli {
    fn decoding_options(&self) -> DecodingOptions {
        if self.eager {
            return DecodingOptions::eager();
        }

        DecodingOptions {
            full_first_pass: self.full_first_pass,
            load_frame_data: self.load_frame_data,
            cache_decoded_images: self.cache,
            preload_all_frames: self.preload,
        }
    }
}

fn get_files(path: &str) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let absolute_pattern = if Path::new(path).is_relative() {
        base_dir.join(path).to_string_lossy().into_owned()
    } else {
        path.to_string()
    };

    for entry in glob(&absolute_pattern)? {
        match entry {
            Ok(path) => {
                if !path.is_file() {
                    continue;
                }

                files.push(path);
            }
            Err(e) => log::warn!("{}", e),
        }
    }

    Ok(files)
}

fn get_output_path(file: &Path, output_dir: Option<&str>, format: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let file_stem = file
        .file_stem()
        .ok_or("Invalid file name")?
        .to_str()
        .ok_or("Invalid file stem")?;

    let output_path = if let Some(dir) = output_dir {
        let output_dir = Path::new(dir);

        if !output_dir.exists() {
            fs::create_dir_all(output_dir)?;
        }

        let output_dir = if output_dir.is_relative() {
            std::env::current_dir()?.join(output_dir)
        } else {
            output_dir.to_path_buf()
        };

        output_dir.join(format!("{}.{}", file_stem, format))
    } else {
        // Next to the input file
        file.parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{}.{}", file_stem, format))
    };

    Ok(output_path)
}

fn print_info(decoder: &ApngDecoder<FileSource>, summary: &FirstPassSummary) {
    let header = decoder.header();

    println!(
        "{}x{}, {}-bit {:?}{}",
        header.width,
        header.height,
        header.bit_depth,
        header.color_type,
        if header.interlaced { ", interlaced" } else { "" }
    );
    println!("Frames: {} of {} declared", summary.frame_count, summary.declared_frames);
    match summary.loop_count {
        LoopCount::Infinite => println!("Loops: infinite"),
        LoopCount::Finite(n) => println!("Loops: {}", n),
    }
    println!("Duration: {:?}", summary.duration);
    println!("Bytes scanned: {}", decoder.bytes_consumed());

    for index in 0..summary.frame_count {
        if let Some(control) = decoder.frame_control(index) {
            println!(
                "  #{:<4} {}x{} at ({}, {}) delay {:?} dispose {:?} blend {:?}",
                index,
                control.width,
                control.height,
                control.x_offset,
                control.y_offset,
                control.delay(),
                control.dispose_op,
                control.blend_op
            );
        }
    }
}

/// Requests every frame in order. Frames that fail to decode are logged and
/// left out.
fn collect_frames(decoder: &ApngDecoder<FileSource>) -> Result<Vec<ImageFrame>, ApngError> {
    let mut frames = Vec::with_capacity(decoder.frame_count());

    for index in 0..decoder.frame_count() {
        match decoder.frame(index) {
            Ok(frame) => frames.push(frame),
            Err(ApngError::IncompleteAnimation { available, .. }) => {
                log::warn!("Animation stops after {} frames", available);
                break;
            }
            Err(e) if e.kind() == ErrorKind::Frame => log::warn!("{}", e),
            Err(e) => return Err(e),
        }
    }

    Ok(frames)
}

fn process_static(file: &Path, header: &ImageHeader, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    log::info!("{} has no animation control, decoding as a still image", file.display());

    if cli.info {
        println!("{}x{}, {}-bit {:?}, not animated", header.width, header.height, header.bit_depth, header.color_type);
        return Ok(());
    }

    let image = image::open(file)?;
    if cli.void {
        return Ok(());
    }

    let format = cli.format.as_deref().unwrap_or("png");
    let output_path = get_output_path(file, cli.output_dir.as_deref(), format)?;

    println!("Writing to: {}", output_path.display());
    image.save(&output_path)?;

    Ok(())
}

fn process_file(file: &Path, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    println!("File: {}", file.display());

    let start = Instant::now();
    let decoder = match ApngDecoder::open_path(file, cli.decoding_options())? {
        Opened::Animated(decoder) => Arc::new(decoder),
        Opened::Static { source, header } => return process_static(source.path(), &header, cli),
    };

    if cli.info {
        let summary = decoder.complete_first_pass()?;
        print_info(&decoder, &summary);
        return Ok(());
    }

    let worker = if cli.background {
        Some(decoder.spawn_first_pass()?)
    } else {
        None
    };

    let frames = collect_frames(&decoder)?;

    if let Some(worker) = worker {
        match worker.join() {
            Ok(result) => {
                result?;
            }
            Err(_) => return Err("First pass worker panicked".into()),
        }
    }

    log::info!("Decoded {} frames in {:?}", frames.len(), start.elapsed());

    if cli.void {
        return Ok(());
    }

    let Some(first) = frames.first() else {
        return Err("No frames decoded".into());
    };

    let format = cli.format.as_deref().unwrap_or("webp");
    let output_path = get_output_path(file, cli.output_dir.as_deref(), format)?;

    if let Some(parent) = output_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    println!("Writing to: {}", output_path.display());
    match format {
        "ppm" => Writer::write_ppm(&output_path, first)?,
        "pam" => Writer::write_pam(&output_path, first)?,
        "png" => Writer::write_png_frames(&output_path, &frames)?,
        _ => Writer::write_webp(&output_path, &frames)?,
    }

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = LevelFilter::from_str(&cli.log_level).unwrap_or(LevelFilter::Warn);
    Logger::init(level)?;

    let files = get_files(&cli.path)?;
    if files.is_empty() {
        eprintln!("No files found matching pattern: {}", cli.path);
        return Ok(());
    }

    for file in files {
        if let Err(err) = process_file(&file, &cli) {
            eprintln!("Error processing file: {}", err);
            continue;
        }
    }

    Ok(())
}
