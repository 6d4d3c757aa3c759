//! j2kdecode CLI - JPEG 2000 probe, inspect and decode utility.
//!
//! Handles raw codestreams, JP2 containers and JPT streams, whole files or
//! codestreams scattered over byte segments of a larger file.

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use j2kdecode_rs::openjpeg::OpenJpeg;
use j2kdecode_rs::{
    Field, HostAccess, HostError, HostState, InputDescriptor, Level, OutputPixelBuffer, Region,
    SegmentList,
};

/// JPEG 2000 decoder front end
#[derive(Parser)]
#[command(name = "j2kdecode")]
#[command(author = "j2kdecode-rs contributors")]
#[command(version)]
#[command(about = "Probe, inspect and decode JPEG 2000 codestreams", long_about = None)]
#[command(after_help = "EXAMPLES:
    j2kdecode probe -i image.jp2
    j2kdecode info -i scan.j2k
    j2kdecode decode -i scan.j2k -o scan.pgm -f pnm --reduce 2
    j2kdecode decode -i tiled.jp2 -o tile.raw --tile 5
    j2kdecode decode -i study.dcm -o frame.pgm -f pnm --segments 1284:40960,43008:20480

SUPPORTED INPUT:
    J2K codestream (.j2k/.j2c/.jpc), JP2 (.jp2), JPT stream (.jpt)")]
struct Cli {
    /// Log decoder progress (same as RUST_LOG=j2kdecode=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the detected input format
    ///
    /// Exits with status 1 when the input is not a JPEG 2000 stream.
    #[command(visible_alias = "p")]
    Probe {
        #[arg(short, long, help = "Path to the input file")]
        input: PathBuf,

        /// Byte ranges holding the codestream, as pos:len,pos:len,...
        #[arg(short, long, value_parser = parse_segments)]
        segments: Option<SegmentList>,
    },

    /// Read the main header and print tiling and resolution levels
    #[command(visible_alias = "i")]
    Info {
        #[arg(short, long, help = "Path to the input file")]
        input: PathBuf,

        /// Byte ranges holding the codestream, as pos:len,pos:len,...
        #[arg(short, long, value_parser = parse_segments)]
        segments: Option<SegmentList>,
    },

    /// Decode to raw samples or a PGM/PPM image
    #[command(visible_alias = "d")]
    Decode {
        #[arg(short, long, help = "Path to the input file")]
        input: PathBuf,

        #[arg(short, long, help = "Path for the output file")]
        output: PathBuf,

        /// Decode a single tile (takes precedence over --area)
        #[arg(short, long)]
        tile: Option<i32>,

        /// Discard this many resolution levels
        #[arg(short, long)]
        reduce: Option<i32>,

        /// Decode area on the reference grid, as x0,y0,x1,y1
        #[arg(short, long, value_parser = parse_area)]
        area: Option<Region>,

        /// Byte ranges holding the codestream, as pos:len,pos:len,...
        #[arg(short, long, value_parser = parse_segments)]
        segments: Option<SegmentList>,

        /// Output format: raw (native-endian samples) or pnm (PGM/PPM)
        #[arg(short, long, default_value = "raw", value_enum)]
        format: OutputFormat,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Raw native-endian samples
    Raw,
    /// PGM for grayscale, PPM (alpha dropped) for color
    Pnm,
}

fn parse_segments(text: &str) -> Result<SegmentList, String> {
    SegmentList::parse(text).map_err(|e| e.to_string())
}

fn parse_area(text: &str) -> Result<Region, String> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<i32>().map_err(|e| format!("`{v}`: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match values[..] {
        [x0, y0, x1, y1] => Ok(Region::new(x0, y0, x1, y1)),
        _ => Err(format!("expected x0,y0,x1,y1, got {} values", values.len())),
    }
}

fn input_for(path: PathBuf, segments: Option<SegmentList>) -> InputDescriptor<'static> {
    match segments {
        Some(segments) => InputDescriptor::segmented(path, segments),
        None => InputDescriptor::file(path),
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "j2kdecode=debug,j2kdecode_rs=debug"
    } else {
        "j2kdecode=info,j2kdecode_rs=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Probe { input, segments } => probe(input, segments),
        Commands::Info { input, segments } => show_info(input, segments),
        Commands::Decode {
            input,
            output,
            tile,
            reduce,
            area,
            segments,
            format,
        } => decode_image(input, &output, tile, reduce, area, segments, &format),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn probe(input: PathBuf, segments: Option<SegmentList>) -> Result<(), Box<dyn std::error::Error>> {
    let descriptor = input_for(input, segments);
    let format = j2kdecode_rs::format::probe(&descriptor)?;
    println!("{} ({})", format.name(), i32::from(format));
    Ok(())
}

fn show_info(input: PathBuf, segments: Option<SegmentList>) -> Result<(), Box<dyn std::error::Error>> {
    let descriptor = input_for(input.clone(), segments);
    let mut engine = OpenJpeg::new();
    let (format, capacity) = j2kdecode_rs::inspect(&mut engine, &descriptor)?;

    println!("File: {}", input.display());
    println!("Format: {}", format.name());
    println!(
        "Tiles: {}x{} ({} total)",
        capacity.tile_count_x,
        capacity.tile_count_y,
        capacity.tile_count()
    );
    println!("Resolution levels: {}", capacity.max_resolution_levels);
    Ok(())
}

/// Host state that prints engine errors to stderr.
struct CliHost(HostState);

impl HostAccess for CliHost {
    fn get(&mut self, field: Field) -> Result<i32, HostError> {
        self.0.get(field)
    }

    fn set(&mut self, field: Field, value: i32) -> Result<(), HostError> {
        self.0.set(field, value)
    }

    fn notify(&mut self, level: Level, message: &str) {
        if level == Level::Error {
            eprintln!("decoder: {}", message.trim_end());
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_image(
    input: PathBuf,
    output: &Path,
    tile: Option<i32>,
    reduce: Option<i32>,
    area: Option<Region>,
    segments: Option<SegmentList>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let descriptor = input_for(input, segments);

    let mut state = HostState::new();
    if tile.is_some() || reduce.is_some() {
        state.set_tile(tile.unwrap_or(-1));
        state.set_reduction(reduce.unwrap_or(0));
    }
    if let Some(area) = area {
        state.set_area(area.x0, area.y0, area.x1, area.y1);
    }

    let mut host = CliHost(state);
    let pixels = j2kdecode_rs::decode(&descriptor, &mut host)?;
    let state = host.0;
    let (width, height) = (state.width as u32, state.height as u32);

    match format {
        OutputFormat::Raw => fs::write(output, pixels.to_ne_bytes())?,
        OutputFormat::Pnm => write_pnm(output, &pixels, width, height, state.bits_per_sample as u32)?,
    }

    println!(
        "✓ Decoded {}x{} image ({:?}, {} bits) to {:?}",
        width,
        height,
        pixels.format(),
        state.bits_per_sample,
        output
    );
    println!(
        "  {} tiles, {} resolution levels",
        state.max_tiles, state.max_reduction
    );
    Ok(())
}

fn write_pnm(
    path: &Path,
    pixels: &OutputPixelBuffer,
    width: u32,
    height: u32,
    bits_per_sample: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = std::io::BufWriter::new(fs::File::create(path)?);

    match pixels {
        OutputPixelBuffer::Gray8(samples) => {
            writeln!(file, "P5")?;
            writeln!(file, "{} {}", width, height)?;
            writeln!(file, "255")?;
            file.write_all(samples)?;
        }
        OutputPixelBuffer::Gray16(samples) => {
            let maxval = (1u32 << bits_per_sample.clamp(9, 16)) - 1;
            writeln!(file, "P5")?;
            writeln!(file, "{} {}", width, height)?;
            writeln!(file, "{}", maxval)?;
            for &s in samples {
                file.write_all(&(s as u16).to_be_bytes())?;
            }
        }
        OutputPixelBuffer::Argb32(samples) => {
            writeln!(file, "P6")?;
            writeln!(file, "{} {}", width, height)?;
            writeln!(file, "255")?;
            for &p in samples {
                let [_, r, g, b] = p.to_be_bytes();
                file.write_all(&[r, g, b])?;
            }
        }
    }
    file.flush()?;
    Ok(())
}
