use clap::{Parser, ValueEnum};
use ctif::resize::{self, SizeRequest};
use ctif::{
    Colorspace, ConvertOptions, Converter, CtifEncoder, DitherMatrix, DitherMode,
    PaletteGenerator, PaletteOptions, Platform,
};
use image::{ImageReader, RgbImage};
use log::{debug, info, LevelFilter};
use std::error::Error;
use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Write};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DitherModeArg {
    None,
    Error,
    Ordered,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DitherTypeArg {
    FloydSteinberg,
    #[value(name = "2x2")]
    Bayer2,
    #[value(name = "4x4")]
    Bayer4,
    #[value(name = "8x8")]
    Bayer8,
}

/// Convert an image to the CTIF character-cell format
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input image path, `-` for stdin
    img: PathBuf,

    /// Target platform
    #[arg(short, long, default_value = "oc-tier3")]
    mode: Platform,

    /// Colorspace distances are measured in (rgb, yuv, yiq)
    #[arg(long, default_value = "yiq")]
    colorspace: Colorspace,

    #[arg(long, value_enum, default_value_t = DitherModeArg::Error)]
    dither_mode: DitherModeArg,

    /// Diffusion kernel or ordered dither matrix; defaults to floyd-steinberg
    /// for error diffusion and 4x4 for ordered dithering
    #[arg(long, value_enum)]
    dither_type: Option<DitherTypeArg>,

    /// Dither strength, 0 = off, 1 = full
    #[arg(long, default_value_t = 1.0, value_parser = parse_dither_level)]
    dither_level: f32,

    /// Search optimization level (0-2)
    #[arg(short = 'O', long = "optimization-level", default_value_t = 1,
          value_parser = clap::value_parser!(u8).range(0..=2))]
    optimization: u8,

    /// Output width in pixels
    #[arg(short = 'W', long)]
    width: Option<u32>,

    /// Output height in pixels
    #[arg(short = 'H', long)]
    height: Option<u32>,

    /// Ignore the source aspect ratio
    #[arg(short = 'N', long = "no-aspect")]
    no_aspect: bool,

    /// Output file, defaults to `<input>.ctif`
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write a 2x preview image here
    #[arg(short = 'P', long)]
    preview: Option<PathBuf>,

    /// Worker threads, defaults to the number of CPUs
    #[arg(long)]
    threads: Option<usize>,

    /// Seed for palette generation, makes the output reproducible
    #[arg(long)]
    seed: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    debug: bool,
}

fn parse_dither_level(s: &str) -> Result<f32, String> {
    let level: f32 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&level) {
        Ok(level)
    } else {
        Err(format!("{s} is not in 0..=1"))
    }
}

impl Args {
    fn dither(&self) -> Result<DitherMode, Box<dyn Error>> {
        let matrix = |kind: DitherTypeArg| -> Result<DitherMatrix, Box<dyn Error>> {
            Ok(match kind {
                DitherTypeArg::FloydSteinberg => DitherMatrix::floyd_steinberg(),
                DitherTypeArg::Bayer2 => DitherMatrix::bayer(2)?,
                DitherTypeArg::Bayer4 => DitherMatrix::bayer(4)?,
                DitherTypeArg::Bayer8 => DitherMatrix::bayer(8)?,
            })
        };
        Ok(match self.dither_mode {
            DitherModeArg::None => DitherMode::None,
            DitherModeArg::Error => DitherMode::diffusion(
                matrix(self.dither_type.unwrap_or(DitherTypeArg::FloydSteinberg))?,
                self.dither_level,
            ),
            DitherModeArg::Ordered => DitherMode::ordered(
                matrix(self.dither_type.unwrap_or(DitherTypeArg::Bayer4))?,
                self.dither_level,
            ),
        })
    }

    fn output_path(&self) -> PathBuf {
        match &self.output {
            Some(path) => path.clone(),
            None if self.img.as_os_str() == "-" => PathBuf::from("stdin.ctif"),
            None => {
                let mut path = self.img.clone().into_os_string();
                path.push(".ctif");
                path.into()
            }
        }
    }
}

fn load_image(args: &Args) -> Result<RgbImage, Box<dyn Error>> {
    let img = if args.img.as_os_str() == "-" {
        let mut bytes = Vec::new();
        io::stdin().lock().read_to_end(&mut bytes)?;
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .decode()?
    } else {
        ImageReader::open(&args.img)?.decode()?
    };
    Ok(img.to_rgb8())
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    if let Some(threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }
    debug!("Using {} threads", rayon::current_num_threads());

    let spec = args.mode.spec();
    let img = load_image(args)?;
    let request = SizeRequest {
        width: args.width,
        height: args.height,
        ignore_aspect: args.no_aspect,
    };
    let (width, height) = resize::target_size(&spec, img.width(), img.height(), request)?;
    let img = resize::resize(img, width, height);

    let palette = if spec.custom_colors > 0 {
        info!("Generating palette...");
        let generator =
            PaletteGenerator::new(&img, &spec.palette, spec.custom_colors, args.colorspace)?;
        let options = PaletteOptions {
            seeds: args.seed.map(|seed| {
                let trials = PaletteOptions::default().trials as u64;
                (seed..seed + trials).collect()
            }),
            ..Default::default()
        };
        generator.generate(&options)?.colors
    } else {
        spec.palette.clone()
    };

    info!("Converting image...");
    let options = ConvertOptions {
        colorspace: args.colorspace,
        dither: args.dither()?,
        optimization: args.optimization,
        parallel: true,
    };
    let converter = Converter::new(&spec, &palette, options)?;
    let conversion = converter.convert(&img)?;

    let encoder = CtifEncoder::new(&spec, &palette);
    let mut out = BufWriter::new(File::create(args.output_path())?);
    encoder.encode(&conversion, &mut out)?;
    out.flush()?;

    if let Some(path) = &args.preview {
        resize::enlarge_preview(&encoder.preview(&conversion)).save(path)?;
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_default_env()
        .filter_level(if args.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init();

    if let Err(e) = run(&args) {
        eprintln!("{}: {e}", args.img.to_string_lossy());
        std::process::exit(1);
    }
}
