use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use framereel::life::Arena;
use framereel::{
    Codec, Container, ErrorCode, Pipeline, Preset, StreamConfig, TransientPolicy,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Parser, Debug)]
#[command(name = "framereel")]
#[command(about = "Record a Game of Life run to a video file")]
struct Args {
    /// Frame width in pixels
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Frame height in pixels
    #[arg(long, default_value = "720")]
    height: u32,

    /// Number of simulation ticks (one frame each)
    #[arg(short = 'n', long, default_value = "300")]
    ticks: u64,

    /// Frames per second
    #[arg(long, default_value = "60")]
    fps: u32,

    #[arg(long, value_enum, default_value_t = CodecArg::Av1)]
    codec: CodecArg,

    /// Container format (defaults to the one matching the codec)
    #[arg(long, value_enum)]
    container: Option<ContainerArg>,

    #[arg(long, value_enum, default_value_t = PresetArg::Slow)]
    preset: PresetArg,

    /// Constant rate factor, 0-51
    #[arg(long, default_value = "20")]
    crf: u8,

    /// What to do when the encoder reports a transient error
    #[arg(long, value_enum, default_value_t = PolicyArg::Drop)]
    policy: PolicyArg,

    /// Seed for the initial board (random if omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Output file (defaults to life.<container extension>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also save the last frame as PNG
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CodecArg {
    Av1,
    H264,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ContainerArg {
    Mp4,
    Webm,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PresetArg {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
    Placebo,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    /// Log and keep going
    Drop,
    /// Abort the run
    Fail,
}

impl From<CodecArg> for Codec {
    fn from(arg: CodecArg) -> Self {
        match arg {
            CodecArg::Av1 => Codec::Av1,
            CodecArg::H264 => Codec::H264,
        }
    }
}

impl From<ContainerArg> for Container {
    fn from(arg: ContainerArg) -> Self {
        match arg {
            ContainerArg::Mp4 => Container::Mp4,
            ContainerArg::Webm => Container::WebM,
        }
    }
}

impl From<PresetArg> for Preset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Ultrafast => Preset::Ultrafast,
            PresetArg::Superfast => Preset::Superfast,
            PresetArg::Veryfast => Preset::Veryfast,
            PresetArg::Faster => Preset::Faster,
            PresetArg::Fast => Preset::Fast,
            PresetArg::Medium => Preset::Medium,
            PresetArg::Slow => Preset::Slow,
            PresetArg::Slower => Preset::Slower,
            PresetArg::Veryslow => Preset::Veryslow,
            PresetArg::Placebo => Preset::Placebo,
        }
    }
}

impl From<PolicyArg> for TransientPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Drop => TransientPolicy::DropAndContinue,
            PolicyArg::Fail => TransientPolicy::FailRun,
        }
    }
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("framereel=info"))
        .init();
}

fn run(args: Args) -> framereel::Result<()> {
    let codec = Codec::from(args.codec);
    let container = args.container.map(Container::from).unwrap_or(match codec {
        Codec::Av1 => Container::WebM,
        Codec::H264 => Container::Mp4,
    });
    let config = StreamConfig {
        width: args.width,
        height: args.height,
        fps: args.fps,
        codec,
        container,
        preset: args.preset.into(),
        crf: args.crf,
        transient_policy: args.policy.into(),
    };
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(format!("life.{}", container.extension())));

    let seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen());
    log::info!("seed {}", seed);

    let mut arena = Arena::new(config.width, config.height);
    arena.seed(&mut StdRng::seed_from_u64(seed));

    let mut pipeline = Pipeline::create(&config, &output)?;
    let mut frame = arena.render();

    for _ in 0..args.ticks {
        arena.step();
        arena.render_into(&mut frame);
        pipeline.add_frame(&frame)?;
    }

    let stats = pipeline.finish()?;
    log::info!(
        "wrote {} ({} frames, {} packets, generation {}, population {})",
        output.display(),
        stats.frames_submitted,
        stats.packets_written,
        arena.generation(),
        arena.grid().population()
    );

    if let Some(path) = args.snapshot {
        frame.save(&path)?;
        log::info!("snapshot saved to {}", path.display());
    }

    Ok(())
}

fn main() {
    init_logging();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(ErrorCode::from(&e) as i32);
    }
}
