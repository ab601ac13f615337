use std::path::PathBuf;

use clap::Parser;
use pes_sink::feeder::{Options, run};
use pes_sink::{Framerate, StreamType};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Opt {
    /// Elementary stream to read
    input: PathBuf,

    /// Decoder device or file receiving the PES packets
    #[clap(long, short)]
    output: PathBuf,

    /// Stream type, e.g. aac-adts, h264, mpeg2-video, vc1-advanced
    #[clap(long = "type", short = 't', value_parser = parse_stream_type)]
    stream_type: StreamType,

    /// Video frame rate, `25` or `30000/1001`
    #[clap(long, value_parser = parse_framerate)]
    fps: Option<Framerate>,

    #[clap(long)]
    sample_rate: Option<u32>,

    #[clap(long)]
    channels: Option<u8>,

    /// PCM sample depth in bits
    #[clap(long)]
    bits: Option<u16>,

    /// Picture size as WIDTHxHEIGHT
    #[clap(long, value_parser = parse_dimensions)]
    size: Option<(u16, u16)>,

    /// File holding the codec-private data (avcC, AudioSpecificConfig, ...)
    #[clap(long)]
    codec_data: Option<PathBuf>,

    /// Sink configuration as JSON
    #[clap(long)]
    config: Option<PathBuf>,

    /// Access unit size for streams without a splitter
    #[clap(long, default_value_t = 4096)]
    chunk_size: usize,

    /// Print the final report as JSON
    #[clap(long, default_value_t = false)]
    json: bool,
}

fn parse_stream_type(s: &str) -> Result<StreamType, String> {
    serde_json::from_value(serde_json::Value::String(s.to_owned()))
        .map_err(|_| format!("unknown stream type `{s}`"))
}

fn parse_framerate(s: &str) -> Result<Framerate, String> {
    let (num, den) = s.split_once('/').unwrap_or((s, "1"));
    let num = num.trim().parse().map_err(|_| format!("bad frame rate `{s}`"))?;
    let den = den.trim().parse().map_err(|_| format!("bad frame rate `{s}`"))?;
    Ok(Framerate::new(num, den))
}

fn parse_dimensions(s: &str) -> Result<(u16, u16), String> {
    let (w, h) = s.split_once('x').ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{s}`"))?;
    let w = w.parse().map_err(|_| format!("bad width in `{s}`"))?;
    let h = h.parse().map_err(|_| format!("bad height in `{s}`"))?;
    Ok((w, h))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let opt = Opt::parse();

    run(Options {
        input: opt.input,
        output: opt.output,
        stream_type: opt.stream_type,
        framerate: opt.fps,
        sample_rate: opt.sample_rate,
        channels: opt.channels,
        bit_depth: opt.bits,
        dimensions: opt.size,
        codec_data: opt.codec_data,
        config: opt.config,
        chunk_size: opt.chunk_size,
        json: opt.json,
    })
    .await
}
