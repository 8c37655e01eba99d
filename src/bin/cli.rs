use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};

use tsdemux::interfaces::{OutputFactory, ReaderSource, StreamSink};
use tsdemux::network::{bind_udp, receive_udp};
use tsdemux::report::Reporter;
use tsdemux::types::{AccessUnit, StreamInfo, StreamType};
use tsdemux::{DemuxConfig, Demuxer};

#[derive(Parser)]
#[command(name = "tsdemux", about = "Split an MPEG transport stream into elementary streams")]
struct Opt {
    /// Transport stream file to read
    #[arg(long, conflicts_with = "udp", required_unless_present = "udp")]
    input: Option<PathBuf>,

    /// UDP socket to bind + listen (IPv4, multicast joined automatically)
    #[arg(long)]
    udp: Option<String>,

    /// Program to demultiplex (default: lowest program_number in the PAT)
    #[arg(long)]
    program: Option<u16>,

    /// Force the packet size instead of probing (188, 192, 204, 208)
    #[arg(long)]
    packet_size: Option<usize>,

    /// Skip section CRC verification
    #[arg(long, default_value_t = false)]
    no_crc: bool,

    /// JSON file with demuxer options; command line flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write each elementary stream to a file in this directory
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Start at this many seconds into the file
    #[arg(long)]
    seek: Option<f64>,

    /// Print a JSON report when done
    #[arg(long, default_value_t = false)]
    report: bool,
}

/// Writes raw elementary stream payloads, one file per PID.
struct EsWriter {
    pid: u16,
    writer: Option<BufWriter<File>>,
    units: u64,
    bytes: u64,
    discontinuities: u64,
}

impl StreamSink for EsWriter {
    fn push_access_unit(&mut self, unit: AccessUnit) -> io::Result<()> {
        self.units += 1;
        self.bytes += unit.payload.len() as u64;
        if unit.discontinuity {
            self.discontinuities += 1;
        }
        if let Some(w) = self.writer.as_mut() {
            w.write_all(&unit.payload)?;
        }
        Ok(())
    }

    fn end_of_stream(&mut self) -> io::Result<()> {
        if let Some(w) = self.writer.as_mut() {
            w.flush()?;
        }
        info!(
            "PID 0x{:04X}: {} access units, {} bytes, {} discontinuities",
            self.pid, self.units, self.bytes, self.discontinuities
        );
        Ok(())
    }
}

struct EsWriterFactory {
    out_dir: Option<PathBuf>,
}

fn extension(stream_type: StreamType) -> &'static str {
    match stream_type {
        StreamType::Mpeg1Video | StreamType::Mpeg2Video => "m2v",
        StreamType::Mpeg4Video => "m4v",
        StreamType::H264 => "h264",
        StreamType::Hevc => "h265",
        StreamType::Vvc => "h266",
        StreamType::Mpeg1Audio | StreamType::Mpeg2Audio => "mp2",
        StreamType::AdtsAac | StreamType::LatmAac => "aac",
        StreamType::Ac3 => "ac3",
        StreamType::Eac3 => "eac3",
        StreamType::Dts => "dts",
        _ => "es",
    }
}

impl OutputFactory for EsWriterFactory {
    type Sink = EsWriter;

    fn create_output(&mut self, info: &StreamInfo) -> Option<EsWriter> {
        let writer = match &self.out_dir {
            Some(dir) => {
                let path = dir.join(format!("pid_0x{:04x}.{}", info.pid, extension(info.stream_type)));
                match File::create(&path) {
                    Ok(file) => {
                        info!("writing {} to {}", info.stream_type.codec_name(), path.display());
                        Some(BufWriter::new(file))
                    }
                    Err(e) => {
                        warn!("cannot create {}: {e}", path.display());
                        return None;
                    }
                }
            }
            None => None,
        };
        Some(EsWriter { pid: info.pid, writer, units: 0, bytes: 0, discontinuities: 0 })
    }
}

fn build_config(opt: &Opt) -> anyhow::Result<DemuxConfig> {
    let mut config = match &opt.config {
        Some(path) => DemuxConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => DemuxConfig::default(),
    };
    if opt.program.is_some() {
        config.program_number = opt.program;
    }
    if let Some(size) = opt.packet_size {
        config.packet_size = Some(size);
        config.m2ts_mode = size == 192;
    }
    if opt.no_crc {
        config.check_crc = false;
    }
    config.validate()?;
    Ok(config)
}

/// Negative targets clamp to the start; infinite or overflowing ones are rejected.
fn seek_target(secs: f64) -> anyhow::Result<Duration> {
    Duration::try_from_secs_f64(secs.max(0.0)).with_context(|| format!("invalid seek target {secs}"))
}

fn run_file(demuxer: &mut Demuxer<EsWriterFactory>, path: &PathBuf, seek: Option<f64>) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut source = ReaderSource::new(io::BufReader::new(file));

    if let Some(secs) = seek {
        let target = seek_target(secs)?;
        // read until two PCRs give a bitrate estimate
        while demuxer.clock().bitrate().is_none() {
            if !demuxer.pump(&mut source)? {
                anyhow::bail!("no bitrate estimate before end of input, cannot seek");
            }
        }
        let offset = demuxer.seek_source(&mut source, target)?;
        info!("seeked to byte offset {offset}");
    }

    demuxer.run(&mut source)?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opt = Opt::parse();

    if let Some(dir) = &opt.out_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let config = build_config(&opt)?;
    let mut demuxer = Demuxer::new(config, EsWriterFactory { out_dir: opt.out_dir.clone() })?;

    match (&opt.input, &opt.udp) {
        (Some(path), _) => run_file(&mut demuxer, path, opt.seek)?,
        (None, Some(addr)) => {
            if opt.seek.is_some() {
                warn!("--seek is ignored for UDP input");
            }
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async {
                let socket = bind_udp(addr)?;
                info!("listening on {addr}, Ctrl-C to stop");
                receive_udp(&mut demuxer, &socket, async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
            })?;
        }
        (None, None) => anyhow::bail!("either --input or --udp is required"),
    }

    if opt.report {
        println!("{}", Reporter::generate_json_report(&demuxer));
    }
    Ok(())
}
