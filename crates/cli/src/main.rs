use clap::Parser;
use mjpeg_rtsp::{Credentials, FrameRate, JpegFileSource, Server, ServerConfig};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "mjpeg-rtsp-server",
    about = "RTSP server streaming JPEG files as motion-JPEG over RTP"
)]
struct Args {
    /// JPEG files or directories of JPEG files to stream, in a loop
    #[arg(required = true)]
    frames: Vec<PathBuf>,

    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:554")]
    bind: String,

    /// Stream path, e.g. rtsp://host:554/<suffix>
    #[arg(long, default_value = "mjpeg/1")]
    suffix: String,

    /// Frame rate: 5, 10 or 20
    #[arg(long, default_value = "10", value_parser = parse_fps)]
    fps: FrameRate,

    /// Require Basic authentication for DESCRIBE
    #[arg(long, requires = "password")]
    username: Option<String>,

    #[arg(long, requires = "username")]
    password: Option<String>,

    /// Maximum concurrent clients
    #[arg(long, default_value_t = 3)]
    max_clients: usize,

    /// First server-side RTP port
    #[arg(long, default_value_t = 57000)]
    rtp_port_base: u16,

    /// Host advertised in the stream URL and SDP
    #[arg(long)]
    public_host: Option<String>,

    /// Send JPEG quantization tables in-band (RFC 2435)
    #[arg(long)]
    quant_tables: bool,
}

fn parse_fps(value: &str) -> Result<FrameRate, String> {
    value
        .parse::<u32>()
        .ok()
        .and_then(FrameRate::from_hz)
        .ok_or_else(|| format!("unsupported frame rate '{}' (use 5, 10 or 20)", value))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let source = match JpegFileSource::open(&args.frames) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Failed to load frames: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let credentials = match (&args.username, &args.password) {
        (Some(user), Some(pass)) => Some(Credentials::new(user, pass)),
        _ => None,
    };

    let config = ServerConfig {
        bind_addr: args.bind,
        suffix: args.suffix,
        frame_rate: args.fps,
        credentials,
        max_clients: args.max_clients,
        rtp_port_base: args.rtp_port_base,
        public_host: args.public_host,
        embed_quant_tables: args.quant_tables,
        ..Default::default()
    };

    let mut server = Server::new(config, Box::new(source));

    if let Err(e) = server.start() {
        eprintln!("Failed to start server: {}", e);
        return ExitCode::FAILURE;
    }

    println!(
        "Streaming {} - press Enter to stop",
        server.url().unwrap_or_default()
    );
    let mut input = String::new();
    if let Err(e) = io::stdin().read_line(&mut input) {
        tracing::warn!(error = %e, "stdin closed");
    }

    server.stop();
    ExitCode::SUCCESS
}
