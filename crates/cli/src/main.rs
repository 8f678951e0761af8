use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::Parser;
use playout::session::Pacing;
use playout::transport::UdpTransport;
use playout::{PlayoutError, RtpSession, Server, ServerConfig};

/// Queued buffers above which the reader waits for the sender.
const READ_AHEAD: usize = 256;
const DYNAMIC_PT: u8 = 96;

#[derive(Parser)]
#[command(
    name = "playout-server",
    about = "Stream one track of a media file over RTP/UDP"
)]
struct Args {
    /// Media file (.ogg/.spx, .264/.h264, .aac)
    input: PathBuf,

    /// Client RTP address (host:port); RTCP goes to port + 1
    dest: SocketAddr,

    /// Track to stream
    #[arg(long, default_value_t = 0)]
    track: usize,

    /// Largest RTP payload in bytes
    #[arg(long, default_value_t = playout::media::DEFAULT_MTU)]
    mtu: usize,

    /// Slot-table capacity
    #[arg(long, default_value_t = 100)]
    max_sessions: usize,

    /// Milliseconds between dispatch passes
    #[arg(long, default_value_t = 1)]
    tick_ms: u64,
}

fn run(args: Args) -> playout::Result<()> {
    let config = ServerConfig {
        max_sessions: args.max_sessions,
        mtu: args.mtu,
        tick_interval: Duration::from_millis(args.tick_ms),
        ..Default::default()
    };
    let mut server = Server::new(config);
    let mut resource = server.open_resource(&args.input)?;

    let track = resource
        .track(args.track)
        .ok_or_else(|| PlayoutError::NotFound(format!("track {}", args.track)))?;
    let properties = track.properties();
    let pt = match properties.payload_type {
        0 => DYNAMIC_PT,
        pt => pt,
    };
    println!(
        "{}: {} track {} ({} Hz) -> {}",
        resource.info().name,
        properties.encoding_name,
        args.track,
        properties.clock_rate,
        args.dest
    );
    for param in &properties.sdp_private {
        println!("  fmtp {param}");
    }

    let mut session = RtpSession::new(
        Box::new(UdpTransport::connect(args.dest)?),
        pt,
        properties.clock_rate,
    );
    session.set_pacing(Pacing::MediaClock);
    session.attach(track.subscribe());

    let id = server.add_session(session)?;
    server.play(id)?;
    server.start()?;

    loop {
        match resource.pump() {
            Ok(_) => {}
            Err(e) if e.is_end_of_stream() => break,
            Err(e) => tracing::warn!(error = %e, "packet skipped"),
        }
        while resource
            .track(args.track)
            .is_some_and(|t| t.producer().len() > READ_AHEAD)
        {
            thread::sleep(Duration::from_millis(5));
        }
    }

    while server.scheduler().with_session(id, |s| s.is_started())? {
        thread::sleep(Duration::from_millis(10));
    }
    server.remove_session(id)?;
    server.stop();
    resource.close()
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("playout-server: {e}");
            ExitCode::FAILURE
        }
    }
}
