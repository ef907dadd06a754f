use std::io;

use clap::Parser;
use rtsp_relay::config::RelayConfig;
use rtsp_relay::server::Relay;

#[derive(Parser)]
#[command(name = "rtsp-relay", about = "Standalone RTSP publish/subscribe relay")]
struct Args {
    /// Bind address for the Publish Server (host:port)
    #[arg(long, default_value = "0.0.0.0:8554")]
    publisher_bind: String,

    /// Bind address for the Client Server (host:port); defaults to the same
    /// address as `--publisher-bind`
    #[arg(long)]
    subscriber_bind: Option<String>,

    /// First port of the shared RTP/RTCP pool (must be even)
    #[arg(long, default_value_t = 20000)]
    rtp_port_start: u16,

    /// Number of RTP/RTCP port pairs available in the pool
    #[arg(long, default_value_t = 4096)]
    rtp_port_count: u16,

    /// Subscriber keepalive interval, in seconds
    #[arg(long, default_value_t = 60)]
    keepalive_secs: u64,

    /// Stalled-mount sweep interval, in seconds
    #[arg(long, default_value_t = 1)]
    sweep_interval_secs: u64,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = RelayConfig {
        publisher_bind_addr: args.publisher_bind.clone(),
        subscriber_bind_addr: args.subscriber_bind.unwrap_or(args.publisher_bind),
        rtp_port_pool_start: args.rtp_port_start,
        rtp_port_pool_count: args.rtp_port_count,
        keepalive_secs: args.keepalive_secs,
        sweep_interval_secs: args.sweep_interval_secs,
        ..RelayConfig::default()
    };

    let mut relay = Relay::new(config);

    if let Err(e) = relay.start() {
        eprintln!("Failed to start relay: {e}");
        return;
    }

    println!("RTSP relay listening — press Enter to stop");
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    relay.stop();
}
