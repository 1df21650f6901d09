use std::process::ExitCode;
use clap::Parser;
use clap_derive::Parser;
use tracing::{error, info};
use icmp_tun::config::RemoteConfig;
use icmp_tun::logging::init_logging;
use icmp_tun::node_id::parse_node_id;
use icmp_tun::sysctl::KernelEchoGuard;
use icmp_tun::tunnel::remote::Remote;

/// Remote side of the ICMP tunnel: forwards tunnelled datagrams to a UDP target and returns the
///  target's responses
#[derive(Parser)]
struct Args {
    /// UDP target
    #[clap(long, default_value = "8.8.8.8:53")]
    target: String,

    /// this node's id: 'ip', 'rand', an IPv4 address or an integer
    #[clap(long)]
    node_id: String,

    /// send tunnel traffic without obfuscation
    #[clap(long, default_value_t = false)]
    no_obfs: bool,

    /// disable the kernel's echo replies and answer pings from this process instead
    #[clap(long, default_value_t = false)]
    takeover_ping: bool,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    /// append log output to this file
    #[clap(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, args.log.as_deref()) {
        eprintln!("{:#}", e);
        return ExitCode::from(1);
    }

    let node_id = match parse_node_id(&args.node_id) {
        Ok(node_id) => node_id,
        Err(e) => {
            error!("invalid node-id: {}: {:#}", args.node_id, e);
            return ExitCode::from(1);
        }
    };

    let mut config = RemoteConfig::new(node_id, args.target);
    config.verbose = args.verbose;
    config.obfuscate = !args.no_obfs;

    // restores the kernel setting when dropped at the end of main
    let _echo_guard = if args.takeover_ping {
        match KernelEchoGuard::take_over() {
            Ok(guard) => {
                config.enable_echo = guard.is_some();
                guard
            }
            Err(e) => {
                error!("disable ping: {:#}", e);
                None
            }
        }
    }
    else {
        None
    };

    let remote = match Remote::bind(config).await {
        Ok(remote) => remote,
        Err(e) => {
            error!("run: {:#}", e);
            return ExitCode::from(2);
        }
    };

    let group = remote.shutdown_group();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("sigint received, stopping"),
            Err(e) => error!("waiting for sigint: {}", e),
        }
        group.quit();
    });

    info!("starting with [node-id:0x{:08X}]", node_id);
    if let Err(e) = remote.run().await {
        error!("run: {:#}", e);
        return ExitCode::from(2);
    }
    info!("stopped");
    ExitCode::SUCCESS
}
