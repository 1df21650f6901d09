use std::process::ExitCode;
use clap::Parser;
use clap_derive::Parser;
use tracing::{error, info};
use icmp_tun::config::LocalConfig;
use icmp_tun::logging::init_logging;
use icmp_tun::node_id::parse_node_id;
use icmp_tun::tunnel::local::Local;

/// Client side of the ICMP tunnel: relays datagrams from a local UDP client to the remote side
#[derive(Parser)]
struct Args {
    /// local UDP listener
    #[clap(long, default_value = "127.0.0.1:5353")]
    local: String,

    /// remote host name or IPv4 address
    #[clap(long)]
    remote: String,

    /// this node's id: 'ip', 'rand', an IPv4 address or an integer
    #[clap(long)]
    local_id: String,

    /// the remote node's id, same format as --local-id
    #[clap(long)]
    remote_id: String,

    /// send tunnel traffic without obfuscation
    #[clap(long, default_value_t = false)]
    no_obfs: bool,

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

    let (local_id, remote_id) = match (parse_node_id(&args.local_id), parse_node_id(&args.remote_id)) {
        (Ok(local_id), Ok(remote_id)) => (local_id, remote_id),
        (local_id, remote_id) => {
            error!("invalid node id [local-id:{}][remote-id:{}]: {:?} / {:?}",
                args.local_id, args.remote_id, local_id.err(), remote_id.err());
            return ExitCode::from(1);
        }
    };

    let mut config = LocalConfig::new(local_id, remote_id, args.local, args.remote);
    config.verbose = args.verbose;
    config.obfuscate = !args.no_obfs;
    if let Err(e) = config.validate() {
        error!("invalid configuration: {:#}", e);
        return ExitCode::from(1);
    }

    let local = match Local::bind(config).await {
        Ok(local) => local,
        Err(e) => {
            error!("run: {:#}", e);
            return ExitCode::from(2);
        }
    };

    let group = local.shutdown_group();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("sigint received, stopping"),
            Err(e) => error!("waiting for sigint: {}", e),
        }
        group.quit();
    });

    info!("starting with [local-id:0x{:08X}][remote-id:0x{:08X}]", local_id, remote_id);
    if let Err(e) = local.run().await {
        error!("run: {:#}", e);
        return ExitCode::from(2);
    }
    info!("stopped");
    ExitCode::SUCCESS
}
