//! pxeserve - Proxy DHCP and TFTP helper for PXE network boot.

use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pxeserve::config::Config;
use pxeserve::PxeService;

/// Proxy DHCP and TFTP helper for PXE network boot
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory served over TFTP
    #[arg(long = "dir", value_name = "PATH")]
    dir: Option<PathBuf>,

    /// Boot filename advertised to PXE clients
    #[arg(long = "bootfile", default_value = "pxeboot.com")]
    bootfile: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();

    let default_directive = if args.verbose {
        "pxeserve=debug"
    } else {
        "pxeserve=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(default_directive.parse().unwrap()),
        )
        .init();

    let config = Config {
        server_root: args.dir.unwrap_or_default(),
        boot_filename: args.bootfile,
    };

    if let Err(e) = PxeService::new(config).run().await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}
