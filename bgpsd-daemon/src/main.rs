//
// Copyright (c) The Bgpsd Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use bgpsd_session::engine::Engine;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// The parent process hands us its end of the imsg socketpair right after the
// standard descriptors.
const PARENT_PIPE_FD: RawFd = 3;

#[derive(Parser)]
#[command(name = "bgpsd-session", about = "BGP session engine")]
struct Args {
    /// Log debug messages to stderr
    #[arg(short, long)]
    debug: bool,

    /// Descriptor of the pipe to the parent process
    #[arg(long, default_value_t = PARENT_PIPE_FD)]
    fd: RawFd,
}

fn init_tracing(debug: bool) {
    let default = if debug { "bgpsd=debug" } else { "bgpsd=info" };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default.parse().unwrap())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

// The engine owns all protocol state from a single task, so a
// current-thread runtime is all it takes.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    init_tracing(args.debug);

    // The parent opened the pipe before spawning us; take ownership of it.
    let parent = unsafe { OwnedFd::from_raw_fd(args.fd) };

    match Engine::new(parent) {
        Ok(engine) => {
            info!("session engine ready");
            engine.run().await;
        }
        Err(error) => {
            error!(%error, "failed to connect to the parent process");
            std::process::exit(1);
        }
    }
}
