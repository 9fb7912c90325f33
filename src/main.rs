use std::process::ExitCode;
use swarmlet::{Config, Session, SessionError};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "swarmlet".to_string());
    let Some(peer_arg) = args.next() else {
        eprintln!("Usage: {program} <peerId>");
        return ExitCode::FAILURE;
    };
    let Ok(peer_id) = peer_arg.parse::<u32>() else {
        eprintln!("{program}: peer id must be a number, got {peer_arg:?}");
        return ExitCode::FAILURE;
    };

    match run(peer_id) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("peer {} failed: {}", peer_id, e);
            ExitCode::FAILURE
        }
    }
}

/// Loads the configuration from the working directory and runs the
/// swarm to completion.
fn run(peer_id: u32) -> Result<(), SessionError> {
    let cwd = std::env::current_dir()?;
    let cfg = Config::load(&cwd)?;
    let session = Session::new(cfg, peer_id, &cwd)?;
    session.run()
}
