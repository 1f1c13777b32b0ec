//! Entry point for the `nanoedge` binary: parse flags, initialize logging,
//! and run the front door until a shutdown signal. Exits non-zero when the
//! runtime fails to boot (store unavailable, bind failure).

use std::path::PathBuf;

use clap::Parser;
use nanoedge_server::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "nanoedge", about = "Self-hosted runtime for user-supplied JavaScript")]
struct Cli {
    /// Address the front door binds to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port the front door binds to.
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Directory serving `/static` and the per-service static areas.
    #[arg(long, default_value = "./static")]
    static_dir: PathBuf,

    /// Path to the embedded database. Runs in-memory when omitted.
    db_path: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(nanoedge_server::run(ServerConfig {
        host: cli.host,
        port: cli.port,
        db_path: cli.db_path,
        static_root: cli.static_dir,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_the_documented_cli_contract() {
        let cli = Cli::parse_from(["nanoedge"]);
        assert_eq!(cli.host, "127.0.0.1");
        assert_eq!(cli.port, 8000);
        assert_eq!(cli.db_path, None);
    }

    #[test]
    fn positional_db_path_is_accepted() {
        let cli = Cli::parse_from(["nanoedge", "--port", "9000", "data/edge.sqlite"]);
        assert_eq!(cli.port, 9000);
        assert_eq!(cli.db_path, Some(PathBuf::from("data/edge.sqlite")));
    }
}
