//! `tansud` - in-memory cache daemon speaking the memcached text dialect.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use tansu_engine::LocalStore;

#[derive(Parser, Debug)]
#[command(name = "tansud", about = "In-memory cache server (memcached text protocol)")]
struct Args {
    /// TCP port to listen on.
    #[arg(short = 'p', long = "port", default_value_t = 11211)]
    port: u16,

    /// Memory pool size in megabytes, split across shards.
    #[arg(short = 'm', long = "memory", default_value_t = 64)]
    memory_mb: usize,
}

fn main() -> anyhow::Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if err.use_stderr() => {
            // Argument errors exit 1; --help goes to stdout and exits 0.
            eprint!("{err}");
            std::process::exit(1);
        }
        Err(err) => {
            print!("{err}");
            return Ok(());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Single loop thread: every command executes inline against the
    // lockless store, which is why the allocator fast paths matter.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build runtime")?;
    runtime.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, pool_mb = args.memory_mb, "listening");

    let store = Rc::new(RefCell::new(LocalStore::open(args.memory_mb << 20)));
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            tokio::select! {
                result = tansu_server::serve(listener, store) => result.map_err(Into::into),
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down");
                    Ok(())
                }
            }
        })
        .await
}
