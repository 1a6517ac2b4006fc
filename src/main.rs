use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thumbnailer::config::{self, ConfigStore};
use thumbnailer::format::Format;
use thumbnailer::logging;
use thumbnailer::server::{self, AppState};
use tracing::info;

fn version_string() -> &'static str {
    let describe = env!("THUMBNAILER_GIT_DESCRIBE");
    let release_tag = format!("v{}", env!("CARGO_PKG_VERSION"));
    if describe.is_empty() || describe == release_tag {
        env!("CARGO_PKG_VERSION")
    } else {
        // Leaked once at startup
        Box::leak(format!("dev@{describe}").into_boxed_str())
    }
}

#[derive(Parser)]
#[command(name = "thumbnailer")]
#[command(about = "Square thumbnail image server")]
#[command(long_about = "\
Square thumbnail image server

Serves GET /thumbs?identifier=<id>: the source image named by <id> is
cropped to a centered square, scaled to fit inside 256x256 (never enlarged)
and encoded to the configured format.

  curl 'http://127.0.0.1:8182/thumbs?identifier=cats/001.jpg' -o thumb.jpg

Identifiers are paths relative to [source] root. The output format comes
from [endpoint.thumbnailer] format (default \"jpg\"); it is re-read on every
request, and SIGHUP reloads the config file without a restart.

Run 'thumbnailer gen-config' to generate a documented thumbnailer.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Configuration file, layered over the stock defaults
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Listen address, overriding [server] bind
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Print a stock thumbnailer.toml with all options documented
    GenConfig,
    /// List the output formats the encoder supports
    Formats,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind } => {
            let store = Arc::new(ConfigStore::load(cli.config)?);
            let snapshot = store.snapshot();
            logging::init_logging(&snapshot.app().log)?;

            let bind = bind.unwrap_or(snapshot.app().server.bind);
            info!(
                version = version_string(),
                source_root = %snapshot.app().source.root.display(),
                cache = ?snapshot.app().cache.dir,
                "starting thumbnailer"
            );

            let state = AppState::from_store(store)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(server::serve(state, bind))?;
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
        Command::Formats => {
            for format in Format::all() {
                println!(
                    "{:<5} {:<5} {}",
                    format.key(),
                    format.name(),
                    format.preferred_media_type()
                );
            }
        }
    }

    Ok(())
}
