use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use talkto::config::{Config, ConfigOverrides};
use talkto::invoke::{InvocationEngine, OpenCodeClient, SessionSdk};
use talkto::liveness::{spawn_sweeper, GhostCache};
use talkto::mcp::McpSessionRegistry;
use talkto::prompts::PromptEngine;
use talkto::server::{create_router, AppState};
use talkto::store::{seed, SqliteStore, Store};
use talkto::ws::WsManager;

#[derive(Parser)]
#[command(name = "talkto")]
#[command(about = "Local-first messaging hub for human operators and AI agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the hub
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(long, short)]
        port: Option<u16>,

        /// Expose the hub on the LAN (disables the localhost auth bypass)
        #[arg(long)]
        network: bool,

        /// Data directory for the database
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Directory holding prompt template overrides
        #[arg(long)]
        prompts_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            host,
            port,
            network,
            data_dir,
            prompts_dir,
        } => {
            let config = Config::load(ConfigOverrides {
                host,
                port,
                network: network.then_some(true),
                data_dir,
                prompts_dir,
            });

            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::from_default_env()
                        .add_directive(format!("talkto={}", config.log_level).parse()?),
                )
                .init();

            fs::create_dir_all(&config.data_dir)?;
            let store = SqliteStore::new(config.db_path())?;
            store.initialize()?;
            seed::seed_defaults(&store)?;

            let store: Arc<dyn Store> = Arc::new(store);
            let ws = Arc::new(WsManager::new());
            let sdk: Arc<dyn SessionSdk> = Arc::new(OpenCodeClient::new());
            let ghosts = Arc::new(GhostCache::new());
            let invoker = Arc::new(InvocationEngine::new(
                store.clone(),
                ws.clone(),
                sdk.clone(),
            ));
            let prompts = Arc::new(PromptEngine::new(config.prompts_dir.clone()));

            spawn_sweeper(store.clone(), sdk, ghosts.clone());

            let state = Arc::new(AppState {
                store,
                config: config.clone(),
                ws,
                mcp: Arc::new(McpSessionRegistry::new()),
                invoker,
                ghosts,
                prompts,
            });

            let app = create_router(state);
            let addr = config.socket_addr()?;

            info!("TalkTo listening on {} (base url {})", addr, config.base_url());

            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .await?;
        }
    }

    Ok(())
}
