//! Almahriah chat server.
//!
//! Serves the `/ws` gateway and the `/api/chat` query routes over one
//! listener, backed by a SQLite message store.

use clap::{Parser, ValueEnum};

use almahriah_chat::{api, ChatConfig, ChatState, SqliteStore};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "almahriah-chat", version, about = "One-to-one chat server")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0", env = "CHAT_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 5050, env = "CHAT_PORT")]
    port: u16,

    /// SQLite database file. Omit to keep messages in memory.
    #[arg(long, env = "CHAT_DATABASE_PATH")]
    database: Option<String>,

    /// Longest accepted message, in characters
    #[arg(long, default_value_t = 4000, env = "CHAT_MAX_CONTENT_LEN")]
    max_content_len: usize,

    /// Most ids accepted in one delete request
    #[arg(long, default_value_t = 500, env = "CHAT_MAX_BATCH_SIZE")]
    max_batch_size: usize,

    /// Pooled SQLite connections for a file-backed store
    #[arg(long, default_value_t = 8, env = "CHAT_DB_POOL_SIZE")]
    db_pool_size: usize,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "CHAT_LOG_FORMAT")]
    log_format: LogFormat,
}

impl Args {
    fn config(&self) -> ChatConfig {
        ChatConfig {
            host: self.host.clone(),
            port: self.port,
            database_path: self.database.clone(),
            max_content_len: self.max_content_len,
            max_batch_size: self.max_batch_size,
            db_pool_size: self.db_pool_size,
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "almahriah_chat=info,tower_http=info".into());

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.log_format);

    let config = args.config();

    let opened = SqliteStore::open_with_pool_size(config.database_path.as_deref(), config.db_pool_size);
    let store = match opened {
        Ok(store) => store,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open message store");
            std::process::exit(1);
        }
    };
    match config.database_path {
        Some(ref path) => tracing::info!(path = path.as_str(), "Message store opened"),
        None => tracing::warn!("No database path configured; messages are kept in memory"),
    }

    let addr = config.bind_addr();
    let app = api::app(ChatState::new(store, config));

    tracing::info!("Chat server starting on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = addr.as_str(), error = %e, "Failed to bind address");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
