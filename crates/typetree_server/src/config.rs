//! Server configuration from flags and environment.

use clap::Parser;
use rusqlite::Connection;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use typetree_core::{default_log_level, open_db, open_db_in_memory, DbResult};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_DB_FILE_NAME: &str = "typetree.sqlite3";

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "typetree-server")]
#[command(about = "HTTP API over the type and instance trees", version)]
pub struct ServerConfig {
    /// Address to bind
    #[arg(long, env = "TYPETREE_BIND", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "TYPETREE_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// SQLite database file
    #[arg(long, env = "TYPETREE_DB", default_value = DEFAULT_DB_FILE_NAME)]
    pub db: PathBuf,

    /// Use a throwaway in-memory database instead of `--db`
    #[arg(long)]
    pub memory: bool,

    /// trace|debug|info|warn|error
    #[arg(long, env = "TYPETREE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Directory for rolling log files; stderr when absent
    #[arg(long, env = "TYPETREE_LOG_DIR")]
    pub log_dir: Option<String>,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or(default_log_level())
    }

    /// Opens the configured store with migrations applied.
    pub fn open_database(&self) -> DbResult<Connection> {
        if self.memory {
            open_db_in_memory()
        } else {
            open_db(&self.db)
        }
    }
}
