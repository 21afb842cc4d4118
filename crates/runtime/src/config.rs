//! Environment-driven configuration, read once at context init.

use std::env;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub enable: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// For the sqlite reference sink this is the database path.
    pub name: String,
    pub experiment: String,
    pub project: String,
    pub run_group: String,
    /// 0 means "allocate from the store on first write".
    pub run_id: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            enable: false,
            host: "localhost".to_string(),
            port: 5432,
            user: "ostinato".to_string(),
            password: String::new(),
            name: "ostinato.db".to_string(),
            experiment: "unknown".to_string(),
            project: "unknown".to_string(),
            run_group: "00000000-0000-0000-0000-000000000000".to_string(),
            run_id: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub worker_threads: usize,
    /// Passed through to the backend optimizer verbatim.
    pub pipeline: String,
    pub ir_dump: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            worker_threads: 1,
            pipeline: String::new(),
            ir_dump: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let db = DbConfig {
            enable: env_bool("OSTINATO_DB_ENABLE", false),
            host: env_string("OSTINATO_DB_HOST", "localhost"),
            port: env_parse("OSTINATO_DB_PORT", 5432),
            user: env_string("OSTINATO_DB_USER", "ostinato"),
            password: env_string("OSTINATO_DB_PASSWORD", ""),
            name: env_string("OSTINATO_DB_NAME", "ostinato.db"),
            experiment: env_string("OSTINATO_DB_EXPERIMENT", "unknown"),
            project: env_string("OSTINATO_DB_PROJECT", "unknown"),
            run_group: env_string(
                "OSTINATO_DB_RUN_GROUP",
                "00000000-0000-0000-0000-000000000000",
            ),
            run_id: env_parse("OSTINATO_DB_RUN_ID", 0),
        };

        Self {
            db,
            worker_threads: env_parse("OSTINATO_WORKER_THREADS", 1).max(1),
            pipeline: env_string("OSTINATO_OPT_PIPELINE", ""),
            ir_dump: env_bool("OSTINATO_IR_DUMP", false),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                warn!("invalid {key} value {raw:?}; using {default}");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr + std::fmt::Display + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("invalid {key} value {raw:?}; using {default}");
                default
            }
        },
        Err(_) => default,
    }
}
