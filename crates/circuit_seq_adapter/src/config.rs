#![forbid(unsafe_code)]

use std::env;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{info, warn};

pub const DEFAULT_HTTP_BIND: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080);
pub const DEFAULT_DATA_ROOT: &str = "./circuit_seq_data";
pub const DEFAULT_STORE_FILE: &str = "circuit_seq_store.jsonl";
pub const DEFAULT_PLATE_ROWS: u32 = 8;
pub const DEFAULT_PLATE_COLS: u32 = 12;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub http_bind: SocketAddr,
    pub data_root: PathBuf,
    pub store_path: PathBuf,
    /// Geometry seeded when the store holds no settings yet.
    pub plate_rows: u32,
    pub plate_cols: u32,
    pub max_upload_bytes: usize,
}

impl AdapterConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup. Missing or malformed values
    /// fall back to their defaults with a log line.
    pub fn from_lookup<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let data_root = load_path(&mut lookup, "CIRCUIT_SEQ_DATA_ROOT")
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT));
        let store_path = load_path(&mut lookup, "CIRCUIT_SEQ_STORE_PATH")
            .unwrap_or_else(|| data_root.join(DEFAULT_STORE_FILE));
        Self {
            http_bind: load_default(&mut lookup, "CIRCUIT_SEQ_HTTP_BIND", DEFAULT_HTTP_BIND),
            store_path,
            plate_rows: load_default(&mut lookup, "CIRCUIT_SEQ_PLATE_ROWS", DEFAULT_PLATE_ROWS),
            plate_cols: load_default(&mut lookup, "CIRCUIT_SEQ_PLATE_COLS", DEFAULT_PLATE_COLS),
            max_upload_bytes: load_default(
                &mut lookup,
                "CIRCUIT_SEQ_MAX_UPLOAD_BYTES",
                DEFAULT_MAX_UPLOAD_BYTES,
            ),
            data_root,
        }
    }
}

fn load_default<T, F>(lookup: &mut F, key: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
    T::Err: Display,
    F: FnMut(&str) -> Option<String>,
{
    match lookup(key).map(|v| v.trim().to_string()) {
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
    }
}

fn load_path<F>(lookup: &mut F, key: &str) -> Option<PathBuf>
where
    F: FnMut(&str) -> Option<String>,
{
    let value = lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    if value.is_none() {
        info!("{key} not set, using default");
    }
    value.map(PathBuf::from)
}
