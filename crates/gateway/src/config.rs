use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::export::ExportStrategy;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub db_url: String,
    pub db_max_connections: u32,
    pub parcels_table: String,
    pub statement_timeout_ms: u64,
    pub export_strategy: ExportStrategy,
    pub filter_store: FilterStoreMode,
    pub filter_store_path: String,
    pub inspect_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStoreMode {
    File,
    Postgres,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for StartupError {}

const MAX_EXPORT_BATCH_SIZE: usize = 10_000;

impl GatewayConfig {
    pub fn load() -> Result<Self, StartupError> {
        let mut merged = HashMap::new();

        if let Ok(config_path) = std::env::var("PARCELGATE_CONFIG_PATH") {
            let config_path = config_path.trim();
            if !config_path.is_empty() {
                let file_kv = parse_env_file(config_path)?;
                merged.extend(file_kv);
            }
        }

        merged.extend(std::env::vars());

        Self::from_kv(&merged)
    }

    pub fn from_kv(kv: &HashMap<String, String>) -> Result<Self, StartupError> {
        let bind_addr = parse_socket_addr(
            kv.get("PARCELGATE_BIND_ADDR"),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080),
            "PARCELGATE_BIND_ADDR",
        )?;

        let db_url = require_nonempty(kv, "PARCELGATE_DB_URL")?;

        let db_max_connections = parse_u32(
            kv.get("PARCELGATE_DB_MAX_CONNECTIONS"),
            8,
            "PARCELGATE_DB_MAX_CONNECTIONS",
        )?;
        if db_max_connections == 0 {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "PARCELGATE_DB_MAX_CONNECTIONS must be >= 1".to_string(),
            });
        }

        let parcels_table = nonempty_or(kv, "PARCELGATE_PARCELS_TABLE", "takehome.dallas_parcels");
        if !is_safe_relation_name(&parcels_table) {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "PARCELGATE_PARCELS_TABLE must be `table` or `schema.table` using [A-Za-z0-9_]"
                    .to_string(),
            });
        }

        let statement_timeout_ms = parse_u64(
            kv.get("PARCELGATE_STATEMENT_TIMEOUT_MS"),
            0,
            "PARCELGATE_STATEMENT_TIMEOUT_MS",
        )?;

        let export_batch_size = parse_usize(
            kv.get("PARCELGATE_EXPORT_BATCH_SIZE"),
            1000,
            "PARCELGATE_EXPORT_BATCH_SIZE",
        )?;
        if export_batch_size == 0 || export_batch_size > MAX_EXPORT_BATCH_SIZE {
            return Err(StartupError {
                code: "ERR_INVALID_CONFIG",
                message: format!(
                    "PARCELGATE_EXPORT_BATCH_SIZE must be between 1 and {}",
                    MAX_EXPORT_BATCH_SIZE
                ),
            });
        }
        let export_strategy =
            parse_export_strategy(kv.get("PARCELGATE_EXPORT_STRATEGY"), export_batch_size)?;

        let filter_store = parse_filter_store_mode(kv.get("PARCELGATE_FILTER_STORE"))?;
        let filter_store_path = nonempty_or(kv, "PARCELGATE_FILTER_STORE_PATH", "filters.json");

        let inspect_enabled = match kv.get("PARCELGATE_INSPECT_ENABLED") {
            None => false,
            Some(v) if v.trim().is_empty() => false,
            Some(v) => parse_bool(Some(v)).ok_or_else(|| StartupError {
                code: "ERR_INVALID_CONFIG",
                message: "PARCELGATE_INSPECT_ENABLED must be a boolean".to_string(),
            })?,
        };

        Ok(Self {
            bind_addr,
            db_url,
            db_max_connections,
            parcels_table,
            statement_timeout_ms,
            export_strategy,
            filter_store,
            filter_store_path,
            inspect_enabled,
        })
    }
}

fn parse_env_file(path: &str) -> Result<HashMap<String, String>, StartupError> {
    let contents = std::fs::read_to_string(path).map_err(|_| StartupError {
        code: "ERR_CONFIG_FILE_READ",
        message: format!("failed to read config file at {}", path),
    })?;

    let mut kv = HashMap::new();

    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| StartupError {
            code: "ERR_CONFIG_FILE_PARSE",
            message: format!("invalid config line {} (expected KEY=VALUE)", idx + 1),
        })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(StartupError {
                code: "ERR_CONFIG_FILE_PARSE",
                message: format!("invalid config line {} (empty key)", idx + 1),
            });
        }

        kv.insert(key.to_string(), strip_quotes(value.trim()));
    }

    Ok(kv)
}

fn strip_quotes(s: &str) -> String {
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return s[1..bytes.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn require_nonempty(
    kv: &HashMap<String, String>,
    key: &'static str,
) -> Result<String, StartupError> {
    kv.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or_else(|| StartupError {
            code: "ERR_MISSING_CONFIG",
            message: format!("missing required config key {}", key),
        })
}

fn nonempty_or(kv: &HashMap<String, String>, key: &str, default: &str) -> String {
    kv.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn parse_socket_addr(
    value: Option<&String>,
    default: SocketAddr,
    key: &'static str,
) -> Result<SocketAddr, StartupError> {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse::<SocketAddr>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be a valid host:port socket address", key),
        }),
    }
}

fn parse_usize(
    value: Option<&String>,
    default: usize,
    key: &'static str,
) -> Result<usize, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<usize>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u64(value: Option<&String>, default: u64, key: &'static str) -> Result<u64, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u64>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_u32(value: Option<&String>, default: u32, key: &'static str) -> Result<u32, StartupError> {
    match value {
        None => Ok(default),
        Some(v) if v.trim().is_empty() => Ok(default),
        Some(v) => v.trim().parse::<u32>().map_err(|_| StartupError {
            code: "ERR_INVALID_CONFIG",
            message: format!("{} must be an integer", key),
        }),
    }
}

fn parse_bool(value: Option<&String>) -> Option<bool> {
    let value = value.map(|v| v.trim()).filter(|v| !v.is_empty())?;

    match value {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

fn parse_export_strategy(
    value: Option<&String>,
    batch_size: usize,
) -> Result<ExportStrategy, StartupError> {
    let strategy = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("keyset");

    match strategy {
        "keyset" => Ok(ExportStrategy::Keyset { batch_size }),
        "single-fetch" => Ok(ExportStrategy::SingleFetch),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "PARCELGATE_EXPORT_STRATEGY must be keyset or single-fetch".to_string(),
        }),
    }
}

fn parse_filter_store_mode(value: Option<&String>) -> Result<FilterStoreMode, StartupError> {
    let mode = value
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or("file");

    match mode {
        "file" => Ok(FilterStoreMode::File),
        "postgres" => Ok(FilterStoreMode::Postgres),
        "memory" => Ok(FilterStoreMode::Memory),
        _ => Err(StartupError {
            code: "ERR_INVALID_CONFIG",
            message: "PARCELGATE_FILTER_STORE must be file, postgres or memory".to_string(),
        }),
    }
}

/// `ident` or `schema.ident`; each part `[A-Za-z_][A-Za-z0-9_]*`.
fn is_safe_relation_name(name: &str) -> bool {
    let parts = name.split('.').collect::<Vec<_>>();
    if parts.is_empty() || parts.len() > 2 {
        return false;
    }

    parts.iter().all(|part| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    })
}
