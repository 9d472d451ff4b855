//! 서비스 설정 (service_config.json)
//!
//! WMS 서비스가 바인딩할 host/port와 표시 언어(locale)를 보관합니다.
//! 파일이 없거나 깨져 있어도 `load()`는 실패하지 않고 기본값으로 폴백합니다.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

pub const CONFIG_FILE_NAME: &str = "service_config.json";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_LOCALE: &str = "en";
pub const SUPPORTED_LOCALES: &[&str] = &["en", "zh"];

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to write config file '{path}': {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "CONFIG_INVALID",
            Self::WriteFailed { .. } => "WRITE_FAILED",
        }
    }
}

/// Network address and display language of the tracked WMS service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    #[serde(alias = "language")]
    pub locale: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            locale: DEFAULT_LOCALE.to_string(),
        }
    }
}

impl ServiceConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Launch arguments must be derivable from every config that passes here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_host(&self.host) {
            return Err(ConfigError::Invalid(format!(
                "host '{}' is not a valid IP address or hostname",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid(
                "port must be between 1 and 65535".to_string(),
            ));
        }
        if !SUPPORTED_LOCALES.contains(&self.locale.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "unsupported locale '{}' (expected one of: {})",
                self.locale,
                SUPPORTED_LOCALES.join(", ")
            )));
        }
        Ok(())
    }

    pub fn base_url(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(v6)) => format!("http://[{}]:{}", v6, self.port),
            _ => format!("http://{}:{}", self.host, self.port),
        }
    }

    /// 와일드카드 바인드(0.0.0.0, ::)는 접속 시 루프백으로 치환
    pub fn connect_addr(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(ip) if ip.is_unspecified() && ip.is_ipv4() => format!("127.0.0.1:{}", self.port),
            Ok(ip) if ip.is_unspecified() => format!("[::1]:{}", self.port),
            Ok(IpAddr::V6(v6)) => format!("[{}]:{}", v6, self.port),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

fn hostname_label() -> &'static regex::Regex {
    static LABEL: OnceLock<regex::Regex> = OnceLock::new();
    LABEL.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$")
            .expect("hostname label pattern is valid")
    })
}

/// IPv4/IPv6 리터럴 또는 RFC 1123 호스트명
pub fn is_valid_host(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    // 숫자와 점으로만 이루어졌는데 IP 파싱에 실패했다면 잘못된 IPv4 (예: 999.1.1.1)
    if host.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return false;
    }
    host.split('.').all(|label| hostname_label().is_match(label))
}

/// Loads, validates and persists [`ServiceConfig`], caching the last value.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<ServiceConfig>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(ServiceConfig::default()),
        }
    }

    /// `new` + `load`
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self::new(path);
        store.load();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 로드: 파일이 없거나 깨져 있으면 기본값, 필드 단위로도 폴백
    pub fn load(&self) -> ServiceConfig {
        tracing::info!("Loading service config from {}", self.path.display());
        let config = match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => resolve_fields(&map),
                Ok(_) => {
                    tracing::warn!(
                        "Config file '{}' is not a JSON object, using defaults",
                        self.path.display()
                    );
                    ServiceConfig::default()
                }
                Err(e) => {
                    tracing::warn!(
                        "Config file '{}' is not valid JSON ({}), using defaults",
                        self.path.display(),
                        e
                    );
                    ServiceConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Config file '{}' not found, using defaults", self.path.display());
                ServiceConfig::default()
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file '{}': {}, using defaults",
                    self.path.display(),
                    e
                );
                ServiceConfig::default()
            }
        };

        tracing::info!(
            "Config loaded: host={}, port={}, locale={}",
            config.host,
            config.port,
            config.locale
        );
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = config.clone();
        config
    }

    /// 저장: 검증 실패 시 파일은 건드리지 않음
    pub fn save(&self, config: &ServiceConfig) -> Result<(), ConfigError> {
        config.validate()?;

        let write = || -> std::io::Result<()> {
            if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            let json = serde_json::to_string_pretty(config)?;
            fs::write(&self.path, json)
        };
        write().map_err(|source| {
            tracing::error!("Failed to save config to {}: {}", self.path.display(), source);
            ConfigError::WriteFailed {
                path: self.path.clone(),
                source,
            }
        })?;

        tracing::info!(
            "Config saved: host={}, port={}, locale={}",
            config.host,
            config.port,
            config.locale
        );
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = config.clone();
        Ok(())
    }

    pub fn current(&self) -> ServiceConfig {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn resolve_fields(map: &serde_json::Map<String, Value>) -> ServiceConfig {
    let mut config = ServiceConfig::default();

    match map.get("host") {
        Some(Value::String(h)) if is_valid_host(h.trim()) => config.host = h.trim().to_string(),
        Some(other) => {
            tracing::warn!("Invalid host {} in config, using default {}", other, DEFAULT_HOST)
        }
        None => {}
    }

    let port = map.get("port").map(|v| match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    });
    match port {
        Some(Some(p)) if (1..=65535).contains(&p) => config.port = p as u16,
        Some(_) => tracing::warn!(
            "Invalid port {} in config (expected 1-65535), using default {}",
            map["port"],
            DEFAULT_PORT
        ),
        None => {}
    }

    match map.get("locale").or_else(|| map.get("language")) {
        Some(Value::String(l)) if SUPPORTED_LOCALES.contains(&l.as_str()) => {
            config.locale = l.clone()
        }
        Some(other) => {
            tracing::warn!("Unsupported locale {} in config, using default {}", other, DEFAULT_LOCALE)
        }
        None => {}
    }

    config
}
