use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use wampkit_transport::{Endpoint, IpVersion};

use crate::error::{Result, RouterError};
use crate::schema::validate_config;
use crate::url::RouterUrl;

/// Limits applied while loading a router config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigLimits {
    /// Maximum bytes read from the config file.
    pub max_config_file_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_config_file_size: 1024 * 1024,
        }
    }
}

/// The single transport a router exposes to wampkit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub url: String,
    pub host: String,
    pub port: u16,
    pub resource: String,
    pub ip_version: IpVersion,
    pub secure: bool,
}

/// Everything wampkit needs out of a router config file.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Realm name joined on HELLO.
    pub realm: String,
    /// Role permission blocks for the realm, as written in the config.
    pub roles: Vec<Value>,
    pub transport: TransportConfig,
    /// Path the config was loaded from, if any.
    pub path: Option<PathBuf>,
}

#[derive(Deserialize)]
struct RawConfig {
    workers: Vec<RawWorker>,
}

#[derive(Deserialize)]
struct RawWorker {
    realms: Vec<RawRealm>,
    transports: Vec<RawTransport>,
}

#[derive(Deserialize)]
struct RawRealm {
    name: String,
    #[serde(default)]
    roles: Vec<Value>,
}

#[derive(Deserialize)]
struct RawTransport {
    url: Option<String>,
    endpoint: RawEndpoint,
}

#[derive(Deserialize)]
struct RawEndpoint {
    version: Option<u64>,
}

impl RouterConfig {
    /// Parse and validate a router config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Validate an already-parsed router config document.
    pub fn from_value(value: Value) -> Result<Self> {
        validate_config(&value)?;
        let raw: RawConfig = serde_json::from_value(value)?;

        let worker = raw
            .workers
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::Invalid("no workers configured".to_string()))?;

        if worker.realms.len() > 1 {
            warn!(
                realms = worker.realms.len(),
                "only the first realm is used"
            );
        }
        let realm = worker
            .realms
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::Invalid("no realms configured".to_string()))?;

        if worker.transports.len() != 1 {
            return Err(RouterError::Invalid(format!(
                "exactly one transport is supported, found {}",
                worker.transports.len()
            )));
        }
        let transport = worker
            .transports
            .into_iter()
            .next()
            .ok_or_else(|| RouterError::Invalid("no transports configured".to_string()))?;

        let url = transport.url.ok_or_else(|| {
            RouterError::Invalid("the transport `url` value is required".to_string())
        })?;

        let ip_version = match transport.endpoint.version {
            Some(number) => IpVersion::from_number(number).ok_or_else(|| {
                RouterError::Invalid(format!("unknown IP version: {number}"))
            })?,
            None => {
                warn!("no endpoint IP version configured; defaulting to IPv4");
                IpVersion::V4
            }
        };

        let parsed = RouterUrl::parse(&url)?;
        let transport = TransportConfig {
            secure: parsed.is_secure(),
            host: parsed.host,
            port: parsed.port,
            resource: parsed.resource,
            url,
            ip_version,
        };

        debug!(
            realm = %realm.name,
            url = %transport.url,
            ip_version = %transport.ip_version,
            "router config loaded"
        );

        Ok(Self {
            realm: realm.name,
            roles: realm.roles,
            transport,
            path: None,
        })
    }

    /// Load a router config file with default limits.
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_path_with_limits(path, ConfigLimits::default())
    }

    /// Load a router config file with explicit limits.
    pub fn from_path_with_limits(path: &Path, limits: ConfigLimits) -> Result<Self> {
        let metadata = std::fs::symlink_metadata(path)
            .map_err(|err| RouterError::LoadFailed(format!("{}: {err}", path.display())))?;
        if metadata.file_type().is_symlink() {
            return Err(RouterError::LoadFailed(format!(
                "refusing to load config symlink: {}",
                path.display()
            )));
        }
        if !metadata.is_file() {
            return Err(RouterError::LoadFailed(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        if metadata.len() > limits.max_config_file_size as u64 {
            return Err(RouterError::LoadFailed(format!(
                "config file too large ({} bytes): {}",
                metadata.len(),
                path.display()
            )));
        }

        let file = std::fs::File::open(path)
            .map_err(|err| RouterError::LoadFailed(format!("{}: {err}", path.display())))?;
        let read_limit =
            u64::try_from(limits.max_config_file_size.saturating_add(1)).unwrap_or(u64::MAX);
        let mut content = String::new();
        file.take(read_limit)
            .read_to_string(&mut content)
            .map_err(|err| RouterError::LoadFailed(format!("{}: {err}", path.display())))?;
        if content.len() > limits.max_config_file_size {
            return Err(RouterError::LoadFailed(format!(
                "config file too large while reading: {}",
                path.display()
            )));
        }

        let mut config = Self::from_json(&content)?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// The transport endpoint clients should connect to.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.transport.host.clone(), self.transport.port)
            .with_resource(self.transport.resource.clone())
            .with_ip_version(self.transport.ip_version)
    }
}
