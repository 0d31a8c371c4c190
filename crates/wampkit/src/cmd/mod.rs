use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use serde_json::Value;
use wampkit_peer::{Client, ClientBuilder, Dict, Payload};
use wampkit_router::{RouterConfig, RouterUrl};
use wampkit_transport::{Endpoint, IpVersion};

use crate::exit::{peer_error, router_error, CliError, CliResult, CONFIG, USAGE};
use crate::output::OutputFormat;

pub mod call;
pub mod probe;
pub mod publish;
pub mod subscribe;
pub mod version;

/// Environment variable naming the router configuration file.
pub const ROUTER_CONFIG_ENV: &str = "WAMPKIT_ROUTER_CONFIG";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Call a remote procedure and print its result.
    Call(CallArgs),
    /// Publish one event to a topic.
    Publish(PublishArgs),
    /// Subscribe to a topic and print events.
    Subscribe(SubscribeArgs),
    /// Check router readiness and open a session.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Call(args) => call::run(args, format),
        Command::Publish(args) => publish::run(args, format),
        Command::Subscribe(args) => subscribe::run(args, format),
        Command::Probe(args) => probe::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Where to find the router. `--url` wins over a configuration file.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Router configuration file (JSON).
    #[arg(long, value_name = "PATH", env = ROUTER_CONFIG_ENV)]
    pub config: Option<PathBuf>,
    /// Router transport URL, e.g. ws://127.0.0.1:8080/ws.
    #[arg(long)]
    pub url: Option<String>,
    /// Realm to join. Defaults to the configured realm.
    #[arg(long)]
    pub realm: Option<String>,
    /// Client name used in logs.
    #[arg(long, default_value = "wampkit-cli")]
    pub name: String,
    /// Timeout for connect, handshake and each request (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug, Clone, Default)]
pub struct PayloadArgs {
    /// Positional argument as JSON (repeatable). Text that is not JSON is
    /// sent as a string.
    #[arg(long = "arg", value_name = "JSON")]
    pub args: Vec<String>,
    /// Keyword arguments as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub kwargs: Option<String>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Procedure URI.
    pub procedure: String,
    #[command(flatten)]
    pub payload: PayloadArgs,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Topic URI.
    pub topic: String,
    #[command(flatten)]
    pub payload: PayloadArgs,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Topic URI.
    pub topic: String,
    /// Exit after receiving N events.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// A resolved router endpoint and the realm to join there.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub endpoint: Endpoint,
    pub realm: String,
}

pub fn resolve_target(args: &ConnectArgs) -> CliResult<Target> {
    if let Some(url) = &args.url {
        let url = RouterUrl::parse(url).map_err(|err| router_error("invalid --url", err))?;
        if url.is_secure() {
            return Err(CliError::new(
                CONFIG,
                format!("{} transports are not supported", url.scheme),
            ));
        }
        let realm = args
            .realm
            .clone()
            .ok_or_else(|| CliError::new(USAGE, "--realm is required with --url"))?;
        let ip_version = if url.host.parse::<Ipv6Addr>().is_ok() {
            IpVersion::V6
        } else {
            IpVersion::V4
        };
        let endpoint = Endpoint::new(url.host, url.port)
            .with_resource(url.resource)
            .with_ip_version(ip_version);
        return Ok(Target { endpoint, realm });
    }

    if let Some(path) = &args.config {
        let config = RouterConfig::from_path(path).map_err(|err| {
            router_error(&format!("failed loading {}", path.display()), err)
        })?;
        let realm = args.realm.clone().unwrap_or_else(|| config.realm.clone());
        return Ok(Target {
            endpoint: config.endpoint(),
            realm,
        });
    }

    Err(CliError::new(
        USAGE,
        format!("no router given: pass --url or --config (or set {ROUTER_CONFIG_ENV})"),
    ))
}

/// Connect, open the session and register whatever `builder` declares.
pub fn start_client(args: &ConnectArgs, builder: ClientBuilder) -> CliResult<Client> {
    let target = resolve_target(args)?;
    let timeout = parse_duration(&args.timeout)?;

    let client = builder
        .realm(target.realm)
        .name(args.name.clone())
        .connect_timeout(timeout)
        .handshake_timeout(timeout)
        .startup_timeout(timeout)
        .call_timeout(timeout)
        .connect(&target.endpoint)
        .map_err(|err| peer_error("connect failed", err))?;
    client
        .start()
        .map_err(|err| peer_error("session failed", err))?;
    Ok(client)
}

impl PayloadArgs {
    pub fn to_payload(&self) -> CliResult<Payload> {
        let args = self
            .args
            .iter()
            .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
            .collect::<Vec<Value>>();

        let kwargs = match &self.kwargs {
            None => Dict::new(),
            Some(text) => match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(CliError::new(USAGE, "--kwargs must be a JSON object")),
                Err(err) => {
                    return Err(CliError::new(
                        USAGE,
                        format!("--kwargs is not valid JSON: {err}"),
                    ))
                }
            },
        };

        Ok(Payload { args, kwargs })
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
