use crate::error::{Result, RouterError};

/// A parsed `ws://` / `wss://` router URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub resource: String,
}

impl RouterUrl {
    /// Parse a router URL such as `ws://localhost:8080/ws` or `wss://[::1]/`.
    ///
    /// Ports default to 80 for `ws` and 443 for `wss`; the resource defaults to `/`.
    pub fn parse(url: &str) -> Result<Self> {
        let invalid = |reason: &str| RouterError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        let default_port = match scheme {
            "ws" | "tcp" => 80,
            "wss" => 443,
            _ => return Err(invalid("scheme must be ws, wss or tcp")),
        };

        let (authority, resource) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => Some(port),
                None if tail.is_empty() => None,
                None => return Err(invalid("unexpected text after IPv6 literal")),
            };
            (host, port)
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port = match port {
            Some(port) => port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
            None => default_port,
        };

        Ok(Self {
            scheme: scheme.to_string(),
            host: host.to_string(),
            port,
            resource: resource.to_string(),
        })
    }

    /// Whether the URL asks for a TLS transport.
    pub fn is_secure(&self) -> bool {
        self.scheme == "wss"
    }
}
