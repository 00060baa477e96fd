use {
    relaybot_channels::{Error, Result},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

const DEFAULT_PORT: u16 = 6667;
const DEFAULT_TLS_PORT: u16 = 6697;

/// Configuration for a single IRC server connection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IrcServerConfig {
    /// `host[:port]`. The port defaults to 6667, or 6697 with TLS.
    pub host: String,

    #[serde(default)]
    pub use_tls: bool,

    /// Accept any server certificate. Only for self-signed test networks.
    #[serde(default)]
    pub skip_tls_verify: bool,

    /// Ident sent in `USER`. Defaults to the nick.
    #[serde(default)]
    pub username: Option<String>,

    /// Server password sent as `PASS` before registration.
    #[serde(
        default,
        serialize_with = "serialize_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<Secret<String>>,

    pub nick: String,

    /// Realname sent in `USER`. Defaults to the nick.
    #[serde(default)]
    pub realname: Option<String>,
}

impl std::fmt::Debug for IrcServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrcServerConfig")
            .field("host", &self.host)
            .field("use_tls", &self.use_tls)
            .field("skip_tls_verify", &self.skip_tls_verify)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("nick", &self.nick)
            .finish_non_exhaustive()
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_str(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

impl IrcServerConfig {
    /// Parse and check a `servers.irc.<name>` table.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| Error::invalid_config(e.to_string()))?;
        if config.host.trim().is_empty() {
            return Err(Error::invalid_config("irc: host must not be empty"));
        }
        if config.nick.trim().is_empty() || config.nick.contains(char::is_whitespace) {
            return Err(Error::invalid_config(format!(
                "irc: invalid nick '{}'",
                config.nick
            )));
        }
        config.address()?;
        Ok(config)
    }

    /// Split `host` into the hostname and port to dial.
    pub fn address(&self) -> Result<(String, u16)> {
        let default_port = if self.use_tls {
            DEFAULT_TLS_PORT
        } else {
            DEFAULT_PORT
        };
        let host = self.host.trim();

        if let Some(rest) = host.strip_prefix('[') {
            let (addr, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::invalid_config(format!("irc: bad host '{host}'")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port, host)?,
                None if tail.is_empty() => default_port,
                None => return Err(Error::invalid_config(format!("irc: bad host '{host}'"))),
            };
            return Ok((addr.to_string(), port));
        }

        match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') => Ok((name.to_string(), parse_port(port, host)?)),
            _ => Ok((host.to_string(), default_port)),
        }
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.nick)
    }

    pub fn realname(&self) -> &str {
        self.realname.as_deref().unwrap_or(&self.nick)
    }
}

fn parse_port(port: &str, host: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| Error::invalid_config(format!("irc: bad port in '{host}'")))
}
