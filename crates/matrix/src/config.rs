use {
    relaybot_channels::{Error, Result},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Configuration for a single Matrix account.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixServerConfig {
    /// Base URL of the homeserver, e.g. `https://matrix.org`.
    pub homeserver: String,

    /// Localpart or full user id used for password login.
    pub username: String,

    #[serde(serialize_with = "serialize_secret")]
    pub password: Secret<String>,

    /// Profile display name set after login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Long-poll timeout for `/sync`, in seconds.
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
}

fn default_sync_timeout_secs() -> u64 {
    30
}

impl std::fmt::Debug for MatrixServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixServerConfig")
            .field("homeserver", &self.homeserver)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

impl MatrixServerConfig {
    /// Parse and check a `servers.matrix.<name>` table.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: Self =
            serde_json::from_value(value).map_err(|e| Error::invalid_config(e.to_string()))?;

        let url = reqwest::Url::parse(&config.homeserver).map_err(|e| {
            Error::invalid_config(format!(
                "matrix: invalid homeserver '{}': {e}",
                config.homeserver
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::invalid_config(format!(
                "matrix: homeserver must be http(s), got '{}'",
                config.homeserver
            )));
        }
        if config.username.trim().is_empty() {
            return Err(Error::invalid_config("matrix: username must not be empty"));
        }
        Ok(config)
    }
}
