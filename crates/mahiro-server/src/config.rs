//! Server configuration: TOML file, CLI overrides, environment defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use mahiro_client::{ClientConfig, InterceptorSettings};
use mahiro_core::{GatewayAddress, MahiroError};
use serde::Deserialize;
use tracing::info;

pub const ENV_PYTHON_PORT: &str = "MAHIRO_PYTHON_PORT";
pub const ENV_NODE_URL: &str = "MAHIRO_NODE_URL";

const DEFAULT_PYTHON_PORT: u16 = 8099;
const DEFAULT_SERVICE_PORT: u16 = 8098;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub bot: BotSection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub advanced: AdvancedSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub interceptors: InterceptorSettings,
}

/// `[bot]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BotSection {
    pub qq: Option<i64>,
}

/// `[gateway]` section: `host`/`port` or `ws`, never both.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewaySection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ws: Option<String>,
}

impl GatewaySection {
    fn is_empty(&self) -> bool {
        self.host.is_none() && self.port.is_none() && self.ws.is_none()
    }
}

/// `[advanced]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct AdvancedSection {
    #[serde(default = "default_true")]
    pub ignore_myself: bool,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
}

impl Default for AdvancedSection {
    fn default() -> Self {
        Self {
            ignore_myself: true,
            history_capacity: default_history_capacity(),
            reconnect_delay_secs: default_reconnect_delay(),
            send_timeout_secs: default_send_timeout(),
        }
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub port: Option<u16>,
    pub python_port: Option<u16>,
    #[serde(default = "default_true")]
    pub forward: bool,
    /// Overrides `http://localhost:{python_port}`.
    pub forward_url: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: None,
            python_port: None,
            forward: true,
            forward_url: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_history_capacity() -> usize {
    50
}
fn default_reconnect_delay() -> u64 {
    5
}
fn default_send_timeout() -> u64 {
    10
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}

/// Values taken from the command line. `None` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub qq: Option<i64>,
    pub host: Option<String>,
    pub ws_port: Option<u16>,
    pub ws_url: Option<String>,
    pub port: Option<u16>,
    pub python_port: Option<u16>,
    pub no_forward: bool,
}

/// Defaults read from the environment; used only when neither the file nor
/// the command line sets a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvDefaults {
    pub python_port: Option<u16>,
    pub service_port: Option<u16>,
}

impl EnvDefaults {
    pub fn from_env() -> Self {
        Self {
            python_port: std::env::var(ENV_PYTHON_PORT)
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            service_port: std::env::var(ENV_NODE_URL)
                .ok()
                .and_then(|v| port_from_url(&v)),
        }
    }
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub client: ClientConfig,
    pub listen: SocketAddr,
    pub python_port: u16,
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides and environment
    /// defaults.
    pub fn load(
        config_path: Option<&Path>,
        cli: &CliOverrides,
        env: &EnvDefaults,
    ) -> Result<Self> {
        let file = match config_path {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };
        Self::resolve(file, cli, env)
    }

    pub fn resolve(file: ConfigFile, cli: &CliOverrides, env: &EnvDefaults) -> Result<Self> {
        let bot_id = cli
            .qq
            .or(file.bot.qq)
            .ok_or_else(|| {
                MahiroError::ConfigInvalid("bot qq is required ([bot] qq or --qq)".into())
            })?;

        let cli_gateway = GatewaySection {
            host: cli.host.clone(),
            port: cli.ws_port,
            ws: cli.ws_url.clone(),
        };
        let gateway_section = if cli_gateway.is_empty() {
            file.gateway
        } else {
            cli_gateway
        };
        let gateway = GatewayAddress::from_parts(
            gateway_section.host.as_deref(),
            gateway_section.port,
            gateway_section.ws.as_deref(),
        )?;

        let python_port = cli
            .python_port
            .or(file.server.python_port)
            .or(env.python_port)
            .unwrap_or(DEFAULT_PYTHON_PORT);
        let port = cli
            .port
            .or(file.server.port)
            .or(env.service_port)
            .unwrap_or(DEFAULT_SERVICE_PORT);
        let listen: SocketAddr = format!("{}:{}", file.server.bind, port)
            .parse()
            .with_context(|| format!("invalid [server] bind '{}'", file.server.bind))?;

        let forward_base_url = if file.server.forward && !cli.no_forward {
            Some(
                file.server
                    .forward_url
                    .unwrap_or_else(|| format!("http://localhost:{python_port}")),
            )
        } else {
            None
        };

        let client = ClientConfig {
            ignore_myself: file.advanced.ignore_myself,
            reconnect_delay: Duration::from_secs(file.advanced.reconnect_delay_secs),
            send_timeout: Duration::from_secs(file.advanced.send_timeout_secs),
            history_capacity: file.advanced.history_capacity,
            forward_base_url,
            interceptors: file.interceptors,
            ..ClientConfig::new(bot_id, gateway)
        };
        client.validate()?;

        Ok(Self {
            client,
            listen,
            python_port,
        })
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let expanded = expand_tilde(path);
    if !expanded.exists() {
        info!(path = %expanded.display(), "config file not found, using defaults");
        return Ok(ConfigFile::default());
    }
    info!(path = %expanded.display(), "loading config file");
    let content = std::fs::read_to_string(&expanded)
        .with_context(|| format!("cannot read config {}", expanded.display()))?;
    toml::from_str::<ConfigFile>(&content)
        .map_err(|e| MahiroError::ConfigInvalid(format!("{}: {e}", expanded.display())).into())
}

/// Port of an `http://host:port/...` URL.
fn port_from_url(url: &str) -> Option<u16> {
    let rest = url.trim().split_once("://").map_or(url.trim(), |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next()?;
    let (_, port) = authority.rsplit_once(':')?;
    port.parse().ok()
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn cli_qq(qq: i64) -> CliOverrides {
        CliOverrides {
            qq: Some(qq),
            ..Default::default()
        }
    }

    #[test]
    fn full_file() {
        let file = write_config(
            r#"
            [bot]
            qq = 123

            [gateway]
            ws = "wss://gw.example.com/ws"

            [advanced]
            ignore_myself = false
            history_capacity = 5
            reconnect_delay_secs = 2

            [server]
            bind = "127.0.0.1"
            port = 9000
            python_port = 9001

            [interceptors]
            enabled = ["content-safety", "repeat-guard"]
            blocked_terms = ["spam"]
            repeat_window = 2
            "#,
        );
        let config =
            ServerConfig::load(Some(file.path()), &CliOverrides::default(), &EnvDefaults::default())
                .unwrap();

        assert_eq!(config.client.bot_id, 123);
        assert_eq!(config.client.gateway.socket_url(), "wss://gw.example.com/ws");
        assert!(!config.client.ignore_myself);
        assert_eq!(config.client.history_capacity, 5);
        assert_eq!(config.client.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.client.send_timeout, Duration::from_secs(10));
        assert_eq!(config.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.python_port, 9001);
        assert_eq!(
            config.client.forward_base_url.as_deref(),
            Some("http://localhost:9001")
        );
        assert_eq!(config.client.interceptors.enabled.len(), 2);
        assert_eq!(config.client.interceptors.repeat_window, 2);
    }

    #[test]
    fn defaults_apply_with_only_qq() {
        let cli = CliOverrides {
            host: Some("10.0.0.2".into()),
            ..cli_qq(1)
        };
        let config =
            ServerConfig::resolve(ConfigFile::default(), &cli, &EnvDefaults::default()).unwrap();
        assert_eq!(config.client.gateway.socket_url(), "ws://10.0.0.2:8086/ws");
        assert_eq!(config.listen.port(), 8098);
        assert_eq!(config.python_port, 8099);
        assert!(config.client.ignore_myself);
        assert_eq!(config.client.interceptors, InterceptorSettings::default());
    }

    #[test]
    fn missing_qq_is_config_invalid() {
        let file = write_config("[gateway]\nport = 8086\n");
        let (cli, env) = (CliOverrides::default(), EnvDefaults::default());
        let err = ServerConfig::load(Some(file.path()), &cli, &env).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MahiroError>(),
            Some(MahiroError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn missing_gateway_is_config_invalid() {
        let err = ServerConfig::resolve(ConfigFile::default(), &cli_qq(1), &EnvDefaults::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MahiroError>(),
            Some(MahiroError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn both_gateway_forms_rejected() {
        let file = write_config("[bot]\nqq = 1\n[gateway]\nhost = \"a\"\nws = \"ws://a/ws\"\n");
        let (cli, env) = (CliOverrides::default(), EnvDefaults::default());
        assert!(ServerConfig::load(Some(file.path()), &cli, &env).is_err());
    }

    #[test]
    fn cli_gateway_replaces_file_gateway() {
        let file = write_config("[bot]\nqq = 1\n[gateway]\nws = \"ws://file/ws\"\n");
        let cli = CliOverrides {
            ws_port: Some(9999),
            ..Default::default()
        };
        let config = ServerConfig::load(Some(file.path()), &cli, &EnvDefaults::default()).unwrap();
        assert_eq!(config.client.gateway.socket_url(), "ws://0.0.0.0:9999/ws");
    }

    #[test]
    fn precedence_cli_then_file_then_env() {
        let env = EnvDefaults {
            python_port: Some(7001),
            service_port: Some(7002),
        };
        let file = ConfigFile {
            gateway: GatewaySection {
                port: Some(8086),
                ..Default::default()
            },
            server: ServerSection {
                port: Some(6002),
                ..Default::default()
            },
            ..Default::default()
        };

        let config = ServerConfig::resolve(file.clone(), &cli_qq(1), &env).unwrap();
        assert_eq!(config.python_port, 7001);
        assert_eq!(config.listen.port(), 6002);

        let cli = CliOverrides {
            port: Some(5002),
            python_port: Some(5001),
            ..cli_qq(1)
        };
        let config = ServerConfig::resolve(file, &cli, &env).unwrap();
        assert_eq!(config.python_port, 5001);
        assert_eq!(config.listen.port(), 5002);
        assert_eq!(
            config.client.forward_base_url.as_deref(),
            Some("http://localhost:5001")
        );
    }

    #[test]
    fn forwarding_can_be_disabled_or_redirected() {
        let mut file = ConfigFile {
            gateway: GatewaySection {
                port: Some(8086),
                ..Default::default()
            },
            ..Default::default()
        };
        file.server.forward_url = Some("http://py.internal:5000".into());
        let config =
            ServerConfig::resolve(file.clone(), &cli_qq(1), &EnvDefaults::default()).unwrap();
        assert_eq!(
            config.client.forward_base_url.as_deref(),
            Some("http://py.internal:5000")
        );

        let cli = CliOverrides {
            no_forward: true,
            ..cli_qq(1)
        };
        let config = ServerConfig::resolve(file, &cli, &EnvDefaults::default()).unwrap();
        assert!(config.client.forward_base_url.is_none());
    }

    #[test]
    fn malformed_toml_is_config_invalid() {
        let file = write_config("[bot\nqq = ");
        let err = ServerConfig::load(Some(file.path()), &cli_qq(1), &EnvDefaults::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MahiroError>(),
            Some(MahiroError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cli = CliOverrides {
            ws_url: Some("ws://127.0.0.1:8086/ws".into()),
            ..cli_qq(5)
        };
        let config =
            ServerConfig::load(Some(&dir.path().join("absent.toml")), &cli, &EnvDefaults::default())
                .unwrap();
        assert_eq!(config.client.bot_id, 5);
    }

    #[test]
    fn node_url_port() {
        assert_eq!(port_from_url("http://localhost:8098"), Some(8098));
        assert_eq!(port_from_url("http://127.0.0.1:3000/api"), Some(3000));
        assert_eq!(port_from_url("localhost:42"), Some(42));
        assert_eq!(port_from_url("http://localhost"), None);
    }

    #[test]
    fn tilde_expansion() {
        let expanded = expand_tilde(Path::new("~/.mahiro/config.toml"));
        if dirs::home_dir().is_some() {
            assert!(!expanded.starts_with("~"));
            assert!(expanded.ends_with(".mahiro/config.toml"));
        }
        assert_eq!(expand_tilde(Path::new("/etc/mahiro.toml")), PathBuf::from("/etc/mahiro.toml"));
    }
}
