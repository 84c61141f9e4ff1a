use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration. Every value can be set via a `TALKTO_`-prefixed
/// environment variable; CLI flags take precedence over the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub frontend_port: u16,
    /// LAN mode: bind for the network and disable the localhost auth bypass.
    pub network: bool,
    pub data_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub log_level: String,
}

/// CLI overrides applied on top of the environment.
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub network: Option<bool>,
    pub data_dir: Option<PathBuf>,
    pub prompts_dir: Option<PathBuf>,
}

fn env_var(key: &str) -> Option<String> {
    env::var(format!("TALKTO_{key}")).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str) -> Option<bool> {
    env_var(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 15377,
            frontend_port: 3000,
            network: false,
            data_dir: PathBuf::from("./data"),
            prompts_dir: PathBuf::from("./prompts"),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from the environment, then apply CLI overrides.
    ///
    /// Priority: CLI args > environment > defaults
    pub fn load(overrides: ConfigOverrides) -> Self {
        let defaults = Self::default();
        let mut config = Self {
            host: env_var("HOST").unwrap_or(defaults.host),
            port: env_var("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            frontend_port: env_var("FRONTEND_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.frontend_port),
            network: env_bool("NETWORK").unwrap_or(defaults.network),
            data_dir: env_var("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            prompts_dir: env_var("PROMPTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.prompts_dir),
            log_level: env_var("LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        if let Some(host) = overrides.host {
            config.host = host;
        }
        if let Some(port) = overrides.port {
            config.port = port;
        }
        if let Some(network) = overrides.network {
            config.network = network;
        }
        if let Some(data_dir) = overrides.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(prompts_dir) = overrides.prompts_dir {
            config.prompts_dir = prompts_dir;
        }

        config
    }

    pub fn socket_addr(&self) -> std::result::Result<SocketAddr, std::net::AddrParseError> {
        let host = if self.network { "0.0.0.0" } else { self.host.as_str() };
        format!("{}:{}", host, self.port).parse()
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("talkto.db")
    }

    /// The base URL advertised to clients: the LAN address in network mode,
    /// localhost otherwise.
    #[must_use]
    pub fn base_url(&self) -> String {
        if self.network {
            format!("http://{}:{}", lan_ip().unwrap_or_else(|| self.host.clone()), self.port)
        } else {
            format!("http://localhost:{}", self.port)
        }
    }
}

/// Best-effort LAN IP discovery: the local address of a UDP socket "connected"
/// to a public address. No packets are sent.
fn lan_ip() -> Option<String> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}
