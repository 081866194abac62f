use std::{
    env, fs,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use convlog_appender::DEFAULT_LOG_FILE_NAME;
use serde::Deserialize;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8788;
/// Same ceiling axum applies when no explicit limit is set.
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_file: PathBuf,
    pub cors: Option<CorsConfig>,
    pub max_body_bytes: usize,
}

/// Explicit origin allow-list. Without one, any origin is mirrored back.
#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Default, Clone)]
pub struct CliOptions {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_file: Option<PathBuf>,
    pub cors_origins: Vec<String>,
    pub max_body_bytes: Option<usize>,
}

#[derive(Debug, Default, Clone)]
pub struct FileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_file: Option<PathBuf>,
    pub cors: Option<CorsConfig>,
    pub max_body_bytes: Option<usize>,
}

#[derive(Deserialize)]
struct RootConfig {
    #[serde(default)]
    server: Option<RawFileConfig>,
}

#[derive(Deserialize, Default)]
struct RawFileConfig {
    host: Option<String>,
    port: Option<u16>,
    log_file: Option<String>,
    max_body_bytes: Option<usize>,
    cors: Option<RawCorsConfig>,
}

#[derive(Deserialize, Default)]
struct RawCorsConfig {
    allowed_origins: Option<Vec<String>>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let host = match self.host.as_str() {
            "localhost" => DEFAULT_HOST,
            other => other,
        };
        let ip: IpAddr = host
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Reads the `[server]` table of a TOML file. A path that was asked for but
/// does not exist is an error.
pub fn load_file_config(path: Option<&Path>) -> Result<Option<FileConfig>> {
    let Some(path) = path else {
        return Ok(None);
    };

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let parsed: RootConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse TOML config {}", path.display()))?;

    Ok(parsed
        .server
        .map(|raw| raw.into_runtime_config(path.parent().unwrap_or(Path::new(".")))))
}

/// Merges CLI flags over file values over defaults.
pub fn resolve(
    cli: &CliOptions,
    file_cfg: Option<&FileConfig>,
    default_log_file: PathBuf,
) -> Result<ServerConfig> {
    let host = cli
        .host
        .clone()
        .or_else(|| file_cfg.and_then(|cfg| cfg.host.clone()))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = cli
        .port
        .or_else(|| file_cfg.and_then(|cfg| cfg.port))
        .unwrap_or(DEFAULT_PORT);

    let log_file = cli
        .log_file
        .clone()
        .or_else(|| file_cfg.and_then(|cfg| cfg.log_file.clone()))
        .unwrap_or(default_log_file);

    let max_body_bytes = cli
        .max_body_bytes
        .or_else(|| file_cfg.and_then(|cfg| cfg.max_body_bytes))
        .unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if max_body_bytes == 0 {
        return Err(anyhow!("max_body_bytes must be greater than zero"));
    }

    let config = ServerConfig {
        host,
        port,
        log_file,
        cors: build_cors_config(cli, file_cfg),
        max_body_bytes,
    };
    config.bind_addr()?;

    Ok(config)
}

/// `conversations.ndjson` next to the running executable, or in the current
/// directory when the executable location is unknown.
pub fn default_log_file() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(DEFAULT_LOG_FILE_NAME)
}

fn build_cors_config(cli: &CliOptions, file_cfg: Option<&FileConfig>) -> Option<CorsConfig> {
    let mut origins: Vec<String> = Vec::new();

    if let Some(cfg) = file_cfg.and_then(|cfg| cfg.cors.as_ref()) {
        origins.extend(cfg.allowed_origins.iter().cloned());
    }

    origins.extend(cli.cors_origins.iter().cloned());

    if origins.is_empty() {
        return None;
    }

    origins.sort();
    origins.dedup();

    Some(CorsConfig {
        allowed_origins: origins,
    })
}

fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

impl RawFileConfig {
    fn into_runtime_config(self, base: &Path) -> FileConfig {
        FileConfig {
            host: self.host,
            port: self.port,
            log_file: self
                .log_file
                .map(|value| resolve_relative(base, Path::new(&value))),
            cors: self.cors.map(RawCorsConfig::into_runtime_config),
            max_body_bytes: self.max_body_bytes,
        }
    }
}

impl RawCorsConfig {
    fn into_runtime_config(self) -> CorsConfig {
        CorsConfig {
            allowed_origins: self.allowed_origins.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fallback() -> PathBuf {
        PathBuf::from("/srv/convlog").join(DEFAULT_LOG_FILE_NAME)
    }

    #[test]
    fn defaults_apply_without_cli_or_file() {
        let config = resolve(&CliOptions::default(), None, fallback()).expect("resolve");

        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.log_file, fallback());
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert!(config.cors.is_none());
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:8788");
    }

    #[test]
    fn file_config_is_loaded_and_paths_resolve_against_its_directory() {
        let dir = tempdir().expect("tempdir");
        let config_path = dir.path().join("convlog.toml");
        fs::write(
            &config_path,
            r#"
[server]
host = "0.0.0.0"
port = 9100
log_file = "logs/chat.ndjson"
max_body_bytes = 4096

[server.cors]
allowed_origins = ["https://chat.example.com"]
"#,
        )
        .expect("write config");

        let file_cfg = load_file_config(Some(&config_path))
            .expect("load config")
            .expect("server table");
        let config = resolve(&CliOptions::default(), Some(&file_cfg), fallback()).unwrap();

        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9100);
        assert_eq!(config.log_file, dir.path().join("logs/chat.ndjson"));
        assert_eq!(config.max_body_bytes, 4096);
        let cors = config.cors.expect("cors config");
        assert_eq!(
            cors.allowed_origins,
            vec!["https://chat.example.com".to_string()]
        );
    }

    #[test]
    fn cli_overrides_file_values() {
        let file_cfg = FileConfig {
            host: Some("0.0.0.0".to_string()),
            port: Some(9100),
            log_file: Some(PathBuf::from("/var/log/file.ndjson")),
            cors: Some(CorsConfig {
                allowed_origins: vec!["https://b.example".to_string()],
            }),
            max_body_bytes: Some(1024),
        };
        let cli = CliOptions {
            host: Some("::1".to_string()),
            port: Some(9200),
            log_file: Some(PathBuf::from("cli.ndjson")),
            cors_origins: vec![
                "https://a.example".to_string(),
                "https://b.example".to_string(),
            ],
            max_body_bytes: Some(2048),
        };

        let config = resolve(&cli, Some(&file_cfg), fallback()).unwrap();

        assert_eq!(config.port, 9200);
        assert_eq!(config.bind_addr().unwrap().to_string(), "[::1]:9200");
        assert_eq!(config.log_file, PathBuf::from("cli.ndjson"));
        assert_eq!(config.max_body_bytes, 2048);
        assert_eq!(
            config.cors.unwrap().allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn missing_server_table_yields_no_file_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("other.toml");
        fs::write(&config_path, "[unrelated]\nkey = 1\n").unwrap();

        assert!(load_file_config(Some(&config_path)).unwrap().is_none());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = load_file_config(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn invalid_host_is_rejected() {
        let cli = CliOptions {
            host: Some("not a host".to_string()),
            ..CliOptions::default()
        };
        let err = resolve(&cli, None, fallback()).unwrap_err();
        assert!(err.to_string().contains("Invalid bind address"));
    }

    #[test]
    fn zero_body_limit_is_rejected() {
        let cli = CliOptions {
            max_body_bytes: Some(0),
            ..CliOptions::default()
        };
        assert!(resolve(&cli, None, fallback()).is_err());
    }

    #[test]
    fn default_log_file_uses_conventional_name() {
        assert_eq!(
            default_log_file().file_name().and_then(|name| name.to_str()),
            Some(DEFAULT_LOG_FILE_NAME)
        );
    }
}
