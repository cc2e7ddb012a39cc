use clap::Parser;
use lib_distro::{DistroSettings, TlsFiles};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "export_distro.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Export distribution service: fans device events out to registered exports", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "DISTRO_PORT", help = "Port of the control HTTP server.")]
    pub port: Option<u16>,

    #[clap(long, env = "DISTRO_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "DISTRO_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "DISTRO_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "DISTRO_CLIENT_HOST", help = "Base URL of the registration store (export-client).")]
    pub client_host: Option<String>,

    #[clap(long, env = "DISTRO_DATA_HOST", help = "Base URL of core-data.")]
    pub data_host: Option<String>,

    #[clap(long, env = "DISTRO_MARK_PUSHED", help = "Mark delivered events as pushed in core-data (true/false).")]
    pub mark_pushed: Option<bool>,

    #[clap(long, env = "DISTRO_REGISTRATION_POLL_INTERVAL_MS", help = "Delay between registration store attempts at startup.")]
    pub registration_poll_interval_ms: Option<u64>,

    #[clap(long, env = "DISTRO_CLIENT_MAX_RETRIES", help = "Transient-error retries of the store clients.")]
    pub client_max_retries: Option<u32>,

    #[clap(long, env = "DISTRO_ACTOR_QUEUE_DEPTH", help = "Capacity of each export's event queue.")]
    pub actor_queue_depth: Option<usize>,

    #[clap(long, env = "DISTRO_UPDATE_QUEUE_DEPTH", help = "Capacity of the registration update queue.")]
    pub update_queue_depth: Option<usize>,

    #[clap(long, env = "DISTRO_EVENT_QUEUE_DEPTH", help = "Capacity of the inbound event queue.")]
    pub event_queue_depth: Option<usize>,

    #[clap(long, env = "DISTRO_SEND_TIMEOUT_MS", help = "Timeout of a single delivery or connect.")]
    pub send_timeout_ms: Option<u64>,

    #[clap(long, env = "DISTRO_MQTTS_CERT", help = "Client certificate for MQTT over TLS.")]
    pub mqtts_cert_file: Option<PathBuf>,

    #[clap(long, env = "DISTRO_MQTTS_KEY", help = "Client key for MQTT over TLS.")]
    pub mqtts_key_file: Option<PathBuf>,

    #[clap(long, env = "DISTRO_MQTTS_CA", help = "CA bundle for MQTT over TLS.")]
    pub mqtts_ca_file: Option<PathBuf>,

    #[clap(long, env = "DISTRO_AWS_CERT", help = "Client certificate for AWS IoT.")]
    pub aws_cert_file: Option<PathBuf>,

    #[clap(long, env = "DISTRO_AWS_KEY", help = "Client key for AWS IoT.")]
    pub aws_key_file: Option<PathBuf>,

    #[clap(long, env = "DISTRO_AWS_CA", help = "CA bundle for AWS IoT.")]
    pub aws_ca_file: Option<PathBuf>,

    #[clap(long, env = "DISTRO_BUS_HOST", help = "Message bus host events are read from.")]
    pub bus_host: Option<String>,

    #[clap(long, env = "DISTRO_BUS_PORT", help = "Message bus MQTT port.")]
    pub bus_port: Option<u16>,

    #[clap(long, env = "DISTRO_BUS_TOPIC", help = "Message bus topic carrying events.")]
    pub bus_topic: Option<String>,

    #[clap(long, env = "DISTRO_BUS_CLIENT_ID", help = "MQTT client id on the message bus.")]
    pub bus_client_id: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            client_host: other.client_host.or(self.client_host),
            data_host: other.data_host.or(self.data_host),
            mark_pushed: other.mark_pushed.or(self.mark_pushed),
            registration_poll_interval_ms: other.registration_poll_interval_ms.or(self.registration_poll_interval_ms),
            client_max_retries: other.client_max_retries.or(self.client_max_retries),
            actor_queue_depth: other.actor_queue_depth.or(self.actor_queue_depth),
            update_queue_depth: other.update_queue_depth.or(self.update_queue_depth),
            event_queue_depth: other.event_queue_depth.or(self.event_queue_depth),
            send_timeout_ms: other.send_timeout_ms.or(self.send_timeout_ms),
            mqtts_cert_file: other.mqtts_cert_file.or(self.mqtts_cert_file),
            mqtts_key_file: other.mqtts_key_file.or(self.mqtts_key_file),
            mqtts_ca_file: other.mqtts_ca_file.or(self.mqtts_ca_file),
            aws_cert_file: other.aws_cert_file.or(self.aws_cert_file),
            aws_key_file: other.aws_key_file.or(self.aws_key_file),
            aws_ca_file: other.aws_ca_file.or(self.aws_ca_file),
            bus_host: other.bus_host.or(self.bus_host),
            bus_port: other.bus_port.or(self.bus_port),
            bus_topic: other.bus_topic.or(self.bus_topic),
            bus_client_id: other.bus_client_id.or(self.bus_client_id),
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// The engine settings: library defaults overridden by every value set here.
    pub fn to_settings(&self) -> DistroSettings {
        let mut s = DistroSettings::default();
        if let Some(v) = self.port {
            s.port = v;
        }
        if let Some(v) = &self.client_host {
            s.client_host = v.clone();
        }
        if let Some(v) = &self.data_host {
            s.data_host = v.clone();
        }
        if let Some(v) = self.mark_pushed {
            s.mark_pushed = v;
        }
        if let Some(v) = self.registration_poll_interval_ms {
            s.registration_poll_interval_ms = v;
        }
        if let Some(v) = self.client_max_retries {
            s.client_max_retries = v;
        }
        if let Some(v) = self.actor_queue_depth {
            s.actor_queue_depth = v;
        }
        if let Some(v) = self.update_queue_depth {
            s.update_queue_depth = v;
        }
        if let Some(v) = self.event_queue_depth {
            s.event_queue_depth = v;
        }
        if let Some(v) = self.send_timeout_ms {
            s.send_timeout_ms = v;
        }
        s.mqtts = TlsFiles {
            cert_file: self.mqtts_cert_file.clone(),
            key_file: self.mqtts_key_file.clone(),
            ca_file: self.mqtts_ca_file.clone(),
        };
        s.aws = TlsFiles {
            cert_file: self.aws_cert_file.clone(),
            key_file: self.aws_key_file.clone(),
            ca_file: self.aws_ca_file.clone(),
        };
        if let Some(v) = &self.bus_host {
            s.message_bus.host = v.clone();
        }
        if let Some(v) = self.bus_port {
            s.message_bus.port = v;
        }
        if let Some(v) = &self.bus_topic {
            s.message_bus.topic = v.clone();
        }
        if let Some(v) = &self.bus_client_id {
            s.message_bus.client_id = v.clone();
        }
        s
    }
}

fn defaults() -> Config {
    let settings = DistroSettings::default();
    Config {
        port: Some(settings.port),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        client_host: Some(settings.client_host),
        data_host: Some(settings.data_host),
        mark_pushed: Some(settings.mark_pushed),
        ..Default::default()
    }
}

/// Reads a JSON config file. A missing or unreadable file is logged and
/// ignored.
fn read_config_file(path: &Path) -> Option<Config> {
    if !path.exists() {
        log::info!("Config file not found at {}. Using defaults and environment/CLI variables.", path.display());
        return None;
    }
    let config_str = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("Failed to read config file {}: {}. Falling back to other sources.", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<Config>(&config_str) {
        Ok(file_config) => Some(file_config),
        Err(e) => {
            log::warn!("Failed to parse config file {}: {}. Falling back to other sources.", path.display(), e);
            None
        }
    }
}

/// Layers defaults, the config file and `cli` (which already carries env
/// vars) in increasing precedence.
pub fn resolve(cli: Config) -> Config {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = defaults();
    if let Some(file_config) = read_config_file(&config_file_path) {
        current_config = current_config.merge(file_config);
    }
    current_config = current_config.merge(cli);

    // Fall back to ~/.export_distro for TLS material that is not configured.
    if let Some(home_dir) = dirs::home_dir() {
        let cert_dir = home_dir.join(".export_distro");
        if current_config.mqtts_ca_file.is_none() && cert_dir.join("mqtts-ca.pem").exists() {
            current_config.mqtts_ca_file = Some(cert_dir.join("mqtts-ca.pem"));
        }
        if current_config.aws_ca_file.is_none() && cert_dir.join("aws-ca.pem").exists() {
            current_config.aws_ca_file = Some(cert_dir.join("aws-ca.pem"));
        }
    }

    current_config
}

pub fn load_config() -> Config {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();
    resolve(Config::parse())
}
