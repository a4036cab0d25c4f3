//! Configuration loader and validator for the helpdesk relay.
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub server: Server,
    #[serde(default)]
    pub desk: Desk,
    #[serde(default)]
    pub profiles: Vec<Profile>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_verify_delay")]
    pub verify_delay_seconds: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

fn default_verify_delay() -> u64 {
    10
}

fn default_shutdown_grace() -> u64 {
    15
}

impl App {
    /// Expand a leading `~/` in `data_dir`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_secs(self.verify_delay_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Server {
    pub bind: String,
}

/// Upstream helpdesk endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Desk {
    pub api_base: String,
    pub accounts_base: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Per-request timeout for helpdesk and token calls.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_user_agent() -> String {
    "desk-relay/0.1".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Desk {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for Desk {
    fn default() -> Self {
        Self {
            api_base: "https://desk.zoho.com/".to_string(),
            accounts_base: "https://accounts.zoho.com/".to_string(),
            user_agent: default_user_agent(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

/// A named credential bundle for one helpdesk organization and department.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub org_id: String,
    pub department_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default)]
    pub from_email_address: Option<String>,
    #[serde(default)]
    pub mail_reply_address_id: Option<String>,
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("name", &self.name)
            .field("org_id", &self.org_id)
            .field("department_id", &self.department_id)
            .field("from_email_address", &self.from_email_address)
            .field("mail_reply_address_id", &self.mail_reply_address_id)
            .finish_non_exhaustive()
    }
}

/// Read-only lookup over the configured profiles, keyed by display name.
#[derive(Debug, Clone, Default)]
pub struct ProfileStore {
    profiles: Vec<Profile>,
}

impl ProfileStore {
    pub fn new(profiles: Vec<Profile>) -> Self {
        Self { profiles }
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.iter()
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        let dir = self.app.resolved_data_dir();
        if dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(dir)
    }

    pub fn profile_store(&self) -> ProfileStore {
        ProfileStore::new(self.profiles.clone())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn require(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    Ok(())
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    require(&cfg.app.data_dir, "app.data_dir")?;
    require(&cfg.server.bind, "server.bind")?;
    require(&cfg.desk.api_base, "desk.api_base")?;
    require(&cfg.desk.accounts_base, "desk.accounts_base")?;
    if cfg.desk.request_timeout_seconds == 0 {
        return Err(ConfigError::Invalid(
            "desk.request_timeout_seconds must be greater than zero".into(),
        ));
    }

    let mut seen = HashSet::new();
    for (idx, p) in cfg.profiles.iter().enumerate() {
        require(&p.name, &format!("profiles[{idx}].name"))?;
        require(&p.org_id, &format!("profiles[{idx}].org_id"))?;
        require(&p.department_id, &format!("profiles[{idx}].department_id"))?;
        require(&p.client_id, &format!("profiles[{idx}].client_id"))?;
        require(&p.client_secret, &format!("profiles[{idx}].client_secret"))?;
        require(&p.refresh_token, &format!("profiles[{idx}].refresh_token"))?;
        if !seen.insert(p.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "profiles[{idx}].name '{}' is duplicated",
                p.name
            )));
        }
    }

    Ok(())
}

/// Returns a sample configuration file.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  # Wait before checking whether the automation email went out.
  verify_delay_seconds: 10
  shutdown_grace_seconds: 15

server:
  bind: "127.0.0.1:3000"

desk:
  api_base: "https://desk.zoho.com/"
  accounts_base: "https://accounts.zoho.com/"
  request_timeout_seconds: 30

profiles:
  - name: "Support"
    org_id: "60001234567"
    department_id: "1892000000006907"
    client_id: "1000.CLIENTID"
    client_secret: "CLIENT_SECRET"
    refresh_token: "1000.REFRESH_TOKEN"
    from_email_address: "support@example.com"
    mail_reply_address_id: "1892000000008001"
  - name: "Billing"
    org_id: "60001234567"
    department_id: "1892000000006999"
    client_id: "1000.CLIENTID"
    client_secret: "CLIENT_SECRET"
    refresh_token: "1000.OTHER_REFRESH_TOKEN"
"#
}
