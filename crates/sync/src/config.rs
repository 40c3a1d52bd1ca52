//! File configuration for a synchronizer process.
//!
//! ```toml
//! [api]
//! base_url = "http://localhost:5000/api"
//! snapshot_path = "EquipmentConditionLog"
//!
//! [hub]
//! address = "127.0.0.1:5001"
//! channel = "equipmentHub"
//!
//! [session]
//! identity = 3
//! role = "Manager"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use kettle_hub::stream::StreamOptions;
use kettle_hub::{Listener, ManagerOptions};
use serde::{Deserialize, Serialize};

/// Failure loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	/// The file could not be read.
	#[error("failed to read {path}: {source}")]
	Read {
		/// File that was read.
		path: PathBuf,
		/// Underlying error.
		source: std::io::Error,
	},
	/// The file is not valid configuration.
	#[error("invalid configuration: {0}")]
	Parse(#[from] toml::de::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
	/// REST snapshot endpoint.
	#[serde(default)]
	pub api: ApiConfig,
	/// Push channel.
	#[serde(default)]
	pub hub: HubConfig,
	/// Identity announced on the channel. Omit to stay anonymous.
	#[serde(default)]
	pub session: Option<SessionConfig>,
}

impl SyncConfig {
	/// Parses configuration from TOML text.
	pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
		Ok(toml::from_str(text)?)
	}

	/// Reads and parses a configuration file.
	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml_str(&text)
	}

	/// Listener announced after connecting, if a session is configured.
	pub fn listener(&self) -> Option<Listener> {
		self.session
			.as_ref()
			.map(|session| Listener::new(session.identity, session.role.clone()))
	}
}

/// REST snapshot endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
	/// API root.
	#[serde(default = "default_base_url")]
	pub base_url: String,
	/// Collection path below [`Self::base_url`].
	#[serde(default = "default_snapshot_path")]
	pub snapshot_path: String,
	/// Request timeout in seconds.
	#[serde(default = "default_timeout")]
	pub timeout_secs: u64,
	/// Bearer token sent with snapshot reads.
	#[serde(default)]
	pub token: Option<String>,
}

fn default_base_url() -> String {
	"http://localhost:5000/api".into()
}

fn default_snapshot_path() -> String {
	"EquipmentConditionLog".into()
}

fn default_timeout() -> u64 {
	30
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			base_url: default_base_url(),
			snapshot_path: default_snapshot_path(),
			timeout_secs: default_timeout(),
			token: None,
		}
	}
}

impl ApiConfig {
	/// Full snapshot URL.
	pub fn snapshot_url(&self) -> String {
		format!(
			"{}/{}",
			self.base_url.trim_end_matches('/'),
			self.snapshot_path.trim_start_matches('/')
		)
	}

	/// Request timeout.
	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}
}

/// Push channel and event names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubConfig {
	/// Hub `host:port`.
	#[serde(default = "default_address")]
	pub address: String,
	/// Channel name.
	#[serde(default = "default_channel")]
	pub channel: String,
	/// Event carrying a newly created record.
	#[serde(default = "default_new_record_event")]
	pub new_record_event: String,
	/// Event carrying a partial update.
	#[serde(default = "default_update_event")]
	pub update_event: String,
	/// Hub method used to announce the session identity.
	#[serde(default = "default_register_method")]
	pub register_method: String,
	/// Connect plus handshake limit in seconds.
	#[serde(default = "default_handshake_timeout")]
	pub handshake_timeout_secs: u64,
	/// Ping interval in seconds; 0 disables pings.
	#[serde(default = "default_keepalive")]
	pub keepalive_secs: u64,
}

fn default_address() -> String {
	"127.0.0.1:5001".into()
}

fn default_channel() -> String {
	"equipmentHub".into()
}

fn default_new_record_event() -> String {
	"ReceiveNewFailure".into()
}

fn default_update_event() -> String {
	"ReceiveStatusUpdate".into()
}

fn default_register_method() -> String {
	kettle_hub::manager::DEFAULT_REGISTER_METHOD.into()
}

fn default_handshake_timeout() -> u64 {
	10
}

fn default_keepalive() -> u64 {
	15
}

impl Default for HubConfig {
	fn default() -> Self {
		Self {
			address: default_address(),
			channel: default_channel(),
			new_record_event: default_new_record_event(),
			update_event: default_update_event(),
			register_method: default_register_method(),
			handshake_timeout_secs: default_handshake_timeout(),
			keepalive_secs: default_keepalive(),
		}
	}
}

impl HubConfig {
	/// Channel manager options.
	pub fn manager_options(&self) -> ManagerOptions {
		ManagerOptions {
			register_method: self.register_method.clone(),
		}
	}

	/// Stream transport timing.
	pub fn stream_options(&self) -> StreamOptions {
		StreamOptions {
			handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
			keepalive: (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs)),
		}
	}
}

/// Session identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
	/// User identity.
	pub identity: i64,
	/// User role.
	pub role: String,
}
