//! Kettle command line client.
//!
//! Loads the equipment failure log, follows the hub for new failures and status
//! changes, and prints the collection whenever it changes. `--demo` runs against
//! an in-process hub that invents events.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use kettle_hub::{ChannelManager, HubTransport, LoopbackTransport, StreamTransport, TcpConnector};
use kettle_sync::{EquipmentLog, HttpSnapshotSource, LiveCollection, SessionConfig, SnapshotSource, Subscription, SyncConfig};
use tracing::info;

mod demo;
mod render;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "kettle")]
#[command(about = "Follow a live equipment failure log")]
struct Args {
	/// Configuration file
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Override the API base URL
	#[arg(long, value_name = "URL")]
	api_url: Option<String>,

	/// Override the hub address
	#[arg(long, value_name = "HOST:PORT")]
	hub: Option<String>,

	/// Announce this user identity on the hub
	#[arg(long, requires = "role")]
	identity: Option<i64>,

	/// Role announced with --identity
	#[arg(long, requires = "identity")]
	role: Option<String>,

	/// Use an in-process hub with generated events
	#[arg(long)]
	demo: bool,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

impl Args {
	fn load_config(&self) -> anyhow::Result<SyncConfig> {
		let mut config = match &self.config {
			Some(path) => SyncConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
			None => SyncConfig::default(),
		};
		self.apply_overrides(&mut config);
		Ok(config)
	}

	fn apply_overrides(&self, config: &mut SyncConfig) {
		if let Some(url) = &self.api_url {
			config.api.base_url = url.clone();
		}
		if let Some(address) = &self.hub {
			config.hub.address = address.clone();
		}
		if let (Some(identity), Some(role)) = (self.identity, &self.role) {
			config.session = Some(SessionConfig {
				identity,
				role: role.clone(),
			});
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_max_level(if args.verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.with_writer(std::io::stderr)
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;

	let config = args.load_config()?;
	let subscription = Subscription::from_config(&config);

	let (transport, source, emitter): (Arc<dyn HubTransport>, Arc<dyn SnapshotSource>, _) = if args.demo {
		info!(channel = %subscription.channel, "Starting in demo mode");
		let loopback = LoopbackTransport::new();
		let emitter = demo::spawn_emitter(loopback.clone(), subscription.clone());
		(loopback, Arc::new(demo::DemoSource), Some(emitter))
	} else {
		let url = config.api.snapshot_url();
		info!(%url, hub = %config.hub.address, channel = %subscription.channel, "Starting");
		let mut source = HttpSnapshotSource::new(url, config.api.timeout())?;
		if let Some(token) = &config.api.token {
			source = source.with_bearer_token(token.clone());
		}
		let transport = StreamTransport::new(TcpConnector::new(config.hub.address.clone()), config.hub.stream_options());
		(transport, Arc::new(source), None)
	};

	let channels = ChannelManager::new(transport, config.hub.manager_options())?;
	let live = LiveCollection::<EquipmentLog>::new(channels.clone(), source, subscription);
	let mut view = live.subscribe();
	let activation = live.activate();

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => break,
			changed = view.changed() => {
				if changed.is_err() {
					break;
				}
				render::print_view(&view.borrow_and_update());
			}
		}
	}

	info!("Shutting down");
	live.deactivate().await;
	activation.abort();
	if let Some(emitter) = emitter {
		emitter.abort();
	}
	channels.shutdown().await;
	Ok(())
}
