//! Hub transport over a byte stream.
//!
//! Each connection is one stream opened by a [`Connector`], handshaken with
//! [`HandshakeRequest`], then split into a reader task that forwards inbound
//! invocations as [`TransportEvent`]s and a writer task that serializes
//! outbound messages and keep-alive pings.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::protocol::{HandshakeRequest, HandshakeResponse, HubMessage, read_frame, write_frame};
use crate::transport::{HubTransport, TransportEvent, WireEvent};
use crate::{ConnectionId, Error, Result};

/// Capacity of each connection's outbound queue.
pub const OUTBOUND_QUEUE_LEN: usize = 64;

/// Opens the byte stream backing one channel connection.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
	/// Stream type produced.
	type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

	/// Opens a stream for `channel`.
	async fn connect(&self, channel: &str) -> std::io::Result<Self::Stream>;
}

/// Connects every channel to one TCP address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
	address: String,
}

impl TcpConnector {
	/// Connector for `address` (`host:port`).
	pub fn new(address: impl Into<String>) -> Self {
		Self { address: address.into() }
	}
}

#[async_trait]
impl Connector for TcpConnector {
	type Stream = TcpStream;

	async fn connect(&self, _channel: &str) -> std::io::Result<TcpStream> {
		let stream = TcpStream::connect(&self.address).await?;
		stream.set_nodelay(true)?;
		Ok(stream)
	}
}

/// Timing options for [`StreamTransport`].
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
	/// Limit on connect plus handshake.
	pub handshake_timeout: Duration,
	/// Interval between client pings. `None` disables them.
	pub keepalive: Option<Duration>,
}

impl Default for StreamOptions {
	fn default() -> Self {
		Self {
			handshake_timeout: Duration::from_secs(10),
			keepalive: Some(Duration::from_secs(15)),
		}
	}
}

struct Outbound {
	tx: mpsc::Sender<HubMessage>,
	cancel: CancellationToken,
}

/// [`HubTransport`] speaking the JSON hub protocol over [`Connector`] streams.
pub struct StreamTransport<C: Connector> {
	connector: C,
	options: StreamOptions,
	events_tx: mpsc::UnboundedSender<TransportEvent>,
	events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
	connections: Arc<Mutex<HashMap<ConnectionId, Outbound>>>,
}

impl<C: Connector> StreamTransport<C> {
	/// Creates a transport opening streams through `connector`.
	pub fn new(connector: C, options: StreamOptions) -> Arc<Self> {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		Arc::new(Self {
			connector,
			options,
			events_tx,
			events_rx: Mutex::new(Some(events_rx)),
			connections: Arc::new(Mutex::new(HashMap::new())),
		})
	}

	async fn handshake(&self, channel: &str) -> Result<(BufReader<ReadHalf<C::Stream>>, WriteHalf<C::Stream>)> {
		let stream = self.connector.connect(channel).await.map_err(|err| Error::Connect {
			channel: channel.to_string(),
			reason: err.to_string(),
		})?;
		let (read, mut write) = tokio::io::split(stream);
		let mut reader = BufReader::new(read);

		write_frame(&mut write, &HandshakeRequest::for_hub(channel)).await?;
		let reply = read_frame(&mut reader)
			.await?
			.ok_or_else(|| Error::Handshake("connection closed during handshake".into()))?;
		let reply: HandshakeResponse = serde_json::from_value(reply)?;
		if let Some(error) = reply.error {
			return Err(Error::Handshake(error));
		}
		Ok((reader, write))
	}
}

#[async_trait]
impl<C: Connector> HubTransport for StreamTransport<C> {
	fn events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
		self.events_rx.lock().take().ok_or(Error::EventsTaken)
	}

	async fn start(&self, id: ConnectionId, channel: &str) -> Result<()> {
		let (reader, writer) = tokio::time::timeout(self.options.handshake_timeout, self.handshake(channel))
			.await
			.map_err(|_| Error::Timeout(format!("handshake for channel {channel}")))??;

		let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_LEN);
		let cancel = CancellationToken::new();
		self.connections.lock().insert(id, Outbound { tx, cancel: cancel.clone() });

		kettle_worker::spawn(kettle_worker::TaskClass::Io, write_loop(id, writer, rx, cancel.clone(), self.options.keepalive));
		kettle_worker::spawn(
			kettle_worker::TaskClass::Io,
			read_loop(id, reader, self.events_tx.clone(), self.connections.clone(), cancel),
		);
		debug!(target: "kettle::hub", channel, connection = %id, "Stream connection established");
		Ok(())
	}

	async fn invoke(&self, connection: ConnectionId, method: &str, arguments: Vec<Value>) -> Result<()> {
		let tx = self
			.connections
			.lock()
			.get(&connection)
			.map(|outbound| outbound.tx.clone())
			.ok_or(Error::ConnectionClosed(connection))?;
		tx.send(HubMessage::Invocation {
			target: method.to_string(),
			arguments,
		})
		.await
		.map_err(|_| Error::ConnectionClosed(connection))
	}

	async fn stop(&self, connection: ConnectionId) -> Result<()> {
		if let Some(outbound) = self.connections.lock().remove(&connection) {
			outbound.cancel.cancel();
		}
		Ok(())
	}
}

async fn write_loop<W>(id: ConnectionId, mut writer: W, mut rx: mpsc::Receiver<HubMessage>, cancel: CancellationToken, keepalive: Option<Duration>)
where
	W: AsyncWrite + Unpin + Send,
{
	let period = keepalive.unwrap_or(Duration::from_secs(3600));
	let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
	ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	loop {
		let msg = tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				let _ = write_frame(&mut writer, &HubMessage::Close { error: None }.to_json()).await;
				break;
			}
			msg = rx.recv() => match msg {
				Some(msg) => msg,
				None => break,
			},
			_ = ping.tick(), if keepalive.is_some() => HubMessage::Ping,
		};
		if let Err(err) = write_frame(&mut writer, &msg.to_json()).await {
			warn!(target: "kettle::hub", connection = %id, error = %err, "Hub write failed");
			break;
		}
	}
	trace!(target: "kettle::hub", connection = %id, "Writer stopped");
}

async fn read_loop<R>(
	id: ConnectionId,
	mut reader: R,
	events: mpsc::UnboundedSender<TransportEvent>,
	connections: Arc<Mutex<HashMap<ConnectionId, Outbound>>>,
	cancel: CancellationToken,
) where
	R: tokio::io::AsyncBufRead + Unpin + Send,
{
	let close_reason = loop {
		let frame = tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				trace!(target: "kettle::hub", connection = %id, "Reader stopped locally");
				return;
			}
			frame = read_frame(&mut reader) => frame,
		};
		let value = match frame {
			Ok(Some(value)) => value,
			Ok(None) => break None,
			Err(Error::Decode(reason)) => {
				warn!(target: "kettle::hub", connection = %id, error = %reason, "Dropping undecodable hub frame");
				continue;
			}
			Err(err) => break Some(err.to_string()),
		};
		match HubMessage::from_json(value) {
			Ok(HubMessage::Invocation { target, arguments }) => {
				let _ = events.send(TransportEvent::Message {
					connection: id,
					event: WireEvent::new(target, arguments),
				});
			}
			Ok(HubMessage::Ping) => trace!(target: "kettle::hub", connection = %id, "Ping"),
			Ok(HubMessage::Close { error }) => break error,
			Ok(HubMessage::Other(kind)) => debug!(target: "kettle::hub", connection = %id, kind, "Ignoring hub message"),
			Err(err) => warn!(target: "kettle::hub", connection = %id, error = %err, "Dropping malformed hub message"),
		}
	};

	if let Some(outbound) = connections.lock().remove(&id) {
		outbound.cancel.cancel();
	}
	let _ = events.send(TransportEvent::Closed {
		connection: id,
		error: close_reason,
	});
}

#[cfg(test)]
mod tests;
