use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::io::{AsyncWriteExt, DuplexStream, duplex};

use super::*;

/// Hands the client side of an in-memory pipe to the transport and the
/// server side to the test.
struct DuplexConnector {
	server_tx: mpsc::UnboundedSender<(String, DuplexStream)>,
}

#[async_trait]
impl Connector for DuplexConnector {
	type Stream = DuplexStream;

	async fn connect(&self, channel: &str) -> std::io::Result<DuplexStream> {
		let (client, server) = duplex(4096);
		let _ = self.server_tx.send((channel.to_string(), server));
		Ok(client)
	}
}

struct FakeHub {
	reader: BufReader<ReadHalf<DuplexStream>>,
	writer: WriteHalf<DuplexStream>,
}

impl FakeHub {
	async fn accept(rx: &mut mpsc::UnboundedReceiver<(String, DuplexStream)>, reply: HandshakeResponse) -> (String, Self) {
		let (channel, stream) = rx.recv().await.unwrap();
		let (read, writer) = tokio::io::split(stream);
		let mut hub = Self {
			reader: BufReader::new(read),
			writer,
		};
		let hello: HandshakeRequest = serde_json::from_value(hub.next().await.unwrap()).unwrap();
		assert_eq!(hello, HandshakeRequest::for_hub(channel.clone()));
		write_frame(&mut hub.writer, &reply).await.unwrap();
		(channel, hub)
	}

	async fn next(&mut self) -> Option<Value> {
		read_frame(&mut self.reader).await.unwrap()
	}

	async fn send(&mut self, msg: HubMessage) {
		write_frame(&mut self.writer, &msg.to_json()).await.unwrap();
	}
}

fn transport() -> (Arc<StreamTransport<DuplexConnector>>, mpsc::UnboundedReceiver<(String, DuplexStream)>) {
	let (server_tx, server_rx) = mpsc::unbounded_channel();
	let options = StreamOptions {
		handshake_timeout: Duration::from_secs(5),
		keepalive: None,
	};
	(StreamTransport::new(DuplexConnector { server_tx }, options), server_rx)
}

#[tokio::test(flavor = "current_thread")]
async fn invocations_flow_both_ways() {
	let (transport, mut servers) = transport();
	let mut events = transport.events().unwrap();

	let connection = ConnectionId(1);
	let start = transport.start(connection, "equipmentHub");
	let accept = FakeHub::accept(&mut servers, HandshakeResponse::default());
	let (started, (channel, mut hub)) = tokio::join!(start, accept);
	started.unwrap();
	assert_eq!(channel, "equipmentHub");

	hub.send(HubMessage::Invocation {
		target: "ReceiveNewFailure".into(),
		arguments: vec![json!({ "id": 7 })],
	})
	.await;
	assert_eq!(
		events.recv().await.unwrap(),
		TransportEvent::Message {
			connection,
			event: WireEvent::new("ReceiveNewFailure", vec![json!({ "id": 7 })]),
		}
	);

	transport
		.invoke(connection, "RegisterConnection", vec![json!(3), json!("Manager")])
		.await
		.unwrap();
	let sent = HubMessage::from_json(hub.next().await.unwrap()).unwrap();
	assert_eq!(
		sent,
		HubMessage::Invocation {
			target: "RegisterConnection".into(),
			arguments: vec![json!(3), json!("Manager")],
		}
	);
}

#[tokio::test(flavor = "current_thread")]
async fn refused_handshake_fails_start() {
	let (transport, mut servers) = transport();

	let start = transport.start(ConnectionId(1), "unknownHub");
	let accept = FakeHub::accept(
		&mut servers,
		HandshakeResponse {
			error: Some("no such hub".into()),
		},
	);
	let (result, _) = tokio::join!(start, accept);

	assert_eq!(result.unwrap_err(), Error::Handshake("no such hub".into()));
}

#[tokio::test(flavor = "current_thread")]
async fn stop_sends_close_and_ends_stream() {
	let (transport, mut servers) = transport();
	let _events = transport.events().unwrap();
	let connection = ConnectionId(1);
	let (started, (_, mut hub)) = tokio::join!(
		transport.start(connection, "equipmentHub"),
		FakeHub::accept(&mut servers, HandshakeResponse::default())
	);
	started.unwrap();

	transport.stop(connection).await.unwrap();

	let close = HubMessage::from_json(hub.next().await.unwrap()).unwrap();
	assert_eq!(close, HubMessage::Close { error: None });
	assert_eq!(
		transport.invoke(connection, "X", vec![]).await.unwrap_err(),
		Error::ConnectionClosed(connection)
	);
}

#[tokio::test(flavor = "current_thread")]
async fn remote_close_is_reported() {
	let (transport, mut servers) = transport();
	let mut events = transport.events().unwrap();
	let connection = ConnectionId(1);
	let (started, (_, mut hub)) = tokio::join!(
		transport.start(connection, "equipmentHub"),
		FakeHub::accept(&mut servers, HandshakeResponse::default())
	);
	started.unwrap();

	hub.send(HubMessage::Close {
		error: Some("maintenance".into()),
	})
	.await;

	assert_eq!(
		events.recv().await.unwrap(),
		TransportEvent::Closed {
			connection,
			error: Some("maintenance".into()),
		}
	);
}

#[tokio::test(flavor = "current_thread")]
async fn malformed_message_does_not_close_connection() {
	let (transport, mut servers) = transport();
	let mut events = transport.events().unwrap();
	let connection = ConnectionId(1);
	let (started, (_, mut hub)) = tokio::join!(
		transport.start(connection, "equipmentHub"),
		FakeHub::accept(&mut servers, HandshakeResponse::default())
	);
	started.unwrap();

	hub.writer.write_all(b"{not json\x1e").await.unwrap();
	write_frame(&mut hub.writer, &json!({ "type": 1 })).await.unwrap();
	hub.send(HubMessage::Invocation {
		target: "ReceiveStatusUpdate".into(),
		arguments: vec![json!(1), json!("Resolved")],
	})
	.await;

	assert_eq!(
		events.recv().await.unwrap(),
		TransportEvent::Message {
			connection,
			event: WireEvent::new("ReceiveStatusUpdate", vec![json!(1), json!("Resolved")]),
		}
	);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn keepalive_pings_are_sent() {
	let (server_tx, mut servers) = mpsc::unbounded_channel();
	let transport = StreamTransport::new(
		DuplexConnector { server_tx },
		StreamOptions {
			handshake_timeout: Duration::from_secs(5),
			keepalive: Some(Duration::from_secs(15)),
		},
	);
	let (started, (_, mut hub)) = tokio::join!(
		transport.start(ConnectionId(1), "equipmentHub"),
		FakeHub::accept(&mut servers, HandshakeResponse::default())
	);
	started.unwrap();

	let ping = HubMessage::from_json(hub.next().await.unwrap()).unwrap();
	assert_eq!(ping, HubMessage::Ping);
}
