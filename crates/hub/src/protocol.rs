//! JSON hub wire format.
//!
//! Every frame is one JSON document followed by [`RECORD_SEPARATOR`]. A
//! connection opens with a handshake request from the client and a handshake
//! response (`{}` or `{"error": ".."}`) from the hub, after which both sides
//! exchange messages distinguished by their numeric `type` field.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Frame terminator.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Upper bound on a single frame, separator included.
pub const MAX_FRAME_LEN: usize = 1 << 20;

const TYPE_INVOCATION: u64 = 1;
const TYPE_PING: u64 = 6;
const TYPE_CLOSE: u64 = 7;

/// Client handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeRequest {
	/// Always `"json"`.
	pub protocol: String,
	/// Protocol version, currently 1.
	pub version: u32,
	/// Channel (hub) the connection is for.
	pub hub: String,
}

impl HandshakeRequest {
	/// Handshake for `hub` with the current protocol and version.
	pub fn for_hub(hub: impl Into<String>) -> Self {
		Self {
			protocol: "json".into(),
			version: 1,
			hub: hub.into(),
		}
	}
}

/// Hub handshake reply. An `error` means the connection was refused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
	/// Refusal reason.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// A post-handshake hub message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
	/// Call `target` with positional `arguments`.
	Invocation {
		/// Method or event name.
		target: String,
		/// Positional arguments.
		arguments: Vec<Value>,
	},
	/// Keep-alive.
	Ping,
	/// The sender is closing the connection.
	Close {
		/// Reason, if any.
		error: Option<String>,
	},
	/// A message type this client does not handle.
	Other(u64),
}

impl HubMessage {
	/// Decodes a message from a JSON document.
	pub fn from_json(value: Value) -> Result<Self> {
		let kind = value
			.get("type")
			.and_then(Value::as_u64)
			.ok_or_else(|| Error::Protocol("message without numeric type".into()))?;
		match kind {
			TYPE_INVOCATION => {
				let target = value
					.get("target")
					.and_then(Value::as_str)
					.ok_or_else(|| Error::Protocol("invocation without target".into()))?
					.to_string();
				let arguments = match value.get("arguments") {
					None | Some(Value::Null) => Vec::new(),
					Some(Value::Array(args)) => args.clone(),
					Some(_) => return Err(Error::Protocol(format!("invocation {target} arguments are not an array"))),
				};
				Ok(Self::Invocation { target, arguments })
			}
			TYPE_PING => Ok(Self::Ping),
			TYPE_CLOSE => Ok(Self::Close {
				error: value.get("error").and_then(Value::as_str).map(str::to_string),
			}),
			other => Ok(Self::Other(other)),
		}
	}

	/// Encodes the message as a JSON document.
	pub fn to_json(&self) -> Value {
		match self {
			Self::Invocation { target, arguments } => json!({ "type": TYPE_INVOCATION, "target": target, "arguments": arguments }),
			Self::Ping => json!({ "type": TYPE_PING }),
			Self::Close { error: Some(error) } => json!({ "type": TYPE_CLOSE, "error": error }),
			Self::Close { error: None } => json!({ "type": TYPE_CLOSE }),
			Self::Other(kind) => json!({ "type": kind }),
		}
	}
}

/// Reads one frame. Returns `None` on a clean end of stream.
///
/// # Errors
///
/// Fails if the stream ends mid-frame or the frame exceeds [`MAX_FRAME_LEN`].
/// A complete frame whose payload is not JSON yields [`Error::Decode`]; the
/// frame has been consumed, so the next read starts at the following frame.
pub async fn read_frame(input: &mut (impl AsyncBufRead + Unpin)) -> Result<Option<Value>> {
	let mut buf = Vec::new();
	loop {
		let available = input.fill_buf().await?;
		if available.is_empty() {
			if buf.is_empty() {
				return Ok(None);
			}
			return Err(Error::Protocol("stream ended inside a frame".into()));
		}
		let (consumed, done) = match find_separator(available) {
			Some(pos) => {
				buf.extend_from_slice(&available[..pos]);
				(pos + 1, true)
			}
			None => {
				buf.extend_from_slice(available);
				(available.len(), false)
			}
		};
		input.consume(consumed);
		if buf.len() >= MAX_FRAME_LEN {
			return Err(Error::Protocol(format!("frame exceeds {MAX_FRAME_LEN} bytes")));
		}
		if done {
			return serde_json::from_slice(&buf)
				.map(Some)
				.map_err(|err| Error::Decode(err.to_string()));
		}
	}
}

fn find_separator(bytes: &[u8]) -> Option<usize> {
	bytes.iter().position(|b| *b == RECORD_SEPARATOR)
}

/// Writes one frame and flushes.
pub async fn write_frame(output: &mut (impl AsyncWrite + Unpin), value: &impl Serialize) -> Result<()> {
	let mut bytes = serde_json::to_vec(value)?;
	bytes.push(RECORD_SEPARATOR);
	output.write_all(&bytes).await?;
	output.flush().await?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;
	use tokio::io::BufReader;

	use super::*;

	#[tokio::test]
	async fn frames_split_on_separator() {
		let wire = b"{\"type\":6}\x1e{\"type\":1,\"target\":\"ReceiveNewFailure\",\"arguments\":[{\"id\":7}]}\x1e";
		let mut reader = BufReader::with_capacity(4, &wire[..]);

		let first = HubMessage::from_json(read_frame(&mut reader).await.unwrap().unwrap()).unwrap();
		let second = HubMessage::from_json(read_frame(&mut reader).await.unwrap().unwrap()).unwrap();

		assert_eq!(first, HubMessage::Ping);
		assert_eq!(
			second,
			HubMessage::Invocation {
				target: "ReceiveNewFailure".into(),
				arguments: vec![json!({ "id": 7 })],
			}
		);
		assert!(read_frame(&mut reader).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn truncated_frame_is_an_error() {
		let mut reader = BufReader::new(&b"{\"type\":6}"[..]);
		assert!(matches!(read_frame(&mut reader).await, Err(Error::Protocol(_))));
	}

	#[tokio::test]
	async fn undecodable_frame_is_skipped_cleanly() {
		let mut reader = BufReader::new(&b"{not json\x1e{\"type\":6}\x1e"[..]);

		assert!(matches!(read_frame(&mut reader).await, Err(Error::Decode(_))));
		let next = read_frame(&mut reader).await.unwrap().unwrap();
		assert_eq!(HubMessage::from_json(next).unwrap(), HubMessage::Ping);
	}

	#[tokio::test]
	async fn written_frames_read_back() {
		let mut wire = Vec::new();
		write_frame(&mut wire, &HandshakeRequest::for_hub("equipmentHub")).await.unwrap();
		assert_eq!(wire.last(), Some(&RECORD_SEPARATOR));

		let mut reader = BufReader::new(&wire[..]);
		let value = read_frame(&mut reader).await.unwrap().unwrap();
		assert_eq!(value, json!({ "protocol": "json", "version": 1, "hub": "equipmentHub" }));
	}

	#[test]
	fn close_carries_reason() {
		let msg = HubMessage::from_json(json!({ "type": 7, "error": "server shutting down" })).unwrap();
		assert_eq!(
			msg,
			HubMessage::Close {
				error: Some("server shutting down".into())
			}
		);
		assert_eq!(HubMessage::from_json(msg.to_json()).unwrap(), msg);
	}

	#[test]
	fn invocation_without_arguments_is_empty() {
		let msg = HubMessage::from_json(json!({ "type": 1, "target": "Ping" })).unwrap();
		assert_eq!(
			msg,
			HubMessage::Invocation {
				target: "Ping".into(),
				arguments: vec![],
			}
		);
	}

	#[test]
	fn malformed_messages_are_rejected() {
		assert!(HubMessage::from_json(json!({ "target": "x" })).is_err());
		assert!(HubMessage::from_json(json!({ "type": 1 })).is_err());
		assert!(HubMessage::from_json(json!({ "type": 1, "target": "x", "arguments": 5 })).is_err());
		assert_eq!(HubMessage::from_json(json!({ "type": 3 })).unwrap(), HubMessage::Other(3));
	}
}
