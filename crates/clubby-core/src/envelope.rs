//! Wire envelope and its JSON codec.
//!
//! One envelope travels per text message:
//!
//! ```text
//! { "v": 1, "src": "<device-id>", "dst": "<address>", "key": "<psk>"?,
//!   "cmds": [ { "cmd": "<name>", "id": <int>, "args": <any>?, "timeout": <int>? } ]?,
//!   "resp": [ { "id": <int>, "status": <int>, "status_msg": "<string>", "resp": <any>? } ]? }
//! ```
//!
//! Unknown fields in inbound messages are ignored.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{DecodeError, EncodeError};

/// Identifier correlating one outgoing command with its response.
pub type CallId = u32;

/// Protocol version written into every outgoing envelope.
pub const PROTOCOL_VERSION: u32 = 1;

fn default_version() -> u32 {
    PROTOCOL_VERSION
}

/// One wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "v", default = "default_version")]
    pub version: u32,
    #[serde(rename = "src", default)]
    pub src: String,
    #[serde(rename = "dst", default)]
    pub dst: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(rename = "cmds", default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<Command>>,
    #[serde(rename = "resp", default, skip_serializing_if = "Option::is_none")]
    pub responses: Option<Vec<Response>>,
}

impl Envelope {
    /// Build an envelope carrying a single command.
    ///
    /// An empty `key` is left out of the frame.
    pub fn command(src: &str, dst: &str, key: &str, command: Command) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            src: src.to_string(),
            dst: dst.to_string(),
            key: (!key.is_empty()).then(|| key.to_string()),
            commands: Some(vec![command]),
            responses: None,
        }
    }

    /// Response entries, empty when the message carries none.
    pub fn responses(&self) -> &[Response] {
        self.responses.as_deref().unwrap_or(&[])
    }

    /// Command entries, empty when the message carries none.
    pub fn commands(&self) -> &[Command] {
        self.commands.as_deref().unwrap_or(&[])
    }
}

/// A single command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "cmd")]
    pub name: String,
    pub id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(
        rename = "timeout",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_secs: Option<u32>,
}

impl Command {
    /// Build a command. Empty arguments and a zero timeout are omitted.
    pub fn new(name: &str, id: CallId, args: Value, timeout_secs: u32) -> Self {
        Self {
            name: name.to_string(),
            id,
            args: (!is_empty_value(&args)).then_some(args),
            timeout_secs: (timeout_secs != 0).then_some(timeout_secs),
        }
    }
}

/// A single response.
///
/// A missing `id` reads as 0, which is never handed out, so such an entry
/// matches no call and its siblings are still routed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: CallId,
    #[serde(default)]
    pub status: i32,
    #[serde(rename = "status_msg", default)]
    pub status_message: String,
    #[serde(rename = "resp", default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

/// Null, empty strings and empty containers are not written as arguments.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Serialize an envelope to its wire text.
pub fn encode(envelope: &Envelope) -> Result<String, EncodeError> {
    serde_json::to_string(envelope).map_err(EncodeError::Json)
}

/// Parse wire text into an envelope.
pub fn decode(text: &str) -> Result<Envelope, DecodeError> {
    serde_json::from_str(text).map_err(DecodeError::Envelope)
}

/// Turn any serializable argument into an opaque payload.
pub fn encode_args<A: Serialize + ?Sized>(args: &A) -> Result<Value, EncodeError> {
    serde_json::to_value(args).map_err(EncodeError::Json)
}

/// Decode an opaque response payload into the caller's expected shape.
///
/// An absent payload decodes as JSON `null`.
pub fn decode_payload<R: DeserializeOwned>(payload: Option<Value>) -> Result<R, DecodeError> {
    serde_json::from_value(payload.unwrap_or(Value::Null)).map_err(DecodeError::Payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_round_trip_keeps_absent_timeout() {
        let cmd = Command::new("ping", 3, json!({"a": 1}), 0);
        let text = encode(&Envelope::command("dev", "//backend", "", cmd.clone())).unwrap();

        assert!(!text.contains("timeout"));
        assert!(!text.contains("\"key\""));

        let decoded = decode(&text).unwrap();
        assert_eq!(decoded.commands(), &[cmd]);
        let back = &decoded.commands()[0];
        assert_eq!(back.name, "ping");
        assert_eq!(back.id, 3);
        assert_eq!(back.args, Some(json!({"a": 1})));
        assert_eq!(back.timeout_secs, None);
    }

    #[test]
    fn outgoing_frame_matches_wire_shape() {
        let cmd = Command::new("/v1/Hello", 1, json!(null), 5);
        let text = encode(&Envelope::command("//dev/1", "//api", "psk", cmd)).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "v": 1,
                "src": "//dev/1",
                "dst": "//api",
                "key": "psk",
                "cmds": [{"cmd": "/v1/Hello", "id": 1, "timeout": 5}]
            })
        );
    }

    #[test]
    fn empty_args_are_omitted() {
        assert_eq!(Command::new("x", 1, json!({}), 0).args, None);
        assert_eq!(Command::new("x", 1, json!([]), 0).args, None);
        assert_eq!(Command::new("x", 1, json!(""), 0).args, None);
        assert_eq!(Command::new("x", 1, json!(0), 0).args, Some(json!(0)));
    }

    #[test]
    fn minimal_response_message_decodes_with_defaults() {
        let env = decode(r#"{"resp":[{"id":1,"status":0,"resp":"pong"}]}"#).unwrap();
        assert_eq!(env.version, 1);
        assert_eq!(env.src, "");
        assert!(env.commands().is_empty());
        let resp = &env.responses()[0];
        assert!(resp.is_success());
        assert_eq!(resp.status_message, "");
        assert_eq!(resp.payload, Some(json!("pong")));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let env = decode(
            r#"{"v":2,"src":"//api","dst":"//dev","extra":true,
                "resp":[{"id":9,"status":7,"status_msg":"bad","trace":"x"}]}"#,
        )
        .unwrap();
        assert_eq!(env.version, 2);
        assert_eq!(env.responses()[0].status, 7);
        assert_eq!(env.responses()[0].status_message, "bad");
    }

    #[test]
    fn malformed_text_is_an_envelope_error() {
        assert!(matches!(decode("{not json"), Err(DecodeError::Envelope(_))));
        assert!(matches!(
            decode(r#"{"resp":[{"id":"one","status":0}]}"#),
            Err(DecodeError::Envelope(_))
        ));
    }

    #[test]
    fn response_without_id_reads_as_zero() {
        let env = decode(r#"{"resp":[{"status":0},{"id":4,"status":0,"resp":"pong"}]}"#).unwrap();
        let ids: Vec<CallId> = env.responses().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 4]);
    }

    #[test]
    fn payload_shape_mismatch_is_a_payload_error() {
        let ok: String = decode_payload(Some(json!("pong"))).unwrap();
        assert_eq!(ok, "pong");

        let _: () = decode_payload(None).unwrap();

        let err = decode_payload::<u32>(Some(json!("pong"))).unwrap_err();
        assert!(matches!(err, DecodeError::Payload(_)));
    }
}
