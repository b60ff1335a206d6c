//! obs-websocket v5 message types.
//!
//! Every frame is an envelope `{"op": <opcode>, "d": {...}}`. Only the opcodes
//! needed for request/response control are modelled.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const RPC_VERSION: u32 = 1;

pub mod op {
    pub const HELLO: u8 = 0;
    pub const IDENTIFY: u8 = 1;
    pub const IDENTIFIED: u8 = 2;
    pub const EVENT: u8 = 5;
    pub const REQUEST: u8 = 6;
    pub const REQUEST_RESPONSE: u8 = 7;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub op: u8,
    pub d: Value,
}

impl Envelope {
    pub fn new<T: Serialize>(op: u8, data: &T) -> serde_json::Result<Self> {
        Ok(Self {
            op,
            d: serde_json::to_value(data)?,
        })
    }

    pub fn payload<T: for<'de> Deserialize<'de>>(self) -> serde_json::Result<T> {
        serde_json::from_value(self.d)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub obs_web_socket_version: String,
    pub rpc_version: u32,
    pub authentication: Option<AuthChallenge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthChallenge {
    pub challenge: String,
    pub salt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identify {
    pub rpc_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<String>,
    /// Bitmask of event categories; 0 = no events
    pub event_subscriptions: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identified {
    pub negotiated_rpc_version: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub request_type: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponse {
    pub request_type: String,
    pub request_id: String,
    pub request_status: RequestStatus,
    #[serde(default)]
    pub response_data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestStatus {
    pub result: bool,
    pub code: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionData {
    pub obs_version: String,
    pub obs_web_socket_version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStatusData {
    pub output_active: bool,
    #[serde(default)]
    pub output_paused: bool,
    #[serde(default)]
    pub output_timecode: Option<String>,
    #[serde(default)]
    pub output_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRecordData {
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordDirectoryData {
    pub record_directory: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneListData {
    #[serde(default)]
    pub current_program_scene_name: Option<String>,
    #[serde(default)]
    pub scenes: Vec<SceneData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneData {
    pub scene_name: String,
}

/// Challenge response: base64(sha256(base64(sha256(password + salt)) + challenge))
pub fn auth_response(password: &str, challenge: &AuthChallenge) -> String {
    let secret = BASE64.encode(Sha256::digest(format!("{}{}", password, challenge.salt).as_bytes()));
    BASE64.encode(Sha256::digest(format!("{}{}", secret, challenge.challenge).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_response_matches_protocol_example() {
        let challenge = AuthChallenge {
            challenge: "+IxH4CnCiqpX1rM9scsNynZzbOe4KhDeYcTNS3PDaeY=".to_string(),
            salt: "lM1GncleQOaCu9lT1yeUZhFYnqhsLLP1G5lAGo3ixaI=".to_string(),
        };
        assert_eq!(
            auth_response("supersecretpassword", &challenge),
            "1Ct943GAT+6YQUUX47Ia/ncufilbe6+oD6lY+5kaCu4="
        );
    }

    #[test]
    fn test_hello_without_authentication() {
        let envelope: Envelope = serde_json::from_value(json!({
            "op": 0,
            "d": { "obsWebSocketVersion": "5.1.0", "rpcVersion": 1 }
        }))
        .unwrap();

        assert_eq!(envelope.op, op::HELLO);
        let hello: Hello = envelope.payload().unwrap();
        assert!(hello.authentication.is_none());
    }

    #[test]
    fn test_identify_omits_missing_authentication() {
        let identify = Identify {
            rpc_version: RPC_VERSION,
            authentication: None,
            event_subscriptions: 0,
        };
        let value = serde_json::to_value(Envelope::new(op::IDENTIFY, &identify).unwrap()).unwrap();
        assert_eq!(value, json!({ "op": 1, "d": { "rpcVersion": 1, "eventSubscriptions": 0 } }));
    }

    #[test]
    fn test_request_response_with_data() {
        let response: RequestResponse = serde_json::from_value(json!({
            "requestType": "StopRecord",
            "requestId": "42",
            "requestStatus": { "result": true, "code": 100 },
            "responseData": { "outputPath": "/videos/2024-01-01 10-00-00.mkv" }
        }))
        .unwrap();

        assert!(response.request_status.result);
        let data: StopRecordData = serde_json::from_value(response.response_data.unwrap()).unwrap();
        assert_eq!(data.output_path.as_deref(), Some("/videos/2024-01-01 10-00-00.mkv"));
    }
}
