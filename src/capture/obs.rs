use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{
    self, op, Envelope, Hello, Identified, Identify, RecordDirectoryData, RecordStatusData,
    Request, RequestResponse, SceneListData, StopRecordData, VersionData,
};
use super::{CaptureController, CaptureError, CaptureResult, RecordStatus, RecorderVersion};
use crate::config::CaptureConfig;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// obs-websocket v5 client
///
/// Requests are serialized through a single socket; responses are matched by
/// request id and unrelated frames (events) are skipped.
pub struct ObsClient {
    socket: Mutex<Socket>,
    endpoint: String,
    request_timeout: Duration,
}

impl ObsClient {
    /// Connect and complete the Hello/Identify handshake
    pub async fn connect(config: &CaptureConfig) -> CaptureResult<Self> {
        let endpoint = config.endpoint();
        info!("🔌 Connecting to recorder at {}", endpoint);

        let connect = tokio::time::timeout(config.request_timeout(), connect_async(endpoint.as_str()));
        let (mut socket, _) = connect
            .await
            .map_err(|_| CaptureError::Connect {
                endpoint: endpoint.clone(),
                reason: "timed out".to_string(),
            })?
            .map_err(|e| CaptureError::Connect {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        let hello: Hello = read_op(&mut socket, op::HELLO, config.request_timeout()).await?;
        debug!(
            "Recorder hello: websocket {} rpc {}",
            hello.obs_web_socket_version, hello.rpc_version
        );

        let authentication = match (&hello.authentication, &config.password) {
            (Some(challenge), Some(password)) => Some(protocol::auth_response(password, challenge)),
            (Some(_), None) => {
                return Err(CaptureError::Authentication(
                    "recorder requires a password but none is configured".to_string(),
                ))
            }
            (None, _) => None,
        };

        let identify = Identify {
            rpc_version: protocol::RPC_VERSION,
            authentication,
            event_subscriptions: 0,
        };
        send(&mut socket, op::IDENTIFY, &identify).await?;

        // The recorder closes the socket on a wrong password
        let identified: Identified = read_op(&mut socket, op::IDENTIFIED, config.request_timeout())
            .await
            .map_err(|e| match e {
                CaptureError::Disconnected => {
                    CaptureError::Authentication("connection closed during identification".to_string())
                }
                other => other,
            })?;
        info!("✅ Recorder connected (rpc {})", identified.negotiated_rpc_version);

        Ok(Self {
            socket: Mutex::new(socket),
            endpoint,
            request_timeout: config.request_timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one request and wait for its response
    pub async fn request(&self, request_type: &str, data: Option<Value>) -> CaptureResult<Option<Value>> {
        let request_id = Uuid::new_v4().to_string();
        let request = Request {
            request_type: request_type.to_string(),
            request_id: request_id.clone(),
            request_data: data,
        };

        let mut socket = self.socket.lock().await;
        send(&mut socket, op::REQUEST, &request).await?;

        let exchange = async {
            loop {
                let envelope = next_envelope(&mut socket).await?;
                if envelope.op != op::REQUEST_RESPONSE {
                    continue;
                }
                let response: RequestResponse = envelope
                    .payload()
                    .map_err(|e| CaptureError::Protocol(e.to_string()))?;
                if response.request_id == request_id {
                    return Ok(response);
                }
                debug!("Skipping response to {} ({})", response.request_type, response.request_id);
            }
        };

        let response = tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| CaptureError::Timeout(request_type.to_string()))??;

        if !response.request_status.result {
            return Err(CaptureError::Request {
                request: request_type.to_string(),
                code: response.request_status.code,
                comment: response.request_status.comment.unwrap_or_default(),
            });
        }

        Ok(response.response_data)
    }

    async fn request_as<T: DeserializeOwned>(&self, request_type: &str, data: Option<Value>) -> CaptureResult<T> {
        let value = self
            .request(request_type, data)
            .await?
            .ok_or_else(|| CaptureError::Protocol(format!("{} returned no data", request_type)))?;
        serde_json::from_value(value).map_err(|e| CaptureError::Protocol(e.to_string()))
    }

    /// Current program scene and the list of scenes, for the startup report
    pub async fn scene_report(&self) -> CaptureResult<(Option<String>, Vec<String>)> {
        let scenes: SceneListData = self.request_as("GetSceneList", None).await?;
        Ok((
            scenes.current_program_scene_name,
            scenes.scenes.into_iter().map(|s| s.scene_name).collect(),
        ))
    }
}

#[async_trait]
impl CaptureController for ObsClient {
    async fn version(&self) -> CaptureResult<RecorderVersion> {
        let version: VersionData = self.request_as("GetVersion", None).await?;
        Ok(RecorderVersion {
            recorder: version.obs_version,
            protocol: version.obs_web_socket_version,
        })
    }

    async fn start_recording(&self) -> CaptureResult<()> {
        self.request("StartRecord", None).await?;
        Ok(())
    }

    async fn stop_recording(&self) -> CaptureResult<Option<PathBuf>> {
        let data = self.request("StopRecord", None).await?;
        let output = data
            .and_then(|value| serde_json::from_value::<StopRecordData>(value).ok())
            .and_then(|stop| stop.output_path)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);
        Ok(output)
    }

    async fn record_status(&self) -> CaptureResult<RecordStatus> {
        let status: RecordStatusData = self.request_as("GetRecordStatus", None).await?;
        Ok(RecordStatus {
            active: status.output_active,
            paused: status.output_paused,
            timecode: status.output_timecode,
            bytes: status.output_bytes,
        })
    }

    async fn set_output_directory(&self, dir: &Path) -> CaptureResult<()> {
        let dir = dir.to_string_lossy();
        self.request("SetRecordDirectory", Some(json!({ "recordDirectory": dir })))
            .await?;
        debug!("Recorder output directory set to {}", dir);
        Ok(())
    }

    async fn output_directory(&self) -> CaptureResult<PathBuf> {
        let data: RecordDirectoryData = self.request_as("GetRecordDirectory", None).await?;
        Ok(PathBuf::from(data.record_directory))
    }
}

async fn send<T: serde::Serialize>(socket: &mut Socket, opcode: u8, data: &T) -> CaptureResult<()> {
    let envelope = Envelope::new(opcode, data).map_err(|e| CaptureError::Protocol(e.to_string()))?;
    let text = serde_json::to_string(&envelope).map_err(|e| CaptureError::Protocol(e.to_string()))?;
    socket
        .send(Message::Text(text))
        .await
        .map_err(|_| CaptureError::Disconnected)
}

async fn next_envelope(socket: &mut Socket) -> CaptureResult<Envelope> {
    loop {
        let message = match socket.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!("Recorder socket error: {}", e);
                return Err(CaptureError::Disconnected);
            }
            None => return Err(CaptureError::Disconnected),
        };

        match message {
            Message::Text(text) => {
                return serde_json::from_str(&text).map_err(|e| CaptureError::Protocol(e.to_string()));
            }
            Message::Close(_) => return Err(CaptureError::Disconnected),
            // Pings are answered by tungstenite itself
            _ => continue,
        }
    }
}

async fn read_op<T: DeserializeOwned>(socket: &mut Socket, opcode: u8, limit: Duration) -> CaptureResult<T> {
    let read = async {
        loop {
            let envelope = next_envelope(socket).await?;
            if envelope.op == opcode {
                return envelope.payload().map_err(|e| CaptureError::Protocol(e.to_string()));
            }
            if envelope.op != op::EVENT {
                return Err(CaptureError::Protocol(format!(
                    "expected opcode {}, got {}",
                    opcode, envelope.op
                )));
            }
        }
    };

    tokio::time::timeout(limit, read)
        .await
        .map_err(|_| CaptureError::Timeout(format!("opcode {}", opcode)))?
}
