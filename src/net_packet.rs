//! Line-oriented JSON messages exchanged with the room server.
//!
//! Every message is one JSON document followed by `\n`. An authoritative frame
//! arrives as two lines: an [`Envelope`] naming the act, then a
//! [`PayloadMessage`] whose `data` is base64 of the bincode frame.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::net_structs::{FrameDecodeError, RoomDownsyncFrame};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub path: String,
    pub int_auth_token: String,
    pub player_id: i32,
    pub map_sha1: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(default)]
    pub ret: i32,
    #[serde(default)]
    pub echoed_msg_id: i64,
    pub act: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadMessage {
    #[serde(default)]
    pub ret: i32,
    #[serde(default)]
    pub act: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request<T> {
    pub msg_id: u64,
    pub act: String,
    pub data: T,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload line is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Frame(#[from] FrameDecodeError),
}

/// Serializes `message` as a single newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    Ok(line)
}

/// `None` for anything that is not a well-formed envelope (heartbeats, junk).
/// Lines that are not UTF-8 JSON carrying an `act` are not envelopes.
pub fn parse_envelope(line: &[u8]) -> Option<Envelope> {
    serde_json::from_slice(line).ok()
}

pub fn decode_frame_payload(line: &[u8]) -> Result<RoomDownsyncFrame, PayloadError> {
    let message: PayloadMessage = serde_json::from_slice(line)?;
    let bytes = STANDARD.decode(message.data.as_bytes())?;
    Ok(RoomDownsyncFrame::decode(&bytes)?)
}

#[cfg(test)]
pub(crate) fn frame_payload_line(frame: &RoomDownsyncFrame) -> String {
    let message = PayloadMessage {
        ret: 1000,
        act: crate::net_structs::ACT_ROOM_DOWNSYNC_FRAME.to_string(),
        data: STANDARD.encode(frame.encode()),
    };
    let mut line = serde_json::to_string(&message).expect("payload json");
    line.push('\n');
    line
}
