use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{Direction, Vec2};

pub const ACT_ROOM_DOWNSYNC_FRAME: &str = "RoomDownsyncFrame";
pub const ACT_PLAYER_UPSYNC_CMD: &str = "PlayerUpsyncCmd";
pub const ACT_CLOSE: &str = "Close";

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub id: i32,
    pub x: f64,
    pub y: f64,
    pub speed: f64,
    pub dir: Direction,
}

impl PlayerState {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Treasure {
    pub id: i32,
    pub kind: i32,
    pub score: i32,
    pub x: f64,
    pub y: f64,
    pub removed: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bullet {
    pub local_id_in_battle: i32,
    pub linear_speed: f64,
    pub x: f64,
    pub y: f64,
    pub removed: bool,
    pub start_at_point: Option<Vec2>,
    pub end_at_point: Option<Vec2>,
}

/// One authoritative snapshot pushed by the room.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomDownsyncFrame {
    pub id: i32,
    pub ref_frame_id: i32,
    pub countdown_nanos: i64,
    pub players: BTreeMap<i32, PlayerState>,
    pub treasures: BTreeMap<i32, Treasure>,
    pub bullets: BTreeMap<i32, Bullet>,
}

#[derive(Debug, Error)]
#[error("undecodable room frame ({len} bytes): {source}")]
pub struct FrameDecodeError {
    pub len: usize,
    #[source]
    pub source: bincode::Error,
}

impl RoomDownsyncFrame {
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameDecodeError> {
        bincode::deserialize(bytes).map_err(|source| FrameDecodeError {
            len: bytes.len(),
            source,
        })
    }

    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("frame serializes")
    }

    pub fn player(&self, id: i32) -> Option<&PlayerState> {
        self.players.get(&id)
    }
}

/// Movement report for one tick, acknowledging the frame it was computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerUpsyncCmd {
    pub id: i32,
    pub x: f64,
    pub y: f64,
    pub dir: Direction,
    #[serde(rename = "AckingFrameId")]
    pub acking_frame_id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_survives_bincode_and_exposes_players() {
        let mut frame = RoomDownsyncFrame {
            id: 3,
            countdown_nanos: 1_000,
            ..RoomDownsyncFrame::default()
        };
        frame.players.insert(
            10,
            PlayerState {
                id: 10,
                x: 1.5,
                y: -2.0,
                speed: 300.0,
                dir: Direction::new(2.0, 1.0),
            },
        );
        let decoded = RoomDownsyncFrame::decode(&frame.encode()).expect("decode");
        assert_eq!(decoded, frame);
        assert_eq!(decoded.player(10).map(|p| p.position()), Some(Vec2::new(1.5, -2.0)));
        assert!(decoded.player(11).is_none());
    }

    #[test]
    fn truncated_payload_is_a_decode_error() {
        let bytes = RoomDownsyncFrame::default().encode();
        let err = RoomDownsyncFrame::decode(&bytes[..bytes.len() / 2]).unwrap_err();
        assert_eq!(err.len, bytes.len() / 2);
    }

    #[test]
    fn upsync_uses_server_field_names() {
        let cmd = PlayerUpsyncCmd {
            id: 10,
            x: 1.0,
            y: 2.0,
            dir: Direction::new(-2.0, 1.0),
            acking_frame_id: 42,
        };
        let json = serde_json::to_value(cmd).expect("json");
        assert_eq!(json["AckingFrameId"], 42);
        assert_eq!(json["dir"]["dx"], -2.0);
        assert_eq!(json["id"], 10);
    }
}
