//! The subset of the `/sync` response the relay consumes.

use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: Rooms,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rooms {
    #[serde(default)]
    pub join: BTreeMap<String, JoinedRoom>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinedRoom {
    #[serde(default)]
    pub timeline: Timeline,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub events: Vec<RoomEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoomEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: String,
    pub event_id: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// A text-bearing `m.room.message` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMessage {
    pub room_id: String,
    pub event_id: String,
    pub sender: String,
    pub msgtype: String,
    pub body: String,
}

impl SyncResponse {
    /// Every `m.room.message` with a string body, room by room in timeline order.
    pub fn messages(&self) -> Vec<RoomMessage> {
        self.rooms
            .join
            .iter()
            .flat_map(|(room_id, room)| {
                room.timeline
                    .events
                    .iter()
                    .filter_map(move |event| event.as_message(room_id))
            })
            .collect()
    }
}

impl RoomEvent {
    fn as_message(&self, room_id: &str) -> Option<RoomMessage> {
        if self.kind != "m.room.message" {
            return None;
        }
        let body = self.content.get("body")?.as_str()?;
        let msgtype = self
            .content
            .get("msgtype")
            .and_then(|t| t.as_str())
            .unwrap_or("m.text");
        Some(RoomMessage {
            room_id: room_id.to_string(),
            event_id: self.event_id.clone(),
            sender: self.sender.clone(),
            msgtype: msgtype.to_string(),
            body: body.to_string(),
        })
    }
}
