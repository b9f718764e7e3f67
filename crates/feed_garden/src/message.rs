//! Wire shapes for the push channel. Every frame, inbound or outbound, is
//! a JSON array `[type, payload?, requestId?]` with an integer type tag.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

/// Message type tags used by the push channel.
pub mod kind {
    pub const AUTH: i64 = 0;
    pub const NOTIFICATION_RECEIVE: i64 = 6;
    pub const CHAT_SEND: i64 = 8;
    pub const CHAT_RECEIVE: i64 = 9;
    pub const MP_READ: i64 = 11;
    pub const FIGHT_LISTEN: i64 = 12;
    pub const FIGHT_WAITING_POSITION: i64 = 13;
    pub const FORUM_CHAT_DISABLE: i64 = 19;
    pub const READ_ALL_NOTIFICATIONS: i64 = 20;
    pub const YOU_ARE_MUTED: i64 = 25;
    pub const LUCKY: i64 = 26;
    pub const GET_LUCKY: i64 = 27;
    pub const BATTLE_ROYALE_REGISTER: i64 = 28;
    pub const BATTLE_ROYALE_UPDATE: i64 = 29;
    pub const BATTLE_ROYALE_START: i64 = 30;
    pub const BATTLE_ROYALE_LEAVE: i64 = 31;
    pub const BATTLE_ROYALE_CHAT_NOTIF: i64 = 32;
    pub const PONG: i64 = 33;
    pub const CHAT_ENABLE: i64 = 34;
    pub const CHAT_RECEIVE_PACK: i64 = 35;
    pub const GARDEN_QUEUE_REGISTER: i64 = 37;
    pub const GARDEN_QUEUE: i64 = 38;
    pub const GARDEN_QUEUE_UNREGISTER: i64 = 39;
    pub const FIGHT_PROGRESS_REGISTER: i64 = 40;
    pub const FIGHT_PROGRESS: i64 = 41;
    pub const FIGHT_PROGRESS_UNREGISTER: i64 = 42;
    pub const UPDATE_LEEK_TALENT: i64 = 45;
    pub const UPDATE_FARMER_TALENT: i64 = 46;
    pub const UPDATE_TEAM_TALENT: i64 = 47;
    pub const UPDATE_HABS: i64 = 48;
    pub const UPDATE_LEEK_XP: i64 = 49;
    pub const READ_NOTIFICATION: i64 = 52;
    pub const ADD_RESOURCE: i64 = 53;
    pub const WRONG_TOKEN: i64 = 57;
    pub const TOURNAMENT_UPDATE: i64 = 60;
    pub const FAKE_LUCKY: i64 = 61;
    pub const GARDEN_BOSS_CREATE_SQUAD: i64 = 66;
    pub const GARDEN_BOSS_JOIN_SQUAD: i64 = 67;
    pub const GARDEN_BOSS_ADD_LEEK: i64 = 68;
    pub const GARDEN_BOSS_REMOVE_LEEK: i64 = 69;
    pub const GARDEN_BOSS_SQUAD_PUBLIC: i64 = 70;
    pub const GARDEN_BOSS_ATTACK: i64 = 71;
    pub const GARDEN_BOSS_LISTEN: i64 = 72;
    pub const GARDEN_BOSS_SQUADS: i64 = 73;
    pub const GARDEN_BOSS_SQUAD_JOINED: i64 = 74;
    pub const GARDEN_BOSS_LEAVE_SQUAD: i64 = 75;
    pub const GARDEN_BOSS_SQUAD: i64 = 76;
    pub const GARDEN_BOSS_NO_SUCH_SQUAD: i64 = 77;
    pub const GARDEN_BOSS_STARTED: i64 = 78;
    pub const GARDEN_BOSS_OPEN: i64 = 79;
    pub const GARDEN_BOSS_LOCK: i64 = 80;
    pub const GARDEN_BOSS_UNLISTEN: i64 = 81;
    pub const GARDEN_BOSS_LEFT: i64 = 82;
}

/// Human-readable tag name, used when logging frames we do not handle.
pub fn message_name(tag: i64) -> &'static str {
    match tag {
        kind::AUTH => "AUTH",
        kind::NOTIFICATION_RECEIVE => "NOTIFICATION_RECEIVE",
        kind::CHAT_SEND => "CHAT_SEND",
        kind::CHAT_RECEIVE => "CHAT_RECEIVE",
        kind::MP_READ => "MP_READ",
        kind::FIGHT_LISTEN => "FIGHT_LISTEN",
        kind::FIGHT_WAITING_POSITION => "FIGHT_WAITING_POSITION",
        kind::FORUM_CHAT_DISABLE => "FORUM_CHAT_DISABLE",
        kind::READ_ALL_NOTIFICATIONS => "READ_ALL_NOTIFICATIONS",
        kind::YOU_ARE_MUTED => "YOU_ARE_MUTED",
        kind::LUCKY => "LUCKY",
        kind::GET_LUCKY => "GET_LUCKY",
        kind::BATTLE_ROYALE_REGISTER => "BATTLE_ROYALE_REGISTER",
        kind::BATTLE_ROYALE_UPDATE => "BATTLE_ROYALE_UPDATE",
        kind::BATTLE_ROYALE_START => "BATTLE_ROYALE_START",
        kind::BATTLE_ROYALE_LEAVE => "BATTLE_ROYALE_LEAVE",
        kind::BATTLE_ROYALE_CHAT_NOTIF => "BATTLE_ROYALE_CHAT_NOTIF",
        kind::PONG => "PONG",
        kind::CHAT_ENABLE => "CHAT_ENABLE",
        kind::CHAT_RECEIVE_PACK => "CHAT_RECEIVE_PACK",
        kind::GARDEN_QUEUE_REGISTER => "GARDEN_QUEUE_REGISTER",
        kind::GARDEN_QUEUE => "GARDEN_QUEUE",
        kind::GARDEN_QUEUE_UNREGISTER => "GARDEN_QUEUE_UNREGISTER",
        kind::FIGHT_PROGRESS_REGISTER => "FIGHT_PROGRESS_REGISTER",
        kind::FIGHT_PROGRESS => "FIGHT_PROGRESS",
        kind::FIGHT_PROGRESS_UNREGISTER => "FIGHT_PROGRESS_UNREGISTER",
        kind::UPDATE_LEEK_TALENT => "UPDATE_LEEK_TALENT",
        kind::UPDATE_FARMER_TALENT => "UPDATE_FARMER_TALENT",
        kind::UPDATE_TEAM_TALENT => "UPDATE_TEAM_TALENT",
        kind::UPDATE_HABS => "UPDATE_HABS",
        kind::UPDATE_LEEK_XP => "UPDATE_LEEK_XP",
        kind::READ_NOTIFICATION => "READ_NOTIFICATION",
        kind::ADD_RESOURCE => "ADD_RESOURCE",
        kind::WRONG_TOKEN => "WRONG_TOKEN",
        kind::TOURNAMENT_UPDATE => "TOURNAMENT_UPDATE",
        kind::FAKE_LUCKY => "FAKE_LUCKY",
        kind::GARDEN_BOSS_CREATE_SQUAD => "GARDEN_BOSS_CREATE_SQUAD",
        kind::GARDEN_BOSS_JOIN_SQUAD => "GARDEN_BOSS_JOIN_SQUAD",
        kind::GARDEN_BOSS_ADD_LEEK => "GARDEN_BOSS_ADD_LEEK",
        kind::GARDEN_BOSS_REMOVE_LEEK => "GARDEN_BOSS_REMOVE_LEEK",
        kind::GARDEN_BOSS_SQUAD_PUBLIC => "GARDEN_BOSS_SQUAD_PUBLIC",
        kind::GARDEN_BOSS_ATTACK => "GARDEN_BOSS_ATTACK",
        kind::GARDEN_BOSS_LISTEN => "GARDEN_BOSS_LISTEN",
        kind::GARDEN_BOSS_SQUADS => "GARDEN_BOSS_SQUADS",
        kind::GARDEN_BOSS_SQUAD_JOINED => "GARDEN_BOSS_SQUAD_JOINED",
        kind::GARDEN_BOSS_LEAVE_SQUAD => "GARDEN_BOSS_LEAVE_SQUAD",
        kind::GARDEN_BOSS_SQUAD => "GARDEN_BOSS_SQUAD",
        kind::GARDEN_BOSS_NO_SUCH_SQUAD => "GARDEN_BOSS_NO_SUCH_SQUAD",
        kind::GARDEN_BOSS_STARTED => "GARDEN_BOSS_STARTED",
        kind::GARDEN_BOSS_OPEN => "GARDEN_BOSS_OPEN",
        kind::GARDEN_BOSS_LOCK => "GARDEN_BOSS_LOCK",
        kind::GARDEN_BOSS_UNLISTEN => "GARDEN_BOSS_UNLISTEN",
        kind::GARDEN_BOSS_LEFT => "GARDEN_BOSS_LEFT",
        _ => "UNKNOWN",
    }
}

/// A squad can take at most this many participants.
pub const MAX_SQUAD_SIZE: i64 = 8;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct BossSquad {
    pub id: i64,
    #[serde(default)]
    pub engaged_count: i64,
    #[serde(default)]
    pub locked: bool,
}

impl BossSquad {
    pub fn is_open(&self) -> bool {
        self.engaged_count < MAX_SQUAD_SIZE && !self.locked
    }
}

/// Squad lists keyed by boss id, as carried by a `GARDEN_BOSS_SQUADS`
/// frame.
pub type SquadsByBoss = BTreeMap<String, Vec<BossSquad>>;

/// One decoded inbound frame. Types we do not act on land in
/// `Unrecognized`, carrying the raw tag for logging.
#[derive(Debug)]
pub enum GardenEvent {
    BossSquads(SquadsByBoss),
    Lucky,
    Unrecognized {
        tag: i64,
        data: Value,
        request_id: Option<i64>,
    },
}

pub fn parse_frame(text: &str) -> Result<GardenEvent> {
    let raw: Vec<Value> = serde_json::from_str(text).context("frame is not a json array")?;
    let tag = raw
        .first()
        .and_then(Value::as_i64)
        .context("frame missing integer type tag")?;
    let data = raw.get(1).cloned().unwrap_or(Value::Null);
    let request_id = raw.get(2).and_then(Value::as_i64);

    match tag {
        kind::GARDEN_BOSS_SQUADS => {
            let squads: SquadsByBoss =
                serde_json::from_value(data).context("malformed boss squads payload")?;
            Ok(GardenEvent::BossSquads(squads))
        }
        kind::LUCKY => Ok(GardenEvent::Lucky),
        _ => Ok(GardenEvent::Unrecognized {
            tag,
            data,
            request_id,
        }),
    }
}

/// Frames this client sends. Serialized to the same array shape, with the
/// payload element omitted where the protocol omits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    RegisterBattleRoyale(i64),
    ListenBoss,
    JoinSquad(i64),
    GetLucky,
}

impl OutboundFrame {
    pub fn to_json(&self) -> Value {
        match self {
            Self::RegisterBattleRoyale(id) => json!([kind::BATTLE_ROYALE_REGISTER, id]),
            Self::ListenBoss => json!([kind::GARDEN_BOSS_LISTEN]),
            Self::JoinSquad(id) => json!([kind::GARDEN_BOSS_JOIN_SQUAD, id]),
            Self::GetLucky => json!([kind::GET_LUCKY]),
        }
    }

    pub fn to_text(&self) -> String {
        self.to_json().to_string()
    }
}
