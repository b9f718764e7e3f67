//! Push channel to the garden: frame codec, reaction policies, and the
//! reconnecting connection that ties them together.

pub mod channel;
pub mod message;
pub mod policy;

pub use channel::{ChannelConfig, ChannelState, GardenChannel, DEFAULT_BR_EVENT_ID};
pub use message::{BossSquad, GardenEvent, OutboundFrame, SquadsByBoss};
