//! Reaction policies for the two frame types that trigger side effects.
//!
//! The handlers are written against narrow seams so the rate-limit and
//! eligibility rules can be exercised without a socket or a real store.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::sleep;

use crate::message::{BossSquad, OutboundFrame, SquadsByBoss};

/// Grace period between durably recording a join and sending the join
/// frame, leaving other participants a window to get in first.
pub const BOSS_JOIN_GRACE: Duration = Duration::from_secs(5);
/// Delay before claiming a lucky notification.
pub const LUCKY_CLAIM_DELAY: Duration = Duration::from_secs(2);
/// The only boss whose squad list is scanned.
pub const BOSS_ID: &str = "1";

/// Durable ledger of guarded joins.
pub trait JoinLedger {
    fn recent_join_count(&self) -> Result<i64>;
    fn record_join(&self, fight_id: &str, at: DateTime<Utc>) -> Result<()>;
}

impl JoinLedger for boss_gate::JoinGate {
    fn recent_join_count(&self) -> Result<i64> {
        Ok(boss_gate::JoinGate::recent_join_count(self)?)
    }

    fn record_join(&self, fight_id: &str, at: DateTime<Utc>) -> Result<()> {
        Ok(boss_gate::JoinGate::record_join(self, fight_id, at)?)
    }
}

/// Source for the account's remaining-fights count.
#[async_trait]
pub trait FightsSource {
    async fn remaining_fights(&mut self) -> Result<i64>;
}

#[async_trait]
impl FightsSource for api_client::Session {
    async fn remaining_fights(&mut self) -> Result<i64> {
        Ok(self.fights_with_relogin().await?)
    }
}

/// Outbound half of the push connection.
#[async_trait]
pub trait FrameSink {
    async fn send_frame(&mut self, frame: OutboundFrame) -> Result<()>;
}

/// Handles one `GARDEN_BOSS_SQUADS` update. Scans boss 1's squads in the
/// order received and processes at most the first open one:
/// - a join recorded within the trailing window aborts silently;
/// - no remaining fights aborts silently;
/// - otherwise the join is durably recorded *before* the frame is sent, so
///   a crash mid-send under-joins rather than over-joins.
///
/// Ledger errors propagate: an unconfirmed record must never be treated as
/// "no prior join".
pub async fn handle_boss_squads<L, F, S>(
    squads: &SquadsByBoss,
    ledger: &L,
    fights: &mut F,
    sink: &mut S,
) -> Result<()>
where
    L: JoinLedger,
    F: FightsSource,
    S: FrameSink,
{
    let Some(open_squads) = squads.get(BOSS_ID) else {
        return Ok(());
    };
    let Some(squad) = open_squads.iter().find(|squad| squad.is_open()) else {
        return Ok(());
    };

    join_squad(squad, ledger, fights, sink).await
}

async fn join_squad<L, F, S>(
    squad: &BossSquad,
    ledger: &L,
    fights: &mut F,
    sink: &mut S,
) -> Result<()>
where
    L: JoinLedger,
    F: FightsSource,
    S: FrameSink,
{
    if ledger.recent_join_count()? > 0 {
        tracing::debug!(squad_id = squad.id, "already joined within the window");
        return Ok(());
    }

    let remaining = fights.remaining_fights().await?;
    tracing::info!(remaining, "fights available");
    if remaining <= 0 {
        tracing::info!("not joining because we have no fights");
        return Ok(());
    }

    tracing::info!(squad_id = squad.id, "joining boss fight");
    ledger.record_join(&squad.id.to_string(), Utc::now())?;

    // Give humans a chance to beat us.
    sleep(BOSS_JOIN_GRACE).await;

    sink.send_frame(OutboundFrame::JoinSquad(squad.id)).await?;
    Ok(())
}

/// Handles a `LUCKY` notification: short wait, then an unconditional,
/// repeatable claim.
pub async fn handle_lucky<S: FrameSink>(sink: &mut S) -> Result<()> {
    sleep(LUCKY_CLAIM_DELAY).await;
    sink.send_frame(OutboundFrame::GetLucky).await
}
