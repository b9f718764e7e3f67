//! The long-lived push connection: login, open, subscribe, dispatch,
//! reconnect. Runs for the lifetime of the process; there is no external
//! stop signal.

use std::time::Duration;

use anyhow::{Context, Result};
use api_client::{ApiError, Endpoints, Session};
use async_trait::async_trait;
use boss_gate::JoinGate;
use core_types::Credentials;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::message::{message_name, parse_frame, GardenEvent, OutboundFrame};
use crate::policy::{handle_boss_squads, handle_lucky, FrameSink};

/// Wait between a closed connection and the next connect attempt. Fixed;
/// reconnection never gives up and never backs off further.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// How often the subscription frames are re-sent to counter server-side
/// subscription expiry.
pub const RESUBSCRIBE_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Battle-royale event stream registered on every (re)subscription.
pub const DEFAULT_BR_EVENT_ID: i64 = 89111;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub br_event_id: i64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            br_event_id: DEFAULT_BR_EVENT_ID,
        }
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[async_trait]
impl FrameSink for WsSink {
    async fn send_frame(&mut self, frame: OutboundFrame) -> Result<()> {
        let text = frame.to_text();
        tracing::info!(frame = %text, "sending frame");
        self.send(Message::Text(text)).await.context("send frame")?;
        Ok(())
    }
}

pub struct GardenChannel {
    endpoints: Endpoints,
    credentials: Credentials,
    gate: JoinGate,
    config: ChannelConfig,
    state: ChannelState,
}

impl GardenChannel {
    pub fn new(
        endpoints: Endpoints,
        credentials: Credentials,
        gate: JoinGate,
        config: ChannelConfig,
    ) -> Self {
        Self {
            endpoints,
            credentials,
            gate,
            config,
            state: ChannelState::Disconnected,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Runs the reconnect loop forever. Returns only on bad credentials,
    /// which is fatal for the process; every other failure re-enters the
    /// loop after the fixed delay.
    ///
    /// The re-subscription timer is created once here, so its cadence is
    /// independent of how often the connection drops.
    pub async fn run(&mut self) -> Result<()> {
        let mut resubscribe = resubscribe_timer();

        loop {
            self.state = ChannelState::Connecting;
            match self.connect_once(&mut resubscribe).await {
                Ok(()) => tracing::info!("push connection closed"),
                Err(err) => {
                    if is_auth_failure(&err) {
                        return Err(err.context("failed login"));
                    }
                    tracing::warn!(%err, "push channel error; reconnecting");
                }
            }
            self.state = ChannelState::Disconnected;
            sleep(RECONNECT_DELAY).await;
        }
    }

    /// One connection lifetime: fresh login, open, subscribe, then pump
    /// frames until the stream ends.
    async fn connect_once(&mut self, resubscribe: &mut Interval) -> Result<()> {
        let mut session =
            Session::login(self.endpoints.clone(), self.credentials.clone()).await?;
        let cookie = session
            .cookie_header()
            .context("session has no cookie for the push channel")?;

        let mut request = session.ws_url().into_client_request()?;
        request
            .headers_mut()
            .insert(header::COOKIE, HeaderValue::from_str(&cookie)?);

        let (ws, _) = connect_async(request)
            .await
            .context("open push connection")?;
        self.state = ChannelState::Open;
        tracing::info!(url = %session.ws_url(), "push channel open");

        let (mut sink, mut stream) = ws.split();
        self.send_subscriptions(&mut sink).await?;

        loop {
            tokio::select! {
                _ = resubscribe.tick() => {
                    self.send_subscriptions(&mut sink).await?;
                }
                frame = stream.next() => {
                    match frame {
                        None => return Ok(()),
                        Some(Ok(Message::Text(text))) => {
                            self.dispatch(&text, &mut session, &mut sink).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = sink.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(_))) => return Ok(()),
                        Some(Ok(_)) => {}
                        // Reconnection is owned by stream end, not by the
                        // error arm.
                        Some(Err(err)) => {
                            tracing::warn!(%err, "push channel transport error");
                        }
                    }
                }
            }
        }
    }

    async fn send_subscriptions(&self, sink: &mut WsSink) -> Result<()> {
        sink.send_frame(OutboundFrame::RegisterBattleRoyale(self.config.br_event_id))
            .await?;
        sink.send_frame(OutboundFrame::ListenBoss).await?;
        Ok(())
    }

    /// Frames are handled strictly in arrival order; a failed handler is
    /// logged and must not tear down the connection.
    async fn dispatch(&self, text: &str, session: &mut Session, sink: &mut WsSink) {
        match parse_frame(text) {
            Ok(GardenEvent::BossSquads(squads)) => {
                if let Err(err) = handle_boss_squads(&squads, &self.gate, session, sink).await {
                    tracing::warn!(%err, "boss squad handling failed");
                }
            }
            Ok(GardenEvent::Lucky) => {
                if let Err(err) = handle_lucky(sink).await {
                    tracing::warn!(%err, "lucky claim failed");
                }
            }
            Ok(GardenEvent::Unrecognized {
                tag, request_id, ..
            }) => {
                tracing::debug!(tag, name = message_name(tag), ?request_id, "unhandled frame");
            }
            Err(err) => {
                let preview: String = text.chars().take(240).collect();
                tracing::warn!(%err, preview = %preview, "frame parse failed");
            }
        }
    }
}

/// The first tick is due one full period out; the on-open subscription
/// send already covers the start of a connection.
fn resubscribe_timer() -> Interval {
    let mut timer = interval_at(Instant::now() + RESUBSCRIBE_INTERVAL, RESUBSCRIBE_INTERVAL);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

fn is_auth_failure(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<ApiError>(), Some(ApiError::Auth(_)))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn channel_starts_disconnected() {
        let dir = TempDir::new().expect("tempdir");
        let channel = GardenChannel::new(
            Endpoints::default(),
            Credentials {
                login: "farmer".to_string(),
                password: "secret".to_string(),
            },
            JoinGate::open(dir.path().join("garden.db")).expect("open gate"),
            ChannelConfig::default(),
        );
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_timer_waits_a_full_period_before_first_tick() {
        let mut timer = resubscribe_timer();
        let start = Instant::now();
        timer.tick().await;
        assert_eq!(start.elapsed(), RESUBSCRIBE_INTERVAL);
    }

    #[test]
    fn auth_failures_are_classified_as_fatal() {
        let err = anyhow::Error::from(ApiError::Auth("bad credentials".to_string()));
        assert!(is_auth_failure(&err));

        let err = anyhow::Error::from(ApiError::RateLimited).context("wrapped");
        assert!(!is_auth_failure(&err));
    }
}
