use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use core_types::{Credentials, FightMode, FightResult, HistoryFight, Opponent};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;

/// Cooldown applied after every "too many requests" response before the
/// same call is reissued.
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_millis(2500);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited")]
    RateLimited,
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_base: String,
    pub ws_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: "https://leekwars.com/api".to_string(),
            ws_url: "wss://leekwars.com/ws".to_string(),
        }
    }
}

/// Retries `op` whenever it reports `RateLimited`, waiting the fixed
/// cooldown between attempts. Every 429 occurrence triggers exactly one
/// wait-and-retry; there is deliberately no attempt cap and no backoff
/// growth. Any other outcome is returned as-is.
pub async fn with_rate_limit_retry<T, F, Fut>(mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    loop {
        match op().await {
            Err(ApiError::RateLimited) => {
                tracing::warn!(
                    cooldown_ms = RATE_LIMIT_COOLDOWN.as_millis() as u64,
                    "rate limited; backing off"
                );
                sleep(RATE_LIMIT_COOLDOWN).await;
            }
            other => return other,
        }
    }
}

/// One authenticated LeekWars session: cookie state, the farmer identity
/// and its owned leeks (sorted ascending by id so positional selection is
/// reproducible). Replaced wholesale by [`Session::relogin`]; never
/// persisted.
pub struct Session {
    http: Client,
    jar: Arc<Jar>,
    endpoints: Endpoints,
    credentials: Credentials,
    farmer_id: i64,
    leeks: Vec<i64>,
}

impl Session {
    pub async fn login(endpoints: Endpoints, credentials: Credentials) -> Result<Self, ApiError> {
        let jar = Arc::new(Jar::default());
        let http = Client::builder().cookie_provider(jar.clone()).build()?;
        let mut session = Self {
            http,
            jar,
            endpoints,
            credentials,
            farmer_id: 0,
            leeks: Vec::new(),
        };
        session.authenticate().await?;
        Ok(session)
    }

    /// Re-runs the login flow in place, replacing the cookie credential and
    /// identity. Last write wins; no coordination with concurrent callers.
    pub async fn relogin(&mut self) -> Result<(), ApiError> {
        self.authenticate().await
    }

    async fn authenticate(&mut self) -> Result<(), ApiError> {
        let login = [
            ("login", self.credentials.login.clone()),
            ("password", self.credentials.password.clone()),
        ];
        let response = self
            .http
            .post(self.url("farmer/login-token"))
            .form(&login)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ApiError::Auth(format!(
                "login rejected with status {}",
                response.status()
            )));
        }

        let info: TokenInfo = self
            .get_json("farmer/get-from-token")
            .await
            .map_err(|err| ApiError::Auth(format!("token check failed: {err}")))?;

        self.farmer_id = info.farmer.id;
        self.leeks = sorted_leek_ids(&info.farmer.leeks);
        tracing::info!(farmer_id = self.farmer_id, leeks = ?self.leeks, "logged in");
        Ok(())
    }

    pub fn farmer_id(&self) -> i64 {
        self.farmer_id
    }

    /// Owned leek ids, ascending.
    pub fn leeks(&self) -> &[i64] {
        &self.leeks
    }

    /// Leek selected by a 1-based positional index.
    pub fn leek_at(&self, index: usize) -> Option<i64> {
        index
            .checked_sub(1)
            .and_then(|i| self.leeks.get(i))
            .copied()
    }

    pub fn ws_url(&self) -> &str {
        &self.endpoints.ws_url
    }

    /// Renders the session cookies for the push-channel `Cookie` header.
    pub fn cookie_header(&self) -> Option<String> {
        let url: Url = self.endpoints.api_base.parse().ok()?;
        self.jar
            .cookies(&url)
            .and_then(|v| v.to_str().ok().map(str::to_string))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.api_base.trim_end_matches('/'), path)
    }

    /// Sends one request, transparently absorbing 429 responses with the
    /// fixed cooldown. Non-success statuses and transport errors propagate.
    async fn execute(&self, build: impl Fn() -> RequestBuilder) -> Result<reqwest::Response, ApiError> {
        with_rate_limit_retry(|| async {
            let response = build().send().await?;
            match response.status() {
                StatusCode::TOO_MANY_REQUESTS => Err(ApiError::RateLimited),
                status if !status.is_success() => Err(ApiError::Status(status)),
                _ => Ok(response),
            }
        })
        .await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.url(path);
        let response = self.execute(|| self.http.get(&url)).await?;
        Ok(response.json().await?)
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        let response = self.execute(|| self.http.post(&url).form(form)).await?;
        Ok(response.json().await?)
    }

    /// Remaining fights for the account, per mode family.
    pub async fn remaining_fights(&self, mode: FightMode) -> Result<i64, ApiError> {
        let garden: GardenEnvelope = self.get_json("garden/get").await?;
        Ok(match mode {
            FightMode::Solo | FightMode::Farmer => garden.garden.fights,
            FightMode::Team => garden.garden.team_fights,
        })
    }

    /// Remaining-fights count as reported alongside the token identity.
    /// Used by the event channel between gate check and squad join.
    pub async fn fights_from_token(&self) -> Result<i64, ApiError> {
        let info: TokenInfo = self.get_json("farmer/get-from-token").await?;
        Ok(info.fights)
    }

    /// Same as [`Session::fights_from_token`], but an error triggers one
    /// transparent re-login followed by one retry of the call.
    pub async fn fights_with_relogin(&mut self) -> Result<i64, ApiError> {
        match self.fights_from_token().await {
            Ok(fights) => Ok(fights),
            Err(err) => {
                tracing::warn!(%err, "fights lookup failed; logging in again");
                self.relogin().await?;
                self.fights_from_token().await
            }
        }
    }

    pub async fn solo_opponents(&self, leek_id: i64) -> Result<Vec<Opponent>, ApiError> {
        self.opponents(&format!("garden/get-leek-opponents/{leek_id}"))
            .await
    }

    pub async fn farmer_opponents(&self) -> Result<Vec<Opponent>, ApiError> {
        self.opponents("garden/get-farmer-opponents").await
    }

    pub async fn composition_opponents(&self, composition_id: i64) -> Result<Vec<Opponent>, ApiError> {
        self.opponents(&format!("garden/get-composition-opponents/{composition_id}"))
            .await
    }

    async fn opponents(&self, path: &str) -> Result<Vec<Opponent>, ApiError> {
        let envelope: OpponentsEnvelope = self.get_json(path).await?;
        Ok(envelope.opponents)
    }

    pub async fn start_solo_fight(&self, leek_id: i64, target_id: i64) -> Result<i64, ApiError> {
        self.start_fight(
            "garden/start-solo-fight",
            &[
                ("leek_id", leek_id.to_string()),
                ("target_id", target_id.to_string()),
            ],
        )
        .await
    }

    pub async fn start_farmer_fight(&self, target_id: i64) -> Result<i64, ApiError> {
        self.start_fight(
            "garden/start-farmer-fight",
            &[("target_id", target_id.to_string())],
        )
        .await
    }

    pub async fn start_team_fight(
        &self,
        composition_id: i64,
        target_id: i64,
    ) -> Result<i64, ApiError> {
        self.start_fight(
            "garden/start-team-fight",
            &[
                ("composition_id", composition_id.to_string()),
                ("target_id", target_id.to_string()),
            ],
        )
        .await
    }

    async fn start_fight(&self, path: &str, form: &[(&str, String)]) -> Result<i64, ApiError> {
        let started: StartedFight = self.post_form(path, form).await?;
        Ok(started.fight)
    }

    pub async fn fight(&self, fight_id: i64) -> Result<FightResult, ApiError> {
        self.get_json(&format!("fight/get/{fight_id}")).await
    }

    pub async fn leek_history(&self, leek_id: i64) -> Result<Vec<HistoryFight>, ApiError> {
        self.history(&format!("history/get-leek-history/{leek_id}"))
            .await
    }

    pub async fn farmer_history(&self) -> Result<Vec<HistoryFight>, ApiError> {
        self.history(&format!("history/get-farmer-history/{}", self.farmer_id))
            .await
    }

    pub async fn team_history(&self, team_id: i64) -> Result<Vec<HistoryFight>, ApiError> {
        self.history(&format!("history/get-team-history/{team_id}"))
            .await
    }

    async fn history(&self, path: &str) -> Result<Vec<HistoryFight>, ApiError> {
        let envelope: HistoryEnvelope = self.get_json(path).await?;
        Ok(envelope.fights)
    }

    /// Registers the given leek for automatic battle-royale entry. The
    /// endpoint expects browser-shaped headers.
    pub async fn register_auto_br(&self, leek_id: i64) -> Result<serde_json::Value, ApiError> {
        let url = self.url("leek/register-auto-br");
        let referer = format!("https://leekwars.com/leek/{leek_id}");
        let response = self
            .execute(|| {
                self.http
                    .post(&url)
                    .form(&[("leek_id", leek_id.to_string())])
                    .header("Authorization", "Bearer $")
                    .header("Referer", referer.clone())
                    .header(
                        "User-Agent",
                        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36",
                    )
                    .header("cache-control", "no-cache")
                    .header("pragma", "no-cache")
            })
            .await?;
        Ok(response.json().await?)
    }
}

fn sorted_leek_ids(leeks: &HashMap<String, serde_json::Value>) -> Vec<i64> {
    let mut ids: Vec<i64> = leeks.keys().filter_map(|k| k.parse().ok()).collect();
    ids.sort_unstable();
    ids
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    farmer: FarmerInfo,
    #[serde(default)]
    fights: i64,
}

#[derive(Debug, Deserialize)]
struct FarmerInfo {
    id: i64,
    #[serde(default)]
    leeks: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GardenEnvelope {
    garden: GardenCounts,
}

#[derive(Debug, Deserialize)]
struct GardenCounts {
    #[serde(default)]
    fights: i64,
    #[serde(default)]
    team_fights: i64,
}

#[derive(Debug, Deserialize)]
struct OpponentsEnvelope {
    #[serde(default)]
    opponents: Vec<Opponent>,
}

#[derive(Debug, Deserialize)]
struct StartedFight {
    fight: i64,
}

#[derive(Debug, Deserialize)]
struct HistoryEnvelope {
    #[serde(default)]
    fights: Vec<HistoryFight>,
}
