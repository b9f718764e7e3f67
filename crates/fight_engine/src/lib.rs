use std::time::Duration;

use anyhow::{bail, Context, Result};
use api_client::{ApiError, Session};
use async_trait::async_trait;
use core_types::{FightMode, FightResult, FightTally, HistoryFight, Opponent, RunOptions};
use ranking::{rank_opponents, Perspective, Record};
use tokio::time::sleep;

/// How often an unresolved fight result is re-fetched.
pub const RESULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Politeness delay between rounds.
pub const ROUND_COOLDOWN: Duration = Duration::from_millis(2500);

/// The garden operations one batch run needs, mode specifics already bound.
/// The round loop only talks to this seam, so tests drive it without HTTP.
#[async_trait]
pub trait GardenApi {
    fn farmer_id(&self) -> i64;
    fn perspective(&self) -> Perspective;
    async fn remaining_fights(&mut self) -> Result<i64, ApiError>;
    async fn history(&mut self) -> Result<Vec<HistoryFight>, ApiError>;
    async fn opponents(&mut self) -> Result<Vec<Opponent>, ApiError>;
    async fn start_fight(&mut self, target_id: i64) -> Result<i64, ApiError>;
    async fn fight_result(&mut self, fight_id: i64) -> Result<FightResult, ApiError>;
}

/// Identifiers for team-mode fights.
#[derive(Debug, Clone, Copy)]
pub struct TeamIds {
    pub composition: i64,
    pub team: i64,
}

/// Binds a [`Session`] to one fight mode's endpoint family.
pub struct ModeClient {
    session: Session,
    mode: FightMode,
    leek_id: i64,
    team: TeamIds,
}

impl ModeClient {
    pub fn new(
        session: Session,
        mode: FightMode,
        leek_index: usize,
        team: TeamIds,
    ) -> Result<Self> {
        let leek_id = match session.leek_at(leek_index) {
            Some(id) => id,
            None if mode == FightMode::Solo => bail!(
                "leek index {leek_index} out of range; the farmer owns {} leek(s)",
                session.leeks().len()
            ),
            None => 0,
        };
        Ok(Self {
            session,
            mode,
            leek_id,
            team,
        })
    }
}

#[async_trait]
impl GardenApi for ModeClient {
    fn farmer_id(&self) -> i64 {
        self.session.farmer_id()
    }

    fn perspective(&self) -> Perspective {
        match self.mode {
            FightMode::Solo => Perspective::Leek(self.leek_id),
            FightMode::Farmer => Perspective::Farmer(self.session.farmer_id()),
            FightMode::Team => Perspective::Team(self.team.team),
        }
    }

    async fn remaining_fights(&mut self) -> Result<i64, ApiError> {
        self.session.remaining_fights(self.mode).await
    }

    async fn history(&mut self) -> Result<Vec<HistoryFight>, ApiError> {
        match self.mode {
            FightMode::Solo => self.session.leek_history(self.leek_id).await,
            FightMode::Farmer => self.session.farmer_history().await,
            FightMode::Team => self.session.team_history(self.team.team).await,
        }
    }

    async fn opponents(&mut self) -> Result<Vec<Opponent>, ApiError> {
        match self.mode {
            FightMode::Solo => self.session.solo_opponents(self.leek_id).await,
            FightMode::Farmer => self.session.farmer_opponents().await,
            FightMode::Team => self.session.composition_opponents(self.team.composition).await,
        }
    }

    async fn start_fight(&mut self, target_id: i64) -> Result<i64, ApiError> {
        match self.mode {
            FightMode::Solo => self.session.start_solo_fight(self.leek_id, target_id).await,
            FightMode::Farmer => self.session.start_farmer_fight(target_id).await,
            FightMode::Team => {
                self.session
                    .start_team_fight(self.team.composition, target_id)
                    .await
            }
        }
    }

    async fn fight_result(&mut self, fight_id: i64) -> Result<FightResult, ApiError> {
        self.session.fight(fight_id).await
    }
}

/// Drives up to `min(remaining, budget)` fight rounds: rank, pick the top
/// candidate, start, poll to resolution, score, cool down. Returns the
/// aggregate tally.
pub async fn run_rounds<A: GardenApi>(api: &mut A, options: &RunOptions) -> Result<FightTally> {
    let remaining = api
        .remaining_fights()
        .await
        .context("fetch remaining fights")?;
    let rounds = remaining.min(options.fights).max(0);
    tracing::info!(remaining, budget = options.fights, rounds, "starting batch run");

    let mut tally = FightTally::default();
    if rounds == 0 {
        return Ok(tally);
    }

    let mut record = Record::default();
    match api.history().await {
        Ok(fights) => {
            record.seed_from_history(&fights, api.perspective());
            tracing::info!(opponents_on_record = record.len(), "record seeded from history");
        }
        Err(err) => {
            tracing::warn!(%err, "history fetch failed; starting with an empty record");
        }
    }

    for round in 0..rounds {
        let mut candidates = api.opponents().await.context("fetch opponents")?;
        rank_opponents(&mut candidates, &record, options.mode, options.max_elo);
        log_candidates(&candidates, &record);

        let Some(enemy) = candidates.first().cloned() else {
            tracing::warn!("no opponents available; stopping early");
            break;
        };

        tracing::info!(
            enemy = %enemy.name,
            enemy_id = enemy.id,
            round = round + 1,
            rounds,
            %tally,
            "fighting"
        );

        if options.dry_run {
            continue;
        }

        let fight_id = api.start_fight(enemy.id).await.context("start fight")?;
        let result = poll_result(api, fight_id).await;

        let (us, them) = match result.side_of(api.farmer_id()) {
            Some(1) => (Some(1), Some(2)),
            Some(2) => (Some(2), Some(1)),
            _ => (None, None),
        };

        let outcome = if us == Some(result.winner) {
            tally.wins += 1;
            "win"
        } else if them == Some(result.winner) {
            tally.losses += 1;
            "defeat"
        } else {
            tally.draws += 1;
            "draw"
        };
        record.apply(enemy.id, outcome);
        tracing::info!(fight_id, outcome, "fight resolved");

        sleep(ROUND_COOLDOWN).await;
    }

    tracing::info!(%tally, "batch run finished");
    Ok(tally)
}

/// Polls until the server reports a definitive winner. Transient fetch
/// errors are logged and treated as "not ready yet".
async fn poll_result<A: GardenApi>(api: &mut A, fight_id: i64) -> FightResult {
    loop {
        match api.fight_result(fight_id).await {
            Ok(result) if !result.is_pending() => return result,
            Ok(_) => tracing::debug!(fight_id, "waiting for fight to run"),
            Err(err) => tracing::warn!(fight_id, %err, "result fetch failed; still waiting"),
        }
        sleep(RESULT_POLL_INTERVAL).await;
    }
}

fn log_candidates(candidates: &[Opponent], record: &Record) {
    for candidate in candidates {
        tracing::debug!(
            name = %candidate.name,
            score = record.score(candidate.id),
            talent = candidate.talent,
            ratio = candidate.level_ratio(),
            "candidate"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};

    use core_types::WINNER_PENDING;

    use super::*;

    fn opponent(id: i64, talent: i64) -> Opponent {
        Opponent {
            id,
            name: format!("opponent-{id}"),
            talent,
            level: 0,
            total_level: None,
            leek_count: None,
        }
    }

    fn resolved(winner: i64, us_on_side: i64, farmer_id: i64, enemy_farmer: i64) -> FightResult {
        let mut farmers1 = HashMap::new();
        let mut farmers2 = HashMap::new();
        let (ours, theirs) = if us_on_side == 1 {
            (&mut farmers1, &mut farmers2)
        } else {
            (&mut farmers2, &mut farmers1)
        };
        ours.insert(farmer_id.to_string(), serde_json::Value::Null);
        theirs.insert(enemy_farmer.to_string(), serde_json::Value::Null);
        FightResult {
            winner,
            farmers1,
            farmers2,
        }
    }

    fn pending() -> FightResult {
        FightResult {
            winner: WINNER_PENDING,
            farmers1: HashMap::new(),
            farmers2: HashMap::new(),
        }
    }

    struct ScriptedGarden {
        farmer_id: i64,
        remaining: i64,
        history: Result<Vec<HistoryFight>, ApiError>,
        candidates: Vec<Opponent>,
        results: VecDeque<Result<FightResult, ApiError>>,
        started: Vec<i64>,
        opponent_fetches: u32,
    }

    impl ScriptedGarden {
        fn new(remaining: i64, candidates: Vec<Opponent>) -> Self {
            Self {
                farmer_id: 42,
                remaining,
                history: Ok(Vec::new()),
                candidates,
                results: VecDeque::new(),
                started: Vec::new(),
                opponent_fetches: 0,
            }
        }

        fn always_winning(mut self) -> Self {
            // One resolved win per possible round.
            for _ in 0..self.remaining.max(1) {
                self.results
                    .push_back(Ok(resolved(1, 1, self.farmer_id, 777)));
            }
            self
        }
    }

    #[async_trait]
    impl GardenApi for ScriptedGarden {
        fn farmer_id(&self) -> i64 {
            self.farmer_id
        }

        fn perspective(&self) -> Perspective {
            Perspective::Farmer(self.farmer_id)
        }

        async fn remaining_fights(&mut self) -> Result<i64, ApiError> {
            Ok(self.remaining)
        }

        async fn history(&mut self) -> Result<Vec<HistoryFight>, ApiError> {
            std::mem::replace(&mut self.history, Ok(Vec::new()))
        }

        async fn opponents(&mut self) -> Result<Vec<Opponent>, ApiError> {
            self.opponent_fetches += 1;
            Ok(self.candidates.clone())
        }

        async fn start_fight(&mut self, target_id: i64) -> Result<i64, ApiError> {
            self.started.push(target_id);
            Ok(1000 + self.started.len() as i64)
        }

        async fn fight_result(&mut self, _fight_id: i64) -> Result<FightResult, ApiError> {
            self.results
                .pop_front()
                .unwrap_or_else(|| Ok(pending()))
        }
    }

    fn options(fights: i64) -> RunOptions {
        RunOptions {
            fights,
            mode: FightMode::Farmer,
            ..RunOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn round_count_is_min_of_remaining_and_budget() {
        let mut api = ScriptedGarden::new(3, vec![opponent(1, 100)]).always_winning();
        let tally = run_rounds(&mut api, &options(10)).await.expect("run");
        assert_eq!(api.started.len(), 3);
        assert_eq!(tally.wins, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_caps_rounds_below_remaining() {
        let mut api = ScriptedGarden::new(50, vec![opponent(1, 100)]);
        for _ in 0..2 {
            api.results.push_back(Ok(resolved(1, 1, 42, 777)));
        }
        let _ = run_rounds(&mut api, &options(2)).await.expect("run");
        assert_eq!(api.started.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_remaining_runs_no_rounds() {
        let mut api = ScriptedGarden::new(0, vec![opponent(1, 100)]);
        let tally = run_rounds(&mut api, &options(10)).await.expect("run");
        assert_eq!(tally, FightTally::default());
        assert_eq!(api.opponent_fetches, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_starts_no_fights() {
        let mut api = ScriptedGarden::new(5, vec![opponent(1, 100)]);
        let mut opts = options(5);
        opts.dry_run = true;
        let tally = run_rounds(&mut api, &opts).await.expect("run");
        assert!(api.started.is_empty());
        assert_eq!(api.opponent_fetches, 5);
        assert_eq!(tally, FightTally::default());
    }

    #[tokio::test(start_paused = true)]
    async fn pending_and_transient_errors_keep_polling() {
        let mut api = ScriptedGarden::new(1, vec![opponent(1, 100)]);
        api.results.push_back(Ok(pending()));
        api.results
            .push_back(Err(ApiError::Status(reqwest_status())));
        api.results.push_back(Ok(resolved(2, 2, 42, 777)));

        let tally = run_rounds(&mut api, &options(1)).await.expect("run");
        assert_eq!(tally.wins, 1);
        assert!(api.results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn losses_and_draws_are_tallied() {
        let mut api = ScriptedGarden::new(2, vec![opponent(1, 100)]);
        // Round one: the other side wins. Round two: winner is neither side.
        api.results.push_back(Ok(resolved(2, 1, 42, 777)));
        api.results.push_back(Ok(resolved(0, 1, 42, 777)));

        let tally = run_rounds(&mut api, &options(2)).await.expect("run");
        assert_eq!((tally.wins, tally.losses, tally.draws), (0, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn history_failure_still_runs_the_batch() {
        let mut api = ScriptedGarden::new(1, vec![opponent(1, 100)]).always_winning();
        api.history = Err(ApiError::Status(reqwest_status()));
        let tally = run_rounds(&mut api, &options(1)).await.expect("run");
        assert_eq!(tally.wins, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_candidate_list_stops_early() {
        let mut api = ScriptedGarden::new(5, Vec::new());
        let tally = run_rounds(&mut api, &options(5)).await.expect("run");
        assert_eq!(api.opponent_fetches, 1);
        assert_eq!(tally, FightTally::default());
    }

    fn reqwest_status() -> reqwest::StatusCode {
        reqwest::StatusCode::INTERNAL_SERVER_ERROR
    }
}
