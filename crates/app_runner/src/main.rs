use std::path::PathBuf;

use anyhow::{Context, Result};
use api_client::{Endpoints, Session};
use boss_gate::JoinGate;
use clap::{Args, Parser, Subcommand};
use core_types::{Credentials, FightMode, RunOptions};
use feed_garden::{ChannelConfig, GardenChannel, DEFAULT_BR_EVENT_ID};
use fight_engine::{run_rounds, ModeClient, TeamIds};

#[derive(Parser, Debug)]
#[command(name = "gardener", about = "LeekWars garden automation", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a batch of garden fights with ranked opponent selection.
    Fight(FightArgs),
    /// Keep the push channel open and react to garden events.
    Watch(WatchArgs),
    /// Register a leek for the automatic battle royale.
    Register(RegisterArgs),
}

#[derive(Args, Debug, Clone)]
struct AccountArgs {
    #[arg(long, env = "LEEKWARS_LOGIN")]
    login: String,
    #[arg(long, env = "LEEKWARS_PASSWORD", hide_env_values = true)]
    password: String,
    #[arg(long, env = "GARDENER_API_BASE", default_value = "https://leekwars.com/api")]
    api_base: String,
    #[arg(long, env = "GARDENER_WS_URL", default_value = "wss://leekwars.com/ws")]
    ws_url: String,
}

impl AccountArgs {
    fn credentials(&self) -> Credentials {
        Credentials {
            login: self.login.clone(),
            password: self.password.clone(),
        }
    }

    fn endpoints(&self) -> Endpoints {
        Endpoints {
            api_base: self.api_base.clone(),
            ws_url: self.ws_url.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
struct FightArgs {
    #[command(flatten)]
    account: AccountArgs,
    /// 1-based index into the farmer's leeks, ordered by id.
    #[arg(long, env = "GARDENER_LEEK", default_value_t = 1)]
    leek: usize,
    #[arg(long, env = "GARDENER_FIGHTS", default_value_t = 10)]
    fights: i64,
    #[arg(long, env = "GARDENER_MODE", default_value = "solo")]
    mode: FightMode,
    /// Rank equally-scored opponents by descending elo ceiling instead of
    /// ascending talent.
    #[arg(long, env = "GARDENER_MAX_ELO")]
    max_elo: bool,
    /// Rank and log candidates without starting any fight.
    #[arg(long)]
    dry_run: bool,
    #[arg(long, env = "GARDENER_COMPOSITION", default_value_t = 26078)]
    composition: i64,
    #[arg(long, env = "GARDENER_TEAM", default_value_t = 8876)]
    team: i64,
}

#[derive(Args, Debug, Clone)]
struct WatchArgs {
    #[command(flatten)]
    account: AccountArgs,
    #[arg(long, env = "GARDENER_DB", default_value = "garden.db")]
    db: PathBuf,
    #[arg(long, env = "GARDENER_BR_EVENT", default_value_t = DEFAULT_BR_EVENT_ID)]
    br_event: i64,
}

#[derive(Args, Debug, Clone)]
struct RegisterArgs {
    #[command(flatten)]
    account: AccountArgs,
    #[arg(long, env = "GARDENER_LEEK", default_value_t = 1)]
    leek: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _guard = observability::init_tracing("gardener");

    let cli = Cli::parse();
    match cli.command {
        Commands::Fight(args) => fight(args).await,
        Commands::Watch(args) => watch(args).await,
        Commands::Register(args) => register(args).await,
    }
}

async fn fight(args: FightArgs) -> Result<()> {
    let session = Session::login(args.account.endpoints(), args.account.credentials())
        .await
        .context("login")?;
    let options = RunOptions {
        leek: args.leek,
        fights: args.fights,
        mode: args.mode,
        max_elo: args.max_elo,
        dry_run: args.dry_run,
    };
    let team = TeamIds {
        composition: args.composition,
        team: args.team,
    };
    let mut client = ModeClient::new(session, options.mode, options.leek, team)?;

    run_rounds(&mut client, &options).await?;
    Ok(())
}

async fn watch(args: WatchArgs) -> Result<()> {
    let gate = JoinGate::open(&args.db).context("open join ledger")?;
    let mut channel = GardenChannel::new(
        args.account.endpoints(),
        args.account.credentials(),
        gate,
        ChannelConfig {
            br_event_id: args.br_event,
        },
    );
    channel.run().await
}

async fn register(args: RegisterArgs) -> Result<()> {
    let session = Session::login(args.account.endpoints(), args.account.credentials())
        .await
        .context("login")?;
    let leek_id = session
        .leek_at(args.leek)
        .with_context(|| format!("no leek at index {}", args.leek))?;

    let response = session.register_auto_br(leek_id).await?;
    tracing::info!(leek_id, %response, "battle royale registration");
    Ok(())
}
