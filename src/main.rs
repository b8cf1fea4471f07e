use std::collections::HashSet;
use std::env;
use std::sync::Arc;

use guild_sentinel::config::BotConfig;
use guild_sentinel::handlers::Handler;
use guild_sentinel::platform::{Platform, SerenityPlatform};
use guild_sentinel::storage::Database;
use guild_sentinel::{BOT_NAME, CONSOLE_TARGET, Data, Engine, Error, commands, logging};
use poise::serenity_prelude::{self as serenity, Http, UserId};
use serenity::GatewayIntents;
use tracing::{error, info, warn};

/// Bot owners from the config plus the owner of the application
async fn owners(http: &Http, config: &BotConfig) -> HashSet<UserId> {
    let mut owners: HashSet<UserId> = config
        .owner_ids
        .iter()
        .copied()
        .filter(|id| *id != 0)
        .map(UserId::new)
        .collect();
    match http.get_current_application_info().await {
        Ok(info) => owners.extend(info.owner.map(|owner| owner.id)),
        Err(e) => warn!(target: CONSOLE_TARGET, "Could not fetch the application owner: {e}"),
    }
    owners
}

/// Save dirty tables on every autosave tick
fn spawn_autosave(data: Data) -> tokio::task::JoinHandle<()> {
    let period = data.config.autosave();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            interval.tick().await;
            if let Err(e) = data.save().await {
                error!(target: CONSOLE_TARGET, "Autosave failed: {e}");
            }
        }
    })
}

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    logging::init()?;

    let config = BotConfig::from_env().await;
    let token = env::var("DISCORD_TOKEN").map_err(|_| "DISCORD_TOKEN must be set")?;
    let db = Database::load(config.data_dir.clone()).await?;
    let data = Data::new(config.clone(), db.clone());

    let setup_data = data.clone();
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            pre_command: |ctx| Box::pin(logging::log_command_start(ctx)),
            post_command: |ctx| Box::pin(logging::log_command_end(ctx)),
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                    // Tell the user what went wrong
                    if let Err(e) = poise::builtins::on_error(error).await {
                        warn!(target: CONSOLE_TARGET, "Error while handling error: {e}");
                    }
                })
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands".to_string());
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                Ok(setup_data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MODERATION
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .event_handler(Handler::new(data.clone()))
        .framework(framework)
        .await?;

    let platform: Arc<dyn Platform> = Arc::new(SerenityPlatform::new(
        Arc::clone(&client.http),
        Arc::clone(&client.cache),
    ));
    let owners = owners(&client.http, &config).await;
    let (engine, sweeps) = Engine::new(platform, db, config, owners);
    data.install_engine(engine.clone());
    let mut tasks = engine.start(sweeps);
    tasks.push(spawn_autosave(data.clone()));

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(target: CONSOLE_TARGET, "Could not listen for ctrl-c: {e}");
            return;
        }
        info!(target: CONSOLE_TARGET, "Shutting down");
        shard_manager.shutdown_all().await;
    });

    info!(target: CONSOLE_TARGET, "Starting {BOT_NAME}...");
    let result = client.start().await;

    shutdown(&engine, &data, tasks).await;
    result?;
    Ok(())
}

async fn shutdown(engine: &Engine, data: &Data, tasks: Vec<tokio::task::JoinHandle<()>>) {
    engine.shutdown();
    for task in tasks {
        task.abort();
    }
    match data.save().await {
        Ok(()) => info!(target: CONSOLE_TARGET, "Data saved"),
        Err(e) => error!(target: CONSOLE_TARGET, "Failed to save data: {e}"),
    }
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error building the runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
