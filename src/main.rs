use std::env;

use guild_warden::{Data, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    // Initialize logging
    logging::init()?;

    // Load environment variables
    let token = env::var("DISCORD_TOKEN").expect("DISCORD_TOKEN must be set");

    // Load persisted guild state so the sweep sees pre-restart timers
    let data = Data::load().await;

    // Configure the Poise framework
    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx);
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx);
                })
            },
            on_error: |framework_error| {
                Box::pin(async move {
                    logging::log_command_error(&framework_error);
                })
            },
            ..Default::default()
        })
        .setup({
            let data = data.clone();
            move |ctx, _ready, framework| {
                Box::pin(async move {
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                    // The sweep needs an HTTP client, which only exists once
                    // the gateway session is up
                    data.start_sweep(ctx.http.clone());
                    Ok(data)
                })
            }
        })
        .build();

    // Configure the Serenity client; member events feed the role cache
    let intents = GatewayIntents::non_privileged() | GatewayIntents::GUILD_MEMBERS;
    let mut client = serenity::ClientBuilder::new(token, intents)
        .event_handler(handlers::Handler)
        .framework(framework)
        .type_map_insert::<Data>(data.clone())
        .await
        .expect("Failed to create client");

    // On ctrl-c, stop the sweep first so its final persist pass runs, then
    // bring the gateway down
    {
        let data = data.clone();
        let shard_manager = client.shard_manager.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                data.request_sweep_shutdown().await;
                shard_manager.shutdown_all().await;
            }
        });
    }

    info!("Starting bot...");
    if let Err(err) = client.start().await {
        error!("Error starting the bot: {err}");
    }

    // Wait for the sweep's final persist before the process exits
    data.shutdown_sweep().await;

    Ok(())
}

fn main() {
    // Run the async main function
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async_main());

    // Handle any errors that occurred during execution
    if let Err(err) = result {
        eprintln!("Error: {err}");
    }
}
