//! Logging setup and poise command-lifecycle hooks.
//!
//! Console output stays human-readable; a daily-rolling JSON file keeps the
//! structured record (commands, sweep activity, errors) for operators.

use crate::{COMMAND_TARGET, Context, Data, ERROR_TARGET, Error};
use poise::FrameworkError;
use std::path::Path;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log directory name
pub const LOG_DIR: &str = "logs";
/// Rolling log file name prefix
pub const LOG_FILE: &str = "guild-warden";

/// Initialize the logging system with console and file outputs.
///
/// # Errors
/// Returns an error if the log directory cannot be created.
pub fn init() -> Result<(), Error> {
    if !Path::new(LOG_DIR).exists() {
        std::fs::create_dir_all(LOG_DIR)?;
    }

    let log_file = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, LOG_FILE);

    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    let file_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(log_file);

    // Default to INFO, quiet the serenity internals, allow overrides via
    // RUST_LOG at runtime
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info").add_directive("serenity=error".parse().expect("valid directive"))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging system initialized");
    Ok(())
}

fn invocation_ids(ctx: &Context<'_>) -> (String, String) {
    let guild_id = ctx
        .guild_id()
        .map_or_else(|| "DM".to_string(), |id| id.get().to_string());
    let user_id = ctx.author().id.get().to_string();
    (guild_id, user_id)
}

/// Log the start of a command execution (pre-command hook)
pub fn log_command_start(ctx: Context<'_>) {
    let (guild_id, user_id) = invocation_ids(&ctx);
    info!(
        target: COMMAND_TARGET,
        command = %ctx.command().qualified_name,
        guild_id = %guild_id,
        user_id = %user_id,
        invocation = %ctx.invocation_string(),
        event = "start",
        "Command execution started"
    );
}

/// Log the end of a command execution (post-command hook)
pub fn log_command_end(ctx: Context<'_>) {
    let (guild_id, user_id) = invocation_ids(&ctx);
    info!(
        target: COMMAND_TARGET,
        command = %ctx.command().qualified_name,
        guild_id = %guild_id,
        user_id = %user_id,
        event = "end",
        "Command execution completed"
    );
}

/// Log errors that occur during command execution
pub fn log_command_error(framework_error: &FrameworkError<'_, Data, Error>) {
    match framework_error {
        FrameworkError::Command { error, ctx, .. } => {
            let (guild_id, user_id) = invocation_ids(ctx);
            error!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %error,
                "Command error"
            );
        }
        FrameworkError::CommandCheckFailed { error, ctx, .. } => {
            let (guild_id, user_id) = invocation_ids(ctx);
            let message = error
                .as_ref()
                .map_or_else(|| "Check failed".to_string(), ToString::to_string);
            error!(
                target: ERROR_TARGET,
                command = %ctx.command().qualified_name,
                guild_id = %guild_id,
                user_id = %user_id,
                error = %message,
                "Command check failed"
            );
        }
        other => {
            error!(
                target: ERROR_TARGET,
                error = ?other,
                "Framework error"
            );
        }
    }
}
