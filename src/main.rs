use std::process;

use gatehouse::{
    BackendError, ConfigurationError, Gatehouse, Identity,
    config::{self, CheckArgs, ExpireArgs, LoadError},
    telemetry::{self, TelemetryError},
};
use serde_json::json;
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] LoadError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("backend setup failed: {0}")]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let gatehouse = Gatehouse::from_settings(&settings)?;
    info!(backend = gatehouse.backend_name(), "Gatehouse ready");

    match cli_args.command {
        config::Command::Check(args) => run_check(&gatehouse, args).await,
        config::Command::Expire(args) => run_expire(&gatehouse, args).await,
        config::Command::Policies => run_policies(&gatehouse),
    }
}

async fn run_check(gatehouse: &Gatehouse, args: CheckArgs) -> Result<(), AppError> {
    let identity = match (args.ip, args.user) {
        (Some(addr), _) => Identity::Ip(addr),
        (None, Some(user)) => Identity::User(user),
        (None, None) => {
            return Err(ConfigurationError::invalid("identity", "pass --ip or --user").into());
        }
    };

    let decision = gatehouse.guard.check(&args.policy, &identity).await?;
    let output = json!({
        "policy": decision.policy.as_ref(),
        "identity": identity.to_string(),
        "allowed": decision.allowed,
        "retry_after_secs": decision.retry_after_secs(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_expire(gatehouse: &Gatehouse, args: ExpireArgs) -> Result<(), AppError> {
    let count = args.keys.len();
    gatehouse.cache.expire_many(&args.keys).await;
    info!(count, "Expired cache keys");
    Ok(())
}

fn run_policies(gatehouse: &Gatehouse) -> Result<(), AppError> {
    let table: serde_json::Map<String, serde_json::Value> = gatehouse
        .guard
        .policies()
        .map(|(name, policy)| Ok((name.to_string(), serde_json::to_value(policy)?)))
        .collect::<Result<_, serde_json::Error>>()?;
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}
