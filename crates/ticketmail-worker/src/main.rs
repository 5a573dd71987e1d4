mod alert_mod;
mod attachment_mod;
mod autoreply_mod;
mod check_mod;
mod cli;
mod dispatch_mod;
mod identity_mod;
mod logging_mod;
mod receive_mod;
mod roles_mod;
mod schedule_mod;
mod settings_mod;
mod thread_mod;

use anyhow::Result;
use clap::Parser;
use ticketmail_core::Store;

use crate::alert_mod::Alert;
use crate::cli::{Cli, CliCommand};
use crate::dispatch_mod::Profile;
use crate::logging_mod::init_logging;
use crate::schedule_mod::{ProcessLauncher, Scheduler};
use crate::settings_mod::{Settings, load_settings};

pub(crate) async fn open_store(settings: &Settings) -> Result<Store> {
    let store = Store::connect(&settings.database.url, settings.database.max_connections).await?;
    store.init().await?;
    Ok(store)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (settings, warnings) = match load_settings(cli.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            init_logging(false);
            tracing::error!(error = %format!("{:#}", err), "cannot load settings");
            std::process::exit(1);
        }
    };
    init_logging(settings.log.json);
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let config = cli.config.as_deref();
    let (from, outcome) = match cli.command {
        CliCommand::Schedule => {
            let scheduler = Scheduler::new(ProcessLauncher::new(config));
            return runtime.block_on(scheduler.run(&settings.schedule));
        }
        CliCommand::Check(args) => {
            return runtime.block_on(check_mod::check(&settings, args.target));
        }
        CliCommand::Receive => (
            "receiver",
            runtime.block_on(receive_mod::receive(&settings, config)),
        ),
        CliCommand::Send(arg) => (
            "sender",
            runtime.block_on(dispatch_mod::dispatch(
                &settings,
                config,
                Profile::Reply,
                &arg.status,
            )),
        ),
        CliCommand::Notify(arg) => (
            "sender-notification",
            runtime.block_on(dispatch_mod::dispatch(
                &settings,
                config,
                Profile::Notification,
                &arg.status,
            )),
        ),
        CliCommand::Alert(args) => {
            let alert = Alert {
                kind: args.kind,
                id: args.id,
            };
            (
                "sender-alert",
                runtime.block_on(alert_mod::alert(&settings, &alert)),
            )
        }
    };

    if let Err(err) = outcome {
        tracing::error!(from, error = %format!("{:#}", err), "worker stopped");
    }
    // Workers report through logs and row status; the exit code is always 1.
    std::process::exit(1);
}
