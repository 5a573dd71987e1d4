use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "ticketmail", version, about = "Email to ticket sync connector")]
pub(crate) struct Cli {
    /// Settings file; defaults to ./ticketmail.toml then the XDG config dir.
    #[arg(short = 'c', long = "config", global = true)]
    pub(crate) config: Option<String>,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Run the interval scheduler that launches the workers.
    Schedule,
    /// Pull unseen messages from the inbound account into tickets.
    Receive,
    /// Deliver outbound emails in STATUS (default: queued).
    Send(StatusArg),
    /// Deliver notification emails in STATUS (default: queued).
    Notify(StatusArg),
    /// Email the operators about a failed worker.
    Alert(AlertArgs),
    /// Test the connection of an account and print the result as JSON.
    Check(CheckArgs),
}

#[derive(Args, Debug)]
pub(crate) struct StatusArg {
    #[arg(default_value = "queued")]
    pub(crate) status: String,
}

#[derive(Args, Debug)]
pub(crate) struct AlertArgs {
    pub(crate) kind: String,
    pub(crate) id: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct CheckArgs {
    #[arg(value_enum)]
    pub(crate) target: CheckTarget,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CheckTarget {
    Inbound,
    Outbound,
}
