use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Reuse Python environments across projects")]
pub struct VxCli {
    #[arg(short, long, help = "Suppress human output (errors still print to stderr)", global = true)]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(long, help = "Emit {status,message,details} JSON envelopes", global = true)]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(about = "Inspect and maintain the environment index")]
    Cache(CacheArgs),
}

#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheSubcommand {
    #[command(about = "Look up an indexed environment by uuid or by requirements")]
    Find(FindArgs),
    #[command(about = "List every indexed environment")]
    List,
    #[command(about = "Index an environment that was just built")]
    Store(StoreArgs),
    #[command(about = "Drop an environment from the index")]
    Remove(RemoveArgs),
    #[command(about = "Destroy environments unused for too long")]
    Clean(CleanArgs),
}

#[derive(Args, Debug)]
pub struct FindArgs {
    #[arg(long, help = "Match the trailing segment of the environment path", conflicts_with = "requirements")]
    pub uuid: Option<String>,
    #[arg(
        value_name = "REQUIREMENT",
        help = "PEP 508 requirement, optionally prefixed with a source (`pypi::`, `vcs::`)"
    )]
    pub requirements: Vec<String>,
    #[arg(long, default_value = "", help = "Interpreter identity the environment was built with")]
    pub interpreter: String,
    #[arg(long = "option", value_name = "GROUP=FLAG", help = "Build option the environment must carry")]
    pub options: Vec<String>,
    #[arg(long, help = "Treat entries whose directory vanished as misses and drop them")]
    pub live: bool,
}

#[derive(Args, Debug)]
pub struct StoreArgs {
    #[arg(long, value_name = "PATH")]
    pub env_path: String,
    #[arg(long, value_name = "PATH", help = "Defaults to <env-path>/bin")]
    pub env_bin_path: Option<String>,
    #[arg(long, help = "Record that pip is available inside the environment")]
    pub pip_installed: bool,
    #[arg(
        long = "installed",
        value_name = "NAME==VERSION",
        help = "Installed distribution (`vcs::URL` for direct references)"
    )]
    pub installed: Vec<String>,
    #[arg(long, default_value = "")]
    pub interpreter: String,
    #[arg(long = "option", value_name = "GROUP=FLAG")]
    pub options: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RemoveArgs {
    #[arg(value_name = "ENV_PATH")]
    pub env_path: String,
}

#[derive(Args, Debug)]
pub struct CleanArgs {
    #[arg(long, value_name = "DAYS", help = "Retention window (defaults to VX_RETENTION_DAYS or 30)")]
    pub max_days: Option<u32>,
}
