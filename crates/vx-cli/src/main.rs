use std::io::{self, IsTerminal};

use clap::Parser;
use color_eyre::Result;
use serde_json::{json, Value};
use vx_core::{
    diagnostics, CacheCleanRequest, CacheFindRequest, CacheListRequest, CacheRemoveRequest,
    CacheStoreRequest, CommandStatus, Config, ExecutionOutcome,
};

mod cli;
mod style;

use cli::{CacheSubcommand, CommandGroupCli, VxCli};
use style::Style;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = VxCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let CommandGroupCli::Cache(args) = &cli.command;
    let name = command_name(&args.command);
    let outcome = match Config::from_env() {
        Ok(config) => dispatch(&config, &args.command).unwrap_or_else(|err| {
            tracing::debug!(command = name, error = ?err, "command failed");
            ExecutionOutcome::failure(
                format!("{err:#}"),
                json!({ "code": command_code(&args.command), "reason": "command_failed" }),
            )
        }),
        Err(err) => ExecutionOutcome::user_error(
            format!("{err:#}"),
            json!({ "code": diagnostics::commands::GENERIC, "reason": "invalid_config" }),
        ),
    };
    let code = emit_output(&cli, name, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("vx_core={level},vx_domain={level},vx={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn dispatch(config: &Config, command: &CacheSubcommand) -> anyhow::Result<ExecutionOutcome> {
    match command {
        CacheSubcommand::Find(args) => vx_core::cache_find(
            config,
            CacheFindRequest {
                uuid: args.uuid.clone(),
                requirements: args.requirements.clone(),
                interpreter: args.interpreter.clone(),
                options: args.options.clone(),
                live: args.live,
            },
        ),
        CacheSubcommand::List => vx_core::cache_list(config, CacheListRequest),
        CacheSubcommand::Store(args) => vx_core::cache_store(
            config,
            CacheStoreRequest {
                installed: args.installed.clone(),
                env_path: args.env_path.clone(),
                env_bin_path: args.env_bin_path.clone(),
                pip_installed: args.pip_installed,
                interpreter: args.interpreter.clone(),
                options: args.options.clone(),
            },
        ),
        CacheSubcommand::Remove(args) => vx_core::cache_remove(
            config,
            CacheRemoveRequest {
                env_path: args.env_path.clone(),
            },
        ),
        CacheSubcommand::Clean(args) => vx_core::cache_clean(
            config,
            CacheCleanRequest {
                max_days: args.max_days,
            },
        ),
    }
}

fn command_name(command: &CacheSubcommand) -> &'static str {
    match command {
        CacheSubcommand::Find(_) => "find",
        CacheSubcommand::List => "list",
        CacheSubcommand::Store(_) => "store",
        CacheSubcommand::Remove(_) => "remove",
        CacheSubcommand::Clean(_) => "clean",
    }
}

fn command_code(command: &CacheSubcommand) -> &'static str {
    match command {
        CacheSubcommand::Find(_) => diagnostics::commands::FIND,
        CacheSubcommand::List => diagnostics::commands::LIST,
        CacheSubcommand::Store(_) => diagnostics::commands::STORE,
        CacheSubcommand::Remove(_) => diagnostics::commands::REMOVE,
        CacheSubcommand::Clean(_) => diagnostics::commands::CLEAN,
    }
}

fn emit_output(cli: &VxCli, command: &str, outcome: &ExecutionOutcome) -> Result<i32> {
    let code = outcome.exit_code();

    if cli.json {
        let payload = vx_core::to_json_response(command, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    let style = Style::new(cli.no_color, io::stdout().is_terminal());
    let message = vx_core::format_status_message(command, &outcome.message);
    match outcome.status {
        CommandStatus::Ok if cli.quiet => {}
        CommandStatus::Ok => println!("{}", style.status(outcome.status, &message)),
        _ => eprintln!("{}", style.status(outcome.status, &message)),
    }
    if !cli.quiet {
        if let Some(hint) = hint_from_details(&outcome.details) {
            println!("{}", style.info(&format!("Hint: {hint}")));
        }
    }

    Ok(code)
}

fn hint_from_details(details: &Value) -> Option<&str> {
    details
        .as_object()
        .and_then(|map| map.get("hint"))
        .and_then(Value::as_str)
}
