//! testhub CLI - test run reporting.

use clap::Parser;
use std::path::Path;
use std::process;
use testhub::cancel::CancellationToken;
use testhub::cli::{
    Cli, Commands, ConfigCommands, PrefsCommands, ProjectCommands, RunCommands, UserCommands,
};
use testhub::commands::{self, ListOptions, Output};
use testhub::config::{ConfigOverrides, OutputFormat, ResolvedConfig, resolve_config};
use testhub::logging;
use testhub::storage::Storage;

fn main() {
    let cli = Cli::parse();
    let mut human = cli.human_readable;

    let mut overrides = ConfigOverrides::new();
    if let Some(ref path) = cli.config {
        overrides = overrides.with_config_path(path);
    }
    if let Some(ref path) = cli.database {
        overrides = overrides.with_database(path);
    }
    if human {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }

    let config = match resolve_config(&overrides) {
        Ok(config) => config,
        Err(e) => fail(&e, human),
    };
    human = config.output_format() == OutputFormat::Human;
    logging::init(config.log_format());
    tracing::debug!(
        commit = env!("TESTHUB_GIT_COMMIT"),
        database = %config.database().display(),
        "starting testhub"
    );

    if let Err(e) = run_command(cli.command, &config, human) {
        fail(&e, human);
    }
}

fn fail(e: &testhub::Error, human: bool) -> ! {
    if human {
        eprintln!("Error: {}", e);
    } else {
        eprintln!("{}", e.to_payload());
    }
    process::exit(1);
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

/// Open the database and route Ctrl+C to `cancel` and to the running statement.
fn open_storage(database: &Path, cancel: &CancellationToken) -> Result<Storage, testhub::Error> {
    let storage = Storage::open(database)?;
    let token = cancel.clone();
    let interrupt = storage.interrupt_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("interrupt received, cancelling");
        token.cancel();
        interrupt.interrupt();
    }) {
        tracing::warn!(error = %e, "could not install Ctrl+C handler");
    }
    Ok(storage)
}

fn run_command(
    command: Commands,
    config: &ResolvedConfig,
    human: bool,
) -> Result<(), testhub::Error> {
    let cancel = CancellationToken::new();

    match command {
        Commands::Init => {
            output(&commands::init(config.database())?, human);
        }

        Commands::Project { command } => {
            let mut storage = open_storage(config.database(), &cancel)?;
            match command {
                ProjectCommands::Create { name } => {
                    output(&commands::project_create(&mut storage, &name)?, human)
                }
                ProjectCommands::List => output(&commands::project_list(&storage)?, human),
                ProjectCommands::Delete { uuid } => {
                    output(&commands::project_delete(&mut storage, &uuid)?, human)
                }
            }
        }

        Commands::Run { command } => {
            let mut storage = open_storage(config.database(), &cancel)?;
            match command {
                RunCommands::Ingest { source } => {
                    output(&commands::run_ingest(&mut storage, &source, &cancel)?, human)
                }
                RunCommands::Show { id } => output(&commands::run_show(&storage, id)?, human),
                RunCommands::Status { id } => output(&commands::run_status(&storage, id)?, human),
                RunCommands::Summary { id, group_by } => output(
                    &commands::run_summary(&storage, id, &group_by, &config.group_by())?,
                    human,
                ),
                RunCommands::List {
                    first,
                    after,
                    order_by,
                    desc,
                    project,
                } => {
                    let options = ListOptions {
                        first,
                        after,
                        order_by,
                        desc,
                        project,
                    };
                    output(
                        &commands::run_list(&storage, &options, config.page_size(), &cancel)?,
                        human,
                    )
                }
                RunCommands::Delete { id } => {
                    output(&commands::run_delete(&mut storage, id)?, human)
                }
            }
        }

        Commands::Prefs { command } => {
            let mut storage = open_storage(config.database(), &cancel)?;
            match command {
                PrefsCommands::Show { cookie } => {
                    output(&commands::prefs_show(&storage, &cookie)?, human)
                }
                PrefsCommands::Set { cookie, source } => output(
                    &commands::prefs_set(&mut storage, &cookie, &source, &cancel)?,
                    human,
                ),
                PrefsCommands::Delete { cookie, group_ids } => output(
                    &commands::prefs_delete(&mut storage, &cookie, &group_ids, &cancel)?,
                    human,
                ),
                PrefsCommands::Favourite { cookie, uuid } => {
                    output(&commands::prefs_favourite(&mut storage, &cookie, &uuid)?, human)
                }
                PrefsCommands::Unfavourite { cookie, uuid } => output(
                    &commands::prefs_unfavourite(&mut storage, &cookie, &uuid)?,
                    human,
                ),
            }
        }

        Commands::User { command } => {
            let mut storage = open_storage(config.database(), &cancel)?;
            match command {
                UserCommands::Set {
                    cookie,
                    dark,
                    timezone,
                } => output(
                    &commands::user_set(&mut storage, &cookie, dark, timezone)?,
                    human,
                ),
            }
        }

        Commands::Backfill => {
            let mut storage = open_storage(config.database(), &cancel)?;
            output(
                &commands::backfill(&mut storage, config.backfill_batch_size(), &cancel)?,
                human,
            );
        }

        Commands::Config { command } => match command {
            ConfigCommands::Show => output(&commands::config_show(config), human),
        },
    }

    Ok(())
}
