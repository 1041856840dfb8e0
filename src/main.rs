//! tasktide CLI - a realtime task tracker with start/stop work timers.

use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tasktide::cli::{Cli, Commands, CommentCommands, ConfigCommands, TaskCommands, UserCommands};
use tasktide::commands::{self, CommandResult, Services};
use tasktide::config::{ConfigOverrides, ResolvedConfig, resolve_config};
use tasktide::query::FieldRegistry;
use tasktide::realtime::client::RealtimeClient;
use tasktide::store::PocketBase;

const LOG_ENV: &str = "TASKTIDE_LOG";
const LOG_FORMAT_ENV: &str = "TASKTIDE_LOG_FORMAT";
const DEFAULT_LOG_FILTER: &str = "tasktide=info,warn";

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let human = cli.human_readable;

    if let Err(e) = run(cli).await {
        if human {
            eprintln!("Error: {}", e);
        } else {
            eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
        }
        process::exit(1);
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);

    match std::env::var(LOG_FORMAT_ENV).as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.compact().init(),
    }
}

async fn run(cli: Cli) -> Result<(), tasktide::Error> {
    FieldRegistry::validate_builtin()?;

    let human = cli.human_readable;
    let mut overrides = ConfigOverrides::new();
    if let Some(ref url) = cli.url {
        overrides = overrides.with_server_url(url.clone());
    }
    let config = resolve_config(cli.config.as_deref(), &overrides)?;

    match cli.command {
        Commands::Config {
            command: ConfigCommands::Show,
        } => output(&commands::config_show(&config), human),

        Commands::Demo => output(&commands::demo(config.tick_interval()).await?, human),

        Commands::Task { command } => {
            let (pb, services) = connect(&cli.identity, &cli.password, config).await?;
            run_task_command(command, &pb, &services, human).await?;
        }

        Commands::Comment { command } => {
            let (_, services) = connect(&cli.identity, &cli.password, config).await?;
            match command {
                CommentCommands::List { task_id } => {
                    output(&commands::comment_list(&services, &task_id).await?, human)
                }
                CommentCommands::Add { task_id, content } => output(
                    &commands::comment_add(&services, &task_id, &content).await?,
                    human,
                ),
            }
        }

        Commands::User {
            command: UserCommands::List { role },
        } => {
            let (_, services) = connect(&cli.identity, &cli.password, config).await?;
            output(&commands::user_list(&services, role.as_deref()).await?, human);
        }
    }

    Ok(())
}

/// Build the server client and sign in when credentials were given.
async fn connect(
    identity: &Option<String>,
    password: &Option<String>,
    config: ResolvedConfig,
) -> Result<(PocketBase, Services), tasktide::Error> {
    let pb = PocketBase::new(config.server_url())?;
    let user = match (identity.as_deref(), password.as_deref()) {
        (Some(identity), Some(password)) => Some(pb.authenticate(identity, password).await?),
        (None, None) => None,
        _ => {
            return Err(tasktide::Error::InvalidInput(
                "--identity and --password must be given together".to_string(),
            ));
        }
    };
    let services = Services::new(Arc::new(pb.clone()), config).with_user(user);
    Ok((pb, services))
}

async fn run_task_command(
    command: TaskCommands,
    pb: &PocketBase,
    services: &Services,
    human: bool,
) -> Result<(), tasktide::Error> {
    match command {
        TaskCommands::List {
            filter,
            page,
            page_size,
        } => output(
            &commands::task_list(services, &filter, page, page_size).await?,
            human,
        ),

        TaskCommands::Show { id } => output(&commands::task_show(services, &id).await?, human),

        TaskCommands::Toggle { id, verify } => {
            output(&commands::task_toggle(services, &id, verify).await?, human)
        }

        TaskCommands::Update { id, fields } => {
            output(&commands::task_update(services, &id, &fields).await?, human)
        }

        TaskCommands::Watch { filter, page_size } => {
            let client = Arc::new(RealtimeClient::new(pb.http(), pb.base_url(), pb.session()));
            let realtime = client.spawn();
            let result = commands::task_watch(
                services,
                client.clone(),
                Some(client.state()),
                &filter,
                page_size,
                async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                },
                |update| output(update, human),
            )
            .await;
            realtime.shutdown();
            result?;
        }

        TaskCommands::Delete { ids } => {
            output(&commands::task_delete(services, &ids).await?, human)
        }
    }
    Ok(())
}

/// Print output in JSON or human-readable format.
fn output<T: CommandResult + ?Sized>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
