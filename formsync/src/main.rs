use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

mod api;
mod config;

use api::AppState;
use brevo::cache::AttributeCache;
use brevo::submit::SubmitContext;
use migration::store::{FsRecordStore, FsTransientStore};
use migration::{MigrationError, MigrationRunner};

#[derive(Parser)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "formsync.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run the submit/status HTTP service.
    Serve,
    /// Check the stored schema version and run any pending migration.
    Migrate,
    /// List the attribute definitions visible to the global API key.
    Attributes,
    /// Drop every cached attribute entry.
    ClearCache,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = config::Config::from_file(&cli.config)?;

    let cache = Arc::new(AttributeCache::new(&config.brevo.base_url));
    let runner = Arc::new(MigrationRunner::new(
        Arc::new(FsTransientStore::open(&config.state_file)?),
        Arc::new(FsRecordStore::new(&config.records.path)),
        cache.clone(),
        &config.brevo.global_api_key,
    ));

    match cli.command {
        CliCommand::Serve => {
            let state = Arc::new(AppState {
                cache,
                runner,
                submit_ctx: SubmitContext {
                    base_url: config.brevo.base_url.clone(),
                    global_api_key: config.brevo.global_api_key.clone(),
                    default_redirect_url: config.brevo.default_redirect_url.clone(),
                },
                admin_key: config.admin_key.clone(),
            });
            api::serve(config.listener, state).await?;
        }
        CliCommand::Migrate => {
            runner.check_version()?;
            match runner.run_deferred().await {
                Ok(Some(report)) => {
                    println!(
                        "migrated {} of {} records",
                        report.modified, report.processed
                    );
                    let unresolved = report.unresolved_set();
                    if !unresolved.is_empty() {
                        println!(
                            "attributes not found in the account: {}",
                            unresolved.into_iter().collect::<Vec<_>>().join(", ")
                        );
                    }
                }
                Ok(None) => println!("nothing to migrate"),
                Err(MigrationError::LockContention) => {
                    println!("a migration is already running");
                }
                Err(err) => return Err(err.into()),
            }
        }
        CliCommand::Attributes => {
            let attributes = cache.get_attributes(&config.brevo.global_api_key).await;
            if attributes.is_empty() {
                println!("no attributes available (missing key or fetch failure)");
            }
            for definition in attributes.values() {
                println!("{}\t{:?}", definition.name, definition.kind);
            }
        }
        CliCommand::ClearCache => {
            cache.clear(None);
            println!("attribute cache cleared");
        }
    }

    Ok(())
}
