mod commands;
mod config;

use clap::{Parser, Subcommand};
use commands::{App, PutArgs, ResponseReport};
use config::Config;
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "nasobj")]
#[command(about = "Object placement and storage on a shared filesystem")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "nasobj.yaml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the partition, devices and placement path for a name
    Nodes {
        account: String,
        container: Option<String>,
        object: Option<String>,
    },
    /// Store an object from a file, or stdin with `-`
    Put {
        account: String,
        container: String,
        object: String,
        #[arg(long, default_value = "-")]
        file: String,
        #[arg(long, default_value = nasobj_core::DEFAULT_CONTENT_TYPE)]
        content_type: String,
        /// Expected MD5 of the body
        #[arg(long)]
        etag: Option<String>,
        /// Unix time after which the object expires
        #[arg(long)]
        delete_at: Option<u64>,
        /// Extra metadata as `Name: value`; repeatable
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// Write an object's body to a file, or stdout
    Get {
        account: String,
        container: String,
        object: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print an object's metadata
    Head {
        account: String,
        container: String,
        object: String,
    },
    Delete {
        account: String,
        container: String,
        object: String,
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// Schedule an expiry marker for an object
    Expire {
        account: String,
        container: String,
        object: String,
        #[arg(long)]
        at: u64,
    },
    /// Dump the metadata stored on a path of the share
    PrintMetadata { path: PathBuf },
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(error) => tracing::error!("Failed to render output: {}", error),
    }
}

fn finish(report: ResponseReport) {
    let status = report.status;
    print_json(&report);
    if !(200..300).contains(&status) {
        std::process::exit(1);
    }
}

fn load_app(path: &str) -> App {
    let cfg = match Config::from_file(path) {
        Ok(c) => c,
        Err(error) => {
            tracing::error!("Failed to load config: {}", error);
            std::process::exit(1);
        }
    };

    match App::from_config(cfg) {
        Ok(app) => app,
        Err(error) => {
            tracing::error!("Failed to load rings: {}", error);
            std::process::exit(1);
        }
    }
}

fn fail(error: nasobj_core::NasError) -> ! {
    tracing::error!("{}", error);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nasobj=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::PrintMetadata { path } => match commands::print_metadata(&path) {
            Ok(metadata) => print_json(&metadata),
            Err(error) => fail(error),
        },
        Commands::Nodes {
            account,
            container,
            object,
        } => {
            let app = load_app(&cli.config);
            match app.nodes(&account, container.as_deref(), object.as_deref()) {
                Ok(report) => print_json(&report),
                Err(error) => fail(error),
            }
        }
        Commands::Put {
            account,
            container,
            object,
            file,
            content_type,
            etag,
            delete_at,
            headers,
            timestamp,
        } => {
            let app = load_app(&cli.config);
            let args = PutArgs {
                account,
                container,
                object,
                source: file,
                content_type,
                etag,
                delete_at,
                headers,
                timestamp,
            };
            match app.put(args).await {
                Ok(report) => finish(report),
                Err(error) => fail(error),
            }
        }
        Commands::Get {
            account,
            container,
            object,
            output,
        } => {
            let app = load_app(&cli.config);
            let result = match output {
                Some(path) => match tokio::fs::File::create(&path).await {
                    Ok(mut file) => app.get(&account, &container, &object, &mut file).await,
                    Err(error) => Err(error.into()),
                },
                None => {
                    let mut stdout = tokio::io::stdout();
                    app.get(&account, &container, &object, &mut stdout).await
                }
            };
            match result {
                Ok(report) if report.status == 200 => {
                    tracing::info!("Fetched {}/{}/{}", account, container, object);
                }
                Ok(report) => finish(report),
                Err(error) => fail(error),
            }
        }
        Commands::Head {
            account,
            container,
            object,
        } => {
            let app = load_app(&cli.config);
            finish(app.head(&account, &container, &object).await);
        }
        Commands::Delete {
            account,
            container,
            object,
            timestamp,
        } => {
            let app = load_app(&cli.config);
            match app
                .delete(&account, &container, &object, timestamp.as_deref())
                .await
            {
                Ok(report) => finish(report),
                Err(error) => fail(error),
            }
        }
        Commands::Expire {
            account,
            container,
            object,
            at,
        } => {
            let app = load_app(&cli.config);
            match app.expire(&account, &container, &object, at).await {
                Ok(report) => finish(report),
                Err(error) => fail(error),
            }
        }
    }
}
