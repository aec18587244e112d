//! CLI for reading and writing a table

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::{pin_mut, StreamExt};
use pegasus_client::common::{parse_duration, CONFIG_ENV};
use pegasus_client::{ClientConfig, Error, Filter, PegasusClient, ScanOptions};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pegasus-cli")]
#[command(about = "Command line client for Pegasus-style key-value tables")]
#[command(version)]
struct Cli {
    /// Meta server addresses (comma separated)
    #[arg(long, value_delimiter = ',')]
    meta: Vec<String>,

    /// Table name
    #[arg(long)]
    table: Option<String>,

    /// Config file (TOML); defaults to $PEGASUS_CLIENT_CONFIG when set
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Per-operation timeout (e.g. "500ms", "2s")
    #[arg(long, value_parser = parse_timeout)]
    timeout: Option<Duration>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value
    Set {
        hash_key: String,
        sort_key: String,
        value: String,

        /// Expire after this many seconds (0 = never)
        #[arg(long, default_value = "0")]
        ttl: u32,
    },

    /// Print a value
    Get { hash_key: String, sort_key: String },

    /// Delete a record
    Del { hash_key: String, sort_key: String },

    /// Check whether a record exists (prints true/false, exits 0 either way)
    Exist { hash_key: String, sort_key: String },

    /// Print remaining TTL in seconds (-1 = no expiry)
    Ttl { hash_key: String, sort_key: String },

    /// Count sort keys under a hash key
    Count { hash_key: String },

    /// List sort keys under a hash key
    SortKeys { hash_key: String },

    /// Scan the sort keys of one hash key in order
    Scan {
        hash_key: String,

        /// First sort key (inclusive)
        #[arg(long, default_value = "")]
        start: String,

        /// Last sort key (exclusive)
        #[arg(long, default_value = "")]
        stop: String,

        /// Only keep sort keys with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Print keys only
        #[arg(long)]
        no_value: bool,

        /// Stop after this many records
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Scan the whole table
    ScanAll {
        /// Number of unordered scanners to run in parallel
        #[arg(long, default_value = "1")]
        split: usize,

        /// Print keys only
        #[arg(long)]
        no_value: bool,
    },
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(Into::into));

    let mut config = match path {
        Some(path) => ClientConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ClientConfig::default(),
    };

    // Flags win over the config file
    if !cli.meta.is_empty() {
        config.meta_servers = cli.meta.clone();
    }
    if let Some(table) = &cli.table {
        config.table = table.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.operation_timeout_ms = u64::try_from(timeout.as_millis())
            .map_err(|_| anyhow::anyhow!("--timeout {:?} is too large", timeout))?;
    }
    Ok(config)
}

fn show(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let client = PegasusClient::connect(config)
        .await
        .context("connecting to cluster")?;

    let result = run(&client, cli.command).await;
    client.close().await;
    result
}

async fn run(client: &PegasusClient, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Set {
            hash_key,
            sort_key,
            value,
            ttl,
        } => {
            client
                .set_with_ttl(hash_key.as_bytes(), sort_key.as_bytes(), value.as_bytes(), ttl)
                .await?;
            println!("OK");
        }

        Commands::Get { hash_key, sort_key } => {
            let value = client
                .get(hash_key.as_bytes(), sort_key.as_bytes())
                .await
                .with_context(|| format!("get {} : {}", hash_key, sort_key))?;
            println!("{}", show(&value));
        }

        Commands::Del { hash_key, sort_key } => {
            client.remove(hash_key.as_bytes(), sort_key.as_bytes()).await?;
            println!("OK");
        }

        Commands::Exist { hash_key, sort_key } => {
            match client.exist(hash_key.as_bytes(), sort_key.as_bytes()).await {
                Ok(()) => println!("true"),
                Err(Error::DataNotExist) => println!("false"),
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Ttl { hash_key, sort_key } => {
            let ttl = client
                .ttl(hash_key.as_bytes(), sort_key.as_bytes())
                .await
                .with_context(|| format!("ttl {} : {}", hash_key, sort_key))?;
            println!("{}", ttl);
        }

        Commands::Count { hash_key } => {
            println!("{}", client.sort_key_count(hash_key.as_bytes()).await?);
        }

        Commands::SortKeys { hash_key } => {
            for sort_key in client.get_sort_keys(hash_key.as_bytes()).await? {
                println!("{}", show(&sort_key));
            }
        }

        Commands::Scan {
            hash_key,
            start,
            stop,
            prefix,
            no_value,
            limit,
        } => {
            let options = ScanOptions {
                no_value,
                sort_key_filter: prefix.map(Filter::prefix).unwrap_or_default(),
                ..Default::default()
            };
            let mut scanner = client.get_scanner(
                hash_key.as_bytes(),
                start.as_bytes(),
                stop.as_bytes(),
                options,
            )?;

            let limit = limit.unwrap_or(usize::MAX);
            let mut printed = 0;
            let outcome = async {
                while printed < limit {
                    let Some(item) = scanner.get_next().await? else {
                        break;
                    };
                    if no_value {
                        println!("{}", show(&item.sort_key));
                    } else {
                        println!("{} => {}", show(&item.sort_key), show(&item.value));
                    }
                    printed += 1;
                }
                anyhow::Ok(())
            }
            .await;
            scanner.close().await;
            outcome?;
            eprintln!("{} records", printed);
        }

        Commands::ScanAll { split, no_value } => {
            let options = ScanOptions {
                no_value,
                ..Default::default()
            };
            let scanners = client.get_unordered_scanners(split, options)?;

            let mut tasks = Vec::with_capacity(scanners.len());
            for scanner in scanners {
                tasks.push(tokio::spawn(async move {
                    let stream = scanner.into_stream();
                    pin_mut!(stream);
                    let mut count = 0usize;
                    while let Some(item) = stream.next().await {
                        let item = item?;
                        if no_value {
                            println!("{} : {}", show(&item.hash_key), show(&item.sort_key));
                        } else {
                            println!(
                                "{} : {} => {}",
                                show(&item.hash_key),
                                show(&item.sort_key),
                                show(&item.value)
                            );
                        }
                        count += 1;
                    }
                    Ok::<_, Error>(count)
                }));
            }

            let mut total = 0;
            for task in tasks {
                total += task.await??;
            }
            eprintln!("{} records", total);
        }
    }

    Ok(())
}
