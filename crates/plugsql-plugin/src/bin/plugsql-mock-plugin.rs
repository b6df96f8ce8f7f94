use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use plugsql_core::{TxnContext, Value};
use plugsql_plugin::{serve, serve_with_shutdown, DriverService, ServeConfig};
use plugsql_protocol::codec::{decode_args, encode_row};
use plugsql_protocol::{Endpoint, Request, Response};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Scriptable plugin used to exercise the host driver end to end.
#[derive(Debug, Parser)]
#[command(name = "plugsql-mock-plugin")]
struct Cli {
    /// Listen on a unix socket at this path instead of loopback TCP.
    #[arg(long)]
    unix: Option<PathBuf>,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Clone, Subcommand)]
enum Mode {
    /// Answers pings only; every statement fails.
    Pingable,
    /// Answers every exec with fixed counts.
    Execute {
        #[arg(long, default_value_t = 0)]
        last_insert_id: i64,
        #[arg(long, default_value_t = 0)]
        rows_affected: i64,
    },
    /// Answers every query with generated rows.
    Query {
        #[arg(long, value_delimiter = ',', default_value = "HELLO")]
        columns: Vec<String>,
        #[arg(long, default_value_t = 0)]
        total_rows: usize,
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
    /// Accepts statements but reports every commit as aborted.
    AbortOnCommit,
    /// Never completes the handshake.
    Hang {
        /// Write this process's pid here before stalling.
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },
    /// Answers pings but keeps running after SIGTERM.
    IgnoreTerm,
}

struct MockDriver {
    mode: Mode,
}

#[async_trait]
impl DriverService for MockDriver {
    async fn query(&self, request: Request) -> anyhow::Result<Response> {
        let args = decode_args(&request.args)?;
        debug!(
            query = %request.query,
            args = args.len(),
            returns_rows = request.returns_rows,
            in_txn = request.txn.is_some(),
            "statement"
        );
        let txn = request.txn.map(|mut ctx| {
            if ctx.start_ts == 0 {
                ctx.start_ts = request.start_ts as i64;
            }
            ctx
        });

        let response = match &self.mode {
            Mode::Pingable | Mode::Hang { .. } | Mode::IgnoreTerm => {
                bail!("this plugin only answers pings")
            }
            Mode::Execute {
                last_insert_id,
                rows_affected,
            } => {
                if request.returns_rows {
                    bail!("this plugin only runs exec statements");
                }
                Response::affected(*last_insert_id, *rows_affected)
            }
            Mode::Query {
                columns,
                total_rows,
                delay_ms,
            } => {
                if !request.returns_rows {
                    bail!("this plugin only runs queries");
                }
                if *delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(*delay_ms)).await;
                }
                let rows = (0..*total_rows)
                    .map(|i| {
                        let values: Vec<Value> = columns
                            .iter()
                            .map(|column| Value::String(format!("{column}-{i}")))
                            .collect();
                        encode_row(columns, &values)
                    })
                    .collect::<plugsql_core::Result<Vec<_>>>()?;
                Response::rows(columns.clone(), rows)
            }
            Mode::AbortOnCommit => {
                if request.returns_rows {
                    Response::rows(Vec::new(), Vec::new())
                } else {
                    Response::affected(0, 1)
                }
            }
        };
        Ok(response.with_txn(txn))
    }

    async fn commit_or_rollback(&self, mut ctx: TxnContext) -> anyhow::Result<TxnContext> {
        if matches!(self.mode, Mode::AbortOnCommit) || ctx.aborted {
            ctx.aborted = true;
            ctx.committed = false;
            info!(start_ts = ctx.start_ts, "transaction rolled back");
        } else {
            ctx.committed = true;
            ctx.commit_ts = Utc::now().timestamp_nanos_opt().unwrap_or_default();
            info!(start_ts = ctx.start_ts, commit_ts = ctx.commit_ts, "transaction committed");
        }
        Ok(ctx)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the handshake line
    let subscriber = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let endpoint = match cli.unix {
        Some(path) => Endpoint::Unix(path),
        None => Endpoint::Tcp(SocketAddr::from(([127, 0, 0, 1], 0))),
    };
    let config = ServeConfig {
        endpoint,
        ..ServeConfig::default()
    };
    match cli.mode {
        Mode::Hang { pid_file } => hang(pid_file).await,
        Mode::IgnoreTerm => {
            ignore_sigterm()?;
            let ctrl_c = async {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!("failed to listen for ctrl-c: {err}");
                    std::future::pending::<()>().await;
                }
            };
            serve_with_shutdown(config, MockDriver { mode: Mode::IgnoreTerm }, ctrl_c).await
        }
        mode => serve(config, MockDriver { mode }).await,
    }
}

async fn hang(pid_file: Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(path) = pid_file {
        std::fs::write(&path, std::process::id().to_string())?;
    }
    info!("stalling before handshake");
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

#[cfg(unix)]
fn ignore_sigterm() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    // registering the handler replaces the default terminate action
    let mut term = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        while term.recv().await.is_some() {
            warn!("ignoring SIGTERM");
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn ignore_sigterm() -> anyhow::Result<()> {
    Ok(())
}
