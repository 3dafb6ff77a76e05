mod cli;
mod handlers;

use std::sync::Arc;

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network};
use clap::Parser;
use eyre::{eyre, WrapErr};

use nodewatch_core::config::{default_cert_path, load_certificates};
use nodewatch_core::{Client, ConnectionConfig, CoreError, ReconnectPolicy, TxFilter};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let filter_addrs = parse_filter_addresses(&args.filter_addrs, args.network)?;
    let config = build_config(&args)?;

    let client = Client::start(config, Arc::new(handlers::LoggingHandlers))
        .await
        .map_err(|err| {
            eyre!(format_connect_error(&args.host, &err))
                .wrap_err("while attempting to connect to the node's websocket")
        })?;

    if !filter_addrs.is_empty() {
        tracing::info!(addresses = filter_addrs.len(), "loading transaction filter");
        client
            .load_tx_filter(TxFilter::new(filter_addrs, Vec::new()))
            .await
            .context("load transaction filter")?;
    }
    client.notify_blocks().await.context("subscribe to blocks")?;
    client
        .notify_new_transactions(args.verbose_tx)
        .await
        .context("subscribe to new transactions")?;

    tracing::info!(after = ?args.shutdown_after, "client will shut down automatically");
    let stopper = client.clone();
    let shutdown_after = args.shutdown_after;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(shutdown_after) => {
                tracing::info!("shutdown timer elapsed");
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "could not listen for Ctrl+C");
                } else {
                    tracing::info!("received Ctrl+C");
                }
            }
            _ = stopper.wait_for_shutdown() => return,
        }
        tracing::info!("client shutting down");
        stopper.shutdown().await;
        tracing::info!("client shutdown complete");
    });

    client.wait_for_shutdown().await;
    Ok(())
}

fn build_config(args: &cli::Cli) -> eyre::Result<ConnectionConfig> {
    let mut builder = ConnectionConfig::builder(&args.host)
        .endpoint(&args.endpoint)
        .user(args.rpc_user.clone())
        .pass(args.rpc_pass.clone())
        .disable_tls(args.no_tls);

    if args.no_reconnect {
        builder = builder.reconnect(ReconnectPolicy::disabled());
    }

    if !args.no_tls {
        let cert_path = match &args.rpc_cert {
            Some(path) => Some(path.clone()),
            None => default_cert_path(),
        };
        match cert_path {
            Some(path) if path.exists() || args.rpc_cert.is_some() => {
                let pem = load_certificates(&path)
                    .with_context(|| format!("read node certificate {}", path.display()))?;
                tracing::info!(path = %path.display(), "using node certificate");
                builder = builder.certificates(pem);
            }
            _ => tracing::warn!("no node certificate found; relying on system trust roots"),
        }
    }

    builder.build().context("build connection config")
}

fn parse_filter_addresses(raw: &[String], network: Network) -> eyre::Result<Vec<Address>> {
    raw.iter()
        .map(|s| {
            let unchecked: Address<NetworkUnchecked> = s
                .parse()
                .with_context(|| format!("invalid filter address `{s}`"))?;
            let checked = unchecked
                .require_network(network)
                .with_context(|| format!("filter address `{s}` is not valid on {network}"))?;
            tracing::info!(address = %checked, "watching address");
            Ok(checked)
        })
        .collect()
}

fn format_connect_error(host: &str, err: &CoreError) -> String {
    use nodewatch_core::ConnectError;

    let mut lines = vec![
        format!("could not connect to node at `{host}`"),
        format!("error: {err}"),
    ];

    match err {
        CoreError::Connect(ConnectError::AuthRejected { .. }) => lines.push(
            "hint: authentication failed; verify --rpc-user/--rpc-pass match btcd's rpcuser/rpcpass"
                .into(),
        ),
        CoreError::Connect(ConnectError::CertInvalid(_)) => lines.push(
            "hint: TLS handshake failed; point --rpc-cert at the node's rpc.cert or use --no-tls for a plain listener"
                .into(),
        ),
        CoreError::Connect(ConnectError::NetworkUnreachable(_)) => lines.push(
            "hint: nothing answered; verify --host and that btcd was started with RPC enabled".into(),
        ),
        CoreError::InvalidConfig(_) => {
            lines.push("hint: check --host and --endpoint formatting".into())
        }
        _ => {}
    }

    lines.join("\n")
}
