use std::path::PathBuf;
use std::time::Duration;

use bitcoin::Network;
use clap::Parser;

/// nodewatch — follow a btcd node over websockets and log its notifications.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// btcd RPC address (host:port). 18334 is testnet, 8334 mainnet.
    #[arg(long, default_value = "localhost:18334", env = "NODEWATCH_HOST")]
    pub host: String,

    /// Websocket endpoint path on the node.
    #[arg(long, default_value = "ws", env = "NODEWATCH_ENDPOINT")]
    pub endpoint: String,

    /// RPC username.
    #[arg(long, env = "NODEWATCH_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC password.
    #[arg(long, env = "NODEWATCH_RPC_PASS")]
    pub rpc_pass: Option<String>,

    /// PEM certificate of the node. Defaults to btcd's rpc.cert in its
    /// application data directory.
    #[arg(long, env = "NODEWATCH_RPC_CERT")]
    pub rpc_cert: Option<PathBuf>,

    /// Connect over plain ws:// instead of TLS.
    #[arg(long, env = "NODEWATCH_NO_TLS")]
    pub no_tls: bool,

    /// Network that `--filter-addr` addresses belong to.
    #[arg(long, default_value = "testnet", value_parser = parse_network, env = "NODEWATCH_NETWORK")]
    pub network: Network,

    /// Address to watch with the node-side transaction filter (repeatable).
    #[arg(long = "filter-addr", env = "NODEWATCH_FILTER_ADDR", value_delimiter = ',')]
    pub filter_addrs: Vec<String>,

    /// Request `txacceptedverbose` instead of `txaccepted` notifications.
    #[arg(long, env = "NODEWATCH_VERBOSE_TX")]
    pub verbose_tx: bool,

    /// Shut the client down after this long, e.g. `90s`, `15m`, `6h`.
    #[arg(long, default_value = "6h", value_parser = parse_duration, env = "NODEWATCH_SHUTDOWN_AFTER")]
    pub shutdown_after: Duration,

    /// Exit instead of reconnecting when the connection drops.
    #[arg(long, env = "NODEWATCH_NO_RECONNECT")]
    pub no_reconnect: bool,
}

fn parse_network(s: &str) -> Result<Network, String> {
    s.parse::<Network>().map_err(|e| e.to_string())
}

/// Accepts a bare number of seconds or a number with an `s`, `m`, or `h`
/// suffix.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], c),
        _ => (s, 's'),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration `{s}`"))?;
    let secs = match unit {
        's' => value,
        'm' => value.saturating_mul(60),
        'h' => value.saturating_mul(3600),
        other => return Err(format!("unknown duration unit `{other}` in `{s}`")),
    };
    if secs == 0 {
        return Err("duration must be positive".to_owned());
    }
    Ok(Duration::from_secs(secs))
}
