//! Command-line interface for poolscope.
//!
//! This binary renders the dashboard views as text by querying the daemon
//! via the HTTP API.

use std::env;

use anyhow::{Context, Result, bail};

use poolscope::api_client::{
    self, MinerLookup,
    types::{EndpointView, ProbeRequestBody, SampleStatus, SampleView, SelectionRequest},
};
use poolscope::pool_api::Pool;

const USAGE: &str = "\
Usage: poolscope-cli <command> [args]

Commands:
  pools                         List pools
  pool <id>                     Show one pool and its ports
  blocks <id>                   Recent blocks of a pool
  payments <id>                 Recent payments of a pool
  endpoints <id>                Stratum endpoints with latency and selection
  select <id> [host|- [port]]   Pin host and/or port; no host means automatic
  retest <id>                   Re-probe every endpoint of a pool
  refresh                       Poll the upstream pool API now
  miner <pool> <address>        Statistics for a miner address
  probe <host> <port> [ms]      Measure TCP connect latency

Environment:
  POOLSCOPE_API_URL    API base URL (default: http://127.0.0.1:7786)";

/// A command line that matched one of the usage forms.
#[derive(Debug, PartialEq)]
enum Command<'a> {
    Pools,
    Pool(&'a str),
    Blocks(&'a str),
    Payments(&'a str),
    Endpoints(&'a str),
    Select { id: &'a str, args: &'a [String] },
    Retest(&'a str),
    Refresh,
    Miner { pool: &'a str, address: &'a str },
    Probe { host: &'a str, port: &'a str, timeout: Option<&'a String> },
}

fn parse_command(args: &[String]) -> Option<Command<'_>> {
    let (command, rest) = args.split_first()?;
    let command = match (command.as_str(), rest) {
        ("pools", []) => Command::Pools,
        ("pool", [id]) => Command::Pool(id),
        ("blocks", [id]) => Command::Blocks(id),
        ("payments", [id]) => Command::Payments(id),
        ("endpoints", [id]) => Command::Endpoints(id),
        ("select", [id, args @ ..]) if args.len() <= 2 => Command::Select { id, args },
        ("retest", [id]) => Command::Retest(id),
        ("refresh", []) => Command::Refresh,
        ("miner", [pool, address]) => Command::Miner { pool, address },
        ("probe", [host, port, timeout @ ..]) if timeout.len() <= 1 => Command::Probe {
            host,
            port,
            timeout: timeout.first(),
        },
        _ => return None,
    };
    Some(command)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let Some(command) = parse_command(&args) else {
        eprintln!("Unknown command or wrong arguments: {}", args.join(" "));
        eprintln!("Run without arguments to see usage.");
        std::process::exit(1);
    };
    let client = make_client()?;

    match command {
        Command::Pools => cmd_pools(&client).await?,
        Command::Pool(id) => cmd_pool(&client, id).await?,
        Command::Blocks(id) => cmd_blocks(&client, id).await?,
        Command::Payments(id) => cmd_payments(&client, id).await?,
        Command::Endpoints(id) => cmd_endpoints(&client, id).await?,
        Command::Select { id, args } => cmd_select(&client, id, args).await?,
        Command::Retest(id) => cmd_retest(&client, id).await?,
        Command::Refresh => {
            client.refresh().await?;
            println!("Refresh requested.");
        }
        Command::Miner { pool, address } => cmd_miner(&client, pool, address).await?,
        Command::Probe {
            host,
            port,
            timeout,
        } => cmd_probe(&client, host, port, timeout).await?,
    }

    Ok(())
}

/// Build an API client, honoring POOLSCOPE_API_URL if set.
fn make_client() -> Result<api_client::Client> {
    let client = match env::var("POOLSCOPE_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url)?,
        Err(_) => api_client::Client::new()?,
    };
    Ok(client)
}

fn print_advisory(advisory: Option<&str>) {
    if let Some(advisory) = advisory {
        println!("! {advisory}");
    }
}

fn format_hashrate(hashes_per_sec: f64) -> String {
    const UNITS: [&str; 7] = ["H/s", "KH/s", "MH/s", "GH/s", "TH/s", "PH/s", "EH/s"];
    let mut value = hashes_per_sec.max(0.0);
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

fn format_sample(sample: &SampleView) -> String {
    match (sample.status, sample.latency_ms, sample.error) {
        (SampleStatus::Success, Some(ms), _) => format!("{ms} ms"),
        (SampleStatus::Error, _, Some(reason)) => reason.to_string(),
        (SampleStatus::Testing, ..) => "testing".to_string(),
        _ => "-".to_string(),
    }
}

fn print_pool_card(pool: &Pool) {
    println!("{} ({} / {})", pool.id, pool.coin.symbol, pool.coin.algorithm);
    println!("  Hashrate: {}", format_hashrate(pool.pool_stats.pool_hashrate));
    println!("  Miners:   {}", pool.pool_stats.connected_miners);
    println!("  Shares/s: {:.2}", pool.pool_stats.shares_per_second);
    println!(
        "  Payout:   {} (min {})",
        pool.payment_processing.payout_scheme, pool.payment_processing.minimum_payment
    );
}

async fn cmd_pools(client: &api_client::Client) -> Result<()> {
    let response = client.get_pools().await?;
    print_advisory(response.advisory.as_deref());

    if response.pools.is_empty() {
        println!("Pools: (none)");
    }
    for pool in &response.pools {
        print_pool_card(pool);
    }
    Ok(())
}

async fn cmd_pool(client: &api_client::Client, id: &str) -> Result<()> {
    let response = client.get_pool(id).await?;
    print_advisory(response.advisory.as_deref());
    print_pool_card(&response.pool);

    println!("  Ports:");
    for (port, config) in &response.pool.ports {
        let name = config.name.as_deref().unwrap_or("");
        let difficulty = match (&config.difficulty, &config.var_diff) {
            (Some(d), _) => format!("diff {d}"),
            (None, Some(v)) => format!(
                "vardiff {}..{} target {}s",
                v.min_diff.map_or("?".to_string(), |d| d.to_string()),
                v.max_diff.map_or("?".to_string(), |d| d.to_string()),
                v.target_time.map_or("?".to_string(), |t| t.to_string()),
            ),
            (None, None) => String::new(),
        };
        println!("    {port:<6} {name:<12} {difficulty}");
    }
    Ok(())
}

async fn cmd_blocks(client: &api_client::Client, id: &str) -> Result<()> {
    let response = client.get_blocks(id).await?;
    print_advisory(response.advisory.as_deref());

    if response.blocks.is_empty() {
        println!("Blocks: (none)");
        return Ok(());
    }
    println!("{:<10} {:<10} {:>8} {:>12}", "Height", "Status", "Effort", "Reward");
    for block in &response.blocks {
        let effort = block
            .effort
            .map_or("-".to_string(), |e| format!("{:.0}%", e * 100.0));
        println!(
            "{:<10} {:<10} {:>8} {:>12}",
            block.block_height, block.status, effort, block.reward
        );
    }
    Ok(())
}

async fn cmd_payments(client: &api_client::Client, id: &str) -> Result<()> {
    let response = client.get_payments(id).await?;
    print_advisory(response.advisory.as_deref());

    if response.payments.is_empty() {
        println!("Payments: (none)");
        return Ok(());
    }
    for payment in &response.payments {
        println!(
            "{:<24} {:>14} {}",
            payment.created.as_deref().unwrap_or("-"),
            payment.amount,
            payment.address
        );
    }
    Ok(())
}

fn print_endpoints(view: &EndpointView) {
    if view.groups.is_empty() {
        println!("Endpoints: (none)");
        return;
    }

    let mode = |manual: bool| if manual { "manual" } else { "auto" };
    println!(
        "Group: {} ({})",
        view.selected_group.as_deref().unwrap_or("-"),
        mode(view.group_manual)
    );
    match &view.selected {
        Some(key) => println!("Endpoint: {key} ({})", mode(view.endpoint_manual)),
        None => println!("Endpoint: -"),
    }

    for group in &view.groups {
        println!();
        println!("{}", group.host);
        for entry in &group.endpoints {
            let marker = match &view.selected {
                Some(key) if key.host == entry.host && key.port == entry.port => "*",
                _ => " ",
            };
            println!(
                "  {marker} {:<6} {:<12} {:>14}",
                entry.port,
                entry.name.as_deref().unwrap_or(""),
                format_sample(&entry.sample)
            );
        }
    }
}

async fn cmd_endpoints(client: &api_client::Client, id: &str) -> Result<()> {
    print_endpoints(&client.get_endpoints(id).await?);
    Ok(())
}

async fn cmd_select(client: &api_client::Client, id: &str, args: &[String]) -> Result<()> {
    let host = args.first().filter(|h| h.as_str() != "-").cloned();
    let port = args
        .get(1)
        .map(|p| p.parse::<u16>())
        .transpose()
        .context("port must be a number")?;

    let view = client.select(id, &SelectionRequest { host, port }).await?;
    print_endpoints(&view);
    Ok(())
}

async fn cmd_retest(client: &api_client::Client, id: &str) -> Result<()> {
    let view = client.retest(id).await?;
    let count: usize = view.groups.iter().map(|g| g.endpoints.len()).sum();
    println!("Retesting {count} endpoint(s).");
    Ok(())
}

async fn cmd_miner(client: &api_client::Client, pool: &str, address: &str) -> Result<()> {
    let stats = match client.get_miner(pool, address).await? {
        MinerLookup::Found(stats) => stats,
        MinerLookup::NotFound(message) => {
            println!("{message}");
            return Ok(());
        }
    };

    println!("Hashrate:        {}", format_hashrate(stats.total_hashrate()));
    println!("Pending shares:  {}", stats.pending_shares);
    println!("Pending balance: {}", stats.pending_balance);
    println!("Paid today:      {}", stats.today_paid);
    println!("Total paid:      {}", stats.total_paid);
    if let Some(last) = &stats.last_payment {
        println!("Last payment:    {last}");
    }
    if let Some(performance) = &stats.performance {
        for (worker, perf) in &performance.workers {
            let name = if worker.is_empty() { "(default)" } else { worker };
            println!("  {name:<16} {}", format_hashrate(perf.hashrate));
        }
    }
    Ok(())
}

async fn cmd_probe(
    client: &api_client::Client,
    host: &str,
    port: &str,
    timeout: Option<&String>,
) -> Result<()> {
    let port: u16 = port.parse().context("port must be a number")?;
    let timeout = timeout
        .map(|t| t.parse::<u64>())
        .transpose()
        .context("timeout must be a number of milliseconds")?;

    let response = client
        .probe(&ProbeRequestBody {
            host: host.to_string(),
            port,
            timeout,
        })
        .await?;

    match (response.latency, response.error) {
        (Some(ms), None) => println!("{host}:{port} {ms} ms"),
        (_, Some(error)) => println!("{host}:{port} {error}"),
        (None, None) => bail!("daemon returned neither latency nor error"),
    }
    Ok(())
}
