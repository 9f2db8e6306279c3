use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use ord_kv::{KvBackend, LogConfig, LogKv};
use ord_server::{BackendConfig, OrderServer, ServerConfig};
use ord_store::OrderStore;
use ord_types::{Order, OrderId, OrderStatus};

use crate::cli::*;

/// Index members examined per page when walking a whole log.
const LIST_PAGE_SIZE: usize = 100;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Serve(args) => cmd_serve(apply_overrides(config, &args)),
        Command::Config => cmd_config(&config),
        Command::List(args) => cmd_list(&args.data, &cli.format),
        Command::Show(args) => cmd_show(&args, &cli.format),
        Command::Compact(args) => cmd_compact(&args.data),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ServerConfig> {
    match path {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(ServerConfig::default()),
    }
}

fn apply_overrides(mut config: ServerConfig, args: &ServeArgs) -> ServerConfig {
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(path) = &args.data {
        let sync = match &config.backend {
            BackendConfig::Log { sync, .. } => *sync,
            BackendConfig::Memory => Default::default(),
        };
        config.backend = BackendConfig::Log {
            path: path.clone(),
            sync,
        };
    }
    config
}

fn cmd_serve(config: ServerConfig) -> anyhow::Result<()> {
    let server = OrderServer::new(config).context("starting order server")?;
    println!(
        "{} Order server on {}",
        "✓".green().bold(),
        server.config().bind_addr.to_string().bold()
    );
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.serve())?;
    Ok(())
}

fn cmd_config(config: &ServerConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

fn open_store(path: &Path) -> anyhow::Result<OrderStore> {
    if !path.exists() {
        bail!("no order log at {}", path.display());
    }
    let kv = LogKv::open(path, LogConfig::default())
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(OrderStore::new(Arc::new(kv)))
}

fn cmd_list(path: &Path, format: &OutputFormat) -> anyhow::Result<()> {
    let store = open_store(path)?;
    let mut orders = store.find_all_orders(LIST_PAGE_SIZE)?;
    store.backend().close()?;
    orders.sort_by_key(|o| o.order_id);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&orders)?),
        OutputFormat::Text => {
            if orders.is_empty() {
                println!("No orders.");
            }
            for order in &orders {
                println!("{}", summary_line(order));
            }
        }
    }
    Ok(())
}

fn cmd_show(args: &ShowArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let id: OrderId = args.id.parse()?;
    let store = open_store(&args.data)?;
    let order = store.get_by_id(id)?;
    store.backend().close()?;
    let Some(order) = order else {
        bail!("order {id} not found");
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&order)?),
        OutputFormat::Text => {
            println!("{}", summary_line(&order));
            println!("  Customer: {}", order.customer_id.as_uuid());
            println!("  Created:  {}", order.created_at.to_rfc3339());
            if let Some(at) = order.shipped_at {
                println!("  Shipped:  {}", at.to_rfc3339());
            }
            if let Some(at) = order.completed_at {
                println!("  Completed: {}", at.to_rfc3339());
            }
            for item in &order.line_items {
                println!("  {} x{} @ {}", item.item_id, item.quantity, item.price);
            }
        }
    }
    Ok(())
}

fn cmd_compact(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        bail!("no order log at {}", path.display());
    }
    let kv = LogKv::open(path, LogConfig::default())?;
    let before = kv.offset()?;
    kv.compact()?;
    let after = kv.offset()?;
    kv.close()?;
    println!(
        "{} Compacted {}: {} -> {} bytes",
        "✓".green().bold(),
        path.display(),
        before,
        after.to_string().bold()
    );
    Ok(())
}

fn summary_line(order: &Order) -> String {
    let status = match order.status() {
        OrderStatus::Pending => "pending".yellow(),
        OrderStatus::Shipped => "shipped".cyan(),
        OrderStatus::Completed => "completed".green(),
    };
    format!(
        "{}  {:<9}  {} item(s), total {}",
        order.order_id.to_string().bold(),
        status,
        order.line_items.len(),
        order.total()
    )
}
