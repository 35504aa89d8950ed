use anyhow::{anyhow, Context};
use barterhouse::{
    config::create_default_config_file, AppConfig, BarterError, BarterHouse, HoldingsLedger, HostServices,
    InventoryCapability, ItemDescriptor, JsonFileBackend, LogNotifier, Notifier, OfferId, PartyId, SystemClock,
    WebhookNotifier,
};
use barterhouse::notify::FanoutNotifier;
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "barterhouse")]
#[command(about = "Operate a BarterHouse: publish, accept and settle barter offers")]
struct Args {
    #[arg(short, long, default_value = "barterhouse.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default configuration file
    Init,
    /// Manage parties and their holdings
    Party {
        #[command(subcommand)]
        action: PartyCommand,
    },
    /// Publish, list and cancel offers
    Offer {
        #[command(subcommand)]
        action: OfferCommand,
    },
    /// Accept an offer on behalf of a party
    Accept { party: String, offer_id: OfferId },
    /// Inspect and empty warehouses
    Warehouse {
        #[command(subcommand)]
        action: WarehouseCommand,
    },
    /// Remove expired offers now
    Sweep,
    /// Run the expiration sweeper until Ctrl-C
    Run,
}

#[derive(Subcommand)]
enum PartyCommand {
    Add { name: String },
    /// Give items to a party, e.g. `minecraft:diamond*3`
    Grant { party: String, item: ItemDescriptor },
    Show { party: String },
    Online {
        party: String,
        #[arg(action = ArgAction::Set)]
        online: bool,
    },
}

#[derive(Subcommand)]
enum OfferCommand {
    Create {
        party: String,
        offered: ItemDescriptor,
        requested: ItemDescriptor,
    },
    List {
        /// Only offers created by this party
        #[arg(long)]
        by: Option<String>,
        /// Only offers requesting an item whose type contains this text
        #[arg(long)]
        search: Option<String>,
    },
    Cancel { party: String, offer_id: OfferId },
}

#[derive(Subcommand)]
enum WarehouseCommand {
    List { party: String },
    /// Move an entry into the party's holdings
    Withdraw { party: String, index: usize },
    /// Take part of an entry
    Reduce { party: String, index: usize, amount: u64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Command::Init = args.command {
        create_default_config_file(&args.config)?;
        println!("Wrote default configuration to {}", args.config.display());
        return Ok(());
    }

    let config = load_config(&args.config)?;
    init_tracing(&config);
    config.validate()?;

    let backend = Arc::new(JsonFileBackend::new(&config.storage.data_dir)?);
    let ledger = Arc::new(HoldingsLedger::load(
        config.holdings_path(),
        config.exchange.stack_cap,
        config.exchange.slot_capacity,
    )?);

    let host = HostServices {
        inventory: ledger.clone(),
        directory: ledger.clone(),
        clock: Arc::new(SystemClock),
        notifier: build_notifier(&config)?,
    };
    let house = BarterHouse::open(&config, backend, host);

    let outcome = execute(args.command, &config, &house, &ledger).await;

    ledger
        .save(config.holdings_path())
        .context("Failed to save holdings")?;
    outcome
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load_with_env_overrides(path)?);
    }
    let mut config = AppConfig::default();
    config.apply_env_overrides();
    Ok(config)
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.logging.format.as_deref() {
        Some("compact") => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init(),
        _ => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
    }
}

fn build_notifier(config: &AppConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    let mut notifier = FanoutNotifier::new().with(Arc::new(LogNotifier));

    if config.notifications.enabled {
        if let Some(url) = config.webhook_url() {
            let webhook = WebhookNotifier::new(
                url.to_string(),
                config.webhook_timeout(),
                tokio::runtime::Handle::current(),
            )?;
            info!("Webhook notifications enabled");
            notifier = notifier.with(Arc::new(webhook));
        }
    }

    Ok(Arc::new(notifier))
}

fn resolve(ledger: &HoldingsLedger, party: &str) -> anyhow::Result<PartyId> {
    ledger
        .resolve(party)
        .ok_or_else(|| anyhow!("Unknown party {}", party))
}

/// Prints a warning for writes that failed after the change took effect.
fn tolerate_unsaved<T>(result: barterhouse::Result<T>) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e @ BarterError::Unsaved { .. }) => {
            eprintln!("warning: {}", e);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

async fn execute(
    command: Command,
    config: &AppConfig,
    house: &BarterHouse,
    ledger: &HoldingsLedger,
) -> anyhow::Result<()> {
    match command {
        // Written in main before any state is opened.
        Command::Init => {}

        Command::Party { action } => match action {
            PartyCommand::Add { name } => {
                let id = Uuid::new_v4();
                ledger.add_party(id, &name)?;
                println!("{} {}", id, name);
            }
            PartyCommand::Grant { party, item } => {
                let id = resolve(ledger, &party)?;
                ledger.grant(id, &item)?;
                println!("Granted {} to {}", item, party);
            }
            PartyCommand::Show { party } => {
                let id = resolve(ledger, &party)?;
                let holdings = ledger
                    .holdings(id)
                    .ok_or_else(|| anyhow!("Unknown party {}", party))?;
                println!(
                    "{} ({}) {}",
                    holdings.display_name,
                    id,
                    if holdings.online { "online" } else { "offline" }
                );
                for (slot, item) in holdings.slots.iter().enumerate() {
                    println!("  [{}] {}", slot, item);
                }
                println!("  warehouse: {} item(s)", house.total_items(id));
            }
            PartyCommand::Online { party, online } => {
                let id = resolve(ledger, &party)?;
                ledger.set_online(id, online)?;
                println!("{} is now {}", party, if online { "online" } else { "offline" });
            }
        },

        Command::Offer { action } => match action {
            OfferCommand::Create {
                party,
                offered,
                requested,
            } => {
                let id = resolve(ledger, &party)?;
                if !ledger.has(id, &offered) {
                    return Err(anyhow!("{} does not hold {}", party, offered));
                }
                if let Some(offer_id) = tolerate_unsaved(house.create_offer(id, offered, requested))? {
                    println!("{}", offer_id);
                }
            }
            OfferCommand::List { by, search } => {
                let offers = match (by, search) {
                    (Some(party), _) => house.list_active_by(resolve(ledger, &party)?),
                    (None, Some(query)) => house.search_requested(&query),
                    (None, None) => house.list_active(),
                };
                let now = Utc::now();
                for offer in &offers {
                    println!("{}  ({}h left)", offer, offer.time_remaining(now).num_hours());
                }
                println!("{} active offer(s)", offers.len());
            }
            OfferCommand::Cancel { party, offer_id } => {
                let id = resolve(ledger, &party)?;
                if let Some(offer) = tolerate_unsaved(house.cancel_offer(id, offer_id))? {
                    println!("Cancelled {}", offer);
                }
            }
        },

        Command::Accept { party, offer_id } => {
            let id = resolve(ledger, &party)?;
            let receipt = house.accept(id, offer_id)?;
            println!(
                "{} received {}, {} received {} (both in warehouse)",
                receipt.acceptor_display_name,
                receipt.acceptor_received,
                receipt.creator_display_name,
                receipt.creator_received
            );
        }

        Command::Warehouse { action } => match action {
            WarehouseCommand::List { party } => {
                let id = resolve(ledger, &party)?;
                let entries = house.warehouse_list(id);
                for (index, entry) in entries.iter().enumerate() {
                    println!(
                        "[{}] {} from {} at {}",
                        index,
                        entry.item,
                        entry.source_display_name,
                        entry.received_at.to_rfc3339()
                    );
                }
                println!("{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
            }
            WarehouseCommand::Withdraw { party, index } => {
                let id = resolve(ledger, &party)?;
                let entry = house.claim(id, index)?;
                println!("Moved {} into holdings", entry.item);
            }
            WarehouseCommand::Reduce { party, index, amount } => {
                let id = resolve(ledger, &party)?;
                let remaining = house.reduce(id, index, amount)?;
                println!("{} left in entry {}", remaining, index);
            }
        },

        Command::Sweep => {
            let removed = house.sweep_expired();
            println!("Removed {} expired offer(s)", removed);
        }

        Command::Run => {
            info!(active_offers = house.total_active(), "BarterHouse running, press Ctrl-C to stop");
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            house.sweeper().run(config.tick(), shutdown).await;
            house.flush()?;
            info!("State saved, exiting");
        }
    }

    Ok(())
}
