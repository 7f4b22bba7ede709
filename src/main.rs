use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rpp_marketplace::config::MarketplaceConfig;
use rpp_marketplace::ledger::{InMemoryMarketplace, RpcMarketplaceClient};
use rpp_marketplace::metadata::{HttpDescriptorSource, StaticDescriptorSource};
use rpp_marketplace::orchestrator::TxOutcome;
use rpp_marketplace::types::{Account, Descriptor, DisplayItem, ListingId, PurchaseRecord};
use rpp_marketplace::{Amount, MarketplaceSession};

#[derive(Parser)]
#[command(author, version, about = "Client for a ledger-backed token marketplace")]
struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(short, long, global = true, default_value = "config/marketplace.toml")]
    config: PathBuf,
    /// Active account, overriding `session.account`
    #[arg(long, global = true, env = "MARKETPLACE_ACCOUNT")]
    account: Option<Account>,
    /// Run against a seeded in-memory marketplace instead of the configured node
    #[arg(long, global = true, default_value_t = false)]
    demo: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every unsold item with its total price
    Catalog,
    /// List the unsold items listed by the active account
    Listings,
    /// Show the purchases still held by the active account
    Purchases,
    /// Buy a listing, attaching its current total price
    Buy { listing_id: ListingId },
    /// Relist a purchased item at a new price in whole currency units
    Relist { listing_id: ListingId, price: String },
    /// Mint a new token referencing a descriptor URI
    Mint { uri: String },
    /// Write a default configuration file
    GenerateConfig {
        #[arg(short, long, default_value = "config/marketplace.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::GenerateConfig { path } = &cli.command {
        return generate_config(path);
    }

    let config = load_config(&cli.config)?;
    let account = cli.account.clone().or_else(|| config.session.account.clone());
    let session = build_session(&config, account, cli.demo)?;

    match cli.command {
        Commands::Catalog => {
            let items = session
                .reconstruct_catalog()
                .await
                .context("catalog reconstruction failed")?;
            print_items(&items);
        }
        Commands::Listings => {
            let items = session
                .my_listings()
                .await
                .context("listing lookup failed")?;
            print_items(&items);
        }
        Commands::Purchases => {
            let records = session
                .my_purchases()
                .await
                .context("purchase history reconstruction failed")?;
            print_purchases(&records);
        }
        Commands::Buy { listing_id } => {
            let outcome = session
                .purchase(listing_id)
                .await
                .with_context(|| format!("purchase of listing {listing_id} failed"))?;
            print_outcome(&outcome);
        }
        Commands::Relist { listing_id, price } => {
            let outcome = session
                .relist(listing_id, &price)
                .await
                .with_context(|| format!("relist of listing {listing_id} failed"))?;
            print_outcome(&outcome);
        }
        Commands::Mint { uri } => {
            let outcome = session
                .mint(&uri)
                .await
                .with_context(|| format!("mint of {uri} failed"))?;
            print_outcome(&outcome);
        }
        Commands::GenerateConfig { .. } => {}
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<MarketplaceConfig> {
    if path.exists() {
        MarketplaceConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))
    } else {
        info!(?path, "configuration file not found, using defaults");
        Ok(MarketplaceConfig::default())
    }
}

fn generate_config(path: &Path) -> Result<()> {
    MarketplaceConfig::default().save(path)?;
    info!(?path, "wrote default configuration");
    Ok(())
}

fn build_session(
    config: &MarketplaceConfig,
    account: Option<Account>,
    demo: bool,
) -> Result<MarketplaceSession> {
    let (_identity_tx, identity_rx) = watch::channel(account);
    if demo {
        let (market, descriptors) = demo_market()?;
        info!("using the in-memory demo marketplace");
        return Ok(MarketplaceSession::new(
            market.clone(),
            market,
            descriptors,
            config,
            identity_rx,
        ));
    }

    let client = Arc::new(
        RpcMarketplaceClient::from_config(&config.ledger)
            .context("failed to build the ledger client")?,
    );
    let descriptors = Arc::new(
        HttpDescriptorSource::from_config(&config.metadata)
            .context("failed to build the descriptor client")?,
    );
    info!(endpoint = %client.endpoint(), "using ledger gateway");
    Ok(MarketplaceSession::new(
        client.clone(),
        client,
        descriptors,
        config,
        identity_rx,
    ))
}

fn demo_market() -> Result<(Arc<InMemoryMarketplace>, Arc<StaticDescriptorSource>)> {
    let market = InMemoryMarketplace::default();
    let descriptors = StaticDescriptorSource::new();
    let seller: Account = "0x5e11e7000000000000000000000000000000d3m0".parse()?;
    let collector: Account = "0xc011ec7000000000000000000000000000000d3m0".parse()?;

    let items = [
        ("Cosmic Orb", "A marble that remembers starlight", "1.0"),
        ("Lunar Key", "Opens exactly one crater", "2.5"),
        ("Solar Sail", "Folded to the size of a stamp", "0.75"),
    ];
    for (index, (name, description, price)) in items.into_iter().enumerate() {
        let uri = format!("ipfs://demo/{index}.json");
        descriptors.publish(
            uri.clone(),
            Descriptor {
                name: name.to_owned(),
                description: description.to_owned(),
                image: format!("https://demo.invalid/{index}.png"),
            },
        );
        market.list_item(&seller, &uri, Amount::parse_units(price)?);
    }
    market.record_external_purchase(3, &collector)?;

    Ok((Arc::new(market), Arc::new(descriptors)))
}

fn print_items(items: &[DisplayItem]) {
    if items.is_empty() {
        println!("no items listed");
    }
    for item in items {
        println!(
            "#{:<4} {:<24} {:>12}  token {:<4} seller {}",
            item.listing_id,
            item.descriptor.name,
            item.total_price.format_units(),
            item.token_id,
            item.seller
        );
    }
}

fn print_purchases(records: &[PurchaseRecord]) {
    if records.is_empty() {
        println!("no purchases");
    }
    for record in records {
        println!(
            "#{:<4} {:<24} paid {:>12}  now {:>12}  token {}",
            record.listing_id,
            record.descriptor.name,
            record.price_paid.format_units(),
            record.live_total_price.format_units(),
            record.token_id
        );
    }
}

fn print_outcome(outcome: &TxOutcome) {
    println!("confirmed {} at height {}", outcome.tx, outcome.block_height);
    if let Some(listing_id) = outcome.created_listing {
        println!("new listing #{listing_id}");
    }
    if let Some(token_id) = outcome.minted_token {
        println!("minted token {token_id}");
    }
}
