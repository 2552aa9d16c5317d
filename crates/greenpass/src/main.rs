use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use greenpass::{DashboardItem, HolderConfig, HolderState, RootError};
use greenpass_core::{EventGroupId, GreenCard};
use greenpass_cred::{card_status, select_credential, CardStatus};

/// Greenpass: holder-side credential lifecycle
///
/// Inspects the locally issued green cards and the dashboard state
/// derived from them.
#[derive(Parser, Debug)]
#[command(name = "greenpass", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the configuration and create the holder secret key
    Init {
        /// Directory for the database and the cached issuer config
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// List green cards with their currently selected credential
    Cards,

    /// Print the dashboard items in display order
    Dashboard,

    /// Hide the "cards synced" banner for good
    DismissSyncedBanner,

    /// Remove an event group and everything issued from it
    RemoveEventGroup {
        /// Event group id as printed by `cards`
        id: String,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("greenpass=debug,greenpass_vault=debug,greenpass_cred=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("greenpass=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<HolderConfig, RootError> {
    match path {
        Some(p) => HolderConfig::load(p),
        None => {
            let default_path = HolderConfig::default_config_path();
            HolderConfig::load(&default_path)
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), RootError> {
    match cli.command {
        Commands::Init { data_dir } => cmd_init(cli.config.as_ref(), data_dir),
        Commands::Cards => cmd_cards(cli.config.as_ref()),
        Commands::Dashboard => cmd_dashboard(cli.config.as_ref()),
        Commands::DismissSyncedBanner => {
            let state = HolderState::open(load_config(cli.config.as_ref())?)?;
            state.dismiss_synced_banner()?;
            println!("Synced banner dismissed.");
            Ok(())
        }
        Commands::RemoveEventGroup { id } => cmd_remove_event_group(cli.config.as_ref(), id),
    }
}

fn cmd_init(config_path: Option<&PathBuf>, data_dir: Option<PathBuf>) -> Result<(), RootError> {
    let mut config = load_config(config_path)?;
    if let Some(dd) = data_dir {
        config.data_dir = dd;
    }

    info!("initializing greenpass holder");

    let state = HolderState::open(config.clone())?;
    let key = state.secret_keys.get_or_create()?;

    let save_path = config_path
        .cloned()
        .unwrap_or_else(HolderConfig::default_config_path);
    config.save(&save_path)?;

    println!("Greenpass initialized.");
    println!("  Data dir:    {}", state.config.data_dir.display());
    println!("  Config:      {}", save_path.display());
    println!("  Secret key:  {}", key.fingerprint());

    Ok(())
}

fn print_card(card: &GreenCard, now: greenpass_core::Timestamp) {
    let status = match card_status(card, now) {
        CardStatus::Valid => "valid",
        CardStatus::Expired => "expired",
    };
    println!("{} [{}] {}", card.id, card.card_type, status);
    for origin in &card.origins {
        println!(
            "  origin {:<12} {} .. {}  (group {})",
            origin.origin_type.to_string(),
            origin.valid_from,
            origin.expiration_time,
            origin.event_group_id
        );
    }
    match select_credential(card, now) {
        Some(credential) => println!(
            "  credential {} .. {}",
            credential.valid_from, credential.expiration_time
        ),
        None => println!("  no credential covers now"),
    }
}

fn cmd_cards(config_path: Option<&PathBuf>) -> Result<(), RootError> {
    let state = HolderState::open(load_config(config_path)?)?;
    let now = state.now();
    let cards = state.store.all_green_cards()?;

    if cards.is_empty() {
        println!("(no green cards)");
    }
    for card in &cards {
        print_card(card, now);
    }
    Ok(())
}

fn cmd_dashboard(config_path: Option<&PathBuf>) -> Result<(), RootError> {
    let state = HolderState::open(load_config(config_path)?)?;
    let now = state.now();

    for item in state.dashboard()?.items(now) {
        match item {
            DashboardItem::Header => println!("header"),
            DashboardItem::ClockDeviationBanner => println!("banner: clock deviation"),
            DashboardItem::Placeholder => println!("placeholder"),
            DashboardItem::SyncedBanner => println!("banner: cards synced"),
            DashboardItem::SyncUpgradeBanner => println!("banner: sync to combine vaccinations"),
            DashboardItem::Cards(tile) => {
                let ids: Vec<&str> = tile.cards.iter().map(|c| c.id.as_str()).collect();
                let status = if tile.expired { "expired" } else { "valid" };
                println!("cards: {} ({})", ids.join(", "), status);
            }
            DashboardItem::AddQrButton => println!("button: add QR code"),
        }
    }
    Ok(())
}

fn cmd_remove_event_group(config_path: Option<&PathBuf>, id: String) -> Result<(), RootError> {
    let state = HolderState::open(load_config(config_path)?)?;
    let id = EventGroupId::new(id);
    if state.store.remove_event_group(&id)? {
        info!(event_group = %id, "event group removed");
        println!("Removed event group {}.", id);
    } else {
        println!("No event group {}.", id);
    }
    Ok(())
}
