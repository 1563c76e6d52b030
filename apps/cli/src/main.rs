//! GreenAfrica CLI
//!
//! Operator interface for the GreenAfrica points ledger: open accounts,
//! grant recycling rewards and redeem points for airtime.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use greenafrica_core::{Carrier, EntityId, TransactionRecord, UserIdentity};
use greenafrica_ledger::MockLedger;
use greenafrica_points::{
    AccountService, BalanceSource, Gateways, GrantRequest, PointsLedger, RedeemRequest,
};
use greenafrica_registry::Device;
use greenafrica_settings::{default_settings_path, GatewayMode, Settings};

/// GreenAfrica - recycling rewards on the ledger
#[derive(Parser)]
#[command(name = "greenafrica")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file
    #[arg(long, default_value_os_t = default_settings_path())]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account with a ledger identity (no-op if it exists)
    OpenAccount {
        #[arg(long)]
        user_id: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        phone: Option<String>,

        /// Referral code of the inviting recycler
        #[arg(long)]
        referred_by: Option<String>,
    },

    /// Give a legacy account its ledger identity
    Migrate {
        #[arg(long)]
        user_id: String,
    },

    /// Grant recycling points for a reward code
    Grant {
        #[arg(long)]
        user_id: String,

        #[arg(long)]
        points: u64,

        /// Reward code printed by the collection machine
        #[arg(long)]
        code: String,

        #[arg(long)]
        session: Option<String>,

        /// Machine that took the deposit
        #[arg(long)]
        device: Option<String>,
    },

    /// Award the referral bonus to the owner of a referral code
    Referral {
        #[arg(long)]
        code: String,

        /// User who signed up with the code
        #[arg(long)]
        referred: String,
    },

    /// Redeem points for airtime
    Redeem {
        #[arg(long)]
        user_id: String,

        #[arg(long)]
        points: u64,

        #[arg(long)]
        phone: String,

        /// Carrier code (MTN, GLO, AIRTEL, 9MOBILE, NTEL); detected if omitted
        #[arg(long)]
        carrier: Option<Carrier>,
    },

    /// Register a collection machine on the registry
    RegisterDevice {
        #[arg(long)]
        device_id: String,

        #[arg(long, allow_negative_numbers = true)]
        lat: f64,

        #[arg(long, allow_negative_numbers = true)]
        lng: f64,

        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        meta_uri: String,
    },

    /// Show a user's balance
    Balance {
        #[arg(long)]
        user_id: String,

        /// Also show the registry's points tally
        #[arg(long)]
        compare: bool,
    },

    /// Show a user's audit history
    History {
        #[arg(long)]
        user_id: String,

        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show a user's redemption requests
    Redemptions {
        #[arg(long)]
        user_id: String,
    },

    /// Walk through sign-up, grant and redemption on an in-memory ledger
    Demo,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    greenafrica_logging::init(cli.verbose);

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading settings from {:?}", cli.config))?;
    settings.apply_overrides(|key| std::env::var(key).ok())?;

    match cli.command {
        Commands::Demo => run_demo(settings).await,
        command => run_command(command, &settings).await,
    }
}

async fn run_command(command: Commands, settings: &Settings) -> Result<()> {
    let (gateways, mock) = Gateways::from_settings(settings)?;
    if mock.is_some() {
        info!("Ledger is in mock mode; balances do not outlive this process");
    }
    let points = PointsLedger::new(gateways.clone(), settings);
    let accounts = AccountService::new(gateways.clone(), settings);

    match command {
        Commands::OpenAccount {
            user_id,
            name,
            email,
            phone,
            referred_by,
        } => {
            let identity = UserIdentity {
                user_id,
                display_name: name,
                email,
                phone_number: phone,
            };
            open_account(&accounts, &points, &identity, referred_by.as_deref()).await?;
        }
        Commands::Migrate { user_id } => {
            let migration = accounts.migrate_legacy(&user_id).await?;
            if migration.migrated {
                println!(
                    "Migrated {} -> {}",
                    migration.previous_green_id.unwrap_or_default(),
                    migration.account.green_id
                );
            } else {
                println!("{} needs no migration ({})", user_id, migration.account.green_id);
            }
        }
        Commands::Grant {
            user_id,
            points: amount,
            code,
            session,
            device,
        } => {
            let mut request = GrantRequest::earned(user_id, amount, code);
            request.session_id = session;
            request.device_id = device;
            let receipt = points.grant(request).await?;
            println!("Granted {} points ({})", amount, receipt.transaction);
            if let Some(tx) = receipt.registry_transaction {
                println!("Registry deposit: {}", tx);
            }
        }
        Commands::Referral { code, referred } => {
            let receipt = points.award_referral_code(&code, &referred).await?;
            println!("Referral bonus granted ({})", receipt.transaction);
        }
        Commands::Redeem {
            user_id,
            points: amount,
            phone,
            carrier,
        } => {
            let mut request = RedeemRequest::airtime(user_id, amount, phone);
            request.carrier = carrier;
            let receipt = points.redeem_airtime(request).await?;
            println!(
                "Redemption {} completed: {} {} airtime to {}",
                receipt.redemption_id, amount, receipt.carrier, receipt.phone
            );
            println!("Provider reference: {}", receipt.billing.reference);
        }
        Commands::RegisterDevice {
            device_id,
            lat,
            lng,
            name,
            meta_uri,
        } => {
            let device = Device {
                device_id,
                latitude: lat,
                longitude: lng,
                name,
                meta_uri,
            };
            match gateways.registry.register_device(&device).await? {
                Some(tx) => println!("Registered {} ({})", device.device_id, tx),
                None => println!("Registry not configured; {} not registered", device.device_id),
            }
        }
        Commands::Balance { user_id, compare } => {
            print_balance(&accounts, &user_id).await?;
            if compare {
                let comparison = accounts.compare_points(&user_id).await?;
                match comparison.registry_points {
                    Some(registry) if comparison.in_sync() => println!("Registry: {} points (in sync)", registry),
                    Some(registry) => println!("Registry: {} points (differs from ledger)", registry),
                    None => println!("Registry: no entry"),
                }
            }
        }
        Commands::History { user_id, limit } => {
            let history = accounts.history(&user_id, limit).await?;
            print_history(&history);
        }
        Commands::Redemptions { user_id } => {
            let redemptions = accounts.redemptions(&user_id).await?;
            if redemptions.is_empty() {
                println!("No redemptions");
            }
            for r in redemptions {
                println!(
                    "{}  {:<10} {:>6} {:<8} {}  {}",
                    r.created_at.format("%Y-%m-%d %H:%M"),
                    r.status,
                    r.points,
                    r.carrier,
                    r.phone,
                    r.failure_reason.unwrap_or_default()
                );
            }
        }
        Commands::Demo => run_demo(settings.clone()).await?,
    }

    Ok(())
}

async fn open_account(
    accounts: &AccountService,
    points: &PointsLedger,
    identity: &UserIdentity,
    referred_by: Option<&str>,
) -> Result<()> {
    let account = accounts.open_account(identity, referred_by).await?;
    println!("Account:       {}", account.user_id);
    println!("Green ID:      {}", account.green_id);
    if let Some(evm) = account.evm_address {
        println!("EVM address:   {}", evm);
    }
    println!("Referral code: {}", account.referral_code);

    if let Some(code) = referred_by {
        let receipt = points.award_referral_code(code, &account.user_id).await?;
        println!("Referral bonus granted ({})", receipt.transaction);
    }
    Ok(())
}

async fn print_balance(accounts: &AccountService, user_id: &str) -> Result<()> {
    let view = accounts.balance(user_id).await?;
    let source = match view.source {
        BalanceSource::Ledger(backend) => format!("ledger, {:?}", backend),
        BalanceSource::Mirror => "mirror".to_string(),
    };
    println!("{}: {} points ({})", view.user_id, view.display, source);
    Ok(())
}

fn print_history(history: &[TransactionRecord]) {
    if history.is_empty() {
        println!("No transactions");
    }
    for t in history {
        println!(
            "{}  {:<9} {:>7}  {}",
            t.created_at.format("%Y-%m-%d %H:%M"),
            t.kind,
            t.amount,
            t.description
        );
    }
}

// ============================================================================
// Demo
// ============================================================================

async fn run_demo(mut settings: Settings) -> Result<()> {
    if settings.ledger.mode != GatewayMode::Mock || settings.billing.mode != GatewayMode::Mock {
        bail!("demo only runs with ledger and billing in mock mode");
    }
    // Ids the in-memory ledger will accept
    settings.ledger.operator_id.get_or_insert(EntityId::new(0, 0, 2));
    settings.ledger.token_id.get_or_insert(EntityId::new(0, 0, 5001));
    settings
        .registry
        .contract_address
        .get_or_insert(EntityId::new(0, 0, 5003).to_evm_address());
    if settings.custody.encryption_key.is_empty() {
        settings.custody.encryption_key = greenafrica_core::Secret::new("demo-custody-key");
    }
    // Never touch a configured snapshot
    settings.mirror.snapshot_path = None;

    let (gateways, mock) = Gateways::from_settings(&settings)?;
    let mock: MockLedger = mock.context("mock ledger missing in mock mode")?;
    info!("Demo ledger treasury {}", mock.treasury());

    let points = PointsLedger::new(gateways.clone(), &settings);
    let accounts = AccountService::new(gateways.clone(), &settings);

    println!("== Collection machine");
    let device = Device {
        device_id: settings.registry.device_id.clone(),
        latitude: 6.433402,
        longitude: 3.541907,
        name: "iFitness Orchid".to_string(),
        meta_uri: String::new(),
    };
    if let Some(tx) = gateways.registry.register_device(&device).await? {
        println!("{} registered ({})", device.device_id, tx);
    }

    println!("\n== Sign-up");
    let ada = UserIdentity {
        user_id: "demo-ada".to_string(),
        display_name: "Ada Obi".to_string(),
        email: None,
        phone_number: Some("08031234567".to_string()),
    };
    let referrer = accounts.open_account(&ada, None).await?;
    println!("{} -> {}", referrer.user_id, referrer.green_id);

    let tunde = UserIdentity {
        user_id: "demo-tunde".to_string(),
        display_name: "Tunde Bello".to_string(),
        email: None,
        phone_number: None,
    };
    open_account(&accounts, &points, &tunde, Some(&referrer.referral_code)).await?;

    println!("\n== Recycling reward");
    let receipt = points
        .grant(GrantRequest::earned("demo-tunde", 300, "RVM-DEMO-0001"))
        .await?;
    println!("Granted 300 points ({})", receipt.transaction);
    match points
        .grant(GrantRequest::earned("demo-tunde", 300, "RVM-DEMO-0001"))
        .await
    {
        Err(e) => println!("Replay rejected: {}", e),
        Ok(_) => bail!("replayed reward code was granted twice"),
    }

    println!("\n== Redemption");
    match points
        .redeem_airtime(RedeemRequest::airtime("demo-tunde", 1000, "08051234567"))
        .await
    {
        Err(e) => println!("Rejected: {}", e),
        Ok(_) => bail!("redemption above balance succeeded"),
    }
    let redemption = points
        .redeem_airtime(RedeemRequest::airtime("demo-tunde", 200, "08051234567"))
        .await?;
    println!(
        "{} {} airtime to {} ({})",
        redemption.billing.reference, redemption.carrier, redemption.phone, redemption.redemption_id
    );

    println!("\n== Balances");
    print_balance(&accounts, "demo-ada").await?;
    print_balance(&accounts, "demo-tunde").await?;

    println!("\n== History (demo-tunde)");
    print_history(&accounts.history("demo-tunde", 10).await?);
    Ok(())
}
