//! GR8 Billing Reconciler
//!
//! Command-line counterpart of the billing-success page:
//! - `gr8-reconcile reconcile <return-url | session-id>`: poll the payment
//!   status after checkout and print the outcome; on success re-read the
//!   account plan
//! - `gr8-reconcile checkout <plan>`: create a checkout session and print the
//!   redirect URL
//! - `gr8-reconcile account`: print the current plan and usage
//!
//! Ctrl-C cancels an in-flight reconciliation without asserting an outcome.

use clap::{Parser, Subcommand};
use gr8_billing::{
    BillingService, Plan, Presentation, ReconcileState, RunEnd, SessionId, BILLING_PAGE,
};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll the payment status of a checkout session
    Reconcile {
        /// Return URL from the checkout provider, or the bare session id
        target: Option<String>,
    },
    /// Create a checkout session and print the redirect URL
    Checkout {
        /// free, starter or pro
        plan: Plan,
    },
    /// Print the current plan and usage
    Account,
}

/// A command that needs the billing backend
#[derive(Debug)]
enum Action {
    Reconcile(SessionId),
    Checkout(Plan),
    Account,
}

/// `None` means a reconcile without a usable session id, which goes back to
/// plan selection
fn resolve(command: Commands) -> Option<Action> {
    match command {
        Commands::Reconcile { target } => target
            .as_deref()
            .and_then(session_from_arg)
            .map(Action::Reconcile),
        Commands::Checkout { plan } => Some(Action::Checkout(plan)),
        Commands::Account => Some(Action::Account),
    }
}

/// Accept either the full return URL or the bare session id
fn session_from_arg(arg: &str) -> Option<SessionId> {
    match gr8_billing::status::parse_return_url(arg) {
        Some(url) => SessionId::from_return_url(&url),
        None => SessionId::new(arg).ok(),
    }
}

fn print_presentation(view: &Presentation) {
    println!("{}", view.title);
    println!("{}", view.message);
    if let Some(toast) = view.confirmation() {
        println!("{}", toast);
    }
    for action in &view.actions {
        match action.target() {
            Some(target) => println!("  -> {} ({})", action.label(), target),
            None => println!("  -> {}", action.label()),
        }
    }
}

async fn run_reconcile(billing: &BillingService, session_id: SessionId) -> anyhow::Result<()> {
    let mut slot = billing.reconcile_slot();
    let handle = slot.start(session_id);

    let mut progress = handle.progress();
    let watcher = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let current = *progress.borrow_and_update();
            if current.state == ReconcileState::Checking {
                println!("{}", Presentation::for_progress(&current).message);
            }
        }
    });

    let end = tokio::select! {
        end = handle.finished() => end,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling reconciliation");
            slot.cancel();
            watcher.abort();
            return Ok(());
        }
    };
    drop(slot);
    let _ = watcher.await;

    let report = match end {
        RunEnd::Finished(report) => report,
        RunEnd::Cancelled { session_id, .. } => {
            warn!(session_id = %session_id, "Reconciliation cancelled");
            return Ok(());
        }
    };

    let final_progress = gr8_billing::Progress {
        attempt: report.attempt,
        max_attempts: report.max_attempts,
        state: report.state(),
    };
    print_presentation(&Presentation::for_progress(&final_progress));

    if report.state() == ReconcileState::Success {
        match billing.account.current_account().await {
            Ok(account) => {
                info!(plan = %account.plan, "Plan refreshed after payment");
                println!("Current plan: {}", account.plan.display_name());
            }
            Err(e) => error!(error = %e, "Failed to refresh plan after payment"),
        }
    }

    Ok(())
}

async fn run_checkout(billing: &BillingService, plan: Plan) -> anyhow::Result<()> {
    match billing.checkout.create_checkout(plan).await? {
        Some(redirect) => println!("{}", redirect.url),
        None => println!("The {} plan does not need a checkout", plan.display_name()),
    }
    Ok(())
}

async fn run_account(billing: &BillingService) -> anyhow::Result<()> {
    let account = billing.account.current_account().await?;
    let limits = account.plan.limits();
    println!(
        "Plan: {} (${}/mo)",
        account.plan.display_name(),
        account.plan.monthly_price_usd()
    );
    println!(
        "AI interactions: {}/{}",
        account.usage.ai_interactions, limits.ai_interactions
    );
    println!("Chatbot messages: {}", account.usage.chatbot_messages);
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // The redirect needs no backend, so it is decided before config is read
    let Some(action) = resolve(cli.command) else {
        info!("No session id supplied, returning to plan selection");
        println!("Redirecting to {}", BILLING_PAGE);
        return Ok(());
    };

    let billing = BillingService::from_env()?;
    info!(api_url = %billing.client.config().api_url, "Billing client ready");

    match action {
        Action::Reconcile(session_id) => run_reconcile(&billing, session_id).await,
        Action::Checkout(plan) => run_checkout(&billing, plan).await,
        Action::Account => run_account(&billing).await,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse()).await
}
