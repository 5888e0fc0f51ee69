mod cli;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use cli::{Cli, Command, NotificationArgs, OnboardingAction, SettingsCommand};
use jobpulse_client_core::auth::{self, oauth};
use jobpulse_client_core::config::ClientConfig;
use jobpulse_client_core::dashboard::Dashboard;
use jobpulse_client_core::model::{
    ApplicationRecord, NotificationChannel, NotificationEntry, NotificationStatus,
    OnboardingState, OnboardingStep, UserProfile,
};
use jobpulse_client_core::notify::{ChannelNotifier, Notice};
use jobpulse_client_core::session::SessionManager;
use jobpulse_client_core::settings::{MANUAL_REVOKE_DELAY, Settings};
use jobpulse_client_core::support::SupportClient;
use jobpulse_client_core::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init(&cli.logging.to_config())?;
    let config = ClientConfig::from_env()?;

    let (notifier, notices) = ChannelNotifier::new();
    let printer = tokio::spawn(print_notices(notices));

    let store = auth::open_store(&config)?;
    let session = SessionManager::new(&config, store, Arc::new(notifier))?;
    let result = run(cli.command, &config, session).await;

    // The printer ends once every notifier clone is gone.
    let _ = tokio::time::timeout(Duration::from_millis(250), printer).await;
    result
}

async fn run(command: Command, config: &ClientConfig, session: SessionManager) -> Result<()> {
    match command {
        Command::AuthUrl(args) => {
            println!("{}", oauth::authorization_url(config, args.state.as_deref()));
        }
        Command::Login(args) => {
            let code = match (args.code, args.redirect) {
                (Some(code), _) => code,
                (None, Some(redirect)) => oauth::code_from_redirect(&redirect)?,
                (None, None) if args.test => String::new(),
                (None, None) => bail!("pass --code or --redirect (see `jobpulse auth-url`)"),
            };
            let outcome = session
                .login_with_authorization_artifact(&code, args.test)
                .await?;
            print_profile(&outcome.profile);
            if outcome.first_time {
                println!("First login: run `jobpulse onboarding` for a quick tour.");
            }
        }
        Command::Status => {
            let snapshot = session.initialize().await;
            match snapshot.profile {
                Some(profile) if snapshot.authenticated => print_profile(&profile),
                _ => println!("Not logged in."),
            }
        }
        Command::Logout => {
            session.logout()?;
            println!("Logged out.");
        }
        Command::Watch => {
            restore(&session).await?;
            watch(Dashboard::new(session, config)).await?;
        }
        Command::Rescan => {
            restore(&session).await?;
            let dashboard = Dashboard::new(session, config);
            let records = dashboard.rescan().await?;
            print_records(&records);
        }
        Command::Settings(command) => {
            restore(&session).await?;
            let settings = Settings::new(session);
            let profile = match command {
                SettingsCommand::Name { name } => settings.update_name(&name).await?,
                SettingsCommand::Discord { webhook } => {
                    settings.set_discord_webhook(&webhook).await?
                }
                SettingsCommand::Notifications(args) => {
                    let (entries, trigger) = parse_notifications(&args)?;
                    settings.update_notifications(&entries, trigger).await?
                }
            };
            print_profile(&profile);
        }
        Command::Delete(args) => {
            restore(&session).await?;
            let outcome = Settings::new(session)
                .delete_account(&args.confirm_email)
                .await?;
            if let Some(url) = outcome.manual_revoke {
                tokio::time::sleep(MANUAL_REVOKE_DELAY).await;
                println!("Revoke JobPulse's access manually at {url}");
            }
        }
        Command::Onboarding(args) => {
            let settings = Settings::new(session);
            let state = match args.action {
                None => settings.onboarding()?.unwrap_or_default(),
                Some(OnboardingAction::Next) => settings.advance_onboarding()?,
                Some(OnboardingAction::Back) => settings.back_onboarding()?,
                Some(OnboardingAction::Complete) => settings.complete_onboarding()?,
                Some(OnboardingAction::Reset) => settings.reset_onboarding()?,
            };
            print_onboarding(&state);
        }
        Command::Support(args) => {
            let sender = session.initialize().await.profile.map(|profile| profile.email);
            let support = SupportClient::new(config, session.notifier().clone())?;
            support
                .send(&args.subject, &args.message, sender.as_deref())
                .await?;
        }
    }
    Ok(())
}

async fn restore(session: &SessionManager) -> Result<UserProfile> {
    session.initialize().await;
    session
        .require_profile()
        .context("not logged in; run `jobpulse login` first")
}

async fn watch(mut dashboard: Dashboard) -> Result<()> {
    dashboard.mount()?;
    let mut records = dashboard
        .records()
        .ok_or_else(|| anyhow!("dashboard did not mount"))?;
    if dashboard.needs_webhook_banner() {
        println!("No Discord webhook configured; run `jobpulse settings discord <url>`.");
    }
    println!("Watching for application updates (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            changed = records.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = records.borrow_and_update().clone();
                print_records(&current);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    dashboard.teardown().await;
    Ok(())
}

fn parse_notifications(
    args: &NotificationArgs,
) -> Result<(Vec<NotificationEntry>, Option<NotificationStatus>)> {
    let trigger = args
        .status
        .as_deref()
        .map(str::parse::<NotificationStatus>)
        .transpose()
        .map_err(|err| anyhow!(err))?;
    let entries = args
        .entries
        .iter()
        .map(|raw| {
            let (channel, value) = raw
                .split_once('=')
                .ok_or_else(|| anyhow!("expected CHANNEL=VALUE, got '{raw}'"))?;
            let channel = channel
                .parse::<NotificationChannel>()
                .map_err(|err| anyhow!(err))?;
            Ok(NotificationEntry {
                channel,
                value: value.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((entries, trigger))
}

async fn print_notices(mut notices: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        eprintln!("{notice}");
    }
}

fn print_profile(profile: &UserProfile) {
    println!("{} <{}>", profile.name, profile.email);
    if profile.is_test_user {
        println!("  test account");
    }
    println!(
        "  discord webhook: {}",
        if profile.has_discord_webhook() { "configured" } else { "not configured" }
    );
    println!(
        "  gmail filter: {}",
        if profile.has_email_filter() { "created" } else { "not created" }
    );
    for entry in profile.notification_entries() {
        println!("  notify {} at {}", entry.channel, entry.value);
    }
    if let Some(trigger) = profile.trigger_status() {
        println!("  on status: {trigger}");
    }
}

fn print_records(records: &[ApplicationRecord]) {
    if records.is_empty() {
        println!("No job applications found yet.");
        return;
    }
    for record in records {
        let updated = record
            .timestamp
            .map(|ts| ts.date().to_string())
            .unwrap_or_default();
        println!(
            "{:<24} {:<28} {:<20} {:<16} {}",
            record.company, record.role, record.status, record.location, updated
        );
    }
}

fn print_onboarding(state: &OnboardingState) {
    if state.completed {
        println!("Onboarding complete.");
        return;
    }
    let last = OnboardingStep::SEQUENCE.len() - 1;
    println!(
        "Step {} of {}: {}",
        state.step_index.min(last) + 1,
        last + 1,
        state.step().title()
    );
}
