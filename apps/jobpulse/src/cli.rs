use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use jobpulse_client_core::telemetry::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "jobpulse",
    about = "Track job applications scanned from your inbox",
    version
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        global = true,
        value_enum,
        env = "JOBPULSE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        global = true,
        value_name = "PATH",
        env = "JOBPULSE_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the Google consent URL to start a login
    AuthUrl(AuthUrlArgs),
    /// Exchange an authorization code for a session
    Login(LoginArgs),
    /// Restore the stored session and show the signed-in profile
    Status,
    /// Forget the stored session
    Logout,
    /// Follow application updates in realtime until interrupted
    Watch,
    /// Ask the backend to rescan the mailbox and print the result
    Rescan,
    /// Change account settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Permanently delete the account
    Delete(DeleteArgs),
    /// Show or move through the onboarding steps
    Onboarding(OnboardingArgs),
    /// Send a message to the JobPulse team
    Support(SupportArgs),
}

#[derive(Args, Debug)]
pub struct AuthUrlArgs {
    #[arg(long, help = "Opaque state echoed back on the redirect")]
    pub state: Option<String>,
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    #[arg(long, conflicts_with = "redirect", help = "Authorization code from the redirect")]
    pub code: Option<String>,

    #[arg(long, value_name = "URL", help = "Full redirect URL; the code is read from it")]
    pub redirect: Option<String>,

    #[arg(long, help = "Log in as a test account (reuses a stored test account)")]
    pub test: bool,
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommand {
    /// Change the display name
    Name { name: String },
    /// Set the Discord webhook that receives application updates
    Discord { webhook: String },
    /// Replace notification channels and the status that triggers them
    Notifications(NotificationArgs),
}

#[derive(Args, Debug)]
pub struct NotificationArgs {
    #[arg(long, help = "Status that triggers a notification")]
    pub status: Option<String>,

    #[arg(
        long = "entry",
        value_name = "CHANNEL=VALUE",
        help = "Notification target, e.g. sms=+15550100 (repeatable)"
    )]
    pub entries: Vec<String>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[arg(long, value_name = "EMAIL", help = "Account email, typed again to confirm")]
    pub confirm_email: String,
}

#[derive(Args, Debug)]
pub struct OnboardingArgs {
    #[arg(value_enum)]
    pub action: Option<OnboardingAction>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OnboardingAction {
    Next,
    Back,
    Complete,
    Reset,
}

#[derive(Args, Debug)]
pub struct SupportArgs {
    #[arg(long)]
    pub subject: String,

    #[arg(long)]
    pub message: String,
}
