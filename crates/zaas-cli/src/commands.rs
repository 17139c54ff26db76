use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::json;
use tracing::{error, warn};

use zaas_core::config::{Settings, SettingsOverrides};
use zaas_core::identity::InstanceIdentity;
use zaas_core::manager::ManagerConfig;
use zaas_core::state::ProvisioningState;
use zaas_runtime::pairing::TerminalPairing;
use zaas_runtime::privilege::{EffectiveUid, Privilege};
use zaas_runtime::sso::HttpSsoClient;
use zaas_runtime::store::IdentityStore;
use zaas_runtime::telemetry::ProcTelemetry;
use zaas_runtime::vm_probe::SystemdDetectVirt;
use zaas_runtime::{Bootstrap, BootstrapError, Outcome};

use crate::logging;
use crate::ui;

#[derive(Parser)]
#[command(
    name = "zaas-bootstrap",
    version,
    about = "Bootstrap a ZaaS appliance: identity, manual pairing and fleet registration"
)]
struct Cli {
    /// Directory holding the instance identity and manager config [env: ZAAS_CONFIG_DIR]
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// JSON log file [env: ZAAS_LOG_FILE]
    #[arg(long, global = true, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// HTTP timeout in seconds for SSO and manager calls [env: ZAAS_HTTP_TIMEOUT_SECS]
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full bootstrap: identity, pairing, credential exchange, registration
    Run,
    /// Retry only the fleet-manager registration (requires an issued client secret)
    Register,
    /// Show identity and provisioning state without touching the network
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

impl Commands {
    /// Commands that write to the config dir and talk to the network.
    fn provisions(&self) -> bool {
        matches!(self, Commands::Run | Commands::Register)
    }
}

/// Only privileged provisioning runs open the JSON log file.
fn log_file_for<'s>(
    command: &Commands,
    settings: &'s Settings,
    elevated: bool,
) -> Option<&'s Path> {
    (command.provisions() && elevated).then_some(settings.log_file.as_path())
}

impl Cli {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            config_dir: self.config_dir.clone(),
            log_file: self.log_file.clone(),
            http_timeout_secs: self.timeout,
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let settings = Settings::resolve(&cli.overrides());

    match &cli.command {
        Commands::Completions { .. } => {}
        command => {
            logging::init(log_file_for(command, &settings, EffectiveUid.is_elevated()));
            if command.provisions() {
                install_interrupt_handler();
            }
        }
    }

    let result = match cli.command {
        Commands::Run => cmd_run(&settings),
        Commands::Register => cmd_register(&settings),
        Commands::Status { json } => cmd_status(&settings, json),
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The single record of a fatal condition.
            error!("{}", describe(&e));
            ExitCode::from(exit_code(&e))
        }
    }
}

fn install_interrupt_handler() {
    let installed = ctrlc::set_handler(|| {
        let err = BootstrapError::InterruptedByOperator;
        error!("{}", err);
        std::process::exit(err.exit_code());
    });
    if let Err(e) = installed {
        warn!(error = %e, "cannot install interrupt handler");
    }
}

/// `BootstrapError` messages already embed their cause.
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<BootstrapError>() {
        Some(e) => e.to_string(),
        None => format!("{:#}", err),
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<BootstrapError>()
        .and_then(|e| u8::try_from(e.exit_code()).ok())
        .unwrap_or(1)
}

// ============================================================================
// Bootstrap commands
// ============================================================================

fn cmd_run(settings: &Settings) -> Result<()> {
    let store = IdentityStore::new(settings);
    let sso =
        HttpSsoClient::with_timeout(settings.http_timeout).context("failed to build HTTP client")?;
    let mut pairing = TerminalPairing::stdio(&settings.tty_path);
    let telemetry = ProcTelemetry::default();

    let outcome = Bootstrap::new(
        &store,
        &EffectiveUid,
        &SystemdDetectVirt,
        &mut pairing,
        &sso,
        &telemetry,
    )
    .run()?;

    report_outcome(outcome);
    Ok(())
}

fn cmd_register(settings: &Settings) -> Result<()> {
    let store = IdentityStore::new(settings);
    let sso =
        HttpSsoClient::with_timeout(settings.http_timeout).context("failed to build HTTP client")?;
    let mut pairing = TerminalPairing::stdio(&settings.tty_path);
    let telemetry = ProcTelemetry::default();

    let outcome = Bootstrap::new(
        &store,
        &EffectiveUid,
        &SystemdDetectVirt,
        &mut pairing,
        &sso,
        &telemetry,
    )
    .register_only()?;

    report_outcome(outcome);
    Ok(())
}

fn report_outcome(outcome: Outcome) {
    match outcome {
        Outcome::AlreadyConfigured => ui::success("Already configured, nothing to do."),
        Outcome::Registered => ui::success("Instance registered with ZaaS Manager."),
        Outcome::AwaitingToken => ui::warn(
            "Configuration saved without a token. Re-run once ZaaS Manager has issued one.",
        ),
    }
}

// ============================================================================
// Status
// ============================================================================

struct StatusReport {
    config_dir: PathBuf,
    identity: Option<InstanceIdentity>,
    state: ProvisioningState,
    config: Option<ManagerConfig>,
}

impl StatusReport {
    fn gather(store: &IdentityStore, config_dir: PathBuf) -> Result<Self> {
        let identity = store.load_identity()?;
        let config = store.load_config()?;
        let state = ProvisioningState::classify(identity.is_some(), config.as_ref());
        Ok(Self {
            config_dir,
            identity,
            state,
            config,
        })
    }

    fn registration_pending(&self) -> bool {
        self.config.as_ref().is_some_and(|c| c.registration_pending)
    }

    /// Registered and acknowledged by the fleet manager.
    fn complete(&self) -> bool {
        self.state.is_terminal() && !self.registration_pending()
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "config_dir": self.config_dir,
            "instance_id": self.identity,
            "state": self.state,
            "registration_pending": self.registration_pending(),
            "complete": self.complete(),
            "hostname": self.config.as_ref().map(|c| &c.hostname),
            "manager_url": self.config.as_ref().map(|c| &c.manager_url),
        })
    }

    fn print(&self) {
        let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());

        ui::status_header();
        ui::status_line("Config dir:", &self.config_dir.display().to_string());
        ui::status_line(
            "Instance ID:",
            &or_dash(self.identity.map(|id| id.to_string())),
        );
        ui::status_line("State:", &self.state.to_string());
        if self.registration_pending() {
            ui::status_line("Registration:", "pending");
        }
        ui::status_line(
            "Hostname:",
            &or_dash(self.config.as_ref().map(|c| c.hostname.clone())),
        );
        ui::status_line(
            "Manager:",
            &or_dash(self.config.as_ref().map(|c| c.manager_url.clone())),
        );
    }
}

fn cmd_status(settings: &Settings, json: bool) -> Result<()> {
    let store = IdentityStore::new(settings);
    let report = StatusReport::gather(&store, settings.config_dir.clone())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    } else {
        report.print();
    }
    Ok(())
}

fn cmd_completions(shell: clap_complete::Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "zaas-bootstrap", &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_DOC: &str = r#"{
        "manager_url": "https://manager.example.com",
        "api_path": "/api/v1/instances",
        "hostname": "edge-proxy-01",
        "sso": {
            "provider_url": "https://sso.example.com",
            "registration_path": "/clients",
            "token_path": "/token",
            "client_id": "edge-proxy-01",
            "client_secret": "abc"
        }
    }"#;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_become_overrides() {
        let cli = Cli::parse_from([
            "zaas-bootstrap",
            "status",
            "--config-dir",
            "/tmp/zaas",
            "--timeout",
            "5",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.config_dir, Some(PathBuf::from("/tmp/zaas")));
        assert_eq!(overrides.http_timeout_secs, Some(5));
        assert!(overrides.log_file.is_none());
    }

    #[test]
    fn test_log_file_only_for_privileged_provisioning() {
        let settings = Settings::in_dir(Path::new("/tmp/zaas"));
        assert_eq!(
            log_file_for(&Commands::Run, &settings, true),
            Some(settings.log_file.as_path())
        );
        assert_eq!(
            log_file_for(&Commands::Register, &settings, true),
            Some(settings.log_file.as_path())
        );
        assert_eq!(log_file_for(&Commands::Run, &settings, false), None);
        assert_eq!(log_file_for(&Commands::Register, &settings, false), None);
        assert_eq!(
            log_file_for(&Commands::Status { json: false }, &settings, true),
            None
        );
    }

    #[test]
    fn test_exit_codes() {
        let interrupted = anyhow::Error::new(BootstrapError::InterruptedByOperator);
        assert_eq!(exit_code(&interrupted), 130);

        let fatal = anyhow::Error::new(BootstrapError::MissingSecret);
        assert_eq!(exit_code(&fatal), 1);

        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }

    #[test]
    fn test_describe_does_not_repeat_cause() {
        let err = anyhow::Error::new(BootstrapError::Io {
            context: "failed to read operator confirmation".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed"),
        });
        assert_eq!(
            describe(&err),
            "failed to read operator confirmation: closed"
        );
    }

    #[test]
    fn test_status_of_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::in_dir(dir.path());
        let report =
            StatusReport::gather(&IdentityStore::new(&settings), settings.config_dir.clone())
                .unwrap();

        assert_eq!(report.state, ProvisioningState::Unprovisioned);
        let value = report.to_json();
        assert_eq!(value["state"], "unprovisioned");
        assert!(value["instance_id"].is_null());
        assert_eq!(value["registration_pending"], false);
        assert_eq!(value["complete"], false);
    }

    #[test]
    fn test_status_of_registered_instance() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::in_dir(dir.path());
        let store = IdentityStore::new(&settings);
        let identity = store.create_identity().unwrap();
        store
            .save_config(&ManagerConfig::from_json(SECRET_DOC).unwrap())
            .unwrap();

        let value = StatusReport::gather(&store, settings.config_dir.clone())
            .unwrap()
            .to_json();
        assert_eq!(value["state"], "registered");
        assert_eq!(value["instance_id"], identity.to_string());
        assert_eq!(value["hostname"], "edge-proxy-01");
        assert_eq!(value["complete"], true);
    }
}
