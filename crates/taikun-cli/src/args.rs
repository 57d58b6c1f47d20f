//! Command-line surface.

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};

use taikun_core::config::Config;
use taikun_reconcile::Verb;
use taikun_reconcile::resources::catalog::FlavorFilter;

#[derive(Parser, Debug)]
#[command(name = "taikun")]
#[command(version, about = "Reconcile Taikun platform entities to a desired state", long_about = None)]
pub struct Cli {
    /// Config file to use instead of ~/.config/taikun/config.json
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Platform API host, e.g. api.taikun.cloud
    #[arg(long, global = true)]
    pub api_host: Option<String>,

    /// Emit JSON log lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Apply flags on top of file and environment configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(host) = &self.api_host {
            config.api.base_url = if host.starts_with("http://") || host.starts_with("https://") {
                host.clone()
            } else {
                format!("https://{host}")
            };
        }
        if self.log_json {
            config.logging.json = true;
        }
    }
}

/// Exit code for an argument-parsing outcome: `0` when clap only printed
/// help or the version, `1` for any usage error.
pub fn usage_exit_code(err: &clap::Error) -> u8 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an entity from a desired-state record
    Create(IntentArgs),
    /// Print the observed state of an entity
    Read(IntentArgs),
    /// Converge an existing entity to a desired-state record
    Update(IntentArgs),
    /// Delete an entity
    Delete(IntentArgs),
    /// List the flavors a cloud credential offers
    Flavors(FlavorArgs),
    /// List the images a cloud credential offers
    Images(CatalogArgs),
}

impl Command {
    pub const fn verb(&self) -> Option<Verb> {
        match self {
            Self::Create(_) => Some(Verb::Create),
            Self::Read(_) => Some(Verb::Read),
            Self::Update(_) => Some(Verb::Update),
            Self::Delete(_) => Some(Verb::Delete),
            Self::Flavors(_) | Self::Images(_) => None,
        }
    }
}

#[derive(Args, Debug)]
pub struct IntentArgs {
    /// Entity kind, e.g. `project` or `access-profile`
    pub kind: String,

    /// Entity id; composite kinds take `<parent>/<child>`
    #[arg(long)]
    pub id: Option<String>,

    /// Desired-state JSON record, `-` for stdin
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CatalogArgs {
    /// Cloud credential id
    #[arg(long)]
    pub credential: i32,
}

#[derive(Args, Debug)]
pub struct FlavorArgs {
    #[command(flatten)]
    pub catalog: CatalogArgs,

    #[arg(long)]
    pub min_cpu: Option<i32>,

    #[arg(long)]
    pub max_cpu: Option<i32>,

    /// Minimum RAM in GiB
    #[arg(long)]
    pub min_ram: Option<i64>,

    /// Maximum RAM in GiB
    #[arg(long)]
    pub max_ram: Option<i64>,
}

impl FlavorArgs {
    pub const fn filter(&self) -> FlavorFilter {
        FlavorFilter {
            min_cpu: self.min_cpu,
            max_cpu: self.max_cpu,
            min_ram_gib: self.min_ram,
            max_ram_gib: self.max_ram,
        }
    }
}
