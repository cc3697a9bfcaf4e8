//! ota-state CLI Module
//! Command-line interface for inspecting and seeding a device's update store

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::config::BackendKind;
use super::record::UpdateState;

#[derive(Parser, Debug)]
#[command(name = "ota-state")]
#[command(author = "ota-state Team")]
#[command(version)]
#[command(about = "Power-loss safe update-state store for OTA device clients", long_about = None)]
pub struct Cli {
    /// Storage root (defaults to the local data directory)
    #[arg(short, long, global = true)]
    pub root: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Log filter, overrides RUST_LOG
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default config into the storage root
    Init {
        /// Blob backend to use
        #[arg(short, long, default_value = "file")]
        backend: BackendKind,

        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Show every stored record and the boot decision
    Status,

    /// Authentication key management
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Pending deployment data
    Deployment {
        #[command(subcommand)]
        action: DeploymentAction,
    },

    /// Update lifecycle checkpoint
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Provides of the installed artifact
    Provides {
        #[command(subcommand)]
        action: ProvidesAction,
    },

    /// Name of the installed artifact
    ArtifactName {
        #[command(subcommand)]
        action: ArtifactNameAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum KeysAction {
    /// Store a key pair read from DER files
    Set {
        /// Private key file
        #[arg(long)]
        private: PathBuf,

        /// Public key file
        #[arg(long)]
        public: PathBuf,
    },

    /// Show key sizes and the public key fingerprint
    Show,

    /// Delete both keys
    Delete,
}

#[derive(Subcommand, Debug)]
pub enum DeploymentAction {
    /// Store deployment data read from a file
    Set {
        file: PathBuf,
    },

    /// Print the stored deployment data
    Get,

    /// Delete the deployment data
    Delete,
}

#[derive(Subcommand, Debug)]
pub enum StateAction {
    /// Persist a lifecycle checkpoint
    Save {
        /// Phase, e.g. download, verify_reboot
        state: UpdateState,

        /// Artifact type, e.g. rootfs-image
        artifact_type: String,
    },

    /// Print the stored checkpoint
    Get,

    /// Delete the checkpoint
    Delete,
}

#[derive(Subcommand, Debug)]
pub enum ProvidesAction {
    /// Replace the provides with the given pairs
    Set {
        /// Pairs in key=value form
        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Print the stored provides
    Get,

    /// Delete the provides
    Delete,
}

#[derive(Subcommand, Debug)]
pub enum ArtifactNameAction {
    /// Store the artifact name
    Set {
        name: String,
    },

    /// Print the artifact name
    Get,
}

impl Cli {
    pub fn get_storage_root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ota-state")
        })
    }
}

/// Split `key=value` command line pairs.
pub fn parse_pair(pair: &str) -> Result<(String, String), String> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", pair)),
    }
}
