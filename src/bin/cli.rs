//! ota-state CLI - Main entry point for CLI binary
//!
//! This binary provides the `ota-state` tool for inspecting and seeding the
//! update store of a device or a flash image.

use anyhow::{bail, Context, Result};
use clap::Parser;
use ota_state_lib::engine::{
    cli::{
        formatter::{fingerprint, format_len, CliFormatter},
        parse_pair, ArtifactNameAction, Cli, Commands, DeploymentAction, KeysAction,
        OutputFormat, ProvidesAction, StateAction,
    },
    config::{BackendKind, ConfigError, StoreConfig, CONFIG_FILE},
    decide_boot_action, items, BootAction, ProvidesMap, StoreError, UpdateStore,
};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    if let Err(e) = run_cli(cli) {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_cli(cli: Cli) -> Result<()> {
    let root = cli.get_storage_root();
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Init { backend, force } => cmd_init(&root, backend, force, json_output),
        Commands::Status => cmd_status(&root, json_output),
        Commands::Keys { action } => cmd_keys(action, &root, json_output),
        Commands::Deployment { action } => cmd_deployment(action, &root, json_output),
        Commands::State { action } => cmd_state(action, &root, json_output),
        Commands::Provides { action } => cmd_provides(action, &root, json_output),
        Commands::ArtifactName { action } => cmd_artifact_name(action, &root, json_output),
    }
}

/// Config from the storage root, or defaults when none was written.
fn load_config(root: &Path) -> Result<StoreConfig> {
    match StoreConfig::load(root) {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) => Ok(StoreConfig::default_for_root(root)),
        Err(e) => Err(e).with_context(|| format!("loading config from {}", root.display())),
    }
}

fn open_store(root: &Path) -> Result<UpdateStore> {
    let config = load_config(root)?;
    UpdateStore::open(&config)
        .with_context(|| format!("opening {:?} store at {}", config.backend, root.display()))
}

/// `Ok(None)` for an absent item, so the caller can print "(none)".
fn optional<T>(result: Result<T, StoreError>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_init(root: &Path, backend: BackendKind, force: bool, json: bool) -> Result<()> {
    if root.join(CONFIG_FILE).exists() && !force {
        bail!(
            "{} already exists in {} (use --force to overwrite)",
            CONFIG_FILE,
            root.display()
        );
    }

    let mut config = StoreConfig::default_for_root(root);
    config.backend = backend;
    config.save(root)?;
    // formats the flash image or creates the item directory
    UpdateStore::open(&config)?;

    if json {
        print_json(&serde_json::json!({
            "success": true,
            "storage_root": root.display().to_string(),
            "config": config,
        }))
    } else {
        CliFormatter::success(&format!("Initialized {:?} store", backend));
        CliFormatter::kv("Root", &root.display().to_string());
        Ok(())
    }
}

fn cmd_status(root: &Path, json: bool) -> Result<()> {
    let config = load_config(root)?;
    let mut store = UpdateStore::open(&config)?;

    let artifact_name = store.get_artifact_name()?;
    let update_state = optional(store.get_update_state());
    let boot_action = decide_boot_action(&mut store)?;
    let keys = optional(store.get_authentication_keys())?;
    let deployment = optional(store.get_deployment_data())?;
    let provides = optional(store.get_provides())?.unwrap_or_default();

    if json {
        return print_json(&serde_json::json!({
            "storage_root": root.display().to_string(),
            "backend": config.backend,
            "artifact_name": artifact_name,
            "update_state": update_state.as_ref().ok().cloned().flatten(),
            "boot_action": boot_action,
            "keys": keys.as_ref().map(|pair| serde_json::json!({
                "private_key_len": pair.private_key().len(),
                "public_key_fingerprint": fingerprint(pair.public_key()),
            })),
            "deployment_data_len": deployment.as_ref().map(Vec::len),
            "provides": provides,
        }));
    }

    CliFormatter::header("Update Store Status");
    CliFormatter::kv("Root", &root.display().to_string());
    CliFormatter::kv("Backend", &format!("{:?}", config.backend));
    CliFormatter::kv("Artifact", &artifact_name);
    match &update_state {
        Ok(Some(record)) => {
            CliFormatter::kv("State", &format!("{} ({})", record.state, record.artifact_type))
        }
        Ok(None) => CliFormatter::kv("State", "(none)"),
        Err(e) => CliFormatter::kv("State", &format!("unreadable: {}", e)),
    }
    match &boot_action {
        BootAction::FreshStart => CliFormatter::kv("On boot", "fresh start"),
        BootAction::Resume { state, .. } => {
            CliFormatter::kv("On boot", &format!("resume from {}", state))
        }
        BootAction::Rollback { reason } => {
            CliFormatter::kv("On boot", &format!("rollback ({})", reason))
        }
    }
    match &keys {
        Some(pair) => CliFormatter::kv(
            "Keys",
            &format!("present, public {}", fingerprint(pair.public_key())),
        ),
        None => CliFormatter::kv("Keys", "(none)"),
    }
    CliFormatter::kv("Deployment", &format_len(deployment.as_ref().map(Vec::len)));

    if provides.is_empty() {
        CliFormatter::kv("Provides", "(none)");
    } else {
        CliFormatter::kv("Provides", "");
        for (key, value) in &provides {
            CliFormatter::item(&format!("{}={}", key, value));
        }
    }
    Ok(())
}

fn cmd_keys(action: KeysAction, root: &Path, json: bool) -> Result<()> {
    let mut store = open_store(root)?;

    match action {
        KeysAction::Set { private, public } => {
            let private_key = zeroize::Zeroizing::new(
                std::fs::read(&private)
                    .with_context(|| format!("reading {}", private.display()))?,
            );
            let public_key = std::fs::read(&public)
                .with_context(|| format!("reading {}", public.display()))?;
            store.set_authentication_keys(&private_key, &public_key)?;

            if json {
                print_json(&serde_json::json!({
                    "success": true,
                    "public_key_fingerprint": fingerprint(&public_key),
                }))?;
            } else {
                CliFormatter::success("Stored authentication keys");
                CliFormatter::kv("Public key", &fingerprint(&public_key));
            }
        }
        KeysAction::Show => {
            let keys = optional(store.get_authentication_keys())?;
            if json {
                print_json(&serde_json::json!({
                    "present": keys.is_some(),
                    "private_key_len": keys.as_ref().map(|pair| pair.private_key().len()),
                    "public_key_len": keys.as_ref().map(|pair| pair.public_key().len()),
                    "public_key_fingerprint": keys.as_ref().map(|pair| fingerprint(pair.public_key())),
                }))?;
            } else {
                match keys {
                    Some(pair) => {
                        CliFormatter::header("Authentication Keys");
                        CliFormatter::kv("Private key", &format_len(Some(pair.private_key().len())));
                        CliFormatter::kv("Public key", &format_len(Some(pair.public_key().len())));
                        CliFormatter::kv("Fingerprint", &fingerprint(pair.public_key()));
                    }
                    None => CliFormatter::info("No authentication keys stored"),
                }
            }
        }
        KeysAction::Delete => {
            store.delete_authentication_keys()?;
            report_deleted(&[items::PRIVATE_KEY, items::PUBLIC_KEY], json)?;
        }
    }

    Ok(())
}

fn cmd_deployment(action: DeploymentAction, root: &Path, json: bool) -> Result<()> {
    let mut store = open_store(root)?;

    match action {
        DeploymentAction::Set { file } => {
            let data = std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            store.set_deployment_data(&data)?;
            if json {
                print_json(&serde_json::json!({ "success": true, "len": data.len() }))?;
            } else {
                CliFormatter::success(&format!("Stored deployment data ({} bytes)", data.len()));
            }
        }
        DeploymentAction::Get => match optional(store.get_deployment_data())? {
            Some(data) => {
                let text = String::from_utf8_lossy(&data);
                if json {
                    // deployment data is JSON on the wire, fall back to a string otherwise
                    let value = serde_json::from_slice(&data)
                        .unwrap_or_else(|_| serde_json::Value::String(text.into_owned()));
                    print_json(&serde_json::json!({ "deployment_data": value }))?;
                } else {
                    println!("{}", text);
                }
            }
            None => {
                if json {
                    print_json(&serde_json::json!({ "deployment_data": null }))?;
                } else {
                    CliFormatter::info("No deployment data stored");
                }
            }
        },
        DeploymentAction::Delete => {
            store.delete_deployment_data()?;
            report_deleted(&[items::DEPLOYMENT_DATA], json)?;
        }
    }

    Ok(())
}

fn cmd_state(action: StateAction, root: &Path, json: bool) -> Result<()> {
    let mut store = open_store(root)?;

    match action {
        StateAction::Save { state, artifact_type } => {
            store.save_update_state(state, &artifact_type)?;
            if json {
                print_json(&serde_json::json!({
                    "success": true,
                    "state": state,
                    "artifact_type": artifact_type,
                }))?;
            } else {
                CliFormatter::success(&format!("Saved state {} ({})", state, artifact_type));
            }
        }
        StateAction::Get => {
            let record = optional(store.get_update_state())?;
            if json {
                print_json(&serde_json::json!({ "update_state": record }))?;
            } else {
                match record {
                    Some(record) => {
                        CliFormatter::kv("State", &format!("{} ({})", record.state, record.state.value()));
                        CliFormatter::kv("Artifact type", &record.artifact_type);
                    }
                    None => CliFormatter::info("No update in progress"),
                }
            }
        }
        StateAction::Delete => {
            store.delete_update_state()?;
            report_deleted(&[items::UPDATE_STATE], json)?;
        }
    }

    Ok(())
}

fn cmd_provides(action: ProvidesAction, root: &Path, json: bool) -> Result<()> {
    let mut store = open_store(root)?;

    match action {
        ProvidesAction::Set { pairs } => {
            let mut provides = ProvidesMap::new();
            for pair in &pairs {
                let (key, value) = parse_pair(pair).map_err(anyhow::Error::msg)?;
                if provides.insert(key.as_str(), value).is_some() {
                    CliFormatter::warning(&format!("Duplicate key {}, keeping the last value", key));
                }
            }
            store.set_provides(&provides)?;
            if json {
                print_json(&serde_json::json!({ "success": true, "provides": provides }))?;
            } else {
                CliFormatter::success(&format!("Stored {} provides", provides.len()));
            }
        }
        ProvidesAction::Get => {
            let provides = optional(store.get_provides())?.unwrap_or_default();
            if json {
                print_json(&serde_json::json!({ "provides": provides }))?;
            } else if provides.is_empty() {
                CliFormatter::info("No provides stored");
            } else {
                for (key, value) in &provides {
                    println!("{}={}", key, value);
                }
            }
        }
        ProvidesAction::Delete => {
            store.delete_provides()?;
            report_deleted(&[items::PROVIDES], json)?;
        }
    }

    Ok(())
}

fn cmd_artifact_name(action: ArtifactNameAction, root: &Path, json: bool) -> Result<()> {
    let mut store = open_store(root)?;

    match action {
        ArtifactNameAction::Set { name } => {
            store.set_artifact_name(&name)?;
            if json {
                print_json(&serde_json::json!({ "success": true, "artifact_name": name }))?;
            } else {
                CliFormatter::success(&format!("Artifact name set to {}", name));
            }
        }
        ArtifactNameAction::Get => {
            let name = store.get_artifact_name()?;
            if json {
                print_json(&serde_json::json!({ "artifact_name": name }))?;
            } else {
                println!("{}", name);
            }
        }
    }

    Ok(())
}

fn report_deleted(names: &[&str], json: bool) -> Result<()> {
    if json {
        print_json(&serde_json::json!({ "success": true, "deleted": names }))
    } else {
        for name in names {
            CliFormatter::success(&format!("Deleted {}", name));
        }
        Ok(())
    }
}
