//! # CLI Layer
//!
//! The only place in the workspace that:
//! - Knows about stdout, stderr and the data file on disk
//! - Handles argument parsing
//! - Installs the tracing subscriber
//!
//! ## Responsibilities
//!
//! 1. **Argument Parsing**: shell arguments to typed commands via clap
//! 2. **Context Setup**: configuration, snapshot, repository and gateway
//! 3. **Dispatch**: one handler per subcommand
//! 4. **Persistence**: successful writes are saved back to the snapshot

use super::render;
use super::setup::{parse_cli, Cli, Commands, ConfigCommands};
use anyhow::{bail, Context};
use querygate::store::memory::{MemoryRepository, Snapshot};
use querygate::{blog, ActionRequest, Actor, Gateway, GatewayConfig, ListRequest};
use serde_json::Value;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

pub fn run() -> anyhow::Result<()> {
    let cli = parse_cli();
    init_logging(cli.verbose);

    let config = GatewayConfig::load(cli.config.as_deref())?;
    let actor = actor(&cli);

    match &cli.command {
        Commands::Config { action } => handle_config(action, &config)?,
        Commands::Routes => {
            let (_, gateway) = build(&cli, config)?;
            print!("{}", render::routes(&gateway.routes()));
        }
        Commands::List { alias, params } => {
            let (_, gateway) = build(&cli, config)?;
            let request = ListRequest::from_query_pairs(alias.as_str(), parse_params(params)?);
            let response = gateway.list(&request, actor.as_ref())?;
            println!("{}", render::json(&response)?);
        }
        Commands::Action {
            alias,
            name,
            id,
            payload,
            ip,
            dry_run,
        } => {
            let (repo, gateway) = build(&cli, config)?;
            let mut request = ActionRequest::new(alias.as_str(), name.as_str())
                .payload(read_payload(payload.as_deref())?);
            if let Some(id) = id {
                request = request.id(*id);
            }
            if let Some(ip) = ip {
                request = request.client_ip(ip.as_str());
            }
            let response = gateway.execute(&request, actor.as_ref())?;
            let mutates = gateway.registry().get(alias)?.action(name)?.mutates;
            if mutates && !dry_run {
                if let Some(path) = &cli.data {
                    save_snapshot(path, &repo.snapshot())?;
                }
            }
            println!("{}", render::json(&response)?);
        }
    }
    Ok(())
}

fn build(cli: &Cli, config: GatewayConfig) -> anyhow::Result<(Arc<MemoryRepository>, Gateway)> {
    let repo = Arc::new(load_repository(cli.data.as_deref())?);
    let gateway = Gateway::new(blog::registry()?, repo.clone(), config);
    Ok((repo, gateway))
}

/// Writes a failure to stderr: gateway errors as an error envelope, anything
/// else as a one-line message.
pub fn report(err: &anyhow::Error) {
    match err.downcast_ref::<querygate::GatewayError>() {
        Some(gateway_err) => eprintln!("{}", render::error(gateway_err)),
        None => eprintln!("Error: {:#}", err),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "querygate=debug,qgate=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn actor(cli: &Cli) -> Option<Actor> {
    cli.actor.map(|id| {
        cli.role
            .iter()
            .fold(Actor::new(id), |actor, role| actor.with_role(role.as_str()))
    })
}

fn handle_config(action: &ConfigCommands, config: &GatewayConfig) -> anyhow::Result<()> {
    match action {
        ConfigCommands::Show => println!("{}", render::json(config)?),
        ConfigCommands::Template => print!("{}", GatewayConfig::template()),
    }
    Ok(())
}

fn parse_params(params: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    params
        .iter()
        .map(|param| match param.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => bail!("expected KEY=VALUE, got '{}'", param),
        })
        .collect()
}

fn read_payload(raw: Option<&str>) -> anyhow::Result<Value> {
    let text = match raw {
        None => return Ok(Value::Object(Default::default())),
        Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading payload from stdin")?;
            buf
        }
        Some(text) => text.to_string(),
    };
    let payload: Value = serde_json::from_str(&text).context("payload is not valid JSON")?;
    if !payload.is_object() {
        bail!("payload must be a JSON object");
    }
    Ok(payload)
}

fn load_repository(path: Option<&Path>) -> anyhow::Result<MemoryRepository> {
    let snapshot = match path {
        Some(path) if path.exists() => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let snapshot: Snapshot = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            info!(path = %path.display(), tables = snapshot.tables.len(), "snapshot loaded");
            snapshot
        }
        _ => Snapshot::default(),
    };
    Ok(MemoryRepository::from_snapshot(blog::schema(), snapshot)?)
}

fn save_snapshot(path: &Path, snapshot: &Snapshot) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    debug!(path = %path.display(), "snapshot saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_split_on_the_first_equals() {
        let pairs = parse_params(&["title[like]=a=b".to_string(), "page=2".to_string()]).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("title[like]".to_string(), "a=b".to_string()),
                ("page".to_string(), "2".to_string())
            ]
        );
        assert!(parse_params(&["oops".to_string()]).is_err());
        assert!(parse_params(&["=x".to_string()]).is_err());
    }

    #[test]
    fn payload_defaults_to_an_empty_object() {
        assert_eq!(read_payload(None).unwrap(), serde_json::json!({}));
        assert_eq!(read_payload(Some(r#"{"a":1}"#)).unwrap()["a"], 1);
        assert!(read_payload(Some("[1]")).is_err());
        assert!(read_payload(Some("{")).is_err());
    }

    #[test]
    fn snapshots_round_trip_through_the_data_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("blog.json");
        assert!(load_repository(Some(&path)).unwrap().snapshot().tables.is_empty());

        let repo = load_repository(None).unwrap();
        let mut attrs = serde_json::Map::new();
        attrs.insert("name".into(), serde_json::json!("Tech"));
        querygate::store::Repository::create(&repo, "tags", attrs).unwrap();
        save_snapshot(&path, &repo.snapshot()).unwrap();

        let reloaded = load_repository(Some(&path)).unwrap();
        assert_eq!(reloaded.snapshot(), repo.snapshot());
    }
}
