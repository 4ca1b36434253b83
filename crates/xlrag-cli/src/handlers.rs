//! Command handlers.

use crate::config::{CliConfig, OutputFormat};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use xlrag_cache::{
    DiskStore, DistributedCache, DistributedConfig, FingerprintPolicy, make_key_with,
};

type HandlerResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Serialize)]
struct KeyReport<'a> {
    file_path: &'a Path,
    identity: &'a str,
    file_fingerprint: &'a str,
    options_fingerprint: &'a str,
    policy: FingerprintPolicy,
}

#[derive(Serialize)]
struct InspectRow {
    identity: String,
    file_path: PathBuf,
    fresh: bool,
    stored_size: u64,
    original_size: u64,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Parse `name=value` pairs into an options mapping.
pub fn parse_options(pairs: &[String]) -> Result<Map<String, Value>, String> {
    let mut options = Map::new();
    for pair in pairs {
        let (name, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid option '{}', expected NAME=VALUE", pair))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("Invalid option '{}', name is empty", pair));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        options.insert(name.to_string(), value);
    }
    Ok(options)
}

pub fn key(config: &CliConfig, file: &Path, options: &[String], content: bool) -> HandlerResult {
    let options = parse_options(options)?;
    let policy = if content {
        FingerprintPolicy::Content
    } else {
        config.cache.fingerprint
    };
    let key = make_key_with(file, &options, policy)?;
    debug!(identity = %key, "Key generated");

    let report = KeyReport {
        file_path: &key.file_path,
        identity: key.identity(),
        file_fingerprint: &key.file_fingerprint,
        options_fingerprint: &key.options_fingerprint,
        policy: key.policy,
    };
    match config.output_format {
        OutputFormat::Table => {
            println!("file:      {}", report.file_path.display());
            println!("identity:  {}", report.identity);
            println!("file fp:   {}", report.file_fingerprint);
            println!("options:   {}", report.options_fingerprint);
            println!("policy:    {:?}", report.policy);
        }
        format => print_structured(&report, format)?,
    }
    Ok(())
}

pub fn placement(
    config: &CliConfig,
    file: &Path,
    options: &[String],
    nodes: Option<u32>,
    replicas: Option<usize>,
) -> HandlerResult {
    let options = parse_options(options)?;
    let key = make_key_with(file, &options, config.cache.fingerprint)?;

    let cluster_config = DistributedConfig {
        node_count: nodes.unwrap_or(config.distributed.node_count),
        replication_factor: replicas.unwrap_or(config.distributed.replication_factor),
        node: xlrag_cache::CacheConfig {
            persist_dir: None,
            ..config.distributed.node.clone()
        },
    };
    let cluster = DistributedCache::new(cluster_config)?;
    let placement = cluster.placement(key.identity());

    match config.output_format {
        OutputFormat::Table => {
            println!("identity:  {}", key.identity());
            println!("primary:   {}", placement.primary);
            let replicas: Vec<String> = placement.replicas.iter().map(|r| r.to_string()).collect();
            println!("replicas:  {}", replicas.join(", "));
        }
        format => print_structured(&placement, format)?,
    }
    Ok(())
}

pub fn inspect(config: &CliConfig, dir: Option<PathBuf>) -> HandlerResult {
    let store = DiskStore::new(resolve_dir(config, dir)?);
    let listing = store.list()?;

    let rows: Vec<InspectRow> = listing
        .entries
        .iter()
        .map(|header| InspectRow {
            identity: header.identity.clone(),
            file_path: header.file_path.clone(),
            fresh: header.key().is_fresh(),
            stored_size: header.stored_size,
            original_size: header.original_size,
            created_at: header.created_at,
        })
        .collect();

    match config.output_format {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("No cache entries in {}", store.root().display());
            } else {
                println!("{:<16} {:<6} {:>10} {:<20} SOURCE", "IDENTITY", "FRESH", "SIZE", "CREATED");
                for row in &rows {
                    println!(
                        "{:<16} {:<6} {:>10} {:<20} {}",
                        &row.identity[..16.min(row.identity.len())],
                        if row.fresh { "yes" } else { "no" },
                        row.stored_size,
                        row.created_at.format("%Y-%m-%d %H:%M:%S"),
                        row.file_path.display()
                    );
                }
            }
            if !listing.unreadable.is_empty() {
                println!("{} unreadable file(s)", listing.unreadable.len());
            }
        }
        format => print_structured(&rows, format)?,
    }
    Ok(())
}

pub fn purge(config: &CliConfig, dir: Option<PathBuf>) -> HandlerResult {
    let store = DiskStore::new(resolve_dir(config, dir)?);
    let report = store.purge_stale()?;
    info!(
        dir = %store.root().display(),
        kept = report.kept,
        removed_stale = report.removed_stale,
        removed_corrupt = report.removed_corrupt,
        "Purge complete"
    );

    match config.output_format {
        OutputFormat::Table => println!(
            "kept {}, removed {} stale, removed {} corrupt",
            report.kept, report.removed_stale, report.removed_corrupt
        ),
        format => print_structured(&report, format)?,
    }
    Ok(())
}

pub fn show_config(config: &CliConfig) -> HandlerResult {
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}

pub fn config_path(path: Option<&Path>) -> HandlerResult {
    match path {
        Some(p) => println!("{}", p.display()),
        None => println!("{}", CliConfig::config_path()?.display()),
    }
    Ok(())
}

fn resolve_dir(config: &CliConfig, dir: Option<PathBuf>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    dir.or_else(|| config.cache.persist_dir.clone())
        .or_else(CliConfig::default_cache_dir)
        .ok_or_else(|| "No cache directory given or configured".into())
}

fn print_structured<T: Serialize>(value: &T, format: OutputFormat) -> HandlerResult {
    match format {
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_options() {
        let pairs = vec![
            "sheet=売上".to_string(),
            "header_rows=2".to_string(),
            "detect=[\"pivot\"]".to_string(),
            "note=a=b".to_string(),
        ];
        let options = parse_options(&pairs).unwrap();
        assert_eq!(
            Value::Object(options),
            json!({
                "sheet": "売上",
                "header_rows": 2,
                "detect": ["pivot"],
                "note": "a=b",
            })
        );
    }

    #[test]
    fn test_parse_options_rejects_missing_value() {
        assert!(parse_options(&["sheet".to_string()]).is_err());
        assert!(parse_options(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_resolve_dir_prefers_argument() {
        let config = CliConfig::default();
        let dir = resolve_dir(&config, Some(PathBuf::from("/tmp/cache"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/cache"));
    }

    #[test]
    fn test_purge_and_inspect_on_empty_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = CliConfig::default();
        inspect(&config, Some(dir.path().to_path_buf())).unwrap();
        purge(&config, Some(dir.path().to_path_buf())).unwrap();
    }
}
