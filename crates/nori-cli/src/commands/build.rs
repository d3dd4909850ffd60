//! Build command
//!
//! Loads a tank and its configuration, exports every entity and writes one
//! JSON file per resource into the output directory.

use anyhow::{Context, bail};
use nori_core::config::CONFIG_FILE_NAME;
use nori_core::export::ExportedResource;
use nori_core::{BuildOrchestrator, NoriConfig, SchemaRegistry, Tank};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::OutputFormat;
use crate::output::{BuildReport, OutputFormatter};

/// Arguments for `nori build`
#[derive(Debug)]
pub struct BuildArgs {
    pub tank: PathBuf,
    pub config_file: Option<PathBuf>,
    pub overrides: Vec<(String, String)>,
    pub schemas: Vec<PathBuf>,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub use_colors: bool,
}

/// Run the build. Returns `Ok(false)` when any error diagnostic was reported.
pub fn build_command(args: BuildArgs) -> anyhow::Result<bool> {
    let start = Instant::now();

    let tank = Tank::from_file(&args.tank)
        .with_context(|| format!("Failed to load tank {}", args.tank.display()))?;
    info!(
        "Loaded {} entities and {} rule sets from {}",
        tank.entities.len(),
        tank.rule_sets.len(),
        args.tank.display()
    );

    let config = load_config(&args)?;

    let mut registry = SchemaRegistry::with_builtins()?;
    for dir in &args.schemas {
        registry
            .load_dir(dir)
            .with_context(|| format!("Failed to load definitions from {}", dir.display()))?;
    }

    let result = BuildOrchestrator::new(&registry, config).build(&tank);

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let mut written = Vec::with_capacity(result.package.len());
    let mut taken = HashSet::new();
    for resource in result.package.iter() {
        let file_name = unique_file_name(resource, &mut taken);
        written.push(write_resource(&args.output, &file_name, resource)?);
    }

    OutputFormatter::new(args.format, args.use_colors).print_report(&BuildReport {
        diagnostics: &result.diagnostics,
        stats: &result.stats,
        written: &written,
        elapsed: start.elapsed(),
    })?;

    Ok(!result.stats.has_errors())
}

/// Explicit config file, else `nori-config.yaml` beside the tank, else in the
/// working directory. Without any file the overrides must supply a canonical.
fn load_config(args: &BuildArgs) -> anyhow::Result<NoriConfig> {
    let path = match &args.config_file {
        Some(path) => Some(path.clone()),
        None => discover_config(&args.tank),
    };

    let mut config = match path {
        Some(path) => {
            debug!("Using configuration {}", path.display());
            NoriConfig::from_file(&path)?
        }
        None => {
            debug!("No {} found, relying on overrides", CONFIG_FILE_NAME);
            NoriConfig::new("")
        }
    };

    for (key, value) in &args.overrides {
        config.apply_override(key, value)?;
    }

    if let Err(err) = config.validate() {
        if config.canonical.is_empty() {
            bail!(
                "{} (add {} or pass --config canonical:<url>)",
                err,
                CONFIG_FILE_NAME
            );
        }
        return Err(err.into());
    }

    Ok(config)
}

fn discover_config(tank: &Path) -> Option<PathBuf> {
    let beside_tank = tank
        .parent()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .filter(|p| p.is_file());
    beside_tank.or_else(|| {
        let cwd = PathBuf::from(CONFIG_FILE_NAME);
        cwd.is_file().then_some(cwd)
    })
}

/// `<ResourceType>-<id>.json`, numbered when a resource with the same id was
/// already written
fn unique_file_name(resource: &ExportedResource, taken: &mut HashSet<String>) -> String {
    let preferred = resource.file_name();
    let mut file_name = preferred.clone();
    let mut n = 2;
    while !taken.insert(file_name.clone()) {
        file_name = format!("{}-{}-{}.json", resource.resource_type(), resource.id, n);
        n += 1;
    }
    if file_name != preferred {
        warn!(
            "{} {} would overwrite {}, writing {} instead",
            resource.kind, resource.name, preferred, file_name
        );
    }
    file_name
}

fn write_resource(
    output: &Path,
    file_name: &str,
    resource: &ExportedResource,
) -> anyhow::Result<PathBuf> {
    let path = output.join(file_name);
    let json = serde_json::to_string_pretty(&resource.document)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Wrote {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nori_core::EntityKind;
    use tempfile::TempDir;

    fn args(tank: PathBuf) -> BuildArgs {
        BuildArgs {
            tank,
            config_file: None,
            overrides: vec![],
            schemas: vec![],
            output: PathBuf::from("out"),
            format: OutputFormat::Json,
            use_colors: false,
        }
    }

    #[test]
    fn test_config_discovered_beside_tank() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "canonical: http://example.org/fhir\nfhirVersion: 4.0.1\n",
        )
        .unwrap();

        let mut args = args(dir.path().join("tank.yaml"));
        args.overrides = vec![("version".to_string(), "3.0.0".to_string())];
        let config = load_config(&args).unwrap();

        assert_eq!(config.canonical, "http://example.org/fhir");
        assert_eq!(config.version.as_deref(), Some("3.0.0"));
    }

    #[test]
    fn test_duplicate_ids_get_distinct_file_names() {
        let resource = |name: &str| ExportedResource {
            kind: EntityKind::Instance,
            name: name.to_string(),
            id: "shared".to_string(),
            document: serde_json::json!({"resourceType": "Patient", "id": "shared"}),
            location: Default::default(),
        };

        let mut taken = HashSet::new();
        assert_eq!(unique_file_name(&resource("A"), &mut taken), "Patient-shared.json");
        assert_eq!(unique_file_name(&resource("B"), &mut taken), "Patient-shared-2.json");
        assert_eq!(unique_file_name(&resource("C"), &mut taken), "Patient-shared-3.json");
    }

    #[test]
    fn test_unknown_override_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut args = args(dir.path().join("tank.yaml"));
        args.overrides = vec![
            ("canonical".to_string(), "http://example.org".to_string()),
            ("publisher".to_string(), "Me".to_string()),
        ];

        assert!(load_config(&args).is_err());
    }
}
