//! CLI tool for field schema management, record inspection and migrations.
//!
//! Every command loads the store from `--data-dir`, runs, and saves it back
//! when it changed anything.

mod cli;

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use dynfield_core::migration::{MigrationStep, SchemaMigrator};
use dynfield_core::persistence::PersistenceManager;
use dynfield_core::registry::{FieldType, NewField};
use dynfield_core::{FieldDefinitionRegistry, RecordStore, Store, StoreConfig};
use serde_json::Value;

use cli::{Cli, Commands, DefineArgs, MigrateArgs};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt::init();

    let output = run(cli)?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

/// Runs one command and returns what it prints.
fn run(cli: Cli) -> Result<String> {
    let config = StoreConfig {
        data_dir: cli.data_dir.clone(),
        record_layout: cli.layout,
        ..Default::default()
    };
    let persistence = PersistenceManager::new(&config);
    let store = Arc::new(
        persistence
            .load_store(config.clone())
            .with_context(|| format!("Failed to load store from {}", config.data_dir.display()))?,
    );

    let registry = FieldDefinitionRegistry::new(Arc::clone(&store));
    let records = RecordStore::new(Arc::clone(&store));

    let (output, changed) = match cli.command {
        Commands::Define(args) => {
            let field = registry.define(new_field(args))?;
            (to_json(&field)?, true)
        }
        Commands::Fields { page_type } => (to_json(&registry.list_fields(&page_type)?)?, false),
        Commands::DeleteField { page_type, name } => {
            let field = registry.delete(&page_type, &name)?;
            (format!("Deleted field '{}' ({})", field.name, field.id), true)
        }
        Commands::Upsert {
            page_type,
            record_id,
            values,
        } => {
            let values: BTreeMap<String, Value> =
                serde_json::from_str(&values).context("--values must be a JSON object")?;
            (to_json(&records.upsert(&page_type, record_id, values)?)?, true)
        }
        Commands::Get {
            page_type,
            record_id,
        } => (to_json(&records.get(&page_type, record_id)?)?, false),
        Commands::DeleteRecord {
            page_type,
            record_id,
        } => {
            records.delete(&page_type, record_id)?;
            (format!("Deleted record {} of '{}'", record_id, page_type), true)
        }
        Commands::Records { page_type } => (to_json(&records.list(&page_type)?)?, false),
        Commands::Recompute { page_type } => {
            let count = records.recompute_page(&page_type)?;
            (format!("Recomputed {} record(s) of '{}'", count, page_type), count > 0)
        }
        Commands::Migrate(args) => {
            let migrator = SchemaMigrator::new(Arc::clone(&store));
            let reports = migrator.apply_pending(migration_steps(args)?)?;
            let changed = !reports.is_empty();
            (to_json(&reports)?, changed)
        }
        Commands::Violations => {
            let migrator = SchemaMigrator::new(Arc::clone(&store));
            (to_json(&migrator.constraint_violations()?)?, false)
        }
        Commands::Export { to, layout } => {
            persistence
                .export_to(&to, layout)
                .save_store(&store)
                .with_context(|| format!("Failed to export to {}", to.display()))?;
            (format!("Exported {} layout to {}", layout, to.display()), false)
        }
    };

    if changed {
        persistence.save_store(&store).context("Failed to save store")?;
    }
    Ok(output)
}

fn new_field(args: DefineArgs) -> NewField {
    let mut field = NewField::new(&args.page_type, &args.name, args.field_type);
    if let Some(label) = args.label {
        field.label = label;
    }
    field.options = args.options;
    field.calculation_formula = args.formula;
    field.dependent_fields = args.depends_on;
    field.is_required = args.required;
    field.display_order = args.display_order;
    field.default_value = args.default_value;
    field
}

fn migration_steps(args: MigrateArgs) -> Result<Vec<MigrationStep>> {
    if let Some(path) = args.file {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        let steps = match value {
            Value::Array(_) => serde_json::from_value(value)?,
            _ => vec![serde_json::from_value(value)?],
        };
        return Ok(steps);
    }

    let name = args
        .name
        .ok_or_else(|| anyhow!("--name or --file is required"))?;
    let mut step = MigrationStep::new(&name);
    if let Some(page_type) = args.page_type {
        step = step.scoped_to(&page_type);
    }
    for field_type in args.add_type {
        step = step.add_type(field_type);
    }
    for field_type in args.remove_type {
        step = step.remove_type(field_type);
    }
    for rewrite in args.rewrite {
        let (from, to) = parse_rewrite(&rewrite)?;
        step = step.rewrite(from, to);
    }
    Ok(vec![step])
}

fn parse_rewrite(text: &str) -> Result<(FieldType, FieldType)> {
    let Some((from, to)) = text.split_once(':') else {
        bail!("Rewrite '{}' must look like FROM:TO", text);
    };
    Ok((from.parse()?, to.parse()?))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
