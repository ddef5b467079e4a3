use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use dynfield_core::records::RecordLayout;
use dynfield_core::registry::FieldType;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Data directory holding schema.json and data/records.json
    #[arg(long, global = true, default_value = "./data")]
    pub data_dir: PathBuf,

    /// Record layout used when saving (document or eav)
    #[arg(long, global = true, default_value_t = RecordLayout::Document)]
    pub layout: RecordLayout,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Define a field for a page type
    Define(DefineArgs),

    /// List field definitions of a page type in display order
    Fields {
        page_type: String,
    },

    /// Delete a field definition; stored values stay in record data
    DeleteField {
        page_type: String,
        name: String,
    },

    /// Insert or merge a record from a JSON object of field values
    Upsert {
        page_type: String,
        record_id: u64,

        /// Field values, e.g. '{"num_bundles": 3}'
        #[arg(long)]
        values: String,
    },

    /// Show one record
    Get {
        page_type: String,
        record_id: u64,
    },

    /// Delete one record
    DeleteRecord {
        page_type: String,
        record_id: u64,
    },

    /// List records of a page type ordered by id
    Records {
        page_type: String,
    },

    /// Recompute every calculated value of a page type
    Recompute {
        page_type: String,
    },

    /// Apply a migration step
    Migrate(MigrateArgs),

    /// Show definitions whose type is outside the current constraint
    Violations,

    /// Write a copy of the store to another directory
    Export {
        /// Target data directory
        #[arg(long)]
        to: PathBuf,

        /// Record layout of the copy
        #[arg(long, default_value_t = RecordLayout::Eav)]
        layout: RecordLayout,
    },
}

#[derive(Args, Debug)]
pub struct DefineArgs {
    pub page_type: String,
    pub name: String,

    /// Field type
    #[arg(long = "type")]
    pub field_type: FieldType,

    #[arg(long)]
    pub label: Option<String>,

    /// Allowed values for select fields (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub options: Vec<String>,

    /// Formula for calculated fields
    #[arg(long)]
    pub formula: Option<String>,

    /// Names the formula reads (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub depends_on: Vec<String>,

    #[arg(long)]
    pub required: bool,

    #[arg(long, default_value_t = 0)]
    pub display_order: i64,

    #[arg(long)]
    pub default_value: Option<String>,
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// JSON file holding one step or an array of steps
    #[arg(long, conflicts_with = "name")]
    pub file: Option<PathBuf>,

    /// Step name, recorded in the migration history
    #[arg(long, required_unless_present = "file")]
    pub name: Option<String>,

    /// Restrict rewrites to one page type
    #[arg(long)]
    pub page_type: Option<String>,

    /// Types added to the constraint (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub add_type: Vec<FieldType>,

    /// Types removed from the constraint (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub remove_type: Vec<FieldType>,

    /// Type rewrite as FROM:TO, e.g. location:url
    #[arg(long)]
    pub rewrite: Vec<String>,
}
