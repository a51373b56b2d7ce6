use clap::{Parser, Subcommand, ValueEnum};
use linkbase::schema::Accessor;
use linkbase::{Database, Id, UpdateApplier, UpdateBatch};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process;

/// linkbase CLI: check schemas and replay update-log batches from the command line
#[derive(Parser)]
#[command(name = "linkbase", version, about)]
struct Cli {
    /// Path to the schema YAML file
    #[arg(long, env = "LINKBASE_SCHEMA", default_value = "schema.yaml")]
    schema: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Compile the schema and show its collections, properties and indexes
    Check,

    /// Apply update-log batch files in order to an empty database and print the result
    Apply {
        /// Batch files (JSON, or YAML by extension)
        #[arg(required = true)]
        batches: Vec<PathBuf>,
        /// Only print this collection
        #[arg(long)]
        collection: Option<String>,
    },

    /// Apply batch files, then print one batch that rebuilds the result
    Snapshot {
        /// Batch files (JSON, or YAML by extension)
        batches: Vec<PathBuf>,
    },

    /// Generate identifiers, or show when an identifier was created
    Id {
        /// How many ids to generate
        #[arg(long, default_value_t = 1)]
        count: usize,
        /// Show the creation time embedded in this id instead
        #[arg(long)]
        inspect: Option<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Check => {
            let db = Database::open(&cli.schema)?;
            print_output(&describe_schema(&db), &cli.format)?;
        }

        Command::Apply { batches, collection } => {
            let db = replay(&cli.schema, &batches)?;
            let output = match collection {
                Some(name) => Value::Array(db.collection(&name)?.export()),
                None => export_all(&db),
            };
            print_output(&output, &cli.format)?;
        }

        Command::Snapshot { batches } => {
            let db = replay(&cli.schema, &batches)?;
            let snapshot = serde_json::to_value(db.snapshot())?;
            print_output(&snapshot, &cli.format)?;
        }

        Command::Id { count, inspect } => match inspect {
            Some(raw) => {
                let id = Id::parse(&raw)?;
                let created = id.timestamp().map(|t| t.to_rfc3339());
                print_output(&json!({ "id": id.as_str(), "created": created }), &cli.format)?;
            }
            None => {
                let ids: Vec<Value> = (0..count).map(|_| Value::String(Id::generate().to_string())).collect();
                print_output(&Value::Array(ids), &cli.format)?;
            }
        },
    }

    Ok(())
}

/// Build a database from `schema` and apply every batch file to it in order.
fn replay(schema: &Path, batches: &[PathBuf]) -> Result<Database, Box<dyn std::error::Error>> {
    let mut db = Database::open(schema)?;
    let applier = UpdateApplier::default();
    for path in batches {
        let batch = read_batch(path)?;
        let applied = applier
            .apply(&mut db, &batch)
            .map_err(|e| format!("{}: {e}", path.display()))?;
        log::info!("Applied {applied} quintuples from {}", path.display());
    }
    Ok(db)
}

fn read_batch(path: &Path) -> Result<UpdateBatch, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read batch file '{}': {e}", path.display()))?;
    let batch = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&text)?,
        _ => UpdateBatch::from_json(&text)?,
    };
    Ok(batch)
}

fn export_all(db: &Database) -> Value {
    let mut map = Map::new();
    for collection in db.collections() {
        map.insert(collection.name().to_string(), Value::Array(collection.export()));
    }
    Value::Object(map)
}

fn describe_schema(db: &Database) -> Value {
    let mut collections = Map::new();
    for descriptor in db.schema().collections() {
        let properties: Map<String, Value> = descriptor
            .properties
            .values()
            .map(|property| {
                let kind = match &property.accessor {
                    Accessor::Scalar { .. } => property
                        .field_type
                        .map_or("any", |field_type| field_type.name())
                        .to_string(),
                    Accessor::HasOne { foreign, .. } => format!("has_one {}", db.schema().collection(*foreign).name),
                    Accessor::HasMany { foreign, .. } => format!("has_many {}", db.schema().collection(*foreign).name),
                    Accessor::ManyToOne { foreign, .. } => {
                        format!("reciprocal has_many {}", db.schema().collection(*foreign).name)
                    }
                    Accessor::OneToOne { foreign, .. } => {
                        format!("reciprocal has_one {}", db.schema().collection(*foreign).name)
                    }
                };
                let description = if property.required { format!("{kind}, required") } else { kind };
                (property.name.clone(), Value::String(description))
            })
            .collect();
        let indexes: Map<String, Value> = descriptor
            .indexes
            .values()
            .map(|index| (index.name.clone(), Value::String(index.kind.to_string())))
            .collect();
        collections.insert(
            descriptor.name.clone(),
            json!({ "properties": properties, "indexes": indexes }),
        );
    }
    json!({ "collections": collections })
}

fn print_output(value: &Value, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
        }
    }
    Ok(())
}
