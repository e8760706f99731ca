use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use dialoguer::Confirm;
use entity_client_dynamodb::{
    config::AwsConfig,
    dynamodb::{generate_table_definition, BatchOptions, EntityClient},
    entity::{EntityManagerConfig, TranscodeAttributeTypes, DEFAULT_HASH_KEY, DEFAULT_RANGE_KEY},
    migrate::{migrate_data, MigrateOptions, TransformChain},
    purge::purge_table,
    table_file::{self, FileUpdate},
    Error,
};
use std::path::{Path, PathBuf};
use tracing::info;

/// Manage DynamoDB tables behind an entity manager.
#[derive(Debug, Parser)]
#[command(name = "entity-dynamo", version, about, long_about = "Manage DynamoDB tables behind an entity manager.

Environment variables (also read from .env):
  AWS_ENDPOINT_URL    - Use local DynamoDB (e.g., http://localhost:8000)
  AWS_REGION          - AWS region
  AWS_PROFILE         - AWS profile to use for credentials
  RUST_LOG            - Log filter, overrides -v")]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Custom DynamoDB endpoint.
    #[arg(long, env = "AWS_ENDPOINT_URL", global = true)]
    pub endpoint_url: Option<String>,

    /// AWS region.
    #[arg(long, env = "AWS_REGION", global = true)]
    pub region: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate, create or delete the entity table.
    Table(TableCommand),

    /// Copy every item of one table into another, transforming it on the way.
    MigrateData(MigrateDataCommand),

    /// Delete every item of a table, keeping the table.
    PurgeTable(PurgeTableCommand),
}

#[derive(Debug, Parser)]
pub struct TableCommand {
    #[command(subcommand)]
    pub action: TableAction,
}

#[derive(Debug, Subcommand)]
pub enum TableAction {
    /// Write or refresh the generated sections of a table definition file.
    Generate(GenerateCommand),

    /// Create the table from an entity manager config.
    Create(CreateCommand),

    /// Delete the table.
    Delete(DeleteCommand),
}

#[derive(Debug, Parser)]
pub struct GenerateCommand {
    /// Entity manager config (YAML or JSON).
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,

    /// Table definition file to create or update.
    #[arg(long, value_name = "FILE", default_value = "table.yml")]
    pub path: PathBuf,

    /// Table name written into a new file.
    #[arg(long)]
    pub table_name: Option<String>,

    /// Extra transcode to attribute type mappings (YAML).
    #[arg(long, value_name = "FILE")]
    pub transcode_types: Option<PathBuf>,

    /// Fail instead of writing when the file is out of date.
    #[arg(long)]
    pub check: bool,
}

#[derive(Debug, Parser)]
pub struct CreateCommand {
    /// Entity manager config (YAML or JSON).
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,

    #[arg(long)]
    pub table_name: String,

    /// Extra transcode to attribute type mappings (YAML).
    #[arg(long, value_name = "FILE")]
    pub transcode_types: Option<PathBuf>,

    /// Return without waiting for the table to become active.
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Debug, Parser)]
pub struct DeleteCommand {
    #[arg(long)]
    pub table_name: String,

    /// Skip confirmation prompts.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Parser)]
pub struct MigrateDataCommand {
    #[arg(long)]
    pub source_table: String,

    #[arg(long)]
    pub target_table: String,

    #[arg(long, default_value = DEFAULT_HASH_KEY)]
    pub hash_key: String,

    #[arg(long, default_value = DEFAULT_RANGE_KEY)]
    pub range_key: String,

    /// Version the source items are at; transforms after it are applied.
    #[arg(long)]
    pub source_version: Option<String>,

    /// Last transform version to apply.
    #[arg(long)]
    pub target_version: Option<String>,

    /// Declarative transforms keyed by version (YAML).
    #[arg(long, value_name = "FILE")]
    pub transforms: Option<PathBuf>,

    /// Items per scan page.
    #[arg(long)]
    pub page_size: Option<i32>,

    /// Batch writes in flight at once.
    #[arg(long, default_value = "4")]
    pub concurrency: usize,

    /// Skip confirmation prompts.
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Parser)]
pub struct PurgeTableCommand {
    #[arg(long)]
    pub table_name: String,

    #[arg(long, default_value = DEFAULT_HASH_KEY)]
    pub hash_key: String,

    #[arg(long, default_value = DEFAULT_RANGE_KEY)]
    pub range_key: String,

    /// Items per scan page.
    #[arg(long)]
    pub page_size: Option<i32>,

    /// Batch deletes in flight at once.
    #[arg(long, default_value = "4")]
    pub concurrency: usize,

    /// Skip confirmation prompts.
    #[arg(long)]
    pub force: bool,
}

/// Runs the parsed command.
pub async fn run(cli: Cli) -> Result<()> {
    let aws = AwsConfig {
        endpoint_url: cli.endpoint_url,
        region: cli.region,
    };

    match cli.command {
        Command::Table(table) => match table.action {
            TableAction::Generate(cmd) => generate(cmd),
            TableAction::Create(cmd) => create(cmd, &aws).await,
            TableAction::Delete(cmd) => delete(cmd, &aws).await,
        },
        Command::MigrateData(cmd) => migrate(cmd, &aws).await,
        Command::PurgeTable(cmd) => purge(cmd, &aws).await,
    }
}

fn load_transcode_types(path: Option<&Path>) -> Result<TranscodeAttributeTypes> {
    let defaults = TranscodeAttributeTypes::default();
    let Some(path) = path else {
        return Ok(defaults);
    };

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading transcode types from {}", path.display()))?;
    let overrides: TranscodeAttributeTypes = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing transcode types in {}", path.display()))?;
    Ok(defaults.merge(overrides))
}

fn load_config(path: &Path) -> Result<EntityManagerConfig> {
    EntityManagerConfig::from_file(path)
        .with_context(|| format!("loading entity manager config {}", path.display()))
}

/// Asks before a destructive step unless `force` is set.
fn confirm(prompt: &str, force: bool) -> Result<()> {
    if force {
        return Ok(());
    }

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    if !confirmed {
        return Err(Error::UserCancelled.into());
    }
    Ok(())
}

fn generate(cmd: GenerateCommand) -> Result<()> {
    let config = load_config(&cmd.config)?;
    let transcode_types = load_transcode_types(cmd.transcode_types.as_deref())?;
    let definition = generate_table_definition(&config, &transcode_types);

    if cmd.check {
        let text = std::fs::read_to_string(&cmd.path)
            .with_context(|| format!("reading {}", cmd.path.display()))?;
        if !table_file::is_current(&text, &definition)? {
            bail!(
                "{} is out of date; run `entity-dynamo table generate` to refresh it",
                cmd.path.display()
            );
        }
        info!("{} is up to date", cmd.path.display());
        return Ok(());
    }

    match table_file::write_table_file(&cmd.path, cmd.table_name.as_deref(), &definition)? {
        FileUpdate::Created => println!("Created {}", cmd.path.display()),
        FileUpdate::Updated => println!("Updated {}", cmd.path.display()),
        FileUpdate::Unchanged => println!("{} already up to date", cmd.path.display()),
    }
    Ok(())
}

async fn create(cmd: CreateCommand, aws: &AwsConfig) -> Result<()> {
    let config = load_config(&cmd.config)?;
    let transcode_types = load_transcode_types(cmd.transcode_types.as_deref())?;

    info!("Target: {}", aws.target_display());
    let client = EntityClient::new(&aws.load().await, &cmd.table_name, config);

    match client.create_table_if_not_exists(&transcode_types).await? {
        Some(_) if !cmd.no_wait => {
            client.wait_until_table_exists().await?;
            println!("Table '{}' is active", cmd.table_name);
        }
        Some(_) => println!("Table '{}' is being created", cmd.table_name),
        None => println!("Table '{}' already exists", cmd.table_name),
    }
    Ok(())
}

async fn delete(cmd: DeleteCommand, aws: &AwsConfig) -> Result<()> {
    info!("Target: {}", aws.target_display());
    let client = EntityClient::new(&aws.load().await, &cmd.table_name, EntityManagerConfig::default());

    if !client.table_exists().await? {
        println!("Table '{}' does not exist, nothing to delete", cmd.table_name);
        return Ok(());
    }

    confirm(
        &format!(
            "Delete table '{}'? ALL DATA WILL BE LOST",
            cmd.table_name
        ),
        cmd.force,
    )?;

    client.delete_table().await?;
    client.wait_until_table_not_exists().await?;
    println!("Table '{}' deleted", cmd.table_name);
    Ok(())
}

async fn migrate(cmd: MigrateDataCommand, aws: &AwsConfig) -> Result<()> {
    let chain = match &cmd.transforms {
        Some(path) => TransformChain::from_file(path)
            .with_context(|| format!("loading transforms from {}", path.display()))?,
        None => TransformChain::new(),
    };

    info!("Target: {}", aws.target_display());
    let sdk_config = aws.load().await;
    let keys = EntityManagerConfig::with_keys(&cmd.hash_key, &cmd.range_key);
    let batch = BatchOptions {
        concurrency: cmd.concurrency,
        ..BatchOptions::default()
    };
    let source = EntityClient::new(&sdk_config, &cmd.source_table, keys.clone());
    let target =
        EntityClient::new(&sdk_config, &cmd.target_table, keys).with_batch_options(batch);

    confirm(
        &format!(
            "Copy every item of '{}' into '{}'? Existing items with the same keys are overwritten",
            cmd.source_table, cmd.target_table
        ),
        cmd.force,
    )?;

    let summary = migrate_data(
        &source,
        &target,
        &chain,
        &MigrateOptions {
            page_size: cmd.page_size,
            source_version: cmd.source_version,
            target_version: cmd.target_version,
        },
    )
    .await?;

    println!(
        "Migrated {} of {} items ({} dropped) in {} pages",
        summary.written, summary.scanned, summary.dropped, summary.pages
    );
    Ok(())
}

async fn purge(cmd: PurgeTableCommand, aws: &AwsConfig) -> Result<()> {
    info!("Target: {}", aws.target_display());
    let batch = BatchOptions {
        concurrency: cmd.concurrency,
        ..BatchOptions::default()
    };
    let client = EntityClient::new(
        &aws.load().await,
        &cmd.table_name,
        EntityManagerConfig::with_keys(&cmd.hash_key, &cmd.range_key),
    )
    .with_batch_options(batch);

    confirm(
        &format!(
            "Delete every item in '{}'? ALL DATA WILL BE LOST",
            cmd.table_name
        ),
        cmd.force,
    )?;

    let keys = [cmd.hash_key, cmd.range_key];
    let deleted = purge_table(&client, &keys, cmd.page_size).await?;
    println!("Deleted {deleted} items from '{}'", cmd.table_name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_migrate_data() {
        let cli = Cli::try_parse_from([
            "entity-dynamo",
            "-vv",
            "migrate-data",
            "--source-table",
            "users-v1",
            "--target-table",
            "users-v2",
            "--source-version",
            "001",
            "--page-size",
            "50",
            "--force",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::MigrateData(cmd) => {
                assert_eq!(cmd.source_table, "users-v1");
                assert_eq!(cmd.hash_key, "hashKey");
                assert_eq!(cmd.range_key, "rangeKey");
                assert_eq!(cmd.source_version.as_deref(), Some("001"));
                assert_eq!(cmd.target_version, None);
                assert_eq!(cmd.page_size, Some(50));
                assert!(cmd.force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_table_generate() {
        let cli = Cli::try_parse_from([
            "entity-dynamo",
            "table",
            "generate",
            "--config",
            "entity-manager.yml",
            "--check",
        ])
        .unwrap();

        match cli.command {
            Command::Table(TableCommand {
                action: TableAction::Generate(cmd),
            }) => {
                assert_eq!(cmd.path, PathBuf::from("table.yml"));
                assert!(cmd.check);
                assert!(cmd.table_name.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn purge_requires_a_table() {
        assert!(Cli::try_parse_from(["entity-dynamo", "purge-table"]).is_err());
    }

    #[test]
    fn forced_confirmation_skips_prompt() {
        assert!(confirm("never shown", true).is_ok());
    }
}
