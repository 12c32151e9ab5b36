use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use import_pipeline::{
    format_size, CandidateFile, ExtraParams, FileIntake, ImportBatch, ImportPipeline,
    ImportService, LocalImportService, PipelineConfig, PipelineHandle, PreviewResult, Rejection,
    Template, MAP, PREVIEW,
};
use serde_json::Value;
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn, Level};

/// Import Pipeline
/// Validates a batch of spreadsheet files, maps their columns onto a target
/// entity, previews the result and commits it
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output for detailed processing information
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run files through analysis, mapping, preview and commit
    Run {
        /// Path to the pipeline config
        #[arg(short, long, value_name = "PATH TO CONFIG")]
        config: PathBuf,

        /// Map a source column onto a target field (COLUMN=FIELD); repeatable
        #[arg(long = "map", value_name = "COLUMN=FIELD")]
        maps: Vec<String>,

        /// Leave a source column out of the import; repeatable
        #[arg(long = "unmap", value_name = "COLUMN")]
        unmaps: Vec<String>,

        /// Extra value added to every record (KEY=VALUE); repeatable
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Output directory for committed records, overriding the config
        #[arg(short, long, value_name = "OUTPUT DIRECTORY PATH")]
        output: Option<PathBuf>,

        /// Stop after the preview without committing anything
        #[arg(long)]
        dry_run: bool,

        /// Files to import
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,
    },
    /// Analyze files and print the detected columns and proposed mapping as JSON
    Analyze {
        /// Path to the pipeline config
        #[arg(short, long, value_name = "PATH TO CONFIG")]
        config: PathBuf,

        /// Files to analyze
        #[arg(required = true, value_name = "FILES")]
        files: Vec<PathBuf>,
    },
    /// Generate a pipeline config template
    GenerateConfig {
        /// Type of config template to generate (basic/full)
        #[arg(short = 't', long = "type", default_value = "basic")]
        template_type: String,

        /// Output path for the generated config
        #[arg(
            short,
            long,
            default_value = "pipeline.jsonc",
            value_name = "OUTPUT PATH"
        )]
        output: PathBuf,
    },
    /// Validate a pipeline config file
    Validate {
        /// Path to the pipeline config to validate
        #[arg(
            short,
            long,
            default_value = "pipeline.jsonc",
            value_name = "PATH TO CONFIG"
        )]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with appropriate level
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    // Logs go to stderr so stdout carries only command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Import pipeline starting up...");

    match &cli.command {
        Commands::Run {
            config,
            maps,
            unmaps,
            params,
            output,
            dry_run,
            files,
        } => {
            run_command(RunArgs {
                config,
                maps,
                unmaps,
                params,
                output,
                dry_run: *dry_run,
                files,
            })
            .await
        }
        Commands::Analyze { config, files } => analyze_command(config, files).await,
        Commands::GenerateConfig {
            template_type,
            output,
        } => generate_config_command(template_type, output),
        Commands::Validate { config } => validate_command(config),
    }
}

struct RunArgs<'a> {
    config: &'a Path,
    maps: &'a [String],
    unmaps: &'a [String],
    params: &'a [String],
    output: &'a Option<PathBuf>,
    dry_run: bool,
    files: &'a [PathBuf],
}

async fn run_command(args: RunArgs<'_>) -> Result<()> {
    let mut config = load_config(args.config)?;
    if let Some(output) = args.output {
        config.output_dir = Some(output.clone());
    }

    let mut pipeline =
        ImportPipeline::new(&config).context("Failed to initialise the import pipeline")?;
    let rejections = pipeline
        .add_files(candidates(args.files)?)
        .context("Failed to add files to the batch")?;
    report_rejections(&rejections);
    if pipeline.batch().is_empty() {
        anyhow::bail!("No files were accepted for import");
    }
    info!(
        "Batch ready: {} file(s), {}",
        pipeline.batch().len(),
        format_size(pipeline.batch().total_size())
    );
    pipeline.set_extra_params(parse_params(args.params)?)?;

    let handle = PipelineHandle::new(pipeline, Arc::new(LocalImportService::new(config)));

    info!("Analyzing batch...");
    advance_until(&handle, MAP)
        .await
        .context("Failed to analyze the batch")?;

    {
        let mut pipeline = handle.lock().await;
        if let Some(analysis) = pipeline.analysis() {
            info!(
                "Detected {} column(s) and {} row(s) for entity '{}'",
                analysis.source_columns.len(),
                analysis.total_rows,
                analysis.entity_type
            );
            for warning in &analysis.warnings {
                warn!("{}", warning);
            }
        }
        for column in args.unmaps {
            pipeline
                .set_mapping(column, None)
                .with_context(|| format!("Failed to unmap column '{}'", column))?;
        }
        for pair in args.maps {
            let (column, field) = split_pair(pair, "--map")?;
            pipeline
                .set_mapping(column, Some(field))
                .with_context(|| format!("Failed to map '{}' onto '{}'", column, field))?;
        }

        println!("Column mapping:");
        for (column, target) in pipeline.mapping().iter() {
            println!("  {:<24} -> {}", column, target.unwrap_or("(not imported)"));
        }
    }

    info!("Requesting preview...");
    advance_until(&handle, PREVIEW)
        .await
        .context("Failed to preview the import")?;

    {
        let pipeline = handle.lock().await;
        println!("\n{}\n", pipeline.stepper());
        if let Some(preview) = pipeline.preview() {
            print_preview(preview);
        }
    }

    if args.dry_run {
        info!("Dry run requested; nothing was committed");
        return Ok(());
    }

    info!("Committing import...");
    handle.advance().await.context("Failed to commit the import")?;

    let pipeline = handle.lock().await;
    if let Some(commit) = pipeline.commit_result() {
        info!(
            "Imported {} row(s) into '{}' ({} skipped)",
            commit.imported_rows, commit.entity_type, commit.skipped_rows
        );
        if let Some(output) = &commit.output {
            info!("Records written to {}", output.display());
        }
    }
    println!("\n{}", pipeline.stepper());
    Ok(())
}

async fn analyze_command(config_path: &Path, files: &[PathBuf]) -> Result<()> {
    let config = load_config(config_path)?;
    config
        .validate()
        .context("Failed to validate pipeline config")?;

    let intake = FileIntake::new(config.intake.clone());
    let mut batch = ImportBatch::new();
    let outcome = intake.validate(candidates(files)?, &batch);
    report_rejections(&outcome.rejections);
    intake.add(&mut batch, outcome.accepted);
    if batch.is_empty() {
        anyhow::bail!("No files were accepted for analysis");
    }

    let service = LocalImportService::new(config);
    let analysis = service
        .analyze(&batch)
        .await
        .context("Failed to analyze files")?;

    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

fn generate_config_command(template_type: &str, output: &Path) -> Result<()> {
    let template = match template_type.to_lowercase().as_str() {
        "basic" => Template::Basic,
        "full" => Template::Full,
        _ => anyhow::bail!("Invalid template type. Must be either 'basic' or 'full'"),
    };

    info!("Generating {} config template...", template_type);

    // if output is a directory, append the default file name
    let full_file_output_path = if output.is_dir() {
        output.join("pipeline.jsonc")
    } else {
        output.to_path_buf()
    };

    fs::write(&full_file_output_path, template.contents())
        .with_context(|| format!("Failed to write config to: {}", output.display()))?;

    info!(
        "Successfully generated config template at: {}",
        full_file_output_path.display()
    );
    Ok(())
}

fn validate_command(config_path: &Path) -> Result<()> {
    info!("Validating pipeline config...");

    let config = load_config(config_path)?;
    config
        .validate()
        .context("Failed to validate pipeline config")?;

    info!("Pipeline config validation successful");
    info!(
        "Steps: {}",
        config
            .steps
            .iter()
            .map(|s| s.key.as_str())
            .collect::<Vec<_>>()
            .join(" > ")
    );
    for entity in &config.entities {
        info!(
            "Entity '{}' with {} field(s)",
            entity.entity_type,
            entity.fields.len()
        );
    }
    Ok(())
}

fn load_config(config_path: &Path) -> Result<PipelineConfig> {
    if !config_path.exists() {
        anyhow::bail!(
            "Config file not found: {}. Try using --config <PATH TO CONFIG>",
            config_path.display()
        );
    }
    PipelineConfig::from_file(config_path)
        .context("Failed to parse pipeline config. See errors for additional details:")
}

fn candidates(files: &[PathBuf]) -> Result<Vec<CandidateFile>> {
    files
        .iter()
        .map(|path| {
            CandidateFile::from_path(path)
                .with_context(|| format!("Failed to read file: {}", path.display()))
        })
        .collect()
}

fn report_rejections(rejections: &[Rejection]) {
    for rejection in rejections {
        warn!("[{}] {}", rejection.reason.as_str(), rejection.message);
    }
}

/// Step the pipeline forward until `key` is the current step.
async fn advance_until(handle: &PipelineHandle, key: &str) -> Result<()> {
    loop {
        if handle.lock().await.current_step().key == key {
            return Ok(());
        }
        handle.advance().await?;
    }
}

fn split_pair<'a>(pair: &'a str, flag: &str) -> Result<(&'a str, &'a str)> {
    pair.split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
        .filter(|(k, _)| !k.is_empty())
        .with_context(|| format!("{} expects KEY=VALUE, got '{}'", flag, pair))
}

/// Values that parse as JSON keep their type; anything else is a string.
fn parse_params(params: &[String]) -> Result<ExtraParams> {
    let mut extra = ExtraParams::new();
    for pair in params {
        let (key, value) = split_pair(pair, "--param")?;
        let value =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        extra.insert(key.to_string(), value);
    }
    Ok(extra)
}

fn print_preview(preview: &PreviewResult) {
    println!("{}", preview.columns.join(" | "));
    for row in &preview.rows {
        let cells: Vec<String> = preview
            .columns
            .iter()
            .map(|column| match row.get(column) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            })
            .collect();
        println!("{}", cells.join(" | "));
    }
    println!(
        "({} of {} row(s) shown)",
        preview.rows.len(),
        preview.total_rows
    );
    for warning in &preview.warnings {
        warn!("{}", warning);
    }
}
