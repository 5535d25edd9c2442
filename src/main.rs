use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use patchwright::analyzer::CommandAnalyzer;
use patchwright::config::Config;
use patchwright::extract::extract;
use patchwright::orchestrator::{PatchOrchestrator, PatchPreview, RepairOutcome};
use patchwright::protocol::{content_hash, parse_envelope, validate, FileSnapshot, PatchEnvelope};
use patchwright::workspace::{FsWorkspace, Workspace};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "patchwright",
    about = "Turn model fix suggestions into validated edits on real files",
    version
)]
struct Cli {
    /// Explicit config file (.toml or .json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract summary, recommendations, and suggestions from a model response
    Extract(ExtractArgs),
    /// Apply every suggestion in a model response
    Apply(ApplyArgs),
    /// Check a structured edit envelope against the files it targets
    Validate(ValidateArgs),
    /// Validate and apply a structured edit envelope
    ApplyEnvelope(EnvelopeArgs),
    /// Analyze and patch a file until it comes back clean
    Repair(RepairArgs),
    /// Print the content hash envelopes bind to
    Hash(HashArgs),
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Response file (stdin if omitted)
    input: Option<PathBuf>,
    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Response file (stdin if omitted)
    input: Option<PathBuf>,
    /// File to patch when a suggestion names none
    #[arg(long)]
    file: Option<String>,
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Show what would change without writing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Model text containing the envelope (stdin if omitted)
    input: Option<PathBuf>,
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[derive(Args, Debug)]
struct EnvelopeArgs {
    /// Model text containing the envelope (stdin if omitted)
    input: Option<PathBuf>,
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// Show what would change without writing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct RepairArgs {
    /// File to repair, relative to the root
    file: String,
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

#[derive(Args, Debug)]
struct HashArgs {
    file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract(args) => run_extract(args),
        Commands::Apply(args) => run_apply(args, &config),
        Commands::Validate(args) => run_validate(args, &config),
        Commands::ApplyEnvelope(args) => run_apply_envelope(args, &config),
        Commands::Repair(args) => run_repair(args, &config).await,
        Commands::Hash(args) => {
            let content = std::fs::read_to_string(&args.file)
                .with_context(|| format!("Failed to read {}", args.file.display()))?;
            println!("{}", content_hash(&content));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        Level::DEBUG
    } else if quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

fn orchestrator(root: &Path, config: &Config) -> Result<PatchOrchestrator<FsWorkspace>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Root {} does not exist", root.display()))?;
    Ok(PatchOrchestrator::new(FsWorkspace::new(root))
        .with_limits(config.limits())
        .with_max_iterations(config.max_iterations))
}

fn print_preview(preview: &PatchPreview, dry_run: bool) {
    let verb = if dry_run { "would write" } else { "wrote" };
    println!("+ {}", preview.label);
    for change in &preview.changes {
        let before = change.before.as_deref().map(|b| b.lines().count());
        match before {
            Some(before) => println!(
                "    {} {} ({} -> {} lines)",
                verb,
                change.path,
                before,
                change.after.lines().count()
            ),
            None => println!(
                "    {} {} (new, {} lines)",
                verb,
                change.path,
                change.after.lines().count()
            ),
        }
    }
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    let text = read_input(args.input.as_deref())?;
    let report = extract(&text)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Summary: {}", report.summary_or_default());
    if !report.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for item in &report.recommendations {
            println!("  - {}", item);
        }
    }
    if !report.suggestions.is_empty() {
        println!();
        println!("Suggestions:");
        for s in &report.suggestions {
            println!(
                "  [{}] {} -> {}",
                s.payload_kind().label(),
                s.description,
                s.target_file_path.as_deref().unwrap_or("(unresolved)")
            );
        }
    }
    Ok(())
}

fn run_apply(args: ApplyArgs, config: &Config) -> Result<()> {
    let text = read_input(args.input.as_deref())?;
    let report = extract(&text)?;
    if report.suggestions.is_empty() {
        println!("No suggestions to apply.");
        return Ok(());
    }

    let orch = orchestrator(&args.root, config)?;
    let fallback = args.file.as_deref();
    let batch = if args.dry_run {
        orch.dry_run_batch(&report.suggestions, fallback)
    } else {
        orch.apply_batch_with_fallback(&report.suggestions, fallback)
    };
    for preview in &batch.applied {
        print_preview(preview, args.dry_run);
    }
    for failure in &batch.failures {
        println!("x {}: {}", failure.description, failure.error.user_message());
    }
    println!("{}", batch.summary());

    if batch.failed() > 0 && !args.dry_run {
        bail!("{} of {} suggestion(s) could not be applied", batch.failed(), report.suggestions.len());
    }
    Ok(())
}

fn load_envelope(input: Option<&Path>) -> Result<PatchEnvelope> {
    let text = read_input(input)?;
    let parsed = parse_envelope(&text)?;
    if let Some(thoughts) = &parsed.thoughts {
        tracing::debug!(thoughts = %patchwright::util::truncate(thoughts, 200), "model reasoning");
    }
    Ok(parsed.envelope)
}

/// Current text of every envelope target, keyed by declared path
fn snapshot_for<W: Workspace>(orch: &PatchOrchestrator<W>, envelope: &PatchEnvelope) -> Result<FileSnapshot> {
    let workspace = orch.workspace();
    let mut snapshot = FileSnapshot::new();
    for path in envelope.edited_paths() {
        if let Some(actual) = workspace.locate(&path) {
            snapshot.insert(path, workspace.read(&actual)?);
        }
    }
    Ok(snapshot)
}

fn run_validate(args: ValidateArgs, config: &Config) -> Result<()> {
    let envelope = load_envelope(args.input.as_deref())?;
    let orch = orchestrator(&args.root, config)?;
    let snapshot = snapshot_for(&orch, &envelope)?;
    let report = validate(&envelope, &snapshot, orch.limits());

    println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    if !report.is_valid() {
        bail!("envelope failed validation with {} error(s)", report.errors.len());
    }
    Ok(())
}

fn run_apply_envelope(args: EnvelopeArgs, config: &Config) -> Result<()> {
    let envelope = load_envelope(args.input.as_deref())?;
    let orch = orchestrator(&args.root, config)?;

    let preview = if args.dry_run {
        orch.preview(&envelope)?
    } else {
        orch.apply(&envelope)?
    };
    print_preview(&preview, args.dry_run);
    Ok(())
}

async fn run_repair(args: RepairArgs, config: &Config) -> Result<()> {
    let command = config
        .analyzer_command
        .as_deref()
        .with_context(|| format!("No analyzer_command configured in {}", Config::config_location()))?;
    let analyzer = CommandAnalyzer::new(command, config.analyzer_timeout())?;
    let orch = orchestrator(&args.root, config)?;

    let cancel = AtomicBool::new(false);
    let report = orch.repair(&args.file, &analyzer, &cancel).await?;

    for record in &report.iterations {
        println!(
            "#{} {} (issues {}, applied {}, failed {})",
            record.number, record.summary, record.issues, record.applied, record.failed
        );
        for failure in &record.failures {
            println!("    x {}", failure);
        }
    }

    match report.outcome {
        RepairOutcome::Clean => {
            println!(
                "{} is clean after {} iteration(s)",
                report.path,
                report.iterations.len()
            );
            Ok(())
        }
        RepairOutcome::Stopped(err) => bail!("{}", err.user_message()),
    }
}
