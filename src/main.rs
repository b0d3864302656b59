use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use confpatch::api::{self, Route};
use confpatch::config::{load_from_path, Settings};
use confpatch::{
    ApplySummary, Document, FailureReason, ItemStatus, JsonTemplateStore, Outcome,
    PatchService, TargetReading, Template, TemplateStore,
};
use similar::{ChangeTag, TextDiff};
use std::collections::{BTreeSet, HashMap};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_CONFIG_FILE: &str = "confpatch.toml";

#[derive(Parser)]
#[command(name = "confpatch")]
#[command(about = "Template-driven configuration patching", long_about = None)]
#[command(version)]
struct Cli {
    /// Settings file (defaults to ./confpatch.toml when present)
    #[arg(short, long, global = true, env = "CONFPATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show every line of a file matching an anchor
    Find {
        file: String,

        prefix: String,

        /// Text that must follow the prefix on the same line
        #[arg(short, long, default_value = "")]
        suffix: String,
    },

    /// List stored templates
    List,

    /// Show a template with the values its targets currently hold
    Show { template: String },

    /// Write new values to every target of a template
    Apply {
        template: String,

        /// Value for a config item, as <item>=<value> (item by id or name)
        #[arg(short = 's', long = "set", value_name = "ITEM=VALUE", required = true)]
        values: Vec<String>,

        /// Report what would change without modifying files
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long, conflicts_with = "dry_run")]
        diff: bool,
    },

    /// Handle one JSON request read from stdin (routes: find-matches, apply)
    Rpc { route: String },
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;
    let service = PatchService::from_settings(&settings);

    match cli.command {
        Commands::Find {
            file,
            prefix,
            suffix,
        } => cmd_find(&service, &file, &prefix, &suffix),
        Commands::List => cmd_list(&settings),
        Commands::Show { template } => cmd_show(&service, &settings, &template),
        Commands::Apply {
            template,
            values,
            dry_run,
            diff,
        } => cmd_apply(&service, &settings, &template, &values, dry_run, diff),
        Commands::Rpc { route } => cmd_rpc(&service, &route),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("CONFPATCH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .try_init();
}

/// Resolve settings: explicit flag or `CONFPATCH_CONFIG`, then
/// `./confpatch.toml`, then built-in defaults.
fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    if let Some(path) = explicit {
        return Ok(load_from_path(path)?);
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.is_file() {
        return Ok(load_from_path(&local)?);
    }
    Ok(Settings::default())
}

fn open_store(settings: &Settings) -> Result<JsonTemplateStore> {
    Ok(JsonTemplateStore::open(&settings.templates_dir)?)
}

fn cmd_find(service: &PatchService, file: &str, prefix: &str, suffix: &str) -> Result<()> {
    let matches = service.search_anchor(file, prefix, suffix)?;
    let path = matches.document().path().to_path_buf();

    let mut count = 0;
    for candidate in matches {
        println!(
            "{}: {}",
            format!("{:>5}", candidate.line_number).cyan(),
            candidate.line_content
        );
        count += 1;
    }

    if count == 0 {
        println!("{}", format!("No match in {}", path.display()).yellow());
    } else {
        println!(
            "{}",
            format!("{} match(es) in {}", count, path.display()).dimmed()
        );
    }
    Ok(())
}

fn cmd_list(settings: &Settings) -> Result<()> {
    let store = open_store(settings)?;
    let templates = store.list_templates()?;

    if templates.is_empty() {
        println!(
            "{}",
            format!("No templates in {}", store.dir().display()).yellow()
        );
        return Ok(());
    }

    for summary in templates {
        println!(
            "{}  {} ({} item(s))",
            summary.id.dimmed(),
            summary.name.bold(),
            summary.item_count
        );
        if !summary.description.is_empty() {
            println!("    {}", summary.description);
        }
    }
    Ok(())
}

fn cmd_show(service: &PatchService, settings: &Settings, id: &str) -> Result<()> {
    let store = open_store(settings)?;
    let template = store.get_template(id)?;
    let status = service.inspect_template(&template);

    println!("{} {}", template.name.bold(), template.id.dimmed());
    if !template.description.is_empty() {
        println!("{}", template.description);
    }
    println!();

    for (item, report) in template.items.iter().zip(&status.items) {
        let badge = match report.status {
            ItemStatus::Ok => "OK".green(),
            ItemStatus::Inconsistent => "INCONSISTENT".yellow(),
            ItemStatus::Partial => "PARTIAL".yellow(),
            ItemStatus::Error => "ERROR".red(),
        };
        println!(
            "{} {} = {} [{}]",
            "•".cyan(),
            item.name.bold(),
            report.current_value.as_deref().unwrap_or("?"),
            badge
        );
        if !item.default_value.is_empty() {
            println!("    default: {}", item.default_value.dimmed());
        }

        for target in &report.targets {
            match &target.reading {
                TargetReading::Found {
                    line_number,
                    relocated_from,
                    value,
                } => {
                    let moved = relocated_from
                        .map(|from| format!(" (moved from {from})"))
                        .unwrap_or_default();
                    println!(
                        "    {}:{}{} = {}",
                        target.file_path.display(),
                        line_number,
                        moved.dimmed(),
                        value
                    );
                }
                TargetReading::Unavailable { reason } => {
                    println!(
                        "    {} {}",
                        target.file_path.display(),
                        reason.to_string().red()
                    );
                }
            }
        }
    }
    Ok(())
}

/// Map `item=value` arguments onto config item ids.
fn parse_values(template: &Template, raw: &[String]) -> Result<HashMap<String, String>> {
    let mut values = HashMap::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("expected <item>=<value>, got '{entry}'"))?;
        let item = template.find_item(key.trim()).with_context(|| {
            format!("template '{}' has no config item '{}'", template.name, key.trim())
        })?;
        values.insert(item.id.clone(), value.to_string());
    }
    Ok(values)
}

/// Helper: Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (original)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (patched)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);
    for hunk in diff.unified_diff().context_radius(2).iter_hunks() {
        println!("{}", hunk.header().to_string().cyan());
        for change in hunk.iter_changes() {
            let line = match change.tag() {
                ChangeTag::Delete => format!("-{}", change).red(),
                ChangeTag::Insert => format!("+{}", change).green(),
                ChangeTag::Equal => format!(" {}", change).normal(),
            };
            print!("{}", line);
            if change.missing_newline() {
                println!();
            }
        }
    }
}

fn cmd_apply(
    service: &PatchService,
    settings: &Settings,
    id: &str,
    raw_values: &[String],
    dry_run: bool,
    show_diff: bool,
) -> Result<()> {
    let store = open_store(settings)?;
    let template = store.get_template(id)?;
    let values = parse_values(&template, raw_values)?;

    println!("Template: {} ({})", template.name.bold(), template.id.dimmed());
    println!();

    let fallback = service.applier().fallback_encoding();
    let read_text = |path: &Path| {
        Document::read_with_fallback(path, fallback)
            .ok()
            .map(|doc| doc.text())
    };

    // Only read files the batch will touch.
    let mut before: HashMap<PathBuf, String> = HashMap::new();
    if show_diff {
        let files: BTreeSet<PathBuf> = template
            .items
            .iter()
            .filter(|item| values.get(&item.id).is_some_and(|v| !v.is_empty()))
            .flat_map(|item| &item.targets)
            .map(|target| service.normalize(&target.file_path.to_string_lossy()))
            .collect();
        for file in files {
            if let Some(content) = read_text(&file) {
                before.insert(file, content);
            }
        }
    }

    let summary = if dry_run {
        println!("{}", "  [DRY RUN - nothing is written]".cyan());
        service.check_template_values(&template, &values)
    } else {
        service.apply_template_values(&template, &values)
    };

    report(&template, &summary, dry_run);

    if show_diff {
        let mut shown = BTreeSet::new();
        for result in &summary.results {
            if !shown.insert(result.file_path.clone()) {
                continue;
            }
            if let Some(original) = before.get(&result.file_path) {
                if let Some(after) = read_text(&result.file_path) {
                    if *original != after {
                        display_diff(&result.file_path, original, &after);
                    }
                }
            }
        }
    }

    if summary.has_failures() {
        std::process::exit(1);
    }
    Ok(())
}

fn report(template: &Template, summary: &ApplySummary, dry_run: bool) {
    let mut unchanged = 0;
    let mut skipped = 0;
    let mut failed = 0;

    for result in &summary.results {
        let item = result
            .item_id
            .as_deref()
            .and_then(|id| template.item(id))
            .map(|item| item.name.as_str())
            .unwrap_or("?");
        let location = result.file_path.display();

        match &result.outcome {
            Outcome::Applied { changed: false, .. } => {
                println!("{} {}: Already set in {}", "⊙".yellow(), item, location);
                unchanged += 1;
            }
            Outcome::Applied {
                line_number,
                relocated_from,
                ..
            } => {
                let verb = if dry_run { "Would apply" } else { "Applied" };
                let moved = relocated_from
                    .map(|from| format!(" (moved from {from})"))
                    .unwrap_or_default();
                println!(
                    "{} {}: {} to {}:{}{}",
                    "✓".green(),
                    item,
                    verb,
                    location,
                    line_number,
                    moved.dimmed()
                );
            }
            Outcome::Skipped { reason } => {
                println!("{} {}: Skipped ({})", "⊘".cyan(), item, reason);
                skipped += 1;
            }
            Outcome::Failed { reason } => {
                eprintln!("{} {}: Failed - {}", "✗".red(), item, reason);
                eprintln!("  File: {}", location);
                if let FailureReason::StaleAnchor { candidates } = reason {
                    eprintln!(
                        "  {}",
                        "CONFLICT: recorded line no longer holds the anchor".red()
                    );
                    if *candidates > 1 {
                        eprintln!("  Action: re-select the target with `confpatch find`");
                    }
                }
                failed += 1;
            }
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!(
        "  {} applied",
        format!("{}", summary.applied_count - unchanged).green()
    );
    println!("  {} already set", format!("{}", unchanged).yellow());
    println!("  {} skipped", format!("{}", skipped).cyan());
    println!("  {} failed", format!("{}", failed).red());
}

fn cmd_rpc(service: &PatchService, route: &str) -> Result<()> {
    let route: Route = route.parse()?;
    let mut body = String::new();
    io::stdin()
        .read_to_string(&mut body)
        .context("failed to read request body from stdin")?;

    let response = api::handle(service, route, &body);
    println!("{}", serde_json::to_string_pretty(&response.body)?);

    if !response.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
