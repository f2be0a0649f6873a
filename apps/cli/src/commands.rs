//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::{error, info, warn};

use scholarflow_core::pipelines::{self, RunContext, WorkflowKind};
use scholarflow_core::{
    CitationGuides, InteractionHistory, MemoryHistory, ProgressReporter, RunOutcome, capability,
};
use scholarflow_shared::{
    AppConfig, IdentityKey, expand_home, init_config, load_config, load_config_from,
};
use scholarflow_storage::{RunRecord, RunStatus, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// scholarflow: plan, research and assemble documents with parallel generation steps.
#[derive(Parser)]
#[command(
    name = "scholarflow",
    version,
    about = "Plan a research query, research its subtopics in parallel, and merge the results.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.scholarflow/scholarflow.toml.
    #[arg(long, env = "SCHOLARFLOW_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Workflow selectable from the command line.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum WorkflowArg {
    DeepSearch,
    ResearchReport,
}

impl From<WorkflowArg> for WorkflowKind {
    fn from(arg: WorkflowArg) -> Self {
        match arg {
            WorkflowArg::DeepSearch => Self::DeepSearch,
            WorkflowArg::ResearchReport => Self::ResearchReport,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run a workflow for a query and write the resulting document.
    Run {
        /// Which workflow to run.
        #[arg(short, long, value_enum, default_value = "deep-search")]
        workflow: WorkflowArg,

        /// The research query.
        #[arg(short, long)]
        query: String,

        /// Output file (defaults to <output_dir>/<workflow>-<run id>.md).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Number of subtopics to plan.
        #[arg(long)]
        subtopics: Option<usize>,

        /// Citation style for the final document.
        #[arg(long)]
        citation_style: Option<String>,

        /// Model override for the OpenRouter capability.
        #[arg(long)]
        model: Option<String>,

        /// Keep interaction history in memory only.
        #[arg(long)]
        ephemeral: bool,
    },

    /// Inspect stored interaction history and runs.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Citation guide folder.
    Guides {
        #[command(subcommand)]
        action: GuidesAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// History subcommands.
#[derive(Subcommand)]
pub(crate) enum HistoryAction {
    /// List identities, or print one identity's log.
    Show {
        /// Identity as `owner:role` (e.g. `user:planning`).
        #[arg(long)]
        identity: Option<String>,
    },
    /// List recent runs.
    Runs {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

/// Guides subcommands.
#[derive(Subcommand)]
pub(crate) enum GuidesAction {
    /// List available citation guides.
    List,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "scholarflow=info",
        1 => "scholarflow=debug",
        _ => "scholarflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            workflow,
            query,
            out,
            subtopics,
            citation_style,
            model,
            ephemeral,
        } => {
            let mut config = resolve_config(config_path)?;
            if let Some(count) = subtopics {
                config.defaults.subtopic_count = Some(count);
            }
            if let Some(style) = citation_style {
                config.defaults.citation_style = style;
            }
            if let Some(model) = model {
                config.openrouter.default_model = model;
            }
            cmd_run(config, workflow.into(), &query, out.as_deref(), ephemeral).await
        }
        Command::History { action } => {
            let config = resolve_config(config_path)?;
            match action {
                HistoryAction::Show { identity } => {
                    cmd_history_show(&config, identity.as_deref()).await
                }
                HistoryAction::Runs { limit } => cmd_history_runs(&config, limit).await,
            }
        }
        Command::Guides { action } => match action {
            GuidesAction::List => cmd_guides_list(&resolve_config(config_path)?),
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&resolve_config(config_path)?),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: AppConfig,
    kind: WorkflowKind,
    query: &str,
    out: Option<&Path>,
    ephemeral: bool,
) -> Result<()> {
    let storage = Arc::new(Storage::open(&expand_home(&config.defaults.history_db)).await?);
    let history: Arc<dyn InteractionHistory> = if ephemeral {
        Arc::new(MemoryHistory::new())
    } else {
        storage.clone()
    };

    let capability = capability::from_config(&config).await?;
    let output_dir = expand_home(&config.defaults.output_dir);
    let ctx = RunContext::new(config, query, capability, history)?;

    let record = RunRecord::start(kind.as_str(), query);
    storage.insert_run(&record).await?;
    info!(run_id = %record.id, workflow = %kind, query, "starting run");

    let progress = Arc::new(CliProgress::new());
    let outcome = match pipelines::run(kind, &ctx, progress.clone()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            progress.abandon();
            error!(run_id = %record.id, error = %e, "run failed");
            storage
                .finish_run(&record.id, RunStatus::Failed, None, Some(&e.to_string()))
                .await?;
            return Err(e.into());
        }
    };

    let path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| output_dir.join(format!("{kind}-{}.md", record.id)));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| eyre!("cannot create output directory {}: {e}", parent.display()))?;
    }
    std::fs::write(&path, render_document(kind, &outcome))
        .map_err(|e| eyre!("cannot write {}: {e}", path.display()))?;

    let path_str = path.to_string_lossy();
    storage
        .finish_run(&record.id, RunStatus::Completed, Some(&path_str), None)
        .await?;

    for failure in &outcome.failures {
        warn!(
            group = %failure.group,
            index = failure.index,
            step = %failure.step,
            "member output missing from document"
        );
    }

    println!();
    println!("  Run completed.");
    println!("  ID:       {}", record.id);
    println!("  Workflow: {kind}");
    println!("  Missing:  {}", outcome.failures.len());
    println!("  Output:   {}", path.display());
    println!("  Time:     {:.1}s", outcome.duration.as_secs_f64());
    println!();

    Ok(())
}

/// Markdown to write for a finished run. The report workflow ends in
/// `{"report", "url_links"}`; the links are listed after the report.
fn render_document(kind: WorkflowKind, outcome: &RunOutcome) -> String {
    let text = outcome.output.as_text().into_owned();
    if kind != WorkflowKind::ResearchReport {
        return text;
    }

    let Some(value) = outcome.output.as_structured() else {
        return text;
    };
    let report = value
        .get("report")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim_end();
    let links: Vec<&str> = value
        .get("url_links")
        .and_then(Value::as_array)
        .map(|links| links.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut doc = format!("{report}\n");
    if !links.is_empty() {
        doc.push_str("\n## Collected sources\n\n");
        for link in links {
            doc.push_str(&format!("- <{link}>\n"));
        }
    }
    doc
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn abandon(&self) {
        self.spinner.abandon();
    }
}

impl ProgressReporter for CliProgress {
    fn stage_started(&self, name: &str, index: usize, total: usize) {
        self.spinner
            .set_message(format!("[{}/{total}] {name}", index + 1));
    }

    fn member_finished(&self, group: &str, index: usize, ok: bool) {
        let status = if ok { "done" } else { "failed" };
        self.spinner
            .set_message(format!("{group}: member {index} {status}"));
    }

    fn done(&self, _outcome: &RunOutcome) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// history / guides / config
// ---------------------------------------------------------------------------

async fn cmd_history_show(config: &AppConfig, identity: Option<&str>) -> Result<()> {
    let storage = Storage::open_readonly(&expand_home(&config.defaults.history_db)).await?;

    let Some(identity) = identity else {
        let identities = storage.list_identities().await?;
        if identities.is_empty() {
            println!("No interaction history recorded.");
        }
        for (key, count) in identities {
            println!("{key:<40} {count:>6} interactions");
        }
        return Ok(());
    };

    let (owner, role) = identity
        .split_once(':')
        .ok_or_else(|| eyre!("identity must look like owner:role, got '{identity}'"))?;
    let key = IdentityKey::new(owner, role);

    for interaction in storage.interaction_log(&key).await? {
        println!(
            "--- {} [{}]",
            interaction.role.as_str(),
            interaction.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!("{}", interaction.content.trim_end());
    }
    Ok(())
}

async fn cmd_history_runs(config: &AppConfig, limit: usize) -> Result<()> {
    let storage = Storage::open_readonly(&expand_home(&config.defaults.history_db)).await?;
    for run in storage.list_runs(limit).await? {
        println!(
            "{}  {:<16} {:<10} {}",
            run.id,
            run.workflow,
            run.status.as_str(),
            run.output_path.as_deref().or(run.error.as_deref()).unwrap_or("-")
        );
        println!("    {}", run.query);
    }
    Ok(())
}

fn cmd_guides_list(config: &AppConfig) -> Result<()> {
    let guides = CitationGuides::from_config(config);
    let names = guides.list()?;
    if names.is_empty() {
        println!("No citation guides found in {}", guides.dir().display());
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use scholarflow_shared::StepResult;

    use super::*;

    fn outcome(output: StepResult) -> RunOutcome {
        RunOutcome {
            output,
            failures: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn cli_parses_run() {
        let cli = Cli::try_parse_from([
            "scholarflow",
            "run",
            "--workflow",
            "research-report",
            "--query",
            "spin crossover",
            "--subtopics",
            "2",
        ])
        .unwrap();
        match cli.command {
            Command::Run {
                workflow,
                query,
                subtopics,
                ..
            } => {
                assert!(matches!(workflow, WorkflowArg::ResearchReport));
                assert_eq!(query, "spin crossover");
                assert_eq!(subtopics, Some(2));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn deep_search_output_written_verbatim() {
        let doc = render_document(
            WorkflowKind::DeepSearch,
            &outcome(StepResult::text("# Introduction\n\nText\n")),
        );
        assert_eq!(doc, "# Introduction\n\nText\n");
    }

    #[test]
    fn report_output_lists_links() {
        let doc = render_document(
            WorkflowKind::ResearchReport,
            &outcome(StepResult::text(
                r##"{"report": "# Report\n\nBody\n", "url_links": ["https://a/x"]}"##,
            )),
        );
        assert_eq!(doc, "# Report\n\nBody\n\n## Collected sources\n\n- <https://a/x>\n");
    }
}
