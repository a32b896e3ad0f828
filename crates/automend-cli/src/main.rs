//! Automend - automated test-suite repair CLI
//!
//! ## Commands
//!
//! - `run`: drive one repair session against a local git checkout
//! - `check`: evaluate a candidate patch against the policy gate only
//! - `report`: verify and render a stored session artifact

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use automend_core::{
    evaluate_patch, init_tracing, is_blocked, render_diagnostic_md, write_session_artifact,
    ContextBundle, Evidence, PolicyConfig, Proposal, ProposalSource, RepairOrchestrator,
    SessionConfig, StopReason, SubmissionSink,
};
use automend_exec::{FsSubmissionSink, LocalExecutionEnv};

#[derive(Parser)]
#[command(name = "automend")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Automated test-suite repair with policy and verification gates", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one repair session against a local repository
    Run {
        /// Path to the git repository to repair
        #[arg(long)]
        repo: PathBuf,

        /// Test command to run
        #[arg(long, default_value = "cargo test")]
        cmd: String,

        /// Candidate patch file(s), consumed one per attempt (last repeats)
        #[arg(long = "patch", required = true)]
        patches: Vec<PathBuf>,

        /// Maximum repair attempts
        #[arg(long, default_value_t = 2)]
        max_attempts: u32,

        /// Baseline repetitions for the flaky check
        #[arg(long, default_value_t = 3)]
        flaky_runs: u32,

        /// Test run timeout in seconds
        #[arg(long, default_value_t = 300)]
        run_timeout: u64,

        /// Policy override file (TOML, partial keys allowed)
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Directory for session report artifacts
        #[arg(long, default_value = ".automend/reports")]
        report_dir: PathBuf,

        /// Directory for verified patch bundles
        #[arg(long, default_value = ".automend/outbox")]
        submit_dir: PathBuf,

        /// Verify only; do not write a patch bundle on success
        #[arg(long)]
        no_submit: bool,
    },

    /// Evaluate a candidate patch against the policy gate, without running tests
    Check {
        /// Candidate patch file
        #[arg(long)]
        patch: PathBuf,

        /// Policy override file (TOML, partial keys allowed)
        #[arg(long)]
        policy: Option<PathBuf>,
    },

    /// Verify and render a stored session artifact
    Report {
        /// Session id (directory name under the report dir)
        #[arg(long)]
        session: String,

        /// Directory holding session report artifacts
        #[arg(long, default_value = ".automend/reports")]
        report_dir: PathBuf,
    },
}

/// Serves operator-supplied patch files, one per attempt.
struct FileProposals {
    patches: Vec<(PathBuf, String)>,
    next: AtomicUsize,
}

impl FileProposals {
    fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut patches = Vec::with_capacity(paths.len());
        for path in paths {
            let diff = std::fs::read_to_string(path)
                .with_context(|| format!("reading patch file {}", path.display()))?;
            patches.push((path.clone(), diff));
        }
        Ok(Self {
            patches,
            next: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ProposalSource for FileProposals {
    async fn propose(&self, _ctx: &ContextBundle) -> automend_core::Result<Proposal> {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        let (path, diff) = self
            .patches
            .get(index)
            .or_else(|| self.patches.last())
            .cloned()
            .unwrap_or_default();
        Ok(Proposal {
            rationale: format!("operator-supplied patch: {}", path.display()),
            diff,
        })
    }
}

/// Sink used with `--no-submit`: accepts the patch without persisting it.
struct DiscardSink;

#[async_trait]
impl SubmissionSink for DiscardSink {
    async fn submit(&self, _diff: &str, _evidence: &Evidence) -> automend_core::Result<String> {
        Ok("submission skipped (--no-submit)".to_string())
    }
}

fn load_policy(path: Option<&PathBuf>) -> Result<PolicyConfig> {
    match path {
        None => Ok(PolicyConfig::default()),
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading policy file {}", path.display()))?;
            toml::from_str(&text).with_context(|| format!("parsing policy file {}", path.display()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            repo,
            cmd,
            patches,
            max_attempts,
            flaky_runs,
            run_timeout,
            policy,
            report_dir,
            submit_dir,
            no_submit,
        } => {
            run_session(
                repo,
                cmd,
                patches,
                max_attempts,
                flaky_runs,
                run_timeout,
                policy,
                report_dir,
                submit_dir,
                no_submit,
            )
            .await
        }
        Commands::Check { patch, policy } => check_patch(patch, policy),
        Commands::Report {
            session,
            report_dir,
        } => show_report(&session, &report_dir),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    repo: PathBuf,
    cmd: String,
    patches: Vec<PathBuf>,
    max_attempts: u32,
    flaky_runs: u32,
    run_timeout: u64,
    policy: Option<PathBuf>,
    report_dir: PathBuf,
    submit_dir: PathBuf,
    no_submit: bool,
) -> Result<()> {
    let repo = repo
        .canonicalize()
        .with_context(|| format!("repository path does not exist: {}", repo.display()))?;
    let repo_str = repo.display().to_string();

    let policy = load_policy(policy.as_ref())?;
    let config = SessionConfig::new(repo_str.clone(), cmd)
        .with_max_attempts(max_attempts)
        .with_flaky_runs(flaky_runs)
        .with_policy(policy);

    let proposals = Arc::new(FileProposals::load(&patches)?);
    let env = Arc::new(
        LocalExecutionEnv::open(&repo_str, Duration::from_secs(run_timeout))
            .await
            .context("opening execution environment")?,
    );
    let sink: Arc<dyn SubmissionSink> = if no_submit {
        Arc::new(DiscardSink)
    } else {
        Arc::new(FsSubmissionSink::new(submit_dir))
    };

    let orchestrator = RepairOrchestrator::new(proposals, env, sink, config);
    let session = orchestrator.run().await?;

    let artifact = write_session_artifact(&session, &report_dir)?;
    info!(artifact = %artifact.display(), "session artifact written");

    println!("{}", render_diagnostic_md(&session));

    match session.stop_reason {
        Some(StopReason::Success) => Ok(()),
        Some(reason) => bail!("repair unsuccessful: {}", reason.label()),
        None => bail!("session ended without a stop reason"),
    }
}

fn check_patch(patch: PathBuf, policy: Option<PathBuf>) -> Result<()> {
    let diff = std::fs::read_to_string(&patch)
        .with_context(|| format!("reading patch file {}", patch.display()))?;
    let policy = load_policy(policy.as_ref())?;

    let violations = evaluate_patch(&diff, &policy);
    if violations.is_empty() {
        println!("patch is admissible: no policy findings");
        return Ok(());
    }

    for violation in &violations {
        let level = if violation.blocking { "block" } else { "warn" };
        let scope = match (&violation.path, violation.line) {
            (Some(path), Some(line)) => format!(" [{path}:{line}]"),
            (Some(path), None) => format!(" [{path}]"),
            _ => String::new(),
        };
        println!("{level}:{scope} {}", violation.detail);
    }

    if is_blocked(&violations) {
        bail!("patch rejected by policy ({} findings)", violations.len());
    }
    println!("patch is admissible with warnings");
    Ok(())
}

fn show_report(session_id: &str, report_dir: &std::path::Path) -> Result<()> {
    let session = automend_core::report::read_session_artifact(session_id, report_dir)
        .context("loading session artifact")?;
    println!("{}", render_diagnostic_md(&session));
    Ok(())
}
