//! Command-line interface for recass.
//!
//! Provides commands for running a live session, inspecting config,
//! and browsing past meetings and their findings.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::adapters::{HttpKnowledgeBase, OllamaJudge};
use crate::config::{CoreConfig, HandoffMode};
use crate::domain::{SegmentSource, SinkEntry};
use crate::ingest::speech::SpeechCollaborator;
use crate::ingest::{CommandCapture, CommandSpeech, ScreenCapture};
use crate::session::MeetingSession;
use crate::store::MeetingStore;

/// recass - real-time meeting consistency checker
#[derive(Parser, Debug)]
#[command(name = "recass")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a live meeting session until Ctrl-C
    Run,

    /// Show the resolved configuration
    Config,

    /// List recorded meetings
    Meetings {
        /// Substring to search titles and transcripts for
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Print the findings log of a meeting
    Findings {
        /// Meeting ID
        meeting_id: String,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = CoreConfig::load()?;

        match self.command {
            Commands::Run => run_session(config).await,
            Commands::Config => show_config(&config),
            Commands::Meetings { search } => list_meetings(&config, search.as_deref()),
            Commands::Findings { meeting_id } => show_findings(&config, &meeting_id).await,
        }
    }
}

async fn run_session(config: CoreConfig) -> Result<()> {
    let mut sources: Vec<(SegmentSource, Box<dyn SpeechCollaborator>)> = Vec::new();
    if let Some(ref command) = config.mic_command {
        sources.push((
            SegmentSource::Mic,
            Box::new(CommandSpeech::from_command("mic", command)?),
        ));
    }
    if let Some(ref command) = config.loopback_command {
        sources.push((
            SegmentSource::Loopback,
            Box::new(CommandSpeech::from_command("loopback", command)?),
        ));
    }
    if sources.is_empty() {
        anyhow::bail!("no speech sources configured (set capture.mic_command or capture.loopback_command)");
    }

    let capture: Option<Arc<dyn ScreenCapture>> = config
        .screenshot_command
        .as_ref()
        .map(|c| Arc::new(CommandCapture::new(c.clone())) as Arc<dyn ScreenCapture>);

    let judge = Arc::new(OllamaJudge::new(
        config.ollama_url.clone(),
        config.ollama_model.clone(),
    ));
    if let Err(e) = judge.health_check().await {
        // Not fatal: the checker degrades instead
        eprintln!("warning: ollama not reachable ({})", e);
    }
    let kb = Arc::new(HttpKnowledgeBase::new(config.knowledge_url.clone()));

    let handoff = config.handoff;
    let session = MeetingSession::start(config, sources, capture, kb, judge)?;
    println!("Session started: {}", session.meeting_id);

    // Live printing only in immediate handoff mode; at_end consumers
    // read the report below
    let printer = if handoff == HandoffMode::Immediate {
        let mut rx = session.sink().subscribe();
        Some(tokio::spawn(async move {
            while let Ok(entry) = rx.recv().await {
                if let SinkEntry::Finding(f) = entry {
                    println!(
                        "[{}] {:?}: \"{}\" vs meeting {} (\"{}\")",
                        f.ts.format("%H:%M:%S"),
                        f.verdict,
                        f.statement.text,
                        f.prior.meeting_id,
                        f.prior.snippet
                    );
                }
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("interrupt received");

    let report = session.stop().await?;
    if let Some(printer) = printer {
        printer.abort();
    }

    println!("\nSession {} finished", report.meeting_id);
    if let Some(title) = &report.title {
        println!("  title:    {}", title);
    }
    println!("  duration: {}s", (report.ended_at - report.started_at).num_seconds());
    println!("  segments: {} ({} late drops)", report.segment_count, report.dropped_late);
    println!("  findings: {}", report.finding_count);
    if let Some(summary) = &report.summary {
        println!("\n{}", summary);
    }

    Ok(())
}

fn show_config(config: &CoreConfig) -> Result<()> {
    println!("home:                 {}", config.home.display());
    println!("window duration:      {:?}", config.window_duration);
    println!("lateness bound:       {:?}", config.lateness_bound);
    println!("checker interval:     {:?}", config.checker_interval);
    println!("segment trigger:      {}", config.segment_trigger);
    println!("similarity threshold: {}", config.similarity_threshold);
    println!("top k:                {}", config.top_k);
    println!("ollama:               {} ({})", config.ollama_url, config.ollama_model);
    println!("knowledge base:       {}", config.knowledge_url);
    Ok(())
}

fn list_meetings(config: &CoreConfig, search: Option<&str>) -> Result<()> {
    let store = MeetingStore::open(&config.meetings_db_path())?;
    let meetings = match search {
        Some(query) => store.search(query)?,
        None => store.list()?,
    };

    if meetings.is_empty() {
        println!("No meetings recorded.");
        return Ok(());
    }

    for m in meetings {
        println!(
            "{}  {}  {:>5}s  {:>3} findings  {}",
            m.created_at.format("%Y-%m-%d %H:%M"),
            m.id,
            m.duration_secs,
            m.finding_count,
            m.title
        );
    }
    Ok(())
}

async fn show_findings(config: &CoreConfig, meeting_id: &str) -> Result<()> {
    let path = config.findings_path(meeting_id);
    let content = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("No findings log at {}", path.display()))?;

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let entry: SinkEntry =
            serde_json::from_str(line).with_context(|| format!("Bad sink entry: {}", line))?;
        match entry {
            SinkEntry::Finding(f) => {
                println!("[{}] {:?}", f.ts.format("%H:%M:%S"), f.verdict);
                println!("  now:   \"{}\" ({})", f.statement.text, f.statement.speaker);
                println!(
                    "  prior: \"{}\" (meeting {}, similarity {:.2})",
                    f.prior.snippet, f.prior.meeting_id, f.prior.similarity
                );
                println!("  why:   {}", f.rationale);
                if let Some(superseded) = f.supersedes {
                    println!("  supersedes: {}", superseded);
                }
            }
            SinkEntry::Summary(s) => {
                println!("[{}] summary ({} segments)", s.ts.format("%H:%M:%S"), s.segment_count);
                println!("  {}", s.text);
            }
        }
    }
    Ok(())
}
