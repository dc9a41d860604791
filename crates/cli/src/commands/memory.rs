//! `cadence memory` — Memory administration over the SQLite store.
//!
//! Goes through [`MemoryStore`], so scoping, expiry and ranking behave
//! exactly as they do for the agent's `memory` tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadence_core::memory::{Memory, MemoryScope, MemoryType, ScopeFilter};
use cadence_core::workflow::WorkflowId;
use cadence_memory::{ListQuery, MemorySettings, MemoryStore, NewMemory, ScopeQuery, SearchQuery, SqliteBackend};
use clap::{Args, Subcommand, ValueEnum};

use super::config_cmd;

#[derive(Args)]
pub struct MemoryArgs {
    /// SQLite database path (defaults to `memory.path` from config)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Act on behalf of this workflow
    #[arg(long, global = true)]
    pub workflow: Option<String>,

    /// Which memories to consider (for `add`: where to store)
    #[arg(long, global = true, value_enum)]
    pub scope: Option<ScopeArg>,

    #[command(subcommand)]
    pub action: MemoryAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScopeArg {
    Workflow,
    General,
    Both,
}

impl ScopeArg {
    fn filter(self) -> ScopeFilter {
        match self {
            Self::Workflow => ScopeFilter::Workflow,
            Self::General => ScopeFilter::General,
            Self::Both => ScopeFilter::Both,
        }
    }

    fn storage(self) -> Result<MemoryScope, String> {
        match self {
            Self::Workflow => Ok(MemoryScope::Workflow),
            Self::General => Ok(MemoryScope::General),
            Self::Both => Err("--scope both is not valid for add; use workflow or general".into()),
        }
    }
}

#[derive(Subcommand)]
pub enum MemoryAction {
    /// Summarize counts by type and scope
    Describe,

    /// List memories, newest first
    List {
        #[arg(long = "type", value_parser = parse_type)]
        memory_type: Option<MemoryType>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Relevance-ranked search
    Search {
        query: String,
        #[arg(long = "type", value_parser = parse_type)]
        memory_type: Option<MemoryType>,
        #[arg(long)]
        limit: Option<usize>,
        /// Minimum similarity (0-1)
        #[arg(long)]
        threshold: Option<f32>,
    },

    /// Store a new memory
    Add {
        content: String,
        #[arg(long = "type", value_parser = parse_type)]
        memory_type: MemoryType,
        #[arg(long)]
        importance: Option<f32>,
        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Show one memory
    Get { id: String },

    /// Delete one memory
    Delete { id: String },

    /// Delete every memory of a type in scope
    Clear {
        #[arg(long = "type", value_parser = parse_type)]
        memory_type: MemoryType,
        /// Required to actually delete
        #[arg(long)]
        confirm: bool,
    },
}

fn parse_type(raw: &str) -> Result<MemoryType, String> {
    raw.parse().map_err(|e: cadence_core::error::MemoryError| e.to_string())
}

pub async fn run(config_path: &Path, args: MemoryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = config_cmd::load(config_path)?;
    let db_path = args.db.clone().unwrap_or_else(|| config.memory.db_path());
    let path = db_path.to_string_lossy();

    tracing::debug!(db = %path, "Opening memory database");
    let backend = SqliteBackend::new(&path).await?;
    let store = MemoryStore::new(Arc::new(backend)).with_settings(MemorySettings::from_config(&config.memory));

    let output = execute(&store, &args).await?;
    println!("{output}");
    Ok(())
}

/// Run one action and render its result as text.
pub async fn execute(store: &MemoryStore, args: &MemoryArgs) -> Result<String, Box<dyn std::error::Error>> {
    let workflow = args.workflow.as_deref().map(WorkflowId::from);
    let active = workflow.as_ref();
    let scope = ScopeQuery::new(args.scope.map(ScopeArg::filter).unwrap_or_default());

    let rendered = match &args.action {
        MemoryAction::Describe => {
            let summary = store.describe(active, &scope).await?;
            serde_json::to_string_pretty(&summary)?
        }
        MemoryAction::List { memory_type, limit } => {
            let query = ListQuery {
                scope,
                memory_type: *memory_type,
                limit: *limit,
            };
            let memories = store.list(active, &query).await?;
            if memories.is_empty() {
                "No memories.".to_string()
            } else {
                memories.iter().map(render).collect::<Vec<_>>().join("\n")
            }
        }
        MemoryAction::Search {
            query,
            memory_type,
            limit,
            threshold,
        } => {
            let search = SearchQuery {
                query: query.clone(),
                scope,
                memory_type: *memory_type,
                limit: *limit,
                threshold: *threshold,
            };
            let hits = store.search(active, &search).await?;
            if hits.is_empty() {
                format!("No memories found matching '{query}'.")
            } else {
                hits.iter()
                    .enumerate()
                    .map(|(i, hit)| format!("{:>2}. [score: {:.2}] {}", i + 1, hit.score, render(&hit.memory)))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        MemoryAction::Add {
            content,
            memory_type,
            importance,
            tags,
        } => {
            let request = NewMemory {
                scope: args.scope.map(ScopeArg::storage).transpose()?,
                importance: *importance,
                tags: tags.clone(),
                source: Some("cli".into()),
                ..NewMemory::new(*memory_type, content.clone())
            };
            let memory = store.add(active, request).await?;
            format!("✅ Stored {}", render(&memory))
        }
        MemoryAction::Get { id } => match store.get(id).await? {
            Some(memory) => serde_json::to_string_pretty(&memory)?,
            None => format!("No memory with id '{id}'"),
        },
        MemoryAction::Delete { id } => {
            if store.delete(id).await? {
                format!("🗑️  Deleted memory {id}")
            } else {
                format!("No memory with id '{id}'")
            }
        }
        MemoryAction::Clear { memory_type, confirm } => {
            if !confirm {
                format!(
                    "⚠️  This deletes every '{memory_type}' memory in scope.\n   Run again with --confirm to proceed."
                )
            } else {
                let removed = store.clear_by_type(active, *memory_type, &scope).await?;
                format!("🗑️  Removed {removed} '{memory_type}' memories")
            }
        }
    };

    Ok(rendered)
}

fn render(memory: &Memory) -> String {
    let scope = match &memory.workflow_id {
        Some(wf) => format!("workflow {wf}"),
        None => "general".to_string(),
    };
    let preview: String = memory.content.chars().take(80).collect();
    let mut line = format!("{} [{}, {}] {}", memory.id, memory.memory_type, scope, preview);
    if !memory.metadata.tags.is_empty() {
        line.push_str(&format!(" (tags: {})", memory.metadata.tags.join(", ")));
    }
    line
}
