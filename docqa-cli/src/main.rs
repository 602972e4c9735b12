//! `docqa` - index a folder of documents and ask questions about it.

mod repl;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use docqa_rag::{
    DirectoryStore, EmbeddingProvider, HashingEmbeddingProvider, InMemoryIndex, IndexReport,
    IndexService, Indexer, LanguageModel, RagConfig, RagPipeline,
};

/// Ask questions about your own documents.
#[derive(Parser, Debug)]
#[command(name = "docqa", version, about)]
struct Cli {
    /// Folder holding the documents to index.
    #[arg(long, global = true, env = "DOCQA_DOCS", default_value = "documents")]
    docs: PathBuf,

    /// Where chunks are stored. `memory` re-indexes the docs folder on every run.
    #[arg(long, global = true, env = "DOCQA_BACKEND", value_enum, default_value_t = Backend::Memory)]
    backend: Backend,

    /// How chunks and questions are embedded.
    #[arg(long, global = true, env = "DOCQA_EMBEDDER", value_enum, default_value_t = Embedder::Hash)]
    embedder: Embedder,

    /// JSON file overriding pipeline settings.
    #[arg(long, global = true, env = "DOCQA_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Azure AI Search endpoint, e.g. https://my-search.search.windows.net
    #[arg(long, global = true, env = "AZURE_SEARCH_ENDPOINT", hide_env_values = true)]
    azure_endpoint: Option<String>,

    /// Azure AI Search admin key.
    #[arg(long, global = true, env = "AZURE_SEARCH_KEY", hide_env_values = true)]
    azure_key: Option<String>,

    /// Azure AI Search index name.
    #[arg(long, global = true, env = "AZURE_SEARCH_INDEX_NAME", default_value = "articles-index")]
    index_name: String,

    /// OpenAI API key, for `--embedder openai`.
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_key: Option<String>,

    /// Anthropic API key.
    #[arg(long, global = true, env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_key: Option<String>,

    /// Anthropic model used to write answers.
    #[arg(long, global = true, env = "ANTHROPIC_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index every supported file in the docs folder.
    Index {
        /// Remove this document from the index instead.
        #[arg(long, value_name = "NAME")]
        delete: Option<String>,
    },
    /// Answer one question and exit.
    Ask {
        question: String,
        /// vector, keyword or hybrid.
        #[arg(long, default_value = "hybrid")]
        mode: String,
        /// Chunks to retrieve; defaults to the configured top_k.
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Interactive question loop.
    Chat {
        /// Search mode for questions without a prefix.
        #[arg(long, default_value = "vector")]
        mode: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Print index counters.
    Stats,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Memory,
    Azure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Embedder {
    /// Deterministic feature hashing; no model download.
    Hash,
    /// all-MiniLM-L6-v2 via fastembed.
    Minilm,
    /// OpenAI text-embedding-3-small, truncated to 384 dimensions.
    Openai,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init_logging(cli.log_json, "info");

    let config = load_config(cli.config.as_deref()).await?;
    let embedder = open_embedder(&cli)?;
    let index = open_index(&cli)?;
    info!(
        backend = index.name(),
        model = embedder.model_version(),
        docs = %cli.docs.display(),
        "starting"
    );

    match &cli.command {
        Command::Index { delete } => {
            let indexer = Indexer::new(&config, embedder, index)?;
            indexer.create_index().await?;
            if let Some(name) = delete {
                let removed = indexer.delete_document(name).await?;
                println!("Removed {removed} chunks of {name}");
                return Ok(());
            }
            let report = indexer.index_store(&DirectoryStore::new(&cli.docs)).await?;
            print_report(&report);
            if !report.is_success() {
                anyhow::bail!("{} document(s) failed to index", report.failures().count());
            }
        }
        Command::Stats => {
            let indexer = Indexer::new(&config, embedder, index)?;
            indexer.create_index().await?;
            if cli.backend == Backend::Memory {
                indexer.index_store(&DirectoryStore::new(&cli.docs)).await?;
            }
            let stats = indexer.stats().await?;
            println!("Backend:         {}", indexer.index().name());
            println!("Chunks:          {}", stats.record_count);
            println!("Documents:       {}", stats.distinct_document_count);
            if let Some(dimensions) = stats.dimensions {
                println!("Dimensions:      {dimensions}");
            }
            if let Some(version) = &stats.embedding_model_version {
                println!("Embedding model: {version}");
            }
        }
        Command::Ask { question, mode, top_k } => {
            let top_k = top_k.unwrap_or(config.top_k);
            let pipeline = open_pipeline(&cli, config, embedder, index).await?;
            let response = pipeline.answer_question(question, mode, top_k).await?;
            println!("{}", repl::render_response(&response));
        }
        Command::Chat { mode, top_k } => {
            let top_k = top_k.unwrap_or(config.top_k);
            mode.parse::<docqa_rag::SearchMode>()?;
            let pipeline = open_pipeline(&cli, config, embedder, index).await?;
            repl::run(&pipeline, mode, top_k).await?;
        }
    }

    Ok(())
}

async fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<RagConfig> {
    let Some(path) = path else {
        return Ok(RagConfig::default());
    };
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config {}", path.display()))?;
    Ok(RagConfig::from_json(&json)?)
}

/// Build the pipeline; the in-memory backend is filled from the docs folder first.
async fn open_pipeline(
    cli: &Cli,
    config: RagConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn IndexService>,
) -> anyhow::Result<RagPipeline> {
    let pipeline = RagPipeline::builder()
        .config(config)
        .embedding_provider(embedder)
        .index(index)
        .language_model(open_model(cli)?)
        .build()?;
    pipeline.create_index().await?;

    if cli.backend == Backend::Memory {
        let report = pipeline.ingest_store(&DirectoryStore::new(&cli.docs)).await?;
        for (document_id, error) in report.failures() {
            warn!(document.id = document_id, error = %error, "document not searchable");
        }
        if report.succeeded() == 0 {
            warn!(docs = %cli.docs.display(), "no documents indexed");
        }
    }
    Ok(pipeline)
}

fn print_report(report: &IndexReport) {
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(chunks) => println!("  ok      {:<40} {chunks} chunks", outcome.document_id),
            Err(e) => println!("  failed  {:<40} {e}", outcome.document_id),
        }
    }
    println!(
        "Indexed {}/{} documents ({} chunks)",
        report.succeeded(),
        report.outcomes.len(),
        report.total_chunks()
    );
}

fn open_embedder(cli: &Cli) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match cli.embedder {
        Embedder::Hash => Ok(Arc::new(HashingEmbeddingProvider::default())),
        Embedder::Minilm => minilm_embedder(),
        Embedder::Openai => openai_embedder(cli),
    }
}

#[cfg(feature = "openai")]
fn openai_embedder(cli: &Cli) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let key = cli.openai_key.as_deref().context("OPENAI_API_KEY is not set")?;
    let provider = docqa_rag::OpenAIEmbeddingProvider::new(key)?.with_dimensions(384);
    Ok(Arc::new(provider))
}

#[cfg(not(feature = "openai"))]
fn openai_embedder(_cli: &Cli) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    anyhow::bail!("--embedder openai requires the `openai` feature")
}

#[cfg(feature = "fastembed")]
fn minilm_embedder() -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let loader = docqa_rag::FastEmbedLoader::new();
    Ok(Arc::new(docqa_rag::LazyEmbeddingProvider::new(loader)))
}

#[cfg(not(feature = "fastembed"))]
fn minilm_embedder() -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    anyhow::bail!("--embedder minilm requires the `fastembed` feature")
}

fn open_index(cli: &Cli) -> anyhow::Result<Arc<dyn IndexService>> {
    match cli.backend {
        Backend::Memory => Ok(Arc::new(InMemoryIndex::new())),
        Backend::Azure => azure_index(cli),
    }
}

#[cfg(feature = "azure")]
fn azure_index(cli: &Cli) -> anyhow::Result<Arc<dyn IndexService>> {
    let endpoint =
        cli.azure_endpoint.as_deref().context("AZURE_SEARCH_ENDPOINT is not set")?;
    let key = cli.azure_key.as_deref().context("AZURE_SEARCH_KEY is not set")?;
    let index = docqa_rag::AzureSearchIndex::new(endpoint, key, cli.index_name.as_str())?;
    Ok(Arc::new(index))
}

#[cfg(not(feature = "azure"))]
fn azure_index(_cli: &Cli) -> anyhow::Result<Arc<dyn IndexService>> {
    anyhow::bail!("--backend azure requires the `azure` feature")
}

#[cfg(feature = "anthropic")]
fn open_model(cli: &Cli) -> anyhow::Result<Arc<dyn LanguageModel>> {
    let key = cli.anthropic_key.as_deref().context("ANTHROPIC_API_KEY is not set")?;
    let mut model = docqa_rag::AnthropicModel::new(key)?;
    if let Some(name) = &cli.model {
        model = model.with_model(name.as_str());
    }
    Ok(Arc::new(model))
}

#[cfg(not(feature = "anthropic"))]
fn open_model(_cli: &Cli) -> anyhow::Result<Arc<dyn LanguageModel>> {
    anyhow::bail!("answering questions requires the `anthropic` feature")
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
    fn ask_parses_mode_and_top_k() {
        let cli = Cli::try_parse_from([
            "docqa", "ask", "what about cats?", "--mode", "keyword", "--top-k", "3",
        ])
        .unwrap();
        match cli.command {
            Command::Ask { question, mode, top_k } => {
                assert_eq!(question, "what about cats?");
                assert_eq!(mode, "keyword");
                assert_eq!(top_k, Some(3));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_options_follow_subcommand() {
        let cli = Cli::try_parse_from(["docqa", "stats", "--backend", "memory", "--docs", "notes"])
            .unwrap();
        assert_eq!(cli.backend, Backend::Memory);
        assert_eq!(cli.docs, PathBuf::from("notes"));
        assert!(matches!(cli.command, Command::Stats));
    }

    #[tokio::test]
    async fn missing_config_file_is_reported() {
        let err = load_config(Some(std::path::Path::new("/nonexistent/docqa.json")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
