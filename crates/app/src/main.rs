use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rag_retrieval_core::{
    CachedEmbedder, ChunkingConfig, CohereRerank, Document, EmbeddingCache, EmbeddingProvider,
    HashedNgramEmbedder, MemoryVectorStore, OpenAiCompatEmbeddings, PipelineConfig, QdrantStore,
    RerankProvider, RetrievalPipeline, ScoredChunk, TermOverlapRerank, VectorStore,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "rag-cli", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Qdrant base URL; when unset the in-memory store is used.
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection name.
    #[arg(long, default_value = "rag_chunks")]
    qdrant_collection: String,

    /// OpenAI-compatible embeddings base URL (e.g. https://api.mistral.ai).
    #[arg(long, env = "EMBEDDINGS_URL")]
    embeddings_url: Option<String>,

    /// API key for the embeddings endpoint.
    #[arg(long, env = "EMBEDDINGS_API_KEY", default_value = "")]
    embeddings_api_key: String,

    /// Embedding model identifier.
    #[arg(long, default_value = "mistral-embed")]
    embeddings_model: String,

    /// Declared dimension of the embedding model.
    #[arg(long, default_value = "1024")]
    embeddings_dimensions: usize,

    /// Cohere-compatible rerank base URL; when unset a local
    /// term-overlap scorer is used.
    #[arg(long, env = "RERANK_URL")]
    rerank_url: Option<String>,

    /// API key for the rerank endpoint.
    #[arg(long, env = "RERANK_API_KEY", default_value = "")]
    rerank_api_key: String,

    /// Rerank model identifier.
    #[arg(long, default_value = "rerank-v3.5")]
    rerank_model: String,

    /// Chunk size in characters.
    #[arg(long, default_value = "1200")]
    chunk_size: usize,

    /// Chunk overlap in characters.
    #[arg(long, default_value = "120")]
    chunk_overlap: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every .txt/.md file under a folder into the vector store.
    Ingest {
        /// Folder scanned recursively for text documents.
        #[arg(long)]
        folder: String,
    },
    /// Retrieve and rerank context chunks for a query.
    Query {
        /// Query text.
        #[arg(long)]
        query: String,
        /// Number of chunks to return after reranking.
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Candidate pool size fed to the reranker.
        #[arg(long, default_value = "15")]
        candidates: usize,
    },
    /// Ingest a folder and answer a query in one process, entirely
    /// in memory. Useful without any backing services.
    Demo {
        #[arg(long)]
        folder: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "5")]
        top_k: usize,
        #[arg(long, default_value = "15")]
        candidates: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "rag-cli boot"
    );

    let embedding_provider = build_embedding_provider(&cli)?;
    let rerank_provider = build_rerank_provider(&cli)?;
    let config = PipelineConfig {
        chunking: ChunkingConfig {
            chunk_size: cli.chunk_size,
            overlap: cli.chunk_overlap,
            ..ChunkingConfig::default()
        },
        ..PipelineConfig::default()
    };

    match &cli.command {
        Command::Ingest { folder } => {
            if let Some(qdrant_url) = &cli.qdrant_url {
                let store = QdrantStore::new(
                    qdrant_url,
                    &cli.qdrant_collection,
                    embedding_provider.dimensions(),
                )
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                store
                    .ensure_collection()
                    .await
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
                let pipeline =
                    build_pipeline(Arc::new(store), embedding_provider, rerank_provider, config);
                ingest_folder(&pipeline, folder).await?;
            } else {
                warn!("no --qdrant-url given; ingesting into a store that dies with the process");
                let pipeline = build_pipeline(
                    Arc::new(MemoryVectorStore::new()),
                    embedding_provider,
                    rerank_provider,
                    config,
                );
                ingest_folder(&pipeline, folder).await?;
            }
        }
        Command::Query {
            query,
            top_k,
            candidates,
        } => {
            let qdrant_url = cli
                .qdrant_url
                .as_ref()
                .context("query requires --qdrant-url (or use the demo command)")?;
            let store = QdrantStore::new(
                qdrant_url,
                &cli.qdrant_collection,
                embedding_provider.dimensions(),
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            let pipeline =
                build_pipeline(Arc::new(store), embedding_provider, rerank_provider, config);
            let context = pipeline
                .answer_context(query, *top_k, *candidates)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            print_context(query, &context);
        }
        Command::Demo {
            folder,
            query,
            top_k,
            candidates,
        } => {
            let pipeline = build_pipeline(
                Arc::new(MemoryVectorStore::new()),
                embedding_provider,
                rerank_provider,
                config,
            );
            ingest_folder(&pipeline, folder).await?;
            let context = pipeline
                .answer_context(query, *top_k, *candidates)
                .await
                .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            print_context(query, &context);
        }
    }

    Ok(())
}

fn build_embedding_provider(cli: &Cli) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match &cli.embeddings_url {
        Some(url) => {
            let provider = OpenAiCompatEmbeddings::new(
                url,
                cli.embeddings_api_key.clone(),
                cli.embeddings_model.clone(),
                cli.embeddings_dimensions,
            )
            .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            Ok(Arc::new(provider))
        }
        None => Ok(Arc::new(HashedNgramEmbedder::default())),
    }
}

fn build_rerank_provider(cli: &Cli) -> anyhow::Result<Arc<dyn RerankProvider>> {
    match &cli.rerank_url {
        Some(url) => {
            let provider =
                CohereRerank::new(url, cli.rerank_api_key.clone(), cli.rerank_model.clone())
                    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
            Ok(Arc::new(provider))
        }
        None => Ok(Arc::new(TermOverlapRerank)),
    }
}

fn build_pipeline<V: VectorStore + 'static>(
    store: Arc<V>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    rerank_provider: Arc<dyn RerankProvider>,
    config: PipelineConfig,
) -> Arc<RetrievalPipeline<V>> {
    let cache = Arc::new(EmbeddingCache::new(4096));
    let embedder = CachedEmbedder::new(embedding_provider, cache, 64, Duration::from_secs(30));
    Arc::new(RetrievalPipeline::new(
        store,
        embedder,
        rerank_provider,
        config,
    ))
}

fn discover_text_files(folder: &Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder).into_iter().filter_map(|item| item.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let is_text = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("md"));
        if is_text {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

async fn ingest_folder<V: VectorStore + 'static>(
    pipeline: &Arc<RetrievalPipeline<V>>,
    folder: &str,
) -> anyhow::Result<()> {
    let files = discover_text_files(Path::new(folder));
    if files.is_empty() {
        anyhow::bail!("no .txt or .md files found in {folder}");
    }

    let mut documents = Vec::new();
    for path in &files {
        let raw_text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unnamed")
            .to_string();
        documents.push(
            Document::new(raw_text, path.to_string_lossy().to_string())
                .with_metadata("title", name),
        );
    }

    let reports = Arc::clone(pipeline).ingest_documents(documents).await;
    let mut ingested = 0usize;
    let mut chunk_total = 0usize;
    for (path, report) in files.iter().zip(reports) {
        match report {
            Ok(report) => {
                ingested += 1;
                chunk_total += report.chunk_count;
            }
            Err(error) => warn!(path = %path.display(), %error, "document skipped"),
        }
    }

    println!(
        "{ingested} documents ({chunk_total} chunks) ingested at {}",
        Utc::now().to_rfc3339()
    );
    Ok(())
}

fn print_context(query: &str, context: &[ScoredChunk]) {
    println!("query: {query}");
    if context.is_empty() {
        println!("no matching context found");
        return;
    }

    for (position, scored) in context.iter().enumerate() {
        println!(
            "[{position}] score={:.4} chunk={} document={} index={}",
            scored.score, scored.chunk.id, scored.chunk.document_id, scored.chunk.chunk_index
        );
        if let Some(source) = scored.chunk.metadata.get("source") {
            println!("  source={source}");
        }
        println!("  text:\n{}", scored.chunk.text);
    }
}

#[cfg(test)]
mod tests {
    use super::discover_text_files;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discovery_is_recursive_and_filters_extensions() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;

        File::create(dir.path().join("a.txt"))?.write_all(b"alpha")?;
        File::create(nested.join("b.md"))?.write_all(b"beta")?;
        File::create(nested.join("c.pdf"))?.write_all(b"%PDF")?;

        let files = discover_text_files(dir.path());
        assert_eq!(files.len(), 2);
        Ok(())
    }
}
