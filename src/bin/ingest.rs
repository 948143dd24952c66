use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, Receiver, Sender};
use url::Url;

use eeportal::chunker::{Chunk, Chunker, ChunkerConfig};
use eeportal::embedder::openai::OpenAiEmbedder;
use eeportal::embedder::TextEmbedder;
use eeportal::extract::{extract_html_text, extract_pdf_pages};
use eeportal::fetch::Fetcher;
use eeportal::index::FlatIpIndex;
use eeportal::sources::{CONTEXT_INDEX, CONTEXT_PAGES, PUCT_RULES, RULES_INDEX};
use eeportal::store::{artifact_paths, save_index, IndexMeta};

#[derive(Parser, Debug)]
#[command(
    name = "eeportal-ingest",
    about = "One-shot full-corpus build of both index artifact triples"
)]
struct IngestCli {
    /// Root data directory for raw downloads and index artifacts
    #[arg(long, env = "EEPORTAL_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// API key for the embedding endpoint
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Embedding model identifier recorded in the index metadata
    #[arg(
        long,
        env = "EEPORTAL_EMBED_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embed_model: String,

    /// Optional dimension override when supported by the model
    #[arg(long, env = "EEPORTAL_EMBED_DIMENSIONS")]
    embed_dimensions: Option<usize>,

    /// Base URL for the OpenAI-compatible embedding API
    #[arg(
        long,
        env = "EEPORTAL_EMBED_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    embed_base_url: String,

    /// Max number of chunks to send per embedding request
    #[arg(long, env = "EEPORTAL_EMBED_BATCH", default_value_t = 32)]
    batch_size: usize,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "EEPORTAL_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    embed_timeout_secs: u64,

    /// Number of retries for rate limits or transient errors
    #[arg(long, env = "EEPORTAL_EMBED_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Number of concurrent embedding workers
    #[arg(long, env = "EEPORTAL_EMBED_THREADS", default_value_t = 2)]
    worker_threads: usize,

    /// Max seconds to wait for each source download
    #[arg(long, env = "EEPORTAL_FETCH_TIMEOUT_SECS", default_value_t = 60)]
    fetch_timeout_secs: u64,

    /// Re-download sources even when cached raw files exist
    #[arg(long, default_value_t = false)]
    refresh_sources: bool,

    /// Chunk character budget
    #[arg(long, default_value_t = 2400)]
    max_chunk_chars: usize,

    /// Overlap between slices of an over-budget segment
    #[arg(long, default_value_t = 250)]
    overlap_chars: usize,
}

fn main() -> Result<()> {
    let cli = IngestCli::parse();
    let raw_pdf_dir = cli.data_dir.join("raw_pdfs");
    let raw_html_dir = cli.data_dir.join("raw_html");
    let index_dir = cli.data_dir.join("index");
    for dir in [&raw_pdf_dir, &raw_html_dir, &index_dir] {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;
    }

    let chunker = Chunker::new(ChunkerConfig {
        max_chars: cli.max_chunk_chars.max(1),
        overlap_chars: cli.overlap_chars,
    });
    let fetcher = Fetcher::new(Duration::from_secs(cli.fetch_timeout_secs.max(1)));
    let embedder = OpenAiEmbedder::new(
        cli.openai_api_key,
        cli.embed_base_url,
        cli.embed_model.clone(),
        cli.embed_dimensions,
        Duration::from_secs(cli.embed_timeout_secs.max(1)),
        cli.max_retries.max(1),
        cli.batch_size.max(1),
    )?;
    let meta = IndexMeta {
        embedding_model: cli.embed_model,
    };

    // A) Authoritative rules index.
    let mut rule_chunks: Vec<Chunk> = Vec::new();
    for rule in PUCT_RULES {
        let pdf_path = raw_pdf_dir.join(format!("{}.pdf", rule.rule_id.replace('.', "_")));
        let bytes = if pdf_path.exists() && !cli.refresh_sources {
            eprintln!("[skip pdf] {} exists", rule.rule_id);
            fs::read(&pdf_path).with_context(|| format!("failed to read {pdf_path:?}"))?
        } else {
            eprintln!("[download pdf] {}", rule.rule_id);
            let url = Url::parse(rule.url).with_context(|| format!("invalid URL {}", rule.url))?;
            let bytes = fetcher.download(&url)?;
            fs::write(&pdf_path, &bytes).with_context(|| format!("failed to write {pdf_path:?}"))?;
            bytes
        };
        let pages = extract_pdf_pages(&bytes)
            .with_context(|| format!("failed to extract text from {}", rule.rule_id))?;
        let chunks = chunker.chunk_rule_pages(rule, &pages);
        eprintln!("[chunk pdf] {}: {} chunks", rule.rule_id, chunks.len());
        rule_chunks.extend(chunks);
    }
    build_and_save(
        &index_dir,
        RULES_INDEX,
        &embedder,
        cli.worker_threads,
        rule_chunks,
        &meta,
    )?;

    // B) Program-context index.
    let mut context_chunks: Vec<Chunk> = Vec::new();
    for page in CONTEXT_PAGES {
        let text_path = raw_html_dir.join(format!("{}.txt", page.doc_id));
        let text = if text_path.exists() && !cli.refresh_sources {
            eprintln!("[skip html] {} exists", page.doc_id);
            fs::read_to_string(&text_path)
                .with_context(|| format!("failed to read {text_path:?}"))?
        } else {
            eprintln!("[fetch html] {}", page.doc_id);
            let url = Url::parse(page.url).with_context(|| format!("invalid URL {}", page.url))?;
            let bytes = fetcher.download(&url)?;
            let body = String::from_utf8_lossy(&bytes);
            let text = extract_html_text(&body);
            fs::write(&text_path, &text)
                .with_context(|| format!("failed to write {text_path:?}"))?;
            text
        };
        let chunks = chunker.chunk_context_page(page, &text);
        eprintln!("[chunk html] {}: {} chunks", page.doc_id, chunks.len());
        context_chunks.extend(chunks);
    }
    build_and_save(
        &index_dir,
        CONTEXT_INDEX,
        &embedder,
        cli.worker_threads,
        context_chunks,
        &meta,
    )?;

    println!("[done] built separate indexes in {index_dir:?}");
    Ok(())
}

fn build_and_save(
    index_dir: &Path,
    name: &str,
    embedder: &OpenAiEmbedder,
    worker_threads: usize,
    chunks: Vec<Chunk>,
    meta: &IndexMeta,
) -> Result<()> {
    eprintln!("[embed] {}: {} chunks...", name, chunks.len());
    let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
    let vectors = embed_all(embedder, &texts, worker_threads)?;
    let index = FlatIpIndex::from_vectors(&vectors)?;
    save_index(index_dir, name, &index, &chunks, meta)?;
    let paths = artifact_paths(index_dir, name);
    println!("[saved] {}: {} chunks -> {:?}", name, chunks.len(), paths.index);
    Ok(())
}

struct EmbedTask {
    id: usize,
    inputs: Vec<String>,
}

type BatchResult = Result<(usize, Vec<Vec<f32>>)>;

/// Embeds all texts in fixed-size batches across a worker pool, returning
/// vectors in input order so index positions stay aligned with the chunks.
fn embed_all(
    embedder: &OpenAiEmbedder,
    texts: &[&str],
    worker_threads: usize,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let worker_threads = worker_threads.max(1);
    let batch_size = embedder.batch_size();
    let (task_tx, task_rx) = bounded::<EmbedTask>(worker_threads * 2);
    let (result_tx, result_rx) = bounded::<BatchResult>(worker_threads * 2);

    let mut workers = Vec::with_capacity(worker_threads);
    for worker_id in 0..worker_threads {
        let worker_embedder = embedder.clone();
        let worker_rx = task_rx.clone();
        let worker_tx = result_tx.clone();
        workers.push(thread::spawn(move || {
            worker_loop(worker_id, worker_rx, worker_tx, worker_embedder)
        }));
    }
    drop(task_rx);
    drop(result_tx);

    let tasks: Vec<EmbedTask> = texts
        .chunks(batch_size)
        .enumerate()
        .map(|(id, batch)| EmbedTask {
            id,
            inputs: batch.iter().map(|text| text.to_string()).collect(),
        })
        .collect();
    let total_batches = tasks.len();
    let producer = thread::spawn(move || {
        for task in tasks {
            if task_tx.send(task).is_err() {
                break;
            }
        }
    });

    let mut collected: BTreeMap<usize, Vec<Vec<f32>>> = BTreeMap::new();
    for _ in 0..total_batches {
        let batch = result_rx
            .recv()
            .map_err(|_| anyhow!("embedding worker channel closed unexpectedly"))??;
        collected.insert(batch.0, batch.1);
        eprintln!("[embed] completed batch {}/{}", collected.len(), total_batches);
    }

    producer
        .join()
        .map_err(|_| anyhow!("embedding producer thread panicked"))?;
    for worker in workers {
        worker
            .join()
            .map_err(|_| anyhow!("embedding worker thread panicked"))?;
    }

    let vectors: Vec<Vec<f32>> = collected.into_values().flatten().collect();
    anyhow::ensure!(
        vectors.len() == texts.len(),
        "embedded {} vectors for {} chunks",
        vectors.len(),
        texts.len()
    );
    Ok(vectors)
}

fn worker_loop(
    worker_id: usize,
    receiver: Receiver<EmbedTask>,
    sender: Sender<BatchResult>,
    embedder: OpenAiEmbedder,
) {
    for task in receiver.iter() {
        let EmbedTask { id, inputs } = task;
        let refs: Vec<&str> = inputs.iter().map(String::as_str).collect();
        let result = embedder
            .embed_batch(&refs)
            .map(|vectors| (id, vectors))
            .map_err(|err| {
                anyhow!(
                    "worker {} failed embedding batch {} ({} chunks): {}",
                    worker_id,
                    id,
                    refs.len(),
                    err
                )
            });
        if sender.send(result).is_err() {
            break;
        }
    }
}
