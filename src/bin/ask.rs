use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use eeportal::answer::{AskOptions, Portal};
use eeportal::citations::format_citations;
use eeportal::embedder::openai::OpenAiEmbedder;
use eeportal::embedder::TextEmbedder;
use eeportal::glossary::Glossary;
use eeportal::prompt::Language;
use eeportal::providers::{AnthropicProvider, LlmProvider, OpenAiProvider};
use eeportal::retriever::{ScoredChunk, VectorIndex};
use eeportal::sources::{CONTEXT_INDEX, RULES_INDEX};

#[derive(Parser, Debug)]
#[command(
    name = "eeportal-ask",
    about = "Ask one grounded question against the built rule indexes"
)]
struct AskCli {
    /// Question to answer from the indexed corpora
    #[arg(long)]
    query: String,

    /// Answer language
    #[arg(long, value_enum, default_value = "english")]
    lang: Language,

    /// Also retrieve from the CenterPoint program-context corpus
    #[arg(long, default_value_t = false)]
    with_context: bool,

    /// Rule passages retrieved (k)
    #[arg(long, default_value_t = 6)]
    k_rules: usize,

    /// Context passages retrieved (k)
    #[arg(long, default_value_t = 3)]
    k_context: usize,

    /// Directory holding the index artifact triples
    #[arg(long, env = "EEPORTAL_INDEX_DIR", default_value = "data/index")]
    index_dir: PathBuf,

    /// Glossary JSON file; skipped when absent
    #[arg(long, env = "EEPORTAL_GLOSSARY", default_value = "data/glossary.json")]
    glossary: PathBuf,

    /// API key for embeddings and the OpenAI answer model
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Embedding model identifier (must match the built indexes)
    #[arg(
        long,
        env = "EEPORTAL_EMBED_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embed_model: String,

    /// Optional embedding dimension override
    #[arg(long, env = "EEPORTAL_EMBED_DIMENSIONS")]
    embed_dimensions: Option<usize>,

    /// Base URL for the OpenAI-compatible embedding API
    #[arg(
        long,
        env = "EEPORTAL_EMBED_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    embed_base_url: String,

    /// Target LLM provider (openai or anthropic)
    #[arg(long, env = "EEPORTAL_LLM_PROVIDER", default_value = "openai")]
    llm_provider: String,

    /// OpenAI chat model used for synthesis
    #[arg(long, env = "EEPORTAL_CHAT_MODEL", default_value = "gpt-4.1-mini")]
    chat_model: String,

    /// Anthropic API key (required when --llm-provider anthropic)
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    anthropic_api_key: Option<String>,

    /// Anthropic model identifier
    #[arg(
        long,
        env = "EEPORTAL_ANTHROPIC_MODEL",
        default_value = "claude-3-sonnet-20240229"
    )]
    anthropic_model: String,

    /// Sampling temperature for the answer model
    #[arg(long, default_value_t = 0.2)]
    temperature: f32,

    /// Maximum tokens to request from the answer model
    #[arg(long, default_value_t = 400)]
    max_completion_tokens: usize,

    /// Only print the retrieved passages (skip the LLM call)
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let cli = AskCli::parse();

    let embedder: Arc<dyn TextEmbedder> = Arc::new(OpenAiEmbedder::new(
        cli.openai_api_key.clone(),
        cli.embed_base_url,
        cli.embed_model,
        cli.embed_dimensions,
        Duration::from_secs(30),
        5,
        1,
    )?);
    let rules = VectorIndex::open(&cli.index_dir, RULES_INDEX, embedder.clone())?;
    let context = VectorIndex::open(&cli.index_dir, CONTEXT_INDEX, embedder)?;

    let glossary = if cli.glossary.exists() {
        Glossary::load(&cli.glossary)?
    } else {
        Glossary::empty()
    };
    let portal = Portal::new(rules, context, glossary, 0)?;

    if cli.dry_run {
        let rule_hits = portal.retrieve_rules(&cli.query, cli.k_rules)?;
        let context_hits = if cli.with_context {
            portal.retrieve_context(&cli.query, cli.k_context)?
        } else {
            Vec::new()
        };
        println!("--- PUCT Rules ---");
        print_passages(&rule_hits);
        if !context_hits.is_empty() {
            println!("--- CenterPoint Program Context ---");
            print_passages(&context_hits);
        }
        println!("--- Citations ---");
        println!("{}", format_citations(&rule_hits, "PUCT"));
        if !context_hits.is_empty() {
            println!("{}", format_citations(&context_hits, "CenterPoint"));
        }
        println!("dry-run enabled; skipping LLM call.");
        return Ok(());
    }

    let provider: Box<dyn LlmProvider> = match cli.llm_provider.to_lowercase().as_str() {
        "openai" => Box::new(OpenAiProvider::new(cli.openai_api_key, cli.chat_model)?),
        "anthropic" => Box::new(AnthropicProvider::new(
            cli.anthropic_api_key.unwrap_or_default(),
            cli.anthropic_model,
        )?),
        other => bail!(
            "unsupported llm provider '{}'; use openai or anthropic",
            other
        ),
    };

    let options = AskOptions {
        language: cli.lang,
        include_program_context: cli.with_context,
        k_rules: cli.k_rules,
        k_context: cli.k_context,
        temperature: cli.temperature,
        max_completion_tokens: cli.max_completion_tokens,
    };
    let outcome = portal.ask(provider.as_ref(), &cli.query, &options)?;

    if let Some(advisory) = &outcome.advisory {
        eprintln!("note: {advisory}\n");
    }
    println!("--- Answer ---\n{}", outcome.answer);

    eprintln!("\n--- Retrieved passages ---");
    print_passages_to_stderr(&outcome.rule_hits);
    if !outcome.context_hits.is_empty() {
        print_passages_to_stderr(&outcome.context_hits);
    }
    Ok(())
}

fn print_passages(hits: &[ScoredChunk]) {
    for hit in hits {
        println!("{}", render_passage(hit));
    }
}

fn print_passages_to_stderr(hits: &[ScoredChunk]) {
    for hit in hits {
        eprintln!("{}", render_passage(hit));
    }
}

fn render_passage(hit: &ScoredChunk) -> String {
    let heading = match hit.chunk.rule_id() {
        Some(rule_id) => match hit.chunk.pages() {
            Some(span) => format!(
                "§{} {} (pp. {}-{})",
                rule_id, hit.chunk.title, span.start, span.end
            ),
            None => format!("§{} {}", rule_id, hit.chunk.title),
        },
        None => hit.chunk.title.clone(),
    };
    let mut preview: String = hit.chunk.text.chars().take(600).collect();
    if preview.len() < hit.chunk.text.len() {
        preview.push_str("...");
    }
    format!("{heading}\nScore: {:.3}\n{preview}\n---", hit.score)
}
