//! Ask-flow orchestration shared by the portal server and the CLI.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use anyhow::Result;
use lru::LruCache;

use crate::chunker::Chunk;
use crate::citations::format_citations;
use crate::glossary::{render_quick_reference, Glossary};
use crate::heuristics::{ProgramLogisticsMatcher, RegulatoryAnswerPolicy};
use crate::prompt::{build_prompt, Language};
use crate::providers::{CompletionError, LlmProvider, ProviderRequest};
use crate::retriever::{ScoredChunk, VectorIndex};

/// Citation label for the authoritative rules corpus.
const RULES_LABEL: &str = "PUCT";
/// Citation label for the program-context corpus.
const CONTEXT_LABEL: &str = "CenterPoint";

/// Per-question knobs for the ask flow.
#[derive(Debug, Clone, Copy)]
pub struct AskOptions {
    /// Language of the synthesized answer.
    pub language: Language,
    /// Whether the non-regulatory context corpus participates.
    pub include_program_context: bool,
    /// Passages retrieved from the rules corpus.
    pub k_rules: usize,
    /// Passages retrieved from the context corpus.
    pub k_context: usize,
    /// Sampling temperature for the answer model.
    pub temperature: f32,
    /// Maximum tokens requested from the answer model.
    pub max_completion_tokens: usize,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            language: Language::English,
            include_program_context: false,
            k_rules: 6,
            k_context: 3,
            temperature: 0.2,
            max_completion_tokens: 400,
        }
    }
}

/// Everything the ask flow produced for one question.
#[derive(Debug)]
pub struct AskOutcome {
    /// The rendered answer shown to the user.
    pub answer: String,
    /// Advisory shown when a logistics question runs in rules-only mode.
    pub advisory: Option<String>,
    /// Rule passages backing the answer.
    pub rule_hits: Vec<ScoredChunk>,
    /// Program-context passages used, if any.
    pub context_hits: Vec<ScoredChunk>,
    /// True when the citation-quality gate replaced the answer.
    pub citation_gated: bool,
    /// True when the completion call failed and a placeholder was rendered.
    pub completion_failed: bool,
}

/// The portal's top-level retrieval resource: both corpora, the glossary,
/// and the classifier policies, constructed once and shared by reference
/// with all request handling.
pub struct Portal {
    rules: VectorIndex,
    context: VectorIndex,
    glossary: Glossary,
    logistics: ProgramLogisticsMatcher,
    policy: RegulatoryAnswerPolicy,
    embed_cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl Portal {
    /// Assembles the portal over two opened indexes.
    ///
    /// Both corpora must share one embedding model so a query embedding can
    /// be computed once and searched against either index.
    pub fn new(
        rules: VectorIndex,
        context: VectorIndex,
        glossary: Glossary,
        embed_cache_size: usize,
    ) -> Result<Self> {
        anyhow::ensure!(
            rules.model() == context.model(),
            "indexes were built with different embedding models ({} vs {})",
            rules.model(),
            context.model()
        );
        Ok(Self {
            rules,
            context,
            glossary,
            logistics: ProgramLogisticsMatcher::new(),
            policy: RegulatoryAnswerPolicy::new(RULES_LABEL),
            embed_cache: NonZeroUsize::new(embed_cache_size)
                .map(|capacity| Mutex::new(LruCache::new(capacity))),
        })
    }

    /// The authoritative rules corpus.
    pub fn rules(&self) -> &VectorIndex {
        &self.rules
    }

    /// The program-context corpus.
    pub fn context(&self) -> &VectorIndex {
        &self.context
    }

    /// The loaded glossary.
    pub fn glossary(&self) -> &Glossary {
        &self.glossary
    }

    /// Retrieves from the rules corpus.
    pub fn retrieve_rules(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 || self.rules.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embed(query)?;
        self.rules.search_embedded(&embedding, k)
    }

    /// Retrieves from the program-context corpus.
    pub fn retrieve_context(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 || self.context.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embed(query)?;
        self.context.search_embedded(&embedding, k)
    }

    /// Rule chunks, optionally filtered to one rule and a text keyword.
    pub fn browse_rules(&self, rule_id: Option<&str>, keyword: Option<&str>) -> Vec<&Chunk> {
        let needle = keyword.map(str::to_lowercase);
        self.rules
            .chunks()
            .iter()
            .filter(|chunk| rule_id.is_none() || chunk.rule_id() == rule_id)
            .filter(|chunk| matches_keyword(chunk, needle.as_deref()))
            .collect()
    }

    /// Context chunks, optionally filtered to a text keyword.
    pub fn browse_context(&self, keyword: Option<&str>) -> Vec<&Chunk> {
        let needle = keyword.map(str::to_lowercase);
        self.context
            .chunks()
            .iter()
            .filter(|chunk| matches_keyword(chunk, needle.as_deref()))
            .collect()
    }

    /// Runs the full ask flow for one question.
    pub fn ask(
        &self,
        provider: &dyn LlmProvider,
        question: &str,
        options: &AskOptions,
    ) -> Result<AskOutcome> {
        let lang = options.language;
        let advisory = (!options.include_program_context && self.logistics.matches(question))
            .then(|| advisory_text(lang).to_string());

        let glossary_box =
            render_quick_reference(&self.glossary.hits_in(question), lang);

        let rule_hits = self.retrieve_rules(question, options.k_rules)?;
        let context_hits = if options.include_program_context {
            self.retrieve_context(question, options.k_context)?
        } else {
            Vec::new()
        };

        let rules_cites = format_citations(&rule_hits, RULES_LABEL);
        let context_cites = format_citations(&context_hits, CONTEXT_LABEL);

        let bundle = build_prompt(lang, question, &rule_hits, &context_hits);
        let request = ProviderRequest {
            system: &bundle.system,
            prompt: &bundle.user,
            temperature: options.temperature,
            max_tokens: options.max_completion_tokens,
        };
        let (mut answer, completion_failed) = match provider.answer(&request) {
            Ok(text) => (text, false),
            Err(err) => (completion_fallback(lang, &err), true),
        };

        if let Some(block) = glossary_box {
            answer = format!("{block}\n\n---\n\n{answer}");
        }

        // Append the citation sections when the model left them out,
        // whichever language it answered in.
        if !answer.contains("Where this appears") && !answer.contains("Dónde aparece") {
            answer.push_str(&format!("\n\n**{}**\n{}", lang.rules_heading(), rules_cites));
            if !context_cites.is_empty() {
                answer.push_str(&format!(
                    "\n\n**{}**\n{}",
                    lang.context_heading(),
                    context_cites
                ));
            }
        }

        let mut citation_gated = false;
        if self.policy.needs_rule_citation(&answer) && !self.policy.has_rule_citation(&rules_cites)
        {
            answer = refusal_text(lang).to_string();
            citation_gated = true;
        }

        Ok(AskOutcome {
            answer,
            advisory,
            rule_hits,
            context_hits,
            citation_gated,
            completion_failed,
        })
    }

    fn embed(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.embed_cache {
            if let Ok(mut guard) = cache.lock() {
                if let Some(hit) = guard.get(query) {
                    return Ok(hit.clone());
                }
            }
        }
        let embedding = self.rules.embed_query(query)?;
        if let Some(cache) = &self.embed_cache {
            if let Ok(mut guard) = cache.lock() {
                guard.put(query.to_string(), embedding.clone());
            }
        }
        Ok(embedding)
    }
}

fn matches_keyword(chunk: &Chunk, needle: Option<&str>) -> bool {
    match needle {
        Some(needle) => chunk.text.to_lowercase().contains(needle),
        None => true,
    }
}

fn advisory_text(lang: Language) -> &'static str {
    match lang {
        Language::English => {
            "Your question looks like **program logistics** (sign-up, incentives, rebates, \
             eligibility). You are currently using **PUCT Rules only**. For local program \
             details (CenterPoint), include the program-context source."
        }
        Language::Spanish => {
            "Parece que tu pregunta es sobre **cómo participar / registrarse / incentivos** \
             (logística del programa). En este momento estás en **solo Reglas PUCT**. Para \
             respuestas sobre programas locales (CenterPoint), incluye la fuente de contexto \
             del programa."
        }
    }
}

fn refusal_text(lang: Language) -> &'static str {
    match lang {
        Language::English => {
            "I couldn’t provide a reliable answer because I did not find a strong supporting \
             passage in the indexed PUCT rules to back a regulatory statement.\n\n\
             Try rephrasing your question (e.g., reference §25.181, §25.182, or §25.183) or \
             increase the number of retrieved rule passages."
        }
        Language::Spanish => {
            "No pude proporcionar una respuesta confiable porque no encontré una cita sólida en \
             las Reglas PUCT indexadas para respaldar una afirmación regulatoria.\n\n\
             Intenta reformular tu pregunta (por ejemplo, menciona §25.181, §25.182 o §25.183) \
             o aumenta el número de pasajes recuperados."
        }
    }
}

fn completion_fallback(lang: Language, err: &CompletionError) -> String {
    match lang {
        Language::English => format!(
            "(The language model call did not succeed.)\n{err}\n\
             Set an API key for the selected provider and ask again."
        ),
        Language::Spanish => format!(
            "(La llamada al modelo de lenguaje no tuvo éxito.)\n{err}\n\
             Configura una clave de API para el proveedor seleccionado e inténtalo de nuevo."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;

    use crate::chunker::{ChunkKind, PageSpan};
    use crate::embedder::TextEmbedder;
    use crate::index::FlatIpIndex;
    use crate::store::{save_index, IndexMeta};

    struct StubEmbedder;

    impl StubEmbedder {
        fn encode(input: &str) -> Vec<f32> {
            let lowered = input.to_lowercase();
            vec![
                lowered.matches("goal").count() as f32,
                lowered.matches("rebate").count() as f32,
                1.0,
            ]
        }
    }

    impl TextEmbedder for StubEmbedder {
        fn model(&self) -> &str {
            "stub-embedding-v1"
        }

        fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(inputs.iter().map(|input| Self::encode(input)).collect())
        }
    }

    struct CannedProvider(Result<String, fn() -> CompletionError>);

    impl LlmProvider for CannedProvider {
        fn answer(&self, _request: &ProviderRequest) -> Result<String, CompletionError> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn rule_chunk(text: &str) -> Chunk {
        Chunk {
            chunk_id: format!("{:016x}", text.len()),
            doc_id: "puct_25_181".to_string(),
            title: "Energy Efficiency Goal".to_string(),
            source_url: "https://example.com/25.181.pdf".to_string(),
            text: text.to_string(),
            kind: ChunkKind::Regulatory {
                rule_id: "25.181".to_string(),
                pages: Some(PageSpan { start: 4, end: 4 }),
            },
        }
    }

    fn context_chunk(text: &str) -> Chunk {
        Chunk {
            chunk_id: format!("{:016x}", text.len() + 1000),
            doc_id: "cp_res_ee".to_string(),
            title: "Residential Programs".to_string(),
            source_url: "https://example.com/residential".to_string(),
            text: text.to_string(),
            kind: ChunkKind::Context,
        }
    }

    fn save_corpus(dir: &Path, name: &str, chunks: Vec<Chunk>) {
        let vectors: Vec<Vec<f32>> = chunks
            .iter()
            .map(|chunk| StubEmbedder::encode(&chunk.text))
            .collect();
        let index = FlatIpIndex::from_vectors(&vectors).unwrap();
        let meta = IndexMeta {
            embedding_model: "stub-embedding-v1".to_string(),
        };
        save_index(dir, name, &index, &chunks, &meta).unwrap();
    }

    fn portal(dir: &Path, rule_chunks: Vec<Chunk>, context_chunks: Vec<Chunk>) -> Portal {
        save_corpus(dir, "puct_rules", rule_chunks);
        save_corpus(dir, "centerpoint_context", context_chunks);
        let rules =
            VectorIndex::open(dir, "puct_rules", Arc::new(StubEmbedder)).unwrap();
        let context =
            VectorIndex::open(dir, "centerpoint_context", Arc::new(StubEmbedder)).unwrap();
        Portal::new(rules, context, Glossary::empty(), 16).unwrap()
    }

    #[test]
    fn appends_citations_when_model_omits_them() {
        let dir = tempfile::tempdir().unwrap();
        let portal = portal(
            dir.path(),
            vec![rule_chunk("The goal applies to each utility.")],
            vec![],
        );
        let provider = CannedProvider(Ok("The goal is set annually.".to_string()));
        let outcome = portal
            .ask(&provider, "What is the goal?", &AskOptions::default())
            .unwrap();

        assert!(!outcome.citation_gated);
        assert!(outcome
            .answer
            .contains("**Where this appears (PUCT Rules)**"));
        assert!(outcome
            .answer
            .contains("- PUCT: §25.181 (Energy Efficiency Goal), p. 4"));
        assert_eq!(outcome.rule_hits.len(), 1);
    }

    #[test]
    fn gates_regulatory_answers_without_rule_backing() {
        let dir = tempfile::tempdir().unwrap();
        // No rule chunks at all: citations cannot back a regulatory claim.
        let portal = portal(dir.path(), vec![], vec![]);
        let provider =
            CannedProvider(Ok("Utilities must meet the statewide goal.".to_string()));
        let outcome = portal
            .ask(&provider, "What is the goal?", &AskOptions::default())
            .unwrap();

        assert!(outcome.citation_gated);
        assert!(outcome.answer.contains("couldn’t provide a reliable answer"));
    }

    #[test]
    fn renders_placeholder_when_completion_fails() {
        let dir = tempfile::tempdir().unwrap();
        let portal = portal(
            dir.path(),
            vec![rule_chunk("The goal applies to each utility.")],
            vec![],
        );
        let provider = CannedProvider(Err(|| {
            CompletionError::NotConfigured("missing OpenAI API key".to_string())
        }));
        let outcome = portal
            .ask(&provider, "What is the goal?", &AskOptions::default())
            .unwrap();

        assert!(outcome.completion_failed);
        assert!(!outcome.citation_gated);
        assert!(outcome.answer.contains("did not succeed"));
        assert!(outcome.answer.contains("missing OpenAI API key"));
        // Citations still accompany the placeholder.
        assert!(outcome.answer.contains("§25.181"));
    }

    #[test]
    fn logistics_question_in_rules_only_mode_gets_advisory() {
        let dir = tempfile::tempdir().unwrap();
        let portal = portal(
            dir.path(),
            vec![rule_chunk("The goal applies to each utility.")],
            vec![context_chunk("Rebate details for attic insulation.")],
        );
        let provider = CannedProvider(Ok("Program answer.".to_string()));

        let rules_only = AskOptions::default();
        let outcome = portal
            .ask(&provider, "How do I get a rebate?", &rules_only)
            .unwrap();
        assert!(outcome.advisory.is_some());
        assert!(outcome.context_hits.is_empty());

        let with_context = AskOptions {
            include_program_context: true,
            ..AskOptions::default()
        };
        let outcome = portal
            .ask(&provider, "How do I get a rebate?", &with_context)
            .unwrap();
        assert!(outcome.advisory.is_none());
        assert_eq!(outcome.context_hits.len(), 1);
    }
}
