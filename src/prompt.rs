//! Bilingual prompt assembly from retrieved rule and program context.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::retriever::ScoredChunk;

/// Answer language selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Answer in English.
    English,
    /// Answer in Spanish.
    Spanish,
}

impl Language {
    /// Heading introducing rule citations in an answer.
    pub fn rules_heading(self) -> &'static str {
        match self {
            Self::English => "Where this appears (PUCT Rules)",
            Self::Spanish => "Dónde aparece (Reglas PUCT)",
        }
    }

    /// Heading introducing program-context citations in an answer.
    pub fn context_heading(self) -> &'static str {
        match self {
            Self::English => "Related info (CenterPoint program context)",
            Self::Spanish => "Información relacionada (CenterPoint, contexto del programa)",
        }
    }
}

/// System and user messages for one completion request.
#[derive(Debug, Clone)]
pub struct PromptBundle {
    /// System message enforcing the authority policy.
    pub system: String,
    /// User message carrying the question and retrieved context.
    pub user: String,
}

/// Assembles the grounded prompt: rules are authoritative, program pages are
/// context only, and unsupported claims must be refused.
pub fn build_prompt(
    lang: Language,
    question: &str,
    rules: &[ScoredChunk],
    context: &[ScoredChunk],
) -> PromptBundle {
    let system = match lang {
        Language::English => {
            "You are a community-facing assistant explaining Texas PUCT energy efficiency rules. \
             Answer in plain language using ONLY the provided context. \
             PUCT rules are authoritative. CenterPoint text is program context (not regulatory). \
             Do not invent requirements or citations. If not supported by context, say: \
             \"I could not locate that in the indexed text.\""
        }
        Language::Spanish => {
            "Eres un asistente comunitario que explica reglas de eficiencia energética de la PUCT de Texas. \
             Responde en español usando SOLO el texto de contexto proporcionado. \
             Las reglas de la PUCT son la autoridad principal. \
             El contenido de CenterPoint es contexto del programa (no texto regulatorio). \
             No inventes requisitos ni referencias. Si no está en el contexto, di: \
             \"No pude localizar eso en el texto indexado.\""
        }
    };

    let rules_block = context_block(rules, "PUCT");
    let cp_block = context_block(context, "CP");

    let mut user = String::new();
    user.push_str("Question:\n");
    user.push_str(question);
    user.push_str("\n\nRequirements:\n");
    user.push_str("- Provide a plain-language answer (bullets preferred).\n");
    user.push_str("- Separate regulatory statements from program-context statements.\n");
    user.push_str("- Include a citations section with two headings:\n");
    user.push_str(&format!("  1) {}\n", lang.rules_heading()));
    user.push_str(&format!(
        "  2) {} (only if CenterPoint context was used)\n",
        lang.context_heading()
    ));
    user.push_str(
        "- Do not include any regulatory claim unless it is supported by the PUCT Rules context.\n",
    );
    user.push_str("\nPUCT Rules Context:\n");
    user.push_str(&rules_block);
    user.push_str("\n\nCenterPoint Program Context:\n");
    user.push_str(&cp_block);

    PromptBundle {
        system: system.to_string(),
        user: user.trim().to_string(),
    }
}

fn context_block(chunks: &[ScoredChunk], header: &str) -> String {
    let mut parts = Vec::with_capacity(chunks.len());
    for (i, scored) in chunks.iter().enumerate() {
        let chunk = &scored.chunk;
        let part = match chunk.rule_id() {
            Some(rule_id) => {
                let pages = match chunk.pages() {
                    Some(span) => format!("pp. {}-{}", span.start, span.end),
                    None => "page n/a".to_string(),
                };
                format!(
                    "[{header} {}] §{rule_id} {} ({pages}):\n{}",
                    i + 1,
                    chunk.title,
                    chunk.text
                )
            }
            None => format!(
                "[{header} {}] {} (CenterPoint Program Context):\n{}",
                i + 1,
                chunk.title,
                chunk.text
            ),
        };
        parts.push(part);
    }
    parts.join("\n\n")
}
