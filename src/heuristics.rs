//! Pluggable question/answer classifiers for the ask flow.

use regex::Regex;

/// Patterns marking a question as program logistics (sign-up, rebates,
/// eligibility) rather than regulatory substance.
const LOGISTICS_PATTERNS: &[&str] = &[
    r"\brebate\b",
    r"\bincentive\b",
    r"\bsign\s*up\b",
    r"\benroll\b",
    r"\bapply\b",
    r"\bapplication\b",
    r"\bhow do i\b",
    r"\bwhere do i\b",
    r"\bcontractor\b",
    r"\bparticipat(e|ion)\b",
    r"\beligib(le|ility)\b",
    r"\bfree\b",
    r"\bdiscount\b",
    r"\bform\b",
    r"\bwebsite\b",
    r"\bphone\b",
    r"\bemail\b",
];

/// Substrings treating an answer as making regulatory statements.
const REGULATORY_MARKERS: &[&str] = &[
    "§25.",
    "puct",
    "rule",
    "shall",
    "must",
    "required",
    "compliance",
    "tariff",
];

/// Detects questions about program participation rather than rule content.
pub struct ProgramLogisticsMatcher {
    patterns: Vec<Regex>,
}

impl ProgramLogisticsMatcher {
    /// Compiles the pattern battery.
    pub fn new() -> Self {
        Self {
            patterns: LOGISTICS_PATTERNS
                .iter()
                .map(|pattern| Regex::new(pattern).expect("logistics pattern"))
                .collect(),
        }
    }

    /// True when the question looks like program logistics.
    pub fn matches(&self, question: &str) -> bool {
        let lowered = question.to_lowercase();
        self.patterns.iter().any(|pattern| pattern.is_match(&lowered))
    }
}

impl Default for ProgramLogisticsMatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Policy deciding when an answer needs rule backing and whether the
/// rendered citations provide it.
pub struct RegulatoryAnswerPolicy {
    markers: &'static [&'static str],
    citation_re: Regex,
}

impl RegulatoryAnswerPolicy {
    /// Builds the policy for citations rendered under the given label.
    pub fn new(label: &str) -> Self {
        let escaped = regex::escape(label);
        Self {
            markers: REGULATORY_MARKERS,
            citation_re: Regex::new(&format!(r"{escaped}:\s*§\d+\.\d+"))
                .expect("citation pattern"),
        }
    }

    /// True when the answer appears to make regulatory statements and
    /// therefore needs at least one rule citation.
    pub fn needs_rule_citation(&self, answer: &str) -> bool {
        let lowered = answer.to_lowercase();
        self.markers.iter().any(|marker| lowered.contains(marker))
    }

    /// True when the rendered citations contain at least one rule-backed
    /// line under this policy's label.
    pub fn has_rule_citation(&self, citations: &str) -> bool {
        self.citation_re.is_match(citations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_logistics_questions() {
        let matcher = ProgramLogisticsMatcher::new();
        assert!(matcher.matches("How do I sign up for the rebate?"));
        assert!(matcher.matches("Who is ELIGIBLE for free insulation?"));
        assert!(matcher.matches("Is there an application form?"));
    }

    #[test]
    fn passes_regulatory_questions() {
        let matcher = ProgramLogisticsMatcher::new();
        assert!(!matcher.matches("What is the statewide energy savings goal?"));
        assert!(!matcher.matches("When are evaluation findings published?"));
    }

    #[test]
    fn detects_answers_needing_rule_backing() {
        let policy = RegulatoryAnswerPolicy::new("PUCT");
        assert!(policy.needs_rule_citation("Each utility must meet the goal."));
        assert!(policy.needs_rule_citation("See §25.181 for details."));
        assert!(!policy.needs_rule_citation("The program offers attic insulation upgrades."));
    }

    #[test]
    fn detects_supporting_citations() {
        let policy = RegulatoryAnswerPolicy::new("PUCT");
        assert!(policy.has_rule_citation("- PUCT: §25.181 (Energy Efficiency Goal), p. 4"));
        assert!(!policy.has_rule_citation("- CenterPoint: Residential Programs"));
        assert!(!policy.has_rule_citation(""));
    }
}
