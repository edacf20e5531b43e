//! Query expansion for better retrieval recall.
//!
//! Keyword expansion rewrites the query through synonym and domain maps and
//! reformulates questions into keyword searches; the LLM strategy asks the
//! local model for 2-3 paraphrases. The original query is always preserved
//! first.

use std::sync::Arc;

use tracing::warn;

use crate::clients::ChatModel;
use crate::types::ExpansionStrategy;

/// Technical synonym map applied to keywords found in the query.
const SYNONYM_MAP: [(&str, &[&str]); 10] = [
    ("flake", &["flake.nix", "inputs"]),
    ("module", &["NixOS module", "options declaration"]),
    ("error", &["issue", "failure"]),
    ("fix", &["solve", "resolve"]),
    ("config", &["configuration", "settings"]),
    ("build", &["compile", "nixos-rebuild"]),
    ("service", &["systemd service", "daemon"]),
    ("package", &["nixpkgs", "derivation"]),
    ("model", &["GGUF", "checkpoint"]),
    ("memory", &["RAM", "KV cache"]),
];

/// Domain-term expansions.
const DOMAIN_MAP: [(&str, &[&str]); 6] = [
    ("nixos", &["nixpkgs", "home-manager"]),
    ("llama", &["llama.cpp", "llama-server"]),
    ("qdrant", &["vector database", "vector store"]),
    ("rag", &["retrieval", "context injection"]),
    ("embedding", &["sentence-transformers", "vector encoding"]),
    ("rocm", &["AMD compute", "GPU acceleration"]),
];

/// Question prefixes rewritten into keyword searches.
const QUESTION_PATTERNS: [(&str, &[&str]); 5] = [
    ("how to", &["tutorial", "guide", "steps"]),
    ("how do i", &["tutorial", "guide", "steps"]),
    ("what is", &["definition", "explanation", "overview"]),
    ("why", &["reason", "explanation", "cause"]),
    ("where", &["location", "path", "configuration"]),
];

/// Expands queries via keyword maps or the local model.
pub struct QueryExpander {
    chat: Option<Arc<dyn ChatModel>>,
}

impl QueryExpander {
    #[must_use]
    pub fn new(chat: Option<Arc<dyn ChatModel>>) -> Self {
        Self { chat }
    }

    /// Expand a query with the chosen strategy; the original is always the
    /// first element.
    pub async fn expand(
        &self,
        query: &str,
        strategy: ExpansionStrategy,
        max_expansions: usize,
    ) -> Vec<String> {
        match strategy {
            ExpansionStrategy::Keyword => self.expand_keyword(query, max_expansions),
            ExpansionStrategy::Llm => self.expand_llm(query, max_expansions).await,
        }
    }

    /// Synonym/domain-map expansion.
    #[must_use]
    pub fn expand_keyword(&self, query: &str, max_expansions: usize) -> Vec<String> {
        let query_lower = query.to_lowercase();
        let mut expansions = vec![query.to_string()];

        for (keyword, synonyms) in SYNONYM_MAP {
            if expansions.len() >= max_expansions {
                return expansions;
            }
            if query_lower.contains(keyword) {
                for synonym in synonyms.iter().take(2) {
                    if expansions.len() >= max_expansions {
                        break;
                    }
                    let expanded = query_lower.replace(keyword, synonym);
                    if !expansions.contains(&expanded) {
                        expansions.push(expanded);
                    }
                }
            }
        }

        for (domain, terms) in DOMAIN_MAP {
            if expansions.len() >= max_expansions {
                break;
            }
            if query_lower.contains(domain) {
                for term in terms.iter().take(2) {
                    if expansions.len() >= max_expansions {
                        break;
                    }
                    let expanded = query_lower.replace(domain, &term.to_lowercase());
                    if !expansions.contains(&expanded) {
                        expansions.push(expanded);
                    }
                }
            }
        }

        expansions
    }

    /// Convert question phrasing into keyword search form.
    #[must_use]
    pub fn question_to_keywords(query: &str) -> String {
        let query_lower = query.to_lowercase();
        let trimmed = query_lower.trim();
        for (pattern, keywords) in QUESTION_PATTERNS {
            if trimmed.starts_with(pattern) {
                let content = trimmed[pattern.len()..].trim_matches(|c: char| c == '?' || c.is_whitespace());
                return format!("{content} {}", keywords.join(" "));
            }
        }
        query.to_string()
    }

    /// LLM-prompted paraphrase expansion; falls back to the original query
    /// when the model is unavailable or misbehaves.
    pub async fn expand_llm(&self, query: &str, max_expansions: usize) -> Vec<String> {
        let Some(chat) = &self.chat else {
            return vec![query.to_string()];
        };
        let wanted = max_expansions.saturating_sub(1).max(1);
        let prompt = format!(
            "Generate {wanted} alternative phrasings of this query for better search results.\n\
             Original query: {query}\n\n\
             Generate queries that:\n\
             1. Use different keywords with the same meaning\n\
             2. Rephrase questions as statements\n\
             3. Focus on specific technical terms\n\n\
             Return ONLY the alternative queries, one per line, without numbering or explanations.\n"
        );

        match chat.complete(&prompt, 150, 0.7, &["\n\n"]).await {
            Ok(text) => {
                let mut expansions = vec![query.to_string()];
                for line in text.lines() {
                    if expansions.len() >= max_expansions {
                        break;
                    }
                    let cleaned = line
                        .trim()
                        .trim_start_matches(|c: char| {
                            c.is_ascii_digit() || c == '.' || c == '-' || c == ')' || c == ' '
                        })
                        .to_string();
                    if !cleaned.is_empty() && !cleaned.starts_with('#') {
                        expansions.push(cleaned);
                    }
                }
                expansions
            }
            Err(err) => {
                warn!(error = %err, "LLM expansion failed, using original query only");
                vec![query.to_string()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expander() -> QueryExpander {
        QueryExpander::new(None)
    }

    #[test]
    fn test_original_query_always_first() {
        let expansions = expander().expand_keyword("fix the keyring error", 3);
        assert_eq!(expansions[0], "fix the keyring error");
        assert!(expansions.len() > 1);
        assert!(expansions.len() <= 3);
    }

    #[test]
    fn test_no_matching_keywords_returns_original_only() {
        let expansions = expander().expand_keyword("unrelated words entirely", 3);
        assert_eq!(expansions, vec!["unrelated words entirely".to_string()]);
    }

    #[test]
    fn test_domain_expansion_applies() {
        let expansions = expander().expand_keyword("nixos deployment", 3);
        assert!(expansions.iter().any(|e| e.contains("nixpkgs")));
    }

    #[test]
    fn test_question_reformulation() {
        assert_eq!(
            QueryExpander::question_to_keywords("How to fix the keyring?"),
            "fix the keyring tutorial guide steps"
        );
        assert_eq!(
            QueryExpander::question_to_keywords("What is a flake?"),
            "a flake definition explanation overview"
        );
        assert_eq!(
            QueryExpander::question_to_keywords("plain keywords"),
            "plain keywords"
        );
    }

    #[tokio::test]
    async fn test_llm_strategy_without_model_degrades_to_original() {
        let expansions = expander()
            .expand("fix keyring", ExpansionStrategy::Llm, 3)
            .await;
        assert_eq!(expansions, vec!["fix keyring".to_string()]);
    }
}
