//! Retrieval advisor collaborator
//!
//! The engine forwards a filter expression and gets documents back; it does
//! not rank or embed anything itself.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chatlab_common::constants::request_keys::DOC_INFO_ID;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// A document returned by retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl RetrievedDocument {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }
}

/// Source of documents for retrieval-augmented prompts
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn retrieve(&self, query: &str, filter_expression: &str) -> Result<Vec<RetrievedDocument>>;
}

const CONTEXT_TEMPLATE: &str = "Context information is below.

---------------------
{context}
---------------------

Given the context information and no prior knowledge, answer the query.

Follow these rules:

1. If the answer is not in the context, just say that you don't know.
2. Avoid statements like \"Based on the context...\" or \"The provided information...\".

Query: {query}

Answer:
";

/// Wrap the user query in the context template. An empty document list
/// leaves the query untouched.
pub fn augment_prompt(query: &str, documents: &[RetrievedDocument]) -> String {
    if documents.is_empty() {
        return query.to_string();
    }
    let context = documents
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    CONTEXT_TEMPLATE
        .replace("{context}", &context)
        .replace("{query}", query)
}

/// Parse `docInfoId in ['a', 'b']` into its id list
pub fn parse_filter_expression(expression: &str) -> Result<Vec<String>> {
    let filter = Regex::new(r"^\s*(\w+)\s+in\s+\[(.*)\]\s*$")?;
    let quoted = Regex::new(r"'([^']*)'")?;
    let captures = filter
        .captures(expression)
        .ok_or_else(|| anyhow!("Unsupported filter expression: {}", expression))?;
    if &captures[1] != DOC_INFO_ID {
        return Err(anyhow!("Unsupported filter field: {}", &captures[1]));
    }
    Ok(quoted
        .captures_iter(&captures[2])
        .map(|c| c[1].to_string())
        .collect())
}

/// Retriever over a fixed set of documents. It only applies the id filter;
/// every document that passes is returned in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryDocumentRetriever {
    documents: Vec<RetrievedDocument>,
}

impl InMemoryDocumentRetriever {
    pub fn new(documents: Vec<RetrievedDocument>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl DocumentRetriever for InMemoryDocumentRetriever {
    async fn retrieve(&self, query: &str, filter_expression: &str) -> Result<Vec<RetrievedDocument>> {
        let ids = parse_filter_expression(filter_expression)?;
        let documents: Vec<_> = self
            .documents
            .iter()
            .filter(|d| ids.contains(&d.id))
            .cloned()
            .collect();
        debug!(
            "Retrieved {} documents for query of {} chars",
            documents.len(),
            query.len()
        );
        Ok(documents)
    }
}
