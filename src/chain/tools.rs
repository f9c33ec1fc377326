use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{RagchatError, Result};
use crate::llm::ToolSpec;
use crate::search::{format_context, Retriever};

/// Capability the agent can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn parameters(&self) -> Value;

    async fn call(&self, arguments: Value) -> Result<String>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Tools available to the agent, keyed by name
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous tool of the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub async fn call(&self, name: &str, arguments: Value) -> Result<String> {
        let tool = self
            .get(name)
            .ok_or_else(|| RagchatError::Tool(format!("Unknown tool: {}", name)))?;
        tool.call(arguments).await
    }
}

#[derive(Deserialize)]
struct KnowledgeSearchArgs {
    query: String,
}

/// Similarity search over the embeddings store
pub struct KnowledgeSearchTool {
    retriever: Retriever,
}

impl KnowledgeSearchTool {
    pub const NAME: &'static str = "knowledge_search";

    pub fn new(retriever: Retriever) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Search the indexed documentation and Q&A for passages relevant to a query."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to look up, phrased as a question or keywords"
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<String> {
        let args: KnowledgeSearchArgs = serde_json::from_value(arguments)
            .map_err(|e| RagchatError::Tool(format!("Invalid knowledge_search arguments: {}", e)))?;

        let records = self.retriever.retrieve(&args.query).await?;
        if records.is_empty() {
            return Ok("No matching passages found.".to_string());
        }
        Ok(format_context(&records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingsStore;
    use crate::ingest::element::Metadata;
    use crate::ingest::segmenter::StructuredRecord;
    use crate::testing::BagOfWordsEmbedder;
    use tempfile::TempDir;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the arguments"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }

        async fn call(&self, arguments: Value) -> Result<String> {
            Ok(arguments.to_string())
        }
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.specs()[0].name, "echo");
        assert_eq!(registry.call("echo", json!({"a": 1})).await.unwrap(), "{\"a\":1}");
        assert!(matches!(
            registry.call("missing", json!({})).await,
            Err(RagchatError::Tool(_))
        ));
    }

    #[tokio::test]
    async fn test_knowledge_search_tool() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(
            EmbeddingsStore::open(temp_dir.path(), Arc::new(BagOfWordsEmbedder::default()))
                .await
                .unwrap(),
        );
        let records = vec![StructuredRecord {
            question: Some("How do I reset the inverter?".to_string()),
            answer: "Hold the reset button for ten seconds.".to_string(),
            metadata: Metadata::new(),
            file: "training/faq_qa.md".to_string(),
        }];
        store.upsert(&records, Some("training/faq_qa.md")).await.unwrap();

        let tool = KnowledgeSearchTool::new(store.retriever(4));
        let found = tool.call(json!({"query": "reset the inverter"})).await.unwrap();
        assert!(found.contains("ten seconds"));

        assert!(matches!(tool.call(json!({"q": 1})).await, Err(RagchatError::Tool(_))));
    }
}
