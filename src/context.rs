//! Conversation memory and generation-context assembly.
//!
//! The assembler is the boundary to the external generation service: it
//! takes the hybrid retriever's ordered chunks and the session's last few
//! conversation turns and builds a [`GenerationRequest`]. Actual text
//! generation stays behind the [`GenerationService`] trait.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::str::FromStr;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::models::{Chunk, ConversationTurn};

/// Fixed-capacity conversation history with eviction on insert.
///
/// Owned by the session, single-writer; never shared across sessions.
pub struct ConversationMemory {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ConversationMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record one exchange, evicting the oldest when full.
    pub fn record(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(ConversationTurn {
            user: user.into(),
            assistant: assistant.into(),
        });
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Tutoring mode; selects the system prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    Qa,
    Quiz,
    Explain,
}

impl FromStr for GenerationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "qa" => Ok(GenerationMode::Qa),
            "quiz" => Ok(GenerationMode::Quiz),
            "explain" => Ok(GenerationMode::Explain),
            other => bail!("Unknown mode: {}. Use qa, quiz, or explain.", other),
        }
    }
}

impl GenerationMode {
    pub fn system_prompt(&self) -> &'static str {
        match self {
            GenerationMode::Qa => {
                "أنت مساعد تعليمي متخصص في مساعدة طلاب الثانوية العامة.\n\
                 استخدم المعلومات المقدمة للإجابة على أسئلة الطالب بدقة ووضوح.\n\
                 إذا لم تكن المعلومات كافية، قل ذلك بوضوح.\n\n\
                 You are an educational assistant for secondary-school students.\n\
                 Use the provided information to answer student questions accurately and clearly.\n\
                 If the information is not sufficient, say so clearly."
            }
            GenerationMode::Quiz => {
                "أنت مساعد تعليمي متخصص في إنشاء اختبارات لطلاب الثانوية العامة.\n\
                 قم بإنشاء أسئلة اختيار من متعدد بناءً على المحتوى المقدم.\n\n\
                 You are an educational assistant that creates quizzes for secondary-school \
                 students. Create multiple choice questions based on the provided content. \
                 Ensure questions are clear and options are reasonable."
            }
            GenerationMode::Explain => {
                "أنت مساعد تعليمي متخصص في شرح المفاهيم لطلاب الثانوية العامة.\n\
                 اشرح الموضوع المطلوب بطريقة واضحة ومبسطة مع أمثلة عند الحاجة.\n\n\
                 You are an educational assistant that explains concepts to secondary-school \
                 students. Explain the requested topic clearly and simply with examples when \
                 needed."
            }
        }
    }
}

/// One retrieved chunk as it appears in the generation context, cited by
/// its hierarchy path.
#[derive(Debug, Clone)]
pub struct ContextBlock {
    pub citation: String,
    pub text: String,
}

/// Everything the generation service receives for one answer.
#[derive(Debug)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub context: Vec<ContextBlock>,
    pub history: Vec<ConversationTurn>,
    pub question: String,
}

impl GenerationRequest {
    /// Flatten the request into a single prompt string, the shape local
    /// inference servers consume.
    pub fn render_prompt(&self) -> String {
        let mut out = String::new();

        if !self.context.is_empty() {
            out.push_str("Context:\n");
            for block in &self.context {
                out.push_str(&format!("[{}]\n{}\n\n", block.citation, block.text));
            }
        }

        if !self.history.is_empty() {
            out.push_str("Conversation so far:\n");
            for turn in &self.history {
                out.push_str(&format!("Student: {}\nAssistant: {}\n", turn.user, turn.assistant));
            }
            out.push('\n');
        }

        out.push_str(&format!("Student question: {}", self.question));
        out
    }
}

/// Build the generation context from fused retrieval results and session
/// memory. Chunks arrive already ordered by fused score.
pub fn assemble(
    question: &str,
    chunks: &[Chunk],
    memory: &ConversationMemory,
    mode: GenerationMode,
) -> GenerationRequest {
    GenerationRequest {
        system_prompt: mode.system_prompt().to_string(),
        context: chunks
            .iter()
            .map(|chunk| ContextBlock {
                citation: chunk.citation(),
                text: chunk.text.clone(),
            })
            .collect(),
        history: memory.turns().cloned().collect(),
        question: question.to_string(),
    }
}

/// External text-generation collaborator.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Generation over an Ollama-style HTTP endpoint.
pub struct HttpGenerationClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl HttpGenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.base_url required for HTTP generation"))?;
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for HTTP generation"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        })
    }
}

#[async_trait]
impl GenerationService for HttpGenerationClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "system": request.system_prompt,
            "prompt": request.render_prompt(),
            "stream": false,
        });

        let url = format!("{}/api/generate", self.base_url);
        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Generation service error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        json.get("response")
            .and_then(|r| r.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid generation response: missing response field"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkStatus;

    fn chunk_with_path(path: &[&str], text: &str) -> Chunk {
        Chunk {
            id: "c1".to_string(),
            document_id: "d1".to_string(),
            subject: "physics".to_string(),
            chunk_index: 0,
            hierarchy_path: path.iter().map(|s| s.to_string()).collect(),
            text: text.to_string(),
            char_len: text.chars().count(),
            hash: String::new(),
            status: ChunkStatus::Committed,
        }
    }

    #[test]
    fn memory_evicts_oldest_on_overflow() {
        let mut memory = ConversationMemory::new(3);
        memory.record("q1", "a1");
        memory.record("q2", "a2");
        memory.record("q3", "a3");
        memory.record("q4", "a4");

        assert_eq!(memory.len(), 3);
        let users: Vec<&str> = memory.turns().map(|t| t.user.as_str()).collect();
        assert_eq!(users, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn memory_clear() {
        let mut memory = ConversationMemory::new(3);
        memory.record("q", "a");
        assert!(!memory.is_empty());
        memory.clear();
        assert!(memory.is_empty());
    }

    #[test]
    fn assemble_cites_hierarchy_paths() {
        let memory = ConversationMemory::new(3);
        let chunks = vec![chunk_with_path(
            &["Unit 1", "Chapter 2"],
            "Voltage equals current times resistance.",
        )];
        let request = assemble("What is Ohm's law?", &chunks, &memory, GenerationMode::Qa);

        assert_eq!(request.context.len(), 1);
        assert_eq!(request.context[0].citation, "Unit 1 > Chapter 2");
        let prompt = request.render_prompt();
        assert!(prompt.contains("[Unit 1 > Chapter 2]"));
        assert!(prompt.contains("Student question: What is Ohm's law?"));
    }

    #[test]
    fn assemble_includes_history_in_order() {
        let mut memory = ConversationMemory::new(3);
        memory.record("first", "answer one");
        memory.record("second", "answer two");
        let request = assemble("third", &[], &memory, GenerationMode::Explain);

        assert_eq!(request.history.len(), 2);
        assert_eq!(request.history[0].user, "first");
        let prompt = request.render_prompt();
        let first = prompt.find("Student: first").unwrap();
        let second = prompt.find("Student: second").unwrap();
        assert!(first < second);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("qa".parse::<GenerationMode>().unwrap(), GenerationMode::Qa);
        assert_eq!(
            "quiz".parse::<GenerationMode>().unwrap(),
            GenerationMode::Quiz
        );
        assert!("essay".parse::<GenerationMode>().is_err());
    }

    #[test]
    fn each_mode_has_a_distinct_prompt() {
        let prompts = [
            GenerationMode::Qa.system_prompt(),
            GenerationMode::Quiz.system_prompt(),
            GenerationMode::Explain.system_prompt(),
        ];
        assert_ne!(prompts[0], prompts[1]);
        assert_ne!(prompts[1], prompts[2]);
    }
}
