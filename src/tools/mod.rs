//! Callable tools
//!
//! The three tools the model can invoke mid-stream. Each is declared with a
//! JSON-schema parameter block handed to the providers, and an execution
//! body dispatched by name. Outputs are a tagged union with one concrete
//! type per tool instead of free-form JSON.
//!
//! `generate_quiz` and `create_flashcard` are pure synthesis; `add_memory`
//! writes through the memory store, scoped to the user id the orchestrator
//! resolved for the request, never one taken from tool arguments.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use thiserror::Error;

use crate::store::{Memory, MemoryKind, MemoryStore, NewMemory};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
}

/// Definition of a tool the model can call
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// An ephemeral quiz, rendered and answered client-side; never persisted as
/// its own entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: String,
    pub subject: String,
    pub difficulty: Difficulty,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: u8,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub id: String,
    pub front: String,
    pub back: String,
    pub category: String,
}

/// Outcome of a memory save. A persistence failure is swallowed into the
/// `Failed` variant so the enclosing turn keeps going; callers branch on
/// the variant instead of reading fields optimistically.
#[derive(Debug, Clone, PartialEq)]
pub enum MemorySaveOutcome {
    Saved(Memory),
    Failed {
        error: String,
        content: String,
        kind: MemoryKind,
    },
}

impl MemorySaveOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, MemorySaveOutcome::Saved(_))
    }
}

impl Serialize for MemorySaveOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = match self {
            MemorySaveOutcome::Saved(memory) => json!({
                "success": true,
                "memory_id": memory.id,
                "content": memory.content,
                "type": memory.kind,
            }),
            MemorySaveOutcome::Failed {
                error,
                content,
                kind,
            } => json!({
                "success": false,
                "error": error,
                "content": content,
                "type": kind,
            }),
        };
        value.serialize(serializer)
    }
}

/// One concrete result type per tool, keyed by the tool name that produced
/// it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Quiz(Quiz),
    Memory(MemorySaveOutcome),
    Flashcard(Flashcard),
}

#[derive(Debug, Deserialize)]
struct QuizArgs {
    subject: String,
    difficulty: Difficulty,
    question: String,
    options: Vec<String>,
    correct_answer: u8,
    #[serde(default)]
    explanation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MemoryArgs {
    content: String,
    #[serde(rename = "type")]
    kind: MemoryKind,
}

#[derive(Debug, Deserialize)]
struct FlashcardArgs {
    front: String,
    back: String,
    #[serde(default)]
    category: Option<String>,
}

/// The tool registry. Owns no state beyond its schema definitions and the
/// memory store handle `add_memory` writes through.
pub struct ToolRegistry {
    memories: Arc<dyn MemoryStore>,
}

impl ToolRegistry {
    pub fn new(memories: Arc<dyn MemoryStore>) -> Self {
        Self { memories }
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new(
                "generate_quiz",
                "Génère un quiz interactif sur un sujet donné avec une question et plusieurs choix de réponse.",
            )
            .with_parameters(json!({
                "type": "object",
                "properties": {
                    "subject": { "type": "string", "description": "Le sujet du quiz" },
                    "difficulty": {
                        "type": "string",
                        "enum": ["easy", "medium", "hard"],
                        "description": "La difficulté du quiz"
                    },
                    "question": { "type": "string", "description": "La question du quiz" },
                    "options": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 4,
                        "maxItems": 4,
                        "description": "Les 4 options de réponse"
                    },
                    "correct_answer": {
                        "type": "integer",
                        "minimum": 0,
                        "maximum": 3,
                        "description": "L'index de la bonne réponse (0-3)"
                    },
                    "explanation": {
                        "type": "string",
                        "description": "Explication de la bonne réponse"
                    }
                },
                "required": ["subject", "difficulty", "question", "options", "correct_answer"]
            })),
            ToolDefinition::new(
                "add_memory",
                "Enregistre une information importante sur l'utilisateur pour personnaliser l'expérience d'apprentissage.",
            )
            .with_parameters(json!({
                "type": "object",
                "properties": {
                    "content": { "type": "string", "description": "L'information à mémoriser" },
                    "type": {
                        "type": "string",
                        "enum": ["preference", "objectif", "connaissance", "autre"],
                        "description": "Le type de mémoire"
                    }
                },
                "required": ["content", "type"]
            })),
            ToolDefinition::new(
                "create_flashcard",
                "Crée une carte mémoire interactive pour aider l'utilisateur à mémoriser des informations.",
            )
            .with_parameters(json!({
                "type": "object",
                "properties": {
                    "front": { "type": "string", "description": "Le recto de la carte (question ou terme)" },
                    "back": { "type": "string", "description": "Le verso de la carte (réponse ou définition)" },
                    "category": {
                        "type": "string",
                        "description": "La catégorie de la carte (ex: vocabulaire, formule, concept)"
                    }
                },
                "required": ["front", "back"]
            })),
        ]
    }

    /// Execute a tool by name. A memory persistence failure never raises;
    /// it comes back as `MemorySaveOutcome::Failed` inside a normal output.
    pub async fn execute(
        &self,
        name: &str,
        arguments: Value,
        user_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        match name {
            "generate_quiz" => {
                let args: QuizArgs = decode(name, arguments)?;
                if args.options.len() != 4 {
                    return Err(ToolError::InvalidArguments {
                        tool: name.into(),
                        message: format!("expected 4 options, got {}", args.options.len()),
                    });
                }
                if args.correct_answer > 3 {
                    return Err(ToolError::InvalidArguments {
                        tool: name.into(),
                        message: format!("correct_answer {} out of range 0-3", args.correct_answer),
                    });
                }
                Ok(ToolOutput::Quiz(Quiz {
                    id: format!("quiz-{}", Utc::now().timestamp_millis()),
                    subject: args.subject,
                    difficulty: args.difficulty,
                    question: args.question,
                    options: args.options,
                    correct_answer: args.correct_answer,
                    explanation: args
                        .explanation
                        .unwrap_or_else(|| "Bonne réponse !".to_string()),
                }))
            }
            "add_memory" => {
                let args: MemoryArgs = decode(name, arguments)?;
                let outcome = match self
                    .memories
                    .save_memory(NewMemory {
                        user_id: user_id.to_string(),
                        content: args.content.clone(),
                        kind: args.kind,
                    })
                    .await
                {
                    Ok(memory) => MemorySaveOutcome::Saved(memory),
                    Err(err) => {
                        tracing::warn!(error = %err, "memory save failed, continuing the turn");
                        MemorySaveOutcome::Failed {
                            error: "Failed to save memory".to_string(),
                            content: args.content,
                            kind: args.kind,
                        }
                    }
                };
                Ok(ToolOutput::Memory(outcome))
            }
            "create_flashcard" => {
                let args: FlashcardArgs = decode(name, arguments)?;
                Ok(ToolOutput::Flashcard(Flashcard {
                    id: format!("flashcard-{}", Utc::now().timestamp_millis()),
                    front: args.front,
                    back: args.back,
                    category: args.category.unwrap_or_else(|| "général".to_string()),
                }))
            }
            _ => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}

fn decode<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|err| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn registry() -> (Arc<InMemoryStore>, ToolRegistry) {
        let store = Arc::new(InMemoryStore::new());
        let registry = ToolRegistry::new(store.clone());
        (store, registry)
    }

    fn quiz_arguments() -> Value {
        json!({
            "subject": "React",
            "difficulty": "medium",
            "question": "Qu'est-ce que React ?",
            "options": ["Une bibliothèque UI", "Un SGBD", "Un OS", "Un protocole"],
            "correct_answer": 0
        })
    }

    #[test]
    fn declares_three_tools() {
        let (_, registry) = registry();
        let names: Vec<String> = registry
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["generate_quiz", "add_memory", "create_flashcard"]);
    }

    #[tokio::test]
    async fn quiz_output_holds_shape_invariants() {
        let (_, registry) = registry();
        let output = registry
            .execute("generate_quiz", quiz_arguments(), "user-1")
            .await
            .unwrap();

        let ToolOutput::Quiz(quiz) = output else {
            panic!("expected a quiz output");
        };
        assert_eq!(quiz.options.len(), 4);
        assert!(quiz.correct_answer <= 3);
        assert!(quiz.id.starts_with("quiz-"));
        assert_eq!(quiz.explanation, "Bonne réponse !");
    }

    #[tokio::test]
    async fn quiz_rejects_wrong_option_count() {
        let (_, registry) = registry();
        let mut arguments = quiz_arguments();
        arguments["options"] = json!(["seule option"]);
        let err = registry
            .execute("generate_quiz", arguments, "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn quiz_rejects_out_of_range_answer() {
        let (_, registry) = registry();
        let mut arguments = quiz_arguments();
        arguments["correct_answer"] = json!(4);
        let err = registry
            .execute("generate_quiz", arguments, "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn add_memory_persists_under_request_user() {
        let (store, registry) = registry();
        let output = registry
            .execute(
                "add_memory",
                json!({"content": "prépare un concours", "type": "objectif"}),
                "user-1",
            )
            .await
            .unwrap();

        let ToolOutput::Memory(outcome) = output else {
            panic!("expected a memory outcome");
        };
        assert!(outcome.succeeded());

        let stored = store.memories_for_user("user-1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, MemoryKind::Objectif);
    }

    #[tokio::test]
    async fn add_memory_swallows_persistence_failure() {
        let (store, registry) = registry();
        store.fail_memory_writes(true);

        let output = registry
            .execute(
                "add_memory",
                json!({"content": "préfère les exemples", "type": "preference"}),
                "user-1",
            )
            .await
            .unwrap();

        let ToolOutput::Memory(outcome) = output else {
            panic!("expected a memory outcome");
        };
        assert!(!outcome.succeeded());
        let encoded = serde_json::to_value(&outcome).unwrap();
        assert_eq!(encoded["success"], json!(false));
        assert_eq!(encoded["content"], json!("préfère les exemples"));
    }

    #[tokio::test]
    async fn add_memory_rejects_free_text_kind() {
        let (_, registry) = registry();
        let err = registry
            .execute(
                "add_memory",
                json!({"content": "peu importe", "type": "humeur"}),
                "user-1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn flashcard_defaults_category_and_keeps_front() {
        let (_, registry) = registry();
        let output = registry
            .execute(
                "create_flashcard",
                json!({"front": "E=mc²", "back": "équivalence masse-énergie"}),
                "user-1",
            )
            .await
            .unwrap();

        let ToolOutput::Flashcard(card) = output else {
            panic!("expected a flashcard output");
        };
        assert!(card.front.contains("E=mc²"));
        assert!(!card.back.is_empty());
        assert_eq!(card.category, "général");
        assert!(card.id.starts_with("flashcard-"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let (_, registry) = registry();
        let err = registry
            .execute("search_web", json!({}), "user-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
    }
}
