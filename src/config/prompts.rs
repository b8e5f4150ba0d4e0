//! System prompt template
//!
//! The system message is fully owned by the server: incoming system-role
//! messages are stripped and replaced with this template, optionally
//! augmented with a memory-context block rendered from the user's stored
//! memories, most-recent-first.

use crate::store::Memory;

const INTRO: &str = "Tu es un assistant d'apprentissage intelligent et bienveillant. \
Tu aides les utilisateurs à apprendre efficacement.";

const INSTRUCTIONS: &str = "Instructions importantes:
- Utilise l'outil generate_quiz quand l'utilisateur demande un quiz ou veut tester ses connaissances.
- Utilise l'outil add_memory pour sauvegarder des informations importantes sur l'utilisateur (préférences, objectifs, difficultés, connaissances), et confirme à l'utilisateur que tu l'as fait.
- Utilise l'outil create_flashcard pour créer des cartes mémoire interactives quand l'utilisateur veut mémoriser quelque chose.
- Sois naturel et conversationnel.";

/// Render the full system prompt. With no memories the context block is
/// omitted entirely, not rendered empty.
pub fn system_prompt(memories: &[Memory]) -> String {
    format!("{}{}\n\n{}", INTRO, memory_context(memories), INSTRUCTIONS)
}

fn memory_context(memories: &[Memory]) -> String {
    if memories.is_empty() {
        return String::new();
    }

    let lines = memories
        .iter()
        .map(|m| format!("- [{}] {}", m.kind, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    format!("\n\nContexte utilisateur (mémoires):\n{}", lines)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::store::MemoryKind;

    fn memory(kind: MemoryKind, content: &str) -> Memory {
        Memory {
            id: "mem-1".into(),
            user_id: "user-1".into(),
            content: content.into(),
            kind,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn omits_context_block_without_memories() {
        let prompt = system_prompt(&[]);
        assert!(!prompt.contains("Contexte utilisateur"));
        assert!(prompt.contains("generate_quiz"));
    }

    #[test]
    fn renders_one_line_per_memory() {
        let memories = vec![
            memory(MemoryKind::Objectif, "préparer un concours"),
            memory(MemoryKind::Preference, "exemples concrets"),
        ];
        let prompt = system_prompt(&memories);
        assert!(prompt.contains("Contexte utilisateur (mémoires):"));
        assert!(prompt.contains("- [objectif] préparer un concours"));
        assert!(prompt.contains("- [preference] exemples concrets"));
    }
}
