//! Intake filter
//!
//! First layer in front of the pipeline: greetings, small talk and questions too
//! vague to translate get a conversational reply instead of a provider call.

use lazy_static::lazy_static;
use rand::seq::SliceRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

lazy_static! {
    static ref GREETING_PATTERNS: Vec<Regex> = [
        r"^\s*(oi|olá|ola|hey|hi|hello|e aí|eai|salve)\s*[!.]*\s*$",
        r"^\s*(good morning|good afternoon|good evening|bom dia|boa tarde|boa noite)\s*[!.]*\s*$",
        r"^\s*(tchau|até logo|até mais|bye|goodbye|see you|adeus)\s*[!.]*\s*$",
        r"^\s*(how are you|what's up|tudo bem|como vai|como está|tudo certo|beleza)\s*[?!.]*\s*$",
        r"^\s*(obrigad[oa]|muito obrigad[oa]|valeu|thanks|thank you)\s*[!.]*\s*$",
        r"^\s*(who are you|what do you do|quem é você|o que você faz)\s*[?!.]*\s*$",
        r"^\s*(how does this work|what is this for|como funciona|para que serve)\s*[?!.]*\s*$",
        r"^\s*(ok|okay|certo|entendi|got it)\s*[!.]*\s*$",
        r"^\s*(teste|testing|test)\s*[!.]*\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();

    static ref VAGUE_PATTERNS: Vec<Regex> = [
        r"^\s*(help|help me|me ajuda|ajuda)\s*$",
        r"^\s*(data|information|info|dados|informações?)\s*$",
        r"^\s*(analysis|report|análise|analise|relatório)\s*$",
        r"^\s*(show|list|display|mostre|mostra|exibe|lista)\s*$",
        r"^\s*(i want|i need|quero|preciso|gostaria)\s*$",
        r"^\s*(what|o que)\s*$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
}

const GREETING_WORDS: [&str; 20] = [
    "hi", "hey", "hello", "bye", "thanks", "ok", "okay", "test", "oi", "olá", "ola", "tchau",
    "valeu", "obrigado", "obrigada", "beleza", "legal", "certo", "massa", "teste",
];

const SHORT_GREETING_CHARS: usize = 20;
const SHORT_GREETING_WORDS: usize = 3;
const MIN_QUESTION_CHARS: usize = 15;

const SUGGESTIONS: [&str; 7] = [
    "What is the distribution of records by category?",
    "What are the average values per group?",
    "Which period has the highest concentration of records?",
    "What are the top 10 records by value?",
    "How does the data behave over time?",
    "How are the main variables correlated?",
    "Where are the largest values concentrated?",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeKind {
    Greeting,
    Vague,
    Query,
}

/// Non-executable reply returned instead of SQL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeReply {
    pub kind: IntakeKind,
    pub message: String,
    pub explanation: String,
    pub suggestions: Vec<String>,
}

pub fn is_greeting(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    if GREETING_PATTERNS.iter().any(|re| re.is_match(&normalized)) {
        return true;
    }

    if normalized.chars().count() <= SHORT_GREETING_CHARS {
        let words: Vec<&str> = normalized.split_whitespace().collect();
        return words.len() <= SHORT_GREETING_WORDS && words.iter().any(|w| GREETING_WORDS.contains(w));
    }
    false
}

pub fn is_vague(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    VAGUE_PATTERNS.iter().any(|re| re.is_match(&normalized))
        || normalized.chars().count() < MIN_QUESTION_CHARS
}

pub fn classify(question: &str) -> IntakeKind {
    let kind = if is_greeting(question) {
        IntakeKind::Greeting
    } else if is_vague(question) {
        IntakeKind::Vague
    } else {
        IntakeKind::Query
    };
    log_interaction(question, kind);
    kind
}

fn log_interaction(question: &str, kind: IntakeKind) {
    let preview: String = question.chars().take(50).collect();
    let ellipsis = if question.chars().count() > 50 { "..." } else { "" };
    info!(
        "INTERACTION_METRIC | Type: {:?} | Query_Length: {} | Query: '{}{}'",
        kind,
        question.len(),
        preview,
        ellipsis
    );
}

fn suggestions(count: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    SUGGESTIONS
        .choose_multiple(&mut rng, count)
        .map(|s| s.to_string())
        .collect()
}

/// Reply for a question that should not reach the provider, `None` for real queries
pub fn reply_for(kind: IntakeKind) -> Option<IntakeReply> {
    match kind {
        IntakeKind::Greeting => {
            let suggestions = suggestions(3);
            let list = suggestions.iter().map(|s| format!("• {}", s)).collect::<Vec<_>>().join("\n");
            Some(IntakeReply {
                kind,
                message: format!(
                    "I answer questions about your data by writing SQL for them.\n\n\
                     To get started, try one of these:\n\n{}\n\n\
                     Or ask your own specific question about the data you want to analyze.",
                    list
                ),
                explanation: "Greeting received; waiting for a specific data question".to_string(),
                suggestions,
            })
        }
        IntakeKind::Vague => {
            let suggestions = suggestions(4);
            let list = suggestions.iter().map(|s| format!("• {}", s)).collect::<Vec<_>>().join("\n");
            Some(IntakeReply {
                kind,
                message: format!(
                    "I need a more specific question to help.\n\n\
                     Here are some things you can ask:\n\n{}\n\n\
                     Say which data you want to analyze and any period or category of interest.",
                    list
                ),
                explanation: "Question too vague; more detail is needed about what to analyze".to_string(),
                suggestions,
            })
        }
        IntakeKind::Query => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greetings() {
        for text in ["oi", "olá", "bom dia", "Hello!", "thanks", "tchau", "como vai?", "hi there", "who are you?"] {
            assert!(is_greeting(text), "{} should be a greeting", text);
        }
        for text in [
            "count rows by category",
            "quantos alunos estão matriculados",
            "total sales per month in 2023",
        ] {
            assert!(!is_greeting(text), "{} should not be a greeting", text);
        }
    }

    #[test]
    fn test_vague_questions() {
        for text in ["help", "me ajuda", "relatório", "dashboard", "show"] {
            assert!(is_vague(text), "{} should be vague", text);
        }
        assert!(!is_vague("count rows by category"));
        assert!(!is_vague("listar os 10 melhores alunos por nota"));
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("hello"), IntakeKind::Greeting);
        assert_eq!(classify("report"), IntakeKind::Vague);
        assert_eq!(classify("count rows by category"), IntakeKind::Query);
    }

    #[test]
    fn test_replies() {
        let greeting = reply_for(IntakeKind::Greeting).unwrap();
        assert_eq!(greeting.suggestions.len(), 3);
        assert!(greeting.suggestions.iter().all(|s| SUGGESTIONS.contains(&s.as_str())));

        let vague = reply_for(IntakeKind::Vague).unwrap();
        assert_eq!(vague.suggestions.len(), 4);
        assert!(reply_for(IntakeKind::Query).is_none());
    }
}
