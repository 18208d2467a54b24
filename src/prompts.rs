//! Prompt text and message assembly for reformulation and answering.

use crate::llm::ChatMessage;
use crate::models::{ConversationTurn, RetrievedChunk};

/// The exact reply given when the retrieved context does not hold an answer.
pub const FALLBACK_ANSWER: &str =
    "I'm sorry, I cannot find this information in the company policy documents.";

const CONTEXT_PLACEHOLDER: &str = "{context}";

/// Instructions for the answering call. `{context}` is replaced with the
/// retrieved chunk texts.
pub const SYSTEM_TEMPLATE: &str = r#"You are CorpGuide AI, an expert HR and Policy Assistant.
Your task is to answer the user's question based ONLY on the provided context below.

<context>
{context}
</context>

Guidelines:
1. If the answer is not in the context, strictly reply: "I'm sorry, I cannot find this information in the company policy documents."
2. Do not make up or hallucinate information.
3. Keep your answer professional, concise, and helpful.
4. If the question is in Arabic, answer in Arabic. If in English, answer in English.
5. Provide specific details (numbers, days, penalties) if available in the context."#;

/// Instructions for turning a follow-up into a standalone question.
pub const CONTEXTUALIZE_PROMPT: &str = "Given a chat history and the latest user question \
which might reference context in the chat history, formulate a standalone question \
which can be understood without the chat history. Do NOT answer the question, \
just reformulate it if needed and otherwise return it as is.";

fn history_messages(history: &[ConversationTurn]) -> impl Iterator<Item = ChatMessage> + '_ {
    history
        .iter()
        .map(|turn| ChatMessage::new(turn.role.as_chat_role(), turn.text.clone()))
}

/// `[system, history..., user]` for the reformulation call.
pub fn reformulation_messages(question: &str, history: &[ConversationTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(CONTEXTUALIZE_PROMPT));
    messages.extend(history_messages(history));
    messages.push(ChatMessage::user(question));
    messages
}

/// Chunk texts separated by blank lines, in retrieval order.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `[system with context, history..., user]` for the answering call.
pub fn answer_messages(
    question: &str,
    chunks: &[RetrievedChunk],
    history: &[ConversationTurn],
) -> Vec<ChatMessage> {
    let system = SYSTEM_TEMPLATE.replace(CONTEXT_PLACEHOLDER, &format_context(chunks));

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend(history_messages(history));
    messages.push(ChatMessage::user(question));
    messages
}

/// Whether `answer` is the refusal sentence, ignoring surrounding whitespace
/// and quotes.
pub fn is_fallback(answer: &str) -> bool {
    answer.trim().trim_matches('"').trim() == FALLBACK_ANSWER
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::make_chunk;

    #[test]
    fn template_embeds_fallback_sentence() {
        assert!(SYSTEM_TEMPLATE.contains(FALLBACK_ANSWER));
        assert!(SYSTEM_TEMPLATE.contains(CONTEXT_PLACEHOLDER));
    }

    #[test]
    fn answer_messages_order_context_history_question() {
        let chunks = vec![RetrievedChunk {
            chunk: make_chunk("Annual leave is 21 days."),
            score: 0.9,
        }];
        let history = vec![
            ConversationTurn::human("Hi"),
            ConversationTurn::ai("Hello, how can I help?"),
        ];
        let msgs = answer_messages("How many leave days?", &chunks, &history);

        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, "system");
        assert!(msgs[0].content.contains("<context>\nAnnual leave is 21 days.\n</context>"));
        assert_eq!(msgs[1].role, "user");
        assert_eq!(msgs[2].role, "assistant");
        assert_eq!(msgs[3], ChatMessage::user("How many leave days?"));
    }

    #[test]
    fn reformulation_messages_start_with_instructions() {
        let msgs = reformulation_messages("And sick leave?", &[ConversationTurn::human("Leave?")]);
        assert_eq!(msgs[0].content, CONTEXTUALIZE_PROMPT);
        assert_eq!(msgs.last().unwrap().content, "And sick leave?");
    }

    #[test]
    fn fallback_detection_tolerates_quotes() {
        assert!(is_fallback(FALLBACK_ANSWER));
        assert!(is_fallback(&format!(" \"{}\"\n", FALLBACK_ANSWER)));
        assert!(!is_fallback("Annual leave is 21 days."));
    }
}
