use crate::session::ConversationTurn;

/// System message for the tool-calling agent
pub const AGENT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools to look up \
facts before answering, and answer in the language of the question.";

/// Answer prompt: retrieved context first, then the question
pub fn answer_prompt(context: &str, question: &str) -> String {
    format!(
        "{context}\n\n\n-----------\n\
         Answer the question below based only on the above context \
         (without mention the context in the response).\n\n\
         Question: {question}\n"
    )
}

/// Prompt asking the model to rewrite a follow-up into a standalone question
pub fn condense_prompt(chat_history: &str, question: &str) -> String {
    format!(
        "Given the following conversation and a follow up question, rephrase the follow up \
         question to be a standalone question, in its original language.\n\n\
         Chat History:\n{chat_history}\n\n\
         ------------------------------\n\
         Follow Up Input: {question}\n\
         Standalone question:"
    )
}

/// Render prior turns as `Human:`/`Assistant:` lines, each turn preceded by a newline
pub fn format_chat_history(history: &[ConversationTurn]) -> String {
    let mut buffer = String::new();
    for turn in history {
        buffer.push_str("\nHuman: ");
        buffer.push_str(&turn.question);
        buffer.push_str("\nAssistant: ");
        buffer.push_str(&turn.answer);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_chat_history() {
        assert_eq!(format_chat_history(&[]), "");

        let history = vec![
            ConversationTurn::new("hi", "hello"),
            ConversationTurn::new("and you?", "fine"),
        ];
        assert_eq!(
            format_chat_history(&history),
            "\nHuman: hi\nAssistant: hello\nHuman: and you?\nAssistant: fine"
        );
    }

    #[test]
    fn test_answer_prompt_puts_context_before_question() {
        let prompt = answer_prompt("CEOS is an energy OS.", "What is CEOS?");
        let context_at = prompt.find("CEOS is an energy OS.").unwrap();
        let question_at = prompt.find("Question: What is CEOS?").unwrap();
        assert!(context_at < question_at);
        assert!(prompt.contains("based only on the above context"));
    }

    #[test]
    fn test_condense_prompt_includes_history_and_question() {
        let history = format_chat_history(&[ConversationTurn::new("hi", "hello")]);
        let prompt = condense_prompt(&history, "and you?");
        assert!(prompt.contains("Human: hi"));
        assert!(prompt.contains("Assistant: hello"));
        assert!(prompt.contains("Follow Up Input: and you?"));
        assert!(prompt.ends_with("Standalone question:"));
    }
}
