//! Fixed prompt and sampling parameters for document summaries.

use docpipe_core::LlmRequest;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that summarizes documents.";
pub const USER_PROMPT_PREFIX: &str =
    "Can you provide a concise summary of the following text? Focus on the main points and key information:\n\n";
pub const MAX_TOKENS: u32 = 500;
pub const TEMPERATURE: f32 = 0.7;

/// Build the chat request that asks `model` to summarize `text`.
pub fn summary_request(model: &str, text: &str) -> LlmRequest {
    LlmRequest {
        model: model.to_string(),
        system_prompt: SYSTEM_PROMPT.to_string(),
        user_prompt: format!("{USER_PROMPT_PREFIX}{text}"),
        max_tokens: MAX_TOKENS,
        temperature: TEMPERATURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_text_after_instruction() {
        let req = summary_request("gpt-3.5-turbo", "Total: $500");
        assert_eq!(req.model, "gpt-3.5-turbo");
        assert!(req.user_prompt.starts_with("Can you provide a concise summary"));
        assert!(req.user_prompt.ends_with("\n\nTotal: $500"));
        assert_eq!(req.max_tokens, 500);
    }
}
