//! Prompt construction for reply drafting

use super::{ReplyRequest, SIGNATURE_PLACEHOLDER};

/// Builds the single user message sent to the completion endpoint
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    /// Upper bound on quoted email characters (None = quote in full)
    max_email_chars: Option<usize>,
}

impl PromptBuilder {
    pub fn new(max_email_chars: Option<usize>) -> Self {
        Self { max_email_chars }
    }

    pub fn build(&self, request: &ReplyRequest) -> String {
        let email = truncate_chars(request.email_text().trim(), self.max_email_chars);
        let tone = request.tone().as_str();

        let closing = match request.sender_name() {
            Some(name) => format!("End the reply with a closing line signed exactly as \"{name}\"."),
            None => format!(
                "End the reply with a closing line signed exactly as \"{SIGNATURE_PLACEHOLDER}\"."
            ),
        };

        format!(
            "Write a reply to the following email using a {tone} tone.\n\
             \n\
             Email:\n\
             {email}\n\
             \n\
             The reply must:\n\
             - Start directly with the greeting. Do not include any introduction, preamble or \
             commentary such as \"Here is a reply\".\n\
             - Respond to the main points of the email.\n\
             - Stay in a {tone} tone throughout.\n\
             - {closing}\n\
             \n\
             Return only the email reply text."
        )
    }
}

fn truncate_chars(text: &str, limit: Option<usize>) -> String {
    match limit {
        Some(max) if text.chars().count() > max => {
            let cut: String = text.chars().take(max).collect();
            format!("{}...", cut.trim_end())
        }
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::Tone;

    fn request(text: &str, tone: Tone, name: Option<&str>) -> ReplyRequest {
        ReplyRequest::new(text, tone, name).unwrap()
    }

    #[test]
    fn test_prompt_includes_tone_and_email() {
        let prompt = PromptBuilder::default().build(&request(
            "Can you send the report?",
            Tone::Friendly,
            None,
        ));
        assert!(prompt.contains("using a friendly tone"));
        assert!(prompt.contains("Can you send the report?"));
    }

    #[test]
    fn test_prompt_forbids_preamble() {
        let prompt = PromptBuilder::default().build(&request("Hi", Tone::Professional, None));
        assert!(prompt.contains("Start directly with the greeting"));
        assert!(prompt.contains("Do not include any introduction"));
    }

    #[test]
    fn test_prompt_signature_uses_sender_name() {
        let builder = PromptBuilder::default();

        let named = builder.build(&request("Hi", Tone::Formal, Some("Sam Lee")));
        assert!(named.contains("signed exactly as \"Sam Lee\""));
        assert!(!named.contains(SIGNATURE_PLACEHOLDER));

        let anonymous = builder.build(&request("Hi", Tone::Formal, None));
        assert!(anonymous.contains(SIGNATURE_PLACEHOLDER));
    }

    #[test]
    fn test_no_truncation_by_default() {
        let long = "word ".repeat(200);
        let prompt = PromptBuilder::default().build(&request(&long, Tone::Casual, None));
        assert!(prompt.contains(long.trim()));
    }

    #[test]
    fn test_truncation_respects_bound() {
        let long = "é".repeat(400);
        let prompt = PromptBuilder::new(Some(300)).build(&request(&long, Tone::Casual, None));
        assert!(prompt.contains(&format!("{}...", "é".repeat(300))));
        assert!(!prompt.contains(&"é".repeat(301)));
    }
}
