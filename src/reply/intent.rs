//! Keyword rule tables for classifying an incoming email

use std::fmt;
use std::sync::OnceLock;

use aho_corasick::AhoCorasick;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmailIntent {
    MeetingRequest,
    Question,
    Complaint,
    Request,
    ThankYou,
    General,
}

impl fmt::Display for EmailIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmailIntent::MeetingRequest => "meeting_request",
            EmailIntent::Question => "question",
            EmailIntent::Complaint => "complaint",
            EmailIntent::Request => "request",
            EmailIntent::ThankYou => "thank_you",
            EmailIntent::General => "general",
        };
        f.write_str(name)
    }
}

pub struct IntentRule {
    pub intent: EmailIntent,
    /// Lower-case keywords. Alphanumeric edges must fall on word boundaries.
    pub keywords: &'static [&'static str],
}

/// Rules in priority order; the first rule with a hit wins.
pub const INTENT_RULES: &[IntentRule] = &[
    IntentRule {
        intent: EmailIntent::MeetingRequest,
        keywords: &[
            "meeting",
            "meet",
            "schedule",
            "reschedule",
            "call",
            "appointment",
            "calendar",
            "availability",
            "available",
            "catch up",
            "zoom",
            "conference",
        ],
    },
    IntentRule {
        intent: EmailIntent::Complaint,
        keywords: &[
            "complaint",
            "complain",
            "disappointed",
            "unhappy",
            "frustrated",
            "unacceptable",
            "terrible",
            "not working",
            "broken",
            "damaged",
            "refund",
            "problem",
            "issue",
        ],
    },
    IntentRule {
        intent: EmailIntent::Question,
        keywords: &[
            "?",
            "what",
            "when",
            "where",
            "why",
            "how",
            "which",
            "wondering",
            "question",
        ],
    },
    IntentRule {
        intent: EmailIntent::Request,
        keywords: &[
            "please",
            "could you",
            "can you",
            "would you",
            "request",
            "need",
            "send me",
            "kindly",
        ],
    },
    IntentRule {
        intent: EmailIntent::ThankYou,
        keywords: &["thank you", "thanks", "thank", "appreciate", "grateful"],
    },
];

struct CompiledRule {
    intent: EmailIntent,
    keywords: &'static [&'static str],
    matcher: AhoCorasick,
}

fn compiled_rules() -> &'static [CompiledRule] {
    static RULES: OnceLock<Vec<CompiledRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        INTENT_RULES
            .iter()
            .filter_map(|rule| match AhoCorasick::new(rule.keywords) {
                Ok(matcher) => Some(CompiledRule {
                    intent: rule.intent,
                    keywords: rule.keywords,
                    matcher,
                }),
                Err(e) => {
                    tracing::warn!("Skipping {} keyword rule: {}", rule.intent, e);
                    None
                }
            })
            .collect()
    })
}

/// Classify email text by the first rule whose keywords appear in it
pub fn classify(text: &str) -> EmailIntent {
    let lower = text.to_lowercase();
    compiled_rules()
        .iter()
        .find(|rule| rule_matches(rule, &lower))
        .map(|rule| rule.intent)
        .unwrap_or(EmailIntent::General)
}

fn rule_matches(rule: &CompiledRule, haystack: &str) -> bool {
    rule.matcher.find_overlapping_iter(haystack).any(|m| {
        let keyword = rule.keywords[m.pattern().as_usize()];
        on_word_boundaries(haystack, keyword, m.start(), m.end())
    })
}

fn on_word_boundaries(haystack: &str, keyword: &str, start: usize, end: usize) -> bool {
    let needs_left = keyword.chars().next().is_some_and(char::is_alphanumeric);
    let needs_right = keyword.chars().last().is_some_and(char::is_alphanumeric);

    let left_ok = !needs_left
        || haystack[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
    let right_ok = !needs_right
        || haystack[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());

    left_ok && right_ok
}
