//! Post-processing of model output: preamble stripping and signature substitution

use super::SIGNATURE_PLACEHOLDER;

/// Lead-in phrases models prepend despite being told not to.
/// Matched case-sensitively as prefixes, in this order.
const PREAMBLE_PHRASES: &[&str] = &[
    "Here is a potential reply to the email:",
    "Here is a possible reply to the email:",
    "Here's a potential reply to the email:",
    "Here's a possible reply to the email:",
    "Here is a reply to the email:",
    "Here's a reply to the email:",
    "Here is a draft reply:",
    "Here's a draft reply:",
    "Here is the reply:",
    "Here's the reply:",
    "Here is my reply:",
    "Sure! Here's a reply:",
    "Sure, here's a reply:",
    "Reply:",
];

/// Placeholder spellings the model produces for a missing signature
const PLACEHOLDER_VARIANTS: &[&str] = &[SIGNATURE_PLACEHOLDER, "[Your name]", "[YOUR NAME]"];

pub fn sanitize(raw: &str, sender_name: Option<&str>) -> String {
    let mut text = raw.trim();

    // A second pass catches stacked lead-ins, so sanitizing twice is a no-op
    while let Some(rest) = strip_preamble(text) {
        text = rest.trim_start();
    }

    match sender_name {
        Some(name) => substitute_signature(text, name),
        None => text.to_string(),
    }
}

fn strip_preamble(text: &str) -> Option<&str> {
    PREAMBLE_PHRASES
        .iter()
        .find_map(|phrase| text.strip_prefix(phrase))
}

fn substitute_signature(text: &str, name: &str) -> String {
    PLACEHOLDER_VARIANTS
        .iter()
        .fold(text.to_string(), |acc, placeholder| {
            if acc.contains(placeholder) {
                acc.replace(placeholder, name)
            } else {
                acc
            }
        })
}
