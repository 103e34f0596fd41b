//! Network-free reply templates, used when the completion endpoint is
//! disabled, throttled or failing.

use super::intent::{self, EmailIntent};
use super::{ReplyRequest, SIGNATURE_PLACEHOLDER, Tone};

const DEFAULT_ADDRESSEE: &str = "there";

/// Capitalized words that open sentences or greetings rather than name someone
const NOT_A_NAME: &[&str] = &[
    "Hi", "Hello", "Hey", "Dear", "Greetings", "Good", "Morning", "Afternoon", "Evening",
    "Thanks", "Thank", "Regards", "Best", "Cheers", "Sincerely", "The", "This", "That", "These",
    "Those", "There", "Here", "We", "Our", "My", "Me", "You", "Your", "It", "Its", "Can", "Could",
    "Would", "Will", "Should", "Please", "Just", "Also", "So", "And", "But", "Or", "If", "As",
    "Re", "Fwd", "Regarding", "Yes", "No", "Sorry", "Unfortunately", "What", "When", "Where",
    "Why", "How", "Which", "Who", "Is", "Are", "Do", "Does", "Did", "Let", "Looking", "Hope",
    "Mr", "Mrs", "Ms", "Dr", "Prof", "Sir", "Madam", "Monday", "Tuesday", "Wednesday",
    "Thursday", "Friday", "Saturday", "Sunday",
];

/// Rule-based reply generator. Pure and infallible.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineTemplateEngine;

impl OfflineTemplateEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, request: &ReplyRequest) -> String {
        let intent = intent::classify(request.email_text());
        let addressee = extract_addressee(request.email_text());
        let template = select_template(request.tone(), intent);
        let signature = request.sender_name().unwrap_or(SIGNATURE_PLACEHOLDER);

        tracing::debug!(
            "Offline template: tone={} intent={}",
            request.tone(),
            intent
        );

        template
            .replace("{name}", &addressee)
            .replace("{signature}", signature)
    }
}

/// First capitalized word that plausibly names a person
pub fn extract_addressee(text: &str) -> String {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .find(|word| looks_like_name(word))
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_ADDRESSEE.to_string())
}

fn looks_like_name(word: &str) -> bool {
    let mut chars = word.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    let rest = chars.as_str();

    first.is_ascii_uppercase()
        && !rest.is_empty()
        && rest.chars().all(|c| c.is_ascii_lowercase() || c == '\'' || c == '-')
        && rest.chars().any(|c| c.is_ascii_lowercase())
        && !NOT_A_NAME.contains(&word)
}

/// Template for (tone, intent), falling back to the tone's general template,
/// then to the professional table.
fn select_template(tone: Tone, intent: EmailIntent) -> &'static str {
    template(tone, intent)
        .or_else(|| template(tone, EmailIntent::General))
        .or_else(|| template(Tone::Professional, intent))
        .unwrap_or(PROFESSIONAL_GENERAL)
}

const PROFESSIONAL_GENERAL: &str = "Dear {name},\n\n\
Thank you for your email. I have received your message and will review it carefully. \
I will get back to you with a detailed response shortly.\n\n\
Best regards,\n{signature}";

fn template(tone: Tone, intent: EmailIntent) -> Option<&'static str> {
    use EmailIntent::*;

    let text = match (tone, intent) {
        (Tone::Professional, MeetingRequest) => {
            "Dear {name},\n\n\
             Thank you for reaching out about meeting. I would be glad to find a time that works. \
             Please let me know a few slots that suit you and I will confirm one promptly.\n\n\
             Best regards,\n{signature}"
        }
        (Tone::Professional, Question) => {
            "Dear {name},\n\n\
             Thank you for your question. I am looking into this and will follow up with a \
             complete answer as soon as possible.\n\n\
             Best regards,\n{signature}"
        }
        (Tone::Professional, Complaint) => {
            "Dear {name},\n\n\
             Thank you for bringing this to my attention, and I apologize for the inconvenience. \
             I am reviewing the matter now and will work to resolve it quickly. \
             I will update you as soon as I have more information.\n\n\
             Best regards,\n{signature}"
        }
        (Tone::Professional, Request) => {
            "Dear {name},\n\n\
             Thank you for your request. I have noted the details and will take care of it. \
             I will let you know once it is complete.\n\n\
             Best regards,\n{signature}"
        }
        (Tone::Professional, ThankYou) => {
            "Dear {name},\n\n\
             Thank you for your kind message. I truly appreciate it, and it was a pleasure \
             working with you.\n\n\
             Best regards,\n{signature}"
        }
        (Tone::Professional, General) => PROFESSIONAL_GENERAL,

        (Tone::Friendly, MeetingRequest) => {
            "Hi {name},\n\n\
             Thanks for reaching out! I'd love to connect. \
             Send over a couple of times that work for you and I'll make one of them happen.\n\n\
             Talk soon,\n{signature}"
        }
        (Tone::Friendly, Question) => {
            "Hi {name},\n\n\
             Great question! Let me look into it and I'll get back to you with an answer \
             very soon.\n\n\
             Cheers,\n{signature}"
        }
        (Tone::Friendly, Complaint) => {
            "Hi {name},\n\n\
             I'm really sorry to hear about this, and thanks for letting me know. \
             I'm on it and will do my best to sort it out quickly.\n\n\
             Thanks for your patience,\n{signature}"
        }
        (Tone::Friendly, Request) => {
            "Hi {name},\n\n\
             Thanks for your note! Happy to help with this. \
             I'll take care of it and let you know when it's done.\n\n\
             Cheers,\n{signature}"
        }
        (Tone::Friendly, ThankYou) => {
            "Hi {name},\n\n\
             Thank you so much, that really made my day! \
             It was a pleasure, and I'm always happy to help.\n\n\
             Warmly,\n{signature}"
        }
        (Tone::Friendly, General) => {
            "Hi {name},\n\n\
             Thanks for your message! I appreciate you reaching out and will get back to you \
             soon.\n\n\
             Best,\n{signature}"
        }

        (Tone::Casual, MeetingRequest) => {
            "Hey {name},\n\n\
             Sure, let's find a time. What works for you?\n\n\
             {signature}"
        }
        (Tone::Casual, Question) => {
            "Hey {name},\n\n\
             Good question, let me check and get back to you.\n\n\
             {signature}"
        }
        (Tone::Casual, Complaint) => {
            "Hey {name},\n\n\
             Sorry about that! Thanks for the heads up, I'll look into it right away.\n\n\
             {signature}"
        }
        (Tone::Casual, Request) => {
            "Hey {name},\n\n\
             No problem, I'll take care of it.\n\n\
             {signature}"
        }
        (Tone::Casual, ThankYou) => {
            "Hey {name},\n\n\
             Anytime! Glad I could help.\n\n\
             {signature}"
        }
        (Tone::Casual, General) => {
            "Hey {name},\n\n\
             Got your message, thanks! I'll get back to you soon.\n\n\
             {signature}"
        }

        (Tone::Formal, MeetingRequest) => {
            "Dear {name},\n\n\
             Thank you for your correspondence regarding a meeting. \
             I would be pleased to arrange a suitable time. \
             Kindly advise me of your availability at your earliest convenience.\n\n\
             Yours sincerely,\n{signature}"
        }
        (Tone::Formal, Complaint) => {
            "Dear {name},\n\n\
             Please accept my sincere apologies for the difficulties you have experienced. \
             I have received your concerns and the matter is under review. \
             I shall inform you of the outcome without delay.\n\n\
             Yours sincerely,\n{signature}"
        }
        (Tone::Formal, General) => {
            "Dear {name},\n\n\
             I acknowledge receipt of your correspondence. \
             I shall give it due consideration and respond in full in due course.\n\n\
             Yours sincerely,\n{signature}"
        }

        (Tone::Apologetic, Complaint) => {
            "Dear {name},\n\n\
             I am truly sorry for the trouble this has caused you. \
             You are right to raise it, and I take full responsibility for putting it right. \
             I will follow up shortly with the steps I am taking.\n\n\
             With apologies,\n{signature}"
        }
        (Tone::Apologetic, General) => {
            "Dear {name},\n\n\
             Thank you for your message, and I apologize for any delay in getting back to you. \
             I will respond in full as soon as I can.\n\n\
             With apologies,\n{signature}"
        }

        _ => return None,
    };

    Some(text)
}
