//! Pulling structured fields out of free-text agent replies.

use crate::domain::Action;

const PROPOSAL_MARKER: &str = "FINAL TRANSACTION PROPOSAL";

/// Extract the final BUY/SELL/HOLD call from a reply.
///
/// Looks after the last `FINAL TRANSACTION PROPOSAL` marker first; without a
/// marker, the last standalone action word in the text wins.
pub fn extract_action(text: &str) -> Option<Action> {
    let upper = text.to_ascii_uppercase();
    if let Some(pos) = upper.rfind(PROPOSAL_MARKER) {
        let tail = &upper[pos + PROPOSAL_MARKER.len()..];
        if let Some(action) = words(tail).find_map(|w| w.parse::<Action>().ok()) {
            return Some(action);
        }
    }
    let last = words(&upper)
        .rev()
        .find(|w| matches!(*w, "BUY" | "SELL" | "HOLD"))
        .and_then(|w| w.parse().ok());
    last
}

/// Extract a number following `label` (e.g. `CONFIDENCE: 0.7`). Percentages
/// are converted to fractions.
pub fn extract_number(text: &str, label: &str) -> Option<f64> {
    let upper = text.to_ascii_uppercase();
    let label = label.to_ascii_uppercase();
    let pos = upper.rfind(&label)?;
    let tail = &text[pos + label.len()..];
    let start = tail.find(|c: char| c.is_ascii_digit() || c == '-' || c == '.')?;
    let digits: String = tail[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    let value: f64 = digits.parse().ok()?;
    let is_percent = tail[start + digits.len()..].trim_start().starts_with('%');
    Some(if is_percent { value / 100.0 } else { value })
}

pub fn extract_confidence(text: &str) -> Option<f64> {
    extract_number(text, "CONFIDENCE").map(|c| c.clamp(0.0, 1.0))
}

/// Whether the reply signals acceptance of the other side's position.
pub fn signals_consensus(text: &str) -> bool {
    let upper = text.to_ascii_uppercase();
    let agreed = words(&upper).any(|w| w == "CONSENSUS" || w == "CONCEDE");
    agreed
}

fn words(text: &str) -> impl DoubleEndedIterator<Item = &str> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
}
