use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

/// Trim and collapse internal whitespace runs to a single space.
pub fn normalize_query(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn device_pattern() -> &'static Regex {
    static DEVICE_ID: OnceLock<Regex> = OnceLock::new();
    DEVICE_ID.get_or_init(|| {
        Regex::new(r"[a-fA-F0-9]{8}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{4}-[a-fA-F0-9]{12}")
            .expect("device id pattern is valid")
    })
}

/// First device UUID (8-4-4-4-12 hex) in the text.
pub fn extract_device_id(text: &str) -> Option<String> {
    device_pattern().find(text).map(|m| m.as_str().to_string())
}

/// Resolves room aliases in free text to official room names.
#[derive(Debug, Clone)]
pub struct RoomResolver {
    /// (lowercased alias, official name), longest alias first.
    aliases: Vec<(String, String)>,
}

impl RoomResolver {
    pub fn new(aliases: &BTreeMap<String, String>) -> Self {
        let mut aliases: Vec<(String, String)> = aliases
            .iter()
            .filter(|(alias, _)| !alias.trim().is_empty())
            .map(|(alias, official)| (alias.trim().to_lowercase(), official.clone()))
            .collect();
        // "server room" must win over a shorter alias it contains
        aliases.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()).then(a.0.cmp(&b.0)));
        Self { aliases }
    }

    /// Case-insensitive substring match; the longest matching alias wins.
    pub fn resolve(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        self.aliases
            .iter()
            .find(|(alias, _)| lowered.contains(alias.as_str()))
            .map(|(_, official)| official.clone())
    }
}
