use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::platform::{Entity, EntityRef, Transport};

/// Prefix that the Bot API puts in front of supergroup and channel ids
pub const SUPERGROUP_PREFIX: &str = "-100";

/// Which equivalence test accepted a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRule {
    Exact,
    Absolute,
    PrefixedCandidate,
    PrefixedSpec,
    Username,
}

/// Test one configured spec against a chat, trying each encoding in turn.
pub fn spec_matches(spec: &str, chat_id: i64, username: Option<&str>) -> Option<MatchRule> {
    let spec = spec.trim();
    let id = chat_id.to_string();
    let abs = chat_id.unsigned_abs().to_string();

    if spec == id {
        return Some(MatchRule::Exact);
    }
    if spec == abs {
        return Some(MatchRule::Absolute);
    }
    if let Some(stripped) = id.strip_prefix(SUPERGROUP_PREFIX) {
        if spec == stripped {
            return Some(MatchRule::PrefixedCandidate);
        }
    }
    if let Some(stripped) = spec.strip_prefix(SUPERGROUP_PREFIX) {
        if stripped == abs {
            return Some(MatchRule::PrefixedSpec);
        }
    }
    if spec.starts_with('@') {
        if let Some(name) = username {
            if spec == format!("@{}", name) {
                return Some(MatchRule::Username);
            }
        }
    }
    None
}

/// True if any spec identifies the chat; the first matching spec wins
pub fn matches(specs: &[String], chat_id: i64, username: Option<&str>) -> bool {
    for spec in specs {
        if let Some(rule) = spec_matches(spec, chat_id, username) {
            debug!("Chat {} matched monitored group {} ({:?})", chat_id, spec, rule);
            return true;
        }
    }
    false
}

/// Interpretations of a spec to try against the transport, in order
pub fn candidate_refs(spec: &str) -> Vec<(&'static str, EntityRef)> {
    let spec = spec.trim();
    if spec.starts_with('@') {
        return vec![("username", EntityRef::Username(spec.to_string()))];
    }

    let base = spec.trim_matches('-');
    let mut forms: Vec<(&'static str, String)> = vec![
        ("original", spec.to_string()),
        ("positive", base.to_string()),
        ("negative", format!("-{}", base)),
        ("supergroup", format!("{}{}", SUPERGROUP_PREFIX, base)),
    ];
    if let Some(stripped) = spec.strip_prefix(SUPERGROUP_PREFIX) {
        forms.push(("prefix_stripped", stripped.to_string()));
        forms.push(("prefix_stripped_negative", format!("-{}", stripped)));
    }

    let mut refs: Vec<(&'static str, EntityRef)> = Vec::new();
    for (label, form) in forms {
        match form.parse::<i64>() {
            Ok(id) => {
                if !refs.iter().any(|(_, r)| *r == EntityRef::Id(id)) {
                    refs.push((label, EntityRef::Id(id)));
                }
            }
            Err(_) => debug!("Skipping {} form '{}' of '{}': not numeric", label, form, spec),
        }
    }
    refs
}

/// Resolve a spec to a group or channel, trying each interpretation until one
/// resolves to a group-like entity.
pub async fn resolve_and_canonicalize<T>(transport: &T, spec: &str) -> Option<Entity>
where
    T: Transport + ?Sized,
{
    let mut tried = Vec::new();
    for (label, target) in candidate_refs(spec) {
        tried.push(format!("{}({})", label, target));
        match transport.resolve_entity(&target).await {
            Ok(entity) if entity.kind.is_group_like() => {
                info!(
                    "Resolved '{}' via {} form: {} (ID: {})",
                    spec,
                    label,
                    entity.title.as_deref().unwrap_or("untitled"),
                    entity.id
                );
                return Some(entity);
            }
            Ok(entity) => {
                debug!("{} form of '{}' is {:?}, not a group", label, spec, entity.kind);
            }
            Err(e) => debug!("{} form of '{}' failed: {}", label, spec, e),
        }
    }
    warn!("Could not resolve monitored group '{}'; tried: {}", spec, tried.join(", "));
    None
}

/// The configured set of monitored groups
#[derive(Debug, Clone, Default)]
pub struct MonitoredGroups {
    specs: Vec<String>,
    titles: HashMap<i64, String>,
}

impl MonitoredGroups {
    pub fn new(specs: Vec<String>) -> Self {
        Self {
            specs: specs.into_iter().map(|s| s.trim().to_string()).collect(),
            titles: HashMap::new(),
        }
    }

    pub fn specs(&self) -> &[String] {
        &self.specs
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn matches(&self, chat_id: i64, username: Option<&str>) -> bool {
        matches(&self.specs, chat_id, username)
    }

    /// Title recorded during resolution for the group this chat belongs to
    pub fn title_for(&self, chat_id: i64) -> Option<&str> {
        self.titles
            .iter()
            .find(|(id, _)| spec_matches(&id.to_string(), chat_id, None).is_some())
            .map(|(_, title)| title.as_str())
    }

    /// Replace every spec with its canonical id, dropping the ones that do not
    /// resolve. The set only shrinks. Returns the unresolved specs.
    pub async fn resolve_all<T>(&mut self, transport: &T) -> Vec<String>
    where
        T: Transport + ?Sized,
    {
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();

        for spec in std::mem::take(&mut self.specs) {
            match resolve_and_canonicalize(transport, &spec).await {
                Some(entity) => {
                    let canonical = entity.id.to_string();
                    if canonical != spec {
                        info!("Monitored group '{}' canonicalized to {}", spec, canonical);
                    }
                    if let Some(title) = entity.title {
                        self.titles.insert(entity.id, title);
                    }
                    if !resolved.contains(&canonical) {
                        resolved.push(canonical);
                    }
                }
                None => unresolved.push(spec),
            }
        }

        self.specs = resolved;
        unresolved
    }
}
