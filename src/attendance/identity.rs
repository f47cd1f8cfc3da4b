use regex::{Regex, RegexBuilder};

use super::tracker::Attendee;
use crate::collab::AttendeeObservation;
use crate::config::IdentityConfig;
use crate::error::{OrchestratorError, Result};

const MAX_NAME_CHARS: usize = 100;

/// Decides which observed names are usable and which one is ourselves.
///
/// The collaborator's `bot_hint` is trusted first; the configured display
/// names and self markers (e.g. a "(You)" suffix) cover collaborators that
/// cannot tell.
#[derive(Debug, Clone)]
pub struct IdentityPolicy {
    display_names: Vec<String>,
    self_markers: Option<Regex>,
    ignored: Vec<String>,
}

impl IdentityPolicy {
    pub fn new(config: &IdentityConfig) -> Self {
        let markers: Vec<String> = config
            .self_markers
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(regex::escape)
            .collect();

        let self_markers = if markers.is_empty() {
            None
        } else {
            RegexBuilder::new(&markers.join("|"))
                .case_insensitive(true)
                .build()
                .ok()
        };

        Self {
            display_names: config.display_names.iter().map(|n| name_key(n)).collect(),
            self_markers,
            ignored: config.ignored_names.iter().map(|n| name_key(n)).collect(),
        }
    }

    /// Raw name carries one of the self markers
    pub fn has_self_marker(&self, raw: &str) -> bool {
        self.self_markers
            .as_ref()
            .map(|re| re.is_match(raw))
            .unwrap_or(false)
    }

    /// Name matches one of our configured display names
    pub fn is_own_name(&self, name: &str) -> bool {
        let key = name_key(name);
        self.display_names.iter().any(|n| *n == key)
    }

    pub fn is_self(&self, raw: &str, display: &str, hint: bool) -> bool {
        hint || self.has_self_marker(raw) || self.is_own_name(display)
    }

    /// Strip self markers and tidy whitespace; reject names no human has.
    pub fn display_name(&self, raw: &str) -> Result<String> {
        let stripped = match &self.self_markers {
            Some(re) => re.replace_all(raw, " ").into_owned(),
            None => raw.to_string(),
        };
        let display = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

        if display.is_empty() {
            return Err(OrchestratorError::ValidationFailed(format!(
                "empty participant name from '{}'",
                raw
            )));
        }
        if display.chars().count() > MAX_NAME_CHARS {
            return Err(OrchestratorError::ValidationFailed(format!(
                "participant name longer than {} characters",
                MAX_NAME_CHARS
            )));
        }
        if !display.chars().any(char::is_alphabetic) {
            return Err(OrchestratorError::ValidationFailed(format!(
                "participant name '{}' has no letters",
                display
            )));
        }
        if self.ignored.contains(&name_key(&display)) {
            return Err(OrchestratorError::ValidationFailed(format!(
                "'{}' is an ignored name",
                display
            )));
        }
        Ok(display)
    }

    pub fn attendee(&self, observation: &AttendeeObservation) -> Result<Attendee> {
        let display_name = self.display_name(&observation.raw_name)?;
        let is_self = self.is_self(&observation.raw_name, &display_name, observation.bot_hint);
        Ok(Attendee {
            key: name_key(&display_name),
            display_name,
            original_name: observation.raw_name.trim().to_string(),
            is_self,
            role: observation.role_hint,
            speaking: observation.speaking,
        })
    }
}

/// Normalized identity used as the participant-history key
pub fn name_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> IdentityPolicy {
        IdentityPolicy::new(&IdentityConfig {
            display_names: vec!["Meeting Bot".to_string()],
            self_markers: vec!["(you)".to_string()],
            ignored_names: vec!["Backgrounds and effects".to_string()],
        })
    }

    #[test]
    fn test_marker_is_stripped_and_flags_self() {
        let p = policy();
        let obs = AttendeeObservation::named("Alex Kim (You)");
        let attendee = p.attendee(&obs).unwrap();
        assert_eq!(attendee.display_name, "Alex Kim");
        assert_eq!(attendee.original_name, "Alex Kim (You)");
        assert_eq!(attendee.key, "alex kim");
        assert!(attendee.is_self);
    }

    #[test]
    fn test_configured_name_is_self_case_insensitively() {
        let p = policy();
        let attendee = p.attendee(&AttendeeObservation::named("  meeting   BOT ")).unwrap();
        assert!(attendee.is_self);
        assert_eq!(attendee.display_name, "meeting BOT");
    }

    #[test]
    fn test_collaborator_hint_wins() {
        let p = policy();
        let obs = AttendeeObservation {
            raw_name: "Recorder".to_string(),
            bot_hint: true,
            ..Default::default()
        };
        assert!(p.attendee(&obs).unwrap().is_self);
        assert!(!p.attendee(&AttendeeObservation::named("Dana")).unwrap().is_self);
    }

    #[test]
    fn test_rejects_unusable_names() {
        let p = policy();
        for raw in ["", "   ", "(You)", "12345", "backgrounds and EFFECTS"] {
            assert!(
                matches!(
                    p.attendee(&AttendeeObservation::named(raw)),
                    Err(OrchestratorError::ValidationFailed(_))
                ),
                "expected '{}' to be rejected",
                raw
            );
        }
        assert!(p.attendee(&AttendeeObservation::named("x".repeat(101))).is_err());
    }

    #[test]
    fn test_no_markers_configured() {
        let p = IdentityPolicy::new(&IdentityConfig {
            display_names: Vec::new(),
            self_markers: Vec::new(),
            ignored_names: Vec::new(),
        });
        let attendee = p.attendee(&AttendeeObservation::named("Sam (You)")).unwrap();
        assert_eq!(attendee.display_name, "Sam (You)");
        assert!(!attendee.is_self);
    }
}
