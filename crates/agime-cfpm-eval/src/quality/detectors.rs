//! Named content predicates used by the quality checks.

use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;

/// Bare calendar date such as `2024/03/01` or `2024-3-1`.
pub const DATE_ONLY: &str = "date_only";
/// Plain `<drive>:\Users\<name>\Desktop` path, a commonly wrong guess.
pub const PLAIN_DESKTOP_PATH: &str = "plain_desktop_path";
/// Shell command that re-discovers the user's folders.
pub const PROBE_COMMAND: &str = "probe_command";

const DATE_ONLY_PATTERN: &str = r"^\d{4}[./-]\d{1,2}[./-]\d{1,2}$";
const PLAIN_DESKTOP_PATTERN: &str = r"^[A-Za-z]:\\Users\\[^\\]+\\Desktop\\?$";

pub const PROBE_MARKERS: [&str; 6] = [
    "$env:USERPROFILE",
    "%USERPROFILE%",
    "GetFolderPath('Desktop')",
    "User Shell Folders",
    "Test-Path",
    "Get-ChildItem C:\\Users",
];

pub trait ContentDetector: Send + Sync {
    /// Whether `text` (already trimmed by the caller) matches.
    fn matches(&self, text: &str) -> bool;
}

pub struct PatternDetector {
    regex: Regex,
}

impl PatternDetector {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn case_insensitive(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: RegexBuilder::new(pattern).case_insensitive(true).build()?,
        })
    }
}

impl ContentDetector for PatternDetector {
    fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Case-insensitive substring search over a fixed marker list.
pub struct MarkerDetector {
    markers: Vec<String>,
}

impl MarkerDetector {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|marker| marker.as_ref().to_lowercase())
                .collect(),
        }
    }
}

impl ContentDetector for MarkerDetector {
    fn matches(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.markers.iter().any(|marker| lowered.contains(marker.as_str()))
    }
}

/// Rule name to detector. A rule that is not registered never matches.
pub struct DetectorSet {
    rules: BTreeMap<String, Box<dyn ContentDetector>>,
}

impl DetectorSet {
    pub fn empty() -> Self {
        Self {
            rules: BTreeMap::new(),
        }
    }

    /// Registers `detector` under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, detector: Box<dyn ContentDetector>) {
        self.rules.insert(name.into(), detector);
    }

    pub fn with(mut self, name: impl Into<String>, detector: Box<dyn ContentDetector>) -> Self {
        self.insert(name, detector);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Box<dyn ContentDetector>> {
        self.rules.remove(name)
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn matches(&self, rule: &str, text: &str) -> bool {
        self.rules
            .get(rule)
            .is_some_and(|detector| detector.matches(text.trim()))
    }
}

impl Default for DetectorSet {
    fn default() -> Self {
        let mut set = Self::empty();
        // Both patterns are constants.
        if let Ok(detector) = PatternDetector::new(DATE_ONLY_PATTERN) {
            set.insert(DATE_ONLY, Box::new(detector));
        }
        if let Ok(detector) = PatternDetector::case_insensitive(PLAIN_DESKTOP_PATTERN) {
            set.insert(PLAIN_DESKTOP_PATH, Box::new(detector));
        }
        set.insert(PROBE_COMMAND, Box::new(MarkerDetector::new(PROBE_MARKERS)));
        set
    }
}

impl std::fmt::Debug for DetectorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.rules.keys()).finish()
    }
}
