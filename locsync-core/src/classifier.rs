//! Location code classification.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Location category for one day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationStatus {
    Home,
    Vacation,
    Office,
    Library,
    Unknown,
}

impl LocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationStatus::Home => "Home",
            LocationStatus::Vacation => "Vacation",
            LocationStatus::Office => "Office",
            LocationStatus::Library => "Library",
            LocationStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for LocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Home" => Ok(LocationStatus::Home),
            "Vacation" => Ok(LocationStatus::Vacation),
            "Office" => Ok(LocationStatus::Office),
            "Library" => Ok(LocationStatus::Library),
            "Unknown" => Ok(LocationStatus::Unknown),
            other => Err(format!("Unknown location status '{other}'")),
        }
    }
}

fn default_home() -> String {
    "^HOM$".into()
}

fn default_vacation() -> String {
    "^V$".into()
}

fn default_office() -> String {
    r"^P\d{2}[A-Z]+\d{3}$".into()
}

fn default_library() -> String {
    "^LIB.*".into()
}

/// Regex patterns for each category, checked in declaration order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierPatterns {
    #[serde(default = "default_home")]
    pub home: String,
    #[serde(default = "default_vacation")]
    pub vacation: String,
    /// Building + room code, e.g. P12GRAN303
    #[serde(default = "default_office")]
    pub office: String,
    #[serde(default = "default_library")]
    pub library: String,
}

impl Default for ClassifierPatterns {
    fn default() -> Self {
        ClassifierPatterns {
            home: default_home(),
            vacation: default_vacation(),
            office: default_office(),
            library: default_library(),
        }
    }
}

/// Maps a location code to its [`LocationStatus`].
#[derive(Debug, Clone)]
pub struct StatusClassifier {
    rules: Vec<(Regex, LocationStatus)>,
}

impl StatusClassifier {
    pub fn new(patterns: &ClassifierPatterns) -> Result<Self, regex::Error> {
        let rules = vec![
            (Regex::new(&patterns.home)?, LocationStatus::Home),
            (Regex::new(&patterns.vacation)?, LocationStatus::Vacation),
            (Regex::new(&patterns.office)?, LocationStatus::Office),
            (Regex::new(&patterns.library)?, LocationStatus::Library),
        ];
        Ok(StatusClassifier { rules })
    }

    /// First matching rule wins; anything unmatched is `Unknown`.
    pub fn classify(&self, code: &str) -> LocationStatus {
        let code = code.trim();
        self.rules
            .iter()
            .find(|(re, _)| re.is_match(code))
            .map(|(_, status)| *status)
            .unwrap_or(LocationStatus::Unknown)
    }
}

impl Default for StatusClassifier {
    fn default() -> Self {
        // The built-in patterns are known to compile
        Self::new(&ClassifierPatterns::default()).unwrap_or(StatusClassifier { rules: Vec::new() })
    }
}

fn default_home_color() -> String {
    "3".into()
}

fn default_vacation_color() -> String {
    "10".into()
}

fn default_office_color() -> String {
    "5".into()
}

fn default_library_color() -> String {
    "2".into()
}

fn default_unknown_color() -> String {
    "8".into()
}

/// Calendar color id per category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPalette {
    #[serde(default = "default_home_color")]
    pub home: String,
    #[serde(default = "default_vacation_color")]
    pub vacation: String,
    #[serde(default = "default_office_color")]
    pub office: String,
    #[serde(default = "default_library_color")]
    pub library: String,
    #[serde(default = "default_unknown_color")]
    pub unknown: String,
}

impl Default for ColorPalette {
    fn default() -> Self {
        ColorPalette {
            home: default_home_color(),
            vacation: default_vacation_color(),
            office: default_office_color(),
            library: default_library_color(),
            unknown: default_unknown_color(),
        }
    }
}

impl ColorPalette {
    pub fn color_for(&self, status: LocationStatus) -> &str {
        match status {
            LocationStatus::Home => &self.home,
            LocationStatus::Vacation => &self.vacation,
            LocationStatus::Office => &self.office,
            LocationStatus::Library => &self.library,
            LocationStatus::Unknown => &self.unknown,
        }
    }
}
