//! Activity, extension-family and assessment-component identifiers shared by
//! every layer.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// ActivityType
// ---------------------------------------------------------------------------

/// Gradable activity kinds that can carry schedule overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Assign,
    Quiz,
    Coursework,
    Lesson,
    Lti,
    Turnitin,
}

impl ActivityType {
    /// Every supported activity type, in registry order.
    pub const ALL: [ActivityType; 6] = [
        ActivityType::Assign,
        ActivityType::Quiz,
        ActivityType::Coursework,
        ActivityType::Lesson,
        ActivityType::Lti,
        ActivityType::Turnitin,
    ];

    /// String representation for database storage and REST paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Assign => "assign",
            ActivityType::Quiz => "quiz",
            ActivityType::Coursework => "coursework",
            ActivityType::Lesson => "lesson",
            ActivityType::Lti => "lti",
            ActivityType::Turnitin => "turnitintooltwo",
        }
    }

    /// Parse a stored activity type. Unknown values return `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assign" => Some(ActivityType::Assign),
            "quiz" => Some(ActivityType::Quiz),
            "coursework" => Some(ActivityType::Coursework),
            "lesson" => Some(ActivityType::Lesson),
            "lti" => Some(ActivityType::Lti),
            "turnitintooltwo" | "turnitin" => Some(ActivityType::Turnitin),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ExtensionFamily
// ---------------------------------------------------------------------------

/// The two extension families tracked by the override ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionFamily {
    /// Reasonable adjustments (RAA/SORA), applied through groups.
    Raa,
    /// Extenuating circumstances, applied per user.
    Ec,
}

impl ExtensionFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionFamily::Raa => "raa",
            ExtensionFamily::Ec => "ec",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raa" | "sora" => Some(ExtensionFamily::Raa),
            "ec" => Some(ExtensionFamily::Ec),
            _ => None,
        }
    }
}

impl fmt::Display for ExtensionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OverrideSubject
// ---------------------------------------------------------------------------

/// Who an override applies to. A ledger row has exactly one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum OverrideSubject {
    User(DbId),
    Group(DbId),
}

impl OverrideSubject {
    /// Build a subject from the nullable `(user_id, group_id)` column pair.
    ///
    /// Returns `None` unless exactly one of the two is set.
    pub fn from_columns(user_id: Option<DbId>, group_id: Option<DbId>) -> Option<Self> {
        match (user_id, group_id) {
            (Some(u), None) => Some(OverrideSubject::User(u)),
            (None, Some(g)) => Some(OverrideSubject::Group(g)),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<DbId> {
        match self {
            OverrideSubject::User(id) => Some(*id),
            OverrideSubject::Group(_) => None,
        }
    }

    pub fn group_id(&self) -> Option<DbId> {
        match self {
            OverrideSubject::Group(id) => Some(*id),
            OverrideSubject::User(_) => None,
        }
    }
}

impl fmt::Display for OverrideSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideSubject::User(id) => write!(f, "user:{id}"),
            OverrideSubject::Group(id) => write!(f, "group:{id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// ComponentRef
// ---------------------------------------------------------------------------

/// A SITS assessment component, identified by map code and MAB sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentRef {
    pub map_code: String,
    pub mab_seq: String,
}

/// `MAPCODE-SEQ`, with a three-digit sequence.
static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9]+)-([0-9]{3})$").expect("valid regex"));

impl ComponentRef {
    pub fn new(map_code: impl Into<String>, mab_seq: impl Into<String>) -> Self {
        Self {
            map_code: map_code.into(),
            mab_seq: mab_seq.into(),
        }
    }

    /// Parse an EC identifier such as `LAWS0024A6UF-001`.
    pub fn parse_identifier(identifier: &str) -> Result<Self, CoreError> {
        let caps = IDENTIFIER_RE
            .captures(identifier.trim())
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Invalid assessment component identifier '{identifier}'"
                ))
            })?;
        Ok(Self::new(&caps[1], &caps[2]))
    }
}

impl fmt::Display for ComponentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.map_code, self.mab_seq)
    }
}
