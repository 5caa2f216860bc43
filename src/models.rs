use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SectionGroup {
    Daily,
    Weekly,
    Extra,
}

impl SectionGroup {
    pub const ALL: [SectionGroup; 3] = [
        SectionGroup::Daily,
        SectionGroup::Weekly,
        SectionGroup::Extra,
    ];

    pub fn as_label(self) -> &'static str {
        match self {
            SectionGroup::Daily => "daily",
            SectionGroup::Weekly => "weekly",
            SectionGroup::Extra => "extra",
        }
    }
}

/// One quota bucket as shown to the user.
///
/// The `id` only identifies a section within a single snapshot; every extraction
/// mints fresh ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageSection {
    pub id: Uuid,
    pub name: String,
    pub percent: u8,
    pub reset_info: String,
    pub group: SectionGroup,
}

impl UsageSection {
    pub fn new(
        name: impl Into<String>,
        percent: u8,
        reset_info: String,
        group: SectionGroup,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            percent: percent.min(100),
            reset_info,
            group,
        }
    }

    pub fn level(&self) -> UsageLevel {
        UsageLevel::from_percent(self.percent)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UsageLevel {
    Low,
    Elevated,
    Critical,
}

impl UsageLevel {
    pub fn from_percent(percent: u8) -> Self {
        match percent {
            0..=49 => UsageLevel::Low,
            50..=79 => UsageLevel::Elevated,
            _ => UsageLevel::Critical,
        }
    }
}

/// Everything an observer can see about the monitor at one point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub sections: Vec<UsageSection>,
    pub is_loading: bool,
    pub last_updated: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Snapshot {
    pub fn max_percent(&self) -> u8 {
        self.sections.iter().map(|s| s.percent).max().unwrap_or(0)
    }

    pub fn level(&self) -> UsageLevel {
        UsageLevel::from_percent(self.max_percent())
    }

    pub fn sections_in(&self, group: SectionGroup) -> impl Iterator<Item = &UsageSection> {
        self.sections.iter().filter(move |s| s.group == group)
    }
}
