use crate::fetcher::RawDocument;
use crate::models::{SectionGroup, UsageSection};
use chrono::{DateTime, Local, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;

pub struct BucketConfig {
    pub key: &'static str,
    pub name: &'static str,
    pub group: SectionGroup,
}

/// Buckets with a curated display name. Several keys alias the same bucket
/// because the API has shipped both spellings.
pub const KNOWN_BUCKETS: &[BucketConfig] = &[
    BucketConfig {
        key: "five_hour",
        name: "Session",
        group: SectionGroup::Daily,
    },
    BucketConfig {
        key: "extra_usage",
        name: "Extra usage",
        group: SectionGroup::Extra,
    },
    BucketConfig {
        key: "seven_day",
        name: "All models",
        group: SectionGroup::Weekly,
    },
    BucketConfig {
        key: "seven_day_sonnet",
        name: "Sonnet",
        group: SectionGroup::Weekly,
    },
    BucketConfig {
        key: "sonnet_seven_day",
        name: "Sonnet",
        group: SectionGroup::Weekly,
    },
    BucketConfig {
        key: "seven_day_haiku",
        name: "Haiku",
        group: SectionGroup::Weekly,
    },
    BucketConfig {
        key: "haiku_seven_day",
        name: "Haiku",
        group: SectionGroup::Weekly,
    },
    BucketConfig {
        key: "seven_day_opus",
        name: "Opus",
        group: SectionGroup::Weekly,
    },
    BucketConfig {
        key: "opus_seven_day",
        name: "Opus",
        group: SectionGroup::Weekly,
    },
];

pub fn extract(doc: &RawDocument) -> Vec<UsageSection> {
    extract_at(doc, Utc::now())
}

/// Builds sections from a usage document, evaluating reset times against `now`.
///
/// Known buckets come first in table order, then any other object carrying a
/// `utilization` field in document order. Missing or malformed fields fall back
/// to 0% and an empty reset label.
pub fn extract_at(doc: &RawDocument, now: DateTime<Utc>) -> Vec<UsageSection> {
    let mut sections = Vec::new();
    let mut handled: HashSet<&str> = HashSet::new();

    for bucket in KNOWN_BUCKETS {
        if let Some(Value::Object(fields)) = doc.get(bucket.key) {
            handled.insert(bucket.key);
            sections.push(parse_bucket(bucket.name, bucket.group, fields, now));
        }
    }

    for (key, value) in doc {
        if handled.contains(key.as_str()) {
            continue;
        }
        let Value::Object(fields) = value else {
            continue;
        };
        if !fields.contains_key("utilization") {
            continue;
        }

        let group = if key.contains("seven_day") {
            SectionGroup::Weekly
        } else {
            SectionGroup::Daily
        };
        sections.push(parse_bucket(&display_name(key), group, fields, now));
    }

    sections
}

fn parse_bucket(
    name: &str,
    group: SectionGroup,
    fields: &Map<String, Value>,
    now: DateTime<Utc>,
) -> UsageSection {
    let utilization = fields
        .get("utilization")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let reset_info = format_reset(fields.get("resets_at").and_then(Value::as_str), now);
    UsageSection::new(name, truncate_percent(utilization), reset_info, group)
}

fn truncate_percent(utilization: f64) -> u8 {
    if utilization.is_nan() {
        return 0;
    }
    utilization.trunc().clamp(0.0, 100.0) as u8
}

/// `"seven_day_oauth_apps"` -> `"Seven Day Oauth Apps"`.
fn display_name(key: &str) -> String {
    key.replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// RFC 3339 with or without fractional seconds; an offset is required.
fn parse_reset_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

pub fn format_reset(raw: Option<&str>, now: DateTime<Utc>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return String::new();
    };
    let Some(reset_at) = parse_reset_timestamp(raw) else {
        return String::new();
    };

    if reset_at <= now {
        return "Reset now".into();
    }

    let diff = (reset_at - now).num_seconds();

    let hours = diff / 3600;
    let mins = (diff % 3600) / 60;
    if hours >= 24 {
        let local = reset_at.with_timezone(&Local);
        format!("Resets {}", local.format("%a %-I:%M %p"))
    } else if hours > 0 {
        format!("Resets in {hours}h {mins}m")
    } else {
        format!("Resets in {mins}m")
    }
}
