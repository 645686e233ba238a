use crate::error::Result;
use crate::storage::models::{Drive, MediaKind, RuleKind, UserRule};
use crate::storage::Database;
use serde::Serialize;
use std::cmp::Ordering;

/// Media kinds a prefer-rule covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferScope {
    Movie,
    Tv,
    All,
}

impl PreferScope {
    pub fn applies_to(&self, kind: MediaKind) -> bool {
        match self {
            PreferScope::All => true,
            PreferScope::Movie => kind == MediaKind::Movie,
            PreferScope::Tv => kind == MediaKind::TvEpisode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriveRule {
    Deny { drive_id: i64 },
    Prefer { scope: PreferScope, drive_id: i64, priority: i64 },
}

impl From<&UserRule> for DriveRule {
    fn from(rule: &UserRule) -> Self {
        let drive_id = rule.drive_id;
        let priority = rule.priority;
        match rule.kind {
            RuleKind::Deny => DriveRule::Deny { drive_id },
            RuleKind::PreferMovie => DriveRule::Prefer { scope: PreferScope::Movie, drive_id, priority },
            RuleKind::PreferTv => DriveRule::Prefer { scope: PreferScope::Tv, drive_id, priority },
            RuleKind::PreferAll => DriveRule::Prefer { scope: PreferScope::All, drive_id, priority },
        }
    }
}

/// How a drive stands under the rule list for one media kind. Orders best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "standing", content = "rank", rename_all = "snake_case")]
pub enum DriveStanding {
    /// Position of the first matching prefer-rule in evaluation order.
    Preferred(usize),
    Neutral,
    Denied,
}

/// Rules in evaluation order (priority descending, then oldest first), read left to right.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<DriveRule>,
}

impl RuleSet {
    pub fn load(db: &Database) -> Result<Self> {
        Ok(Self::from_rules(&db.list_rules()?))
    }

    /// `rules` must already be in evaluation order.
    pub fn from_rules(rules: &[UserRule]) -> Self {
        Self {
            rules: rules.iter().map(DriveRule::from).collect(),
        }
    }

    pub fn rules(&self) -> &[DriveRule] {
        &self.rules
    }

    pub fn is_denied(&self, drive_id: i64) -> bool {
        self.rules
            .iter()
            .any(|rule| matches!(rule, DriveRule::Deny { drive_id: d } if *d == drive_id))
    }

    pub fn standing(&self, drive_id: i64, kind: MediaKind) -> DriveStanding {
        if self.is_denied(drive_id) {
            return DriveStanding::Denied;
        }
        let mut position = 0;
        for rule in &self.rules {
            if let DriveRule::Prefer { scope, drive_id: d, .. } = rule {
                if scope.applies_to(kind) {
                    if *d == drive_id {
                        return DriveStanding::Preferred(position);
                    }
                    position += 1;
                }
            }
        }
        DriveStanding::Neutral
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DestinationCandidate {
    pub drive: Drive,
    pub free_space: u64,
    pub standing: DriveStanding,
}

/// Eligible destination drives for a file, best first.
///
/// The source's own drive and denied drives are excluded, as are drives whose free
/// space is unknown or below `size + buffer`. Preferred drives come first in rule
/// order; the rest fall back to most free space.
pub fn rank_destinations<F>(
    drives: Vec<Drive>,
    rules: &RuleSet,
    source_drive_id: Option<i64>,
    kind: MediaKind,
    size: u64,
    buffer: u64,
    free_space: F,
) -> Vec<DestinationCandidate>
where
    F: Fn(&Drive) -> Option<u64>,
{
    let needed = size.saturating_add(buffer);
    let mut candidates: Vec<DestinationCandidate> = drives
        .into_iter()
        .filter(|drive| Some(drive.id) != source_drive_id)
        .filter_map(|drive| {
            let standing = rules.standing(drive.id, kind);
            if standing == DriveStanding::Denied {
                return None;
            }
            let free = free_space(&drive)?;
            if free < needed {
                return None;
            }
            Some(DestinationCandidate {
                drive,
                free_space: free,
                standing,
            })
        })
        .collect();

    candidates.sort_by(|a, b| match a.standing.cmp(&b.standing) {
        Ordering::Equal => b
            .free_space
            .cmp(&a.free_space)
            .then(a.drive.id.cmp(&b.drive.id)),
        other => other,
    });
    candidates
}
