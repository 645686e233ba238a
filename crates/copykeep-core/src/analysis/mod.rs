pub mod cleanup;
pub mod quarantine;
pub mod rules;

pub use cleanup::{recommendations, CleanupReport, FileAdvice, ItemRecommendation};
pub use quarantine::{quarantine, restore, QuarantineReport};
pub use rules::{rank_destinations, DestinationCandidate, DriveRule, DriveStanding, RuleSet};
