//! Voting rounds and their revealed statistics.

use crate::ids::{ParticipantId, RoundId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single card selection.
///
/// Carried as an opaque string: card sets mix numeric values ("3", "13")
/// with labels ("?", "XS", "☕"). Only [`Vote::as_numeric`] votes contribute
/// to the revealed average and agreement check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vote(pub String);

impl Vote {
    /// Numeric value of this vote, if it has one.
    #[must_use]
    pub fn as_numeric(&self) -> Option<f64> {
        self.0.trim().parse().ok()
    }
}

impl From<&str> for Vote {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One estimation cycle: vote collection followed by a single reveal.
///
/// The votes map only ever contains entries for participants who cast a
/// vote in *this* round; starting a new round replaces the whole record.
/// Once revealed, a round is immutable - the coordinator appends a snapshot
/// to the session history and rejects further votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    /// Optional label for the issue being estimated.
    pub issue_label: Option<String>,
    pub votes: HashMap<ParticipantId, Vote>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub revealed: bool,
    /// Arithmetic mean of the numeric votes. Unset (not zero) when no
    /// numeric vote exists.
    pub average: Option<f64>,
    /// Whether all numeric votes are equal. Unset when no numeric vote
    /// exists; callers must treat "unset" as distinct from `false`.
    pub has_agreement: Option<bool>,
}

impl Round {
    /// Create a fresh round with an empty votes map.
    #[must_use]
    pub fn new(issue_label: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: RoundId::new(),
            issue_label,
            votes: HashMap::new(),
            started_at: now,
            ended_at: None,
            revealed: false,
            average: None,
            has_agreement: None,
        }
    }

    /// Finalize the round: mark it revealed and compute statistics.
    ///
    /// Non-numeric votes (abstentions, card-suit labels) are excluded from
    /// both the average and the agreement check. Agreement compares the
    /// numeric values bit-for-bit, so a lone numeric vote trivially agrees
    /// with itself.
    pub fn reveal(&mut self, now: DateTime<Utc>) {
        self.revealed = true;
        self.ended_at = Some(now);

        let numeric: Vec<f64> = self.votes.values().filter_map(Vote::as_numeric).collect();
        if let Some(first) = numeric.first() {
            #[allow(clippy::cast_precision_loss)]
            let average = numeric.iter().sum::<f64>() / numeric.len() as f64;
            self.average = Some(average);
            self.has_agreement = Some(numeric.iter().all(|v| v.to_bits() == first.to_bits()));
        }
    }
}
