//! Which lane is loaded into an extruder.
//!
//! Sources are ranked: the toolhead sensor, then the hub sensor (only
//! while the toolhead sensor is unknown), then the persisted state (only
//! when nothing live claims the extruder). Two live toolhead claims are a
//! conflict and never resolved by picking one.

use serde::Serialize;

/// Sensor readings for one lane feeding the extruder being reconciled
#[derive(Debug, Clone, PartialEq)]
pub struct LaneReading {
    pub lane: String,
    pub feed: Option<bool>,
    pub hub: Option<bool>,
    pub tool: Option<bool>,
}

impl LaneReading {
    pub fn new(lane: impl Into<String>) -> Self {
        Self {
            lane: lane.into(),
            feed: None,
            hub: None,
            tool: None,
        }
    }

    fn contradicts_loaded(&self) -> bool {
        self.feed == Some(false) || self.hub == Some(false) || self.tool == Some(false)
    }
}

/// Outcome of reconciling one extruder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Reconciliation {
    /// The toolhead sensor agrees with the recorded lane
    Confirmed { lane: String },
    /// The toolhead sensor names a different lane than recorded
    Corrected { from: Option<String>, to: String },
    /// The recorded lane is demonstrably not loaded
    Cleared { lane: String },
    /// Hub still occupied with no toolhead reading; recorded lane kept
    Ambiguous { lane: String },
    /// Adopted from the persisted state
    Restored { lane: String },
    Unchanged,
}

/// Lanes claiming the same toolhead
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub lanes: Vec<String>,
}

/// Decide the loaded lane for one extruder.
///
/// `readings` must cover the lanes feeding that extruder. `persisted` is
/// consulted only when no lane is recorded and no sensor claims the
/// toolhead, and is adopted only if it names one of `readings` with no
/// sensor reading empty.
pub fn reconcile(
    recorded: Option<&str>,
    readings: &[LaneReading],
    persisted: Option<&str>,
) -> Result<Reconciliation, Conflict> {
    let mut claims: Vec<&str> = readings
        .iter()
        .filter(|reading| reading.tool == Some(true))
        .map(|reading| reading.lane.as_str())
        .collect();

    if claims.len() > 1 {
        claims.sort_unstable();
        return Err(Conflict {
            lanes: claims.into_iter().map(str::to_string).collect(),
        });
    }

    if let Some(claim) = claims.first() {
        return Ok(if recorded == Some(*claim) {
            Reconciliation::Confirmed {
                lane: claim.to_string(),
            }
        } else {
            Reconciliation::Corrected {
                from: recorded.map(str::to_string),
                to: claim.to_string(),
            }
        });
    }

    if let Some(recorded) = recorded {
        let reading = readings.iter().find(|reading| reading.lane == recorded);
        let tool = reading.and_then(|reading| reading.tool);
        let hub = reading.and_then(|reading| reading.hub);
        return Ok(match (tool, hub) {
            (Some(false), _) | (None, Some(false)) => Reconciliation::Cleared {
                lane: recorded.to_string(),
            },
            (None, Some(true)) => Reconciliation::Ambiguous {
                lane: recorded.to_string(),
            },
            _ => Reconciliation::Unchanged,
        });
    }

    let restored = persisted.and_then(|persisted| {
        readings
            .iter()
            .find(|reading| reading.lane == persisted)
            .filter(|reading| !reading.contradicts_loaded())
    });
    Ok(match restored {
        Some(reading) => Reconciliation::Restored {
            lane: reading.lane.clone(),
        },
        None => Reconciliation::Unchanged,
    })
}
