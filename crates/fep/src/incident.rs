// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incident reporting.
//!
//! Timing faults that must not abort a run (stragglers, runtime violations,
//! out-of-order triggers) are surfaced as incidents. The default handler
//! forwards them to the `log` facade; [`IncidentRecorder`] keeps them in memory
//! for monitoring and tests.

use parking_lot::Mutex;
use std::fmt;

/// Incident severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    /// Fatal for the reporting participant only.
    CriticalLocal,
    /// Fatal for the whole simulation.
    CriticalGlobal,
}

/// Incident codes raised by the timing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IncidentCode {
    /// A client did not acknowledge within the ack timeout and was excluded.
    StragglerTimedOut,
    /// A trigger arrived that does not follow the previous one.
    TriggerSkip,
    /// `GetSchedule` arrived from a participant that is not the configured master.
    MasterMisconfiguration,
    /// A schedule notification could not be sent.
    NotificationFailed,
    /// A step exceeded its runtime or was re-triggered while still running.
    RuntimeViolation,
    /// No trigger was received within the system timeout.
    SystemTimeout,
    /// A step acknowledgement could not be sent.
    AckTransmitFailed,
    /// An acknowledgement referenced a step that is not part of the schedule.
    UnknownStep,
}

/// A reported incident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incident {
    pub code: IncidentCode,
    pub severity: Severity,
    /// Participant that raised the incident.
    pub origin: String,
    pub description: String,
}

impl Incident {
    pub fn new(
        code: IncidentCode,
        severity: Severity,
        origin: &str,
        description: impl Into<String>,
    ) -> Self {
        Self {
            code,
            severity,
            origin: origin.to_string(),
            description: description.into(),
        }
    }
}

impl fmt::Display for Incident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:?}/{:?}: {}",
            self.origin, self.severity, self.code, self.description
        )
    }
}

/// Sink for incidents.
pub trait IncidentHandler: Send + Sync {
    fn invoke(&self, incident: &Incident);
}

/// Forwards incidents to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIncidents;

impl IncidentHandler for LogIncidents {
    fn invoke(&self, incident: &Incident) {
        match incident.severity {
            Severity::Info => log::info!("{}", incident),
            Severity::Warning => log::warn!("{}", incident),
            Severity::CriticalLocal | Severity::CriticalGlobal => log::error!("{}", incident),
        }
    }
}

/// Keeps every incident in memory (and logs it).
#[derive(Debug, Default)]
pub struct IncidentRecorder {
    incidents: Mutex<Vec<Incident>>,
}

impl IncidentRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded incidents.
    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents.lock().clone()
    }

    /// Number of recorded incidents with `code`.
    pub fn count(&self, code: IncidentCode) -> usize {
        self.incidents
            .lock()
            .iter()
            .filter(|i| i.code == code)
            .count()
    }

    pub fn clear(&self) {
        self.incidents.lock().clear();
    }
}

impl IncidentHandler for IncidentRecorder {
    fn invoke(&self, incident: &Incident) {
        LogIncidents.invoke(incident);
        self.incidents.lock().push(incident.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_counts_by_code() {
        let recorder = IncidentRecorder::new();
        recorder.invoke(&Incident::new(
            IncidentCode::StragglerTimedOut,
            Severity::Warning,
            "master",
            "client 'slow' timed out",
        ));
        recorder.invoke(&Incident::new(
            IncidentCode::TriggerSkip,
            Severity::CriticalGlobal,
            "client",
            "out of order",
        ));
        assert_eq!(recorder.count(IncidentCode::StragglerTimedOut), 1);
        assert_eq!(recorder.count(IncidentCode::SystemTimeout), 0);
        assert_eq!(recorder.incidents().len(), 2);
        recorder.clear();
        assert!(recorder.incidents().is_empty());
    }

    #[test]
    fn test_display() {
        let i = Incident::new(IncidentCode::RuntimeViolation, Severity::Warning, "p1", "late");
        assert_eq!(i.to_string(), "[p1] Warning/RuntimeViolation: late");
    }
}
