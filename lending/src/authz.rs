//! Station management capability.
//!
//! Permission resolution happens elsewhere; this crate only consumes the
//! answer to "may this caller approve for station X".

use crate::types::StationId;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Answers whether a caller holds approve-capability for a station.
pub trait Authorizer: Send + Sync {
    /// `true` if `actor` may run lifecycle actions for `station_id`.
    fn may_approve(&self, actor: &str, station_id: StationId) -> bool;
}

/// Error parsing a manager roster.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid roster entry '{entry}': {reason}")]
pub struct RosterError {
    entry: String,
    reason: String,
}

/// Fixed roster of managers and the stations they run.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorizer {
    grants: HashMap<String, HashSet<StationId>>,
}

impl StaticAuthorizer {
    /// Empty roster: nobody may approve anything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `actor` approve-capability for `station_id`.
    #[must_use]
    pub fn grant(mut self, actor: impl Into<String>, station_id: StationId) -> Self {
        self.grants.entry(actor.into()).or_default().insert(station_id);
        self
    }

    /// Parse a roster of the form `alice=<uuid>,<uuid>;bob=<uuid>`.
    ///
    /// # Errors
    ///
    /// Returns [`RosterError`] if an entry has no `=` or a station id is not a UUID.
    pub fn parse(roster: &str) -> Result<Self, RosterError> {
        let mut authorizer = Self::new();

        for entry in roster.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (actor, stations) = entry.split_once('=').ok_or_else(|| RosterError {
                entry: entry.to_string(),
                reason: "expected actor=station,station".to_string(),
            })?;

            for station in stations.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let station_id = station.parse::<StationId>().map_err(|e| RosterError {
                    entry: entry.to_string(),
                    reason: e.to_string(),
                })?;
                authorizer = authorizer.grant(actor.trim(), station_id);
            }
        }

        Ok(authorizer)
    }

    /// Number of actors on the roster.
    #[must_use]
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Whether the roster is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

impl Authorizer for StaticAuthorizer {
    fn may_approve(&self, actor: &str, station_id: StationId) -> bool {
        self.grants
            .get(actor)
            .is_some_and(|stations| stations.contains(&station_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn grants_are_per_station() {
        let s1 = StationId::new();
        let s2 = StationId::new();
        let authz = StaticAuthorizer::new().grant("alice", s1);

        assert!(authz.may_approve("alice", s1));
        assert!(!authz.may_approve("alice", s2));
        assert!(!authz.may_approve("bob", s1));
    }

    #[test]
    fn parses_roster() {
        let s1 = StationId::new();
        let s2 = StationId::new();
        let roster = format!("alice={s1},{s2}; bob={s2}");
        let authz = StaticAuthorizer::parse(&roster).unwrap();

        assert_eq!(authz.len(), 2);
        assert!(authz.may_approve("alice", s1));
        assert!(authz.may_approve("bob", s2));
        assert!(!authz.may_approve("bob", s1));
    }

    #[test]
    fn rejects_malformed_roster() {
        assert!(StaticAuthorizer::parse("alice").is_err());
        assert!(StaticAuthorizer::parse("alice=not-a-uuid").is_err());
        assert!(StaticAuthorizer::parse("").unwrap().is_empty());
    }
}
