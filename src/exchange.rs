// Copyright (c) 2025, The Stagelink Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! Builder for exchange declarations. The pipeline routes exclusively through topic
//! exchanges keyed by stage name, so `Topic` is the default kind; direct and fanout
//! remain available for ad-hoc tooling against the same broker.

/// The routing behavior of an exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    #[default]
    Topic,
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

/// Definition of an exchange with its declaration flags.
///
/// Built once, passed by value into worker topologies; all strings are owned so a
/// topology outlives whatever configured it.
#[derive(Debug, Clone, Default)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
    pub(crate) internal: bool,
    pub(crate) no_wait: bool,
}

impl ExchangeDefinition {
    /// Creates a topic exchange definition with the given name.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            ..ExchangeDefinition::default()
        }
    }

    /// The exchange name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the exchange kind.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the exchange to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the declaration passive: check existence without creating.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Makes the exchange internal, preventing direct publishing.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Sets the no-wait flag, making the declaration non-blocking.
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Renames this definition, keeping every flag. Used to derive the dead-letter
    /// shadow exchange from the primary one.
    pub(crate) fn renamed(&self, name: String) -> Self {
        let mut def = self.clone();
        def.name = name;
        def
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_the_default_kind() {
        let def = ExchangeDefinition::new("releases");

        assert_eq!(def.kind, ExchangeKind::Topic);
        assert_eq!(lapin::ExchangeKind::from(&def.kind), lapin::ExchangeKind::Topic);
    }

    #[test]
    fn renamed_keeps_flags() {
        let def = ExchangeDefinition::new("releases").durable();
        let shadow = def.renamed("releases.deadletter".to_owned());

        assert_eq!(shadow.name(), "releases.deadletter");
        assert!(shadow.durable);
    }
}
