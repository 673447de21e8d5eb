//! Command catalogue and per-command version checks.
//!
//! Every dispatchable command carries a version range; the check runs before
//! any byte is written to the socket. A command outside its primary range but
//! inside a declared fallback interval is transparently rewritten to its
//! registered legacy wire command. Selection is deterministic: the primary
//! form wins whenever its range contains the negotiated version.

use crate::error::ClientError;
use reclink_protocol::{ProtocolVersion, VersionRange};
use std::collections::HashMap;
use std::sync::OnceLock;

/// One logical command the client can dispatch.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    name: &'static str,
    range: VersionRange<ProtocolVersion>,
    /// Legacy wire command substituted inside the fallback interval.
    fallback: Option<&'static str>,
}

impl CommandSpec {
    pub fn new(name: &'static str, range: VersionRange<ProtocolVersion>) -> Self {
        Self {
            name,
            range,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, command: &'static str) -> Self {
        self.fallback = Some(command);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn range(&self) -> &VersionRange<ProtocolVersion> {
        &self.range
    }
}

/// Outcome of resolving a command against the negotiated version.
#[derive(Debug, Clone, Copy)]
pub enum Dispatch<'a> {
    /// The primary wire command applies.
    Primary(&'a CommandSpec),
    /// The version sits in the fallback interval; dispatch the legacy wire
    /// command instead.
    Fallback {
        spec: &'a CommandSpec,
        command: &'static str,
    },
}

impl Dispatch<'_> {
    /// The wire command name actually sent.
    pub fn wire_name(&self) -> &str {
        match self {
            Dispatch::Primary(spec) => spec.name,
            Dispatch::Fallback { command, .. } => command,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Dispatch::Fallback { .. })
    }
}

/// Registry of known commands.
pub struct CommandCatalog {
    by_name: HashMap<&'static str, CommandSpec>,
}

impl CommandCatalog {
    pub fn new(commands: Vec<CommandSpec>) -> Self {
        let by_name = commands.into_iter().map(|c| (c.name, c)).collect();
        Self { by_name }
    }

    /// The process-wide builtin catalogue.
    pub fn global() -> &'static CommandCatalog {
        static CATALOG: OnceLock<CommandCatalog> = OnceLock::new();
        CATALOG.get_or_init(|| CommandCatalog::new(builtin_commands()))
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.by_name.get(name)
    }

    /// Resolves `name` for `version`.
    ///
    /// Distinguishes two failure kinds: a name with no catalogue entry at all
    /// is a programmer error (`UnknownCommand`); a known command outside its
    /// range with no usable fallback is a caller error
    /// (`UnsupportedCommand`).
    pub fn resolve(
        &self,
        name: &str,
        version: ProtocolVersion,
    ) -> Result<Dispatch<'_>, ClientError> {
        let spec = self.by_name.get(name).ok_or_else(|| ClientError::UnknownCommand {
            name: name.to_string(),
        })?;

        if spec.range.contains(version) {
            return Ok(Dispatch::Primary(spec));
        }
        if spec.range.contains_fallback(version) {
            if let Some(command) = spec.fallback {
                return Ok(Dispatch::Fallback { spec, command });
            }
        }
        Err(ClientError::UnsupportedCommand {
            name: name.to_string(),
            version: version.numeric_id(),
        })
    }
}

fn v(numeric: i32) -> ProtocolVersion {
    ProtocolVersion::from_numeric(numeric)
        .expect("command catalogue references a version missing from the version table")
}

fn full() -> VersionRange<ProtocolVersion> {
    VersionRange::new(ProtocolVersion::INITIAL, ProtocolVersion::LATEST)
        .expect("full range is always valid")
}

fn since(numeric: i32) -> VersionRange<ProtocolVersion> {
    VersionRange::new(v(numeric), ProtocolVersion::LATEST)
        .expect("open range is always valid")
}

fn between(from: i32, to: i32) -> VersionRange<ProtocolVersion> {
    VersionRange::new(v(from), v(to)).expect("command catalogue range misdeclared")
}

/// The builtin command table.
///
/// Deliberately a fraction of the backend's full command set: session
/// commands plus the queries the crate itself exercises. Callers with wider
/// needs extend at the façade layer.
fn builtin_commands() -> Vec<CommandSpec> {
    vec![
        // Session
        CommandSpec::new("ANN", full()),
        CommandSpec::new("DONE", full()),
        // Status queries
        CommandSpec::new("QUERY_UPTIME", since(15)),
        CommandSpec::new("QUERY_MEMSTATS", since(15)),
        CommandSpec::new("QUERY_TIME_ZONE", since(31)),
        CommandSpec::new("QUERY_HOSTNAME", since(50)),
        CommandSpec::new(
            "QUERY_ACTIVE_BACKENDS",
            since(72).with_from_meta("reason", "multi-backend deployments"),
        ),
        // Recorders
        CommandSpec::new("GET_FREE_RECORDER_COUNT", since(40)),
        CommandSpec::new("GET_NEXT_FREE_RECORDER", since(14)),
        // Recordings
        CommandSpec::new("QUERY_RECORDINGS", full()),
        CommandSpec::new("QUERY_GETALLPENDING", since(19)),
        // Disk usage: the summary form arrived at v31; between v14 and v31
        // the per-directory query computes the same answer client-side.
        CommandSpec::new(
            "QUERY_FREE_SPACE_SUMMARY",
            since(31).with_from_fallback(v(14)),
        )
        .with_fallback("QUERY_FREE_SPACE"),
        CommandSpec::new("QUERY_FREE_SPACE", since(14)),
        // Retired: replaced by the scheduler-side variant.
        CommandSpec::new(
            "RESCHEDULE_RECORDINGS",
            between(15, 73).with_to_meta("reason", "superseded by RESCHEDULE_RECORDINGS_MATCH"),
        ),
        CommandSpec::new("RESCHEDULE_RECORDINGS_MATCH", since(73)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ver(numeric: i32) -> ProtocolVersion {
        ProtocolVersion::from_numeric(numeric).unwrap()
    }

    #[test]
    fn test_primary_in_range() {
        let catalog = CommandCatalog::global();
        let dispatch = catalog.resolve("QUERY_UPTIME", ver(91)).unwrap();
        assert_eq!(dispatch.wire_name(), "QUERY_UPTIME");
        assert!(!dispatch.is_fallback());
    }

    #[test]
    fn test_unknown_command() {
        let err = CommandCatalog::global()
            .resolve("MAKE_COFFEE", ver(91))
            .unwrap_err();
        assert!(matches!(err, ClientError::UnknownCommand { .. }));
    }

    #[test]
    fn test_unsupported_for_version() {
        // Known command, version predates it, no fallback registered.
        let err = CommandCatalog::global()
            .resolve("QUERY_ACTIVE_BACKENDS", ver(56))
            .unwrap_err();
        match err {
            ClientError::UnsupportedCommand { name, version } => {
                assert_eq!(name, "QUERY_ACTIVE_BACKENDS");
                assert_eq!(version, 56);
            }
            other => panic!("expected UnsupportedCommand, got {other:?}"),
        }
    }

    #[test]
    fn test_retired_command() {
        let catalog = CommandCatalog::global();
        assert!(catalog.resolve("RESCHEDULE_RECORDINGS", ver(56)).is_ok());
        assert!(catalog.resolve("RESCHEDULE_RECORDINGS", ver(91)).is_err());
        assert!(catalog
            .resolve("RESCHEDULE_RECORDINGS_MATCH", ver(91))
            .is_ok());
    }

    #[test]
    fn test_fallback_selected_below_primary_range() {
        let dispatch = CommandCatalog::global()
            .resolve("QUERY_FREE_SPACE_SUMMARY", ver(19))
            .unwrap();
        assert_eq!(dispatch.wire_name(), "QUERY_FREE_SPACE");
        assert!(dispatch.is_fallback());
    }

    #[test]
    fn test_primary_preferred_when_both_apply() {
        // At v31 the primary range starts; the fallback interval must lose.
        let dispatch = CommandCatalog::global()
            .resolve("QUERY_FREE_SPACE_SUMMARY", ver(31))
            .unwrap();
        assert_eq!(dispatch.wire_name(), "QUERY_FREE_SPACE_SUMMARY");
        assert!(!dispatch.is_fallback());
    }

    #[test]
    fn test_below_fallback_is_unsupported() {
        let err = CommandCatalog::global()
            .resolve("QUERY_FREE_SPACE_SUMMARY", ver(8))
            .unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedCommand { .. }));
    }

    #[test]
    fn test_fallback_interval_without_registered_command() {
        // A fallback bound alone is not enough: without a registered legacy
        // command the dispatcher must reject.
        let catalog = CommandCatalog::new(vec![CommandSpec::new(
            "HALF_DECLARED",
            since(62).with_from_fallback(v(40)),
        )]);
        let err = catalog.resolve("HALF_DECLARED", ver(50)).unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedCommand { .. }));
    }

    #[test]
    fn test_scenario_from_fallback_selection() {
        // Command with range [75, latest) and fallback from v40: at v56 the
        // primary check fails, the fallback check succeeds.
        let catalog = CommandCatalog::new(vec![CommandSpec::new(
            "SUMMARIZE",
            since(75).with_from_fallback(v(40)),
        )
        .with_fallback("SUMMARIZE_LEGACY")]);

        let dispatch = catalog.resolve("SUMMARIZE", ver(56)).unwrap();
        assert_eq!(dispatch.wire_name(), "SUMMARIZE_LEGACY");
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let catalog = CommandCatalog::global();
        for _ in 0..3 {
            let d = catalog.resolve("QUERY_FREE_SPACE_SUMMARY", ver(19)).unwrap();
            assert_eq!(d.wire_name(), "QUERY_FREE_SPACE");
        }
    }
}
