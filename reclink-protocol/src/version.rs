//! Protocol version catalogue.
//!
//! The backend wire contract has been revised roughly ninety times, mostly
//! incompatibly. Every revision the client knows about lives in a process-wide
//! catalogue built once at startup; a [`ProtocolVersion`] is a cheap ordinal
//! handle into it. Ordering is strictly by ordinal, never by the wire-visible
//! numeric id, because the two sentinels (`INITIAL`, `LATEST`) deliberately
//! break numeric ordering.

use crate::range::VersionBound;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// One protocol revision, ordered by catalogue ordinal.
///
/// `INITIAL` stands for every release that predates version negotiation;
/// `LATEST` is the open upper bound that always compares newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion(u16);

impl ProtocolVersion {
    /// All releases before version negotiation existed. Wire numeric id 0.
    pub const INITIAL: Self = Self(0);

    /// Open upper bound sentinel; always compares newest. Wire numeric id -1.
    pub const LATEST: Self = Self(u16::MAX);

    /// Looks up the version with the given wire-visible numeric id.
    pub fn from_numeric(numeric: i32) -> Result<Self, crate::error::ProtocolError> {
        catalog()
            .by_numeric
            .get(&numeric)
            .copied()
            .ok_or(crate::error::ProtocolError::UnknownVersion(numeric))
    }

    /// Position in the catalogue's total order.
    pub fn ordinal(self) -> u16 {
        self.0
    }

    /// The wire-visible version number (0 and -1 for the sentinels).
    pub fn numeric_id(self) -> i32 {
        self.info().numeric_id
    }

    /// The handshake token, for revisions from the token era onward.
    pub fn token(self) -> Option<&'static str> {
        self.info().token
    }

    /// Opaque per-version metadata (release date, reference).
    pub fn metadata(self) -> &'static HashMap<&'static str, &'static str> {
        &self.info().metadata
    }

    /// Whether the handshake for this revision must carry the token.
    pub fn requires_token(self) -> bool {
        self >= catalog().token_era_start
    }

    /// Whether wire timestamps for this revision are UTC rather than backend
    /// local time.
    pub fn utc_timestamps(self) -> bool {
        self >= catalog().utc_era_start
    }

    pub fn is_initial(self) -> bool {
        self == Self::INITIAL
    }

    pub fn is_latest(self) -> bool {
        self == Self::LATEST
    }

    fn info(self) -> &'static VersionInfo {
        let cat = catalog();
        if self.is_latest() {
            &cat.latest
        } else {
            &cat.entries[self.0 as usize]
        }
    }
}

impl VersionBound for ProtocolVersion {
    fn is_unbounded(&self) -> bool {
        self.is_latest()
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_latest() {
            write!(f, "latest")
        } else if self.is_initial() {
            write!(f, "initial")
        } else {
            write!(f, "v{}", self.numeric_id())
        }
    }
}

/// The database schema version line, a second consumer of the range algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DbSchemaVersion(pub u32);

impl DbSchemaVersion {
    /// Open upper bound sentinel for schema ranges.
    pub const LATEST: Self = Self(u32::MAX);
}

impl VersionBound for DbSchemaVersion {
    fn is_unbounded(&self) -> bool {
        *self == Self::LATEST
    }
}

impl fmt::Display for DbSchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "latest")
        } else {
            write!(f, "schema {}", self.0)
        }
    }
}

/// Immutable metadata for one catalogued revision.
#[derive(Debug)]
pub struct VersionInfo {
    pub ordinal: u16,
    pub numeric_id: i32,
    pub token: Option<&'static str>,
    pub metadata: HashMap<&'static str, &'static str>,
}

/// The ordered, process-wide table of known protocol revisions.
#[derive(Debug)]
pub struct VersionCatalog {
    entries: Vec<VersionInfo>,
    latest: VersionInfo,
    by_numeric: HashMap<i32, ProtocolVersion>,
    token_era_start: ProtocolVersion,
    utc_era_start: ProtocolVersion,
}

impl VersionCatalog {
    /// The newest concrete revision this client can negotiate.
    pub fn newest(&self) -> ProtocolVersion {
        ProtocolVersion(self.entries.len() as u16 - 1)
    }

    /// First revision whose handshake carries a token.
    pub fn token_era_start(&self) -> ProtocolVersion {
        self.token_era_start
    }

    /// First revision that switched wire timestamps to UTC.
    pub fn utc_era_start(&self) -> ProtocolVersion {
        self.utc_era_start
    }

    /// All catalogued revisions in order, sentinels excluded.
    pub fn revisions(&self) -> impl Iterator<Item = ProtocolVersion> + '_ {
        (1..self.entries.len() as u16).map(ProtocolVersion)
    }
}

/// Returns the global version catalogue, building it on first use.
///
/// A malformed table (non-ascending numeric ids, missing era anchors) is a
/// fatal configuration error surfaced here rather than at dispatch time.
pub fn catalog() -> &'static VersionCatalog {
    static CATALOG: OnceLock<VersionCatalog> = OnceLock::new();
    CATALOG.get_or_init(build_catalog)
}

/// Wire numeric id of the first token-era revision.
const TOKEN_ERA_NUMERIC: i32 = 62;

/// Wire numeric id of the first UTC-timestamp revision.
const UTC_ERA_NUMERIC: i32 = 75;

fn build_catalog() -> VersionCatalog {
    // (numeric id, handshake token, release date)
    let table: &[(i32, Option<&'static str>, &'static str)] = &[
        (8, None, "2004-03-01"),
        (14, None, "2005-02-15"),
        (15, None, "2005-05-10"),
        (19, None, "2005-11-05"),
        (23, None, "2006-04-17"),
        (31, None, "2007-03-09"),
        (40, None, "2008-09-23"),
        (44, None, "2009-02-12"),
        (50, None, "2009-08-24"),
        (56, None, "2010-02-27"),
        (62, Some("78B5631E"), "2010-11-30"),
        (63, Some("3875641D"), "2011-01-18"),
        (64, Some("8675309J"), "2011-03-02"),
        (65, Some("D2BB94C2"), "2011-05-25"),
        (66, Some("0C0FFEE0"), "2011-07-08"),
        (69, Some("63835135"), "2012-01-11"),
        (70, Some("53153836"), "2012-02-27"),
        (72, Some("D78EFD6F"), "2012-06-04"),
        (73, Some("D7FE8D6F"), "2012-07-19"),
        (75, Some("SweetRock"), "2012-10-03"),
        (77, Some("WindMark"), "2013-04-22"),
        (85, Some("BluePool"), "2015-07-16"),
        (88, Some("XmasGift"), "2017-12-18"),
        (91, Some("BuzzOff"), "2020-06-29"),
    ];

    let mut entries = Vec::with_capacity(table.len() + 1);
    entries.push(VersionInfo {
        ordinal: 0,
        numeric_id: 0,
        token: None,
        metadata: HashMap::from([("era", "pre-negotiation")]),
    });

    let mut by_numeric = HashMap::new();
    by_numeric.insert(0, ProtocolVersion::INITIAL);
    by_numeric.insert(-1, ProtocolVersion::LATEST);

    let mut last_numeric = 0;
    let mut token_era_start = None;
    let mut utc_era_start = None;
    for (i, &(numeric, token, released)) in table.iter().enumerate() {
        assert!(
            numeric > last_numeric,
            "version table must be strictly ascending at numeric id {numeric}"
        );
        last_numeric = numeric;

        let ordinal = (i + 1) as u16;
        let version = ProtocolVersion(ordinal);
        if numeric == TOKEN_ERA_NUMERIC {
            token_era_start = Some(version);
        }
        if numeric == UTC_ERA_NUMERIC {
            utc_era_start = Some(version);
        }
        by_numeric.insert(numeric, version);
        entries.push(VersionInfo {
            ordinal,
            numeric_id: numeric,
            token,
            metadata: HashMap::from([("released", released)]),
        });
    }

    VersionCatalog {
        entries,
        latest: VersionInfo {
            ordinal: u16::MAX,
            numeric_id: -1,
            token: None,
            metadata: HashMap::new(),
        },
        by_numeric,
        token_era_start: token_era_start.expect("version table lost its token era anchor"),
        utc_era_start: utc_era_start.expect("version table lost its UTC era anchor"),
    }
}
