//! Version range algebra.
//!
//! A [`VersionRange`] is an inclusive-exclusive interval `[from, to)` over any
//! ordered version line, with optional fallback bounds extending the interval
//! for features that keep working in a degraded form outside their primary
//! range. The same algebra is used for wire protocol versions and for the
//! database schema version line.

use crate::error::ProtocolError;
use std::collections::HashMap;
use std::fmt;

/// An ordered version token usable as a range bound.
///
/// Implementors with an open-ended version line expose a "latest" sentinel
/// that compares newer than every concrete version; a range whose `to` bound
/// is that sentinel is unbounded above.
pub trait VersionBound: Ord + Copy + fmt::Debug + fmt::Display {
    /// Whether this value is the open upper bound sentinel.
    fn is_unbounded(&self) -> bool {
        false
    }
}

/// An inclusive-exclusive version interval with optional fallback extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange<V: VersionBound> {
    from: V,
    to: V,
    from_fallback: Option<V>,
    to_fallback: Option<V>,
    from_meta: HashMap<&'static str, &'static str>,
    to_meta: HashMap<&'static str, &'static str>,
}

impl<V: VersionBound> VersionRange<V> {
    /// Creates a range `[from, to)`.
    ///
    /// A `from` newer than `to` is a configuration error: ranges are declared
    /// in process-wide constant tables, so misdeclaration is caught at table
    /// build time rather than deferred to dispatch.
    pub fn new(from: V, to: V) -> Result<Self, ProtocolError> {
        if from > to && !to.is_unbounded() {
            return Err(ProtocolError::InvalidRange {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(Self {
            from,
            to,
            from_fallback: None,
            to_fallback: None,
            from_meta: HashMap::new(),
            to_meta: HashMap::new(),
        })
    }

    /// Extends the range downward: the feature still works, degraded, from
    /// `fallback` up to (but not including) the primary `from`.
    pub fn with_from_fallback(mut self, fallback: V) -> Self {
        self.from_fallback = Some(fallback);
        self
    }

    /// Extends the range upward: the feature still works, degraded, from the
    /// primary `to` up to (but not including) `fallback`.
    pub fn with_to_fallback(mut self, fallback: V) -> Self {
        self.to_fallback = Some(fallback);
        self
    }

    /// Attaches metadata to the lower bound (why it was introduced, external
    /// reference).
    pub fn with_from_meta(mut self, key: &'static str, value: &'static str) -> Self {
        self.from_meta.insert(key, value);
        self
    }

    /// Attaches metadata to the upper bound (why it was retired).
    pub fn with_to_meta(mut self, key: &'static str, value: &'static str) -> Self {
        self.to_meta.insert(key, value);
        self
    }

    pub fn from(&self) -> V {
        self.from
    }

    pub fn to(&self) -> V {
        self.to
    }

    pub fn from_fallback(&self) -> Option<V> {
        self.from_fallback
    }

    pub fn to_fallback(&self) -> Option<V> {
        self.to_fallback
    }

    pub fn from_meta(&self) -> &HashMap<&'static str, &'static str> {
        &self.from_meta
    }

    pub fn to_meta(&self) -> &HashMap<&'static str, &'static str> {
        &self.to_meta
    }

    /// Whether `version` falls inside the primary interval.
    ///
    /// The lower bound is inclusive, the upper exclusive; a `to` equal to the
    /// latest sentinel is treated as unbounded above.
    pub fn contains(&self, version: V) -> bool {
        self.from <= version && (self.to.is_unbounded() || version < self.to)
    }

    /// Whether `version` falls inside the primary interval or one of the
    /// fallback extensions.
    ///
    /// The extensions are `[from_fallback, from)` and `[to, to_fallback)`:
    /// the dispatcher uses this to pick a degraded legacy path instead of
    /// rejecting the command outright.
    pub fn contains_fallback(&self, version: V) -> bool {
        if self.contains(version) {
            return true;
        }
        if let Some(ff) = self.from_fallback {
            if ff <= version && version < self.from {
                return true;
            }
        }
        if let Some(tf) = self.to_fallback {
            if self.to <= version && version < tf && !self.to.is_unbounded() {
                return true;
            }
        }
        false
    }

    /// Whether the primary interval is empty.
    pub fn is_empty(&self) -> bool {
        self.from >= self.to && !self.to.is_unbounded()
    }

    /// Intersects this range with `parent`: tightest `from`, tightest `to`,
    /// where an unbounded `to` loses to any concrete bound.
    ///
    /// Used to clip a field's own range to its enclosing schema's range.
    /// Fallback bounds and metadata are taken from whichever range supplied
    /// the winning primary bound.
    pub fn restrict(&self, parent: &Self) -> Self {
        let (from, from_fallback, from_meta) = if parent.from > self.from {
            (parent.from, parent.from_fallback, parent.from_meta.clone())
        } else {
            (self.from, self.from_fallback, self.from_meta.clone())
        };
        let (to, to_fallback, to_meta) = if upper_tighter(parent.to, self.to) {
            (parent.to, parent.to_fallback, parent.to_meta.clone())
        } else {
            (self.to, self.to_fallback, self.to_meta.clone())
        };
        Self {
            from,
            to,
            from_fallback,
            to_fallback,
            from_meta,
            to_meta,
        }
    }
}

/// Whether `a` is a tighter upper bound than `b`.
fn upper_tighter<V: VersionBound>(a: V, b: V) -> bool {
    match (a.is_unbounded(), b.is_unbounded()) {
        (true, _) => false,
        (false, true) => true,
        (false, false) => a < b,
    }
}
