//! Order-preserving identifier generation
//!
//! Produces a node identifier that sorts strictly between two neighbors so a
//! node can be inserted anywhere without renumbering the document. Integers
//! are preferred while integer room exists; after that the decimal suffix
//! grows one digit at a time (`1` and `2` give `1.1`, `1` and `1.1` give
//! `1.01`). When neighbors get too deep, renumbering is advised.
//!
//! All arithmetic works on integer parts (`u64`) and digit strings, never on
//! floating point, so long decimals lose no precision.
//!
//! # Examples
//!
//! ```rust
//! use hyperlit_core::db::{NoLiveIdentifiers, OrderedIdentifier};
//! use hyperlit_core::models::NodeIdentifier;
//!
//! let ids = OrderedIdentifier::default();
//! let one = NodeIdentifier::Integer(1);
//! let two = NodeIdentifier::Integer(2);
//!
//! let generated = ids.generate_between(Some(&one), Some(&two), &NoLiveIdentifiers).unwrap();
//! assert_eq!(generated.id.to_string(), "1.1");
//! assert!(!generated.needs_renumbering);
//! ```

use crate::config::EditorConfig;
use crate::models::NodeIdentifier;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

/// Upper bound on decimal-suffix retries when candidates collide with live ids
const MAX_COLLISION_STEPS: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// Nothing sorts below `after` (it is `0`)
    #[error("No identifier space below {after}")]
    NoRoomBelow { after: NodeIdentifier },

    /// Every decimal variant tried was already taken
    #[error("Could not find a free identifier near {candidate}")]
    CollisionUnresolved { candidate: NodeIdentifier },
}

/// Lookup of identifiers currently held by live nodes
pub trait LiveIdentifiers {
    fn is_live(&self, id: &NodeIdentifier) -> bool;
}

/// Empty live set, for callers that have already excluded duplicates
pub struct NoLiveIdentifiers;

impl LiveIdentifiers for NoLiveIdentifiers {
    fn is_live(&self, _id: &NodeIdentifier) -> bool {
        false
    }
}

impl LiveIdentifiers for HashSet<NodeIdentifier> {
    fn is_live(&self, id: &NodeIdentifier) -> bool {
        self.contains(id)
    }
}

impl LiveIdentifiers for BTreeSet<NodeIdentifier> {
    fn is_live(&self, id: &NodeIdentifier) -> bool {
        self.contains(id)
    }
}

/// A freshly generated identifier plus the renumbering advice for its neighbors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedIdentifier {
    pub id: NodeIdentifier,
    pub needs_renumbering: bool,
}

/// Identifier generator
#[derive(Debug, Clone)]
pub struct OrderedIdentifier {
    gap: u64,
    max_decimal_depth: usize,
    long_decimal_threshold: usize,
}

impl Default for OrderedIdentifier {
    fn default() -> Self {
        Self::from_config(&EditorConfig::default())
    }
}

impl OrderedIdentifier {
    pub fn new(gap: u64, max_decimal_depth: usize, long_decimal_threshold: usize) -> Self {
        Self {
            gap,
            max_decimal_depth,
            long_decimal_threshold,
        }
    }

    pub fn from_config(config: &EditorConfig) -> Self {
        Self::new(
            config.renumber_gap,
            config.max_decimal_depth,
            config.long_decimal_threshold,
        )
    }

    /// Total order over identifiers: integer parts numerically, then decimal
    /// parts as zero-padded strings.
    pub fn compare(a: &NodeIdentifier, b: &NodeIdentifier) -> Ordering {
        a.cmp(b)
    }

    /// Whether the neighbors are already so deep that the next insertion
    /// between them should be followed by renumbering.
    ///
    /// Advisory only. An absent neighbor always leaves integer room, so both
    /// must be present.
    pub fn needs_renumbering(
        &self,
        before: Option<&NodeIdentifier>,
        after: Option<&NodeIdentifier>,
    ) -> bool {
        match (before, after) {
            (Some(b), Some(a)) => {
                let depth = b.depth().max(a.depth());
                if depth >= self.max_decimal_depth {
                    tracing::debug!(
                        "Renumbering advised: decimal depth {} >= {} (between {} and {})",
                        depth,
                        self.max_decimal_depth,
                        b,
                        a
                    );
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Generate an identifier strictly between `before` and `after`.
    ///
    /// Either neighbor may be absent. If `before >= after` the caller has a
    /// bug; it is logged as an ordering violation and `after` is ignored.
    /// Candidates already held by a live node are replaced by a decimal
    /// variant that still sorts between the neighbors.
    pub fn generate_between(
        &self,
        before: Option<&NodeIdentifier>,
        after: Option<&NodeIdentifier>,
        live: &dyn LiveIdentifiers,
    ) -> Result<GeneratedIdentifier, IdentifierError> {
        let needs_renumbering = self.needs_renumbering(before, after);

        let after = match (before, after) {
            (Some(b), Some(a)) if b >= a => {
                tracing::error!(
                    "Ordering violation: asked for an identifier between {} and {}; retrying without the upper neighbor",
                    b,
                    a
                );
                None
            }
            (_, a) => a,
        };

        let candidate = match (before, after) {
            (None, None) => NodeIdentifier::Integer(1),
            (None, Some(a)) => self.below(a)?,
            (Some(b), None) => self.above(b, live),
            (Some(b), Some(a)) => self.between(b, a),
        };

        let id = self.resolve_collision(candidate, after, live)?;
        Ok(GeneratedIdentifier {
            id,
            needs_renumbering,
        })
    }

    /// An integer at least one below `after`, clamped to 1
    fn below(&self, after: &NodeIdentifier) -> Result<NodeIdentifier, IdentifierError> {
        let candidate = NodeIdentifier::Integer(after.int_part().saturating_sub(1).max(1));
        if &candidate < after {
            return Ok(candidate);
        }

        let zero = NodeIdentifier::Integer(0);
        if after > &zero {
            Ok(self.between(&zero, after))
        } else {
            Err(IdentifierError::NoRoomBelow {
                after: after.clone(),
            })
        }
    }

    /// Floor of `before` plus the gap, or a decimal step when that is taken
    fn above(&self, before: &NodeIdentifier, live: &dyn LiveIdentifiers) -> NodeIdentifier {
        let candidate = NodeIdentifier::Integer(before.int_part().saturating_add(self.gap));
        if candidate > *before && !live.is_live(&candidate) {
            return candidate;
        }

        tracing::warn!(
            "Next gap identifier {} already exists, falling back to a decimal after {}",
            candidate,
            before
        );
        step_up(before)
    }

    /// Both neighbors present and ordered
    fn between(&self, before: &NodeIdentifier, after: &NodeIdentifier) -> NodeIdentifier {
        if before.depth() > self.long_decimal_threshold
            || after.depth() > self.long_decimal_threshold
        {
            tracing::warn!(
                "Very long decimal between {} and {}, using string-only logic",
                before,
                after
            );
            let candidate = step_up(before);
            return if strictly_between(before, &candidate, after) {
                candidate
            } else {
                midpoint(before, after)
            };
        }

        // Integer gap of at least two: take the midpoint
        if let (NodeIdentifier::Integer(b), NodeIdentifier::Integer(a)) = (before, after) {
            if a - b >= 2 {
                return NodeIdentifier::Integer(b + (a - b) / 2);
            }
        }

        // Room for the next integer above `before`
        let next_int = NodeIdentifier::Integer(before.int_part().saturating_add(1));
        if next_int > *before && next_int < *after {
            return next_int;
        }

        let int_part = before.int_part();
        let candidate = match (before.is_integer(), after.is_integer()) {
            // Same integer part, both decimal: increment if the padded gap allows, else append
            (false, false) if int_part == after.int_part() => {
                increment_or_append(int_part, before.digits(), after.digits())
            }
            // 100 and 100.1 give 100.01
            (true, false) if int_part == after.int_part() => {
                let suffix = format!("{}1", "0".repeat(after.depth()));
                NodeIdentifier::decimal(int_part, &suffix)
            }
            // Adjacent integers: 1 and 2 give 1.1
            (true, true) => NodeIdentifier::decimal(int_part, "1"),
            // Decimal then the next integer: 1.5 and 2 give 1.6
            _ => step_up(before),
        };

        if strictly_between(before, &candidate, after) {
            candidate
        } else {
            midpoint(before, after)
        }
    }

    fn resolve_collision(
        &self,
        candidate: NodeIdentifier,
        after: Option<&NodeIdentifier>,
        live: &dyn LiveIdentifiers,
    ) -> Result<NodeIdentifier, IdentifierError> {
        let mut current = candidate;
        for _ in 0..MAX_COLLISION_STEPS {
            if !live.is_live(&current) {
                return Ok(current);
            }
            tracing::warn!(
                "Generated identifier {} collides with a live node, trying a decimal variant",
                current
            );
            current = match after {
                Some(a) => self.between(&current, a),
                None => step_up(&current),
            };
        }
        Err(IdentifierError::CollisionUnresolved { candidate: current })
    }
}

fn strictly_between(
    before: &NodeIdentifier,
    candidate: &NodeIdentifier,
    after: &NodeIdentifier,
) -> bool {
    before < candidate && candidate < after
}

/// Smallest-change identifier above `id`: `5` gives `5.1`, `5.3` gives
/// `5.4`, `5.39` gives `5.391`.
fn step_up(id: &NodeIdentifier) -> NodeIdentifier {
    let int_part = id.int_part();
    let digits = id.digits();
    match digits.as_bytes().last() {
        None => NodeIdentifier::decimal(int_part, "1"),
        Some(b'9') => NodeIdentifier::decimal(int_part, &format!("{}1", digits)),
        Some(&last) => {
            let mut bumped = digits[..digits.len() - 1].to_string();
            bumped.push((last + 1) as char);
            NodeIdentifier::decimal(int_part, &bumped)
        }
    }
}

/// Same integer part, both decimal. Pads both suffixes to a common width and
/// increments `before` when there is room (`1.18`, `1.2` give `1.19`),
/// otherwise appends a digit (`1.18`, `1.19` give `1.181`).
fn increment_or_append(int_part: u64, before: &str, after: &str) -> NodeIdentifier {
    let width = before.len().max(after.len());
    let padded_before = format!("{:0<width$}", before, width = width);
    let padded_after = format!("{:0<width$}", after, width = width);

    if let (Ok(b), Ok(a)) = (padded_before.parse::<u64>(), padded_after.parse::<u64>()) {
        if a > b && a - b > 1 {
            let bumped = format!("{:0>width$}", b + 1, width = width);
            return NodeIdentifier::decimal(int_part, &bumped);
        }
    }
    NodeIdentifier::decimal(int_part, &format!("{}1", before))
}

/// General-purpose midpoint for when the preferred shapes don't fit.
fn midpoint(before: &NodeIdentifier, after: &NodeIdentifier) -> NodeIdentifier {
    let int_part = before.int_part();
    let lo = before.digits().trim_end_matches('0');
    let digits = if int_part == after.int_part() {
        midpoint_digits(lo.as_bytes(), Some(after.digits().trim_end_matches('0').as_bytes()))
    } else {
        // Anything with `before`'s integer part above `before` is below `after`
        midpoint_digits(lo.as_bytes(), None)
    };
    NodeIdentifier::decimal(int_part, &digits)
}

/// Digits of a fraction strictly between `0.lo` and `0.hi` (`hi = None` means 1).
///
/// Requires `lo < hi` and no trailing zeros on either; the result has no
/// trailing zero either.
fn midpoint_digits(lo: &[u8], hi: Option<&[u8]>) -> String {
    if let Some(hi) = hi {
        let mut n = 0;
        while n < hi.len() && lo.get(n).copied().unwrap_or(b'0') == hi[n] {
            n += 1;
        }
        if n > 0 {
            let rest_lo = lo.get(n..).unwrap_or(&[]);
            let mut out = String::from_utf8_lossy(&hi[..n]).into_owned();
            out.push_str(&midpoint_digits(rest_lo, Some(&hi[n..])));
            return out;
        }
    }

    let digit_lo = lo.first().map(|d| d - b'0').unwrap_or(0);
    let digit_hi = hi.and_then(|h| h.first()).map(|d| d - b'0').unwrap_or(10);

    if digit_hi - digit_lo > 1 {
        let mid = (digit_lo + digit_hi + 1) / 2;
        return ((b'0' + mid) as char).to_string();
    }

    if let Some(h) = hi {
        if h.len() > 1 {
            return (h[0] as char).to_string();
        }
    }

    let mut out = ((b'0' + digit_lo) as char).to_string();
    out.push_str(&midpoint_digits(lo.get(1..).unwrap_or(&[]), None));
    out
}
