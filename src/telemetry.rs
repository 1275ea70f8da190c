//! Structured reporting of broken invariants and protocol anomalies.
//!
//! Instead of logging ad hoc with `tracing::warn!`, the engine builds a [`Violation`]
//! and hands it to a [`ViolationObserver`]. Without an observer the violation goes to
//! [`TracingObserver`]; tests install a [`CollectingObserver`] and assert on what was
//! recorded.
//!
//! # Example
//!
//! ```
//! use keyframe_rollback::telemetry::{CollectingObserver, ViolationKind};
//! use keyframe_rollback::{EngineBuilder, Game, PlayerId};
//! use std::sync::Arc;
//!
//! # #[derive(Default)]
//! # struct Noop;
//! # impl Game for Noop {
//! #     type Input = u8;
//! #     type State = ();
//! #     fn tick(&mut self, _inputs: &[u8]) {}
//! #     fn save_state(&self) {}
//! #     fn load_state(&mut self, _state: &()) {}
//! # }
//! let observer = Arc::new(CollectingObserver::new());
//! let mut host = EngineBuilder::<Noop>::new()
//!     .with_violation_observer(observer.clone())
//!     .with_state_broadcast(|_| {})
//!     .start_host(Noop, PlayerId::new(0), None)
//!     .unwrap();
//! host.update().unwrap();
//! assert!(!observer.has_violation(ViolationKind::Invariant));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::Frame;

// `None` and `Frame::NULL` become `null`; real frames a bare integer.
mod frame_serializer {
    use crate::Frame;
    use serde::Serializer;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(frame: &Option<Frame>, serializer: S) -> Result<S::Ok, S::Error> {
        match frame.and_then(Frame::to_option) {
            Some(frame) => serializer.serialize_i32(frame.as_i32()),
            None => serializer.serialize_none(),
        }
    }
}

/// Severity of a violation, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Recovered from, e.g. a keyframe replaced a diverging local frame.
    Warning,
    /// The engine kept running but its output may be wrong.
    Error,
    /// Peers have diverged or internal state is inconsistent.
    Critical,
}

/// Where a violation was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// Future input queues.
    InputQueue,
    /// Keyframe broadcast or application.
    Keyframe,
    /// A confirmed frame hashed differently than on the host.
    ChecksumMismatch,
    /// Replaying a tick from the same state and inputs produced a different state.
    Determinism,
    /// A wire message that does not fit the exchange, e.g. an unmatched pong.
    Network,
    /// An [`InvariantChecker`] check failed.
    Invariant,
    /// A bug in this crate.
    InternalError,
}

impl ViolationSeverity {
    /// Lowercase label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl ViolationKind {
    /// Lowercase label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InputQueue => "input_queue",
            Self::Keyframe => "keyframe",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::Determinism => "determinism",
            Self::Network => "network",
            Self::Invariant => "invariant",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reported violation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Violation {
    /// How bad it is.
    pub severity: ViolationSeverity,
    /// What went wrong.
    pub kind: ViolationKind,
    /// Human-readable description.
    pub message: String,
    /// `file:line` of the report site.
    pub location: &'static str,
    /// The frame the violation concerns, when there is one.
    #[serde(serialize_with = "frame_serializer::serialize")]
    pub frame: Option<Frame>,
    /// Extra key/value details, sorted by key.
    pub context: BTreeMap<String, String>,
}

impl Violation {
    /// Creates a violation without frame or context.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            frame: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the frame the violation concerns.
    #[must_use]
    pub fn with_frame(self, frame: Frame) -> Self {
        Self {
            frame: Some(frame),
            ..self
        }
    }

    /// Adds a context entry, replacing an earlier one with the same key.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// The violation as a single line of JSON.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.severity, self.kind, self.message)?;
        if let Some(frame) = self.frame.and_then(Frame::to_option) {
            write!(f, " [frame {}]", frame)?;
        }
        for (key, value) in &self.context {
            write!(f, " {}={}", key, value)?;
        }
        write!(f, " ({})", self.location)
    }
}

/// Receives violations as they are reported.
///
/// The engine holds its observer in an `Arc` and may be moved across threads, so
/// observers must be `Send + Sync`.
pub trait ViolationObserver: Send + Sync {
    /// Called once per violation.
    fn on_violation(&self, violation: &Violation);
}

/// Logs violations through `tracing`: warnings at `WARN`, the rest at `ERROR`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &Violation) {
        let frame = violation.frame.and_then(Frame::to_option).map(Frame::as_i32);
        let kind = violation.kind.as_str();
        if violation.severity == ViolationSeverity::Warning {
            tracing::warn!(
                kind,
                frame,
                location = violation.location,
                context = ?violation.context,
                "{}",
                violation.message
            );
        } else {
            tracing::error!(
                severity = violation.severity.as_str(),
                kind,
                frame,
                location = violation.location,
                context = ?violation.context,
                "{}",
                violation.message
            );
        }
    }
}

/// Keeps every violation in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<Violation>>,
}

impl CollectingObserver {
    /// Creates an empty observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of everything collected so far, oldest first.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        self.violations.lock().clone()
    }

    /// Number of collected violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// Returns `true` if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if a violation of `kind` was collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// Collected violations of `kind`, oldest first.
    #[must_use]
    pub fn violations_of_kind(&self, kind: ViolationKind) -> Vec<Violation> {
        let violations = self.violations.lock();
        violations.iter().filter(|v| v.kind == kind).cloned().collect()
    }

    /// Drops everything collected so far.
    pub fn clear(&self) {
        self.violations.lock().clear();
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &Violation) {
        self.violations.lock().push(violation.clone());
    }
}

/// Forwards each violation to every observer it holds, in insertion order.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ViolationObserver>>,
}

impl CompositeObserver {
    /// Creates an observer that forwards nowhere.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `observer` as a target.
    #[must_use]
    pub fn with(mut self, observer: Arc<dyn ViolationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Returns `true` if there are no targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl ViolationObserver for CompositeObserver {
    fn on_violation(&self, violation: &Violation) {
        self.observers
            .iter()
            .for_each(|observer| observer.on_violation(violation));
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("targets", &self.observers.len())
            .finish()
    }
}

/// Hands `violation` to `observer`, or to [`TracingObserver`] if there is none.
pub fn report_to_observer<O: ViolationObserver + ?Sized>(
    observer: Option<&Arc<O>>,
    violation: &Violation,
) {
    if let Some(observer) = observer {
        observer.on_violation(violation);
    } else {
        TracingObserver.on_violation(violation);
    }
}

/// Reports a violation through [`TracingObserver`].
///
/// An optional `frame = ...` before the message sets [`Violation::frame`].
///
/// ```
/// use keyframe_rollback::report_violation;
/// use keyframe_rollback::telemetry::{ViolationKind, ViolationSeverity};
/// use keyframe_rollback::Frame;
///
/// report_violation!(ViolationSeverity::Warning, ViolationKind::InputQueue, "gap of {} frames", 2);
/// report_violation!(
///     ViolationSeverity::Warning,
///     ViolationKind::InputQueue,
///     frame = Frame::new(7),
///     "input skipped"
/// );
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, frame = $frame:expr, $($message:tt)+) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($($message)+),
            concat!(file!(), ":", line!()),
        )
        .with_frame($frame);
        $crate::telemetry::ViolationObserver::on_violation(
            &$crate::telemetry::TracingObserver,
            &violation,
        );
    }};
    ($severity:expr, $kind:expr, $($message:tt)+) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($($message)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::ViolationObserver::on_violation(
            &$crate::telemetry::TracingObserver,
            &violation,
        );
    }};
}

/// Reports a violation to an `Option<Arc<dyn ViolationObserver>>`, falling back to
/// [`TracingObserver`]. Accepts the same optional `frame = ...` as
/// [`report_violation!`].
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $severity:expr, $kind:expr, frame = $frame:expr, $($message:tt)+) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($($message)+),
            concat!(file!(), ":", line!()),
        )
        .with_frame($frame);
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};
    ($observer:expr, $severity:expr, $kind:expr, $($message:tt)+) => {{
        let violation = $crate::telemetry::Violation::new(
            $severity,
            $kind,
            format!($($message)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};
}

// ------------------------------------------
// Structural invariants
// ------------------------------------------

/// A broken structural invariant, returned by [`InvariantChecker::check_invariants`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InvariantViolation {
    /// The type whose invariant failed.
    pub type_name: &'static str,
    /// The invariant, stated as what was found wrong.
    pub invariant: String,
    /// The values involved.
    pub details: Option<String>,
}

impl InvariantViolation {
    /// Creates a violation for `type_name` without details.
    #[must_use]
    pub fn new(type_name: &'static str, invariant: impl Into<String>) -> Self {
        Self {
            type_name,
            invariant: invariant.into(),
            details: None,
        }
    }

    /// Sets the values involved.
    #[must_use]
    pub fn with_details(self, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..self
        }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {} ({})", self.type_name, self.invariant, details),
            None => write!(f, "{}: {}", self.type_name, self.invariant),
        }
    }
}

/// Types that can verify their own structural invariants.
///
/// Implemented by the history buffer, the input queues, the player registry and the
/// engine. Each implementation documents the invariants it checks.
pub trait InvariantChecker {
    /// Returns the first broken invariant, if any.
    fn check_invariants(&self) -> Result<(), InvariantViolation>;
}

/// Runs [`InvariantChecker::check_invariants`] on `$value` in debug builds or with
/// `paranoid`, reporting a failure as a critical [`ViolationKind::Invariant`].
/// Expands to nothing otherwise.
#[macro_export]
#[cfg(any(debug_assertions, feature = "paranoid"))]
macro_rules! debug_check_invariants {
    ($value:expr, $operation:expr) => {{
        use $crate::telemetry::InvariantChecker as _;
        if let Err(violation) = $value.check_invariants() {
            $crate::report_violation!(
                $crate::telemetry::ViolationSeverity::Critical,
                $crate::telemetry::ViolationKind::Invariant,
                "{} [after {}]",
                violation,
                $operation
            );
        }
    }};
}

/// Runs [`InvariantChecker::check_invariants`] on `$value` in debug builds or with
/// `paranoid`, reporting a failure as a critical [`ViolationKind::Invariant`].
/// Expands to nothing otherwise.
#[macro_export]
#[cfg(not(any(debug_assertions, feature = "paranoid")))]
macro_rules! debug_check_invariants {
    ($value:expr, $operation:expr) => {{}};
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn stale_keyframe() -> Violation {
        Violation::new(
            ViolationSeverity::Error,
            ViolationKind::Keyframe,
            "keyframe older than frontier",
            "src/lib.rs:1",
        )
        .with_frame(Frame::new(12))
        .with_context("frontier", 15)
    }

    #[test]
    fn severities_are_ordered() {
        assert!(ViolationSeverity::Warning < ViolationSeverity::Error);
        assert!(ViolationSeverity::Error < ViolationSeverity::Critical);
    }

    #[test]
    fn display_lists_frame_and_context() {
        assert_eq!(
            stale_keyframe().to_string(),
            "error keyframe: keyframe older than frontier [frame 12] frontier=15 (src/lib.rs:1)"
        );
    }

    #[test]
    fn null_frame_is_not_displayed() {
        let violation = Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::InputQueue,
            "empty",
            "here",
        )
        .with_frame(Frame::NULL);
        assert_eq!(violation.to_string(), "warning input_queue: empty (here)");
    }

    #[test]
    fn collecting_observer_filters_by_kind() {
        let observer = CollectingObserver::new();
        observer.on_violation(&stale_keyframe());
        observer.on_violation(&Violation::new(
            ViolationSeverity::Warning,
            ViolationKind::InputQueue,
            "queued out of order",
            "here",
        ));
        assert_eq!(observer.len(), 2);
        assert!(observer.has_violation(ViolationKind::Keyframe));
        assert!(!observer.has_violation(ViolationKind::Determinism));
        assert_eq!(observer.violations_of_kind(ViolationKind::InputQueue).len(), 1);
        observer.clear();
        assert!(observer.is_empty());
    }

    #[test]
    fn composite_observer_reaches_every_target() {
        let first = Arc::new(CollectingObserver::new());
        let second = Arc::new(CollectingObserver::new());
        let composite = CompositeObserver::new()
            .with(first.clone())
            .with(second.clone());
        assert_eq!(composite.len(), 2);

        composite.on_violation(&stale_keyframe());
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn report_violation_to_records_frame_and_location() {
        let collector = Arc::new(CollectingObserver::new());
        let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
        report_violation_to!(
            observer,
            ViolationSeverity::Critical,
            ViolationKind::Determinism,
            frame = Frame::new(4),
            "resimulated {} frames",
            3
        );
        report_violation_to!(
            observer,
            ViolationSeverity::Warning,
            ViolationKind::Network,
            "no frame"
        );

        let collected = collector.violations();
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].message, "resimulated 3 frames");
        assert_eq!(collected[0].frame, Some(Frame::new(4)));
        assert!(collected[0].location.contains("telemetry.rs"));
        assert_eq!(collected[1].frame, None);
    }

    #[test]
    fn report_violation_to_without_observer_logs() {
        let observer: Option<Arc<dyn ViolationObserver>> = None;
        report_violation_to!(
            observer,
            ViolationSeverity::Warning,
            ViolationKind::InputQueue,
            frame = Frame::new(1),
            "fallback"
        );
    }

    struct Counted {
        checks: std::cell::Cell<usize>,
        broken: bool,
    }

    impl InvariantChecker for Counted {
        fn check_invariants(&self) -> Result<(), InvariantViolation> {
            self.checks.set(self.checks.get() + 1);
            if self.broken {
                Err(InvariantViolation::new("Counted", "broken"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn debug_check_invariants_accepts_values_and_references() {
        let mut counted = Counted {
            checks: std::cell::Cell::new(0),
            broken: false,
        };
        crate::debug_check_invariants!(counted, "owned");
        crate::debug_check_invariants!(&counted, "shared");
        let exclusive = &mut counted;
        crate::debug_check_invariants!(exclusive, "exclusive");
        exclusive.broken = true;
        crate::debug_check_invariants!(exclusive, "broken");
        assert_eq!(
            counted.checks.get(),
            if cfg!(any(debug_assertions, feature = "paranoid")) {
                4
            } else {
                0
            }
        );
    }

    #[test]
    fn invariant_violation_display() {
        let violation = InvariantViolation::new("History", "frames not contiguous")
            .with_details("index=2, expected=5, actual=7");
        assert_eq!(
            violation.to_string(),
            "History: frames not contiguous (index=2, expected=5, actual=7)"
        );
        assert_eq!(
            InvariantViolation::new("History", "empty").to_string(),
            "History: empty"
        );
    }

    #[cfg(feature = "json")]
    #[test]
    fn violation_json_uses_bare_frame() {
        let json = stale_keyframe().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["frame"], 12);
        assert_eq!(value["kind"], "keyframe");
        assert_eq!(value["context"]["frontier"], "15");
    }
}
