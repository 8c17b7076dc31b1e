//! Staleness-aware transform resolution.
//!
//! A [`FallbackResolver`] asks the [`TransformLookup`] service for the latest
//! transform between two frames on every call.  When the lookup fails, or
//! the transform is older than the policy's `max_staleness`, the value of the
//! policy's fallback signal is used instead.  Lookup errors never escape;
//! they only select the stale path.
//!
//! [`TransformListener`] manages several resolvers by name.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dgbridge_middleware::converter::{Conversion, HomogeneousConv};
use dgbridge_types::{
    BridgeError, InternalRepr, InternalType, LookupError, MatrixHomogeneous, SignalRef,
    SignalSource, Tick, TransformStamped, Value,
};
use tracing::{debug, info, warn};

use crate::transform::{LookupTime, TransformLookup};

pub const DEFAULT_MAX_STALENESS: Duration = Duration::from_millis(500);

/// Shared, read-mostly lookup service.
pub type LookupRef = Arc<dyn TransformLookup + Send + Sync>;

/// How old a transform may be, and what to use when it is older.
#[derive(Clone)]
pub struct FallbackPolicy {
    max_staleness: Duration,
    fallback: SignalRef,
}

impl FallbackPolicy {
    /// # Errors
    ///
    /// [`BridgeError::SignalTypeMismatch`] when `fallback` is not declared as
    /// a homogeneous transform.
    pub fn new(max_staleness: Duration, fallback: SignalRef) -> Result<Self, BridgeError> {
        if fallback.declared_type() != InternalType::HomogeneousTransform {
            return Err(BridgeError::SignalTypeMismatch {
                name: fallback.name().to_string(),
                declared: InternalType::HomogeneousTransform,
                kind: fallback.declared_type().repr_kind(),
            });
        }
        Ok(Self {
            max_staleness,
            fallback,
        })
    }

    pub fn max_staleness(&self) -> Duration {
        self.max_staleness
    }

    pub fn fallback(&self) -> &SignalRef {
        &self.fallback
    }
}

/// Why the fallback was used.
#[derive(Debug, Clone, PartialEq)]
pub enum StaleReason {
    LookupFailed(LookupError),
    TooOld { age: Duration, max: Duration },
}

/// Outcome of the lookup step.
#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    Fresh(TransformStamped),
    Stale(StaleReason),
}

/// Resolves the transform between two frames, falling back when stale.
pub struct FallbackResolver {
    name: String,
    target_frame: String,
    source_frame: String,
    policy: FallbackPolicy,
    lookup: LookupRef,
}

impl FallbackResolver {
    pub fn new(
        name: impl Into<String>,
        target_frame: impl Into<String>,
        source_frame: impl Into<String>,
        policy: FallbackPolicy,
        lookup: LookupRef,
    ) -> Self {
        Self {
            name: name.into(),
            target_frame: target_frame.into(),
            source_frame: source_frame.into(),
            policy,
            lookup,
        }
    }

    pub fn target_frame(&self) -> &str {
        &self.target_frame
    }

    pub fn source_frame(&self) -> &str {
        &self.source_frame
    }

    pub fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    /// Look up the latest transform and judge its age against the current
    /// wall-clock time.  A stamp in the future counts as fresh.
    pub fn check(&self, time: Tick) -> Freshness {
        let msg = match self
            .lookup
            .lookup(&self.target_frame, &self.source_frame, LookupTime::Latest)
        {
            Ok(msg) => msg,
            Err(e) => {
                warn!(
                    resolver = %self.name,
                    target = %self.target_frame,
                    source = %self.source_frame,
                    time,
                    error = %e,
                    "unable to get transform at time {time}"
                );
                return Freshness::Stale(StaleReason::LookupFailed(e));
            }
        };

        let age = (Utc::now() - msg.header.stamp.to_datetime())
            .to_std()
            .unwrap_or(Duration::ZERO);
        if age > self.policy.max_staleness {
            debug!(resolver = %self.name, time, age_ms = age.as_millis() as u64, "transform too old");
            return Freshness::Stale(StaleReason::TooOld {
                age,
                max: self.policy.max_staleness,
            });
        }
        Freshness::Fresh(msg)
    }

    /// The transform at `time`: the looked-up one when fresh, the fallback
    /// signal's value otherwise.
    pub fn resolve(&self, time: Tick) -> MatrixHomogeneous {
        match self.check(time) {
            Freshness::Fresh(msg) => match HomogeneousConv::internal_of(&msg.transform) {
                Ok(m) => m,
                Err(e) => {
                    warn!(resolver = %self.name, time, error = %e, "cannot decode transform");
                    self.fallback_at(time)
                }
            },
            Freshness::Stale(_) => self.fallback_at(time),
        }
    }

    fn fallback_at(&self, time: Tick) -> MatrixHomogeneous {
        let value = self.policy.fallback.value_at(time);
        match MatrixHomogeneous::from_value(&value) {
            Some(m) => *m,
            None => {
                warn!(
                    resolver = %self.name,
                    fallback = %self.policy.fallback.name(),
                    found = value.kind(),
                    "fallback did not produce a homogeneous matrix"
                );
                MatrixHomogeneous::identity()
            }
        }
    }
}

impl SignalSource for FallbackResolver {
    fn name(&self) -> &str {
        &self.name
    }

    fn declared_type(&self) -> InternalType {
        InternalType::HomogeneousTransform
    }

    fn value_at(&self, time: Tick) -> Value {
        self.resolve(time).into_value()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TransformListener
// ────────────────────────────────────────────────────────────────────────────

/// Named [`FallbackResolver`]s sharing one lookup service.
pub struct TransformListener {
    name: String,
    lookup: LookupRef,
    resolvers: BTreeMap<String, Arc<FallbackResolver>>,
}

impl TransformListener {
    pub fn new(name: impl Into<String>, lookup: LookupRef) -> Self {
        Self {
            name: name.into(),
            lookup,
            resolvers: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Track the transform from `source` into `target` under `name`.
    ///
    /// The returned resolver is also a signal that can be exported.
    pub fn add(
        &mut self,
        name: &str,
        target: &str,
        source: &str,
        policy: FallbackPolicy,
    ) -> Result<Arc<FallbackResolver>, BridgeError> {
        if self.resolvers.contains_key(name) {
            return Err(BridgeError::DuplicateBinding(name.to_string()));
        }
        let resolver = Arc::new(FallbackResolver::new(
            name,
            target,
            source,
            policy,
            Arc::clone(&self.lookup),
        ));
        info!(listener = %self.name, binding = %name, target, source, "transform listener added");
        self.resolvers.insert(name.to_string(), Arc::clone(&resolver));
        Ok(resolver)
    }

    pub fn rm(&mut self, name: &str) -> Result<(), BridgeError> {
        self.resolvers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| BridgeError::UnknownBinding(name.to_string()))
    }

    pub fn list(&self) -> Vec<String> {
        self.resolvers.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<FallbackResolver>> {
        self.resolvers.get(name).cloned()
    }

    /// Resolve the transform tracked under `name` at `time`.
    pub fn resolve(&self, name: &str, time: Tick) -> Result<MatrixHomogeneous, BridgeError> {
        self.resolvers
            .get(name)
            .map(|resolver| resolver.resolve(time))
            .ok_or_else(|| BridgeError::UnknownBinding(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;

    use chrono::TimeDelta;
    use dgbridge_types::{Header, Quaternion, Signal, Stamp, Transform, Vector3};

    use crate::transform::TfBuffer;

    /// Lookup service returning a fixed answer.
    struct FixedLookup(Result<TransformStamped, LookupError>);

    impl TransformLookup for FixedLookup {
        fn lookup(&self, _: &str, _: &str, _: LookupTime) -> Result<TransformStamped, LookupError> {
            self.0.clone()
        }
    }

    fn fallback_matrix() -> MatrixHomogeneous {
        let mut m = MatrixHomogeneous::identity();
        m.set_translation(Vector3::new(9.0, 9.0, 9.0));
        m
    }

    fn policy(max_ms: u64) -> FallbackPolicy {
        let fallback = Arc::new(Signal::new("fallback", |_| fallback_matrix()));
        FallbackPolicy::new(Duration::from_millis(max_ms), fallback).unwrap()
    }

    fn transform_aged(ms: i64) -> TransformStamped {
        TransformStamped {
            header: Header {
                seq: 0,
                stamp: Stamp::from(Utc::now() - TimeDelta::milliseconds(ms)),
                frame_id: "world".to_string(),
            },
            child_frame_id: "waist".to_string(),
            transform: Transform::new(Vector3::new(0.0, 0.0, 0.8), Quaternion::identity()),
        }
    }

    fn resolver(answer: Result<TransformStamped, LookupError>, max_ms: u64) -> FallbackResolver {
        FallbackResolver::new(
            "waist",
            "world",
            "waist",
            policy(max_ms),
            Arc::new(FixedLookup(answer)),
        )
    }

    #[test]
    fn old_transform_yields_fallback() {
        let r = resolver(Ok(transform_aged(500)), 100);
        assert!(matches!(r.check(0), Freshness::Stale(StaleReason::TooOld { .. })));
        assert_eq!(r.resolve(0), fallback_matrix());
    }

    #[test]
    fn recent_transform_is_decoded() {
        let r = resolver(Ok(transform_aged(10)), 100);
        let m = r.resolve(0);
        assert_eq!(m.translation(), Vector3::new(0.0, 0.0, 0.8));
        assert_eq!(m.rotation(), MatrixHomogeneous::identity().rotation());
    }

    #[test]
    fn future_stamp_counts_as_fresh() {
        let r = resolver(Ok(transform_aged(-1_000)), 100);
        assert!(matches!(r.check(0), Freshness::Fresh(_)));
    }

    #[test]
    fn failed_lookup_yields_fallback() {
        let r = resolver(Err(LookupError::UnknownFrame("waist".to_string())), 100);
        assert_eq!(
            r.check(3),
            Freshness::Stale(StaleReason::LookupFailed(LookupError::UnknownFrame(
                "waist".to_string()
            )))
        );
        assert_eq!(r.resolve(3), fallback_matrix());
    }

    #[test]
    fn degenerate_transform_yields_fallback() {
        let mut msg = transform_aged(0);
        msg.transform.rotation = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        let r = resolver(Ok(msg), 100);
        assert_eq!(r.resolve(0), fallback_matrix());
    }

    #[test]
    fn policy_requires_a_homogeneous_fallback() {
        let scalar = Arc::new(Signal::new("s", |_| 0.0_f64));
        assert!(matches!(
            FallbackPolicy::new(DEFAULT_MAX_STALENESS, scalar),
            Err(BridgeError::SignalTypeMismatch { .. })
        ));
    }

    #[test]
    fn resolver_is_a_signal() {
        let r = resolver(Ok(transform_aged(500)), 100);
        assert_eq!(r.declared_type(), InternalType::HomogeneousTransform);
        assert_eq!(r.value_at(1), Value::Homogeneous(fallback_matrix()));
    }

    #[test]
    fn listener_reads_a_shared_buffer() {
        let buffer = Arc::new(RwLock::new(TfBuffer::new()));
        let mut listener = TransformListener::new("tf", buffer.clone());
        listener.add("waist", "world", "waist", policy(100)).unwrap();

        // Nothing buffered yet.
        assert_eq!(listener.resolve("waist", 0).unwrap(), fallback_matrix());

        buffer.write().unwrap().ingest(&transform_aged(10));
        let m = listener.resolve("waist", 1).unwrap();
        assert_eq!(m.translation(), Vector3::new(0.0, 0.0, 0.8));
    }

    #[test]
    fn listener_add_list_rm() {
        let lookup: LookupRef = Arc::new(FixedLookup(Ok(transform_aged(0))));
        let mut listener = TransformListener::new("tf", lookup);
        listener.add("b", "world", "b", policy(100)).unwrap();
        listener.add("a", "world", "a", policy(100)).unwrap();
        assert_eq!(listener.list(), vec!["a", "b"]);
        assert!(matches!(
            listener.add("a", "world", "a", policy(100)),
            Err(BridgeError::DuplicateBinding(_))
        ));

        listener.rm("a").unwrap();
        assert!(matches!(listener.rm("a"), Err(BridgeError::UnknownBinding(_))));
        assert!(matches!(
            listener.resolve("a", 0),
            Err(BridgeError::UnknownBinding(_))
        ));
        assert!(listener.get("b").is_some());
    }
}
