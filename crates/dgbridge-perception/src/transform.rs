//! Transform buffer: a time-aware frame graph.
//!
//! Maintains a graph of named reference frames and, for each parent → child
//! edge, a bounded history of stamped [`Transform`]s.  Given two frame names
//! the buffer composes the chain of edges between them via BFS, walking
//! edges forward (parent to child) or backward (through the inverse).
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use dgbridge_perception::transform::{LookupTime, TfBuffer, TransformLookup};
//! use dgbridge_types::{Quaternion, Transform, Vector3};
//!
//! let mut tf = TfBuffer::new();
//! let now = Utc::now();
//!
//! // base_link is 1 m forward of world origin, same orientation.
//! tf.set_transform("world", "base_link",
//!     Transform::new(Vector3::new(1.0, 0.0, 0.0), Quaternion::identity()), now);
//!
//! // camera is 0.5 m forward of base_link, same orientation.
//! tf.set_transform("base_link", "camera",
//!     Transform::new(Vector3::new(0.5, 0.0, 0.0), Quaternion::identity()), now);
//!
//! let t = tf.lookup("world", "camera", LookupTime::Latest).unwrap();
//! assert!((t.transform.translation.x - 1.5).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use dgbridge_types::{Header, LookupError, Stamp, Transform, TransformStamped};
use tracing::warn;

/// Samples kept per edge.
pub const DEFAULT_HISTORY: usize = 64;

/// Which sample of each edge a lookup uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupTime {
    /// The newest sample of every edge.
    Latest,
    /// The newest sample not after the given instant.
    At(DateTime<Utc>),
}

/// External spatial-transform lookup service.
pub trait TransformLookup {
    /// The transform mapping points of `source` into `target`, stamped with
    /// the age of its oldest contributing sample.
    ///
    /// The returned message has `header.frame_id == target` and
    /// `child_frame_id == source`.
    fn lookup(
        &self,
        target: &str,
        source: &str,
        time: LookupTime,
    ) -> Result<TransformStamped, LookupError>;
}

/// A buffer shared between the task feeding it and its readers.
impl<T: TransformLookup> TransformLookup for RwLock<T> {
    fn lookup(
        &self,
        target: &str,
        source: &str,
        time: LookupTime,
    ) -> Result<TransformStamped, LookupError> {
        self.read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(target, source, time)
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    stamp: DateTime<Utc>,
    transform: Transform,
}

/// Stamped history of one edge, ordered by stamp.
#[derive(Debug, Default)]
struct EdgeHistory {
    samples: VecDeque<Sample>,
}

impl EdgeHistory {
    fn insert(&mut self, sample: Sample, capacity: usize) {
        let at = self.samples.partition_point(|s| s.stamp < sample.stamp);
        match self.samples.get_mut(at) {
            Some(existing) if existing.stamp == sample.stamp => *existing = sample,
            _ => self.samples.insert(at, sample),
        }
        while self.samples.len() > capacity {
            self.samples.pop_front();
        }
    }

    fn select(&self, time: LookupTime) -> Option<Sample> {
        match time {
            LookupTime::Latest => self.samples.back().copied(),
            LookupTime::At(t) => {
                let after = self.samples.partition_point(|s| s.stamp <= t);
                after.checked_sub(1).and_then(|i| self.samples.get(i)).copied()
            }
        }
    }
}

/// In-memory [`TransformLookup`] fed with stamped transforms.
///
/// Frames are identified by arbitrary string names (e.g. `"world"`,
/// `"base_link"`, `"camera"`).  Each child has its history kept per parent;
/// adding `"A" → "B"` lets lookups walk both `A → B` and `B → A`.
#[derive(Debug)]
pub struct TfBuffer {
    /// `edges[parent][child]`
    edges: HashMap<String, HashMap<String, EdgeHistory>>,
    /// `parents[child]`
    parents: HashMap<String, HashSet<String>>,
    capacity: usize,
}

impl Default for TfBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY)
    }
}

impl TfBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer keeping at most `capacity` samples per edge (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            edges: HashMap::new(),
            parents: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record the pose of `child_frame` in `parent_frame` at `stamp`.
    ///
    /// A sample with the same stamp as an existing one replaces it.
    pub fn set_transform(
        &mut self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform,
        stamp: DateTime<Utc>,
    ) {
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .entry(child_frame.to_string())
            .or_default()
            .insert(Sample { stamp, transform }, self.capacity);
        self.parents
            .entry(child_frame.to_string())
            .or_default()
            .insert(parent_frame.to_string());
    }

    /// Record a wire transform: parent is `header.frame_id`, child is
    /// `child_frame_id`.
    ///
    /// Returns `false`, and records nothing, when either frame is unnamed.
    pub fn ingest(&mut self, msg: &TransformStamped) -> bool {
        if msg.header.frame_id.is_empty() || msg.child_frame_id.is_empty() {
            warn!(
                parent = %msg.header.frame_id,
                child = %msg.child_frame_id,
                "ignoring transform with an unnamed frame"
            );
            return false;
        }
        self.set_transform(
            &msg.header.frame_id,
            &msg.child_frame_id,
            msg.transform,
            msg.header.stamp.to_datetime(),
        );
        true
    }

    /// Every known frame, sorted.
    pub fn frames(&self) -> Vec<String> {
        let mut frames: Vec<String> = self
            .edges
            .keys()
            .chain(self.parents.keys())
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        frames.sort();
        frames
    }

    pub fn has_frame(&self, frame: &str) -> bool {
        self.edges.contains_key(frame) || self.parents.contains_key(frame)
    }

    pub fn clear(&mut self) {
        self.edges.clear();
        self.parents.clear();
    }

    /// Frames adjacent to `frame`, with the transform from `frame` to each
    /// and that transform's stamp.
    fn neighbours(
        &self,
        frame: &str,
        time: LookupTime,
        failure: &mut Option<LookupError>,
    ) -> Vec<(String, Transform, DateTime<Utc>)> {
        let mut out = Vec::new();
        let mut pick = |parent: &str, child: &str, history: &EdgeHistory| match history.select(time) {
            Some(sample) => Some(sample),
            None => {
                *failure = Some(LookupError::ExtrapolationIntoPast {
                    parent: parent.to_string(),
                    child: child.to_string(),
                });
                None
            }
        };

        if let Some(children) = self.edges.get(frame) {
            for (child, history) in children {
                if let Some(sample) = pick(frame, child, history) {
                    out.push((child.clone(), sample.transform, sample.stamp));
                }
            }
        }
        if let Some(parents) = self.parents.get(frame) {
            for parent in parents {
                let Some(history) = self.edges.get(parent).and_then(|c| c.get(frame)) else {
                    continue;
                };
                if let Some(sample) = pick(parent, frame, history) {
                    out.push((parent.clone(), sample.transform.inverse(), sample.stamp));
                }
            }
        }
        out
    }
}

impl TransformLookup for TfBuffer {
    fn lookup(
        &self,
        target: &str,
        source: &str,
        time: LookupTime,
    ) -> Result<TransformStamped, LookupError> {
        let stamped = |transform: Transform, stamp: DateTime<Utc>| TransformStamped {
            header: Header {
                seq: 0,
                stamp: Stamp::from(stamp),
                frame_id: target.to_string(),
            },
            child_frame_id: source.to_string(),
            transform,
        };

        if target == source {
            let stamp = match time {
                LookupTime::Latest => Utc::now(),
                LookupTime::At(t) => t,
            };
            return Ok(stamped(Transform::identity(), stamp));
        }
        for frame in [target, source] {
            if !self.has_frame(frame) {
                return Err(LookupError::UnknownFrame(frame.to_string()));
            }
        }

        // BFS from target; each queue item carries T_target_current and the
        // oldest stamp seen along the way.
        let mut queue: VecDeque<(String, Transform, Option<DateTime<Utc>>)> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut failure = None;

        queue.push_back((target.to_string(), Transform::identity(), None));
        visited.insert(target.to_string());

        while let Some((current, accumulated, oldest)) = queue.pop_front() {
            for (next, edge_tf, stamp) in self.neighbours(&current, time, &mut failure) {
                if visited.contains(&next) {
                    continue;
                }
                let composed = accumulated.compose(edge_tf);
                let oldest = oldest.map_or(stamp, |o| o.min(stamp));
                if next == source {
                    return Ok(stamped(composed, oldest));
                }
                visited.insert(next.clone());
                queue.push_back((next, composed, Some(oldest)));
            }
        }

        Err(failure.unwrap_or_else(|| LookupError::NoPath {
            source_frame: source.to_string(),
            target_frame: target.to_string(),
        }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use dgbridge_types::{Quaternion, Vector3};
    use std::f64::consts::FRAC_1_SQRT_2;

    fn offset_x(x: f64) -> Transform {
        Transform::new(Vector3::new(x, 0.0, 0.0), Quaternion::identity())
    }

    fn ms(n: i64) -> TimeDelta {
        TimeDelta::milliseconds(n)
    }

    #[test]
    fn lookup_same_frame_returns_identity() {
        let tf = TfBuffer::new();
        let t = tf.lookup("world", "world", LookupTime::Latest).unwrap();
        assert_eq!(t.transform, Transform::identity());
    }

    #[test]
    fn lookup_direct_edge_carries_frames_and_stamp() {
        let mut tf = TfBuffer::new();
        let now = Utc::now();
        tf.set_transform("world", "base_link", offset_x(1.0), now);

        let t = tf.lookup("world", "base_link", LookupTime::Latest).unwrap();
        assert!((t.transform.translation.x - 1.0).abs() < 1e-9);
        assert_eq!(t.header.frame_id, "world");
        assert_eq!(t.child_frame_id, "base_link");
        assert_eq!(t.header.stamp, Stamp::from(now));
    }

    #[test]
    fn lookup_composed_chain_uses_oldest_stamp() {
        let mut tf = TfBuffer::new();
        let now = Utc::now();
        tf.set_transform("world", "base_link", offset_x(1.0), now);
        tf.set_transform("base_link", "camera", offset_x(0.5), now - ms(300));

        let t = tf.lookup("world", "camera", LookupTime::Latest).unwrap();
        assert!((t.transform.translation.x - 1.5).abs() < 1e-9);
        assert_eq!(t.header.stamp, Stamp::from(now - ms(300)));
    }

    #[test]
    fn lookup_walks_edges_backwards() {
        let mut tf = TfBuffer::new();
        tf.set_transform("world", "base_link", offset_x(1.0), Utc::now());

        let t = tf.lookup("base_link", "world", LookupTime::Latest).unwrap();
        assert!((t.transform.translation.x + 1.0).abs() < 1e-9);
    }

    #[test]
    fn lookup_between_siblings() {
        let mut tf = TfBuffer::new();
        let now = Utc::now();
        tf.set_transform("base_link", "left_hand", offset_x(0.2), now);
        tf.set_transform("base_link", "right_hand", offset_x(-0.2), now);

        let t = tf.lookup("left_hand", "right_hand", LookupTime::Latest).unwrap();
        assert!((t.transform.translation.x + 0.4).abs() < 1e-9);
    }

    #[test]
    fn unknown_frame_and_missing_path_are_errors() {
        let mut tf = TfBuffer::new();
        let now = Utc::now();
        tf.set_transform("world", "base_link", offset_x(1.0), now);
        tf.set_transform("map", "odom", offset_x(1.0), now);

        assert_eq!(
            tf.lookup("world", "ghost", LookupTime::Latest),
            Err(LookupError::UnknownFrame("ghost".to_string()))
        );
        assert!(matches!(
            tf.lookup("world", "odom", LookupTime::Latest),
            Err(LookupError::NoPath { .. })
        ));
    }

    #[test]
    fn lookup_at_time_picks_newest_sample_not_after() {
        let mut tf = TfBuffer::new();
        let t0 = Utc::now();
        tf.set_transform("world", "base_link", offset_x(1.0), t0);
        tf.set_transform("world", "base_link", offset_x(2.0), t0 + ms(100));
        tf.set_transform("world", "base_link", offset_x(3.0), t0 + ms(200));

        let at = tf
            .lookup("world", "base_link", LookupTime::At(t0 + ms(150)))
            .unwrap();
        assert!((at.transform.translation.x - 2.0).abs() < 1e-9);

        let latest = tf.lookup("world", "base_link", LookupTime::Latest).unwrap();
        assert!((latest.transform.translation.x - 3.0).abs() < 1e-9);
    }

    #[test]
    fn lookup_before_history_is_extrapolation() {
        let mut tf = TfBuffer::new();
        let t0 = Utc::now();
        tf.set_transform("world", "base_link", offset_x(1.0), t0);

        assert!(matches!(
            tf.lookup("world", "base_link", LookupTime::At(t0 - ms(1))),
            Err(LookupError::ExtrapolationIntoPast { .. })
        ));
    }

    #[test]
    fn history_is_bounded_and_sorted() {
        let mut tf = TfBuffer::with_capacity(2);
        let t0 = Utc::now();
        tf.set_transform("world", "base_link", offset_x(3.0), t0 + ms(20));
        tf.set_transform("world", "base_link", offset_x(1.0), t0);
        tf.set_transform("world", "base_link", offset_x(2.0), t0 + ms(10));

        // Oldest sample evicted.
        assert!(tf
            .lookup("world", "base_link", LookupTime::At(t0 + ms(5)))
            .is_err());
        let latest = tf.lookup("world", "base_link", LookupTime::Latest).unwrap();
        assert!((latest.transform.translation.x - 3.0).abs() < 1e-9);
    }

    #[test]
    fn lookup_respects_rotation_in_chain() {
        // base_link sits at the world origin, rotated 90° around Z; camera is
        // 1 m along base_link's +X, so (0, 1, 0) in world.
        let q90z = Quaternion::new(0.0, 0.0, FRAC_1_SQRT_2, FRAC_1_SQRT_2);
        let now = Utc::now();
        let mut tf = TfBuffer::new();
        tf.set_transform("world", "base_link", Transform::new(Vector3::zero(), q90z), now);
        tf.set_transform("base_link", "camera", offset_x(1.0), now);

        let t = tf.lookup("world", "camera", LookupTime::Latest).unwrap();
        assert!(t.transform.translation.x.abs() < 1e-9);
        assert!((t.transform.translation.y - 1.0).abs() < 1e-9);
        assert!(t.transform.translation.z.abs() < 1e-9);
    }

    #[test]
    fn ingest_uses_header_frames() {
        let mut tf = TfBuffer::new();
        let msg = TransformStamped {
            header: Header {
                seq: 0,
                stamp: Stamp::now(),
                frame_id: "world".to_string(),
            },
            child_frame_id: "waist".to_string(),
            transform: offset_x(0.1),
        };
        assert!(tf.ingest(&msg));
        assert_eq!(tf.frames(), vec!["waist", "world"]);

        let unnamed = TransformStamped::default();
        assert!(!tf.ingest(&unnamed));
    }
}
