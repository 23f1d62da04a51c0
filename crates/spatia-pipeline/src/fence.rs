//! Geofence Evaluator
//!
//! Transitions are computed only from the previous and new geometry carried
//! by the [`CommandDetail`]; the store is never consulted, so later commands
//! cannot race with evaluation.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use spatia_telemetry::Counter;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::delivery::{DeliveryTally, EventSink};
use crate::geo::{Geometry, Region};
use crate::model::CommandDetail;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Enter,
    Exit,
    Inside,
    Outside,
    Cross,
}

impl Transition {
    pub const ALL: [Transition; 5] = [
        Transition::Enter,
        Transition::Exit,
        Transition::Inside,
        Transition::Outside,
        Transition::Cross,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::Inside => "inside",
            Self::Outside => "outside",
            Self::Cross => "cross",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown detect '{s}'"))
    }
}

/// Relationship change of one object to one region.
///
/// A missing previous state (creation) and a missing new state (deletion)
/// both count as outside.
pub fn evaluate(region: &Region, previous: Option<&Geometry>, new: Option<&Geometry>) -> Transition {
    let was_inside = previous.is_some_and(|g| region.contains(g));
    let is_inside = new.is_some_and(|g| region.contains(g));

    match (was_inside, is_inside) {
        (false, true) => Transition::Enter,
        (true, false) => Transition::Exit,
        (true, true) => Transition::Inside,
        (false, false) => {
            if crossed(region, previous, new) {
                Transition::Cross
            } else {
                Transition::Outside
            }
        }
    }
}

fn crossed(region: &Region, previous: Option<&Geometry>, new: Option<&Geometry>) -> bool {
    let Some(new) = new else {
        return false;
    };
    if new.is_line() && region.intersects(new) {
        return true;
    }
    match (previous.and_then(Geometry::anchor), new.anchor()) {
        (Some(from), Some(to)) => region.crossed_by(from, to),
        _ => false,
    }
}

/// Trigger emitted when a geofence's detect set includes the transition
#[derive(Debug, Clone, Serialize)]
pub struct TriggerEvent {
    pub hook: String,
    pub detect: Transition,
    pub detail: Arc<CommandDetail>,
}

pub struct Geofence {
    pub name: String,
    pub key: String,
    pub region: Region,
    detect: HashSet<Transition>,
    sink: Arc<dyn EventSink<TriggerEvent>>,
}

impl Geofence {
    /// An empty detect set means every transition
    pub fn new(
        name: impl Into<String>,
        key: impl Into<String>,
        region: Region,
        detect: impl IntoIterator<Item = Transition>,
        sink: Arc<dyn EventSink<TriggerEvent>>,
    ) -> Self {
        let mut detect: HashSet<Transition> = detect.into_iter().collect();
        if detect.is_empty() {
            detect.extend(Transition::ALL);
        }
        Self {
            name: name.into(),
            key: key.into(),
            region,
            detect,
            sink,
        }
    }

    pub fn detects(&self, transition: Transition) -> bool {
        self.detect.contains(&transition)
    }

    pub fn detect_set(&self) -> Vec<Transition> {
        let mut set: Vec<Transition> = self.detect.iter().copied().collect();
        set.sort_by_key(|t| t.as_str());
        set
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FenceReport {
    pub evaluated: u32,
    pub triggered: u32,
    #[serde(flatten)]
    pub tally: DeliveryTally,
}

/// Registered geofences, independent of any client connection
pub struct FenceRegistry {
    hooks: DashMap<String, Arc<Geofence>>,
    delivered: Counter,
    dropped: Counter,
}

impl FenceRegistry {
    pub fn new() -> Self {
        Self {
            hooks: DashMap::new(),
            delivered: Counter::new("fence_triggers_delivered"),
            dropped: Counter::new("fence_triggers_dropped"),
        }
    }

    /// Register or replace a geofence, returning the replaced one
    pub fn set_hook(&self, fence: Geofence) -> Option<Arc<Geofence>> {
        debug!(hook = %fence.name, key = %fence.key, "Geofence registered");
        self.hooks.insert(fence.name.clone(), Arc::new(fence))
    }

    pub fn remove_hook(&self, name: &str) -> bool {
        self.hooks.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<Geofence>> {
        self.hooks.get(name).map(|h| Arc::clone(h.value()))
    }

    pub fn hooks(&self) -> Vec<Arc<Geofence>> {
        let mut hooks: Vec<Arc<Geofence>> = self.hooks.iter().map(|h| Arc::clone(h.value())).collect();
        hooks.sort_by(|a, b| a.name.cmp(&b.name));
        hooks
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn delivered_total(&self) -> u64 {
        self.delivered.get()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.get()
    }

    /// Objects without geometry on either side have no relation to any region
    /// and are not evaluated.
    pub fn evaluate_detail(&self, detail: &Arc<CommandDetail>) -> FenceReport {
        let mut report = FenceReport::default();
        if detail.previous_geometry().is_none() && detail.new_geometry().is_none() {
            return report;
        }

        for entry in self.hooks.iter() {
            let fence = entry.value();
            if fence.key != detail.key {
                continue;
            }
            report.evaluated += 1;

            let transition = evaluate(&fence.region, detail.previous_geometry(), detail.new_geometry());
            if !fence.detects(transition) {
                continue;
            }
            report.triggered += 1;

            let outcome = fence.sink.try_enqueue(TriggerEvent {
                hook: fence.name.clone(),
                detect: transition,
                detail: Arc::clone(detail),
            });
            report.tally.record(outcome);
        }

        self.delivered.add(report.tally.delivered as u64);
        self.dropped.add(report.tally.dropped as u64);
        report
    }
}

impl Default for FenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::ChannelSink;
    use crate::geo::Position;
    use crate::model::{ChangeKind, Object, OpKind};
    use chrono::Utc;

    fn region() -> Region {
        Region::bounds(33.0, -113.0, 34.0, -111.0)
    }

    #[test]
    fn test_transitions() {
        let inside = Geometry::point(33.5, -112.0);
        let inside2 = Geometry::point(33.6, -112.1);
        let outside = Geometry::point(50.0, 10.0);
        let r = region();

        assert_eq!(evaluate(&r, None, Some(&inside)), Transition::Enter);
        assert_eq!(evaluate(&r, Some(&inside), None), Transition::Exit);
        assert_eq!(evaluate(&r, Some(&inside), Some(&outside)), Transition::Exit);
        assert_eq!(evaluate(&r, Some(&inside), Some(&inside2)), Transition::Inside);
        assert_eq!(evaluate(&r, None, Some(&outside)), Transition::Outside);
        assert_eq!(evaluate(&r, Some(&outside), None), Transition::Outside);
    }

    #[test]
    fn test_cross_transitions() {
        let r = region();
        let west = Geometry::point(33.5, -115.0);
        let east = Geometry::point(33.5, -109.0);
        assert_eq!(evaluate(&r, Some(&west), Some(&east)), Transition::Cross);

        let line = Geometry::line([Position::new(33.5, -115.0), Position::new(33.5, -109.0)]);
        assert_eq!(evaluate(&r, None, Some(&line)), Transition::Cross);

        let far = Geometry::point(40.0, -115.0);
        assert_eq!(evaluate(&r, Some(&west), Some(&far)), Transition::Outside);
    }

    #[test]
    fn test_detect_parsing() {
        assert_eq!("ENTER".parse::<Transition>(), Ok(Transition::Enter));
        assert!("wander".parse::<Transition>().is_err());
    }

    #[test]
    fn test_only_detected_transitions_trigger() {
        let registry = FenceRegistry::new();
        let (sink, mut rx) = ChannelSink::<TriggerEvent>::bounded(8);
        registry.set_hook(Geofence::new(
            "phx",
            "fleet",
            region(),
            [Transition::Enter, Transition::Exit],
            Arc::new(sink),
        ));

        let created_outside = Arc::new(CommandDetail {
            seq: 1,
            op: OpKind::Set,
            kind: ChangeKind::Create,
            key: "fleet".into(),
            id: "truck1".into(),
            previous: None,
            new: Some(Object::with_geometry(Geometry::point(50.0, 10.0))),
            timestamp: Utc::now(),
        });
        let report = registry.evaluate_detail(&created_outside);
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.triggered, 0);
        assert!(rx.try_recv().is_err());

        let entered = Arc::new(CommandDetail {
            seq: 2,
            kind: ChangeKind::Update,
            previous: created_outside.new.clone(),
            new: Some(Object::with_geometry(Geometry::point(33.5, -112.0))),
            ..(*created_outside).clone()
        });
        let report = registry.evaluate_detail(&entered);
        assert_eq!(report.triggered, 1);
        let event = rx.try_recv().unwrap();
        assert_eq!(event.hook, "phx");
        assert_eq!(event.detect, Transition::Enter);
    }

    #[test]
    fn test_objects_without_geometry_are_skipped() {
        let registry = FenceRegistry::new();
        let (sink, mut rx) = ChannelSink::<TriggerEvent>::bounded(8);
        registry.set_hook(Geofence::new("all", "fleet", region(), Vec::new(), Arc::new(sink)));

        let note = Arc::new(CommandDetail {
            seq: 1,
            op: OpKind::Set,
            kind: ChangeKind::Create,
            key: "fleet".into(),
            id: "note".into(),
            previous: None,
            new: Some(Object {
                payload: Some("hello".into()),
                ..Default::default()
            }),
            timestamp: Utc::now(),
        });
        assert_eq!(registry.evaluate_detail(&note), FenceReport::default());

        let removed = Arc::new(CommandDetail {
            seq: 2,
            op: OpKind::Del,
            kind: ChangeKind::Delete,
            previous: note.new.clone(),
            new: None,
            ..(*note).clone()
        });
        assert_eq!(registry.evaluate_detail(&removed).evaluated, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_registry_replace_and_remove() {
        let registry = FenceRegistry::new();
        let (a, _rx_a) = ChannelSink::<TriggerEvent>::bounded(1);
        let (b, _rx_b) = ChannelSink::<TriggerEvent>::bounded(1);
        let (c, _rx_c) = ChannelSink::<TriggerEvent>::bounded(1);

        assert!(registry
            .set_hook(Geofence::new("west", "fleet", region(), [Transition::Enter], Arc::new(a)))
            .is_none());
        assert!(registry
            .set_hook(Geofence::new("east", "fleet", region(), [Transition::Exit], Arc::new(b)))
            .is_none());
        let replaced = registry.set_hook(Geofence::new("west", "buses", region(), Vec::new(), Arc::new(c)));
        assert_eq!(replaced.map(|f| f.key.clone()).as_deref(), Some("fleet"));

        let names: Vec<String> = registry.hooks().iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, ["east", "west"]);
        assert_eq!(registry.get("west").map(|f| f.detect_set().len()), Some(5));

        assert!(registry.remove_hook("east"));
        assert!(!registry.remove_hook("east"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_detect_means_all() {
        let (sink, _rx) = ChannelSink::<TriggerEvent>::bounded(1);
        let fence = Geofence::new("all", "fleet", region(), Vec::new(), Arc::new(sink));
        assert!(Transition::ALL.iter().all(|t| fence.detects(*t)));
    }
}
