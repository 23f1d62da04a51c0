//! Live Notification Dispatcher
//!
//! Matching runs inside the exclusive section against a consistent
//! [`CommandDetail`]; each match is handed to the subscriber's bounded sink
//! with a non-blocking enqueue. A full sink loses the event (at-most-once),
//! a closed sink loses it and the subscription is removed after the pass.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use spatia_telemetry::Counter;
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::delivery::{DeliveryOutcome, DeliveryTally, DropReason, EventSink};
use crate::geo::Region;
use crate::model::CommandDetail;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Change pushed to a live-query subscriber
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub subscription: SubscriptionId,
    pub detail: Arc<CommandDetail>,
}

pub struct LiveQuery {
    pub id: SubscriptionId,
    pub key: String,
    pub predicate: Option<Region>,
    pub created_at: DateTime<Utc>,
    sink: Arc<dyn EventSink<ChangeEvent>>,
}

impl LiveQuery {
    /// Key matches and the predicate, if any, intersects the previous or
    /// the new geometry
    pub fn matches(&self, detail: &CommandDetail) -> bool {
        if self.key != detail.key {
            return false;
        }
        match &self.predicate {
            None => true,
            Some(region) => [detail.previous_geometry(), detail.new_geometry()]
                .into_iter()
                .flatten()
                .any(|geometry| region.intersects(geometry)),
        }
    }
}

/// Outcome of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub matched: u32,
    #[serde(flatten)]
    pub tally: DeliveryTally,
}

/// Thread-safe registry of active live queries
pub struct LiveRegistry {
    subscriptions: DashMap<SubscriptionId, Arc<LiveQuery>>,
    delivered: Counter,
    dropped: Counter,
}

impl LiveRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            delivered: Counter::new("live_events_delivered"),
            dropped: Counter::new("live_events_dropped"),
        }
    }

    pub fn subscribe(
        &self,
        key: impl Into<String>,
        predicate: Option<Region>,
        sink: Arc<dyn EventSink<ChangeEvent>>,
    ) -> SubscriptionId {
        let id = SubscriptionId::generate();
        let query = LiveQuery {
            id,
            key: key.into(),
            predicate,
            created_at: Utc::now(),
            sink,
        };
        debug!(subscription = %id, key = %query.key, "Live query registered");
        self.subscriptions.insert(id, Arc::new(query));
        id
    }

    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let removed = self.subscriptions.remove(id).is_some();
        if removed {
            debug!(subscription = %id, "Live query removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn delivered_total(&self) -> u64 {
        self.delivered.get()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.get()
    }

    pub fn dispatch(&self, detail: &Arc<CommandDetail>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut closed = Vec::new();

        for entry in self.subscriptions.iter() {
            let query = entry.value();
            if !query.matches(detail) {
                continue;
            }
            report.matched += 1;

            let outcome = query.sink.try_enqueue(ChangeEvent {
                subscription: query.id,
                detail: Arc::clone(detail),
            });
            report.tally.record(outcome);
            if outcome == DeliveryOutcome::Dropped(DropReason::Closed) {
                closed.push(query.id);
            }
        }

        // removal must wait until the shard read guards are released
        for id in closed {
            self.unsubscribe(&id);
        }

        self.delivered.add(report.tally.delivered as u64);
        self.dropped.add(report.tally.dropped as u64);
        report
    }
}

impl Default for LiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::ChannelSink;
    use crate::geo::Geometry;
    use crate::model::{ChangeKind, Object, OpKind};

    fn moved(key: &str, from: Option<Geometry>, to: Option<Geometry>) -> Arc<CommandDetail> {
        Arc::new(CommandDetail {
            seq: 1,
            op: OpKind::Set,
            kind: ChangeKind::Update,
            key: key.to_string(),
            id: "truck1".to_string(),
            previous: from.map(Object::with_geometry),
            new: to.map(Object::with_geometry),
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_dispatch_matches_key_and_region() {
        let registry = LiveRegistry::new();
        let (all, mut all_rx) = ChannelSink::<ChangeEvent>::bounded(8);
        let (near, mut near_rx) = ChannelSink::<ChangeEvent>::bounded(8);
        registry.subscribe("fleet", None, Arc::new(all));
        registry.subscribe("fleet", Some(Region::bounds(33.0, -113.0, 34.0, -111.0)), Arc::new(near));

        let report = registry.dispatch(&moved("fleet", None, Some(Geometry::point(50.0, 10.0))));
        assert_eq!(report.matched, 1);
        assert!(all_rx.try_recv().is_ok());
        assert!(near_rx.try_recv().is_err());

        // leaving the region still matches through the previous state
        let report = registry.dispatch(&moved(
            "fleet",
            Some(Geometry::point(33.5, -112.0)),
            Some(Geometry::point(50.0, 10.0)),
        ));
        assert_eq!(report.matched, 2);
        assert!(near_rx.try_recv().is_ok());

        let report = registry.dispatch(&moved("other", None, Some(Geometry::point(33.5, -112.0))));
        assert_eq!(report.matched, 0);
    }

    #[test]
    fn test_full_sink_drops_without_blocking() {
        let registry = LiveRegistry::new();
        let (sink, _rx) = ChannelSink::<ChangeEvent>::bounded(1);
        registry.subscribe("fleet", None, Arc::new(sink));

        let detail = moved("fleet", None, Some(Geometry::point(1.0, 1.0)));
        assert_eq!(registry.dispatch(&detail).tally.delivered, 1);
        let report = registry.dispatch(&detail);
        assert_eq!(report.tally.dropped, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.dropped_total(), 1);
    }

    #[test]
    fn test_closed_sink_is_unsubscribed() {
        let registry = LiveRegistry::new();
        let (sink, rx) = ChannelSink::<ChangeEvent>::bounded(4);
        registry.subscribe("fleet", None, Arc::new(sink));
        drop(rx);

        let report = registry.dispatch(&moved("fleet", None, Some(Geometry::point(1.0, 1.0))));
        assert_eq!(report.tally.dropped, 1);
        assert!(registry.is_empty());
    }
}
