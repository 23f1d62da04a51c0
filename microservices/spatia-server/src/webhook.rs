//! Webhook delivery
//!
//! Each registered hook owns a bounded trigger queue. The pipeline fills it
//! from inside the exclusive section; a worker task per hook drains it and
//! POSTs every trigger to the hook's endpoint. Network latency therefore
//! never reaches the write path, and a failing endpoint only loses its own
//! triggers.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use spatia_pipeline::{ChannelSink, FenceRegistry, Geofence, Region, Transition, TriggerEvent};
use spatia_telemetry::Counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ApiError;

/// Hook registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookSpec {
    pub name: String,
    pub key: String,
    pub region: Region,
    /// Empty means every transition
    #[serde(default)]
    pub detect: Vec<Transition>,
    pub endpoint: String,
}

impl HookSpec {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::invalid("hook name is required"));
        }
        if self.key.trim().is_empty() {
            return Err(ApiError::invalid("hook key is required"));
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ApiError::invalid(format!("unsupported endpoint '{}'", self.endpoint)));
        }
        self.region.validate()?;
        Ok(())
    }
}

/// Registered hook as reported by the API
#[derive(Debug, Clone, Serialize)]
pub struct HookInfo {
    pub name: String,
    pub key: String,
    pub region: Region,
    pub detect: Vec<Transition>,
    pub endpoint: String,
    pub created_at: DateTime<Utc>,
}

/// Body POSTed to a hook endpoint
#[derive(Debug, Serialize)]
struct HookPayload<'a> {
    hook: &'a str,
    detect: Transition,
    key: &'a str,
    id: &'a str,
    seq: u64,
    time: DateTime<Utc>,
    object: Option<&'a spatia_pipeline::Object>,
}

struct HookWorker {
    info: HookInfo,
    handle: JoinHandle<()>,
}

/// Owns hook registrations and their delivery workers
pub struct HookManager {
    fences: Arc<FenceRegistry>,
    workers: DashMap<String, HookWorker>,
    client: reqwest::Client,
    capacity: usize,
    sent: Counter,
    failed: Counter,
}

impl HookManager {
    pub fn new(fences: Arc<FenceRegistry>, capacity: usize, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            fences,
            workers: DashMap::new(),
            client,
            capacity,
            sent: Counter::new("webhooks_sent"),
            failed: Counter::new("webhooks_failed"),
        }
    }

    /// Register or replace a hook. Must be called within a tokio runtime.
    pub fn register(&self, spec: HookSpec) -> Result<HookInfo, ApiError> {
        spec.validate()?;

        let (sink, rx) = ChannelSink::<TriggerEvent>::bounded(self.capacity);
        let fence = Geofence::new(
            spec.name.clone(),
            spec.key.clone(),
            spec.region.clone(),
            spec.detect.iter().copied(),
            Arc::new(sink),
        );
        let info = HookInfo {
            name: spec.name.clone(),
            key: spec.key.clone(),
            region: spec.region.clone(),
            detect: fence.detect_set(),
            endpoint: spec.endpoint.clone(),
            created_at: Utc::now(),
        };

        let handle = tokio::spawn(deliver(
            self.client.clone(),
            spec.endpoint.clone(),
            rx,
            self.sent.clone(),
            self.failed.clone(),
        ));

        // the old sink is dropped with the replaced fence, which ends its worker
        self.fences.set_hook(fence);
        let worker = HookWorker {
            info: info.clone(),
            handle,
        };
        if self.workers.insert(spec.name.clone(), worker).is_some() {
            debug!(hook = %spec.name, "Hook replaced");
        }

        info!(hook = %info.name, key = %info.key, endpoint = %info.endpoint, "Hook registered");
        Ok(info)
    }

    pub fn remove(&self, name: &str) -> bool {
        let existed = self.fences.remove_hook(name);
        if let Some((_, worker)) = self.workers.remove(name) {
            // queued triggers are abandoned with the hook
            worker.handle.abort();
        }
        if existed {
            info!(hook = %name, "Hook removed");
        }
        existed
    }

    pub fn list(&self) -> Vec<HookInfo> {
        let mut hooks: Vec<HookInfo> = self.workers.iter().map(|w| w.info.clone()).collect();
        hooks.sort_by(|a, b| a.name.cmp(&b.name));
        hooks
    }

    pub fn sent_total(&self) -> u64 {
        self.sent.get()
    }

    pub fn failed_total(&self) -> u64 {
        self.failed.get()
    }

    pub fn shutdown(&self) {
        for worker in self.workers.iter() {
            worker.handle.abort();
        }
    }
}

async fn deliver(
    client: reqwest::Client,
    endpoint: String,
    mut rx: mpsc::Receiver<TriggerEvent>,
    sent: Counter,
    failed: Counter,
) {
    while let Some(event) = rx.recv().await {
        let detail = &event.detail;
        let payload = HookPayload {
            hook: &event.hook,
            detect: event.detect,
            key: &detail.key,
            id: &detail.id,
            seq: detail.seq,
            time: detail.timestamp,
            object: detail.new.as_ref().or(detail.previous.as_ref()),
        };

        match client.post(&endpoint).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                sent.inc();
                debug!(hook = %event.hook, seq = detail.seq, detect = %event.detect, "Webhook delivered");
            }
            Ok(resp) => {
                failed.inc();
                warn!(hook = %event.hook, seq = detail.seq, status = %resp.status(), "Webhook rejected");
            }
            Err(e) => {
                failed.inc();
                warn!(hook = %event.hook, seq = detail.seq, error = %e, "Webhook delivery failed");
            }
        }
    }
    debug!(endpoint = %endpoint, "Webhook worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> HookSpec {
        HookSpec {
            name: name.to_string(),
            key: "fleet".to_string(),
            region: Region::bounds(33.0, -113.0, 34.0, -111.0),
            detect: vec![Transition::Enter],
            endpoint: "http://127.0.0.1:9/hook".to_string(),
        }
    }

    #[test]
    fn test_spec_validation() {
        assert!(spec("phx").validate().is_ok());

        let mut bad = spec("phx");
        bad.endpoint = "ftp://example.com".to_string();
        assert!(bad.validate().is_err());

        let mut bad = spec("phx");
        bad.region = Region::circle(0.0, 0.0, -1.0);
        assert!(bad.validate().is_err());

        assert!(spec(" ").validate().is_err());
    }

    #[tokio::test]
    async fn test_register_replace_remove() {
        let fences = Arc::new(FenceRegistry::new());
        let manager = HookManager::new(Arc::clone(&fences), 8, Duration::from_millis(100));

        manager.register(spec("phx")).unwrap();
        manager.register(spec("phx")).unwrap();
        manager.register(spec("tus")).unwrap();
        assert_eq!(fences.len(), 2);

        let names: Vec<String> = manager.list().into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["phx", "tus"]);

        assert!(manager.remove("phx"));
        assert!(!manager.remove("phx"));
        assert_eq!(fences.len(), 1);
    }

    #[test]
    fn test_detect_defaults_to_all() {
        let spec: HookSpec = serde_json::from_str(
            r#"{"name":"all","key":"fleet","endpoint":"http://localhost/h",
                "region":{"type":"circle","center":{"lat":33.5,"lon":-112.0},"meters":500}}"#,
        )
        .unwrap();
        assert!(spec.detect.is_empty());
        assert!(spec.validate().is_ok());
    }
}
