//! Diagnostic records and the reconciler that picks the freshest one.
//!
//! Every adapter keeps the request/response pair of its most recent HTTP
//! exchange. Because the user can switch modes between runs, "the last
//! operation" may belong to any adapter; [`DebugReconciler::most_recent`]
//! arbitrates by timestamp each time it is asked and holds no copy of its own.

use crate::client::AdapterKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// One captured request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugRecord {
    pub source: AdapterKind,
    /// Adapter operation, e.g. `submit`, `check_status`, `download`.
    pub operation: String,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    /// Request body with large payloads redacted.
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    /// HTTP status, duration and similar.
    pub metadata: serde_json::Value,
}

impl DebugRecord {
    /// Pretty JSON suitable for copying into a bug report.
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Anything that retains a most-recent [`DebugRecord`].
pub trait DebugSource: Send + Sync {
    fn last_debug_data(&self) -> Option<DebugRecord>;
}

/// Single-slot storage adapters embed to implement [`DebugSource`].
#[derive(Debug, Default)]
pub struct DebugSlot {
    slot: Mutex<Option<DebugRecord>>,
}

impl DebugSlot {
    pub fn record(&self, record: DebugRecord) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = Some(record);
        }
    }

    pub fn get(&self) -> Option<DebugRecord> {
        self.slot.lock().ok().and_then(|g| g.clone())
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = None;
        }
    }
}

/// Chooses the newest record across registered sources.
#[derive(Default, Clone)]
pub struct DebugReconciler {
    sources: Vec<Arc<dyn DebugSource>>,
}

impl DebugReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. Registration order breaks timestamp ties.
    pub fn register(&mut self, source: Arc<dyn DebugSource>) {
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// The record with the greatest timestamp, or `None` if no source has one.
    ///
    /// On equal timestamps the earliest-registered source wins.
    pub fn most_recent(&self) -> Option<DebugRecord> {
        let mut best: Option<DebugRecord> = None;
        for record in self.sources.iter().filter_map(|s| s.last_debug_data()) {
            match &best {
                Some(current) if record.timestamp <= current.timestamp => {}
                _ => best = Some(record),
            }
        }
        best
    }
}

impl std::fmt::Debug for DebugReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugReconciler")
            .field("sources", &self.sources.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct Fixed(Option<DebugRecord>);

    impl DebugSource for Fixed {
        fn last_debug_data(&self) -> Option<DebugRecord> {
            self.0.clone()
        }
    }

    fn record(source: AdapterKind, secs: i64, op: &str) -> DebugRecord {
        DebugRecord {
            source,
            operation: op.to_string(),
            endpoint: "/v3/test".into(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            request: serde_json::Value::Null,
            response: serde_json::Value::Null,
            metadata: serde_json::Value::Null,
        }
    }

    fn reconciler(records: Vec<Option<DebugRecord>>) -> DebugReconciler {
        let mut r = DebugReconciler::new();
        for rec in records {
            r.register(Arc::new(Fixed(rec)));
        }
        r
    }

    #[test]
    fn empty_sources_yield_none() {
        assert!(reconciler(vec![None, None, None]).most_recent().is_none());
        assert!(DebugReconciler::new().most_recent().is_none());
    }

    #[test]
    fn newest_wins_in_every_registration_order() {
        let t1 = record(AdapterKind::Image, 100, "t1");
        let t2 = record(AdapterKind::Strokes, 200, "t2");
        let t3 = record(AdapterKind::Pdf, 300, "t3");
        let orders = [
            [&t1, &t2, &t3],
            [&t1, &t3, &t2],
            [&t2, &t1, &t3],
            [&t2, &t3, &t1],
            [&t3, &t1, &t2],
            [&t3, &t2, &t1],
        ];
        for order in orders {
            let r = reconciler(order.iter().map(|rec| Some((*rec).clone())).collect());
            assert_eq!(r.most_recent().unwrap().operation, "t3");
        }
    }

    #[test]
    fn ties_go_to_first_registered() {
        let r = reconciler(vec![
            Some(record(AdapterKind::Strokes, 50, "first")),
            Some(record(AdapterKind::Image, 50, "second")),
        ]);
        assert_eq!(r.most_recent().unwrap().operation, "first");
    }

    #[test]
    fn sources_without_records_are_skipped() {
        let r = reconciler(vec![None, Some(record(AdapterKind::Pdf, 1, "only")), None]);
        assert_eq!(r.most_recent().unwrap().source, AdapterKind::Pdf);
    }

    #[test]
    fn slot_clear_forgets_record() {
        let slot = DebugSlot::default();
        slot.record(record(AdapterKind::Image, 1, "x"));
        assert!(slot.get().is_some());
        slot.clear();
        assert!(slot.get().is_none());
    }
}
