//! # Upload Batching
//!
//! Turns pending queue entries into one upload request.
//!
//! ```text
//!  sync_queue (oldest first)                 upload items
//!  ─────────────────────────                 ────────────
//!  e1 product P  CREATE  {stock 45}  ─┐
//!  e2 product P  UPDATE  {stock 40}  ─┴──►   P  CREATE {stock 40}  [e1,e2]
//!  e3 sale    S  CREATE  {P x 3}     ─────►  S  CREATE {...}       [e3]
//!  e4 product P  UPDATE  {stock 47}          (next batch)
//!
//!  action:  first CREATE wins, else a trailing DELETE, else UPDATE
//!  payload: the latest snapshot
//! ```
//!
//! Product snapshots carry absolute stock and the server applies sales as
//! deltas, so a product entry never merges across a sale of that product:
//! e4 waits for a later batch, after S is applied. Everything that touches
//! a waiting entity waits with it, and so does anything touching an entity
//! whose entries are backing off.
//!
//! Acknowledging an item removes every entry it was collapsed from.

use chrono::{DateTime, Utc};
use minisuper_core::protocol::{
    CashSessionPayload, EntityResults, ProductPayload, SalePayload, UploadRequest, UploadResults,
};
use minisuper_core::{EntityType, SyncAction, SyncQueueEntry};
use std::collections::{HashMap, HashSet};

type EntityKey = (EntityType, String);

// =============================================================================
// Upload Items
// =============================================================================

/// A parsed snapshot ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemPayload {
    Product(ProductPayload),
    Sale(SalePayload),
    CashSession(CashSessionPayload),
}

impl ItemPayload {
    fn parse(entity_type: EntityType, json: &str) -> serde_json::Result<Self> {
        Ok(match entity_type {
            EntityType::Product => ItemPayload::Product(serde_json::from_str(json)?),
            EntityType::Sale => ItemPayload::Sale(serde_json::from_str(json)?),
            EntityType::CashSession => ItemPayload::CashSession(serde_json::from_str(json)?),
        })
    }

    pub(crate) fn set_action(&mut self, action: SyncAction) {
        match self {
            ItemPayload::Product(p) => p.action = action,
            ItemPayload::Sale(s) => s.action = action,
            ItemPayload::CashSession(c) => c.action = action,
        }
    }

    /// Fills an unassigned wire id.
    pub fn set_server_id_if_missing(&mut self, server_id: &str) {
        let id = match self {
            ItemPayload::Product(p) => &mut p.id,
            ItemPayload::Sale(s) => &mut s.id,
            ItemPayload::CashSession(c) => &mut c.id,
        };
        if id.is_empty() {
            *id = server_id.to_string();
        }
    }
}

/// One entity's collapsed queue entries.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadItem {
    pub entity_type: EntityType,
    pub entity_local_id: String,
    pub action: SyncAction,
    pub entry_ids: Vec<String>,
    /// Highest attempt count among the collapsed entries.
    pub attempts: i64,
    pub payload: ItemPayload,
}

/// Entries whose snapshot could not be parsed. They can never be uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedItem {
    pub entity_type: EntityType,
    pub entity_local_id: String,
    pub entry_ids: Vec<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadPlan {
    pub items: Vec<UploadItem>,
    pub malformed: Vec<MalformedItem>,
    /// Entries left pending for a later batch.
    pub deferred: usize,
}

// =============================================================================
// Collapse
// =============================================================================

/// Collapsed action for one entity's entries, oldest first.
pub fn collapse_action(actions: &[SyncAction]) -> SyncAction {
    match (actions.first(), actions.last()) {
        (Some(SyncAction::Create), _) => SyncAction::Create,
        (_, Some(SyncAction::Delete)) => SyncAction::Delete,
        _ => SyncAction::Update,
    }
}

/// Entities an entry writes on the server: its own, plus every product a
/// sale moves stock for.
fn touched(entry: &SyncQueueEntry) -> Vec<EntityKey> {
    let mut keys = vec![(entry.entity_type, entry.entity_local_id.clone())];
    if entry.entity_type == EntityType::Sale {
        if let Ok(sale) = serde_json::from_str::<SalePayload>(&entry.payload) {
            keys.extend(
                sale.items
                    .into_iter()
                    .filter_map(|item| item.product_local_id)
                    .map(|id| (EntityType::Product, id)),
            );
        }
    }
    keys
}

/// Groups `entries` (oldest first) per entity in order of first appearance.
///
/// `held` are pending entries still backing off, oldest first; anything
/// queued after one of them that touches the same entity is deferred.
pub fn plan(entries: Vec<SyncQueueEntry>, held: &[SyncQueueEntry]) -> UploadPlan {
    let mut order: Vec<EntityKey> = Vec::new();
    let mut groups: HashMap<EntityKey, Vec<SyncQueueEntry>> = HashMap::new();
    let mut blocked: HashSet<EntityKey> = HashSet::new();
    let mut sold: HashSet<String> = HashSet::new();
    let mut held = held.iter().peekable();
    let mut deferred = 0;

    for entry in entries {
        while let Some(waiting) = held.next_if(|h| h.created_at <= entry.created_at) {
            blocked.extend(touched(waiting));
        }

        let keys = touched(&entry);
        let after_sale =
            entry.entity_type == EntityType::Product && sold.contains(&entry.entity_local_id);
        if after_sale || keys.iter().any(|key| blocked.contains(key)) {
            blocked.extend(keys);
            deferred += 1;
            continue;
        }
        if entry.entity_type == EntityType::Sale {
            sold.extend(
                keys.into_iter()
                    .filter(|(entity_type, _)| *entity_type == EntityType::Product)
                    .map(|(_, id)| id),
            );
        }

        let key = (entry.entity_type, entry.entity_local_id.clone());
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(entry);
    }

    let mut plan = UploadPlan {
        deferred,
        ..Default::default()
    };
    for key in order {
        let Some(group) = groups.remove(&key) else {
            continue;
        };
        let (entity_type, entity_local_id) = key;

        let actions: Vec<SyncAction> = group.iter().map(|e| e.action).collect();
        let entry_ids: Vec<String> = group.iter().map(|e| e.id.clone()).collect();
        let attempts = group.iter().map(|e| e.attempts).max().unwrap_or(0);
        let latest = group.last().map(|e| e.payload.as_str()).unwrap_or_default();

        match ItemPayload::parse(entity_type, latest) {
            Ok(mut payload) => {
                let action = collapse_action(&actions);
                payload.set_action(action);
                plan.items.push(UploadItem {
                    entity_type,
                    entity_local_id,
                    action,
                    entry_ids,
                    attempts,
                    payload,
                });
            }
            Err(e) => plan.malformed.push(MalformedItem {
                entity_type,
                entity_local_id,
                entry_ids,
                error: format!("unreadable {} snapshot: {}", entity_type, e),
            }),
        }
    }
    plan
}

impl UploadPlan {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The request body, products first so sales can resolve their items.
    pub fn to_request(&self, last_sync_timestamp: Option<DateTime<Utc>>) -> UploadRequest {
        let mut request = UploadRequest {
            last_sync_timestamp,
            ..Default::default()
        };
        for item in &self.items {
            match &item.payload {
                ItemPayload::Product(p) => request.products.push(p.clone()),
                ItemPayload::Sale(s) => request.sales.push(s.clone()),
                ItemPayload::CashSession(c) => request.cash_sessions.push(c.clone()),
            }
        }
        request
    }
}

// =============================================================================
// Result Matching
// =============================================================================

/// What the server said about one upload item.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemResult {
    Applied {
        server_id: String,
    },
    Conflict {
        reason: String,
        server_data: Option<String>,
    },
    Failed {
        error: String,
    },
}

pub fn results_for(results: &UploadResults, entity_type: EntityType) -> &EntityResults {
    match entity_type {
        EntityType::Product => &results.products,
        EntityType::Sale => &results.sales,
        EntityType::CashSession => &results.cash_sessions,
    }
}

/// Finds an item's outcome. Items the server did not mention count as failed.
pub fn match_result(results: &EntityResults, local_id: &str) -> ItemResult {
    if let Some(applied) = results.applied.iter().find(|a| a.local_id == local_id) {
        return ItemResult::Applied {
            server_id: applied.server_id.clone(),
        };
    }

    if let Some(conflict) = results.conflicts.iter().find(|c| c.local_id == local_id) {
        let server_data = conflict
            .server_data
            .as_ref()
            .or(conflict.data.as_ref())
            .map(|v| v.to_string());
        return ItemResult::Conflict {
            reason: conflict.reason.clone(),
            server_data,
        };
    }

    if let Some(failed) = results.failed.iter().find(|f| f.local_id == local_id) {
        return ItemResult::Failed {
            error: failed.error.clone(),
        };
    }

    ItemResult::Failed {
        error: "item missing from server response".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minisuper_core::protocol::{AppliedItem, ConflictItem, FailedItem};
    use minisuper_core::QueueStatus;
    use serde_json::json;

    fn product_payload(local_id: &str, stock: i64, action: SyncAction) -> String {
        json!({
            "id": "",
            "localId": local_id,
            "name": "Coca Cola 600ml",
            "code": "BEB001",
            "price": 250,
            "cost": 180,
            "stock": stock,
            "active": true,
            "lastModified": "2024-03-01T10:00:00Z",
            "action": action.as_str(),
        })
        .to_string()
    }

    fn sale_payload(local_id: &str, product_local_id: &str, quantity: i64) -> String {
        json!({
            "localId": local_id,
            "saleNumber": "V-20240301-0001",
            "date": "2024-03-01T10:05:00Z",
            "subtotal": 750,
            "tax": 90,
            "total": 840,
            "paymentMethod": "CASH",
            "userId": "cajero-1",
            "status": "COMPLETED",
            "items": [{
                "productLocalId": product_local_id,
                "productCode": "BEB001",
                "quantity": quantity,
                "unitPrice": 250,
                "subtotal": 750,
            }],
            "lastModified": "2024-03-01T10:05:00Z",
            "action": "CREATE",
        })
        .to_string()
    }

    fn queued_at(mut entry: SyncQueueEntry, minute: i64) -> SyncQueueEntry {
        entry.created_at = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + chrono::Duration::minutes(minute);
        entry
    }

    fn entry(
        id: &str,
        entity_type: EntityType,
        local_id: &str,
        action: SyncAction,
        payload: String,
    ) -> SyncQueueEntry {
        SyncQueueEntry {
            id: id.to_string(),
            entity_type,
            entity_local_id: local_id.to_string(),
            action,
            payload,
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
            status: QueueStatus::Pending,
            conflict_reason: None,
            server_data: None,
        }
    }

    #[test]
    fn test_collapse_action() {
        use SyncAction::*;
        assert_eq!(collapse_action(&[Create, Update, Update]), Create);
        assert_eq!(collapse_action(&[Create, Delete]), Create);
        assert_eq!(collapse_action(&[Update, Update]), Update);
        assert_eq!(collapse_action(&[Update, Delete]), Delete);
        assert_eq!(collapse_action(&[Delete, Update]), Update);
    }

    #[test]
    fn test_plan_collapses_per_entity_and_keeps_latest_snapshot() {
        let entries = vec![
            entry(
                "e1",
                EntityType::Product,
                "p1",
                SyncAction::Create,
                product_payload("p1", 45, SyncAction::Create),
            ),
            entry(
                "e2",
                EntityType::Product,
                "p2",
                SyncAction::Update,
                product_payload("p2", 10, SyncAction::Update),
            ),
            entry(
                "e3",
                EntityType::Product,
                "p1",
                SyncAction::Update,
                product_payload("p1", 40, SyncAction::Update),
            ),
        ];

        let plan = plan(entries, &[]);
        assert!(plan.malformed.is_empty());
        assert_eq!(plan.items.len(), 2);

        let first = &plan.items[0];
        assert_eq!(first.entity_local_id, "p1");
        assert_eq!(first.action, SyncAction::Create);
        assert_eq!(first.entry_ids, vec!["e1".to_string(), "e3".to_string()]);
        match &first.payload {
            ItemPayload::Product(p) => {
                assert_eq!(p.stock, 40);
                assert_eq!(p.action, SyncAction::Create);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let request = plan.to_request(None);
        assert_eq!(request.products.len(), 2);
        assert!(request.sales.is_empty());
    }

    #[test]
    fn test_product_entry_after_a_sale_of_it_waits() {
        let entries = vec![
            entry(
                "e1",
                EntityType::Product,
                "p1",
                SyncAction::Create,
                product_payload("p1", 45, SyncAction::Create),
            ),
            entry("e2", EntityType::Sale, "s1", SyncAction::Create, sale_payload("s1", "p1", 3)),
            entry(
                "e3",
                EntityType::Product,
                "p1",
                SyncAction::Create,
                product_payload("p1", 52, SyncAction::Create),
            ),
            entry(
                "e4",
                EntityType::Product,
                "p2",
                SyncAction::Update,
                product_payload("p2", 10, SyncAction::Update),
            ),
        ];

        let plan = plan(entries, &[]);
        assert_eq!(plan.deferred, 1);
        let ids: Vec<_> = plan.items.iter().map(|i| i.entry_ids.clone()).collect();
        assert_eq!(
            ids,
            vec![
                vec!["e1".to_string()],
                vec!["e2".to_string()],
                vec!["e4".to_string()]
            ]
        );
        match &plan.items[0].payload {
            ItemPayload::Product(p) => assert_eq!(p.stock, 45),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_later_sale_waits_behind_a_waiting_product() {
        let entries = vec![
            entry("e1", EntityType::Sale, "s1", SyncAction::Create, sale_payload("s1", "p1", 3)),
            entry(
                "e2",
                EntityType::Product,
                "p1",
                SyncAction::Update,
                product_payload("p1", 52, SyncAction::Update),
            ),
            entry("e3", EntityType::Sale, "s2", SyncAction::Create, sale_payload("s2", "p1", 2)),
        ];

        let plan = plan(entries, &[]);
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].entity_local_id, "s1");
        assert_eq!(plan.deferred, 2);
    }

    #[test]
    fn test_backing_off_sale_holds_later_product_entries() {
        let held = vec![queued_at(
            entry("e0", EntityType::Sale, "s1", SyncAction::Create, sale_payload("s1", "p1", 3)),
            0,
        )];
        let entries = vec![
            queued_at(
                entry(
                    "e1",
                    EntityType::Product,
                    "p1",
                    SyncAction::Update,
                    product_payload("p1", 52, SyncAction::Update),
                ),
                1,
            ),
            queued_at(
                entry(
                    "e2",
                    EntityType::Product,
                    "p2",
                    SyncAction::Update,
                    product_payload("p2", 10, SyncAction::Update),
                ),
                2,
            ),
        ];

        let plan = plan(entries, &held);
        assert_eq!(plan.deferred, 1);
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].entity_local_id, "p2");
    }

    #[test]
    fn test_unparseable_snapshot_is_malformed() {
        let plan = plan(
            vec![entry(
                "e1",
                EntityType::Sale,
                "s1",
                SyncAction::Create,
                "{not json".to_string(),
            )],
            &[],
        );
        assert!(plan.items.is_empty());
        assert_eq!(plan.malformed.len(), 1);
        assert_eq!(plan.malformed[0].entry_ids, vec!["e1".to_string()]);
    }

    #[test]
    fn test_set_server_id_only_when_missing() {
        let mut payload = ItemPayload::parse(
            EntityType::Product,
            &product_payload("p1", 1, SyncAction::Update),
        )
        .unwrap();
        payload.set_server_id_if_missing("srv-1");
        payload.set_server_id_if_missing("srv-2");
        match payload {
            ItemPayload::Product(p) => assert_eq!(p.id, "srv-1"),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_match_result() {
        let results = EntityResults {
            processed: 1,
            errors: 1,
            conflicts: vec![ConflictItem {
                local_id: "p2".into(),
                server_id: Some("srv-2".into()),
                reason: "Product code already exists".into(),
                data: Some(json!({"code": "X1"})),
                server_data: None,
                client_data: None,
            }],
            applied: vec![AppliedItem {
                local_id: "p1".into(),
                server_id: "srv-1".into(),
            }],
            failed: vec![FailedItem {
                local_id: "p3".into(),
                error: "boom".into(),
            }],
        };

        assert_eq!(
            match_result(&results, "p1"),
            ItemResult::Applied {
                server_id: "srv-1".into()
            }
        );
        match match_result(&results, "p2") {
            ItemResult::Conflict {
                reason,
                server_data,
            } => {
                assert_eq!(reason, "Product code already exists");
                assert!(server_data.unwrap().contains("X1"));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(
            match_result(&results, "p3"),
            ItemResult::Failed {
                error: "boom".into()
            }
        );
        assert!(matches!(
            match_result(&results, "p4"),
            ItemResult::Failed { .. }
        ));
    }
}
