//! Record document shape and deep-merge semantics.
//!
//! Records are schemaless JSON objects; this module pins down the field
//! names the engine relies on and the merge rules the record store must
//! honour: objects merge recursively, `history` arrays append, everything
//! else replaces.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::StoreError;

/// Field names of a record document.
pub struct RecordFields;

impl RecordFields {
    /// Record identifier.
    pub const RECORD_ID: &'static str = "record_id";
    /// Owning tenant.
    pub const TENANT_ID: &'static str = "tenant_id";
    /// Domain the record belongs to.
    pub const DOMAIN_ID: &'static str = "domain_id";
    /// Document discriminator (`"record"` vs `"job"`).
    pub const DOC_TYPE: &'static str = "doc_type";
    /// The free-form input the record was ingested from.
    pub const RAW_INPUT: &'static str = "raw_input";
    /// Merged outputs of the ingestion playbook, keyed by agent id.
    pub const INGESTION_DATA: &'static str = "ingestion_data";
    /// Merged outputs of management playbooks; contains the append-only
    /// `history` array.
    pub const MANAGEMENT_DATA: &'static str = "management_data";
    /// Append-only mutation log inside `management_data`.
    pub const HISTORY: &'static str = "history";
    /// Record status string.
    pub const STATUS: &'static str = "status";
    /// Creation timestamp.
    pub const CREATED_AT: &'static str = "created_at";
    /// Last mutation timestamp.
    pub const UPDATED_AT: &'static str = "updated_at";
}

/// Build a fresh record document for an ingest job.
pub fn new_record(
    tenant_id: &str,
    domain_id: &str,
    raw_input: &Value,
    status: &str,
    now: DateTime<Utc>,
) -> Value {
    json!({
        RecordFields::TENANT_ID: tenant_id,
        RecordFields::DOMAIN_ID: domain_id,
        RecordFields::DOC_TYPE: "record",
        RecordFields::RAW_INPUT: raw_input,
        RecordFields::INGESTION_DATA: {},
        RecordFields::MANAGEMENT_DATA: { RecordFields::HISTORY: [] },
        RecordFields::STATUS: status,
        RecordFields::CREATED_AT: now.to_rfc3339(),
        RecordFields::UPDATED_AT: now.to_rfc3339(),
    })
}

/// Deep-merge `partial` into `target`.
///
/// Rules, applied per key:
/// - both sides objects → recursive merge;
/// - both sides arrays under a key named `history` → append;
/// - otherwise → the partial's value replaces the target's.
///
/// Both top-level values must be objects.
pub fn deep_merge(target: &mut Value, partial: &Value) -> Result<(), StoreError> {
    let (Some(target_map), Some(partial_map)) = (target.as_object_mut(), partial.as_object())
    else {
        return Err(StoreError::InvalidMerge(
            "both document and partial must be objects".to_string(),
        ));
    };
    merge_maps(target_map, partial_map);
    Ok(())
}

fn merge_maps(target: &mut Map<String, Value>, partial: &Map<String, Value>) {
    for (key, incoming) in partial {
        match target.get_mut(key) {
            Some(Value::Object(existing)) if incoming.is_object() => {
                merge_maps(existing, incoming.as_object().unwrap());
            }
            Some(Value::Array(existing))
                if key == RecordFields::HISTORY && incoming.is_array() =>
            {
                existing.extend(incoming.as_array().unwrap().iter().cloned());
            }
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}
