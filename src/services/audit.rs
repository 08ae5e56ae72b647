use metrics::counter;
use tracing::{debug, warn};

use crate::repositories::{AuditEntry, PrivilegedAccess};

/// Writes the audit row. A failed insert is logged with the full entry and
/// otherwise ignored.
pub async fn record_or_warn(access: &PrivilegedAccess, entry: AuditEntry) -> bool {
    let order_id = entry.order_id;
    let fallback = serde_json::to_string(&entry).unwrap_or_else(|_| format!("{:?}", entry));
    match access.audit.record(entry).await {
        Ok(()) => {
            debug!(order_id, "Payment audit recorded");
            true
        }
        Err(e) => {
            counter!("forja_settlement.audit_failures", 1);
            warn!(
                order_id,
                error = %e,
                audit_entry = %fallback,
                "Failed to write payment audit row"
            );
            false
        }
    }
}
