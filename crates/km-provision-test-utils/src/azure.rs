//! Azure test identifiers
//!
//! Fixed, well-formed ids so tests never depend on a real subscription.

use chrono::Utc;
use km_provision_common::{ResourceKind, ResourceRef};

/// Subscription id used by every fixture
pub const TEST_SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000001";

/// Resource group used by every fixture
pub const TEST_RESOURCE_GROUP: &str = "rg-km-test";

/// Object id of the principal that receives grants
pub const TEST_PRINCIPAL: &str = "11111111-2222-3333-4444-555555555555";

/// Generate a unique run ID for test fixtures.
///
/// Format: `test-{timestamp_ms}-{counter}`, unique even when tests start
/// simultaneously.
///
/// # Example
///
/// ```
/// use km_provision_test_utils::azure::test_run_id;
///
/// let run_id = test_run_id();
/// assert!(run_id.starts_with("test-"));
/// ```
pub fn test_run_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let ts = Utc::now().timestamp_millis();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("test-{}-{}", ts, counter)
}

/// Reference to a resource in the test subscription and resource group
pub fn resource(kind: ResourceKind, name: &str) -> ResourceRef {
    ResourceRef::new(kind, name, TEST_RESOURCE_GROUP, TEST_SUBSCRIPTION)
}

/// Full ARM id of a Cognitive Services account in the test resource group
///
/// # Example
///
/// ```
/// use km_provision_test_utils::azure::cognitive_account_id;
///
/// let id = cognitive_account_id("km-ai");
/// assert!(id.ends_with("/providers/Microsoft.CognitiveServices/accounts/km-ai"));
/// ```
pub fn cognitive_account_id(name: &str) -> String {
    format!(
        "/subscriptions/{TEST_SUBSCRIPTION}/resourceGroups/{TEST_RESOURCE_GROUP}/providers/Microsoft.CognitiveServices/accounts/{name}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(test_run_id(), test_run_id());
    }

    #[test]
    fn test_cognitive_account_id_parses() {
        let parsed = ResourceRef::parse_id(ResourceKind::AiServiceAccount, &cognitive_account_id("km-ai"))
            .unwrap();
        assert_eq!(parsed, resource(ResourceKind::AiServiceAccount, "km-ai"));
    }
}
