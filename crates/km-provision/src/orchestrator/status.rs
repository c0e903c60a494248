//! Read-only exposure report for every resource slot

use crate::control_plane::CloudControlPlane;
use crate::error::OrchestratorError;
use crate::resolver::{Parameters, ResourceSlot, SlotResolution, resolve};
use crate::snapshot::capture_all;
use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use km_provision_common::DefaultAction;
use serde::Serialize;
use strum::IntoEnumIterator;

/// Current exposure of one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub slot: ResourceSlot,
    pub resource: Option<String>,
    pub public_access: Option<bool>,
    pub default_action: Option<DefaultAction>,
    /// Names of full-range firewall rules
    pub open_rules: Vec<String>,
    /// Why the exposure is unknown
    pub note: Option<String>,
}

/// Resolve and capture every slot; makes no mutating call
pub async fn collect_status<C: CloudControlPlane>(
    cp: &C,
    params: &Parameters,
) -> Result<Vec<StatusLine>, OrchestratorError> {
    let resources = resolve(cp, params).await?;
    let (snapshots, failures) = capture_all(cp, &resources).await;

    Ok(ResourceSlot::iter()
        .map(|slot| {
            let mut line = StatusLine {
                slot,
                resource: None,
                public_access: None,
                default_action: None,
                open_rules: Vec::new(),
                note: None,
            };
            match resources.resolution(slot) {
                SlotResolution::NotConfigured => line.note = Some("not configured".into()),
                SlotResolution::NotFound { resource, reason } => {
                    line.resource = Some(resource.name().to_string());
                    line.note = Some(format!("not found: {reason}"));
                }
                SlotResolution::Resolved(resource) => {
                    line.resource = Some(resource.name().to_string());
                }
            }
            if let Some(snapshot) = snapshots.iter().find(|s| s.slot == slot) {
                line.public_access = Some(snapshot.state.public_access_enabled());
                line.default_action = snapshot.state.default_action();
                line.open_rules = snapshot
                    .firewall_rules
                    .iter()
                    .filter(|r| r.is_full_range())
                    .map(|r| r.name.clone())
                    .collect();
            } else if let Some(failure) = failures.iter().find(|f| f.slot == slot) {
                line.note = Some(format!("capture failed: {}", failure.error));
            }
            line
        })
        .collect())
}

/// Print the status table to stdout
pub fn print_status(lines: &[StatusLine]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Slot"),
            Cell::new("Resource"),
            Cell::new("Public Access"),
            Cell::new("Default Action"),
            Cell::new("Full-Range Rules"),
            Cell::new("Note"),
        ]);

    for line in lines {
        table.add_row(vec![
            Cell::new(line.slot),
            Cell::new(line.resource.as_deref().unwrap_or("-")),
            Cell::new(match line.public_access {
                Some(true) => "enabled",
                Some(false) => "disabled",
                None => "-",
            }),
            Cell::new(
                line.default_action
                    .map(|a| a.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(if line.open_rules.is_empty() {
                "-".to_string()
            } else {
                line.open_rules.join(", ")
            }),
            Cell::new(line.note.as_deref().unwrap_or("")),
        ]);
    }

    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::param;
    use crate::testing::FakeControlPlane;
    use km_provision_common::{ExposureConfig, FirewallRule, ResourceKind, ResourceRef};

    const SUB: &str = "00000000-0000-0000-0000-000000000001";

    #[tokio::test]
    async fn test_status_is_read_only() {
        let sql = ResourceRef::new(ResourceKind::RelationalDatabase, "km-sql", "rg-km", SUB);
        let cp = FakeControlPlane::new()
            .with_closed_resource(ResourceRef::new(ResourceKind::ObjectStore, "kmstorage", "rg-km", SUB))
            .with_resource(ResourceRef::new(ResourceKind::SearchService, "km-search", "rg-km", SUB), ExposureConfig::reachable(false))
            .with_closed_resource(sql.clone())
            .with_firewall_rule(&sql, FirewallRule::full_range("AllowAll"))
            .with_closed_resource(ResourceRef::new(ResourceKind::AiServiceAccount, "km-ai", "rg-km", SUB));
        let params = Parameters::new()
            .with(param::SUBSCRIPTION_ID, SUB)
            .with(param::RESOURCE_GROUP, "rg-km")
            .with(param::PRINCIPAL_ID, "11111111-2222-3333-4444-555555555555")
            .with(param::STORAGE_ACCOUNT, "kmstorage")
            .with(param::STORAGE_CONTAINER, "data")
            .with(param::SEARCH_SERVICE, "km-search")
            .with(param::SQL_SERVER, "km-sql")
            .with(param::SQL_DATABASE, "kmdb")
            .with(param::SQL_IDENTITY_CLIENT_ID, "22222222-2222-2222-2222-222222222222")
            .with(param::SQL_IDENTITY_NAME, "km-app")
            .with(
                param::AI_SERVICES_ID,
                format!("/subscriptions/{SUB}/resourceGroups/rg-km/providers/Microsoft.CognitiveServices/accounts/km-ai"),
            )
            .with(param::USE_CASE, "telecom")
            .with(param::EMBEDDING_MODEL, "emb")
            .with(param::CHAT_MODEL, "chat");

        let lines = collect_status(&cp, &params).await.unwrap();

        assert_eq!(cp.mutation_count(), 0);
        let sql_line = lines.iter().find(|l| l.slot == ResourceSlot::Sql).unwrap();
        assert_eq!(sql_line.open_rules, vec!["AllowAll".to_string()]);
        assert_eq!(sql_line.public_access, Some(false));
        let search = lines.iter().find(|l| l.slot == ResourceSlot::Search).unwrap();
        assert_eq!(search.public_access, Some(true));
        let cosmos = lines.iter().find(|l| l.slot == ResourceSlot::Cosmos).unwrap();
        assert_eq!(cosmos.note.as_deref(), Some("not configured"));
    }
}
