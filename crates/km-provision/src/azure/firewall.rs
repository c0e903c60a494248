//! Relational database server firewall rules

use super::ArmClient;
use super::error::{ArmError, ArmResult};
use super::network::api_version;
use km_provision_common::{FirewallRule, ResourceKind, ResourceRef};
use serde_json::{Value, json};
use std::net::Ipv4Addr;
use tracing::{info, warn};

fn rules_path(server: &ResourceRef) -> String {
    format!("{}/firewallRules", server.id())
}

fn ensure_server(server: &ResourceRef) -> ArmResult<()> {
    if server.kind() == ResourceKind::RelationalDatabase {
        Ok(())
    } else {
        Err(ArmError::Sdk {
            code: None,
            message: format!("{server} does not support firewall rules"),
        })
    }
}

fn parse_rule(value: &Value) -> Option<FirewallRule> {
    let props = &value["properties"];
    Some(FirewallRule {
        name: value["name"].as_str()?.to_string(),
        start_ip: props["startIpAddress"].as_str()?.parse::<Ipv4Addr>().ok()?,
        end_ip: props["endIpAddress"].as_str()?.parse::<Ipv4Addr>().ok()?,
    })
}

impl ArmClient {
    /// List inbound firewall rules on a relational database server
    pub async fn list_firewall_rules(&self, server: &ResourceRef) -> ArmResult<Vec<FirewallRule>> {
        ensure_server(server)?;
        let items = self
            .list(&rules_path(server), api_version(server.kind()))
            .await?;

        Ok(items
            .iter()
            .filter_map(|item| {
                let rule = parse_rule(item);
                if rule.is_none() {
                    warn!(server = %server, rule = %item["name"], "Skipping unparseable firewall rule");
                }
                rule
            })
            .collect())
    }

    /// Create or update a firewall rule
    pub async fn create_firewall_rule(
        &self,
        server: &ResourceRef,
        rule: &FirewallRule,
    ) -> ArmResult<()> {
        ensure_server(server)?;
        let body = json!({
            "properties": {
                "startIpAddress": rule.start_ip.to_string(),
                "endIpAddress": rule.end_ip.to_string(),
            }
        });
        self.put(
            &format!("{}/{}", rules_path(server), rule.name),
            api_version(server.kind()),
            &body,
        )
        .await?;
        info!(
            server = %server,
            rule = %rule.name,
            start = %rule.start_ip,
            end = %rule.end_ip,
            "Created firewall rule"
        );
        Ok(())
    }

    /// Delete a firewall rule by name
    pub async fn delete_firewall_rule(&self, server: &ResourceRef, rule_name: &str) -> ArmResult<()> {
        ensure_server(server)?;
        self.delete(
            &format!("{}/{}", rules_path(server), rule_name),
            api_version(server.kind()),
        )
        .await?;
        info!(server = %server, rule = %rule_name, "Deleted firewall rule");
        Ok(())
    }
}
