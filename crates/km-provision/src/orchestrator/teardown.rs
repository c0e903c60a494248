//! Resource group teardown
//!
//! Deleting the group is accepted long before it completes, and Cognitive
//! Services accounts inside it are only soft-deleted. Teardown waits for the
//! group to disappear, then for the expected accounts to show up in the
//! deleted listing, then purges them.

use crate::azure::{ArmError, DeletedAccount, ignore_not_found};
use crate::control_plane::CloudControlPlane;
use crate::wait::{WaitOutcome, wait_until};
use anyhow::{Context, Result, bail};
use km_provision_common::RetryPolicy;
use serde::Serialize;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What to tear down and how long to wait
#[derive(Debug, Clone)]
pub struct TeardownConfig {
    pub subscription_id: String,
    pub resource_group: String,
    /// AI account names expected to be soft-deleted with the group
    pub expected_accounts: Vec<String>,
    /// Dry run unless set
    pub execute: bool,
    pub deletion: RetryPolicy,
    pub purge: RetryPolicy,
}

/// What teardown did (or would do)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    pub group_existed: bool,
    pub group_deleted: bool,
    pub purged: Vec<String>,
    /// Expected accounts never seen in the deleted listing
    pub not_listed: Vec<String>,
    pub purge_failures: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.not_listed.is_empty() && self.purge_failures.is_empty()
    }
}

fn in_group<'a>(
    accounts: &'a [DeletedAccount],
    resource_group: &'a str,
) -> impl Iterator<Item = &'a DeletedAccount> {
    accounts.iter().filter(move |a| {
        a.resource_group
            .as_deref()
            .is_some_and(|g| g.eq_ignore_ascii_case(resource_group))
    })
}

/// Delete the resource group and purge its soft-deleted accounts
pub async fn teardown<C: CloudControlPlane>(
    cp: &C,
    config: &TeardownConfig,
    cancel: &CancellationToken,
) -> Result<TeardownReport> {
    let (sub, rg) = (config.subscription_id.as_str(), config.resource_group.as_str());
    let mut report = TeardownReport {
        group_existed: cp
            .resource_group_exists(sub, rg)
            .await
            .with_context(|| format!("Failed to check resource group '{rg}'"))?,
        ..Default::default()
    };

    if !config.execute {
        info!(
            resource_group = rg,
            exists = report.group_existed,
            accounts = ?config.expected_accounts,
            "Dry run: would delete resource group and purge soft-deleted accounts"
        );
        return Ok(report);
    }

    if report.group_existed {
        info!(resource_group = rg, "Deleting resource group");
        cp.delete_resource_group(sub, rg)
            .await
            .with_context(|| format!("Failed to delete resource group '{rg}'"))?;

        let gone = wait_until(
            &config.deletion,
            Some(cancel),
            &format!("deletion of resource group '{rg}'"),
            || async move { cp.resource_group_exists(sub, rg).await.map(|exists| !exists) },
        )
        .await;
        match gone {
            WaitOutcome::Converged => info!(resource_group = rg, "Resource group deleted"),
            WaitOutcome::Cancelled => bail!("Teardown interrupted while deleting '{rg}'"),
            WaitOutcome::TimedOut => bail!(
                "Resource group '{rg}' still exists after {} checks",
                config.deletion.max_attempts
            ),
        }
        report.group_deleted = true;
    } else {
        info!(resource_group = rg, "Resource group already gone");
    }

    // Latest listing seen by the waiter
    let listed: Mutex<Vec<DeletedAccount>> = Mutex::new(Vec::new());
    let expected = &config.expected_accounts;
    let visible = if expected.is_empty() {
        WaitOutcome::Converged
    } else {
        let listed = &listed;
        wait_until(
            &config.purge,
            Some(cancel),
            &format!("soft-deleted accounts of '{rg}'"),
            || async move {
                let accounts = cp.list_deleted_accounts(sub).await?;
                let all_listed = expected.iter().all(|name| {
                    in_group(&accounts, rg).any(|a| a.name.eq_ignore_ascii_case(name))
                });
                *listed.lock().unwrap_or_else(|e| e.into_inner()) = accounts;
                Ok::<_, ArmError>(all_listed)
            },
        )
        .await
    };
    if visible == WaitOutcome::Cancelled {
        bail!("Teardown interrupted while waiting for soft-deleted accounts");
    }

    let mut accounts = listed.into_inner().unwrap_or_else(|e| e.into_inner());
    if expected.is_empty() {
        accounts = cp
            .list_deleted_accounts(sub)
            .await
            .context("Failed to list soft-deleted accounts")?;
    }

    for name in expected {
        if !in_group(&accounts, rg).any(|a| a.name.eq_ignore_ascii_case(name)) {
            warn!(account = %name, "Soft-deleted account never listed, not purged");
            report.not_listed.push(name.clone());
        }
    }

    for account in in_group(&accounts, rg) {
        match ignore_not_found(cp.purge_deleted_account(account).await) {
            Ok(()) => {
                info!(account = %account.name, location = %account.location, "Purged soft-deleted account");
                report.purged.push(account.name.clone());
            }
            Err(e) => {
                warn!(account = %account.name, error = %e, "Failed to purge soft-deleted account");
                report.purge_failures.push(format!("{}: {e}", account.name));
            }
        }
    }

    Ok(report)
}
