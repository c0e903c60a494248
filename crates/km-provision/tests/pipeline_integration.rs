//! Pipeline and waiter behavior with real processes and a paused clock

use km_provision::pipeline::{
    CommandConfig, PipelineInvoker, PipelineStage, ProcessExecutor, StageArg, StageContext,
};
use km_provision::resolver::{ResolvedResources, ResourceSlot, resolve, param, Parameters};
use km_provision::testing::FakeControlPlane;
use km_provision::wait::{WaitOutcome, wait_until};
use km_provision_common::{ResourceKind, RetryPolicy, StageStatus};
use km_provision_test_utils::azure::cognitive_account_id;
use km_provision_test_utils::{
    TEST_PRINCIPAL, TEST_RESOURCE_GROUP, TEST_SUBSCRIPTION, resource, write_stage_script,
};
use std::convert::Infallible;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test(start_paused = true)]
async fn test_waiter_gives_up_within_budget() {
    let policy = RetryPolicy::from_secs(3, &[30, 60, 120]);
    let start = tokio::time::Instant::now();
    let mut checks = 0;

    let outcome = wait_until(&policy, None, "never converges", || {
        checks += 1;
        async { Ok::<_, Infallible>(false) }
    })
    .await;

    assert_eq!(outcome, WaitOutcome::TimedOut);
    assert_eq!(checks, 3);
    assert!(start.elapsed() <= Duration::from_secs(210));
}

#[tokio::test(start_paused = true)]
async fn test_waiter_stops_at_first_success() {
    let policy = RetryPolicy::from_secs(5, &[10]);
    let start = tokio::time::Instant::now();
    let mut checks = 0;

    let outcome = wait_until(&policy, None, "second poll", || {
        checks += 1;
        let done = checks == 2;
        async move { Ok::<_, Infallible>(done) }
    })
    .await;

    assert_eq!(outcome, WaitOutcome::Converged);
    assert_eq!(start.elapsed(), Duration::from_secs(20));
}

async fn resources() -> ResolvedResources {
    let cp = FakeControlPlane::new()
        .with_closed_resource(resource(ResourceKind::ObjectStore, "kmstorage"))
        .with_closed_resource(resource(ResourceKind::SearchService, "km-search"))
        .with_closed_resource(resource(ResourceKind::RelationalDatabase, "km-sql"))
        .with_closed_resource(resource(ResourceKind::AiServiceAccount, "km-ai"));
    let params = Parameters::new()
        .with(param::SUBSCRIPTION_ID, TEST_SUBSCRIPTION)
        .with(param::RESOURCE_GROUP, TEST_RESOURCE_GROUP)
        .with(param::PRINCIPAL_ID, TEST_PRINCIPAL)
        .with(param::STORAGE_ACCOUNT, "kmstorage")
        .with(param::STORAGE_CONTAINER, "data")
        .with(param::SEARCH_SERVICE, "km-search")
        .with(param::SQL_SERVER, "km-sql")
        .with(param::SQL_DATABASE, "kmdb")
        .with(param::SQL_IDENTITY_CLIENT_ID, "22222222-2222-2222-2222-222222222222")
        .with(param::SQL_IDENTITY_NAME, "km-app")
        .with(param::AI_SERVICES_ID, cognitive_account_id("km-ai"))
        .with(param::USE_CASE, "telecom")
        .with(param::EMBEDDING_MODEL, "emb")
        .with(param::CHAT_MODEL, "chat");
    resolve(&cp, &params).await.unwrap()
}

fn sh_stage(name: &str, script: &'static str, hard_failure: bool) -> PipelineStage {
    PipelineStage {
        name: name.to_string(),
        program: "sh".to_string(),
        args: vec![
            StageArg::Script(script),
            StageArg::Endpoint(ResourceSlot::Search),
            StageArg::Container,
        ],
        hard_failure,
        requires: vec![ResourceSlot::Search],
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_real_scripts_receive_rendered_arguments() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("args.txt");
    write_stage_script(
        &dir,
        "record.sh",
        &format!("echo \"$1 $2\" > '{}'", out.display()),
    )
    .unwrap();
    write_stage_script(&dir, "fail.sh", "echo boom >&2\nexit 3").unwrap();
    write_stage_script(&dir, "never.sh", &format!("touch '{}.never'", out.display())).unwrap();

    let resources = resources().await;
    let ctx = StageContext {
        resources: &resources,
        scripts_dir: dir.path().to_path_buf(),
        data_dir: dir.path().to_path_buf(),
    };
    let stages = vec![
        sh_stage("record", "record.sh", true),
        sh_stage("soft-fail", "fail.sh", false),
        sh_stage("hard-fail", "fail.sh", true),
        sh_stage("never", "never.sh", true),
    ];
    let invoker = PipelineInvoker::new(ProcessExecutor::new(CommandConfig::with_timeout_secs(30)));

    let result = invoker.run(&stages, &ctx).await;

    assert_eq!(
        std::fs::read_to_string(&out).unwrap().trim(),
        "https://km-search.search.windows.net data"
    );
    assert_eq!(result.status_of("record"), Some(StageStatus::Succeeded));
    assert_eq!(result.status_of("soft-fail"), Some(StageStatus::Failed));
    assert_eq!(result.status_of("hard-fail"), Some(StageStatus::Failed));
    assert_eq!(result.status_of("never"), Some(StageStatus::Skipped));
    assert!(!dir.path().join("args.txt.never").exists());
    assert!(!result.succeeded());
    assert_eq!(result.errors.len(), 2);
}
