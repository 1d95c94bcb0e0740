mod common;

use chrono::{Duration, Utc};
use common::{FakeCloud, FakeCopier, RecordingReporter, stack, stream_arn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use stackflow_cloud::{BucketSettings, StackParameter, TableSettings};
use stackflow_lifecycle::{
    LaunchOptions, LifecycleError, RestoreEngine, RestoreOptions, RestorePlan, RestoreStage,
};

const SOURCE: &str = "demo-ltd-dev";
const EVENTS: &str = "demo-dev-events-abc123";
const AUDIT: &str = "demo-dev-audit-r2";

fn events_stream() -> String {
    stream_arn(EVENTS, "2025-01-01T00:00:00.000")
}

fn cloud() -> FakeCloud {
    FakeCloud::new()
        .with_stack(stack(
            SOURCE,
            &[
                ("Stage", "dev"),
                ("SourceDeploymentBucket", "demo-deploy"),
                ("EventsStreamArn", events_stream().as_str()),
                ("ExistingDeploymentBucket", ""),
                ("ExistingLogsBucket", ""),
                ("ExistingObjectsBucket", ""),
                ("ExistingEventsTable", ""),
                ("ExistingAuditTable", ""),
                ("ExistingEncryptionKey", ""),
            ],
            &[
                ("DeploymentBucket", "demo-deploy"),
                ("LogsBucket", "demo-logs"),
                ("ObjectsBucket", "demo-objects"),
                ("EventsTable", EVENTS),
                ("AuditTable", AUDIT),
                ("EncryptionKey", "key-1"),
                ("ApiUrl", "https://api.example.com"),
            ],
        ))
        .with_table(
            EVENTS,
            TableSettings {
                point_in_time_recovery: true,
                ttl_attribute: Some("expiresAt".to_string()),
                stream_view_type: Some("NEW_IMAGE".to_string()),
            },
        )
        .with_table(
            AUDIT,
            TableSettings {
                point_in_time_recovery: true,
                ..TableSettings::default()
            },
        )
        .with_bucket("demo-deploy", 3, BucketSettings::default())
        .with_bucket("demo-logs", 1000, BucketSettings::default())
        .with_bucket(
            "demo-objects",
            10,
            BucketSettings {
                encryption: Some(json!({"Rules": [{"ApplyServerSideEncryptionByDefault": {"SSEAlgorithm": "AES256"}}]})),
                versioning: Some("Enabled".to_string()),
                lifecycle: None,
                cors: Some(json!({"CORSRules": []})),
            },
        )
        .with_key("key-1")
}

fn options() -> RestoreOptions {
    RestoreOptions::new(SOURCE, Utc::now() - Duration::hours(6))
}

async fn plan(engine: &RestoreEngine<'_>, options: &RestoreOptions) -> RestorePlan {
    engine
        .plan_with_rng(options, &mut StdRng::seed_from_u64(7))
        .await
        .unwrap()
}

fn value<'a>(parameters: &'a [StackParameter], key: &str) -> &'a str {
    parameters
        .iter()
        .find(|p| p.key == key)
        .and_then(|p| p.value())
        .unwrap_or_else(|| panic!("missing parameter {}", key))
}

fn new_name<'a>(plan: &'a RestorePlan, logical: &str) -> &'a str {
    plan.targets()
        .find(|t| t.source.logical_name == logical)
        .map(|t| t.new_name.as_str())
        .unwrap()
}

#[tokio::test]
async fn test_plan_names_and_partitions_without_side_effects() {
    let cloud = cloud();
    let copier = FakeCopier::default();
    let reporter = RecordingReporter::default();
    let engine = RestoreEngine::new(&cloud, &copier, &reporter);

    let plan = plan(&engine, &options()).await;

    assert_eq!(plan.source_stack_name, SOURCE);
    let tables: Vec<_> = plan.tables_to_restore.iter().map(|t| t.new_name.as_str()).collect();
    assert_eq!(tables, vec!["demo-ltd-dev-events-r1", "demo-ltd-dev-audit-r3"]);

    let buckets: Vec<_> = plan
        .buckets_to_restore
        .iter()
        .map(|t| t.source.logical_name.as_str())
        .collect();
    assert_eq!(buckets, vec!["DeploymentBucket", "ObjectsBucket"]);
    assert!(new_name(&plan, "ObjectsBucket").starts_with("demo-ltd-dev-objects-"));
    assert!(new_name(&plan, "ObjectsBucket").ends_with("-r1"));

    let state = cloud.lock();
    assert!(state.bucket_calls.is_empty());
    assert!(state.restored_tables.is_empty());
    assert!(copier.copies().is_empty());
}

#[tokio::test]
async fn test_restore_rewrites_every_restored_id() {
    let cloud = cloud();
    let copier = FakeCopier::default();
    let reporter = RecordingReporter::default();
    let engine = RestoreEngine::new(&cloud, &copier, &reporter);

    let options = options();
    let plan = plan(&engine, &options).await;
    let result = engine.execute(&plan, &options).await.unwrap();
    let parameters = &result.parameters;

    assert_eq!(value(parameters, "ExistingEventsTable"), "demo-ltd-dev-events-r1");
    assert_eq!(value(parameters, "ExistingAuditTable"), "demo-ltd-dev-audit-r3");
    assert_eq!(
        value(parameters, "ExistingObjectsBucket"),
        new_name(&plan, "ObjectsBucket")
    );
    assert_eq!(
        value(parameters, "ExistingDeploymentBucket"),
        new_name(&plan, "DeploymentBucket")
    );
    assert_eq!(
        value(parameters, "EventsStreamArn"),
        stream_arn("demo-ltd-dev-events-r1", "2026-10-19T00:00:00.000")
    );

    // excluded from renaming
    assert_eq!(value(parameters, "SourceDeploymentBucket"), "demo-deploy");
    assert_eq!(value(parameters, "ExistingLogsBucket"), "demo-logs");
    assert_eq!(value(parameters, "ExistingEncryptionKey"), "key-1");
    assert_eq!(value(parameters, "Stage"), "dev");

    let old_ids = plan.old_to_new_physical_id();
    for parameter in parameters.iter().filter(|p| p.key != "SourceDeploymentBucket") {
        assert!(
            !old_ids.contains_key(parameter.value().unwrap()),
            "{} still points at an old resource",
            parameter.key
        );
    }

    assert_eq!(
        result.stream_arns.get("demo-ltd-dev-events-r1").map(String::as_str),
        Some(value(parameters, "EventsStreamArn"))
    );
    assert!(result.launched.is_none());
}

#[tokio::test]
async fn test_restore_copies_settings_and_data() {
    let cloud = cloud();
    let copier = FakeCopier::default();
    let reporter = RecordingReporter::default();
    let engine = RestoreEngine::new(&cloud, &copier, &reporter);

    let options = options();
    let plan = plan(&engine, &options).await;
    engine.execute(&plan, &options).await.unwrap();

    let state = cloud.lock();
    let events = &state.tables["demo-ltd-dev-events-r1"];
    assert!(events.point_in_time_recovery);
    assert_eq!(events.ttl_attribute.as_deref(), Some("expiresAt"));
    assert_eq!(state.restored_tables.len(), 2);
    assert!(state.restored_tables.iter().all(|(_, _, t)| *t == options.point_in_time));

    let objects = new_name(&plan, "ObjectsBucket");
    let bucket = &state.buckets[objects];
    assert!(bucket.settings.encryption.is_some());
    assert_eq!(bucket.settings.versioning.as_deref(), Some("Enabled"));

    // settings applied one after another, after creation
    let calls: Vec<_> = state
        .bucket_calls
        .iter()
        .filter(|c| c.ends_with(objects))
        .map(|c| c.split(':').next().unwrap())
        .collect();
    assert_eq!(calls, vec!["create", "encryption", "versioning", "cors"]);

    let mut copies = copier.copies();
    copies.sort();
    assert_eq!(copies.len(), 2);
    assert!(copies.iter().any(|(src, dst, _)| src == "demo-objects" && *dst == format!("s3://{}", objects)));
    assert!(!copies.iter().any(|(src, _, _)| src == "demo-logs"));

    // the source is left alone
    assert!(state.stacks.contains_key(SOURCE));
    assert!(state.buckets.contains_key("demo-objects"));
    assert!(state.create_requests.is_empty());
}

#[tokio::test]
async fn test_existing_target_table_fails_before_any_change() {
    let cloud = cloud();
    let copier = FakeCopier::default();
    let reporter = RecordingReporter::default();
    let engine = RestoreEngine::new(&cloud, &copier, &reporter);

    let options = options();
    let plan = plan(&engine, &options).await;
    cloud
        .lock()
        .tables
        .insert("demo-ltd-dev-events-r1".to_string(), TableSettings::default());

    let err = engine.execute(&plan, &options).await.unwrap_err();
    match err {
        LifecycleError::RestoreAborted {
            stage,
            completed,
            source,
        } => {
            assert_eq!(stage, RestoreStage::Preflight);
            assert!(completed.is_empty());
            assert!(matches!(*source, LifecycleError::AlreadyExists(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    let state = cloud.lock();
    assert!(state.bucket_calls.is_empty());
    assert!(state.restored_tables.is_empty());
}

#[tokio::test]
async fn test_missing_copy_tool_is_a_precondition_failure() {
    let cloud = cloud();
    let copier = FakeCopier {
        missing: true,
        ..FakeCopier::default()
    };
    let reporter = RecordingReporter::default();
    let engine = RestoreEngine::new(&cloud, &copier, &reporter);

    let options = options();
    let plan = plan(&engine, &options).await;
    let err = engine.execute(&plan, &options).await.unwrap_err();

    assert!(err.to_string().contains("pre-flight"));
    let LifecycleError::RestoreAborted { source, .. } = err else {
        panic!("expected an aborted restore");
    };
    assert!(source.to_string().contains("pip install s3-pit-restore"));
    assert!(cloud.lock().restored_tables.is_empty());
}

#[tokio::test]
async fn test_non_empty_target_bucket_aborts() {
    let cloud = cloud();
    let copier = FakeCopier::default();
    let reporter = RecordingReporter::default();
    let engine = RestoreEngine::new(&cloud, &copier, &reporter);

    let options = options();
    let plan = plan(&engine, &options).await;
    let objects = new_name(&plan, "ObjectsBucket").to_string();
    {
        let mut state = cloud.lock();
        state.buckets.insert(
            objects.clone(),
            common::FakeBucket {
                objects: 1,
                ..Default::default()
            },
        );
    }

    let err = engine.execute(&plan, &options).await.unwrap_err();
    let LifecycleError::RestoreAborted {
        stage, completed, ..
    } = err
    else {
        panic!("expected an aborted restore");
    };
    assert_eq!(stage, RestoreStage::PrepareBuckets);
    // the deployment bucket copy was prepared before the failure surfaced
    assert_eq!(completed, vec![new_name(&plan, "DeploymentBucket").to_string()]);
    assert!(cloud.lock().restored_tables.is_empty());
}

#[tokio::test]
async fn test_mismatched_template_is_inconsistent() {
    let cloud = FakeCloud::new()
        .with_stack(stack(
            SOURCE,
            &[("BackupTableName", EVENTS), ("ExistingEventsTable", "")],
            &[("EventsTable", EVENTS)],
        ))
        .with_table(EVENTS, TableSettings::default());
    let copier = FakeCopier::default();
    let reporter = RecordingReporter::default();
    let engine = RestoreEngine::new(&cloud, &copier, &reporter);

    let err = engine.plan(&options()).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Inconsistent(_)));
}

#[tokio::test]
async fn test_output_without_declared_parameter_is_inconsistent() {
    let cloud = FakeCloud::new()
        .with_stack(stack(SOURCE, &[("Stage", "dev")], &[("EventsTable", EVENTS)]))
        .with_table(EVENTS, TableSettings::default());
    let copier = FakeCopier::default();
    let reporter = RecordingReporter::default();
    let engine = RestoreEngine::new(&cloud, &copier, &reporter);

    let err = engine.plan(&options()).await.unwrap_err();
    match err {
        LifecycleError::Inconsistent(message) => assert!(message.contains(EVENTS)),
        other => panic!("expected Inconsistent, got {:?}", other),
    }
    assert!(cloud.lock().restored_tables.is_empty());
}

#[tokio::test]
async fn test_future_point_in_time_is_rejected() {
    let cloud = cloud();
    let copier = FakeCopier::default();
    let reporter = RecordingReporter::default();
    let engine = RestoreEngine::new(&cloud, &copier, &reporter);

    let options = RestoreOptions::new(SOURCE, Utc::now() + Duration::days(1));
    let err = engine.plan(&options).await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidInput(_)));
}

#[tokio::test]
async fn test_overrides_and_launch() {
    let cloud = cloud();
    let copier = FakeCopier::default();
    let reporter = RecordingReporter::default();
    let engine = RestoreEngine::new(&cloud, &copier, &reporter);

    let mut options = options();
    options.overrides = vec![
        StackParameter::new("Stage", "dr"),
        StackParameter::new("AlarmEmail", "ops@example.com"),
    ];
    options.launch = Some(LaunchOptions {
        stack_name: "demo-ltd-dr".to_string(),
        template_url: "https://templates/02.05.00.yaml".to_string(),
        termination_protection: true,
    });

    let plan = plan(&engine, &options).await;
    let result = engine.execute(&plan, &options).await.unwrap();

    assert_eq!(value(&result.parameters, "Stage"), "dr");
    assert_eq!(value(&result.parameters, "AlarmEmail"), "ops@example.com");
    assert!(result.launched.is_some());

    let state = cloud.lock();
    assert_eq!(state.create_requests.len(), 1);
    let request = &state.create_requests[0];
    assert_eq!(request.stack_name, "demo-ltd-dr");
    assert_eq!(request.parameters, result.parameters);
    assert!(request.termination_protection);
}
