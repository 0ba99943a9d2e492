//! End-to-end deployment runs against the in-memory CRM

use std::sync::Arc;
use std::time::Duration;

use crmdeploy::deploy::{DeploymentEngine, EngineOptions, EventHub, EventKind};
use crmdeploy::errors::{DeployerError, ErrorKind, RemoteError};
use crmdeploy::models::configuration::{
    DeploymentConfiguration, ObjectType, PipelineSpec, PipelineStageSpec,
};
use crmdeploy::models::{DeploymentStatus, EntityType, LogStatus};
use crmdeploy::remote::batch::BatchMode;
use crmdeploy::remote::fake::{FakeCrm, FakeOp};
use crmdeploy::storage::{DeploymentStore, MemoryStore};
use crmdeploy::templates::{MemoryTemplateStore, Template, TemplateStore};

use crate::common::{engine, engine_with, fields, group, property, request, TOKEN};

/// Two groups and five contact properties spread over them
fn onboarding() -> DeploymentConfiguration {
    let mut properties = Vec::new();
    for (i, name) in ["plan", "seats", "renewal", "region", "owner_team"]
        .iter()
        .enumerate()
    {
        let group = if i < 3 { "billing" } else { "routing" };
        properties.push(property(name, Some(group)));
    }
    DeploymentConfiguration {
        property_groups: vec![group("billing"), group("routing")],
        properties,
        ..Default::default()
    }
}

fn sales_pipeline() -> PipelineSpec {
    PipelineSpec {
        object_type: ObjectType::Deals,
        label: "Sales".to_string(),
        display_order: 0,
        stages: ["New", "Qualified", "Won"]
            .iter()
            .enumerate()
            .map(|(i, label)| PipelineStageSpec {
                label: label.to_string(),
                display_order: i as i32,
                metadata: Default::default(),
            })
            .collect(),
    }
}

#[tokio::test]
async fn test_groups_and_properties_complete() {
    let crm = Arc::new(FakeCrm::new());
    let engine = engine(crm.clone());

    let (deployment, credential) = engine.admit(request(onboarding())).await.unwrap();
    assert_eq!(deployment.progress.total_steps, 3);

    let done = engine.execute(deployment.id, credential).await.unwrap();

    assert_eq!(done.status, DeploymentStatus::Completed);
    assert_eq!(done.progress.completed_steps, 3);
    assert_eq!(done.progress.percentage(), 100);
    assert_eq!(done.created_entities.len(), 7);
    assert!(done.created_entities.iter().all(|e| !e.existed));
    assert_eq!(
        done.created_entities
            .iter()
            .filter(|e| e.entity_type == EntityType::PropertyGroup)
            .count(),
        2
    );
    assert_eq!(crm.group_names(ObjectType::Contacts), vec!["billing", "routing"]);
    assert_eq!(crm.property_names(ObjectType::Contacts).len(), 5);
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
}

#[tokio::test]
async fn test_item_failure_aborts_and_rolls_back() {
    let crm = Arc::new(FakeCrm::new());
    crm.fail_item(
        FakeOp::CreateProperty,
        "field_3",
        RemoteError::Validation("options are invalid".to_string()),
    );
    let engine = engine(crm.clone());
    let config = DeploymentConfiguration {
        properties: fields(10),
        ..Default::default()
    };

    let (deployment, credential) = engine.admit(request(config)).await.unwrap();
    let done = engine.execute(deployment.id, credential).await.unwrap();

    assert_eq!(done.status, DeploymentStatus::RolledBack);
    assert!(done.created_entities.is_empty());

    let detail = done.error_detail.unwrap();
    assert_eq!(detail.kind, ErrorKind::RemoteValidationError);
    assert_eq!(detail.phase.as_deref(), Some("properties"));
    let rollback = detail.rollback.unwrap();
    assert_eq!(rollback.attempted, 3);
    assert_eq!(rollback.succeeded, 3);
    assert!(rollback.failed.is_empty());

    // nothing past the failing item was sent, and only what was created is deleted
    assert_eq!(crm.calls(FakeOp::CreateProperty), 4);
    assert_eq!(crm.delete_calls(), 3);
    assert_eq!(crm.entity_count(), 0);
}

#[tokio::test]
async fn test_credential_failure_leaves_nothing_to_undo() {
    let crm = Arc::new(FakeCrm::new());
    crm.fail(
        FakeOp::Connectivity,
        RemoteError::CredentialInvalid("401 Unauthorized".to_string()),
    );
    let engine = engine(crm.clone());

    let (deployment, credential) = engine.admit(request(onboarding())).await.unwrap();
    let done = engine.execute(deployment.id, credential).await.unwrap();

    assert_eq!(done.status, DeploymentStatus::Failed);
    assert!(done.created_entities.is_empty());
    assert_eq!(done.progress.completed_steps, 0);
    let detail = done.error_detail.unwrap();
    assert_eq!(detail.kind, ErrorKind::CredentialInvalid);
    assert_eq!(detail.phase.as_deref(), Some("connectivity"));
    assert!(detail.rollback.is_none());
    assert_eq!(crm.calls(FakeOp::CreateGroup), 0);

    let rolled_back = engine
        .rollback(deployment.id, TOKEN.to_string())
        .await
        .unwrap();
    assert_eq!(rolled_back.status, DeploymentStatus::RolledBack);
    assert_eq!(rolled_back.error_detail.unwrap().rollback.unwrap().attempted, 0);
    assert_eq!(crm.delete_calls(), 0);
}

#[tokio::test]
async fn test_redeploy_adopts_existing_entities() {
    let crm = Arc::new(FakeCrm::new());
    let engine = engine(crm.clone());

    let (first, credential) = engine.admit(request(onboarding())).await.unwrap();
    engine.execute(first.id, credential).await.unwrap();
    assert_eq!(crm.entity_count(), 7);

    let (second, credential) = engine.admit(request(onboarding())).await.unwrap();
    let done = engine.execute(second.id, credential).await.unwrap();

    assert_eq!(done.status, DeploymentStatus::Completed);
    assert_eq!(done.created_entities.len(), 7);
    assert!(done.created_entities.iter().all(|e| e.existed));
    assert_eq!(crm.entity_count(), 7);
    assert_eq!(crm.property_names(ObjectType::Contacts).len(), 5);
}

#[tokio::test]
async fn test_existing_pipeline_is_adopted() {
    let crm = Arc::new(FakeCrm::new());
    let engine = engine(crm.clone());
    let config = DeploymentConfiguration {
        pipelines: vec![sales_pipeline()],
        ..Default::default()
    };

    let (first, credential) = engine.admit(request(config.clone())).await.unwrap();
    let first = engine.execute(first.id, credential).await.unwrap();
    let (second, credential) = engine.admit(request(config)).await.unwrap();
    let second = engine.execute(second.id, credential).await.unwrap();

    assert_eq!(crm.pipeline_labels(ObjectType::Deals), vec!["Sales"]);
    assert_eq!(
        first.created_entities[0].remote_id,
        second.created_entities[0].remote_id
    );
    assert!(second.created_entities[0].existed);
}

#[tokio::test]
async fn test_endpoint_batch_tolerates_rejected_items() {
    let crm = Arc::new(FakeCrm::new());
    for name in ["field_2", "field_5", "field_8"] {
        crm.fail_item(
            FakeOp::CreateProperty,
            name,
            RemoteError::Validation("invalid field type".to_string()),
        );
    }
    let engine = engine_with(
        crm.clone(),
        EngineOptions {
            batch_mode: BatchMode::endpoint(100),
            ..Default::default()
        },
    );
    let config = DeploymentConfiguration {
        properties: fields(10),
        ..Default::default()
    };

    let (deployment, credential) = engine.admit(request(config)).await.unwrap();
    let done = engine.execute(deployment.id, credential).await.unwrap();

    assert_eq!(done.status, DeploymentStatus::Completed);
    assert_eq!(done.created_entities.len(), 7);
    assert_eq!(crm.calls(FakeOp::CreatePropertiesBatch), 1);

    let logs = engine.store().logs(&deployment.id).await.unwrap();
    let rejected: Vec<_> = logs
        .iter()
        .filter(|l| l.step.starts_with("property:") && l.status == LogStatus::Failed)
        .map(|l| l.step.as_str())
        .collect();
    assert_eq!(
        rejected,
        vec!["property:field_2", "property:field_5", "property:field_8"]
    );
}

#[tokio::test]
async fn test_locally_invalid_property_is_skipped() {
    let crm = Arc::new(FakeCrm::new());
    let engine = engine(crm.clone());
    let mut config = DeploymentConfiguration {
        properties: fields(3),
        ..Default::default()
    };
    config.properties.push(property("Bad Name", None));

    let (deployment, credential) = engine.admit(request(config)).await.unwrap();
    let done = engine.execute(deployment.id, credential).await.unwrap();

    assert_eq!(done.status, DeploymentStatus::Completed);
    assert_eq!(done.created_entities.len(), 3);
    assert_eq!(crm.calls(FakeOp::CreateProperty), 3);
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_with_final_event() {
    let crm = Arc::new(FakeCrm::new());
    let engine = engine(crm);
    let mut config = onboarding();
    config.properties.extend(fields(25));
    config.pipelines.push(sales_pipeline());

    let mut events = engine.hub().subscribe();
    let deployment = engine.submit(request(config)).await.unwrap();
    let total = deployment.progress.total_steps;
    // 2 groups, 3 chunks of 10, 1 pipeline
    assert_eq!(total, 6);

    let mut last_completed = 0;
    let mut kinds = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("deployment did not finish")
            .unwrap();
        if event.deployment_id != deployment.id {
            continue;
        }
        assert!(event.progress.completed_steps >= last_completed);
        assert!(event.progress.completed_steps <= total);
        assert_eq!(event.progress.total_steps, total);
        last_completed = event.progress.completed_steps;
        kinds.push(event.kind);
        if event.is_final {
            break;
        }
    }

    assert_eq!(kinds.first(), Some(&EventKind::Started));
    assert_eq!(kinds.last(), Some(&EventKind::Completed));
    assert_eq!(last_completed, total);
}

#[tokio::test]
async fn test_failed_run_without_auto_rollback_waits_for_operator() {
    let crm = Arc::new(FakeCrm::new());
    crm.fail(
        FakeOp::CreatePipeline,
        RemoteError::Unavailable("503 Service Unavailable".to_string()),
    );
    let engine = engine_with(
        crm.clone(),
        EngineOptions {
            auto_rollback: false,
            ..Default::default()
        },
    );
    let mut config = onboarding();
    config.pipelines.push(sales_pipeline());

    let (deployment, credential) = engine.admit(request(config)).await.unwrap();
    let failed = engine.execute(deployment.id, credential).await.unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert_eq!(failed.created_entities.len(), 7);

    let err = engine
        .rollback(deployment.id, "another-token".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployerError::CredentialInvalid(_)));

    let rolled_back = engine
        .rollback(deployment.id, TOKEN.to_string())
        .await
        .unwrap();
    assert_eq!(rolled_back.status, DeploymentStatus::RolledBack);
    assert!(rolled_back.created_entities.is_empty());
    assert_eq!(crm.delete_calls(), 7);
    assert_eq!(crm.entity_count(), 0);

    // a second request changes nothing
    let again = engine
        .rollback(deployment.id, TOKEN.to_string())
        .await
        .unwrap();
    assert_eq!(again.status, DeploymentStatus::RolledBack);
    assert_eq!(crm.delete_calls(), 7);
}

#[tokio::test]
async fn test_rollback_records_entities_it_could_not_delete() {
    let crm = Arc::new(FakeCrm::new());
    crm.fail(
        FakeOp::CreatePipeline,
        RemoteError::Unavailable("502 Bad Gateway".to_string()),
    );
    crm.fail_item(
        FakeOp::DeleteProperty,
        "seats",
        RemoteError::Unavailable("502 Bad Gateway".to_string()),
    );
    let engine = engine(crm.clone());
    let mut config = onboarding();
    config.pipelines.push(sales_pipeline());

    let (deployment, credential) = engine.admit(request(config)).await.unwrap();
    let done = engine.execute(deployment.id, credential).await.unwrap();

    assert_eq!(done.status, DeploymentStatus::RolledBack);
    assert!(done.created_entities.is_empty());
    let rollback = done.error_detail.unwrap().rollback.unwrap();
    assert_eq!(rollback.attempted, 7);
    assert_eq!(rollback.succeeded, 6);
    assert_eq!(rollback.failed.len(), 1);
    let leftover = &rollback.failed[0];
    assert_eq!(leftover.entity_type, EntityType::Property);
    assert_eq!(leftover.object_type, ObjectType::Contacts);
    assert_eq!(leftover.remote_id, "seats");
    assert_eq!(crm.property_names(ObjectType::Contacts), vec!["seats"]);

    let stored = engine.store().get(&deployment.id).await.unwrap().unwrap();
    let persisted = stored.error_detail.unwrap().rollback.unwrap();
    assert_eq!(persisted.failed, rollback.failed);
}

#[tokio::test]
async fn test_rollback_deletes_most_recent_first() {
    let crm = Arc::new(FakeCrm::new());
    crm.fail_item(
        FakeOp::CreatePipeline,
        "Renewals",
        RemoteError::Unavailable("503 Service Unavailable".to_string()),
    );
    let engine = engine(crm.clone());
    let mut config = onboarding();
    config.pipelines.push(sales_pipeline());
    config.pipelines.push(PipelineSpec {
        label: "Renewals".to_string(),
        ..sales_pipeline()
    });

    let (deployment, credential) = engine.admit(request(config)).await.unwrap();
    let done = engine.execute(deployment.id, credential).await.unwrap();
    assert_eq!(done.status, DeploymentStatus::RolledBack);

    let expected: Vec<(FakeOp, String)> = [
        (FakeOp::DeletePipeline, "1001"),
        (FakeOp::DeleteProperty, "owner_team"),
        (FakeOp::DeleteProperty, "region"),
        (FakeOp::DeleteProperty, "renewal"),
        (FakeOp::DeleteProperty, "seats"),
        (FakeOp::DeleteProperty, "plan"),
        (FakeOp::DeleteGroup, "routing"),
        (FakeOp::DeleteGroup, "billing"),
    ]
    .into_iter()
    .map(|(op, target)| (op, target.to_string()))
    .collect();
    assert_eq!(crm.delete_log(), expected);
}

#[tokio::test]
async fn test_rollback_counts_vanished_entities_as_deleted() {
    let crm = Arc::new(FakeCrm::new());
    crm.fail(
        FakeOp::CreatePipeline,
        RemoteError::Unavailable("503 Service Unavailable".to_string()),
    );
    let engine = engine_with(
        crm.clone(),
        EngineOptions {
            auto_rollback: false,
            ..Default::default()
        },
    );
    let mut config = onboarding();
    config.pipelines.push(sales_pipeline());

    let (deployment, credential) = engine.admit(request(config)).await.unwrap();
    let failed = engine.execute(deployment.id, credential).await.unwrap();
    assert_eq!(failed.status, DeploymentStatus::Failed);
    assert_eq!(failed.created_entities.len(), 7);

    // someone removed it in the CRM before the operator asked for a rollback
    crm.remove_property(ObjectType::Contacts, "seats");

    let rolled_back = engine
        .rollback(deployment.id, TOKEN.to_string())
        .await
        .unwrap();

    assert_eq!(rolled_back.status, DeploymentStatus::RolledBack);
    assert!(rolled_back.created_entities.is_empty());
    let rollback = rolled_back.error_detail.unwrap().rollback.unwrap();
    assert_eq!(rollback.attempted, 7);
    assert_eq!(rollback.succeeded, rollback.attempted);
    assert!(rollback.failed.is_empty());
    assert_eq!(crm.delete_calls(), 7);
    assert_eq!(crm.entity_count(), 0);
}

#[tokio::test]
async fn test_rollback_of_completed_deployment_is_refused() {
    let engine = engine(Arc::new(FakeCrm::new()));
    let (deployment, credential) = engine.admit(request(onboarding())).await.unwrap();
    engine.execute(deployment.id, credential).await.unwrap();

    let err = engine
        .rollback(deployment.id, TOKEN.to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, DeployerError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_template_deployment_counts_usage() {
    let templates = Arc::new(MemoryTemplateStore::new());
    templates
        .insert(Template {
            id: "onboarding".to_string(),
            name: "Onboarding".to_string(),
            configuration: onboarding(),
            usage_count: 0,
        })
        .unwrap();
    let engine = DeploymentEngine::new(
        Arc::new(FakeCrm::new()),
        Arc::new(MemoryStore::new()),
        templates.clone(),
        EventHub::new(),
        EngineOptions::default(),
    );

    let mut req = request(DeploymentConfiguration::default());
    req.configuration = None;
    req.template_id = Some("onboarding".to_string());
    let (deployment, credential) = engine.admit(req.clone()).await.unwrap();
    assert_eq!(deployment.template_id.as_deref(), Some("onboarding"));
    engine.execute(deployment.id, credential).await.unwrap();

    let template = templates.get("onboarding").await.unwrap().unwrap();
    assert_eq!(template.usage_count, 1);

    req.template_id = Some("missing".to_string());
    let err = engine.admit(req).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationInvalid);
}
