//! Upload finalization.

use layerflow_core::{Registry, ResourceId};
use layerflow_tasks::{
    FinalizeUpload, MetadataFile, ServiceError, ServiceStep, Step, TaskError, TaskKind,
    TaskOutcome, TaskReport, TaskRequest,
};
use layerflow_testkit::prelude::*;
use serde_json::json;

const SLD: &str = "<StyledLayerDescriptor version=\"1.0.0\"/>";

fn run_all(env: &TestEnv, request: &TaskRequest) {
    let mut pending = vec![request.clone()];
    while let Some(next) = pending.pop() {
        let outcome = env.execute(&next).unwrap();
        assert!(outcome.is_completed(), "{:?} ended as {:?}", next, outcome);
        pending.extend(env.sink.take());
    }
}

#[test]
fn finalizing_twice_changes_nothing_more() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    let import_id = env.start_upload(&resource, "import-1");
    let upload = env.upload_dir("upload", &[("roads.sld", SLD)]);
    let request = TaskRequest::FinalizeUpload(
        FinalizeUpload::new(import_id.clone(), resource.id)
            .with_style_file("roads.sld", false)
            .with_tempdir(&upload),
    );

    run_all(&env, &request);
    let styles = env.catalog.style_names();
    let links = env.resource(resource.id).links;
    assert!(env.registry.upload_record(&import_id).unwrap().complete);

    // The temp directory is gone by now; the second pass must cope.
    run_all(&env, &request);
    assert!(env.registry.upload_record(&import_id).unwrap().complete);
    assert_eq!(env.catalog.style_names(), styles);
    assert_eq!(env.resource(resource.id).links, links);
    assert_eq!(env.catalog.store_count(), 1);
}

#[test]
fn finalize_links_record_and_session() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    let import_id = env.start_upload(&resource, "import-1");
    let latest = env.registry.insert_session(resource.id).unwrap();

    let report = env
        .finalizer()
        .finalize(
            resource.clone(),
            &FinalizeUpload::new(import_id.clone(), resource.id).created(true),
        )
        .unwrap();
    assert!(report.catalog_resolved);
    assert!(report.report.is_clean(), "{:?}", report.report.warnings());
    assert_eq!(report.style_task, Some(TaskKind::CreateStyle));

    let record = env.registry.upload_record(&import_id).unwrap();
    assert_eq!(record.resource, Some(resource.id));
    assert!(record.complete);

    let stored = env.resource(resource.id);
    assert_eq!(stored.upload_session, Some(latest));
    assert_eq!(stored.alternate.as_deref(), Some("geonode:roads"));
    assert_eq!(env.registry.saves().last(), Some(&(resource.id, false)));

    let last = env.feed.history().pop().unwrap();
    assert_eq!(last.kind(), "upload_complete");
}

#[test]
fn metadata_file_is_accepted_when_readable() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    let import_id = env.start_upload(&resource, "import-1");
    let upload = env.upload_dir("meta", &[("roads.xml", "<gmd:MD_Metadata/>")]);

    let request = FinalizeUpload::new(import_id, resource.id).with_metadata_file(
        MetadataFile::List(vec![json!(upload.join("roads.xml").to_string_lossy())]),
    );
    let report = env.finalizer().finalize(resource.clone(), &request).unwrap();
    assert!(report.metadata_uploaded);
    assert!(env.resource(resource.id).metadata_uploaded);
}

#[test]
fn unreadable_metadata_file_is_a_warning() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    let import_id = env.start_upload(&resource, "import-1");

    let request = FinalizeUpload::new(import_id, resource.id)
        .with_metadata_file(MetadataFile::Path(env.temp_path().join("missing.xml")));
    let report = env.finalizer().finalize(resource.clone(), &request).unwrap();
    assert!(!report.metadata_uploaded);
    assert_eq!(report.report.failed_steps(), vec![Step::MetadataFile]);
    assert!(!env.resource(resource.id).metadata_uploaded);
}

#[test]
fn catalog_outage_does_not_stop_finalization() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    let import_id = env.start_upload(&resource, "import-1");
    env.catalog.set_available(false);

    let report = env
        .finalizer()
        .finalize(resource.clone(), &FinalizeUpload::new(import_id.clone(), resource.id))
        .unwrap();
    assert!(!report.catalog_resolved);
    assert!(report.report.has_warning(Step::CatalogLookup));
    assert_eq!(report.style_task, Some(TaskKind::CreateStyle));
    assert_eq!(env.sink.requests().len(), 1);
    assert!(env.registry.upload_record(&import_id).unwrap().complete);
}

#[test]
fn permission_failure_fails_the_task_once() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    let import_id = env.start_upload(&resource, "import-1");
    env.services.deny_permissions();

    let request = TaskRequest::FinalizeUpload(
        FinalizeUpload::new(import_id.clone(), resource.id)
            .with_permissions(json!({"users": {"admin": ["view_resourcebase"]}})),
    );
    let err = env.execute(&request).unwrap_err();
    assert!(matches!(
        err,
        TaskError::Service(ServiceError::PermissionDenied(_))
    ));
    assert_eq!(env.services.count(ServiceStep::Permissions), 1);
    assert!(env.registry.upload_record(&import_id).unwrap().complete);
}

#[test]
fn moderation_failure_is_retried() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    let import_id = env.start_upload(&resource, "import-1");
    env.services.fail_times(ServiceStep::Moderation, 2);

    let outcome = env
        .execute(&TaskRequest::FinalizeUpload(FinalizeUpload::new(
            import_id,
            resource.id,
        )))
        .unwrap();
    let TaskOutcome::Completed(TaskReport::Finalized(report)) = outcome else {
        panic!("unexpected outcome {:?}", outcome);
    };
    assert_eq!(report.resource, resource.id);
    assert_eq!(env.services.count(ServiceStep::Moderation), 3);
}

#[test]
fn resource_not_yet_committed_is_retried() {
    let env = TestEnv::new();
    let missing = ResourceId::new(404);

    let err = env
        .execute(&TaskRequest::PostSaveLayers { resource: missing })
        .unwrap_err();
    assert!(matches!(err, TaskError::MissingEntity(id) if id == missing));
    assert!(err.is_retryable());
}
