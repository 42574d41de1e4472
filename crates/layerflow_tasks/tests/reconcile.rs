//! Post-save reconciliation against the in-memory catalog.

use layerflow_core::{
    CoreError, Notification, Registry, Resource, ResourceId, Settings, StoreType, DEFAULT_SRID,
    DEFAULT_SRID_CODE,
};
use layerflow_tasks::{
    ReconcileOutcome, ServiceStep, SkipReason, Step, TaskError, TaskRequest,
};
use layerflow_testkit::prelude::*;

fn projection(env: &TestEnv, name: &str, projection: Option<&str>) {
    let mut remote = env
        .catalog
        .peek_resource("geonode", name)
        .expect("seeded catalog resource");
    remote.projection = projection.map(str::to_string);
    env.catalog.add_resource(remote);
}

#[test]
fn unbacked_resource_gets_one_store_and_an_alternate() {
    let env = TestEnv::new();
    let resource = env.unpublished_resource("rivers", "rivers.shp");
    assert_eq!(env.catalog.store_count(), 0);

    let report = env.reconciler().reconcile(resource.clone()).unwrap();
    assert!(report.published);
    assert_eq!(report.outcome, ReconcileOutcome::Reconciled);
    assert_eq!(env.catalog.store_count(), 1);

    let stored = env.resource(resource.id);
    assert_eq!(stored.alternate.as_deref(), Some("geonode:rivers"));
    assert_eq!(stored.typename.as_deref(), Some("geonode:rivers"));
    assert_eq!(stored.store.as_deref(), Some("rivers"));
    assert_eq!(stored.store_type, Some(StoreType::DataStore));
    assert!(!stored.dirty);

    // Saved again: the store exists now, nothing is published twice.
    let report = env.reconciler().reconcile(stored).unwrap();
    assert!(!report.published);
    assert_eq!(env.catalog.store_count(), 1);
    assert_eq!(env.catalog.call_count("publish"), 1);
}

#[test]
fn overwrite_request_is_consumed_by_one_publish() {
    let env = TestEnv::new();
    let resource = env.unpublished_resource("rivers", "rivers.shp");
    env.reconciler().reconcile(resource.clone()).unwrap();

    let mut stored = env.resource(resource.id);
    stored.overwrite = true;
    env.save(&stored);
    let report = env.reconciler().reconcile(stored).unwrap();
    assert!(report.published);
    assert!(report.changed_fields.contains(&"overwrite"));
    assert_eq!(env.catalog.call_count("publish"), 2);
    assert_eq!(env.catalog.store_count(), 1);

    let mut stored = env.resource(resource.id);
    assert!(!stored.overwrite);

    // A plain save afterwards neither republishes nor re-derives the alternate.
    stored.alternate = Some("geonode:rivers_legacy".into());
    env.save(&stored);
    let report = env.reconciler().reconcile(stored).unwrap();
    assert!(!report.published);
    assert_eq!(env.catalog.call_count("publish"), 2);
    assert_eq!(
        env.resource(resource.id).alternate.as_deref(),
        Some("geonode:rivers_legacy")
    );
}

#[test]
fn failed_dirty_flag_still_releases_sessions() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    env.start_upload(&resource, "import-roads");
    env.registry.fail_next_dirty_flags(1);

    let err = env.reconciler().reconcile(resource.clone()).unwrap_err();
    assert!(matches!(err, TaskError::Core(CoreError::Storage { .. })));
    assert!(err.is_retryable());
    assert_eq!(env.catalog.call_count("get_resource"), 0);

    let sessions = env.registry.sessions_for(resource.id).unwrap();
    assert!(!sessions.is_empty());
    assert!(sessions.iter().all(|s| s.processed));
    assert!(!env.resource(resource.id).dirty);
}

#[test]
fn resource_without_data_file_is_left_alone() {
    let env = TestEnv::new();
    let resource = env.insert(Resource::new(ResourceId::new(0), "empty"));

    let report = env.reconciler().reconcile(resource.clone()).unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::Skipped(SkipReason::NoBaseFile));
    assert_eq!(env.catalog.store_count(), 0);
    assert!(!env.resource(resource.id).dirty);
}

#[test]
fn fetch_succeeds_within_retry_budget() {
    let max = Settings::default().max_fetch_retries;
    for hidden in 0..=max {
        let env = TestEnv::new();
        let resource = env.vector_resource("roads");
        env.catalog.hide_next_lookups(hidden);

        let report = env.reconciler().reconcile(resource).unwrap();
        assert_eq!(report.outcome, ReconcileOutcome::Reconciled, "hidden={}", hidden);
        assert_eq!(report.catalog_attempts, hidden + 1);
        assert_eq!(env.catalog.call_count("get_resource"), hidden + 1);
    }
}

#[test]
fn fetch_gives_up_after_max_attempts() {
    let env = TestEnv::new();
    let max = env.settings.max_fetch_retries;
    let resource = env.vector_resource("roads");
    env.catalog.hide_next_lookups(100);

    let report = env.reconciler().reconcile(resource.clone()).unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::Degraded);
    assert_eq!(report.catalog_attempts, max + 1);
    assert_eq!(env.catalog.call_count("get_resource"), max + 1);

    let stored = env.resource(resource.id);
    assert_eq!(stored.alternate, None);
    assert!(!stored.dirty);
    assert!(env.registry.updates().is_empty());
}

#[test]
fn missing_projection_falls_back_to_default_srid() {
    let env = TestEnv::new();
    let mut resource = env.vector_resource("parcels");
    resource.srid = None;
    env.save(&resource);
    projection(&env, "parcels", None);

    let report = env.reconciler().reconcile(resource.clone()).unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::Reconciled);
    assert!(report.report.has_warning(Step::Projection));

    let stored = env.resource(resource.id);
    assert_eq!(stored.srid.as_deref(), Some(DEFAULT_SRID));
    assert_eq!(stored.ll_bbox_polygon.unwrap().srid, DEFAULT_SRID_CODE);
}

#[test]
fn unparsable_projection_tags_extent_with_default_code() {
    let env = TestEnv::new();
    let resource = env.vector_resource("parcels");
    projection(&env, "parcels", Some("garbage"));

    let report = env.reconciler().reconcile(resource.clone()).unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::Reconciled);

    let stored = env.resource(resource.id);
    assert_eq!(stored.srid.as_deref(), Some("garbage"));
    assert_eq!(stored.ll_bbox_polygon.unwrap().srid, DEFAULT_SRID_CODE);
}

#[test]
fn no_projection_and_no_extent_is_a_configuration_error() {
    let env = TestEnv::new();
    let mut resource = env.vector_resource("blank");
    resource.srid = None;
    resource.bbox = None;
    resource.title = "Blank".into();
    env.save(&resource);
    projection(&env, "blank", None);
    let mut remote = env.catalog.peek_resource("geonode", "blank").unwrap();
    remote.native_bbox = None;
    env.catalog.add_resource(remote);

    let err = env
        .execute(&TaskRequest::PostSaveLayers {
            resource: resource.id,
        })
        .unwrap_err();
    assert!(matches!(err, TaskError::Core(CoreError::InvalidProjection { .. })));
    assert!(err.is_configuration());
    assert!(!err.is_retryable());
    assert_eq!(env.catalog.call_count("get_resource"), 1);

    let stored = env.resource(resource.id);
    assert!(!stored.metadata_uploaded);
    assert!(!stored.dirty);
    assert_eq!(stored.title, "Blank");
    assert_eq!(stored.alternate, None);
    assert!(env.registry.updates().is_empty());
}

#[test]
fn update_groups_fail_independently() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    projection(&env, "roads", Some("EPSG:32633"));
    // Identity and projected geometry fail; the default-SRID geometry lands.
    env.registry.fail_next_updates(2);

    let report = env.reconciler().reconcile(resource.clone()).unwrap();
    assert_eq!(
        report.report.failed_steps(),
        vec![Step::IdentityUpdate, Step::GeometryUpdate]
    );

    let stored = env.resource(resource.id);
    assert_eq!(stored.alternate, None);
    assert_eq!(stored.srid.as_deref(), Some("EPSG:32633"));
    assert_eq!(stored.ll_bbox_polygon.unwrap().srid, DEFAULT_SRID_CODE);
    assert!(report.changed_fields.contains(&"ll_bbox_polygon"));
}

#[test]
fn projected_extent_keeps_its_code() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    projection(&env, "roads", Some("EPSG:3857"));

    let report = env.reconciler().reconcile(resource.clone()).unwrap();
    assert!(report.report.is_clean(), "{:?}", report.report.warnings());

    let stored = env.resource(resource.id);
    assert_eq!(stored.ll_bbox_polygon.unwrap().srid, 3857);
    assert_eq!(stored.bbox_polygon.unwrap().srid, DEFAULT_SRID_CODE);
    assert_eq!(
        stored.srid_url.as_deref(),
        Some("http://www.spatialreference.org/ref/epsg/3857/")
    );
}

#[test]
fn remote_resources_only_ask_for_a_thumbnail() {
    let env = TestEnv::new();
    let mut resource = Resource::new(ResourceId::new(0), "harvested");
    resource.remote_service = Some("https://maps.example.org/wms".into());
    let resource = env.insert(resource);

    let report = env.reconciler().reconcile(resource).unwrap();
    assert_eq!(
        report.outcome,
        ReconcileOutcome::Skipped(SkipReason::RemoteService)
    );
    assert_eq!(env.catalog.call_count("get_resource"), 0);

    let kinds: Vec<_> = env.feed.history().iter().map(Notification::kind).collect();
    assert_eq!(kinds, vec!["thumbnail_needs_update"]);
}

#[test]
fn enrichment_failures_are_warnings() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    env.services.fail(ServiceStep::CatalogueRecord);
    env.services.fail(ServiceStep::Legends);
    env.services.fail(ServiceStep::TileCacheInvalidate);

    let report = env.reconciler().reconcile(resource.clone()).unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::Reconciled);
    assert_eq!(
        report.report.failed_steps(),
        vec![Step::CatalogueRecord, Step::Legends, Step::TileCache]
    );
    assert_eq!(env.services.count(ServiceStep::DefaultLinks), 1);
    assert_eq!(
        env.resource(resource.id).alternate.as_deref(),
        Some("geonode:roads")
    );

    let last = env.feed.history().pop().unwrap();
    assert_eq!(last.kind(), "post_save_complete");
}

#[test]
fn monochromatic_thumbnail_is_replaced() {
    let env = TestEnv::new();
    let mut resource = env.vector_resource("roads");
    resource.thumbnail_url = Some("/uploaded/thumbs/black.png".into());
    env.save(&resource);
    env.services.mark_monochromatic("/uploaded/thumbs/black.png");

    env.reconciler().reconcile(resource.clone()).unwrap();
    assert_eq!(
        env.resource(resource.id).thumbnail_url,
        Some(env.settings.missing_thumbnail_url.clone())
    );
}

#[test]
fn tile_cache_gets_layer_styles_before_truncation() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    env.styles().ensure_style(&resource, "roads", None).unwrap();

    env.reconciler().reconcile(resource).unwrap();
    assert_eq!(
        env.services.details(ServiceStep::TileCacheStyles),
        vec!["geonode:roads [geonode:roads]"]
    );
    assert_eq!(
        env.services.details(ServiceStep::TileCacheInvalidate),
        vec!["geonode:roads"]
    );
}
