//! Invocation locking and the worker pool.

use layerflow_tasks::{
    CreateThumbnail, DeleteTarget, Dispatcher, Invocation, LockBackend, PoolConfig, QueueClass,
    ServiceStep, TaskOutcome, TaskRequest, TaskSink, WorkerPool,
};
use layerflow_testkit::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn held_invocation_is_skipped_silently() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    let request = TaskRequest::PostSaveLayers {
        resource: resource.id,
    };
    let invocation = Invocation::new();
    let key = invocation.id().lock_key();
    assert!(env
        .locks
        .try_acquire(&key, "other-worker", Duration::from_secs(60))
        .unwrap());

    let runner = env.runner();
    let outcome = runner.execute(&request, &invocation).unwrap();
    assert_eq!(outcome, TaskOutcome::Skipped);
    assert_eq!(env.catalog.call_count("get_resource"), 0);

    assert!(env.locks.release(&key, "other-worker").unwrap());
    assert!(runner.execute(&request, &invocation).unwrap().is_completed());
    assert!(!env.locks.is_held(&key));
}

#[test]
fn same_invocation_never_runs_twice_at_once() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    let runner = Arc::new(env.runner());
    let request = TaskRequest::PostSaveLayers {
        resource: resource.id,
    };
    let invocation = Invocation::new();
    let key = invocation.id().lock_key();

    // Hold the lock while every worker tries, then let them go.
    assert!(env.locks.try_acquire(&key, "holder", Duration::from_secs(60)).unwrap());
    let start = Arc::new(Barrier::new(9));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let runner = Arc::clone(&runner);
            let request = request.clone();
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                runner.execute(&request, &invocation).unwrap()
            })
        })
        .collect();
    start.wait();

    let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(outcomes.iter().all(|o| *o == TaskOutcome::Skipped));
    assert_eq!(env.catalog.call_count("get_resource"), 0);
    assert!(env.locks.is_held(&key));
}

#[test]
fn different_invocations_run_independently() {
    let env = TestEnv::new();
    let resource = env.vector_resource("roads");
    let runner = env.runner();
    let request = TaskRequest::PostSaveLayers {
        resource: resource.id,
    };

    for _ in 0..3 {
        assert!(runner
            .execute(&request, &Invocation::new())
            .unwrap()
            .is_completed());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pool_drains_every_queue() {
    let env = TestEnv::new();
    let roads = env.vector_resource("roads");
    let rivers = env.vector_resource("rivers");
    let lakes = env.vector_resource("lakes");
    env.services.fail_times(ServiceStep::Thumbnail, 2);

    let config = PoolConfig::new().with_queue_capacity(16);
    let dispatcher = Dispatcher::from_config(&config);
    let pool = WorkerPool::start(&dispatcher, Arc::new(env.runner()), &config);
    let stats = pool.stats();

    for resource in [&roads, &rivers] {
        dispatcher
            .dispatch(TaskRequest::PostSaveLayers {
                resource: resource.id,
            })
            .unwrap();
    }
    dispatcher
        .dispatch(TaskRequest::CreateThumbnail(CreateThumbnail {
            resource: roads.id,
            overwrite: true,
            check_bbox: false,
        }))
        .unwrap();
    dispatcher
        .dispatch(TaskRequest::CascadingDelete(
            DeleteTarget::from_resource(&lakes),
        ))
        .unwrap();

    pool.shutdown().await;

    assert_eq!(stats.completed(), 4);
    assert_eq!(stats.failed(), 0);
    assert_eq!(env.services.count(ServiceStep::Thumbnail), 3);
    assert_eq!(
        env.resource(roads.id).thumbnail_url.as_deref(),
        Some("/uploaded/thumbs/roads-thumb.png")
    );
    assert!(env.catalog.artifacts_for("geonode", "lakes").is_empty());
    for class in QueueClass::ALL {
        assert_eq!(dispatcher.len(class), 0);
    }
}

#[tokio::test]
async fn pool_records_failures() {
    let env = TestEnv::new();
    let dispatcher = Dispatcher::new(4);
    let pool = WorkerPool::start(&dispatcher, Arc::new(env.runner()), &PoolConfig::new());
    let stats = pool.stats();

    dispatcher
        .dispatch(TaskRequest::CreateThumbnail(CreateThumbnail {
            resource: layerflow_core::ResourceId::new(99),
            overwrite: false,
            check_bbox: false,
        }))
        .unwrap();
    pool.shutdown().await;

    assert_eq!(stats.failed(), 1);
    assert_eq!(stats.total(), 1);
}
