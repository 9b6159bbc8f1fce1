//! Wire-level tests against a running manager: variables, malformed API
//! traffic and hand-offs.


use std::time::Duration;

use corral::protocol::{Connection, JobDetail, ManagerMessage, RegistrationGrant};
use corral::scheduler::{EchoJob, Job, JobStrategy};
use serde_json::json;
use test_harness::{assert_eventually, ManualWorker, TestManager};
use tokio::io::AsyncWriteExt;

/// A variable registered by one worker can be read by another
#[tokio::test]
async fn test_variables_are_shared_between_workers() {
    let manager = TestManager::start(25300, 25299).await;
    let writer = manager.start_worker().await;
    let reader = manager.start_worker().await;
    assert!(manager.wait_for_connected(2, Duration::from_secs(2)).await);

    writer.variables.register("build", json!({"id": 7})).await.unwrap();

    assert_eventually(
        || async {
            reader.variables.retrieve("build").await.unwrap() == Some(json!({"id": 7}))
        },
        Duration::from_secs(3),
        "reader should see the writer's variable",
    )
    .await;

    assert_eq!(reader.variables.retrieve("missing").await.unwrap(), None);

    manager.shutdown().await;
}

/// Only the owner can remove a variable
#[tokio::test]
async fn test_variable_deregistration_is_owner_only() {
    let manager = TestManager::start(25320, 25319).await;
    let owner = manager.start_worker().await;
    let other = manager.start_worker().await;
    assert!(manager.wait_for_connected(2, Duration::from_secs(2)).await);

    owner.variables.register("lock", json!(true)).await.unwrap();
    assert_eventually(
        || async { other.variables.retrieve("lock").await.unwrap().is_some() },
        Duration::from_secs(3),
        "variable should reach the manager",
    )
    .await;

    // Not the owner: the manager keeps the value.
    other.variables.deregister("lock").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(other.variables.retrieve("lock").await.unwrap(), Some(json!(true)));

    owner.variables.deregister("lock").await.unwrap();
    assert_eventually(
        || async { other.variables.retrieve("lock").await.unwrap().is_none() },
        Duration::from_secs(3),
        "owner should be able to remove the variable",
    )
    .await;

    manager.shutdown().await;
}

/// Garbage from one API client does not stop the manager serving others
#[tokio::test]
async fn test_malformed_api_traffic_is_isolated() {
    let manager = TestManager::start(25340, 25339).await;

    let rogue = tokio::net::TcpStream::connect(manager.api_addr()).await.unwrap();
    {
        let mut rogue = rogue;
        rogue.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        rogue.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let client = manager.client().await;
    assert!(client.all_worker_details().await.unwrap().is_empty());

    manager.shutdown().await;
}

/// Unknown API commands and undecodable jobs keep the client connected
#[tokio::test]
async fn test_bad_requests_keep_the_connection() {
    let manager = TestManager::start(25360, 25359).await;
    let raw = Connection::connect(manager.api_addr(), Duration::from_secs(2)).await.unwrap();

    raw.send_text("REPORT NOTHING").await.unwrap();
    raw.send_frames(&[b"EXECUTE".as_slice(), b"{\"Unknown\":{}}".as_slice()])
        .await
        .unwrap();
    let reply: Option<JobDetail> = raw.receive_object().await.unwrap();
    assert!(reply.is_none());

    raw.send_text("REPORT LISTALLWORKERS").await.unwrap();
    let workers: Vec<serde_json::Value> = raw.receive_object().await.unwrap();
    assert!(workers.is_empty());

    manager.shutdown().await;
}

/// A registration that never connects to its private port stays unconnected
/// and does not block later workers
#[tokio::test]
async fn test_abandoned_handoff_does_not_block_registration() {
    let manager = TestManager::start(25380, 25379).await;

    let bootstrap = Connection::connect(manager.config.registration_addr(), Duration::from_secs(2))
        .await
        .unwrap();
    bootstrap.send_text("REGISTER").await.unwrap();
    let grant = bootstrap.receive_text().await.unwrap();
    assert_eq!(grant, "25381|worker-1");
    drop(bootstrap);

    let worker = ManualWorker::register(&manager.config).await;
    assert_eq!(worker.grant.name, "worker-2");
    assert_eq!(worker.grant.port, 25382);
    assert!(manager.wait_for_connected(1, Duration::from_secs(2)).await);

    let pending = manager.registry.get("worker-1").await.unwrap();
    assert!(!pending.is_connected());

    manager.shutdown().await;
}

/// An unknown command on one worker's channel is skipped; that worker and
/// the others keep taking tasks
#[tokio::test]
async fn test_bad_worker_command_is_isolated() {
    let manager = TestManager::start(25400, 25399).await;
    let manual = ManualWorker::register(&manager.config).await;
    let _worker = manager.start_worker().await;
    assert!(manager.wait_for_connected(2, Duration::from_secs(2)).await);

    manual.connection.send_text("NOT A COMMAND").await.unwrap();
    manual.connection.send_frame(b"").await.unwrap();
    manual.heartbeat().await;

    let client = manager.client().await;
    let job = Job::from(EchoJob::new(JobStrategy::RunOnAll, "still here"));
    let detail = client.execute_job(&job).await.unwrap().unwrap();

    assert!(manual.receives_frame(Duration::from_secs(2)).await);
    let task_id = match ManagerMessage::parse(&manual.connection.receive_text().await.unwrap()) {
        Ok(ManagerMessage::Execute { task_id, .. }) => task_id,
        other => panic!("expected a task, got {other:?}"),
    };
    manual.connection.receive_frame().await.unwrap();
    manual
        .connection
        .send_text(&format!("COMPLETE[{}]", task_id))
        .await
        .unwrap();

    assert_eventually(
        || async {
            client
                .job_status(detail.job_id)
                .await
                .unwrap()
                .is_some_and(|d| d.is_complete)
        },
        Duration::from_secs(3),
        "both workers should finish their task",
    )
    .await;

    manager.shutdown().await;
}

/// A worker that breaks framing is dropped without stalling the others
#[tokio::test]
async fn test_broken_worker_channel_is_isolated() {
    let manager = TestManager::start(25420, 25419).await;

    let bootstrap = Connection::connect(manager.config.registration_addr(), Duration::from_secs(2))
        .await
        .unwrap();
    bootstrap.send_text("REGISTER").await.unwrap();
    let grant = RegistrationGrant::parse(&bootstrap.receive_text().await.unwrap()).unwrap();
    drop(bootstrap);
    let mut broken = tokio::net::TcpStream::connect(("127.0.0.1", grant.port))
        .await
        .unwrap();
    broken.write_all(b"MSG|8\nTRANSFER").await.unwrap();

    let worker = manager.start_worker().await;
    assert!(manager.wait_for_connected(2, Duration::from_secs(2)).await);

    broken.write_all(b"JUNK|not a frame").await.unwrap();
    broken.flush().await.unwrap();

    assert_eventually(
        || async { manager.live_worker_names().await == vec![worker.name.clone()] },
        Duration::from_secs(3),
        "only the well-behaved worker should stay live",
    )
    .await;

    let client = manager.client().await;
    let job = Job::from(EchoJob::new(JobStrategy::RunOnOne, "survivor"));
    let detail = client.execute_job(&job).await.unwrap().unwrap();

    assert_eventually(
        || async {
            client
                .job_status(detail.job_id)
                .await
                .unwrap()
                .is_some_and(|d| d.is_complete)
        },
        Duration::from_secs(3),
        "the live worker should still run tasks",
    )
    .await;

    drop(broken);
    manager.shutdown().await;
}
