//! Integration tests for the sync engine against the collection server.

use offsync_protocol::{NewRecord, Record, RecordId, RecordPatch};
use offsync_store::LocalStore;
use offsync_sync_engine::{
    ClientConfig, ClientEvent, EventKind, LoopbackRemote, LoopbackRequest, LoopbackResponse,
    LoopbackServer, MemoryRemote, Method, OfflineClient, RemoteApi, RemoteMethod, SkipReason,
    SyncOutcome,
};
use offsync_sync_server::{HttpMethod, Request, ServerConfig, TodoServer};
use offsync_testkit::{assert_store_consistent, TestStore};
use parking_lot::Mutex;
use std::sync::Arc;

/// Routes loopback requests to an in-process server, counting them and
/// optionally failing one method with a fixed status.
#[derive(Clone)]
struct InProcessServer {
    server: Arc<TodoServer>,
    log: Arc<Mutex<Vec<(Method, String)>>>,
    failure: Arc<Mutex<Option<(Method, u16)>>>,
}

impl InProcessServer {
    fn new() -> Self {
        Self {
            server: Arc::new(TodoServer::new(ServerConfig::default()).unwrap()),
            log: Arc::new(Mutex::new(Vec::new())),
            failure: Arc::new(Mutex::new(None)),
        }
    }

    fn fail(&self, method: Method, status: u16) {
        *self.failure.lock() = Some((method, status));
    }

    fn heal(&self) {
        *self.failure.lock() = None;
    }

    fn count(&self, method: Method) -> usize {
        self.log.lock().iter().filter(|(m, _)| *m == method).count()
    }

    fn remote_titles(&self) -> Vec<String> {
        self.server
            .collection()
            .list()
            .into_iter()
            .map(|r| r.title)
            .collect()
    }
}

impl LoopbackServer for InProcessServer {
    fn handle(&self, request: LoopbackRequest) -> LoopbackResponse {
        self.log.lock().push((request.method, request.path.clone()));
        let failure = *self.failure.lock();
        if let Some((method, status)) = failure {
            if method == request.method {
                return LoopbackResponse {
                    status,
                    body: br#"{"error":"injected failure"}"#.to_vec(),
                };
            }
        }

        let method = match request.method {
            Method::Get => HttpMethod::Get,
            Method::Post => HttpMethod::Post,
            Method::Put => HttpMethod::Put,
            Method::Delete => HttpMethod::Delete,
        };
        let response = self.server.handle(&Request {
            method,
            path: request.path,
            idempotency_key: request.idempotency_key,
            body: request.body,
        });
        LoopbackResponse {
            status: response.status,
            body: response.body,
        }
    }
}

fn client_over(server: &InProcessServer, store: Arc<LocalStore>, online: bool) -> OfflineClient {
    let config = ClientConfig::default();
    let remote = Arc::new(LoopbackRemote::new(server.clone(), config.clone()));
    OfflineClient::new(config, store, remote, online)
}

fn client(online: bool) -> (OfflineClient, InProcessServer) {
    let server = InProcessServer::new();
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    (client_over(&server, store, online), server)
}

#[tokio::test]
async fn offline_create_is_pending() {
    let (client, server) = client(false);

    let outcome = client.add("Buy milk").await.unwrap();
    assert!(outcome.is_pending());
    let record = outcome.into_inner();
    assert!(record.id.is_temporary());
    assert!(!record.completed);

    let cached = client.todos().await.unwrap();
    assert_eq!(cached.len(), 1);
    assert!(cached[0].is_pending());

    let stored = client.store().get(&record.id).unwrap();
    assert!(stored.local_only);
    assert!(!stored.synced);
    assert_eq!(server.log.lock().len(), 0);
}

#[tokio::test]
async fn reconnect_pushes_pending_create_once() {
    let (client, server) = client(false);
    let temp_id = client.add("Buy milk").await.unwrap().into_inner().id;

    let outcome = client.set_online(true).await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.created, 1);
    assert!(report.is_clean());
    assert_eq!(server.count(Method::Post), 1);

    let records = client.store().get_all();
    assert_eq!(records.len(), 1);
    assert!(records[0].synced);
    assert!(!records[0].local_only);
    assert!(!records[0].id.is_temporary());
    assert!(client.store().get(&temp_id).is_none());
    assert_eq!(server.remote_titles(), vec!["Buy milk"]);
    assert_store_consistent(client.store());
}

#[tokio::test]
async fn failed_toggle_rolls_back() {
    let (client, server) = client(true);
    let created = client.add("Walk dog").await.unwrap().into_inner();
    let before = client.todos().await.unwrap();

    let rollbacks = Arc::new(Mutex::new(Vec::new()));
    {
        let rollbacks = Arc::clone(&rollbacks);
        client.events().on(EventKind::MutationRollback, move |e| {
            if let ClientEvent::MutationRollback { id, .. } = e {
                rollbacks.lock().push(id.clone());
            }
        });
    }

    server.fail(Method::Put, 500);
    let err = client.toggle(&created.id).await.unwrap_err();
    assert_eq!(err.status_code(), Some(500));
    assert!(err.is_retryable());

    let after = client.cache().cached(client.config().query_key.as_str()).unwrap();
    assert_eq!(after, before);
    assert!(!after[0].completed);
    assert_eq!(*rollbacks.lock(), vec![Some(created.id.clone())]);

    server.heal();
    let toggled = client.toggle(&created.id).await.unwrap().into_inner();
    assert!(toggled.completed);
}

#[tokio::test]
async fn overlapping_sync_requests_send_each_record_once() {
    let remote = Arc::new(MemoryRemote::new());
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let client = OfflineClient::new(ClientConfig::default(), store, remote.clone(), false);
    for title in ["a", "b", "c"] {
        client.add(title).await.unwrap();
    }
    client.connectivity().set_online(true);
    remote.pause();

    let first = {
        let manager = Arc::clone(client.sync_manager());
        tokio::spawn(async move { manager.sync_now().await })
    };
    while remote.calls(RemoteMethod::Create) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(
        client.sync_now().await,
        SyncOutcome::Skipped(SkipReason::AlreadyRunning)
    );

    remote.resume();
    let outcome = first.await.unwrap();
    assert_eq!(outcome.report().unwrap().created, 3);
    assert_eq!(remote.calls(RemoteMethod::Create), 3);
    assert_eq!(remote.records().len(), 3);
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn deleting_missing_record_is_not_found() {
    let (client, server) = client(true);
    client.todos().await.unwrap();

    let err = client.remove(&RecordId::new("404")).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(server.count(Method::Delete), 1);
    assert!(client.todos().await.unwrap().is_empty());
}

#[tokio::test]
async fn offline_session_survives_restart() {
    let server = InProcessServer::new();
    let mut test_store = TestStore::file();

    {
        let client = client_over(&server, Arc::clone(&test_store.store), false);
        let a = client.add("a").await.unwrap().into_inner();
        client.add("b").await.unwrap();
        client.rename(&a.id, "a2").await.unwrap();
    }
    test_store.reopen();
    assert_eq!(test_store.get_unsynced().len(), 2);

    let client = client_over(&server, Arc::clone(&test_store.store), false);
    let outcome = client.set_online(true).await.unwrap();
    assert_eq!(outcome.report().unwrap().created, 2);
    assert_eq!(server.count(Method::Put), 0);

    let mut titles = server.remote_titles();
    titles.sort();
    assert_eq!(titles, vec!["a2", "b"]);
    assert!(client.pending().is_empty());
}

#[tokio::test]
async fn offline_edits_and_deletes_replay_in_order() {
    let (client, server) = client(true);
    let keep = client.add("keep").await.unwrap().into_inner();
    let doomed = client.add("doomed").await.unwrap().into_inner();

    client.set_online(false).await;
    client.toggle(&keep.id).await.unwrap();
    client.remove(&doomed.id).await.unwrap();
    assert_eq!(client.pending().len(), 1);
    assert_eq!(client.pending_deletes().len(), 1);

    let outcome = client.set_online(true).await.unwrap();
    let report = outcome.report().unwrap();
    assert_eq!((report.updated, report.deleted), (1, 1));

    let remote = server.server.collection().list();
    assert_eq!(remote.len(), 1);
    assert!(remote[0].completed);
    assert!(client.pending_deletes().is_empty());
    assert_store_consistent(client.store());
}

#[tokio::test]
async fn lost_create_response_is_deduplicated() {
    let server = InProcessServer::new();
    let config = ClientConfig::default();
    let remote = LoopbackRemote::new(server.clone(), config);

    let payload = NewRecord::new("once");
    let first: Record = remote.create(&payload, Some("key-1")).await.unwrap();
    let replay: Record = remote.create(&payload, Some("key-1")).await.unwrap();
    assert_eq!(first.id, replay.id);
    assert_eq!(server.remote_titles().len(), 1);

    let other = remote.create(&payload, Some("key-2")).await.unwrap();
    assert_ne!(other.id, first.id);
}

#[tokio::test]
async fn server_rejects_empty_title() {
    let server = InProcessServer::new();
    let remote = LoopbackRemote::new(server.clone(), ClientConfig::default());

    let err = remote
        .update(&RecordId::new("1"), &RecordPatch::title("x"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = remote
        .create(&NewRecord::new("   "), None)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(400));
    assert!(err.is_client_error());
    assert!(err.to_string().contains("title"));
}
