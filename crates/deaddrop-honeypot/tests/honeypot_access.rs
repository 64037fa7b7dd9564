//! Integration test: accessing a honeypot fires the webhook while the drop
//! itself is served like any other.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::post, Json, Router};
use tempfile::TempDir;
use tokio::sync::mpsc;

use deaddrop_honeypot::{AlertPayload, HoneypotManager};
use deaddrop_storage::StorageManager;

async fn spawn_sink() -> (String, mpsc::Receiver<AlertPayload>) {
    let (tx, rx) = mpsc::channel(8);

    async fn receive(
        State(tx): State<mpsc::Sender<AlertPayload>>,
        Json(payload): Json<AlertPayload>,
    ) {
        let _ = tx.send(payload).await;
    }

    let app = Router::new().route("/hook", post(receive)).with_state(tx);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}/hook"), rx)
}

#[tokio::test]
async fn honeypot_access_alerts_and_serves_normally() {
    let tmp = TempDir::new().unwrap();
    let (webhook, mut rx) = spawn_sink().await;

    let mut storage = StorageManager::open(tmp.path(), None).unwrap();
    storage.set_secure_delete(false);
    let storage = Arc::new(storage);

    let honeypots = HoneypotManager::open(tmp.path(), Some(&webhook)).unwrap();
    honeypots.generate(1, &storage).unwrap();
    let decoy_id = honeypots.ids().pop().unwrap();

    // The retrieval handler's sequence: validate receipt, consult the
    // predicate, alert, then serve the drop as if nothing happened.
    let receipt = storage.receipts().generate(&decoy_id);
    assert!(storage.receipts().validate(&decoy_id, &receipt));
    assert!(honeypots.is_honeypot(&decoy_id));

    honeypots.alert(&decoy_id, "203.0.113.7");

    let serve = {
        let storage = storage.clone();
        let id = decoy_id.clone();
        tokio::task::spawn_blocking(move || storage.get(&id).map(|c| c.data().to_vec()))
    };
    let body = serve.await.unwrap().unwrap();
    assert!(!body.is_empty(), "the decoy must serve a valid payload");

    let alert = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("webhook sink must receive the alert")
        .expect("payload");

    assert_eq!(alert.event, "honeypot_access");
    assert_eq!(alert.drop_id, decoy_id);
    assert_eq!(alert.remote_addr, "203.0.113.7");
}
