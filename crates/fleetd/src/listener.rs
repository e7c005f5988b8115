//! Heartbeat intake: newline-delimited JSON over TCP.
//!
//! Instances hold a connection open and push one JSON heartbeat per line.
//! Malformed lines are dropped with a warning; the connection stays up.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleet_controller::{FleetController, Heartbeat};

pub async fn run(
    listener: TcpListener,
    controller: Arc<FleetController>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "heartbeat connection accepted");
                        let controller = Arc::clone(&controller);
                        tokio::spawn(async move {
                            serve_connection(stream, &peer.to_string(), controller).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to accept heartbeat connection"),
                }
            }
            _ = shutdown.changed() => {
                info!("heartbeat listener shutting down");
                break;
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, peer: &str, controller: Arc<FleetController>) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Heartbeat>(line) {
                    Ok(hb) => {
                        if let Err(e) = controller.ingest(&hb) {
                            warn!(name = %hb.name, error = %e, "failed to persist heartbeat");
                        }
                    }
                    Err(e) => warn!(%peer, error = %e, "malformed heartbeat dropped"),
                }
            }
            Ok(None) => {
                debug!(%peer, "heartbeat connection closed");
                break;
            }
            Err(e) => {
                debug!(%peer, error = %e, "heartbeat connection error");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;

    use fleet_controller::{CapacityGauge, ControllerConfig};
    use fleet_provision::{CreatedServer, Provisioner, StatusQuery};
    use fleet_routing::InProcessRouting;
    use fleet_state::{InstanceRecord, InstanceRole, InstanceStore, LifecycleState};

    struct NullProvisioner;

    #[async_trait]
    impl Provisioner for NullProvisioner {
        async fn create(&self, _name: &str, _role: InstanceRole) -> Option<CreatedServer> {
            None
        }
        async fn start(&self, _external_id: &str) -> bool {
            false
        }
        async fn stop(&self, _external_id: &str) -> bool {
            false
        }
        async fn delete(&self, _internal_id: i64) -> bool {
            false
        }
        async fn status(&self, _external_id: &str) -> StatusQuery {
            StatusQuery::Unavailable
        }
    }

    #[tokio::test]
    async fn heartbeat_line_updates_the_store() {
        let store = InstanceStore::open_in_memory().unwrap();
        let mut rec = InstanceRecord::placeholder("pool-1", InstanceRole::Pool, 0);
        rec.state = LifecycleState::Offline;
        rec.started_at = None;
        store.save(&rec).unwrap();

        let (gauge, _capacity_rx) = CapacityGauge::new(0);
        let controller = Arc::new(FleetController::new(
            store.clone(),
            Arc::new(NullProvisioner),
            Arc::new(InProcessRouting::new()),
            Arc::new(gauge),
            ControllerConfig::default(),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(listener, controller, shutdown_rx));

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(b"not json\n{\"name\":\"pool-1\",\"state\":\"starting\",\"occupancy\":0}\n")
            .await
            .unwrap();
        conn.shutdown().await.unwrap();

        // Give the connection task a moment to drain the lines.
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let rec = store.find_by_name("pool-1").unwrap().unwrap();
            if rec.state == LifecycleState::Starting {
                break;
            }
        }

        let rec = store.find_by_name("pool-1").unwrap().unwrap();
        assert_eq!(rec.state, LifecycleState::Starting);
        assert!(rec.started_at.is_some());

        let _ = shutdown_tx.send(true);
        let _ = handle.await;
    }
}
