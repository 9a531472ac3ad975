use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};

use crate::snapshot::SnapshotHistory;

/// Fan-out feed of encoded snapshot frames. Late joiners are served the
/// latest frame on connect, so a quiet store still gives them a baseline.
pub struct SnapshotServer {
    sender: Sender<Vec<u8>>,
    latest_frame: Arc<Mutex<Option<Vec<u8>>>>,
}

impl SnapshotServer {
    pub fn broadcast(&self, bytes: &[u8]) {
        {
            let mut guard = self
                .latest_frame
                .lock()
                .expect("latest snapshot frame mutex poisoned");
            *guard = Some(bytes.to_vec());
        }
        if let Err(err) = self.sender.send(bytes.to_vec()) {
            log::error!("Failed to queue snapshot frame: {}", err);
        }
    }
}

pub fn start_snapshot_server(bind_addr: SocketAddr) -> Option<SnapshotServer> {
    let listener = match TcpListener::bind(bind_addr) {
        Ok(listener) => listener,
        Err(err) => {
            log::warn!(
                "Snapshot feed bind failed at {}: {}. Streaming disabled.",
                bind_addr,
                err
            );
            return None;
        }
    };
    listener
        .set_nonblocking(true)
        .expect("set nonblocking failed");

    let (sender, receiver) = unbounded::<Vec<u8>>();
    let clients: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));
    let latest_frame: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let accept_clients = Arc::clone(&clients);
    let accept_latest = Arc::clone(&latest_frame);

    thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::info!("Snapshot client connected: {}", addr);
                let baseline = accept_latest
                    .lock()
                    .expect("latest snapshot frame mutex poisoned")
                    .clone();
                match admit_client(stream, baseline.as_deref()) {
                    Ok(stream) => accept_clients
                        .lock()
                        .expect("clients mutex poisoned")
                        .push(stream),
                    Err(err) => {
                        log::warn!("Dropping snapshot client {} at admit: {}", addr, err);
                    }
                }
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                log::error!("Error accepting snapshot client: {}", err);
                thread::sleep(Duration::from_millis(200));
            }
        }

        while let Ok(frame) = receiver.try_recv() {
            broadcast_frame(&clients, &frame);
        }
    });

    Some(SnapshotServer {
        sender,
        latest_frame,
    })
}

fn admit_client(mut stream: TcpStream, baseline: Option<&[u8]>) -> io::Result<TcpStream> {
    stream.set_nodelay(true)?;
    // The accept listener is nonblocking; the per-client writes are not.
    stream.set_nonblocking(false)?;
    if let Some(frame) = baseline {
        write_frame(&mut stream, frame)?;
    }
    Ok(stream)
}

/// Pushes the latest encoded snapshot to every client, but only when its
/// content hash moved. Idle cycles stay silent and clients keep
/// extrapolating from the frame they already hold.
pub fn broadcast_latest(server: Option<&SnapshotServer>, history: &SnapshotHistory) {
    let Some(server) = server else {
        return;
    };
    let hash_changed = history
        .last_change
        .map(|change| change.hash_changed)
        .unwrap_or(false);
    if !hash_changed {
        return;
    }
    if let Some(bytes) = history.encoded_snapshot.as_ref() {
        server.broadcast(bytes);
    }
}

/// Length-prefixed frame: u32 little-endian byte count, then the payload.
pub(crate) fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> io::Result<()> {
    let len = frame.len() as u32;
    let mut buffer = Vec::with_capacity(4 + frame.len());
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(frame);
    stream.write_all(&buffer)
}

fn broadcast_frame(clients: &Arc<Mutex<Vec<TcpStream>>>, frame: &[u8]) {
    let mut guard = clients.lock().expect("clients mutex poisoned");
    guard.retain_mut(|stream| match write_frame(stream, frame) {
        Ok(_) => true,
        Err(err) => {
            log::warn!("Dropping snapshot client: {}", err);
            false
        }
    });
}
