use crate::core::{self, DaemonEvent};
use scrobble_proto::protocol::{Message, Reply, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Binds first so a port clash is reported at startup, then accepts in the
/// background.
pub async fn start_server(
    bind_address: &str,
    port: u16,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    let addr = format!("{}:{}", bind_address, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("TCP server listening at {}", addr);

    Ok(tokio::spawn(accept_loop(listener, event_tx)))
}

async fn accept_loop(listener: TcpListener, event_tx: mpsc::Sender<DaemonEvent>) {
    let mut client_id = 0usize;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                client_id += 1;
                let id = client_id;
                debug!("Client {} connected from {}", id, peer);

                let evt_tx = event_tx.clone();
                tokio::spawn(async move {
                    handle_client(stream, id, evt_tx).await;
                    debug!("Client {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(stream: TcpStream, client_id: usize, event_tx: mpsc::Sender<DaemonEvent>) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    // Send Hello with the daemon's current settings on connect
    match encode_hello(&event_tx).await {
        Ok(encoded) => {
            if write_half.write_all(&encoded).await.is_err() {
                return;
            }
        }
        Err(e) => {
            warn!("Client {}: {}", client_id, e);
            return;
        }
    }

    loop {
        match read_half.read(&mut tmp).await {
            Ok(0) => break,
            Ok(n) => {
                read_buf.extend_from_slice(&tmp[..n]);

                loop {
                    let frame_len = match Message::frame_len(&read_buf) {
                        Ok(Some(frame_len)) => frame_len,
                        Ok(None) => break,
                        Err(e) => {
                            // The stream cannot be resynced past a bogus header.
                            warn!("Client {}: {}, closing", client_id, e);
                            let reply = Reply::Error {
                                message: e.to_string(),
                            };
                            let _ = write_reply(&mut write_half, client_id, reply).await;
                            return;
                        }
                    };
                    let decoded = Message::decode(&read_buf[..frame_len]);
                    read_buf.drain(..frame_len);

                    let reply = match decoded {
                        Ok((Message::Call(call), _)) => {
                            debug!("Client {} sent {:?}", client_id, call.method_name());
                            match core::submit(&event_tx, call).await {
                                Ok(Ok(())) => Reply::Ok,
                                Ok(Err(e)) => Reply::Error {
                                    message: e.to_string(),
                                },
                                Err(e) => Reply::Error {
                                    message: e.to_string(),
                                },
                            }
                        }
                        Ok((Message::Reply(_), _)) => continue,
                        Err(e) => {
                            debug!("Client {} sent an undecodable frame: {}", client_id, e);
                            Reply::Error {
                                message: format!("Invalid call: {}", e),
                            }
                        }
                    };

                    if !write_reply(&mut write_half, client_id, reply).await {
                        return;
                    }
                }
            }
            Err(e) => {
                error!("Read error from client {}: {}", client_id, e);
                break;
            }
        }
    }
}

/// False once the client can no longer be written to.
async fn write_reply(write_half: &mut OwnedWriteHalf, client_id: usize, reply: Reply) -> bool {
    match Message::Reply(reply).encode() {
        Ok(encoded) => write_half.write_all(&encoded).await.is_ok(),
        Err(e) => {
            error!("Failed to encode reply for client {}: {}", client_id, e);
            false
        }
    }
}

async fn encode_hello(event_tx: &mpsc::Sender<DaemonEvent>) -> anyhow::Result<Vec<u8>> {
    let status = core::status(event_tx).await?;
    Message::Reply(Reply::Hello {
        protocol_version: PROTOCOL_VERSION,
        network: status.network,
        sync: status.sync,
        authenticated: status.authenticated,
    })
    .encode()
}
