use anyhow::{anyhow, bail};
use scrobble_proto::protocol::{Call, Message, Reply, PROTOCOL_VERSION};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// What the daemon announced on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonInfo {
    pub network: String,
    pub sync: bool,
    pub authenticated: bool,
}

pub struct DaemonConnection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
    info: DaemonInfo,
}

impl DaemonConnection {
    /// Connects and consumes the daemon's Hello.
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| anyhow!("cannot reach daemon at {}: {}", address, e))?;
        let mut conn = Self {
            stream,
            read_buffer: Vec::with_capacity(4096),
            info: DaemonInfo {
                network: String::new(),
                sync: false,
                authenticated: false,
            },
        };

        match conn.receive_message().await? {
            Message::Reply(Reply::Hello {
                protocol_version,
                network,
                sync,
                authenticated,
            }) => {
                if protocol_version != PROTOCOL_VERSION {
                    bail!(
                        "protocol mismatch: daemon speaks v{}, client v{}",
                        protocol_version,
                        PROTOCOL_VERSION
                    );
                }
                conn.info = DaemonInfo {
                    network,
                    sync,
                    authenticated,
                };
            }
            other => bail!("expected Hello from daemon, got {:?}", other),
        }
        Ok(conn)
    }

    pub fn info(&self) -> &DaemonInfo {
        &self.info
    }

    /// Sends `call` and waits for its reply.  A daemon-side error comes back
    /// as `Err` carrying the daemon's message.
    pub async fn call(&mut self, call: Call) -> anyhow::Result<()> {
        let encoded = Message::Call(call).encode()?;
        self.stream.write_all(&encoded).await?;

        match self.receive_message().await? {
            Message::Reply(Reply::Ok) => Ok(()),
            Message::Reply(Reply::Error { message }) => Err(anyhow!(message)),
            other => bail!("unexpected reply: {:?}", other),
        }
    }

    async fn receive_message(&mut self) -> anyhow::Result<Message> {
        let mut buf = vec![0u8; 4096];
        loop {
            if let Some(frame_len) = Message::frame_len(&self.read_buffer)? {
                let decoded = Message::decode(&self.read_buffer[..frame_len]);
                self.read_buffer.drain(..frame_len);
                return decoded.map(|(msg, _)| msg);
            }
            match self.stream.read(&mut buf).await {
                Ok(0) => bail!("daemon closed the connection"),
                Ok(n) => self.read_buffer.extend_from_slice(&buf[..n]),
                Err(e) => bail!("Read error: {}", e),
            }
        }
    }
}
