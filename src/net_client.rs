use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::net_packet::{
    decode_frame_payload, encode_line, parse_envelope, Handshake, PayloadError, Request,
};
use crate::net_structs::{
    PlayerUpsyncCmd, RoomDownsyncFrame, ACT_CLOSE, ACT_PLAYER_UPSYNC_CMD, ACT_ROOM_DOWNSYNC_FRAME,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectParams {
    pub addr: String,
    pub path: String,
    pub auth_token: String,
    pub player_id: i32,
    pub map_sha1: String,
    pub connect_timeout: Duration,
}

impl ConnectParams {
    fn handshake(&self) -> Handshake {
        Handshake {
            path: self.path.clone(),
            int_auth_token: self.auth_token.clone(),
            player_id: self.player_id,
            map_sha1: self.map_sha1.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NetError {
    #[error("could not resolve {addr}: {source}")]
    Resolve { addr: String, source: io::Error },
    #[error("{0} resolved to no addresses")]
    NoAddress(String),
    #[error("could not connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },
    #[error("connection i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("could not encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Frame(RoomDownsyncFrame),
    /// The peer closed its side of the stream.
    Closed,
}

pub struct NetClient<S> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    next_msg_id: u64,
    line: Vec<u8>,
}

/// Opens a TCP connection with socket options applied through socket2, then
/// hands the socket to tokio and sends the handshake.
pub async fn connect(params: &ConnectParams) -> Result<NetClient<TcpStream>, NetError> {
    let addr = tokio::net::lookup_host(params.addr.as_str())
        .await
        .map_err(|source| NetError::Resolve {
            addr: params.addr.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| NetError::NoAddress(params.addr.clone()))?;

    let timeout = params.connect_timeout;
    let std_stream = tokio::task::spawn_blocking(move || open_socket(addr, timeout))
        .await
        .map_err(io::Error::other)?
        .map_err(|source| NetError::Connect { addr, source })?;
    let stream = TcpStream::from_std(std_stream)?;
    info!(%addr, path = %params.path, player_id = params.player_id, "connected");

    NetClient::handshake(stream, params).await
}

fn open_socket(addr: SocketAddr, timeout: Duration) -> io::Result<std::net::TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;
    socket.set_keepalive(true)?;
    socket.connect_timeout(&addr.into(), timeout)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

impl<S> NetClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        NetClient {
            reader: BufReader::new(reader),
            writer,
            next_msg_id: 1,
            line: Vec::new(),
        }
    }

    pub async fn handshake(stream: S, params: &ConnectParams) -> Result<Self, NetError> {
        let mut client = NetClient::new(stream);
        client.write_line(&params.handshake()).await?;
        Ok(client)
    }

    /// Next authoritative frame. Lines that are not a frame envelope are
    /// skipped, including ones that are not UTF-8. Not cancel safe: a
    /// partially read line is lost.
    pub async fn recv(&mut self) -> Result<Inbound, NetError> {
        loop {
            if !self.read_line().await? {
                return Ok(Inbound::Closed);
            }
            let Some(envelope) = parse_envelope(&self.line) else {
                debug!(
                    line = %String::from_utf8_lossy(&self.line).trim_end(),
                    "ignoring non-envelope message"
                );
                continue;
            };
            if envelope.act != ACT_ROOM_DOWNSYNC_FRAME {
                debug!(act = %envelope.act, "ignoring message");
                continue;
            }
            if !self.read_line().await? {
                warn!("peer closed between frame envelope and payload");
                return Ok(Inbound::Closed);
            }
            return Ok(Inbound::Frame(decode_frame_payload(&self.line)?));
        }
    }

    /// Sends one movement command and returns the message id it used.
    pub async fn send_upsync(&mut self, cmd: &PlayerUpsyncCmd) -> Result<u64, NetError> {
        self.send_request(ACT_PLAYER_UPSYNC_CMD, cmd).await
    }

    /// Sends `Close`, shuts down the write half, and waits up to `grace` for the
    /// peer to close its side. Returns whether the peer acknowledged in time.
    pub async fn close(mut self, grace: Duration) -> Result<bool, NetError> {
        self.send_request(ACT_CLOSE, &()).await?;
        self.writer.shutdown().await?;

        let drained = tokio::time::timeout(grace, async {
            while self.read_line().await? {}
            Ok::<(), NetError>(())
        })
        .await;
        match drained {
            Ok(result) => {
                result?;
                info!("peer acknowledged close");
                Ok(true)
            }
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "peer did not close in time");
                Ok(false)
            }
        }
    }

    async fn send_request<T: Serialize>(&mut self, act: &str, data: &T) -> Result<u64, NetError> {
        let msg_id = self.next_msg_id;
        self.next_msg_id += 1;
        self.write_line(&Request {
            msg_id,
            act: act.to_string(),
            data,
        })
        .await?;
        Ok(msg_id)
    }

    async fn write_line<T: Serialize>(&mut self, message: &T) -> Result<(), NetError> {
        let line = encode_line(message)?;
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<bool, NetError> {
        self.line.clear();
        Ok(self.reader.read_until(b'\n', &mut self.line).await? > 0)
    }
}
