use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::battle::BattleState;
use crate::bot::{Bot, BotError};
use crate::net_client::{Inbound, NetClient, NetError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Pause after each command sent, bounding the upstream rate.
    pub tick_delay: Duration,
    pub close_grace: Duration,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Net(#[from] NetError),
    #[error(transparent)]
    Bot(#[from] BotError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Stopped locally; a close handshake was sent.
    Stopped,
    PeerClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub end: SessionEnd,
    /// Battle phase when the session ended.
    pub battle: BattleState,
    pub frames: u64,
    pub commands_sent: u64,
    pub commands_dropped: u64,
}

/// Receives frames in arrival order, runs the bot on each and streams its
/// commands back until the peer hangs up or `stop` fires. A stop request is
/// only observed between frames, so the tick in progress always completes.
pub async fn run_session<S>(
    mut client: NetClient<S>,
    mut bot: Bot,
    config: SessionConfig,
    mut stop: oneshot::Receiver<()>,
) -> Result<SessionSummary, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut frames = 0u64;
    let mut commands_sent = 0u64;
    let mut commands_dropped = 0u64;

    let end = loop {
        let inbound = tokio::select! {
            _ = &mut stop => break SessionEnd::Stopped,
            inbound = client.recv() => inbound?,
        };
        let frame = match inbound {
            Inbound::Frame(frame) => frame,
            Inbound::Closed => {
                bot.on_disconnect();
                break SessionEnd::PeerClosed;
            }
        };
        frames += 1;

        let Some(cmd) = bot.on_frame(frame)? else {
            continue;
        };
        match client.send_upsync(&cmd).await {
            Ok(msg_id) => {
                commands_sent += 1;
                debug!(msg_id, frame_id = cmd.acking_frame_id, x = cmd.x, y = cmd.y, "upsync sent");
            }
            Err(err) => {
                commands_dropped += 1;
                warn!(%err, frame_id = cmd.acking_frame_id, "dropping upsync command");
            }
        }
        tokio::time::sleep(config.tick_delay).await;
    };

    if end == SessionEnd::Stopped {
        client.close(config.close_grace).await?;
    }
    let battle = bot.battle().state();
    info!(?end, ?battle, frames, commands_sent, commands_dropped, "session finished");
    Ok(SessionSummary {
        end,
        battle,
        frames,
        commands_sent,
        commands_dropped,
    })
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use tokio::io::{
        AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadBuf,
    };

    use super::*;
    use crate::bot::{BotConfig, Strategy};
    use crate::geometry::Direction;
    use crate::net_packet::frame_payload_line;
    use crate::net_structs::{PlayerState, RoomDownsyncFrame};
    use crate::tiled::fixtures;

    fn bot() -> Bot {
        Bot::new(
            BotConfig {
                player_id: 10,
                strategy: Strategy::Path,
                step: 16.0,
                goal_cell: None,
                goal_object: "Goal".to_string(),
                collider_radius: 16.0,
                initial_heading: FRAC_PI_2,
            },
            fixtures::resources(),
        )
    }

    fn session_config() -> SessionConfig {
        SessionConfig {
            tick_delay: Duration::ZERO,
            close_grace: Duration::from_secs(5),
        }
    }

    fn frame_lines(id: i32) -> String {
        let mut frame = RoomDownsyncFrame {
            id,
            countdown_nanos: 60_000_000_000,
            ..RoomDownsyncFrame::default()
        };
        frame.players.insert(
            10,
            PlayerState {
                id: 10,
                x: 32.0,
                y: 32.0,
                speed: 100.0,
                dir: Direction::new(2.0, 1.0),
            },
        );
        let mut lines = "{\"ret\":1000,\"act\":\"RoomDownsyncFrame\"}\n".to_string();
        lines.push_str(&frame_payload_line(&frame));
        lines
    }

    async fn collect_lines<R: AsyncBufRead + Unpin>(mut reader: R) -> Vec<serde_json::Value> {
        let mut lines = Vec::new();
        let mut line = String::new();
        while reader.read_line(&mut line).await.expect("read") > 0 {
            lines.push(serde_json::from_str(&line).expect("json"));
            line.clear();
        }
        lines
    }

    #[tokio::test]
    async fn one_command_per_in_battle_frame() {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let (remote_read, mut remote_write) = tokio::io::split(remote);
        let server = tokio::spawn(async move {
            let mut script = String::new();
            for id in [5, 1, 2, 3] {
                script.push_str(&frame_lines(id));
            }
            script.push_str("keepalive\n");
            remote_write.write_all(script.as_bytes()).await.expect("write");
            remote_write.shutdown().await.expect("shutdown");
            collect_lines(BufReader::new(remote_read)).await
        });

        let (_stop_tx, stop_rx) = oneshot::channel();
        let summary = run_session(NetClient::new(local), bot(), session_config(), stop_rx)
            .await
            .expect("session");
        assert_eq!(summary.end, SessionEnd::PeerClosed);
        assert_eq!(summary.battle, BattleState::InDismissal);
        assert_eq!(summary.frames, 4);
        assert_eq!(summary.commands_sent, 3);
        assert_eq!(summary.commands_dropped, 0);

        let sent = server.await.expect("server");
        let acked = sent
            .iter()
            .map(|message| message["data"]["AckingFrameId"].as_i64().expect("ack id"))
            .collect::<Vec<_>>();
        assert_eq!(acked, vec![1, 2, 3]);
        let ids = sent
            .iter()
            .map(|message| message["msgId"].as_u64().expect("msg id"))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn stop_sends_close_and_waits_for_peer() {
        let (local, remote) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let mut reader = BufReader::new(remote);
            let mut line = String::new();
            reader.read_line(&mut line).await.expect("read");
            serde_json::from_str::<serde_json::Value>(&line).expect("json")
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        stop_tx.send(()).expect("stop");
        let summary = run_session(NetClient::new(local), bot(), session_config(), stop_rx)
            .await
            .expect("session");
        assert_eq!(summary.end, SessionEnd::Stopped);
        assert_eq!(summary.battle, BattleState::Waiting);
        assert_eq!(summary.frames, 0);

        let close = server.await.expect("server");
        assert_eq!(close["act"], "Close");
        assert_eq!(close["msgId"], 1);
    }

    /// Reads pass through; every write fails as if the peer reset the socket.
    struct BrokenUpstream(DuplexStream);

    impl AsyncRead for BrokenUpstream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.0).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for BrokenUpstream {
        fn poll_write(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            _: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn failed_sends_are_dropped_and_frames_keep_flowing() {
        let (local, mut remote) = tokio::io::duplex(64 * 1024);
        let mut script = String::new();
        for id in [1, 2, 3] {
            script.push_str(&frame_lines(id));
        }
        remote.write_all(script.as_bytes()).await.expect("write");
        drop(remote);

        let (_stop_tx, stop_rx) = oneshot::channel();
        let client = NetClient::new(BrokenUpstream(local));
        let summary = run_session(client, bot(), session_config(), stop_rx)
            .await
            .expect("session survives send failures");
        assert_eq!(summary.end, SessionEnd::PeerClosed);
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.commands_sent, 0);
        assert_eq!(summary.commands_dropped, 3);
    }

    #[tokio::test]
    async fn undecodable_frame_ends_the_session() {
        let (local, mut remote) = tokio::io::duplex(4096);
        remote
            .write_all(b"{\"act\":\"RoomDownsyncFrame\"}\n{\"data\":\"not base64\"}\n")
            .await
            .expect("write");
        let (_stop_tx, stop_rx) = oneshot::channel();
        let result = run_session(NetClient::new(local), bot(), session_config(), stop_rx).await;
        assert!(matches!(result, Err(SessionError::Net(NetError::Payload(_)))));
        drop(remote);
    }
}
