//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 端到端日志管道测试：帧流 → 会话 → 持久化存储 / UDP 遥测 → 回放

#[cfg(test)]
mod contract_tests {
    #[test]
    fn test_contracts_compile() {
        // 验证 contracts crate 可编译
        let _ = contracts::ConfigVersion::V1;
        assert_eq!(contracts::RECORD_SEPARATOR, "\n\r");
    }

    #[test]
    fn test_sentinel_shape() {
        let sentinel = contracts::LogFrame::end_of_replay();
        assert!(sentinel.partial);
        assert_eq!(sentinel.line, b"\n");
        assert_eq!(sentinel.source, "stdout");
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{
        ContainerInfo, LogFrame, PipelineConfig, ReadConfig, SessionConfig, SinkDriver,
        StreamHandle, UdpEndpoint,
    };
    use entry_codec::{encode_frame, FrameDecoder};
    use session::{Session, SessionError, SessionRegistry, SessionState, TailReplay};
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::net::UdpSocket;

    const WAIT: Duration = Duration::from_secs(5);

    fn info(id: &str) -> ContainerInfo {
        ContainerInfo {
            container_id: id.to_string(),
            container_name: format!("/{id}-name"),
            container_image_name: "acme/web:1.0".to_string(),
            ..Default::default()
        }
    }

    async fn udp_receiver() -> (UdpSocket, UdpEndpoint) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let endpoint = UdpEndpoint::parse(&format!("udp://127.0.0.1:{port}")).unwrap();
        (socket, endpoint)
    }

    fn influx_config(endpoint: UdpEndpoint, buffer_lines: usize) -> SessionConfig {
        SessionConfig {
            driver: SinkDriver::Influx { endpoint },
            buffer_lines,
            ..Default::default()
        }
    }

    /// `log` field of one line-protocol point, still escaped
    fn log_field(point: &str) -> String {
        let start = point.find(" log=\"").unwrap() + " log=\"".len();
        let end = point.find("\",source=").unwrap();
        point[start..end].to_string()
    }

    async fn recv_point(socket: &UdpSocket) -> Option<String> {
        let mut buf = vec![0u8; 65536];
        match tokio::time::timeout(Duration::from_millis(500), socket.recv(&mut buf)).await {
            Ok(Ok(n)) => Some(String::from_utf8_lossy(&buf[..n]).into_owned()),
            _ => None,
        }
    }

    async fn send_lines(writer: &mut DuplexStream, lines: &[&str]) {
        for (i, line) in lines.iter().enumerate() {
            let frame = LogFrame::new("stdout", *line, 1_000 + i as i64);
            writer.write_all(&encode_frame(&frame).unwrap()).await.unwrap();
        }
    }

    async fn wait_closed(session: &Session) {
        tokio::time::timeout(WAIT, session.wait_closed())
            .await
            .expect("session did not close");
    }

    async fn wait_for_frames(session: &Session, count: u64) {
        tokio::time::timeout(WAIT, async {
            while session.stats().snapshot().frames_decoded < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("frames not consumed");
    }

    async fn stored_lines(registry: &SessionRegistry, id: &str) -> Vec<String> {
        let mut records = registry.read(id, ReadConfig::default()).await.unwrap();
        let mut lines = Vec::new();
        while let Some(record) = records.next().await {
            lines.push(record.unwrap().line);
        }
        lines
    }

    /// bufferLines=3, frames a,b,c,d then end of stream
    #[tokio::test]
    async fn test_e2e_batches_then_end_of_stream_flush() {
        let dir = tempfile::tempdir().unwrap();
        let (receiver, endpoint) = udp_receiver().await;
        let registry = SessionRegistry::new(dir.path(), PipelineConfig::default());
        let (mut writer, reader) = tokio::io::duplex(4096);

        let session = registry
            .start_with_source(
                "/run/fifo/batch".into(),
                &info("batch"),
                influx_config(endpoint, 3),
                reader,
            )
            .await
            .unwrap();

        send_lines(&mut writer, &["a", "b", "c", "d"]).await;
        drop(writer);
        wait_closed(&session).await;

        let first = recv_point(&receiver).await.unwrap();
        assert!(first.starts_with("acme/web:1.0,"), "got: {first}");
        assert_eq!(log_field(&first), "a\\n\\rb\\n\\rc");
        let second = recv_point(&receiver).await.unwrap();
        assert_eq!(log_field(&second), "d");
        assert!(recv_point(&receiver).await.is_none());

        // durable store keeps one record per frame
        assert_eq!(stored_lines(&registry, "batch").await, vec!["a", "b", "c", "d"]);
        let stats = session.stats().snapshot();
        assert_eq!(stats.batches_delivered, 2);
        assert_eq!(stats.durable_records, 4);
    }

    /// Stop with two buffered lines delivers exactly those lines once
    #[tokio::test]
    async fn test_e2e_stop_flushes_buffer_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let (receiver, endpoint) = udp_receiver().await;
        let registry = SessionRegistry::new(dir.path(), PipelineConfig::default());
        let handle = StreamHandle::from("/run/fifo/stop");
        let (mut writer, reader) = tokio::io::duplex(4096);

        let session = registry
            .start_with_source(handle.clone(), &info("stop"), influx_config(endpoint, 5), reader)
            .await
            .unwrap();

        send_lines(&mut writer, &["x", "y"]).await;
        wait_for_frames(&session, 2).await;

        registry.stop(&handle).await;
        registry.stop(&handle).await;
        wait_closed(&session).await;

        let point = recv_point(&receiver).await.unwrap();
        assert_eq!(log_field(&point), "x\\n\\ry");
        assert!(recv_point(&receiver).await.is_none());
        assert!(registry.lookup(&handle).is_none());

        // the writer is still open; the session is gone regardless
        writer.write_all(b"ignored").await.ok();
        registry.stop(&"/run/fifo/never-started".into()).await;
    }

    /// Five stored records replay in order followed by the sentinel
    #[tokio::test]
    async fn test_e2e_tail_replay_after_session_closed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path(), PipelineConfig::default());
        let (mut writer, reader) = tokio::io::duplex(4096);

        let session = registry
            .start_with_source(
                "/run/fifo/replay".into(),
                &info("replay"),
                SessionConfig::default(),
                reader,
            )
            .await
            .unwrap();
        send_lines(&mut writer, &["r0", "r1", "r2", "r3", "r4"]).await;
        drop(writer);
        wait_closed(&session).await;

        let replay = TailReplay::new(registry.clone());
        let mut out = Vec::new();
        let written = replay
            .replay("replay", ReadConfig::default(), &mut out)
            .await
            .unwrap();
        assert_eq!(written, 5);

        let mut decoder = FrameDecoder::new(out.as_slice(), 1024);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().await.unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 6);
        for (i, frame) in frames[..5].iter().enumerate() {
            assert_eq!(frame.line, format!("r{i}").into_bytes());
            assert_eq!(frame.timestamp, 1_000 + i as i64);
            assert!(!frame.partial);
        }
        assert!(frames[5].is_end_of_replay());
    }

    /// Two concurrent starts on one handle: exactly one wins
    #[tokio::test]
    async fn test_e2e_concurrent_duplicate_start() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(dir.path(), PipelineConfig::default());
        let handle = StreamHandle::from("/run/fifo/race");
        let (_w1, r1) = tokio::io::duplex(64);
        let (_w2, r2) = tokio::io::duplex(64);
        let info_a = info("race");
        let info_b = info("race");

        let (first, second) = tokio::join!(
            registry.start_with_source(handle.clone(), &info_a, SessionConfig::default(), r1),
            registry.start_with_source(handle.clone(), &info_b, SessionConfig::default(), r2),
        );

        let results = [first, second];
        let winners: Vec<Arc<Session>> = results
            .iter()
            .filter_map(|r| r.as_ref().ok().cloned())
            .collect();
        assert_eq!(winners.len(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(SessionError::DuplicateSession { handle: h }) if *h == handle
        )));
        assert_eq!(registry.len(), 1);

        registry.shutdown_all().await;
        assert_eq!(winners[0].state(), SessionState::Closed);
    }

    /// A malformed frame between good frames only loses itself
    #[tokio::test]
    async fn test_e2e_malformed_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (receiver, endpoint) = udp_receiver().await;
        let registry = SessionRegistry::new(dir.path(), PipelineConfig::default());
        let (mut writer, reader) = tokio::io::duplex(4096);

        let session = registry
            .start_with_source(
                "/run/fifo/bad".into(),
                &info("bad"),
                influx_config(endpoint, 1),
                reader,
            )
            .await
            .unwrap();

        send_lines(&mut writer, &["good-1"]).await;
        writer.write_all(&[0, 0, 0, 2, 0xff, 0xff]).await.unwrap();
        send_lines(&mut writer, &["good-2"]).await;
        drop(writer);
        wait_closed(&session).await;

        assert_eq!(log_field(&recv_point(&receiver).await.unwrap()), "good-1");
        assert_eq!(log_field(&recv_point(&receiver).await.unwrap()), "good-2");
        assert_eq!(stored_lines(&registry, "bad").await, vec!["good-1", "good-2"]);
        assert_eq!(session.stats().snapshot().resyncs, 1);
    }

    /// Log options from the container env select the sink and threshold
    #[tokio::test]
    async fn test_e2e_env_log_options() {
        let dir = tempfile::tempdir().unwrap();
        let (receiver, endpoint) = udp_receiver().await;
        let registry = SessionRegistry::new(dir.path(), PipelineConfig::default());

        let mut container = info("envopts");
        container.container_env = vec![
            format!("log_opt=--log-opt influx-address={endpoint};--log-opt buffer-lines=2"),
            "LOGCHAIN_DRIVER=influx".to_string(),
        ];
        let config = config_loader::session_config_for(&HashMap::new(), &container).unwrap();
        assert_eq!(config.threshold(), 2);

        let (mut writer, reader) = tokio::io::duplex(4096);
        let session = registry
            .start_with_source("/run/fifo/env".into(), &container, config, reader)
            .await
            .unwrap();
        send_lines(&mut writer, &["p", "q", "r"]).await;
        drop(writer);
        wait_closed(&session).await;

        assert_eq!(log_field(&recv_point(&receiver).await.unwrap()), "p\\n\\rq");
        assert_eq!(log_field(&recv_point(&receiver).await.unwrap()), "r");
    }

    /// An unreachable-but-resolvable backend never stops the durable path
    #[tokio::test]
    async fn test_e2e_durable_store_independent_of_telemetry() {
        let dir = tempfile::tempdir().unwrap();
        let (receiver, endpoint) = udp_receiver().await;
        drop(receiver);
        let registry = SessionRegistry::new(dir.path(), PipelineConfig::default());
        let (mut writer, reader) = tokio::io::duplex(4096);

        let session = registry
            .start_with_source(
                "/run/fifo/lossy".into(),
                &info("lossy"),
                influx_config(endpoint, 1),
                reader,
            )
            .await
            .unwrap();
        send_lines(&mut writer, &["kept-1", "kept-2", "kept-3"]).await;
        drop(writer);
        wait_closed(&session).await;

        assert_eq!(
            stored_lines(&registry, "lossy").await,
            vec!["kept-1", "kept-2", "kept-3"]
        );
    }

    /// An oversized line is rejected by the sink; later lines still go out
    #[tokio::test]
    async fn test_e2e_oversized_line_does_not_stall_telemetry() {
        let dir = tempfile::tempdir().unwrap();
        let (receiver, endpoint) = udp_receiver().await;
        let registry = SessionRegistry::new(dir.path(), PipelineConfig::default());
        let (mut writer, reader) = tokio::io::duplex(4096);

        let session = registry
            .start_with_source(
                "/run/fifo/huge".into(),
                &info("huge"),
                influx_config(endpoint, 1),
                reader,
            )
            .await
            .unwrap();

        let huge = "z".repeat(70_000);
        send_lines(&mut writer, &[huge.as_str(), "after-1", "after-2"]).await;
        drop(writer);
        wait_closed(&session).await;

        assert_eq!(log_field(&recv_point(&receiver).await.unwrap()), "after-1");
        assert_eq!(log_field(&recv_point(&receiver).await.unwrap()), "after-2");
        assert!(recv_point(&receiver).await.is_none());

        let stats = session.stats().snapshot();
        assert_eq!(stats.lines_dropped, 1);
        assert_eq!(stats.batches_delivered, 2);
        assert_eq!(stored_lines(&registry, "huge").await.len(), 3);
    }
}
