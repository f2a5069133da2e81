use std::sync::Arc;
use streamvisor::{CommandRouter, ProfileStore, Sender};
use streamvisor_core::testing::{FakeProcessManager, LaunchFailure, RecordingNotifier};
use streamvisor_core::{ChatId, ExitReason, OwnerId, ProcessId, StreamSupervisor, SupervisorConfig};
use tempfile::TempDir;

struct Harness {
    router: CommandRouter<FakeProcessManager, RecordingNotifier>,
    manager: FakeProcessManager,
    _dir: TempDir,
}

fn harness(limit: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = SupervisorConfig::builder()
        .max_streams_per_owner(limit)
        .build()
        .unwrap();
    let manager = FakeProcessManager::new();
    let supervisor = StreamSupervisor::new(
        config,
        Arc::new(manager.clone()),
        Arc::new(RecordingNotifier::new()),
    )
    .unwrap();
    let profiles = ProfileStore::load(dir.path().join("saved_configs.json"));

    Harness {
        router: CommandRouter::new(supervisor, profiles, vec![1]),
        manager,
        _dir: dir,
    }
}

fn sender(id: i64) -> Sender {
    Sender {
        owner: OwnerId(id),
        chat: ChatId(id * 100),
        first_name: "Ann <3".to_string(),
    }
}

impl Harness {
    async fn send(&self, from: i64, text: &str) -> String {
        self.router
            .handle(&sender(from), text)
            .await
            .unwrap_or_else(|| panic!("no reply to {text}"))
    }
}

#[tokio::test]
async fn test_non_commands_are_ignored() {
    let h = harness(1);
    assert!(h.router.handle(&sender(42), "hello").await.is_none());
    assert!(h.router.handle(&sender(42), "/config").await.is_none());
}

#[tokio::test]
async fn test_start_greets_and_marks_admins() {
    let h = harness(1);
    let reply = h.send(1, "/start").await;
    assert!(reply.contains("Ann &lt;3"));
    assert!(reply.contains("Admin mode active"));

    let reply = h.send(42, "/start").await;
    assert!(!reply.contains("Admin mode active"));
}

#[tokio::test]
async fn test_help_mentions_limit() {
    let h = harness(3);
    let reply = h.send(42, "/help").await;
    assert!(reply.contains("Streams per user: 3"));
    assert!(reply.contains("1280x720"));
}

#[tokio::test]
async fn test_stream_lifecycle() {
    let h = harness(1);

    let reply = h
        .send(42, "/stream https://example.com/live.m3u8 rtmps://dc4-1.rtmp.t.me/s/123456789:abcdefghijklmnopqrstuvwxyz0123456789")
        .await;
    assert!(reply.contains("Stream started"));
    assert!(reply.contains("<code>stream_1</code>"));
    assert!(reply.contains("PID: 1001"));
    assert!(reply.contains("..."));
    assert!(reply.contains("/stop_id stream_1"));

    let reply = h.send(42, "/stream https://example.com/b.m3u8 rtmp://x/y").await;
    assert!(reply.contains("Stream limit reached (1)"));
    assert_eq!(h.manager.launches().len(), 1);

    let reply = h.send(42, "/status").await;
    assert!(reply.contains("<b>stream_1:</b>"));
    assert!(reply.contains("Active"));
    assert!(reply.contains("64.0 MB"));

    let reply = h.send(42, "/stop_id stream_9").await;
    assert!(reply.contains("Stream stream_9 not found"));

    let reply = h.send(42, "/stop_id stream_1").await;
    assert!(reply.contains("Stream stream_1 stopped"));
    assert!(reply.contains("PID 1001 terminated"));

    let reply = h.send(42, "/status").await;
    assert!(reply.contains("no active streams"));
}

#[tokio::test]
async fn test_status_shows_exit_code_of_finished_stream() {
    let h = harness(1);
    h.send(42, "/stream https://a/1.m3u8 rtmp://x/1").await;
    h.manager.exit(ProcessId(1001), ExitReason::Code(1));

    // Answered before the monitor's next poll collects the stream
    let reply = h.send(42, "/status").await;
    assert!(reply.contains("Exited (code: 1)"));
    assert!(!reply.contains("Active"));
}

#[tokio::test]
async fn test_stop_all_counts_streams() {
    let h = harness(2);
    assert!(h.send(42, "/stop").await.contains("no active streams"));

    h.send(42, "/stream https://a/1.m3u8 rtmp://x/1").await;
    h.send(42, "/stream https://a/2.m3u8 rtmp://x/2").await;
    h.send(7, "/stream https://a/3.m3u8 rtmp://x/3").await;

    let reply = h.send(42, "/stop").await;
    assert!(reply.contains("Streams stopped: 2"));
    assert_eq!(h.manager.alive_count(), 1);
}

#[tokio::test]
async fn test_usage_messages() {
    let h = harness(1);
    assert!(h.send(42, "/stream https://a").await.contains("Invalid command format"));
    assert!(h.send(42, "/save cam https://a").await.contains("Invalid command format"));
    assert!(h.send(42, "/stop_id").await.contains("Specify the stream ID"));
    assert!(h.send(42, "/run").await.contains("Specify the config name"));
    assert!(h.send(42, "/delete a b").await.contains("Specify the config name"));
}

#[tokio::test]
async fn test_missing_ffmpeg_hint() {
    let h = harness(1);
    h.manager.fail_next_launch(LaunchFailure::NotFound);

    let reply = h.send(42, "/stream https://a/1.m3u8 rtmp://x/1").await;
    assert!(reply.contains("FFmpeg not found"));
    assert!(reply.contains("sudo apt-get install ffmpeg"));
    assert!(h.send(42, "/status").await.contains("no active streams"));
}

#[tokio::test]
async fn test_launch_failure_shows_error() {
    let h = harness(1);
    h.manager.fail_next_launch(LaunchFailure::Spawn);

    let reply = h.send(42, "/stream https://a/1.m3u8 rtmp://x/1").await;
    assert!(reply.contains("Failed to start stream"));
    assert!(reply.contains("resource temporarily unavailable"));
}

#[tokio::test]
async fn test_profiles() {
    let h = harness(1);
    assert!(h.send(42, "/list").await.contains("no saved configs"));
    assert!(h.send(42, "/run webcam").await.contains("no saved configs"));

    let reply = h.send(42, "/save webcam https://cam/1.m3u8 rtmp://x/1").await;
    assert!(reply.contains("Config '<b>webcam</b>' saved"));
    let reply = h.send(42, "/save webcam https://cam/2.m3u8 rtmp://x/2").await;
    assert!(reply.contains("Config 'webcam' updated"));
    h.send(42, "/save <news> https://news/1.m3u8 rtmp://x/3").await;

    let reply = h.send(42, "/list").await;
    assert!(reply.contains("1. <b>webcam</b>"));
    assert!(reply.contains("https://cam/2.m3u8"));
    assert!(reply.contains("2. <b>&lt;news&gt;</b>"));
    assert!(h.send(7, "/list").await.contains("no saved configs"));

    assert!(h.send(42, "/run missing").await.contains("Config 'missing' not found"));
    let reply = h.send(42, "/run webcam").await;
    assert!(reply.contains("Stream started"));
    let launches = h.manager.launches();
    assert!(launches[0].args().iter().any(|a| a == "https://cam/2.m3u8"));

    assert!(h.send(42, "/delete webcam").await.contains("Config 'webcam' deleted"));
    assert!(h.send(42, "/delete webcam").await.contains("not found"));
}
