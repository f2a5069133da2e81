//! Chat command parsing and the replies for each command.

use crate::profiles::{Profile, ProfileStore, Upsert};
use streamvisor_core::{
    ChatId, LaunchError, Notifier, OwnerId, ProcessManager, StreamConfig, StreamId,
    StreamSupervisor, SupervisorError, format_runtime,
};
use tokio::sync::Mutex;
use tracing::{error, info};

/// A recognised command. `None` arguments mean the argument count was wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Stream(Option<(String, String)>),
    Stop,
    StopId(Option<String>),
    Status,
    Save(Option<(String, String, String)>),
    List,
    Run(Option<String>),
    Delete(Option<String>),
}

/// Splits on whitespace into at most `max` parts; the last part keeps its inner spaces.
fn split_max(text: &str, max: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text.trim();
    while !rest.is_empty() {
        if parts.len() + 1 == max {
            parts.push(rest);
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(end) => {
                parts.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }
    parts
}

fn single_arg(text: &str) -> Option<String> {
    match text.split_whitespace().collect::<Vec<_>>().as_slice() {
        [_, arg] => Some(arg.to_string()),
        _ => None,
    }
}

impl Command {
    /// Parses `/name args`, accepting a `/name@BotName` suffix
    pub fn parse(text: &str) -> Option<Self> {
        let head = text.split_whitespace().next()?;
        let name = head.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name);

        let command = match name {
            "start" => Command::Start,
            "help" => Command::Help,
            "stream" => Command::Stream(match split_max(text, 3).as_slice() {
                [_, src, dst] => Some((src.to_string(), dst.to_string())),
                _ => None,
            }),
            "stop" => Command::Stop,
            "stop_id" => Command::StopId(single_arg(text)),
            "status" => Command::Status,
            "save" => Command::Save(match split_max(text, 4).as_slice() {
                [_, name, src, dst] => Some((name.to_string(), src.to_string(), dst.to_string())),
                _ => None,
            }),
            "list" => Command::List,
            "run" => Command::Run(single_arg(text)),
            "delete" => Command::Delete(single_arg(text)),
            _ => return None,
        };
        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::Stream(_) => "stream",
            Command::Stop => "stop",
            Command::StopId(_) => "stop_id",
            Command::Status => "status",
            Command::Save(_) => "save",
            Command::List => "list",
            Command::Run(_) => "run",
            Command::Delete(_) => "delete",
        }
    }
}

/// Escapes text for Telegram's HTML parse mode
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// First `max` characters, with an ellipsis when anything was cut
pub fn truncate(text: &str, max: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

/// Who sent a message and where to answer
#[derive(Debug, Clone)]
pub struct Sender {
    pub owner: OwnerId,
    pub chat: ChatId,
    pub first_name: String,
}

pub struct CommandRouter<M: ProcessManager, N> {
    supervisor: StreamSupervisor<M, N>,
    profiles: Mutex<ProfileStore>,
    admin_ids: Vec<i64>,
}

impl<M, N> CommandRouter<M, N>
where
    M: ProcessManager + 'static,
    N: Notifier + 'static,
{
    pub fn new(supervisor: StreamSupervisor<M, N>, profiles: ProfileStore, admin_ids: Vec<i64>) -> Self {
        Self {
            supervisor,
            profiles: Mutex::new(profiles),
            admin_ids,
        }
    }

    /// HTML reply for a message, or `None` when the text is not a command
    pub async fn handle(&self, sender: &Sender, text: &str) -> Option<String> {
        let command = Command::parse(text)?;
        info!("Owner {} issued /{}", sender.owner, command.name());

        let reply = match command {
            Command::Start => self.start(sender),
            Command::Help => self.help(),
            Command::Stream(Some((src, dst))) => self.launch(sender, &src, &dst, None).await,
            Command::Stream(None) => usage(
                "/stream [stream URL] [RTMP URL]",
                "/stream https://example.com/stream.m3u8 rtmps://dc4-1.rtmp.t.me/s/1424308297:key",
            ),
            Command::Stop => self.stop_all(sender).await,
            Command::StopId(Some(id)) => self.stop_one(sender, &id).await,
            Command::StopId(None) => {
                "❌ Specify the stream ID:\nExample: <code>/stop_id stream_1</code>".to_string()
            }
            Command::Status => self.status(sender).await,
            Command::Save(Some((name, src, dst))) => self.save(sender, name, src, dst).await,
            Command::Save(None) => usage(
                "/save [name] [URL] [RTMP URL]",
                "/save webcam https://cam.url/stream.m3u8 rtmps://dc4-1.rtmp.t.me/s/1424308297:key",
            ),
            Command::List => self.list(sender).await,
            Command::Run(Some(name)) => self.run(sender, &name).await,
            Command::Run(None) => {
                "❌ Specify the config name:\nExample: <code>/run webcam</code>".to_string()
            }
            Command::Delete(Some(name)) => self.delete(sender, &name).await,
            Command::Delete(None) => {
                "❌ Specify the config name:\nExample: <code>/delete webcam</code>".to_string()
            }
        };
        Some(reply)
    }

    fn start(&self, sender: &Sender) -> String {
        let mut text = format!(
            "👋 Hello, <b>{}!</b>\n\n\
             🎥 <b>Stream Bot</b>\n\n\
             📋 <b>Commands:</b>\n\
             ▫️ /stream [stream_url] [rtmp_url] - Start a stream\n\
             ▫️ /stop - Stop all streams\n\
             ▫️ /stop_id [id] - Stop one stream\n\
             ▫️ /status - Stream status\n\n\
             💾 <b>Saved configs:</b>\n\
             ▫️ /save [name] [stream_url] [rtmp_url] - Save a config\n\
             ▫️ /list - List saved configs\n\
             ▫️ /run [name] - Start a saved config\n\
             ▫️ /delete [name] - Delete a config\n\n\
             ▫️ /help - Detailed help",
            escape_html(&sender.first_name)
        );
        if self.admin_ids.contains(&sender.owner.0) {
            text.push_str("\n\n👑 <b>Admin mode active</b>");
        }
        text
    }

    fn help(&self) -> String {
        format!(
            "📚 <b>Detailed help</b>\n\n\
             <b>🎥 Starting a stream:</b>\n\
             <code>/stream [stream URL] [RTMP URL]</code>\n\
             • URL - link to an m3u8/mp4 stream\n\
             • RTMP URL - full address: rtmps://dc4-1.rtmp.t.me/s/channel_id:key\n\n\
             <b>💾 Saved configs:</b>\n\
             <code>/save webcam https://cam.url/stream.m3u8 rtmps://dc4-1.rtmp.t.me/s/1424308297:key</code>\n\
             <code>/run webcam</code> - quick start\n\n\
             <b>⚙️ Output format:</b>\n\
             • Video: 1280x720, 25fps, H.264\n\
             • Audio: AAC, 128kbps, stereo\n\
             • Streams per user: {}\n\n\
             ⚠️ <b>Note:</b>\n\
             • FFmpeg must be installed on the server\n\
             • The RTMP URL must be valid for Telegram",
            self.supervisor.config().max_streams_per_owner
        )
    }

    async fn launch(&self, sender: &Sender, src: &str, dst: &str, name: Option<&str>) -> String {
        let config = match name {
            Some(name) => StreamConfig::named(src, dst, name),
            None => StreamConfig::new(src, dst),
        };
        let config = match config {
            Ok(config) => config,
            Err(e) => return format!("❌ {}", escape_html(&e.to_string())),
        };

        match self
            .supervisor
            .start_stream(sender.owner, sender.chat, config)
            .await
        {
            Ok(started) => format!(
                "✅ <b>Stream started!</b>\n\n\
                 🆔 ID: <code>{id}</code>\n\
                 📹 URL: <code>{src}</code>\n\
                 🔑 RTMP: <code>{dst}</code>\n\
                 ⚙️ PID: {pid}\n\
                 ⏱ Started at: {time}\n\n\
                 To stop: /stop_id {id}",
                id = started.stream_id,
                src = escape_html(started.config.source_url()),
                dst = escape_html(&truncate(started.config.destination_url(), 50)),
                pid = started
                    .pid
                    .map_or_else(|| "unknown".to_string(), |pid| pid.to_string()),
                time = started.config.started_at().format("%H:%M:%S"),
            ),
            Err(e) => start_error(&e),
        }
    }

    async fn stop_all(&self, sender: &Sender) -> String {
        let stopped = self.supervisor.stop_all(sender.owner).await;
        if stopped.is_empty() {
            return "ℹ️ You have no active streams".to_string();
        }
        let count = stopped.iter().filter(|s| s.outcome.is_stopped()).count();
        format!("⏹ <b>Streams stopped: {count}</b>")
    }

    async fn stop_one(&self, sender: &Sender, id: &str) -> String {
        let stream_id = StreamId::from(id);
        match self.supervisor.stop_stream(sender.owner, &stream_id).await {
            Ok(stopped) if stopped.outcome.is_stopped() => format!(
                "⏹ <b>Stream {} stopped</b>\nPID {} terminated",
                escape_html(id),
                stopped
                    .pid
                    .map_or_else(|| "unknown".to_string(), |pid| pid.to_string())
            ),
            Ok(stopped) => format!(
                "❌ Error: could not confirm that {} stopped: {:?}",
                escape_html(id),
                stopped.outcome
            ),
            Err(SupervisorError::NotFound(_)) => {
                format!("❌ Stream {} not found", escape_html(id))
            }
            Err(e) => format!("❌ Error: {}", escape_html(&e.to_string())),
        }
    }

    async fn status(&self, sender: &Sender) -> String {
        let streams = self.supervisor.status(sender.owner).await;
        if streams.is_empty() {
            return "ℹ️ You have no active streams".to_string();
        }

        let mut text = "📊 <b>Stream status:</b>\n\n".to_string();
        for stream in streams {
            let state = match stream.exit {
                _ if stream.running => "🟢 Active".to_string(),
                Some(reason) => format!("🔴 Exited (code: {reason})"),
                None => "🔴 Exited".to_string(),
            };
            let uptime = stream.uptime.map_or_else(|| "—".to_string(), format_runtime);
            let memory = stream.memory_bytes.map_or_else(
                || "—".to_string(),
                |bytes| format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0)),
            );
            let pid = stream
                .pid
                .map_or_else(|| "unknown".to_string(), |pid| pid.to_string());
            text.push_str(&format!(
                "<b>{}:</b>\n  Status: {state}\n  PID: {pid}\n  Uptime: {uptime}\n  Memory: {memory}\n  URL: <code>{}</code>\n\n",
                stream.stream_id,
                escape_html(&truncate(stream.config.source_url(), 30)),
            ));
        }
        text
    }

    async fn save(&self, sender: &Sender, name: String, src: String, dst: String) -> String {
        let profile = Profile {
            name: name.clone(),
            stream_url: src,
            rtmp_url: dst,
        };
        let name = escape_html(&name);
        match self.profiles.lock().await.upsert(sender.owner, profile) {
            Ok(Upsert::Updated) => format!("♻️ Config '{name}' updated"),
            Ok(Upsert::Created) => {
                format!("💾 Config '<b>{name}</b>' saved!\nRun: /run {name}")
            }
            Err(e) => {
                error!("Failed to persist profiles: {e}");
                format!("❌ Failed to save config: {}", escape_html(&e.to_string()))
            }
        }
    }

    async fn list(&self, sender: &Sender) -> String {
        let profiles = self.profiles.lock().await;
        let entries = profiles.list(sender.owner);
        if entries.is_empty() {
            return "📭 You have no saved configs".to_string();
        }

        let mut text = "📋 <b>Saved configs:</b>\n\n".to_string();
        for (i, profile) in entries.iter().enumerate() {
            let name = escape_html(&profile.name);
            text.push_str(&format!(
                "{}. <b>{name}</b>\n   URL: <code>{}</code>\n   Run: /run {name}\n\n",
                i + 1,
                escape_html(&truncate(&profile.stream_url, 40)),
            ));
        }
        text
    }

    async fn run(&self, sender: &Sender, name: &str) -> String {
        let profile = {
            let profiles = self.profiles.lock().await;
            if profiles.list(sender.owner).is_empty() {
                return "📭 You have no saved configs".to_string();
            }
            profiles.find(sender.owner, name).cloned()
        };

        match profile {
            Some(profile) => {
                self.launch(sender, &profile.stream_url, &profile.rtmp_url, Some(profile.name.as_str()))
                    .await
            }
            None => format!("❌ Config '{}' not found", escape_html(name)),
        }
    }

    async fn delete(&self, sender: &Sender, name: &str) -> String {
        let mut profiles = self.profiles.lock().await;
        if profiles.list(sender.owner).is_empty() {
            return "📭 You have no saved configs".to_string();
        }
        match profiles.remove(sender.owner, name) {
            Ok(true) => format!("🗑 Config '{}' deleted", escape_html(name)),
            Ok(false) => format!("❌ Config '{}' not found", escape_html(name)),
            Err(e) => {
                error!("Failed to persist profiles: {e}");
                format!("❌ Failed to delete config: {}", escape_html(&e.to_string()))
            }
        }
    }
}

fn usage(format: &str, example: &str) -> String {
    format!(
        "❌ Invalid command format!\n\nUse:\n<code>{}</code>\n\nExample:\n<code>{}</code>",
        escape_html(format),
        escape_html(example)
    )
}

fn start_error(error: &SupervisorError) -> String {
    match error {
        SupervisorError::AdmissionRejected { limit } => format!(
            "⚠️ Stream limit reached ({limit})!\nStop one of the active streams with /stop_id"
        ),
        SupervisorError::Launch(LaunchError::LauncherNotFound { .. }) => {
            "❌ FFmpeg not found!\nMake sure FFmpeg is installed:\n<code>sudo apt-get install ffmpeg</code>"
                .to_string()
        }
        SupervisorError::ShuttingDown => {
            "⏳ The bot is shutting down, try again later".to_string()
        }
        other => format!(
            "❌ Failed to start stream:\n<code>{}</code>",
            escape_html(&other.to_string())
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Start));
        assert_eq!(Command::parse("/status@StreamBot"), Some(Command::Status));
        assert_eq!(Command::parse("hello"), None);
        assert_eq!(Command::parse("/unknown"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn test_parse_stream_keeps_spaces_in_destination() {
        assert_eq!(
            Command::parse("/stream  https://a/b.m3u8 rtmp://x/y z"),
            Some(Command::Stream(Some((
                "https://a/b.m3u8".to_string(),
                "rtmp://x/y z".to_string()
            ))))
        );
        assert_eq!(Command::parse("/stream https://a"), Some(Command::Stream(None)));
    }

    #[test]
    fn test_parse_save_and_single_args() {
        assert_eq!(
            Command::parse("/save cam https://a rtmp://b"),
            Some(Command::Save(Some((
                "cam".to_string(),
                "https://a".to_string(),
                "rtmp://b".to_string()
            ))))
        );
        assert_eq!(Command::parse("/save cam https://a"), Some(Command::Save(None)));
        assert_eq!(
            Command::parse("/stop_id stream_2"),
            Some(Command::StopId(Some("stream_2".to_string())))
        );
        assert_eq!(Command::parse("/run a b"), Some(Command::Run(None)));
        assert_eq!(Command::parse("/delete"), Some(Command::Delete(None)));
    }

    #[test]
    fn test_escape_and_truncate() {
        assert_eq!(escape_html("<b>&\"x\""), "&lt;b&gt;&amp;&quot;x&quot;");
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
        assert_eq!(truncate("ключ", 2), "кл...");
    }
}
