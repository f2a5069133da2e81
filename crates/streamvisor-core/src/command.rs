//! Transcoder command line.
//!
//! The argument list is fixed output policy: the destination ingest expects
//! 1280x720 H.264 at 25 fps with a keyframe every 25 frames, bt.709 tagging,
//! and 128 kbps stereo AAC in FLV. Sources without audio get a silent track.

use crate::stream::StreamConfig;

/// Synthesized audio input used when the source has no audio of its own
pub const SILENT_AUDIO_SOURCE: &str = "anullsrc=channel_layout=stereo:sample_rate=44100";

/// Scale, pixel format, color tagging and frame rate filter chain
pub const VIDEO_FILTER: &str = "scale=1280:720,format=yuv420p,colorspace=all=bt709:range=tv,fps=25";

/// A program and its arguments, ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeCommand {
    program: String,
    args: Vec<String>,
}

impl TranscodeCommand {
    pub fn new<S: ToString, I: IntoIterator<Item = S>>(program: impl Into<String>, args: I) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Builds the transcoder invocation for one stream
    pub fn for_stream(transcoder_path: &str, config: &StreamConfig) -> Self {
        Self::new(
            transcoder_path,
            [
                "-re",
                "-i",
                config.source_url(),
                "-f",
                "lavfi",
                "-i",
                SILENT_AUDIO_SOURCE,
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-tune",
                "zerolatency",
                "-pix_fmt",
                "yuv420p",
                "-g",
                "25",
                "-vf",
                VIDEO_FILTER,
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-ac",
                "2",
                "-shortest",
                "-f",
                "flv",
                config.destination_url(),
            ],
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_argument_policy() {
        let config = StreamConfig::new(
            "https://cam.example/stream.m3u8",
            "rtmps://dc4-1.rtmp.t.me/s/1424308297:key",
        )
        .unwrap();
        let command = TranscodeCommand::for_stream("/usr/bin/ffmpeg", &config);

        assert_eq!(command.program(), "/usr/bin/ffmpeg");
        let expected = [
            "-re",
            "-i",
            "https://cam.example/stream.m3u8",
            "-f",
            "lavfi",
            "-i",
            "anullsrc=channel_layout=stereo:sample_rate=44100",
            "-c:v",
            "libx264",
            "-preset",
            "veryfast",
            "-tune",
            "zerolatency",
            "-pix_fmt",
            "yuv420p",
            "-g",
            "25",
            "-vf",
            "scale=1280:720,format=yuv420p,colorspace=all=bt709:range=tv,fps=25",
            "-c:a",
            "aac",
            "-b:a",
            "128k",
            "-ac",
            "2",
            "-shortest",
            "-f",
            "flv",
            "rtmps://dc4-1.rtmp.t.me/s/1424308297:key",
        ];
        assert_eq!(command.args(), expected);
    }

    #[test]
    fn test_urls_are_passed_verbatim() {
        // No shell is involved, so spaces and ampersands stay inside one argument.
        let config = StreamConfig::new("https://x/a b.m3u8?x=1&y=2", "rtmp://dst/app key").unwrap();
        let command = TranscodeCommand::for_stream("ffmpeg", &config);
        assert_eq!(command.args()[2], "https://x/a b.m3u8?x=1&y=2");
        assert_eq!(command.args().last().unwrap(), "rtmp://dst/app key");
    }
}
