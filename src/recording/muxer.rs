// SPDX-License-Identifier: GPL-3.0-only

//! Muxer process invocation
//!
//! The encoding boundary is an external muxer/encoder process that reads raw
//! UYVY frames on stdin (and optionally raw PCM from a FIFO) and writes a
//! fragmented MP4. This module only builds the invocation; supervision lives
//! in the pipeline.

use crate::constants::RecordingPreset;
use crate::devices::types::{AudioFormat, PixelFormat, VideoMode};
use std::path::{Path, PathBuf};

/// Hardware acceleration request for the video encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HwAccel {
    /// Software encode; always available
    #[default]
    Auto,
    /// Force the hardware encoder
    On,
    /// Force software encode
    Off,
}

/// Which program the pipeline supervises
#[derive(Debug, Clone)]
pub enum MuxerCommand {
    /// The standard muxer with arguments assembled from the config
    Ffmpeg { program: String },
    /// A fully caller-specified command (tests, diagnostics). Video bytes
    /// still arrive on its stdin; no audio input is wired.
    Custom { program: String, args: Vec<String> },
}

impl Default for MuxerCommand {
    fn default() -> Self {
        MuxerCommand::Ffmpeg {
            program: "ffmpeg".to_string(),
        }
    }
}

impl MuxerCommand {
    pub fn custom(program: impl Into<String>, args: Vec<String>) -> Self {
        MuxerCommand::Custom {
            program: program.into(),
            args,
        }
    }

    /// Whether this command accepts the assembled audio FIFO input
    pub fn supports_audio(&self) -> bool {
        matches!(self, MuxerCommand::Ffmpeg { .. })
    }
}

/// Per-input muxer configuration
#[derive(Debug, Clone)]
pub struct MuxerConfig {
    pub file_path: PathBuf,
    pub video_mode: VideoMode,
    pub audio_format: Option<AudioFormat>,
    pub preset: RecordingPreset,
    pub hw_accel: HwAccel,
    pub use_fragmented_mp4: bool,
}

fn video_encoder(hw_accel: HwAccel) -> &'static str {
    match hw_accel {
        HwAccel::On => "h264_nvenc",
        HwAccel::Auto | HwAccel::Off => "libx264",
    }
}

fn pcm_input_format(format: AudioFormat) -> &'static str {
    // Network-video sources report 32-bit float PCM
    if format.bits_per_sample == 32 {
        "f32le"
    } else {
        "s16le"
    }
}

/// Assemble `(program, args)` for the muxer process
///
/// `audio_fifo` is the FIFO path the pipeline created, or `None` for a
/// video-only invocation.
pub fn build_command(
    command: &MuxerCommand,
    config: &MuxerConfig,
    audio_fifo: Option<&Path>,
) -> (String, Vec<String>) {
    let program = match command {
        MuxerCommand::Custom { program, args } => return (program.clone(), args.clone()),
        MuxerCommand::Ffmpeg { program } => program.clone(),
    };

    let mode = &config.video_mode;
    debug_assert_eq!(mode.pixel_format, PixelFormat::Uyvy);
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-y".into(),
        // Raw UYVY frames on stdin
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "uyvy422".into(),
        "-video_size".into(),
        format!("{}x{}", mode.width, mode.height),
        "-framerate".into(),
        mode.frame_rate.as_fraction(),
        "-i".into(),
        "pipe:0".into(),
    ];

    let audio = config.audio_format.zip(audio_fifo);
    if let Some((format, fifo)) = audio {
        args.extend([
            "-f".into(),
            pcm_input_format(format).into(),
            "-ar".into(),
            format.sample_rate.to_string(),
            "-ac".into(),
            format.channels.to_string(),
            "-i".into(),
            fifo.display().to_string(),
        ]);
    }

    args.extend([
        "-c:v".into(),
        video_encoder(config.hw_accel).into(),
        "-b:v".into(),
        format!("{}k", config.preset.bitrate_kbps(mode.width)),
    ]);
    if video_encoder(config.hw_accel) == "libx264" {
        args.extend(["-preset".into(), "veryfast".into()]);
    }
    if audio.is_some() {
        args.extend(["-c:a".into(), "aac".into(), "-b:a".into(), "128k".into()]);
    }

    if config.use_fragmented_mp4 {
        // One-second fragments keep the file playable up to the last
        // complete fragment if the process dies mid-write
        args.extend([
            "-movflags".into(),
            "+frag_keyframe+empty_moov+default_base_moof".into(),
            "-frag_duration".into(),
            "1000000".into(),
        ]);
    }

    args.push(config.file_path.display().to_string());
    (program, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::types::FrameRate;

    fn config() -> MuxerConfig {
        MuxerConfig {
            file_path: PathBuf::from("/tmp/out.mp4"),
            video_mode: VideoMode::hd1080(FrameRate::FPS_59_94),
            audio_format: None,
            preset: RecordingPreset::Medium,
            hw_accel: HwAccel::Auto,
            use_fragmented_mp4: true,
        }
    }

    #[test]
    fn test_video_only_invocation() {
        let (program, args) = build_command(&MuxerCommand::default(), &config(), None);
        assert_eq!(program, "ffmpeg");
        assert!(args.contains(&"uyvy422".to_string()));
        assert!(args.contains(&"1920x1080".to_string()));
        assert!(args.contains(&"60000/1001".to_string()));
        assert!(args.contains(&"8000k".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(!args.iter().any(|a| a == "-c:a"));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[test]
    fn test_fragmented_flags_present() {
        let (_, args) = build_command(&MuxerCommand::default(), &config(), None);
        let movflags = args
            .iter()
            .position(|a| a == "-movflags")
            .map(|i| args[i + 1].clone())
            .unwrap();
        assert!(movflags.contains("frag_keyframe"));
        assert!(movflags.contains("empty_moov"));
        assert!(args.windows(2).any(|w| w[0] == "-frag_duration" && w[1] == "1000000"));
    }

    #[test]
    fn test_audio_fifo_input() {
        let mut config = config();
        config.audio_format = Some(AudioFormat {
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: 16,
        });
        let fifo = PathBuf::from("/tmp/a.fifo");
        let (_, args) = build_command(&MuxerCommand::default(), &config, Some(&fifo));

        assert!(args.contains(&"s16le".to_string()));
        assert!(args.contains(&"48000".to_string()));
        assert!(args.contains(&"/tmp/a.fifo".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "aac"));
    }

    #[test]
    fn test_float_pcm_uses_f32le() {
        let mut config = config();
        config.audio_format = Some(AudioFormat {
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: 32,
        });
        let fifo = PathBuf::from("/tmp/a.fifo");
        let (_, args) = build_command(&MuxerCommand::default(), &config, Some(&fifo));
        assert!(args.contains(&"f32le".to_string()));
    }

    #[test]
    fn test_audio_without_fifo_is_video_only() {
        let mut config = config();
        config.audio_format = Some(AudioFormat::default());
        let (_, args) = build_command(&MuxerCommand::default(), &config, None);
        assert!(!args.iter().any(|a| a == "-c:a"));
    }

    #[test]
    fn test_custom_command_passes_through() {
        let custom = MuxerCommand::custom("sh", vec!["-c".into(), "cat > /dev/null".into()]);
        let (program, args) = build_command(&custom, &config(), None);
        assert_eq!(program, "sh");
        assert_eq!(args, vec!["-c", "cat > /dev/null"]);
    }

    #[test]
    fn test_hw_encoder_selected_when_forced() {
        let mut config = config();
        config.hw_accel = HwAccel::On;
        let (_, args) = build_command(&MuxerCommand::default(), &config, None);
        assert!(args.contains(&"h264_nvenc".to_string()));
        assert!(!args.contains(&"-preset".to_string()));
    }
}
