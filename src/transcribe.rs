use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::SttConfig;
use crate::error::TranscribeError;

/// Output of one subprocess invocation. Empty text is a valid result.
#[derive(Debug, Clone)]
pub struct TranscriptionOutput {
    pub text: String,
    pub duration: Duration,
}

/// Invokes the external speech-to-text binary on in-memory PCM audio.
/// Invocations run in parallel up to a bounded worker count.
pub struct Transcriber {
    binary_path: PathBuf,
    model_path: PathBuf,
    timeout_secs: u64,
    permits: Arc<Semaphore>,
}

impl Transcriber {
    /// Resolve and validate the STT binary and model at startup. A failed
    /// probe means transcription is unavailable for the process lifetime.
    pub fn probe(config: &SttConfig) -> Result<Self, TranscribeError> {
        let binary_path = resolve_binary(config.binary_path.as_deref())?;
        if !config.model_path.exists() {
            return Err(TranscribeError::Unavailable(format!(
                "model not found at {}",
                config.model_path.display()
            )));
        }

        info!(
            "transcriber ready: {} with model {}",
            binary_path.display(),
            config.model_path.display()
        );

        Ok(Self {
            binary_path,
            model_path: config.model_path.clone(),
            timeout_secs: config.timeout_secs,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }

    /// Transcribe one audio window. The PCM bytes are written to a scoped
    /// temporary WAV that is released on every exit path.
    pub async fn transcribe(
        &self,
        pcm: &[u8],
        sample_rate: u32,
        channels: u16,
    ) -> Result<TranscriptionOutput, TranscribeError> {
        if pcm.is_empty() {
            return Err(TranscribeError::AudioFormat("empty audio buffer".to_string()));
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .expect("transcription semaphore closed");

        let started = Instant::now();
        let wav = write_temp_wav(pcm, sample_rate, channels)?;

        debug!(
            "transcribing {} bytes ({:.2}s at {} Hz)",
            pcm.len(),
            pcm.len() as f64 / (sample_rate as f64 * channels as f64 * 2.0),
            sample_rate
        );

        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("--model")
            .arg(&self.model_path)
            .arg("--file")
            .arg(wav.path())
            .arg("--language")
            .arg("en")
            .arg("--output-txt")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(Duration::from_secs(self.timeout_secs), cmd.output())
            .await
            .map_err(|_| TranscribeError::Timeout(self.timeout_secs))?
            .map_err(TranscribeError::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(TranscribeError::Failed(stderr));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(TranscriptionOutput {
            text,
            duration: started.elapsed(),
        })
    }

    #[cfg(test)]
    fn with_paths(binary_path: PathBuf, model_path: PathBuf, timeout_secs: u64) -> Self {
        Self {
            binary_path,
            model_path,
            timeout_secs,
            permits: Arc::new(Semaphore::new(2)),
        }
    }
}

/// Resolve the STT binary: explicit config path first, then PATH lookup.
fn resolve_binary(configured: Option<&std::path::Path>) -> Result<PathBuf, TranscribeError> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(TranscribeError::Unavailable(format!(
            "configured STT binary not found: {}",
            path.display()
        )));
    }

    for name in ["whisper-cli", "whisper"] {
        if let Ok(found) = which::which(name) {
            return Ok(found);
        }
    }

    Err(TranscribeError::Unavailable(
        "no STT binary found; set STT_BINARY_PATH or install whisper-cli".to_string(),
    ))
}

/// Write signed 16-bit little-endian PCM into a temporary WAV container.
fn write_temp_wav(
    pcm: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<NamedTempFile, TranscribeError> {
    let temp = tempfile::Builder::new()
        .prefix("meetscribe_")
        .suffix(".wav")
        .tempfile()
        .map_err(TranscribeError::Io)?;

    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(temp.path(), spec)
        .map_err(|e| TranscribeError::AudioFormat(format!("failed to create wav writer: {}", e)))?;

    for pair in pcm.chunks_exact(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]);
        writer
            .write_sample(sample)
            .map_err(|e| TranscribeError::AudioFormat(format!("failed to write sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| TranscribeError::AudioFormat(format!("failed to finalize wav: {}", e)))?;

    Ok(temp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_fails_for_missing_binary() {
        let config = SttConfig {
            binary_path: Some(PathBuf::from("/nonexistent/whisper-cli")),
            model_path: PathBuf::from("/nonexistent/model.bin"),
            required: false,
            timeout_secs: 120,
            max_concurrent: 2,
        };
        assert!(matches!(
            Transcriber::probe(&config),
            Err(TranscribeError::Unavailable(_))
        ));
    }

    #[test]
    fn probe_fails_for_missing_model() {
        let config = SttConfig {
            binary_path: Some(PathBuf::from("/bin/echo")),
            model_path: PathBuf::from("/nonexistent/model.bin"),
            required: false,
            timeout_secs: 120,
            max_concurrent: 2,
        };
        assert!(matches!(
            Transcriber::probe(&config),
            Err(TranscribeError::Unavailable(_))
        ));
    }

    #[test]
    fn wav_round_trip() {
        let samples: Vec<i16> = vec![0, 1000, -1000, i16::MAX, i16::MIN];
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let wav = write_temp_wav(&pcm, 16_000, 1).unwrap();
        let mut reader = hound::WavReader::open(wav.path()).unwrap();
        assert_eq!(reader.spec().sample_rate, 16_000);
        assert_eq!(reader.spec().channels, 1);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, samples);
    }

    #[tokio::test]
    async fn empty_audio_is_rejected() {
        let transcriber = Transcriber::with_paths(
            PathBuf::from("/bin/echo"),
            PathBuf::from("/dev/null"),
            5,
        );
        assert!(matches!(
            transcriber.transcribe(&[], 16_000, 1).await,
            Err(TranscribeError::AudioFormat(_))
        ));
    }

    #[tokio::test]
    async fn successful_invocation_reads_stdout() {
        // /bin/echo stands in for the STT binary; it prints its arguments.
        let transcriber = Transcriber::with_paths(
            PathBuf::from("/bin/echo"),
            PathBuf::from("/dev/null"),
            5,
        );
        let pcm = vec![0u8; 3200];
        let result = transcriber.transcribe(&pcm, 16_000, 1).await.unwrap();
        assert!(result.text.contains("--language"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure() {
        let transcriber = Transcriber::with_paths(
            PathBuf::from("/bin/false"),
            PathBuf::from("/dev/null"),
            5,
        );
        let pcm = vec![0u8; 320];
        assert!(matches!(
            transcriber.transcribe(&pcm, 16_000, 1).await,
            Err(TranscribeError::Failed(_))
        ));
    }
}
