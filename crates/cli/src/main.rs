use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use voice_emotion_core::config::{
    resolve_backend_config, resolve_string_with_default, AnalysisConfig, BackendConfig, Env,
    LoaderLimits, StdEnv, WindowStride, DEFAULT_CHUNK_MS, DEFAULT_EMOTION_MAP,
    DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_MODEL, DEFAULT_UPLOAD_DIR, DEFAULT_WINDOW_STRIDE,
    ENV_UPLOAD_DIR,
};
use voice_emotion_core::decode::{AudioDecoder, AudioLoader, SymphoniaDecoder};
use voice_emotion_core::emotion::{build_backend, EmotionClassifier};
use voice_emotion_core::pipeline::Pipeline;
use voice_emotion_core::uploads::{UploadDir, UploadError};

#[derive(Parser, Debug)]
#[command(name = "voice-emotion")]
#[command(about = "Emotion timeline of a voice recording (upload -> analyze -> clear)")]
struct Cli {
    /// Upload directory [env: VOICE_EMOTION_UPLOAD_DIR]
    #[arg(long, global = true)]
    upload_dir: Option<String>,

    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy an audio file into the upload directory.
    Upload { path: PathBuf },
    /// Analyze an uploaded file (the newest one when --file is omitted).
    Analyze(AnalyzeArgs),
    /// Delete every uploaded audio file.
    Clear,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Name of a previously uploaded file.
    #[arg(long)]
    file: Option<String>,

    #[arg(long, default_value_t = i64::from(DEFAULT_CHUNK_MS), allow_negative_numbers = true)]
    chunk_ms: i64,

    #[arg(long, default_value = DEFAULT_EMOTION_MAP)]
    emotion_map: String,

    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Classify every n-th window.
    #[arg(long, default_value_t = DEFAULT_WINDOW_STRIDE)]
    window_stride: u32,

    /// remote, onnx or prosody [env: VOICE_EMOTION_BACKEND]
    #[arg(long)]
    backend: Option<String>,

    /// [env: VOICE_EMOTION_INFERENCE_URL]
    #[arg(long)]
    inference_url: Option<String>,

    /// [env: HF_API_TOKEN]
    #[arg(long)]
    api_token: Option<String>,

    /// [env: VOICE_EMOTION_ONNX_MODEL]
    #[arg(long)]
    onnx_model: Option<String>,

    #[arg(long, value_enum, default_value_t = DecoderChoice::Symphonia)]
    decoder: DecoderChoice,

    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    max_bytes: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DecoderChoice {
    Symphonia,
    Ffmpeg,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let env = StdEnv;
    let uploads = UploadDir::new(resolve_string_with_default(
        cli.upload_dir,
        ENV_UPLOAD_DIR,
        &env,
        DEFAULT_UPLOAD_DIR,
    ));

    let output = match cli.command {
        Command::Upload { path } => run_upload(&uploads, &path).await?,
        Command::Analyze(args) => run_analyze(&uploads, args, &env).await?,
        Command::Clear => {
            let deleted = uploads.clear().await?;
            serde_json::json!({ "deleted": deleted })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_upload(uploads: &UploadDir, path: &Path) -> anyhow::Result<serde_json::Value> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("not a file path: {}", path.display()))?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let stored = uploads.save(&name, &bytes).await?;
    Ok(serde_json::json!({
        "message": "Audio uploaded successfully",
        "filename": stored,
    }))
}

async fn run_analyze(
    uploads: &UploadDir,
    args: AnalyzeArgs,
    env: &impl Env,
) -> anyhow::Result<serde_json::Value> {
    let (analysis, backend, limits) = build_config(&args, env)?;

    let path = match &args.file {
        Some(name) => uploads.resolve(name).await?,
        None => uploads.latest().await?.ok_or(UploadError::NoAudio)?,
    };

    tracing::info!(
        file = %path.display(),
        backend = backend.kind.as_str(),
        model = %analysis.model,
        emotion_map = %analysis.emotion_map,
        "config loaded"
    );

    let classifier = EmotionClassifier::new(build_backend(&backend)?);
    let loader = AudioLoader::new(decoder(args.decoder)?, limits);
    let pipeline = Pipeline::new(classifier).with_loader(loader);

    let report = pipeline
        .analyze_file(&path, &analysis)
        .await
        .with_context(|| format!("analysis of {} failed", path.display()))?;
    Ok(serde_json::to_value(report)?)
}

fn decoder(choice: DecoderChoice) -> anyhow::Result<Arc<dyn AudioDecoder>> {
    match choice {
        DecoderChoice::Symphonia => Ok(Arc::new(SymphoniaDecoder)),
        #[cfg(feature = "ffmpeg")]
        DecoderChoice::Ffmpeg => Ok(Arc::new(voice_emotion_core::decode::FfmpegDecoder::default())),
        #[cfg(not(feature = "ffmpeg"))]
        DecoderChoice::Ffmpeg => anyhow::bail!("built without the `ffmpeg` feature"),
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_config(
    args: &AnalyzeArgs,
    env: &impl Env,
) -> anyhow::Result<(AnalysisConfig, BackendConfig, LoaderLimits)> {
    let analysis = AnalysisConfig::new(args.chunk_ms, &args.emotion_map, &args.model)?
        .with_window_stride(WindowStride::new(args.window_stride)?);

    let backend = resolve_backend_config(
        args.backend.clone(),
        args.inference_url.clone(),
        args.api_token.clone(),
        args.onnx_model.clone(),
        env,
    )?;

    let limits = LoaderLimits {
        max_bytes: args.max_bytes,
        ..LoaderLimits::default()
    };
    Ok((analysis, backend, limits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_emotion_core::config::{BackendKind, ConfigError, MapEnv, ENV_BACKEND};

    fn analyze_args(extra: &[&str]) -> AnalyzeArgs {
        let argv: Vec<&str> = ["voice-emotion", "analyze"]
            .into_iter()
            .chain(extra.iter().copied())
            .collect();
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Analyze(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn defaults_resolve() {
        let (analysis, backend, limits) =
            build_config(&analyze_args(&[]), &MapEnv::default()).unwrap();
        assert_eq!(analysis, AnalysisConfig::default());
        assert_eq!(backend.kind, BackendKind::Remote);
        assert_eq!(limits.max_bytes, DEFAULT_MAX_UPLOAD_BYTES);
    }

    #[test]
    fn flags_override_env() {
        let env = MapEnv::default().with_var(ENV_BACKEND, "remote");
        let args = analyze_args(&[
            "--backend",
            "prosody",
            "--chunk-ms",
            "1500",
            "--window-stride",
            "3",
            "--emotion-map",
            "none",
        ]);
        let (analysis, backend, _) = build_config(&args, &env).unwrap();
        assert_eq!(backend.kind, BackendKind::Prosody);
        assert_eq!(analysis.chunk_ms.as_ms(), 1500);
        assert_eq!(analysis.window_stride.get(), 3);
        assert_eq!(analysis.emotion_map.as_str(), "none");
    }

    #[test]
    fn invalid_options_fail_before_any_work() {
        let err = build_config(&analyze_args(&["--chunk-ms", "0"]), &MapEnv::default())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::InvalidChunkLength(0))
        );

        let err = build_config(&analyze_args(&["--window-stride", "0"]), &MapEnv::default())
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::ZeroWindowStride)
        );
    }

    #[tokio::test]
    async fn upload_reply_names_the_stored_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("my talk.wav");
        std::fs::write(&src, b"RIFF").unwrap();
        let uploads = UploadDir::new(dir.path().join("uploads"));

        let reply = run_upload(&uploads, &src).await.unwrap();
        assert_eq!(
            reply,
            serde_json::json!({
                "message": "Audio uploaded successfully",
                "filename": "my_talk.wav",
            })
        );
        assert!(uploads.resolve("my_talk.wav").await.is_ok());
    }

    #[test]
    fn upload_and_clear_parse() {
        let cli = Cli::try_parse_from(["voice-emotion", "--upload-dir", "/tmp/u", "clear"]).unwrap();
        assert_eq!(cli.upload_dir.as_deref(), Some("/tmp/u"));
        assert!(matches!(cli.command, Command::Clear));

        let cli = Cli::try_parse_from(["voice-emotion", "upload", "talk.wav"]).unwrap();
        assert!(matches!(cli.command, Command::Upload { path } if path == Path::new("talk.wav")));
    }
}
