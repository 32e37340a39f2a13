use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

use studio_core::client::{AVAILABLE_VOICES, is_known_voice};
use studio_core::script::{NARRATION_CHUNK_CHARS, prepare_narration, split_narration};
use studio_core::util::{extension_for_mime, file_stamp, now_ts};
use studio_core::visualizer::{AudioSession, Background, ClipWindow, ColorMode, PixmapSurface, SpectrumStyle, Visualizer};
use studio_core::{
    GeminiClient, GenerationOutput, GenerationRequest, JsonDirStore, ProgressReporter, ProjectRecord, ProjectStore,
    RecordKind, ReferenceImage, Resolution, StudioConfig, StudioError, VideoProgress, VideoRequest, decode_wav,
    encode_wav, try_merge_wav,
};

#[derive(Parser)]
#[command(name = "studio")]
#[command(about = "Scripts, images, narration and short video clips from Gemini models")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a script from a prompt
    Write {
        prompt: String,

        /// Save the script here instead of only printing it
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Ask for a structured plan matching a JSON schema
    Plan {
        prompt: String,

        /// JSON schema file the reply must follow
        #[arg(short, long)]
        schema: PathBuf,
    },

    /// Generate still images
    Image {
        prompt: String,

        #[arg(long, default_value = "9:16")]
        aspect_ratio: String,

        #[arg(short, long, default_value = "1")]
        count: u32,
    },

    /// Narrate a script file into a single WAV
    Speak {
        /// Markdown or plain-text script
        script: PathBuf,

        #[arg(short, long, default_value = "Kore")]
        voice: String,
    },

    /// Generate a video clip and download it
    Video {
        prompt: String,

        /// Reference image; repeat for multi-reference generation
        #[arg(short, long)]
        image: Vec<PathBuf>,

        #[arg(long, value_enum, default_value = "720p")]
        resolution: ResolutionArg,

        #[arg(long, default_value = "9:16")]
        aspect_ratio: String,

        #[arg(long)]
        fps: Option<u32>,
    },

    /// Render an audio-reactive visualization of a WAV file to frames
    Visualize {
        audio: PathBuf,

        #[arg(long, value_enum, default_value = "bars")]
        style: StyleArg,

        #[arg(long, value_enum, default_value = "rainbow")]
        mode: ModeArg,

        #[arg(long)]
        caption: Option<String>,

        /// PNG drawn behind the spectrum
        #[arg(long)]
        background: Option<PathBuf>,

        /// Loop start, in seconds
        #[arg(long)]
        clip_start: Option<f64>,

        /// Loop length, in seconds
        #[arg(long)]
        clip_duration: Option<f64>,

        /// How long to record; defaults to the clip or the whole file
        #[arg(long)]
        seconds: Option<f64>,

        #[arg(long, default_value = "30")]
        fps: u32,

        /// Spectrum smoothing between frames, 0 to 1
        #[arg(long, default_value = "0.8")]
        smoothing: f32,

        #[arg(long, default_value = "1080")]
        width: u32,

        #[arg(long, default_value = "1920")]
        height: u32,

        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List the prebuilt narration voices
    Voices,

    /// Saved projects and characters
    Projects {
        /// Store directory
        #[arg(long, default_value = "output/projects")]
        dir: PathBuf,

        #[command(subcommand)]
        action: ProjectAction,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    /// List saved records, newest first
    List,

    /// Save a new record
    Save {
        title: String,

        #[arg(long, value_enum, default_value = "project")]
        kind: KindArg,

        /// JSON file stored as the record payload
        #[arg(long)]
        data: Option<PathBuf>,

        /// Media reference as role=uri; repeatable
        #[arg(long)]
        media: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ResolutionArg {
    #[value(name = "720p")]
    P720,
    #[value(name = "1080p")]
    P1080,
}

#[derive(Clone, Copy, ValueEnum)]
enum StyleArg {
    Bars,
    Radial,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Rainbow,
    Fire,
    Ocean,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Project,
    Character,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(studio) = e.downcast_ref::<StudioError>() {
                eprintln!("{}", studio.user_message());
            }
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Voices => {
            for (name, style) in AVAILABLE_VOICES {
                println!("{name:<14} {style}");
            }
            Ok(())
        }
        Commands::Projects { dir, action } => projects(&dir, action),
        Commands::Visualize {
            audio,
            style,
            mode,
            caption,
            background,
            clip_start,
            clip_duration,
            seconds,
            fps,
            smoothing,
            width,
            height,
            out,
        } => {
            let mut vis = Visualizer::new(
                match style {
                    StyleArg::Bars => SpectrumStyle::Bars,
                    StyleArg::Radial => SpectrumStyle::Radial,
                },
                match mode {
                    ModeArg::Rainbow => ColorMode::Rainbow,
                    ModeArg::Fire => ColorMode::Fire,
                    ModeArg::Ocean => ColorMode::Ocean,
                },
            );
            vis.caption = caption;
            vis.smoothing = smoothing;
            if let Some(path) = background {
                let bytes = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
                vis.background = Some(Background::from_png(&bytes)?);
            }
            let clip = clip_start
                .or(clip_duration.map(|_| 0.0))
                .map(|start| ClipWindow::new(start, clip_duration.unwrap_or(f64::MAX)));
            let out = out.unwrap_or_else(|| PathBuf::from(format!("output/visualizer-{}", file_stamp())));
            visualize(&audio, vis, clip, seconds, fps, (width, height), &out)
        }
        Commands::Write { prompt, out } => {
            let client = connect()?;
            let t0 = Instant::now();
            let output = client.generate(&GenerationRequest::Text { prompt }, &ProgressReporter::silent()).await?;
            let GenerationOutput::Text(script) = output else {
                bail!("unexpected output for a text request");
            };
            println!("{script}");
            eprintln!("{} | script: {} chars in {:?}", now_ts(), script.chars().count(), t0.elapsed());
            if let Some(path) = out {
                fs::write(&path, &script).with_context(|| format!("failed to write {}", path.display()))?;
                eprintln!("Saved script to {}", path.display());
            }
            Ok(())
        }
        Commands::Plan { prompt, schema } => {
            let raw = fs::read_to_string(&schema).with_context(|| format!("failed to read {}", schema.display()))?;
            let schema: Value =
                serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", schema.display()))?;
            let client = connect()?;
            let request = GenerationRequest::Structured { prompt, schema };
            let GenerationOutput::Json(plan) = client.generate(&request, &ProgressReporter::silent()).await? else {
                bail!("unexpected output for a structured request");
            };
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        Commands::Image {
            prompt,
            aspect_ratio,
            count,
        } => {
            let client = connect()?;
            let request = GenerationRequest::Image {
                prompt,
                aspect_ratio,
                count,
            };
            let GenerationOutput::Images(images) = client.generate(&request, &ProgressReporter::silent()).await? else {
                bail!("unexpected output for an image request");
            };
            let stamp = file_stamp();
            for (i, img) in images.iter().enumerate() {
                let name = format!("image-{stamp}-{}{}", i + 1, extension_for_mime(&img.mime_type));
                let path = client.config().output_dir.join(name);
                fs::write(&path, &img.bytes).with_context(|| format!("failed to write {}", path.display()))?;
                println!("{}", path.display());
            }
            Ok(())
        }
        Commands::Speak { script, voice } => {
            let client = connect()?;
            speak(&client, &script, &voice).await
        }
        Commands::Video {
            prompt,
            image,
            resolution,
            aspect_ratio,
            fps,
        } => {
            let mut request = VideoRequest::new(prompt);
            request.resolution = match resolution {
                ResolutionArg::P720 => Resolution::P720,
                ResolutionArg::P1080 => Resolution::P1080,
            };
            request.aspect_ratio = aspect_ratio;
            request.fps = fps;
            for path in &image {
                let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
                request.reference_images.push(ReferenceImage::new(bytes, image_mime(path)?));
            }
            let client = connect()?;
            video(&client, &request).await
        }
    }
}

/// Loads configuration from the environment and prepares the output directory.
fn connect() -> Result<GeminiClient> {
    let config = StudioConfig::from_env()?;
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;
    GeminiClient::new(config)
}

async fn speak(client: &GeminiClient, script: &Path, voice: &str) -> Result<()> {
    if !is_known_voice(voice) {
        eprintln!("warn: '{voice}' is not a known prebuilt voice; the request may be rejected");
    }
    let original = fs::read_to_string(script).with_context(|| format!("failed to read file {}", script.display()))?;
    let text = prepare_narration(&original);
    println!(
        "Sanitized script for narration: {} -> {} chars",
        original.chars().count(),
        text.chars().count()
    );
    if text.is_empty() {
        bail!("{} has nothing to narrate", script.display());
    }
    let chunks = split_narration(&text, NARRATION_CHUNK_CHARS);
    println!("Chunked narration into {} piece(s)", chunks.len());

    let mut parts: Vec<Vec<u8>> = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        println!("{} | speech part {:02}: {} chars...", now_ts(), i + 1, chunk.chars().count());
        let t0 = Instant::now();
        let buffer = client
            .generate_speech(chunk, voice)
            .await
            .with_context(|| format!("speech generation failed for part {}", i + 1))?;
        println!(
            "{} | speech part {:02}: {:.1}s of audio, took {:?}",
            now_ts(),
            i + 1,
            buffer.duration_secs(),
            t0.elapsed()
        );
        parts.push(encode_wav(&buffer)?);
    }

    let merged = if parts.len() == 1 {
        parts.remove(0)
    } else {
        try_merge_wav(&parts.iter().map(Vec::as_slice).collect::<Vec<_>>())?
    };
    let stem = script
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("invalid file name: {}", script.display()))?;
    let out_path = client.config().output_dir.join(format!("{stem}.wav"));
    fs::write(&out_path, &merged).with_context(|| format!("failed to write audio file {}", out_path.display()))?;
    println!("Narrated {} => {} ({} bytes)", script.display(), out_path.display(), merged.len());
    Ok(())
}

async fn video(client: &GeminiClient, request: &VideoRequest) -> Result<()> {
    let (progress, mut rx) = ProgressReporter::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                VideoProgress::Init => println!("{} | submitting video job", now_ts()),
                VideoProgress::Rendering { operation } => println!("{} | rendering ({operation})", now_ts()),
                VideoProgress::StillRendering { poll } => println!("{} | still rendering (poll {poll})", now_ts()),
            }
        }
    });

    let t0 = Instant::now();
    let result = client.generate_video(request, &progress).await;
    drop(progress);
    let _ = printer.await;
    let result = result?;
    println!("Video ready after {} poll(s) in {:?}", result.polls, t0.elapsed());

    let bytes = client.download(&result.uri).await?;
    let path = client.config().output_dir.join(format!("video-{}.mp4", file_stamp()));
    fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
    println!("{}", path.display());
    Ok(())
}

fn visualize(
    audio: &Path,
    visualizer: Visualizer,
    clip: Option<ClipWindow>,
    seconds: Option<f64>,
    fps: u32,
    (width, height): (u32, u32),
    out: &Path,
) -> Result<()> {
    let bytes = fs::read(audio).with_context(|| format!("failed to read {}", audio.display()))?;
    let buffer = Arc::new(decode_wav(&bytes).with_context(|| format!("{} is not a PCM WAV", audio.display()))?);
    let total = seconds
        .or(clip.map(|c| c.duration.min((buffer.duration_secs() - c.start).max(0.0))))
        .unwrap_or(buffer.duration_secs());
    let fps = fps.max(1);

    let mut session = AudioSession::new(PixmapSurface::new(width, height)?, visualizer);
    session.play(buffer, clip);
    session.start_recording(fps)?;

    let frames = (total * fps as f64).ceil() as u64;
    let dt = 1.0 / fps as f64;
    let t0 = Instant::now();
    for i in 0..frames {
        session.step(dt);
        if (i + 1) % (fps as u64 * 5) == 0 {
            println!("{} | rendered {}/{} frames", now_ts(), i + 1, frames);
        }
    }
    let recording = session
        .stop_recording()?
        .ok_or_else(|| anyhow!("recording was not running"))?;
    session.dispose();

    let files = recording.write_to_dir(out)?;
    println!(
        "Rendered {} frame(s) at {} fps into {} in {:?}",
        files.frames,
        fps,
        files.dir.display(),
        t0.elapsed()
    );
    Ok(())
}

fn projects(dir: &Path, action: ProjectAction) -> Result<()> {
    let store = JsonDirStore::new(dir);
    match action {
        ProjectAction::List => {
            let records = store.list()?;
            if records.is_empty() {
                println!("No saved records in {}", dir.display());
            }
            for r in records {
                println!(
                    "{}  {:<9} {}  ({} media)",
                    r.created_at.format("%Y-%m-%d %H:%M"),
                    format!("{:?}", r.kind).to_lowercase(),
                    r.title,
                    r.media.len()
                );
            }
        }
        ProjectAction::Save {
            title,
            kind,
            data,
            media,
        } => {
            let kind = match kind {
                KindArg::Project => RecordKind::Project,
                KindArg::Character => RecordKind::Character,
            };
            let mut record = ProjectRecord::new(kind, title);
            if let Some(path) = data {
                let raw = fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
                record.data = serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))?;
            }
            for entry in media {
                let (role, reference) = entry
                    .split_once('=')
                    .ok_or_else(|| anyhow!("media must be role=uri, got {entry:?}"))?;
                record = record.with_media(role, reference);
            }
            store.save(&record)?;
            println!("Saved {}", record.id);
        }
    }
    Ok(())
}

fn image_mime(path: &Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "webp" => Ok("image/webp"),
        _ => Err(anyhow!("unsupported reference image {}", path.display())),
    }
}
