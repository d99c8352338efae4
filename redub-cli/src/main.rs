use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use redub::{
    ChunkOptions, ClipOutcome, Ffmpeg, Language, OpenAiTranslator, ReconcileOptions, Script,
    SynthesizedClip, TranslateOptions,
};

#[derive(Parser)]
#[command(name = "redub", about = "Chunked subtitle translation and dubbing timeline tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the translation chunks planned for a segment list.
    Chunk {
        /// JSON array of segments.
        segments: PathBuf,

        #[command(flatten)]
        chunking: ChunkArgs,
    },

    /// Translate a segment list through an OpenAI-compatible provider.
    Translate {
        /// JSON array of segments.
        segments: PathBuf,

        /// Source language code (e.g. "zh").
        #[arg(short, long)]
        source: String,

        /// Target language code (e.g. "en").
        #[arg(short, long)]
        target: String,

        /// Output format.
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,

        /// Write output to file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Maximum chunk requests in flight.
        #[arg(long, default_value = "5")]
        concurrency: usize,

        /// Attempts per chunk request.
        #[arg(long, default_value = "3")]
        attempts: u32,

        /// Model name (overrides REDUB_LLM_MODEL).
        #[arg(long)]
        model: Option<String>,

        /// API base URL (overrides REDUB_LLM_BASE_URL).
        #[arg(long)]
        base_url: Option<String>,

        #[command(flatten)]
        chunking: ChunkArgs,
    },

    /// Print the timeline slot of every segment.
    Slots {
        /// JSON array of segments.
        segments: PathBuf,

        /// Video duration in milliseconds (default: latest segment end).
        #[arg(long)]
        total_ms: Option<u64>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Fit synthesized clips into their slots and mix them into one WAV file.
    Mix {
        /// JSON array of clips ({segment_index, start_ms, end_ms, path}).
        clips: PathBuf,

        /// Output WAV file.
        #[arg(short, long)]
        output: PathBuf,

        /// Video duration in milliseconds (default: latest clip end).
        #[arg(long)]
        total_ms: Option<u64>,

        /// Largest speed-up before clips are truncated instead.
        #[arg(long, default_value = "4.0")]
        max_speed: f64,

        /// Output sample rate.
        #[arg(long, default_value = "16000")]
        sample_rate: u32,

        /// Scratch directory for re-timed clips.
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },

    /// Extract a video's audio track as 16 kHz mono WAV.
    Extract {
        video: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Replace a video's audio track with a dubbed mix.
    Mux {
        video: PathBuf,
        audio: PathBuf,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// List languages with a known display name.
    Languages,
}

#[derive(clap::Args)]
struct ChunkArgs {
    /// Character budget per chunk.
    #[arg(long, default_value = "2000")]
    max_chars: usize,

    /// Segments repeated from the previous chunk as context.
    #[arg(long, default_value = "2")]
    overlap: usize,
}

impl ChunkArgs {
    fn options(&self) -> redub::Result<ChunkOptions> {
        Ok(ChunkOptions::new()
            .max_chars(self.max_chars)?
            .overlap_segments(self.overlap))
    }
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Srt,
    Vtt,
    Text,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("redub=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Command) -> redub::Result<()> {
    match command {
        Command::Chunk { segments, chunking } => {
            let script = read_json::<Script>(&segments)?;
            let chunks = redub::plan_chunks(&script.segments, &chunking.options()?)?;
            for (i, chunk) in chunks.iter().enumerate() {
                println!(
                    "--- chunk {}/{}: {} segments ({} context), {} chars{} ---",
                    i + 1,
                    chunks.len(),
                    chunk.len(),
                    chunk.context_len(),
                    chunk.chars(),
                    if chunk.is_oversized() { ", oversized" } else { "" },
                );
                println!("{}", redub::codec::build_text(chunk));
            }
        }

        Command::Translate {
            segments,
            source,
            target,
            format,
            output,
            concurrency,
            attempts,
            model,
            base_url,
            chunking,
        } => {
            let mut script = read_json::<Script>(&segments)?;
            let options = TranslateOptions::new(&source, &target)?
                .chunk(chunking.options()?)
                .concurrency(concurrency)?
                .retry(redub::RetryPolicy::new().max_attempts(attempts)?);

            let mut translator = OpenAiTranslator::from_env()?;
            if let Some(model) = model {
                translator = translator.model(model);
            }
            if let Some(url) = base_url {
                translator = translator.base_url(url);
            }

            let spinner = spinner(format!(
                "Translating {} segments {} -> {} with {}",
                script.segments.len(),
                options.source.name(),
                options.target.name(),
                translator.model_name(),
            ));
            let result = redub::translate_segments(&translator, &mut script.segments, &options).await;
            spinner.finish_and_clear();
            let report = result?;

            eprintln!(
                "Translation complete: {} chunks ({} failed), {} segments translated, {} fell back to original text",
                report.chunks,
                report.failed_chunks.len(),
                report.translated,
                report.fallback_indices.len(),
            );

            let text = match format {
                OutputFormat::Json => script.to_json_pretty()?,
                OutputFormat::Srt => script.to_srt(),
                OutputFormat::Vtt => script.to_vtt(),
                OutputFormat::Text => script.text(),
            };
            write_output(output.as_deref(), &text)?;
        }

        Command::Slots {
            segments,
            total_ms,
            json,
        } => {
            let script = read_json::<Script>(&segments)?;
            let slots = redub::compute_slots(&script.segments, total_ms);
            if json {
                println!("{}", serde_json::to_string_pretty(&slots)?);
            } else {
                println!("{:<8} {:>10} {:>10}  {}", "INDEX", "START_MS", "SLOT_MS", "NOTE");
                println!("{:<8} {:>10} {:>10}  {}", "-----", "--------", "-------", "----");
                for slot in slots {
                    println!(
                        "{:<8} {:>10} {:>10}  {}",
                        slot.segment_index,
                        slot.start_ms,
                        slot.available_ms,
                        if slot.conflict { "no room, dropped" } else { "" },
                    );
                }
            }
        }

        Command::Mix {
            clips,
            output,
            total_ms,
            max_speed,
            sample_rate,
            work_dir,
        } => {
            let clips = read_json::<Vec<SynthesizedClip>>(&clips)?;
            let mut options = ReconcileOptions::new().max_speed_ratio(max_speed)?;
            if let Some(ms) = total_ms {
                options = options.total_duration_ms(ms);
            }
            if let Some(dir) = work_dir {
                options = options.work_dir(dir);
            }
            let media = Ffmpeg::new().sample_rate(sample_rate)?;

            let outcome = redub::assemble(&media, &clips, &output, &options).await?;

            println!("{:<8} {:>10} {:>10} {:>10}  {}", "INDEX", "START_MS", "SLOT_MS", "CLIP_MS", "OUTCOME");
            println!("{:<8} {:>10} {:>10} {:>10}  {}", "-----", "--------", "-------", "-------", "-------");
            for d in &outcome.decisions {
                println!(
                    "{:<8} {:>10} {:>10} {:>10}  {}",
                    d.segment_index,
                    d.start_ms,
                    d.slot_ms,
                    d.clip_ms.map(|ms| ms.to_string()).unwrap_or_else(|| "-".into()),
                    describe(&d.outcome),
                );
            }
            eprintln!(
                "Mixed {} of {} clips into {} ({:.1}s)",
                outcome.tracks,
                clips.len(),
                outcome.output.display(),
                outcome.total_duration_ms as f64 / 1000.0,
            );
        }

        Command::Extract { video, output } => {
            Ffmpeg::new().extract_audio(&video, &output).await?;
            eprintln!("Written to {}", output.display());
        }

        Command::Mux {
            video,
            audio,
            output,
        } => {
            Ffmpeg::new().replace_audio(&video, &audio, &output).await?;
            eprintln!("Written to {}", output.display());
        }

        Command::Languages => {
            println!("{:<6} {}", "CODE", "LANGUAGE");
            println!("{:<6} {}", "----", "--------");
            for (code, name) in Language::supported() {
                println!("{code:<6} {name}");
            }
        }
    }

    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> redub::Result<T> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn write_output(path: Option<&Path>, text: &str) -> redub::Result<()> {
    match path {
        Some(path) => {
            std::fs::write(path, text)?;
            eprintln!("Written to {}", path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .expect("valid template"),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn describe(outcome: &ClipOutcome) -> String {
    match outcome {
        ClipOutcome::Placed => "placed".into(),
        ClipOutcome::SpedUp { factor, stages } => format!("sped up {factor:.2}x ({stages} stages)"),
        ClipOutcome::Truncated { to_ms } => format!("truncated to {to_ms} ms"),
        ClipOutcome::Dropped { reason } => format!("dropped: {reason}"),
    }
}
