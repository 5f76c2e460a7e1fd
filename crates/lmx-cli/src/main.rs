//! Demo front end: streams a generation on the reference runtime.

use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use lmx_core::{GenerateOptions, Model, Runtime, StopMode};
use lmx_native::NativeApi;
use lmx_native::fake::FakeRuntime;

#[derive(Parser)]
#[command(name = "lmx", version, about = "Stream a generation on the lmx reference runtime")]
struct Cli {
    /// Prompt text.
    prompt: String,

    /// Model directory.
    #[arg(long, default_value = "/models/reference", env = "LMX_MODEL_DIR")]
    model_dir: String,

    /// Sampling temperature.
    #[arg(long, default_value_t = 0.8)]
    temperature: f32,

    /// Nucleus sampling probability.
    #[arg(long, default_value_t = 0.95)]
    top_p: f32,

    /// Top-k cutoff (0 disables).
    #[arg(long, default_value_t = 40)]
    top_k: i32,

    /// Maximum tokens to generate.
    #[arg(long, default_value_t = 512)]
    max_tokens: u32,

    /// Repetition penalty.
    #[arg(long, default_value_t = 1.1)]
    repetition_penalty: f32,

    /// Random seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Stop sequence (can be repeated).
    #[arg(long = "stop")]
    stop_sequences: Vec<String>,

    /// Keep the matched stop text in the output.
    #[arg(long)]
    include_stop: bool,
}

fn main() -> anyhow::Result<()> {
    //  Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Cli::parse();

    let api: Arc<dyn NativeApi> = Arc::new(FakeRuntime::new());
    let runtime = Runtime::new(api)?;
    let model = Model::load(&runtime, &args.model_dir)?;

    let tokens = model.tokenize(&args.prompt, true, true)?;
    tracing::info!(n_tokens = tokens.len()?, "prompt tokenized");

    let options = GenerateOptions {
        temperature: args.temperature,
        top_p: args.top_p,
        top_k: args.top_k,
        max_tokens: args.max_tokens,
        repetition_penalty: args.repetition_penalty,
        seed: args.seed,
        stop_sequences: args.stop_sequences,
        stop_mode: if args.include_stop {
            StopMode::Include
        } else {
            StopMode::Truncate
        },
    };

    let mut stdout = std::io::stdout().lock();
    for fragment in model.generate(&args.prompt, &options)? {
        write!(stdout, "{}", fragment?)?;
        stdout.flush()?;
    }
    writeln!(stdout)?;

    Ok(())
}
