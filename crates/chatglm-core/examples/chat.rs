//! Interactive terminal chat against a local GGML model.
//!
//! ```sh
//! cargo run --example chat --features native -- -m ./chatglm3-ggml-q4_0.bin
//! ```

use std::io::{self, BufRead, Write};

use clap::Parser;

use chatglm_core::{ChatMessage, GenerationConfig, Pipeline};

#[derive(Parser)]
struct Args {
    /// Path to the model file to load.
    #[arg(short = 'm', long, default_value = "./chatglm3-ggml-q4_0.bin")]
    model: String,
    /// System message to set the behavior of the assistant.
    #[arg(short = 's', long)]
    system: Option<String>,
    #[arg(long, default_value_t = 0.95)]
    temperature: f32,
    #[arg(long, default_value_t = 0.7)]
    top_p: f32,
    #[arg(long, default_value_t = 0)]
    top_k: i32,
    /// Max total length including prompt and output.
    #[arg(long, default_value_t = 2048)]
    max_length: i32,
    #[arg(long, default_value_t = 512)]
    max_context_length: i32,
    /// Penalize repeat sequences of tokens (1.0 = disabled).
    #[arg(long, default_value_t = 1.0)]
    repeat_penalty: f32,
    /// Number of threads for inference (0 = engine default).
    #[arg(long, default_value_t = 0)]
    threads: i32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut pipeline = Pipeline::load(&args.model)?;
    println!("Loaded {} model. Type your message; Ctrl-D exits.", pipeline.model_type());

    let config = GenerationConfig {
        temperature: args.temperature,
        top_p: args.top_p,
        top_k: args.top_k,
        max_length: args.max_length,
        max_context_length: args.max_context_length,
        repetition_penalty: args.repeat_penalty,
        num_threads: args.threads,
        ..GenerationConfig::default()
    };

    let mut messages: Vec<ChatMessage> = Vec::new();
    if let Some(system) = &args.system {
        messages.push(ChatMessage::system(system.clone()));
    }

    let stdin = io::stdin();
    loop {
        print!("> ");
        io::stdout().flush()?;
        let Some(line) = stdin.lock().lines().next() else {
            break;
        };
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        messages.push(ChatMessage::user(line));

        let mut sink = |text: &str| {
            print!("{text}");
            io::stdout().flush().is_ok()
        };
        let reply = pipeline.chat_stream(&messages, &config, &mut sink)?;
        println!();

        messages.push(ChatMessage::assistant(reply));
    }

    Ok(())
}
