//! Stream a completion from any configured backend
//!
//! # Prerequisites
//!
//! 1. Start an OpenAI-compatible gateway, for example Ollama:
//!    ```bash
//!    ollama serve
//!    ollama pull llama3
//!    ```
//!
//! 2. Configure the backend, either in a settings file:
//!    ```toml
//!    [model]
//!    kind = "ollama"
//!    model = "llama3"
//!    api_base = "http://localhost:11434/v1"
//!    ```
//!    or through environment overrides:
//!    ```bash
//!    export UNIFIED_COMPLETION__MODEL__KIND=ollama
//!    export UNIFIED_COMPLETION__MODEL__MODEL=llama3
//!    export UNIFIED_COMPLETION__MODEL__API_BASE=http://localhost:11434/v1
//!    ```
//!
//! 3. Run this example:
//!    ```bash
//!    cargo run --example stream_completion -- settings.toml "Why is the sky blue?"
//!    ```

use futures::StreamExt;
use std::io::Write;
use unified_completion::prelude::*;
use unified_completion::tracing_ext::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let settings_path = args.next();
    let prompt = args
        .next()
        .unwrap_or_else(|| "Describe this dataset in one sentence.".to_string());

    let settings = Settings::load(settings_path.as_deref())?;
    init_tracing(&settings.logging)?;

    let client = Client::from_settings(&settings)?;
    println!("Backend: {} ({})", client.client_type(), client.endpoint());

    let messages = vec![
        Message::system("You are a concise data analyst."),
        Message::user(prompt),
    ];

    let mut stream = client
        .get_completion(messages, true, None)
        .await?
        .into_stream()?;

    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        write!(stdout, "{}", chunk.as_str())?;
        stdout.flush()?;
    }
    println!();

    Ok(())
}
