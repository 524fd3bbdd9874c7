//! Application entry point — voice-live CLI.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Build the production connector and audio backend.
//! 4. Start the session and print live captions to stdout.
//! 5. Block on Ctrl-C, then stop the session and let the transport close.

use std::io::Write as _;
use std::sync::{Arc, Mutex};

use voice_live::{
    config::AppConfig,
    session::{ConnectionState, CpalBackend, GeminiConnector, SessionManager, SessionObserver},
    transcript::{Speaker, TranscriptEntry},
};

// ---------------------------------------------------------------------------
// CLI caption observer
// ---------------------------------------------------------------------------

/// Prints live captions as fragments stream in and a clean labelled line for
/// every finalized entry.
#[derive(Default)]
struct CliObserver {
    /// Speaker of the caption line currently being streamed, if any.
    streaming: Mutex<Option<Speaker>>,
}

impl SessionObserver for CliObserver {
    fn on_connection_state_change(&self, state: ConnectionState) {
        println!("[{}]", state.label());
    }

    fn on_transcript_update(&self, entry: TranscriptEntry, is_final: bool) {
        let mut streaming = self.streaming.lock().unwrap();

        if is_final {
            if streaming.take().is_some() {
                println!();
            }
            println!("{}: {}", entry.speaker.label(), entry.text.trim());
            return;
        }

        // Live caption: start a fresh line when the speaker changes, then
        // append fragments in place.
        if *streaming != Some(entry.speaker) {
            if streaming.is_some() {
                println!();
            }
            print!("{} … ", entry.speaker.label());
            *streaming = Some(entry.speaker);
        }
        print!("{}", entry.text);
        let _ = std::io::stdout().flush();
    }

    fn on_error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    log::info!("voice-live starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Production wiring
    let connector = Arc::new(GeminiConnector::new(config.api.clone()));
    let manager = Arc::new(SessionManager::new(
        config,
        connector,
        Arc::new(CpalBackend),
        Arc::new(CliObserver::default()),
    ));

    // 4. Start the session
    manager.start().await?;
    println!("Speak into the microphone — Ctrl-C to stop.");

    // 5. Wait for Ctrl-C, then release everything in order
    tokio::signal::ctrl_c().await?;
    log::info!("interrupt received, shutting down");
    manager.stop();

    // Give the writer task a moment to send its Close frame.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    Ok(())
}
