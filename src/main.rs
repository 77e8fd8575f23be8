use std::io::BufRead;
use std::path::PathBuf;

use accompanist::device::{MidirOutput, connect_input, shared};
use accompanist::timing::SpanEnd;
use accompanist::{EngineCommand, EngineUpdate, spawn_engine};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: accompanist <score.ron> [output port] [input port]";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let score_path = PathBuf::from(args.next().ok_or(USAGE)?);
    let output_hint = args.next();
    let input_hint = args.next();

    let output = MidirOutput::connect(output_hint.as_deref())?;
    let engine = spawn_engine(shared(output));

    let midi_tx = engine.command_tx.clone();
    let _input = match connect_input(input_hint.as_deref(), move |bytes| {
        let _ = midi_tx.send(EngineCommand::MidiIn(bytes.to_vec()));
    }) {
        Ok(connection) => Some(connection),
        Err(e) => {
            warn!(error = %e, "no live input, assisted performances will not advance");
            None
        }
    };

    let update_rx = engine.update_rx.clone();
    std::thread::spawn(move || {
        for update in update_rx {
            match update {
                EngineUpdate::ScoreLoaded { score } => info!(name = %score.name, "loaded"),
                EngineUpdate::PlaybackState { state } => info!(%state, "playback"),
                EngineUpdate::MsPosition(ms) => info!(ms, "position"),
                EngineUpdate::EndOfPerformance => info!("end of performance"),
                EngineUpdate::Error { message } => error!("{}", message),
            }
        }
    });

    engine.command_tx.send(EngineCommand::LoadScore(score_path))?;
    info!("commands: play [from_ms], pause, resume, stop, quit");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        let command = match words.next() {
            Some("play") => {
                let from_ms = words.next().and_then(|w| w.parse().ok()).unwrap_or(0);
                EngineCommand::Play {
                    from_ms,
                    to: SpanEnd::EndOfScore,
                }
            }
            Some("pause") => EngineCommand::Pause,
            Some("resume") => EngineCommand::Resume,
            Some("stop") => EngineCommand::Stop,
            Some("quit") => break,
            Some(other) => {
                warn!(command = other, "unknown command");
                continue;
            }
            None => continue,
        };
        engine.command_tx.send(command)?;
    }

    Ok(())
}
