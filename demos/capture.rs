use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use camera_effects::{
    CameraManager, Command, DisplaySurface, EffectEngine, EffectProcessor, Error, Frame,
    FrameSource, LoadCompletion, Pipeline, ProcessCompletion, Settings, Size, TimedSample,
};
use clap::Parser;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "capture")]
#[command(about = "Preview a camera, toggling effect processing from stdin")]
struct Cli {
    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides `effect.credential`
    #[arg(long)]
    credential: Option<String>,

    /// Overrides `effect.effect_path`
    #[arg(long)]
    effect: Option<String>,
}

/// An engine that hands every frame back untouched from a worker thread.
struct LoopbackEngine;

impl EffectEngine for LoopbackEngine {
    fn initialize(&self, credential: &str, _resource_paths: &[PathBuf]) -> bool {
        !credential.is_empty()
    }

    fn create_processor(&self, render_size: Size) -> Result<Arc<dyn EffectProcessor>, Error> {
        let (tx, rx) = flume::unbounded::<(Frame, ProcessCompletion)>();
        thread::Builder::new()
            .name("loopback-effect".into())
            .spawn(move || {
                for (frame, completion) in rx.iter() {
                    completion(Ok(frame));
                }
            })
            .map_err(|e| Error::EngineInitFailed(e.to_string()))?;
        info!(
            "loopback processor ready at {}x{}",
            render_size.width, render_size.height
        );
        Ok(Arc::new(LoopbackProcessor { tx }))
    }
}

struct LoopbackProcessor {
    tx: flume::Sender<(Frame, ProcessCompletion)>,
}

impl EffectProcessor for LoopbackProcessor {
    fn load_effect(&self, path: &str, completion: LoadCompletion) {
        info!(path, "loading effect");
        completion(Ok(()));
    }

    fn unload_effect(&self) {
        info!("effect unloaded");
    }

    fn process_frame(&self, frame: Frame, completion: ProcessCompletion) {
        if let Err(flume::SendError((_, completion))) = self.tx.send((frame, completion)) {
            completion(Err(Error::FrameDropped));
        }
    }

    fn call_method(&self, method: &str, param: &str) -> bool {
        info!(method, param, "effect method");
        true
    }
}

/// Logs a line every second's worth of samples.
#[derive(Default)]
struct LogSurface {
    count: u64,
}

impl DisplaySurface for LogSurface {
    fn is_ready_for_more_data(&self) -> bool {
        true
    }

    fn enqueue(&mut self, sample: TimedSample) {
        self.count += 1;
        if self.count % 30 == 0 {
            debug!(
                "sample {} ts={:.3}s {:?} {}x{}",
                self.count,
                sample.presentation_time.as_secs_f64(),
                sample.frame.pixel_format(),
                sample.frame.size().width,
                sample.frame.size().height,
            );
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG controls verbosity, e.g. RUST_LOG=camera_effects=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(credential) = cli.credential {
        settings.effect.credential = credential;
    }
    if let Some(effect) = cli.effect {
        settings.effect.effect_path = effect;
    }

    #[cfg(target_os = "macos")]
    let manager = camera_effects::platform::macos::device::MacosCameraManager;
    #[cfg(not(target_os = "macos"))]
    let manager = camera_effects::platform::synthetic::SyntheticCameraManager::default();

    run(&manager, settings, cli.config.as_deref())
}

fn run<M: CameraManager>(
    manager: &M,
    settings: Settings,
    config_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("settings loaded from {}", path.display());
    }

    let pipeline = Pipeline::new(Arc::new(LoopbackEngine), settings.effect, LogSurface::default());
    let events = pipeline.events();
    thread::spawn(move || {
        for event in events.iter() {
            info!(?event, "pipeline");
        }
    });

    let mut stream = manager.configure(&settings.capture)?;
    stream.start(pipeline.frame_handler())?;

    println!("commands: on | off | call <method> <param> | stats | quit");
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        match words.next() {
            Some("on") => {
                if let Err(e) = pipeline.apply(Command::EnableProcessing) {
                    warn!("cannot enable processing: {e}");
                }
            }
            Some("off") => pipeline.apply(Command::DisableProcessing)?,
            Some("call") => {
                let method = words.next().unwrap_or_default();
                let param = words.next().unwrap_or_default();
                if !pipeline.call_effect_method(method, param) {
                    warn!(method, "effect method not handled");
                }
            }
            Some("stats") => {
                println!("{:?}", pipeline.stats());
                println!("{:?}", pipeline.render_stats());
            }
            Some("quit") => break,
            Some(other) => println!("unknown command: {other}"),
            None => {}
        }
    }

    pipeline.stop();
    stream.stop()?;
    println!("{:?}", pipeline.stats());
    Ok(())
}
