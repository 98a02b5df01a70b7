use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use termtone_core::{
    persist::{FileStore, KeyValueStore},
    AppConfig, AudioEngine, Cue, CueOutcome, ManualClock, ManualFrameHost, MonotonicClock,
    Session, SharedClock, SignalAnalyzer, SoftwareOutput, TextSurface,
};
use tracing_subscriber::EnvFilter;

fn main() -> termtone_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Demo {
            width,
            height,
            ratio,
        } => run_demo(&config, width, height, ratio),
        Commands::Inspect => run_inspect(&config),
        Commands::Tone { cue, out } => run_tone(&config, &cue, out.as_deref()),
        Commands::State { action } => {
            let path = cli.state.unwrap_or_else(default_state_path);
            run_state(&path, action)
        }
    }
}

type HeadlessSession = Session<ManualFrameHost, SoftwareOutput>;

fn headless_session(config: &AppConfig) -> termtone_core::Result<HeadlessSession> {
    let clock: SharedClock = MonotonicClock::shared();
    let output = SoftwareOutput::new(clock.clone(), config.audio.sample_rate, false);
    Session::new(config, ManualFrameHost::new(), output, clock)
}

fn paint_pending(
    session: &mut HeadlessSession,
    surface: &mut TextSurface,
) -> termtone_core::Result<()> {
    for token in session.frames_mut().host_mut().take_ready() {
        session.on_animation_frame(token, surface)?;
    }
    Ok(())
}

fn run_demo(
    config: &AppConfig,
    width: Option<u32>,
    height: Option<u32>,
    ratio: Option<f32>,
) -> termtone_core::Result<()> {
    let mut session = headless_session(config)?;
    let viewport = session.grid().viewport();
    session.resize(
        width.unwrap_or(viewport.width),
        height.unwrap_or(viewport.height),
        ratio.unwrap_or(viewport.pixel_ratio),
    );
    tracing::info!(size = ?session.grid().dimensions(), "painting demo frame");

    draw_banner(&mut session)?;
    session.request_frame();

    let mut surface = TextSurface::new();
    paint_pending(&mut session, &mut surface)?;
    println!("{}", surface.contents());

    let missing = session.debug().missing_glyphs();
    if !missing.is_empty() {
        tracing::warn!(?missing, "demo used symbols outside the atlas");
    }
    session.shutdown()
}

fn draw_banner(session: &mut HeadlessSession) -> termtone_core::Result<()> {
    let grid = session.grid_mut();
    let style = grid.default_style();
    let dims = grid.dimensions();
    if dims.cols < 2 || dims.rows < 2 {
        grid.put_char(0, 0, '█', style)?;
        return Ok(());
    }

    let right = dims.cols - 1;
    let bottom = dims.rows - 1;
    for col in 1..right {
        grid.put_char(col, 0, '─', style)?;
        grid.put_char(col, bottom, '─', style)?;
    }
    for row in 1..bottom {
        grid.put_char(0, row, '│', style)?;
        grid.put_char(right, row, '│', style)?;
    }
    grid.put_char(0, 0, '┌', style)?;
    grid.put_char(right, 0, '┐', style)?;
    grid.put_char(0, bottom, '└', style)?;
    grid.put_char(right, bottom, '┘', style)?;

    let lines = [
        "termtone".to_string(),
        format!("{} x {} cells", dims.cols, dims.rows),
        format!("{} glyphs in the atlas", grid.atlas().glyph_count()),
        format!("cues: {}", Cue::ALL.map(Cue::name).join(", ")),
    ];
    for (offset, line) in lines.iter().enumerate() {
        let row = 1 + offset as u16;
        if row >= bottom {
            break;
        }
        grid.write_str(2, row, line, style)?;
    }
    Ok(())
}

fn run_inspect(config: &AppConfig) -> termtone_core::Result<()> {
    let mut session = headless_session(config)?;
    let mut surface = TextSurface::new();
    paint_pending(&mut session, &mut surface)?;

    println!("{}", session.debug().report().to_json()?);
    session.shutdown()
}

fn run_tone(config: &AppConfig, cue: &str, out: Option<&Path>) -> termtone_core::Result<()> {
    let cue: Cue = cue.parse()?;
    let clock = ManualClock::new();
    let output = SoftwareOutput::new(
        std::rc::Rc::new(clock.clone()),
        config.audio.sample_rate,
        false,
    );
    let mut engine = AudioEngine::from_config(output, &config.audio);
    engine.resume()?;

    let voices = match engine.play_cue(cue)? {
        CueOutcome::Played(voices) => voices.len(),
        CueOutcome::Throttled | CueOutcome::Muted => 0,
    };
    let seconds = cue
        .envelopes(0.0, 1.0)
        .iter()
        .map(|envelope| envelope.end_time())
        .fold(0.0, f64::max);
    let sample_rate = engine.output().sample_rate();
    let count = ((seconds * sample_rate as f64).ceil() as usize).max(2);
    let samples = engine.output().render(0.0, count);

    let mut analyzer = SignalAnalyzer::new(sample_rate);
    let report = analyzer.analyze(&samples)?;
    tracing::info!(%cue, voices, samples = samples.len(), "rendered cue");
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(path) = out {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        std::fs::write(path, bytes)?;
        tracing::info!(?path, "wrote raw f32 samples");
    }
    engine.close()
}

fn run_state(path: &Path, action: StateAction) -> termtone_core::Result<()> {
    let mut store = FileStore::open(path)?;
    match action {
        StateAction::Get { key } => match store.get(&key)? {
            Some(value) => println!("{value}"),
            None => tracing::warn!(%key, "no value stored"),
        },
        StateAction::Set { key, value } => {
            store.set(&key, &value)?;
            tracing::info!(%key, path = ?store.path(), "stored value");
        }
        StateAction::List => {
            for key in store.keys() {
                println!("{key}");
            }
        }
    }
    Ok(())
}

fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("termtone"))
        .unwrap_or_default()
        .join("save.json")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Glyph grid and procedural sound playground", long_about = None)]
struct Cli {
    /// JSON configuration file. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Key/value state file used by the `state` command.
    #[arg(long, global = true)]
    state: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Paint a sample screen headlessly and print it as text.
    Demo {
        /// Viewport width in device pixels.
        #[arg(long)]
        width: Option<u32>,
        /// Viewport height in device pixels.
        #[arg(long)]
        height: Option<u32>,
        /// Device pixel ratio.
        #[arg(long)]
        ratio: Option<f32>,
    },
    /// Print the debug report for a freshly started session.
    Inspect,
    /// Render a cue offline and print its signal analysis.
    Tone {
        /// Cue name, e.g. `click` or `level-up`.
        cue: String,
        /// Write the rendered samples as raw little-endian f32.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Read or write persisted key/value state.
    State {
        #[command(subcommand)]
        action: StateAction,
    },
}

#[derive(Subcommand, Debug)]
enum StateAction {
    Get { key: String },
    Set { key: String, value: String },
    List,
}
