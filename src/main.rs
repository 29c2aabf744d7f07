use anyhow::{bail, Context, Result};
use slide_ink::events::PresentationEvent;
use slide_ink::foreign::fake::FakePresentationApp;
use slide_ink::logging::{self, Severity};
use slide_ink::settings::{Settings, SETTINGS_FILE_NAME};
use slide_ink::SlideInkRuntime;
use std::io::BufRead;
use std::path::PathBuf;

struct Args {
    settings: PathBuf,
    simulate: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        settings: PathBuf::from(SETTINGS_FILE_NAME),
        simulate: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--settings" => {
                args.settings = iter
                    .next()
                    .map(PathBuf::from)
                    .context("--settings needs a path")?;
            }
            "--simulate" => args.simulate = true,
            other => bail!("unknown argument {other}"),
        }
    }
    Ok(args)
}

fn describe(event: &PresentationEvent) -> String {
    match event {
        PresentationEvent::ConnectionChanged(connected) => format!("connected: {connected}"),
        PresentationEvent::SlideShowStateChanged(active) => format!("slideshow active: {active}"),
        PresentationEvent::PresentationOpened { info, resume_slide } => format!(
            "opened {} ({} slides, resume at {resume_slide:?})",
            info.name, info.slide_count
        ),
        PresentationEvent::PresentationClosed => "presentation closed".to_string(),
        PresentationEvent::SlideShowBegan { slide, ink } => {
            format!("slideshow began on slide {slide} ({} strokes)", ink.strokes.len())
        }
        PresentationEvent::SlideChanged { slide, ink } => {
            format!("slide {slide} ({} strokes)", ink.strokes.len())
        }
        PresentationEvent::SlideShowEnded => "slideshow ended".to_string(),
    }
}

fn run_command(runtime: &SlideInkRuntime, sim: Option<&FakePresentationApp>, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let navigation = runtime.navigation();
    let ok = match (words.next(), words.next()) {
        (Some("next"), _) => navigation.next(),
        (Some("prev"), _) => navigation.previous(),
        (Some("goto"), Some(n)) => n.parse().map(|n| navigation.goto_slide(n)).unwrap_or(false),
        (Some("start"), _) => navigation.start_show(),
        (Some("end"), _) => navigation.end_show(),
        (Some("stats"), _) => {
            let stats = runtime.ink().stats();
            logging::log(&format!("{stats:?}"), Severity::Event);
            true
        }
        (Some("open"), Some(name)) => match sim {
            Some(app) => {
                app.open_presentation(name, name, 10);
                true
            }
            None => false,
        },
        (Some("close"), _) => match sim {
            Some(app) => {
                app.close_presentation();
                true
            }
            None => false,
        },
        (Some(other), _) => {
            logging::log(&format!("unknown command {other}"), Severity::Warning);
            false
        }
        (None, _) => true,
    };
    if !ok {
        logging::log(&format!("command failed: {line}"), Severity::Warning);
    }
    ok
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let settings = Settings::load(&args.settings)
        .with_context(|| format!("load settings {}", args.settings.display()))?;
    logging::init(settings.debug_logging, settings.log_file.clone());

    let sim = args.simulate.then(FakePresentationApp::new);
    let runtime = match &sim {
        Some(app) => SlideInkRuntime::simulated(settings, app)?,
        None => SlideInkRuntime::native(settings)?,
    };
    runtime
        .events()
        .subscribe(|event| logging::log(&describe(event), Severity::Event));
    runtime.start()?;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("read command")?;
        let line = line.trim();
        if line == "quit" {
            break;
        }
        run_command(&runtime, sim.as_ref(), line);
    }

    runtime.stop();
    Ok(())
}
