//! visionseek - find registered objects through the camera
//!
//! `visionseek detect` runs a detection session. Each line on stdin is handled
//! as a voice command ("find keys", "read results", "开始检测", ...). Ctrl-C stops.
//!
//! `visionseek templates add|list|delete` manages the template gallery.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use visionseek::{
    open_camera, App, LogAnnouncer, RandomDetector, SessionController, SqliteTemplateStore,
    TemplateGallery, VisionSeekConfig,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto, value_name = "MODE", global = true)]
    ui: ui::UiMode,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a detection session, reading commands from stdin.
    Detect {
        /// Template to search for (defaults to the most recently added).
        #[arg(long)]
        find: Option<String>,
        /// Directory for captured frames.
        #[arg(long, default_value = ".")]
        capture_dir: PathBuf,
        /// Seed for the placeholder detector.
        #[arg(long, env = "VISIONSEEK_DETECTOR_SEED")]
        seed: Option<u64>,
    },
    /// Manage saved templates.
    Templates {
        #[command(subcommand)]
        action: TemplateAction,
    },
}

#[derive(Subcommand, Debug)]
enum TemplateAction {
    /// Register an image as a new template.
    Add {
        /// Image file (PNG or JPEG).
        image: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        category: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List saved templates, oldest first.
    List,
    /// Delete a template by id.
    Delete { id: String },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::new(args.ui, std::io::stderr().is_terminal());
    let cfg = {
        let _stage = ui.stage("Load configuration");
        VisionSeekConfig::load()?
    };

    match args.command {
        Command::Detect {
            find,
            capture_dir,
            seed,
        } => run_detect(&cfg, &ui, find, capture_dir, seed),
        Command::Templates { action } => run_templates(&cfg, action),
    }
}

fn open_gallery(cfg: &VisionSeekConfig) -> Result<TemplateGallery> {
    let store = SqliteTemplateStore::open(&cfg.db_path)
        .with_context(|| format!("failed to open template store {}", cfg.db_path))?
        .with_quota(cfg.store.quota_bytes);
    Ok(TemplateGallery::new(Box::new(store))
        .with_limits(cfg.store.max_templates, cfg.store.degraded_keep))
}

fn run_detect(
    cfg: &VisionSeekConfig,
    ui: &ui::Ui,
    find: Option<String>,
    capture_dir: PathBuf,
    seed: Option<u64>,
) -> Result<()> {
    let camera = open_camera(&cfg.camera)?;
    let detector = match seed {
        Some(seed) => RandomDetector::seeded(seed),
        None => RandomDetector::new(),
    };
    let session = SessionController::new(camera, detector, cfg.match_policy(), cfg.loop_settings())
        .with_facing_mode(cfg.facing);
    let gallery = open_gallery(cfg)?;
    let mut app = App::new(session, gallery, Box::new(LogAnnouncer)).with_capture_dir(capture_dir);

    let count = app.load_templates();
    log::info!("visionseek: {} templates available", count);
    {
        let _stage = ui.stage("Load detection model and start camera");
        match find.as_deref() {
            Some(item) => {
                if app.find_and_apply(item)?.is_none() {
                    return Err(anyhow!("no template named '{}'", item));
                }
            }
            None => {
                app.start()?;
            }
        }
    }
    if !app.session().is_active() {
        return Err(anyhow!("detection session did not start"));
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("visionseek-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin reader")?;

    log::info!("visionseek: detecting; type commands, Ctrl-C to stop");
    let status = ui.live();
    app.run(&rx, &shutdown, |report| {
        let target = report
            .target_detection()
            .map(|hit| format!(", target: {} {}%", hit.label, hit.percent()))
            .unwrap_or_default();
        status.update(format!(
            "frame #{}: {} objects in {}ms{}",
            report.seq,
            report.detections.len(),
            report.detect_time.as_millis(),
            target
        ));
    })?;
    drop(status);

    log::info!("visionseek: shutting down");
    app.shutdown()
}

fn run_templates(cfg: &VisionSeekConfig, action: TemplateAction) -> Result<()> {
    let mut gallery = open_gallery(cfg)?;
    gallery.load()?;

    match action {
        TemplateAction::Add {
            image,
            name,
            category,
            description,
        } => {
            let template =
                visionseek::Template::from_file(&image, &name, &category, &description)?;
            let report = gallery.add(template.clone())?;
            for dropped in &report.dropped {
                println!("dropped {} ({})", dropped.id, dropped.name);
            }
            if report.degraded {
                eprintln!(
                    "warning: template storage is full; kept the {} most recent templates",
                    gallery.len()
                );
            }
            println!("added {} ({})", template.id, template.name);
        }
        TemplateAction::List => {
            if gallery.is_empty() {
                println!("no templates");
            }
            for template in gallery.list() {
                println!(
                    "{}\t{}\t{}\t{}",
                    template.id, template.name, template.category, template.created_at
                );
            }
        }
        TemplateAction::Delete { id } => match gallery.remove(&id)? {
            Some((removed, report)) => {
                for dropped in &report.dropped {
                    println!("dropped {} ({})", dropped.id, dropped.name);
                }
                if report.degraded {
                    eprintln!(
                        "warning: template storage is full; kept the {} most recent templates",
                        gallery.len()
                    );
                }
                println!("deleted {} ({})", removed.id, removed.name);
            }
            None => return Err(anyhow!("no template with id {}", id)),
        },
    }
    Ok(())
}
