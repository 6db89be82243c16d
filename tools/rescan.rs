use std::env;
use std::path::PathBuf;
use std::thread;

use library::{
    config_path_from_env, load_or_create_config, now_secs, IndexEvent, Library, UpdateOutcome,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config_path = None;
    let mut purge = false;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--purge" => purge = true,
            _ => config_path = Some(PathBuf::from(arg)),
        }
    }
    let config_path = config_path.unwrap_or_else(config_path_from_env);

    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        warn!(
            "Wrote default config to {}; set music_root and run again",
            config_path.display()
        );
        return Ok(());
    }

    let library = Library::open(&config, &config_path)?;
    info!(
        "Indexing {} (store queue depth {})",
        library.root().display(),
        library.executor().queue_depth()
    );
    let mut events = library.subscribe();
    let printer = thread::spawn(move || {
        let mut last_stage = None;
        while let Some(event) = events.blocking_recv() {
            match event {
                IndexEvent::UpdateStarted => println!("Update started"),
                IndexEvent::UpdateProgress { stage, .. } if last_stage != Some(stage) => {
                    println!("Stage: {:?}", stage);
                    last_stage = Some(stage);
                }
                IndexEvent::UpdateProgress { .. } => {}
                IndexEvent::UpdateFinished(UpdateOutcome::Completed(_)) => {
                    println!("Update finished")
                }
                IndexEvent::UpdateFinished(UpdateOutcome::Failed(message)) => {
                    println!("Update failed: {}", message)
                }
            }
        }
    });

    let result = library.rescan();
    if let Ok(summary) = &result {
        println!(
            "Verified {}, updated {}, tombstoned {}, added {}, exhumed {}, skipped {}",
            summary.verified,
            summary.updated,
            summary.tombstoned,
            summary.added,
            summary.exhumed,
            summary.skipped
        );
        if purge {
            let removed = library.purge_tombstoned(now_secs())?;
            println!("Purged {} expired tombstones", removed);
        }
        let stats = library.stats().wait()?;
        println!(
            "Index: {} live tracks, {} tombstoned, {} plays",
            stats.live, stats.tombstoned, stats.total_plays
        );
    }

    library.shutdown();
    drop(library);
    let _ = printer.join();

    result?;
    Ok(())
}
