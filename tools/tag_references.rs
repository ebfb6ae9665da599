/// Tag references: records existing storyboard images against the
/// entities their scenes mention.
///
/// Usage: tag_references --definitions <path> --outline <path> --state <dir>
///            --scenes <dir> --boards <dir> [--view indoor|outdoor] [--dry-run]
///
/// Image ids are stored relative to the parent of the boards directory,
/// e.g. `boards/scene-0003-2.png`. Files not named after a scene are skipped.
use continuity_engine::core::engine::StoryEngine;
use continuity_engine::core::naming::parse_scene_number;
use continuity_engine::core::references::View;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let mut definitions = None;
    let mut outline = None;
    let mut state_dir = None;
    let mut scene_dir = None;
    let mut boards_dir = None;
    let mut view = None;
    let mut dry_run = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--definitions" if i + 1 < args.len() => {
                i += 1;
                definitions = Some(args[i].clone());
            }
            "--outline" if i + 1 < args.len() => {
                i += 1;
                outline = Some(args[i].clone());
            }
            "--state" if i + 1 < args.len() => {
                i += 1;
                state_dir = Some(args[i].clone());
            }
            "--scenes" if i + 1 < args.len() => {
                i += 1;
                scene_dir = Some(args[i].clone());
            }
            "--boards" if i + 1 < args.len() => {
                i += 1;
                boards_dir = Some(PathBuf::from(&args[i]));
            }
            "--view" if i + 1 < args.len() => {
                i += 1;
                view = match args[i].as_str() {
                    "indoor" => Some(View::Indoor),
                    "outdoor" => Some(View::Outdoor),
                    other => {
                        eprintln!("Unknown view '{}', expected indoor or outdoor", other);
                        std::process::exit(1);
                    }
                };
            }
            "--dry-run" => dry_run = true,
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let (Some(definitions), Some(outline), Some(state_dir), Some(scene_dir), Some(boards_dir)) =
        (definitions, outline, state_dir, scene_dir, boards_dir)
    else {
        eprintln!("--definitions, --outline, --state, --scenes and --boards are required");
        std::process::exit(1);
    };

    let images = match collect_images(&boards_dir) {
        Ok(images) => images,
        Err(e) => {
            eprintln!("Error reading {}: {}", boards_dir.display(), e);
            std::process::exit(1);
        }
    };

    let mut engine = match StoryEngine::builder()
        .definitions(definitions)
        .outline(outline)
        .state_dir(state_dir)
        .scene_dir(scene_dir)
        .build()
    {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut total = 0;
    for (number, ids) in &images {
        match engine.tag_scene_images(*number, ids, view) {
            Ok(recorded) => {
                println!("Scene {}: {} image(s), {} new reference(s)", number, ids.len(), recorded);
                total += recorded;
            }
            Err(e) => eprintln!("Skipping scene {}: {}", number, e),
        }
    }

    if dry_run {
        println!("Dry run: {} new reference(s) not saved", total);
        return;
    }
    if let Err(e) = engine.save() {
        eprintln!("Error saving references: {}", e);
        std::process::exit(1);
    }
    println!("Saved {} new reference(s)", total);
}

/// Image ids under `boards`, grouped by scene and sorted by name.
fn collect_images(boards: &Path) -> std::io::Result<BTreeMap<u32, Vec<String>>> {
    let prefix = boards
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_default();
    let mut grouped: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for entry in std::fs::read_dir(boards)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if !is_image {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(number) = parse_scene_number(file_name) else {
            continue;
        };
        let id = prefix.join(file_name).to_string_lossy().replace('\\', "/");
        grouped.entry(number).or_default().push(id);
    }
    for ids in grouped.values_mut() {
        ids.sort();
    }
    Ok(grouped)
}

fn print_usage() {
    eprintln!("Usage: tag_references --definitions <path> --outline <path> --state <dir> --scenes <dir> --boards <dir> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --view <indoor|outdoor>  Also tag mentioned settings in this view");
    eprintln!("  --dry-run                Report without saving");
}
