/// Continuity report: prints the drafting context of each scene.
///
/// Usage: continuity_report --definitions <path> --outline <path>
///            [--state <dir>] [--scenes <dir>] [--config <path>] [--scene <n>]
///
/// Only persisted continuity notes are used; scenes without notes are
/// listed as unavailable. Set RUST_LOG for diagnostics.
use continuity_engine::core::config::EngineConfig;
use continuity_engine::core::engine::{SceneContext, StoryEngine};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
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
    let mut config_path = None;
    let mut only_scene: Option<u32> = None;

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
            "--config" if i + 1 < args.len() => {
                i += 1;
                config_path = Some(args[i].clone());
            }
            "--scene" if i + 1 < args.len() => {
                i += 1;
                match args[i].parse() {
                    Ok(n) => only_scene = Some(n),
                    Err(_) => {
                        eprintln!("Invalid scene number: {}", args[i]);
                        std::process::exit(1);
                    }
                }
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let (Some(definitions), Some(outline)) = (definitions, outline) else {
        eprintln!("--definitions and --outline are required");
        std::process::exit(1);
    };

    let config = match config_path {
        Some(path) => match EngineConfig::load_from_ron(std::path::Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };

    let mut builder = StoryEngine::builder()
        .definitions(definitions)
        .outline(outline)
        .config(config);
    if let Some(dir) = state_dir {
        builder = builder.state_dir(dir);
    }
    if let Some(dir) = scene_dir {
        builder = builder.scene_dir(dir);
    }
    let mut engine = match builder.build() {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let numbers: Vec<u32> = match only_scene {
        Some(n) => vec![n],
        None => engine.scenes().iter().map(|s| s.number).collect(),
    };

    for number in numbers {
        match engine.scene_context(number).await {
            Ok(context) => print_context(&context),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn print_context(context: &SceneContext) {
    println!("=== Scene {} ===", context.scene_number);
    println!("Purpose:    {}", context.purpose);
    println!("Settings:   {}", join_or_none(&context.settings));
    let eras: Vec<String> = context.eras.iter().map(|e| e.as_str().to_string()).collect();
    println!("Eras:       {}", join_or_none(&eras));
    println!("Characters: {}", join_or_none(&context.characters));
    println!("Extras:     {}", join_or_none(&context.extras));
    if !context.unavailable_scenes.is_empty() {
        let missing: Vec<String> = context
            .unavailable_scenes
            .iter()
            .map(|n| n.to_string())
            .collect();
        println!("No notes:   scenes {}", missing.join(", "));
    }
    if context.continuity.is_empty() {
        println!("Continuity: (none)");
    } else {
        println!("Continuity:");
        println!("{}", context.continuity.render());
    }
    println!();
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

fn print_usage() {
    eprintln!("Usage: continuity_report --definitions <path> --outline <path> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --state <dir>     Story state directory (references, continuity notes)");
    eprintln!("  --scenes <dir>    Directory of scene-NNNN.md texts");
    eprintln!("  --config <path>   Engine config (RON)");
    eprintln!("  --scene <n>       Report a single scene");
}
