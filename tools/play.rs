/// Play — terminal player for testing stories.
///
/// Usage: play <story.ron|story.json> [--save-dir <dir>] [--seed <n>]
///
/// Commands:
///   <n>        follow link number n
///   back       step back through browser history
///   forward    step forward through browser history
///   save       save progress
///   restore    restore the saved game
///   reset      delete the saved game
///   history    list visited passages
///   state      print story variables
///   help       list commands
///   quit       exit

use passage_engine::core::compiler::{PassageCompiler, PlainRenderer, RenderedPassage};
use passage_engine::core::display::DisplaySink;
use passage_engine::core::eval::ExpressionEvaluator;
use passage_engine::core::history::MemoryHistory;
use passage_engine::core::link::LinkDescriptor;
use passage_engine::core::navigation::StoryEngine;
use passage_engine::core::persistence::FileStore;
use passage_engine::schema::config::StoryConfig;
use passage_engine::schema::passage::unescape_html;
use passage_engine::schema::story::{Story, StoryData};
use regex::Regex;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::LazyLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("tag regex must compile"));

/// Prints each frame and numbers its passage links.
#[derive(Default)]
struct Terminal {
    links: Vec<LinkDescriptor>,
}

impl Terminal {
    fn print(&mut self, rendered: &RenderedPassage) {
        let text = unescape_html(&TAG.replace_all(&rendered.html, ""));
        for line in text.trim().lines() {
            println!("  {}", line);
        }
        self.links.extend(rendered.passage_links().cloned());
    }

    fn print_links(&self) {
        for (i, link) in self.links.iter().enumerate() {
            println!("  [{}] {}", i + 1, link.display);
        }
    }
}

impl DisplaySink for Terminal {
    fn show_passage(&mut self, rendered: &RenderedPassage) {
        self.links.clear();
        println!("\n== {} ==", rendered.name);
        self.print(rendered);
    }

    fn show_header(&mut self, rendered: &RenderedPassage) {
        self.print(rendered);
    }

    fn show_footer(&mut self, rendered: &RenderedPassage) {
        self.print(rendered);
    }

    fn set_title(&mut self, title: &str) {
        println!("\n*** {} ***", title);
    }

    fn apply_config(&mut self, config: &StoryConfig) {
        if config.dark_theme {
            println!("(dark theme)");
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "passage_engine=warn".into()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Parsed command line, minus the program name.
#[derive(Debug, PartialEq)]
struct Args {
    story_path: String,
    saves_dir: String,
    seed: Option<u64>,
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let story_path = args
        .first()
        .cloned()
        .ok_or_else(|| "Missing story path".to_string())?;
    let mut parsed = Args {
        story_path,
        saves_dir: String::from(".saves"),
        seed: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--save-dir" if i + 1 < args.len() => {
                i += 1;
                parsed.saves_dir = args[i].clone();
            }
            "--seed" if i + 1 < args.len() => {
                i += 1;
                let seed = args[i]
                    .parse::<u64>()
                    .map_err(|_| format!("Invalid seed: {}", args[i]))?;
                parsed.seed = Some(seed);
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
        i += 1;
    }
    Ok(parsed)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let Args {
        story_path,
        saves_dir,
        seed,
    } = match parse_args(&args[1..]) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{}", message);
            print_usage();
            std::process::exit(1);
        }
    };

    init_tracing();

    let story = match load_story(Path::new(&story_path), seed) {
        Ok(story) => story,
        Err(e) => {
            eprintln!("ERROR: Failed to load story: {}", e);
            std::process::exit(1);
        }
    };
    let store = match FileStore::open(&saves_dir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("ERROR: Cannot open save directory '{}': {}", saves_dir, e);
            std::process::exit(1);
        }
    };

    println!("{} ({} passages)", story.name, story.len());
    println!("Type 'help' for commands.");

    let compiler = PassageCompiler::new(ExpressionEvaluator, PlainRenderer);
    let mut engine = StoryEngine::new(story, store, MemoryHistory::new(), Terminal::default())
        .with_compiler(compiler);

    if let Err(e) = engine.play() {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
    engine.display().print_links();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("play> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let result = match line.to_lowercase().as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" => {
                print_commands();
                Ok(())
            }
            "back" | "b" => match engine.browser_mut().back() {
                Some(popped) => engine.handle_pop(popped),
                None => {
                    println!("Nothing to go back to.");
                    Ok(())
                }
            },
            "forward" | "f" => match engine.browser_mut().forward() {
                Some(popped) => engine.handle_pop(popped),
                None => {
                    println!("Nothing to go forward to.");
                    Ok(())
                }
            },
            "save" => engine.save().map(|()| println!("Saved to {}.", engine.save_key())),
            "restore" => engine.restore(),
            "reset" => engine.reset().map(|()| println!("Save data cleared.")),
            "history" => {
                for id in engine.history() {
                    let name = engine.story().passage(*id).map_or("?", |p| p.name.as_str());
                    println!("  {} {}", id, name);
                }
                Ok(())
            }
            "state" => {
                match serde_json::to_string_pretty(engine.state()) {
                    Ok(json) => println!("{}", json),
                    Err(e) => println!("Cannot print state: {}", e),
                }
                Ok(())
            }
            other => match other.parse::<usize>() {
                Ok(n) if n >= 1 && n <= engine.display().links.len() => {
                    let target = engine.display().links[n - 1].target.clone();
                    engine.activate_link(&target)
                }
                Ok(_) => {
                    println!("No link with that number.");
                    Ok(())
                }
                Err(_) => {
                    println!("Unknown command: {}. Type 'help' for commands.", other);
                    Ok(())
                }
            },
        };

        match result {
            Ok(()) => engine.display().print_links(),
            Err(e) => println!("ERROR: {}", e),
        }
    }
}

fn load_story(path: &Path, seed: Option<u64>) -> Result<Story, String> {
    let input = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let data: StoryData = match path.extension().and_then(|s| s.to_str()) {
        Some("json") => serde_json::from_str(&input).map_err(|e| e.to_string())?,
        _ => ron::from_str(&input).map_err(|e| e.to_string())?,
    };
    let mut builder = Story::builder_from_data(data);
    if let Some(seed) = seed {
        builder = builder.seed(seed);
    }
    builder.build().map_err(|e| e.to_string())
}

fn print_usage() {
    println!("Usage: play <story.ron|story.json> [--save-dir <dir>] [--seed <n>]");
}

fn print_commands() {
    println!("Commands:");
    println!("  <n>        follow link number n");
    println!("  back       step back through browser history");
    println!("  forward    step forward through browser history");
    println!("  save       save progress");
    println!("  restore    restore the saved game");
    println!("  reset      delete the saved game");
    println!("  history    list visited passages");
    println!("  state      print story variables");
    println!("  quit       exit");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults() {
        let parsed = parse_args(&args(&["cave.ron"])).unwrap();
        assert_eq!(
            parsed,
            Args {
                story_path: "cave.ron".to_string(),
                saves_dir: ".saves".to_string(),
                seed: None,
            }
        );
    }

    #[test]
    fn save_dir_and_seed() {
        let parsed = parse_args(&args(&["cave.ron", "--seed", "42", "--save-dir", "/tmp/s"])).unwrap();
        assert_eq!(parsed.seed, Some(42));
        assert_eq!(parsed.saves_dir, "/tmp/s");
    }

    #[test]
    fn invalid_seed_is_an_error() {
        assert_eq!(
            parse_args(&args(&["cave.ron", "--seed", "forty"])),
            Err("Invalid seed: forty".to_string())
        );
        assert_eq!(
            parse_args(&args(&["cave.ron", "--seed", "-1"])),
            Err("Invalid seed: -1".to_string())
        );
    }

    #[test]
    fn unknown_and_incomplete_arguments() {
        assert_eq!(
            parse_args(&args(&["cave.ron", "--fast"])),
            Err("Unknown argument: --fast".to_string())
        );
        assert_eq!(
            parse_args(&args(&["cave.ron", "--seed"])),
            Err("Unknown argument: --seed".to_string())
        );
    }
}
