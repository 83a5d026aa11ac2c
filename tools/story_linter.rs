/// Story Linter — checks a story's passages, links and templates.
///
/// Usage: story_linter <story.ron|story.json> [--strict]
///
/// Errors: unparsable templates, links to passages that do not exist.
/// Warnings: passages no static link reaches from the start passage.
/// With --strict, warnings also fail the run.

use passage_engine::core::link::extract_links;
use passage_engine::core::template::Template;
use passage_engine::schema::passage::{unescape_html, PassageId};
use passage_engine::schema::story::{Story, CONFIG_PASSAGE, FOOTER_PASSAGE, HEADER_PASSAGE};
use std::collections::{BTreeSet, VecDeque};
use std::path::Path;
use std::process;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "passage_engine=warn".into()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: story_linter <story.ron|story.json> [--strict]");
        process::exit(0);
    }

    init_tracing();

    let story_path = Path::new(&args[1]);
    let strict = args[2..].iter().any(|a| a == "--strict");

    let story = match load_story(story_path) {
        Ok(story) => story,
        Err(e) => {
            eprintln!("ERROR: Failed to load story: {}", e);
            process::exit(1);
        }
    };

    println!("Loaded '{}' with {} passages", story.name, story.len());
    for reserved in [HEADER_PASSAGE, FOOTER_PASSAGE, CONFIG_PASSAGE] {
        match story.passage_by_name(reserved) {
            Some(p) => println!("  {}: passage {}", reserved, p.id),
            None => println!("  {}: none", reserved),
        }
    }
    println!("  Helpers: {}", story.helpers().names().join(", "));

    let (errors, warnings) = lint_story(&story);

    println!("\n=== Story Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    if errors.is_empty() && !(strict && !warnings.is_empty()) {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn load_story(path: &Path) -> Result<Story, String> {
    match path.extension().and_then(|s| s.to_str()) {
        Some("json") => {
            let input = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
            Story::parse_json(&input).map_err(|e| e.to_string())
        }
        _ => Story::load_from_ron(path).map_err(|e| e.to_string()),
    }
}

fn lint_story(story: &Story) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for passage in story.passages() {
        if passage.name == CONFIG_PASSAGE {
            continue;
        }
        let source = unescape_html(&passage.source);

        if let Err(e) = Template::parse(&source) {
            errors.push(format!("Passage '{}' ({}): {}", passage.name, passage.id, e));
        }

        for link in extract_links(&source) {
            if !link.is_internal() {
                continue;
            }
            // Targets computed by the template are only known at play time.
            if link.target.contains("<%") {
                warnings.push(format!(
                    "Passage '{}' links to computed target '{}'",
                    passage.name, link.target
                ));
                continue;
            }
            if story.passage_by_name(&link.target).is_none() {
                errors.push(format!(
                    "Passage '{}' links to missing passage '{}'",
                    passage.name, link.target
                ));
            }
        }
    }

    let reached = reachable_from_start(story);
    for passage in story.passages() {
        let reserved = [HEADER_PASSAGE, FOOTER_PASSAGE, CONFIG_PASSAGE].contains(&passage.name.as_str());
        if !reserved && !reached.contains(&passage.id) {
            warnings.push(format!(
                "Passage '{}' ({}) is not reachable from the start passage",
                passage.name, passage.id
            ));
        }
    }

    (errors, warnings)
}

/// Passages reachable from the start by following static links. Links in
/// the header and footer are reachable from every displayed passage.
fn reachable_from_start(story: &Story) -> BTreeSet<PassageId> {
    let mut reached = BTreeSet::new();
    let mut queue = VecDeque::from([story.start()]);
    for always in [story.header(), story.footer()].into_iter().flatten() {
        queue.push_back(always.id);
    }

    while let Some(id) = queue.pop_front() {
        if !reached.insert(id) {
            continue;
        }
        let Some(passage) = story.passage(id) else {
            continue;
        };
        for link in extract_links(&unescape_html(&passage.source)) {
            if let Some(target) = story.passage_by_name(&link.target) {
                if link.is_internal() && !reached.contains(&target.id) {
                    queue.push_back(target.id);
                }
            }
        }
    }
    reached
}
