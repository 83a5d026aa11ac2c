/// Display sink — where rendered passages go.
use crate::core::compiler::RenderedPassage;
use crate::schema::config::StoryConfig;

pub trait DisplaySink {
    /// Replace the main passage area.
    fn show_passage(&mut self, rendered: &RenderedPassage);

    fn show_header(&mut self, _rendered: &RenderedPassage) {}

    fn show_footer(&mut self, _rendered: &RenderedPassage) {}

    fn set_title(&mut self, _title: &str) {}

    /// Called once when play starts, with the effective story config.
    fn apply_config(&mut self, _config: &StoryConfig) {}
}

/// Keeps the latest frame in memory. Used by the browser binding, which
/// reads it back after each call, and by tests.
#[derive(Debug, Clone, Default)]
pub struct Screen {
    pub passage: Option<RenderedPassage>,
    pub header: Option<RenderedPassage>,
    pub footer: Option<RenderedPassage>,
    pub title: Option<String>,
    pub dark_theme: bool,
    pub stylesheets: Vec<String>,
    /// Number of passage displays so far.
    pub displays: usize,
}

impl Screen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn passage_html(&self) -> &str {
        self.passage.as_ref().map_or("", |p| p.html.as_str())
    }
}

impl DisplaySink for Screen {
    fn show_passage(&mut self, rendered: &RenderedPassage) {
        self.passage = Some(rendered.clone());
        self.displays += 1;
    }

    fn show_header(&mut self, rendered: &RenderedPassage) {
        self.header = Some(rendered.clone());
    }

    fn show_footer(&mut self, rendered: &RenderedPassage) {
        self.footer = Some(rendered.clone());
    }

    fn set_title(&mut self, title: &str) {
        self.title = Some(title.to_string());
    }

    fn apply_config(&mut self, config: &StoryConfig) {
        self.dark_theme = config.dark_theme;
        self.stylesheets = config.stylesheets.clone();
    }
}
