/// Passage compiler — unescape → template expansion → link rewriting →
/// markup rendering.
///
/// Nothing is cached: templates read mutable story state, so every call
/// recomputes from the stored source.
use pulldown_cmark::{html, Options, Parser};
use serde::{Deserialize, Serialize};

use crate::core::eval::{Evaluator, ExpressionEvaluator, Scope};
use crate::core::link::{rewrite_links, LinkDescriptor};
use crate::core::template::{Template, TemplateError};
use crate::schema::passage::{unescape_html, PassageId};

/// Converts expanded, link-rewritten markup to display HTML.
pub trait MarkupRenderer {
    fn render(&self, markup: &str) -> String;
}

/// CommonMark with tables and strikethrough. Inline HTML (including the
/// rewritten link elements) passes through.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl MarkupRenderer for MarkdownRenderer {
    fn render(&self, markup: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        let parser = Parser::new_ext(markup, options);
        let mut out = String::with_capacity(markup.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}

/// Returns the markup unchanged, for hosts that render it themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainRenderer;

impl MarkupRenderer for PlainRenderer {
    fn render(&self, markup: &str) -> String {
        markup.to_string()
    }
}

/// Final display content for one passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedPassage {
    pub passage: PassageId,
    pub name: String,
    pub html: String,
    pub links: Vec<LinkDescriptor>,
}

impl RenderedPassage {
    /// Internal links, in order of appearance.
    pub fn passage_links(&self) -> impl Iterator<Item = &LinkDescriptor> {
        self.links.iter().filter(|l| l.is_internal())
    }
}

pub struct PassageCompiler {
    evaluator: Box<dyn Evaluator>,
    renderer: Box<dyn MarkupRenderer>,
}

impl Default for PassageCompiler {
    fn default() -> Self {
        Self::new(ExpressionEvaluator, MarkdownRenderer)
    }
}

impl PassageCompiler {
    pub fn new(
        evaluator: impl Evaluator + 'static,
        renderer: impl MarkupRenderer + 'static,
    ) -> Self {
        Self {
            evaluator: Box::new(evaluator),
            renderer: Box::new(renderer),
        }
    }

    /// Unescape the passage source and expand its template.
    pub fn expand(&self, scope: &mut Scope<'_>) -> Result<String, TemplateError> {
        let source = unescape_html(&scope.passage.source);
        let template = Template::parse(&source)?;
        template.expand(self.evaluator.as_ref(), scope)
    }

    /// Render the scope's passage to display HTML.
    pub fn render(&self, scope: &mut Scope<'_>) -> Result<RenderedPassage, TemplateError> {
        let expanded = self.expand(scope)?;
        let rewritten = rewrite_links(&expanded);
        Ok(RenderedPassage {
            passage: scope.passage.id,
            name: scope.passage.name.clone(),
            html: self.renderer.render(&rewritten.text),
            links: rewritten.links,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::passage::Passage;
    use crate::schema::save::StateBag;
    use crate::schema::story::Story;
    use serde_json::Value;

    fn render_with(
        compiler: &PassageCompiler,
        source: &str,
        state: &mut StateBag,
    ) -> Result<RenderedPassage, TemplateError> {
        let story = Story::builder("Compiler")
            .start(PassageId(1))
            .passage(Passage::new(PassageId(1), "Start", Vec::<String>::new(), source))
            .build()
            .unwrap();
        let passage = story.passage(PassageId(1)).unwrap().clone();
        let history = [PassageId(1)];
        let mut scope = Scope {
            passage: &passage,
            story: &story,
            state,
            history: &history,
            checkpoint: "",
        };
        compiler.render(&mut scope)
    }

    #[test]
    fn escaped_source_is_evaluated() {
        let compiler = PassageCompiler::new(ExpressionEvaluator, PlainRenderer);
        let mut state = StateBag::new();
        state.insert("gold".to_string(), Value::from(3));
        let out = render_with(&compiler, "Gold: &lt;%= story.state.gold %&gt;", &mut state).unwrap();
        assert_eq!(out.html, "Gold: 3");
    }

    #[test]
    fn template_output_feeds_link_rewriting() {
        let compiler = PassageCompiler::new(ExpressionEvaluator, PlainRenderer);
        let mut state = StateBag::new();
        state.insert("exit".to_string(), Value::from("Garden"));
        let out = render_with(&compiler, "[[Leave->&lt;%= story.state.exit %&gt;]]", &mut state)
            .unwrap();
        assert_eq!(out.links.len(), 1);
        assert_eq!(out.links[0].target, "Garden");
        assert!(out.html.contains(r#"data-passage="Garden""#));
    }

    #[test]
    fn markdown_rendering() {
        let compiler = PassageCompiler::default();
        let mut state = StateBag::new();
        let out = render_with(&compiler, "*Dark* room. [[Go->Room]]", &mut state).unwrap();
        assert_eq!(
            out.html,
            "<p><em>Dark</em> room. <a href=\"javascript:void(0)\" data-passage=\"Room\" class=\"passage-link\">Go</a></p>\n"
        );
        assert_eq!(out.passage_links().count(), 1);
    }

    #[test]
    fn no_link_markup_no_navigation_elements() {
        let compiler = PassageCompiler::default();
        let mut state = StateBag::new();
        for source in ["Just text.", "# Title\n\n- a\n- b", "Brackets [alone] and [[ unclosed"] {
            let out = render_with(&compiler, source, &mut state).unwrap();
            assert!(!out.html.contains("data-passage"), "{}", out.html);
            assert!(out.links.is_empty());
        }
    }

    #[test]
    fn renders_recompute_from_state() {
        let compiler = PassageCompiler::new(ExpressionEvaluator, PlainRenderer);
        let mut state = StateBag::new();
        state.insert("n".to_string(), Value::from(0));
        let source = "<% story.state.n += 1 %><%= story.state.n %>";
        assert_eq!(render_with(&compiler, source, &mut state).unwrap().html, "1");
        assert_eq!(render_with(&compiler, source, &mut state).unwrap().html, "2");
    }

    #[test]
    fn template_errors_propagate() {
        let compiler = PassageCompiler::default();
        let mut state = StateBag::new();
        assert!(render_with(&compiler, "<%= nope %>", &mut state).is_err());
    }
}
