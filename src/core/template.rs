/// Passage templates — parsing and expansion.
use thiserror::Error;

use crate::core::eval::{display_value, truthy, Evaluator, Scope};
use crate::schema::helpers::HelperError;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template parse error: {0}")]
    Parse(String),
    #[error("error in `{expr}`: {message}")]
    Expression { expr: String, message: String },
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),
    #[error("unknown helper: {0}")]
    UnknownHelper(String),
    #[error("helper `{name}` failed: {source}")]
    Helper {
        name: String,
        #[source]
        source: HelperError,
    },
    #[error("invalid assignment: {0}")]
    InvalidAssignment(String),
}

/// A segment of a parsed template.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateSegment {
    /// Literal text, emitted as-is.
    Literal(String),
    /// `<%= expr %>` (raw) or `<%- expr %>` (HTML-escaped).
    Interpolate { expr: String, escape: bool },
    /// `<% statement %>`, run for its side effects.
    Statement(String),
    /// `<% if a %> .. <% elif b %> .. <% else %> .. <% end %>`.
    Conditional {
        branches: Vec<(String, Vec<TemplateSegment>)>,
        otherwise: Vec<TemplateSegment>,
    },
}

/// A parsed template: a tree of segments.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub segments: Vec<TemplateSegment>,
}

/// Flat tag stream, before block structure is applied.
enum Piece {
    Text(String),
    Interpolate { expr: String, escape: bool },
    Code(String),
}

/// One open `if` block while parsing. `cond` is `None` once inside `else`.
struct OpenBlock {
    branches: Vec<(String, Vec<TemplateSegment>)>,
    cond: Option<String>,
    body: Vec<TemplateSegment>,
}

impl OpenBlock {
    fn open(cond: &str) -> Self {
        Self {
            branches: Vec::new(),
            cond: Some(cond.to_string()),
            body: Vec::new(),
        }
    }

    fn next_branch(&mut self, cond: Option<&str>) -> Result<(), TemplateError> {
        let Some(prev) = self.cond.take() else {
            return Err(TemplateError::Parse(match cond {
                Some(_) => "`elif` after `else`".to_string(),
                None => "duplicate `else`".to_string(),
            }));
        };
        self.branches.push((prev, std::mem::take(&mut self.body)));
        self.cond = cond.map(str::to_string);
        Ok(())
    }

    fn close(mut self) -> TemplateSegment {
        let otherwise = match self.cond.take() {
            Some(cond) => {
                self.branches.push((cond, std::mem::take(&mut self.body)));
                Vec::new()
            }
            None => self.body,
        };
        TemplateSegment::Conditional {
            branches: self.branches,
            otherwise,
        }
    }
}

impl Template {
    /// Parse template source.
    ///
    /// Syntax:
    /// - `<%= expr %>` → interpolate the value
    /// - `<%- expr %>` → interpolate the HTML-escaped value
    /// - `<% if expr %>`, `<% elif expr %>` (or `else if`), `<% else %>`,
    ///   `<% end %>` → conditional blocks
    /// - `<% stmt %>` → any other statement
    /// - An unterminated `<%` is literal text.
    pub fn parse(input: &str) -> Result<Template, TemplateError> {
        let mut root: Vec<TemplateSegment> = Vec::new();
        let mut stack: Vec<OpenBlock> = Vec::new();

        for piece in split_tags(input) {
            let segment = match piece {
                Piece::Text(text) => TemplateSegment::Literal(text),
                Piece::Interpolate { expr, escape } => {
                    if expr.trim().is_empty() {
                        return Err(TemplateError::Parse("empty interpolation".to_string()));
                    }
                    TemplateSegment::Interpolate {
                        expr: expr.trim().to_string(),
                        escape,
                    }
                }
                Piece::Code(code) => {
                    let code = code.trim();
                    if let Some(cond) = keyword_arg(code, "if") {
                        stack.push(OpenBlock::open(cond));
                        continue;
                    }
                    if let Some(cond) =
                        keyword_arg(code, "elif").or_else(|| keyword_arg(code, "else if"))
                    {
                        let block = stack.last_mut().ok_or_else(|| {
                            TemplateError::Parse("`elif` without `if`".to_string())
                        })?;
                        block.next_branch(Some(cond))?;
                        continue;
                    }
                    if code == "else" {
                        let block = stack.last_mut().ok_or_else(|| {
                            TemplateError::Parse("`else` without `if`".to_string())
                        })?;
                        block.next_branch(None)?;
                        continue;
                    }
                    if code == "end" {
                        let block = stack.pop().ok_or_else(|| {
                            TemplateError::Parse("`end` without `if`".to_string())
                        })?;
                        block.close()
                    } else if code.is_empty() {
                        continue;
                    } else {
                        TemplateSegment::Statement(code.to_string())
                    }
                }
            };

            match stack.last_mut() {
                Some(block) => block.body.push(segment),
                None => root.push(segment),
            }
        }

        if !stack.is_empty() {
            return Err(TemplateError::Parse("unclosed `if` block".to_string()));
        }

        Ok(Template { segments: root })
    }

    /// Expand against a scope, returning plain markup.
    pub fn expand(
        &self,
        evaluator: &dyn Evaluator,
        scope: &mut Scope<'_>,
    ) -> Result<String, TemplateError> {
        let mut out = String::new();
        expand_into(&self.segments, evaluator, scope, &mut out)?;
        Ok(out)
    }
}

fn expand_into(
    segments: &[TemplateSegment],
    evaluator: &dyn Evaluator,
    scope: &mut Scope<'_>,
    out: &mut String,
) -> Result<(), TemplateError> {
    for segment in segments {
        match segment {
            TemplateSegment::Literal(text) => out.push_str(text),
            TemplateSegment::Interpolate { expr, escape } => {
                let text = display_value(&evaluator.evaluate(expr, scope)?);
                if *escape {
                    out.push_str(&escape_html(&text));
                } else {
                    out.push_str(&text);
                }
            }
            TemplateSegment::Statement(code) => evaluator.execute(code, scope)?,
            TemplateSegment::Conditional {
                branches,
                otherwise,
            } => {
                let mut taken = false;
                for (cond, body) in branches {
                    if truthy(&evaluator.evaluate(cond, scope)?) {
                        expand_into(body, evaluator, scope, out)?;
                        taken = true;
                        break;
                    }
                }
                if !taken {
                    expand_into(otherwise, evaluator, scope, out)?;
                }
            }
        }
    }
    Ok(())
}

/// `if cond` → `Some("cond")`. The keyword must be followed by whitespace.
fn keyword_arg<'c>(code: &'c str, keyword: &str) -> Option<&'c str> {
    let rest = code.strip_prefix(keyword)?;
    if rest.starts_with(char::is_whitespace) {
        let arg = rest.trim();
        if !arg.is_empty() {
            return Some(arg);
        }
    }
    None
}

fn split_tags(input: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut rest = input;

    while let Some(open) = rest.find("<%") {
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("%>") else {
            break;
        };
        if open > 0 {
            pieces.push(Piece::Text(rest[..open].to_string()));
        }
        let body = &after_open[..close];
        pieces.push(if let Some(expr) = body.strip_prefix('=') {
            Piece::Interpolate {
                expr: expr.to_string(),
                escape: false,
            }
        } else if let Some(expr) = body.strip_prefix('-') {
            Piece::Interpolate {
                expr: expr.to_string(),
                escape: true,
            }
        } else {
            Piece::Code(body.to_string())
        });
        rest = &after_open[close + 2..];
    }

    if !rest.is_empty() {
        pieces.push(Piece::Text(rest.to_string()));
    }
    pieces
}

/// Escape `& < > " '` for safe inclusion in HTML.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::eval::ExpressionEvaluator;
    use crate::schema::passage::{Passage, PassageId};
    use crate::schema::save::StateBag;
    use crate::schema::story::Story;
    use serde_json::Value;

    fn expand(source: &str, state: &mut StateBag) -> Result<String, TemplateError> {
        let story = Story::builder("Templates")
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
        Template::parse(source)?.expand(&ExpressionEvaluator, &mut scope)
    }

    #[test]
    fn parse_literal_only() {
        let t = Template::parse("Hello, world.").unwrap();
        assert_eq!(
            t.segments,
            vec![TemplateSegment::Literal("Hello, world.".to_string())]
        );
    }

    #[test]
    fn parse_interpolations() {
        let t = Template::parse("A <%= x %> B <%- y %>").unwrap();
        assert_eq!(t.segments.len(), 4);
        assert_eq!(
            t.segments[1],
            TemplateSegment::Interpolate {
                expr: "x".to_string(),
                escape: false
            }
        );
        assert_eq!(
            t.segments[3],
            TemplateSegment::Interpolate {
                expr: "y".to_string(),
                escape: true
            }
        );
    }

    #[test]
    fn parse_conditional_tree() {
        let t = Template::parse("<% if a %>1<% elif b %>2<% else %>3<% end %>").unwrap();
        assert_eq!(t.segments.len(), 1);
        match &t.segments[0] {
            TemplateSegment::Conditional {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(branches[1].0, "b");
                assert_eq!(otherwise, &vec![TemplateSegment::Literal("3".to_string())]);
            }
            other => panic!("expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn unterminated_tag_is_literal() {
        let t = Template::parse("odds <% are").unwrap();
        assert_eq!(
            t.segments,
            vec![TemplateSegment::Literal("odds <% are".to_string())]
        );
    }

    #[test]
    fn block_errors() {
        assert!(Template::parse("<% if a %>never closed").is_err());
        assert!(Template::parse("<% end %>").is_err());
        assert!(Template::parse("<% else %>").is_err());
        assert!(Template::parse("<% if a %><% else %><% elif b %><% end %>").is_err());
        assert!(Template::parse("<%= %>").is_err());
    }

    #[test]
    fn expand_interpolation_and_escape() {
        let mut state = StateBag::new();
        state.insert("name".to_string(), Value::from("<Ada>"));
        assert_eq!(
            expand("Hi <%= story.state.name %> / <%- story.state.name %>", &mut state).unwrap(),
            "Hi <Ada> / &lt;Ada&gt;"
        );
    }

    #[test]
    fn expand_conditionals_against_state() {
        let source = "<% if story.state.lamp %>lit<% else if story.state.candle %>dim<% else %>dark<% end %>";
        let mut state = StateBag::new();
        assert_eq!(expand(source, &mut state).unwrap(), "dark");
        state.insert("candle".to_string(), Value::Bool(true));
        assert_eq!(expand(source, &mut state).unwrap(), "dim");
        state.insert("lamp".to_string(), Value::Bool(true));
        assert_eq!(expand(source, &mut state).unwrap(), "lit");
    }

    #[test]
    fn statements_mutate_state() {
        let mut state = StateBag::new();
        let out = expand(
            "<% story.state.visits = 1 %><% story.state.visits += 1 %>Visits: <%= story.state.visits %>",
            &mut state,
        )
        .unwrap();
        assert_eq!(out, "Visits: 2");
        assert_eq!(state["visits"], Value::from(2));
    }

    #[test]
    fn templates_can_produce_link_markup() {
        let mut state = StateBag::new();
        state.insert("exit".to_string(), Value::from("Garden"));
        assert_eq!(
            expand("[[Leave-><%= story.state.exit %>]]", &mut state).unwrap(),
            "[[Leave->Garden]]"
        );
    }

    #[test]
    fn expansion_errors_propagate() {
        let mut state = StateBag::new();
        assert!(matches!(
            expand("<%= missing_helper() %>", &mut state),
            Err(TemplateError::UnknownHelper(_))
        ));
    }

    #[test]
    fn escape_html_all_entities() {
        assert_eq!(escape_html(r#"<a href="x">&'</a>"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;");
    }
}
