/// Story helper functions — named behaviors callable from passage templates.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use super::passage::{Passage, PassageId};
use super::save::StateBag;
use super::story::Story;

#[derive(Debug, Error)]
pub enum HelperError {
    #[error("expected {expected} argument(s), got {got}")]
    Arity { expected: String, got: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Failed(String),
}

/// What a helper can see and touch while a passage is being expanded.
pub struct HelperContext<'a> {
    pub story: &'a Story,
    pub passage: &'a Passage,
    pub state: &'a mut StateBag,
    pub history: &'a [PassageId],
}

pub type HelperFn = dyn Fn(&mut HelperContext<'_>, &[Value]) -> Result<Value, HelperError>;

/// Named helpers available to templates. Looked up by name only.
#[derive(Default)]
pub struct HelperSet {
    helpers: HashMap<String, Box<HelperFn>>,
}

impl fmt::Debug for HelperSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperSet")
            .field("helpers", &self.names())
            .finish()
    }
}

impl HelperSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A helper set preloaded with `either`, `visited` and `has_visited`.
    pub fn with_builtins(seed: u64) -> Self {
        let mut set = Self::new();

        let rng = RefCell::new(StdRng::seed_from_u64(seed));
        set.register("either", move |_ctx, args| {
            if args.is_empty() {
                return Err(HelperError::Arity {
                    expected: "at least 1".to_string(),
                    got: 0,
                });
            }
            // A single array argument picks among its elements.
            let choices: &[Value] = match args {
                [Value::Array(items)] if !items.is_empty() => items,
                _ => args,
            };
            let index = rng.borrow_mut().gen_range(0..choices.len());
            Ok(choices[index].clone())
        });

        set.register("visited", |ctx, args| {
            let id = visited_target(ctx, args)?;
            let count = id.map_or(0, |id| ctx.history.iter().filter(|h| **h == id).count());
            Ok(Value::from(count as u64))
        });

        set.register("has_visited", |ctx, args| {
            let id = visited_target(ctx, args)?;
            Ok(Value::Bool(
                id.is_some_and(|id| ctx.history.contains(&id)),
            ))
        });

        set
    }

    /// Register a helper. A helper with the same name is replaced.
    pub fn register<F>(&mut self, name: impl Into<String>, helper: F)
    where
        F: Fn(&mut HelperContext<'_>, &[Value]) -> Result<Value, HelperError> + 'static,
    {
        self.helpers.insert(name.into(), Box::new(helper));
    }

    pub fn get(&self, name: &str) -> Option<&HelperFn> {
        self.helpers.get(name).map(|h| h.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.helpers.contains_key(name)
    }

    /// Helper names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.helpers.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Move every helper of `other` into this set, replacing same-named ones.
    pub fn merge(&mut self, other: HelperSet) {
        for (name, helper) in other.helpers {
            self.helpers.insert(name, helper);
        }
    }
}

/// Resolve the single id-or-name argument of `visited`/`has_visited`.
/// Defaults to the passage being rendered.
fn visited_target(
    ctx: &HelperContext<'_>,
    args: &[Value],
) -> Result<Option<PassageId>, HelperError> {
    match args {
        [] => Ok(Some(ctx.passage.id)),
        [Value::Number(n)] => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(|n| Some(PassageId(n)))
            .ok_or_else(|| HelperError::InvalidArgument(format!("not a passage id: {}", n))),
        [Value::String(name)] => Ok(ctx.story.passage_by_name(name).map(|p| p.id)),
        [other] => Err(HelperError::InvalidArgument(format!(
            "expected passage id or name, got {}",
            other
        ))),
        _ => Err(HelperError::Arity {
            expected: "0 or 1".to_string(),
            got: args.len(),
        }),
    }
}
