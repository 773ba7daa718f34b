//! Prompt templates rendered from flow state
//!
//! Wraps minijinja with strict undefined handling and a couple of filters
//! used by the business prompts (`money`, `json`, `hashtags`).

use minijinja::{Environment, ErrorKind, Template, UndefinedBehavior};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Prompt rendering errors
#[derive(Debug, Error)]
pub enum PromptError {
    /// Referenced variable doesn't exist in the state
    #[error("template '{template}' uses undefined variable '{name}'{}", .suggestion.as_ref().map(|s| format!(", did you mean '{}'?", s)).unwrap_or_default())]
    UndefinedVariable {
        template: String,
        name: String,
        suggestion: Option<String>,
    },

    #[error("template '{template}' has a syntax error at line {line}: {message}")]
    Syntax {
        template: String,
        line: usize,
        message: String,
    },

    #[error("no template named '{0}'")]
    UnknownTemplate(String),

    #[error("template error: {0}")]
    Render(#[from] minijinja::Error),
}

/// Named prompt templates sharing one environment
pub struct PromptRenderer {
    env: Environment<'static>,
    names: Vec<&'static str>,
}

impl std::fmt::Debug for PromptRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptRenderer")
            .field("templates", &self.names)
            .finish_non_exhaustive()
    }
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("money", money);
        env.add_filter("json", json);
        env.add_filter("hashtags", hashtags);
        Self {
            env,
            names: Vec::new(),
        }
    }

    /// Register a template, checking its syntax
    pub fn add(&mut self, name: &'static str, source: &'static str) -> Result<(), PromptError> {
        self.env
            .add_template(name, source)
            .map_err(|e| PromptError::Syntax {
                template: name.to_string(),
                line: e.line().unwrap_or(0),
                message: e.to_string(),
            })?;
        self.names.push(name);
        Ok(())
    }

    /// Builder form of [`PromptRenderer::add`]
    pub fn with(mut self, name: &'static str, source: &'static str) -> Result<Self, PromptError> {
        self.add(name, source)?;
        Ok(self)
    }

    /// Render a registered template against any serializable context
    pub fn render<C: Serialize>(&self, name: &str, ctx: &C) -> Result<String, PromptError> {
        let tmpl = self
            .env
            .get_template(name)
            .map_err(|_| PromptError::UnknownTemplate(name.to_string()))?;

        tmpl.render(ctx)
            .map(|s| s.trim().to_string())
            .map_err(|e| convert_error(e, &tmpl, ctx))
    }

    pub fn has(&self, name: &str) -> bool {
        self.names.contains(&name)
    }
}

fn convert_error<C: Serialize>(err: minijinja::Error, tmpl: &Template<'_, '_>, ctx: &C) -> PromptError {
    if err.kind() != ErrorKind::UndefinedError {
        return PromptError::Render(err);
    }

    let known: Vec<String> = match serde_json::to_value(ctx) {
        Ok(Value::Object(map)) => map.keys().cloned().collect(),
        _ => Vec::new(),
    };

    // Top-level names the template reads but the context lacks; nested
    // misses fall back to whatever the error message names
    let mut missing: Vec<String> = tmpl
        .undeclared_variables(false)
        .into_iter()
        .filter(|v| !known.contains(v))
        .collect();
    missing.sort();
    let name = missing
        .into_iter()
        .next()
        .or_else(|| variable_in_message(&err.to_string()))
        .unwrap_or_else(|| "unknown".to_string());
    let suggestion = suggest_correction(&name, &known);

    PromptError::UndefinedVariable {
        template: tmpl.name().to_string(),
        name,
        suggestion,
    }
}

/// Messages look like: "undefined value (in tmpl:1): variable is `post`"
fn variable_in_message(msg: &str) -> Option<String> {
    let start = msg.find('`')? + 1;
    let len = msg[start..].find('`')?;
    Some(msg[start..start + len].to_string())
}

/// Closest known name within a small edit distance
pub fn suggest_correction(typo: &str, candidates: &[String]) -> Option<String> {
    let max_distance = (typo.chars().count() / 2).max(2);
    candidates
        .iter()
        .map(|c| (levenshtein(typo, c), c))
        .filter(|(d, _)| *d <= max_distance)
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c.clone())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row[j + 1] = (prev[j + 1] + 1).min(row[j] + 1).min(prev[j] + cost);
        }
        prev = row;
    }

    prev[b.len()]
}

/// 20000.0 -> "20,000"
fn money(value: f64) -> String {
    let rounded = value.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if rounded < 0 {
        out.insert(0, '-');
    }
    out
}

fn json(value: minijinja::Value) -> Result<String, minijinja::Error> {
    serde_json::to_string_pretty(&value)
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
}

/// ["rust", "ai"] -> "#rust #ai"
fn hashtags(tags: Vec<String>) -> String {
    tags.iter()
        .map(|t| format!("#{}", t.trim_start_matches('#')))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn renderer() -> PromptRenderer {
        PromptRenderer::new()
            .with("greet", "Topic: {{ topic }}, budget ${{ budget | money }}")
            .unwrap()
    }

    #[test]
    fn test_render_from_state_snapshot() {
        let out = renderer()
            .render("greet", &json!({"topic": "AI robotics", "budget": 20000.0}))
            .unwrap();
        assert_eq!(out, "Topic: AI robotics, budget $20,000");
    }

    #[test]
    fn test_undefined_variable_suggests_fix() {
        let err = renderer()
            .render("greet", &json!({"topc": "AI", "budget": 1.0}))
            .unwrap_err();
        match err {
            PromptError::UndefinedVariable { name, suggestion, .. } => {
                assert_eq!(name, "topic");
                assert_eq!(suggestion.as_deref(), Some("topc"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_syntax_error_on_add() {
        let err = PromptRenderer::new().add("broken", "{{ topic ").unwrap_err();
        assert!(matches!(err, PromptError::Syntax { ref template, .. } if template == "broken"));
    }

    #[test]
    fn test_unknown_template() {
        let err = renderer().render("missing", &json!({})).unwrap_err();
        assert!(matches!(err, PromptError::UnknownTemplate(_)));
    }

    #[test]
    fn test_json_and_hashtags_filters() {
        let r = PromptRenderer::new()
            .with("post", "{{ post | json }}\n{{ post.hashtags | hashtags }}")
            .unwrap();
        let out = r
            .render(
                "post",
                &json!({"post": {"title": "T", "hashtags": ["rust", "#ai"]}}),
            )
            .unwrap();

        assert!(out.contains("\"title\": \"T\""));
        assert!(out.ends_with("#rust #ai"));
    }

    #[test]
    fn test_money_formatting() {
        assert_eq!(money(0.0), "0");
        assert_eq!(money(999.4), "999");
        assert_eq!(money(1234567.0), "1,234,567");
        assert_eq!(money(-50000.0), "-50,000");
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
