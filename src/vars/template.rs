//! Template rendering and condition evaluation.
//!
//! Variables, module arguments, `when` and `failed_when` conditions, and
//! `loop` expressions are all rendered through one minijinja environment.

use minijinja::{Environment, Value};
use serde_json::Value as JsonValue;

use super::Variables;
use crate::error::{Error, Result};

/// Number of passes used to resolve variables referencing other variables.
const RENDER_PASSES: usize = 3;

/// minijinja environment with kubekit filters.
#[derive(Debug)]
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create an engine with the built-in filters
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        Self::add_filters(&mut env);
        Self { env }
    }

    fn add_filters(env: &mut Environment<'static>) {
        env.add_filter("bool", |value: Value| -> bool {
            if let Some(s) = value.as_str() {
                matches!(
                    s.trim().to_lowercase().as_str(),
                    "true" | "yes" | "on" | "1"
                )
            } else {
                value.is_true()
            }
        });
        env.add_filter("basename", |s: String| -> String {
            std::path::Path::new(&s)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        env.add_filter("dirname", |s: String| -> String {
            std::path::Path::new(&s)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        env.add_filter("to_json", |value: Value| -> String {
            serde_json::to_string(&value).unwrap_or_default()
        });
    }

    /// Check if a string contains template syntax
    pub fn has_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%") || s.contains("{#")
    }

    /// Render a template string
    pub fn render_str(&self, template: &str, vars: &Variables) -> Result<String> {
        if !Self::has_template(template) {
            return Ok(template.to_string());
        }
        self.env
            .render_str(template, Value::from_serialize(vars))
            .map_err(|e| Error::template_render(template, e.to_string()))
    }

    /// Render every string inside a value.
    ///
    /// A rendered string that reads as a YAML scalar or collection keeps that
    /// type, so `"{{ port }}"` becomes a number again.
    pub fn render_value(&self, value: &JsonValue, vars: &Variables) -> Result<JsonValue> {
        match value {
            JsonValue::String(s) if Self::has_template(s) => {
                let rendered = self.render_str(s, vars)?;
                if rendered.trim().is_empty() {
                    return Ok(JsonValue::String(rendered));
                }
                match serde_yaml::from_str::<JsonValue>(&rendered) {
                    Ok(parsed @ (JsonValue::Bool(_) | JsonValue::Number(_))) => Ok(parsed),
                    Ok(parsed @ (JsonValue::Array(_) | JsonValue::Object(_)))
                        if rendered.trim_start().starts_with(['[', '{']) =>
                    {
                        Ok(parsed)
                    }
                    _ => Ok(JsonValue::String(rendered)),
                }
            }
            JsonValue::Array(items) => Ok(JsonValue::Array(
                items
                    .iter()
                    .map(|v| self.render_value(v, vars))
                    .collect::<Result<_>>()?,
            )),
            JsonValue::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, v) in map {
                    out.insert(key.clone(), self.render_value(v, vars)?);
                }
                Ok(JsonValue::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Render a variable mapping against itself until nested references
    /// settle.
    pub fn render_variables(&self, vars: &Variables) -> Result<Variables> {
        let mut current = vars.clone();
        for _ in 0..RENDER_PASSES {
            let mut next = Variables::with_capacity(current.len());
            for (key, value) in &current {
                next.insert(key.clone(), self.render_value(value, &current)?);
            }
            if next == current {
                break;
            }
            current = next;
        }
        Ok(current)
    }

    /// Evaluate a condition.
    ///
    /// Bare expressions (`x == 1`) are compiled as expressions; strings with
    /// `{{ }}` are rendered and read as `true`, `yes`, or `1`.
    pub fn evaluate(&self, condition: &str, vars: &Variables) -> Result<bool> {
        let condition = condition.trim();
        if condition.is_empty() {
            return Ok(true);
        }
        if Self::has_template(condition) {
            let rendered = self.render_str(condition, vars)?;
            return Ok(matches!(
                rendered.trim().to_lowercase().as_str(),
                "true" | "yes" | "1"
            ));
        }
        let expr = self
            .env
            .compile_expression(condition)
            .map_err(|e| Error::template_render(condition, e.to_string()))?;
        let value = expr
            .eval(Value::from_serialize(vars))
            .map_err(|e| Error::template_render(condition, e.to_string()))?;
        Ok(value.is_true())
    }

    /// Whether every condition holds. An empty list holds.
    pub fn evaluate_all(&self, conditions: &[String], vars: &Variables) -> Result<bool> {
        for condition in conditions {
            if !self.evaluate(condition, vars)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate an expression to a value (used for `loop` strings).
    pub fn evaluate_value(&self, expression: &str, vars: &Variables) -> Result<JsonValue> {
        let trimmed = expression.trim();
        let inner = trimmed
            .strip_prefix("{{")
            .and_then(|s| s.strip_suffix("}}"))
            .map(str::trim)
            .unwrap_or(trimmed);
        let expr = self
            .env
            .compile_expression(inner)
            .map_err(|e| Error::template_render(expression, e.to_string()))?;
        let value = expr
            .eval(Value::from_serialize(vars))
            .map_err(|e| Error::template_render(expression, e.to_string()))?;
        if value.is_undefined() {
            return Ok(JsonValue::Null);
        }
        Ok(serde_json::to_value(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::to_variables;
    use serde_json::json;

    fn vars(value: JsonValue) -> Variables {
        to_variables(value).unwrap()
    }

    #[test]
    fn test_render_str() {
        let engine = TemplateEngine::new();
        let v = vars(json!({"name": "node1"}));
        assert_eq!(engine.render_str("host {{ name }}", &v).unwrap(), "host node1");
        assert_eq!(engine.render_str("plain", &v).unwrap(), "plain");
    }

    #[test]
    fn test_render_value_keeps_types() {
        let engine = TemplateEngine::new();
        let v = vars(json!({"port": 6443, "items": [1, 2]}));
        let rendered = engine
            .render_value(
                &json!({"port": "{{ port }}", "list": "{{ items }}", "s": "v{{ port }}"}),
                &v,
            )
            .unwrap();
        assert_eq!(rendered["port"], json!(6443));
        assert_eq!(rendered["list"], json!([1, 2]));
        assert_eq!(rendered["s"], json!("v6443"));
    }

    #[test]
    fn test_render_variables_nested() {
        let engine = TemplateEngine::new();
        let v = vars(json!({
            "version": "1.29",
            "image": "kube:{{ tag }}",
            "tag": "v{{ version }}"
        }));
        let rendered = engine.render_variables(&v).unwrap();
        assert_eq!(rendered["image"], json!("kube:v1.29"));
    }

    #[test]
    fn test_evaluate_expressions() {
        let engine = TemplateEngine::new();
        let v = vars(json!({"x": 1, "os": {"id": "ubuntu"}, "flag": true}));
        assert!(engine.evaluate("x == 1", &v).unwrap());
        assert!(!engine.evaluate("x > 1", &v).unwrap());
        assert!(engine.evaluate("os.id == 'ubuntu'", &v).unwrap());
        assert!(engine.evaluate("flag", &v).unwrap());
        assert!(!engine.evaluate("missing is defined", &v).unwrap());
        assert!(engine.evaluate("{{ x == 1 }}", &v).unwrap());
        assert!(engine.evaluate("", &v).unwrap());
    }

    #[test]
    fn test_evaluate_all() {
        let engine = TemplateEngine::new();
        let v = vars(json!({"x": 1}));
        assert!(engine.evaluate_all(&[], &v).unwrap());
        assert!(engine
            .evaluate_all(&["x == 1".into(), "x < 2".into()], &v)
            .unwrap());
        assert!(!engine
            .evaluate_all(&["x == 1".into(), "x == 2".into()], &v)
            .unwrap());
    }

    #[test]
    fn test_evaluate_value() {
        let engine = TemplateEngine::new();
        let v = vars(json!({"nodes": ["a", "b"]}));
        assert_eq!(engine.evaluate_value("{{ nodes }}", &v).unwrap(), json!(["a", "b"]));
        assert_eq!(engine.evaluate_value("missing", &v).unwrap(), JsonValue::Null);
    }

    #[test]
    fn test_bool_filter() {
        let engine = TemplateEngine::new();
        let v = vars(json!({"enabled": "yes"}));
        assert!(engine.evaluate("enabled | bool", &v).unwrap());
    }

    #[test]
    fn test_invalid_expression() {
        let engine = TemplateEngine::new();
        assert!(engine.evaluate("x ==", &Variables::new()).is_err());
    }
}
