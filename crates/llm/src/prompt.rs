use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PromptError {
    #[error("Template variables must be a JSON object")]
    InvalidVariables,

    #[error("Template rendering failed: {0}")]
    Render(String),
}

/// Pure `(template, variables) -> String` function
pub trait PromptRenderer: Send + Sync {
    fn render(&self, template: &str, variables: &Value) -> Result<String, PromptError>;
}

/// Tera-backed renderer. Output is never HTML-escaped.
#[derive(Debug, Default, Clone, Copy)]
pub struct TeraRenderer;

impl PromptRenderer for TeraRenderer {
    fn render(&self, template: &str, variables: &Value) -> Result<String, PromptError> {
        if !variables.is_object() {
            return Err(PromptError::InvalidVariables);
        }
        let context = tera::Context::from_value(variables.clone())
            .map_err(|e| PromptError::Render(e.to_string()))?;
        tera::Tera::one_off(template, &context, false).map_err(|e| {
            // tera nests the useful message in the source chain
            let mut reason = e.to_string();
            let mut source = std::error::Error::source(&e);
            while let Some(inner) = source {
                reason = format!("{}: {}", reason, inner);
                source = inner.source();
            }
            PromptError::Render(reason)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_renders_loops_and_variables() {
        let rendered = TeraRenderer
            .render(
                "Task: {{ task }}\n{% for p in participants %}- {{ p.name }}\n{% endfor %}",
                &json!({"task": "ship it", "participants": [{"name": "a"}, {"name": "b"}]}),
            )
            .unwrap();
        assert_eq!(rendered, "Task: ship it\n- a\n- b\n");
    }

    #[test]
    fn test_does_not_escape_html() {
        let rendered = TeraRenderer
            .render("{{ body }}", &json!({"body": "<a & b>"}))
            .unwrap();
        assert_eq!(rendered, "<a & b>");
    }

    #[test]
    fn test_rejects_non_object_variables() {
        assert_eq!(
            TeraRenderer.render("x", &json!([1, 2])),
            Err(PromptError::InvalidVariables)
        );
    }

    #[test]
    fn test_reports_missing_variable() {
        let err = TeraRenderer.render("{{ missing }}", &json!({})).unwrap_err();
        assert!(matches!(err, PromptError::Render(_)));
    }
}
