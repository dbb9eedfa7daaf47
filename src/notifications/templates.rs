use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}").unwrap();
}

/// A named title/body pair with `{{key}}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub name: String,
    pub title: String,
    pub body: String,
}

impl MessageTemplate {
    pub fn new(name: &str, title: &str, body: &str) -> Self {
        Self {
            name: name.to_string(),
            title: title.to_string(),
            body: body.to_string(),
        }
    }

    pub fn render(&self, values: &HashMap<String, String>) -> (String, String) {
        (render(&self.title, values), render(&self.body, values))
    }
}

/// Substitute `{{key}}` placeholders. Unknown keys are left verbatim.
pub fn render(template: &str, values: &HashMap<String, String>) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| match values.get(&caps[1]) {
            Some(v) => v.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Registry of named templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, MessageTemplate>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the templates the automation jobs use.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for t in [
            MessageTemplate::new(
                "job_failed",
                "Job failed: {{job}}",
                "Job '{{job}}' failed after {{duration_ms}} ms ({{trigger}} run).\n\n{{error}}",
            ),
            MessageTemplate::new(
                "deployment_succeeded",
                "Deployed {{environment}}",
                "Deployment {{id}} of branch {{branch}} ({{commit}}) to {{environment}} on {{platform}} succeeded.",
            ),
            MessageTemplate::new(
                "deployment_failed",
                "Deployment to {{environment}} failed",
                "Deployment {{id}} of branch {{branch}} failed in state {{state}}: {{error}}",
            ),
            MessageTemplate::new(
                "health_breach",
                "Health threshold breached: {{check}}",
                "{{check}} is at {{value}} (threshold {{threshold}}).",
            ),
            MessageTemplate::new(
                "welcome",
                "Welcome, {{name}}!",
                "Hi {{name}}, thanks for joining. Your first lesson is waiting for you.",
            ),
            MessageTemplate::new(
                "lesson_completed",
                "Nice work, {{name}}",
                "You completed {{lesson}}. Keep the streak going!",
            ),
            MessageTemplate::new(
                "inactivity_reminder",
                "We miss you, {{name}}",
                "It has been {{days}} days since your last lesson. Pick up where you left off.",
            ),
            MessageTemplate::new(
                "milestone",
                "Milestone unlocked: {{milestone}}",
                "Congratulations {{name}}, you reached {{milestone}}.",
            ),
            MessageTemplate::new(
                "weekly_summary",
                "Your week in review",
                "Hi {{name}}, this week you completed {{lessons}} lessons across {{active_days}} active days.",
            ),
        ] {
            registry.register(t);
        }
        registry
    }

    pub fn register(&mut self, template: MessageTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    pub fn get(&self, name: &str) -> Option<&MessageTemplate> {
        self.templates.get(name)
    }

    pub fn render(&self, name: &str, values: &HashMap<String, String>) -> Option<(String, String)> {
        self.get(name).map(|t| t.render(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_substitutes_known_keys() {
        let out = render("Hello {{name}}, you have {{ count }} items", &values(&[("name", "Ada"), ("count", "3")]));
        assert_eq!(out, "Hello Ada, you have 3 items");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let out = render("Hi {{name}}, see {{link}}", &values(&[("name", "Ada")]));
        assert_eq!(out, "Hi Ada, see {{link}}");
    }

    #[test]
    fn test_registry_renders_builtin() {
        let registry = TemplateRegistry::with_builtin();
        let (title, body) = registry
            .render("inactivity_reminder", &values(&[("name", "Bo"), ("days", "7")]))
            .unwrap();
        assert_eq!(title, "We miss you, Bo");
        assert!(body.contains("7 days"));
        assert!(registry.render("missing", &HashMap::new()).is_none());
    }
}
