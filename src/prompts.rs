//! Prompt template rendering.
//!
//! Templates live in `PROMPTS_DIR/*.md` and support three directives:
//! `{{ var }}` substitution, `{% include 'file' %}`, and
//! `{% if var %}...{% else %}...{% endif %}` where an empty or
//! whitespace-only value counts as falsy. Built-in templates are embedded
//! so a fresh install works without a prompts directory.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{Error, Result};

const MASTER_PROMPT: &str = include_str!("templates/master_prompt.md");
const REGISTRATION_RULES: &str = include_str!("templates/registration_rules.md");
const CULTURE: &str = include_str!("templates/culture.md");

pub struct PromptEngine {
    dir: PathBuf,
}

impl PromptEngine {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Load a template by file name, preferring an override on disk over
    /// the embedded default.
    fn load(&self, name: &str) -> Result<String> {
        let path = self.dir.join(name);
        if path.is_file() {
            return Ok(std::fs::read_to_string(path)?);
        }
        match name {
            "master_prompt.md" => Ok(MASTER_PROMPT.to_string()),
            "registration_rules.md" => Ok(REGISTRATION_RULES.to_string()),
            "culture.md" => Ok(CULTURE.to_string()),
            _ => Err(Error::NotFound),
        }
    }

    pub fn render_template(&self, name: &str, vars: &HashMap<String, String>) -> Result<String> {
        let template = self.load(name)?;
        render(&template, vars, self, 0)
    }

    /// The system prompt returned from `register`, identifying the agent
    /// and its operator.
    #[allow(clippy::too_many_arguments)]
    pub fn render_master_prompt(
        &self,
        agent_name: &str,
        agent_type: &str,
        project_name: &str,
        project_channel: &str,
        operator_name: &str,
        operator_display_name: &str,
        operator_about: &str,
        operator_instructions: &str,
    ) -> Result<String> {
        let mut vars = HashMap::new();
        vars.insert("agent_name".to_string(), agent_name.to_string());
        vars.insert("agent_type".to_string(), agent_type.to_string());
        vars.insert("project_name".to_string(), project_name.to_string());
        vars.insert("project_channel".to_string(), project_channel.to_string());
        vars.insert("operator_name".to_string(), operator_name.to_string());
        vars.insert(
            "operator_display_name".to_string(),
            operator_display_name.to_string(),
        );
        vars.insert("operator_about".to_string(), operator_about.to_string());
        vars.insert(
            "operator_instructions".to_string(),
            operator_instructions.to_string(),
        );
        self.render_template("master_prompt.md", &vars)
    }

    /// The follow-up instructions an agent receives right after
    /// registration.
    pub fn render_registration_rules(
        &self,
        agent_name: &str,
        project_channel: &str,
    ) -> Result<String> {
        let mut vars = HashMap::new();
        vars.insert("agent_name".to_string(), agent_name.to_string());
        vars.insert("project_channel".to_string(), project_channel.to_string());
        self.render_template("registration_rules.md", &vars)
    }
}

fn truthy(value: Option<&String>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

/// One rendering pass over a template. `depth` bounds include recursion.
fn render(
    template: &str,
    vars: &HashMap<String, String>,
    engine: &PromptEngine,
    depth: u8,
) -> Result<String> {
    if depth > 8 {
        return Err(Error::Validation("template include depth exceeded".to_string()));
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = match (rest.find("{%"), rest.find("{{")) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    } {
        out.push_str(&rest[..start]);
        rest = &rest[start..];

        if let Some(stripped) = rest.strip_prefix("{{") {
            let end = stripped
                .find("}}")
                .ok_or_else(|| Error::Validation("unterminated {{ }}".to_string()))?;
            let var = stripped[..end].trim();
            if let Some(value) = vars.get(var) {
                out.push_str(value);
            }
            rest = &stripped[end + 2..];
            continue;
        }

        // {% ... %} directive
        let stripped = &rest[2..];
        let end = stripped
            .find("%}")
            .ok_or_else(|| Error::Validation("unterminated {% %}".to_string()))?;
        let directive = stripped[..end].trim();
        rest = &stripped[end + 2..];

        if let Some(path) = directive
            .strip_prefix("include ")
            .map(|p| p.trim().trim_matches('\'').trim_matches('"'))
        {
            let included = engine.load(path)?;
            out.push_str(&render(&included, vars, engine, depth + 1)?);
        } else if let Some(var) = directive.strip_prefix("if ") {
            let (body, else_body, after) = split_if_block(rest)?;
            let chosen = if truthy(vars.get(var.trim())) { body } else { else_body };
            out.push_str(&render(chosen, vars, engine, depth)?);
            rest = after;
        } else {
            return Err(Error::Validation(format!("unknown template directive: {directive}")));
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// Split the text following `{% if %}` into (if-body, else-body, remainder),
/// honouring nested if blocks.
fn split_if_block(text: &str) -> Result<(&str, &str, &str)> {
    let mut depth = 0usize;
    let mut else_at: Option<usize> = None;
    let mut pos = 0usize;

    while let Some(offset) = text[pos..].find("{%") {
        let start = pos + offset;
        let after = &text[start + 2..];
        let end = after
            .find("%}")
            .ok_or_else(|| Error::Validation("unterminated {% %}".to_string()))?;
        let directive = after[..end].trim();
        let next = start + 2 + end + 2;

        if directive.starts_with("if ") {
            depth += 1;
        } else if directive == "else" && depth == 0 && else_at.is_none() {
            else_at = Some(start);
        } else if directive == "endif" {
            if depth == 0 {
                let body_end = else_at.unwrap_or(start);
                let body = &text[..body_end];
                let else_body = match else_at {
                    // Skip past the "{% else %}" marker itself.
                    Some(e) => {
                        let marker_end = text[e..].find("%}").unwrap() + e + 2;
                        &text[marker_end..start]
                    }
                    None => "",
                };
                return Ok((body, else_body, &text[next..]));
            }
            depth -= 1;
        }
        pos = next;
    }

    Err(Error::Validation("missing {% endif %}".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PromptEngine {
        PromptEngine::new(PathBuf::from("/nonexistent"))
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_substitution() {
        let out = render("hi {{ name }}!", &vars(&[("name", "otter")]), &engine(), 0).unwrap();
        assert_eq!(out, "hi otter!");
    }

    #[test]
    fn test_missing_var_renders_empty() {
        let out = render("[{{ nope }}]", &vars(&[]), &engine(), 0).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_if_truthy() {
        let t = "{% if x %}yes{% endif %}";
        assert_eq!(render(t, &vars(&[("x", "1")]), &engine(), 0).unwrap(), "yes");
        assert_eq!(render(t, &vars(&[("x", "   ")]), &engine(), 0).unwrap(), "");
        assert_eq!(render(t, &vars(&[]), &engine(), 0).unwrap(), "");
    }

    #[test]
    fn test_if_else() {
        let t = "{% if x %}a{% else %}b{% endif %}";
        assert_eq!(render(t, &vars(&[("x", "v")]), &engine(), 0).unwrap(), "a");
        assert_eq!(render(t, &vars(&[]), &engine(), 0).unwrap(), "b");
    }

    #[test]
    fn test_nested_if() {
        let t = "{% if a %}1{% if b %}2{% endif %}3{% endif %}";
        assert_eq!(
            render(t, &vars(&[("a", "x"), ("b", "y")]), &engine(), 0).unwrap(),
            "123"
        );
        assert_eq!(render(t, &vars(&[("a", "x")]), &engine(), 0).unwrap(), "13");
    }

    #[test]
    fn test_master_prompt_identity() {
        let out = engine()
            .render_master_prompt(
                "cosmic-penguin",
                "opencode",
                "talkto",
                "#project-talkto",
                "",
                "",
                "",
                "",
            )
            .unwrap();
        assert!(out.contains("cosmic-penguin"));
        assert!(out.contains("opencode"));
        assert!(out.contains("talkto"));
        assert!(out.contains("TalkTo"));
        assert!(out.contains("No human has onboarded yet"));
    }

    #[test]
    fn test_master_prompt_operator() {
        let out = engine()
            .render_master_prompt(
                "turbo-flamingo",
                "claude",
                "myapp",
                "#project-myapp",
                "yash",
                "Yash",
                "I build cool things.",
                "Be helpful and concise.",
            )
            .unwrap();
        assert!(out.contains("Yash"));
        assert!(out.contains("I build cool things."));
        assert!(out.contains("Be helpful and concise."));
    }

    #[test]
    fn test_master_prompt_culture_and_profile() {
        let out = engine()
            .render_master_prompt("sneaky-bat", "opencode", "test", "#project-test", "", "", "", "")
            .unwrap();
        assert!(out.contains("Workplace Culture"));
        assert!(out.to_lowercase().contains("banter"));
        assert!(out.contains("MANDATORY"));
        assert!(out.contains("update_profile"));
    }

    #[test]
    fn test_registration_rules() {
        let out = engine()
            .render_registration_rules("cosmic-penguin", "#project-talkto")
            .unwrap();
        assert!(out.contains("cosmic-penguin"));
        assert!(out.contains("#project-talkto"));
        assert!(out.contains("FIRST THINGS FIRST"));
        assert!(out.contains("session_id"));
        assert!(out.contains("AGENTS.md"));
        assert!(out.contains("Org-wide"));
    }

    #[test]
    fn test_disk_override_wins() {
        let dir = std::env::temp_dir().join(format!("talkto-prompts-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("master_prompt.md"), "custom for {{ agent_name }}").unwrap();
        let engine = PromptEngine::new(dir.clone());
        let out = engine
            .render_master_prompt("quick-fox", "opencode", "p", "#project-p", "", "", "", "")
            .unwrap();
        assert_eq!(out, "custom for quick-fox");
        std::fs::remove_dir_all(dir).ok();
    }
}
