//! Prompt templates stored next to model files as `<model>.tmpl`.
//!
//! The only supported action is the `{{.Input}}` placeholder (optionally with
//! surrounding spaces and `{{-`/`-}}` whitespace trim markers); the request's
//! prompt is substituted for it.

use crate::error::TemplateError;

#[derive(Clone, Debug, PartialEq)]
enum Part {
    Text(String),
    Input,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PromptTemplate {
    parts: Vec<Part>,
}

impl PromptTemplate {
    pub fn parse(src: &str) -> Result<Self, TemplateError> {
        let mut parts = Vec::new();
        let mut rest = src;
        let mut trim_next = false;

        while let Some(open) = rest.find("{{") {
            let after = &rest[open + 2..];
            let close = after.find("}}").ok_or(TemplateError::Unterminated)?;
            let mut action = &after[..close];

            let mut text = &rest[..open];
            if trim_next {
                text = text.trim_start();
            }
            if let Some(a) = action.strip_prefix('-') {
                text = text.trim_end();
                action = a;
            }
            trim_next = false;
            if let Some(a) = action.strip_suffix('-') {
                trim_next = true;
                action = a;
            }
            if !text.is_empty() {
                parts.push(Part::Text(text.to_owned()));
            }

            match action.trim() {
                ".Input" => parts.push(Part::Input),
                other => return Err(TemplateError::Unsupported(other.to_owned())),
            }
            rest = &after[close + 2..];
        }

        let tail = if trim_next { rest.trim_start() } else { rest };
        if !tail.is_empty() {
            parts.push(Part::Text(tail.to_owned()));
        }
        Ok(Self { parts })
    }

    pub fn render(&self, input: &str) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(t) => out.push_str(t),
                Part::Input => out.push_str(input),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_input() {
        let t = PromptTemplate::parse("### Instruction:\n{{.Input}}\n### Response:\n").unwrap();
        assert_eq!(t.render("hi"), "### Instruction:\nhi\n### Response:\n");
    }

    #[test]
    fn tolerates_spaces_and_repeats() {
        let t = PromptTemplate::parse("{{ .Input }} / {{.Input}}").unwrap();
        assert_eq!(t.render("x"), "x / x");
    }

    #[test]
    fn trim_markers_eat_whitespace() {
        let t = PromptTemplate::parse("Q:  \n {{- .Input -}} \n  A:").unwrap();
        assert_eq!(t.render("why"), "Q:whyA:");
    }

    #[test]
    fn plain_text_has_no_placeholder() {
        let t = PromptTemplate::parse("fixed prompt").unwrap();
        assert_eq!(t.render("ignored"), "fixed prompt");
    }

    #[test]
    fn rejects_other_actions() {
        assert!(matches!(
            PromptTemplate::parse("{{if .System}}x{{end}}"),
            Err(TemplateError::Unsupported(a)) if a == "if .System"
        ));
        assert!(matches!(PromptTemplate::parse("{{.Input"), Err(TemplateError::Unterminated)));
    }
}
