use std::collections::BTreeMap;
use std::path::Path;

use rigger_domain::VariableTree;
use serde::Serialize;

use crate::error::RenderError;

/// Suffix stripped from template file names when rendering.
pub const TEMPLATE_SUFFIX: &str = ".tmpl";

/// Values exposed to templates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RenderContext {
    pub vars: VariableTree,
    pub tags: BTreeMap<String, String>,
    pub template_repo: Option<String>,
    pub template_version: Option<String>,
    pub template_dir: Option<String>,
    pub terraform: Option<TerraformContext>,
    pub ansible: Option<AnsibleContext>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TerraformContext {
    pub backend: Option<BackendContext>,
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackendContext {
    #[serde(rename = "type")]
    pub kind: String,
    pub path: Option<String>,
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnsibleContext {
    pub inventory_file: Option<String>,
    pub playbook_file: Option<String>,
    pub roles_dir: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Delimiter {
    open: &'static str,
    close: &'static str,
    tera_open: &'static str,
    tera_close: &'static str,
}

const DELIMITERS: [Delimiter; 3] = [
    Delimiter {
        open: "[[",
        close: "]]",
        tera_open: "{{",
        tera_close: "}}",
    },
    Delimiter {
        open: "[%",
        close: "%]",
        tera_open: "{%",
        tera_close: "%}",
    },
    Delimiter {
        open: "[#",
        close: "#]",
        tera_open: "{#",
        tera_close: "#}",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

/// Translate bracket delimiters into Tera syntax.
///
/// `[[ expr ]]`, `[% tag %]` and `[# comment #]` become their Tera
/// counterparts. Tera delimiters occurring in plain text are emitted as string
/// literals so Terraform, Jinja and Ansible syntax pass through untouched.
///
/// # Errors
///
/// Returns an error for a tag that is opened but never closed.
pub fn translate_delimiters(source: &str) -> Result<String, SyntaxError> {
    let mut output = String::with_capacity(source.len() + source.len() / 8);
    let mut rest = source;
    let mut line = 1;

    while let Some((index, delimiter)) = next_open(rest) {
        let literal = &rest[..index];
        push_literal(&mut output, literal, true);
        line += literal.matches('\n').count();

        let after_open = &rest[index + delimiter.open.len()..];
        let Some(end) = after_open.find(delimiter.close) else {
            return Err(SyntaxError {
                line,
                message: format!(
                    "unclosed \"{}\": expected a matching \"{}\"",
                    delimiter.open, delimiter.close
                ),
            });
        };
        let inner = &after_open[..end];
        output.push_str(delimiter.tera_open);
        output.push_str(inner);
        output.push_str(delimiter.tera_close);
        line += inner.matches('\n').count();
        rest = &after_open[end + delimiter.close.len()..];
    }

    push_literal(&mut output, rest, false);
    Ok(output)
}

fn next_open(text: &str) -> Option<(usize, Delimiter)> {
    DELIMITERS
        .iter()
        .filter_map(|delimiter| text.find(delimiter.open).map(|index| (index, *delimiter)))
        .min_by_key(|(index, _)| *index)
}

fn push_literal(output: &mut String, literal: &str, followed_by_tag: bool) {
    let mut chars = literal.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '{' {
            output.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some(next @ ('{' | '%' | '#')) => {
                output.push_str("{{ \"{");
                output.push(next);
                output.push_str("\" }}");
                let _ = chars.next();
            }
            // A trailing `{` would fuse with the translated tag that follows.
            None if followed_by_tag => output.push_str("{{ \"{\" }}"),
            _ => output.push(c),
        }
    }
}

/// Strip the template suffix from a file name, if present.
#[must_use]
pub fn output_file_name(name: &str) -> &str {
    name.strip_suffix(TEMPLATE_SUFFIX).unwrap_or(name)
}

/// Renders template sources against a fixed context.
pub struct TemplateRenderer {
    context: tera::Context,
}

impl TemplateRenderer {
    /// Build a renderer for `context`.
    ///
    /// # Errors
    ///
    /// Returns an error when the context cannot be converted for Tera.
    pub fn new(context: &RenderContext) -> Result<Self, RenderError> {
        let context = tera::Context::from_serialize(context)
            .map_err(|source| RenderError::Context { source })?;
        Ok(Self { context })
    }

    /// Parse and render one template. `path` only labels errors.
    ///
    /// # Errors
    ///
    /// Returns an error when delimiters are unbalanced, Tera rejects the
    /// template, or rendering fails (e.g. an undefined variable).
    pub fn render(&self, path: &Path, source: &str) -> Result<String, RenderError> {
        let translated =
            translate_delimiters(source).map_err(|error| RenderError::TemplateSyntax {
                path: path.to_path_buf(),
                line: error.line,
                message: error.message,
            })?;

        let name = path.to_string_lossy();
        let mut tera = tera::Tera::default();
        tera.autoescape_on(Vec::new());
        tera.add_raw_template(&name, &translated)
            .map_err(|source| RenderError::TemplateParse {
                path: path.to_path_buf(),
                source,
            })?;
        tera.render(&name, &self.context)
            .map_err(|source| RenderError::TemplateRender {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::path::Path;

    use rigger_domain::{Value, VariableTree};

    use super::{
        RenderContext, TemplateRenderer, TerraformContext, output_file_name,
        translate_delimiters,
    };
    use crate::error::RenderError;

    fn context() -> RenderContext {
        let mut vars = VariableTree::new();
        vars.insert("region".to_string(), Value::from("fsn1"));
        vars.insert("optional".to_string(), Value::Null);
        vars.insert(
            "servers".to_string(),
            Value::Sequence(vec![Value::from("web"), Value::from("db")]),
        );
        RenderContext {
            vars,
            terraform: Some(TerraformContext {
                backend: None,
                providers: vec!["hcloud".to_string()],
            }),
            ..RenderContext::default()
        }
    }

    fn render(source: &str) -> Result<String, RenderError> {
        TemplateRenderer::new(&context())
            .expect("renderer")
            .render(Path::new("test.tf.tmpl"), source)
    }

    #[test]
    fn null_variables_are_falsy() {
        let rendered = render("[% if vars.optional %]set[% else %]unset[% endif %]").expect("render");
        assert_eq!(rendered, "unset");
    }

    #[test]
    fn translates_bracket_delimiters() {
        let translated =
            translate_delimiters("a [[ x ]] [% if y %]b[% endif %][# note #]").expect("translate");
        assert_eq!(translated, "a {{ x }} {% if y %}b{% endif %}{# note #}");
    }

    #[test]
    fn escapes_tera_delimiters_in_plain_text() {
        let translated = translate_delimiters("{{ item }} {% raw %} {# c #}").expect("translate");
        assert_eq!(
            translated,
            "{{ \"{{\" }} item }} {{ \"{%\" }} raw %} {{ \"{#\" }} c #}"
        );
    }

    #[test]
    fn reports_line_of_unclosed_tag() {
        let error = translate_delimiters("one\ntwo\nthree [[ broken\n").expect_err("unclosed");
        assert_eq!(error.line, 3);
        assert!(error.message.contains("\"]]\""), "unexpected: {}", error.message);
    }

    #[test]
    fn renders_variables_loops_and_filters() {
        let rendered = render(
            "location = \"[[ vars.region | upper ]]\"\n[% for s in vars.servers %][[ s ]];[% endfor %]",
        )
        .expect("render");
        assert_eq!(rendered, "location = \"FSN1\"\nweb;db;");
    }

    #[test]
    fn leaves_terraform_and_jinja_syntax_untouched() {
        let source = "name = \"${var.prefix}-[[ vars.region ]]\"\n- debug: msg=\"{{ item }}\"\n%{ if x }ok%{ endif }\n{";
        let rendered = render(source).expect("render");
        assert_eq!(
            rendered,
            "name = \"${var.prefix}-fsn1\"\n- debug: msg=\"{{ item }}\"\n%{ if x }ok%{ endif }\n{"
        );
    }

    #[test]
    fn brace_directly_before_tag_is_preserved() {
        let rendered = render("{[[ vars.region ]]}").expect("render");
        assert_eq!(rendered, "{fsn1}");
    }

    #[test]
    fn exposes_terraform_context() {
        let rendered = render("[% if \"hcloud\" in terraform.providers %]hcloud[% endif %]")
            .expect("render");
        assert_eq!(rendered, "hcloud");
    }

    #[test]
    fn undefined_variable_is_a_render_error() {
        let error = render("[[ vars.missing ]]").expect_err("undefined");
        assert!(matches!(error, RenderError::TemplateRender { .. }));
    }

    #[test]
    fn invalid_tag_is_a_parse_error() {
        let error = render("[% if %]").expect_err("parse");
        assert!(matches!(error, RenderError::TemplateParse { .. }));
    }

    #[test]
    fn strips_template_suffix() {
        assert_eq!(output_file_name("main.tf.tmpl"), "main.tf");
        assert_eq!(output_file_name("README.md"), "README.md");
    }
}
