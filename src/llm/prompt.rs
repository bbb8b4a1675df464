use crate::core::errors::ApiError;

/// A prompt with `{name}` placeholders.
///
/// Substituted values are inserted verbatim and never re-scanned, so braces in
/// user text are safe.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: &'static str,
}

enum Piece<'a> {
    Text(&'a str),
    Var(&'a str),
}

impl PromptTemplate {
    pub const fn new(template: &'static str) -> Self {
        Self { template }
    }

    pub fn input_variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for piece in self.pieces() {
            if let Piece::Var(name) = piece {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn format(&self, vars: &[(&str, &str)]) -> Result<String, ApiError> {
        let mut out = String::with_capacity(self.template.len());
        for piece in self.pieces() {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Var(name) => {
                    let value = vars
                        .iter()
                        .find(|(key, _)| *key == name)
                        .map(|(_, value)| *value)
                        .ok_or_else(|| {
                            ApiError::Internal(format!("Missing prompt variable: {}", name))
                        })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }

    fn pieces(&self) -> Vec<Piece<'static>> {
        let template = self.template;
        let mut pieces = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                break;
            };
            let name = &after[..close];
            if is_identifier(name) {
                pieces.push(Piece::Text(&rest[..open]));
                pieces.push(Piece::Var(name));
            } else {
                pieces.push(Piece::Text(&rest[..open + 1 + close + 1]));
            }
            rest = &after[close + 1..];
        }
        pieces.push(Piece::Text(rest));
        pieces
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREETING: PromptTemplate = PromptTemplate::new("Hello {name}, {name}! Ask: {question}");

    #[test]
    fn formats_all_placeholders() {
        let prompt = GREETING
            .format(&[("name", "Ada"), ("question", "why?")])
            .unwrap();
        assert_eq!(prompt, "Hello Ada, Ada! Ask: why?");
    }

    #[test]
    fn lists_unique_input_variables() {
        assert_eq!(GREETING.input_variables(), vec!["name", "question"]);
    }

    #[test]
    fn missing_variable_is_an_error() {
        assert!(GREETING.format(&[("name", "Ada")]).is_err());
    }

    #[test]
    fn values_with_braces_are_not_rescanned() {
        let prompt = GREETING
            .format(&[("name", "{question}"), ("question", "q")])
            .unwrap();
        assert_eq!(prompt, "Hello {question}, {question}! Ask: q");
    }

    #[test]
    fn non_identifier_braces_are_literal() {
        let template = PromptTemplate::new("json: {\"a\": 1} and {x}");
        assert_eq!(template.format(&[("x", "y")]).unwrap(), "json: {\"a\": 1} and y");
    }
}
