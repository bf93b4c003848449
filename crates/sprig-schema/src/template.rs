//! `{placeholder}` expansion for container patterns, URLs and commands.

use std::collections::BTreeMap;

/// Placeholder values keyed by name (without braces).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vars(BTreeMap<String, String>);

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.0.insert(key.to_owned(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Replace every `{key}` in `template` with its value from `vars`.
/// Unknown placeholders and unbalanced braces are left untouched.
pub fn expand(template: &str, vars: &Vars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_placeholders() {
        let vars = Vars::new().with("env", "my-feature").with("https_port", 3042);
        assert_eq!(expand("{env}-uploads", &vars), "my-feature-uploads");
        assert_eq!(
            expand("https://localhost:{https_port}/", &vars),
            "https://localhost:3042/"
        );
    }

    #[test]
    fn leaves_unknown_and_unbalanced_alone() {
        let vars = Vars::new().with("env", "x");
        assert_eq!(expand("{other}/{env}", &vars), "{other}/x");
        assert_eq!(expand("tail {env", &vars), "tail {env");
        assert_eq!(expand("no braces", &vars), "no braces");
    }
}
