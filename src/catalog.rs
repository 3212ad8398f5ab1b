use std::collections::HashMap;

use anyhow::{Result, bail};
use regex::Regex;

/// Placeholder names a command template may reference.
const KNOWN_PLACEHOLDERS: [&str; 3] = ["file", "output", "classname"];

/// One catalog entry: how a submission for this language is named,
/// containerized and invoked.
#[derive(Debug, Clone)]
pub struct Language {
    pub tag: &'static str,
    pub ext: &'static str,
    pub image: &'static str,
    pub command_template: &'static str,
    pub treat_stderr_as_failure: bool,
}

/// Read-only table of supported languages, validated at startup.
pub struct Catalog {
    languages: Vec<Language>,
}

impl Catalog {
    /// The languages this service ships with.
    pub fn builtin() -> Result<Self> {
        Self::new(vec![
            Language {
                tag: "c",
                ext: "c",
                image: "gcc:13",
                command_template: "gcc {file} -o {output} && {output}",
                treat_stderr_as_failure: true,
            },
            Language {
                tag: "cpp",
                ext: "cpp",
                image: "gcc:13",
                command_template: "g++ {file} -o {output} && {output}",
                treat_stderr_as_failure: true,
            },
            Language {
                tag: "python",
                ext: "py",
                image: "python",
                command_template: "python3 {file}",
                treat_stderr_as_failure: false,
            },
            Language {
                tag: "java",
                ext: "java",
                image: "openjdk:17",
                command_template: "javac {file} && java {classname}",
                treat_stderr_as_failure: true,
            },
            Language {
                tag: "node",
                ext: "js",
                image: "node",
                command_template: "node {file}",
                treat_stderr_as_failure: false,
            },
        ])
    }

    /// Builds a catalog, rejecting any template that references an unknown
    /// placeholder.
    pub fn new(languages: Vec<Language>) -> Result<Self> {
        let placeholder_re = Regex::new(r"\{([A-Za-z0-9_]*)\}")?;

        for language in &languages {
            for capture in placeholder_re.captures_iter(language.command_template) {
                let name = &capture[1];
                if !KNOWN_PLACEHOLDERS.contains(&name) {
                    bail!(
                        "language `{}` references unknown placeholder `{{{name}}}` in its command template",
                        language.tag
                    );
                }
            }
        }

        Ok(Self { languages })
    }

    pub fn resolve(&self, tag: &str) -> Option<&Language> {
        self.languages.iter().find(|l| l.tag == tag)
    }
}

/// Values substituted into a command template for one job.
pub struct CommandBinding<'a> {
    pub file: &'a str,
    pub output: &'a str,
    pub classname: &'a str,
}

/// Expands a command template by replacing every occurrence of each
/// placeholder with its bound value.
pub fn expand_template(template: &str, binding: &CommandBinding) -> String {
    let mut mapping = HashMap::<&str, &str>::new();
    mapping.insert("{file}", binding.file);
    mapping.insert("{output}", binding.output);
    mapping.insert("{classname}", binding.classname);

    let mut command = template.to_string();
    for (k, v) in mapping.iter() {
        command = command.replace(k, v);
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding<'a>() -> CommandBinding<'a> {
        CommandBinding {
            file: "prog.c",
            output: "prog.out",
            classname: "Main",
        }
    }

    #[test]
    fn builtin_catalog_is_valid() {
        let catalog = Catalog::builtin().unwrap();
        for tag in ["c", "cpp", "python", "java", "node"] {
            assert!(catalog.resolve(tag).is_some(), "missing language {tag}");
        }
        assert!(catalog.resolve("brainfuck").is_none());
    }

    #[test]
    fn stderr_policy_matches_language_family() {
        let catalog = Catalog::builtin().unwrap();
        for tag in ["c", "cpp", "java"] {
            assert!(catalog.resolve(tag).unwrap().treat_stderr_as_failure);
        }
        for tag in ["python", "node"] {
            assert!(!catalog.resolve(tag).unwrap().treat_stderr_as_failure);
        }
    }

    #[test]
    fn expansion_replaces_every_occurrence() {
        let command = expand_template("gcc {file} -o {output} && {output}", &binding());
        assert_eq!(command, "gcc prog.c -o prog.out && prog.out");
    }

    #[test]
    fn expansion_handles_java_template() {
        let command = expand_template(
            "javac {file} && java {classname}",
            &CommandBinding {
                file: "Greeter.java",
                output: "unused.out",
                classname: "Greeter",
            },
        );
        assert_eq!(command, "javac Greeter.java && java Greeter");
    }

    #[test]
    fn unknown_placeholder_is_rejected() {
        let result = Catalog::new(vec![Language {
            tag: "bogus",
            ext: "x",
            image: "scratch",
            command_template: "run {file} {garbage}",
            treat_stderr_as_failure: false,
        }]);
        assert!(result.is_err());
        let message = result.err().unwrap().to_string();
        assert!(message.contains("{garbage}"), "unexpected error: {message}");
    }
}
