//! Detects references to known tool names occurring in *command position*
//! within a shell snippet — the heuristic regex scanner the shell executor
//! consults before spawning a block.

use regex::Regex;

use super::catalog::ToolCatalog;

/// Matches `<catalog-name>` only when it appears in command position: at
/// the start of a line, right after a shell separator (`; & | && || $( `` `
/// `), or right after `xargs`/`sudo`/`env` followed by whitespace. A run of
/// leading `NAME=value` environment-prefix assignments before the tool
/// name is tolerated and skipped (so `FOO=bar tool` still matches), but a
/// bare `tool=value` assignment does not (the name must not be immediately
/// followed by `=`).
fn command_position_pattern(name: &str) -> Regex {
    let escaped = regex::escape(name);
    let pattern = format!(
        r"(?m)(?:^|&&|\|\||[;&|`]|\$\(|\b(?:xargs|sudo|env)\s+)\s*(?:[A-Za-z_][A-Za-z0-9_]*=\S*\s+)*{escaped}\b(?!=)"
    );
    Regex::new(&pattern).expect("command position pattern compiles")
}

/// Returns the subset of catalog names that occur in command position
/// within `command_text`.
pub fn missing_tools(command_text: &str, catalog: &ToolCatalog, is_installed: impl Fn(&str) -> bool) -> Vec<String> {
    catalog
        .names()
        .filter(|name| !is_installed(name))
        .filter(|name| command_position_pattern(name).is_match(command_text))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::catalog::{InstallerKind, ToolEntry};

    fn catalog_with(names: &[&str]) -> ToolCatalog {
        let mut catalog = ToolCatalog::new();
        for name in names {
            catalog.insert(ToolEntry {
                binary_name: name.to_string(),
                package_spec: name.to_string(),
                installer_kind: InstallerKind::Binary,
            });
        }
        catalog
    }

    fn matches(command: &str, name: &str) -> bool {
        command_position_pattern(name).is_match(command)
    }

    #[test]
    fn line_start_matches() {
        assert!(matches("jq .foo file.json", "jq"));
    }

    #[test]
    fn after_pipe_matches() {
        assert!(matches("cat file.json | jq .foo", "jq"));
    }

    #[test]
    fn after_semicolon_matches() {
        assert!(matches("echo hi; jq .foo", "jq"));
    }

    #[test]
    fn after_and_and_matches() {
        assert!(matches("true && jq .foo", "jq"));
    }

    #[test]
    fn after_or_or_matches() {
        assert!(matches("false || jq .foo", "jq"));
    }

    #[test]
    fn inside_command_substitution_matches() {
        assert!(matches("echo $(jq .foo file)", "jq"));
    }

    #[test]
    fn inside_backticks_matches() {
        assert!(matches("echo `jq .foo file`", "jq"));
    }

    #[test]
    fn after_sudo_matches() {
        assert!(matches("sudo jq .foo", "jq"));
    }

    #[test]
    fn after_xargs_matches() {
        assert!(matches("find . | xargs jq .foo", "jq"));
    }

    #[test]
    fn after_env_matches() {
        assert!(matches("env jq .foo", "jq"));
    }

    #[test]
    fn env_prefixed_assignment_matches() {
        assert!(matches("FOO=bar jq .foo", "jq"));
    }

    #[test]
    fn bare_variable_assignment_does_not_match() {
        assert!(!matches("jq=5", "jq"));
    }

    #[test]
    fn string_literal_does_not_match() {
        assert!(!matches("echo 'please run jq'", "jq"));
    }

    #[test]
    fn echo_argument_does_not_match() {
        assert!(!matches("echo jq", "jq"));
    }

    #[test]
    fn for_loop_argument_does_not_match() {
        assert!(!matches("for x in jq; do echo $x; done", "jq"));
    }

    #[test]
    fn missing_tools_filters_already_installed() {
        let catalog = catalog_with(&["jq", "rg"]);
        let found = missing_tools("jq .foo | rg bar", &catalog, |name| name == "rg");
        assert_eq!(found, vec!["jq".to_string()]);
    }

    #[test]
    fn missing_tools_escapes_special_regex_chars_in_name() {
        let mut catalog = ToolCatalog::new();
        catalog.insert(ToolEntry {
            binary_name: "c++".to_string(),
            package_spec: "cpp".to_string(),
            installer_kind: InstallerKind::Binary,
        });
        let found = missing_tools("c++ main.cpp", &catalog, |_| false);
        assert_eq!(found, vec!["c++".to_string()]);
    }
}
