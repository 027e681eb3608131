// src/description/settings.rs

//! Build setting resolution and `$(NAME)` expansion.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use blake3::Hasher;
use regex::{Captures, Regex};

use crate::config::model::ProjectModel;
use crate::errors::{BuildError, Result};
use crate::types::BuildParameters;

/// Settings that never change produced bytes.
pub const DEFAULT_OUTPUT_AGNOSTIC_SETTINGS: &[&str] = &[
    "COLOR_DIAGNOSTICS",
    "DIAGNOSTIC_FORMAT",
    "INDEX_STORE_PATH",
    "INDEX_ENABLE_DATA_STORE",
    "SHOW_TIMING",
];

const MACRO_PATTERN: &str = r"\$\(([A-Za-z_][A-Za-z0-9_]*)\)";

/// Default set extended by the project's `engine.output_agnostic_settings`.
pub fn output_agnostic_settings(project: &ProjectModel) -> BTreeSet<String> {
    DEFAULT_OUTPUT_AGNOSTIC_SETTINGS
        .iter()
        .map(|s| s.to_string())
        .chain(project.engine.output_agnostic_settings.iter().cloned())
        .collect()
}

/// Compiled macro matcher, shared by every target's settings.
#[derive(Debug, Clone)]
pub struct MacroExpander {
    pattern: Regex,
    whole: Regex,
}

impl MacroExpander {
    pub fn new() -> Result<Self> {
        let compile = |p: &str| {
            Regex::new(p).map_err(|e| BuildError::ConfigError(format!("invalid macro pattern: {e}")))
        };
        Ok(Self {
            pattern: compile(MACRO_PATTERN)?,
            whole: compile(&format!("^{MACRO_PATTERN}$"))?,
        })
    }
}

/// Fully resolved settings of one target under one set of build parameters.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    values: BTreeMap<String, String>,
    agnostic: BTreeSet<String>,
    expander: MacroExpander,
}

impl ResolvedSettings {
    /// Resolve settings for `target`.
    ///
    /// Precedence, lowest first: project settings, the active configuration's
    /// settings, target settings, request overrides. Builtins are set first
    /// and can be overridden only by request overrides.
    pub fn resolve(
        project: &ProjectModel,
        target: &str,
        parameters: &BuildParameters,
        agnostic: &BTreeSet<String>,
        expander: &MacroExpander,
    ) -> Result<Self> {
        let target_cfg = project
            .target
            .get(target)
            .ok_or_else(|| BuildError::TaskNotFound(target.to_string()))?;

        let build_root = project.build_root();
        let build_dir = build_root.join(&parameters.configuration);

        let mut values = BTreeMap::new();
        values.extend(project.settings.clone());
        if let Some(cfg) = project.configurations.get(&parameters.configuration) {
            values.extend(cfg.clone());
        }
        values.extend(target_cfg.settings.clone());

        let builtins = [
            ("TARGET_NAME", target.to_string()),
            ("CONFIGURATION", parameters.configuration.clone()),
            ("PROJECT_DIR", path_string(&project.project_dir)),
            ("BUILD_ROOT", path_string(&build_root)),
            ("BUILD_DIR", path_string(&build_dir)),
        ];
        for (name, value) in builtins {
            values.insert(name.to_string(), value);
        }
        values.extend(parameters.overrides.clone());

        Ok(Self {
            values,
            agnostic: agnostic.clone(),
            expander: expander.clone(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Settings that can influence produced bytes, sorted by name.
    pub fn relevant(&self) -> BTreeMap<&str, &str> {
        self.values
            .iter()
            .filter(|(k, _)| !self.agnostic.contains(k.as_str()))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// Signature of the output-relevant settings; the parameter half of a
    /// configured target's identity.
    pub fn parameter_signature(&self) -> String {
        let mut hasher = Hasher::new();
        for (k, v) in self.relevant() {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"\n");
        }
        hasher.finalize().to_hex().to_string()
    }

    fn value_of(&self, name: &str, blank_agnostic: bool) -> &str {
        if blank_agnostic && self.agnostic.contains(name) {
            return "";
        }
        self.get(name).unwrap_or("")
    }

    /// Expand every `$(NAME)` in `s`. Unknown names expand to "".
    pub fn expand(&self, s: &str, blank_agnostic: bool) -> String {
        self.expander
            .pattern
            .replace_all(s, |caps: &Captures<'_>| {
                self.value_of(&caps[1], blank_agnostic).to_string()
            })
            .into_owned()
    }

    /// Expand a list of command tokens. A token that is exactly `$(NAME)`
    /// splits the value on whitespace; an empty value yields no argument.
    pub fn expand_tokens(&self, tokens: &[String], blank_agnostic: bool) -> Vec<String> {
        let mut out = Vec::with_capacity(tokens.len());
        for token in tokens {
            if let Some(caps) = self.expander.whole.captures(token) {
                out.extend(
                    self.value_of(&caps[1], blank_agnostic)
                        .split_whitespace()
                        .map(str::to_string),
                );
            } else {
                out.push(self.expand(token, blank_agnostic));
            }
        }
        out
    }

    pub fn expand_map(
        &self,
        map: &BTreeMap<String, String>,
        blank_agnostic: bool,
    ) -> BTreeMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.expand(v, blank_agnostic)))
            .collect()
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_from_str;

    fn settings(overrides: &[(&str, &str)]) -> ResolvedSettings {
        let project = load_from_str(
            r#"
            [settings]
            OTHER_CFLAGS = "-O0 -g"
            COLOR_DIAGNOSTICS = "NO"
            [configurations.Release]
            OTHER_CFLAGS = "-O2"
            [target.App]
            [target.App.settings]
            PRODUCT = "App"
            "#,
            "/proj",
        )
        .unwrap();
        let mut params = BuildParameters::new("Debug");
        for (k, v) in overrides {
            params = params.with_override(*k, *v);
        }
        let agnostic = output_agnostic_settings(&project);
        let expander = MacroExpander::new().unwrap();
        ResolvedSettings::resolve(&project, "App", &params, &agnostic, &expander).unwrap()
    }

    #[test]
    fn builtins_and_precedence() {
        let s = settings(&[("PRODUCT", "Override")]);
        assert_eq!(s.get("BUILD_DIR"), Some("/proj/build/Debug"));
        assert_eq!(s.get("TARGET_NAME"), Some("App"));
        assert_eq!(s.get("PRODUCT"), Some("Override"));
        assert_eq!(s.get("OTHER_CFLAGS"), Some("-O0 -g"));
    }

    #[test]
    fn whole_token_macro_splits_on_whitespace() {
        let s = settings(&[]);
        let tokens = vec![
            "cc".to_string(),
            "$(OTHER_CFLAGS)".to_string(),
            "-o$(BUILD_DIR)/x.o".to_string(),
            "$(UNSET)".to_string(),
        ];
        assert_eq!(
            s.expand_tokens(&tokens, false),
            vec!["cc", "-O0", "-g", "-o/proj/build/Debug/x.o"]
        );
    }

    #[test]
    fn agnostic_settings_do_not_touch_the_parameter_signature() {
        let base = settings(&[]);
        let colored = settings(&[("COLOR_DIAGNOSTICS", "YES")]);
        let optimised = settings(&[("OTHER_CFLAGS", "-O3")]);
        assert_eq!(base.parameter_signature(), colored.parameter_signature());
        assert_ne!(base.parameter_signature(), optimised.parameter_signature());
        assert_eq!(colored.expand("x$(COLOR_DIAGNOSTICS)", true), "x");
        assert_eq!(colored.expand("x$(COLOR_DIAGNOSTICS)", false), "xYES");
    }
}
