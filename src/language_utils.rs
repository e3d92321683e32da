//! Language utilities: ISO 639 code handling and the typesetting
//! requirements of each target script.

use anyhow::{Result, anyhow};
use isolang::Language;

use crate::app_config::LatexEngine;

/// ISO 639-2/B codes that differ from their 639-2/T counterpart
const BIBLIOGRAPHIC_CODES: &[(&str, &str)] = &[
    ("fre", "fra"),
    ("ger", "deu"),
    ("dut", "nld"),
    ("gre", "ell"),
    ("chi", "zho"),
    ("cze", "ces"),
    ("ice", "isl"),
    ("alb", "sqi"),
    ("arm", "hye"),
    ("baq", "eus"),
    ("bur", "mya"),
    ("per", "fas"),
    ("geo", "kat"),
    ("may", "msa"),
    ("mac", "mkd"),
    ("rum", "ron"),
    ("slo", "slk"),
    ("wel", "cym"),
];

/// Resolve a 2- or 3-letter code to an isolang language
fn lookup(code: &str) -> Option<Language> {
    let normalized = code.trim().to_lowercase();
    match normalized.len() {
        2 => Language::from_639_1(&normalized),
        3 => {
            let terminology = BIBLIOGRAPHIC_CODES.iter()
                .find(|(b, _)| *b == normalized)
                .map(|(_, t)| *t)
                .unwrap_or(normalized.as_str());
            Language::from_639_3(terminology)
        }
        _ => None,
    }
}

/// Validate if a language code is a valid ISO 639-1 or ISO 639-2 code
pub fn validate_language_code(code: &str) -> Result<()> {
    lookup(code)
        .map(|_| ())
        .ok_or_else(|| anyhow!("Invalid language code: {}", code))
}

/// Normalize a language code to ISO 639-1 when one exists, else ISO 639-3
pub fn normalize_code(code: &str) -> Result<String> {
    let lang = lookup(code).ok_or_else(|| anyhow!("Cannot normalize invalid language code: {}", code))?;
    Ok(lang.to_639_1()
        .map(|c| c.to_string())
        .unwrap_or_else(|| lang.to_639_3().to_string()))
}

/// Check if two language codes match (represent the same language)
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    match (lookup(code1), lookup(code2)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Get the English language name from a code
pub fn get_language_name(code: &str) -> Result<String> {
    let lang = lookup(code).ok_or_else(|| anyhow!("Failed to get language from code: {}", code))?;
    Ok(lang.to_name().to_string())
}

/// Writing system of a target language, as far as LaTeX cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetScript {
    Chinese,
    Japanese,
    Korean,
    Cyrillic,
    Greek,
    Latin,
}

impl TargetScript {
    /// Script used to typeset the given language code
    pub fn for_language(code: &str) -> Self {
        let normalized = normalize_code(code).unwrap_or_else(|_| code.trim().to_lowercase());
        match normalized.as_str() {
            "zh" => Self::Chinese,
            "ja" => Self::Japanese,
            "ko" => Self::Korean,
            "ru" | "uk" | "be" | "bg" | "sr" | "mk" | "kk" | "ky" | "mn" => Self::Cyrillic,
            "el" => Self::Greek,
            _ => Self::Latin,
        }
    }

    /// Whether this script needs a Unicode engine
    pub fn is_cjk(&self) -> bool {
        matches!(self, Self::Chinese | Self::Japanese | Self::Korean)
    }
}

/// Packages and engine a target script needs in the entry preamble
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptProfile {
    pub script: TargetScript,
    /// `(options, package)` pairs, options may be empty
    pub packages: Vec<(String, String)>,
    pub engine: LatexEngine,
}

impl ScriptProfile {
    /// Profile for a target language code
    pub fn for_language(code: &str) -> Self {
        let script = TargetScript::for_language(code);
        let babel_name = get_language_name(code)
            .map(|name| name.to_lowercase())
            .unwrap_or_else(|_| "english".to_string());

        let pair = |options: &str, package: &str| (options.to_string(), package.to_string());
        let packages = match script {
            TargetScript::Chinese => vec![pair("UTF8", "ctex")],
            TargetScript::Japanese => vec![pair("", "xeCJK")],
            TargetScript::Korean => vec![pair("", "kotex")],
            TargetScript::Cyrillic => vec![pair("T2A", "fontenc"), pair(&babel_name, "babel")],
            TargetScript::Greek => vec![pair("greek", "babel")],
            TargetScript::Latin => Vec::new(),
        };

        let engine = if script.is_cjk() { LatexEngine::Xelatex } else { LatexEngine::Pdf };

        Self { script, packages, engine }
    }

    /// `\usepackage` lines for this profile
    pub fn usepackage_lines(&self) -> Vec<String> {
        self.packages.iter()
            .map(|(options, package)| {
                if options.is_empty() {
                    format!("\\usepackage{{{}}}", package)
                } else {
                    format!("\\usepackage[{}]{{{}}}", options, package)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targetScript_forChinese_shouldBeCjk() {
        assert_eq!(TargetScript::for_language("zh"), TargetScript::Chinese);
        assert_eq!(TargetScript::for_language("chi"), TargetScript::Chinese);
        assert!(TargetScript::for_language("zho").is_cjk());
    }

    #[test]
    fn test_scriptProfile_forChinese_shouldUseCtexAndXelatex() {
        let profile = ScriptProfile::for_language("zh");
        assert_eq!(profile.engine, LatexEngine::Xelatex);
        assert_eq!(profile.usepackage_lines(), vec!["\\usepackage[UTF8]{ctex}".to_string()]);
    }

    #[test]
    fn test_scriptProfile_forRussian_shouldLoadBabelWithLanguage() {
        let profile = ScriptProfile::for_language("ru");
        let lines = profile.usepackage_lines();
        assert!(lines.contains(&"\\usepackage[T2A]{fontenc}".to_string()));
        assert!(lines.contains(&"\\usepackage[russian]{babel}".to_string()));
    }

    #[test]
    fn test_scriptProfile_forFrench_shouldNeedNothing() {
        let profile = ScriptProfile::for_language("fr");
        assert!(profile.packages.is_empty());
        assert_eq!(profile.engine, LatexEngine::Pdf);
    }
}
