/*!
 * Deterministic rescue strategies.
 *
 * 1. Replace the entry preamble with a minimal one for the target script.
 * 2. Strategy 1, plus removal of float environments from translated documents.
 *
 * Both strategies are idempotent.
 */

use log::info;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::language_utils::{ScriptProfile, TargetScript};

use super::{Rescuer, WorkingTree};

const BEGIN_DOCUMENT: &str = "\\begin{document}";

const FLOAT_ENVIRONMENTS: [&str; 6] = ["figure", "table", "algorithm", "wrapfigure", "sidewaysfigure", "listing"];

static FLOATS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    FLOAT_ENVIRONMENTS.iter()
        .flat_map(|name| [name.to_string(), format!("{}*", name)])
        .map(|name| {
            let escaped = regex::escape(&name);
            let pattern = format!(r"(?s)\\begin\{{{0}\}}.*?\\end\{{{0}\}}", escaped);
            let label = FLOAT_ENVIRONMENTS.iter()
                .find(|base| name.trim_end_matches('*') == **base)
                .copied()
                .unwrap_or("float");
            (label, Regex::new(&pattern).expect("valid regex"))
        })
        .collect()
});

const FRONT_MATTER_STUBS: &str = r"\providecommand{\keywords}[1]{\textbf{Keywords:} #1}
\providecommand{\email}[1]{\texttt{#1}}
\providecommand{\address}[1]{#1}
\providecommand{\affiliation}[1]{#1}
\providecommand{\corresp}[1]{#1}
\providecommand{\orcid}[1]{}
";

/// Safe-preamble and float-stripping rescuer
#[derive(Debug, Clone)]
pub struct PreambleRescuer {
    profile: ScriptProfile,
}

impl PreambleRescuer {
    pub fn new(profile: ScriptProfile) -> Self {
        Self { profile }
    }

    pub fn for_language(code: &str) -> Self {
        Self::new(ScriptProfile::for_language(code))
    }

    /// Minimal preamble known to compile with the target script
    pub fn safe_preamble(&self) -> String {
        let mut preamble = String::from("\\documentclass[11pt,a4paper]{article}\n");
        match self.profile.script {
            TargetScript::Chinese => preamble.push_str("\\usepackage[UTF8]{ctex}\n"),
            TargetScript::Cyrillic => {}
            _ => {
                if !self.profile.script.is_cjk() {
                    preamble.push_str("\\usepackage[utf8]{inputenc}\n");
                }
                preamble.push_str("\\usepackage[T1]{fontenc}\n");
            }
        }
        for line in self.profile.usepackage_lines() {
            if !preamble.contains(&line) {
                preamble.push_str(&line);
                preamble.push('\n');
            }
        }
        preamble.push_str(
            "\\usepackage{amsmath,amssymb,amsfonts}\n\
             \\usepackage{graphicx}\n\
             \\usepackage{url}\n\
             \\usepackage{hyperref}\n\
             \\usepackage{geometry}\n\
             \\geometry{margin=2.5cm}\n\
             \\setcounter{secnumdepth}{3}\n",
        );
        preamble.push_str(FRONT_MATTER_STUBS);
        preamble
    }

    fn with_safe_preamble(&self, tree: &WorkingTree) -> Option<WorkingTree> {
        let entry = tree.text(&tree.entry)?;
        let body_start = entry.find(BEGIN_DOCUMENT)?;
        let rescued = format!("{}\n{}", self.safe_preamble(), &entry[body_start..]);

        let mut result = tree.clone();
        result.replace(&tree.entry, &rescued);
        Some(result)
    }

    fn without_floats(tree: &WorkingTree) -> WorkingTree {
        let mut result = tree.clone();
        for path in &tree.documents {
            let Some(content) = tree.text(path) else {
                continue;
            };
            let mut stripped = content.to_string();
            for (label, pattern) in FLOATS.iter() {
                let marker = format!("% [texwai rescue: removed {} environment]", label);
                stripped = pattern.replace_all(&stripped, marker.as_str()).into_owned();
            }
            if stripped != content {
                result.replace(path, &stripped);
            }
        }
        result
    }
}

impl Rescuer for PreambleRescuer {
    fn strategies(&self) -> u32 {
        2
    }

    fn rescue(&self, tree: &WorkingTree, strategy: u32) -> Option<WorkingTree> {
        let rescued = match strategy {
            1 => self.with_safe_preamble(tree),
            2 => self.with_safe_preamble(tree).map(|t| Self::without_floats(&t)),
            _ => None,
        };
        if rescued.is_some() {
            info!("Rescue strategy {} applied", strategy);
        }
        rescued
    }
}
