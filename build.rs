use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding this crate's Rust sources. Nothing else under the
// package root is scanned.
const SOURCE_ROOTS: [&str; 3] = ["likelihood", "tests", "benches"];

// Change-log words that do not belong in comments.
const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    AllowDeadCode,
    ForbiddenWord,
    StarsInComment,
    ShoutingComment,
}

impl Rule {
    fn pattern(self) -> String {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
            Rule::ForbiddenWord => format!(r"(//|/\*).*(?:{})", FORBIDDEN_WORDS.join("|")),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::ShoutingComment => r"(//|/\*)".to_string(),
        }
    }

    fn description(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => {
                "underscore-prefixed identifiers. Either use the variable (removing the underscore) or remove it completely."
            }
            Rule::AllowDeadCode => {
                "#[allow(dead_code)] attributes. Either use the code or remove it completely."
            }
            Rule::ForbiddenWord => "change-log words (FIX, NEW, UPDATE, ...) in comments.",
            Rule::StarsInComment => "'**' in regular comments (doc comments may use it).",
            Rule::ShoutingComment => "comments whose alphabetic characters are all uppercase.",
        }
    }

    // The build script itself quotes every pattern, so only the underscore
    // rule applies to it.
    fn scans_build_script(self) -> bool {
        matches!(self, Rule::UnderscorePrefix)
    }

    // Decides whether a line the regex matched is a real violation.
    fn is_violation(self, line: &str) -> bool {
        match self {
            Rule::UnderscorePrefix => !is_comment(line) && !underscore_in_string(line),
            Rule::AllowDeadCode | Rule::ForbiddenWord => true,
            Rule::StarsInComment => !is_doc_comment(line),
            Rule::ShoutingComment => comment_text(line).is_some_and(|text| {
                let mut letters = text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }),
        }
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.contains("/*")
}

fn is_doc_comment(line: &str) -> bool {
    line.trim_start().starts_with("///")
}

fn underscore_in_string(line: &str) -> bool {
    line.split('"')
        .enumerate()
        .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("///") {
        return Some(rest.trim());
    }
    if let Some(rest) = trimmed.strip_prefix("//") {
        return Some(rest.trim());
    }
    let start = line.find("/*")? + 2;
    let body = &line[start..];
    Some(body.find("*/").map_or(body, |end| &body[..end]).trim())
}

// Collects the violating lines of a single file.
struct ViolationCollector {
    rule: Rule,
    violations: Vec<String>,
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn source_files(include_build_script: bool) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = SOURCE_ROOTS
        .iter()
        .flat_map(|root| WalkDir::new(root).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect();
    if include_build_script {
        files.push(PathBuf::from("build.rs"));
    }
    files
}

fn scan_file(rule: Rule, matcher: &RegexMatcher, path: &Path) -> Result<(), Box<dyn Error>> {
    let mut collector = ViolationCollector {
        rule,
        violations: Vec::new(),
    };
    Searcher::new().search_path(matcher, path, &mut collector)?;
    if collector.violations.is_empty() {
        return Ok(());
    }

    let mut error_msg = format!(
        "\n❌ ERROR: Found {} violations in {}:\n",
        collector.violations.len(),
        path.display()
    );
    for violation in &collector.violations {
        error_msg.push_str(&format!("   {violation}\n"));
    }
    error_msg.push_str(&format!(
        "\n⚠️ This project does not allow {}\n",
        rule.description()
    ));
    Err(error_msg.into())
}

fn scan(rule: Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    for path in source_files(rule.scans_build_script()) {
        scan_file(rule, &matcher, &path)?;
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for root in SOURCE_ROOTS {
        println!("cargo:rerun-if-changed={root}");
    }

    let rules = [
        Rule::UnderscorePrefix,
        Rule::AllowDeadCode,
        Rule::ForbiddenWord,
        Rule::StarsInComment,
        Rule::ShoutingComment,
    ];
    for rule in rules {
        if let Err(e) = scan(rule) {
            // `eprintln!` is what shows the report in cargo's output.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
