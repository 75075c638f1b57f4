//! Build-system structural inference.
//!
//! Detects Gradle- or Maven-style projects by marker files, enumerates
//! modules, and extracts plugins, dependencies and source sets from build
//! files. Parsing is best-effort line/block extraction, not a Groovy or XML
//! grammar: a malformed build file degrades the module to an empty
//! [`BuildFileResult`] but the module still participates in the graph.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Detected build system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildSystemKind {
    Gradle,
    Maven,
    None,
}

/// External dependency coordinate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDependency {
    pub group: String,
    pub artifact: String,
    pub version: Option<String>,
    pub configuration: String,
    pub is_platform: bool,
}

impl ExternalDependency {
    /// `group:artifact:version` key used for node dedup
    pub fn coordinate(&self) -> String {
        format!(
            "{}:{}:{}",
            self.group,
            self.artifact,
            self.version.as_deref().unwrap_or("unspecified")
        )
    }
}

/// Inter-module project dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDependency {
    pub configuration: String,
    /// Gradle project path (`:core:api`) or Maven artifact id
    pub project_path: String,
    /// Normalized module name the adjacency map uses
    pub module_name: String,
}

/// Everything extracted from one build file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildFileResult {
    pub plugins: Vec<String>,
    pub dependencies: Vec<ExternalDependency>,
    pub project_dependencies: Vec<ProjectDependency>,
    pub source_dirs: Vec<String>,
    pub test_dirs: Vec<String>,
    pub resource_dirs: Vec<String>,
    pub ext_properties: BTreeMap<String, String>,
    pub source_compatibility: Option<String>,
    pub target_compatibility: Option<String>,
    pub group: Option<String>,
    pub version: Option<String>,
}

impl BuildFileResult {
    fn with_default_dirs() -> Self {
        Self {
            source_dirs: vec!["src/main/java".into(), "src/main/kotlin".into()],
            test_dirs: vec!["src/test/java".into(), "src/test/kotlin".into()],
            resource_dirs: vec!["src/main/resources".into()],
            ..Self::default()
        }
    }
}

/// Module classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKind {
    JavaLibrary,
    Application,
    War,
    Ear,
    SpringBoot,
    Unknown,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::JavaLibrary => "java-library",
            ModuleKind::Application => "application",
            ModuleKind::War => "war",
            ModuleKind::Ear => "ear",
            ModuleKind::SpringBoot => "spring-boot",
            ModuleKind::Unknown => "unknown",
        }
    }
}

/// One subproject within the repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// `:`-joined Gradle-style name (`core:api`) or Maven module dir
    pub name: String,
    /// Directory relative to the repository root; empty for the root module
    pub relative_path: String,
    pub kind: ModuleKind,
    pub build: BuildFileResult,
}

/// Multi-module project structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStructure {
    pub build_system: BuildSystemKind,
    pub root_project_name: String,
    pub modules: Vec<ModuleInfo>,
    /// Adjacency: module name -> names of modules it depends on
    pub module_dependencies: BTreeMap<String, Vec<String>>,
}

struct BuildRegexes {
    root_name: Regex,
    include_line: Regex,
    quoted: Regex,
    plugin_id: Regex,
    apply_plugin: Regex,
    kotlin_plugin: Regex,
    dep_shorthand: Regex,
    dep_map: Regex,
    dep_project: Regex,
    src_dirs_list: Regex,
    src_dir_single: Regex,
    ext_assign: Regex,
    block_assign: Regex,
    compatibility: Regex,
    group_assign: Regex,
    version_assign: Regex,
    pom_tag: Regex,
    pom_dependency: Regex,
}

fn regexes() -> &'static BuildRegexes {
    static CELL: OnceLock<BuildRegexes> = OnceLock::new();
    CELL.get_or_init(|| BuildRegexes {
        root_name: Regex::new(r#"(?m)^\s*rootProject\.name\s*=\s*['"]([^'"]+)['"]"#).unwrap(),
        include_line: Regex::new(r"(?m)^\s*include\b(.*)$").unwrap(),
        quoted: Regex::new(r#"['"]([^'"]+)['"]"#).unwrap(),
        plugin_id: Regex::new(r#"id\s*\(?\s*['"]([A-Za-z0-9_.\-]+)['"]"#).unwrap(),
        apply_plugin: Regex::new(r#"apply\s+plugin:\s*['"]([^'"]+)['"]"#).unwrap(),
        kotlin_plugin: Regex::new(r#"kotlin\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap(),
        dep_shorthand: Regex::new(
            r#"(?m)^\s*([A-Za-z][A-Za-z0-9]*)\s*\(?\s*((?:enforcedP|p)latform\s*\(\s*)?['"]([^'":]+):([^'":]+)(?::([^'"]+))?['"]"#,
        )
        .unwrap(),
        dep_map: Regex::new(
            r#"(?m)^\s*([A-Za-z][A-Za-z0-9]*)\s+group:\s*['"]([^'"]+)['"]\s*,\s*name:\s*['"]([^'"]+)['"](?:\s*,\s*version:\s*['"]([^'"]+)['"])?"#,
        )
        .unwrap(),
        dep_project: Regex::new(
            r#"(?m)^\s*([A-Za-z][A-Za-z0-9]*)\s*\(?\s*project\s*\(\s*['"](:?[^'"]+)['"]\s*\)"#,
        )
        .unwrap(),
        src_dirs_list: Regex::new(r"srcDirs\s*\+?=\s*\[([^\]]*)\]").unwrap(),
        src_dir_single: Regex::new(r#"srcDir\s+['"]([^'"]+)['"]"#).unwrap(),
        ext_assign: Regex::new(r#"(?m)^\s*ext\.([A-Za-z_][A-Za-z0-9_]*)\s*=\s*['"]?([^'"\n]+?)['"]?\s*$"#)
            .unwrap(),
        block_assign: Regex::new(r#"(?m)^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*['"]([^'"]+)['"]"#)
            .unwrap(),
        compatibility: Regex::new(
            r#"(?m)^\s*(sourceCompatibility|targetCompatibility)\s*=?\s*['"]?(?:JavaVersion\.VERSION_)?([0-9][0-9._]*)['"]?"#,
        )
        .unwrap(),
        group_assign: Regex::new(r#"(?m)^\s*group\s*=\s*['"]([^'"]+)['"]"#).unwrap(),
        version_assign: Regex::new(r#"(?m)^\s*version\s*=\s*['"]([^'"]+)['"]"#).unwrap(),
        pom_tag: Regex::new(r"<([A-Za-z][A-Za-z0-9]*)>([^<]*)</([A-Za-z][A-Za-z0-9]*)>").unwrap(),
        pom_dependency: Regex::new(r"(?s)<dependency>(.*?)</dependency>").unwrap(),
    })
}

/// Find `header { ... }` in `content` and return the block body
fn extract_block(content: &str, header: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(pos) = content[search_from..].find(header) {
        let at = search_from + pos;
        // Word boundary on the left
        let left_ok = at == 0
            || !content[..at]
                .chars()
                .next_back()
                .map_or(false, |c| c.is_alphanumeric() || c == '.');
        let after = &content[at + header.len()..];
        let brace_offset = after.find(|c: char| !c.is_whitespace());
        match (left_ok, brace_offset) {
            (true, Some(off)) if after[off..].starts_with('{') => {
                let body_start = at + header.len() + off + 1;
                let mut depth = 1usize;
                for (i, c) in content[body_start..].char_indices() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                return Some(content[body_start..body_start + i].to_string());
                            }
                        }
                        _ => {}
                    }
                }
                return None;
            }
            _ => search_from = at + header.len(),
        }
    }
    None
}

/// Remove one `<tag>...</tag>` XML block, best-effort
fn strip_xml_block(content: &str, tag: &str) -> String {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    match (content.find(&open), content.find(&close)) {
        (Some(start), Some(end)) if end > start => {
            let mut out = String::with_capacity(content.len());
            out.push_str(&content[..start]);
            out.push_str(&content[end + close.len()..]);
            out
        }
        _ => content.to_string(),
    }
}

fn xml_tag_value(content: &str, tag: &str) -> Option<String> {
    regexes()
        .pom_tag
        .captures_iter(content)
        .find(|c| &c[1] == tag && &c[3] == tag)
        .map(|c| c[2].trim().to_string())
}

fn xml_tag_values(content: &str, tag: &str) -> Vec<String> {
    regexes()
        .pom_tag
        .captures_iter(content)
        .filter(|c| &c[1] == tag && &c[3] == tag)
        .map(|c| c[2].trim().to_string())
        .collect()
}

/// Gradle project path (`:core:api`) to module name (`core:api`)
fn gradle_path_to_name(path: &str) -> String {
    path.trim_start_matches(':').to_string()
}

/// Module name (`core:api`) to directory (`core/api`)
fn module_name_to_dir(name: &str) -> String {
    name.replace(':', "/")
}

/// Detects and inspects Gradle/Maven-style projects
pub struct BuildSystemInspector;

impl BuildSystemInspector {
    /// Marker-file detection at the repository root
    pub fn detect(root: &Path) -> BuildSystemKind {
        let gradle_markers = [
            "settings.gradle",
            "settings.gradle.kts",
            "build.gradle",
            "build.gradle.kts",
        ];
        if gradle_markers.iter().any(|m| root.join(m).is_file()) {
            BuildSystemKind::Gradle
        } else if root.join("pom.xml").is_file() {
            BuildSystemKind::Maven
        } else {
            BuildSystemKind::None
        }
    }

    /// Inspect the repository; `None` when no build system is detected
    pub fn inspect(root: &Path, fallback_name: &str) -> Option<ProjectStructure> {
        match Self::detect(root) {
            BuildSystemKind::Gradle => Some(Self::inspect_gradle(root, fallback_name)),
            BuildSystemKind::Maven => Some(Self::inspect_maven(root, fallback_name)),
            BuildSystemKind::None => None,
        }
    }

    fn inspect_gradle(root: &Path, fallback_name: &str) -> ProjectStructure {
        let settings = ["settings.gradle", "settings.gradle.kts"]
            .iter()
            .map(|f| root.join(f))
            .find(|p| p.is_file())
            .and_then(|p| read_logged(&p));

        let (root_name, includes) = match settings.as_deref() {
            Some(content) => parse_gradle_settings(content),
            None => (None, Vec::new()),
        };
        let root_project_name = root_name.unwrap_or_else(|| fallback_name.to_string());

        let mut modules = Vec::new();

        // The root project is a module of its own when it carries a build file
        let root_build = ["build.gradle", "build.gradle.kts"]
            .iter()
            .map(|f| root.join(f))
            .find(|p| p.is_file());
        if let Some(path) = root_build {
            let build = read_logged(&path)
                .map(|c| parse_gradle_build(&c))
                .unwrap_or_default();
            let kind = classify_gradle_module(&build);
            modules.push(ModuleInfo {
                name: root_project_name.clone(),
                relative_path: String::new(),
                kind,
                build,
            });
        }

        for include in &includes {
            let name = gradle_path_to_name(include);
            let dir = module_name_to_dir(&name);
            let build = ["build.gradle", "build.gradle.kts"]
                .iter()
                .map(|f| root.join(&dir).join(f))
                .find(|p| p.is_file())
                .and_then(|p| read_logged(&p))
                .map(|c| parse_gradle_build(&c))
                .unwrap_or_else(|| {
                    warn!("module {}: no readable build file, empty build result", name);
                    BuildFileResult::default()
                });
            let kind = classify_gradle_module(&build);
            modules.push(ModuleInfo {
                name,
                relative_path: dir,
                kind,
                build,
            });
        }

        let module_dependencies = adjacency(&modules);
        debug!(
            "gradle project {:?}: {} modules",
            root_project_name,
            modules.len()
        );
        ProjectStructure {
            build_system: BuildSystemKind::Gradle,
            root_project_name,
            modules,
            module_dependencies,
        }
    }

    fn inspect_maven(root: &Path, fallback_name: &str) -> ProjectStructure {
        let pom = read_logged(&root.join("pom.xml")).unwrap_or_default();
        let project = strip_xml_block(&pom, "parent");
        let root_group = xml_tag_value(&project, "groupId");
        let root_project_name =
            xml_tag_value(&project, "artifactId").unwrap_or_else(|| fallback_name.to_string());

        let modules_block = extract_xml_section(&pom, "modules").unwrap_or_default();
        let module_dirs = xml_tag_values(&modules_block, "module");

        let mut modules = Vec::new();
        let sibling_names: Vec<String> = module_dirs.clone();

        for dir in &module_dirs {
            let module_pom = read_logged(&root.join(dir).join("pom.xml"));
            let packaging = module_pom
                .as_deref()
                .and_then(|c| xml_tag_value(&strip_xml_block(c, "parent"), "packaging"));
            let build = module_pom
                .map(|content| {
                    parse_maven_pom(&content, root_group.as_deref(), &sibling_names)
                })
                .unwrap_or_else(|| {
                    warn!("module {}: no readable pom, empty build result", dir);
                    BuildFileResult::default()
                });
            let kind = classify_maven_module(&build, packaging.as_deref());
            modules.push(ModuleInfo {
                name: dir.clone(),
                relative_path: dir.clone(),
                kind,
                build,
            });
        }

        // Single-module Maven project: the root pom is the module
        if modules.is_empty() {
            let build = parse_maven_pom(&pom, root_group.as_deref(), &[]);
            let packaging = xml_tag_value(&project, "packaging");
            let kind = classify_maven_module(&build, packaging.as_deref());
            modules.push(ModuleInfo {
                name: root_project_name.clone(),
                relative_path: String::new(),
                kind,
                build,
            });
        }

        let module_dependencies = adjacency(&modules);
        ProjectStructure {
            build_system: BuildSystemKind::Maven,
            root_project_name,
            modules,
            module_dependencies,
        }
    }
}

fn read_logged(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(err) => {
            warn!("cannot read build file {}: {}", path.display(), err);
            None
        }
    }
}

fn adjacency(modules: &[ModuleInfo]) -> BTreeMap<String, Vec<String>> {
    modules
        .iter()
        .map(|m| {
            let deps: Vec<String> = m
                .build
                .project_dependencies
                .iter()
                .map(|d| d.module_name.clone())
                .collect();
            (m.name.clone(), deps)
        })
        .collect()
}

/// Settings file: root project name plus included module paths
pub fn parse_gradle_settings(content: &str) -> (Option<String>, Vec<String>) {
    let rx = regexes();
    let root_name = rx
        .root_name
        .captures(content)
        .map(|c| c[1].to_string());

    let mut includes = Vec::new();
    for line in rx.include_line.captures_iter(content) {
        for quoted in rx.quoted.captures_iter(&line[1]) {
            let path = quoted[1].trim();
            if !path.is_empty() {
                includes.push(path.to_string());
            }
        }
    }
    (root_name, includes)
}

/// Best-effort extraction from one Gradle build file
pub fn parse_gradle_build(content: &str) -> BuildFileResult {
    let rx = regexes();
    let mut result = BuildFileResult::with_default_dirs();

    // Plugins
    if let Some(block) = extract_block(content, "plugins") {
        for cap in rx.plugin_id.captures_iter(&block) {
            result.plugins.push(cap[1].to_string());
        }
        for cap in rx.kotlin_plugin.captures_iter(&block) {
            result.plugins.push(format!("kotlin.{}", &cap[1]));
        }
    }
    for cap in rx.apply_plugin.captures_iter(content) {
        result.plugins.push(cap[1].to_string());
    }
    result.plugins.dedup();

    // Dependencies (only inside the dependencies block)
    if let Some(block) = extract_block(content, "dependencies") {
        for cap in rx.dep_project.captures_iter(&block) {
            let path = cap[2].to_string();
            result.project_dependencies.push(ProjectDependency {
                configuration: cap[1].to_string(),
                module_name: gradle_path_to_name(&path),
                project_path: path,
            });
        }
        for cap in rx.dep_shorthand.captures_iter(&block) {
            result.dependencies.push(ExternalDependency {
                configuration: cap[1].to_string(),
                is_platform: cap.get(2).is_some(),
                group: cap[3].to_string(),
                artifact: cap[4].to_string(),
                version: cap.get(5).map(|v| v.as_str().to_string()),
            });
        }
        for cap in rx.dep_map.captures_iter(&block) {
            result.dependencies.push(ExternalDependency {
                configuration: cap[1].to_string(),
                is_platform: false,
                group: cap[2].to_string(),
                artifact: cap[3].to_string(),
                version: cap.get(4).map(|v| v.as_str().to_string()),
            });
        }
    }

    // Source sets override the defaults
    if let Some(block) = extract_block(content, "sourceSets") {
        for (set_name, dirs_field) in [("main", &mut result.source_dirs), ("test", &mut result.test_dirs)] {
            if let Some(set_block) = extract_block(&block, set_name) {
                let mut dirs = Vec::new();
                for cap in rx.src_dirs_list.captures_iter(&set_block) {
                    for q in rx.quoted.captures_iter(&cap[1]) {
                        dirs.push(q[1].to_string());
                    }
                }
                for cap in rx.src_dir_single.captures_iter(&set_block) {
                    dirs.push(cap[1].to_string());
                }
                if !dirs.is_empty() {
                    *dirs_field = dirs;
                }
            }
        }
    }

    // ext properties: dotted assignments and the ext block
    for cap in rx.ext_assign.captures_iter(content) {
        result
            .ext_properties
            .insert(cap[1].to_string(), cap[2].trim().to_string());
    }
    if let Some(block) = extract_block(content, "ext") {
        for cap in rx.block_assign.captures_iter(&block) {
            result
                .ext_properties
                .insert(cap[1].to_string(), cap[2].to_string());
        }
    }

    for cap in rx.compatibility.captures_iter(content) {
        let value = cap[2].to_string();
        match &cap[1] {
            "sourceCompatibility" => result.source_compatibility = Some(value),
            _ => result.target_compatibility = Some(value),
        }
    }

    result.group = rx.group_assign.captures(content).map(|c| c[1].to_string());
    result.version = rx
        .version_assign
        .captures(content)
        .map(|c| c[1].to_string());

    result
}

/// Extract a whole `<tag>...</tag>` section
fn extract_xml_section(content: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = content.find(&open)? + open.len();
    let end = content[start..].find(&close)? + start;
    Some(content[start..end].to_string())
}

/// Best-effort extraction from one Maven POM
pub fn parse_maven_pom(
    content: &str,
    root_group: Option<&str>,
    sibling_modules: &[String],
) -> BuildFileResult {
    let mut result = BuildFileResult::with_default_dirs();
    result.resource_dirs = vec!["src/main/resources".into()];

    let project = strip_xml_block(content, "parent");
    // Project-level coordinates live before the dependency lists
    let head = project.split("<dependencies>").next().unwrap_or(&project);
    result.group = xml_tag_value(head, "groupId").or_else(|| root_group.map(str::to_string));
    result.version = xml_tag_value(head, "version");

    let without_mgmt = strip_xml_block(content, "dependencyManagement");
    if let Some(deps_block) = extract_xml_section(&without_mgmt, "dependencies") {
        for dep in regexes().pom_dependency.captures_iter(&deps_block) {
            let body = &dep[1];
            let (Some(group), Some(artifact)) = (
                xml_tag_value(body, "groupId"),
                xml_tag_value(body, "artifactId"),
            ) else {
                continue;
            };
            let version = xml_tag_value(body, "version");
            let configuration =
                xml_tag_value(body, "scope").unwrap_or_else(|| "compile".to_string());

            let same_group = result.group.as_deref() == Some(group.as_str())
                || root_group == Some(group.as_str());
            if same_group && sibling_modules.iter().any(|m| *m == artifact) {
                result.project_dependencies.push(ProjectDependency {
                    configuration,
                    project_path: artifact.clone(),
                    module_name: artifact,
                });
            } else {
                result.dependencies.push(ExternalDependency {
                    group,
                    artifact,
                    version,
                    configuration,
                    is_platform: false,
                });
            }
        }
    }

    if let Some(parent) = extract_xml_section(content, "parent") {
        if xml_tag_value(&parent, "artifactId").as_deref() == Some("spring-boot-starter-parent") {
            result.plugins.push("org.springframework.boot".to_string());
        }
    }
    if content.contains("spring-boot-maven-plugin") {
        result.plugins.push("org.springframework.boot".to_string());
    }
    result.plugins.dedup();

    result
}

fn classify_gradle_module(build: &BuildFileResult) -> ModuleKind {
    let has = |p: &str| build.plugins.iter().any(|plugin| plugin == p);
    if has("org.springframework.boot") {
        ModuleKind::SpringBoot
    } else if has("war") {
        ModuleKind::War
    } else if has("ear") {
        ModuleKind::Ear
    } else if has("application") {
        ModuleKind::Application
    } else if has("java-library") {
        ModuleKind::JavaLibrary
    } else {
        ModuleKind::Unknown
    }
}

fn classify_maven_module(build: &BuildFileResult, packaging: Option<&str>) -> ModuleKind {
    if build
        .plugins
        .iter()
        .any(|p| p == "org.springframework.boot")
    {
        return ModuleKind::SpringBoot;
    }
    match packaging {
        Some("war") => ModuleKind::War,
        Some("ear") => ModuleKind::Ear,
        Some("jar") | None => ModuleKind::JavaLibrary,
        Some(_) => ModuleKind::Unknown,
    }
}
