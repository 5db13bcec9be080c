//! Static validation
//!
//! Rejects scripts before they are compiled. Checks run in a fixed order:
//! 1. **Blocked patterns** over string literals and extern library names
//! 2. **Namespaces** referenced by imports, namespaced calls and plain calls
//!    that name no script function or extern
//! 3. **Forbidden constructs**: `unsafe` blocks, `extern` declarations,
//!    `reflect.*` and `process.*` calls (allowed from `Advanced` up)
//! 4. **Recursion candidates**: cycles in the script's own call graph,
//!    reported as warnings only
//!
//! Validation is a pure function of the source and the profile.

use crate::profile::{NamespaceAccess, PermissionProfile};
use crate::result::{EventCategory, SecurityEvent};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use warden_config::{ConfigError, ConfigResult, ValidatorSettings};
use warden_script::ast::*;
use warden_script::diagnostic::codes;
use warden_script::host::library_key;
use warden_script::{Diagnostic, Span};

/// Built-in blocked patterns: path traversal, system paths, non-http URL schemes
pub const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    r"\.\.[/\\]",
    r"^/(etc|proc|sys|dev|root)(/|$)",
    r"(?i)^(file|ftp|gopher|ldap|dict|jar)://",
];

/// Namespace roots that are dangerous constructs rather than plain APIs
const REFLECTION_ROOT: &str = "reflect";
const PROCESS_ROOT: &str = "process";

/// Outcome of [`StaticValidator::validate`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationResult {
    /// False if any error-level violation or diagnostic was found
    pub ok: bool,
    pub violations: Vec<SecurityEvent>,
    /// One diagnostic per violation, plus parse errors
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Error-level violations only
    pub fn rejections(&self) -> impl Iterator<Item = &SecurityEvent> {
        self.violations.iter().filter(|v| v.is_error())
    }
}

#[derive(Debug, Clone)]
pub struct StaticValidator {
    blocked_patterns: Vec<Regex>,
}

impl StaticValidator {
    pub fn new(blocked_patterns: Vec<Regex>) -> Self {
        Self { blocked_patterns }
    }

    pub fn with_default_patterns() -> Self {
        Self::new(
            DEFAULT_BLOCKED_PATTERNS
                .iter()
                .filter_map(|pattern| Regex::new(pattern).ok())
                .collect(),
        )
    }

    /// Validator using the `[validator]` section of the configuration
    pub fn from_settings(settings: &ValidatorSettings) -> ConfigResult<Self> {
        let defaults: &[&str] = if settings.use_default_patterns() {
            DEFAULT_BLOCKED_PATTERNS
        } else {
            &[]
        };
        let patterns = defaults
            .iter()
            .copied()
            .chain(settings.blocked_patterns.iter().map(String::as_str))
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;
        Ok(Self::new(patterns))
    }

    pub fn blocked_patterns(&self) -> impl Iterator<Item = &str> {
        self.blocked_patterns.iter().map(Regex::as_str)
    }

    /// Parse and check `source` against `profile`
    pub fn validate(&self, source: &str, profile: &PermissionProfile) -> ValidationResult {
        let (program, parse_diagnostics) = warden_script::parse_source(source);
        if !parse_diagnostics.is_empty() {
            return ValidationResult {
                ok: false,
                violations: Vec::new(),
                diagnostics: parse_diagnostics
                    .into_iter()
                    .map(|d| d.located_in(source).with_file(profile.script_id()))
                    .collect(),
            };
        }
        self.validate_program(&program, source, profile)
    }

    /// Check an already parsed program; `source` is used only to locate diagnostics
    pub fn validate_program(
        &self,
        program: &Program,
        source: &str,
        profile: &PermissionProfile,
    ) -> ValidationResult {
        let facts = Facts::collect(program);
        let mut findings = Findings::default();

        self.check_patterns(&facts, &mut findings);
        check_namespaces(&facts, profile, &mut findings);
        check_constructs(&facts, profile, &mut findings);
        check_recursion(program, &facts, &mut findings);

        let diagnostics = findings
            .diagnostics
            .into_iter()
            .map(|d| d.located_in(source).with_file(profile.script_id()))
            .collect::<Vec<_>>();
        ValidationResult {
            ok: !findings.events.iter().any(SecurityEvent::is_error),
            violations: findings.events,
            diagnostics,
        }
    }

    fn check_patterns(&self, facts: &Facts, findings: &mut Findings) {
        for (text, span) in &facts.strings {
            if let Some(pattern) = self.blocked_patterns.iter().find(|p| p.is_match(text)) {
                findings.reject(
                    codes::BLOCKED_PATTERN,
                    format!(
                        "String literal \"{}\" matches blocked pattern '{}'",
                        text,
                        pattern.as_str()
                    ),
                    *span,
                );
            }
        }
    }
}

impl Default for StaticValidator {
    fn default() -> Self {
        Self::with_default_patterns()
    }
}

/// Host functions `program` can link against: namespaced calls, plain calls
/// that name no script function, and extern declarations
pub fn linkable_natives(program: &Program) -> BTreeSet<String> {
    Facts::collect(program).host_calls
}

fn check_namespaces(facts: &Facts, profile: &PermissionProfile, findings: &mut Findings) {
    let constructs_allowed = profile.tier().allows_dangerous_constructs();
    for reference in &facts.namespaces {
        if !constructs_allowed && is_construct_root(&reference.root) {
            continue;
        }
        match profile.check_namespace(&reference.path) {
            NamespaceAccess::Allowed => {}
            NamespaceAccess::Denied { rule } => findings.reject(
                codes::NAMESPACE_DENIED,
                format!(
                    "Namespace '{}' is denied by rule '{}'",
                    reference.path, rule
                ),
                reference.span,
            ),
            NamespaceAccess::NotGranted => findings.reject(
                codes::NAMESPACE_NOT_GRANTED,
                format!(
                    "Namespace '{}' is not allowed at tier '{}'",
                    reference.path,
                    profile.tier()
                ),
                reference.span,
            ),
        }
    }
}

fn check_constructs(facts: &Facts, profile: &PermissionProfile, findings: &mut Findings) {
    if profile.tier().allows_dangerous_constructs() {
        return;
    }
    let tier = profile.tier();
    for span in &facts.unsafe_blocks {
        findings.reject(
            codes::FORBIDDEN_CONSTRUCT,
            format!("Raw memory access ('unsafe' block) is not allowed at tier '{}'", tier),
            *span,
        );
    }
    for (name, library, span) in &facts.externs {
        findings.reject(
            codes::FORBIDDEN_CONSTRUCT,
            format!(
                "Native library loading ('extern fn {}' from \"{}\") is not allowed at tier '{}'",
                name, library, tier
            ),
            *span,
        );
    }
    for reference in facts.namespaces.iter().filter(|r| is_construct_root(&r.root)) {
        let what = if reference.root == REFLECTION_ROOT {
            "Reflection-based invocation"
        } else {
            "External process execution"
        };
        findings.reject(
            codes::FORBIDDEN_CONSTRUCT,
            format!(
                "{} ('{}') is not allowed at tier '{}'",
                what, reference.path, tier
            ),
            reference.span,
        );
    }
}

/// Warn once per strongly connected component of the call graph that loops
fn check_recursion(program: &Program, facts: &Facts, findings: &mut Findings) {
    let names: Vec<&FunctionDecl> = program.functions().collect();
    let index: HashMap<&str, usize> = names
        .iter()
        .enumerate()
        .map(|(i, f)| (f.name.name.as_str(), i))
        .collect();
    let edges: Vec<Vec<usize>> = names
        .iter()
        .enumerate()
        .map(|(i, _)| {
            facts
                .calls
                .get(&i)
                .into_iter()
                .flatten()
                .filter_map(|callee| index.get(callee.as_str()).copied())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        })
        .collect();

    for component in strongly_connected(&edges) {
        let cyclic = component.len() > 1
            || component
                .first()
                .is_some_and(|&node| edges[node].contains(&node));
        if !cyclic {
            continue;
        }
        let mut members: Vec<usize> = component;
        members.sort_unstable();
        let first = names[members[0]];
        let message = if members.len() == 1 {
            format!("Function '{}' calls itself", first.name.name)
        } else {
            let list = members
                .iter()
                .map(|&m| format!("'{}'", names[m].name.name))
                .collect::<Vec<_>>()
                .join(", ");
            format!("Functions {} call each other", list)
        };
        findings.warn(
            EventCategory::RecursionSuspected,
            codes::RECURSION_SUSPECTED,
            format!("{}; recursion depth is bounded only by the stack ceiling", message),
            first.name.span,
        );
    }
}

/// Tarjan's algorithm without native recursion
fn strongly_connected(edges: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;
    let n = edges.len();
    let mut order = vec![UNVISITED; n];
    let mut low = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut components = Vec::new();
    let mut counter = 0;

    for root in 0..n {
        if order[root] != UNVISITED {
            continue;
        }
        // (node, next edge to explore)
        let mut work = vec![(root, 0)];
        while let Some(frame) = work.last_mut() {
            let (node, next) = *frame;
            if next == 0 && order[node] == UNVISITED {
                order[node] = counter;
                low[node] = counter;
                counter += 1;
                stack.push(node);
                on_stack[node] = true;
            }
            if let Some(&target) = edges[node].get(next) {
                frame.1 += 1;
                if order[target] == UNVISITED {
                    work.push((target, 0));
                } else if on_stack[target] {
                    low[node] = low[node].min(order[target]);
                }
                continue;
            }
            work.pop();
            if let Some(&(parent, _)) = work.last() {
                low[parent] = low[parent].min(low[node]);
            }
            if low[node] == order[node] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }
    components
}

fn is_construct_root(root: &str) -> bool {
    root == REFLECTION_ROOT || root == PROCESS_ROOT
}

#[derive(Default)]
struct Findings {
    events: Vec<SecurityEvent>,
    diagnostics: Vec<Diagnostic>,
}

impl Findings {
    fn reject(&mut self, code: &str, message: String, span: Span) {
        self.diagnostics
            .push(Diagnostic::error_with_code(code, message.as_str(), span));
        self.events.push(SecurityEvent::error(
            EventCategory::StaticRejection,
            code,
            message,
        ));
    }

    fn warn(&mut self, category: EventCategory, code: &str, message: String, span: Span) {
        self.diagnostics
            .push(Diagnostic::warning_with_code(code, message.as_str(), span));
        self.events
            .push(SecurityEvent::warning(category, code, message));
    }
}

struct NamespaceRef {
    /// Dotted namespace, without the called function's own name
    path: String,
    root: String,
    span: Span,
}

/// Everything the checks need, gathered in one walk
#[derive(Default)]
struct Facts {
    strings: Vec<(String, Span)>,
    namespaces: Vec<NamespaceRef>,
    unsafe_blocks: Vec<Span>,
    externs: Vec<(String, String, Span)>,
    /// Plain-name calls per script function index
    calls: HashMap<usize, Vec<String>>,
    /// Every plain-name call, wherever it appears
    plain_calls: Vec<(String, Span)>,
    /// Full names of every host function the source can link against
    host_calls: BTreeSet<String>,
    current_function: Option<usize>,
}

impl Facts {
    fn collect(program: &Program) -> Self {
        let mut facts = Facts::default();
        let mut function_index = 0;
        for item in &program.items {
            match item {
                Item::Import(import) => {
                    let root = import
                        .path
                        .first()
                        .map(|segment| segment.name.clone())
                        .unwrap_or_default();
                    facts.namespaces.push(NamespaceRef {
                        path: import.dotted(),
                        root,
                        span: import.span,
                    });
                }
                Item::Extern(decl) => {
                    facts
                        .strings
                        .push((decl.library.clone(), decl.span));
                    facts
                        .externs
                        .push((decl.name.name.clone(), decl.library.clone(), decl.span));
                }
                Item::Function(func) => {
                    facts.current_function = Some(function_index);
                    function_index += 1;
                    facts.visit_block(&func.body);
                    facts.current_function = None;
                }
                Item::Statement(stmt) => facts.visit_stmt(stmt),
            }
        }

        // A plain name that is neither a script function nor an extern can
        // only resolve to a host function registered without a namespace
        let local: BTreeSet<&str> = program
            .functions()
            .map(|func| func.name.name.as_str())
            .chain(facts.externs.iter().map(|(name, _, _)| name.as_str()))
            .collect();
        let host_refs: Vec<NamespaceRef> = facts
            .plain_calls
            .iter()
            .filter(|(name, _)| !local.contains(name.as_str()))
            .map(|(name, span)| NamespaceRef {
                path: name.clone(),
                root: name.clone(),
                span: *span,
            })
            .collect();
        facts
            .host_calls
            .extend(host_refs.iter().map(|reference| reference.path.clone()));
        facts.namespaces.extend(host_refs);
        let extern_keys: Vec<String> = facts
            .externs
            .iter()
            .map(|(name, library, _)| library_key(library, name))
            .collect();
        facts.host_calls.extend(extern_keys);
        facts
    }

    fn visit_block(&mut self, block: &Block) {
        for stmt in &block.statements {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl(decl) => self.visit_expr(&decl.init),
            Stmt::Assign(assign) => {
                if let AssignTarget::Index { index, .. } = &assign.target {
                    self.visit_expr(index);
                }
                self.visit_expr(&assign.value);
            }
            Stmt::CompoundAssign(assign) => self.visit_expr(&assign.value),
            Stmt::If(if_stmt) => {
                self.visit_expr(&if_stmt.cond);
                self.visit_block(&if_stmt.then_block);
                if let Some(else_block) = &if_stmt.else_block {
                    self.visit_block(else_block);
                }
            }
            Stmt::While(while_stmt) => {
                self.visit_expr(&while_stmt.cond);
                self.visit_block(&while_stmt.body);
            }
            Stmt::Return(ret) => {
                if let Some(value) = &ret.value {
                    self.visit_expr(value);
                }
            }
            Stmt::Break(_) | Stmt::Continue(_) => {}
            Stmt::Block(block) => self.visit_block(block),
            Stmt::Unsafe(block) => {
                self.unsafe_blocks.push(block.span);
                self.visit_block(block);
            }
            Stmt::Expr(expr_stmt) => self.visit_expr(&expr_stmt.expr),
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(Literal::String(text), span) => {
                self.strings.push((text.clone(), *span));
            }
            Expr::Literal(..) | Expr::Identifier(_) => {}
            Expr::Array(array) => {
                for element in &array.elements {
                    self.visit_expr(element);
                }
            }
            Expr::Unary(unary) => self.visit_expr(&unary.expr),
            Expr::Binary(binary) => {
                self.visit_expr(&binary.left);
                self.visit_expr(&binary.right);
            }
            Expr::Call(call) => {
                match call.callee.dotted_path() {
                    Some(path) if path.len() == 1 => {
                        self.plain_calls
                            .push((path[0].name.clone(), call.callee.span()));
                        if let Some(function) = self.current_function {
                            self.calls
                                .entry(function)
                                .or_default()
                                .push(path[0].name.clone());
                        }
                    }
                    Some(path) => {
                        self.host_calls.insert(join_path(&path));
                        self.note_path(&path[..path.len() - 1], call.callee.span());
                    }
                    None => self.visit_expr(&call.callee),
                }
                for arg in &call.args {
                    self.visit_expr(arg);
                }
            }
            Expr::Index(index) => {
                self.visit_expr(&index.target);
                self.visit_expr(&index.index);
            }
            Expr::Member(member) => match expr.dotted_path() {
                Some(path) => self.note_path(&path, member.span),
                None => self.visit_expr(&member.target),
            },
            Expr::Group(group) => self.visit_expr(&group.expr),
        }
    }

    fn note_path(&mut self, path: &[&Identifier], span: Span) {
        let Some(root) = path.first() else {
            return;
        };
        self.namespaces.push(NamespaceRef {
            path: join_path(path),
            root: root.name.clone(),
            span,
        });
    }
}
