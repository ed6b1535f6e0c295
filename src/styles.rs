//! CSS transform pipeline: Sass compilation, vendor prefixing, right-to-left
//! mirroring, and scoped class names for `*.module.*` styles.

use std::collections::BTreeMap;
use std::fs;
use std::sync::LazyLock;

use camino::Utf8Path;
use regex::Regex;

use crate::core::Hash32;

/// Properties that still need vendor prefixes for the supported browsers.
const PREFIXES: &[(&str, &[&str])] = &[
    ("appearance", &["-webkit-", "-moz-"]),
    ("backdrop-filter", &["-webkit-"]),
    ("box-decoration-break", &["-webkit-"]),
    ("clip-path", &["-webkit-"]),
    ("hyphens", &["-webkit-"]),
    ("mask", &["-webkit-"]),
    ("mask-image", &["-webkit-"]),
    ("text-size-adjust", &["-webkit-", "-moz-"]),
    ("user-select", &["-webkit-", "-moz-"]),
];

/// Shorthands whose four-value form lists top, right, bottom, left.
const BOX_SHORTHANDS: &[&str] = &[
    "margin",
    "padding",
    "border-width",
    "border-style",
    "border-color",
    "inset",
];

static DECLARATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)([-a-zA-Z]+)(\s*:\s*)(.*?)(\s*)$").unwrap());

static DIRECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(left|right|ltr|rtl)\b").unwrap());

/// Quoted strings and `url(...)` references, never mirrored.
static LITERAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|(?i:url)\([^)]*\)"#).unwrap()
});

static CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(-?[_a-zA-Z][_a-zA-Z0-9-]*)").unwrap());

/// Compiled stylesheet in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleOutput {
    pub ltr: String,
    pub rtl: String,
    /// Local class name to scoped class name, for module styles.
    pub class_map: Option<BTreeMap<String, String>>,
}

/// Whether a style file uses module scoping, e.g. `button.module.scss`.
pub fn is_module_style(path: &Utf8Path) -> bool {
    path.file_stem()
        .is_some_and(|stem| stem.ends_with(".module"))
}

/// Reads a stylesheet, compiling Sass when needed.
pub fn compile_source(path: &Utf8Path, load_path: &Utf8Path) -> anyhow::Result<String> {
    match path.extension() {
        Some("scss" | "sass") => compile_sass(path, load_path),
        _ => Ok(fs::read_to_string(path)?),
    }
}

#[cfg(feature = "grass")]
fn compile_sass(path: &Utf8Path, load_path: &Utf8Path) -> anyhow::Result<String> {
    let options = grass::Options::default().load_path(load_path.as_std_path());
    grass::from_path(path.as_std_path(), &options).map_err(|e| anyhow::anyhow!("{e}"))
}

#[cfg(not(feature = "grass"))]
fn compile_sass(path: &Utf8Path, _: &Utf8Path) -> anyhow::Result<String> {
    anyhow::bail!("{path} is a Sass file, enable the `grass` feature to compile it")
}

/// Runs the transform chain over compiled CSS. `scope` is the seed for
/// scoped class names, `None` leaves class names alone.
pub fn process(css: &str, scope: Option<&str>) -> StyleOutput {
    let (css, class_map) = match scope {
        Some(seed) => {
            let (css, map) = scope_classes(css, seed);
            (css, Some(map))
        }
        None => (css.to_string(), None),
    };

    let ltr = prefix(&css);
    let rtl = mirror(&ltr);

    StyleOutput {
        ltr,
        rtl,
        class_map,
    }
}

/// Adds vendor-prefixed copies in front of declarations that need them.
pub fn prefix(css: &str) -> String {
    rewrite(css, |prelude| prelude.to_string(), |declaration| {
        let Some(caps) = DECLARATION.captures(declaration) else {
            return declaration.to_string();
        };

        let property = &caps[2];
        let Some((_, prefixes)) = PREFIXES.iter().find(|(name, _)| *name == property) else {
            return declaration.to_string();
        };

        let mut out = String::new();
        for prefix in *prefixes {
            out.push_str(&format!("{}{prefix}{property}{}{};", &caps[1], &caps[3], &caps[4]));
        }
        out.push_str(declaration);
        out
    })
}

/// Mirrors a stylesheet for right-to-left scripts.
pub fn mirror(css: &str) -> String {
    rewrite(css, |prelude| prelude.to_string(), |declaration| {
        let Some(caps) = DECLARATION.captures(declaration) else {
            return declaration.to_string();
        };

        let property = swap_direction(&caps[2]);
        let value = mirror_value(&property, &caps[4]);

        format!("{}{property}{}{value}{}", &caps[1], &caps[3], &caps[5])
    })
}

fn swap_direction(text: &str) -> String {
    DIRECTION
        .replace_all(text, |caps: &regex::Captures| {
            match &caps[1] {
                "left" => "right",
                "right" => "left",
                "ltr" => "rtl",
                _ => "ltr",
            }
            .to_string()
        })
        .into_owned()
}

fn mirror_value(property: &str, value: &str) -> String {
    if !LITERAL.is_match(value) {
        let parts: Vec<&str> = value.split_whitespace().collect();

        if parts.len() == 4 && BOX_SHORTHANDS.contains(&property) {
            return format!("{} {} {} {}", parts[0], parts[3], parts[2], parts[1]);
        }

        if parts.len() == 4 && property == "border-radius" {
            return format!("{} {} {} {}", parts[1], parts[0], parts[3], parts[2]);
        }
    }

    let mut out = String::with_capacity(value.len());
    let mut last = 0;

    for literal in LITERAL.find_iter(value) {
        out.push_str(&swap_direction(&value[last..literal.start()]));
        out.push_str(literal.as_str());
        last = literal.end();
    }

    out.push_str(&swap_direction(&value[last..]));
    out
}

/// Renames every class selector to `<local>_<suffix>`, the suffix derived from
/// `seed`, and returns the mapping.
pub fn scope_classes(css: &str, seed: &str) -> (String, BTreeMap<String, String>) {
    let suffix = Hash32::hash(seed).short(8);
    let mut map = BTreeMap::new();

    let css = rewrite(
        css,
        |prelude| {
            if prelude.trim_start().starts_with('@') {
                return prelude.to_string();
            }

            CLASS
                .replace_all(prelude, |caps: &regex::Captures| {
                    let local = &caps[1];
                    let scoped = format!("{local}_{suffix}");
                    map.insert(local.to_string(), scoped.clone());
                    format!(".{scoped}")
                })
                .into_owned()
        },
        |declaration| declaration.to_string(),
    );

    (css, map)
}

/// JS module that injects the stylesheet once and exports the class map.
pub fn injection_module(id: &str, css: &str, class_map: &BTreeMap<String, String>) -> anyhow::Result<String> {
    let id = serde_json::to_string(id)?;
    let css = serde_json::to_string(css)?;
    let map = serde_json::to_string_pretty(class_map)?;

    Ok(format!(
        "const id = {id};\n\
         const css = {css};\n\
         if (typeof document !== \"undefined\" && !document.querySelector(`style[data-style-id=\"${{id}}\"]`)) {{\n\
         \tconst style = document.createElement(\"style\");\n\
         \tstyle.setAttribute(\"data-style-id\", id);\n\
         \tstyle.textContent = css;\n\
         \tdocument.head.appendChild(style);\n\
         }}\n\
         export default {map};\n"
    ))
}

/// Splits CSS into preludes (text before `{`) and declarations (text before
/// `;` or `}`) and rewrites each. Quoted strings and comments are kept
/// intact.
fn rewrite(
    css: &str,
    mut on_prelude: impl FnMut(&str) -> String,
    mut on_declaration: impl FnMut(&str) -> String,
) -> String {
    let mut out = String::with_capacity(css.len());
    let mut buffer = String::new();
    let mut quote: Option<char> = None;
    let mut chars = css.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            buffer.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    buffer.push(next);
                }
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                buffer.push(c);
            }
            '/' if chars.peek() == Some(&'*') => {
                out.push_str(&buffer);
                buffer.clear();
                out.push(c);
                let mut last = '\0';
                for c in chars.by_ref() {
                    out.push(c);
                    if last == '*' && c == '/' {
                        break;
                    }
                    last = c;
                }
            }
            '{' => {
                out.push_str(&on_prelude(&buffer));
                out.push(c);
                buffer.clear();
            }
            ';' | '}' => {
                if buffer.trim().is_empty() {
                    out.push_str(&buffer);
                } else {
                    out.push_str(&on_declaration(&buffer));
                }
                out.push(c);
                buffer.clear();
            }
            _ => buffer.push(c),
        }
    }

    out.push_str(&buffer);
    out
}
