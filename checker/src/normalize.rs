//! Makes two Junos configurations comparable.
//!
//! Switches stamp the running software version at the top of the config,
//! annotate it with `/* ... */` blocks and `#` comment lines, and store
//! passwords salted per device. None of that is drift; everything else is.

const ANNOTATION_START: &str = "/*";
const ANNOTATION_END: &str = "*/";
const PASSWORD_FIELD: &str = "encrypted-password";
const PASSWORD_PLACEHOLDER: &str = "encrypted-password \"dummy\";";

/// Returns the comparable form of a raw configuration.
///
/// Pure and idempotent. Annotation blocks are removed first; then version
/// lines, comment lines and blank lines are dropped, every line holding an
/// encrypted password has the secret replaced by a placeholder, and the
/// result is trimmed.
pub fn normalize(raw: &str) -> String {
    let stripped = strip_annotations(raw);

    let mut lines: Vec<String> = Vec::new();
    for line in stripped.lines() {
        // The first kept line loses its indentation when the result is
        // trimmed, so it is judged unindented.
        let top = if lines.is_empty() { line.trim_start() } else { line };
        if is_version_line(top) || is_comment_line(line) || line.trim().is_empty() {
            continue;
        }
        lines.push(mask_password(line));
    }

    lines.join("\n").trim().to_string()
}

/// Removes `/* ... */` blocks, which may span lines. An unterminated `/*`
/// and everything after it is kept.
fn strip_annotations(raw: &str) -> String {
    let mut text = raw.to_string();
    loop {
        let mut out = String::with_capacity(text.len());
        let mut rest = text.as_str();

        while let Some(start) = rest.find(ANNOTATION_START) {
            let body = &rest[start + ANNOTATION_START.len()..];
            let Some(end) = body.find(ANNOTATION_END) else {
                break;
            };
            out.push_str(&rest[..start]);
            rest = &body[end + ANNOTATION_END.len()..];
        }
        out.push_str(rest);

        // Removing a block can splice a new `/*` ... `*/` pair together.
        if out.len() == text.len() {
            return out;
        }
        text = out;
    }
}

/// The version banner is a top-level statement. Indented `version`
/// statements belong to protocol blocks and are compared like any other.
fn is_version_line(line: &str) -> bool {
    line.strip_prefix("version")
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}

fn is_comment_line(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn mask_password(line: &str) -> String {
    match line.find(PASSWORD_FIELD) {
        Some(pos) => format!("{}{PASSWORD_PLACEHOLDER}", &line[..pos]),
        None => line.to_string(),
    }
}
