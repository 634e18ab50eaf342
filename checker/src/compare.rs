use crate::normalize::normalize;
use std::collections::HashMap;

/// Above this many LCS table cells the diff falls back to per-line counts.
const MAX_DIFF_CELLS: usize = 1 << 22;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub matches: bool,
    a: String,
    b: String,
}

impl Comparison {
    /// Line diff from `a` to `b` for operators. Empty when they match.
    ///
    /// Computed on demand; the match decision never needs it.
    pub fn diff(&self) -> String {
        if self.matches {
            return String::new();
        }
        line_diff(&self.a, &self.b)
    }
}

/// Compares two raw configurations after normalizing both.
pub fn compare(a: &str, b: &str) -> Comparison {
    let a = normalize(a);
    let b = normalize(b);

    Comparison {
        matches: a == b,
        a,
        b,
    }
}

/// Renders the lines only in `a` as `- ` and the lines only in `b` as `+ `,
/// in document order, based on a longest common subsequence of lines.
fn line_diff(a: &str, b: &str) -> String {
    let a: Vec<&str> = a.lines().collect();
    let b: Vec<&str> = b.lines().collect();

    // Shared head and tail don't need the quadratic table.
    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let a = &a[prefix..a.len() - suffix];
    let b = &b[prefix..b.len() - suffix];

    if (a.len() + 1).saturating_mul(b.len() + 1) > MAX_DIFF_CELLS {
        return count_diff(a, b);
    }

    // lcs[i][j] is the LCS length of a[i..] and b[j..].
    let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = String::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        if i < a.len() && j < b.len() && a[i] == b[j] {
            i += 1;
            j += 1;
        } else if j == b.len() || (i < a.len() && lcs[i + 1][j] >= lcs[i][j + 1]) {
            push_line(&mut out, "- ", a[i]);
            i += 1;
        } else {
            push_line(&mut out, "+ ", b[j]);
            j += 1;
        }
    }
    out
}

/// Linear fallback for large inputs: a line is reported when it occurs more
/// often on one side than on the other. Ordering within the surplus follows
/// each document, but moved lines are not detected.
fn count_diff(a: &[&str], b: &[&str]) -> String {
    let mut balance: HashMap<&str, isize> = HashMap::new();
    for line in a {
        *balance.entry(*line).or_default() += 1;
    }
    for line in b {
        *balance.entry(*line).or_default() -= 1;
    }

    let mut out = String::new();
    for line in a {
        if let Some(n) = balance.get_mut(line)
            && *n > 0
        {
            *n -= 1;
            push_line(&mut out, "- ", line);
        }
    }
    for line in b {
        if let Some(n) = balance.get_mut(line)
            && *n < 0
        {
            *n += 1;
            push_line(&mut out, "+ ", line);
        }
    }
    out
}

fn push_line(out: &mut String, marker: &str, line: &str) {
    out.push_str(marker);
    out.push_str(line);
    out.push('\n');
}
