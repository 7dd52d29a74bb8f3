use super::citations::{find_markers, is_marker_only};

/// Split a draft into candidate claim sentences.
///
/// Works line by line: headers and separators are skipped, bullet markers are
/// stripped, then each line is cut at terminal punctuation. Markers that end
/// up leading the next sentence (`rose 3cm. [1] Next`) are moved back to the
/// sentence they cite.
pub fn split_sentences(draft: &str) -> Vec<String> {
    let mut sentences: Vec<String> = Vec::new();

    for line in draft.lines() {
        let line = line.trim();
        if line.is_empty() || is_header(line) {
            continue;
        }
        let line = strip_bullet(line);

        for piece in split_line(line) {
            let (leading, rest) = split_leading_markers(&piece);
            if !leading.is_empty() {
                if let Some(prev) = sentences.last_mut() {
                    prev.push(' ');
                    prev.push_str(leading.trim());
                }
            }
            let rest = rest.trim();
            if rest.is_empty() || is_marker_only(rest) {
                continue;
            }
            sentences.push(rest.to_string());
        }
    }

    sentences
}

fn is_header(line: &str) -> bool {
    if line.starts_with('#') {
        return true;
    }
    if line.chars().all(|c| matches!(c, '-' | '=' | '*' | '_' | ' ')) {
        return true;
    }
    if line.ends_with(':') || line.ends_with('：') {
        return true;
    }
    // a line that is entirely bold, e.g. "**Summary**"
    line.len() > 4
        && line.starts_with("**")
        && line.ends_with("**")
        && !line[2..line.len() - 2].contains("**")
}

fn strip_bullet(line: &str) -> &str {
    for bullet in ["- ", "* ", "• ", "・", "+ "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return rest.trim_start();
        }
    }

    // "1. " / "1) "
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(after) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return after.trim_start();
        }
    }
    line
}

fn split_line(line: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |next| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            pieces.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Split off markers sitting at the very start of `piece`.
fn split_leading_markers(piece: &str) -> (&str, &str) {
    let trimmed_start = piece.len() - piece.trim_start().len();
    let mut cut = trimmed_start;

    for marker in find_markers(piece) {
        let gap = &piece[cut..marker.start];
        if !gap.trim().is_empty() {
            break;
        }
        cut = marker.end;
    }

    if cut == trimmed_start {
        ("", piece)
    } else {
        (&piece[trimmed_start..cut], &piece[cut..])
    }
}
