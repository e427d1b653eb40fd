//! Custom Markdown parser (no tree-sitter grammar)
//!
//! Extracts three chunk kinds: headings, fenced code blocks, and prose
//! paragraphs. Line numbers are 1-indexed like the tree-sitter path.

use super::types::{ChunkKind, ParsedChunk};

/// Minimum paragraph length to index (skips stray single words)
const MIN_PARAGRAPH_LEN: usize = 16;

/// Parse markdown source into chunks.
pub fn parse_markdown_chunks(source: &str) -> Vec<ParsedChunk> {
    let mut chunks = Vec::new();
    let lines: Vec<&str> = source.lines().collect();
    let mut i = 0usize;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();

        if let Some(heading) = parse_heading(trimmed) {
            chunks.push(ParsedChunk {
                kind: ChunkKind::Heading,
                name: Some(heading.to_string()),
                start_line: (i + 1) as u32,
                end_line: (i + 1) as u32,
                code: line.to_string(),
            });
            i += 1;
        } else if let Some(fence) = fence_marker(trimmed) {
            let start = i;
            let mut end = i + 1;
            while end < lines.len() && fence_marker(lines[end].trim_start()) != Some(fence) {
                end += 1;
            }
            // Unterminated fence runs to EOF
            let close = end.min(lines.len().saturating_sub(1));
            chunks.push(ParsedChunk {
                kind: ChunkKind::CodeBlock,
                name: None,
                start_line: (start + 1) as u32,
                end_line: (close + 1) as u32,
                code: lines[start..=close].join("\n"),
            });
            i = close + 1;
        } else if trimmed.is_empty() {
            i += 1;
        } else {
            // Paragraph: consecutive non-empty, non-structural lines
            let start = i;
            while i < lines.len() {
                let t = lines[i].trim_start();
                if t.is_empty() || parse_heading(t).is_some() || fence_marker(t).is_some() {
                    break;
                }
                i += 1;
            }
            let code = lines[start..i].join("\n");
            if code.trim().len() >= MIN_PARAGRAPH_LEN {
                chunks.push(ParsedChunk {
                    kind: ChunkKind::Paragraph,
                    name: None,
                    start_line: (start + 1) as u32,
                    end_line: i as u32,
                    code,
                });
            }
        }
    }

    chunks
}

/// ATX heading text, if the line is one (`# ...` through `###### ...`)
fn parse_heading(line: &str) -> Option<&str> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if rest.starts_with(' ') || rest.starts_with('\t') {
        Some(rest.trim())
    } else {
        None
    }
}

/// Fence marker character for ``` or ~~~ fences (ignores the info string)
fn fence_marker(line: &str) -> Option<char> {
    if line.starts_with("```") {
        Some('`')
    } else if line.starts_with("~~~") {
        Some('~')
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headings_and_paragraphs() {
        let src = "# Title\n\nSome introductory paragraph text here.\n\n## Section\n";
        let chunks = parse_markdown_chunks(src);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].kind, ChunkKind::Heading);
        assert_eq!(chunks[0].name.as_deref(), Some("Title"));
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[1].kind, ChunkKind::Paragraph);
        assert_eq!(chunks[2].name.as_deref(), Some("Section"));
    }

    #[test]
    fn test_fenced_code_block() {
        let src = "intro paragraph long enough\n\n```rust\nfn main() {}\n```\nafter block paragraph\n";
        let chunks = parse_markdown_chunks(src);
        let block = chunks
            .iter()
            .find(|c| c.kind == ChunkKind::CodeBlock)
            .expect("code block chunk");
        assert!(block.code.contains("fn main() {}"));
        assert_eq!(block.start_line, 3);
        assert_eq!(block.end_line, 5);
    }

    #[test]
    fn test_unterminated_fence_runs_to_eof() {
        let src = "```\nlet x = 1;\nlet y = 2;";
        let chunks = parse_markdown_chunks(src);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::CodeBlock);
        assert_eq!(chunks[0].end_line, 3);
    }

    #[test]
    fn test_short_paragraph_skipped() {
        let chunks = parse_markdown_chunks("ok\n");
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_hash_without_space_is_not_heading() {
        let chunks = parse_markdown_chunks("#hashtag but actually a paragraph\n");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Paragraph);
    }
}
