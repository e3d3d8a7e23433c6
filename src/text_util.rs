//! Utilidades de recorte de texto para las vistas previas de los nodos.

use crate::models::NodeData;

const ELLIPSIS: &str = "...";

const COLLAPSED_PREVIEW_CHARS: usize = 120;
const COLLAPSED_PREVIEW_LINES: usize = 2;
const EXPANDED_PREVIEW_CHARS: usize = 2000;

/// Recorta `s` a `max_len` caracteres (no bytes), terminando en `...` si cabe.
pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len > ELLIPSIS.len() {
        let mut out: String = s.chars().take(max_len - ELLIPSIS.len()).collect();
        out.push_str(ELLIPSIS);
        out
    } else {
        s.chars().take(max_len).collect()
    }
}

/// Limita el texto a `max_lines` líneas y `max_chars` caracteres (0 = sin límite).
/// Si se recorta algo, se añade un único `...` al final.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize, max_lines: usize) -> String {
    let mut truncated = false;

    let mut text = if max_lines > 0 && s.lines().count() > max_lines {
        truncated = true;
        s.lines().take(max_lines).collect::<Vec<_>>().join("\n")
    } else {
        s.to_string()
    };

    if max_chars > 0 && text.chars().count() > max_chars {
        truncated = true;
        text = text
            .chars()
            .take(max_chars.saturating_sub(ELLIPSIS.len()))
            .collect();
    }

    if truncated {
        let mut out = text.trim_end().to_string();
        out.push_str(ELLIPSIS);
        out
    } else {
        text
    }
}

/// Vista previa de la respuesta: corta si el nodo está plegado, amplia si está desplegado.
pub fn node_preview(node: &NodeData) -> String {
    if node.expanded {
        truncate_with_ellipsis(&node.answer, EXPANDED_PREVIEW_CHARS, 0)
    } else {
        truncate_with_ellipsis(&node.answer, COLLAPSED_PREVIEW_CHARS, COLLAPSED_PREVIEW_LINES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_keeps_short_strings() {
        assert_eq!(truncate_text("hola", 10), "hola");
        assert_eq!(truncate_text("", 3), "");
    }

    #[test]
    fn truncate_text_counts_chars_not_bytes() {
        assert_eq!(truncate_text("ñandú ñandú", 8), "ñandú...");
        assert_eq!(truncate_text("日本語のタイトル", 5), "日本...");
    }

    #[test]
    fn truncate_text_without_room_for_ellipsis() {
        assert_eq!(truncate_text("abcdef", 3), "abc");
        assert_eq!(truncate_text("abcdef", 0), "");
    }

    #[test]
    fn ellipsis_limits_lines() {
        assert_eq!(truncate_with_ellipsis("a\nb\nc", 0, 2), "a\nb...");
        assert_eq!(truncate_with_ellipsis("a\nb", 0, 2), "a\nb");
    }

    #[test]
    fn ellipsis_limits_chars() {
        assert_eq!(truncate_with_ellipsis("abcdefgh", 5, 0), "ab...");
        assert_eq!(truncate_with_ellipsis("abcde", 5, 0), "abcde");
    }

    #[test]
    fn ellipsis_is_added_once_when_both_limits_apply() {
        let out = truncate_with_ellipsis("abcdef\nghijkl\nmnop", 10, 2);
        assert_eq!(out, "abcdef\ng...");
        assert_eq!(out.matches("...").count(), 1);
    }

    #[test]
    fn preview_depends_on_expanded_flag() {
        let long = "línea\n".repeat(10);
        let mut node = NodeData::new("n1", None, "t", "q", long.clone());
        assert_eq!(node_preview(&node), "línea\nlínea...");

        node.expanded = true;
        assert_eq!(node_preview(&node), long);
    }
}
