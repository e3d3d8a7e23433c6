//! Construcción del prompt a partir de la cadena de ancestros y extracción
//! del título de la respuesta generada.

use crate::models::NodeData;
use crate::text_util::truncate_text;

const TITLE_PREFIX: &str = "Title: ";
const TITLE_MAX_CHARS: usize = 50;
const UNTITLED: &str = "Untitled node";

const TITLE_INSTRUCTION: &str = "Begin your response with a first line of the form \
\"Title: \" followed by a short title, then two line breaks, then the body.";

/// Título y cuerpo derivados de una respuesta en bruto del backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub title: String,
    pub answer: String,
}

/// Historial lineal `User:`/`AI:` de la cadena, de la raíz al nodo.
pub fn conversation_history(chain: &[NodeData]) -> String {
    chain
        .iter()
        .flat_map(|n| [format!("User: {}\n", n.question), format!("AI: {}\n", n.answer)])
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt completo: historial (si lo hay) más la pregunta con la instrucción de título.
pub fn build_prompt(chain: &[NodeData], question: &str) -> String {
    let mut prompt = conversation_history(chain);
    if !prompt.is_empty() {
        prompt.push_str("\n\n");
    }
    prompt.push_str("User: ");
    prompt.push_str(TITLE_INSTRUCTION);
    prompt.push_str("\n\nQuestion: ");
    prompt.push_str(question);
    prompt
}

/// Separa el título del cuerpo siguiendo la convención `Title: ...`.
/// Sin prefijo, el título es la primera línea y el cuerpo el texto completo.
pub fn split_title(response: &str) -> ParsedResponse {
    let (title, answer) = match response.strip_prefix(TITLE_PREFIX) {
        Some(rest) => {
            let parts: Vec<&str> = rest.splitn(3, '\n').collect();
            let body = match parts.as_slice() {
                [_, body] if !body.trim().is_empty() => body.to_string(),
                [_, _, body] => body.to_string(),
                _ => String::new(),
            };
            (parts[0].trim().to_string(), body)
        }
        None => (
            response.lines().next().unwrap_or_default().to_string(),
            response.to_string(),
        ),
    };

    let title = truncate_text(&title, TITLE_MAX_CHARS);
    let title = if title.trim().is_empty() {
        UNTITLED.to_string()
    } else {
        title
    };

    ParsedResponse { title, answer }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_chronological() {
        let chain = vec![
            NodeData::new("a", None, "A", "q1", "a1"),
            NodeData::new("b", Some("a".into()), "B", "q2", "a2"),
        ];
        assert_eq!(
            conversation_history(&chain),
            "User: q1\n\nAI: a1\n\nUser: q2\n\nAI: a2\n"
        );
    }

    #[test]
    fn prompt_without_history_has_only_the_question() {
        let prompt = build_prompt(&[], "¿Qué es Rust?");
        assert!(prompt.starts_with("User: Begin your response"));
        assert!(prompt.ends_with("\n\nQuestion: ¿Qué es Rust?"));
    }

    #[test]
    fn prompt_with_history_prefixes_it() {
        let chain = vec![NodeData::new("a", None, "A", "q1", "a1")];
        let prompt = build_prompt(&chain, "q2");
        assert!(prompt.starts_with("User: q1\n\nAI: a1\n\n\nUser: Begin"));
    }

    #[test]
    fn title_prefix_is_extracted() {
        let parsed = split_title("Title: Ownership\n\nRust tracks ownership.\nMore.");
        assert_eq!(parsed.title, "Ownership");
        assert_eq!(parsed.answer, "Rust tracks ownership.\nMore.");
    }

    #[test]
    fn title_with_single_body_line() {
        let parsed = split_title("Title: Short\nbody");
        assert_eq!(parsed.title, "Short");
        assert_eq!(parsed.answer, "body");

        let parsed = split_title("Title: Only\n   ");
        assert_eq!(parsed.answer, "");

        let parsed = split_title("Title: Alone");
        assert_eq!(parsed.title, "Alone");
        assert_eq!(parsed.answer, "");
    }

    #[test]
    fn fallback_title_is_first_line() {
        let parsed = split_title("API Error: quota exceeded\ndetails");
        assert_eq!(parsed.title, "API Error: quota exceeded");
        assert_eq!(parsed.answer, "API Error: quota exceeded\ndetails");
    }

    #[test]
    fn long_titles_are_truncated_and_empty_ones_replaced() {
        let parsed = split_title(&format!("Title: {}\n\nx", "t".repeat(80)));
        assert_eq!(parsed.title.chars().count(), TITLE_MAX_CHARS);
        assert!(parsed.title.ends_with("..."));

        assert_eq!(split_title("").title, UNTITLED);
        assert_eq!(split_title("Title: \n\nbody").title, UNTITLED);
    }
}
