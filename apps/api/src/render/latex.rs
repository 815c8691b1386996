//! LaTeX source rendering.
//!
//! Every payload field is untrusted: each value passes through
//! `escape` before it is embedded, so no field can smuggle LaTeX
//! commands into the compiled document.

use crate::models::document::{CoverLetterPayload, DocumentPayload, ResumePayload};

/// Neutralizes every LaTeX-active character. Control characters other
/// than newline are stripped; newlines become spaces (paragraph breaks
/// are the template's job, not the payload's).
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str(r"\textbackslash{}"),
            '{' => out.push_str(r"\{"),
            '}' => out.push_str(r"\}"),
            '$' => out.push_str(r"\$"),
            '&' => out.push_str(r"\&"),
            '#' => out.push_str(r"\#"),
            '_' => out.push_str(r"\_"),
            '%' => out.push_str(r"\%"),
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            '\n' => out.push(' '),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

pub fn render_document(payload: &DocumentPayload) -> String {
    match payload {
        DocumentPayload::Resume(resume) => render_resume(resume),
        DocumentPayload::CoverLetter(letter) => render_cover_letter(letter),
    }
}

fn preamble(doc: &mut String) {
    doc.push_str("\\documentclass[11pt]{article}\n");
    doc.push_str("\\usepackage[margin=1in]{geometry}\n");
    doc.push_str("\\usepackage[T1]{fontenc}\n");
    doc.push_str("\\pagestyle{empty}\n");
    doc.push_str("\\begin{document}\n");
}

fn contact_line(doc: &mut String, parts: &[Option<&String>]) {
    let line: Vec<String> = parts
        .iter()
        .filter_map(|part| part.map(|value| escape(value)))
        .collect();
    if !line.is_empty() {
        doc.push_str(&line.join(" \\textbar{} "));
        doc.push_str("\n\n");
    }
}

fn render_resume(resume: &ResumePayload) -> String {
    let mut doc = String::new();
    preamble(&mut doc);

    doc.push_str(&format!(
        "{{\\LARGE \\textbf{{{}}}}}\n\n",
        escape(&resume.personal.name)
    ));
    contact_line(
        &mut doc,
        &[
            resume.personal.email.as_ref(),
            resume.personal.phone.as_ref(),
            resume.personal.location.as_ref(),
            resume.personal.website.as_ref(),
        ],
    );

    if let Some(summary) = &resume.personal.summary {
        doc.push_str(&format!("{}\n\n", escape(summary)));
    }

    if !resume.experience.is_empty() {
        doc.push_str("\\section*{Experience}\n");
        for item in &resume.experience {
            doc.push_str(&format!(
                "\\textbf{{{}}} --- {}",
                escape(&item.role),
                escape(&item.company)
            ));
            let dates: Vec<String> = [item.date_start.as_ref(), item.date_end.as_ref()]
                .iter()
                .filter_map(|d| d.map(|v| escape(v)))
                .collect();
            if !dates.is_empty() {
                doc.push_str(&format!(" \\hfill {}", dates.join(" -- ")));
            }
            doc.push('\n');
            if !item.bullets.is_empty() {
                doc.push_str("\\begin{itemize}\n");
                for bullet in &item.bullets {
                    doc.push_str(&format!("  \\item {}\n", escape(bullet)));
                }
                doc.push_str("\\end{itemize}\n");
            }
            doc.push('\n');
        }
    }

    if !resume.education.is_empty() {
        doc.push_str("\\section*{Education}\n");
        for item in &resume.education {
            doc.push_str(&format!(
                "\\textbf{{{}}}, {}",
                escape(&item.degree),
                escape(&item.institution)
            ));
            if let Some(year) = &item.year {
                doc.push_str(&format!(" \\hfill {}", escape(year)));
            }
            doc.push_str("\n\n");
        }
    }

    if !resume.skills.is_empty() {
        doc.push_str("\\section*{Skills}\n");
        let skills: Vec<String> = resume.skills.iter().map(|s| escape(s)).collect();
        doc.push_str(&format!("{}\n", skills.join(" \\textbullet{} ")));
    }

    doc.push_str("\\end{document}\n");
    doc
}

fn render_cover_letter(letter: &CoverLetterPayload) -> String {
    let mut doc = String::new();
    preamble(&mut doc);

    doc.push_str(&format!(
        "{{\\LARGE \\textbf{{{}}}}}\n\n",
        escape(&letter.personal.name)
    ));
    contact_line(
        &mut doc,
        &[
            letter.personal.email.as_ref(),
            letter.personal.phone.as_ref(),
            letter.personal.location.as_ref(),
        ],
    );

    let recipient: Vec<String> = [
        letter.recipient.name.as_ref(),
        letter.recipient.company.as_ref(),
        letter.recipient.address.as_ref(),
    ]
    .iter()
    .filter_map(|part| part.map(|v| escape(v)))
    .collect();
    if !recipient.is_empty() {
        doc.push_str(&format!("{}\n\n", recipient.join(" \\\\ ")));
    }

    if let Some(subject) = &letter.subject {
        doc.push_str(&format!("\\textbf{{{}}}\n\n", escape(subject)));
    }

    for paragraph in &letter.paragraphs {
        if paragraph.trim().is_empty() {
            continue;
        }
        doc.push_str(&format!("{}\n\n", escape(paragraph)));
    }

    if let Some(closing) = &letter.closing {
        doc.push_str(&format!("{},\n\n{}\n", escape(closing), escape(&letter.personal.name)));
    }

    doc.push_str("\\end{document}\n");
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::document::{PersonalInfo, RecipientInfo};

    fn personal() -> PersonalInfo {
        PersonalInfo {
            name: "Ada Lovelace".to_string(),
            email: Some("ada@example.com".to_string()),
            phone: None,
            location: None,
            website: None,
            summary: None,
        }
    }

    #[test]
    fn test_escape_neutralizes_every_active_character() {
        let escaped = escape(r"100% of $5 & #1_rank {x} ~y ^z \cmd");
        assert!(!escaped.contains("\\cmd"));
        assert!(escaped.contains(r"\%"));
        assert!(escaped.contains(r"\$"));
        assert!(escaped.contains(r"\&"));
        assert!(escaped.contains(r"\#"));
        assert!(escaped.contains(r"\_"));
        assert!(escaped.contains(r"\{"));
        assert!(escaped.contains(r"\}"));
        assert!(escaped.contains(r"\textasciitilde{}"));
        assert!(escaped.contains(r"\textasciicircum{}"));
        assert!(escaped.contains(r"\textbackslash{}"));
    }

    #[test]
    fn test_escape_strips_control_characters() {
        assert_eq!(escape("a\u{0007}b\nc"), "ab c");
    }

    #[test]
    fn test_injection_in_a_field_stays_inert() {
        let mut info = personal();
        info.name = r"\input{/etc/passwd}".to_string();
        let doc = render_resume(&ResumePayload {
            personal: info,
            experience: vec![],
            education: vec![],
            skills: vec![],
        });
        assert!(!doc.contains(r"\input"));
    }

    #[test]
    fn test_resume_renders_sections() {
        let doc = render_resume(&ResumePayload {
            personal: personal(),
            experience: vec![],
            education: vec![],
            skills: vec!["Rust".to_string(), "C++".to_string()],
        });
        assert!(doc.starts_with("\\documentclass"));
        assert!(doc.contains("Ada Lovelace"));
        assert!(doc.contains("\\section*{Skills}"));
        assert!(doc.ends_with("\\end{document}\n"));
    }

    #[test]
    fn test_cover_letter_renders_paragraphs_and_closing() {
        let doc = render_cover_letter(&CoverLetterPayload {
            personal: personal(),
            recipient: RecipientInfo {
                name: Some("Hiring Team".to_string()),
                company: Some("Acme".to_string()),
                address: None,
            },
            subject: Some("Application".to_string()),
            paragraphs: vec!["First paragraph.".to_string(), String::new()],
            closing: Some("Sincerely".to_string()),
        });
        assert!(doc.contains("Hiring Team"));
        assert!(doc.contains("First paragraph."));
        assert!(doc.contains("Sincerely,"));
    }
}
