use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalInfo {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceItem {
    pub company: String,
    pub role: String,
    #[serde(default)]
    pub date_start: Option<String>,
    #[serde(default)]
    pub date_end: Option<String>,
    #[serde(default)]
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EducationItem {
    pub institution: String,
    pub degree: String,
    #[serde(default)]
    pub year: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    pub personal: PersonalInfo,
    #[serde(default)]
    pub experience: Vec<ExperienceItem>,
    #[serde(default)]
    pub education: Vec<EducationItem>,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipientInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverLetterPayload {
    pub personal: PersonalInfo,
    #[serde(default)]
    pub recipient: RecipientInfo,
    #[serde(default)]
    pub subject: Option<String>,
    pub paragraphs: Vec<String>,
    #[serde(default)]
    pub closing: Option<String>,
}

/// The two document kinds the pipeline renders. The serde tag keeps a
/// resume and a cover letter with coincidentally identical fields from
/// ever sharing a cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentPayload {
    Resume(ResumePayload),
    CoverLetter(CoverLetterPayload),
}

impl DocumentPayload {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            DocumentPayload::Resume(resume) => {
                if resume.personal.name.trim().is_empty() {
                    return Err("personal.name cannot be empty".to_string());
                }
            }
            DocumentPayload::CoverLetter(letter) => {
                if letter.personal.name.trim().is_empty() {
                    return Err("personal.name cannot be empty".to_string());
                }
                if letter.paragraphs.iter().all(|p| p.trim().is_empty()) {
                    return Err("paragraphs cannot be empty".to_string());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn personal(name: &str) -> PersonalInfo {
        PersonalInfo {
            name: name.to_string(),
            email: None,
            phone: None,
            location: None,
            website: None,
            summary: None,
        }
    }

    #[test]
    fn test_blank_name_is_rejected() {
        let payload = DocumentPayload::Resume(ResumePayload {
            personal: personal("  "),
            experience: vec![],
            education: vec![],
            skills: vec![],
        });
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_cover_letter_needs_body_text() {
        let payload = DocumentPayload::CoverLetter(CoverLetterPayload {
            personal: personal("Ada"),
            recipient: RecipientInfo::default(),
            subject: None,
            paragraphs: vec!["  ".to_string()],
            closing: None,
        });
        assert!(payload.validate().is_err());
    }

    #[test]
    fn test_kind_tag_separates_document_types() {
        let resume = serde_json::to_value(DocumentPayload::Resume(ResumePayload {
            personal: personal("Ada"),
            experience: vec![],
            education: vec![],
            skills: vec![],
        }))
        .unwrap();
        assert_eq!(resume["kind"], "resume");
    }
}
