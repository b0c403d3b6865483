use serde::{Deserialize, Serialize};

/// The structured résumé produced by the optimize stage and bound into templates.
///
/// Unknown keys from the generator are dropped on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeDocument {
    pub name: String,
    pub contact: Contact,
    pub summary: String,
    pub experience: Vec<Experience>,
    pub education: Vec<Education>,
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub title: String,
    pub company: String,
    pub dates: String,
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Education {
    pub degree: String,
    pub school: String,
    pub dates: String,
}

impl ResumeDocument {
    pub fn bullets(&self) -> impl Iterator<Item = &str> {
        self.experience
            .iter()
            .flat_map(|e| e.bullets.iter().map(String::as_str))
    }

    /// Flattened text used for coverage matching: summary, skills, then every
    /// experience and education field.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = vec![self.summary.as_str()];
        parts.extend(self.skills.iter().map(String::as_str));
        for job in &self.experience {
            parts.push(&job.title);
            parts.push(&job.company);
            parts.extend(job.bullets.iter().map(String::as_str));
        }
        for edu in &self.education {
            parts.push(&edu.degree);
            parts.push(&edu.school);
            parts.push(&edu.dates);
        }
        parts.join(" ")
    }
}
