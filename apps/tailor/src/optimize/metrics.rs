//! Quality and JD-coverage metrics over a validated résumé.
//!
//! Coverage is a substring heuristic: "java" also matches inside "javascript".
//! Terms with dots also match their dot-less spelling, so "Node.js" hits "node js".

use serde::{Deserialize, Serialize};

use crate::models::resume::ResumeDocument;
use crate::optimize::jd_parser::JdAnalysis;

// ────────────────────────────────────────────────────────────────────────────
// Output models
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulletMetrics {
    pub bullets_total: usize,
    pub bullets_avg_words: f64,
    /// 0 – 100, rounded
    pub bullets_with_numbers_pct: u32,
    /// Bullets mentioning any word of the target role.
    pub tailor_hit_count: usize,
    pub tailor_hit_pct: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketCoverage {
    pub matched: usize,
    pub total: usize,
    pub hits: Vec<String>,
    pub misses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageBuckets {
    pub must: BucketCoverage,
    pub skills_tools: BucketCoverage,
    pub keywords: BucketCoverage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub has_jd: bool,
    pub coverage_pct: u32,
    pub matched: usize,
    pub total: usize,
    pub hits: Vec<String>,
    pub misses: Vec<String>,
    pub buckets: CoverageBuckets,
    pub role: String,
    pub jd_title: String,
    pub seniority: String,
}

/// Persisted at `metrics/{jobId}.{label}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeMetrics {
    #[serde(flatten)]
    pub bullets: BulletMetrics,
    pub jd: Coverage,
}

// ────────────────────────────────────────────────────────────────────────────
// Bullet metrics
// ────────────────────────────────────────────────────────────────────────────

fn pct(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        0
    } else {
        (100.0 * part as f64 / whole as f64).round() as u32
    }
}

fn role_terms(role: &str) -> Vec<String> {
    role.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

pub fn bullet_metrics(doc: &ResumeDocument, role: &str) -> BulletMetrics {
    let bullets: Vec<&str> = doc.bullets().collect();
    let total = bullets.len();
    let words: usize = bullets.iter().map(|b| b.split_whitespace().count()).sum();
    let with_numbers = bullets
        .iter()
        .filter(|b| b.chars().any(|c| c.is_ascii_digit()))
        .count();

    let terms = role_terms(role);
    let tailor_hits = if terms.is_empty() {
        0
    } else {
        bullets
            .iter()
            .filter(|b| {
                let lower = b.to_lowercase();
                terms.iter().any(|t| lower.contains(t.as_str()))
            })
            .count()
    };

    BulletMetrics {
        bullets_total: total,
        bullets_avg_words: if total == 0 {
            0.0
        } else {
            words as f64 / total as f64
        },
        bullets_with_numbers_pct: pct(with_numbers, total),
        tailor_hit_count: tailor_hits,
        tailor_hit_pct: pct(tailor_hits, total),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// JD coverage
// ────────────────────────────────────────────────────────────────────────────

/// Lower-cases, maps everything outside `a-z 0-9 + - # .` and space to a
/// space, collapses whitespace and trims.
pub fn normalize_term(s: &str) -> String {
    let mapped: String = s
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '-' | '#' | '.' | ' ')
            {
                c
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn relax_dots(s: &str) -> String {
    s.replace('.', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

struct Haystack {
    exact: String,
    relaxed: String,
}

impl Haystack {
    fn new(text: &str) -> Self {
        let exact = normalize_term(text);
        let relaxed = relax_dots(&exact);
        Self { exact, relaxed }
    }

    fn hits(&self, term: &str) -> bool {
        if term.is_empty() {
            return false;
        }
        if self.exact.contains(term) {
            return true;
        }
        let relaxed = relax_dots(term);
        !relaxed.is_empty() && self.relaxed.contains(&relaxed)
    }
}

fn normalized_terms<'a>(items: impl IntoIterator<Item = &'a String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| normalize_term(s))
        .filter(|s| !s.is_empty())
        .collect()
}

fn bucket(haystack: &Haystack, items: Vec<String>) -> BucketCoverage {
    let (hits, misses): (Vec<String>, Vec<String>) =
        items.into_iter().partition(|t| haystack.hits(t));
    BucketCoverage {
        matched: hits.len(),
        total: hits.len() + misses.len(),
        hits,
        misses,
    }
}

pub fn coverage(doc: &ResumeDocument, jd: &JdAnalysis, role: &str) -> Coverage {
    let haystack = Haystack::new(&doc.searchable_text());

    let mut union: Vec<String> = Vec::new();
    for term in normalized_terms(
        jd.must
            .iter()
            .chain(&jd.skills)
            .chain(&jd.tools)
            .chain(&jd.keywords),
    ) {
        if !union.contains(&term) {
            union.push(term);
        }
    }
    let overall = bucket(&haystack, union);

    Coverage {
        has_jd: !(jd.must.is_empty()
            && jd.skills.is_empty()
            && jd.tools.is_empty()
            && jd.keywords.is_empty()),
        coverage_pct: pct(overall.matched, overall.total),
        matched: overall.matched,
        total: overall.total,
        hits: overall.hits,
        misses: overall.misses,
        buckets: CoverageBuckets {
            must: bucket(&haystack, normalized_terms(&jd.must)),
            skills_tools: bucket(&haystack, normalized_terms(jd.skills.iter().chain(&jd.tools))),
            keywords: bucket(&haystack, normalized_terms(&jd.keywords)),
        },
        role: role.to_string(),
        jd_title: jd.title.clone(),
        seniority: jd.seniority.clone(),
    }
}

pub fn compute(doc: &ResumeDocument, jd: &JdAnalysis, role: &str) -> OptimizeMetrics {
    OptimizeMetrics {
        bullets: bullet_metrics(doc, role),
        jd: coverage(doc, jd, role),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resume::Experience;

    fn doc(bullets: &[&str], skills: &[&str]) -> ResumeDocument {
        ResumeDocument {
            name: "Jane".into(),
            summary: "Backend engineer building node js services".into(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            experience: vec![Experience {
                title: "Software Engineer".into(),
                company: "Acme".into(),
                dates: "2021".into(),
                bullets: bullets.iter().map(|s| s.to_string()).collect(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_term() {
        assert_eq!(normalize_term("  C++ / Node.JS, (AWS)  "), "c++ node.js aws");
        assert_eq!(normalize_term("C#"), "c#");
        assert_eq!(normalize_term("***"), "");
    }

    #[test]
    fn test_bullet_metrics() {
        let d = doc(
            &["Cut latency 40%", "Built engineering dashboards", "Mentored two interns"],
            &[],
        );
        let m = bullet_metrics(&d, "Software Engineer");
        assert_eq!(m.bullets_total, 3);
        assert!((m.bullets_avg_words - 3.0).abs() < f64::EPSILON);
        assert_eq!(m.bullets_with_numbers_pct, 33);
        // "engineer" matches inside "engineering"
        assert_eq!(m.tailor_hit_count, 1);
        assert_eq!(m.tailor_hit_pct, 33);
    }

    #[test]
    fn test_bullet_metrics_empty() {
        let m = bullet_metrics(&ResumeDocument::default(), "");
        assert_eq!(m.bullets_total, 0);
        assert_eq!(m.bullets_avg_words, 0.0);
        assert_eq!(m.bullets_with_numbers_pct, 0);
        assert_eq!(m.tailor_hit_count, 0);
    }

    #[test]
    fn test_node_js_matches_node_space_js() {
        let d = doc(&[], &[]);
        let jd = JdAnalysis {
            keywords: vec!["Node.js".into()],
            ..Default::default()
        };
        let c = coverage(&d, &jd, "");
        assert_eq!(c.hits, vec!["node.js"]);
        assert_eq!(c.coverage_pct, 100);
        assert!(c.has_jd);
    }

    #[test]
    fn test_coverage_buckets_and_union() {
        let d = doc(&["Shipped Rust services on Kubernetes"], &["Rust", "PostgreSQL"]);
        let jd = JdAnalysis {
            title: "Platform Engineer".into(),
            seniority: "senior".into(),
            must: vec!["Rust".into(), "Go".into()],
            skills: vec!["rust".into(), "Terraform".into()],
            tools: vec!["Kubernetes".into()],
            keywords: vec!["PostgreSQL".into()],
            ..Default::default()
        };
        let c = coverage(&d, &jd, "Platform Engineer");

        assert_eq!(c.total, 5); // rust, go, terraform, kubernetes, postgresql
        assert_eq!(c.matched, 3);
        assert_eq!(c.coverage_pct, 60);
        assert_eq!(c.misses, vec!["go", "terraform"]);
        assert_eq!(c.buckets.must.matched, 1);
        assert_eq!(c.buckets.must.total, 2);
        assert_eq!(c.buckets.skills_tools.total, 3);
        assert_eq!(c.buckets.skills_tools.hits, vec!["rust", "kubernetes"]);
        assert_eq!(c.buckets.keywords.matched, 1);
        assert_eq!(c.jd_title, "Platform Engineer");
        assert_eq!(c.seniority, "senior");
    }

    #[test]
    fn test_substring_imprecision_is_kept() {
        let d = doc(&["Wrote JavaScript tooling"], &[]);
        let jd = JdAnalysis {
            must: vec!["Java".into()],
            ..Default::default()
        };
        assert_eq!(coverage(&d, &jd, "").matched, 1);
    }

    #[test]
    fn test_no_jd_coverage() {
        let c = coverage(&doc(&[], &[]), &JdAnalysis::default(), "SWE");
        assert!(!c.has_jd);
        assert_eq!(c.total, 0);
        assert_eq!(c.coverage_pct, 0);
        assert_eq!(c.role, "SWE");
    }

    #[test]
    fn test_metrics_serialize_flat() {
        let m = compute(&doc(&["Did 1 thing"], &[]), &JdAnalysis::default(), "");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["bullets_total"], 1);
        assert!(v["jd"]["buckets"]["skills_tools"].is_object());
    }
}
