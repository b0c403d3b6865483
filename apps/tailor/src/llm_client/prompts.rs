// Cross-cutting prompt fragments. Per-configuration instruction text lives in
// prompts::builtin.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// System prompt for the single repair call after an unparseable result.
pub const JSON_REPAIR_SYSTEM: &str =
    "Fix the following to valid JSON only. Return ONLY valid JSON.";

/// System prompt for job-description analysis.
pub const JD_ANALYSIS_SYSTEM: &str = "You are an expert job description analyst. \
    Extract key elements from the job description. \
    Return ONLY valid JSON with this shape: \
    {\"title\": string, \"seniority\": string, \"must\": string[], \"nice\": string[], \
    \"skills\": string[], \"tools\": string[], \"certs\": string[], \"keywords\": string[], \
    \"anti_patterns\": string[]}. \
    Use short noun phrases. Use empty arrays when nothing applies.";

/// Output schema interpolated into instruction text at `{schema}`.
pub const RESUME_SCHEMA: &str = r#"{
  "name": "string",
  "contact": { "email": "string", "phone": "string" },
  "summary": "string",
  "experience": [
    { "title": "string", "company": "string", "dates": "string", "bullets": ["string"] }
  ],
  "education": [
    { "degree": "string", "school": "string", "dates": "string" }
  ],
  "skills": ["string"]
}"#;
