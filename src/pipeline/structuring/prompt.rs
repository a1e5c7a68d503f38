use crate::config::{PATH_SEPARATOR, PRIOR_YEAR_PREFIX, TEMPLATE_PREFIX};

pub const EXTRACTION_SYSTEM_PROMPT: &str = r#"
You are a bookkeeping assistant preparing rental property schedules for a tax
accountant. You read client source documents and extract income and expense
figures per rental property. You never give tax advice.

RULES:
1. Use ONLY figures explicitly present in the documents. Never estimate.
2. Every current-year amount must cite the exact file it came from in
   "source_file", copied verbatim from the FILE CONTENT or BINARY FILE label,
   including any " > " breadcrumb for files found inside emails.
3. Documents after the PRIOR YEAR or TEMPLATE markers are reference only. Use
   them for "income_prior" / "expenses_prior" and for category names. Never cite
   them as a current-year source.
4. Prefer the category names used by the prior-year return or template when a
   current-year item clearly matches one.
5. Amounts are plain numbers without currency symbols or thousands separators.
6. List in "source_files_read" every file that contributed to a property.
7. If information needed to finish the return is missing, write a short,
   polite email to the client in "email_draft" listing what is missing.
   Otherwise leave it empty.
"#;

/// Build the instruction prompt that precedes the document parts.
pub fn build_extraction_prompt(tax_year: Option<i32>) -> String {
    let year_note = match tax_year {
        Some(year) => format!("The return being prepared is for tax year {year}.\n"),
        None => "Determine the tax year from the documents.\n".to_string(),
    };

    format!(
        r#"{EXTRACTION_SYSTEM_PROMPT}
{year_note}
Paths inside email containers are written as "Email.msg{PATH_SEPARATOR}attachment.pdf".
Reference paths start with "{PRIOR_YEAR_PREFIX}/" or "{TEMPLATE_PREFIX}/".

Respond with a single JSON object and nothing else:

{{
  "tax_year": 2024,
  "properties": [
    {{
      "address": "string",
      "income": {{"<category>": {{"amount": 0.0, "source_file": "string"}}}},
      "income_prior": {{"<category>": 0.0}},
      "expenses": {{"<category>": {{"amount": 0.0, "source_file": "string"}}}},
      "expenses_prior": {{"<category>": 0.0}},
      "source_files_read": ["string"],
      "notes": "string"
    }}
  ],
  "all_files_detected": ["string"],
  "email_draft": "string"
}}
"#
    )
}
