//! Prompt construction
//!
//! The schema brief condenses allow-listed models into one line each; the
//! prompt template wraps it with the governance rules, the question and the
//! user's filters.

use crate::filters::FilterState;
use minijinja::{context, Environment};
use whyline_core::ModelCatalog;

/// Columns listed per model in the schema brief
pub const DEFAULT_BRIEF_COLUMNS: usize = 7;

/// Characters of model description kept in the schema brief
const BRIEF_DESCRIPTION_CHARS: usize = 80;

const PROMPT_TEMPLATE: &str = r#"You are a SQL generation assistant for the WhyLine Denver transit analytics platform.
You may query ONLY these models:
{{ schema_brief }}

Return a JSON object with keys 'sql' and 'explanation'.
- 'sql' must contain a single DuckDB/BigQuery compatible SELECT statement.
- Do not include semicolons or additional statements.
- 'explanation' must be 2-3 succinct sentences for non-technical transit stakeholders,
  describing what insights the query surfaces and why it matters.
- All FROM/JOIN sources must come from the allow-listed models; derive comparisons using CTEs or subqueries built on those tables.
- Keep results under {{ row_limit }} rows and honor recency cues by filtering service_date_mst within 30-90 days when appropriate.
- Treat the user filters below as scalar values only; never reference them as tables or views.
- Do not invent placeholder tables (e.g., filters, zero, baseline); name any CTEs you create based on the metrics being calculated.
- When analyzing crash trends described as 'this month', 'recent', or 'last few days', default to window_days = 30 on mart_crash_proximity_by_stop and anchor comparisons on the latest as_of_date values.
- Prefer analytic window functions such as LAG() and ROW_NUMBER() to calculate change over time instead of fabricating previous_* tables.
- Include severity metrics (fatal and severe crash counts) alongside total crashes when the question focuses on risk or hotspots.

Question: {{ question }}
User filters (values only):
{{ filters }}
"#;

/// Prompt rendering errors
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("Prompt template error: {0}")]
    Template(#[from] minijinja::Error),
}

/// One line per model, sorted by name:
/// `name: description | cols: c1, c2, ...`
pub fn build_schema_brief(models: &ModelCatalog, max_columns: usize) -> String {
    let mut sorted: Vec<_> = models.values().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    sorted
        .into_iter()
        .map(|model| {
            let description: String = model
                .description
                .as_deref()
                .unwrap_or_default()
                .chars()
                .take(BRIEF_DESCRIPTION_CHARS)
                .collect();
            let columns = model.column_names().take(max_columns).collect::<Vec<_>>().join(", ");
            format!("{}: {} | cols: {}", model.name, description, columns)
                .trim()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders the SQL-generation prompt
pub struct PromptBuilder {
    env: Environment<'static>,
    row_limit: String,
}

impl PromptBuilder {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);

        Self {
            env,
            row_limit: "5,000".to_string(),
        }
    }

    /// Row ceiling quoted to the model, e.g. `5,000`
    pub fn with_row_limit(mut self, limit: u64) -> Self {
        self.row_limit = group_thousands(limit);
        self
    }

    pub fn render(&self, question: &str, filters: &FilterState, schema_brief: &str) -> Result<String, PromptError> {
        let prompt = self.env.render_str(
            PROMPT_TEMPLATE,
            context! {
                schema_brief => schema_brief,
                question => question,
                filters => filters.to_prompt_json(),
                row_limit => self.row_limit.as_str(),
            },
        )?;
        Ok(prompt)
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the prompt with the default builder
pub fn build_prompt(question: &str, filters: &FilterState, schema_brief: &str) -> Result<String, PromptError> {
    PromptBuilder::new().render(question, filters, schema_brief)
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
