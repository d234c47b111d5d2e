//! Prompt templates for every generation step
//!
//! Templates use `{name}` placeholders filled with [`fill`]; literal braces in
//! the JSON examples are left alone.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{(\w+)\}").expect("valid placeholder pattern");
}

pub const CLASSIFIER_TEMPLATE: &str = r#"Your goal is to evaluate if a user input is a question that can be answered by an SQL query over the table described below, or not.
If it is, you MUST also evaluate if a chart is needed to answer the question.

Inputs that do not need SQL are usually greetings, thanks and small talk, for example:
- Hi, nice to meet you!
- Hello, how are you?
- Hey, are you there?
- Thank you very much!

Examples of user input and expected output:

User input: Hi, how are you?
Your response: {"is_a_query": false, "include_chart": false, "simple_answer": true}

User input: I need a pie chart of sales by country
Your response: {"is_a_query": true, "include_chart": true, "simple_answer": false}

User input: How many customers we have this week?
Your response: {"is_a_query": true, "include_chart": false, "simple_answer": false}

{context}

Respond with a single JSON object with the boolean fields "is_a_query", "include_chart" and "simple_answer". Return nothing else.

The user input is delimited by four consecutive backticks.

````{user_input}````
"#;

pub const QUERY_TEMPLATE: &str = r#"Your goal is to give correct, executable Snowflake SQL queries to users.
You are given one table, the table name is in the <tableName> tag, the columns are in the <columns> tag.
For each question you should return only the Snowflake SQL query based on the question and the table.

{context}

Rules you must abide by:
<rules>
1. You MUST wrap the generated Snowflake SQL within a ```sql code block, e.g.
```sql
(select 1) union (select 2)
```
2. If the question does not ask for a limited set of results, you MUST NOT limit the number of rows.
3. Text / string where clauses must be fuzzy matches, e.g. ilike '%keyword%'.
4. If the request contains more than one question, answer each one with its own ```sql block.
5. Only use the columns given in <columns> and the table given in <tableName>. Do not invent table names.
6. Do not start an identifier with a digit.
</rules>

Return nothing but the SQL blocks.

User input:
{user_input}

Your generated query:
"#;

pub const ERROR_FEEDBACK_TEMPLATE: &str = r#"Your goal is to give correct, executable Snowflake SQL queries to users.
The previous Snowflake SQL query generated for this request failed. You are given the user input and the error returned for that query.
You are given one table, the table name is in the <tableName> tag, the columns are in the <columns> tag.

{context}

Rules you must abide by:
<rules>
1. The code MUST be Snowflake SQL, not BigQuery SQL or PostgreSQL.
2. You MUST wrap the generated Snowflake SQL within a ```sql code block, e.g.
```sql
(select 1) union (select 2)
```
3. If the request contains more than one question, answer each one with its own ```sql block.
4. If the question does not ask for a limited set of results, you MUST NOT limit the number of rows.
5. Text / string where clauses must be fuzzy matches, e.g. ilike '%keyword%'.
6. Only use the columns given in <columns> and the table given in <tableName>. Do not invent table names.
7. Do not start an identifier with a digit.
</rules>

Return nothing but the SQL blocks.

User input:
{user_input}

The error in the previous snowflake sql query:
{error_feedback}
{hint}
Your generated snowflake query without errors:
"#;

pub const CHART_TEMPLATE: &str = r#"Your goal is to describe a chart that answers the user's request using the query result below.
You do not write code. You return a single ```json block with this shape:
```json
{"chart_type": "bar", "x": "COLUMN", "y": "COLUMN", "aggregation": "sum", "color": null, "title": "Chart title"}
```

Fields:
- chart_type: one of "bar", "line", "pie", "scatter", "area", "histogram", or "none" if no chart fits the data.
- x: the column for the horizontal axis (the category column for pie charts, the value column for histograms).
- y: the numeric column to plot. May be null for histograms or when aggregation is "count".
- aggregation: one of "none", "sum", "mean", "count", "min", "max". Use "none" if the rows are already aggregated.
- color: an optional column used to split series, or null.
- title: a short title.

Only use column names that appear in the result columns.

{context}

Result columns: {columns}
Result rows (JSON, possibly truncated):
{rows}

User request:
{user_input}

Your chart description:
"#;

pub const SIMPLE_ANSWER_TEMPLATE: &str = r#"You are a helpful, respectful and honest assistant. Always answer as helpfully as possible, while being safe.
If a question does not make sense, or is not factually coherent, explain why instead of answering something not correct.

Your goal is to interact with the user, have a fluid conversation and answer the user's questions.
Users ask in Spanish and in English.

Rules you must abide by:
<rules>
1. If the question does not imply using code, answer with your knowledge but without code.
2. Answer in the language the user wrote in: Spanish for Spanish questions, English for English questions.
</rules>

This is what the user asked:

{user_input}

Your response, in the user's language:
"#;

/// Replace each `{key}` in `template` with its value in one pass.
/// Substituted text is never scanned again; unknown keys stay as written.
pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| {
            let key = &caps[1];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_replaces_placeholders() {
        let prompt = fill(QUERY_TEMPLATE, &[("context", "<tableName> T </tableName>"), ("user_input", "how many rows?")]);
        assert!(prompt.contains("<tableName> T </tableName>"));
        assert!(prompt.contains("how many rows?"));
        assert!(!prompt.contains("{user_input}"));
    }

    #[test]
    fn test_fill_keeps_json_braces() {
        let prompt = fill(CLASSIFIER_TEMPLATE, &[("context", ""), ("user_input", "hi")]);
        assert!(prompt.contains(r#"{"is_a_query": false, "include_chart": false, "simple_answer": true}"#));
        assert!(prompt.contains("````hi````"));
    }

    #[test]
    fn test_feedback_template_carries_error() {
        let prompt = fill(
            ERROR_FEEDBACK_TEMPLATE,
            &[
                ("context", ""),
                ("user_input", "count patients"),
                ("error_feedback", "invalid identifier 'PATIENT'"),
                ("hint", ""),
            ],
        );
        assert!(prompt.contains("The error in the previous snowflake sql query:\ninvalid identifier 'PATIENT'"));
    }

    #[test]
    fn test_fill_does_not_rescan_values() {
        let prompt = fill(
            ERROR_FEEDBACK_TEMPLATE,
            &[
                ("context", "cell {user_input}"),
                ("user_input", "what is {hint}? and {error_feedback}"),
                ("error_feedback", "invalid identifier 'X'"),
                ("hint", "Hint: check the column list"),
            ],
        );
        assert!(prompt.contains("what is {hint}? and {error_feedback}"));
        assert!(prompt.contains("cell {user_input}"));
        assert_eq!(prompt.matches("Hint: check the column list").count(), 1);
    }
}
