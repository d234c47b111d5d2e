mod common;

use common::*;
use tablechat::chart::ChartKind;
use tablechat::events::{PipelineEvent, Stage, TurnState};
use tablechat::execution::WarehouseError;
use tablechat::execution_loop::SqlErrorClass;
use tablechat::{ChartStatus, ChatError, ConversationSession, Role, TurnOutcome};

#[tokio::test]
async fn test_greeting_gets_simple_answer() {
    let llm = ScriptedGeneration::new(&[SIMPLE, "Hello! How can I help you today?"]);
    let warehouse = ScriptedWarehouse::new(vec![]);
    let (orchestrator, mut rx) = orchestrator(llm.clone(), warehouse.clone());

    let mut session = ConversationSession::new("s1");
    let report = orchestrator.handle_turn(&mut session, "Hi, how are you?").await.unwrap();

    assert!(!report.classification.is_query);
    assert!(report.classification.is_simple_answer);
    assert_eq!(
        report.outcome,
        TurnOutcome::Simple {
            answer: "Hello! How can I help you today?".to_string()
        }
    );
    assert!(warehouse.executed().is_empty());
    assert_eq!(session.len(), 2);
    assert_eq!(session.turns()[1].role, Role::Assistant);

    let states: Vec<TurnState> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::State(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![TurnState::Classifying, TurnState::Simple, TurnState::Done]);
}

#[tokio::test]
async fn test_query_without_chart() {
    let sql = sql_reply("SELECT COUNT(*) AS N FROM DB.SALES.ORDERS");
    let llm = ScriptedGeneration::new(&[QUERY, sql.as_str()]);
    let warehouse = ScriptedWarehouse::new(vec![Ok(count_result(42))]);
    let (orchestrator, _rx) = orchestrator(llm.clone(), warehouse.clone());

    let mut session = ConversationSession::new("s1");
    let report = orchestrator
        .handle_turn(&mut session, "How many customers we have this week?")
        .await
        .unwrap();

    match report.outcome {
        TurnOutcome::Answered {
            results,
            chart,
            attempts,
        } => {
            assert_eq!(attempts, 1);
            assert_eq!(chart, ChartStatus::NotRequested);
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].candidate.sql(), "SELECT COUNT(*) AS N FROM DB.SALES.ORDERS");
            assert_eq!(results[0].result_set, count_result(42));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(warehouse.executed(), vec!["SELECT COUNT(*) AS N FROM DB.SALES.ORDERS"]);
    // classifier and query generator only; no chart call
    assert_eq!(llm.prompts().len(), 2);
    assert!(llm.prompts()[1].contains("- **COUNTRY**: TEXT"));
    assert_eq!(session.turns()[1].result_set, Some(count_result(42)));
}

#[tokio::test]
async fn test_query_with_chart() {
    let sql = sql_reply("SELECT COUNTRY, SUM(AMOUNT) AS SALES FROM DB.SALES.ORDERS GROUP BY COUNTRY");
    let chart = "```json\n{\"chart_type\": \"pie\", \"x\": \"COUNTRY\", \"y\": \"SALES\", \"aggregation\": \"none\", \"title\": \"Sales by country\"}\n```";
    let llm = ScriptedGeneration::new(&[QUERY_WITH_CHART, sql.as_str(), chart]);
    let warehouse = ScriptedWarehouse::new(vec![Ok(sales_result())]);
    let (orchestrator, _rx) = orchestrator(llm.clone(), warehouse);

    let mut session = ConversationSession::new("s1");
    let report = orchestrator
        .handle_turn(&mut session, "I need a pie chart of sales by country")
        .await
        .unwrap();

    let TurnOutcome::Answered { chart, .. } = report.outcome else {
        panic!("expected an answered turn");
    };
    let ChartStatus::Rendered(artifact) = chart else {
        panic!("expected a rendered chart");
    };
    assert_eq!(artifact.kind, ChartKind::Pie);
    assert_eq!(artifact.title, "Sales by country");
    assert_eq!(artifact.vega_lite["data"]["values"].as_array().unwrap().len(), 3);

    // chart prompt sees the rows it is charting
    assert!(llm.prompts()[2].contains("\"COUNTRY\":\"AR\""));

    let last = session.turns().last().unwrap();
    assert!(last.chart.is_some());
    assert_eq!(session.len(), 3);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let bad = sql_reply("SELECT PATIENT FROM DB.SALES.ORDERS");
    let llm = ScriptedGeneration::new(&[QUERY, bad.as_str(), bad.as_str(), bad.as_str()]);
    let warehouse = ScriptedWarehouse::new(vec![
        Err(WarehouseError::Programming("invalid identifier 'PATIENT' (1)".to_string())),
        Err(WarehouseError::Programming("invalid identifier 'PATIENT' (2)".to_string())),
        Err(WarehouseError::Programming("invalid identifier 'PATIENT' (3)".to_string())),
    ]);
    let (orchestrator, mut rx) = orchestrator(llm.clone(), warehouse.clone());

    let mut session = ConversationSession::new("s1");
    let err = orchestrator
        .handle_turn(&mut session, "List patients")
        .await
        .unwrap_err();

    match &err {
        ChatError::RetriesExhausted { attempts, last_error } => {
            assert_eq!(*attempts, 3);
            assert!(last_error.ends_with("(3)"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(warehouse.executed().len(), 3);

    // attempt N is regenerated from the failure of attempt N-1
    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 4);
    assert!(!prompts[1].contains("The error in the previous snowflake sql query"));
    assert!(prompts[2].contains("invalid identifier 'PATIENT' (1)"));
    assert!(prompts[3].contains("invalid identifier 'PATIENT' (2)"));
    assert!(!prompts[3].contains("invalid identifier 'PATIENT' (1)"));

    // no partial result; the user sees the failure message
    assert_eq!(session.len(), 2);
    assert!(session.turns().iter().all(|t| t.result_set.is_none()));
    assert_eq!(session.last_assistant_message(), Some(err.user_message().as_str()));

    let failures: Vec<(u32, SqlErrorClass)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::AttemptFailed { attempt, class, .. } => Some((attempt, class)),
            _ => None,
        })
        .collect();
    assert_eq!(
        failures,
        vec![
            (1, SqlErrorClass::ColumnNotFound),
            (2, SqlErrorClass::ColumnNotFound),
            (3, SqlErrorClass::ColumnNotFound),
        ]
    );
}

#[tokio::test]
async fn test_retry_then_success_state_sequence() {
    let bad = sql_reply("SELECT COUNT(*) AS N FROM DB.SALES.ORDERS WHERE");
    let good = sql_reply("SELECT COUNT(*) AS N FROM DB.SALES.ORDERS");
    let llm = ScriptedGeneration::new(&[QUERY, bad.as_str(), good.as_str()]);
    let warehouse = ScriptedWarehouse::new(vec![
        Err(WarehouseError::Programming("syntax error line 1 at position 46 unexpected '<EOF>'".to_string())),
        Ok(count_result(7)),
    ]);
    let (orchestrator, mut rx) = orchestrator(llm.clone(), warehouse);

    let mut session = ConversationSession::new("s1");
    let report = orchestrator.handle_turn(&mut session, "how many orders?").await.unwrap();
    assert!(matches!(report.outcome, TurnOutcome::Answered { attempts: 2, .. }));

    let states: Vec<TurnState> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::State(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            TurnState::Classifying,
            TurnState::Querying { attempt: 1 },
            TurnState::Executing { attempt: 1 },
            TurnState::Retry { attempt: 1 },
            TurnState::Querying { attempt: 2 },
            TurnState::Executing { attempt: 2 },
            TurnState::Success,
            TurnState::Done,
        ]
    );
}

#[tokio::test]
async fn test_chart_failure_keeps_table() {
    let sql = sql_reply("SELECT COUNTRY, SALES FROM DB.SALES.ORDERS");
    let llm = ScriptedGeneration::new(&[QUERY_WITH_CHART, sql.as_str(), "Sorry, I can't draw that."]);
    let warehouse = ScriptedWarehouse::new(vec![Ok(sales_result())]);
    let (orchestrator, mut rx) = orchestrator(llm, warehouse);

    let mut session = ConversationSession::new("s1");
    let report = orchestrator
        .handle_turn(&mut session, "chart sales by country")
        .await
        .unwrap();

    let TurnOutcome::Answered { results, chart, .. } = report.outcome else {
        panic!("expected an answered turn");
    };
    assert_eq!(results[0].result_set, sales_result());
    assert!(matches!(chart, ChartStatus::Unavailable(_)));
    assert!(session.turns().iter().all(|t| t.chart.is_none()));
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, PipelineEvent::ChartUnavailable { .. })));
}

#[tokio::test]
async fn test_chart_on_missing_column_is_unavailable() {
    let sql = sql_reply("SELECT COUNTRY, SALES FROM DB.SALES.ORDERS");
    let chart = "```json\n{\"chart_type\": \"bar\", \"x\": \"REGION\", \"y\": \"SALES\"}\n```";
    let llm = ScriptedGeneration::new(&[QUERY_WITH_CHART, sql.as_str(), chart]);
    let warehouse = ScriptedWarehouse::new(vec![Ok(sales_result())]);
    let (orchestrator, _rx) = orchestrator(llm, warehouse);

    let mut session = ConversationSession::new("s1");
    let report = orchestrator.handle_turn(&mut session, "bar chart by region").await.unwrap();
    assert!(matches!(
        report.outcome,
        TurnOutcome::Answered {
            chart: ChartStatus::Unavailable(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_connection_loss_recovered_transparently() {
    let sql = sql_reply("SELECT COUNT(*) AS N FROM DB.SALES.ORDERS");
    let llm = ScriptedGeneration::new(&[QUERY, sql.as_str()]);
    let warehouse = ScriptedWarehouse::new(vec![
        Err(WarehouseError::Connection("Authentication token has expired".to_string())),
        Ok(count_result(3)),
    ]);
    let (orchestrator, _rx) = orchestrator(llm.clone(), warehouse.clone());

    let mut session = ConversationSession::new("s1");
    let report = orchestrator.handle_turn(&mut session, "how many?").await.unwrap();

    assert!(matches!(report.outcome, TurnOutcome::Answered { attempts: 1, .. }));
    assert_eq!(warehouse.reconnect_count(), 1);
    assert_eq!(warehouse.executed().len(), 2);
    // no regeneration happened
    assert_eq!(llm.prompts().len(), 2);
}

#[tokio::test]
async fn test_all_candidates_rerun_after_failure() {
    let first = "```sql\nSELECT 1 AS N\n```\n```sql\nSELECT BAD\n```";
    let second = "```sql\nSELECT 1 AS N\n```\n```sql\nSELECT 2 AS N\n```";
    let llm = ScriptedGeneration::new(&[QUERY, first, second]);
    let warehouse = ScriptedWarehouse::new(vec![
        Ok(count_result(1)),
        Err(WarehouseError::Programming("invalid identifier 'BAD'".to_string())),
        Ok(count_result(1)),
        Ok(count_result(2)),
    ]);
    let (orchestrator, _rx) = orchestrator(llm, warehouse.clone());

    let mut session = ConversationSession::new("s1");
    let report = orchestrator.handle_turn(&mut session, "one and two").await.unwrap();

    let TurnOutcome::Answered { results, attempts, .. } = report.outcome else {
        panic!("expected an answered turn");
    };
    assert_eq!(attempts, 2);
    assert_eq!(results.len(), 2);
    assert_eq!(
        warehouse.executed(),
        vec!["SELECT 1 AS N", "SELECT BAD", "SELECT 1 AS N", "SELECT 2 AS N"]
    );
    // user turn plus one assistant turn per candidate of the successful attempt
    assert_eq!(session.len(), 3);
}

#[tokio::test]
async fn test_missing_sql_block_counts_as_attempt() {
    let good = sql_reply("SELECT COUNT(*) AS N FROM DB.SALES.ORDERS");
    let llm = ScriptedGeneration::new(&[QUERY, "SELECT COUNT(*) FROM DB.SALES.ORDERS", good.as_str()]);
    let warehouse = ScriptedWarehouse::new(vec![Ok(count_result(9))]);
    let (orchestrator, _rx) = orchestrator(llm.clone(), warehouse.clone());

    let mut session = ConversationSession::new("s1");
    let report = orchestrator.handle_turn(&mut session, "count").await.unwrap();

    assert!(matches!(report.outcome, TurnOutcome::Answered { attempts: 2, .. }));
    assert_eq!(warehouse.executed().len(), 1);
    assert!(llm.prompts()[2].contains("no ```sql block"));
}

#[tokio::test]
async fn test_unparseable_classification_is_fatal() {
    let llm = ScriptedGeneration::new(&["Sure! This looks like a data question."]);
    let warehouse = ScriptedWarehouse::new(vec![]);
    let (orchestrator, _rx) = orchestrator(llm, warehouse.clone());

    let mut session = ConversationSession::new("s1");
    let err = orchestrator.handle_turn(&mut session, "sales?").await.unwrap_err();

    assert!(matches!(err, ChatError::Classification(_)));
    assert!(warehouse.executed().is_empty());
    assert_eq!(session.len(), 2);
    assert_eq!(session.turns()[1].role, Role::Assistant);
}

#[tokio::test]
async fn test_text_increments_are_streamed() {
    let llm = ScriptedGeneration::new(&[SIMPLE, "¡Hola! Estoy bien, gracias."]);
    let warehouse = ScriptedWarehouse::new(vec![]);
    let (orchestrator, mut rx) = orchestrator(llm, warehouse);

    let mut session = ConversationSession::new("s1");
    orchestrator.handle_turn(&mut session, "Hola, ¿cómo estás?").await.unwrap();

    let streamed: String = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::TextDelta {
                stage: Stage::SimpleAnswer,
                delta,
            } => Some(delta),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "¡Hola! Estoy bien, gracias.");
}
