//! Ask the SQL tutor one question.
//!
//! # Running
//!
//! ```bash
//! OPENAI_API_KEY=your_key cargo run --example tutor_chat -- "How do I count students per course?"
//! ```
//!
//! Pass `--structured` to get the answer as a query, explanation and common
//! mistakes, or `--stream` to print the answer as it is generated. To see
//! debug logs:
//! ```bash
//! RUST_LOG=michael_tutor=debug OPENAI_API_KEY=your_key cargo run --example tutor_chat -- "..."
//! ```

use futures::StreamExt;
use michael_tutor::{
    AgentDefaults, InMemoryConfigStore, InputItem, KeyedMutex, RuntimeConfigCache,
    StaticWeekContent, ToolCallLoop, ToolLoopEvent, ToolLoopOptions, ToolLoopOutcome, TutorContext,
    extract_sql_tutor_response, providers::OpenAIResponsesProvider, sql_tutor_response_format,
    tutor_handler,
};
use std::io::Write;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut structured = false;
    let mut stream = false;
    let mut words = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--structured" => structured = true,
            "--stream" => stream = true,
            _ => words.push(arg),
        }
    }
    let question = if words.is_empty() {
        "Which SQL concepts can I use this week?".to_owned()
    } else {
        words.join(" ")
    };

    let config = RuntimeConfigCache::new(
        AgentDefaults::from_env(),
        Arc::new(InMemoryConfigStore::new()),
    );
    let tutor = ToolCallLoop::new(OpenAIResponsesProvider::from_env()?)
        .with_config_source(Arc::new(config));
    let handler = tutor_handler(TutorContext::new(
        StaticWeekContent::new()
            .with_week(9, "Subqueries: nested SELECT in WHERE and FROM.")
            .with_current_week(9),
    ));

    let options = ToolLoopOptions {
        text: structured.then(sql_tutor_response_format),
        ..ToolLoopOptions::default()
    };

    // One turn per conversation at a time.
    let conversations = KeyedMutex::new();
    let input = vec![InputItem::user(question)];
    let outcome = if stream {
        conversations
            .run_exclusive("demo-conversation", || async {
                let mut events = std::pin::pin!(tutor.run_stream(input, &handler, options));
                let mut outcome: Option<ToolLoopOutcome> = None;
                print!("Michael: ");
                while let Some(event) = events.next().await {
                    match event? {
                        ToolLoopEvent::TextDelta(delta) => {
                            print!("{delta}");
                            std::io::stdout().flush()?;
                        }
                        ToolLoopEvent::ToolCallStarted { name, .. } => eprintln!("[calling {name}]"),
                        ToolLoopEvent::Completed(done) => outcome = Some(done),
                        ToolLoopEvent::ResponseCreated { .. }
                        | ToolLoopEvent::ToolCallCompleted { .. } => {}
                    }
                }
                println!();
                outcome.ok_or_else(|| anyhow::anyhow!("stream ended without an answer"))
            })
            .await?
    } else {
        let outcome = conversations
            .run_exclusive("demo-conversation", || tutor.run(input, &handler, options))
            .await?;
        println!("Michael: {}", outcome.text);
        outcome
    };

    if structured && let Some(answer) = extract_sql_tutor_response(&outcome.response) {
        println!("\nQuery:\n{}", answer.query);
        for mistake in &answer.common_mistakes {
            println!("- {mistake}");
        }
    }
    println!(
        "\n---\nCompleted in {} requests (response {})",
        outcome.iterations, outcome.response_id
    );

    Ok(())
}
