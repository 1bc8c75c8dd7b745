use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use persona::config::PersonaConfig;

/// Interactive loop: one line in, one agent response out. `exit` or EOF ends it.
pub async fn chat(config: PersonaConfig) -> Result<()> {
    let agent = persona::server::start_agent(config).await?;

    println!("Chatting with {} (type 'exit' to quit)", agent.agent_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let response = agent.process_text(line).await;
        println!("{}", response.content);
        println!(
            "   [{} | confidence {:.2}]",
            response.intent().unwrap_or("error"),
            response.confidence
        );
    }

    agent.shutdown().await;
    Ok(())
}
