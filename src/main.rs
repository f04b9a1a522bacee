//! Bee Desk - 电商客服智能体
//!
//! 入口：初始化日志、加载配置、准备数据库与政策索引、创建编排器，并运行命令行对话循环。
//! 用法：`bee-desk [config.toml]`

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use bee_desk::config::load_config;
use bee_desk::core::{spawn_session, AgentBuilder, AgentEvent, Command, Reply};
use bee_desk::llm::{create_embedder_from_config, HashingEmbedder};
use bee_desk::memory::PolicyIndex;
use bee_desk::observability;
use bee_desk::store::{init_database, SqliteStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn print_welcome() {
    println!("Customer Support Agent");
    println!("Ask about orders, products, or company policies (returns, shipping, warranty).");
    println!("Commands: help, clear (reset conversation), quit / exit / q");
    println!();
}

fn print_event(ev: &AgentEvent) {
    match ev {
        AgentEvent::ToolCall { tool, args, .. } => println!("  -> {tool} {args}"),
        AgentEvent::ToolFinished {
            tool, ok, elapsed_ms, ..
        } => {
            let status = if *ok { "done" } else { "failed" };
            println!("  <- {tool} {status} ({elapsed_ms} ms)");
        }
        AgentEvent::AgentActivity {
            agent,
            action,
            attempt,
        } => println!("     {agent}: {action} (attempt {attempt})"),
        AgentEvent::BudgetExceeded { what, limit } => {
            println!("  !! {what} budget of {limit} exhausted, answering with what was found")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    cfg.validate().context("Invalid configuration")?;

    init_database(&cfg.data.database_path).context("Failed to initialize database")?;
    let store = SqliteStore::open(&cfg.data.database_path, cfg.data.pool_size)
        .context("Failed to open database connection pool")?;

    let embedder = create_embedder_from_config(cfg.llm.base_url.as_deref(), &cfg.llm.embedding_model, None);
    let index = match PolicyIndex::load_dir(embedder, &cfg.data.policies_dir).await {
        Ok(index) => index,
        Err(e) => {
            tracing::warn!(error = %e, "embedding service unavailable, indexing policies locally");
            PolicyIndex::load_dir(Arc::new(HashingEmbedder::default()), &cfg.data.policies_dir)
                .await
                .map_err(|e| anyhow!(e))
                .context("Failed to index policy documents")?
        }
    };

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
    let orchestrator = AgentBuilder::new(cfg)
        .with_system_prompt_from_file()?
        .with_events(ev_tx)
        .build(Arc::new(store), Arc::new(index))
        .context("Failed to build agent")?;

    let (cmd_tx, mut reply_rx, session) = spawn_session(orchestrator);
    print_welcome();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("You: ");
        std::io::stdout().flush().ok();
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let input = line.trim();
        let cmd = match input.to_lowercase().as_str() {
            "quit" | "exit" | "q" => break,
            "help" => {
                print_welcome();
                continue;
            }
            "" => continue,
            "clear" => Command::Clear,
            _ => Command::Submit(input.to_string()),
        };
        if matches!(cmd, Command::Submit(_)) {
            println!("Thinking...");
        }
        cmd_tx
            .send(cmd)
            .map_err(|_| anyhow!("session is no longer running"))?;

        let reply = loop {
            tokio::select! {
                biased;
                Some(ev) = ev_rx.recv() => print_event(&ev),
                reply = reply_rx.recv() => break reply,
            }
        };
        while let Ok(ev) = ev_rx.try_recv() {
            print_event(&ev);
        }
        match reply {
            Some(Reply::Answer(text)) => println!("\nAgent:\n{text}\n"),
            Some(Reply::Cleared) => println!("Conversation history cleared.\n"),
            Some(Reply::Fatal(msg)) => return Err(anyhow!("session terminated: {msg}")),
            None => return Err(anyhow!("session ended unexpectedly")),
        }
    }

    let _ = cmd_tx.send(Command::Quit);
    let orchestrator = session.await.context("Session task failed")?;
    let (prompt, completion, total) = orchestrator.token_usage();
    if total > 0 {
        println!("Tokens used: {total} (prompt {prompt}, completion {completion})");
    }
    println!("Goodbye!");
    Ok(())
}
