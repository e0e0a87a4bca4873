use chatgpt_client::{ChatCompletions, Client, Message, Model, ROLE_USER};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), chatgpt_client::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = Client::from_environment()?;

    let request = ChatCompletions {
        model: Model::Gpt4,
        messages: vec![Message::new(ROLE_USER, "Who are you?")],
    };

    // The full response keeps every choice and its finish reason.
    let response = client.chat_completions(&request).await?;
    for choice in &response.choices {
        let reason = choice.finish_reason.as_deref().unwrap_or("unknown");
        println!("[{}] {}", reason, choice.message.content);
    }

    Ok(())
}
