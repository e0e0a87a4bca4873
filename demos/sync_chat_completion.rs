use chatgpt_client::{Client, Message, ROLE_SYSTEM, ROLE_USER};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), chatgpt_client::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = Client::from_environment()?;

    let messages = [
        Message::new(ROLE_SYSTEM, "You are a helpful assistant."),
        Message::new(ROLE_USER, "What is the capital of France?"),
    ];

    let reply = client.send_message("gpt-3.5-turbo", &messages)?;
    println!("{}", reply);

    Ok(())
}
